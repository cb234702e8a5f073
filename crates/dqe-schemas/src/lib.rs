//! dqe-schemas
//!
//! Canonical data model shared by every component of the orchestrator: test
//! definitions, the IR handed from compiler to SQL generator, run/run-test/
//! artifact records, and the progress-stream event envelope.
//!
//! Every "dynamic dict" the distilled design sketched (`Dict[str, Any]` for
//! IR/observed/expected) is represented here as a tagged `enum` or a typed
//! struct instead, so mismatched shapes are caught at compile time rather
//! than at a JSON boundary.

pub mod assertion;
pub mod ir;
pub mod progress;
pub mod run;
pub mod signature;
pub mod test_def;

pub use assertion::Assertion;
pub use ir::{Dialect, Ir};
pub use progress::{ProgressEvent, ProgressEventType};
pub use run::{Artifact, ArtifactKind, Run, RunStatus, RunTest, RunTestStatus};
pub use signature::dataset_signature;
pub use test_def::{
    Gate, Severity, TestDefinition, TestKind, TestSuite, Tolerance, Window,
};
