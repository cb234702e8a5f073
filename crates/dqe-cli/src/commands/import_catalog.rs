use anyhow::{bail, Result};

/// Catalog-import file adapters are an explicit non-goal here: this
/// operation is named in the CLI surface but never wired to a real
/// importer. Always fails with `NotImplemented` rather than silently
/// no-opping, so a caller scripting against this surface sees the gap
/// immediately instead of a false success.
pub fn run(file: String, source_type: String, env: String) -> Result<()> {
    bail!("NotImplemented: import_catalog(file={file}, source_type={source_type}, env={env}) — catalog-import file adapters are not shipped in this repository");
}
