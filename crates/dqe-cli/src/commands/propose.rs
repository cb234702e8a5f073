use anyhow::{bail, Result};

/// Depends on a catalog store this repository does not implement — see
/// `import_catalog`. Stubbed the same way: an explicit, loud failure.
pub fn run(datasets: Vec<String>, catalog_id: String, profile: String) -> Result<()> {
    bail!(
        "NotImplemented: propose(datasets={datasets:?}, catalog_id={catalog_id}, profile={profile}) — no catalog store is wired up"
    );
}
