pub mod controller;
pub mod quota;
pub mod serve;
pub mod status;

use tabrelay_core::{Config, Paths};
use tabrelay_storage::{Database, IdentityService};

/// Loads config and opens the database shared by every subcommand.
pub(crate) fn open_workspace() -> anyhow::Result<(Paths, Config, Database)> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;
    let db = Database::open(&paths.db_file())?;
    Ok((paths, config, db))
}

pub(crate) fn resolve_identity(config: &Config, db: &Database) -> anyhow::Result<String> {
    let identity = IdentityService::new(db.clone()).resolve(config.identity.install_id.as_deref())?;
    Ok(identity)
}
