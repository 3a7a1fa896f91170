use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::archive::SqliteArchive;
use crate::cli::GlobalArgs;
use crate::config::EngineConfig;
use crate::db::open_database;
use crate::engine::CalibrationEngine;
use crate::identity::RoleDirectory;
use crate::notify::TracingNotifier;

pub(super) fn open_engine(global: &GlobalArgs) -> Result<CalibrationEngine> {
    let config = EngineConfig::load(global.config.as_deref())?.with_seed(global.seed);
    let connection = open_database(&global.db_path)?;
    let archive = SqliteArchive::open(&global.archive_db_path)?;

    let roles = if global.roles_path.exists() {
        RoleDirectory::load(&global.roles_path).with_context(|| {
            format!("failed to load role directory {}", global.roles_path.display())
        })?
    } else {
        warn!(
            path = %global.roles_path.display(),
            "role directory missing; no user holds any role"
        );
        RoleDirectory::default()
    };

    debug!(
        db_path = %global.db_path.display(),
        archive_db_path = %global.archive_db_path.display(),
        seeded = config.rng_seed.is_some(),
        "engine opened"
    );
    Ok(CalibrationEngine::new(
        connection,
        Box::new(archive),
        Box::new(roles),
        Box::new(TracingNotifier),
        config,
    ))
}
