use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::util::ensure_parent_directory;

mod rows;
mod schema;
#[cfg(test)]
mod tests;

pub use rows::*;
pub use schema::{configure_connection, ensure_schema};

pub const DB_SCHEMA_VERSION: &str = "0.1.0";

pub fn open_database(db_path: &Path) -> Result<Connection> {
    ensure_parent_directory(db_path)?;
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)
        .with_context(|| format!("failed to prepare schema in {}", db_path.display()))?;
    Ok(connection)
}

#[cfg(test)]
pub fn open_in_memory() -> Result<Connection> {
    let connection = Connection::open_in_memory().context("failed to open in-memory database")?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}
