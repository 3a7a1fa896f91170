use anyhow::Result;
use serde::Serialize;
use tracing::info;

use crate::archive::{ArchiveRecord, SqliteArchive};
use crate::cli::{ArchiveCommand, GlobalArgs};
use crate::util::{read_json_file, write_json_stdout};

#[derive(Debug, Serialize)]
struct ImportSummary {
    archive_db_path: String,
    imported: usize,
}

pub fn run(global: &GlobalArgs, command: ArchiveCommand) -> Result<()> {
    match command {
        ArchiveCommand::Import(args) => {
            let records: Vec<ArchiveRecord> = read_json_file(&args.input)?;
            let mut archive = SqliteArchive::open(&global.archive_db_path)?;
            let imported = archive.import(&records)?;
            info!(
                input = %args.input.display(),
                archive_db_path = %global.archive_db_path.display(),
                imported,
                "archive records imported"
            );
            write_json_stdout(&ImportSummary {
                archive_db_path: global.archive_db_path.display().to_string(),
                imported,
            })
        }
    }
}
