use anyhow::{Context, Result};

use super::context::open_engine;
use crate::cli::{GlobalArgs, SessionIdArgs};
use crate::util::write_json_stdout;

pub fn run(global: &GlobalArgs, args: SessionIdArgs) -> Result<()> {
    let mut engine = open_engine(global)?;
    let summary = engine
        .randomize(&args.session_id)
        .with_context(|| format!("failed to randomize session {}", args.session_id))?;
    write_json_stdout(&summary)
}
