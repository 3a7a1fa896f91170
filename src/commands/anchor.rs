use anyhow::{Context, Result};

use super::context::open_engine;
use crate::cli::{AnchorCommand, GlobalArgs};
use crate::util::write_json_stdout;

pub fn run(global: &GlobalArgs, command: AnchorCommand) -> Result<()> {
    let mut engine = open_engine(global)?;

    match command {
        AnchorCommand::Validate(args) => {
            let anchor = engine
                .validate_anchor(
                    &args.anchor_id,
                    &args.user_id,
                    args.approved,
                    args.reason.as_deref(),
                )
                .with_context(|| format!("failed to record decision on anchor {}", args.anchor_id))?;
            write_json_stdout(&anchor)
        }
    }
}
