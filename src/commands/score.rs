use anyhow::{Context, Result};
use serde_json::Value;

use super::context::open_engine;
use crate::cli::{GlobalArgs, ScoreCommand};
use crate::util::write_json_stdout;

pub fn run(global: &GlobalArgs, command: ScoreCommand) -> Result<()> {
    match command {
        ScoreCommand::Submit(args) => {
            let details = match args.details.as_deref() {
                Some(raw) => serde_json::from_str(raw).context("failed to parse --details json")?,
                None => Value::Null,
            };

            let mut engine = open_engine(global)?;
            let score = engine
                .submit_score(
                    &args.session_id,
                    &args.ticket_id,
                    &args.user_id,
                    args.score,
                    details,
                )
                .with_context(|| {
                    format!(
                        "failed to submit score for ticket {} in session {}",
                        args.ticket_id, args.session_id
                    )
                })?;
            write_json_stdout(&score)
        }
    }
}
