use anyhow::{Context, Result};
use serde_json::json;

use super::context::open_engine;
use crate::cli::{GlobalArgs, SessionCommand};
use crate::model::NewSession;
use crate::util::{read_json_file, write_json_stdout};

pub fn run(global: &GlobalArgs, command: SessionCommand) -> Result<()> {
    let mut engine = open_engine(global)?;

    match command {
        SessionCommand::Create(args) => {
            let input: NewSession = read_json_file(&args.input)?;
            let detail = engine
                .create_session(&input)
                .with_context(|| format!("failed to create session from {}", args.input.display()))?;
            write_json_stdout(&detail)
        }
        SessionCommand::Show(args) => {
            let detail = engine
                .session_detail(&args.session_id)
                .with_context(|| format!("failed to load session {}", args.session_id))?;
            write_json_stdout(&detail)
        }
        SessionCommand::Cancel(args) => {
            let session = engine
                .cancel_session(&args.session_id)
                .with_context(|| format!("failed to cancel session {}", args.session_id))?;
            write_json_stdout(&session)
        }
        SessionCommand::Delete(args) => {
            engine
                .delete_session(&args.session_id)
                .with_context(|| format!("failed to delete session {}", args.session_id))?;
            write_json_stdout(&json!({ "deleted": args.session_id }))
        }
    }
}
