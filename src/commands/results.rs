use anyhow::{Context, Result};

use super::context::open_engine;
use crate::cli::{GlobalArgs, ResultsCommand};
use crate::util::write_json_stdout;

pub fn run(global: &GlobalArgs, command: ResultsCommand) -> Result<()> {
    let mut engine = open_engine(global)?;

    match command {
        ResultsCommand::Calculate(args) => {
            let summary = engine
                .calculate_results(&args.session_id)
                .with_context(|| format!("failed to calculate results for {}", args.session_id))?;
            write_json_stdout(&summary)
        }
    }
}
