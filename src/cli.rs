use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "calib",
    version,
    about = "MSA/R&R calibration sessions for QA rater teams"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(long, global = true, default_value = ".cache/calibration/calibration.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, global = true, default_value = ".cache/calibration/archive.sqlite")]
    pub archive_db_path: PathBuf,

    #[arg(long, global = true, default_value = ".cache/calibration/roles.json")]
    pub roles_path: PathBuf,

    /// JSON engine configuration; every field is optional.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Fixed RNG seed, overriding `rng_seed` from the configuration file.
    #[arg(long, global = true)]
    pub seed: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(subcommand)]
    Archive(ArchiveCommand),
    #[command(subcommand)]
    Session(SessionCommand),
    Randomize(SessionIdArgs),
    #[command(subcommand)]
    Anchor(AnchorCommand),
    #[command(subcommand)]
    Score(ScoreCommand),
    #[command(subcommand)]
    Results(ResultsCommand),
}

#[derive(Subcommand, Debug)]
pub enum ArchiveCommand {
    /// Upserts released audit records from a JSON array.
    Import(InputArgs),
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    Create(InputArgs),
    Show(SessionIdArgs),
    Cancel(SessionIdArgs),
    Delete(SessionIdArgs),
}

#[derive(Subcommand, Debug)]
pub enum AnchorCommand {
    Validate(ValidateAnchorArgs),
}

#[derive(Subcommand, Debug)]
pub enum ScoreCommand {
    Submit(SubmitScoreArgs),
}

#[derive(Subcommand, Debug)]
pub enum ResultsCommand {
    Calculate(SessionIdArgs),
}

#[derive(Args, Debug, Clone)]
pub struct InputArgs {
    #[arg(long)]
    pub input: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SessionIdArgs {
    #[arg(long)]
    pub session_id: String,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateAnchorArgs {
    #[arg(long)]
    pub anchor_id: String,

    #[arg(long)]
    pub user_id: String,

    #[arg(long, action = ArgAction::Set)]
    pub approved: bool,

    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct SubmitScoreArgs {
    #[arg(long)]
    pub session_id: String,

    #[arg(long)]
    pub ticket_id: String,

    #[arg(long)]
    pub user_id: String,

    #[arg(long)]
    pub score: f64,

    /// Per-criterion breakdown stored verbatim, as a JSON string.
    #[arg(long)]
    pub details: Option<String>,
}
