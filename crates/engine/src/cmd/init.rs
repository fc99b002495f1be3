use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::config::{self, EngineConfig};
use crate::error::{EngineError, EngineResult};

#[derive(Args)]
pub struct InitArgs {
    /// Where to write the config file
    #[arg(long, short, default_value = "engine.yaml")]
    output: PathBuf,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

/// Write a config file populated with every default.
pub async fn run_init(args: InitArgs) -> EngineResult<()> {
    if !args.force && tokio::fs::try_exists(&args.output).await? {
        return Err(EngineError::Config(format!(
            "{} already exists (use --force to overwrite)",
            args.output.display()
        )));
    }
    config::generate(&EngineConfig::default(), &args.output).await?;
    info!(path = %args.output.display(), "config written");
    Ok(())
}
