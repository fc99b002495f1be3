use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use sandbox::SandboxEngine;
use sandbox_v8::V8Factory;
use tracing::info;

use crate::error::EngineResult;
use crate::executor_api;

#[derive(Args)]
pub struct ExecutorArgs {
    /// Path to engine.yaml config file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Listen address (overrides config)
    #[arg(long, env = "EXECUTOR_LISTEN")]
    listen: Option<String>,
}

/// Load config and serve the sandbox execution surface.
pub async fn run_executor(args: ExecutorArgs) -> EngineResult<()> {
    let mut config = super::load_config(args.config.as_deref()).await?.executor;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.validate()?;

    let engine = SandboxEngine::new(Arc::new(V8Factory::new()), config.engine_config());
    info!(
        sandbox = engine.factory_name(),
        memory_mb = config.sandbox.memory_mb,
        timeout_ms = ?config.sandbox.timeout_ms,
        max_concurrent = config.sandbox.max_concurrent,
        "sandbox engine ready"
    );

    super::serve(&config.listen, executor_api::router(Arc::new(engine)), "executor").await
}
