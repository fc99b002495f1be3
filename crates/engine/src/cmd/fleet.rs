use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use fleet::{
    ComputeProvider, DockerImageBuilder, FleetController, FlyClient, FlyProvider, HttpClient,
    InMemoryProvider, RegistryAuth,
};
use tracing::{info, warn};

use crate::config::{FleetConfig, ProviderKind};
use crate::error::{EngineError, EngineResult};
use crate::fleet_api;

/// Registry login user; the provider authenticates on the token alone.
const REGISTRY_USER: &str = "x";

#[derive(Args)]
pub struct FleetArgs {
    /// Path to engine.yaml config file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Listen address (overrides config)
    #[arg(long)]
    listen: Option<String>,
    /// Provider API token (overrides config)
    #[arg(long, env = "FLY_API_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

fn build_provider(config: &FleetConfig) -> EngineResult<Arc<dyn ComputeProvider>> {
    match config.provider.kind {
        ProviderKind::Memory => {
            warn!("using in-memory provider, nothing will be provisioned");
            Ok(Arc::new(InMemoryProvider::new(config.registry.clone())))
        }
        ProviderKind::Fly => {
            let token = config
                .provider
                .token
                .clone()
                .ok_or_else(|| EngineError::Config("fleet.provider.token is required".into()))?;
            let http = HttpClient::new(
                &config.provider.api_url,
                &config.provider.graphql_url,
                token.clone(),
            )?;
            let images = DockerImageBuilder::new(RegistryAuth {
                registry: config.registry.clone(),
                username: REGISTRY_USER.into(),
                token,
            })?;
            Ok(Arc::new(FlyProvider::new(
                FlyClient::new(http, config.provider.org_slug.clone()),
                Arc::new(images),
                config.registry.clone(),
            )))
        }
    }
}

/// Load config and serve the fleet HTTP surface.
pub async fn run_fleet(args: FleetArgs) -> EngineResult<()> {
    let mut config = super::load_config(args.config.as_deref()).await?.fleet;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(token) = args.token {
        config.provider.token = Some(token);
    }
    config.validate()?;

    let provider = build_provider(&config)?;
    let controller = Arc::new(FleetController::new(provider, config.deployments()));
    info!(
        provider = controller.provider_name(),
        registry = %config.registry,
        "fleet controller ready"
    );

    super::serve(&config.listen, fleet_api::router(controller), "fleet").await
}
