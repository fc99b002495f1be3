use std::path::Path;

use fleet::{Deployment, DeploymentKind, Deployments, GuestSpec};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

pub(crate) const DEFAULT_FLEET_LISTEN: &str = "0.0.0.0:8000";
pub(crate) const DEFAULT_EXECUTOR_LISTEN: &str = "0.0.0.0:8080";
pub(crate) const DEFAULT_EXECUTOR_PORT: u16 = 8080;
pub(crate) const DEFAULT_APPLICATION_PORT: u16 = 3000;
/// Smallest heap a V8 isolate can boot with.
const MIN_SANDBOX_MEMORY_MB: u32 = 16;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub listen: String,
    pub provider: ProviderConfig,
    /// Registry host images are pushed to, e.g. `registry.fly.io`.
    pub registry: String,
    pub images: ImagesConfig,
    pub guest: GuestSpec,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_FLEET_LISTEN.into(),
            provider: ProviderConfig::default(),
            registry: "registry.fly.io".into(),
            images: ImagesConfig::default(),
            guest: GuestSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Fly,
    /// Keeps apps in process memory; for local runs without credentials.
    Memory,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_url: String,
    pub graphql_url: String,
    pub org_slug: String,
    /// Overridden by `FLY_API_TOKEN`.
    pub token: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Fly,
            api_url: "https://api.machines.dev".into(),
            graphql_url: "https://api.fly.io/graphql".into(),
            org_slug: "personal".into(),
            token: None,
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub application: ImageConfig,
    pub executor: ImageConfig,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            application: ImageConfig {
                source: String::new(),
                tag: "latest".into(),
                port: DEFAULT_APPLICATION_PORT,
            },
            executor: ImageConfig {
                source: String::new(),
                tag: "executor".into(),
                port: DEFAULT_EXECUTOR_PORT,
            },
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Docker build context directory, or an image reference to retag.
    pub source: String,
    pub tag: String,
    pub port: u16,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub listen: String,
    pub sandbox: SandboxConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_EXECUTOR_LISTEN.into(),
            sandbox: SandboxConfig::default(),
        }
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub memory_mb: u32,
    /// Unset: runs are bounded only by the memory ceiling.
    pub timeout_ms: Option<u32>,
    pub max_concurrent: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_mb: sandbox::DEFAULT_MEMORY_MB,
            timeout_ms: None,
            max_concurrent: sandbox::DEFAULT_MAX_CONCURRENT,
        }
    }
}

/// Load a config from a YAML file and validate the sections every command
/// shares. Missing sections fall back to their defaults.
pub async fn load(path: &Path) -> EngineResult<EngineConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::Config(format!("read {}: {e}", path.display())))?;
    let config: EngineConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| EngineError::Config(format!("parse {}: {e}", path.display())))?;
    config.executor.validate()?;
    Ok(config)
}

/// Write `config` as YAML to `path`, creating parent directories.
pub async fn generate(config: &EngineConfig, path: &Path) -> EngineResult<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| EngineError::Config(format!("create {}: {e}", dir.display())))?;
    }
    let content = serde_yaml_ng::to_string(config)
        .map_err(|e| EngineError::Config(format!("serialize config: {e}")))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|e| EngineError::Config(format!("write {}: {e}", path.display())))?;
    Ok(())
}

impl FleetConfig {
    /// Checks needed before the fleet server can provision anything.
    pub fn validate(&self) -> EngineResult<()> {
        let require = |value: &str, label: &str| {
            if value.trim().is_empty() {
                Err(EngineError::Config(format!("fleet.{label} is required")))
            } else {
                Ok(())
            }
        };
        require(&self.registry, "registry")?;
        require(&self.images.application.source, "images.application.source")?;
        require(&self.images.application.tag, "images.application.tag")?;
        require(&self.images.executor.source, "images.executor.source")?;
        require(&self.images.executor.tag, "images.executor.tag")?;
        if self.provider.kind == ProviderKind::Fly {
            require(&self.provider.api_url, "provider.api_url")?;
            require(&self.provider.graphql_url, "provider.graphql_url")?;
            require(&self.provider.org_slug, "provider.org_slug")?;
            require(self.provider.token.as_deref().unwrap_or_default(), "provider.token")?;
        }
        if self.guest.cpus == 0 || self.guest.memory_mb == 0 {
            return Err(EngineError::Config(
                "fleet.guest needs at least one cpu and some memory".into(),
            ));
        }
        Ok(())
    }

    pub fn deployments(&self) -> Deployments {
        let deployment = |kind, image: &ImageConfig| Deployment {
            kind,
            source_image: image.source.clone(),
            tag: image.tag.clone(),
            guest: self.guest.clone(),
            internal_port: image.port,
        };
        Deployments {
            application: deployment(DeploymentKind::Application, &self.images.application),
            executor: deployment(DeploymentKind::Executor, &self.images.executor),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let sandbox = &self.sandbox;
        if sandbox.memory_mb < MIN_SANDBOX_MEMORY_MB {
            return Err(EngineError::Config(format!(
                "executor.sandbox.memory_mb must be at least {MIN_SANDBOX_MEMORY_MB}"
            )));
        }
        if sandbox.max_concurrent == 0 {
            return Err(EngineError::Config(
                "executor.sandbox.max_concurrent must be at least 1".into(),
            ));
        }
        if sandbox.timeout_ms == Some(0) {
            return Err(EngineError::Config(
                "executor.sandbox.timeout_ms must be positive (omit it for no timeout)".into(),
            ));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> sandbox::EngineConfig {
        sandbox::EngineConfig {
            limits: sandbox::ResourceLimits {
                memory_mb: self.sandbox.memory_mb,
                timeout_ms: self.sandbox.timeout_ms,
            },
            max_concurrent: self.sandbox.max_concurrent,
        }
    }
}
