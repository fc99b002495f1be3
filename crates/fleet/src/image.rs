use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::command::{exec, exec_with_stdin};
use crate::error::ProviderError;
use crate::types::ImageRef;

/// Platform of the provider's micro-VMs.
const TARGET_PLATFORM: &str = "linux/amd64";

/// Builds (or retags) an image and pushes it to the provider registry.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build_and_push(&self, source: &str, target: &ImageRef) -> Result<(), ProviderError>;
}

/// Registry credentials for `docker login`.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    pub registry: String,
    pub username: String,
    pub token: String,
}

/// [`ImageBuilder`] driving the local `docker` CLI.
///
/// A `source` naming an existing directory is built as a Docker context;
/// anything else is treated as an image reference that is pulled and retagged.
pub struct DockerImageBuilder {
    docker: PathBuf,
    auth: RegistryAuth,
}

impl DockerImageBuilder {
    pub fn new(auth: RegistryAuth) -> Result<Self, ProviderError> {
        let docker = which::which("docker")
            .map_err(|e| ProviderError::Build(format!("docker not found in PATH: {e}")))?;
        Ok(Self { docker, auth })
    }

    async fn run_docker(&self, args: &[&str]) -> Result<String, ProviderError> {
        exec(&self.docker.to_string_lossy(), args)
            .await
            .map_err(|e| ProviderError::Build(e.to_string()))
    }

    async fn login(&self) -> Result<(), ProviderError> {
        exec_with_stdin(
            &self.docker.to_string_lossy(),
            &[
                "login",
                &self.auth.registry,
                "--username",
                &self.auth.username,
                "--password-stdin",
            ],
            &self.auth.token,
        )
        .await
        .map_err(|e| ProviderError::Build(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build_and_push(&self, source: &str, target: &ImageRef) -> Result<(), ProviderError> {
        self.login().await?;

        let target = target.as_str();
        if Path::new(source).is_dir() {
            info!(context = source, image = target, "building image");
            self.run_docker(&["build", "--platform", TARGET_PLATFORM, "--tag", target, source])
                .await?;
        } else {
            info!(source, image = target, "retagging image");
            self.run_docker(&["pull", "--platform", TARGET_PLATFORM, source])
                .await?;
            self.run_docker(&["tag", source, target]).await?;
        }

        self.run_docker(&["push", target]).await?;
        info!(image = target, "image pushed");
        Ok(())
    }
}
