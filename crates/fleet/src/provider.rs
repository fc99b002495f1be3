use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::image::ImageBuilder;
use crate::machines::FlyClient;
use crate::types::{AppHandle, ImageRef, Machine, MachineSpec};
use crate::workspace::WorkspaceId;

/// Compute provider operations, one app per workspace.
///
/// Calls are single attempts; retry policy belongs to whoever drives them.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`ProviderError::AppExists`] when the app is already there.
    async fn create_app(&self, workspace: &WorkspaceId) -> Result<AppHandle, ProviderError>;

    /// Idempotent: an app that already holds its IP succeeds.
    async fn allocate_ip(&self, workspace: &WorkspaceId) -> Result<(), ProviderError>;

    async fn build_and_push_image(
        &self,
        workspace: &WorkspaceId,
        source: &str,
        tag: &str,
    ) -> Result<ImageRef, ProviderError>;

    async fn create_machine(
        &self,
        workspace: &WorkspaceId,
        spec: &MachineSpec,
    ) -> Result<Machine, ProviderError>;

    /// Idempotent: deleting an app that does not exist succeeds.
    async fn delete_app(&self, workspace: &WorkspaceId) -> Result<(), ProviderError>;

    async fn app_exists(&self, workspace: &WorkspaceId) -> Result<bool, ProviderError>;
}

/// Fly.io-style provider: Machines API for apps and machines, GraphQL for IPs,
/// and an [`ImageBuilder`] pushing to the provider registry.
pub struct FlyProvider {
    client: FlyClient,
    images: Arc<dyn ImageBuilder>,
    registry: String,
}

impl FlyProvider {
    pub fn new(client: FlyClient, images: Arc<dyn ImageBuilder>, registry: String) -> Self {
        Self {
            client,
            images,
            registry,
        }
    }
}

#[async_trait]
impl ComputeProvider for FlyProvider {
    fn name(&self) -> &str {
        "fly"
    }

    async fn create_app(&self, workspace: &WorkspaceId) -> Result<AppHandle, ProviderError> {
        self.client.create_app(workspace.as_str()).await
    }

    async fn allocate_ip(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        self.client.allocate_shared_ipv4(workspace.as_str()).await
    }

    async fn build_and_push_image(
        &self,
        workspace: &WorkspaceId,
        source: &str,
        tag: &str,
    ) -> Result<ImageRef, ProviderError> {
        let target = ImageRef::new(&self.registry, workspace, tag);
        self.images.build_and_push(source, &target).await?;
        Ok(target)
    }

    async fn create_machine(
        &self,
        workspace: &WorkspaceId,
        spec: &MachineSpec,
    ) -> Result<Machine, ProviderError> {
        self.client.create_machine(workspace.as_str(), spec).await
    }

    async fn delete_app(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        self.client.delete_app(workspace.as_str()).await
    }

    async fn app_exists(&self, workspace: &WorkspaceId) -> Result<bool, ProviderError> {
        self.client.app_exists(workspace.as_str()).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use httpmock::prelude::*;

    use super::*;
    use crate::http::HttpClient;

    #[derive(Default)]
    struct RecordingBuilder {
        pushed: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ImageBuilder for RecordingBuilder {
        async fn build_and_push(
            &self,
            source: &str,
            target: &ImageRef,
        ) -> Result<(), ProviderError> {
            self.pushed
                .lock()
                .unwrap()
                .push((source.to_string(), target.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn image_is_pushed_under_workspace_repository() {
        let server = MockServer::start_async().await;
        let http = HttpClient::new(&server.base_url(), &server.url("/graphql"), "t".into()).unwrap();
        let builder = Arc::new(RecordingBuilder::default());
        let provider = FlyProvider::new(
            FlyClient::new(http, "personal".into()),
            builder.clone(),
            "registry.fly.io".into(),
        );
        let ws = WorkspaceId::parse("ws1").unwrap();

        let image = provider
            .build_and_push_image(&ws, "ghcr.io/acme/executor:1.2", "executor")
            .await
            .unwrap();

        assert_eq!(image.as_str(), "registry.fly.io/ws1:executor");
        assert_eq!(
            *builder.pushed.lock().unwrap(),
            vec![(
                "ghcr.io/acme/executor:1.2".to_string(),
                "registry.fly.io/ws1:executor".to_string()
            )]
        );
    }
}
