use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::ProviderError;
use crate::http::HttpClient;
use crate::types::{AppHandle, Machine, MachineSpec};

const ALLOCATE_IP_MUTATION: &str = "mutation($input: AllocateIPAddressInput!) { \
allocateIpAddress(input: $input) { ipAddress { id address type } } }";

/// Typed client over the provider's Machines REST API and its GraphQL
/// endpoint (IP allocation is only exposed there).
#[derive(Clone)]
pub struct FlyClient {
    http: HttpClient,
    org_slug: String,
}

#[derive(Deserialize)]
struct MachineResponse {
    id: String,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

impl FlyClient {
    pub fn new(http: HttpClient, org_slug: String) -> Self {
        Self { http, org_slug }
    }

    /// Create an app. Returns [`ProviderError::AppExists`] when the name is
    /// already taken so callers can decide whether to adopt it.
    pub async fn create_app(&self, name: &str) -> Result<AppHandle, ProviderError> {
        let resp = self
            .http
            .request(Method::POST, "/v1/apps")
            .json(&json!({ "app_name": name, "org_slug": self.org_slug }))
            .send()
            .await
            .map_err(|e| ProviderError::transport("create app", e))?;

        let status = resp.status();
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().await.unwrap_or_default();
            if status == StatusCode::CONFLICT || mentions_existing(&body) {
                return Err(ProviderError::AppExists(name.to_string()));
            }
            return Err(ProviderError::Api {
                operation: "create app",
                status: status.as_u16(),
                body,
            });
        }
        ensure_success("create app", resp).await?;

        info!(app = name, "app created");
        Ok(AppHandle {
            name: name.to_string(),
        })
    }

    pub async fn app_exists(&self, name: &str) -> Result<bool, ProviderError> {
        let resp = self
            .http
            .request(Method::GET, &format!("/v1/apps/{name}"))
            .send()
            .await
            .map_err(|e| ProviderError::transport("get app", e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success("get app", resp).await?;
        Ok(true)
    }

    /// Delete an app together with its machines, IPs and images.
    /// A missing app counts as deleted.
    pub async fn delete_app(&self, name: &str) -> Result<(), ProviderError> {
        let resp = self
            .http
            .request(Method::DELETE, &format!("/v1/apps/{name}?force=true"))
            .send()
            .await
            .map_err(|e| ProviderError::transport("delete app", e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(app = name, "app already absent");
            return Ok(());
        }
        ensure_success("delete app", resp).await?;

        info!(app = name, "app deleted");
        Ok(())
    }

    /// Allocate a shared IPv4 address so the app is publicly routable.
    pub async fn allocate_shared_ipv4(&self, name: &str) -> Result<(), ProviderError> {
        let resp = self
            .http
            .graphql()
            .json(&json!({
                "query": ALLOCATE_IP_MUTATION,
                "variables": { "input": { "appId": name, "type": "shared_v4" } },
            }))
            .send()
            .await
            .map_err(|e| ProviderError::transport("allocate ip", e))?;

        let resp = ensure_success("allocate ip", resp).await?;
        let body: GraphqlResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::decode("allocate ip", e))?;

        // GraphQL reports failures with a 200 and an `errors` array.
        if !body.errors.is_empty() {
            // An app that already holds a shared address counts as allocated.
            if body
                .errors
                .iter()
                .all(|e| e.message.to_ascii_lowercase().contains("already"))
            {
                info!(app = name, "shared ipv4 already allocated");
                return Ok(());
            }
            let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(ProviderError::Api {
                operation: "allocate ip",
                status: StatusCode::OK.as_u16(),
                body: messages.join("; "),
            });
        }

        info!(app = name, "shared ipv4 allocated");
        Ok(())
    }

    pub async fn create_machine(
        &self,
        app: &str,
        spec: &MachineSpec,
    ) -> Result<Machine, ProviderError> {
        let config = json!({
            "image": spec.image.as_str(),
            "guest": spec.guest,
            "services": [{
                "protocol": "tcp",
                "internal_port": spec.internal_port,
                "ports": [
                    { "port": 80, "handlers": ["http"] },
                    { "port": 443, "handlers": ["tls", "http"] },
                ],
            }],
        });

        let resp = self
            .http
            .request(Method::POST, &format!("/v1/apps/{app}/machines"))
            .json(&json!({ "config": config }))
            .send()
            .await
            .map_err(|e| ProviderError::transport("create machine", e))?;

        let resp = ensure_success("create machine", resp).await?;
        let created: MachineResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::decode("create machine", e))?;

        info!(app, machine_id = %created.id, image = %spec.image, "machine created");
        Ok(Machine {
            id: created.id,
            image: spec.image.clone(),
            guest: spec.guest.clone(),
            state: created.state,
        })
    }
}

async fn ensure_success(operation: &'static str, resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Api {
        operation,
        status: status.as_u16(),
        body,
    })
}

fn mentions_existing(body: &str) -> bool {
    let body = body.to_ascii_lowercase();
    body.contains("already") || body.contains("taken")
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;
    use crate::types::{GuestSpec, ImageRef};
    use crate::workspace::WorkspaceId;

    fn client(server: &MockServer) -> FlyClient {
        let http = HttpClient::new(
            &server.base_url(),
            &server.url("/graphql"),
            "test-token".into(),
        )
        .unwrap();
        FlyClient::new(http, "personal".into())
    }

    #[tokio::test]
    async fn create_app_posts_name_and_org() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/apps")
                    .header("authorization", "Bearer test-token")
                    .json_body(serde_json::json!({"app_name": "ws1", "org_slug": "personal"}));
                then.status(201).json_body(serde_json::json!({"id": "app-1"}));
            })
            .await;

        let app = client(&server).create_app("ws1").await.unwrap();

        mock.assert_calls_async(1).await;
        assert_eq!(app.name, "ws1");
    }

    #[tokio::test]
    async fn create_app_maps_taken_name_to_app_exists() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/apps");
                then.status(422)
                    .json_body(serde_json::json!({"error": "Name has already been taken"}));
            })
            .await;

        let err = client(&server).create_app("ws1").await.unwrap_err();
        assert!(matches!(err, ProviderError::AppExists(ref name) if name == "ws1"), "got: {err}");
    }

    #[tokio::test]
    async fn create_app_keeps_other_validation_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/apps");
                then.status(422).body("org not found");
            })
            .await;

        let err = client(&server).create_app("ws1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 422, .. }), "got: {err}");
    }

    #[tokio::test]
    async fn delete_app_forces_and_treats_missing_as_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/v1/apps/gone")
                    .query_param("force", "true");
                then.status(404).body("not found");
            })
            .await;

        client(&server).delete_app("gone").await.unwrap();
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn delete_app_surfaces_server_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v1/apps/ws1");
                then.status(500).body("boom");
            })
            .await;

        let err = client(&server).delete_app("ws1").await.unwrap_err();
        assert_eq!(err.to_string(), "delete app 500: boom");
    }

    #[tokio::test]
    async fn app_exists_reads_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/apps/here");
                then.status(200).json_body(serde_json::json!({"name": "here"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/apps/absent");
                then.status(404);
            })
            .await;

        let fly = client(&server);
        assert!(fly.app_exists("here").await.unwrap());
        assert!(!fly.app_exists("absent").await.unwrap());
    }

    #[tokio::test]
    async fn allocate_ip_sends_shared_v4_mutation() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/graphql")
                    .body_includes("allocateIpAddress")
                    .body_includes("shared_v4");
                then.status(200).json_body(serde_json::json!({
                    "data": {"allocateIpAddress": {"ipAddress": null}}
                }));
            })
            .await;

        client(&server).allocate_shared_ipv4("ws1").await.unwrap();
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn allocate_ip_fails_on_graphql_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/graphql");
                then.status(200).json_body(serde_json::json!({
                    "data": null,
                    "errors": [{"message": "Could not find App"}]
                }));
            })
            .await;

        let err = client(&server).allocate_shared_ipv4("ws1").await.unwrap_err();
        assert!(err.to_string().contains("Could not find App"), "got: {err}");
    }

    #[tokio::test]
    async fn allocate_ip_accepts_an_existing_address() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/graphql");
                then.status(200).json_body(serde_json::json!({
                    "data": null,
                    "errors": [{"message": "App already has a shared IPv4 address"}]
                }));
            })
            .await;

        client(&server).allocate_shared_ipv4("ws1").await.unwrap();
        mock.assert_calls_async(1).await;
    }

    #[tokio::test]
    async fn create_machine_sends_image_guest_and_service() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/apps/ws1/machines")
                    .body_includes("\"image\":\"registry.fly.io/ws1:executor\"")
                    .body_includes("\"internal_port\":8080")
                    .body_includes("\"memory_mb\":512");
                then.status(200)
                    .json_body(serde_json::json!({"id": "m-123", "state": "created"}));
            })
            .await;

        let ws = WorkspaceId::parse("ws1").unwrap();
        let spec = MachineSpec {
            image: ImageRef::new("registry.fly.io", &ws, "executor"),
            guest: GuestSpec {
                memory_mb: 512,
                ..Default::default()
            },
            internal_port: 8080,
        };
        let machine = client(&server).create_machine("ws1", &spec).await.unwrap();

        mock.assert_calls_async(1).await;
        assert_eq!(machine.id, "m-123");
        assert_eq!(machine.state.as_deref(), Some("created"));
        assert_eq!(machine.image, spec.image);
    }

    #[tokio::test]
    async fn create_machine_rejects_undecodable_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/apps/ws1/machines");
                then.status(200).body("not json");
            })
            .await;

        let ws = WorkspaceId::parse("ws1").unwrap();
        let spec = MachineSpec {
            image: ImageRef::new("registry.fly.io", &ws, "latest"),
            guest: GuestSpec::default(),
            internal_port: 3000,
        };
        let err = client(&server).create_machine("ws1", &spec).await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode { .. }), "got: {err}");
    }
}
