use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use sandbox::{SandboxEngine, SandboxError, Script, ScriptContext};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::payload::{self, ExecuteRequest};
use crate::response::ApiError;

#[derive(Debug, Deserialize)]
struct ScriptRequest {
    source: String,
    #[serde(default)]
    context: ScriptContext,
}

/// Malformed executor bodies use the sandbox error shape like every other
/// executor failure.
fn body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| SandboxError::InvalidInput(rejection.body_text()).into())
}

pub fn router(engine: Arc<SandboxEngine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/execute", post(execute))
        .route("/scripts", post(run_script))
        .with_state(engine)
}

async fn healthz(State(engine): State<Arc<SandboxEngine>>) -> Json<Value> {
    let config = engine.config();
    Json(json!({
        "status": "ok",
        "sandbox": engine.factory_name(),
        "memoryMb": config.limits.memory_mb,
        "maxConcurrent": config.max_concurrent,
    }))
}

async fn execute(
    State(engine): State<Arc<SandboxEngine>>,
    request: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request = body(request)?;
    info!(
        function = %request.function_name,
        utilities = request.utilities.len(),
        dependencies = request.dependencies.len(),
        "execute request"
    );
    let (module, inputs) = payload::assemble(&request)?;
    let output = engine.run_code_module(&module, &inputs).await?;
    Ok(Json(json!({ "output": output })))
}

async fn run_script(
    State(engine): State<Arc<SandboxEngine>>,
    request: Result<Json<ScriptRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let request = body(request)?;
    info!(context_keys = request.context.len(), "script request");
    let output = engine
        .run_script(&Script::new(request.source), &request.context)
        .await?;
    Ok(Json(json!({ "output": output })))
}
