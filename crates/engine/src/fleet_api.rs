use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet::{FleetController, WorkspaceId};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::response::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceRequest {
    workspace_id: String,
}

fn parse_workspace(body: Result<Json<WorkspaceRequest>, JsonRejection>) -> Result<WorkspaceId, ApiError> {
    let Json(request) = body?;
    Ok(WorkspaceId::parse(&request.workspace_id)?)
}

pub fn router(controller: Arc<FleetController>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/workspaces", post(create_workspace).delete(delete_workspace))
        .route("/workspaces/{workspace_id}", get(workspace_status))
        .route("/machines", post(create_machine))
        .with_state(controller)
}

async fn healthz(State(controller): State<Arc<FleetController>>) -> Json<Value> {
    Json(json!({ "status": "ok", "provider": controller.provider_name() }))
}

async fn create_workspace(
    State(controller): State<Arc<FleetController>>,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let workspace = parse_workspace(body)?;
    let machine = controller.create_workspace_compute(&workspace).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "executorMachineId": machine.id })),
    ))
}

async fn delete_workspace(
    State(controller): State<Arc<FleetController>>,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let workspace = parse_workspace(body)?;
    controller.delete_workspace_compute(&workspace).await?;
    Ok(Json(json!({ "message": format!("workspace {workspace} deleted") })))
}

async fn workspace_status(
    State(controller): State<Arc<FleetController>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let workspace = WorkspaceId::parse(&workspace_id)?;
    let exists = controller.workspace_exists(&workspace).await?;
    Ok(Json(json!({ "workspaceId": workspace.as_str(), "exists": exists })))
}

async fn create_machine(
    State(controller): State<Arc<FleetController>>,
    body: Result<Json<WorkspaceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let workspace = parse_workspace(body)?;
    let machine = controller.create_application_machine(&workspace).await?;
    Ok((StatusCode::CREATED, Json(json!({ "machineId": machine.id }))))
}
