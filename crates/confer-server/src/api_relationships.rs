//! Relationship ledger API handlers.
//!
//! Every mutation runs on the blocking pool against the ledger and, once it
//! has committed, hands the result to the [`Dispatcher`](crate::dispatch::Dispatcher).

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::{with_conn, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    Json,
};
use confer_ledger::{Edge, Proposal, Resource, UpsertResourceParams};
use confer_types::{Decision, EdgeType, FriendStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PutResourceRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_open")]
    pub open: bool,
}

fn default_open() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub decision: Decision,
}

#[derive(Debug, Deserialize)]
pub struct ListRelationshipsParams {
    #[serde(rename = "type")]
    pub edge_type: Option<EdgeType>,
}

#[derive(Debug, Serialize)]
pub struct RespondResponse {
    pub edge: Edge,
    /// The collaboration opened by accepting a review request.
    pub derived: Option<Edge>,
}

#[derive(Debug, Serialize)]
pub struct FriendStatusResponse {
    pub user_id: String,
    pub status: FriendStatus,
}

/// Handler for `PUT /api/resources/{resourceId}`.
///
/// Registers or updates a resource owned by the caller.
pub async fn put_resource_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(resource_id): Path<String>,
    body: Result<Json<PutResourceRequest>, JsonRejection>,
) -> Result<Json<Resource>, ApiError> {
    let Json(body) = body?;
    let params = UpsertResourceParams {
        resource_id,
        owner_id: caller,
        title: body.title,
        open: body.open,
    };
    let resource = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::upsert_resource(conn, &params)?)
    })
    .await?;
    Ok(Json(resource))
}

/// Handler for `POST /api/friends/{userId}`.
pub async fn request_friendship_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> Result<(StatusCode, Json<Edge>), ApiError> {
    let edge = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::propose(
            conn,
            &Proposal {
                edge_type: EdgeType::Friendship,
                requester_id: &caller,
                addressee_id: &user_id,
                resource_id: None,
            },
        )?)
    })
    .await?;

    tracing::info!(edge_id = %edge.edge_id, requester = %edge.requester_id, "friend request sent");
    state.dispatcher.proposed(&edge, None);
    Ok((StatusCode::CREATED, Json(edge)))
}

/// Handler for `GET /api/friends/{userId}/status`.
pub async fn friend_status_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> Result<Json<FriendStatusResponse>, ApiError> {
    let other = user_id.clone();
    let status = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::friend_status(conn, &caller, &other)?)
    })
    .await?;
    Ok(Json(FriendStatusResponse { user_id, status }))
}

/// Proposes a resource-scoped edge from the caller to the resource owner.
async fn propose_on_resource(
    state: &AppState,
    edge_type: EdgeType,
    caller: String,
    resource_id: String,
) -> Result<(Edge, Resource), ApiError> {
    with_conn(&state.pool, move |conn| {
        let resource = confer_ledger::get_resource(conn, &resource_id)?;
        let edge = confer_ledger::propose(
            conn,
            &Proposal {
                edge_type,
                requester_id: &caller,
                addressee_id: &resource.owner_id,
                resource_id: Some(&resource_id),
            },
        )?;
        Ok((edge, resource))
    })
    .await
}

/// Handler for `POST /api/resources/{resourceId}/collaborators`.
///
/// The caller joins the resource as a collaborator.
pub async fn join_collaboration_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(resource_id): Path<String>,
) -> Result<(StatusCode, Json<Edge>), ApiError> {
    let (edge, resource) =
        propose_on_resource(&state, EdgeType::Collaboration, caller, resource_id).await?;

    tracing::info!(edge_id = %edge.edge_id, resource_id = %resource.resource_id, "collaborator joined");
    state.dispatcher.proposed(&edge, Some(&resource));
    Ok((StatusCode::CREATED, Json(edge)))
}

/// Handler for `GET /api/resources/{resourceId}/collaborators`.
pub async fn list_collaborators_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(_caller)): Extension<AuthUser>,
    Path(resource_id): Path<String>,
) -> Result<Json<Vec<Edge>>, ApiError> {
    let edges = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::list_collaborators(conn, &resource_id)?)
    })
    .await?;
    Ok(Json(edges))
}

/// Handler for `POST /api/resources/{resourceId}/reviews`.
pub async fn request_review_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(resource_id): Path<String>,
) -> Result<(StatusCode, Json<Edge>), ApiError> {
    let (edge, resource) =
        propose_on_resource(&state, EdgeType::ReviewRequest, caller, resource_id).await?;

    tracing::info!(edge_id = %edge.edge_id, resource_id = %resource.resource_id, "review requested");
    state.dispatcher.proposed(&edge, Some(&resource));
    Ok((StatusCode::CREATED, Json(edge)))
}

/// Handler for `POST /api/relationships/{edgeId}/respond`.
pub async fn respond_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(edge_id): Path<String>,
    body: Result<Json<RespondRequest>, JsonRejection>,
) -> Result<Json<RespondResponse>, ApiError> {
    let Json(body) = body?;
    let responder = caller.clone();
    let responded = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::respond(conn, &edge_id, &responder, body.decision)?)
    })
    .await?;

    tracing::info!(
        edge_id = %responded.edge.edge_id,
        status = %responded.edge.status,
        derived = responded.derived.as_ref().map(|d| d.edge_id.as_str()),
        "relationship answered"
    );
    state.dispatcher.responded(&responded, &caller);
    Ok(Json(RespondResponse {
        edge: responded.edge,
        derived: responded.derived,
    }))
}

/// Handler for `POST /api/relationships/{edgeId}/acknowledge`.
pub async fn acknowledge_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(edge_id): Path<String>,
) -> Result<Json<Edge>, ApiError> {
    let owner = caller.clone();
    let edge = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::acknowledge(conn, &edge_id, &owner)?)
    })
    .await?;

    state.dispatcher.acknowledged(&edge, &caller);
    Ok(Json(edge))
}

/// Handler for `DELETE /api/relationships/{edgeId}`.
pub async fn revoke_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(edge_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let revoker = caller.clone();
    let edge = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::revoke(conn, &edge_id, &revoker)?)
    })
    .await?;

    tracing::info!(edge_id = %edge.edge_id, edge_type = %edge.edge_type, "relationship revoked");
    state.dispatcher.revoked(&edge, &caller);
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `GET /api/relationships/{edgeId}`. Parties only.
pub async fn get_relationship_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    Path(edge_id): Path<String>,
) -> Result<Json<Edge>, ApiError> {
    let edge = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::get_edge(conn, &edge_id)?)
    })
    .await?;

    if !edge.involves(&caller) {
        return Err(ApiError::Authorization(
            "only the parties may view a relationship".to_string(),
        ));
    }
    Ok(Json(edge))
}

/// Handler for `GET /api/relationships?type=`.
pub async fn list_relationships_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(AuthUser(caller)): Extension<AuthUser>,
    params: Result<Query<ListRelationshipsParams>, QueryRejection>,
) -> Result<Json<Vec<Edge>>, ApiError> {
    let Query(params) = params?;
    let edges = with_conn(&state.pool, move |conn| {
        Ok(confer_ledger::list_for_user(conn, &caller, params.edge_type)?)
    })
    .await?;
    Ok(Json(edges))
}
