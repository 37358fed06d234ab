//! Allocation transaction endpoints.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{AllocatorId, TicketId, TicketListId};
use event_store::EventStore;
use saga::{
    Allocation, AllocationStatus, InMemoryTicketListService, ProcessCommand, ProcessManager,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub manager: Arc<ProcessManager<S, InMemoryTicketListService>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct StartAllocationRequest {
    pub allocator_id: Option<String>,
    pub tickets: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Deserialize)]
pub struct ApplyRequest {
    #[serde(default)]
    pub assign: Vec<AssignRequest>,
    #[serde(default)]
    pub release: Vec<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub tickets: Vec<String>,
    pub list_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct AllocationResponse {
    pub allocator_id: String,
    #[serde(flatten)]
    pub status: AllocationStatus,
}

impl AllocationResponse {
    fn new(allocator_id: AllocatorId, status: AllocationStatus) -> Json<Self> {
        Json(Self {
            allocator_id: allocator_id.to_string(),
            status,
        })
    }
}

// -- Handlers --

/// POST /allocators — commence an allocation and reserve its tickets.
#[tracing::instrument(skip(state, req), fields(tickets = req.tickets.len()))]
pub async fn start<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<StartAllocationRequest>,
) -> Result<(StatusCode, Json<AllocationResponse>), ApiError> {
    let allocator_id = match req.allocator_id {
        Some(ref id) => AllocatorId::from_uuid(parse_uuid(id, "allocator_id")?),
        None => AllocatorId::new(),
    };
    let tickets = parse_tickets(&req.tickets)?;
    let timeout = i64::try_from(req.timeout_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ApiError::BadRequest("timeout_secs out of range".to_string()))?;

    let status = state.manager.start(allocator_id, timeout, tickets).await?;

    Ok((
        StatusCode::CREATED,
        AllocationResponse::new(allocator_id, status),
    ))
}

/// GET /allocators/:id — current progress of an allocation.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AllocationResponse>, ApiError> {
    let allocator_id = parse_allocator_id(&id)?;
    let status = state.manager.status(allocator_id).await?;
    Ok(AllocationResponse::new(allocator_id, status))
}

/// POST /allocators/:id/continue — resume outstanding work.
#[tracing::instrument(skip(state))]
pub async fn resume<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AllocationResponse>, ApiError> {
    execute(&state, &id, ProcessCommand::Continue).await
}

/// POST /allocators/:id/apply — assign reserved tickets to lists and release the rest.
#[tracing::instrument(skip(state, req))]
pub async fn apply<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<AllocationResponse>, ApiError> {
    let assign: Vec<Allocation> = req
        .assign
        .iter()
        .map(|a| -> Result<Allocation, ApiError> {
            Ok(Allocation {
                ticket_ids: parse_tickets(&a.tickets)?,
                list_id: TicketListId::from_uuid(parse_uuid(&a.list_id, "list_id")?),
            })
        })
        .collect::<Result<_, ApiError>>()?;
    let release = parse_tickets(&req.release)?;

    execute(&state, &id, ProcessCommand::Apply { assign, release }).await
}

/// POST /allocators/:id/cancel — roll the allocation back.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AllocationResponse>, ApiError> {
    execute(&state, &id, ProcessCommand::Cancel).await
}

/// POST /allocators/:id/abort — roll the allocation back as if its cutoff passed.
#[tracing::instrument(skip(state))]
pub async fn abort<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<AllocationResponse>, ApiError> {
    execute(&state, &id, ProcessCommand::Abort).await
}

async fn execute<S: EventStore + Clone + 'static>(
    state: &AppState<S>,
    id: &str,
    command: ProcessCommand,
) -> Result<Json<AllocationResponse>, ApiError> {
    let allocator_id = parse_allocator_id(id)?;
    let status = state.manager.execute(allocator_id, command).await?;
    Ok(AllocationResponse::new(allocator_id, status))
}

pub(crate) fn parse_uuid(id: &str, field: &str) -> Result<uuid::Uuid, ApiError> {
    uuid::Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid {field}: {e}")))
}

fn parse_allocator_id(id: &str) -> Result<AllocatorId, ApiError> {
    Ok(AllocatorId::from_uuid(parse_uuid(id, "ID format")?))
}

fn parse_tickets(ids: &[String]) -> Result<BTreeSet<TicketId>, ApiError> {
    ids.iter()
        .map(|id| parse_uuid(id, "ticket id").map(TicketId::from_uuid))
        .collect()
}
