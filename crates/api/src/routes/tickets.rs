//! Read-only ticket and ticket list endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{TicketId, TicketListId};
use domain::TicketState;
use event_store::EventStore;
use saga::TicketListService;
use serde::Serialize;

use super::allocators::{AppState, parse_uuid};
use crate::error::ApiError;

#[derive(Serialize)]
pub struct TicketResponse {
    pub ticket_id: String,
    pub state: String,
    pub owner: Option<String>,
    pub list_id: Option<String>,
}

#[derive(Serialize)]
pub struct TicketListResponse {
    pub list_id: String,
    pub tickets: Vec<String>,
}

/// GET /tickets/:id — current ownership of a ticket.
#[tracing::instrument(skip(state))]
pub async fn get_ticket<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TicketResponse>, ApiError> {
    let ticket_id = TicketId::from_uuid(parse_uuid(&id, "ID format")?);
    let ticket = state.manager.tickets().get_ticket(ticket_id).await?;
    let ticket_state = ticket.state();

    let list_id = match ticket_state {
        TicketState::Allocated { on, .. } => Some(on.to_string()),
        _ => None,
    };

    Ok(Json(TicketResponse {
        ticket_id: ticket_id.to_string(),
        state: ticket_state.to_string(),
        owner: ticket_state.owner().map(|o| o.to_string()),
        list_id,
    }))
}

/// GET /lists/:id — tickets a list currently owns.
#[tracing::instrument(skip(state))]
pub async fn get_list<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<TicketListResponse>, ApiError> {
    let list_id = TicketListId::from_uuid(parse_uuid(&id, "ID format")?);
    let tickets = state.manager.lists().owned(list_id).await?;

    Ok(Json(TicketListResponse {
        list_id: list_id.to_string(),
        tickets: tickets.iter().map(ToString::to_string).collect(),
    }))
}
