//! Public event log query surface.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Json, Query};
use serde::Deserialize;

use annex_observe::{query_events, EventDomain, EventFilter, PublicEvent};
use annex_types::ErrorKind;

use crate::api::{run_blocking, ApiError};
use crate::AppState;

const QUERY_DEADLINE: Duration = Duration::from_secs(5);

/// Query parameters for `GET /api/observe/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub domain: Option<String>,
    pub event_type: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    /// Cursor: return events with `seq` greater than this value.
    pub after_seq: Option<i64>,
    pub limit: Option<i64>,
}

/// Handler for `GET /api/observe/events`.
pub async fn events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<PublicEvent>>, ApiError> {
    let domain = match query.domain.as_deref() {
        None => None,
        Some(raw) => Some(EventDomain::from_str(raw).map_err(|e| {
            ApiError::new(ErrorKind::InvalidInput, e.to_string())
        })?),
    };

    let filter = EventFilter {
        domain,
        event_type: query.event_type,
        entity_type: query.entity_type,
        entity_id: query.entity_id,
        after_seq: query.after_seq,
        limit: query.limit,
    };

    let events = run_blocking(QUERY_DEADLINE, move || {
        let conn = state.pool.get()?;
        let events = query_events(&conn, state.server_id, &filter)?;
        Ok(events)
    })
    .await?;

    Ok(Json(events))
}
