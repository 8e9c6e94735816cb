use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::{BookingError, BookingResult};
use crate::models::{AppointmentStatus, Service, Slot};
use crate::slots::{self, BulkOutcome, BulkPlan, BulkRequest};
use crate::store::Store;
use crate::{admin, availability, calendar};

#[derive(Debug, Deserialize)]
pub(crate) struct StatusUpdate {
    status: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusChanged {
    id: String,
    status: AppointmentStatus,
}

pub(crate) async fn availability<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(date): Path<String>,
) -> BookingResult<Json<Vec<Slot>>> {
    let date = calendar::parse_date(&date)?;
    let open = availability::available_slots(state.store.as_ref(), date).await?;
    Ok(Json(open))
}

pub(crate) async fn services<S: Store + 'static>(
    State(state): State<AppState<S>>,
) -> BookingResult<Json<Vec<Service>>> {
    Ok(Json(admin::list_services(state.store.as_ref(), false).await?))
}

pub(crate) async fn bulk_slots<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Json(request): Json<BulkRequest>,
) -> BookingResult<Json<BulkOutcome>> {
    let plan = BulkPlan::parse(&request)?;
    Ok(Json(slots::create_bulk(state.store.as_ref(), &plan).await?))
}

pub(crate) async fn set_status<S: Store + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> BookingResult<Json<StatusChanged>> {
    let status = AppointmentStatus::parse(&update.status).ok_or_else(|| {
        BookingError::validation(format!("Unknown status '{}'", update.status))
    })?;
    admin::set_status(state.store.as_ref(), &id, status).await?;
    Ok(Json(StatusChanged { id, status }))
}
