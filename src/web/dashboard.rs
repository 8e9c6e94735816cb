use axum::extract::State;
use axum::response::Html;

use super::views::{render_appointments_page, render_dashboard_page};
use super::AppState;
use crate::error::BookingResult;
use crate::store::Store;
use crate::{admin, availability};

pub(crate) async fn dashboard_handler<S: Store + 'static>(
    State(state): State<AppState<S>>,
) -> BookingResult<Html<String>> {
    let store = state.store.as_ref();
    let stats = admin::dashboard_stats(store).await?;
    let recent = admin::recent_activity(store).await?;
    let schedule = availability::schedule_by_date(store, state.today()).await?;

    let now = chrono::Utc::now()
        .with_timezone(&state.tz)
        .format("%Y-%m-%d %H:%M %Z")
        .to_string();
    Ok(Html(render_dashboard_page(
        &state.config.studio.name,
        &now,
        &stats,
        &recent,
        &schedule,
    )))
}

pub(crate) async fn appointments_handler<S: Store + 'static>(
    State(state): State<AppState<S>>,
) -> BookingResult<Html<String>> {
    let rows = admin::list_appointments(state.store.as_ref()).await?;
    Ok(Html(render_appointments_page(&state.config.studio.name, &rows)))
}
