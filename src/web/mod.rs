pub mod api;
pub mod dashboard;
pub mod views;

use std::sync::Arc;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use chrono_tz::Tz;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::commands::App;
use crate::models::Config;
use crate::store::Store;

pub(crate) struct AppState<S> {
    pub(crate) store: Arc<S>,
    pub(crate) config: Arc<Config>,
    pub(crate) tz: Tz,
}

// Derived Clone would require `S: Clone`.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            tz: self.tz,
        }
    }
}

impl<S: Store> AppState<S> {
    pub(crate) fn today(&self) -> chrono::NaiveDate {
        crate::calendar::today(self.tz)
    }
}

pub(crate) fn router<S: Store + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/", get(dashboard::dashboard_handler::<S>))
        .route("/appointments", get(dashboard::appointments_handler::<S>))
        .route("/api/availability/{date}", get(api::availability::<S>))
        .route("/api/services", get(api::services::<S>))
        .route("/api/slots/bulk", post(api::bulk_slots::<S>))
        .route("/api/appointments/{id}/status", post(api::set_status::<S>))
        .with_state(state)
}

/// Serve the studio dashboard. The session must belong to an administrator.
pub async fn serve<S: Store + 'static>(app: App<S>, addr: &str) -> Result<()> {
    let admin = app.session.require_admin()?;
    info!("Serving as {}", admin.email);

    let state = AppState {
        store: Arc::new(app.store),
        config: Arc::new(app.config),
        tz: app.tz,
    };
    let router = router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    info!("Dashboard listening on http://{}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::models::{AppointmentStatus, NewAppointment};
    use crate::store::{AppointmentQuery, MemoryStore};

    fn state() -> AppState<MemoryStore> {
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();
        let store = MemoryStore::new();
        store.seed_demo(crate::calendar::today(tz), "admin").unwrap();
        AppState {
            store: Arc::new(store),
            config: Arc::new(crate::config::demo_config()),
            tz,
        }
    }

    async fn send(state: &AppState<MemoryStore>, req: Request<Body>) -> (StatusCode, String) {
        let resp = router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_services_endpoint() {
        let state = state();
        let (status, body) = send(&state, get("/api/services")).await;
        assert_eq!(status, StatusCode::OK);
        let services: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(services.len(), 3);
        assert!(services.iter().any(|s| s["nome"] == "Haircut"));
    }

    #[tokio::test]
    async fn test_availability_hides_claimed_times() {
        let state = state();
        let first = state.store.open_slots(state.today()).await.unwrap()[0].clone();
        state
            .store
            .insert_appointment(&NewAppointment {
                user_id: "client".into(),
                service_id: "svc".into(),
                date: first.date,
                time: first.time,
                status: AppointmentStatus::Requested,
                intake: None,
            })
            .await
            .unwrap();

        let (status, body) = send(&state, get(&format!("/api/availability/{}", first.date))).await;
        assert_eq!(status, StatusCode::OK);
        let slots: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(slots.len(), 5);

        let (status, body) = send(&state, get("/api/availability/tomorrow")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("error"));
    }

    #[tokio::test]
    async fn test_bulk_endpoint() {
        let state = state();
        let req = post_json(
            "/api/slots/bulk",
            serde_json::json!({
                "start": "2030-01-07",
                "end": "2030-01-11",
                "weekdays": [1, 3],
                "times": ["09:00", "10:00"],
            }),
        );
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        let outcome: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(outcome["generated"], 4);
        assert_eq!(outcome["created"], 4);

        let req = post_json("/api/slots/bulk", serde_json::json!({ "start": "2030-01-07" }));
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("start and an end date"));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let state = state();
        let slot = state.store.open_slots(state.today()).await.unwrap()[0].clone();
        let apt = state
            .store
            .insert_appointment(&NewAppointment {
                user_id: "client".into(),
                service_id: "svc".into(),
                date: slot.date,
                time: slot.time,
                status: AppointmentStatus::Requested,
                intake: None,
            })
            .await
            .unwrap();

        let uri = format!("/api/appointments/{}/status", apt.id);
        let (status, _) = send(&state, post_json(&uri, serde_json::json!({ "status": "confirmado" }))).await;
        assert_eq!(status, StatusCode::OK);
        let stored = state.store.appointments(&AppointmentQuery::default()).await.unwrap();
        assert_eq!(stored[0].status, AppointmentStatus::Confirmed);

        let (status, _) = send(&state, post_json(&uri, serde_json::json!({ "status": "lost" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &state,
            post_json("/api/appointments/missing/status", serde_json::json!({ "status": "cancelled" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dashboard_pages_render() {
        let state = state();
        let (status, body) = send(&state, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Studio"));
        assert!(body.contains("Open Schedule"));

        let (status, body) = send(&state, get("/appointments")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("No appointments yet."));
    }
}
