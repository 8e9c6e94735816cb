use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{BookingError, BookingResult};
use crate::models::{
    Appointment, AppointmentStatus, ClientProfile, IntakeAnswers, IntakeQuestion,
    IntakeQuestionChanges, NewIntakeQuestion, NewService, Service, ServiceChanges,
};
use crate::store::{AppointmentOrder, AppointmentQuery, Store};

const RECENT_ACTIVITY: usize = 5;

fn check_service_fields(name: Option<&str>, duration: Option<u32>, price: Option<f64>) -> BookingResult<()> {
    if name.is_some_and(|n| n.trim().is_empty()) {
        return Err(BookingError::validation("The service needs a name"));
    }
    if duration == Some(0) {
        return Err(BookingError::validation("Duration must be at least one minute"));
    }
    if price.is_some_and(|p| p < 0.0 || !p.is_finite()) {
        return Err(BookingError::validation("Price must be a positive amount"));
    }
    Ok(())
}

pub async fn list_services<S: Store>(store: &S, include_inactive: bool) -> BookingResult<Vec<Service>> {
    store.services(!include_inactive).await
}

pub async fn create_service<S: Store>(store: &S, service: NewService) -> BookingResult<Service> {
    check_service_fields(Some(service.name.as_str()), Some(service.duration_minutes), service.price)?;
    let service = NewService {
        name: service.name.trim().to_string(),
        description: service.description.filter(|d| !d.trim().is_empty()),
        ..service
    };
    store
        .insert_service(&service)
        .await
        .map_err(|e| e.on_conflict("A service with this name already exists"))
}

pub async fn update_service<S: Store>(store: &S, id: &str, changes: ServiceChanges) -> BookingResult<()> {
    check_service_fields(
        changes.name.as_deref(),
        changes.duration_minutes,
        changes.price.flatten(),
    )?;
    store.update_service(id, &changes).await
}

/// Soft-delete: the service disappears from booking but old appointments keep it.
pub async fn delete_service<S: Store>(store: &S, id: &str) -> BookingResult<()> {
    store
        .update_service(
            id,
            &ServiceChanges {
                active: Some(false),
                ..Default::default()
            },
        )
        .await?;
    info!("Service {} retired", id);
    Ok(())
}

/// Active questions in display order.
pub async fn list_questions<S: Store>(store: &S) -> BookingResult<Vec<IntakeQuestion>> {
    store.intake_questions(true).await
}

pub async fn create_question<S: Store>(store: &S, question: NewIntakeQuestion) -> BookingResult<IntakeQuestion> {
    if question.text.trim().is_empty() {
        return Err(BookingError::validation("The question needs some text"));
    }
    store.insert_intake_question(&question).await
}

pub async fn update_question<S: Store>(
    store: &S,
    id: &str,
    changes: IntakeQuestionChanges,
) -> BookingResult<()> {
    if changes.text.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(BookingError::validation("The question needs some text"));
    }
    store.update_intake_question(id, &changes).await
}

pub async fn deactivate_question<S: Store>(store: &S, id: &str) -> BookingResult<()> {
    store
        .update_intake_question(
            id,
            &IntakeQuestionChanges {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
}

/// An appointment with the client and service details the admin screens show.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentRow {
    pub id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub client_name: String,
    pub client_whatsapp: Option<String>,
    pub service_name: String,
    pub service_price: Option<f64>,
    pub intake: Option<IntakeAnswers>,
    pub created_at: Option<DateTime<Utc>>,
}

struct Directory {
    profiles: HashMap<String, ClientProfile>,
    services: HashMap<String, Service>,
}

impl Directory {
    async fn load<S: Store>(store: &S) -> BookingResult<Self> {
        let profiles = store
            .profiles()
            .await?
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();
        let services = store
            .services(false)
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Ok(Self { profiles, services })
    }

    fn row(&self, apt: Appointment) -> AppointmentRow {
        let profile = self.profiles.get(&apt.user_id);
        let service = self.services.get(&apt.service_id);
        AppointmentRow {
            id: apt.id,
            date: apt.date,
            time: apt.time,
            status: apt.status,
            client_name: profile.map_or_else(|| "Unknown client".to_string(), |p| p.full_name()),
            client_whatsapp: profile.map(|p| p.whatsapp.clone()),
            service_name: service.map_or_else(|| "Unknown service".to_string(), |s| s.name.clone()),
            service_price: service.and_then(|s| s.price),
            intake: apt.intake,
            created_at: apt.created_at,
        }
    }
}

/// Every appointment, latest date and time first.
pub async fn list_appointments<S: Store>(store: &S) -> BookingResult<Vec<AppointmentRow>> {
    let directory = Directory::load(store).await?;
    let query = AppointmentQuery {
        order: AppointmentOrder::ScheduleDesc,
        ..Default::default()
    };
    Ok(store
        .appointments(&query)
        .await?
        .into_iter()
        .map(|a| directory.row(a))
        .collect())
}

pub async fn set_status<S: Store>(store: &S, id: &str, status: AppointmentStatus) -> BookingResult<()> {
    store
        .update_appointment_status(id, status)
        .await
        .map_err(|e| e.on_conflict("Another appointment already holds this time"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRow {
    pub profile: ClientProfile,
    pub appointment_count: usize,
}

/// Client profiles, newest first, optionally filtered by a case-insensitive
/// match on name or WhatsApp number.
pub async fn list_clients<S: Store>(store: &S, search: Option<&str>) -> BookingResult<Vec<ClientRow>> {
    let profiles = store.profiles().await?;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for apt in store.appointments(&AppointmentQuery::default()).await? {
        *counts.entry(apt.user_id).or_default() += 1;
    }

    let needle = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty());
    Ok(profiles
        .into_iter()
        .filter(|p| match &needle {
            Some(n) => p.full_name().to_lowercase().contains(n) || p.whatsapp.contains(n.as_str()),
            None => true,
        })
        .map(|p| ClientRow {
            appointment_count: counts.get(&p.user_id).copied().unwrap_or(0),
            profile: p,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_appointments: usize,
    pub total_clients: usize,
    /// Sum of service prices over completed appointments.
    pub revenue: f64,
    /// Completed share of all appointments, as a rounded percentage.
    pub completion_rate: u32,
}

pub fn compute_stats(
    appointments: &[Appointment],
    services: &[Service],
    total_clients: usize,
) -> DashboardStats {
    let prices: HashMap<&str, f64> = services
        .iter()
        .filter_map(|s| s.price.map(|p| (s.id.as_str(), p)))
        .collect();
    let completed: Vec<&Appointment> = appointments
        .iter()
        .filter(|a| a.status == AppointmentStatus::Completed)
        .collect();
    let revenue = completed
        .iter()
        .map(|a| prices.get(a.service_id.as_str()).copied().unwrap_or(0.0))
        .sum();
    let completion_rate = if appointments.is_empty() {
        0
    } else {
        (completed.len() as f64 / appointments.len() as f64 * 100.0).round() as u32
    };
    DashboardStats {
        total_appointments: appointments.len(),
        total_clients,
        revenue,
        completion_rate,
    }
}

pub async fn dashboard_stats<S: Store>(store: &S) -> BookingResult<DashboardStats> {
    let appointments = store.appointments(&AppointmentQuery::default()).await?;
    let services = store.services(false).await?;
    let clients = store.profiles().await?.len();
    Ok(compute_stats(&appointments, &services, clients))
}

/// The latest bookings by creation time.
pub async fn recent_activity<S: Store>(store: &S) -> BookingResult<Vec<AppointmentRow>> {
    let directory = Directory::load(store).await?;
    let query = AppointmentQuery {
        order: AppointmentOrder::Newest,
        limit: Some(RECENT_ACTIVITY),
        ..Default::default()
    };
    Ok(store
        .appointments(&query)
        .await?
        .into_iter()
        .map(|a| directory.row(a))
        .collect())
}
