use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::calendar::format_time;
use crate::error::BookingResult;
use crate::models::{Appointment, AppointmentStatus, ClientProfile, NotificationKind, Service};
use crate::store::{AppointmentOrder, AppointmentQuery, Store};

const HOME_LIMIT: usize = 3;
const NOTIFICATION_LIMIT: usize = 20;

/// A client's own appointment with the name of the booked service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientAppointment {
    pub appointment: Appointment,
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientHome {
    pub first_name: Option<String>,
    pub upcoming: Vec<ClientAppointment>,
    pub history: Vec<ClientAppointment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub profile: Option<ClientProfile>,
    pub total_appointments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub appointment_id: String,
    pub kind: NotificationKind,
    pub title: &'static str,
    pub message: String,
    pub created_at: Option<DateTime<Utc>>,
    pub read: bool,
}

async fn service_names<S: Store>(store: &S) -> BookingResult<HashMap<String, String>> {
    Ok(store
        .services(false)
        .await?
        .into_iter()
        .map(|s: Service| (s.id, s.name))
        .collect())
}

fn with_names(rows: Vec<Appointment>, names: &HashMap<String, String>) -> Vec<ClientAppointment> {
    rows.into_iter()
        .map(|appointment| ClientAppointment {
            service_name: names
                .get(&appointment.service_id)
                .cloned()
                .unwrap_or_else(|| "Service".to_string()),
            appointment,
        })
        .collect()
}

/// Next few open appointments from today, and the most recent past or closed ones.
pub async fn home<S: Store>(store: &S, user_id: &str, today: NaiveDate) -> BookingResult<ClientHome> {
    let names = service_names(store).await?;
    let profile = store.profile_for_user(user_id).await?;

    let upcoming = store
        .appointments(&AppointmentQuery {
            user_id: Some(user_id.to_string()),
            from: Some(today),
            statuses: AppointmentStatus::CLAIMING.to_vec(),
            order: AppointmentOrder::Schedule,
            limit: Some(HOME_LIMIT),
            ..Default::default()
        })
        .await?;

    let history: Vec<Appointment> = store
        .appointments(&AppointmentQuery {
            order: AppointmentOrder::ScheduleDesc,
            ..AppointmentQuery::for_user(user_id)
        })
        .await?
        .into_iter()
        .filter(|a| a.date < today || !a.status.claims_slot())
        .take(HOME_LIMIT)
        .collect();

    Ok(ClientHome {
        first_name: profile.map(|p| p.first_name),
        upcoming: with_names(upcoming, &names),
        history: with_names(history, &names),
    })
}

pub async fn profile<S: Store>(store: &S, user_id: &str) -> BookingResult<ProfileSummary> {
    let profile = store.profile_for_user(user_id).await?;
    let total_appointments = store
        .appointments(&AppointmentQuery::for_user(user_id))
        .await?
        .len();
    Ok(ProfileSummary {
        profile,
        total_appointments,
    })
}

pub fn notification_for(appointment: &Appointment, service_name: &str) -> Notification {
    let kind = appointment.status.meta().notification;
    Notification {
        appointment_id: appointment.id.clone(),
        kind,
        title: kind.title(),
        message: format!(
            "{} - {} at {}",
            service_name,
            appointment.date.format("%d %b"),
            format_time(appointment.time)
        ),
        created_at: appointment.created_at,
        read: appointment.status != AppointmentStatus::Requested,
    }
}

/// One notification per recent booking, newest first.
pub async fn notifications<S: Store>(store: &S, user_id: &str) -> BookingResult<Vec<Notification>> {
    let names = service_names(store).await?;
    let rows = store
        .appointments(&AppointmentQuery {
            order: AppointmentOrder::Newest,
            limit: Some(NOTIFICATION_LIMIT),
            ..AppointmentQuery::for_user(user_id)
        })
        .await?;
    Ok(rows
        .iter()
        .map(|a| {
            let name = names.get(&a.service_id).map_or("Service", String::as_str);
            notification_for(a, name)
        })
        .collect())
}
