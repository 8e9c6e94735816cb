//! Access to the hosted backend's tables.
//!
//! Every method is a single request/response round trip. Implementations
//! enforce two uniqueness rules at write time:
//! - one slot per (date, time), reported as [`BookingError::Conflict`];
//! - one requested/confirmed appointment per (date, time), likewise.
//!
//! [`BookingError::Conflict`]: crate::error::BookingError::Conflict

pub mod memory;
pub mod rest;

use std::future::Future;

use chrono::{NaiveDate, NaiveTime};

use crate::error::BookingResult;
use crate::models::{
    Appointment, AppointmentStatus, ClientProfile, IntakeQuestion, IntakeQuestionChanges,
    NewAppointment, NewIntakeQuestion, NewService, NewSlot, Role,
    Service, ServiceChanges, Slot,
};

pub use memory::MemoryStore;
pub use rest::RestStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppointmentOrder {
    /// Date then time, ascending.
    #[default]
    Schedule,
    /// Date then time, descending.
    ScheduleDesc,
    /// Creation time, newest first.
    Newest,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentQuery {
    pub user_id: Option<String>,
    pub date: Option<NaiveDate>,
    /// Only appointments on or after this date.
    pub from: Option<NaiveDate>,
    /// Empty matches every status.
    pub statuses: Vec<AppointmentStatus>,
    pub order: AppointmentOrder,
    pub limit: Option<usize>,
}

impl AppointmentQuery {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, apt: &Appointment) -> bool {
        self.user_id.as_deref().map_or(true, |u| apt.user_id == u)
            && self.date.map_or(true, |d| apt.date == d)
            && self.from.map_or(true, |d| apt.date >= d)
            && (self.statuses.is_empty() || self.statuses.contains(&apt.status))
    }
}

pub trait Store: Send + Sync {
    /// Active slots dated `from` or later, ordered by date then time.
    fn open_slots(&self, from: NaiveDate) -> impl Future<Output = BookingResult<Vec<Slot>>> + Send;

    /// Active slots on exactly `date`, ordered by time.
    fn slots_on(&self, date: NaiveDate) -> impl Future<Output = BookingResult<Vec<Slot>>> + Send;

    /// Times on `date` held by requested or confirmed appointments.
    fn claimed_times(
        &self,
        date: NaiveDate,
    ) -> impl Future<Output = BookingResult<Vec<NaiveTime>>> + Send;

    fn insert_slot(&self, slot: NewSlot) -> impl Future<Output = BookingResult<Slot>> + Send;

    /// Insert, ignoring rows whose (date, time) already exists. Returns how many were new.
    fn upsert_slots(&self, slots: &[NewSlot]) -> impl Future<Output = BookingResult<usize>> + Send;

    /// Soft-delete: clears the active flag.
    fn deactivate_slot(&self, id: &str) -> impl Future<Output = BookingResult<()>> + Send;

    fn insert_appointment(
        &self,
        appointment: &NewAppointment,
    ) -> impl Future<Output = BookingResult<Appointment>> + Send;

    fn update_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> impl Future<Output = BookingResult<()>> + Send;

    fn appointments(
        &self,
        query: &AppointmentQuery,
    ) -> impl Future<Output = BookingResult<Vec<Appointment>>> + Send;

    /// Services ordered by name.
    fn services(&self, active_only: bool) -> impl Future<Output = BookingResult<Vec<Service>>> + Send;

    fn insert_service(
        &self,
        service: &NewService,
    ) -> impl Future<Output = BookingResult<Service>> + Send;

    fn update_service(
        &self,
        id: &str,
        changes: &ServiceChanges,
    ) -> impl Future<Output = BookingResult<()>> + Send;

    /// Client profiles, newest first.
    fn profiles(&self) -> impl Future<Output = BookingResult<Vec<ClientProfile>>> + Send;

    fn profile_for_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = BookingResult<Option<ClientProfile>>> + Send;

    /// Intake questions ordered by display order.
    fn intake_questions(
        &self,
        active_only: bool,
    ) -> impl Future<Output = BookingResult<Vec<IntakeQuestion>>> + Send;

    fn insert_intake_question(
        &self,
        question: &NewIntakeQuestion,
    ) -> impl Future<Output = BookingResult<IntakeQuestion>> + Send;

    fn update_intake_question(
        &self,
        id: &str,
        changes: &IntakeQuestionChanges,
    ) -> impl Future<Output = BookingResult<()>> + Send;

    /// Role granted to a user; users without a row are clients.
    fn role_of(&self, user_id: &str) -> impl Future<Output = BookingResult<Role>> + Send;
}
