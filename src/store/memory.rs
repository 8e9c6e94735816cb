use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{AppointmentOrder, AppointmentQuery, Store};
use crate::error::{BookingError, BookingResult};
use crate::models::{
    Appointment, AppointmentStatus, ClientProfile, IntakeQuestion, IntakeQuestionChanges,
    NewAppointment, NewIntakeQuestion, NewService, NewSlot, Role,
    Service, ServiceChanges, Slot,
};

#[derive(Default)]
struct Tables {
    slots: Vec<Slot>,
    appointments: Vec<Appointment>,
    services: Vec<Service>,
    profiles: Vec<ClientProfile>,
    questions: Vec<IntakeQuestion>,
    roles: HashMap<String, Role>,
}

/// In-process store with the backend's uniqueness rules. Used by tests and `--demo`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn not_found(what: &str, id: &str) -> BookingError {
    BookingError::NotFound(format!("{what} {id}"))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> BookingResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| BookingError::backend("memory store poisoned"))
    }

    #[cfg(test)]
    pub fn grant_role(&self, user_id: &str, role: Role) -> BookingResult<()> {
        self.lock()?.roles.insert(user_id.to_string(), role);
        Ok(())
    }

    /// Every slot row, including soft-deleted ones.
    #[cfg(test)]
    pub fn all_slots(&self) -> BookingResult<Vec<Slot>> {
        Ok(self.lock()?.slots.clone())
    }

    /// Client profiles are written by the backend at sign-up; tests add them here.
    #[cfg(test)]
    pub fn add_profile(
        &self,
        user_id: &str,
        first_name: &str,
        last_name: Option<&str>,
        whatsapp: &str,
    ) -> BookingResult<ClientProfile> {
        let row = ClientProfile {
            id: new_id(),
            user_id: user_id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.map(str::to_string),
            whatsapp: whatsapp.to_string(),
            created_at: Some(Utc::now()),
        };
        self.lock()?.profiles.push(row.clone());
        Ok(row)
    }

    /// Populate a small studio: three services, two intake questions, a
    /// week of weekday slots starting at `from`, and an admin account.
    pub fn seed_demo(&self, from: NaiveDate, admin_user_id: &str) -> BookingResult<()> {
        let mut t = self.lock()?;
        let services = [
            ("Haircut", 60, Some(80.0), false),
            ("Eyebrow design", 30, Some(45.0), false),
            ("Lash lifting", 90, Some(150.0), true),
        ];
        for (name, duration, price, requires_intake) in services {
            t.services.push(Service {
                id: new_id(),
                name: name.to_string(),
                description: None,
                duration_minutes: duration,
                price,
                show_price: true,
                requires_intake,
                active: true,
            });
        }
        t.services.sort_by(|a, b| a.name.cmp(&b.name));

        let questions = [
            ("Do you have any allergies?", crate::models::AnswerType::YesNo),
            ("Are you taking any medication?", crate::models::AnswerType::Text),
        ];
        for (order, (text, answer_type)) in questions.into_iter().enumerate() {
            t.questions.push(IntakeQuestion {
                id: new_id(),
                text: text.to_string(),
                answer_type,
                order: order as i32 + 1,
                active: true,
            });
        }

        for date in crate::calendar::days_inclusive(from, from + chrono::Days::new(6)) {
            if crate::calendar::weekday_index(date) == 0 {
                continue;
            }
            for hour in [9, 10, 11, 14, 15, 16] {
                if let Some(time) = NaiveTime::from_hms_opt(hour, 0, 0) {
                    t.slots.push(Slot {
                        id: new_id(),
                        date,
                        time,
                        active: true,
                    });
                }
            }
        }
        t.roles.insert(admin_user_id.to_string(), Role::Admin);
        debug!("Seeded demo store with {} slots", t.slots.len());
        Ok(())
    }
}

fn sort_by_schedule(slots: &mut [Slot]) {
    slots.sort_by(|a, b| (a.date, a.time).cmp(&(b.date, b.time)));
}

impl Store for MemoryStore {
    async fn open_slots(&self, from: NaiveDate) -> BookingResult<Vec<Slot>> {
        let mut slots: Vec<Slot> = self
            .lock()?
            .slots
            .iter()
            .filter(|s| s.active && s.date >= from)
            .cloned()
            .collect();
        sort_by_schedule(&mut slots);
        Ok(slots)
    }

    async fn slots_on(&self, date: NaiveDate) -> BookingResult<Vec<Slot>> {
        let mut slots: Vec<Slot> = self
            .lock()?
            .slots
            .iter()
            .filter(|s| s.active && s.date == date)
            .cloned()
            .collect();
        sort_by_schedule(&mut slots);
        Ok(slots)
    }

    async fn claimed_times(&self, date: NaiveDate) -> BookingResult<Vec<NaiveTime>> {
        Ok(self
            .lock()?
            .appointments
            .iter()
            .filter(|a| a.date == date && a.status.claims_slot())
            .map(|a| a.time)
            .collect())
    }

    async fn insert_slot(&self, slot: NewSlot) -> BookingResult<Slot> {
        let mut t = self.lock()?;
        if t.slots.iter().any(|s| s.date == slot.date && s.time == slot.time) {
            return Err(BookingError::Conflict(format!(
                "duplicate key (data, hora)=({}, {})",
                slot.date, slot.time
            )));
        }
        let row = Slot {
            id: new_id(),
            date: slot.date,
            time: slot.time,
            active: true,
        };
        t.slots.push(row.clone());
        Ok(row)
    }

    async fn upsert_slots(&self, slots: &[NewSlot]) -> BookingResult<usize> {
        let mut t = self.lock()?;
        let mut created = 0;
        for slot in slots {
            if t.slots.iter().any(|s| s.date == slot.date && s.time == slot.time) {
                continue;
            }
            t.slots.push(Slot {
                id: new_id(),
                date: slot.date,
                time: slot.time,
                active: true,
            });
            created += 1;
        }
        Ok(created)
    }

    async fn deactivate_slot(&self, id: &str) -> BookingResult<()> {
        let mut t = self.lock()?;
        let slot = t
            .slots
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| not_found("slot", id))?;
        slot.active = false;
        Ok(())
    }

    async fn insert_appointment(&self, appointment: &NewAppointment) -> BookingResult<Appointment> {
        let mut t = self.lock()?;
        if appointment.status.claims_slot()
            && t.appointments.iter().any(|a| {
                a.date == appointment.date && a.time == appointment.time && a.status.claims_slot()
            })
        {
            return Err(BookingError::Conflict(format!(
                "appointment already holds {} {}",
                appointment.date, appointment.time
            )));
        }
        let row = Appointment {
            id: new_id(),
            user_id: appointment.user_id.clone(),
            service_id: appointment.service_id.clone(),
            date: appointment.date,
            time: appointment.time,
            status: appointment.status,
            intake: appointment.intake.clone(),
            created_at: Some(Utc::now()),
        };
        t.appointments.push(row.clone());
        Ok(row)
    }

    async fn update_appointment_status(
        &self,
        id: &str,
        status: AppointmentStatus,
    ) -> BookingResult<()> {
        let mut t = self.lock()?;
        let apt = t
            .appointments
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| not_found("appointment", id))?;
        if status.claims_slot()
            && !apt.status.claims_slot()
            && t.appointments.iter().any(|a| {
                a.id != id && a.date == apt.date && a.time == apt.time && a.status.claims_slot()
            })
        {
            return Err(BookingError::Conflict(format!(
                "appointment already holds {} {}",
                apt.date, apt.time
            )));
        }
        if let Some(row) = t.appointments.iter_mut().find(|a| a.id == id) {
            row.status = status;
        }
        Ok(())
    }

    async fn appointments(&self, query: &AppointmentQuery) -> BookingResult<Vec<Appointment>> {
        let mut rows: Vec<Appointment> = self
            .lock()?
            .appointments
            .iter()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        match query.order {
            AppointmentOrder::Schedule => rows.sort_by_key(|a| (a.date, a.time)),
            AppointmentOrder::ScheduleDesc => {
                rows.sort_by_key(|a| std::cmp::Reverse((a.date, a.time)))
            }
            AppointmentOrder::Newest => rows.sort_by_key(|a| std::cmp::Reverse(a.created_at)),
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn services(&self, active_only: bool) -> BookingResult<Vec<Service>> {
        let mut rows: Vec<Service> = self
            .lock()?
            .services
            .iter()
            .filter(|s| !active_only || s.active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn insert_service(&self, service: &NewService) -> BookingResult<Service> {
        let row = Service {
            id: new_id(),
            name: service.name.clone(),
            description: service.description.clone(),
            duration_minutes: service.duration_minutes,
            price: service.price,
            show_price: service.show_price,
            requires_intake: service.requires_intake,
            active: true,
        };
        self.lock()?.services.push(row.clone());
        Ok(row)
    }

    async fn update_service(&self, id: &str, changes: &ServiceChanges) -> BookingResult<()> {
        let mut t = self.lock()?;
        let svc = t
            .services
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| not_found("service", id))?;
        if let Some(name) = &changes.name {
            svc.name = name.clone();
        }
        if let Some(description) = &changes.description {
            svc.description = description.clone();
        }
        if let Some(duration) = changes.duration_minutes {
            svc.duration_minutes = duration;
        }
        if let Some(price) = changes.price {
            svc.price = price;
        }
        if let Some(show) = changes.show_price {
            svc.show_price = show;
        }
        if let Some(requires) = changes.requires_intake {
            svc.requires_intake = requires;
        }
        if let Some(active) = changes.active {
            svc.active = active;
        }
        Ok(())
    }

    async fn profiles(&self) -> BookingResult<Vec<ClientProfile>> {
        let mut rows = self.lock()?.profiles.clone();
        rows.sort_by_key(|p| std::cmp::Reverse(p.created_at));
        Ok(rows)
    }

    async fn profile_for_user(&self, user_id: &str) -> BookingResult<Option<ClientProfile>> {
        Ok(self
            .lock()?
            .profiles
            .iter()
            .find(|p| p.user_id == user_id)
            .cloned())
    }

    async fn intake_questions(&self, active_only: bool) -> BookingResult<Vec<IntakeQuestion>> {
        let mut rows: Vec<IntakeQuestion> = self
            .lock()?
            .questions
            .iter()
            .filter(|q| !active_only || q.active)
            .cloned()
            .collect();
        rows.sort_by_key(|q| q.order);
        Ok(rows)
    }

    async fn insert_intake_question(
        &self,
        question: &NewIntakeQuestion,
    ) -> BookingResult<IntakeQuestion> {
        let row = IntakeQuestion {
            id: new_id(),
            text: question.text.clone(),
            answer_type: question.answer_type,
            order: question.order,
            active: true,
        };
        self.lock()?.questions.push(row.clone());
        Ok(row)
    }

    async fn update_intake_question(
        &self,
        id: &str,
        changes: &IntakeQuestionChanges,
    ) -> BookingResult<()> {
        let mut t = self.lock()?;
        let q = t
            .questions
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| not_found("question", id))?;
        if let Some(text) = &changes.text {
            q.text = text.clone();
        }
        if let Some(answer_type) = changes.answer_type {
            q.answer_type = answer_type;
        }
        if let Some(order) = changes.order {
            q.order = order;
        }
        if let Some(active) = changes.active {
            q.active = active;
        }
        Ok(())
    }

    async fn role_of(&self, user_id: &str) -> BookingResult<Role> {
        Ok(self.lock()?.roles.get(user_id).copied().unwrap_or_default())
    }
}
