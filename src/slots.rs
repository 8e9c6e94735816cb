use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calendar::{self, days_inclusive, weekday_index};
use crate::error::{BookingError, BookingResult};
use crate::models::{NewSlot, Slot};
use crate::store::Store;

/// Bulk creation request as entered by an administrator.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkRequest {
    pub start: Option<String>,
    pub end: Option<String>,
    /// 0 = Sunday .. 6 = Saturday
    #[serde(default)]
    pub weekdays: Vec<u8>,
    /// `HH:MM`
    #[serde(default)]
    pub times: Vec<String>,
}

/// A validated bulk request: times de-duplicated and sorted.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkPlan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub weekdays: BTreeSet<u8>,
    pub times: Vec<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkOutcome {
    /// Slots produced by the generator.
    pub generated: usize,
    /// Of those, how many did not exist yet.
    pub created: usize,
}

impl BulkPlan {
    pub fn parse(request: &BulkRequest) -> BookingResult<Self> {
        let (start, end) = match (request.start.as_deref(), request.end.as_deref()) {
            (Some(s), Some(e)) if !s.trim().is_empty() && !e.trim().is_empty() => {
                (calendar::parse_date(s)?, calendar::parse_date(e)?)
            }
            _ => return Err(BookingError::validation("Select both a start and an end date")),
        };
        if start > end {
            return Err(BookingError::validation(
                "The start date must not be after the end date",
            ));
        }
        if let Some(bad) = request.weekdays.iter().find(|d| **d > 6) {
            return Err(BookingError::validation(format!(
                "Weekday {bad} is out of range (0 = Sunday .. 6 = Saturday)"
            )));
        }
        let times: BTreeSet<NaiveTime> = request
            .times
            .iter()
            .map(|t| calendar::parse_time(t))
            .collect::<BookingResult<_>>()?;

        Ok(Self {
            start,
            end,
            weekdays: request.weekdays.iter().copied().collect(),
            times: times.into_iter().collect(),
        })
    }

    /// Every (date, time) in range whose weekday is selected.
    pub fn generate(&self) -> Vec<NewSlot> {
        days_inclusive(self.start, self.end)
            .filter(|d| self.weekdays.contains(&weekday_index(*d)))
            .flat_map(|date| self.times.iter().map(move |&time| NewSlot { date, time }))
            .collect()
    }
}

/// Generate and upsert a batch of slots. Existing (date, time) pairs are left
/// as they are, so re-running over an overlapping range is harmless.
pub async fn create_bulk<S: Store>(store: &S, plan: &BulkPlan) -> BookingResult<BulkOutcome> {
    let slots = plan.generate();
    if slots.is_empty() {
        return Err(BookingError::validation(
            "No time slots to create with this configuration",
        ));
    }
    let created = store
        .upsert_slots(&slots)
        .await
        .map_err(|e| match e {
            BookingError::Backend(msg) => {
                BookingError::Backend(format!("Failed to create time slots: {msg}"))
            }
            other => other,
        })?;
    info!(
        "Bulk slots {}..{}: {} generated, {} new",
        plan.start,
        plan.end,
        slots.len(),
        created
    );
    Ok(BulkOutcome {
        generated: slots.len(),
        created,
    })
}

pub async fn add_slot<S: Store>(store: &S, date: NaiveDate, time: NaiveTime) -> BookingResult<Slot> {
    store
        .insert_slot(NewSlot { date, time })
        .await
        .map_err(|e| e.on_conflict("This time slot already exists"))
}

pub async fn remove_slot<S: Store>(store: &S, id: &str) -> BookingResult<()> {
    store.deactivate_slot(id).await
}
