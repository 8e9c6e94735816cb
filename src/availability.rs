use std::collections::{BTreeMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use tracing::debug;

use crate::error::BookingResult;
use crate::models::Slot;
use crate::store::Store;

/// Slots on `date` that can still be booked: active, and not at a time held
/// by a requested or confirmed appointment. Ordered by time.
pub async fn available_slots<S: Store>(store: &S, date: NaiveDate) -> BookingResult<Vec<Slot>> {
    let slots = store.slots_on(date).await?;
    if slots.is_empty() {
        return Ok(slots);
    }
    let claimed = store.claimed_times(date).await?;
    let available = subtract_claimed(slots, &claimed);
    debug!(
        "{}: {} available, {} claimed",
        date,
        available.len(),
        claimed.len()
    );
    Ok(available)
}

/// Drop slots whose time is claimed, keeping time order.
pub fn subtract_claimed(mut slots: Vec<Slot>, claimed: &[NaiveTime]) -> Vec<Slot> {
    let claimed: HashSet<NaiveTime> = claimed.iter().copied().collect();
    slots.retain(|s| s.active && !claimed.contains(&s.time));
    slots.sort_by_key(|s| s.time);
    slots
}

/// Distinct dates from `from` on that have at least one active slot, ascending.
pub async fn open_dates<S: Store>(store: &S, from: NaiveDate) -> BookingResult<Vec<NaiveDate>> {
    let mut dates: Vec<NaiveDate> = store
        .open_slots(from)
        .await?
        .into_iter()
        .map(|s| s.date)
        .collect();
    dates.dedup();
    Ok(dates)
}

/// Active slots from `from` on, grouped by date for the schedule screen.
pub async fn schedule_by_date<S: Store>(
    store: &S,
    from: NaiveDate,
) -> BookingResult<BTreeMap<NaiveDate, Vec<Slot>>> {
    let mut grouped: BTreeMap<NaiveDate, Vec<Slot>> = BTreeMap::new();
    for slot in store.open_slots(from).await? {
        grouped.entry(slot.date).or_default().push(slot);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AppointmentStatus, NewAppointment, NewSlot};
    use crate::store::MemoryStore;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn time(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    async fn book(store: &MemoryStore, d: u32, h: u32, status: AppointmentStatus) {
        let apt = store
            .insert_appointment(&NewAppointment {
                user_id: "u1".into(),
                service_id: "s1".into(),
                date: date(d),
                time: time(h),
                status: AppointmentStatus::Requested,
                intake: None,
            })
            .await
            .unwrap();
        if status != AppointmentStatus::Requested {
            store.update_appointment_status(&apt.id, status).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_confirmed_appointment_hides_its_time_only() {
        let store = MemoryStore::new();
        for h in [11, 9, 10] {
            store.insert_slot(NewSlot { date: date(1), time: time(h) }).await.unwrap();
        }
        book(&store, 1, 9, AppointmentStatus::Confirmed).await;

        let slots = available_slots(&store, date(1)).await.unwrap();
        let times: Vec<_> = slots.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![time(10), time(11)]);
    }

    #[tokio::test]
    async fn test_requested_claims_but_finished_statuses_do_not() {
        let store = MemoryStore::new();
        for h in [9, 10, 11, 12] {
            store.insert_slot(NewSlot { date: date(1), time: time(h) }).await.unwrap();
        }
        book(&store, 1, 9, AppointmentStatus::Requested).await;
        book(&store, 1, 10, AppointmentStatus::Completed).await;
        book(&store, 1, 11, AppointmentStatus::Cancelled).await;

        let times: Vec<_> = available_slots(&store, date(1))
            .await
            .unwrap()
            .iter()
            .map(|s| s.time)
            .collect();
        assert_eq!(times, vec![time(10), time(11), time(12)]);
    }

    #[tokio::test]
    async fn test_appointments_on_other_days_do_not_interfere() {
        let store = MemoryStore::new();
        store.insert_slot(NewSlot { date: date(1), time: time(9) }).await.unwrap();
        book(&store, 2, 9, AppointmentStatus::Confirmed).await;
        assert_eq!(available_slots(&store, date(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_or_missing_slots_give_empty_result() {
        let store = MemoryStore::new();
        assert!(available_slots(&store, date(1)).await.unwrap().is_empty());

        let slot = store.insert_slot(NewSlot { date: date(1), time: time(9) }).await.unwrap();
        store.deactivate_slot(&slot.id).await.unwrap();
        assert!(available_slots(&store, date(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_dates_are_distinct_and_from_today() {
        let store = MemoryStore::new();
        for (d, h) in [(1, 9), (2, 9), (2, 10), (4, 9)] {
            store.insert_slot(NewSlot { date: date(d), time: time(h) }).await.unwrap();
        }
        assert_eq!(open_dates(&store, date(2)).await.unwrap(), vec![date(2), date(4)]);

        let grouped = schedule_by_date(&store, date(1)).await.unwrap();
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[&date(2)].len(), 2);
    }

    #[test]
    fn test_subtract_claimed_sorts_by_time() {
        let slot = |h| Slot {
            id: format!("s{h}"),
            date: date(1),
            time: time(h),
            active: true,
        };
        let left = subtract_claimed(vec![slot(15), slot(9), slot(14)], &[time(14)]);
        assert_eq!(left.iter().map(|s| s.time).collect::<Vec<_>>(), vec![time(9), time(15)]);
    }
}
