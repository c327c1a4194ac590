use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use tracing::{debug, instrument, warn};

use shared_database::{DbHandle, StoreError};
use shared_models::AvailabilityWindow;

/// Answers "does this doctor see patients at this time" from the weekly
/// availability table. Read-only; booking state is not considered here.
#[derive(Clone)]
pub struct AvailabilityIndex {
    store: DbHandle,
}

impl AvailabilityIndex {
    pub fn new(store: DbHandle) -> Self {
        Self { store }
    }

    /// Bookable slot start times on `date`, sorted and de-duplicated.
    #[instrument(skip(self))]
    pub async fn open_slots(&self, doctor_id: i64, date: NaiveDate) -> Result<Vec<NaiveTime>, StoreError> {
        let weekday = day_of_week(date);
        let windows = self.store.availability_windows(doctor_id).await?;

        let mut slots: Vec<NaiveTime> = windows
            .iter()
            .filter(|w| w.is_available && w.day_of_week == weekday)
            .flat_map(window_slots)
            .collect();
        slots.sort();
        slots.dedup();

        debug!("Doctor {} has {} open slots on {}", doctor_id, slots.len(), date);
        Ok(slots)
    }

    pub async fn is_available(
        &self,
        doctor_id: i64,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<bool, StoreError> {
        Ok(self.open_slots(doctor_id, date).await?.contains(&time))
    }

    /// Every window for the doctor, ordered by weekday then start time.
    pub async fn weekly_schedule(&self, doctor_id: i64) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let mut windows = self.store.availability_windows(doctor_id).await?;
        windows.sort_by_key(|w| (w.day_of_week, w.start_time));
        Ok(windows)
    }
}

/// 0 = Sunday through 6 = Saturday, matching the stored column.
pub fn day_of_week(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_sunday() as i16
}

/// Slot starts inside one window. A slot must end by the window's end time.
pub fn window_slots(window: &AvailabilityWindow) -> Vec<NaiveTime> {
    if window.slot_minutes <= 0 {
        warn!(
            "Availability window {} has non-positive slot length {}",
            window.id, window.slot_minutes
        );
        return Vec::new();
    }

    let step = Duration::minutes(i64::from(window.slot_minutes));
    let mut slots = Vec::new();
    let mut start = window.start_time;
    loop {
        // overflowing_add_signed wraps past midnight; a non-zero wrap ends the day.
        let (end, wrapped) = start.overflowing_add_signed(step);
        if wrapped != 0 || end > window.end_time {
            break;
        }
        slots.push(start);
        start = end;
    }
    slots
}
