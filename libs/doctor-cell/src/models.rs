use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use shared_models::AvailabilityWindow;

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaySlots {
    pub doctor_id: i64,
    pub date: NaiveDate,
    pub slots: Vec<NaiveTime>,
    pub total_slots: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklySchedule {
    pub doctor_id: i64,
    pub windows: Vec<AvailabilityWindow>,
}
