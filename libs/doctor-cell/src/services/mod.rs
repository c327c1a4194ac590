pub mod availability;

pub use availability::AvailabilityIndex;
