pub mod booking;
pub mod checkin;
pub mod lifecycle;
pub mod poller;
pub mod reconciliation;
pub mod sweeper;
pub mod token;

pub use booking::AppointmentBookingService;
pub use checkin::CheckInVerifier;
pub use lifecycle::AppointmentLifecycleService;
pub use poller::PaymentPoller;
pub use reconciliation::ReconciliationEngine;
pub use sweeper::ExpirySweeper;
pub use token::TokenIssuer;
