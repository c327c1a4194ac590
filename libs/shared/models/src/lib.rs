pub mod amount;
pub mod auth;
pub mod error;
pub mod lifecycle;

pub use amount::{Amount, AmountError};
pub use lifecycle::*;
