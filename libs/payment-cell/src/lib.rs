pub mod error;
pub mod models;
pub mod services;

pub use error::GatewayError;
pub use models::*;
pub use services::esewa::EsewaGateway;
