pub mod esewa;
pub mod signature;
