pub mod extractor;
pub mod jwt;
pub mod notification;
pub mod test_utils;
