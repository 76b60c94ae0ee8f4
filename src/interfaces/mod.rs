//! Adapters between files on disk and the payment service.

pub mod csv;
pub mod driver;
pub mod json;
