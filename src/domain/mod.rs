//! Domain types and the ports the payment core depends on.

pub mod account;
pub mod escrow;
pub mod money;
pub mod payment_method;
pub mod ports;
pub mod transaction;
