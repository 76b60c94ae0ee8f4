//! Application services orchestrating the payment lifecycle.
//!
//! `PaymentService` is the entry point. It composes the rate limiter, the
//! request validators, the transaction state machine and the escrow manager,
//! each of which only talks to the outside world through the domain ports.

pub mod escrow;
pub mod payments;
pub mod rate_limiter;
pub mod transactions;
pub mod validation;
