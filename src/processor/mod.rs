//! Settlement-method specific processors.
//!
//! Each processor owns its validation rules, fee schedule, compliance tiering
//! and the translation of a withdrawal or deposit into a [`RailInstruction`].
//! Processors never retry: rail failures surface as
//! [`PaymentError::ProcessorUnavailable`] and the caller decides.

pub mod ach;
pub mod crypto;
pub mod other;

use crate::domain::money::{Amount, round_cents};
use crate::domain::payment_method::{PaymentMethodDetails, PaymentMethodType};
use crate::domain::ports::{RailInstruction, RailReceipt, SettlementStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Fee quote for a single movement.
///
/// `processing_fee` is the flat part of the schedule, `percentage` the amount
/// charged by the rate, and `total` their sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub processing_fee: Decimal,
    pub percentage: Decimal,
    pub total: Decimal,
}

/// A flat fee plus a rate on the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub flat: Decimal,
    pub rate: Decimal,
}

impl FeeSchedule {
    /// 2.9% + $0.30, the card-like default.
    pub const STANDARD: FeeSchedule = FeeSchedule {
        flat: dec!(0.30),
        rate: dec!(0.029),
    };

    pub fn quote(&self, amount: Decimal) -> Result<FeeQuote> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "cannot quote fees for {amount}"
            )));
        }
        let processing_fee = round_cents(self.flat);
        let percentage = round_cents(amount * self.rate);
        Ok(FeeQuote {
            processing_fee,
            percentage,
            total: processing_fee + percentage,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTime {
    pub min_minutes: u32,
    pub max_minutes: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub approved: bool,
    pub risk_level: RiskLevel,
    pub requires_additional_verification: bool,
    pub restrictions: Vec<String>,
}

/// Amount thresholds that drive compliance tiering.
///
/// Amounts below `medium_threshold` are low risk, below `high_threshold`
/// medium, and anything else high risk with extra verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskPolicy {
    pub medium_threshold: Decimal,
    pub high_threshold: Decimal,
    /// Attached to high-risk reports.
    pub high_risk_restrictions: Vec<String>,
}

impl RiskPolicy {
    pub fn new(medium_threshold: Decimal, high_threshold: Decimal) -> Self {
        Self {
            medium_threshold,
            high_threshold,
            high_risk_restrictions: Vec::new(),
        }
    }

    pub fn with_restriction(mut self, restriction: impl Into<String>) -> Self {
        self.high_risk_restrictions.push(restriction.into());
        self
    }

    pub fn classify(&self, amount: Decimal) -> RiskLevel {
        if amount < self.medium_threshold {
            RiskLevel::Low
        } else if amount < self.high_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }

    /// Builds a report for an amount already known to be within the processor's limit.
    pub fn assess(&self, amount: Decimal) -> ComplianceReport {
        let risk_level = self.classify(amount);
        let high = risk_level == RiskLevel::High;
        ComplianceReport {
            approved: true,
            risk_level,
            requires_additional_verification: high,
            restrictions: if high {
                self.high_risk_restrictions.clone()
            } else {
                Vec::new()
            },
        }
    }
}

/// Result of a successful withdrawal or deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub external_id: String,
    pub amount: Decimal,
    pub processing_time: ProcessingTime,
}

impl SettlementReceipt {
    fn from_rail(receipt: RailReceipt, amount: Decimal, processing_time: ProcessingTime) -> Self {
        Self {
            external_id: receipt.reference,
            amount,
            processing_time,
        }
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn method_type(&self) -> PaymentMethodType;

    fn name(&self) -> &'static str;

    /// Whether `details` can be used with this processor at all.
    async fn validate_payment_method(&self, details: &PaymentMethodDetails) -> Result<bool>;

    /// Pulls `amount` from the account described by `details` into escrow.
    async fn withdraw_funds(
        &self,
        details: &PaymentMethodDetails,
        amount: Amount,
    ) -> Result<SettlementReceipt>;

    /// Pushes `amount` out of escrow to the account described by `details`.
    async fn deposit_funds(
        &self,
        details: &PaymentMethodDetails,
        amount: Amount,
    ) -> Result<SettlementReceipt>;

    fn processing_time(&self) -> ProcessingTime;

    fn calculate_fees(&self, amount: Decimal) -> Result<FeeQuote>;

    /// Fee quote for moving `amount` through a specific account.
    fn calculate_fees_for(&self, details: &PaymentMethodDetails, amount: Decimal) -> Result<FeeQuote> {
        let _ = details;
        self.calculate_fees(amount)
    }

    async fn transaction_status(&self, external_id: &str) -> Result<SettlementStatus>;

    async fn check_compliance(
        &self,
        details: &PaymentMethodDetails,
        amount: Decimal,
    ) -> Result<ComplianceReport>;
}

pub type PaymentProcessorRef = Arc<dyn PaymentProcessor>;

/// Pre-flight gate shared by every processor before anything reaches a rail.
///
/// The checks run in a fixed order so each failure has one distinct message.
/// Positivity is already guaranteed by [`Amount`].
pub(crate) async fn guard_movement<P: PaymentProcessor + ?Sized>(
    processor: &P,
    details: &PaymentMethodDetails,
    amount: Amount,
    single_limit: Decimal,
    label: &str,
) -> Result<()> {
    let value = amount.value();
    if !processor.validate_payment_method(details).await? {
        return Err(PaymentError::validation(format!(
            "Invalid {label} payment details"
        )));
    }
    if value > single_limit {
        return Err(PaymentError::LimitExceeded(format!(
            "Amount exceeds {label} single transaction limit of ${single_limit}"
        )));
    }
    let report = processor.check_compliance(details, value).await?;
    if !report.approved {
        return Err(PaymentError::ComplianceRejected(format!(
            "{label} compliance check not approved"
        )));
    }
    if report.requires_additional_verification {
        return Err(PaymentError::VerificationRequired(format!(
            "Additional verification required for this {label} transfer"
        )));
    }
    Ok(())
}

pub(crate) fn instruction(
    direction: crate::domain::ports::RailDirection,
    details: &PaymentMethodDetails,
    amount: Amount,
) -> RailInstruction {
    RailInstruction {
        direction,
        method_type: details.method_type(),
        account_reference: details.account_reference(),
        amount: amount.value(),
    }
}

/// Processors keyed by the method type they settle.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<PaymentMethodType, PaymentProcessorRef>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, processor: PaymentProcessorRef) -> Self {
        self.processors.insert(processor.method_type(), processor);
        self
    }

    pub fn get(&self, method_type: PaymentMethodType) -> Result<PaymentProcessorRef> {
        self.processors
            .get(&method_type)
            .cloned()
            .ok_or_else(|| PaymentError::not_found("payment processor", method_type))
    }

    pub fn supported(&self) -> Vec<PaymentMethodType> {
        self.processors.keys().copied().collect()
    }
}
