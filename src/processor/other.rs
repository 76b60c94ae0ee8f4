use super::{
    ComplianceReport, FeeQuote, FeeSchedule, PaymentProcessor, ProcessingTime, RiskLevel,
    RiskPolicy, SettlementReceipt, guard_movement, instruction,
};
use crate::domain::money::Amount;
use crate::domain::payment_method::{PaymentMethodDetails, PaymentMethodType};
use crate::domain::ports::{RailDirection, SettlementRailRef, SettlementStatus};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const OTHER_SINGLE_TRANSACTION_LIMIT: Decimal = dec!(10000);

/// Wallet-style providers (PayPal, Cash App, ...) charged on the standard card-like schedule.
pub struct OtherProcessor {
    rail: SettlementRailRef,
    fees: FeeSchedule,
    risk_policy: RiskPolicy,
}

impl OtherProcessor {
    pub fn new(rail: SettlementRailRef) -> Self {
        Self {
            rail,
            fees: FeeSchedule::STANDARD,
            risk_policy: RiskPolicy::new(dec!(1000), dec!(10000)),
        }
    }

    pub fn with_fee_schedule(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }
}

#[async_trait]
impl PaymentProcessor for OtherProcessor {
    fn method_type(&self) -> PaymentMethodType {
        PaymentMethodType::Other
    }

    fn name(&self) -> &'static str {
        "other"
    }

    async fn validate_payment_method(&self, details: &PaymentMethodDetails) -> Result<bool> {
        Ok(match details {
            PaymentMethodDetails::Other(other) => {
                !other.provider.trim().is_empty() && other.handle.trim().chars().count() >= 3
            }
            _ => false,
        })
    }

    async fn withdraw_funds(
        &self,
        details: &PaymentMethodDetails,
        amount: Amount,
    ) -> Result<SettlementReceipt> {
        guard_movement(self, details, amount, OTHER_SINGLE_TRANSACTION_LIMIT, self.name()).await?;
        let receipt = self
            .rail
            .submit(instruction(RailDirection::Debit, details, amount))
            .await?;
        Ok(SettlementReceipt::from_rail(
            receipt,
            amount.value(),
            self.processing_time(),
        ))
    }

    async fn deposit_funds(
        &self,
        details: &PaymentMethodDetails,
        amount: Amount,
    ) -> Result<SettlementReceipt> {
        guard_movement(self, details, amount, OTHER_SINGLE_TRANSACTION_LIMIT, self.name()).await?;
        let receipt = self
            .rail
            .submit(instruction(RailDirection::Credit, details, amount))
            .await?;
        Ok(SettlementReceipt::from_rail(
            receipt,
            amount.value(),
            self.processing_time(),
        ))
    }

    fn processing_time(&self) -> ProcessingTime {
        ProcessingTime {
            min_minutes: 0,
            max_minutes: 30,
        }
    }

    fn calculate_fees(&self, amount: Decimal) -> Result<FeeQuote> {
        self.fees.quote(amount)
    }

    async fn transaction_status(&self, external_id: &str) -> Result<SettlementStatus> {
        self.rail.status(external_id).await
    }

    async fn check_compliance(
        &self,
        _details: &PaymentMethodDetails,
        amount: Decimal,
    ) -> Result<ComplianceReport> {
        if amount > OTHER_SINGLE_TRANSACTION_LIMIT {
            return Ok(ComplianceReport {
                approved: false,
                risk_level: RiskLevel::High,
                requires_additional_verification: true,
                restrictions: Vec::new(),
            });
        }
        Ok(self.risk_policy.assess(amount))
    }
}
