use super::{
    ComplianceReport, FeeQuote, FeeSchedule, PaymentProcessor, ProcessingTime, RiskLevel,
    RiskPolicy, SettlementReceipt, guard_movement, instruction,
};
use crate::domain::money::Amount;
use crate::domain::payment_method::{
    AchAccountType, AchDetails, PaymentMethodDetails, PaymentMethodType,
};
use crate::domain::ports::{BankDirectoryRef, RailDirection, SettlementRailRef, SettlementStatus};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

/// Largest single ACH movement.
pub const ACH_SINGLE_TRANSACTION_LIMIT: Decimal = dec!(10000);
/// Largest aggregate a sender may move over ACH per day.
pub const ACH_DAILY_LIMIT: Decimal = dec!(25000);

const ACH_FEES: FeeSchedule = FeeSchedule {
    flat: dec!(0.50),
    rate: dec!(0.008),
};

const ABA_WEIGHTS: [u32; 9] = [3, 7, 1, 3, 7, 1, 3, 7, 1];

/// Routing numbers recognised without a checksum.
const KNOWN_ROUTING_NUMBERS: &[&str] = &[
    "021000021", // JPMorgan Chase
    "026009593", // Bank of America
    "121000248", // Wells Fargo
    "011000138", // Bank of America (New England)
    "322271627", // Chase (West)
];

/// A routing number is 9 digits that either belong to a known bank or pass the ABA checksum.
pub fn is_valid_routing_number(routing: &str) -> bool {
    if routing.len() != 9 || !routing.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    KNOWN_ROUTING_NUMBERS.contains(&routing) || aba_checksum(routing)
}

/// Weighted sum with the repeating (3, 7, 1) pattern must be a multiple of 10.
pub fn aba_checksum(routing: &str) -> bool {
    let sum: u32 = routing
        .bytes()
        .zip(ABA_WEIGHTS)
        .map(|(digit, weight)| u32::from(digit - b'0') * weight)
        .sum();
    routing.len() == 9 && sum % 10 == 0
}

pub fn is_valid_account_number(account: &str) -> bool {
    (4..=17).contains(&account.len()) && account.bytes().all(|b| b.is_ascii_digit())
}

/// Shape checks that need no bank lookup.
pub fn validate_shape(details: &AchDetails) -> Vec<String> {
    let mut problems = Vec::new();
    if !is_valid_routing_number(&details.routing_number) {
        problems.push("routing number must be 9 digits with a valid ABA checksum".to_string());
    }
    if !is_valid_account_number(&details.account_number) {
        problems.push("account number must be 4 to 17 digits".to_string());
    }
    if details.account_type.parse::<AchAccountType>().is_err() {
        problems.push("account type must be checking or savings".to_string());
    }
    if details.account_holder_name.trim().chars().count() < 2 {
        problems.push("account holder name must be at least 2 characters".to_string());
    }
    problems
}

pub struct AchProcessor {
    rail: SettlementRailRef,
    banks: BankDirectoryRef,
    risk_policy: RiskPolicy,
}

impl AchProcessor {
    pub fn new(rail: SettlementRailRef, banks: BankDirectoryRef) -> Self {
        Self {
            rail,
            banks,
            risk_policy: Self::default_risk_policy(),
        }
    }

    /// $1,000 / $10,000 tiering with the daily-limit restriction on high risk.
    pub fn default_risk_policy() -> RiskPolicy {
        RiskPolicy::new(dec!(1000), dec!(10000)).with_restriction("Daily limit: $10,000")
    }

    pub fn with_risk_policy(mut self, policy: RiskPolicy) -> Self {
        self.risk_policy = policy;
        self
    }

    fn ach<'a>(&self, details: &'a PaymentMethodDetails) -> Option<&'a AchDetails> {
        match details {
            PaymentMethodDetails::Ach(ach) => Some(ach),
            _ => None,
        }
    }
}

#[async_trait]
impl PaymentProcessor for AchProcessor {
    fn method_type(&self) -> PaymentMethodType {
        PaymentMethodType::Ach
    }

    fn name(&self) -> &'static str {
        "ACH"
    }

    async fn validate_payment_method(&self, details: &PaymentMethodDetails) -> Result<bool> {
        let Some(ach) = self.ach(details) else {
            return Ok(false);
        };
        let problems = validate_shape(ach);
        if !problems.is_empty() {
            debug!(?problems, "ACH details rejected");
            return Ok(false);
        }
        match self.banks.lookup_bank(&ach.routing_number).await? {
            Some(bank) if bank.is_active && bank.ach_participant => Ok(true),
            Some(bank) => {
                warn!(
                    routing = %bank.routing_number,
                    bank = %bank.name,
                    active = bank.is_active,
                    participant = bank.ach_participant,
                    "bank cannot settle ACH"
                );
                Ok(false)
            }
            None => {
                warn!(routing = %ach.routing_number, "bank not found for routing number");
                Ok(false)
            }
        }
    }

    async fn withdraw_funds(
        &self,
        details: &PaymentMethodDetails,
        amount: Amount,
    ) -> Result<SettlementReceipt> {
        guard_movement(self, details, amount, ACH_SINGLE_TRANSACTION_LIMIT, self.name()).await?;
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
        guard_movement(self, details, amount, ACH_SINGLE_TRANSACTION_LIMIT, self.name()).await?;
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

    /// One to three business days.
    fn processing_time(&self) -> ProcessingTime {
        ProcessingTime {
            min_minutes: 1440,
            max_minutes: 4320,
        }
    }

    fn calculate_fees(&self, amount: Decimal) -> Result<FeeQuote> {
        ACH_FEES.quote(amount)
    }

    async fn transaction_status(&self, external_id: &str) -> Result<SettlementStatus> {
        self.rail.status(external_id).await
    }

    async fn check_compliance(
        &self,
        _details: &PaymentMethodDetails,
        amount: Decimal,
    ) -> Result<ComplianceReport> {
        if amount > ACH_SINGLE_TRANSACTION_LIMIT {
            return Ok(ComplianceReport {
                approved: false,
                risk_level: RiskLevel::High,
                requires_additional_verification: true,
                restrictions: vec![format!(
                    "Single transaction limit: ${ACH_SINGLE_TRANSACTION_LIMIT}"
                )],
            });
        }
        Ok(self.risk_policy.assess(amount))
    }
}
