use super::{
    ComplianceReport, FeeQuote, PaymentProcessor, ProcessingTime, RiskLevel, RiskPolicy,
    SettlementReceipt, guard_movement, instruction,
};
use crate::domain::money::{Amount, round_cents};
use crate::domain::payment_method::{
    CryptoDetails, CryptoNetwork, PaymentMethodDetails, PaymentMethodType,
};
use crate::domain::ports::{RailDirection, SettlementRailRef, SettlementStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub const CRYPTO_SINGLE_TRANSACTION_LIMIT: Decimal = dec!(50000);

const CRYPTO_RATE: Decimal = dec!(0.01);

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn network_fee(network: CryptoNetwork) -> Decimal {
    match network {
        CryptoNetwork::Bitcoin => dec!(2.00),
        CryptoNetwork::Ethereum => dec!(1.50),
        CryptoNetwork::Solana => dec!(0.01),
    }
}

fn is_base58(value: &str) -> bool {
    value.chars().all(|c| BASE58_ALPHABET.contains(c))
}

pub fn is_valid_address(details: &CryptoDetails) -> bool {
    let address = details.wallet_address.as_str();
    match details.network {
        CryptoNetwork::Ethereum => {
            address.len() == 42
                && address.starts_with("0x")
                && address[2..].bytes().all(|b| b.is_ascii_hexdigit())
        }
        CryptoNetwork::Bitcoin => {
            if let Some(rest) = address.strip_prefix("bc1") {
                (11..=71).contains(&rest.len())
                    && rest
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            } else {
                (26..=35).contains(&address.len())
                    && (address.starts_with('1') || address.starts_with('3'))
                    && is_base58(address)
            }
        }
        CryptoNetwork::Solana => (32..=44).contains(&address.len()) && is_base58(address),
    }
}

pub struct CryptoProcessor {
    rail: SettlementRailRef,
    risk_policy: RiskPolicy,
}

impl CryptoProcessor {
    pub fn new(rail: SettlementRailRef) -> Self {
        Self {
            rail,
            risk_policy: RiskPolicy::new(dec!(3000), dec!(10000))
                .with_restriction("Travel rule: originator and beneficiary must be identified"),
        }
    }

    pub fn with_risk_policy(mut self, policy: RiskPolicy) -> Self {
        self.risk_policy = policy;
        self
    }

    /// Quote including the network fee for a specific chain.
    pub fn quote_for(&self, network: CryptoNetwork, amount: Decimal) -> Result<FeeQuote> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "cannot quote fees for {amount}"
            )));
        }
        let processing_fee = network_fee(network);
        let percentage = round_cents(amount * CRYPTO_RATE);
        Ok(FeeQuote {
            processing_fee,
            percentage,
            total: processing_fee + percentage,
        })
    }
}

#[async_trait]
impl PaymentProcessor for CryptoProcessor {
    fn method_type(&self) -> PaymentMethodType {
        PaymentMethodType::Crypto
    }

    fn name(&self) -> &'static str {
        "crypto"
    }

    async fn validate_payment_method(&self, details: &PaymentMethodDetails) -> Result<bool> {
        Ok(matches!(details, PaymentMethodDetails::Crypto(crypto) if is_valid_address(crypto)))
    }

    async fn withdraw_funds(
        &self,
        details: &PaymentMethodDetails,
        amount: Amount,
    ) -> Result<SettlementReceipt> {
        guard_movement(self, details, amount, CRYPTO_SINGLE_TRANSACTION_LIMIT, self.name())
            .await?;
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
        guard_movement(self, details, amount, CRYPTO_SINGLE_TRANSACTION_LIMIT, self.name())
            .await?;
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

    /// Confirmation depth, not settlement finality.
    fn processing_time(&self) -> ProcessingTime {
        ProcessingTime {
            min_minutes: 10,
            max_minutes: 60,
        }
    }

    /// Uses the Ethereum network fee when the chain is unknown.
    fn calculate_fees(&self, amount: Decimal) -> Result<FeeQuote> {
        self.quote_for(CryptoNetwork::Ethereum, amount)
    }

    fn calculate_fees_for(&self, details: &PaymentMethodDetails, amount: Decimal) -> Result<FeeQuote> {
        match details {
            PaymentMethodDetails::Crypto(crypto) => self.quote_for(crypto.network, amount),
            _ => self.calculate_fees(amount),
        }
    }

    async fn transaction_status(&self, external_id: &str) -> Result<SettlementStatus> {
        self.rail.status(external_id).await
    }

    async fn check_compliance(
        &self,
        _details: &PaymentMethodDetails,
        amount: Decimal,
    ) -> Result<ComplianceReport> {
        if amount > CRYPTO_SINGLE_TRANSACTION_LIMIT {
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
