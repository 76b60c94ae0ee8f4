use super::account::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethodType {
    Ach,
    Crypto,
    Other,
}

impl fmt::Display for PaymentMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentMethodType::Ach => "ach",
            PaymentMethodType::Crypto => "crypto",
            PaymentMethodType::Other => "other",
        };
        f.write_str(name)
    }
}

impl FromStr for PaymentMethodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ach" | "bank" => Ok(PaymentMethodType::Ach),
            "crypto" => Ok(PaymentMethodType::Crypto),
            "other" => Ok(PaymentMethodType::Other),
            other => Err(format!("unknown payment method type '{other}'")),
        }
    }
}

/// Bank account holding type. Only personal account kinds are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AchAccountType {
    Checking,
    Savings,
}

impl FromStr for AchAccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checking" => Ok(AchAccountType::Checking),
            "savings" => Ok(AchAccountType::Savings),
            other => Err(format!("unsupported ACH account type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchDetails {
    pub routing_number: String,
    pub account_number: String,
    /// Kept as provided so unsupported kinds (e.g. `business`) can be rejected by validation.
    pub account_type: String,
    pub account_holder_name: String,
}

impl AchDetails {
    /// Account number with everything but the last four digits hidden.
    pub fn masked_account(&self) -> String {
        mask(&self.account_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoNetwork {
    Bitcoin,
    Ethereum,
    Solana,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoDetails {
    pub network: CryptoNetwork,
    pub wallet_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherDetails {
    pub provider: String,
    pub handle: String,
}

/// Settlement details for one payment method, one variant per rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PaymentMethodDetails {
    Ach(AchDetails),
    Crypto(CryptoDetails),
    Other(OtherDetails),
}

impl PaymentMethodDetails {
    pub fn method_type(&self) -> PaymentMethodType {
        match self {
            PaymentMethodDetails::Ach(_) => PaymentMethodType::Ach,
            PaymentMethodDetails::Crypto(_) => PaymentMethodType::Crypto,
            PaymentMethodDetails::Other(_) => PaymentMethodType::Other,
        }
    }

    /// A reference safe to hand to logs and rails.
    pub fn account_reference(&self) -> String {
        match self {
            PaymentMethodDetails::Ach(ach) => {
                format!("{}:{}", ach.routing_number, ach.masked_account())
            }
            PaymentMethodDetails::Crypto(crypto) => mask(&crypto.wallet_address),
            PaymentMethodDetails::Other(other) => format!("{}:{}", other.provider, other.handle),
        }
    }
}

fn mask(value: &str) -> String {
    let visible: String = value
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{visible}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethodConfig {
    pub id: String,
    pub owner: UserId,
    pub details: PaymentMethodDetails,
    #[serde(default = "active")]
    pub is_active: bool,
}

fn active() -> bool {
    true
}

impl PaymentMethodConfig {
    pub fn new(id: impl Into<String>, owner: UserId, details: PaymentMethodDetails) -> Self {
        Self {
            id: id.into(),
            owner,
            details,
            is_active: true,
        }
    }

    pub fn method_type(&self) -> PaymentMethodType {
        self.details.method_type()
    }
}
