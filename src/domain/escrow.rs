use super::account::UserId;
use super::money::Amount;
use super::payment_method::PaymentMethodType;
use super::transaction::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscrowStatus {
    Holding,
    Released,
    Returned,
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscrowStatus::Holding => "holding",
            EscrowStatus::Released => "released",
            EscrowStatus::Returned => "returned",
        };
        f.write_str(name)
    }
}

/// Funds held on behalf of exactly one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub transaction_id: TransactionId,
    pub amount: Amount,
    pub currency: String,
    pub method_type: PaymentMethodType,
    /// Method the funds were withdrawn from; returns go back here.
    pub source_method_id: String,
    pub source_owner: UserId,
    /// Rail reference of the withdrawal.
    pub external_transaction_id: String,
    /// Rail reference of the release or return deposit.
    pub settlement_reference: Option<String>,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}
