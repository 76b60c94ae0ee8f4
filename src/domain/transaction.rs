use super::account::{ServerId, UserId};
use super::money::Amount;
use super::payment_method::PaymentMethodType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Escrowed,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }

    /// Transactions that still count against daily limits.
    pub fn is_live(self) -> bool {
        !matches!(self, TransactionStatus::Failed | TransactionStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Escrowed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Escrowed, Completed)
                | (Escrowed, Failed)
                | (Escrowed, Cancelled)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Escrowed => "ESCROWED",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Fees attached to a transaction. `total` is always `processing + escrow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionFees {
    pub processing_fee: Decimal,
    pub escrow_fee: Decimal,
    pub total_fees: Decimal,
}

impl TransactionFees {
    pub fn new(processing_fee: Decimal, escrow_fee: Decimal) -> Self {
        Self {
            processing_fee,
            escrow_fee,
            total_fees: processing_fee + escrow_fee,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub amount: Amount,
    pub currency: String,
    pub sender_payment_method_id: String,
    pub recipient_payment_method_id: Option<String>,
    pub payment_method_type: PaymentMethodType,
    pub server_id: Option<ServerId>,
    pub description: Option<String>,
    pub status: TransactionStatus,
    #[serde(flatten)]
    pub fees: TransactionFees,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.recipient_id == user
    }
}

/// A requested status change, applied only if the current status allows it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionUpdate {
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    /// When set, the update only applies while the transaction is in this status.
    pub expected: Option<TransactionStatus>,
}

impl TransactionUpdate {
    pub fn to(status: TransactionStatus) -> Self {
        Self {
            status,
            failure_reason: None,
            expected: None,
        }
    }

    pub fn expecting(mut self, expected: TransactionStatus) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Whether a transaction currently in `current` may take this update.
    pub fn permits(&self, current: TransactionStatus) -> bool {
        self.expected.is_none_or(|expected| expected == current)
            && current.can_transition_to(self.status)
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Applies the update in place, stamping `completed_at` on terminal states.
    pub fn apply(&self, tx: &mut Transaction, now: DateTime<Utc>) {
        tx.status = self.status;
        if let Some(reason) = &self.failure_reason {
            tx.failure_reason = Some(reason.clone());
        }
        if self.status.is_terminal() {
            tx.completed_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_state_machine_transitions() {
        use TransactionStatus::*;
        assert!(Pending.can_transition_to(Escrowed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Escrowed.can_transition_to(Completed));
        assert!(Escrowed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        for terminal in [Completed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Escrowed, Completed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_fees_total() {
        let fees = TransactionFees::new(dec!(29.30), dec!(10.00));
        assert_eq!(fees.total_fees, dec!(39.30));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TransactionStatus::Escrowed).unwrap();
        assert_eq!(json, "\"ESCROWED\"");
    }
}
