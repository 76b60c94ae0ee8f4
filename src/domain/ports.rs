use super::account::{ServerConfig, ServerId, UserAccount, UserId};
use super::escrow::{EscrowRecord, EscrowStatus};
use super::payment_method::PaymentMethodType;
use super::transaction::{Transaction, TransactionId, TransactionUpdate};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Daily limits the store enforces atomically while inserting a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyQuota {
    /// Start of the window (UTC midnight of the transaction day).
    pub since: DateTime<Utc>,
    /// Only count transactions settled over this method type.
    pub method_type: Option<PaymentMethodType>,
    /// Only count transactions initiated on this server.
    pub server_id: Option<ServerId>,
    pub max_amount: Option<Decimal>,
    pub max_transactions: Option<u32>,
}

impl DailyQuota {
    /// Whether `tx` falls inside this quota's window and scope.
    pub fn covers(&self, tx: &Transaction) -> bool {
        tx.created_at >= self.since
            && self.method_type.is_none_or(|m| m == tx.payment_method_type)
            && self
                .server_id
                .as_ref()
                .is_none_or(|server| tx.server_id.as_ref() == Some(server))
    }
}

/// Live transactions a sender initiated since a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DailyActivity {
    pub count: u32,
    pub total: Decimal,
}

impl DailyActivity {
    /// Describes why adding `amount` would breach `quota`, if it would.
    pub fn breach(&self, quota: &DailyQuota, amount: Decimal) -> Option<String> {
        if let Some(max) = quota.max_transactions
            && self.count >= max
        {
            return Some(format!("daily transaction count of {max} reached"));
        }
        if let Some(max) = quota.max_amount
            && self.total + amount > max
        {
            return Some(format!(
                "daily amount limit of {max} would be exceeded ({} already sent today)",
                self.total
            ));
        }
        None
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Inserts a new transaction. The sender's daily activity is re-checked
    /// against every quota and the insert happens in the same atomic step.
    async fn insert(&self, tx: Transaction, quotas: &[DailyQuota]) -> Result<()>;
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>>;
    /// Applies `update` if the current status may transition to it, returning the new row.
    async fn transition(&self, id: TransactionId, update: TransactionUpdate) -> Result<Transaction>;
    /// Transactions sent or received by `user`, newest first.
    async fn history(&self, user: &UserId, limit: usize) -> Result<Vec<Transaction>>;
    /// Live transactions `sender` initiated that `quota` covers.
    async fn daily_activity(&self, sender: &UserId, quota: &DailyQuota) -> Result<DailyActivity>;
    /// Every transaction, oldest first.
    async fn all(&self) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn get(&self, id: TransactionId) -> Result<Option<EscrowRecord>>;
    /// Persists a `holding` record and moves its transaction PENDING -> ESCROWED atomically.
    async fn record_hold(&self, record: EscrowRecord) -> Result<Transaction>;
    /// Moves the record from `from` to `to` only if it is currently `from`.
    async fn transition(
        &self,
        id: TransactionId,
        from: EscrowStatus,
        to: EscrowStatus,
    ) -> Result<EscrowRecord>;
    /// Stores the rail reference of the release or return deposit.
    async fn attach_settlement(&self, id: TransactionId, reference: String) -> Result<()>;
}

#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn get_account(&self, user_id: &UserId) -> Result<Option<UserAccount>>;
}

#[async_trait]
pub trait ServerConfigSource: Send + Sync {
    async fn get_server_config(&self, server_id: &ServerId) -> Result<Option<ServerConfig>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RailDirection {
    /// Pull funds from the account into escrow.
    Debit,
    /// Push funds from escrow to the account.
    Credit,
}

/// A single fund movement handed to a settlement rail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailInstruction {
    pub direction: RailDirection,
    pub method_type: PaymentMethodType,
    /// Masked account reference, never raw account numbers.
    pub account_reference: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailReceipt {
    pub reference: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Settled,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankInfo {
    pub routing_number: String,
    pub name: String,
    pub is_active: bool,
    pub ach_participant: bool,
}

/// External network that actually moves money.
#[async_trait]
pub trait SettlementRail: Send + Sync {
    async fn submit(&self, instruction: RailInstruction) -> Result<RailReceipt>;
    async fn status(&self, reference: &str) -> Result<SettlementStatus>;
}

/// Bank lookup by ABA routing number.
#[async_trait]
pub trait BankDirectory: Send + Sync {
    async fn lookup_bank(&self, routing_number: &str) -> Result<Option<BankInfo>>;
}

pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type EscrowStoreRef = Arc<dyn EscrowStore>;
pub type AccountDirectoryRef = Arc<dyn AccountDirectory>;
pub type ServerConfigSourceRef = Arc<dyn ServerConfigSource>;
pub type SettlementRailRef = Arc<dyn SettlementRail>;
pub type BankDirectoryRef = Arc<dyn BankDirectory>;
