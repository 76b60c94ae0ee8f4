use crate::domain::account::{ServerConfig, ServerId, UserAccount, UserId};
use crate::domain::escrow::{EscrowRecord, EscrowStatus};
use crate::domain::ports::{
    AccountDirectory, DailyActivity, DailyQuota, EscrowStore, ServerConfigSource, TransactionStore,
};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus, TransactionUpdate};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// A thread-safe in-memory ledger for transactions and their escrow records.
///
/// Each map is sharded (`DashMap`), so operations on different transactions or
/// different senders do not contend. Atomic steps that span maps always take the
/// guards in the same order (user index, then transactions, then escrows), and a
/// guard is never held while touching the map it came from.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    transactions: Arc<DashMap<TransactionId, Transaction>>,
    escrows: Arc<DashMap<TransactionId, EscrowRecord>>,
    by_user: Arc<DashMap<UserId, Vec<TransactionId>>>,
}

impl InMemoryLedger {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn activity(&self, ids: &[TransactionId], sender: &UserId, quota: &DailyQuota) -> DailyActivity {
        ids.iter()
            .filter_map(|id| self.transactions.get(id))
            .filter(|tx| &tx.sender_id == sender && tx.status.is_live() && quota.covers(tx))
            .fold(DailyActivity::default(), |mut acc, tx| {
                acc.count += 1;
                acc.total += tx.amount.value();
                acc
            })
    }

    /// Number of escrow records, whatever their status.
    pub fn escrow_count(&self) -> usize {
        self.escrows.len()
    }
}

#[async_trait]
impl TransactionStore for InMemoryLedger {
    async fn insert(&self, tx: Transaction, quotas: &[DailyQuota]) -> Result<()> {
        let id = tx.id;
        let recipient = tx.recipient_id.clone();
        {
            // Holding the sender's index entry serialises inserts per sender.
            let mut sent = self.by_user.entry(tx.sender_id.clone()).or_default();
            for quota in quotas {
                let activity = self.activity(&sent, &tx.sender_id, quota);
                if let Some(reason) = activity.breach(quota, tx.amount.value()) {
                    return Err(PaymentError::LimitExceeded(reason));
                }
            }
            match self.transactions.entry(id) {
                Entry::Occupied(_) => {
                    return Err(PaymentError::Storage(format!(
                        "transaction {id} already exists"
                    )));
                }
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                }
            }
            sent.push(id);
        }
        self.by_user.entry(recipient).or_default().push(id);
        Ok(())
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        Ok(self.transactions.get(&id).map(|tx| tx.clone()))
    }

    async fn transition(&self, id: TransactionId, update: TransactionUpdate) -> Result<Transaction> {
        let mut tx = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found("transaction", id))?;
        if !update.permits(tx.status) {
            return Err(PaymentError::InvalidState(format!(
                "transaction {id} is {} and cannot become {}",
                tx.status, update.status
            )));
        }
        update.apply(&mut tx, Utc::now());
        Ok(tx.clone())
    }

    async fn history(&self, user: &UserId, limit: usize) -> Result<Vec<Transaction>> {
        let ids = self
            .by_user
            .get(user)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        let mut txs: Vec<Transaction> = ids
            .iter()
            .filter_map(|id| self.transactions.get(id).map(|tx| tx.clone()))
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        txs.truncate(limit);
        Ok(txs)
    }

    async fn daily_activity(&self, sender: &UserId, quota: &DailyQuota) -> Result<DailyActivity> {
        let ids = self
            .by_user
            .get(sender)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(self.activity(&ids, sender, quota))
    }

    async fn all(&self) -> Result<Vec<Transaction>> {
        let mut txs: Vec<Transaction> = self.transactions.iter().map(|tx| tx.clone()).collect();
        txs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(txs)
    }
}

#[async_trait]
impl EscrowStore for InMemoryLedger {
    async fn get(&self, id: TransactionId) -> Result<Option<EscrowRecord>> {
        Ok(self.escrows.get(&id).map(|record| record.clone()))
    }

    async fn record_hold(&self, record: EscrowRecord) -> Result<Transaction> {
        let id = record.transaction_id;
        let mut tx = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found("transaction", id))?;
        if record.amount != tx.amount {
            return Err(PaymentError::InvalidState(format!(
                "escrow amount {} does not match transaction amount {}",
                record.amount, tx.amount
            )));
        }
        match self.escrows.entry(id) {
            Entry::Occupied(_) => Err(PaymentError::AlreadyHeld(id.to_string())),
            Entry::Vacant(slot) => {
                if !tx.status.can_transition_to(TransactionStatus::Escrowed) {
                    return Err(PaymentError::InvalidState(format!(
                        "transaction {id} is {} and cannot be escrowed",
                        tx.status
                    )));
                }
                slot.insert(record);
                TransactionUpdate::to(TransactionStatus::Escrowed).apply(&mut tx, Utc::now());
                Ok(tx.clone())
            }
        }
    }

    async fn transition(
        &self,
        id: TransactionId,
        from: EscrowStatus,
        to: EscrowStatus,
    ) -> Result<EscrowRecord> {
        let mut record = self
            .escrows
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found("escrow record", id))?;
        if record.status != from {
            return Err(PaymentError::InvalidState(format!(
                "escrow for {id} is {}, expected {from}",
                record.status
            )));
        }
        record.status = to;
        if to == EscrowStatus::Holding {
            record.settled_at = None;
            record.settlement_reference = None;
        } else {
            record.settled_at = Some(Utc::now());
        }
        Ok(record.clone())
    }

    async fn attach_settlement(&self, id: TransactionId, reference: String) -> Result<()> {
        let mut record = self
            .escrows
            .get_mut(&id)
            .ok_or_else(|| PaymentError::not_found("escrow record", id))?;
        record.settlement_reference = Some(reference);
        Ok(())
    }
}

/// Account collaborator backed by a map, seeded at start-up.
#[derive(Default, Clone)]
pub struct InMemoryAccountDirectory {
    accounts: Arc<DashMap<UserId, UserAccount>>,
}

impl InMemoryAccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = UserAccount>) -> Self {
        let directory = Self::new();
        for account in accounts {
            directory.insert(account);
        }
        directory
    }

    pub fn insert(&self, account: UserAccount) {
        self.accounts.insert(account.user_id.clone(), account);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn get_account(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        Ok(self.accounts.get(user_id).map(|account| account.clone()))
    }
}

/// Server-config collaborator backed by a map.
#[derive(Default, Clone)]
pub struct InMemoryServerConfigs {
    configs: Arc<DashMap<ServerId, ServerConfig>>,
}

impl InMemoryServerConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: impl IntoIterator<Item = ServerConfig>) -> Self {
        let source = Self::new();
        for config in configs {
            source.insert(config);
        }
        source
    }

    pub fn insert(&self, config: ServerConfig) {
        self.configs.insert(config.server_id.clone(), config);
    }
}

#[async_trait]
impl ServerConfigSource for InMemoryServerConfigs {
    async fn get_server_config(&self, server_id: &ServerId) -> Result<Option<ServerConfig>> {
        Ok(self.configs.get(server_id).map(|config| config.clone()))
    }
}
