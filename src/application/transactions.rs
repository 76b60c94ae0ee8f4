use crate::domain::account::UserId;
use crate::domain::ports::{DailyQuota, TransactionStoreRef};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus, TransactionUpdate};
use crate::error::{PaymentError, Result};
use tracing::{info, warn};

/// Largest page `history` will return.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Owns every status change a transaction goes through.
pub struct TransactionService {
    store: TransactionStoreRef,
}

impl TransactionService {
    pub fn new(store: TransactionStoreRef) -> Self {
        Self { store }
    }

    pub async fn create(&self, tx: Transaction, quotas: &[DailyQuota]) -> Result<Transaction> {
        if tx.sender_id == tx.recipient_id {
            return Err(PaymentError::validation("recipient cannot be the sender"));
        }
        if tx.fees.total_fees != tx.fees.processing_fee + tx.fees.escrow_fee {
            return Err(PaymentError::InvalidState(format!(
                "fees of transaction {} do not add up",
                tx.id
            )));
        }
        self.store.insert(tx.clone(), quotas).await?;
        info!(id = %tx.id, sender = %tx.sender_id, amount = %tx.amount, "transaction created");
        Ok(tx)
    }

    pub async fn get(&self, id: TransactionId) -> Result<Option<Transaction>> {
        self.store.get(id).await
    }

    pub async fn require(&self, id: TransactionId) -> Result<Transaction> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::not_found("transaction", id))
    }

    /// Sent or received by `user`, newest first. `limit` is capped at [`MAX_HISTORY_LIMIT`].
    pub async fn history(&self, user: &UserId, limit: usize) -> Result<Vec<Transaction>> {
        self.store.history(user, limit.min(MAX_HISTORY_LIMIT)).await
    }

    pub async fn mark_failed(&self, id: TransactionId, reason: impl Into<String>) -> Result<Transaction> {
        let reason = reason.into();
        let tx = self
            .store
            .transition(
                id,
                TransactionUpdate::to(TransactionStatus::Failed).with_reason(reason.clone()),
            )
            .await?;
        warn!(%id, %reason, "transaction failed");
        Ok(tx)
    }

    pub async fn complete(&self, id: TransactionId) -> Result<Transaction> {
        let tx = self
            .store
            .transition(
                id,
                TransactionUpdate::to(TransactionStatus::Completed).expecting(TransactionStatus::Escrowed),
            )
            .await?;
        info!(%id, "transaction completed");
        Ok(tx)
    }

    /// Cancels a transaction that is still in status `from`.
    pub async fn cancel(
        &self,
        id: TransactionId,
        from: TransactionStatus,
        reason: impl Into<String>,
    ) -> Result<Transaction> {
        let reason = reason.into();
        let tx = self
            .store
            .transition(
                id,
                TransactionUpdate::to(TransactionStatus::Cancelled)
                    .expecting(from)
                    .with_reason(reason.clone()),
            )
            .await?;
        info!(%id, %reason, "transaction cancelled");
        Ok(tx)
    }
}
