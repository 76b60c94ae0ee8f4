//! Custody of funds between withdrawal from the sender and settlement.
//!
//! Money only moves through processors, and the escrow record is the single
//! source of truth for who owns the held funds. A record leaves `holding`
//! through a conditional transition claimed *before* the deposit runs, so two
//! concurrent settlements can never both pay out. A failed deposit hands the
//! claim back.

use crate::domain::escrow::{EscrowRecord, EscrowStatus};
use crate::domain::money::Amount;
use crate::domain::payment_method::PaymentMethodConfig;
use crate::domain::ports::{AccountDirectoryRef, EscrowStoreRef, SettlementStatus};
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{PaymentError, Result};
use crate::processor::{ProcessorRegistry, SettlementReceipt};
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Removes the in-flight marker for a hold however the hold ends.
struct HoldClaim<'a> {
    in_flight: &'a DashMap<TransactionId, ()>,
    id: TransactionId,
}

impl Drop for HoldClaim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

pub struct EscrowManager {
    processors: ProcessorRegistry,
    escrows: EscrowStoreRef,
    accounts: AccountDirectoryRef,
    currency: String,
    timeout: Duration,
    in_flight: DashMap<TransactionId, ()>,
}

impl EscrowManager {
    pub fn new(
        processors: ProcessorRegistry,
        escrows: EscrowStoreRef,
        accounts: AccountDirectoryRef,
        currency: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            processors,
            escrows,
            accounts,
            currency: currency.into(),
            timeout,
            in_flight: DashMap::new(),
        }
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Asks the method's processor whether the details are usable at all.
    pub async fn validate_method(&self, method: &PaymentMethodConfig) -> Result<()> {
        let processor = self.processors.get(method.method_type())?;
        let valid = self
            .bounded("method validation", processor.validate_payment_method(&method.details))
            .await?;
        if valid {
            Ok(())
        } else {
            Err(PaymentError::validation(format!(
                "Invalid {} payment details for method {}",
                processor.name(),
                method.id
            )))
        }
    }

    pub async fn get(&self, transaction_id: TransactionId) -> Result<Option<EscrowRecord>> {
        self.escrows.get(transaction_id).await
    }

    /// Withdraws `amount` from `method` and records it as held for the transaction.
    ///
    /// Returns the transaction as it stands after the PENDING -> ESCROWED flip.
    /// A second hold for the same transaction, concurrent or not, fails with
    /// `AlreadyHeld` and never reaches the processor.
    pub async fn hold_funds(
        &self,
        transaction_id: TransactionId,
        amount: Amount,
        method: &PaymentMethodConfig,
    ) -> Result<Transaction> {
        let _claim = match self.in_flight.entry(transaction_id) {
            Entry::Occupied(_) => return Err(PaymentError::AlreadyHeld(transaction_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                HoldClaim {
                    in_flight: &self.in_flight,
                    id: transaction_id,
                }
            }
        };
        if self.escrows.get(transaction_id).await?.is_some() {
            return Err(PaymentError::AlreadyHeld(transaction_id.to_string()));
        }

        let processor = self.processors.get(method.method_type())?;
        let receipt = self
            .bounded("withdrawal", processor.withdraw_funds(&method.details, amount))
            .await?;

        let record = EscrowRecord {
            transaction_id,
            amount,
            currency: self.currency.clone(),
            method_type: method.method_type(),
            source_method_id: method.id.clone(),
            source_owner: method.owner.clone(),
            external_transaction_id: receipt.external_id.clone(),
            settlement_reference: None,
            status: EscrowStatus::Holding,
            created_at: Utc::now(),
            settled_at: None,
        };

        match self.escrows.record_hold(record).await {
            Ok(tx) => {
                info!(
                    id = %transaction_id,
                    %amount,
                    external_id = %receipt.external_id,
                    "funds held in escrow"
                );
                Ok(tx)
            }
            Err(err) => {
                warn!(id = %transaction_id, error = %err, "escrow not recorded, reversing withdrawal");
                if let Err(reversal) = self
                    .bounded("withdrawal reversal", processor.deposit_funds(&method.details, amount))
                    .await
                {
                    error!(
                        id = %transaction_id,
                        withdrawal = %receipt.external_id,
                        error = %reversal,
                        "withdrawal reversal failed, manual reconciliation needed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Pays the held funds out to `recipient_method`.
    pub async fn release_funds(
        &self,
        transaction_id: TransactionId,
        recipient_method: &PaymentMethodConfig,
    ) -> Result<EscrowRecord> {
        let claimed = self
            .escrows
            .transition(transaction_id, EscrowStatus::Holding, EscrowStatus::Released)
            .await?;
        let outcome = self.deposit(&claimed, recipient_method).await;
        self.settle(claimed, EscrowStatus::Released, outcome).await
    }

    /// Sends the held funds back to the method they were withdrawn from.
    pub async fn return_funds(&self, transaction_id: TransactionId) -> Result<EscrowRecord> {
        let claimed = self
            .escrows
            .transition(transaction_id, EscrowStatus::Holding, EscrowStatus::Returned)
            .await?;
        let outcome = match self.source_method(&claimed).await {
            Ok(source) => self.deposit(&claimed, &source).await,
            Err(err) => Err(err),
        };
        self.settle(claimed, EscrowStatus::Returned, outcome).await
    }

    /// Rail status of the latest movement for the transaction's escrow.
    pub async fn settlement_status(&self, transaction_id: TransactionId) -> Result<SettlementStatus> {
        let record = self
            .escrows
            .get(transaction_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("escrow record", transaction_id))?;
        let processor = self.processors.get(record.method_type)?;
        let reference = record
            .settlement_reference
            .as_deref()
            .unwrap_or(&record.external_transaction_id);
        self.bounded("status lookup", processor.transaction_status(reference))
            .await
    }

    async fn source_method(&self, record: &EscrowRecord) -> Result<PaymentMethodConfig> {
        let account = self
            .accounts
            .get_account(&record.source_owner)
            .await?
            .ok_or_else(|| PaymentError::not_found("account", &record.source_owner))?;
        account
            .method(&record.source_method_id)
            .cloned()
            .ok_or_else(|| PaymentError::not_found("payment method", &record.source_method_id))
    }

    async fn deposit(
        &self,
        record: &EscrowRecord,
        target: &PaymentMethodConfig,
    ) -> Result<SettlementReceipt> {
        let processor = self.processors.get(target.method_type())?;
        self.bounded("deposit", processor.deposit_funds(&target.details, record.amount))
            .await
    }

    /// Finishes a claimed settlement, or hands the claim back if the deposit failed.
    async fn settle(
        &self,
        claimed: EscrowRecord,
        claimed_as: EscrowStatus,
        outcome: Result<SettlementReceipt>,
    ) -> Result<EscrowRecord> {
        let id = claimed.transaction_id;
        match outcome {
            Ok(receipt) => {
                self.escrows
                    .attach_settlement(id, receipt.external_id.clone())
                    .await?;
                info!(%id, status = %claimed_as, reference = %receipt.external_id, "escrow settled");
                Ok(EscrowRecord {
                    settlement_reference: Some(receipt.external_id),
                    ..claimed
                })
            }
            Err(err) => {
                warn!(%id, status = %claimed_as, error = %err, "deposit failed, escrow back to holding");
                self.escrows
                    .transition(id, claimed_as, EscrowStatus::Holding)
                    .await?;
                Err(err)
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::ProcessorUnavailable(format!(
                "{operation} timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::{UserAccount, UserId};
    use crate::domain::payment_method::{OtherDetails, PaymentMethodDetails, PaymentMethodType};
    use crate::domain::ports::TransactionStore;
    use crate::domain::transaction::{TransactionFees, TransactionStatus};
    use crate::infrastructure::in_memory::{InMemoryAccountDirectory, InMemoryLedger};
    use crate::infrastructure::simulated_rail::SimulatedRail;
    use crate::processor::other::OtherProcessor;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    const ALICE: &str = "100000000000000001";
    const BOB: &str = "100000000000000002";

    struct Fixture {
        ledger: InMemoryLedger,
        rail: SimulatedRail,
        manager: Arc<EscrowManager>,
        alice_method: PaymentMethodConfig,
        bob_method: PaymentMethodConfig,
    }

    fn wallet(id: &str, owner: &str, handle: &str) -> PaymentMethodConfig {
        PaymentMethodConfig::new(
            id,
            UserId::new(owner),
            PaymentMethodDetails::Other(OtherDetails {
                provider: "paypal".into(),
                handle: handle.into(),
            }),
        )
    }

    fn fixture(latency: Duration) -> Fixture {
        let ledger = InMemoryLedger::new();
        let rail = SimulatedRail::new().with_latency(latency);
        let alice_method = wallet("pm-alice", ALICE, "alice@example.com");
        let bob_method = wallet("pm-bob", BOB, "bob@example.com");
        let accounts = InMemoryAccountDirectory::with_accounts([
            UserAccount::new(UserId::new(ALICE)).with_method(alice_method.clone()),
            UserAccount::new(UserId::new(BOB)).with_method(bob_method.clone()),
        ]);
        let processors =
            ProcessorRegistry::new().register(Arc::new(OtherProcessor::new(Arc::new(rail.clone()))));
        let manager = Arc::new(EscrowManager::new(
            processors,
            Arc::new(ledger.clone()),
            Arc::new(accounts),
            "USD",
            Duration::from_millis(200),
        ));
        Fixture {
            ledger,
            rail,
            manager,
            alice_method,
            bob_method,
        }
    }

    async fn pending(ledger: &InMemoryLedger, amount: rust_decimal::Decimal) -> Transaction {
        let tx = Transaction {
            id: TransactionId::generate(),
            sender_id: UserId::new(ALICE),
            recipient_id: UserId::new(BOB),
            amount: Amount::new(amount).unwrap(),
            currency: "USD".into(),
            sender_payment_method_id: "pm-alice".into(),
            recipient_payment_method_id: None,
            payment_method_type: PaymentMethodType::Other,
            server_id: None,
            description: None,
            status: TransactionStatus::Pending,
            fees: TransactionFees::new(dec!(0.30), dec!(0.10)),
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        ledger.insert(tx.clone(), &[]).await.unwrap();
        tx
    }

    #[tokio::test]
    async fn test_hold_then_release() {
        let f = fixture(Duration::ZERO);
        let tx = pending(&f.ledger, dec!(25)).await;

        let escrowed = f
            .manager
            .hold_funds(tx.id, tx.amount, &f.alice_method)
            .await
            .unwrap();
        assert_eq!(escrowed.status, TransactionStatus::Escrowed);

        let released = f.manager.release_funds(tx.id, &f.bob_method).await.unwrap();
        assert_eq!(released.status, EscrowStatus::Released);
        let reference = released.settlement_reference.unwrap();
        assert_eq!(
            f.rail.instruction(&reference).unwrap().account_reference,
            "paypal:bob@example.com"
        );
        assert_eq!(
            f.manager.settlement_status(tx.id).await.unwrap(),
            SettlementStatus::Settled
        );
    }

    #[tokio::test]
    async fn test_second_hold_is_rejected_without_withdrawal() {
        let f = fixture(Duration::ZERO);
        let tx = pending(&f.ledger, dec!(25)).await;
        f.manager
            .hold_funds(tx.id, tx.amount, &f.alice_method)
            .await
            .unwrap();

        let again = f.manager.hold_funds(tx.id, tx.amount, &f.alice_method).await;
        assert!(matches!(again, Err(PaymentError::AlreadyHeld(_))));
        assert_eq!(f.rail.submitted(), 1);
        assert_eq!(f.ledger.escrow_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_holds_withdraw_once() {
        let f = fixture(Duration::from_millis(20));
        let tx = pending(&f.ledger, dec!(25)).await;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&f.manager);
                let method = f.alice_method.clone();
                let amount = tx.amount;
                tokio::spawn(async move { manager.hold_funds(tx.id, amount, &method).await })
            })
            .collect();
        let mut held = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => held += 1,
                Err(PaymentError::AlreadyHeld(_)) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(held, 1);
        assert_eq!(f.rail.submitted(), 1);
        assert_eq!(f.ledger.escrow_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_release_and_return_race_has_one_winner() {
        let f = fixture(Duration::from_millis(10));
        let tx = pending(&f.ledger, dec!(25)).await;
        f.manager
            .hold_funds(tx.id, tx.amount, &f.alice_method)
            .await
            .unwrap();

        let release = {
            let manager = Arc::clone(&f.manager);
            let method = f.bob_method.clone();
            tokio::spawn(async move { manager.release_funds(tx.id, &method).await })
        };
        let refund = {
            let manager = Arc::clone(&f.manager);
            tokio::spawn(async move { manager.return_funds(tx.id).await })
        };
        let outcomes = [release.await.unwrap(), refund.await.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, Err(PaymentError::InvalidState(_))))
        );
        let record = f.manager.get(tx.id).await.unwrap().unwrap();
        assert_ne!(record.status, EscrowStatus::Holding);
    }

    #[tokio::test]
    async fn test_return_goes_to_source() {
        let f = fixture(Duration::ZERO);
        let tx = pending(&f.ledger, dec!(40)).await;
        f.manager
            .hold_funds(tx.id, tx.amount, &f.alice_method)
            .await
            .unwrap();

        let returned = f.manager.return_funds(tx.id).await.unwrap();
        assert_eq!(returned.status, EscrowStatus::Returned);
        let reference = returned.settlement_reference.unwrap();
        assert_eq!(
            f.rail.instruction(&reference).unwrap().account_reference,
            "paypal:alice@example.com"
        );
        assert!(matches!(
            f.manager.return_funds(tx.id).await,
            Err(PaymentError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_deposit_restores_holding() {
        let f = fixture(Duration::ZERO);
        let tx = pending(&f.ledger, dec!(40)).await;
        f.manager
            .hold_funds(tx.id, tx.amount, &f.alice_method)
            .await
            .unwrap();

        f.rail.set_offline(true);
        let result = f.manager.release_funds(tx.id, &f.bob_method).await;
        assert!(matches!(result, Err(PaymentError::ProcessorUnavailable(_))));
        let record = f.manager.get(tx.id).await.unwrap().unwrap();
        assert_eq!(record.status, EscrowStatus::Holding);
        assert!(record.settled_at.is_none());

        f.rail.set_offline(false);
        assert!(f.manager.release_funds(tx.id, &f.bob_method).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_processor_times_out() {
        let f = fixture(Duration::from_secs(5));
        let tx = pending(&f.ledger, dec!(40)).await;

        let result = f.manager.hold_funds(tx.id, tx.amount, &f.alice_method).await;
        assert!(matches!(result, Err(PaymentError::ProcessorUnavailable(_))));
        assert_eq!(f.ledger.escrow_count(), 0);
    }

    #[tokio::test]
    async fn test_hold_on_cancelled_transaction_reverses_withdrawal() {
        let f = fixture(Duration::ZERO);
        let tx = pending(&f.ledger, dec!(40)).await;
        TransactionStore::transition(
            &f.ledger,
            tx.id,
            crate::domain::transaction::TransactionUpdate::to(TransactionStatus::Cancelled),
        )
        .await
        .unwrap();

        let result = f.manager.hold_funds(tx.id, tx.amount, &f.alice_method).await;
        assert!(matches!(result, Err(PaymentError::InvalidState(_))));
        // Withdrawal plus its reversal.
        assert_eq!(f.rail.submitted(), 2);
        assert_eq!(f.ledger.escrow_count(), 0);
    }
}
