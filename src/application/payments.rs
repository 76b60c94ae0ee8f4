//! The payment orchestrator: admission, validation, custody and settlement.
//!
//! Every fund-moving call runs the same pipeline. The rate limiter and the
//! validators come first, so a rejected request never touches a processor.
//! A transaction row exists before any money moves, and a failure between its
//! creation and the escrow hold marks it FAILED rather than leaving it PENDING.

use super::escrow::EscrowManager;
use super::rate_limiter::RateLimiter;
use super::transactions::TransactionService;
use super::validation::PaymentValidationService;
use crate::config::EngineConfig;
use crate::domain::account::{ServerId, UserAccount, UserId};
use crate::domain::escrow::EscrowRecord;
use crate::domain::money::{Amount, round_cents};
use crate::domain::payment_method::{PaymentMethodConfig, PaymentMethodType};
use crate::domain::ports::{
    AccountDirectoryRef, EscrowStoreRef, ServerConfigSourceRef, SettlementStatus,
    TransactionStoreRef,
};
use crate::domain::transaction::{Transaction, TransactionFees, TransactionId, TransactionStatus};
use crate::error::{PaymentError, Result};
use crate::processor::ProcessorRegistry;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Rate-limit action charged for every `initiate_payment` call.
pub const PAYMENT_ACTION: &str = "payment";

/// How the sender's funding method is chosen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodSelector {
    /// A specific saved method.
    Id(String),
    /// The sender's first active method of this type.
    Type(PaymentMethodType),
}

/// A rejected payment attempt.
#[derive(Debug)]
pub struct PaymentFailure {
    /// Set when the transaction row was written before the failure; it is FAILED.
    pub transaction_id: Option<TransactionId>,
    pub error: PaymentError,
}

impl From<PaymentError> for PaymentFailure {
    fn from(error: PaymentError) -> Self {
        Self {
            transaction_id: None,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub amount: Amount,
    pub method: MethodSelector,
    pub recipient_payment_method_id: Option<String>,
    pub server_id: Option<ServerId>,
    pub description: Option<String>,
}

impl PaymentRequest {
    pub fn new(sender_id: UserId, recipient_id: UserId, amount: Amount, method: MethodSelector) -> Self {
        Self {
            sender_id,
            recipient_id,
            amount,
            method,
            recipient_payment_method_id: None,
            server_id: None,
            description: None,
        }
    }

    pub fn on_server(mut self, server_id: ServerId) -> Self {
        self.server_id = Some(server_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn to_method(mut self, recipient_payment_method_id: impl Into<String>) -> Self {
        self.recipient_payment_method_id = Some(recipient_payment_method_id.into());
        self
    }
}

/// The collaborators a [`PaymentService`] is wired from.
#[derive(Clone)]
pub struct ServiceContext {
    pub transactions: TransactionStoreRef,
    pub escrows: EscrowStoreRef,
    pub accounts: AccountDirectoryRef,
    pub server_configs: ServerConfigSourceRef,
    pub processors: ProcessorRegistry,
}

pub struct PaymentService {
    limiter: Arc<RateLimiter>,
    validation: PaymentValidationService,
    transactions: TransactionService,
    escrow: EscrowManager,
    accounts: AccountDirectoryRef,
    currency: String,
    escrow_fee_rate: Decimal,
    config: EngineConfig,
}

impl PaymentService {
    pub fn new(config: EngineConfig, context: ServiceContext) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
            validation: PaymentValidationService::new(
                config.validation.clone(),
                context.server_configs,
                Arc::clone(&context.transactions),
            ),
            transactions: TransactionService::new(context.transactions),
            escrow: EscrowManager::new(
                context.processors,
                context.escrows,
                Arc::clone(&context.accounts),
                config.currency.clone(),
                config.processor_timeout(),
            ),
            accounts: context.accounts,
            currency: config.currency.clone(),
            escrow_fee_rate: config.escrow_fee_rate,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn escrow(&self) -> &EscrowManager {
        &self.escrow
    }

    /// Starts evicting idle rate-limit keys on the configured interval.
    pub fn spawn_maintenance(&self) {
        self.limiter.spawn_cleanup(self.config.cleanup_interval());
    }

    /// Stops background work and drops rate-limit state.
    pub fn shutdown(&self) {
        self.limiter.destroy();
    }

    /// Processing fee from the method's processor plus the escrow fee.
    pub fn quote_fees(&self, method: &PaymentMethodConfig, amount: Decimal) -> Result<TransactionFees> {
        let quote = self
            .escrow
            .processors()
            .get(method.method_type())?
            .calculate_fees_for(&method.details, amount)?;
        Ok(TransactionFees::new(
            round_cents(quote.total),
            round_cents(amount * self.escrow_fee_rate),
        ))
    }

    /// Creates a transaction and moves the sender's funds into escrow.
    #[instrument(
        skip(self, request),
        fields(sender = %request.sender_id, recipient = %request.recipient_id, amount = %request.amount)
    )]
    pub async fn attempt_payment(
        &self,
        request: PaymentRequest,
    ) -> std::result::Result<Transaction, PaymentFailure> {
        let decision = self
            .limiter
            .check_limit(request.sender_id.as_str(), PAYMENT_ACTION);
        if !decision.allowed {
            return Err(PaymentError::RateLimited {
                reset_at: decision.reset_at,
            }
            .into());
        }
        self.validation.validate_request(&request)?;

        let sender = self.account(&request.sender_id).await?;
        let recipient = self.account(&request.recipient_id).await?;
        let method = sender_method(&sender, &request.method)?;
        if let Some(method_id) = &request.recipient_payment_method_id {
            active_method(&recipient, method_id)?;
        }

        let method_type = method.method_type();
        let amount = request.amount.value();
        let server_config = self
            .validation
            .check_server_policy(request.server_id.as_ref(), method_type, amount)
            .await?;
        let now = Utc::now();
        let quotas = self
            .validation
            .check_daily_limits(
                &request.sender_id,
                server_config.as_ref(),
                method_type,
                amount,
                now,
            )
            .await?;
        self.escrow.validate_method(method).await?;
        let fees = self.quote_fees(method, amount)?;

        let tx = Transaction {
            id: TransactionId::generate(),
            sender_id: request.sender_id,
            recipient_id: request.recipient_id,
            amount: request.amount,
            currency: self.currency.clone(),
            sender_payment_method_id: method.id.clone(),
            recipient_payment_method_id: request.recipient_payment_method_id,
            payment_method_type: method_type,
            server_id: request.server_id,
            description: request.description,
            status: TransactionStatus::Pending,
            fees,
            failure_reason: None,
            created_at: now,
            completed_at: None,
        };
        let tx = self.transactions.create(tx, &quotas).await?;

        match self.escrow.hold_funds(tx.id, tx.amount, method).await {
            Ok(escrowed) => Ok(escrowed),
            Err(err) => {
                if let Err(mark) = self.transactions.mark_failed(tx.id, err.to_string()).await {
                    warn!(id = %tx.id, error = %mark, "could not mark transaction failed");
                }
                Err(PaymentFailure {
                    transaction_id: Some(tx.id),
                    error: err,
                })
            }
        }
    }

    /// [`attempt_payment`](Self::attempt_payment) without the failed row's id.
    pub async fn initiate_payment(&self, request: PaymentRequest) -> Result<Transaction> {
        self.attempt_payment(request)
            .await
            .map_err(|failure| failure.error)
    }

    /// Settles an escrowed transaction on the recipient's decision.
    ///
    /// Approval releases the funds and completes the transaction. Rejection
    /// returns them to the sender and cancels it. When the processor turns the
    /// release down for good the sender is refunded and the transaction FAILS;
    /// an unavailable processor leaves it ESCROWED so the call can be retried.
    #[instrument(skip(self))]
    pub async fn process_payment_request(
        &self,
        transaction_id: TransactionId,
        approved: bool,
    ) -> Result<Transaction> {
        let tx = self.transactions.require(transaction_id).await?;
        if tx.status != TransactionStatus::Escrowed {
            return Err(PaymentError::InvalidState(format!(
                "transaction {transaction_id} is {}, expected ESCROWED",
                tx.status
            )));
        }

        if !approved {
            self.escrow.return_funds(transaction_id).await?;
            return self
                .transactions
                .cancel(
                    transaction_id,
                    TransactionStatus::Escrowed,
                    "rejected by recipient",
                )
                .await;
        }

        let destination = self.recipient_method(&tx).await?;
        match self.escrow.release_funds(transaction_id, &destination).await {
            Ok(_) => self.transactions.complete(transaction_id).await,
            Err(err) if err.is_retryable() || matches!(err, PaymentError::InvalidState(_)) => {
                Err(err)
            }
            Err(err) => {
                warn!(id = %transaction_id, error = %err, "release rejected, refunding sender");
                self.escrow.return_funds(transaction_id).await?;
                self.transactions
                    .mark_failed(transaction_id, err.to_string())
                    .await?;
                Err(err)
            }
        }
    }

    pub async fn complete_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        self.process_payment_request(transaction_id, true).await
    }

    /// Cancels a PENDING transaction outright, or an ESCROWED one after returning its funds.
    #[instrument(skip(self, reason))]
    pub async fn cancel_transaction(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> Result<Transaction> {
        let tx = self.transactions.require(transaction_id).await?;
        match tx.status {
            TransactionStatus::Pending => {
                self.transactions
                    .cancel(transaction_id, TransactionStatus::Pending, reason)
                    .await
            }
            TransactionStatus::Escrowed => {
                self.escrow.return_funds(transaction_id).await?;
                self.transactions
                    .cancel(transaction_id, TransactionStatus::Escrowed, reason)
                    .await
            }
            status => Err(PaymentError::InvalidState(format!(
                "transaction {transaction_id} is {status} and cannot be cancelled"
            ))),
        }
    }

    pub async fn get_transaction(&self, transaction_id: TransactionId) -> Result<Option<Transaction>> {
        self.transactions.get(transaction_id).await
    }

    pub async fn get_transaction_history(&self, user_id: &UserId, limit: usize) -> Result<Vec<Transaction>> {
        self.transactions.history(user_id, limit).await
    }

    pub async fn get_escrow(&self, transaction_id: TransactionId) -> Result<Option<EscrowRecord>> {
        self.escrow.get(transaction_id).await
    }

    pub async fn settlement_status(&self, transaction_id: TransactionId) -> Result<SettlementStatus> {
        self.escrow.settlement_status(transaction_id).await
    }

    async fn account(&self, user_id: &UserId) -> Result<UserAccount> {
        self.accounts
            .get_account(user_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("account", user_id))
    }

    /// The pinned method if the sender chose one, else the first active method
    /// of the payment's type, else any active method.
    async fn recipient_method(&self, tx: &Transaction) -> Result<PaymentMethodConfig> {
        let account = self.account(&tx.recipient_id).await?;
        let method = match &tx.recipient_payment_method_id {
            Some(method_id) => active_method(&account, method_id)?,
            None => account
                .active_method_of(tx.payment_method_type)
                .or_else(|| account.first_active_method())
                .ok_or_else(|| {
                    PaymentError::not_found("active payment method for user", &tx.recipient_id)
                })?,
        };
        info!(id = %tx.id, method = %method.id, "recipient method resolved");
        Ok(method.clone())
    }
}

fn active_method<'a>(account: &'a UserAccount, method_id: &str) -> Result<&'a PaymentMethodConfig> {
    account
        .method(method_id)
        .filter(|method| method.is_active)
        .ok_or_else(|| PaymentError::not_found("active payment method", method_id))
}

fn sender_method<'a>(
    account: &'a UserAccount,
    selector: &MethodSelector,
) -> Result<&'a PaymentMethodConfig> {
    match selector {
        MethodSelector::Id(method_id) => active_method(account, method_id),
        MethodSelector::Type(method_type) => account
            .active_method_of(*method_type)
            .ok_or_else(|| PaymentError::not_found("active payment method", method_type)),
    }
}
