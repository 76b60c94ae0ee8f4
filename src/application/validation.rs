use super::payments::PaymentRequest;
use crate::domain::account::{ServerConfig, ServerId, UserId};
use crate::domain::payment_method::PaymentMethodType;
use crate::domain::ports::{DailyQuota, ServerConfigSourceRef, TransactionStoreRef};
use crate::error::{PaymentError, Result};
use crate::processor::ach::ACH_DAILY_LIMIT;
use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Parameter bounds applied to every payment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub max_description_length: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_amount: dec!(0.01),
            max_amount: dec!(10000),
            max_description_length: 200,
        }
    }
}

/// Stateless checks that run before any money moves.
pub struct PaymentValidationService {
    policy: ValidationPolicy,
    server_configs: ServerConfigSourceRef,
    transactions: TransactionStoreRef,
}

impl PaymentValidationService {
    pub fn new(
        policy: ValidationPolicy,
        server_configs: ServerConfigSourceRef,
        transactions: TransactionStoreRef,
    ) -> Self {
        Self {
            policy,
            server_configs,
            transactions,
        }
    }

    /// Collects every parameter problem into a single `ValidationFailed`.
    pub fn validate_request(&self, request: &PaymentRequest) -> Result<()> {
        let mut problems = Vec::new();

        if !request.sender_id.is_well_formed() {
            problems.push(format!("sender id '{}' is not a valid user id", request.sender_id));
        }
        if !request.recipient_id.is_well_formed() {
            problems.push(format!(
                "recipient id '{}' is not a valid user id",
                request.recipient_id
            ));
        }
        if request.sender_id == request.recipient_id {
            problems.push("recipient cannot be the sender".to_string());
        }
        if let Some(server_id) = &request.server_id
            && !server_id.is_well_formed()
        {
            problems.push(format!("server id '{server_id}' is not a valid server id"));
        }

        let amount = request.amount.value();
        if amount < self.policy.min_amount {
            problems.push(format!("amount must be at least {}", self.policy.min_amount));
        }
        if amount > self.policy.max_amount {
            problems.push(format!("amount must not exceed {}", self.policy.max_amount));
        }
        if amount.normalize().scale() > 2 {
            problems.push("amount must have at most 2 decimal places".to_string());
        }

        if let Some(description) = &request.description {
            if description.chars().count() > self.policy.max_description_length {
                problems.push(format!(
                    "description must be at most {} characters",
                    self.policy.max_description_length
                ));
            }
            if description.chars().any(char::is_control) {
                problems.push("description contains control characters".to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            warn!(sender = %request.sender_id, ?problems, "payment request rejected");
            Err(PaymentError::ValidationFailed(problems))
        }
    }

    /// Applies the server's payment policy. No server, or no config for it, is permissive.
    pub async fn check_server_policy(
        &self,
        server_id: Option<&ServerId>,
        method_type: PaymentMethodType,
        amount: Decimal,
    ) -> Result<Option<ServerConfig>> {
        let Some(server_id) = server_id else {
            return Ok(None);
        };
        let Some(config) = self.server_configs.get_server_config(server_id).await? else {
            return Ok(None);
        };
        if !config.payments_enabled {
            return Err(PaymentError::validation(format!(
                "payments are disabled on server {server_id}"
            )));
        }
        if !config.allows(method_type) {
            return Err(PaymentError::validation(format!(
                "{method_type} payments are not allowed on server {server_id}"
            )));
        }
        if let Some(max) = config.max_amount_per_transaction
            && amount > max
        {
            return Err(PaymentError::LimitExceeded(format!(
                "amount {amount} exceeds this server's per-transaction limit of {max}"
            )));
        }
        Ok(Some(config))
    }

    /// Builds the day's quotas for `sender` and fails fast if `amount` already breaches one.
    ///
    /// The returned quotas are re-checked by the store when the transaction is
    /// inserted, which is what actually guarantees the limit under concurrency.
    pub async fn check_daily_limits(
        &self,
        sender: &UserId,
        server_config: Option<&ServerConfig>,
        method_type: PaymentMethodType,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyQuota>> {
        let since = start_of_day(now);
        let mut quotas = Vec::new();
        if let Some(config) = server_config
            && (config.max_amount_per_user.is_some() || config.max_transactions_per_user.is_some())
        {
            quotas.push(DailyQuota {
                since,
                method_type: None,
                server_id: Some(config.server_id.clone()),
                max_amount: config.max_amount_per_user,
                max_transactions: config.max_transactions_per_user,
            });
        }
        if method_type == PaymentMethodType::Ach {
            quotas.push(DailyQuota {
                since,
                method_type: Some(PaymentMethodType::Ach),
                server_id: None,
                max_amount: Some(ACH_DAILY_LIMIT),
                max_transactions: None,
            });
        }

        for quota in &quotas {
            let activity = self
                .transactions
                .daily_activity(sender, quota)
                .await?;
            if let Some(reason) = activity.breach(quota, amount) {
                warn!(%sender, %reason, "daily limit reached");
                return Err(PaymentError::LimitExceeded(reason));
            }
        }
        Ok(quotas)
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::payments::MethodSelector;
    use crate::domain::money::Amount;
    use crate::infrastructure::in_memory::{InMemoryLedger, InMemoryServerConfigs};
    use std::sync::Arc;

    const ALICE: &str = "100000000000000001";
    const BOB: &str = "100000000000000002";
    const SERVER: &str = "900000000000000001";

    fn service(configs: InMemoryServerConfigs) -> PaymentValidationService {
        PaymentValidationService::new(
            ValidationPolicy::default(),
            Arc::new(configs),
            Arc::new(InMemoryLedger::new()),
        )
    }

    fn request(sender: &str, recipient: &str, amount: Decimal) -> PaymentRequest {
        PaymentRequest::new(
            UserId::new(sender),
            UserId::new(recipient),
            Amount::new(amount).unwrap(),
            MethodSelector::Type(PaymentMethodType::Other),
        )
    }

    #[test]
    fn test_valid_request() {
        let service = service(InMemoryServerConfigs::new());
        assert!(service.validate_request(&request(ALICE, BOB, dec!(25))).is_ok());
    }

    #[test]
    fn test_problems_are_aggregated() {
        let service = service(InMemoryServerConfigs::new());
        let mut bad = request(ALICE, ALICE, dec!(10000.001));
        bad.description = Some("x".repeat(201));

        match service.validate_request(&bad) {
            Err(PaymentError::ValidationFailed(problems)) => {
                assert_eq!(problems.len(), 4, "{problems:?}");
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_ids() {
        let service = service(InMemoryServerConfigs::new());
        let result = service.validate_request(&request("abc", BOB, dec!(5)));
        assert!(matches!(result, Err(PaymentError::ValidationFailed(p)) if p.len() == 1));
    }

    #[tokio::test]
    async fn test_missing_server_config_is_permissive() {
        let service = service(InMemoryServerConfigs::new());
        let config = service
            .check_server_policy(
                Some(&ServerId::new(SERVER)),
                PaymentMethodType::Crypto,
                dec!(1_000_000),
            )
            .await
            .unwrap();
        assert!(config.is_none());
    }

    #[tokio::test]
    async fn test_server_policy() {
        let mut config = ServerConfig::new(ServerId::new(SERVER));
        config.allowed_payment_methods = vec![PaymentMethodType::Ach];
        config.max_amount_per_transaction = Some(dec!(100));
        let service = service(InMemoryServerConfigs::with_configs([config.clone()]));
        let server = ServerId::new(SERVER);

        assert!(matches!(
            service
                .check_server_policy(Some(&server), PaymentMethodType::Crypto, dec!(5))
                .await,
            Err(PaymentError::ValidationFailed(_))
        ));
        assert!(matches!(
            service
                .check_server_policy(Some(&server), PaymentMethodType::Ach, dec!(101))
                .await,
            Err(PaymentError::LimitExceeded(_))
        ));

        config.payments_enabled = false;
        let disabled = service_with(config);
        assert!(matches!(
            disabled
                .check_server_policy(Some(&server), PaymentMethodType::Ach, dec!(5))
                .await,
            Err(PaymentError::ValidationFailed(_))
        ));
    }

    fn service_with(config: ServerConfig) -> PaymentValidationService {
        service(InMemoryServerConfigs::with_configs([config]))
    }

    #[tokio::test]
    async fn test_daily_quotas() {
        let service = service(InMemoryServerConfigs::new());
        let sender = UserId::new(ALICE);

        let none = service
            .check_daily_limits(&sender, None, PaymentMethodType::Other, dec!(10), Utc::now())
            .await
            .unwrap();
        assert!(none.is_empty());

        let ach = service
            .check_daily_limits(&sender, None, PaymentMethodType::Ach, dec!(10), Utc::now())
            .await
            .unwrap();
        assert_eq!(ach.len(), 1);
        assert_eq!(ach[0].max_amount, Some(ACH_DAILY_LIMIT));

        let over = service
            .check_daily_limits(&sender, None, PaymentMethodType::Ach, dec!(25000.01), Utc::now())
            .await;
        assert!(matches!(over, Err(PaymentError::LimitExceeded(_))));
    }

    #[test]
    fn test_start_of_day() {
        let now: DateTime<Utc> = "2026-03-04T15:16:17Z".parse().unwrap();
        assert_eq!(
            start_of_day(now),
            "2026-03-04T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}
