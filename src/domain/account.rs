use super::payment_method::{PaymentMethodConfig, PaymentMethodType};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discord-style user identifier (a snowflake rendered as decimal digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Snowflakes are 17 to 20 ASCII digits.
    pub fn is_well_formed(&self) -> bool {
        is_snowflake(&self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Discord-style server (guild) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_well_formed(&self) -> bool {
        is_snowflake(&self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_snowflake(value: &str) -> bool {
    (17..=20).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

/// A user as seen by the payment core: only the payment methods matter here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethodConfig>,
}

impl UserAccount {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            payment_methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: PaymentMethodConfig) -> Self {
        self.payment_methods.push(method);
        self
    }

    pub fn method(&self, method_id: &str) -> Option<&PaymentMethodConfig> {
        self.payment_methods.iter().find(|m| m.id == method_id)
    }

    /// First active method of the given type.
    pub fn active_method_of(&self, method_type: PaymentMethodType) -> Option<&PaymentMethodConfig> {
        self.payment_methods
            .iter()
            .find(|m| m.is_active && m.method_type() == method_type)
    }

    pub fn first_active_method(&self) -> Option<&PaymentMethodConfig> {
        self.payment_methods.iter().find(|m| m.is_active)
    }
}

/// Per-server payment policy. A server without a config is permissive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server_id: ServerId,
    #[serde(default = "enabled")]
    pub payments_enabled: bool,
    /// Daily aggregate a single sender may move on this server.
    #[serde(default)]
    pub max_amount_per_user: Option<Decimal>,
    /// Daily number of payments a single sender may initiate on this server.
    #[serde(default)]
    pub max_transactions_per_user: Option<u32>,
    #[serde(default)]
    pub max_amount_per_transaction: Option<Decimal>,
    /// Empty means every method type is allowed.
    #[serde(default)]
    pub allowed_payment_methods: Vec<PaymentMethodType>,
}

fn enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            payments_enabled: true,
            max_amount_per_user: None,
            max_transactions_per_user: None,
            max_amount_per_transaction: None,
            allowed_payment_methods: Vec::new(),
        }
    }

    pub fn allows(&self, method_type: PaymentMethodType) -> bool {
        self.allowed_payment_methods.is_empty() || self.allowed_payment_methods.contains(&method_type)
    }
}
