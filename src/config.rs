use crate::application::rate_limiter::RateLimitSettings;
use crate::application::validation::ValidationPolicy;
use crate::domain::money::DEFAULT_CURRENCY;
use crate::error::Result;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `ESCROW__PROCESSOR_TIMEOUT_MS=2000`
/// or `ESCROW__VALIDATION__MAX_AMOUNT=5000`.
pub const ENV_PREFIX: &str = "ESCROW";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub currency: String,
    /// Upper bound on any single processor call.
    pub processor_timeout_ms: u64,
    /// Share of the amount charged for holding funds, on top of processor fees.
    pub escrow_fee_rate: Decimal,
    pub validation: ValidationPolicy,
    pub rate_limits: RateLimitSettings,
    /// How often idle rate-limit keys are evicted.
    pub cleanup_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: DEFAULT_CURRENCY.to_string(),
            processor_timeout_ms: 5_000,
            escrow_fee_rate: dec!(0.01),
            validation: ValidationPolicy::default(),
            rate_limits: RateLimitSettings::default(),
            cleanup_interval_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Layers an optional file (TOML, JSON or YAML by extension) and `ESCROW__*`
    /// environment variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: EngineConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            Some(format!("currency '{}' is not an ISO 4217 code", self.currency))
        } else if self.processor_timeout_ms == 0 {
            Some("processor_timeout_ms must be positive".to_string())
        } else if self.escrow_fee_rate < Decimal::ZERO || self.escrow_fee_rate >= Decimal::ONE {
            Some(format!("escrow_fee_rate {} must be in [0, 1)", self.escrow_fee_rate))
        } else if self.validation.min_amount <= Decimal::ZERO
            || self.validation.min_amount > self.validation.max_amount
        {
            Some("validation amounts must satisfy 0 < min_amount <= max_amount".to_string())
        } else if self.cleanup_interval_ms == 0 {
            Some("cleanup_interval_ms must be positive".to_string())
        } else if std::iter::once(&self.rate_limits.default)
            .chain(self.rate_limits.actions.values())
            .any(|rule| rule.window_ms == 0 || rule.max_requests == 0)
        {
            Some("rate limit rules need a positive window and request count".to_string())
        } else {
            None
        };
        match problem {
            Some(message) => Err(ConfigError::Message(message).into()),
            None => Ok(()),
        }
    }

    pub fn processor_timeout(&self) -> Duration {
        Duration::from_millis(self.processor_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}
