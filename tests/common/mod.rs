#![allow(dead_code)]

use escrow_engine::application::payments::{MethodSelector, PaymentRequest, PaymentService};
use escrow_engine::config::EngineConfig;
use escrow_engine::domain::account::{ServerConfig, UserAccount, UserId};
use escrow_engine::domain::money::Amount;
use escrow_engine::domain::payment_method::{
    AchDetails, CryptoDetails, CryptoNetwork, OtherDetails, PaymentMethodConfig,
    PaymentMethodDetails, PaymentMethodType,
};
use escrow_engine::infrastructure::in_memory::{
    InMemoryAccountDirectory, InMemoryLedger, InMemoryServerConfigs,
};
use escrow_engine::infrastructure::in_memory_context;
use escrow_engine::infrastructure::simulated_rail::SimulatedRail;
use rust_decimal::Decimal;
use std::sync::Arc;

pub const SERVER: &str = "900000000000000001";

/// The n-th test user, an 18-digit snowflake.
pub fn user(n: u32) -> UserId {
    UserId::new(format!("1000000000000{n:05}"))
}

pub fn wallet(owner: &UserId) -> PaymentMethodConfig {
    PaymentMethodConfig::new(
        format!("wallet-{owner}"),
        owner.clone(),
        PaymentMethodDetails::Other(OtherDetails {
            provider: "paypal".into(),
            handle: format!("{owner}@example.com"),
        }),
    )
}

pub fn bank(owner: &UserId, routing_number: &str) -> PaymentMethodConfig {
    PaymentMethodConfig::new(
        format!("bank-{owner}"),
        owner.clone(),
        PaymentMethodDetails::Ach(AchDetails {
            routing_number: routing_number.into(),
            account_number: "123456789".into(),
            account_type: "checking".into(),
            account_holder_name: "Test Holder".into(),
        }),
    )
}

pub fn eth_wallet(owner: &UserId) -> PaymentMethodConfig {
    PaymentMethodConfig::new(
        format!("eth-{owner}"),
        owner.clone(),
        PaymentMethodDetails::Crypto(CryptoDetails {
            network: CryptoNetwork::Ethereum,
            wallet_address: format!("0x{}", "ab".repeat(20)),
        }),
    )
}

pub fn btc_wallet(owner: &UserId) -> PaymentMethodConfig {
    PaymentMethodConfig::new(
        format!("btc-{owner}"),
        owner.clone(),
        PaymentMethodDetails::Crypto(CryptoDetails {
            network: CryptoNetwork::Bitcoin,
            wallet_address: "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq".into(),
        }),
    )
}

/// A user holding a wallet, a Chase bank account and an Ethereum wallet.
pub fn full_account(n: u32) -> UserAccount {
    let id = user(n);
    UserAccount::new(id.clone())
        .with_method(wallet(&id))
        .with_method(bank(&id, "021000021"))
        .with_method(eth_wallet(&id))
}

pub struct Harness {
    pub service: Arc<PaymentService>,
    pub ledger: InMemoryLedger,
    pub rail: SimulatedRail,
}

pub fn harness_with(
    config: EngineConfig,
    accounts: Vec<UserAccount>,
    servers: Vec<ServerConfig>,
) -> Harness {
    let ledger = InMemoryLedger::new();
    let rail = SimulatedRail::new();
    let context = in_memory_context(
        &ledger,
        InMemoryAccountDirectory::with_accounts(accounts),
        InMemoryServerConfigs::with_configs(servers),
        &rail,
    );
    Harness {
        service: Arc::new(PaymentService::new(config, context)),
        ledger,
        rail,
    }
}

/// `users` fully provisioned accounts, default config, no server policies.
pub fn harness(users: u32) -> Harness {
    harness_with(
        EngineConfig::default(),
        (1..=users).map(full_account).collect(),
        Vec::new(),
    )
}

pub fn pay(sender: u32, recipient: u32, amount: Decimal, method_type: PaymentMethodType) -> PaymentRequest {
    PaymentRequest::new(
        user(sender),
        user(recipient),
        Amount::new(amount).unwrap(),
        MethodSelector::Type(method_type),
    )
}
