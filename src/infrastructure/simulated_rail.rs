use crate::domain::ports::{
    BankDirectory, BankInfo, RailInstruction, RailReceipt, SettlementRail, SettlementStatus,
};
use crate::error::{PaymentError, Result};
use crate::processor::ach::aba_checksum;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// An in-process stand-in for banking and crypto networks.
///
/// Every instruction settles immediately unless the rail is switched offline.
/// A configurable latency lets callers exercise their timeouts.
#[derive(Clone)]
pub struct SimulatedRail {
    banks: Arc<DashMap<String, BankInfo>>,
    settlements: Arc<DashMap<String, (RailInstruction, SettlementStatus)>>,
    offline: Arc<AtomicBool>,
    latency: Duration,
    submitted: Arc<AtomicU64>,
}

impl Default for SimulatedRail {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRail {
    pub fn new() -> Self {
        let banks = DashMap::new();
        for (routing, name, is_active, ach_participant) in [
            ("021000021", "JPMorgan Chase Bank", true, true),
            ("026009593", "Bank of America", true, true),
            ("121000248", "Wells Fargo Bank", true, true),
            ("011000138", "Bank of America (New England)", true, true),
            ("322271627", "JPMorgan Chase Bank (West)", true, true),
            ("011000015", "Federal Reserve Bank of Boston", false, true),
            ("011000028", "State Street Bank and Trust", true, false),
        ] {
            banks.insert(
                routing.to_string(),
                BankInfo {
                    routing_number: routing.to_string(),
                    name: name.to_string(),
                    is_active,
                    ach_participant,
                },
            );
        }
        Self {
            banks: Arc::new(banks),
            settlements: Arc::new(DashMap::new()),
            offline: Arc::new(AtomicBool::new(false)),
            latency: Duration::ZERO,
            submitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_bank(self, bank: BankInfo) -> Self {
        self.banks.insert(bank.routing_number.clone(), bank);
        self
    }

    /// While offline every call fails with `ProcessorUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of instructions accepted so far.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn instruction(&self, reference: &str) -> Option<RailInstruction> {
        self.settlements.get(reference).map(|entry| entry.0.clone())
    }

    async fn round_trip(&self) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(PaymentError::ProcessorUnavailable(
                "settlement rail is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementRail for SimulatedRail {
    async fn submit(&self, instruction: RailInstruction) -> Result<RailReceipt> {
        self.round_trip().await?;
        let reference = format!("sim-{}", Uuid::new_v4());
        debug!(
            %reference,
            direction = ?instruction.direction,
            account = %instruction.account_reference,
            amount = %instruction.amount,
            "rail instruction accepted"
        );
        self.settlements
            .insert(reference.clone(), (instruction, SettlementStatus::Settled));
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(RailReceipt {
            reference,
            submitted_at: Utc::now(),
        })
    }

    async fn status(&self, reference: &str) -> Result<SettlementStatus> {
        self.round_trip().await?;
        Ok(self
            .settlements
            .get(reference)
            .map(|entry| entry.1)
            .unwrap_or(SettlementStatus::Unknown))
    }
}

#[async_trait]
impl BankDirectory for SimulatedRail {
    /// Known banks come from the table; any other checksum-valid number resolves
    /// to a generic participating member bank.
    async fn lookup_bank(&self, routing_number: &str) -> Result<Option<BankInfo>> {
        self.round_trip().await?;
        if let Some(bank) = self.banks.get(routing_number) {
            return Ok(Some(bank.clone()));
        }
        if routing_number.len() == 9
            && routing_number.bytes().all(|b| b.is_ascii_digit())
            && aba_checksum(routing_number)
        {
            return Ok(Some(BankInfo {
                routing_number: routing_number.to_string(),
                name: format!("Member bank {routing_number}"),
                is_active: true,
                ach_participant: true,
            }));
        }
        Ok(None)
    }
}
