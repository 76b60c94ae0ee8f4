pub mod in_memory;
pub mod simulated_rail;

use crate::application::payments::ServiceContext;
use crate::processor::ProcessorRegistry;
use crate::processor::ach::AchProcessor;
use crate::processor::crypto::CryptoProcessor;
use crate::processor::other::OtherProcessor;
use in_memory::{InMemoryAccountDirectory, InMemoryLedger, InMemoryServerConfigs};
use simulated_rail::SimulatedRail;
use std::sync::Arc;

/// Registers the ACH, crypto and other processors over one rail.
pub fn simulated_processors(rail: &SimulatedRail) -> ProcessorRegistry {
    ProcessorRegistry::new()
        .register(Arc::new(AchProcessor::new(
            Arc::new(rail.clone()),
            Arc::new(rail.clone()),
        )))
        .register(Arc::new(CryptoProcessor::new(Arc::new(rail.clone()))))
        .register(Arc::new(OtherProcessor::new(Arc::new(rail.clone()))))
}

/// Wires every port to its in-process implementation.
pub fn in_memory_context(
    ledger: &InMemoryLedger,
    accounts: InMemoryAccountDirectory,
    server_configs: InMemoryServerConfigs,
    rail: &SimulatedRail,
) -> ServiceContext {
    ServiceContext {
        transactions: Arc::new(ledger.clone()),
        escrows: Arc::new(ledger.clone()),
        accounts: Arc::new(accounts),
        server_configs: Arc::new(server_configs),
        processors: simulated_processors(rail),
    }
}
