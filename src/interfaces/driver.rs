use super::csv::command_reader::ScriptCommand;
use crate::application::payments::PaymentService;
use crate::domain::transaction::{Transaction, TransactionId};
use crate::error::{PaymentError, Result};
use std::collections::HashMap;
use tracing::debug;

/// Runs script commands against a [`PaymentService`], tracking which
/// transaction each script `ref` produced.
pub struct ScriptDriver<'a> {
    service: &'a PaymentService,
    refs: HashMap<String, TransactionId>,
    labels: HashMap<TransactionId, String>,
}

impl<'a> ScriptDriver<'a> {
    pub fn new(service: &'a PaymentService) -> Self {
        Self {
            service,
            refs: HashMap::new(),
            labels: HashMap::new(),
        }
    }

    pub async fn apply(&mut self, command: ScriptCommand) -> Result<Transaction> {
        match command {
            ScriptCommand::Pay { reference, request } => {
                if self.refs.contains_key(&reference) {
                    return Err(PaymentError::validation(format!(
                        "ref '{reference}' is already in use"
                    )));
                }
                match self.service.attempt_payment(request).await {
                    Ok(tx) => {
                        self.remember(reference, tx.id);
                        Ok(tx)
                    }
                    Err(failure) => {
                        // The FAILED row still belongs in the report.
                        if let Some(id) = failure.transaction_id {
                            self.remember(reference, id);
                        }
                        Err(failure.error)
                    }
                }
            }
            ScriptCommand::Settle {
                reference,
                approved,
            } => {
                let id = self.resolve(&reference)?;
                self.service.process_payment_request(id, approved).await
            }
            ScriptCommand::Cancel { reference } => {
                let id = self.resolve(&reference)?;
                self.service
                    .cancel_transaction(id, "cancelled by sender")
                    .await
            }
        }
    }

    pub fn label(&self, id: TransactionId) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    fn remember(&mut self, reference: String, id: TransactionId) {
        debug!(%reference, %id, "script ref bound");
        self.labels.insert(id, reference.clone());
        self.refs.insert(reference, id);
    }

    fn resolve(&self, reference: &str) -> Result<TransactionId> {
        self.refs
            .get(reference)
            .copied()
            .ok_or_else(|| PaymentError::not_found("script ref", reference))
    }
}
