use crate::domain::transaction::Transaction;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    #[serde(rename = "ref")]
    reference: &'a str,
    sender: &'a str,
    recipient: &'a str,
    amount: Decimal,
    method: String,
    status: String,
    processing_fee: Decimal,
    escrow_fee: Decimal,
    total_fees: Decimal,
    failure_reason: &'a str,
}

/// Writes the final state of every transaction as CSV.
pub struct TransactionWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TransactionWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Each transaction is paired with the script label it was created under, if any.
    pub fn write_transactions<'a>(
        &mut self,
        rows: impl IntoIterator<Item = (Option<&'a str>, &'a Transaction)>,
    ) -> Result<()> {
        for (reference, tx) in rows {
            self.writer.serialize(ReportRow {
                reference: reference.unwrap_or(""),
                sender: tx.sender_id.as_str(),
                recipient: tx.recipient_id.as_str(),
                amount: tx.amount.value(),
                method: tx.payment_method_type.to_string(),
                status: tx.status.to_string(),
                processing_fee: tx.fees.processing_fee,
                escrow_fee: tx.fees.escrow_fee,
                total_fees: tx.fees.total_fees,
                failure_reason: tx.failure_reason.as_deref().unwrap_or(""),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
