use crate::application::payments::{MethodSelector, PaymentRequest};
use crate::domain::account::{ServerId, UserId};
use crate::domain::money::Amount;
use crate::domain::payment_method::PaymentMethodType;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptOp {
    Pay,
    Approve,
    Reject,
    Cancel,
}

/// One raw line of a payment script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptRow {
    pub op: ScriptOp,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub sender: Option<UserId>,
    #[serde(default)]
    pub recipient: Option<UserId>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// A method type (`ach`, `crypto`, `other`) or the id of a saved method.
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub server: Option<ServerId>,
}

/// A script line checked for the fields its operation needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    Pay {
        reference: String,
        request: PaymentRequest,
    },
    Settle {
        reference: String,
        approved: bool,
    },
    Cancel {
        reference: String,
    },
}

impl TryFrom<ScriptRow> for ScriptCommand {
    type Error = PaymentError;

    fn try_from(row: ScriptRow) -> Result<Self> {
        let reference = row.reference;
        if reference.is_empty() {
            return Err(PaymentError::validation("every script line needs a ref"));
        }
        match row.op {
            ScriptOp::Pay => {
                let missing = |field: &str| {
                    PaymentError::validation(format!("pay '{reference}' is missing {field}"))
                };
                let sender = row.sender.ok_or_else(|| missing("sender"))?;
                let recipient = row.recipient.ok_or_else(|| missing("recipient"))?;
                let amount = Amount::new(row.amount.ok_or_else(|| missing("amount"))?)?;
                let method = match row.method {
                    Some(method) => match method.parse::<PaymentMethodType>() {
                        Ok(method_type) => MethodSelector::Type(method_type),
                        Err(_) => MethodSelector::Id(method),
                    },
                    None => return Err(missing("method")),
                };
                let mut request = PaymentRequest::new(sender, recipient, amount, method);
                request.server_id = row.server;
                Ok(ScriptCommand::Pay { reference, request })
            }
            ScriptOp::Approve => Ok(ScriptCommand::Settle {
                reference,
                approved: true,
            }),
            ScriptOp::Reject => Ok(ScriptCommand::Settle {
                reference,
                approved: false,
            }),
            ScriptOp::Cancel => Ok(ScriptCommand::Cancel { reference }),
        }
    }
}

/// Streams commands out of a CSV payment script.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses each line; a bad line yields an error and the stream continues.
    pub fn commands(self) -> impl Iterator<Item = Result<ScriptCommand>> {
        self.reader.into_deserialize::<ScriptRow>().map(|row| {
            row.map_err(PaymentError::from)
                .and_then(ScriptCommand::try_from)
        })
    }
}
