//! Delivery endpoints.
//!
//! An endpoint writes one finished message to an external sink. Writes are independent
//! per endpoint; a failure on one never blocks delivery to its peers.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::describe::{ParamType, Parameter, Parameters, Values};
use crate::message::Message;
use crate::registry::Registry;

/// A sink for finished messages.
pub trait Endpoint: Send + Sync {
    /// Write one message to the sink.
    fn write(&self, message: &Message) -> Result<()>;
}

/// Register all built-in endpoint kinds with the given registry.
pub fn register_endpoints(registry: &Registry) -> Result<()> {
    registry.register_endpoint(
        "stdout",
        Parameters(vec![Parameter::new("pretty", ParamType::Bool, false, "pretty print the output").with_default("false")]),
        Arc::new(|values: &Values| {
            let pretty = values.bool_or("pretty", false);
            Ok(Arc::new(StdoutEndpoint { pretty }) as Arc<dyn Endpoint>)
        }),
    )
}

/// Writes each message to standard out as one JSON document.
pub struct StdoutEndpoint {
    pretty: bool,
}

impl Endpoint for StdoutEndpoint {
    fn write(&self, message: &Message) -> Result<()> {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(message)
        } else {
            serde_json::to_string(message)
        }
        .context("error encoding message for stdout")?;
        println!("{}", encoded);
        Ok(())
    }
}
