//! Listener transports.
//!
//! A listener owns a connection to the outside world and hands out per-pipe channels.
//! Each channel carries decoded messages and transport errors on separate streams, plus
//! a closer that releases only that channel's resources. Closing a channel never tears
//! down the listener it came from.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;

use crate::describe::{ParamType, Parameter, Parameters, Values};
use crate::message::Message;
use crate::registry::Registry;

/// A transport binding messages from the outside world onto pipes.
pub trait Listener: Send + Sync {
    /// Open a new channel scoped to the given uri.
    fn new_channel(&self, uri: &str) -> Result<Channel>;
    /// Release all resources held by the listener itself.
    fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Listener")
    }
}

/// One pipe's subscription on a listener.
pub struct Channel {
    pub(crate) errors: mpsc::Receiver<anyhow::Error>,
    pub(crate) out: mpsc::Receiver<Message>,
    closer: Option<Box<dyn FnOnce() -> Result<()> + Send>>,
}

impl Channel {
    pub fn new(
        errors: mpsc::Receiver<anyhow::Error>, out: mpsc::Receiver<Message>, closer: Box<dyn FnOnce() -> Result<()> + Send>,
    ) -> Self {
        Self {
            errors,
            out,
            closer: Some(closer),
        }
    }

    /// Release this channel's resources on the listener which created it.
    pub fn close(mut self) -> Result<()> {
        match self.closer.take() {
            Some(closer) => closer(),
            None => Ok(()),
        }
    }
}

/// Register all built-in listener kinds with the given registry.
pub fn register_listeners(registry: &Registry) -> Result<()> {
    registry.register_listener(
        "memory",
        Parameters(vec![Parameter::new(
            "buffer-size",
            ParamType::Int,
            false,
            "number of messages buffered per channel",
        )
        .with_default("10")]),
        Arc::new(|values: &Values| {
            let buffer = values.int_or("buffer-size", 10).max(1) as usize;
            Ok(Arc::new(MemoryListener::new(buffer)) as Arc<dyn Listener>)
        }),
    )
}

struct MemorySender {
    errors: mpsc::Sender<anyhow::Error>,
    out: mpsc::Sender<Message>,
}

/// An in-process listener used for local delivery and as a harness transport.
pub struct MemoryListener {
    buffer: usize,
    senders: Arc<Mutex<HashMap<String, MemorySender>>>,
}

impl MemoryListener {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer,
            senders: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deliver a raw payload to the channel bound to the given uri.
    pub fn publish(&self, uri: &str, payload: Vec<u8>) -> Result<()> {
        let senders = self.senders.lock().map_err(|_| anyhow!("listener sender table poisoned"))?;
        let sender = senders.get(uri).with_context(|| format!("no channel open for uri {}", uri))?;
        sender
            .out
            .try_send(Message::from_payload(payload, "memory", uri))
            .with_context(|| format!("channel for uri {} is full or closed", uri))
    }

    /// Surface a transport-level error on the channel bound to the given uri.
    pub fn raise_error(&self, uri: &str, err: anyhow::Error) -> Result<()> {
        let senders = self.senders.lock().map_err(|_| anyhow!("listener sender table poisoned"))?;
        let sender = senders.get(uri).with_context(|| format!("no channel open for uri {}", uri))?;
        sender
            .errors
            .try_send(err)
            .map_err(|_| anyhow!("error channel for uri {} is full or closed", uri))
    }

    /// Whether a channel is currently open for the given uri.
    pub fn has_channel(&self, uri: &str) -> bool {
        self.senders.lock().map(|senders| senders.contains_key(uri)).unwrap_or(false)
    }
}

impl Listener for MemoryListener {
    fn new_channel(&self, uri: &str) -> Result<Channel> {
        let (errors_tx, errors_rx) = mpsc::channel(self.buffer);
        let (out_tx, out_rx) = mpsc::channel(self.buffer);
        {
            let mut senders = self.senders.lock().map_err(|_| anyhow!("listener sender table poisoned"))?;
            senders.insert(
                uri.to_string(),
                MemorySender {
                    errors: errors_tx,
                    out: out_tx,
                },
            );
        }
        let senders = self.senders.clone();
        let channel_uri = uri.to_string();
        Ok(Channel::new(
            errors_rx,
            out_rx,
            Box::new(move || {
                let mut senders = senders.lock().map_err(|_| anyhow!("listener sender table poisoned"))?;
                senders.remove(&channel_uri);
                Ok(())
            }),
        ))
    }

    fn close(&self) -> Result<()> {
        let mut senders = self.senders.lock().map_err(|_| anyhow!("listener sender table poisoned"))?;
        senders.clear();
        Ok(())
    }
}
