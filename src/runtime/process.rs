//! The per-pipe processing loop.
//!
//! One loop per started pipe: it drains the pipe's channel, runs each payload through
//! the transformation engine, stamps processing metadata and fans the finished message
//! out to every endpoint. Faults on the data path are counted and logged; they never
//! stop the loop. Only a shutdown signal or channel closure ends the loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::endpoint::Endpoint;
use crate::engine::Engine;
use crate::listener::Channel;
use crate::message::{
    self, Message, ENGINE_ENDED_AT_KEY, ENGINE_ERROR_KEY, ENGINE_OK_KEY, ENGINE_STARTED_AT_KEY, PROFILE_NAME_KEY,
    PROFILE_VERSION_KEY, RUNTIME_VERSION, RUNTIME_VERSION_KEY,
};
use crate::runtime::{PipeState, StateCell, Statistics};
use crate::store::PipeConfig;

/// The processing loop of one started pipe.
pub struct ProcessLoop {
    config: PipeConfig,
    engine: Engine,
    state: Arc<StateCell>,
    statistics: Arc<Statistics>,
    endpoints: HashMap<String, Arc<dyn Endpoint>>,
    channel: Channel,
    /// This pipe's cancellation signal.
    shutdown: BroadcastStream<()>,
    /// The process-wide shutdown signal.
    root_shutdown: BroadcastStream<()>,
}

impl ProcessLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PipeConfig, engine_timeout: Duration, state: Arc<StateCell>, statistics: Arc<Statistics>,
        endpoints: HashMap<String, Arc<dyn Endpoint>>, channel: Channel, shutdown: broadcast::Receiver<()>,
        root_shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            engine: Engine::new(engine_timeout),
            state,
            statistics,
            endpoints,
            channel,
            shutdown: BroadcastStream::new(shutdown),
            root_shutdown: BroadcastStream::new(root_shutdown),
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!(uri = %self.config.uri, "pipe processing loop started");
        loop {
            tokio::select! {
                msg = self.channel.out.recv() => match msg {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                err = self.channel.errors.recv() => match err {
                    Some(err) => self.handle_transport_error(err),
                    None => break,
                },
                _ = self.shutdown.next() => break,
                _ = self.root_shutdown.next() => break,
            }
        }
        self.state.store(PipeState::Stopped);
        tracing::debug!(uri = %self.config.uri, "pipe processing loop stopped");
        if let Err(err) = self.channel.close() {
            tracing::error!(error = ?err, uri = %self.config.uri, "error closing pipe channel");
        }
    }

    /// Run one message through the engine and deliver it to every endpoint.
    ///
    /// A message whose transformation fails is still delivered, carrying the failure
    /// in its metadata, so downstream consumers see every received message exactly
    /// once. Endpoint writes are independent; one failing write is counted against
    /// that endpoint only.
    async fn handle_message(&mut self, mut message: Message) {
        self.statistics.received.record_ok();
        let profile = &self.config.profile;

        message.metadata.insert(ENGINE_STARTED_AT_KEY.into(), message::now_rfc3339().into());
        let result = self.engine.execute(&profile.script, &message.payload).await;
        message.metadata.insert(ENGINE_ENDED_AT_KEY.into(), message::now_rfc3339().into());
        match result {
            Ok(output) => {
                self.statistics.processed.record_ok();
                message.output = output;
                message.metadata.insert(ENGINE_OK_KEY.into(), true.into());
            }
            Err(err) => {
                self.statistics.processed.record_error();
                message.metadata.insert(ENGINE_OK_KEY.into(), false.into());
                message.metadata.insert(ENGINE_ERROR_KEY.into(), err.to_string().into());
                tracing::error!(error = %err, uri = %self.config.uri, "error transforming message");
            }
        }

        message.metadata.insert(PROFILE_NAME_KEY.into(), profile.name.clone().into());
        message.metadata.insert(PROFILE_VERSION_KEY.into(), profile.version.clone().into());
        message.metadata.insert(RUNTIME_VERSION_KEY.into(), RUNTIME_VERSION.into());
        message.schema = profile.schema.clone();
        message.tags.extend(self.config.tags.clone());

        for (uid, endpoint) in &self.endpoints {
            let sent = match self.statistics.sent.get(uid) {
                Some(sent) => sent,
                None => continue,
            };
            match endpoint.write(&message) {
                Ok(()) => sent.record_ok(),
                Err(err) => {
                    sent.record_error();
                    tracing::error!(error = ?err, uri = %self.config.uri, endpoint = %uid, "error writing message to endpoint");
                }
            }
        }
    }

    fn handle_transport_error(&self, err: anyhow::Error) {
        self.statistics.received.record_error();
        tracing::error!(error = ?err, uri = %self.config.uri, "transport error on pipe channel");
    }
}
