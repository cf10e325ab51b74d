//! Test fixtures & utils.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::database::Database;
use crate::describe::{ParamType, Parameter, Parameters};
use crate::endpoint::Endpoint;
use crate::listener::{Listener, MemoryListener};
use crate::message::Message;
use crate::registry::Registry;
use crate::runtime::Manager;
use crate::store::{Entity, EntityType, Repository};

/// Build a flat string configuration map from literal pairs.
pub fn config_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(key, val)| (key.to_string(), val.to_string())).collect()
}

/// A listener entity bound to the in-memory transport.
pub fn listener_entity(uid: &str) -> Entity {
    Entity {
        entity_type: EntityType::Listener,
        kind: "memory".to_string(),
        uid: uid.to_string(),
        configuration: config_map(&[("buffer-size", "10")]),
    }
}

/// An endpoint entity bound to the capturing test endpoint.
pub fn endpoint_entity(uid: &str) -> Entity {
    Entity {
        entity_type: EntityType::Endpoint,
        kind: "capture".to_string(),
        uid: uid.to_string(),
        configuration: config_map(&[("label", "test")]),
    }
}

/// A profile entity running the given script over json input.
pub fn profile_entity(uid: &str, name: &str, contents: &str) -> Entity {
    Entity {
        entity_type: EntityType::Profile,
        kind: "script".to_string(),
        uid: uid.to_string(),
        configuration: config_map(&[
            ("profile-name", name),
            ("profile-version", "0.0.1"),
            ("script-main", "decode"),
            ("script-input", "json"),
            ("script-contents", contents),
        ]),
    }
}

/// A script which returns its json input unchanged.
pub const IDENTITY_SCRIPT: &str = "fn decode(input) { input }";

/// An endpoint which captures every written message in memory.
#[derive(Default)]
pub struct CaptureEndpoint {
    messages: Mutex<Vec<Message>>,
}

impl CaptureEndpoint {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().expect("capture endpoint lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|messages| messages.len()).unwrap_or(0)
    }
}

impl Endpoint for CaptureEndpoint {
    fn write(&self, message: &Message) -> Result<()> {
        self.messages.lock().expect("capture endpoint lock poisoned").push(message.clone());
        Ok(())
    }
}

/// An endpoint which fails every write.
pub struct FailingEndpoint;

impl Endpoint for FailingEndpoint {
    fn write(&self, _message: &Message) -> Result<()> {
        Err(anyhow!("endpoint write failed"))
    }
}

/// A full runtime harness over temp storage, with the shared in-memory listener and
/// capturing endpoint pre-registered so tests can publish payloads and observe output.
pub struct Harness {
    pub config: Arc<Config>,
    pub db: Database,
    pub repository: Arc<Repository>,
    pub registry: Arc<Registry>,
    pub manager: Manager,
    pub listener: Arc<MemoryListener>,
    pub capture: Arc<CaptureEndpoint>,
    pub shutdown_tx: broadcast::Sender<()>,
    _tmpdir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let (config, tmpdir) = Config::new_test()?;
        let db = Database::new(config.clone()).await?;
        let repository = Arc::new(Repository::new(&db).await?);
        let registry = Arc::new(Registry::new());

        let listener = Arc::new(MemoryListener::new(10));
        let shared = listener.clone();
        registry.register_listener(
            "memory",
            Parameters(vec![
                Parameter::new("buffer-size", ParamType::Int, false, "messages buffered per channel").with_default("10")
            ]),
            Arc::new(move |_: &crate::describe::Values| Ok(shared.clone() as Arc<dyn Listener>)),
        )?;

        let capture = Arc::new(CaptureEndpoint::default());
        let shared = capture.clone();
        registry.register_endpoint(
            "capture",
            Parameters(vec![Parameter::new("label", ParamType::String, false, "label for captured output")]),
            Arc::new(move |_: &crate::describe::Values| Ok(shared.clone() as Arc<dyn Endpoint>)),
        )?;

        let (shutdown_tx, _) = broadcast::channel(10);
        let manager = Manager::new(config.clone(), repository.clone(), registry.clone(), shutdown_tx.clone())?;
        Ok(Self {
            config,
            db,
            repository,
            registry,
            manager,
            listener,
            capture,
            shutdown_tx,
            _tmpdir: tmpdir,
        })
    }

    /// Persist the standard listener/endpoint/profile entities and return their uids.
    pub fn seed_entities(&self) -> Result<(String, String, String)> {
        let listener_uid = self.repository.update_or_create_entity(&self.registry, listener_entity(""))?;
        let endpoint_uid = self.repository.update_or_create_entity(&self.registry, endpoint_entity(""))?;
        let profile_uid = self
            .repository
            .update_or_create_entity(&self.registry, profile_entity("", "identity", IDENTITY_SCRIPT))?;
        Ok((listener_uid, endpoint_uid, profile_uid))
    }
}

/// Poll the given condition until it holds or the wait budget is exhausted.
pub async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
