//! The component registry.
//!
//! Listener and endpoint kinds are registered up front with a parameter spec and a
//! builder. Instances are built lazily per uid and cached, so two pipes naming the same
//! uid share one instance and a builder runs at most once per uid for the life of the
//! registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use crate::describe::{Parameters, Values};
use crate::endpoint::Endpoint;
use crate::error::AppError;
use crate::listener::Listener;

/// A builder producing one component instance from validated configuration values.
pub type Builder<T> = Arc<dyn Fn(&Values) -> Result<Arc<T>> + Send + Sync>;

struct Lazy<T: ?Sized> {
    builder: Builder<T>,
    built: Option<Arc<T>>,
}

struct Table<T: ?Sized> {
    component: &'static str,
    /// Keyed by kind at registration and by uid once resolved.
    entries: HashMap<String, Lazy<T>>,
    /// Parameter specs, keyed by kind.
    parameters: HashMap<String, Parameters>,
}

impl<T: ?Sized> Table<T> {
    fn new(component: &'static str) -> Self {
        Self {
            component,
            entries: HashMap::new(),
            parameters: HashMap::new(),
        }
    }

    fn register(&mut self, kind: &str, parameters: Parameters, builder: Builder<T>) -> Result<()> {
        if parameters.is_empty() {
            panic!("{} kind {} registered without a parameter spec", self.component, kind);
        }
        if self.parameters.contains_key(kind) {
            return Err(AppError::config(format!("{} kind : {} already registered", self.component, kind)).into());
        }
        self.parameters.insert(kind.to_string(), parameters);
        self.entries.insert(kind.to_string(), Lazy { builder, built: None });
        Ok(())
    }

    fn resolve(&mut self, uid: &str, kind: &str, config: &std::collections::BTreeMap<String, String>) -> Result<Arc<T>> {
        let parameters = self
            .parameters
            .get(kind)
            .ok_or_else(|| AppError::config(format!("{} kind : {} not registered", self.component, kind)))?;
        let values = parameters.values(config)?;
        if let Some(entry) = self.entries.get(uid) {
            if let Some(built) = &entry.built {
                return Ok(built.clone());
            }
        }
        // First resolution of this uid; alias the kind's builder under the uid so the
        // built instance is cached per uid, not per kind.
        if !self.entries.contains_key(uid) {
            let builder = self
                .entries
                .get(kind)
                .map(|entry| entry.builder.clone())
                .ok_or_else(|| AppError::config(format!("{} kind : {} not registered", self.component, kind)))?;
            self.entries.insert(uid.to_string(), Lazy { builder, built: None });
        }
        let entry = self
            .entries
            .get_mut(uid)
            .ok_or_else(|| anyhow!("{} entry for uid {} missing after insert", self.component, uid))?;
        let built = (entry.builder)(&values)?;
        entry.built = Some(built.clone());
        Ok(built)
    }

    fn is_registered(&self, kind: &str) -> bool {
        self.parameters.contains_key(kind)
    }

    fn describe(&self, kind: &str) -> Option<Parameters> {
        self.parameters.get(kind).cloned()
    }
}

/// The registry of all pluggable listener and endpoint kinds.
pub struct Registry {
    listeners: Mutex<Table<dyn Listener>>,
    endpoints: Mutex<Table<dyn Endpoint>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Table::new("listener")),
            endpoints: Mutex::new(Table::new("endpoint")),
        }
    }

    /// Register a listener kind. Panics if the kind declares no parameters.
    pub fn register_listener(&self, kind: &str, parameters: Parameters, builder: Builder<dyn Listener>) -> Result<()> {
        self.listeners
            .lock()
            .map_err(|_| anyhow!("listener table poisoned"))?
            .register(kind, parameters, builder)
    }

    /// Register an endpoint kind. Panics if the kind declares no parameters.
    pub fn register_endpoint(&self, kind: &str, parameters: Parameters, builder: Builder<dyn Endpoint>) -> Result<()> {
        self.endpoints
            .lock()
            .map_err(|_| anyhow!("endpoint table poisoned"))?
            .register(kind, parameters, builder)
    }

    /// Resolve the listener instance for the given uid, building it on first use.
    pub fn resolve_listener(
        &self, uid: &str, kind: &str, config: &std::collections::BTreeMap<String, String>,
    ) -> Result<Arc<dyn Listener>> {
        self.listeners
            .lock()
            .map_err(|_| anyhow!("listener table poisoned"))?
            .resolve(uid, kind, config)
    }

    /// Resolve the endpoint instance for the given uid, building it on first use.
    pub fn resolve_endpoint(
        &self, uid: &str, kind: &str, config: &std::collections::BTreeMap<String, String>,
    ) -> Result<Arc<dyn Endpoint>> {
        self.endpoints
            .lock()
            .map_err(|_| anyhow!("endpoint table poisoned"))?
            .resolve(uid, kind, config)
    }

    /// Whether the given listener kind has been registered.
    pub fn is_listener_registered(&self, kind: &str) -> bool {
        self.listeners.lock().map(|table| table.is_registered(kind)).unwrap_or(false)
    }

    /// Whether the given endpoint kind has been registered.
    pub fn is_endpoint_registered(&self, kind: &str) -> bool {
        self.endpoints.lock().map(|table| table.is_registered(kind)).unwrap_or(false)
    }

    /// The parameter spec declared by the given listener kind, if registered.
    pub fn describe_listener(&self, kind: &str) -> Option<Parameters> {
        self.listeners.lock().ok().and_then(|table| table.describe(kind))
    }

    /// The parameter spec declared by the given endpoint kind, if registered.
    pub fn describe_endpoint(&self, kind: &str) -> Option<Parameters> {
        self.endpoints.lock().ok().and_then(|table| table.describe(kind))
    }
}
