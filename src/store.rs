//! Persistent storage for entities and pipe configurations.
//!
//! Listener, endpoint and profile configurations are stored as flat entities in
//! per-type buckets, keyed by uid. Started pipes are stored fully denormalized in
//! their own bucket, keyed by uri, so a restart can rebuild every pipe without
//! chasing entity references.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::database::{Database, Tree};
use crate::engine::{InputType, Script, ScriptRuntime};
use crate::error::{AppError, ERR_DB_FLUSH, ERR_ITER_FAILURE};
use crate::registry::Registry;
use crate::utils;

// Configuration keys recognized on profile entities.
const PROFILE_NAME_KEY: &str = "profile-name";
const PROFILE_DESCRIPTION_KEY: &str = "profile-description";
const PROFILE_VERSION_KEY: &str = "profile-version";
const PROFILE_SCHEMA_KEY: &str = "schema";
const SCRIPT_MAIN_KEY: &str = "script-main";
const SCRIPT_RUNTIME_KEY: &str = "script-runtime";
const SCRIPT_INPUT_KEY: &str = "script-input";
const SCRIPT_CONTENTS_KEY: &str = "script-contents";

/// The type of a stored entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Listener,
    Endpoint,
    Profile,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listener => write!(f, "listener"),
            Self::Endpoint => write!(f, "endpoint"),
            Self::Profile => write!(f, "profile"),
        }
    }
}

/// A stored component configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// The registered kind this entity configures, e.g. `memory` or `stdout`.
    pub kind: String,
    #[serde(default)]
    pub uid: String,
    /// Flat string configuration, validated against the kind's parameter spec on use.
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

/// A fully parsed transformation profile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub schema: serde_json::Value,
    pub script: Script,
}

/// The denormalized configuration of one started pipe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipeConfig {
    pub uri: String,
    pub listener: Entity,
    pub endpoints: Vec<Entity>,
    pub profile: Profile,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Parse a profile entity's flat configuration into a typed profile.
pub fn profile_from_entity(entity: &Entity) -> Result<Profile> {
    let required = |key: &str| -> Result<String> {
        entity
            .configuration
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::config(format!("profile configuration missing key : {}", key)).into())
    };
    let name = required(PROFILE_NAME_KEY)?;
    let main = required(SCRIPT_MAIN_KEY)?;
    let input = InputType::from_str(&required(SCRIPT_INPUT_KEY)?)?;
    let contents = required(SCRIPT_CONTENTS_KEY)?;
    let runtime = match entity.configuration.get(SCRIPT_RUNTIME_KEY) {
        Some(raw) => ScriptRuntime::from_str(raw)?,
        None => ScriptRuntime::default(),
    };
    let schema = match entity.configuration.get(PROFILE_SCHEMA_KEY) {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| AppError::config(format!("profile schema is not valid json : {}", err)))?,
        None => serde_json::Value::Null,
    };
    Ok(Profile {
        uid: entity.uid.clone(),
        name,
        description: entity.configuration.get(PROFILE_DESCRIPTION_KEY).cloned().unwrap_or_default(),
        version: entity.configuration.get(PROFILE_VERSION_KEY).cloned().unwrap_or_default(),
        schema,
        script: Script {
            main,
            runtime,
            input,
            contents,
        },
    })
}

/// One per-type entity bucket.
pub struct EntityBucket {
    tree: Tree,
    kind: &'static str,
}

impl EntityBucket {
    /// Fetch one entity by uid, failing with a named not-found error.
    pub fn one(&self, uid: &str) -> Result<Entity> {
        let found = self.tree.get(uid.as_bytes()).context(ERR_ITER_FAILURE)?;
        match found {
            Some(raw) => utils::decode_model(&raw),
            None => Err(AppError::not_found(self.kind, uid).into()),
        }
    }

    /// Fetch several entities by uid; any missing uid fails the whole lookup.
    pub fn many(&self, uids: &[String]) -> Result<Vec<Entity>> {
        uids.iter().map(|uid| self.one(uid)).collect()
    }

    /// Insert or overwrite an entity under its uid.
    pub fn insert(&self, entity: &Entity) -> Result<()> {
        let encoded = utils::encode_model(entity)?;
        self.tree.insert(entity.uid.as_bytes(), encoded).context(ERR_ITER_FAILURE)?;
        self.tree.flush().context(ERR_DB_FLUSH)?;
        Ok(())
    }

    /// Delete an entity by uid. Deleting an absent uid is a no-op.
    pub fn delete(&self, uid: &str) -> Result<()> {
        self.tree.remove(uid.as_bytes()).context(ERR_ITER_FAILURE)?;
        self.tree.flush().context(ERR_DB_FLUSH)?;
        Ok(())
    }

    /// List all entities in this bucket.
    pub fn list(&self) -> Result<Vec<Entity>> {
        let mut out = Vec::new();
        for kv in self.tree.iter() {
            let (_, raw) = kv.context(ERR_ITER_FAILURE)?;
            out.push(utils::decode_model(&raw)?);
        }
        Ok(out)
    }
}

/// The bucket of started pipe configurations, keyed by uri.
pub struct PipeBucket {
    tree: Tree,
}

impl PipeBucket {
    /// Fetch one pipe configuration by uri.
    pub fn one(&self, uri: &str) -> Result<PipeConfig> {
        let found = self.tree.get(uri.as_bytes()).context(ERR_ITER_FAILURE)?;
        match found {
            Some(raw) => utils::decode_model(&raw),
            None => Err(AppError::not_found("pipe", uri).into()),
        }
    }

    /// Insert or overwrite a pipe configuration under its uri.
    pub fn insert(&self, config: &PipeConfig) -> Result<()> {
        let encoded = utils::encode_model(config)?;
        self.tree.insert(config.uri.as_bytes(), encoded).context(ERR_ITER_FAILURE)?;
        self.tree.flush().context(ERR_DB_FLUSH)?;
        Ok(())
    }

    /// Delete a pipe configuration by uri. Deleting an absent uri is a no-op.
    pub fn delete(&self, uri: &str) -> Result<()> {
        self.tree.remove(uri.as_bytes()).context(ERR_ITER_FAILURE)?;
        self.tree.flush().context(ERR_DB_FLUSH)?;
        Ok(())
    }

    /// List all stored pipe configurations.
    pub fn list(&self) -> Result<Vec<PipeConfig>> {
        let mut out = Vec::new();
        for kv in self.tree.iter() {
            let (_, raw) = kv.context(ERR_ITER_FAILURE)?;
            out.push(utils::decode_model(&raw)?);
        }
        Ok(out)
    }
}

/// The storage repository backing the runtime.
pub struct Repository {
    pub listeners: EntityBucket,
    pub endpoints: EntityBucket,
    pub profiles: EntityBucket,
    pub pipes: PipeBucket,
}

impl Repository {
    /// Open all storage buckets.
    pub async fn new(db: &Database) -> Result<Self> {
        Ok(Self {
            listeners: EntityBucket {
                tree: db.get_listeners_tree().await?,
                kind: "listener",
            },
            endpoints: EntityBucket {
                tree: db.get_endpoints_tree().await?,
                kind: "endpoint",
            },
            profiles: EntityBucket {
                tree: db.get_profiles_tree().await?,
                kind: "profile",
            },
            pipes: PipeBucket {
                tree: db.get_pipes_tree().await?,
            },
        })
    }

    /// The entity bucket for the given type.
    pub fn bucket(&self, entity_type: EntityType) -> &EntityBucket {
        match entity_type {
            EntityType::Listener => &self.listeners,
            EntityType::Endpoint => &self.endpoints,
            EntityType::Profile => &self.profiles,
        }
    }

    /// Persist an entity, deriving its uid when absent, and return the uid.
    ///
    /// Listener and endpoint entities must name a registered kind. Profiles derive
    /// their uid from their name; other entities derive a stable content uid, so
    /// re-submitting the same configuration always lands on the same record.
    pub fn update_or_create_entity(&self, registry: &Registry, mut entity: Entity) -> Result<String> {
        let registered = match entity.entity_type {
            EntityType::Listener => registry.is_listener_registered(&entity.kind),
            EntityType::Endpoint => registry.is_endpoint_registered(&entity.kind),
            EntityType::Profile => true,
        };
        if !registered {
            return Err(AppError::config(format!("{} kind : {} not registered", entity.entity_type, entity.kind)).into());
        }
        if entity.uid.is_empty() {
            entity.uid = match entity.entity_type {
                EntityType::Profile => entity
                    .configuration
                    .get(PROFILE_NAME_KEY)
                    .cloned()
                    .ok_or_else(|| AppError::config(format!("profile configuration missing key : {}", PROFILE_NAME_KEY)))?,
                _ => utils::content_uid(&entity.configuration)?,
            };
        }
        self.bucket(entity.entity_type).insert(&entity)?;
        Ok(entity.uid)
    }
}
