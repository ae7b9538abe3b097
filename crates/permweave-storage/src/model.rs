//! Persisted record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// One stored node.
///
/// `server` and `world` are kept as columns of their own; every other
/// context pair lives in `context`, a JSON object of `key → [values]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeModel {
    pub key: String,
    pub value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<String>,
    /// Unix seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(default = "empty_context")]
    pub context: Value,
}

fn empty_context() -> Value {
    Value::Object(Map::new())
}

impl NodeModel {
    pub fn new(key: impl Into<String>, value: bool) -> Self {
        Self {
            key: key.into(),
            value,
            server: None,
            world: None,
            expiry: None,
            context: empty_context(),
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_world(mut self, world: impl Into<String>) -> Self {
        self.world = Some(world.into());
        self
    }

    pub fn with_expiry(mut self, unix_seconds: i64) -> Self {
        self.expiry = Some(unix_seconds);
        self
    }

    /// Adds a context pair to the JSON context object.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if !self.context.is_object() {
            self.context = empty_context();
        }
        if let Value::Object(map) = &mut self.context {
            let values = map
                .entry(key.into())
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(values) = values {
                values.push(Value::String(value.into()));
            }
        }
        self
    }

    /// Every context pair, `server` and `world` included.
    pub fn context_pairs(&self) -> StorageResult<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        if let Some(server) = &self.server {
            pairs.push(("server".to_string(), server.clone()));
        }
        if let Some(world) = &self.world {
            pairs.push(("world".to_string(), world.clone()));
        }

        let map = match &self.context {
            Value::Null => return Ok(pairs),
            Value::Object(map) => map,
            other => {
                return Err(StorageError::SerializationError {
                    message: format!("node context must be a JSON object, got {other}"),
                })
            }
        };
        for (key, values) in map {
            match values {
                Value::String(value) => pairs.push((key.clone(), value.clone())),
                Value::Array(values) => {
                    for value in values {
                        let Value::String(value) = value else {
                            return Err(StorageError::SerializationError {
                                message: format!("context values of {key:?} must be strings"),
                            });
                        };
                        pairs.push((key.clone(), value.clone()));
                    }
                }
                _ => {
                    return Err(StorageError::SerializationError {
                        message: format!("context values of {key:?} must be strings"),
                    })
                }
            }
        }
        Ok(pairs)
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.key.trim().is_empty() {
            return Err(StorageError::InvalidInput {
                message: "node key cannot be empty".to_string(),
            });
        }
        self.context_pairs().map(|_| ())
    }
}

/// A user as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_group: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
}

impl UserRecord {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary_group: None,
            nodes: Vec::new(),
        }
    }
}

/// A group as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
}

impl GroupRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }
}

/// A track: an ordered ladder of group names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub name: String,
    pub groups: Vec<String>,
}
