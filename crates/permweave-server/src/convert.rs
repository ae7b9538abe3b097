//! Conversion between stored [`NodeModel`] records and domain [`Node`]s.

use chrono::DateTime;

use permweave_domain::{HolderId, Node};
use permweave_storage::NodeModel;

use crate::error::{ServiceError, ServiceResult};

const SERVER_KEY: &str = "server";
const WORLD_KEY: &str = "world";

/// Builds a domain node from a stored record.
pub fn node_from_model(holder: &HolderId, model: &NodeModel) -> ServiceResult<Node> {
    let invalid = |message: String| ServiceError::InvalidRecord {
        holder: holder.to_string(),
        message,
    };

    let mut builder = Node::builder(model.key.clone()).value(model.value);
    for (key, value) in model.context_pairs()? {
        builder = builder.with_context(key, value);
    }
    if let Some(expiry) = model.expiry {
        let expiry = DateTime::from_timestamp(expiry, 0)
            .ok_or_else(|| invalid(format!("expiry {expiry} is out of range")))?;
        builder = builder.expiry(expiry);
    }
    builder.build().map_err(|e| invalid(e.to_string()))
}

/// Converts a domain node into its stored record. The first `server` and
/// `world` values go to their own columns.
pub fn node_to_model(node: &Node) -> NodeModel {
    let mut model = NodeModel::new(node.key(), node.value());
    for (key, value) in node.context().iter() {
        match key {
            SERVER_KEY if model.server.is_none() => model.server = Some(value.to_string()),
            WORLD_KEY if model.world.is_none() => model.world = Some(value.to_string()),
            _ => model = model.with_context(key, value),
        }
    }
    if let Some(expiry) = node.expiry() {
        model.expiry = Some(expiry.timestamp());
    }
    model
}

pub fn nodes_from_models(holder: &HolderId, models: &[NodeModel]) -> ServiceResult<Vec<Node>> {
    models.iter().map(|m| node_from_model(holder, m)).collect()
}
