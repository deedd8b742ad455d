//! Structural validation of workflow documents.
//!
//! A workflow is an opaque mapping of node id to node object. The only
//! shape this crate understands is the output declaration: a node whose
//! `class_type` is [`OUTPUT_NODE_CLASS`] and whose `inputs.filename_prefix`
//! names the prefix under which the worker writes its artifacts.

use serde_json::{Map, Value};

/// Node type tag that marks an output-producing node.
pub const OUTPUT_NODE_CLASS: &str = "SaveImage";

/// Key under which the workflow travels in a request envelope.
pub const WORKFLOW_KEY: &str = "workflow";

/// Reasons a submission is rejected before any job is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Request body cannot be empty")]
    EmptyBody,

    #[error("Missing workflow in request body")]
    MissingWorkflow,

    #[error("Invalid workflow format: must be a non-empty JSON object")]
    InvalidFormat,
}

/// A `(node, filename prefix)` pair used to find produced files after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDeclaration {
    pub node_id: String,
    pub filename_prefix: String,
}

/// Extract the workflow from a `{"workflow": ...}` request envelope.
pub fn unwrap_envelope(body: &Value) -> Result<&Value, WorkflowError> {
    match body {
        Value::Null => Err(WorkflowError::EmptyBody),
        Value::Object(map) if map.is_empty() => Err(WorkflowError::EmptyBody),
        Value::Object(map) => map.get(WORKFLOW_KEY).ok_or(WorkflowError::MissingWorkflow),
        _ => Err(WorkflowError::MissingWorkflow),
    }
}

/// Validate a workflow document and return its output declarations.
///
/// Rules, short-circuiting on the first failure:
///
/// 1. The workflow must be a non-empty JSON object.
/// 2. At least one node should be an output node. A workflow without one
///    is accepted with a warning; it will normally produce no artifacts.
pub fn validate(workflow: &Value) -> Result<Vec<OutputDeclaration>, WorkflowError> {
    let nodes = match workflow {
        Value::Object(nodes) if !nodes.is_empty() => nodes,
        _ => return Err(WorkflowError::InvalidFormat),
    };

    if !nodes.values().any(is_output_node) {
        tracing::warn!("No {OUTPUT_NODE_CLASS} nodes found in workflow. Output may be empty.");
    }

    Ok(output_declarations(nodes))
}

/// Collect output declarations in document order.
///
/// Output nodes without a non-empty string `inputs.filename_prefix` are
/// skipped: an empty prefix would match every file in the output area.
pub fn output_declarations(nodes: &Map<String, Value>) -> Vec<OutputDeclaration> {
    nodes
        .iter()
        .filter(|(_, node)| is_output_node(node))
        .filter_map(|(node_id, node)| {
            let prefix = node
                .get("inputs")
                .and_then(|inputs| inputs.get("filename_prefix"))
                .and_then(Value::as_str)
                .filter(|p| !p.is_empty());

            match prefix {
                Some(prefix) => Some(OutputDeclaration {
                    node_id: node_id.clone(),
                    filename_prefix: prefix.to_string(),
                }),
                None => {
                    tracing::warn!(
                        node_id = %node_id,
                        "Output node has no filename_prefix, ignoring it",
                    );
                    None
                }
            }
        })
        .collect()
}

fn is_output_node(node: &Value) -> bool {
    node.get("class_type").and_then(Value::as_str) == Some(OUTPUT_NODE_CLASS)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
