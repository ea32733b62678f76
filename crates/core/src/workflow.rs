//! ComfyUI workflow graph inspection and mutation.
//!
//! A workflow is a caller-supplied JSON object mapping node IDs to
//! nodes of the shape `{ "class_type": "...", "inputs": { ... } }`.
//! Only `class_type` is inspected for routing decisions; everything
//! else is opaque payload forwarded to ComfyUI verbatim.

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Node class that accepts an external audio file as workflow input.
pub const LOAD_AUDIO_CLASS: &str = "LoadAudio";

/// Node class that writes the final MP3 artifact. Its node ID is the
/// sentinel output ComfyUI is asked to collect results from.
pub const SAVE_AUDIO_CLASS: &str = "SaveAudioMP3";

/// A workflow graph: node ID -> node object, in JSON insertion order.
pub type WorkflowGraph = Map<String, Value>;

/// View `value` as a workflow graph.
///
/// A graph is a non-empty JSON object keyed by node ID. Node contents
/// are not validated here; nodes missing `class_type` simply never
/// match a lookup.
pub fn as_graph(value: &Value) -> Result<&WorkflowGraph, CoreError> {
    let graph = value
        .as_object()
        .ok_or_else(|| CoreError::Validation("Workflow must be a JSON object".to_string()))?;
    if graph.is_empty() {
        return Err(CoreError::Validation(
            "Workflow must contain at least one node".to_string(),
        ));
    }
    Ok(graph)
}

/// Mutable counterpart of [`as_graph`].
pub fn as_graph_mut(value: &mut Value) -> Result<&mut WorkflowGraph, CoreError> {
    let graph = value
        .as_object_mut()
        .ok_or_else(|| CoreError::Validation("Workflow must be a JSON object".to_string()))?;
    if graph.is_empty() {
        return Err(CoreError::Validation(
            "Workflow must contain at least one node".to_string(),
        ));
    }
    Ok(graph)
}

/// Find the first node whose `class_type` equals `class_type` and
/// return its node ID.
///
/// Iteration follows JSON insertion order (`serde_json` is built with
/// `preserve_order`), so graphs with multiple matching nodes resolve
/// deterministically to the earliest one. Nodes without a string
/// `class_type` are skipped.
pub fn find_node<'a>(graph: &'a WorkflowGraph, class_type: &str) -> Option<&'a str> {
    graph.iter().find_map(|(node_id, node)| {
        (node.get("class_type").and_then(Value::as_str) == Some(class_type))
            .then_some(node_id.as_str())
    })
}

/// Set `inputs[field] = value` on the first node matching `class_type`.
///
/// Returns `false` and leaves the graph untouched when no node
/// matches. A matching node that has no `inputs` object gets one
/// created.
pub fn inject_input(
    graph: &mut WorkflowGraph,
    class_type: &str,
    field: &str,
    value: Value,
) -> bool {
    let Some(node_id) = find_node(graph, class_type).map(str::to_owned) else {
        return false;
    };
    let Some(node) = graph.get_mut(&node_id).and_then(Value::as_object_mut) else {
        return false;
    };
    let inputs = node
        .entry("inputs")
        .or_insert_with(|| Value::Object(Map::new()));
    if !inputs.is_object() {
        *inputs = Value::Object(Map::new());
    }
    match inputs.as_object_mut() {
        Some(obj) => {
            obj.insert(field.to_string(), value);
            true
        }
        None => false,
    }
}
