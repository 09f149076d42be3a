//! The bind transform: template graph + job parameters -> submittable graph.
//!
//! Binding validates the template, deep-clones it, optionally splices a
//! chained adapter subgraph between the checkpoint loader and every node
//! that consumed its model/clip outputs, then writes the per-job values
//! into the fixed node set. The input template is never mutated.

use serde_json::{json, Value};

use crate::error::CoreError;
use crate::params::{AdapterSelection, GenerationRequest, MAX_ADAPTERS};

use super::template::{
    nodes, validate_base_template, validate_upscale_template, UpscaleKind,
};

/// First synthetic node id for injected adapter slots. Slot k gets
/// `ADAPTER_SLOT_BASE + k`, far outside the template's id range so the
/// re-routing pass can skip freshly inserted nodes unambiguously.
pub const ADAPTER_SLOT_BASE: u64 = 2001;

/// Class type of injected adapter chain nodes.
const ADAPTER_LOADER_CLASS: &str = "LoraLoader";

/// Bind a generation request into a fresh copy of the base template.
pub fn bind_generation(
    template: &Value,
    request: &GenerationRequest,
) -> Result<Value, CoreError> {
    validate_base_template(template)?;
    if request.adapters.len() > MAX_ADAPTERS {
        return Err(CoreError::Bind(format!(
            "at most {MAX_ADAPTERS} adapters may be bound, got {}",
            request.adapters.len()
        )));
    }

    let mut graph = template.clone();

    if !request.adapters.is_empty() {
        inject_adapter_chain(&mut graph, &request.adapters)?;
    }

    let (width, height) = request.size.dimensions();
    set_input(&mut graph, nodes::LATENT, "width", json!(width))?;
    set_input(&mut graph, nodes::LATENT, "height", json!(height))?;

    set_input(&mut graph, nodes::CHECKPOINT, "ckpt_name", json!(request.model))?;
    set_input(&mut graph, nodes::SEED, "seed", json!(request.seed))?;

    set_input(
        &mut graph,
        nodes::POSITIVE,
        "text",
        json!(positive_with_triggers(request)),
    )?;
    set_input(&mut graph, nodes::NEGATIVE, "text", json!(request.negative_prompt))?;

    set_input(&mut graph, nodes::SAMPLER_PRIMARY, "sampler_name", json!(request.sampler))?;
    set_input(&mut graph, nodes::SAMPLER_PRIMARY, "scheduler", json!(request.scheduler))?;
    set_input(&mut graph, nodes::SAMPLER_PRIMARY, "steps", json!(request.steps))?;
    set_input(&mut graph, nodes::SAMPLER_PRIMARY, "cfg", json!(request.cfg))?;

    // Aux samplers take sampler_name and scheduler only; steps and cfg
    // belong to the primary sampler node exclusively.
    for aux in nodes::SAMPLERS_AUX {
        set_input(&mut graph, aux, "sampler_name", json!(request.sampler))?;
        set_input(&mut graph, aux, "scheduler", json!(request.scheduler))?;
    }

    Ok(graph)
}

/// Per-job values written into the active upscale template.
#[derive(Debug, Clone)]
pub struct UpscaleBind {
    /// Renderer-side name of the uploaded source image (as returned by the
    /// upload endpoint, which may differ from the requested filename).
    pub source_image: String,
    pub upscale_model: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
}

/// Bind an upscale request into a fresh copy of the active upscale template.
pub fn bind_upscale(
    kind: UpscaleKind,
    template: &Value,
    params: &UpscaleBind,
) -> Result<Value, CoreError> {
    validate_upscale_template(kind, template)?;
    let mut graph = template.clone();

    set_input(&mut graph, nodes::UPSCALE_LOAD_IMAGE, "image", json!(params.source_image))?;
    set_input(&mut graph, nodes::UPSCALE_MODEL, "model_name", json!(params.upscale_model))?;

    if kind == UpscaleKind::Ultimate {
        set_input(&mut graph, nodes::UPSCALE_POSITIVE, "text", json!(params.positive_prompt))?;
        set_input(&mut graph, nodes::UPSCALE_NEGATIVE, "text", json!(params.negative_prompt))?;
    }

    Ok(graph)
}

// ---------------------------------------------------------------------------
// Adapter chain injection
// ---------------------------------------------------------------------------

/// Splice the adapter chain between the checkpoint loader and its
/// consumers.
///
/// Slot 0 reads model/clip from the checkpoint's outputs 0 and 1; slot k
/// reads from slot k-1. Afterwards every pre-existing reference to the
/// checkpoint's outputs 0/1 is rerouted to the last slot; references to
/// other output indices (e.g. the VAE on output 2) are left alone.
fn inject_adapter_chain(
    graph: &mut Value,
    adapters: &[AdapterSelection],
) -> Result<(), CoreError> {
    let map = graph
        .as_object_mut()
        .ok_or_else(|| CoreError::Bind("graph is not a JSON object".to_string()))?;

    let mut inserted: Vec<String> = Vec::with_capacity(adapters.len());
    for (slot, adapter) in adapters.iter().enumerate() {
        let id = (ADAPTER_SLOT_BASE + slot as u64).to_string();
        let source = if slot == 0 {
            nodes::CHECKPOINT.to_string()
        } else {
            (ADAPTER_SLOT_BASE + slot as u64 - 1).to_string()
        };
        map.insert(
            id.clone(),
            json!({
                "class_type": ADAPTER_LOADER_CLASS,
                "inputs": {
                    "lora_name": adapter.name,
                    "strength_model": adapter.strength,
                    "strength_clip": adapter.strength,
                    "model": [source, 0],
                    "clip": [source, 1],
                }
            }),
        );
        inserted.push(id);
    }

    let last = inserted
        .last()
        .cloned()
        .ok_or_else(|| CoreError::Bind("adapter chain is empty".to_string()))?;

    for (node_id, node) in map.iter_mut() {
        if inserted.contains(node_id) {
            continue;
        }
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };
        for value in inputs.values_mut() {
            rewire_checkpoint_ref(value, &last);
        }
    }

    Ok(())
}

/// If `value` is a `[source, index]` reference to the checkpoint node's
/// output 0 or 1, point it at `to_id` instead. Source ids are matched both
/// as strings and as numbers, since templates use either form.
fn rewire_checkpoint_ref(value: &mut Value, to_id: &str) {
    let Some(parts) = value.as_array() else {
        return;
    };
    if parts.len() != 2 {
        return;
    }
    let source_is_checkpoint = match &parts[0] {
        Value::String(s) => s == nodes::CHECKPOINT,
        Value::Number(n) => n.as_u64().is_some_and(|n| n.to_string() == nodes::CHECKPOINT),
        _ => false,
    };
    let Some(index) = parts[1].as_u64() else {
        return;
    };
    if source_is_checkpoint && index <= 1 {
        *value = json!([to_id, index]);
    }
}

// ---------------------------------------------------------------------------
// Field writes
// ---------------------------------------------------------------------------

/// The positive encoder text: user prompt plus the flattened trigger words
/// of all active adapters, space-joined and trimmed. Falls back to the
/// user prompt alone when the combination trims to nothing.
fn positive_with_triggers(request: &GenerationRequest) -> String {
    let triggers = request
        .adapters
        .iter()
        .flat_map(|a| a.trigger_words.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    let combined = format!("{} {}", request.positive_prompt, triggers)
        .trim()
        .to_string();
    if combined.is_empty() {
        request.positive_prompt.clone()
    } else {
        combined
    }
}

fn set_input(
    graph: &mut Value,
    node_id: &str,
    field: &str,
    value: Value,
) -> Result<(), CoreError> {
    let inputs = graph
        .get_mut(node_id)
        .and_then(|n| n.get_mut("inputs"))
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            CoreError::Bind(format!("node {node_id} has no inputs to receive '{field}'"))
        })?;
    inputs.insert(field.to_string(), value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
