//! Node catalog resolution.
//!
//! At boot the renderer's `/object_info` introspection document is fed
//! through [`resolve_catalog`] to discover which concrete node classes to
//! drive and which enum values (checkpoints, samplers, schedulers,
//! adapters) are legal. The result is frozen for the process lifetime.

use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Node class names
// ---------------------------------------------------------------------------

/// Custom checkpoint loader preferred when installed.
const CHECKPOINT_CLASS_CUSTOM: &str = "CheckpointLoaderSimpleWithNoiseSelect";

/// Stock checkpoint loader.
const CHECKPOINT_CLASS_STOCK: &str = "CheckpointLoaderSimple";

/// Fuzzy fallback: any class whose name contains this substring.
const CHECKPOINT_CLASS_FUZZY: &str = "CheckpointLoader";

/// Advanced efficiency sampler, preferred.
const SAMPLER_CLASS_ADVANCED_EFFICIENT: &str = "KSampler Adv. (Efficient)";

/// Efficiency sampler.
const SAMPLER_CLASS_EFFICIENT: &str = "KSampler (Efficient)";

/// Stock sampler. Selecting this changes downstream graph semantics, so it
/// is logged as a warning.
const SAMPLER_CLASS_STOCK: &str = "KSampler";

/// Adapter loader class the adapter list is read from.
const ADAPTER_LOADER_CLASS: &str = "LoraLoader";

// ---------------------------------------------------------------------------
// Option caps
// ---------------------------------------------------------------------------

/// The chat widget shows at most 25 options per dropdown.
pub const WIDGET_OPTION_CAP: usize = 25;

/// Adapter pickers page through at most 100 entries.
pub const ADAPTER_OPTION_CAP: usize = 100;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Legal enum values and resolved node class names, frozen after boot.
#[derive(Debug, Clone)]
pub struct NodeCatalog {
    /// Concrete checkpoint loader class to drive.
    pub checkpoint_class: String,
    /// Concrete sampler class to drive.
    pub sampler_class: String,
    /// Legal checkpoint names, capped at [`WIDGET_OPTION_CAP`].
    pub models: Vec<String>,
    /// Legal sampler names, capped at [`WIDGET_OPTION_CAP`].
    pub samplers: Vec<String>,
    /// Legal scheduler names, capped at [`WIDGET_OPTION_CAP`].
    pub schedulers: Vec<String>,
    /// Legal adapter file names, capped at [`ADAPTER_OPTION_CAP`].
    pub adapters: Vec<String>,
}

impl NodeCatalog {
    pub fn has_model(&self, name: &str) -> bool {
        self.models.iter().any(|m| m == name)
    }

    pub fn has_sampler(&self, name: &str) -> bool {
        self.samplers.iter().any(|s| s == name)
    }

    pub fn has_scheduler(&self, name: &str) -> bool {
        self.schedulers.iter().any(|s| s == name)
    }

    pub fn has_adapter(&self, name: &str) -> bool {
        self.adapters.iter().any(|a| a == name)
    }
}

/// Resolve the node catalog from an `/object_info` document.
///
/// Fails with [`CoreError::Catalog`] if no checkpoint loader class is
/// resolvable or any required enum list is empty.
pub fn resolve_catalog(object_info: &Value) -> Result<NodeCatalog, CoreError> {
    let classes = object_info.as_object().ok_or_else(|| {
        CoreError::Catalog("object_info response is not a JSON object".to_string())
    })?;

    let checkpoint_class = resolve_checkpoint_class(classes)?;
    let sampler_class = resolve_sampler_class(classes)?;

    let models = required_enum(object_info, &checkpoint_class, "ckpt_name")?;
    let samplers = required_enum(object_info, &sampler_class, "sampler_name")?;
    let schedulers = required_enum(object_info, &sampler_class, "scheduler")?;
    // The adapter list may legitimately be empty on installs without
    // adapters; only a missing LoraLoader class is an error.
    let adapters = optional_enum(object_info, ADAPTER_LOADER_CLASS, "lora_name");

    Ok(NodeCatalog {
        checkpoint_class,
        sampler_class,
        models: cap_options(models, WIDGET_OPTION_CAP, "models"),
        samplers: cap_options(samplers, WIDGET_OPTION_CAP, "samplers"),
        schedulers: cap_options(schedulers, WIDGET_OPTION_CAP, "schedulers"),
        adapters: cap_options(adapters, ADAPTER_OPTION_CAP, "adapters"),
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn resolve_checkpoint_class(
    classes: &serde_json::Map<String, Value>,
) -> Result<String, CoreError> {
    if classes.contains_key(CHECKPOINT_CLASS_CUSTOM) {
        return Ok(CHECKPOINT_CLASS_CUSTOM.to_string());
    }
    if classes.contains_key(CHECKPOINT_CLASS_STOCK) {
        return Ok(CHECKPOINT_CLASS_STOCK.to_string());
    }
    if let Some(name) = classes.keys().find(|k| k.contains(CHECKPOINT_CLASS_FUZZY)) {
        tracing::warn!(
            class = %name,
            "No known checkpoint loader installed; using fuzzy match",
        );
        return Ok(name.clone());
    }
    Err(CoreError::Catalog(
        "no checkpoint loader class found in object_info".to_string(),
    ))
}

fn resolve_sampler_class(classes: &serde_json::Map<String, Value>) -> Result<String, CoreError> {
    if classes.contains_key(SAMPLER_CLASS_ADVANCED_EFFICIENT) {
        return Ok(SAMPLER_CLASS_ADVANCED_EFFICIENT.to_string());
    }
    if classes.contains_key(SAMPLER_CLASS_EFFICIENT) {
        return Ok(SAMPLER_CLASS_EFFICIENT.to_string());
    }
    if classes.contains_key(SAMPLER_CLASS_STOCK) {
        tracing::warn!(
            class = SAMPLER_CLASS_STOCK,
            "Efficiency samplers not installed; falling back to the stock sampler",
        );
        return Ok(SAMPLER_CLASS_STOCK.to_string());
    }
    Err(CoreError::Catalog(
        "no sampler class found in object_info".to_string(),
    ))
}

/// Read `input.required.<field>[0]` off a class: a list of legal values.
fn enum_values(object_info: &Value, class: &str, field: &str) -> Option<Vec<String>> {
    let list = object_info
        .get(class)?
        .get("input")?
        .get("required")?
        .get(field)?
        .get(0)?
        .as_array()?;
    Some(
        list.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
    )
}

fn required_enum(object_info: &Value, class: &str, field: &str) -> Result<Vec<String>, CoreError> {
    let values = enum_values(object_info, class, field).unwrap_or_default();
    if values.is_empty() {
        return Err(CoreError::Catalog(format!(
            "class '{class}' exposes no values for '{field}'"
        )));
    }
    Ok(values)
}

fn optional_enum(object_info: &Value, class: &str, field: &str) -> Vec<String> {
    enum_values(object_info, class, field).unwrap_or_default()
}

fn cap_options(mut values: Vec<String>, cap: usize, what: &str) -> Vec<String> {
    if values.len() > cap {
        tracing::warn!(
            total = values.len(),
            cap,
            "Truncating {what} list to the widget option cap",
        );
        values.truncate(cap);
    }
    values
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn class_with_enum(field: &str, values: &[&str]) -> Value {
        json!({
            "input": { "required": { field: [values, {}] } }
        })
    }

    fn sampler_class() -> Value {
        json!({
            "input": {
                "required": {
                    "sampler_name": [["euler", "dpmpp_2m_sde"], {}],
                    "scheduler": [["normal", "karras"], {}],
                }
            }
        })
    }

    fn full_object_info() -> Value {
        json!({
            "CheckpointLoaderSimple": class_with_enum("ckpt_name", &["a.safetensors", "b.safetensors"]),
            "KSampler (Efficient)": sampler_class(),
            "LoraLoader": class_with_enum("lora_name", &["detail.safetensors"]),
        })
    }

    // -- Class preference order --

    #[test]
    fn prefers_custom_checkpoint_loader() {
        let mut info = full_object_info();
        info["CheckpointLoaderSimpleWithNoiseSelect"] =
            class_with_enum("ckpt_name", &["c.safetensors"]);
        let catalog = resolve_catalog(&info).unwrap();
        assert_eq!(catalog.checkpoint_class, "CheckpointLoaderSimpleWithNoiseSelect");
        assert_eq!(catalog.models, vec!["c.safetensors"]);
    }

    #[test]
    fn falls_back_to_stock_checkpoint_loader() {
        let catalog = resolve_catalog(&full_object_info()).unwrap();
        assert_eq!(catalog.checkpoint_class, "CheckpointLoaderSimple");
    }

    #[test]
    fn fuzzy_checkpoint_match_is_last_resort() {
        let info = json!({
            "WeirdCheckpointLoaderXL": class_with_enum("ckpt_name", &["x.safetensors"]),
            "KSampler": sampler_class(),
        });
        let catalog = resolve_catalog(&info).unwrap();
        assert_eq!(catalog.checkpoint_class, "WeirdCheckpointLoaderXL");
    }

    #[test]
    fn missing_checkpoint_loader_is_fatal() {
        let info = json!({ "KSampler": sampler_class() });
        let err = resolve_catalog(&info).unwrap_err();
        assert!(err.to_string().contains("checkpoint loader"));
    }

    #[test]
    fn sampler_preference_order() {
        let mut info = full_object_info();
        info["KSampler Adv. (Efficient)"] = sampler_class();
        let catalog = resolve_catalog(&info).unwrap();
        assert_eq!(catalog.sampler_class, "KSampler Adv. (Efficient)");
    }

    #[test]
    fn stock_sampler_accepted() {
        let info = json!({
            "CheckpointLoaderSimple": class_with_enum("ckpt_name", &["a.safetensors"]),
            "KSampler": sampler_class(),
        });
        let catalog = resolve_catalog(&info).unwrap();
        assert_eq!(catalog.sampler_class, "KSampler");
    }

    // -- Enum extraction --

    #[test]
    fn empty_model_list_is_fatal() {
        let info = json!({
            "CheckpointLoaderSimple": class_with_enum("ckpt_name", &[]),
            "KSampler": sampler_class(),
        });
        assert!(resolve_catalog(&info).is_err());
    }

    #[test]
    fn missing_adapter_loader_yields_empty_adapter_list() {
        let info = json!({
            "CheckpointLoaderSimple": class_with_enum("ckpt_name", &["a.safetensors"]),
            "KSampler": sampler_class(),
        });
        let catalog = resolve_catalog(&info).unwrap();
        assert!(catalog.adapters.is_empty());
    }

    // -- Truncation --

    #[test]
    fn model_list_truncated_to_widget_cap() {
        let models: Vec<String> = (0..26).map(|i| format!("model-{i:02}.safetensors")).collect();
        let refs: Vec<&str> = models.iter().map(String::as_str).collect();
        let info = json!({
            "CheckpointLoaderSimple": class_with_enum("ckpt_name", &refs),
            "KSampler": sampler_class(),
        });
        let catalog = resolve_catalog(&info).unwrap();
        assert_eq!(catalog.models.len(), WIDGET_OPTION_CAP);
        assert_eq!(catalog.models[0], "model-00.safetensors");
        assert_eq!(catalog.models[24], "model-24.safetensors");
    }

    #[test]
    fn adapter_list_truncated_to_adapter_cap() {
        let adapters: Vec<String> = (0..101).map(|i| format!("adapter-{i:03}.safetensors")).collect();
        let refs: Vec<&str> = adapters.iter().map(String::as_str).collect();
        let info = json!({
            "CheckpointLoaderSimple": class_with_enum("ckpt_name", &["a.safetensors"]),
            "KSampler": sampler_class(),
            "LoraLoader": class_with_enum("lora_name", &refs),
        });
        let catalog = resolve_catalog(&info).unwrap();
        assert_eq!(catalog.adapters.len(), ADAPTER_OPTION_CAP);
    }

    // -- Membership helpers --

    #[test]
    fn membership_checks() {
        let catalog = resolve_catalog(&full_object_info()).unwrap();
        assert!(catalog.has_model("a.safetensors"));
        assert!(!catalog.has_model("z.safetensors"));
        assert!(catalog.has_sampler("dpmpp_2m_sde"));
        assert!(catalog.has_scheduler("karras"));
        assert!(catalog.has_adapter("detail.safetensors"));
    }
}
