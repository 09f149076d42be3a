//! Template loading, caching, and validation.

use std::path::PathBuf;
use std::sync::OnceLock;

use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Node ids
//
// The templates address nodes by fixed numeric-string ids. These are the
// ids the binder drives; validation guarantees they are present before any
// job runs.
// ---------------------------------------------------------------------------

pub mod nodes {
    /// Empty-latent node carrying `width` / `height`.
    pub const LATENT: &str = "135";
    /// Checkpoint loader carrying `ckpt_name`.
    pub const CHECKPOINT: &str = "152";
    /// Seed source carrying `seed`.
    pub const SEED: &str = "256";
    /// Positive prompt encoder carrying `text`.
    pub const POSITIVE: &str = "72";
    /// Negative prompt encoder carrying `text`.
    pub const NEGATIVE: &str = "81";
    /// Primary sampler: `sampler_name`, `scheduler`, `steps`, `cfg`.
    pub const SAMPLER_PRIMARY: &str = "271";
    /// Aux samplers take `sampler_name` / `scheduler` only.
    pub const SAMPLERS_AUX: [&str; 3] = ["281", "291", "301"];

    /// Upscale: source image loader carrying `image`.
    pub const UPSCALE_LOAD_IMAGE: &str = "11";
    /// Upscale: model loader carrying `model_name`.
    pub const UPSCALE_MODEL: &str = "14";
    /// Upscale (ultimate only): positive encoder carrying `text`.
    pub const UPSCALE_POSITIVE: &str = "6";
    /// Upscale (ultimate only): negative encoder carrying `text`.
    pub const UPSCALE_NEGATIVE: &str = "7";
}

/// One row of a required-fields table: node id, human role, fields.
type RequiredNode = (&'static str, &'static str, &'static [&'static str]);

/// Required nodes and fields for the base generation template.
const REQUIRED_BASE: &[RequiredNode] = &[
    (nodes::LATENT, "latent size", &["width", "height"]),
    (nodes::CHECKPOINT, "checkpoint", &["ckpt_name"]),
    (nodes::SEED, "seed", &["seed"]),
    (nodes::POSITIVE, "positive encoder", &["text"]),
    (nodes::NEGATIVE, "negative encoder", &["text"]),
    (
        nodes::SAMPLER_PRIMARY,
        "primary sampler",
        &["sampler_name", "scheduler", "steps", "cfg"],
    ),
    (nodes::SAMPLERS_AUX[0], "aux sampler", &["sampler_name", "scheduler"]),
    (nodes::SAMPLERS_AUX[1], "aux sampler", &["sampler_name", "scheduler"]),
    (nodes::SAMPLERS_AUX[2], "aux sampler", &["sampler_name", "scheduler"]),
];

/// Required nodes for the simple upscale template.
const REQUIRED_UPSCALE_SIMPLE: &[RequiredNode] = &[
    (nodes::UPSCALE_LOAD_IMAGE, "source image loader", &["image"]),
    (nodes::UPSCALE_MODEL, "upscale model loader", &["model_name"]),
];

/// Required nodes for the ultimate upscale template.
const REQUIRED_UPSCALE_ULTIMATE: &[RequiredNode] = &[
    (nodes::UPSCALE_LOAD_IMAGE, "source image loader", &["image"]),
    (nodes::UPSCALE_MODEL, "upscale model loader", &["model_name"]),
    (nodes::UPSCALE_POSITIVE, "positive encoder", &["text"]),
    (nodes::UPSCALE_NEGATIVE, "negative encoder", &["text"]),
];

/// Which upscale template is active, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpscaleKind {
    /// Tiled upscale with prompt re-encoding.
    Ultimate,
    /// Plain model upscale.
    Simple,
}

impl UpscaleKind {
    fn required(self) -> &'static [RequiredNode] {
        match self {
            UpscaleKind::Ultimate => REQUIRED_UPSCALE_ULTIMATE,
            UpscaleKind::Simple => REQUIRED_UPSCALE_SIMPLE,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            UpscaleKind::Ultimate => "upscale_ultimate.json",
            UpscaleKind::Simple => "upscale_simple.json",
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate the base generation template.
///
/// Short-circuits at the first missing node or field with a diagnostic
/// naming both.
pub fn validate_base_template(graph: &Value) -> Result<(), CoreError> {
    validate_required(graph, REQUIRED_BASE)
}

/// Validate the active upscale template against its required-fields table.
pub fn validate_upscale_template(kind: UpscaleKind, graph: &Value) -> Result<(), CoreError> {
    validate_required(graph, kind.required())
}

fn validate_required(graph: &Value, required: &[RequiredNode]) -> Result<(), CoreError> {
    let map = graph
        .as_object()
        .ok_or_else(|| CoreError::Template("template is not a JSON object".to_string()))?;

    for &(node_id, role, fields) in required {
        let node = map.get(node_id).ok_or_else(|| {
            CoreError::Template(format!("missing node {node_id} ({role})"))
        })?;
        let inputs = node.get("inputs").and_then(Value::as_object).ok_or_else(|| {
            CoreError::Template(format!("node {node_id} ({role}) has no inputs object"))
        })?;
        for &field in fields {
            match inputs.get(field) {
                Some(value) if !value.is_null() => {}
                _ => {
                    return Err(CoreError::Template(format!(
                        "node {node_id} ({role}) is missing required field '{field}'"
                    )));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Template store
// ---------------------------------------------------------------------------

/// On-disk templates, read once and cached as source text. Graphs are
/// re-parsed per bind so callers always receive an independent tree.
#[derive(Debug)]
pub struct TemplateStore {
    base_path: PathBuf,
    upscale_path: PathBuf,
    upscale_kind: UpscaleKind,
    base_src: OnceLock<String>,
    upscale_src: OnceLock<String>,
}

/// File name of the base generation template.
pub const BASE_TEMPLATE_FILE: &str = "generate.json";

impl TemplateStore {
    /// Point the store at a workflows directory. Nothing is read until the
    /// first graph request.
    pub fn new(workflows_dir: impl Into<PathBuf>, upscale_kind: UpscaleKind) -> Self {
        let dir = workflows_dir.into();
        Self {
            base_path: dir.join(BASE_TEMPLATE_FILE),
            upscale_path: dir.join(upscale_kind.file_name()),
            upscale_kind,
            base_src: OnceLock::new(),
            upscale_src: OnceLock::new(),
        }
    }

    pub fn upscale_kind(&self) -> UpscaleKind {
        self.upscale_kind
    }

    /// Parse a fresh copy of the base generation graph.
    pub fn base_graph(&self) -> Result<Value, CoreError> {
        let src = self.source(&self.base_path, &self.base_src)?;
        parse_graph(src, &self.base_path)
    }

    /// Parse a fresh copy of the active upscale graph.
    pub fn upscale_graph(&self) -> Result<Value, CoreError> {
        let src = self.source(&self.upscale_path, &self.upscale_src)?;
        parse_graph(src, &self.upscale_path)
    }

    /// Load and validate both templates. Called once at boot so template
    /// drift is a startup diagnostic rather than a runtime failure.
    pub fn validate_all(&self) -> Result<(), CoreError> {
        validate_base_template(&self.base_graph()?)?;
        validate_upscale_template(self.upscale_kind, &self.upscale_graph()?)?;
        Ok(())
    }

    fn source<'a>(
        &self,
        path: &PathBuf,
        cell: &'a OnceLock<String>,
    ) -> Result<&'a str, CoreError> {
        if let Some(src) = cell.get() {
            return Ok(src);
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Template(format!("failed to read template {}: {e}", path.display()))
        })?;
        // A concurrent first read may have won the race; either value is
        // the same file content.
        Ok(cell.get_or_init(|| text))
    }
}

fn parse_graph(src: &str, path: &PathBuf) -> Result<Value, CoreError> {
    serde_json::from_str(src).map_err(|e| {
        CoreError::Template(format!("template {} is not valid JSON: {e}", path.display()))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::test_fixtures::{base_template, upscale_template_ultimate};
    use serde_json::json;

    // -- Validation --

    #[test]
    fn valid_base_template_accepted() {
        assert!(validate_base_template(&base_template()).is_ok());
    }

    #[test]
    fn missing_node_named_in_diagnostic() {
        let mut graph = base_template();
        graph.as_object_mut().unwrap().remove(nodes::CHECKPOINT);
        let err = validate_base_template(&graph).unwrap_err().to_string();
        assert!(err.contains("152"), "got: {err}");
        assert!(err.contains("checkpoint"), "got: {err}");
    }

    #[test]
    fn missing_field_named_in_diagnostic() {
        let mut graph = base_template();
        graph[nodes::SAMPLER_PRIMARY]["inputs"]
            .as_object_mut()
            .unwrap()
            .remove("cfg");
        let err = validate_base_template(&graph).unwrap_err().to_string();
        assert!(err.contains("271"), "got: {err}");
        assert!(err.contains("cfg"), "got: {err}");
    }

    #[test]
    fn null_field_treated_as_missing() {
        let mut graph = base_template();
        graph[nodes::SEED]["inputs"]["seed"] = Value::Null;
        assert!(validate_base_template(&graph).is_err());
    }

    #[test]
    fn non_object_template_rejected() {
        assert!(validate_base_template(&json!(["not", "a", "graph"])).is_err());
    }

    #[test]
    fn upscale_tables_differ_by_kind() {
        let ultimate = upscale_template_ultimate();
        assert!(validate_upscale_template(UpscaleKind::Ultimate, &ultimate).is_ok());
        assert!(validate_upscale_template(UpscaleKind::Simple, &ultimate).is_ok());

        // Strip the prompt encoders: still fine for simple, fatal for ultimate.
        let mut stripped = upscale_template_ultimate();
        stripped.as_object_mut().unwrap().remove(nodes::UPSCALE_POSITIVE);
        assert!(validate_upscale_template(UpscaleKind::Simple, &stripped).is_ok());
        assert!(validate_upscale_template(UpscaleKind::Ultimate, &stripped).is_err());
    }

    // -- Template store --

    #[test]
    fn store_reads_and_caches_source_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(BASE_TEMPLATE_FILE);
        std::fs::write(&path, serde_json::to_string(&base_template()).unwrap()).unwrap();

        let store = TemplateStore::new(dir.path(), UpscaleKind::Simple);
        let first = store.base_graph().unwrap();
        assert!(validate_base_template(&first).is_ok());

        // Rewriting the file after the first read must not change what the
        // store serves: the source text is cached.
        std::fs::write(&path, "{}").unwrap();
        let second = store.base_graph().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn store_yields_independent_copies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(BASE_TEMPLATE_FILE),
            serde_json::to_string(&base_template()).unwrap(),
        )
        .unwrap();

        let store = TemplateStore::new(dir.path(), UpscaleKind::Simple);
        let mut a = store.base_graph().unwrap();
        a[nodes::SEED]["inputs"]["seed"] = json!(7);
        let b = store.base_graph().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_file_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::new(dir.path(), UpscaleKind::Simple);
        let err = store.base_graph().unwrap_err();
        assert!(matches!(err, CoreError::Template(_)));
    }

    #[test]
    fn validate_all_checks_both_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(BASE_TEMPLATE_FILE),
            serde_json::to_string(&base_template()).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join(UpscaleKind::Ultimate.file_name()),
            serde_json::to_string(&upscale_template_ultimate()).unwrap(),
        )
        .unwrap();

        let store = TemplateStore::new(dir.path(), UpscaleKind::Ultimate);
        assert!(store.validate_all().is_ok());
    }
}
