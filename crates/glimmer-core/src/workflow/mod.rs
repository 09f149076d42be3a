//! Workflow graph templates and the per-job bind transform.
//!
//! A template is a JSON mapping from node id to `{class_type, inputs}`
//! where inputs hold literals or `[source_node_id, output_index]`
//! references. Templates are read from disk once and cached as source
//! text; every bind re-parses and deep-clones so jobs never share graph
//! state.

pub mod bind;
pub mod template;

pub use bind::{bind_generation, bind_upscale, UpscaleBind, ADAPTER_SLOT_BASE};
pub use template::{
    validate_base_template, validate_upscale_template, TemplateStore, UpscaleKind,
};
