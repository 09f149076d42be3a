//! Per-user draft sessions for the interactive request form.
//!
//! Drafts live only in process memory and are keyed by requester id. They
//! are created by the entry command (or seeded from a completed job for
//! the edit flow), mutated piecemeal as form events arrive, and destroyed
//! on successful submission. A missing draft is a user-facing "session
//! expired" condition, never an internal error.

use std::collections::HashMap;

use crate::catalog::NodeCatalog;
use crate::params::{
    random_seed, AdapterSelection, GenerationRequest, SizePreset, DEFAULT_CFG, DEFAULT_STEPS,
    MAX_ADAPTERS, PREFERRED_SAMPLER, PREFERRED_SCHEDULER,
};

/// The mutable subset of a job a user edits before submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub model: String,
    pub sampler: String,
    pub scheduler: String,
    pub steps: i64,
    pub cfg: f64,
    pub seed: i64,
    pub size: SizePreset,
    pub positive_prompt: String,
    pub negative_prompt: String,
    /// Fixed adapter slots; `None` means the slot is empty.
    pub adapters: [Option<AdapterSelection>; MAX_ADAPTERS],
}

impl Draft {
    /// A fresh draft populated with catalog-aware defaults.
    pub fn new(catalog: &NodeCatalog, default_negative: &str) -> Self {
        Self {
            model: catalog.models.first().cloned().unwrap_or_default(),
            sampler: pick_preferred(&catalog.samplers, PREFERRED_SAMPLER),
            scheduler: pick_preferred(&catalog.schedulers, PREFERRED_SCHEDULER),
            steps: DEFAULT_STEPS,
            cfg: DEFAULT_CFG,
            seed: random_seed(),
            size: SizePreset::Portrait,
            positive_prompt: String::new(),
            negative_prompt: default_negative.to_string(),
            adapters: Default::default(),
        }
    }

    /// The active adapter selections, in slot order.
    pub fn active_adapters(&self) -> Vec<AdapterSelection> {
        self.adapters.iter().flatten().cloned().collect()
    }

    /// Snapshot this draft into a bindable request.
    pub fn to_request(&self) -> GenerationRequest {
        GenerationRequest {
            model: self.model.clone(),
            sampler: self.sampler.clone(),
            scheduler: self.scheduler.clone(),
            steps: self.steps,
            cfg: self.cfg,
            seed: self.seed,
            size: self.size,
            positive_prompt: self.positive_prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            adapters: self.active_adapters(),
        }
    }
}

fn pick_preferred(options: &[String], preferred: &str) -> String {
    if options.iter().any(|o| o == preferred) {
        preferred.to_string()
    } else {
        options.first().cloned().unwrap_or_default()
    }
}

/// In-memory map from requester id to draft.
#[derive(Debug, Default)]
pub struct DraftStore {
    drafts: HashMap<String, Draft>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the requester's draft with fresh defaults.
    pub fn init(
        &mut self,
        requester_id: &str,
        catalog: &NodeCatalog,
        default_negative: &str,
    ) -> &mut Draft {
        self.drafts
            .insert(requester_id.to_string(), Draft::new(catalog, default_negative));
        self.drafts.get_mut(requester_id).unwrap()
    }

    /// Seed the requester's draft from an existing draft value (the edit
    /// flow builds this from a completed job row).
    pub fn init_from(&mut self, requester_id: &str, draft: Draft) -> &mut Draft {
        self.drafts.insert(requester_id.to_string(), draft);
        self.drafts.get_mut(requester_id).unwrap()
    }

    pub fn get(&self, requester_id: &str) -> Option<&Draft> {
        self.drafts.get(requester_id)
    }

    pub fn get_mut(&mut self, requester_id: &str) -> Option<&mut Draft> {
        self.drafts.get_mut(requester_id)
    }

    /// Destroy the requester's draft (successful submission or expiry).
    pub fn delete(&mut self, requester_id: &str) {
        self.drafts.remove(requester_id);
    }

    pub fn len(&self) -> usize {
        self.drafts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> NodeCatalog {
        NodeCatalog {
            checkpoint_class: "CheckpointLoaderSimple".to_string(),
            sampler_class: "KSampler (Efficient)".to_string(),
            models: vec!["first.safetensors".to_string(), "second.safetensors".to_string()],
            samplers: vec!["euler".to_string(), "dpmpp_2m_sde".to_string()],
            schedulers: vec!["normal".to_string(), "karras".to_string()],
            adapters: vec!["detail.safetensors".to_string()],
        }
    }

    // -- Defaults --

    #[test]
    fn fresh_draft_uses_first_model_and_preferred_sampler() {
        let draft = Draft::new(&catalog(), "lowres");
        assert_eq!(draft.model, "first.safetensors");
        assert_eq!(draft.sampler, "dpmpp_2m_sde");
        assert_eq!(draft.scheduler, "karras");
        assert_eq!(draft.steps, DEFAULT_STEPS);
        assert_eq!(draft.cfg, DEFAULT_CFG);
        assert_eq!(draft.size, SizePreset::Portrait);
        assert!(draft.positive_prompt.is_empty());
        assert_eq!(draft.negative_prompt, "lowres");
        assert!(draft.active_adapters().is_empty());
    }

    #[test]
    fn preferred_sampler_falls_back_to_first() {
        let mut cat = catalog();
        cat.samplers = vec!["euler".to_string(), "heun".to_string()];
        let draft = Draft::new(&cat, "");
        assert_eq!(draft.sampler, "euler");
    }

    #[test]
    fn fresh_drafts_get_distinct_seeds() {
        let cat = catalog();
        // Collision over five draws is astronomically unlikely; any pair
        // differing proves the seed is not constant.
        let seeds: Vec<i64> = (0..5).map(|_| Draft::new(&cat, "").seed).collect();
        assert!(seeds.windows(2).any(|w| w[0] != w[1]));
    }

    // -- Store lifecycle --

    #[test]
    fn init_get_delete_cycle() {
        let mut store = DraftStore::new();
        assert!(store.get("u1").is_none());

        store.init("u1", &catalog(), "");
        assert!(store.get("u1").is_some());

        store.delete("u1");
        assert!(store.get("u1").is_none());
    }

    #[test]
    fn init_replaces_existing_draft() {
        let mut store = DraftStore::new();
        store.init("u1", &catalog(), "");
        store.get_mut("u1").unwrap().positive_prompt = "a cat".to_string();

        store.init("u1", &catalog(), "");
        assert!(store.get("u1").unwrap().positive_prompt.is_empty());
    }

    #[test]
    fn drafts_are_per_requester() {
        let mut store = DraftStore::new();
        store.init("u1", &catalog(), "");
        store.init("u2", &catalog(), "");
        store.get_mut("u1").unwrap().steps = 99;
        assert_eq!(store.get("u2").unwrap().steps, DEFAULT_STEPS);
    }

    // -- Request snapshot --

    #[test]
    fn to_request_flattens_active_adapters() {
        let mut draft = Draft::new(&catalog(), "");
        draft.positive_prompt = "a cat".to_string();
        draft.adapters[1] = Some(AdapterSelection {
            name: "detail.safetensors".to_string(),
            strength: 0.8,
            trigger_words: vec!["detailed".to_string()],
        });

        let request = draft.to_request();
        assert_eq!(request.adapters.len(), 1);
        assert_eq!(request.adapters[0].name, "detail.safetensors");
        assert_eq!(request.positive_prompt, "a cat");
    }
}
