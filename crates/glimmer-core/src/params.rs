//! Generation request parameters: types, ranges, and validation.
//!
//! Every user-editable field has a fixed legal range. Validation functions
//! return [`CoreError::Validation`] with a message naming the offending
//! field so the caller can surface it verbatim.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Parameter ranges
// ---------------------------------------------------------------------------

/// Minimum sampling steps.
pub const MIN_STEPS: i64 = 1;
/// Maximum sampling steps.
pub const MAX_STEPS: i64 = 150;

/// Minimum CFG scale.
pub const MIN_CFG: f64 = 1.0;
/// Maximum CFG scale.
pub const MAX_CFG: f64 = 30.0;

/// Seeds are unsigned 32-bit values, stored widened to `i64`.
pub const MAX_SEED: i64 = u32::MAX as i64;

/// Minimum adapter strength.
pub const MIN_ADAPTER_STRENGTH: f64 = 0.1;
/// Maximum adapter strength.
pub const MAX_ADAPTER_STRENGTH: f64 = 3.0;

/// Maximum number of adapter slots per request.
pub const MAX_ADAPTERS: usize = 4;

// ---------------------------------------------------------------------------
// Draft defaults
// ---------------------------------------------------------------------------

/// Default sampling steps for a fresh draft.
pub const DEFAULT_STEPS: i64 = 28;
/// Default CFG scale for a fresh draft.
pub const DEFAULT_CFG: f64 = 5.0;
/// Sampler preferred for fresh drafts when the catalog offers it.
pub const PREFERRED_SAMPLER: &str = "dpmpp_2m_sde";
/// Scheduler preferred for fresh drafts when the catalog offers it.
pub const PREFERRED_SCHEDULER: &str = "karras";

// ---------------------------------------------------------------------------
// Size presets
// ---------------------------------------------------------------------------

/// Output aspect presets. Each maps to a fixed latent resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizePreset {
    Portrait,
    Square,
    Landscape,
}

impl SizePreset {
    /// Latent (width, height) in pixels for this preset.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            SizePreset::Portrait => (832, 1216),
            SizePreset::Square => (1024, 1024),
            SizePreset::Landscape => (1216, 832),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SizePreset::Portrait => "portrait",
            SizePreset::Square => "square",
            SizePreset::Landscape => "landscape",
        }
    }

    /// Strict parse for dropdown values.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "portrait" => Some(SizePreset::Portrait),
            "square" => Some(SizePreset::Square),
            "landscape" => Some(SizePreset::Landscape),
            _ => None,
        }
    }

    /// Lenient parse used at bind time: unknown values fall back to portrait.
    pub fn from_str_lossy(s: &str) -> Self {
        Self::from_str_opt(s).unwrap_or(SizePreset::Portrait)
    }
}

impl std::fmt::Display for SizePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// One selected adapter: file name, strength, and the trigger words
/// resolved at selection time. Trigger words exist only in memory; the
/// persisted form keeps name and strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterSelection {
    pub name: String,
    pub strength: f64,
    #[serde(default)]
    pub trigger_words: Vec<String>,
}

/// A fully-specified generation request, ready for binding.
///
/// `adapters` holds only the active selections, in slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub sampler: String,
    pub scheduler: String,
    pub steps: i64,
    pub cfg: f64,
    pub seed: i64,
    pub size: SizePreset,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub adapters: Vec<AdapterSelection>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate sampling steps (1..=150).
pub fn validate_steps(steps: i64) -> Result<(), CoreError> {
    if (MIN_STEPS..=MAX_STEPS).contains(&steps) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "steps must be between {MIN_STEPS} and {MAX_STEPS}, got {steps}"
        )))
    }
}

/// Validate CFG scale (1.0..=30.0).
pub fn validate_cfg(cfg: f64) -> Result<(), CoreError> {
    if (MIN_CFG..=MAX_CFG).contains(&cfg) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "cfg must be between {MIN_CFG} and {MAX_CFG}, got {cfg}"
        )))
    }
}

/// Validate a seed value (0..=2^32-1).
pub fn validate_seed(seed: i64) -> Result<(), CoreError> {
    if (0..=MAX_SEED).contains(&seed) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "seed must be between 0 and {MAX_SEED}, got {seed}"
        )))
    }
}

/// Validate an adapter strength (0.1..=3.0).
pub fn validate_adapter_strength(strength: f64) -> Result<(), CoreError> {
    if (MIN_ADAPTER_STRENGTH..=MAX_ADAPTER_STRENGTH).contains(&strength) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "adapter strength must be between {MIN_ADAPTER_STRENGTH} and \
             {MAX_ADAPTER_STRENGTH}, got {strength}"
        )))
    }
}

/// Draw a fresh random seed, uniform over the full legal range.
pub fn random_seed() -> i64 {
    use rand::Rng;
    rand::rng().random_range(0..=MAX_SEED)
}

/// Resolve a user-supplied seed string.
///
/// Empty input or the literal `random` rerolls; anything else must parse
/// as an integer inside the legal range.
pub fn resolve_seed(input: &str) -> Result<i64, CoreError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("random") {
        return Ok(random_seed());
    }
    let seed: i64 = trimmed.parse().map_err(|_| {
        CoreError::Validation(format!("seed must be an integer or 'random', got '{trimmed}'"))
    })?;
    validate_seed(seed)?;
    Ok(seed)
}

/// Validate a complete request prior to persisting it.
pub fn validate_request(request: &GenerationRequest) -> Result<(), CoreError> {
    validate_steps(request.steps)?;
    validate_cfg(request.cfg)?;
    validate_seed(request.seed)?;
    if request.positive_prompt.trim().is_empty() {
        return Err(CoreError::Validation(
            "positive prompt must not be empty".to_string(),
        ));
    }
    if request.adapters.len() > MAX_ADAPTERS {
        return Err(CoreError::Validation(format!(
            "at most {MAX_ADAPTERS} adapters may be selected, got {}",
            request.adapters.len()
        )));
    }
    for adapter in &request.adapters {
        validate_adapter_strength(adapter.strength)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "model.safetensors".to_string(),
            sampler: "dpmpp_2m_sde".to_string(),
            scheduler: "karras".to_string(),
            steps: 28,
            cfg: 5.0,
            seed: 42,
            size: SizePreset::Portrait,
            positive_prompt: "a cat".to_string(),
            negative_prompt: String::new(),
            adapters: Vec::new(),
        }
    }

    // -- Steps boundaries --

    #[test]
    fn steps_below_minimum_rejected() {
        assert!(validate_steps(0).is_err());
    }

    #[test]
    fn steps_at_bounds_accepted() {
        assert!(validate_steps(1).is_ok());
        assert!(validate_steps(150).is_ok());
    }

    #[test]
    fn steps_above_maximum_rejected() {
        assert!(validate_steps(151).is_err());
    }

    // -- CFG boundaries --

    #[test]
    fn cfg_below_minimum_rejected() {
        assert!(validate_cfg(0.9).is_err());
    }

    #[test]
    fn cfg_at_bounds_accepted() {
        assert!(validate_cfg(1.0).is_ok());
        assert!(validate_cfg(30.0).is_ok());
    }

    #[test]
    fn cfg_above_maximum_rejected() {
        assert!(validate_cfg(30.1).is_err());
    }

    // -- Seed boundaries --

    #[test]
    fn seed_boundaries() {
        assert!(validate_seed(-1).is_err());
        assert!(validate_seed(0).is_ok());
        assert!(validate_seed(4_294_967_295).is_ok());
        assert!(validate_seed(4_294_967_296).is_err());
    }

    #[test]
    fn seed_resolution_rerolls_on_empty_and_random() {
        for input in ["", "  ", "random", "RANDOM"] {
            let seed = resolve_seed(input).unwrap();
            assert!((0..=MAX_SEED).contains(&seed), "input {input:?} gave {seed}");
        }
    }

    #[test]
    fn seed_resolution_accepts_literal() {
        assert_eq!(resolve_seed("42").unwrap(), 42);
        assert_eq!(resolve_seed(" 42 ").unwrap(), 42);
    }

    #[test]
    fn seed_resolution_rejects_garbage_and_out_of_range() {
        assert!(resolve_seed("not-a-number").is_err());
        assert!(resolve_seed("-1").is_err());
        assert!(resolve_seed("4294967296").is_err());
    }

    // -- Adapter strength --

    #[test]
    fn adapter_strength_boundaries() {
        assert!(validate_adapter_strength(0.09).is_err());
        assert!(validate_adapter_strength(0.1).is_ok());
        assert!(validate_adapter_strength(3.0).is_ok());
        assert!(validate_adapter_strength(3.1).is_err());
    }

    // -- Size presets --

    #[test]
    fn size_dimensions() {
        assert_eq!(SizePreset::Portrait.dimensions(), (832, 1216));
        assert_eq!(SizePreset::Square.dimensions(), (1024, 1024));
        assert_eq!(SizePreset::Landscape.dimensions(), (1216, 832));
    }

    #[test]
    fn size_lossy_parse_defaults_to_portrait() {
        assert_eq!(SizePreset::from_str_lossy("landscape"), SizePreset::Landscape);
        assert_eq!(SizePreset::from_str_lossy("banana"), SizePreset::Portrait);
    }

    // -- Full request --

    #[test]
    fn valid_request_accepted() {
        assert!(validate_request(&request()).is_ok());
    }

    #[test]
    fn empty_positive_prompt_rejected() {
        let mut r = request();
        r.positive_prompt = "   ".to_string();
        assert!(validate_request(&r).is_err());
    }

    #[test]
    fn too_many_adapters_rejected() {
        let mut r = request();
        r.adapters = (0..5)
            .map(|i| AdapterSelection {
                name: format!("adapter-{i}.safetensors"),
                strength: 1.0,
                trigger_words: Vec::new(),
            })
            .collect();
        assert!(validate_request(&r).is_err());
    }

    #[test]
    fn adapter_strength_checked_in_request() {
        let mut r = request();
        r.adapters = vec![AdapterSelection {
            name: "a.safetensors".to_string(),
            strength: 5.0,
            trigger_words: Vec::new(),
        }];
        assert!(validate_request(&r).is_err());
    }
}
