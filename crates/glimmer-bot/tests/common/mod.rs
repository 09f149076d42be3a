//! Shared fixtures: mock gateway, mock renderer, template files, config.
//!
//! Each test binary compiles this module independently and uses a
//! different subset of it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use glimmer_bot::config::Config;
use glimmer_bot::gateway::{
    ChatGateway, EphemeralReplyToken, GatewayError, InteractionContext, OutboundMessage,
};
use glimmer_core::catalog::NodeCatalog;
use glimmer_core::params::{GenerationRequest, SizePreset};
use glimmer_core::workflow::UpscaleKind;
use glimmer_db::models::NewJob;
use glimmer_renderer::api::{
    HistoryEntry, RendererError, RendererTransport, UploadedImage,
};
use glimmer_renderer::triggers::TriggerLookup;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Gateway mock
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockGateway {
    pub posts: Mutex<Vec<(String, OutboundMessage)>>,
    pub ephemerals: Mutex<Vec<(String, OutboundMessage)>>,
    pub edits: Mutex<Vec<(String, String, OutboundMessage)>>,
    pub deletes: Mutex<Vec<(String, String)>>,
}

impl MockGateway {
    pub fn posts(&self) -> Vec<(String, OutboundMessage)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn ephemerals(&self) -> Vec<(String, OutboundMessage)> {
        self.ephemerals.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(String, String, OutboundMessage)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }

    /// Title of the most recent ephemeral embed, for terse assertions.
    pub fn last_ephemeral_title(&self) -> String {
        self.ephemerals
            .lock()
            .unwrap()
            .last()
            .and_then(|(_, m)| m.embeds.first())
            .map(|e| e.title.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatGateway for MockGateway {
    async fn post_message(
        &self,
        channel_id: &str,
        message: OutboundMessage,
    ) -> Result<String, GatewayError> {
        self.posts.lock().unwrap().push((channel_id.to_string(), message));
        Ok(format!("message-{}", self.posts.lock().unwrap().len()))
    }

    async fn update_ephemeral(
        &self,
        token: &EphemeralReplyToken,
        message: OutboundMessage,
    ) -> Result<(), GatewayError> {
        self.ephemerals.lock().unwrap().push((token.0.clone(), message));
        Ok(())
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: OutboundMessage,
    ) -> Result<(), GatewayError> {
        self.edits
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message_id.to_string(), message));
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), GatewayError> {
        self.deletes
            .lock()
            .unwrap()
            .push((channel_id.to_string(), message_id.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Renderer mock
// ---------------------------------------------------------------------------

/// Scripted renderer: hands out sequential prompt ids, reports completion
/// according to the `complete` flag, serves fixed image bytes.
#[derive(Default)]
pub struct MockRenderer {
    counter: AtomicUsize,
    pub submitted: Mutex<Vec<Value>>,
    pub fail_submit: AtomicBool,
    pub complete: AtomicBool,
}

impl MockRenderer {
    pub fn completing() -> Self {
        let renderer = Self::default();
        renderer.complete.store(true, Ordering::SeqCst);
        renderer
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }
}

pub fn completed_entry(filename: &str) -> HistoryEntry {
    serde_json::from_value(json!({
        "status": { "completed": true, "status_str": "success" },
        "outputs": {
            "320": { "images": [
                { "filename": filename, "subfolder": "batch", "type": "output" }
            ]}
        }
    }))
    .unwrap()
}

#[async_trait]
impl RendererTransport for MockRenderer {
    async fn ping(&self) -> bool {
        true
    }

    async fn object_info(&self) -> Result<Value, RendererError> {
        Ok(json!({}))
    }

    async fn submit(&self, graph: &Value) -> Result<String, RendererError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(RendererError::Protocol {
                status: 500,
                body: "mock submit failure".to_string(),
            });
        }
        self.submitted.lock().unwrap().push(graph.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("prompt-{n}"))
    }

    async fn history(&self, _prompt_id: &str) -> Option<HistoryEntry> {
        if self.complete.load(Ordering::SeqCst) {
            Some(completed_entry("glimmer_00001_.png"))
        } else {
            None
        }
    }

    async fn fetch_image(
        &self,
        _filename: &str,
        _subfolder: &str,
        _kind: &str,
    ) -> Result<Vec<u8>, RendererError> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn upload_image(
        &self,
        _bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadedImage, RendererError> {
        Ok(UploadedImage {
            name: format!("uploaded_{filename}"),
            subfolder: String::new(),
            kind: "input".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Trigger lookup mock
// ---------------------------------------------------------------------------

pub struct MockTriggers {
    pub words: HashMap<String, Vec<String>>,
}

impl MockTriggers {
    pub fn empty() -> Self {
        Self { words: HashMap::new() }
    }
}

#[async_trait]
impl TriggerLookup for MockTriggers {
    async fn lookup(&self, filename: &str) -> Vec<String> {
        self.words.get(filename).cloned().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Templates on disk
// ---------------------------------------------------------------------------

pub fn base_template_json() -> Value {
    json!({
        "135": {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": 1024, "height": 1024, "batch_size": 1 }
        },
        "152": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "placeholder.safetensors" }
        },
        "256": {
            "class_type": "Seed Generator",
            "inputs": { "seed": 0 }
        },
        "72": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": "", "clip": ["152", 1] }
        },
        "81": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": "", "clip": ["152", 1] }
        },
        "271": {
            "class_type": "KSampler (Efficient)",
            "inputs": {
                "model": ["152", 0],
                "positive": ["72", 0],
                "negative": ["81", 0],
                "latent_image": ["135", 0],
                "seed": ["256", 0],
                "sampler_name": "euler",
                "scheduler": "normal",
                "steps": 20,
                "cfg": 7.0,
                "denoise": 1.0
            }
        },
        "281": {
            "class_type": "KSampler (Efficient)",
            "inputs": { "model": ["152", 0], "sampler_name": "euler", "scheduler": "normal" }
        },
        "291": {
            "class_type": "KSampler (Efficient)",
            "inputs": { "model": ["152", 0], "sampler_name": "euler", "scheduler": "normal" }
        },
        "301": {
            "class_type": "KSampler (Efficient)",
            "inputs": { "model": ["152", 0], "sampler_name": "euler", "scheduler": "normal" }
        },
        "310": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["271", 0], "vae": ["152", 2] }
        },
        "320": {
            "class_type": "SaveImage",
            "inputs": { "images": ["310", 0], "filename_prefix": "glimmer" }
        }
    })
}

pub fn upscale_template_json() -> Value {
    json!({
        "2": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": "placeholder.safetensors" }
        },
        "6": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["2", 1] } },
        "7": { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["2", 1] } },
        "11": { "class_type": "LoadImage", "inputs": { "image": "placeholder.png" } },
        "14": { "class_type": "UpscaleModelLoader", "inputs": { "model_name": "4x.pth" } },
        "20": {
            "class_type": "UltimateSDUpscale",
            "inputs": {
                "image": ["11", 0],
                "model": ["2", 0],
                "upscale_model": ["14", 0],
                "positive": ["6", 0],
                "negative": ["7", 0]
            }
        }
    })
}

/// Write both template files into `dir`.
pub fn write_templates(dir: &Path) {
    std::fs::write(
        dir.join("generate.json"),
        serde_json::to_string_pretty(&base_template_json()).unwrap(),
    )
    .unwrap();
    let upscale = serde_json::to_string_pretty(&upscale_template_json()).unwrap();
    std::fs::write(dir.join("upscale_ultimate.json"), &upscale).unwrap();
    std::fs::write(dir.join("upscale_simple.json"), &upscale).unwrap();
}

// ---------------------------------------------------------------------------
// Config / catalog / rows
// ---------------------------------------------------------------------------

pub fn test_config(workflows_dir: &str) -> Config {
    Config {
        token: "test-token".to_string(),
        app_id: "app".to_string(),
        scope_id: "scope-1".to_string(),
        allowed_channel_ids: vec!["chan-1".to_string()],
        backend_base_url: "http://127.0.0.1:8188".to_string(),
        backend_timeout_ms: 300_000,
        db_path: ":memory:".to_string(),
        log_level: "info".to_string(),
        default_negative_prompt: "lowres".to_string(),
        upscale_model: "4x_test.pth".to_string(),
        upscale_workflow: UpscaleKind::Ultimate,
        upscale_enabled: true,
        owner_id: "owner".to_string(),
        purge_max_age_hours: 48,
        purge_interval_hours: 6,
        civitai_api_key: None,
        workflows_dir: workflows_dir.to_string(),
    }
}

pub fn test_catalog() -> NodeCatalog {
    NodeCatalog {
        checkpoint_class: "CheckpointLoaderSimple".to_string(),
        sampler_class: "KSampler (Efficient)".to_string(),
        models: vec!["M".to_string(), "M2".to_string()],
        samplers: vec!["euler".to_string(), "dpmpp_2m_sde".to_string()],
        schedulers: vec!["normal".to_string(), "karras".to_string()],
        adapters: vec!["detail.safetensors".to_string()],
    }
}

pub fn ctx(requester: &str, channel: &str) -> InteractionContext {
    InteractionContext {
        requester_id: requester.to_string(),
        scope_id: "scope-1".to_string(),
        channel_id: channel.to_string(),
        message_id: Some("msg-1".to_string()),
        is_moderator: false,
        ephemeral_token: EphemeralReplyToken(format!("token-{requester}")),
    }
}

pub fn request(model: &str) -> GenerationRequest {
    GenerationRequest {
        model: model.to_string(),
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

pub fn new_job(model: &str, requester: &str) -> NewJob {
    NewJob::from_request(Uuid::new_v4(), requester, "scope-1", "chan-1", &request(model))
}
