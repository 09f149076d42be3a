//! HTTP clients for the image renderer and the remote adapter-metadata
//! service, plus the trigger-word cache that layers the two.

pub mod api;
pub mod civitai;
pub mod triggers;

pub use api::{HistoryEntry, ImageRef, RendererApi, RendererError, RendererTransport, UploadedImage};
pub use civitai::{CivitaiClient, RemoteLookup};
pub use triggers::{TriggerLookup, TriggerSource, TriggerWordCache};
