//! The chat-platform seam.
//!
//! The platform adapter (slash commands, modals, dropdowns, attachments)
//! is not part of this crate. It delivers typed [`Interaction`] values to
//! the router and implements [`ChatGateway`] for everything outbound. The
//! [`LoggingGateway`] implementation turns outbound traffic into log
//! lines so the process can run headless.

use async_trait::async_trait;

use glimmer_core::types::JobId;

/// A follow-up capability minted by the chat platform, valid for roughly
/// fifteen minutes. The queue holds one per job with take-once semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralReplyToken(pub String);

/// Who and where an interaction came from.
#[derive(Debug, Clone)]
pub struct InteractionContext {
    pub requester_id: String,
    pub scope_id: String,
    pub channel_id: String,
    /// The message the interaction's widget was attached to, when any.
    pub message_id: Option<String>,
    pub is_moderator: bool,
    pub ephemeral_token: EphemeralReplyToken,
}

/// Dropdowns on the request form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectField {
    Model,
    Sampler,
    Scheduler,
    Size,
}

/// Owner commands over the banned-word list.
#[derive(Debug, Clone)]
pub enum BannedAction {
    Add { word: String, partial: bool },
    Remove { word: String },
    List,
}

/// Typed interaction events, as delivered by the platform adapter.
#[derive(Debug, Clone)]
pub enum InteractionEvent {
    EntryCommand,
    SelectChanged { field: SelectField, value: String },
    AdapterSlotChanged { slot: usize, name: Option<String>, strength: Option<f64> },
    EditPromptsButton,
    PromptsModal {
        positive: String,
        negative: String,
        steps: String,
        cfg: String,
        seed: String,
    },
    GenerateButton,
    SharePromptButton { job_id: JobId },
    RerollButton { job_id: JobId },
    EditButton { job_id: JobId },
    DeleteButton { job_id: JobId },
    UpscaleButton { job_id: JobId },
    BannedCommand(BannedAction),
    PurgeCommand { max_age_hours: Option<u64> },
}

/// One inbound interaction: context plus event.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub ctx: InteractionContext,
    pub event: InteractionEvent,
}

// ---------------------------------------------------------------------------
// Outbound types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub footer: Option<String>,
}

#[derive(Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Action buttons attached to result posts. Each carries the job id it
/// operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    SharePrompt,
    Reroll,
    Edit,
    Upscale,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ActionButton {
    pub kind: ButtonKind,
    pub job_id: JobId,
}

/// A platform-agnostic outbound message.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub content: String,
    pub embeds: Vec<Embed>,
    pub attachments: Vec<Attachment>,
    pub buttons: Vec<ActionButton>,
}

#[derive(Debug, thiserror::Error)]
#[error("chat gateway error: {0}")]
pub struct GatewayError(pub String);

/// Outbound operations the bot needs from the chat platform.
///
/// Callers treat every failure as best-effort: the ephemeral token may
/// have expired, the message may be gone. Errors are logged, never
/// propagated into the job pipeline.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Post a public message; returns the new message id.
    async fn post_message(
        &self,
        channel_id: &str,
        message: OutboundMessage,
    ) -> Result<String, GatewayError>;

    /// Update the requester-private reply behind an ephemeral token.
    async fn update_ephemeral(
        &self,
        token: &EphemeralReplyToken,
        message: OutboundMessage,
    ) -> Result<(), GatewayError>;

    /// Rewrite an existing public message in place.
    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        message: OutboundMessage,
    ) -> Result<(), GatewayError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str)
        -> Result<(), GatewayError>;
}

/// Headless gateway: outbound messages become structured log lines. Used
/// when no platform adapter is wired in, e.g. when draining leftover jobs
/// against the renderer.
pub struct LoggingGateway;

#[async_trait]
impl ChatGateway for LoggingGateway {
    async fn post_message(
        &self,
        channel_id: &str,
        message: OutboundMessage,
    ) -> Result<String, GatewayError> {
        tracing::info!(
            channel_id,
            content = %message.content,
            embeds = message.embeds.len(),
            attachments = message.attachments.len(),
            "Would post channel message",
        );
        Ok("logged".to_string())
    }

    async fn update_ephemeral(
        &self,
        _token: &EphemeralReplyToken,
        message: OutboundMessage,
    ) -> Result<(), GatewayError> {
        tracing::info!(content = %message.content, "Would update ephemeral reply");
        Ok(())
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        _message: OutboundMessage,
    ) -> Result<(), GatewayError> {
        tracing::info!(channel_id, message_id, "Would edit message");
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), GatewayError> {
        tracing::info!(channel_id, message_id, "Would delete message");
        Ok(())
    }
}
