//! Builders for every outbound message shape the bot produces.

use glimmer_core::draft::Draft;
use glimmer_core::guard::BannedEntry;
use glimmer_db::models::{BannedWord, Job, UpscaleJob};

use crate::gateway::{
    ActionButton, ButtonKind, Embed, EmbedField, OutboundMessage,
};

pub const COLOR_SUCCESS: u32 = 0x57F287;
pub const COLOR_ERROR: u32 = 0xED4245;
pub const COLOR_INFO: u32 = 0x5865F2;

/// Caps applied when revealing prompts on a shared result.
pub const REVEAL_POSITIVE_CAP: usize = 1000;
pub const REVEAL_NEGATIVE_CAP: usize = 500;

const HIDDEN_PROMPT_FOOTER: &str = "Prompt hidden - use Share Prompt to reveal it";

/// Truncate to `cap` characters on a char boundary, appending an ellipsis
/// when anything was cut.
pub fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let mut out: String = text.chars().take(cap).collect();
    out.push('…');
    out
}

fn mention(user_id: &str) -> String {
    format!("<@{user_id}>")
}

fn ephemeral_embed(title: &str, description: String, color: u32) -> OutboundMessage {
    OutboundMessage {
        embeds: vec![Embed {
            title: title.to_string(),
            description,
            color,
            ..Default::default()
        }],
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Form and validation replies
// ---------------------------------------------------------------------------

/// The interactive form's current state.
pub fn draft_embed(draft: &Draft) -> OutboundMessage {
    let adapters = draft.active_adapters();
    let adapter_line = if adapters.is_empty() {
        "none".to_string()
    } else {
        adapters
            .iter()
            .map(|a| format!("{} ({:.2})", a.name, a.strength))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let fields = vec![
        field("Model", &draft.model, true),
        field("Sampler", &draft.sampler, true),
        field("Scheduler", &draft.scheduler, true),
        field("Steps", &draft.steps.to_string(), true),
        field("CFG", &format!("{:.1}", draft.cfg), true),
        field("Seed", &draft.seed.to_string(), true),
        field("Size", draft.size.as_str(), true),
        field("Adapters", &adapter_line, false),
        field(
            "Positive prompt",
            if draft.positive_prompt.is_empty() { "(empty)" } else { draft.positive_prompt.as_str() },
            false,
        ),
        field(
            "Negative prompt",
            if draft.negative_prompt.is_empty() { "(empty)" } else { draft.negative_prompt.as_str() },
            false,
        ),
    ];

    OutboundMessage {
        embeds: vec![Embed {
            title: "Generation request".to_string(),
            color: COLOR_INFO,
            fields,
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn validation_error(message: &str) -> OutboundMessage {
    ephemeral_embed("Invalid value", message.to_string(), COLOR_ERROR)
}

/// A submission-time refusal that is not about a single field value.
pub fn submission_error(message: &str) -> OutboundMessage {
    ephemeral_embed("Cannot submit", message.to_string(), COLOR_ERROR)
}

pub fn session_expired() -> OutboundMessage {
    ephemeral_embed(
        "Session expired",
        "Your form session has expired - reissue the entry command to start over.".to_string(),
        COLOR_ERROR,
    )
}

pub fn channel_refusal() -> OutboundMessage {
    ephemeral_embed(
        "Not here",
        "Generation requests are not accepted in this channel.".to_string(),
        COLOR_ERROR,
    )
}

pub fn permission_refusal(action: &str) -> OutboundMessage {
    ephemeral_embed(
        "Not allowed",
        format!("Only the requester can {action} this result."),
        COLOR_ERROR,
    )
}

pub fn owner_only() -> OutboundMessage {
    ephemeral_embed(
        "Not allowed",
        "Only the configured owner can use this command.".to_string(),
        COLOR_ERROR,
    )
}

pub fn job_not_found() -> OutboundMessage {
    ephemeral_embed(
        "Unknown job",
        "That job no longer exists; it may have been purged.".to_string(),
        COLOR_ERROR,
    )
}

/// The red policy embed: matched terms, spoilered so the channel does not
/// have to read them.
pub fn policy_warning(matches: &[BannedEntry]) -> OutboundMessage {
    let listed = matches
        .iter()
        .map(|entry| format!("||{}||", entry.word))
        .collect::<Vec<_>>()
        .join(", ");
    ephemeral_embed(
        "Blocked by content policy",
        format!("Your prompt matches banned terms: {listed}"),
        COLOR_ERROR,
    )
}

// ---------------------------------------------------------------------------
// Queue progress replies
// ---------------------------------------------------------------------------

pub fn queued_notice(position: i64) -> OutboundMessage {
    let description = if position <= 0 {
        "Queued - you are next.".to_string()
    } else {
        format!("Queued - {position} ahead of you.")
    };
    ephemeral_embed("Request queued", description, COLOR_INFO)
}

pub fn running_notice() -> OutboundMessage {
    ephemeral_embed("Rendering", "Your request is rendering now.".to_string(), COLOR_INFO)
}

pub fn failed_notice_ephemeral(reason: &str) -> OutboundMessage {
    ephemeral_embed("Generation failed", reason.to_string(), COLOR_ERROR)
}

/// Public failure notice for the origin channel.
pub fn failure_notice(requester_id: &str, reason: &str) -> OutboundMessage {
    OutboundMessage {
        content: format!("{} your generation failed.", mention(requester_id)),
        embeds: vec![Embed {
            title: "Generation failed".to_string(),
            description: reason.to_string(),
            color: COLOR_ERROR,
            ..Default::default()
        }],
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Result posts
// ---------------------------------------------------------------------------

/// The public result post: mention, parameter summary, action buttons.
/// Attachments are appended by the runner after fetching image bytes.
pub fn result_message(job: &Job, upscale_enabled: bool) -> OutboundMessage {
    let fields = vec![
        field("Model", &job.model, true),
        field("Sampler", &job.sampler, true),
        field("Scheduler", &job.scheduler, true),
        field("Steps", &job.steps.to_string(), true),
        field("CFG", &format!("{:.1}", job.cfg), true),
        field("Seed", &job.seed.to_string(), true),
        field("Size", &job.size, true),
    ];

    let mut buttons = vec![
        ActionButton { kind: ButtonKind::SharePrompt, job_id: job.id },
        ActionButton { kind: ButtonKind::Reroll, job_id: job.id },
        ActionButton { kind: ButtonKind::Edit, job_id: job.id },
    ];
    if upscale_enabled {
        buttons.push(ActionButton { kind: ButtonKind::Upscale, job_id: job.id });
    }
    buttons.push(ActionButton { kind: ButtonKind::Delete, job_id: job.id });

    OutboundMessage {
        content: mention(&job.requester_id),
        embeds: vec![Embed {
            title: "Generation complete".to_string(),
            color: COLOR_SUCCESS,
            fields,
            footer: Some(HIDDEN_PROMPT_FOOTER.to_string()),
            ..Default::default()
        }],
        buttons,
        ..Default::default()
    }
}

/// The result embed with prompts revealed, for the share-prompt rewrite.
pub fn revealed_result_message(job: &Job, upscale_enabled: bool) -> OutboundMessage {
    let mut message = result_message(job, upscale_enabled);
    if let Some(embed) = message.embeds.first_mut() {
        embed.footer = None;
        embed.fields.push(field(
            "Positive prompt",
            &truncate_chars(&job.positive_prompt, REVEAL_POSITIVE_CAP),
            false,
        ));
        if !job.negative_prompt.is_empty() {
            embed.fields.push(field(
                "Negative prompt",
                &truncate_chars(&job.negative_prompt, REVEAL_NEGATIVE_CAP),
                false,
            ));
        }
    }
    message
}

/// Trimmed public post for a finished upscale: just the model and a
/// delete button.
pub fn upscale_result_message(job: &UpscaleJob) -> OutboundMessage {
    OutboundMessage {
        content: mention(&job.requester_id),
        embeds: vec![Embed {
            title: "Upscale complete".to_string(),
            color: COLOR_SUCCESS,
            fields: vec![field("Upscale model", &job.upscale_model, true)],
            ..Default::default()
        }],
        buttons: vec![ActionButton { kind: ButtonKind::Delete, job_id: job.id }],
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Owner command replies
// ---------------------------------------------------------------------------

pub fn banned_word_added(word: &str, already_present: bool) -> OutboundMessage {
    let description = if already_present {
        format!("'||{word}||' is already on the list.")
    } else {
        format!("'||{word}||' added to the banned list.")
    };
    ephemeral_embed("Banned words", description, COLOR_INFO)
}

pub fn banned_word_removed(word: &str, found: bool) -> OutboundMessage {
    let description = if found {
        format!("'||{word}||' removed from the banned list.")
    } else {
        format!("'||{word}||' was not on the list.")
    };
    ephemeral_embed("Banned words", description, COLOR_INFO)
}

pub fn banned_word_list(words: &[BannedWord]) -> OutboundMessage {
    let description = if words.is_empty() {
        "No banned words configured.".to_string()
    } else {
        words
            .iter()
            .map(|w| {
                let mode = if w.partial { "partial" } else { "whole word" };
                format!("||{}|| ({mode})", w.word)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    ephemeral_embed("Banned words", description, COLOR_INFO)
}

pub fn purge_report(jobs_deleted: u64, upscale_deleted: u64) -> OutboundMessage {
    ephemeral_embed(
        "Purge complete",
        format!("Deleted {jobs_deleted} jobs and {upscale_deleted} upscale jobs."),
        COLOR_INFO,
    )
}

fn field(name: &str, value: &str, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: value.to_string(),
        inline,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc…");
        // Multi-byte characters count as one.
        assert_eq!(truncate_chars("ααββ", 2), "αα…");
    }

    #[test]
    fn policy_warning_spoilers_matched_terms() {
        let matches = vec![BannedEntry { word: "badterm".to_string(), partial: false }];
        let message = policy_warning(&matches);
        assert_eq!(message.embeds[0].color, COLOR_ERROR);
        assert!(message.embeds[0].description.contains("||badterm||"));
    }

    #[test]
    fn queued_notice_wording() {
        assert!(queued_notice(0).embeds[0].description.contains("next"));
        assert!(queued_notice(3).embeds[0].description.contains("3 ahead"));
    }
}
