//! Row structs and insert DTOs.
//!
//! Each submodule holds a `FromRow` entity matching its table plus the
//! DTO used for inserts. Rows never leak cursors; repositories hand out
//! these structs only.

pub mod banned_word;
pub mod job;
pub mod upscale;

pub use banned_word::BannedWord;
pub use job::{Job, JobStatus, NewJob, StoredAdapter};
pub use upscale::{NewUpscaleJob, UpscaleJob};
