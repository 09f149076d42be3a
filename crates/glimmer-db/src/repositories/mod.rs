//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept the pool as the first argument.

pub mod banned_word_repo;
pub mod job_repo;
pub mod purge_repo;
pub mod upscale_repo;

pub use banned_word_repo::BannedWordRepo;
pub use job_repo::JobRepo;
pub use purge_repo::PurgeRepo;
pub use upscale_repo::UpscaleJobRepo;
