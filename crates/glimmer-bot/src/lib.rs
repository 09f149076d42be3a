//! The bot application: configuration, the chat-gateway seam, the
//! interaction router, the job queue and runner, and the purge scheduler.
//!
//! The chat platform itself (gateway connection, widget rendering) lives
//! behind [`gateway::ChatGateway`] and the typed [`gateway::Interaction`]
//! events; everything in this crate is platform-agnostic.

pub mod app;
pub mod config;
pub mod gateway;
pub mod guard_cache;
pub mod purge;
pub mod queue;
pub mod replies;
pub mod router;
