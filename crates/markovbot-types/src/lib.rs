//! Shared domain types for markovbot.
//!
//! This crate contains the types passed between the chain model, the chat
//! store and its persistence backend: chat ids, the persisted chain record,
//! store configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, thiserror.

pub mod chain;
pub mod chat;
pub mod config;
pub mod error;
