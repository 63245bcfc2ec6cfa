//! Infrastructure layer for markovbot.
//!
//! Contains the filesystem implementation of the `ChainBackend` port defined
//! in `markovbot-core` and the `config.toml` loader.

pub mod config;
pub mod filesystem;
