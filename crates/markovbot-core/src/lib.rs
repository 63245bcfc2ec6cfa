//! Markov chain model, bounded chat store and chain manager for markovbot.
//!
//! This crate defines the [`store::ChainBackend`] port that the
//! infrastructure layer implements. It depends only on `markovbot-types`,
//! never on `markovbot-infra` or any filesystem code.

pub mod chain;
pub mod service;
pub mod store;
