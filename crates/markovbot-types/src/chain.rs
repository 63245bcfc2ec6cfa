//! Persisted chain record (the on-disk and in-cache wire format).
//!
//! ```json
//! {"words": ["a", "b"], "transitions": {"a": {"b": 2}, "b": {"a": 1, "": 1}}}
//! ```
//!
//! The empty string is the end-of-message sentinel. It only ever appears as a
//! successor key, never in `words` and never as a top-level transition key.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Successor token reserved for "end of message".
pub const SENTINEL: &str = "";

/// Contents written to a chat file the first time the chat is seen.
///
/// Deliberately lacks `transitions`, so it hydrates to an empty chain.
pub const EMPTY_RECORD_JSON: &str = "{\n  \"words\": []\n}";

/// Successor token -> number of times it followed the source token.
pub type SuccessorCounts = BTreeMap<String, u64>;

/// Plain `{words, transitions}` snapshot of a chain.
///
/// `BTreeMap` keeps the serialized form stable between saves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainRecord {
    pub words: Vec<String>,
    /// Older files name this field `probabilities`.
    #[serde(alias = "probabilities")]
    pub transitions: BTreeMap<String, SuccessorCounts>,
}

impl ChainRecord {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate an untrusted JSON value against the record schema.
    ///
    /// Requires a `words` array of strings and a `transitions` object whose
    /// leaves are positive integers. Repairable inconsistencies are fixed by
    /// [`ChainRecord::normalize`] rather than rejected, so older files with
    /// repeated words keep their counts.
    pub fn from_value(value: serde_json::Value) -> Result<Self, RecordError> {
        let mut record: ChainRecord =
            serde_json::from_value(value).map_err(|e| RecordError::Shape(e.to_string()))?;
        record.normalize();
        record.validate()?;
        Ok(record)
    }

    /// Repair what can be repaired without losing counts.
    ///
    /// Drops repeated words (first occurrence wins) and the sentinel from
    /// `words`, drops transitions whose source is the sentinel, and appends
    /// any other transition source missing from `words`.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::with_capacity(self.words.len());
        self.words
            .retain(|word| !word.is_empty() && seen.insert(word.clone()));

        self.transitions.remove(SENTINEL);
        for token in self.transitions.keys() {
            if seen.insert(token.clone()) {
                self.words.push(token.clone());
            }
        }
    }

    /// Check the structural invariants of an already-typed record.
    pub fn validate(&self) -> Result<(), RecordError> {
        let mut seen = HashSet::with_capacity(self.words.len());
        for word in &self.words {
            if word.is_empty() {
                return Err(RecordError::SentinelWord);
            }
            if !seen.insert(word.as_str()) {
                return Err(RecordError::DuplicateWord(word.clone()));
            }
        }

        for (token, successors) in &self.transitions {
            if !seen.contains(token.as_str()) {
                return Err(RecordError::UnknownToken(token.clone()));
            }
            if let Some((successor, _)) = successors.iter().find(|(_, count)| **count == 0) {
                return Err(RecordError::ZeroCount {
                    token: token.clone(),
                    successor: successor.clone(),
                });
            }
        }

        Ok(())
    }

    /// Whether the record holds no words and no transitions.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.transitions.is_empty()
    }

    /// Total number of observed transitions (sum of every count).
    pub fn transition_total(&self) -> u64 {
        self.transitions
            .values()
            .flat_map(|successors| successors.values())
            .sum()
    }
}
