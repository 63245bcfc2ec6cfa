//! First-order Markov chain over chat messages.
//!
//! A [`Chain`] counts how often each token was followed by each other token
//! (or by the end of the message) and samples new text from those counts.
//! Pure data structure: no I/O, no shared state.

pub mod tokenize;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use markovbot_types::chain::{ChainRecord, SENTINEL, SuccessorCounts};
use markovbot_types::error::RecordError;
use rand::Rng;
use rand::seq::SliceRandom;

pub use tokenize::{CharFilter, MAX_TOKEN_CHARS, clean_token, is_allowed_char};

/// Returned by [`Chain::generate_message`] when nothing has been learned yet.
pub const EMPTY_CHAIN_PLACEHOLDER: &str = "_Chain is empty! Start sending some messages!_";

/// Word set plus transition counts for one chat.
#[derive(Debug, Clone)]
pub struct Chain {
    /// Distinct tokens in first-seen order. Indexable for uniform sampling.
    words: Vec<String>,
    /// Every word has an entry here, possibly with no successors.
    transitions: HashMap<String, SuccessorCounts>,
    char_filter: CharFilter,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    /// An empty chain using [`is_allowed_char`] to clean tokens.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            transitions: HashMap::new(),
            char_filter: is_allowed_char,
        }
    }

    /// Replace the character classifier used by [`Chain::add_message`].
    pub fn with_char_filter(mut self, filter: CharFilter) -> Self {
        self.char_filter = filter;
        self
    }

    /// Build a chain from a validated record.
    pub fn try_from_record(record: ChainRecord) -> Result<Self, RecordError> {
        record.validate()?;

        let ChainRecord { words, transitions } = record;
        let mut chain = Self {
            transitions: transitions.into_iter().collect(),
            words,
            char_filter: is_allowed_char,
        };
        for word in &chain.words {
            if !chain.transitions.contains_key(word) {
                chain.transitions.insert(word.clone(), BTreeMap::new());
            }
        }
        Ok(chain)
    }

    /// Build a chain from a record, falling back to an empty chain when the
    /// record fails validation.
    pub fn from_record(record: ChainRecord) -> Self {
        Self::try_from_record(record).unwrap_or_else(|err| {
            tracing::debug!("discarding invalid chain record: {err}");
            Self::new()
        })
    }

    /// Hydrate from untrusted JSON. Anything that is not a valid record
    /// yields an empty chain.
    pub fn from_value(value: serde_json::Value) -> Self {
        match ChainRecord::from_value(value) {
            Ok(record) => Self::from_record(record),
            Err(err) => {
                tracing::debug!("discarding invalid chain payload: {err}");
                Self::new()
            }
        }
    }

    /// Snapshot the chain into its persisted form.
    pub fn to_record(&self) -> ChainRecord {
        ChainRecord {
            words: self.words.clone(),
            transitions: self
                .transitions
                .iter()
                .map(|(token, successors)| (token.clone(), successors.clone()))
                .collect(),
        }
    }

    /// Register a token. No-op for the empty string or a known token.
    pub fn add_word(&mut self, token: &str) {
        if token.is_empty() || self.transitions.contains_key(token) {
            return;
        }
        self.words.push(token.to_string());
        self.transitions.insert(token.to_string(), BTreeMap::new());
    }

    /// Learn the transitions in one message.
    ///
    /// The message is split on whitespace and every token is cleaned with the
    /// chain's character filter. The last token is followed by the
    /// end-of-message sentinel. A token that cleans down to nothing is never
    /// a transition source, and acts as an end of message when it follows a
    /// real token. Blank messages are ignored.
    pub fn add_message(&mut self, text: &str) {
        let mut tokens: Vec<String> = text
            .split_whitespace()
            .map(|raw| clean_token(raw, self.char_filter))
            .collect();
        if tokens.is_empty() {
            return;
        }

        for token in &tokens {
            self.add_word(token);
        }
        tokens.push(SENTINEL.to_string());

        for pair in tokens.windows(2) {
            if let Some(successors) = self.transitions.get_mut(&pair[0]) {
                *successors.entry(pair[1].clone()).or_insert(0) += 1;
            }
        }
    }

    /// Probability that `next` follows `word`, or 0 when it never has.
    pub fn probability(&self, word: &str, next: &str) -> f64 {
        let Some(count) = self.usage_count(word, next) else {
            return 0.0;
        };
        let total = self.total_count(word);
        if total == 0 {
            return 0.0;
        }
        count as f64 / total as f64
    }

    /// Tokens observed right after `word` (may include the sentinel).
    pub fn successors(&self, word: &str) -> BTreeSet<&str> {
        self.transitions
            .get(word)
            .map(|successors| successors.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Number of times `next` followed `word`.
    pub fn usage_count(&self, word: &str, next: &str) -> Option<u64> {
        self.transitions.get(word)?.get(next).copied()
    }

    /// Sum of all outgoing counts of `word`.
    pub fn total_count(&self, word: &str) -> u64 {
        self.transitions
            .get(word)
            .map(|successors| successors.values().sum())
            .unwrap_or(0)
    }

    /// Known tokens in first-seen order.
    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Number of distinct (token, successor) pairs.
    pub fn transition_count(&self) -> usize {
        self.transitions.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.transitions.is_empty()
    }

    /// Generate a message of at most `max_tokens` tokens.
    pub fn generate_message(&self, max_tokens: usize) -> String {
        self.generate_message_with(max_tokens, &mut rand::thread_rng())
    }

    /// [`Chain::generate_message`] with a caller-supplied random source.
    ///
    /// Starts at a uniformly random word and follows weighted successors. When
    /// the end-of-message sentinel is drawn a fair coin decides between
    /// stopping and restarting at another random word, which keeps output
    /// from being dominated by short sentences.
    pub fn generate_message_with<R: Rng + ?Sized>(&self, max_tokens: usize, rng: &mut R) -> String {
        if self.is_empty() {
            return EMPTY_CHAIN_PLACEHOLDER.to_string();
        }

        let mut message = String::new();
        let mut current: Option<&str> = None;

        for _ in 0..max_tokens {
            let next = match current {
                Some(word) => self.draw_successor(word, rng),
                None => match self.words.choose(rng) {
                    Some(word) => word.as_str(),
                    None => break,
                },
            };

            if next == SENTINEL {
                if rng.gen_bool(0.5) {
                    current = None;
                    continue;
                }
                break;
            }

            message.push_str(next);
            message.push(' ');
            current = Some(next);
        }

        message.trim().to_string()
    }

    /// Weighted draw from the successors of `word`.
    ///
    /// Equivalent to drawing from a bag holding each successor once per
    /// observed count, without materializing the bag.
    fn draw_successor<R: Rng + ?Sized>(&self, word: &str, rng: &mut R) -> &str {
        let Some(successors) = self.transitions.get(word) else {
            return SENTINEL;
        };
        let total: u64 = successors.values().sum();
        if total == 0 {
            return SENTINEL;
        }

        let mut ticket = rng.gen_range(0..total);
        for (successor, count) in successors {
            if ticket < *count {
                return successor;
            }
            ticket -= count;
        }
        SENTINEL
    }
}
