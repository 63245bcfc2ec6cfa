//! Chat identifier type for markovbot.
//!
//! Every chain is keyed by the chat it was learned from. Chat ids come from
//! the chat protocol as signed 64-bit integers (group chats are negative).

use serde::{Deserialize, Serialize};

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Identifier of a chat whose messages feed one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl ChatId {
    /// Wrap a raw protocol chat id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw protocol chat id.
    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChatId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_id_display_keeps_sign() {
        assert_eq!(ChatId(-1001234).to_string(), "-1001234");
        assert_eq!(ChatId(42).to_string(), "42");
    }

    #[test]
    fn test_chat_id_from_str() {
        assert_eq!("-17".parse::<ChatId>().unwrap(), ChatId(-17));
        assert_eq!(" 99 ".parse::<ChatId>().unwrap(), ChatId(99));
        assert!("group".parse::<ChatId>().is_err());
    }

    #[test]
    fn test_chat_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&ChatId(-5)).unwrap();
        assert_eq!(json, "-5");
        let parsed: ChatId = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, ChatId(12));
    }
}
