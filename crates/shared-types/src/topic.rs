//! # Topics
//!
//! Topics are hierarchical, `:`-separated strings. A subscription names a
//! `TopicPattern` that matches one exact topic or a whole prefix family.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known topics used by the core subsystems.
pub mod topics {
    /// Prefix of the log family (`log:info`, `log:error`, ...).
    pub const LOG_PREFIX: &str = "log:";
    /// Invocation requests consumed by the binding subsystem.
    pub const CALL_REQUEST: &str = "call:request";
    /// Invocation results produced by the binding subsystem.
    pub const CALL_RESULT: &str = "call:result";
    /// Prefix of the event family.
    pub const EVENT_PREFIX: &str = "event:";
    /// Backend-originated events, relayed to the remote UI.
    pub const EVENT_EMIT: &str = "event:emit";
    /// Remote-originated events, republished by the dispatcher.
    pub const EVENT_IN: &str = "event:in";
    /// Event emitted once every subsystem is ready.
    pub const READY_EVENT: &str = "app:loaded";
}

/// Pattern a subscriber registers with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopicPattern {
    /// Matches exactly this topic.
    Exact(String),
    /// Matches every topic starting with this prefix.
    Prefix(String),
    /// Matches every topic.
    All,
}

impl TopicPattern {
    /// Parse a pattern: `"*"` is everything, a trailing `*` is a prefix
    /// family (`"log:*"`), anything else is an exact topic.
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Self::All
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Self::Prefix(prefix.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    /// Exact-topic pattern.
    pub fn exact(topic: impl Into<String>) -> Self {
        Self::Exact(topic.into())
    }

    /// Prefix-family pattern.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Check whether `topic` belongs to this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(t) => t == topic,
            Self::Prefix(p) => topic.starts_with(p.as_str()),
            Self::All => true,
        }
    }
}

impl From<&str> for TopicPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(t) => f.write_str(t),
            Self::Prefix(p) => write!(f, "{p}*"),
            Self::All => f.write_str("*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(TopicPattern::parse("*"), TopicPattern::All);
        assert_eq!(TopicPattern::parse("log:*"), TopicPattern::prefix("log:"));
        assert_eq!(
            TopicPattern::parse("call:request"),
            TopicPattern::exact("call:request")
        );
    }

    #[test]
    fn test_prefix_matches_family_only() {
        let pattern = TopicPattern::parse("log:*");
        assert!(pattern.matches("log:info"));
        assert!(pattern.matches("log:error"));
        assert!(!pattern.matches("logger"));
        assert!(!pattern.matches("event:emit"));
    }

    #[test]
    fn test_exact_does_not_match_children() {
        let pattern = TopicPattern::exact("event");
        assert!(pattern.matches("event"));
        assert!(!pattern.matches("event:in"));
    }

    #[test]
    fn test_display_round_trips_parse() {
        for raw in ["*", "log:*", "call:result"] {
            assert_eq!(TopicPattern::parse(raw).to_string(), raw);
        }
    }
}
