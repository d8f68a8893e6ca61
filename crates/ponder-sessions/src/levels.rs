//! Reasoning levels.
//!
//! A level bundles the range of thoughts a session may plan for and the
//! token budget one session may spend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Inclusive range of planned thought counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtBounds {
    /// Smallest allowed plan.
    pub min: u32,
    /// Largest allowed plan.
    pub max: u32,
}

impl ThoughtBounds {
    /// Create bounds; `min` must not exceed `max`.
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Whether `n` lies inside the range.
    pub fn contains(&self, n: u32) -> bool {
        (self.min..=self.max).contains(&n)
    }
}

/// How much reasoning a session is allowed to do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    /// Short chains for simple questions.
    #[default]
    Basic,
    /// Moderate chains.
    Normal,
    /// Long chains for design and analysis work.
    Deep,
}

impl ReasoningLevel {
    /// All levels, shallowest first.
    pub const ALL: [Self; 3] = [Self::Basic, Self::Normal, Self::Deep];

    /// Planned-thought range for this level.
    pub const fn bounds(self) -> ThoughtBounds {
        match self {
            Self::Basic => ThoughtBounds::new(3, 5),
            Self::Normal => ThoughtBounds::new(6, 10),
            Self::Deep => ThoughtBounds::new(11, 20),
        }
    }

    /// Tokens one session at this level may hold.
    pub const fn token_budget(self) -> u64 {
        match self {
            Self::Basic => 8_000,
            Self::Normal => 24_000,
            Self::Deep => 64_000,
        }
    }

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Normal => "normal",
            Self::Deep => "deep",
        }
    }
}

impl fmt::Display for ReasoningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reasoning level: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for ReasoningLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "normal" => Ok(Self::Normal),
            "deep" => Ok(Self::Deep),
            _ => Err(UnknownLevel(s.to_owned())),
        }
    }
}
