//! Object kinds stored in the repository.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `Object` is the abstract supertype, the other kinds are mutually exclusive refinements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    #[default]
    Object,
    File,
    Config,
    TextBlob,
}

impl ObjectKind {
    pub const CONCRETE: [ObjectKind; 3] =
        [ObjectKind::File, ObjectKind::Config, ObjectKind::TextBlob];

    /// Maps a kind-selector token (first segment of a field path) to its kind
    pub fn from_selector(token: &str) -> Option<Self> {
        match token {
            "object" => Some(Self::Object),
            "file" => Some(Self::File),
            "config" | "static" => Some(Self::Config),
            "blob" => Some(Self::TextBlob),
            _ => None,
        }
    }

    pub fn is_concrete(self) -> bool {
        self != Self::Object
    }

    /// `self` is-a `other`
    pub fn is_a(self, other: Self) -> bool {
        self == other || other == Self::Object
    }

    /// The narrower of two compatible kinds, or `None` when they exclude each other
    pub fn narrow(self, other: Self) -> Option<Self> {
        if self.is_a(other) {
            Some(self)
        } else if other.is_a(self) {
            Some(other)
        } else {
            None
        }
    }

    /// Value of the `type` discriminator column in the object table
    pub fn discriminator(self) -> Option<&'static str> {
        match self {
            Self::Object => None,
            Self::File => Some("file"),
            Self::Config => Some("static_config"),
            Self::TextBlob => Some("text_blob"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::File => "File",
            Self::Config => "Config",
            Self::TextBlob => "TextBlob",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectKind {
    type Err = String;

    /// Accepts the selector tokens as well as the snake_case kind names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::from_selector(&lower)
            .or(match lower.as_str() {
                "text_blob" | "textblob" => Some(Self::TextBlob),
                _ => None,
            })
            .ok_or_else(|| format!("unknown object kind: {s}"))
    }
}
