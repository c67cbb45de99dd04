use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Shared error type for the runplane crates.
#[derive(Debug, Error, Clone)]
pub enum RunplaneError {
    #[error("{message}")]
    Message { message: String },
}

impl RunplaneError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Identifier of one end-to-end agent run.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(transparent))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Authenticated identity that owns runs, tokens and stored sessions.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(transparent))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Third-party platform whose login state is kept for a user (e.g. `linkedin`).
///
/// Normalized to lowercase so `LinkedIn` and `linkedin` address the same slot.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(try_from = "String", into = "String"))]
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Platform(String);

impl TryFrom<String> for Platform {
    type Error = RunplaneError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Platform> for String {
    fn from(platform: Platform) -> Self {
        platform.0
    }
}

impl Platform {
    pub fn parse(raw: &str) -> Result<Self, RunplaneError> {
        let normalized = raw.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(RunplaneError::new("platform must not be empty"));
        }
        if !normalized
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(RunplaneError::new(format!(
                "invalid platform identifier: {raw}"
            )));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification of a model invocation.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde-full", serde(rename_all = "snake_case"))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StepKind {
    /// Mechanical tool-use: choosing the next action, parsing a page.
    Tool,
    /// Final answer composition.
    Synthesis,
}

impl StepKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            StepKind::Tool => "tool",
            StepKind::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = RunplaneError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tool" => Ok(StepKind::Tool),
            "synthesis" => Ok(StepKind::Synthesis),
            other => Err(RunplaneError::new(format!("invalid step kind: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_is_normalized() {
        let platform = Platform::parse("  LinkedIn ").unwrap();
        assert_eq!(platform.as_str(), "linkedin");
        assert!(Platform::parse("").is_err());
        assert!(Platform::parse("x/../y").is_err());
    }

    #[test]
    fn step_kind_parses_case_insensitively() {
        assert_eq!("Tool".parse::<StepKind>().unwrap(), StepKind::Tool);
        assert_eq!(
            "synthesis".parse::<StepKind>().unwrap(),
            StepKind::Synthesis
        );
        assert!("plan".parse::<StepKind>().is_err());
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
