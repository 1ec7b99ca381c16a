use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, TreeFlowError};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn from_str(s: &str) -> Self {
                Self(s.to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Unique TreeFlow identifier.
    TreeFlowId
);
define_id!(
    /// Unique step identifier.
    StepId
);
define_id!(
    /// Unique step output identifier.
    OutputId
);
define_id!(
    /// Unique step input identifier.
    InputId
);
define_id!(
    /// Unique step connection identifier.
    ConnectionId
);
define_id!(
    /// Unique step question identifier.
    QuestionId
);
define_id!(
    /// Unique few-shot example identifier.
    ExampleId
);

/// Outcome classification assigned to a step after the agent ran it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionVerdict {
    FullyCompleted,
    Failed,
    /// Anything short of full completion that is not a failure.
    Partial,
}

impl CompletionVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullyCompleted => "FULLY_COMPLETED",
            Self::Failed => "FAILED",
            Self::Partial => "PARTIAL",
        }
    }
}

impl std::str::FromStr for CompletionVerdict {
    type Err = TreeFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fully_completed" | "completed" | "success" => Ok(Self::FullyCompleted),
            "failed" | "failure" => Ok(Self::Failed),
            "partial" | "other" => Ok(Self::Partial),
            other => Err(TreeFlowError::Config(format!(
                "unknown completion verdict: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for CompletionVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion guard declared by a step input.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputType {
    #[default]
    Any,
    FullyCompleted,
    Failed,
}

impl InputType {
    /// Whether an upstream verdict satisfies this guard.
    pub fn accepts(&self, verdict: CompletionVerdict) -> bool {
        match self {
            Self::Any => true,
            Self::FullyCompleted => verdict == CompletionVerdict::FullyCompleted,
            Self::Failed => verdict == CompletionVerdict::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "ANY",
            Self::FullyCompleted => "FULLY_COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for InputType {
    type Err = TreeFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANY" => Ok(Self::Any),
            "FULLY_COMPLETED" => Ok(Self::FullyCompleted),
            "FAILED" => Ok(Self::Failed),
            other => Err(TreeFlowError::Config(format!("unknown input type: {}", other))),
        }
    }
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Polarity of a few-shot example.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FewShotType {
    Positive,
    Negative,
}

impl FewShotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "POSITIVE",
            Self::Negative => "NEGATIVE",
        }
    }
}

impl std::str::FromStr for FewShotType {
    type Err = TreeFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POSITIVE" => Ok(Self::Positive),
            "NEGATIVE" => Ok(Self::Negative),
            other => Err(TreeFlowError::Config(format!(
                "unknown few-shot type: {}",
                other
            ))),
        }
    }
}

fn slug_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static slug regex"))
}

fn version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^v?(0|[1-9]\d*)\.(0|[1-9]\d*)(\.(0|[1-9]\d*))?([-+][0-9A-Za-z.-]+)?$")
            .expect("static version regex")
    })
}

/// Derive a URL-safe slug from a display name.
///
/// `"Collect Contact Info!"` becomes `"collect-contact-info"`.
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    slug_separator()
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

/// Check that a flow version looks like `MAJOR.MINOR[.PATCH]`.
pub fn validate_version(version: &str) -> Result<()> {
    if version_pattern().is_match(version.trim()) {
        Ok(())
    } else {
        Err(TreeFlowError::InvalidVersion(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(StepId::new(), StepId::new());
        assert_eq!(StepId::from_str("a").to_string(), "a");
    }

    #[test]
    fn test_guard_acceptance() {
        assert!(InputType::Any.accepts(CompletionVerdict::Failed));
        assert!(InputType::Any.accepts(CompletionVerdict::Partial));
        assert!(InputType::FullyCompleted.accepts(CompletionVerdict::FullyCompleted));
        assert!(!InputType::FullyCompleted.accepts(CompletionVerdict::Failed));
        assert!(!InputType::FullyCompleted.accepts(CompletionVerdict::Partial));
        assert!(InputType::Failed.accepts(CompletionVerdict::Failed));
        assert!(!InputType::Failed.accepts(CompletionVerdict::FullyCompleted));
    }

    #[test]
    fn test_verdict_parsing() {
        assert_eq!(
            "fully-completed".parse::<CompletionVerdict>().unwrap(),
            CompletionVerdict::FullyCompleted
        );
        assert_eq!(
            "FAILED".parse::<CompletionVerdict>().unwrap(),
            CompletionVerdict::Failed
        );
        assert!("maybe".parse::<CompletionVerdict>().is_err());
    }

    #[test]
    fn test_enum_serde_names() {
        let json = serde_json::to_string(&InputType::FullyCompleted).unwrap();
        assert_eq!(json, "\"FULLY_COMPLETED\"");
        let parsed: FewShotType = serde_json::from_str("\"NEGATIVE\"").unwrap();
        assert_eq!(parsed, FewShotType::Negative);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Collect Contact Info!"), "collect-contact-info");
        assert_eq!(slugify("  A -- B  "), "a-b");
        assert_eq!(slugify("Étape 2"), "tape-2");
    }

    #[test]
    fn test_validate_version() {
        assert!(validate_version("1.0").is_ok());
        assert!(validate_version("v2.3.1").is_ok());
        assert!(validate_version("1.0.0-beta.1").is_ok());
        assert!(matches!(
            validate_version("one"),
            Err(TreeFlowError::InvalidVersion(_))
        ));
        assert!(validate_version("01.2").is_err());
    }
}
