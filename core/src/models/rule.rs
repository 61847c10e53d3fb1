//! Modification rules applied to a packet before it is resent.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One declarative edit as supplied by the caller.
///
/// `target` is `header:<Name>`, `url`, `body` or `method`; `operation` is
/// `set`, `add`, `remove`, `replace` or `regex_replace`. Both are kept as text so a malformed
/// rule can be reported together with its position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModificationRule {
    /// Field to edit: "header:<Name>", "url", "body" or "method"
    pub target: String,
    /// Edit to perform: "set", "add", "remove", "replace" or "regex_replace"
    pub operation: String,
    /// New content; omitted for "remove"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Text to look for: literal for "replace", a regular expression for
    /// "regex_replace" (`$1` in `value` refers to capture groups)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ModificationRule {
    pub fn new(target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation: operation.into(),
            value: None,
            pattern: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn set_header(name: &str, value: impl Into<String>) -> Self {
        Self::new(format!("header:{name}"), "set").with_value(value)
    }

    pub fn add_header(name: &str, value: impl Into<String>) -> Self {
        Self::new(format!("header:{name}"), "add").with_value(value)
    }

    pub fn remove_header(name: &str) -> Self {
        Self::new(format!("header:{name}"), "remove")
    }
}

/// How header `set`/`add` treat names that already exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderPolicy {
    /// Keep a single entry per name; `add` overwrites
    #[default]
    ReplaceExisting,
    /// `add` appends another entry with the same name
    AllowDuplicates,
}

impl From<bool> for HeaderPolicy {
    fn from(allow_duplicates: bool) -> Self {
        if allow_duplicates {
            HeaderPolicy::AllowDuplicates
        } else {
            HeaderPolicy::ReplaceExisting
        }
    }
}
