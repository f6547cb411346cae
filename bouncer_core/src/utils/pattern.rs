//! IRC-style glob matching.
//!
//! Permitted wildcards are * (match zero or more characters) and ? (match exactly one character)

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Deref;

use wildmatch::WildMatch;

/// A wildcard pattern, matched case-insensitively
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Pattern(String);

impl Deref for Pattern {
    type Target = String;

    fn deref(&self) -> &String {
        &self.0
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Pattern {
    /// Construct a `Pattern`
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn matches(&self, s: &str) -> bool {
        WildMatch::new(&self.0.to_ascii_lowercase()).matches(&s.to_ascii_lowercase())
    }
}
