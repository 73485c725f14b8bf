//! The client roster: the externally supplied, ordered set of client names.

use std::collections::HashSet;

use crate::error::{ProvisionError, Result};

/// Names that would collide with Identity Store entries.
const RESERVED_NAMES: &[&str] = &["server", "ca"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    names: Vec<String>,
}

impl Roster {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for name in &names {
            validate_name(name)?;
            if !seen.insert(name.as_str()) {
                return Err(ProvisionError::InvalidRoster(format!(
                    "client {name:?} is listed more than once"
                )));
            }
        }
        Ok(Self { names })
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Client names become file names, so keep them to a portable character set.
///
/// Also applies to names given outside a roster (`revoke`, `export`).
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionError::InvalidRoster("client name is empty".into()));
    }
    if name.starts_with('.') {
        return Err(ProvisionError::InvalidRoster(format!(
            "client name {name:?} must not start with '.'"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(ProvisionError::InvalidRoster(format!(
            "client name {name:?} contains {bad:?}"
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ProvisionError::InvalidRoster(format!(
            "client name {name:?} is reserved"
        )));
    }
    Ok(())
}
