//! Capability tokens and the deny-by-default gate.
//!
//! A capability is an opaque permission token (e.g. `"fs:read"`) a handler
//! must be granted before the pipeline dispatches it. The gate itself is a
//! pure set comparison; the caller emits the denial event and builds the
//! `CAPABILITY_MISSING` failure envelope.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Ordered set of unique capability tokens.
///
/// Order is irrelevant to the semantics; a `BTreeSet` keeps serialisation
/// deterministic.
///
/// # Example
///
/// ```
/// use gantry_plugins::capability::CapabilitySet;
///
/// let set = CapabilitySet::from_iter(["fs:read", "net:fetch"]);
/// assert!(set.contains("fs:read"));
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<String>);

impl CapabilitySet {
    /// Creates an empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the token is present.
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    /// Returns the tokens present in `self` but absent from `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    /// Returns `true` when every token in `self` is present in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Returns the number of tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no tokens are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the tokens in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Result of a capability gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityCheck {
    /// `true` when every required token was granted.
    pub ok: bool,
    /// Required tokens absent from the grant.
    pub missing: CapabilitySet,
}

/// Deny-by-default comparison of required against granted capabilities.
pub struct CapabilityGate;

impl CapabilityGate {
    /// Checks that every required capability is granted.
    ///
    /// An empty requirement always passes. The check has no side effects;
    /// the pipeline is responsible for emitting the denial event.
    ///
    /// # Example
    ///
    /// ```
    /// use gantry_plugins::capability::{CapabilityGate, CapabilitySet};
    ///
    /// let required = CapabilitySet::from_iter(["fs:read"]);
    /// let granted = CapabilitySet::from_iter(["fs:write"]);
    /// let check = CapabilityGate::check(&required, &granted);
    /// assert!(!check.ok);
    /// assert!(check.missing.contains("fs:read"));
    /// ```
    #[must_use]
    pub fn check(required: &CapabilitySet, granted: &CapabilitySet) -> CapabilityCheck {
        let missing = required.difference(granted);
        CapabilityCheck {
            ok: missing.is_empty(),
            missing,
        }
    }
}

#[cfg(test)]
mod tests;
