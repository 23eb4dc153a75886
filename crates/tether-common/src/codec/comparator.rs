//! Comparator descriptors and the policy that decides which may cross the wire.
//!
//! Sorted containers carry their comparator. Only a closed set of standard
//! comparators is accepted by default; named custom comparators must be
//! explicitly trusted on both ends.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::value::Value;
use crate::protocol::error::CodecError;

/// Wire id prefix for a named custom comparator.
pub(crate) const CUSTOM_COMPARATOR_ID: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Natural ordering of the values
    Natural,
    /// Reverse of the natural ordering
    Reverse,
    /// Every pair compares equal
    AllEqual,
    /// Orders by the display form of the values
    UsingToString,
    /// A comparator known to both peers by name. It cannot be evaluated
    /// locally, so containers using it keep the order they were built in.
    Custom(String),
}

impl Comparator {
    pub(crate) fn wire_id(&self) -> u8 {
        match self {
            Comparator::Natural => 1,
            Comparator::Reverse => 2,
            Comparator::AllEqual => 3,
            Comparator::UsingToString => 4,
            Comparator::Custom(_) => CUSTOM_COMPARATOR_ID,
        }
    }

    pub(crate) fn from_wire_id(id: u8) -> Option<Comparator> {
        match id {
            1 => Some(Comparator::Natural),
            2 => Some(Comparator::Reverse),
            3 => Some(Comparator::AllEqual),
            4 => Some(Comparator::UsingToString),
            _ => None,
        }
    }

    /// Compares two values; `None` when they are not comparable under this
    /// comparator.
    pub fn compare(&self, a: &Value, b: &Value) -> Option<Ordering> {
        match self {
            Comparator::Natural => a.natural_cmp(b),
            Comparator::Reverse => a.natural_cmp(b).map(Ordering::reverse),
            Comparator::AllEqual => Some(Ordering::Equal),
            Comparator::UsingToString => Some(a.to_string().cmp(&b.to_string())),
            Comparator::Custom(_) => None,
        }
    }

    /// Total order for sorting containers built with this comparator.
    pub(crate) fn sort_order(&self, a: &Value, b: &Value) -> Ordering {
        match self {
            Comparator::Natural => a.total_cmp(b),
            Comparator::Reverse => b.total_cmp(a),
            Comparator::AllEqual | Comparator::Custom(_) => Ordering::Equal,
            Comparator::UsingToString => a.to_string().cmp(&b.to_string()),
        }
    }
}

/// Which comparators may be encoded and decoded.
///
/// # Example
///
/// ```
/// use tether_common::{Comparator, ComparatorPolicy};
///
/// let strict = ComparatorPolicy::default();
/// assert!(strict.permits(&Comparator::Reverse));
/// assert!(!strict.permits(&Comparator::Custom("byLength".into())));
///
/// let trusting = ComparatorPolicy::default().trust_custom("byLength");
/// assert!(trusting.permits(&Comparator::Custom("byLength".into())));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparatorPolicy {
    /// Standard comparators that are accepted
    pub allowed: Vec<Comparator>,
    /// Custom comparator names that are accepted
    pub trusted_custom: Vec<String>,
}

impl Default for ComparatorPolicy {
    fn default() -> Self {
        ComparatorPolicy {
            allowed: vec![
                Comparator::Natural,
                Comparator::Reverse,
                Comparator::AllEqual,
                Comparator::UsingToString,
            ],
            trusted_custom: Vec::new(),
        }
    }
}

impl ComparatorPolicy {
    /// Adds a trusted custom comparator name.
    pub fn trust_custom(mut self, name: impl Into<String>) -> Self {
        self.trusted_custom.push(name.into());
        self
    }

    /// Restricts the accepted standard comparators.
    pub fn with_allowed(mut self, allowed: Vec<Comparator>) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn permits(&self, comparator: &Comparator) -> bool {
        match comparator {
            Comparator::Custom(name) => self.trusted_custom.iter().any(|n| n == name),
            standard => self.allowed.contains(standard),
        }
    }

    pub(crate) fn check(&self, comparator: &Comparator) -> Result<(), CodecError> {
        if self.permits(comparator) {
            Ok(())
        } else {
            Err(CodecError::ComparatorRefused(format!("{:?}", comparator)))
        }
    }
}
