//! Logical egress destinations
//!
//! A [`Destination`] names where an outgoing message is written. The wire
//! form is the prefix joined with a date suffix that rolls over with the
//! configured [`Frequency`], so `logalike` daily becomes e.g.
//! `logalike-2015.09.30`.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::TypeError;

const SEPARATOR: char = '-';

/// How often a destination's wire name rolls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// The suffix is the current date; a new name every day.
    Daily,
    /// The suffix is the first day of the current month.
    Monthly,
    /// No suffix; the name never changes.
    Constant,
}

impl Frequency {
    /// Formats the date suffix for this frequency, or `None` for constant
    /// destinations.
    fn suffix(&self, date: NaiveDate) -> Option<String> {
        match self {
            Frequency::Daily => Some(date.format("%Y.%m.%d").to_string()),
            Frequency::Monthly => Some(format!("{}.01", date.format("%Y.%m"))),
            Frequency::Constant => None,
        }
    }
}

/// A logical destination: a name prefix plus the frequency with which its
/// date suffix changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    prefix: String,
    frequency: Frequency,
}

impl Destination {
    /// Creates a destination. The prefix cannot be empty.
    pub fn new(prefix: impl Into<String>, frequency: Frequency) -> Result<Self, TypeError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(TypeError::configuration("destination prefix cannot be empty"));
        }
        Ok(Destination { prefix, frequency })
    }

    /// A destination whose wire name changes daily.
    pub fn daily(prefix: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(prefix, Frequency::Daily)
    }

    /// A destination whose wire name changes monthly.
    pub fn monthly(prefix: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(prefix, Frequency::Monthly)
    }

    /// A destination whose wire name never changes.
    pub fn constant(prefix: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(prefix, Frequency::Constant)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// The concrete name to write to for the given date.
    pub fn wire_name(&self, date: NaiveDate) -> String {
        match self.frequency.suffix(date) {
            Some(suffix) => format!("{}{}{}", self.prefix, SEPARATOR, suffix),
            None => self.prefix.clone(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frequency {
            Frequency::Constant => write!(f, "{}", self.prefix),
            Frequency::Daily => write!(f, "{} (daily)", self.prefix),
            Frequency::Monthly => write!(f, "{} (monthly)", self.prefix),
        }
    }
}
