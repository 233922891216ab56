use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Separator between entries in the textual form of a [`LoadMap`].
const ENTRY_SEPARATOR: char = ',';

/// Separator between a metric name and its value.
const VALUE_SEPARATOR: char = '=';

/// Mapping from a health metric name to a numeric threshold.
///
/// The textual form is `metric=value[,metric=value...]`, e.g. `threads_running=25,lag_ms=1500`.
/// Entries are kept ordered by metric name so rendering and iteration are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadMap(BTreeMap<String, f64>);

impl LoadMap {
    /// Creates an empty load map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a load map from its `metric=value` textual form.
    ///
    /// Empty input and empty entries (e.g. trailing commas) yield no entries.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();

        for entry in input.split(ENTRY_SEPARATOR) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let invalid = || ValidationError::InvalidLoadMapEntry {
                entry: entry.to_string(),
            };

            let (metric, value) = entry.split_once(VALUE_SEPARATOR).ok_or_else(invalid)?;
            let metric = metric.trim();
            if metric.is_empty() {
                return Err(invalid());
            }

            let value: f64 = value.trim().parse().map_err(|_| invalid())?;
            if !value.is_finite() {
                return Err(invalid());
            }

            map.insert(metric.to_string(), value);
        }

        Ok(Self(map))
    }

    /// Returns an independent copy of this map.
    ///
    /// Mutating the returned map never affects the receiver.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Inserts or replaces the threshold of `metric`, returning the previous value.
    pub fn insert(&mut self, metric: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(metric.into(), value)
    }

    /// Removes `metric`, returning its value if it was present.
    pub fn remove(&mut self, metric: &str) -> Option<f64> {
        self.0.remove(metric)
    }

    /// Returns the value of `metric`.
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.0.contains_key(metric)
    }

    /// Iterates over `(metric, value)` pairs ordered by metric name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(metric, value)| (metric.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for LoadMap {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<K> FromIterator<(K, f64)> for LoadMap
where
    K: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(metric, value)| (metric.into(), value))
                .collect(),
        )
    }
}

impl fmt::Display for LoadMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (metric, value)) in self.0.iter().enumerate() {
            if index > 0 {
                write!(f, "{ENTRY_SEPARATOR}")?;
            }
            write!(f, "{metric}{VALUE_SEPARATOR}{value}")?;
        }

        Ok(())
    }
}
