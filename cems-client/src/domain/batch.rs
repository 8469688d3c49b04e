use std::{collections::BTreeSet, fmt, str::FromStr};

use super::{HourlyEmission, RawHourlyObservation};

/// Partition label of a batch. Transforms only ever display it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchKey {
    pub year: i32,
    pub state: String,
}

impl BatchKey {
    pub fn new(year: i32, state: impl Into<String>) -> Self {
        Self {
            year,
            state: state.into().to_ascii_uppercase(),
        }
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.state)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchKeyError {
    #[error("batch key '{0}' is not of the form <year>-<state>")]
    Shape(String),
    #[error("invalid year in batch key '{0}'")]
    Year(String),
    #[error("invalid state in batch key '{0}'")]
    State(String),
}

impl FromStr for BatchKey {
    type Err = BatchKeyError;

    /// Parses `2015-CO` (state case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, state) = s
            .split_once('-')
            .ok_or_else(|| BatchKeyError::Shape(s.to_string()))?;
        let year: i32 = year
            .parse()
            .map_err(|_| BatchKeyError::Year(s.to_string()))?;
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(BatchKeyError::State(s.to_string()));
        }
        Ok(Self::new(year, state))
    }
}

/// A partition of raw readings plus the canonical columns its source
/// file actually carried.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch {
    pub key: BatchKey,
    pub columns: BTreeSet<String>,
    pub records: Vec<RawHourlyObservation>,
}

impl ObservationBatch {
    pub fn new<I, C>(key: BatchKey, columns: I, records: Vec<RawHourlyObservation>) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self {
            key,
            columns: columns.into_iter().map(Into::into).collect(),
            records,
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A cleaned partition, ready for loading.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionBatch {
    pub key: BatchKey,
    pub columns: BTreeSet<String>,
    pub records: Vec<HourlyEmission>,
}

impl EmissionBatch {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_key_parses_and_displays() {
        let key: BatchKey = "2015-co".parse().unwrap();
        assert_eq!(key, BatchKey::new(2015, "CO"));
        assert_eq!(key.to_string(), "2015-CO");
    }

    #[test]
    fn batch_key_rejects_malformed_labels() {
        assert!(matches!("2015".parse::<BatchKey>(), Err(BatchKeyError::Shape(_))));
        assert!(matches!("20x5-CO".parse::<BatchKey>(), Err(BatchKeyError::Year(_))));
        assert!(matches!("2015-COL".parse::<BatchKey>(), Err(BatchKeyError::State(_))));
    }

    #[test]
    fn batch_keys_order_by_year_then_state() {
        let mut keys = vec![
            BatchKey::new(2016, "AL"),
            BatchKey::new(2015, "WY"),
            BatchKey::new(2015, "AK"),
        ];
        keys.sort();
        let labels: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(labels, ["2015-AK", "2015-WY", "2016-AL"]);
    }
}
