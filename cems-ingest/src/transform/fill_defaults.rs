use std::collections::BTreeMap;

use cems_client::domain::{columns, ObservationBatch};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FillDefaultsError {
    #[error("'{0}' is not a numeric observation column and cannot take a fill default")]
    UnknownColumn(String),
}

/// Per-column replacement values for missing numeric readings.
///
/// Only columns the batch actually carries are filled; a column absent from
/// an older reporting year stays absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillDefaults {
    values: BTreeMap<String, f64>,
}

impl FillDefaults {
    pub fn new(values: BTreeMap<String, f64>) -> Result<Self, FillDefaultsError> {
        if let Some(unknown) = values.keys().find(|k| !columns::NUMERIC.contains(&k.as_str())) {
            return Err(FillDefaultsError::UnknownColumn(unknown.clone()));
        }
        Ok(Self { values })
    }

    /// Zero gross load and heat input where the source left them blank.
    pub fn standard() -> BTreeMap<String, f64> {
        BTreeMap::from([
            (columns::GROSS_LOAD_MW.to_string(), 0.0),
            (columns::HEAT_CONTENT_MMBTU.to_string(), 0.0),
        ])
    }

    pub fn apply(&self, mut batch: ObservationBatch) -> ObservationBatch {
        let present: Vec<(&str, f64)> = self
            .values
            .iter()
            .filter(|(name, _)| batch.columns.contains(name.as_str()))
            .map(|(name, value)| (name.as_str(), *value))
            .collect();
        if present.is_empty() {
            return batch;
        }

        for record in &mut batch.records {
            for (name, default) in &present {
                if let Some(slot) = record.numeric_mut(name) {
                    if slot.is_none() {
                        *slot = Some(*default);
                    }
                }
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cems_client::domain::{BatchKey, RawHourlyObservation};

    fn batch(columns: &[&str], gross_load: Option<f64>, heat: Option<f64>) -> ObservationBatch {
        let mut obs = RawHourlyObservation::new(1, "01-01-2015", 0);
        obs.gross_load_mw = gross_load;
        obs.heat_content_mmbtu = heat;
        ObservationBatch::new(BatchKey::new(2015, "CO"), columns.iter().copied(), vec![obs])
    }

    #[test]
    fn fills_missing_values_in_present_columns() {
        let fill = FillDefaults::new(FillDefaults::standard()).unwrap();
        let out = fill.apply(batch(&["gross_load_mw", "heat_content_mmbtu"], None, Some(12.5)));

        assert_eq!(out.records[0].gross_load_mw, Some(0.0));
        assert_eq!(out.records[0].heat_content_mmbtu, Some(12.5));
    }

    #[test]
    fn leaves_absent_columns_untouched() {
        let fill = FillDefaults::new(FillDefaults::standard()).unwrap();
        let out = fill.apply(batch(&["gross_load_mw"], None, None));

        assert_eq!(out.records[0].gross_load_mw, Some(0.0));
        assert_eq!(out.records[0].heat_content_mmbtu, None);
        assert!(!out.has_column("heat_content_mmbtu"));
    }

    #[test]
    fn filling_twice_is_a_no_op() {
        let fill = FillDefaults::new(FillDefaults::standard()).unwrap();
        let once = fill.apply(batch(&["gross_load_mw", "heat_content_mmbtu"], None, None));
        let twice = fill.apply(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_numeric_columns() {
        let values = BTreeMap::from([("plant_id".to_string(), 0.0)]);
        assert_eq!(
            FillDefaults::new(values),
            Err(FillDefaultsError::UnknownColumn("plant_id".to_string()))
        );
    }
}
