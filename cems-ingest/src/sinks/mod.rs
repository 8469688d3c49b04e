pub mod csv_export;
pub mod questdb;
pub mod questdb_ilp;

use std::collections::BTreeSet;

use cems_client::domain::EmissionBatch;

use crate::pipeline::PipelineError;

pub use csv_export::CsvExportSink;
pub use questdb::QuestDbSink;
pub use questdb_ilp::QuestDbIlpSink;

/// Locks the column set of the first batch a loader sees and rejects any
/// later batch whose columns differ.
#[derive(Debug, Default)]
pub struct SchemaGuard {
    expected: Option<BTreeSet<String>>,
}

impl SchemaGuard {
    pub fn check(&mut self, batch: &EmissionBatch) -> Result<(), PipelineError> {
        match &self.expected {
            None => {
                self.expected = Some(batch.columns.clone());
                Ok(())
            }
            Some(expected) if *expected == batch.columns => Ok(()),
            Some(expected) => {
                let missing: Vec<&String> = expected.difference(&batch.columns).collect();
                let extra: Vec<&String> = batch.columns.difference(expected).collect();
                Err(PipelineError::Sink(format!(
                    "batch {} columns drifted: missing {missing:?}, unexpected {extra:?}",
                    batch.key
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cems_client::domain::BatchKey;

    fn batch(columns: &[&str]) -> EmissionBatch {
        EmissionBatch {
            key: BatchKey::new(2010, "PA"),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            records: Vec::new(),
        }
    }

    #[test]
    fn guard_accepts_identical_column_sets() {
        let mut guard = SchemaGuard::default();
        guard.check(&batch(&["plant_id", "unit_id"])).unwrap();
        guard.check(&batch(&["unit_id", "plant_id"])).unwrap();
    }

    #[test]
    fn guard_rejects_drift() {
        let mut guard = SchemaGuard::default();
        guard.check(&batch(&["plant_id", "unit_id"])).unwrap();

        let err = guard.check(&batch(&["plant_id", "facility_id"])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unit_id"));
        assert!(msg.contains("facility_id"));
    }
}
