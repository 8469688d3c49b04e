use std::collections::HashMap;

use cems_client::domain::ObservationBatch;

/// Maps source facility codes (EPA ORISPL) onto canonical EIA plant ids.
///
/// Runs before timestamp resolution, which looks offsets up by the
/// canonical id.
pub trait PlantIdReconciler: Send + Sync {
    fn reconcile(&self, batch: ObservationBatch) -> ObservationBatch;
}

/// ORISPL codes and EIA plant ids are taken to be the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityReconciler;

impl PlantIdReconciler for IdentityReconciler {
    fn reconcile(&self, batch: ObservationBatch) -> ObservationBatch {
        batch
    }
}

/// Rewrites the known divergent ORISPL codes from a correction table.
/// Codes missing from the table pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct CrosswalkReconciler {
    plant_ids: HashMap<i64, i64>,
}

impl CrosswalkReconciler {
    pub fn new(plant_ids: HashMap<i64, i64>) -> Self {
        Self { plant_ids }
    }
}

impl FromIterator<(i64, i64)> for CrosswalkReconciler {
    fn from_iter<T: IntoIterator<Item = (i64, i64)>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl PlantIdReconciler for CrosswalkReconciler {
    fn reconcile(&self, mut batch: ObservationBatch) -> ObservationBatch {
        let mut rewritten = 0usize;
        for record in &mut batch.records {
            if let Some(&plant_id) = self.plant_ids.get(&record.plant_id) {
                record.plant_id = plant_id;
                rewritten += 1;
            }
        }
        if rewritten > 0 {
            tracing::debug!(batch = %batch.key, rewritten, "plant ids reconciled");
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cems_client::domain::{BatchKey, RawHourlyObservation};

    fn batch(plant_ids: &[i64]) -> ObservationBatch {
        let records = plant_ids
            .iter()
            .map(|&id| RawHourlyObservation::new(id, "01-01-2015", 0))
            .collect();
        ObservationBatch::new(BatchKey::new(2015, "TX"), ["plant_id"], records)
    }

    #[test]
    fn identity_leaves_batch_untouched() {
        let input = batch(&[1, 2, 3]);
        assert_eq!(IdentityReconciler.reconcile(input.clone()), input);
    }

    #[test]
    fn crosswalk_rewrites_only_listed_codes() {
        let crosswalk: CrosswalkReconciler = [(10, 55_000)].into_iter().collect();
        let out = crosswalk.reconcile(batch(&[10, 11, 10]));

        let ids: Vec<i64> = out.records.iter().map(|r| r.plant_id).collect();
        assert_eq!(ids, vec![55_000, 11, 55_000]);
    }
}
