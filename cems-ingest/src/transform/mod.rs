//! Hourly CEMS cleaning: fill defaults, reconcile plant ids, resolve UTC
//! timestamps, harmonize columns, correct gross load.

pub mod fill_defaults;
pub mod gross_load;
pub mod harmonize;
pub mod plant_offsets;
pub mod reconcile;
pub mod timestamps;

use std::sync::Arc;

use async_stream::try_stream;
use cems_client::domain::{EmissionBatch, ObservationBatch, PlantTimezone};
use futures::{Stream, StreamExt};

pub use fill_defaults::{FillDefaults, FillDefaultsError};
pub use gross_load::{GrossLoadCorrection, GrossLoadCorrectionError};
pub use harmonize::harmonize_columns;
pub use plant_offsets::{PlantOffsetRegistry, RegistryError};
pub use reconcile::{CrosswalkReconciler, IdentityReconciler, PlantIdReconciler};
pub use timestamps::{resolve_timestamps, ResolveError};

use crate::{
    config::TransformConfig,
    pipeline::{Envelope, PipelineError, Transform},
};

#[derive(thiserror::Error, Debug)]
pub enum TransformSetupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    FillDefaults(#[from] FillDefaultsError),
    #[error(transparent)]
    GrossLoad(#[from] GrossLoadCorrectionError),
}

/// The composed per-batch transform. Cheap to clone; the registry and
/// reconciler are shared read-only.
#[derive(Clone)]
pub struct CemsTransform {
    registry: Arc<PlantOffsetRegistry>,
    fill: FillDefaults,
    reconciler: Arc<dyn PlantIdReconciler>,
    gross_load: GrossLoadCorrection,
}

impl CemsTransform {
    /// Build the offset registry once and wire up the configured stages.
    pub fn new<I>(plant_timezones: I, cfg: &TransformConfig) -> Result<Self, TransformSetupError>
    where
        I: IntoIterator<Item = PlantTimezone>,
    {
        let registry = PlantOffsetRegistry::build(plant_timezones)?;
        let fill = FillDefaults::new(cfg.fill_defaults.clone())?;
        cfg.gross_load.validate()?;

        let reconciler: Arc<dyn PlantIdReconciler> = if cfg.plant_id_crosswalk.is_empty() {
            Arc::new(IdentityReconciler)
        } else {
            Arc::new(
                cfg.plant_id_crosswalk
                    .iter()
                    .map(|e| (e.source_plant_id, e.plant_id))
                    .collect::<CrosswalkReconciler>(),
            )
        };

        Ok(Self::from_parts(Arc::new(registry), fill, reconciler, cfg.gross_load))
    }

    pub fn from_parts(
        registry: Arc<PlantOffsetRegistry>,
        fill: FillDefaults,
        reconciler: Arc<dyn PlantIdReconciler>,
        gross_load: GrossLoadCorrection,
    ) -> Self {
        Self {
            registry,
            fill,
            reconciler,
            gross_load,
        }
    }

    pub fn registry(&self) -> &PlantOffsetRegistry {
        &self.registry
    }

    /// Run one raw batch through every stage, in order.
    pub fn apply_batch(&self, batch: ObservationBatch) -> Result<EmissionBatch, PipelineError> {
        let key = batch.key.clone();
        let records_in = batch.len();

        let batch = self.fill.apply(batch);
        let batch = self.reconciler.reconcile(batch);
        let batch = match resolve_timestamps(batch, &self.registry) {
            Ok(b) => b,
            Err(e) => {
                if let ResolveError::MissingOffset { plant_ids } = &e {
                    metrics::counter!("cems_missing_offset_batches_total").increment(1);
                    tracing::error!(
                        batch = %key,
                        plant_ids = ?plant_ids,
                        "plants without utc offset"
                    );
                }
                return Err(e.into());
            }
        };
        let batch = harmonize_columns(batch);
        let (batch, corrected) = self.gross_load.apply(batch);

        metrics::counter!("cems_batches_transformed_total").increment(1);
        metrics::counter!("cems_records_transformed_total").increment(batch.len() as u64);
        tracing::info!(batch = %key, records = records_in, corrected, "batch transformed");

        Ok(batch)
    }

    /// Lazily transform a stream of raw batches, one at a time and in order.
    /// The stream ends right after the first error it yields.
    pub fn into_stream<S>(
        self,
        input: S,
    ) -> impl Stream<Item = Result<Envelope<EmissionBatch>, PipelineError>> + Send
    where
        S: Stream<Item = Result<Envelope<ObservationBatch>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        let mut input = input;
        try_stream! {
            while let Some(item) = input.next().await {
                let env = item?;
                let received_at = env.received_at;
                let cleaned = self.apply_batch(env.payload)?;
                yield Envelope { payload: cleaned, received_at };
            }
        }
    }
}

#[async_trait::async_trait]
impl Transform<ObservationBatch, EmissionBatch> for CemsTransform {
    async fn apply(
        &self,
        input: Envelope<ObservationBatch>,
    ) -> Result<Envelope<EmissionBatch>, PipelineError> {
        let stages = self.clone();
        let received_at = input.received_at;
        let cleaned = tokio::task::spawn_blocking(move || stages.apply_batch(input.payload))
            .await
            .map_err(|e| PipelineError::Transform(format!("transform worker failed: {e}")))??;
        Ok(Envelope {
            payload: cleaned,
            received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrosswalkEntry;
    use cems_client::domain::{BatchKey, RawHourlyObservation};
    use std::collections::BTreeMap;
    use time::macros::{datetime, offset};

    fn tz(plant_id: i64, name: &str) -> PlantTimezone {
        PlantTimezone {
            plant_id,
            timezone: Some(name.to_string()),
        }
    }

    fn no_fill() -> TransformConfig {
        TransformConfig {
            fill_defaults: BTreeMap::new(),
            ..TransformConfig::default()
        }
    }

    fn pre_2008_batch(plant_id: i64, gross_load: Option<f64>) -> ObservationBatch {
        let mut obs = RawHourlyObservation::new(plant_id, "01-01-2015", 0);
        obs.gross_load_mw = gross_load;
        ObservationBatch::new(
            BatchKey::new(2015, "CO"),
            ["plant_id", "local_date", "local_hour", "gross_load_mw"],
            vec![obs],
        )
    }

    #[test]
    fn end_to_end_single_record() {
        let transform = CemsTransform::new(vec![tz(1, "UTC")], &no_fill()).unwrap();
        let out = transform.apply_batch(pre_2008_batch(1, Some(3200.0))).unwrap();

        assert_eq!(out.len(), 1);
        let rec = &out.records[0];
        assert_eq!(rec.plant_id, 1);
        assert_eq!(rec.operating_datetime_utc, datetime!(2015-01-01 00:00 UTC));
        assert_eq!(rec.gross_load_mw, Some(3.2));
        assert_eq!(rec.facility_id, None);
        assert_eq!(rec.unit_id, None);

        let columns: Vec<&str> = out.columns.iter().map(String::as_str).collect();
        assert_eq!(
            columns,
            ["facility_id", "gross_load_mw", "operating_datetime_utc", "plant_id", "unit_id"]
        );
    }

    #[test]
    fn fill_defaults_run_before_correction() {
        let transform =
            CemsTransform::new(vec![tz(1, "America/Denver")], &TransformConfig::default()).unwrap();
        let out = transform.apply_batch(pre_2008_batch(1, None)).unwrap();

        assert_eq!(out.records[0].gross_load_mw, Some(0.0));
        assert_eq!(out.records[0].operating_datetime_utc, datetime!(2015-01-01 07:00 UTC));
    }

    #[test]
    fn crosswalk_runs_before_offset_lookup() {
        let cfg = TransformConfig {
            plant_id_crosswalk: vec![CrosswalkEntry {
                source_plant_id: 880_001,
                plant_id: 7,
            }],
            ..no_fill()
        };
        let transform = CemsTransform::new(vec![tz(7, "America/New_York")], &cfg).unwrap();
        let out = transform.apply_batch(pre_2008_batch(880_001, Some(100.0))).unwrap();

        assert_eq!(out.records[0].plant_id, 7);
        assert_eq!(out.records[0].operating_datetime_utc, datetime!(2015-01-01 05:00 UTC));
    }

    #[test]
    fn unknown_plant_is_fatal() {
        let transform = CemsTransform::new(vec![tz(1, "UTC")], &no_fill()).unwrap();
        let err = transform.apply_batch(pre_2008_batch(2, Some(10.0))).unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Resolve(ResolveError::MissingOffset { ref plant_ids })
                if plant_ids == &vec![2]
        ));
    }

    #[test]
    fn setup_rejects_bad_configuration() {
        let cfg = TransformConfig {
            fill_defaults: BTreeMap::from([("state".to_string(), 0.0)]),
            ..TransformConfig::default()
        };
        assert!(matches!(
            CemsTransform::new(Vec::new(), &cfg),
            Err(TransformSetupError::FillDefaults(_))
        ));

        assert!(matches!(
            CemsTransform::new(vec![tz(1, "Nowhere/Special")], &TransformConfig::default()),
            Err(TransformSetupError::Registry(_))
        ));
    }

    type RawItem = Result<Envelope<ObservationBatch>, PipelineError>;

    fn raw_stream(
        batches: Vec<Result<ObservationBatch, PipelineError>>,
    ) -> impl Stream<Item = RawItem> + Send + Unpin + 'static {
        futures::stream::iter(batches.into_iter().map(|b| b.map(Envelope::now)))
    }

    #[test]
    fn stream_preserves_count_and_order() {
        let registry: PlantOffsetRegistry =
            [(1, offset!(-5)), (2, offset!(-6))].into_iter().collect();
        let transform = CemsTransform::from_parts(
            Arc::new(registry),
            FillDefaults::default(),
            Arc::new(IdentityReconciler),
            GrossLoadCorrection::default(),
        );

        let mut empty = pre_2008_batch(1, None);
        empty.records.clear();
        empty.key = BatchKey::new(2015, "AL");
        let mut second = pre_2008_batch(2, Some(50.0));
        second.key = BatchKey::new(2015, "TX");

        let input = raw_stream(vec![Ok(pre_2008_batch(1, Some(10.0))), Ok(empty), Ok(second)]);
        let out: Vec<_> =
            futures::executor::block_on(transform.into_stream(input).collect::<Vec<_>>());

        assert_eq!(out.len(), 3);
        let keys: Vec<String> = out
            .iter()
            .map(|r| r.as_ref().unwrap().payload.key.to_string())
            .collect();
        assert_eq!(keys, ["2015-CO", "2015-AL", "2015-TX"]);
        let sizes: Vec<usize> = out.iter().map(|r| r.as_ref().unwrap().payload.len()).collect();
        assert_eq!(sizes, [1, 0, 1]);
    }

    #[test]
    fn stream_stops_after_first_fatal_batch() {
        let registry: PlantOffsetRegistry = [(1, offset!(UTC))].into_iter().collect();
        let transform = CemsTransform::from_parts(
            Arc::new(registry),
            FillDefaults::default(),
            Arc::new(IdentityReconciler),
            GrossLoadCorrection::default(),
        );

        let input = raw_stream(vec![
            Ok(pre_2008_batch(1, Some(10.0))),
            Ok(pre_2008_batch(99, Some(10.0))),
            Ok(pre_2008_batch(1, Some(20.0))),
        ]);
        let out: Vec<_> =
            futures::executor::block_on(transform.into_stream(input).collect::<Vec<_>>());

        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(
            out[1],
            Err(PipelineError::Resolve(ResolveError::MissingOffset { .. }))
        ));
    }

    #[tokio::test]
    async fn transform_trait_runs_on_blocking_pool() {
        let transform = CemsTransform::new(vec![tz(1, "UTC")], &no_fill()).unwrap();
        let out = transform
            .apply(Envelope::now(pre_2008_batch(1, Some(25_000.0))))
            .await
            .unwrap();
        assert_eq!(out.payload.records[0].gross_load_mw, Some(25.0));
    }
}
