use std::time::{Duration, SystemTime};

use cems_client::domain::{EmissionBatch, HourlyEmission};
use futures::StreamExt;
use sqlx::{postgres::PgPool, Postgres, QueryBuilder};
use tokio::sync::Mutex;

use super::SchemaGuard;
use crate::pipeline::{Envelope, PipelineError, Sink};

const INSERT_PREFIX: &str = "INSERT INTO hourly_emissions_epacems (operating_datetime_utc, \
     state, plant_id, unit_code, op_time, gross_load_mw, steam_load_1000_lbs, so2_mass_lbs, \
     so2_mass_measurement_code, nox_rate_lbs_mmbtu, nox_mass_lbs, co2_mass_tons, \
     heat_content_mmbtu, facility_id, unit_id) ";

/// Parameters bound per row by `insert_query`.
const BINDS_PER_ROW: usize = 15;

/// Postgres caps a single statement at `u16::MAX` bind parameters.
const MAX_ROWS_PER_INSERT: usize = u16::MAX as usize / BINDS_PER_ROW;

/// Rows per INSERT for a configured `batch_size`.
fn rows_per_insert(batch_size: usize) -> usize {
    batch_size.clamp(1, MAX_ROWS_PER_INSERT)
}

fn insert_query(records: &[HourlyEmission]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(INSERT_PREFIX);
    builder.push_values(records, |mut b, e| {
        b.push_bind(e.operating_datetime_utc)
            .push_bind(&e.state)
            .push_bind(e.plant_id)
            .push_bind(&e.unit_code)
            .push_bind(e.op_time)
            .push_bind(e.gross_load_mw)
            .push_bind(e.steam_load_1000_lbs)
            .push_bind(e.so2_mass_lbs)
            .push_bind(&e.so2_mass_measurement_code)
            .push_bind(e.nox_rate_lbs_mmbtu)
            .push_bind(e.nox_mass_lbs)
            .push_bind(e.co2_mass_tons)
            .push_bind(e.heat_content_mmbtu)
            .push_bind(e.facility_id)
            .push_bind(e.unit_id);
    });
    builder
}

/// Loads cleaned batches into QuestDB over pgwire, `batch_size` rows per
/// INSERT, capped so a statement stays within the bind-parameter limit.
pub struct QuestDbSink {
    pool: PgPool,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
    guard: Mutex<SchemaGuard>,
}

impl QuestDbSink {
    pub fn new(pool: PgPool, batch_size: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        let rows = rows_per_insert(batch_size);
        if rows < batch_size {
            tracing::warn!(batch_size, rows, "pgwire batch_size capped by bind-parameter limit");
        }
        Self {
            pool,
            batch_size: rows,
            max_retries,
            retry_backoff,
            guard: Mutex::new(SchemaGuard::default()),
        }
    }

    async fn flush_chunk(&self, records: &[HourlyEmission]) -> Result<(), PipelineError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut attempt: u32 = 0;
        loop {
            match insert_query(records).build().execute(&self.pool).await {
                Ok(_) => {
                    metrics::counter!("cems_sink_records_written_total")
                        .increment(records.len() as u64);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "questdb sink flush failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "questdb sink flush failed, giving up");
                    metrics::counter!("questdb_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(e.to_string()));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<EmissionBatch> for QuestDbSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<EmissionBatch>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "upstream failure, stopping QuestDbSink");
                    return Err(e);
                }
            };

            self.guard.lock().await.check(&env.payload)?;
            for chunk in env.payload.records.chunks(self.batch_size) {
                self.flush_chunk(chunk).await?;
            }

            if let Ok(dur) = SystemTime::now().duration_since(env.received_at) {
                metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
            }
            tracing::info!(
                batch = %env.payload.key,
                records = env.payload.len(),
                "batch written to QuestDB"
            );
        }

        Ok(())
    }
}
