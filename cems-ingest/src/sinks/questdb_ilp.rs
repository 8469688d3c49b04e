use std::{
    net::SocketAddr,
    time::{Duration, SystemTime},
};

use cems_client::domain::{EmissionBatch, HourlyEmission};
use futures::StreamExt;
use time::OffsetDateTime;
use tokio::{io::AsyncWriteExt, net::TcpStream, sync::Mutex};

use super::SchemaGuard;
use crate::pipeline::{Envelope, PipelineError, Sink};

const MEASUREMENT: &str = "hourly_emissions_epacems";

/// Escape measurement/tag keys/tag values/field keys for ILP.
///
/// ILP requires escaping commas, spaces and equals with a backslash.
fn ilp_escape_ident(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            ',' | ' ' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
}

fn push_tag(out: &mut String, key: &str, value: &str) {
    out.push(',');
    ilp_escape_ident(key, out);
    out.push('=');
    ilp_escape_ident(value, out);
}

fn push_field_key(out: &mut String, first: &mut bool, key: &str) {
    if *first {
        *first = false;
    } else {
        out.push(',');
    }
    ilp_escape_ident(key, out);
    out.push('=');
}

fn push_field_f64(out: &mut String, first: &mut bool, key: &str, value: Option<f64>) {
    if let Some(v) = value {
        push_field_key(out, first, key);
        out.push_str(&v.to_string());
    }
}

fn push_field_i64(out: &mut String, first: &mut bool, key: &str, value: Option<i64>) {
    if let Some(v) = value {
        push_field_key(out, first, key);
        out.push_str(&v.to_string());
        out.push('i');
    }
}

fn ts_to_unix_nanos(ts: OffsetDateTime) -> i128 {
    ts.unix_timestamp_nanos()
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Identity of a reading: the same plant, unit and hour always hash the
/// same, so replays deduplicate.
fn event_id(e: &HourlyEmission) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&ts_to_unix_nanos(e.operating_datetime_utc).to_le_bytes());
    h.update(&e.plant_id.to_le_bytes());
    hash_str(&mut h, &e.unit_code);
    h.finalize().to_hex().to_string()
}

pub fn write_ilp_line(e: &HourlyEmission, out: &mut String) {
    out.push_str(MEASUREMENT);

    // tags (SYMBOL columns)
    push_tag(out, "event_id", &event_id(e));
    push_tag(out, "plant_id", &e.plant_id.to_string());
    if !e.state.is_empty() {
        push_tag(out, "state", &e.state);
    }
    if !e.unit_code.is_empty() {
        push_tag(out, "unit_code", &e.unit_code);
    }
    if let Some(code) = &e.so2_mass_measurement_code {
        push_tag(out, "so2_mass_measurement_code", code);
    }

    // fields
    out.push(' ');
    let mut first = true;
    push_field_f64(out, &mut first, "gross_load_mw", e.gross_load_mw);
    push_field_f64(out, &mut first, "op_time", e.op_time);
    push_field_f64(out, &mut first, "steam_load_1000_lbs", e.steam_load_1000_lbs);
    push_field_f64(out, &mut first, "so2_mass_lbs", e.so2_mass_lbs);
    push_field_f64(out, &mut first, "nox_rate_lbs_mmbtu", e.nox_rate_lbs_mmbtu);
    push_field_f64(out, &mut first, "nox_mass_lbs", e.nox_mass_lbs);
    push_field_f64(out, &mut first, "co2_mass_tons", e.co2_mass_tons);
    push_field_f64(out, &mut first, "heat_content_mmbtu", e.heat_content_mmbtu);
    push_field_i64(out, &mut first, "facility_id", e.facility_id);
    push_field_i64(out, &mut first, "unit_id", e.unit_id);
    // ILP needs at least one field.
    if first {
        push_field_i64(out, &mut first, "plant_id", Some(e.plant_id));
    }

    // timestamp (nanos)
    out.push(' ');
    out.push_str(&ts_to_unix_nanos(e.operating_datetime_utc).to_string());
}

/// QuestDB line-protocol loader over a single TCP connection.
pub struct QuestDbIlpSink {
    addr: SocketAddr,
    batch_size: usize,
    max_retries: u32,
    retry_backoff: Duration,
    guard: Mutex<SchemaGuard>,
}

impl QuestDbIlpSink {
    pub fn new(
        addr: SocketAddr,
        batch_size: usize,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            addr,
            batch_size: batch_size.max(1),
            max_retries,
            retry_backoff,
            guard: Mutex::new(SchemaGuard::default()),
        }
    }

    async fn connect(&self) -> Result<TcpStream, PipelineError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| PipelineError::Sink(format!("failed to connect to QuestDB ILP: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    fn encode(records: &[HourlyEmission]) -> Vec<u8> {
        // Heuristic capacity: ~320 bytes per line.
        let mut s = String::with_capacity(records.len().saturating_mul(320));
        for record in records {
            write_ilp_line(record, &mut s);
            s.push('\n');
        }
        s.into_bytes()
    }

    async fn flush_chunk(
        &self,
        stream: &mut TcpStream,
        records: &[HourlyEmission],
    ) -> Result<(), PipelineError> {
        if records.is_empty() {
            return Ok(());
        }

        let payload = Self::encode(records);

        let mut attempt: u32 = 0;
        loop {
            match stream.write_all(&payload).await {
                Ok(()) => {
                    metrics::counter!("cems_sink_records_written_total")
                        .increment(records.len() as u64);
                    metrics::counter!("questdb_ilp_bytes_total").increment(payload.len() as u64);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "QuestDB ILP flush failed, reconnecting and retrying"
                    );
                    metrics::counter!("questdb_ilp_retry_total").increment(1);

                    tokio::time::sleep(sleep_for).await;
                    *stream = self.connect().await?;
                }
                Err(e) => {
                    tracing::error!(error = %e, "QuestDB ILP flush failed, giving up");
                    metrics::counter!("questdb_ilp_sink_errors_total").increment(1);
                    return Err(PipelineError::Sink(format!("ilp write failed: {e}")));
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Sink<EmissionBatch> for QuestDbIlpSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<EmissionBatch>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        let mut stream = self.connect().await?;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "upstream failure, stopping QuestDbIlpSink");
                    let _ = stream.shutdown().await;
                    return Err(e);
                }
            };

            self.guard.lock().await.check(&env.payload)?;
            for chunk in env.payload.records.chunks(self.batch_size) {
                self.flush_chunk(&mut stream, chunk).await?;
            }

            if let Ok(dur) = SystemTime::now().duration_since(env.received_at) {
                metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
            }
            tracing::info!(
                batch = %env.payload.key,
                records = env.payload.len(),
                "batch written to QuestDB ILP"
            );
        }

        // Best-effort flush.
        let _ = stream.shutdown().await;

        Ok(())
    }
}
