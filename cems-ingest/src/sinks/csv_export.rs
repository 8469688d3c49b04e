use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};

use cems_client::domain::{columns, EmissionBatch, HourlyEmission};
use futures::StreamExt;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;

use super::SchemaGuard;
use crate::pipeline::{Envelope, PipelineError, Sink};

/// Output column order for the flat product. Only the columns a batch
/// carries are written.
const EXPORT_ORDER: &[&str] = &[
    columns::STATE,
    columns::PLANT_ID,
    columns::UNIT_CODE,
    columns::OPERATING_DATETIME_UTC,
    columns::OP_TIME,
    columns::GROSS_LOAD_MW,
    columns::STEAM_LOAD_1000_LBS,
    columns::SO2_MASS_LBS,
    columns::SO2_MASS_MEASUREMENT_CODE,
    columns::NOX_RATE_LBS_MMBTU,
    columns::NOX_MASS_LBS,
    columns::CO2_MASS_TONS,
    columns::HEAT_CONTENT_MMBTU,
    columns::FACILITY_ID,
    columns::UNIT_ID,
];

/// Writes each cleaned batch as `hourly_emissions_epacems-<year>-<state>.csv`
/// under `out_dir`. Files are written to a temporary name and renamed once
/// complete.
pub struct CsvExportSink {
    out_dir: PathBuf,
    guard: Mutex<SchemaGuard>,
}

impl CsvExportSink {
    pub fn new<P: Into<PathBuf>>(out_dir: P) -> Self {
        Self {
            out_dir: out_dir.into(),
            guard: Mutex::new(SchemaGuard::default()),
        }
    }

    pub fn path_for(&self, batch: &EmissionBatch) -> PathBuf {
        export_path(&self.out_dir, batch)
    }
}

fn export_path(out_dir: &Path, batch: &EmissionBatch) -> PathBuf {
    out_dir.join(format!("hourly_emissions_epacems-{}.csv", batch.key))
}

fn write_batch(out_dir: &Path, batch: &EmissionBatch) -> Result<PathBuf, PipelineError> {
    fs::create_dir_all(out_dir).map_err(|e| {
        PipelineError::Sink(format!("failed to create {}: {e}", out_dir.display()))
    })?;

    let path = export_path(out_dir, batch);
    let tmp = path.with_extension("csv.partial");
    write_csv(&tmp, batch)?;
    fs::rename(&tmp, &path).map_err(|e| {
        PipelineError::Sink(format!("failed to finalise {}: {e}", path.display()))
    })?;
    Ok(path)
}

fn write_csv(path: &Path, batch: &EmissionBatch) -> Result<(), PipelineError> {
    let sink_err = |e: &dyn std::fmt::Display| {
        PipelineError::Sink(format!("csv export to {} failed: {e}", path.display()))
    };

    let file = fs::File::create(path).map_err(|e| sink_err(&e))?;
    let mut wtr = csv::Writer::from_writer(file);

    let header: Vec<&str> = EXPORT_ORDER
        .iter()
        .copied()
        .filter(|c| batch.has_column(c))
        .collect();
    wtr.write_record(&header).map_err(|e| sink_err(&e))?;

    let mut row: Vec<String> = Vec::with_capacity(header.len());
    for record in &batch.records {
        row.clear();
        for column in &header {
            row.push(field(record, column).map_err(|e| sink_err(&e))?);
        }
        wtr.write_record(&row).map_err(|e| sink_err(&e))?;
    }

    let mut file = wtr.into_inner().map_err(|e| sink_err(&e))?;
    file.flush().map_err(|e| sink_err(&e))?;
    Ok(())
}

fn opt<T: ToString>(v: &Option<T>) -> String {
    v.as_ref().map(ToString::to_string).unwrap_or_default()
}

fn field(r: &HourlyEmission, column: &str) -> Result<String, time::error::Format> {
    Ok(match column {
        columns::STATE => r.state.clone(),
        columns::PLANT_ID => r.plant_id.to_string(),
        columns::UNIT_CODE => r.unit_code.clone(),
        columns::OPERATING_DATETIME_UTC => r.operating_datetime_utc.format(&Rfc3339)?,
        columns::OP_TIME => opt(&r.op_time),
        columns::GROSS_LOAD_MW => opt(&r.gross_load_mw),
        columns::STEAM_LOAD_1000_LBS => opt(&r.steam_load_1000_lbs),
        columns::SO2_MASS_LBS => opt(&r.so2_mass_lbs),
        columns::SO2_MASS_MEASUREMENT_CODE => opt(&r.so2_mass_measurement_code),
        columns::NOX_RATE_LBS_MMBTU => opt(&r.nox_rate_lbs_mmbtu),
        columns::NOX_MASS_LBS => opt(&r.nox_mass_lbs),
        columns::CO2_MASS_TONS => opt(&r.co2_mass_tons),
        columns::HEAT_CONTENT_MMBTU => opt(&r.heat_content_mmbtu),
        columns::FACILITY_ID => opt(&r.facility_id),
        columns::UNIT_ID => opt(&r.unit_id),
        _ => String::new(),
    })
}

#[async_trait::async_trait]
impl Sink<EmissionBatch> for CsvExportSink {
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
                    tracing::error!(error = %e, "upstream failure, stopping csv export");
                    return Err(e);
                }
            };

            self.guard.lock().await.check(&env.payload)?;
            let records = env.payload.len();
            let key = env.payload.key.clone();
            let out_dir = self.out_dir.clone();
            let batch = env.payload;
            let path = tokio::task::spawn_blocking(move || write_batch(&out_dir, &batch))
                .await
                .map_err(|e| PipelineError::Sink(format!("csv export worker failed: {e}")))??;

            metrics::counter!("cems_sink_records_written_total").increment(records as u64);
            if let Ok(dur) = SystemTime::now().duration_since(env.received_at) {
                metrics::histogram!("ingest_end_to_end_latency_seconds").record(dur.as_secs_f64());
            }
            tracing::info!(batch = %key, records, path = %path.display(), "batch exported");
        }

        Ok(())
    }
}
