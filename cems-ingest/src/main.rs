use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cems_client::domain::{EmissionBatch, ObservationBatch, PlantTimezone};
use cems_ingest::{
    config::{AppConfig, PlantTimezoneKind, QuestDbConfig, SinkKind},
    metrics_server, observability,
    pipeline::{Envelope, Pipeline, PipelineError, Sink, Transform},
    sinks::{CsvExportSink, QuestDbIlpSink, QuestDbSink},
    sources::{load_plant_timezones_csv, EpaCemsCsvDirSource},
    transform::CemsTransform,
};
use sqlx::postgres::{PgPool, PgPoolOptions};

enum EmissionSink {
    Csv(CsvExportSink),
    Ilp(QuestDbIlpSink),
    Pgwire(QuestDbSink),
}

#[async_trait::async_trait]
impl Sink<EmissionBatch> for EmissionSink {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<EmissionBatch>, PipelineError>>
            + Send
            + Unpin
            + 'static,
    {
        match self {
            Self::Csv(s) => s.run(input).await,
            Self::Ilp(s) => s.run(input).await,
            Self::Pgwire(s) => s.run(input).await,
        }
    }
}

async fn connect(questdb: Option<&QuestDbConfig>) -> Result<PgPool> {
    let questdb = questdb.context("[questdb] section is required for pgwire access")?;
    let pool = PgPoolOptions::new()
        .max_connections(questdb.max_connections)
        .connect(&questdb.uri)
        .await
        .with_context(|| format!("failed to connect to QuestDB at {}", questdb.uri))?;
    Ok(pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let needs_pgwire =
        cfg.plant_timezones.kind == PlantTimezoneKind::Pgwire || cfg.sink.kind == SinkKind::Pgwire;
    let pool = if needs_pgwire {
        Some(connect(cfg.questdb.as_ref()).await?)
    } else {
        None
    };

    let plant_timezones: Vec<PlantTimezone> = match (cfg.plant_timezones.kind, &pool) {
        (PlantTimezoneKind::Csv, _) => {
            let path = cfg
                .plant_timezones
                .csv_path
                .as_ref()
                .context("plant_timezones.csv_path is required")?;
            load_plant_timezones_csv(path)?
        }
        (PlantTimezoneKind::Pgwire, Some(pool)) => cems_client::db::plant_timezones(pool).await?,
        (PlantTimezoneKind::Pgwire, None) => anyhow::bail!("pgwire pool was not initialised"),
    };
    tracing::info!(plants = plant_timezones.len(), "loaded plant timezones");

    let transform = CemsTransform::new(plant_timezones, &cfg.transform)?;
    tracing::info!(plants_with_offset = transform.registry().len(), "built plant offset registry");

    let retry_backoff = Duration::from_millis(cfg.sink.retry_backoff_ms);
    let sink = match cfg.sink.kind {
        SinkKind::Csv => {
            let out_dir = cfg.sink.out_dir.clone().context("sink.out_dir is required")?;
            EmissionSink::Csv(CsvExportSink::new(out_dir))
        }
        SinkKind::Ilp => {
            let addr: SocketAddr = cfg
                .questdb
                .as_ref()
                .and_then(|q| q.ilp_tcp_addr.as_deref())
                .context("questdb.ilp_tcp_addr is required")?
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid questdb.ilp_tcp_addr: {e}"))?;
            EmissionSink::Ilp(QuestDbIlpSink::new(
                addr,
                cfg.sink.batch_size,
                cfg.sink.max_retries,
                retry_backoff,
            ))
        }
        SinkKind::Pgwire => {
            let pool = pool.context("pgwire pool was not initialised")?;
            EmissionSink::Pgwire(QuestDbSink::new(
                pool,
                cfg.sink.batch_size,
                cfg.sink.max_retries,
                retry_backoff,
            ))
        }
    };

    let source = EpaCemsCsvDirSource::new(cfg.source.data_dir.clone())
        .with_years(cfg.source.years.clone())
        .with_states(cfg.source.states.clone());

    let transform: Arc<dyn Transform<ObservationBatch, EmissionBatch> + Send + Sync> =
        Arc::new(transform);
    Pipeline::new(source, transform, sink)
        .with_concurrency(cfg.transform.concurrency)
        .run()
        .await?;

    tracing::info!("epacems transform complete");
    Ok(())
}
