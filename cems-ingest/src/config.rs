use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::PathBuf};

use crate::transform::{FillDefaults, GrossLoadCorrection};

#[derive(Debug, Clone, Deserialize)]
pub struct QuestDbConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    pub ilp_tcp_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub data_dir: PathBuf,
    /// Reporting years to process; empty means every year found.
    #[serde(default)]
    pub years: Vec<i32>,
    /// Two-letter state codes to process; empty means every state found.
    #[serde(default)]
    pub states: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlantTimezoneKind {
    Csv,
    Pgwire,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlantTimezoneConfig {
    pub kind: PlantTimezoneKind,
    pub csv_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrosswalkEntry {
    pub source_plant_id: i64,
    pub plant_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub concurrency: usize,
    pub fill_defaults: BTreeMap<String, f64>,
    pub gross_load: GrossLoadCorrection,
    pub plant_id_crosswalk: Vec<CrosswalkEntry>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            fill_defaults: FillDefaults::standard(),
            gross_load: GrossLoadCorrection::default(),
            plant_id_crosswalk: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Csv,
    Ilp,
    Pgwire,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub out_dir: Option<PathBuf>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub plant_timezones: PlantTimezoneConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    pub sink: SinkConfig,
    pub questdb: Option<QuestDbConfig>,
    pub metrics: Option<MetricsConfig>,
}

fn default_max_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path =
            env::var("CEMS_INGEST_CONFIG").unwrap_or_else(|_| "cems-ingest.toml".to_string());
        let contents = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read config '{path}': {e}"))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let tz_kind = self.plant_timezones.kind;
        if tz_kind == PlantTimezoneKind::Csv && self.plant_timezones.csv_path.is_none() {
            anyhow::bail!(
                "plant_timezones.csv_path is required when plant_timezones.kind = \"csv\""
            );
        }

        let needs_pgwire =
            tz_kind == PlantTimezoneKind::Pgwire || self.sink.kind == SinkKind::Pgwire;
        if needs_pgwire && self.questdb.is_none() {
            anyhow::bail!("[questdb] section is required for pgwire access");
        }

        match self.sink.kind {
            SinkKind::Csv if self.sink.out_dir.is_none() => {
                anyhow::bail!("sink.out_dir is required when sink.kind = \"csv\"")
            }
            SinkKind::Ilp
                if self.questdb.as_ref().and_then(|q| q.ilp_tcp_addr.as_ref()).is_none() =>
            {
                anyhow::bail!("questdb.ilp_tcp_addr is required when sink.kind = \"ilp\"")
            }
            _ => {}
        }
        if self.sink.batch_size == 0 {
            anyhow::bail!("sink.batch_size must be at least 1");
        }

        if self.transform.concurrency == 0 {
            anyhow::bail!("transform.concurrency must be at least 1");
        }
        self.transform.gross_load.validate()?;
        FillDefaults::new(self.transform.fill_defaults.clone())?;

        Ok(())
    }
}
