use std::{
    collections::BTreeSet,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use cems_client::domain::{columns, BatchKey, ObservationBatch, RawHourlyObservation};
use csv::StringRecord;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

const FILE_PREFIX: &str = "epacems-";

/// Raw EPA CEMS header names and the canonical column each maps to.
/// Canonical names are accepted as-is.
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("STATE", columns::STATE),
    ("ORISPL_CODE", columns::PLANT_ID),
    ("UNITID", columns::UNIT_CODE),
    ("OP_DATE", columns::LOCAL_DATE),
    ("OP_HOUR", columns::LOCAL_HOUR),
    ("OP_TIME", columns::OP_TIME),
    ("GLOAD (MW)", columns::GROSS_LOAD_MW),
    ("GLOAD", columns::GROSS_LOAD_MW),
    ("SLOAD (1000 lbs)", columns::STEAM_LOAD_1000_LBS),
    ("SLOAD (1000lb/hr)", columns::STEAM_LOAD_1000_LBS),
    ("SO2_MASS (lbs)", columns::SO2_MASS_LBS),
    ("SO2_MASS_MEASURE_FLG", columns::SO2_MASS_MEASUREMENT_CODE),
    ("NOX_RATE (lbs/mmBtu)", columns::NOX_RATE_LBS_MMBTU),
    ("NOX_MASS (lbs)", columns::NOX_MASS_LBS),
    ("CO2_MASS (tons)", columns::CO2_MASS_TONS),
    ("HEAT_INPUT (mmBtu)", columns::HEAT_CONTENT_MMBTU),
    ("FAC_ID", columns::FACILITY_ID),
    ("UNIT_ID", columns::UNIT_ID),
];

const KNOWN_COLUMNS: &[&str] = &[
    columns::STATE,
    columns::PLANT_ID,
    columns::UNIT_CODE,
    columns::LOCAL_DATE,
    columns::LOCAL_HOUR,
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

const REQUIRED_COLUMNS: &[&str] = &[columns::PLANT_ID, columns::LOCAL_DATE, columns::LOCAL_HOUR];

/// Directory extractor for EPA CEMS hourly files.
///
/// Each `epacems-<year>-<state>.csv` file in `data_dir` becomes one
/// `ObservationBatch`, emitted in (year, state) order. A file is only opened
/// when its batch is pulled.
pub struct EpaCemsCsvDirSource {
    data_dir: PathBuf,
    years: Vec<i32>,
    states: Vec<String>,
}

impl EpaCemsCsvDirSource {
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            years: Vec::new(),
            states: Vec::new(),
        }
    }

    /// Restrict to these reporting years. Empty means all.
    pub fn with_years(mut self, years: Vec<i32>) -> Self {
        self.years = years;
        self
    }

    /// Restrict to these states. Empty means all.
    pub fn with_states(mut self, states: Vec<String>) -> Self {
        self.states = states.into_iter().map(|s| s.to_ascii_uppercase()).collect();
        self
    }

    fn selects(&self, key: &BatchKey) -> bool {
        (self.years.is_empty() || self.years.contains(&key.year))
            && (self.states.is_empty() || self.states.contains(&key.state))
    }

    /// The batch files this source will read, in emission order.
    pub fn partitions(&self) -> Result<Vec<(BatchKey, PathBuf)>, PipelineError> {
        let entries = std::fs::read_dir(&self.data_dir).map_err(|e| {
            PipelineError::Source(format!("failed to list {}: {e}", self.data_dir.display()))
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                PipelineError::Source(format!("failed to read directory entry: {e}"))
            })?;
            let path = entry.path();
            let Some(key) = batch_key_for(&path) else {
                continue;
            };
            if self.selects(&key) {
                found.push((key, path));
            }
        }
        found.sort();
        Ok(found)
    }
}

fn batch_key_for(path: &Path) -> Option<BatchKey> {
    if path.extension()? != "csv" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let label = stem.strip_prefix(FILE_PREFIX)?;
    match label.parse() {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "skipping file with unrecognised name"
            );
            None
        }
    }
}

fn canonical_column(header: &str) -> Option<&'static str> {
    let header = header.trim();
    HEADER_ALIASES
        .iter()
        .find(|(raw, _)| *raw == header)
        .map(|(_, canonical)| *canonical)
        .or_else(|| KNOWN_COLUMNS.iter().copied().find(|c| *c == header))
}

/// Column positions of a file's header, by canonical name.
struct HeaderIndex {
    positions: Vec<(&'static str, usize)>,
}

impl HeaderIndex {
    fn new(headers: &StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .filter_map(|(idx, h)| canonical_column(h).map(|c| (c, idx)))
            .collect();
        Self { positions }
    }

    fn columns(&self) -> BTreeSet<String> {
        self.positions.iter().map(|(c, _)| c.to_string()).collect()
    }

    fn missing_required(&self) -> Option<&'static str> {
        REQUIRED_COLUMNS
            .iter()
            .copied()
            .find(|req| !self.positions.iter().any(|(c, _)| c == req))
    }

    fn get<'r>(&self, record: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.positions
            .iter()
            .find(|(c, _)| *c == column)
            .and_then(|(_, idx)| record.get(*idx))
            .map(str::trim)
    }
}

fn parse_optional_f64(column: &str, s: Option<&str>) -> Result<Option<f64>, PipelineError> {
    match s {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::Source(format!("invalid {column} '{v}': {e}"))),
    }
}

/// Integer ids are sometimes written with a trailing `.0`.
fn parse_optional_i64(column: &str, s: Option<&str>) -> Result<Option<i64>, PipelineError> {
    match s {
        None | Some("") => Ok(None),
        Some(v) => v
            .strip_suffix(".0")
            .unwrap_or(v)
            .parse()
            .map(Some)
            .map_err(|e| PipelineError::Source(format!("invalid {column} '{v}': {e}"))),
    }
}

fn parse_optional_string(s: Option<&str>) -> Option<String> {
    s.filter(|v| !v.is_empty()).map(str::to_string)
}

fn required<'r>(
    index: &HeaderIndex,
    record: &'r StringRecord,
    name: &str,
) -> Result<&'r str, PipelineError> {
    index
        .get(record, name)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PipelineError::Source(format!("missing value for '{name}' in CSV record")))
}

fn record_to_observation(
    record: &StringRecord,
    index: &HeaderIndex,
) -> Result<RawHourlyObservation, PipelineError> {
    let plant_str = required(index, record, columns::PLANT_ID)?;
    let plant_id = parse_optional_i64(columns::PLANT_ID, Some(plant_str))?
        .ok_or_else(|| PipelineError::Source("missing plant id".to_string()))?;

    let hour_str = required(index, record, columns::LOCAL_HOUR)?;
    let local_hour = hour_str
        .parse::<u8>()
        .ok()
        .filter(|h| *h <= 23)
        .ok_or_else(|| PipelineError::Source(format!("invalid local_hour '{hour_str}'")))?;

    let local_date = required(index, record, columns::LOCAL_DATE)?;
    let mut obs = RawHourlyObservation::new(plant_id, local_date, local_hour);
    obs.state = index.get(record, columns::STATE).unwrap_or_default().to_string();
    obs.unit_code = index.get(record, columns::UNIT_CODE).unwrap_or_default().to_string();
    for column in columns::NUMERIC {
        let value = parse_optional_f64(column, index.get(record, column))?;
        if let Some(slot) = obs.numeric_mut(column) {
            *slot = value;
        }
    }
    obs.so2_mass_measurement_code =
        parse_optional_string(index.get(record, columns::SO2_MASS_MEASUREMENT_CODE));
    obs.facility_id =
        parse_optional_i64(columns::FACILITY_ID, index.get(record, columns::FACILITY_ID))?;
    obs.unit_id = parse_optional_i64(columns::UNIT_ID, index.get(record, columns::UNIT_ID))?;

    Ok(obs)
}

/// Read one CEMS file into a batch.
pub fn read_batch<R: Read>(key: BatchKey, reader: R) -> Result<ObservationBatch, PipelineError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| PipelineError::Source(format!("failed to read CSV headers for {key}: {e}")))?
        .clone();

    let index = HeaderIndex::new(&headers);
    if let Some(missing) = index.missing_required() {
        return Err(PipelineError::Source(format!("{key}: missing required column '{missing}'")));
    }

    let mut records = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result
            .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))?;
        match record_to_observation(&record, &index) {
            Ok(obs) => records.push(obs),
            Err(e) => {
                metrics::counter!("cems_csv_parse_errors_total").increment(1);
                // Header is line 1.
                return Err(PipelineError::Source(format!("{key} line {}: {e}", line + 2)));
            }
        }
    }

    Ok(ObservationBatch {
        key,
        columns: index.columns(),
        records,
    })
}

fn read_batch_file(key: BatchKey, path: &Path) -> Result<ObservationBatch, PipelineError> {
    let file = File::open(path)
        .map_err(|e| PipelineError::Source(format!("failed to open {}: {e}", path.display())))?;
    read_batch(key, file)
}

#[async_trait::async_trait]
impl Source<ObservationBatch> for EpaCemsCsvDirSource {
    async fn stream(&self) -> EnvelopeStream<ObservationBatch> {
        let listing = self.partitions();
        let s = async_stream::try_stream! {
            let partitions = listing?;
            tracing::info!(files = partitions.len(), "cems source partitions discovered");

            // One file per pulled item, read on the blocking pool.
            for (key, path) in partitions {
                let batch = tokio::task::spawn_blocking(move || read_batch_file(key, &path))
                    .await
                    .map_err(|e| PipelineError::Source(format!("extract worker failed: {e}")))??;
                tracing::debug!(batch = %batch.key, records = batch.len(), "cems batch extracted");
                yield Envelope::now(batch);
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const RAW_2007: &str = "\
STATE,FACILITY_NAME,ORISPL_CODE,UNITID,OP_DATE,OP_HOUR,OP_TIME,GLOAD (MW),SO2_MASS (lbs),SO2_MASS_MEASURE_FLG,CO2_MASS (tons),HEAT_INPUT (mmBtu)
CO,Comanche,470,1,01-01-2007,0,1.00,350,120.5,Measured,300.1,3500
CO,Comanche,470,2,01-01-2007,1,0.50,,,,,
";

    const RAW_2015: &str = "\
STATE,ORISPL_CODE,UNITID,OP_DATE,OP_HOUR,GLOAD (MW),FAC_ID,UNIT_ID
TX,3470,CT1,07-04-2015,23,25000,1234.0,98
";

    const ONE_ROW: &str = "ORISPL_CODE,OP_DATE,OP_HOUR\n470,01-01-2015,0\n";

    #[test]
    fn raw_headers_map_to_canonical_columns() {
        let batch = read_batch(BatchKey::new(2007, "CO"), RAW_2007.as_bytes()).unwrap();

        assert_eq!(batch.len(), 2);
        assert!(batch.has_column("plant_id"));
        assert!(batch.has_column("gross_load_mw"));
        assert!(!batch.has_column("facility_id"));
        assert!(!batch.has_column("unit_id"));
        assert!(!batch.has_column("FACILITY_NAME"));

        let first = &batch.records[0];
        assert_eq!(first.plant_id, 470);
        assert_eq!(first.unit_code, "1");
        assert_eq!(first.local_date, "01-01-2007");
        assert_eq!(first.gross_load_mw, Some(350.0));
        assert_eq!(first.so2_mass_measurement_code.as_deref(), Some("Measured"));

        let second = &batch.records[1];
        assert_eq!(second.local_hour, 1);
        assert_eq!(second.gross_load_mw, None);
        assert_eq!(second.heat_content_mmbtu, None);
    }

    #[test]
    fn later_years_carry_facility_and_unit_ids() {
        let batch = read_batch(BatchKey::new(2015, "TX"), RAW_2015.as_bytes()).unwrap();

        assert!(batch.has_column("facility_id"));
        assert!(batch.has_column("unit_id"));
        assert_eq!(batch.records[0].facility_id, Some(1234));
        assert_eq!(batch.records[0].unit_id, Some(98));
        assert_eq!(batch.records[0].local_hour, 23);
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let csv = "ORISPL_CODE,OP_DATE,OP_HOUR\n470,01-01-2007,24\n";
        let err = read_batch(BatchKey::new(2007, "CO"), csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let csv = "ORISPL_CODE,OP_HOUR\n470,3\n";
        let err = read_batch(BatchKey::new(2007, "CO"), csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("local_date"));
    }

    #[test]
    fn file_names_map_to_batch_keys() {
        assert_eq!(
            batch_key_for(Path::new("/data/epacems-2015-co.csv")),
            Some(BatchKey::new(2015, "CO"))
        );
        assert_eq!(batch_key_for(Path::new("/data/epacems-2015-co.parquet")), None);
        assert_eq!(batch_key_for(Path::new("/data/plants.csv")), None);
    }

    #[tokio::test]
    async fn directory_source_filters_and_orders_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let names = [
            "epacems-2016-TX.csv",
            "epacems-2015-TX.csv",
            "epacems-2015-CO.csv",
            "notes.txt",
        ];
        for name in names {
            std::fs::write(dir.path().join(name), ONE_ROW).unwrap();
        }

        let source = EpaCemsCsvDirSource::new(dir.path())
            .with_years(vec![2015, 2016])
            .with_states(vec!["tx".to_string(), "co".to_string()]);
        let keys: Vec<String> = source
            .stream()
            .await
            .map(|r| r.unwrap().payload.key.to_string())
            .collect()
            .await;
        assert_eq!(keys, ["2015-CO", "2015-TX", "2016-TX"]);

        let only_2016 = EpaCemsCsvDirSource::new(dir.path()).with_years(vec![2016]);
        assert_eq!(only_2016.partitions().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bad_file_ends_the_stream_with_its_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("epacems-2015-CO.csv"), ONE_ROW).unwrap();
        std::fs::write(
            dir.path().join("epacems-2015-TX.csv"),
            "ORISPL_CODE,OP_DATE,OP_HOUR\n470,01-01-2015,24\n",
        )
        .unwrap();

        let items: Vec<_> = EpaCemsCsvDirSource::new(dir.path()).stream().await.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(
            &items[1],
            Err(PipelineError::Source(msg)) if msg.contains("2015-TX line 2")
        ));
    }

    #[tokio::test]
    async fn missing_directory_surfaces_as_source_error() {
        let source = EpaCemsCsvDirSource::new("/definitely/not/here");
        let items: Vec<_> = source.stream().await.collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(PipelineError::Source(_))));
    }
}
