use std::collections::BTreeSet;

use cems_client::domain::{columns, EmissionBatch, HourlyEmission, ObservationBatch};
use time::{
    format_description::FormatItem, macros::format_description, Date, Duration, OffsetDateTime,
    PrimitiveDateTime, Time,
};

use super::PlantOffsetRegistry;

/// Operating dates in CEMS files are written `MM-DD-YYYY`; older files
/// sometimes drop the leading zeros (`7-4-2016`).
const LOCAL_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[month padding:none]-[day padding:none]-[year]");

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error(
        "utc offset should never be missing for CEMS plants, but was missing for: {plant_ids:?}"
    )]
    MissingOffset { plant_ids: Vec<i64> },
    #[error("malformed operating date '{value}' for plant {plant_id}")]
    MalformedDate { plant_id: i64, value: String },
}

/// Replace each record's local date/hour with an absolute UTC timestamp.
///
/// Every plant in the batch must have a registry offset; otherwise the whole
/// batch fails with the distinct missing plant ids, ascending.
pub fn resolve_timestamps(
    batch: ObservationBatch,
    registry: &PlantOffsetRegistry,
) -> Result<EmissionBatch, ResolveError> {
    let missing: BTreeSet<i64> = batch
        .records
        .iter()
        .map(|r| r.plant_id)
        .filter(|id| !registry.contains(*id))
        .collect();
    if !missing.is_empty() {
        return Err(ResolveError::MissingOffset {
            plant_ids: missing.into_iter().collect(),
        });
    }

    let ObservationBatch {
        key,
        mut columns,
        records,
    } = batch;

    let mut resolved = Vec::with_capacity(records.len());
    for record in records {
        let offset = registry.get(record.plant_id).ok_or_else(|| ResolveError::MissingOffset {
            plant_ids: vec![record.plant_id],
        })?;

        let naive = naive_local_as_utc(&record.local_date, record.local_hour).ok_or_else(|| {
            ResolveError::MalformedDate {
                plant_id: record.plant_id,
                value: record.local_date.clone(),
            }
        })?;
        // Local clock minus its offset from UTC.
        let utc = naive - Duration::seconds(i64::from(offset.whole_seconds()));

        resolved.push(HourlyEmission::from_raw(record, utc));
    }

    columns.remove(columns::LOCAL_DATE);
    columns.remove(columns::LOCAL_HOUR);
    columns.insert(columns::OPERATING_DATETIME_UTC.to_string());

    Ok(EmissionBatch {
        key,
        columns,
        records: resolved,
    })
}

/// Midnight of the local date labelled as UTC, plus the hour. Not a real
/// instant until the plant offset is removed.
fn naive_local_as_utc(local_date: &str, local_hour: u8) -> Option<OffsetDateTime> {
    let date = Date::parse(local_date.trim(), LOCAL_DATE_FORMAT).ok()?;
    let midnight = PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc();
    Some(midnight + Duration::hours(i64::from(local_hour)))
}
