use std::collections::HashMap;

use cems_client::domain::PlantTimezone;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone};
use chrono_tz::Tz;
use time::UtcOffset;

/// CEMS timestamps never shift for daylight saving, so every plant's offset
/// is taken in January. The year itself does not matter.
const REFERENCE_YEAR: i32 = 2011;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("plant {plant_id} has unknown timezone '{timezone}'")]
    UnknownTimezone { plant_id: i64, timezone: String },
    #[error("plant {plant_id} timezone '{timezone}' has out-of-range offset {seconds}s")]
    OffsetOutOfRange {
        plant_id: i64,
        timezone: String,
        seconds: i32,
    },
}

/// Read-only `plant_id -> fixed UTC offset` lookup, built once per run.
///
/// Offsets follow the timezone convention: local time minus UTC, so a plant
/// on US Eastern time maps to `-05:00`.
#[derive(Debug, Clone, Default)]
pub struct PlantOffsetRegistry {
    offsets: HashMap<i64, UtcOffset>,
}

impl PlantOffsetRegistry {
    /// Resolve each plant's timezone to a fixed offset.
    ///
    /// Rows without a timezone are dropped; those plants never report to
    /// CEMS. A missing plant is only an error once a reading needs it.
    pub fn build<I>(plants: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = PlantTimezone>,
    {
        let reference = reference_instant();
        let mut offsets = HashMap::new();
        let mut skipped = 0usize;

        for plant in plants {
            let name = plant.timezone.as_deref().map(str::trim);
            let Some(name) = name.filter(|s| !s.is_empty()) else {
                skipped += 1;
                continue;
            };

            let tz: Tz = name.parse().map_err(|_| RegistryError::UnknownTimezone {
                plant_id: plant.plant_id,
                timezone: name.to_string(),
            })?;
            let seconds = tz.offset_from_utc_datetime(&reference).fix().local_minus_utc();
            let offset = UtcOffset::from_whole_seconds(seconds).map_err(|_| {
                RegistryError::OffsetOutOfRange {
                    plant_id: plant.plant_id,
                    timezone: name.to_string(),
                    seconds,
                }
            })?;

            offsets.insert(plant.plant_id, offset);
        }

        tracing::info!(
            plants = offsets.len(),
            without_timezone = skipped,
            "plant offset registry built"
        );

        Ok(Self { offsets })
    }

    pub fn get(&self, plant_id: i64) -> Option<UtcOffset> {
        self.offsets.get(&plant_id).copied()
    }

    pub fn contains(&self, plant_id: i64) -> bool {
        self.offsets.contains_key(&plant_id)
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

impl FromIterator<(i64, UtcOffset)> for PlantOffsetRegistry {
    fn from_iter<T: IntoIterator<Item = (i64, UtcOffset)>>(iter: T) -> Self {
        Self {
            offsets: iter.into_iter().collect(),
        }
    }
}

fn reference_instant() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(REFERENCE_YEAR, 1, 1)
        .unwrap_or_default()
        .and_time(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::offset;

    fn plant(plant_id: i64, timezone: Option<&str>) -> PlantTimezone {
        PlantTimezone {
            plant_id,
            timezone: timezone.map(str::to_string),
        }
    }

    #[test]
    fn registry_uses_standard_time_offsets() {
        let registry = PlantOffsetRegistry::build(vec![
            plant(3, Some("America/Chicago")),
            plant(7, Some("America/New_York")),
            plant(10, Some("America/Phoenix")),
            plant(11, Some("UTC")),
        ])
        .unwrap();

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.get(3), Some(offset!(-6)));
        assert_eq!(registry.get(7), Some(offset!(-5)));
        assert_eq!(registry.get(10), Some(offset!(-7)));
        assert_eq!(registry.get(11), Some(UtcOffset::UTC));
    }

    #[test]
    fn registry_supports_non_whole_hour_offsets() {
        let registry = PlantOffsetRegistry::build(vec![
            plant(1, Some("America/St_Johns")),
            plant(2, Some("Asia/Kolkata")),
        ])
        .unwrap();

        assert_eq!(registry.get(1), Some(offset!(-3:30)));
        assert_eq!(registry.get(2), Some(offset!(+5:30)));
    }

    #[test]
    fn registry_drops_plants_without_timezone() {
        let registry = PlantOffsetRegistry::build(vec![
            plant(1, None),
            plant(2, Some("  ")),
            plant(3, Some("America/Denver")),
        ])
        .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(1));
        assert!(!registry.contains(2));
        assert!(registry.contains(3));
    }

    #[test]
    fn registry_rejects_unknown_timezone_names() {
        let err =
            PlantOffsetRegistry::build(vec![plant(42, Some("Mars/Olympus_Mons"))]).unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownTimezone {
                plant_id: 42,
                timezone: "Mars/Olympus_Mons".to_string(),
            }
        );
    }
}
