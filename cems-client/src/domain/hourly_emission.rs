use time::OffsetDateTime;

use super::{columns, RawHourlyObservation};

/// A cleaned plant-hour reading, keyed by an absolute UTC timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyEmission {
    pub operating_datetime_utc: OffsetDateTime,
    pub state: String,
    pub plant_id: i64,
    pub unit_code: String,
    pub op_time: Option<f64>,
    pub gross_load_mw: Option<f64>,
    pub steam_load_1000_lbs: Option<f64>,
    pub so2_mass_lbs: Option<f64>,
    pub so2_mass_measurement_code: Option<String>,
    pub nox_rate_lbs_mmbtu: Option<f64>,
    pub nox_mass_lbs: Option<f64>,
    pub co2_mass_tons: Option<f64>,
    pub heat_content_mmbtu: Option<f64>,
    pub facility_id: Option<i64>,
    pub unit_id: Option<i64>,
}

impl HourlyEmission {
    /// Carries every pass-through field of `raw` over, replacing the local
    /// date/hour pair with `operating_datetime_utc`.
    pub fn from_raw(raw: RawHourlyObservation, operating_datetime_utc: OffsetDateTime) -> Self {
        Self {
            operating_datetime_utc,
            state: raw.state,
            plant_id: raw.plant_id,
            unit_code: raw.unit_code,
            op_time: raw.op_time,
            gross_load_mw: raw.gross_load_mw,
            steam_load_1000_lbs: raw.steam_load_1000_lbs,
            so2_mass_lbs: raw.so2_mass_lbs,
            so2_mass_measurement_code: raw.so2_mass_measurement_code,
            nox_rate_lbs_mmbtu: raw.nox_rate_lbs_mmbtu,
            nox_mass_lbs: raw.nox_mass_lbs,
            co2_mass_tons: raw.co2_mass_tons,
            heat_content_mmbtu: raw.heat_content_mmbtu,
            facility_id: raw.facility_id,
            unit_id: raw.unit_id,
        }
    }

    /// Mutable access to one of [`columns::LATE_IDENTIFIERS`] by name.
    pub fn identifier_mut(&mut self, column: &str) -> Option<&mut Option<i64>> {
        match column {
            columns::FACILITY_ID => Some(&mut self.facility_id),
            columns::UNIT_ID => Some(&mut self.unit_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn identifier_mut_covers_late_identifiers_only() {
        let mut raw = RawHourlyObservation::new(3, "01-01-2015", 0);
        raw.facility_id = Some(10);
        raw.unit_id = Some(20);
        let mut e = HourlyEmission::from_raw(raw, datetime!(2015-01-01 05:00 UTC));

        for name in columns::LATE_IDENTIFIERS {
            *e.identifier_mut(name).expect("identifier column") = None;
        }
        assert_eq!(e.facility_id, None);
        assert_eq!(e.unit_id, None);
        assert!(e.identifier_mut(columns::PLANT_ID).is_none());
    }
}
