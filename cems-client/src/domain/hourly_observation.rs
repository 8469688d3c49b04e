use super::columns;

/// One plant-hour reading as extracted from a CEMS state/year file,
/// before any cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHourlyObservation {
    pub state: String,
    pub plant_id: i64,
    pub unit_code: String,
    /// Calendar date at the plant, `MM-DD-YYYY`.
    pub local_date: String,
    /// Hour-of-day bucket at the plant, 0..=23.
    pub local_hour: u8,
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

impl RawHourlyObservation {
    /// A reading with only the identifying fields set.
    pub fn new(plant_id: i64, local_date: impl Into<String>, local_hour: u8) -> Self {
        Self {
            state: String::new(),
            plant_id,
            unit_code: String::new(),
            local_date: local_date.into(),
            local_hour,
            op_time: None,
            gross_load_mw: None,
            steam_load_1000_lbs: None,
            so2_mass_lbs: None,
            so2_mass_measurement_code: None,
            nox_rate_lbs_mmbtu: None,
            nox_mass_lbs: None,
            co2_mass_tons: None,
            heat_content_mmbtu: None,
            facility_id: None,
            unit_id: None,
        }
    }

    /// Mutable access to a nullable numeric column by its canonical name.
    ///
    /// Returns `None` for names outside [`columns::NUMERIC`].
    pub fn numeric_mut(&mut self, column: &str) -> Option<&mut Option<f64>> {
        match column {
            columns::OP_TIME => Some(&mut self.op_time),
            columns::GROSS_LOAD_MW => Some(&mut self.gross_load_mw),
            columns::STEAM_LOAD_1000_LBS => Some(&mut self.steam_load_1000_lbs),
            columns::SO2_MASS_LBS => Some(&mut self.so2_mass_lbs),
            columns::NOX_RATE_LBS_MMBTU => Some(&mut self.nox_rate_lbs_mmbtu),
            columns::NOX_MASS_LBS => Some(&mut self.nox_mass_lbs),
            columns::CO2_MASS_TONS => Some(&mut self.co2_mass_tons),
            columns::HEAT_CONTENT_MMBTU => Some(&mut self.heat_content_mmbtu),
            _ => None,
        }
    }
}
