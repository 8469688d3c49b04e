//! Canonical column names shared by extractors, transforms and loaders.

pub const STATE: &str = "state";
pub const PLANT_ID: &str = "plant_id";
pub const UNIT_CODE: &str = "unit_code";
pub const LOCAL_DATE: &str = "local_date";
pub const LOCAL_HOUR: &str = "local_hour";
pub const OPERATING_DATETIME_UTC: &str = "operating_datetime_utc";
pub const OP_TIME: &str = "op_time";
pub const GROSS_LOAD_MW: &str = "gross_load_mw";
pub const STEAM_LOAD_1000_LBS: &str = "steam_load_1000_lbs";
pub const SO2_MASS_LBS: &str = "so2_mass_lbs";
pub const SO2_MASS_MEASUREMENT_CODE: &str = "so2_mass_measurement_code";
pub const NOX_RATE_LBS_MMBTU: &str = "nox_rate_lbs_mmbtu";
pub const NOX_MASS_LBS: &str = "nox_mass_lbs";
pub const CO2_MASS_TONS: &str = "co2_mass_tons";
pub const HEAT_CONTENT_MMBTU: &str = "heat_content_mmbtu";
pub const FACILITY_ID: &str = "facility_id";
pub const UNIT_ID: &str = "unit_id";

/// Nullable numeric measurement columns of a raw observation.
pub const NUMERIC: &[&str] = &[
    OP_TIME,
    GROSS_LOAD_MW,
    STEAM_LOAD_1000_LBS,
    SO2_MASS_LBS,
    NOX_RATE_LBS_MMBTU,
    NOX_MASS_LBS,
    CO2_MASS_TONS,
    HEAT_CONTENT_MMBTU,
];

/// Columns that only exist in reporting periods from August 2008 onwards.
pub const LATE_IDENTIFIERS: &[&str] = &[FACILITY_ID, UNIT_ID];
