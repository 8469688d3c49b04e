pub mod batch;
pub mod columns;
pub mod hourly_emission;
pub mod hourly_observation;
pub mod plant_timezone;

pub use batch::{BatchKey, BatchKeyError, EmissionBatch, ObservationBatch};
pub use hourly_emission::HourlyEmission;
pub use hourly_observation::RawHourlyObservation;
pub use plant_timezone::PlantTimezone;
