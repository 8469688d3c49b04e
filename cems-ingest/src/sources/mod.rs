pub mod epacems_csv_dir;
pub mod plant_timezone_csv;

pub use epacems_csv_dir::EpaCemsCsvDirSource;
pub use plant_timezone_csv::load_plant_timezones_csv;
