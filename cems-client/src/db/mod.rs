pub mod plant_queries;

pub use plant_queries::plant_timezones;
