use std::{fs::File, io::Read, path::Path};

use cems_client::domain::PlantTimezone;

use crate::pipeline::PipelineError;

/// Load the plant timezone table from a CSV export of `plants_entity_eia`.
///
/// Expected header columns: `plant_id_eia` (or `plant_id`) and `timezone`.
/// Any other columns are ignored; a blank timezone reads as missing.
pub fn load_plant_timezones_csv<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<PlantTimezone>, PipelineError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| PipelineError::Source(format!("failed to open {}: {e}", path.display())))?;
    read_plant_timezones(file)
}

pub fn read_plant_timezones<R: Read>(reader: R) -> Result<Vec<PlantTimezone>, PipelineError> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut plants = Vec::new();
    for result in rdr.deserialize::<PlantTimezone>() {
        let plant = result
            .map_err(|e| PipelineError::Source(format!("invalid plant timezone row: {e}")))?;
        plants.push(plant);
    }
    Ok(plants)
}
