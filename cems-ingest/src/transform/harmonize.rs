use cems_client::domain::{columns, EmissionBatch};

/// Guarantee `facility_id` and `unit_id` exist in every batch.
///
/// Neither column is reported before August 2008; the loader needs an
/// identical column set across the whole stream, so older batches get the
/// columns with every value unknown.
pub fn harmonize_columns(mut batch: EmissionBatch) -> EmissionBatch {
    for column in columns::LATE_IDENTIFIERS {
        if batch.has_column(column) {
            continue;
        }
        for record in &mut batch.records {
            if let Some(slot) = record.identifier_mut(column) {
                *slot = None;
            }
        }
        batch.columns.insert(column.to_string());
    }
    batch
}
