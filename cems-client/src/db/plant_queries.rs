use anyhow::Result;
use sqlx::PgPool;

use crate::domain::PlantTimezone;

/// Fetch every plant's IANA timezone from the EIA plant entity table.
///
/// Plants without a known timezone come back with `timezone = NULL`; the
/// caller decides what to do with them.
pub async fn plant_timezones(pool: &PgPool) -> Result<Vec<PlantTimezone>> {
    let rows = sqlx::query_as::<_, PlantTimezone>(
        r#"
        SELECT
            plant_id_eia AS plant_id,
            timezone
        FROM plants_entity_eia
        ORDER BY plant_id_eia
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
