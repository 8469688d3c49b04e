/// One row of the plant timezone registry (`plants_entity_eia`).
///
/// `timezone` is an IANA name and is missing for plants that lack the
/// location data to derive one; none of those plants report to CEMS.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct PlantTimezone {
    #[cfg_attr(feature = "serde", serde(alias = "plant_id_eia"))]
    pub plant_id: i64,
    pub timezone: Option<String>,
}
