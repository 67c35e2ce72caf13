use parquet::{
    basic::{LogicalType, Repetition, Type as PhysicalType},
    schema::types::Type,
};
use parquet_derive::ParquetRecordWriter;
use sealevel::IocObservation;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, ParquetRecordWriter)]
pub struct SeaLevelRecord {
    pub station_id: String,
    pub sensor: String,
    pub observed_at: String,
    pub sea_level: f64,
}

impl From<&IocObservation> for SeaLevelRecord {
    fn from(val: &IocObservation) -> Self {
        SeaLevelRecord {
            station_id: val.station_id.clone(),
            sensor: val.sensor.clone(),
            observed_at: val
                .observed_at
                .format(&Rfc3339)
                .unwrap_or_else(|_| val.observed_at.to_string()),
            sea_level: val.sea_level,
        }
    }
}

pub fn create_sea_level_schema() -> Type {
    let station_id = Type::primitive_type_builder("station_id", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::REQUIRED)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    let sensor = Type::primitive_type_builder("sensor", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::REQUIRED)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    let observed_at = Type::primitive_type_builder("observed_at", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::REQUIRED)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    let sea_level = Type::primitive_type_builder("sea_level", PhysicalType::DOUBLE)
        .with_repetition(Repetition::REQUIRED)
        .build()
        .unwrap();

    Type::group_type_builder("sea_level")
        .with_fields(vec![
            Arc::new(station_id),
            Arc::new(sensor),
            Arc::new(observed_at),
            Arc::new(sea_level),
        ])
        .build()
        .unwrap()
}
