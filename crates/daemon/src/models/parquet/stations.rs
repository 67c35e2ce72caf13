use parquet::{
    basic::{LogicalType, Repetition, Type as PhysicalType},
    schema::types::Type,
};
use parquet_derive::ParquetRecordWriter;
use sealevel::Station;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, ParquetRecordWriter)]
pub struct StationRecord {
    pub provider: String,
    pub provider_id: String,
    pub name: String,
    pub country: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub is_active: bool,
    pub removed: Option<String>,
}

impl From<&Station> for StationRecord {
    fn from(val: &Station) -> Self {
        StationRecord {
            provider: val.provider.to_string(),
            provider_id: val.provider_id.clone(),
            name: val.name.clone(),
            country: val.country.clone(),
            longitude: val.longitude,
            latitude: val.latitude,
            is_active: val.is_active,
            removed: val.removed.and_then(|removed| removed.format(&Rfc3339).ok()),
        }
    }
}

pub fn create_station_schema() -> Type {
    let provider = Type::primitive_type_builder("provider", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::REQUIRED)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    let provider_id = Type::primitive_type_builder("provider_id", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::REQUIRED)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    let name = Type::primitive_type_builder("name", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::REQUIRED)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    let country = Type::primitive_type_builder("country", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::OPTIONAL)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    let longitude = Type::primitive_type_builder("longitude", PhysicalType::DOUBLE)
        .with_repetition(Repetition::REQUIRED)
        .build()
        .unwrap();

    let latitude = Type::primitive_type_builder("latitude", PhysicalType::DOUBLE)
        .with_repetition(Repetition::REQUIRED)
        .build()
        .unwrap();

    let is_active = Type::primitive_type_builder("is_active", PhysicalType::BOOLEAN)
        .with_repetition(Repetition::REQUIRED)
        .build()
        .unwrap();

    let removed = Type::primitive_type_builder("removed", PhysicalType::BYTE_ARRAY)
        .with_repetition(Repetition::OPTIONAL)
        .with_logical_type(Some(LogicalType::String))
        .build()
        .unwrap();

    Type::group_type_builder("station")
        .with_fields(vec![
            Arc::new(provider),
            Arc::new(provider_id),
            Arc::new(name),
            Arc::new(country),
            Arc::new(longitude),
            Arc::new(latitude),
            Arc::new(is_active),
            Arc::new(removed),
        ])
        .build()
        .unwrap()
}
