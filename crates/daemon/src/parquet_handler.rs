use anyhow::{anyhow, Error};
use parquet::{
    file::{properties::WriterProperties, writer::SerializedFileWriter},
    record::RecordWriter,
};
use sealevel::{IocObservation, Station};
use std::{fs::File, sync::Arc};

use crate::{create_sea_level_schema, create_station_schema, SeaLevelRecord, StationRecord};

pub fn save_stations(
    stations: &[Station],
    root_path: &str,
    file_name: String,
) -> Result<String, Error> {
    let full_name = format!("{}/{}.parquet", root_path, file_name);

    let file = File::create(&full_name)
        .map_err(|e| anyhow!("error creating snapshot file {}: {}", full_name, e))?;
    let props = WriterProperties::builder().build();
    let mut writer =
        SerializedFileWriter::new(file, Arc::new(create_station_schema()), Arc::new(props))?;

    let records: Vec<StationRecord> = stations.iter().map(StationRecord::from).collect();

    let mut row_group = writer.next_row_group()?;
    records.as_slice().write_to_row_group(&mut row_group)?;
    row_group.close()?;
    writer.close()?;
    Ok(full_name)
}

pub fn save_sea_levels(
    observations: &[IocObservation],
    root_path: &str,
    file_name: String,
) -> Result<String, Error> {
    let full_name = format!("{}/{}.parquet", root_path, file_name);

    let file = File::create(&full_name)
        .map_err(|e| anyhow!("error creating snapshot file {}: {}", full_name, e))?;
    let props = WriterProperties::builder().build();
    let mut writer =
        SerializedFileWriter::new(file, Arc::new(create_sea_level_schema()), Arc::new(props))?;

    let records: Vec<SeaLevelRecord> = observations.iter().map(SeaLevelRecord::from).collect();

    let mut row_group = writer.next_row_group()?;
    records.as_slice().write_to_row_group(&mut row_group)?;
    row_group.close()?;
    writer.close()?;
    Ok(full_name)
}
