use serde::{Deserialize, Serialize};
use slog::{debug, Logger};
use std::{fmt, sync::Arc};
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};

use crate::fetch::{self, split_time_range, HttpFetcher};

const METADATA_URL: &str = "https://api.tidesandcurrents.noaa.gov/mdapi/prod/webapi/stations.json";
const DATA_URL: &str = "https://api.tidesandcurrents.noaa.gov/api/prod/datagetter";

// The data api rejects water level requests longer than 31 days
const MAX_WINDOW_DAYS: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] fetch::Error),
    #[error("co-ops api rejected the request: {0}")]
    Api(String),
    #[error("error parsing co-ops timestamp {value}: {source}")]
    Timestamp {
        value: String,
        source: time::error::Parse,
    },
    #[error("error formatting query time: {0}")]
    TimeFormat(#[from] time::error::Format),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoopsStationType {
    WaterLevels,
    Currents,
    Met,
    Datums,
}

impl CoopsStationType {
    fn query_value(&self) -> &'static str {
        match self {
            CoopsStationType::WaterLevels => "waterlevels",
            CoopsStationType::Currents => "currents",
            CoopsStationType::Met => "met",
            CoopsStationType::Datums => "datums",
        }
    }
}

impl fmt::Display for CoopsStationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoopsProduct {
    WaterLevel,
    HourlyHeight,
    WaterTemperature,
    AirTemperature,
}

impl CoopsProduct {
    fn query_value(&self) -> &'static str {
        match self {
            CoopsProduct::WaterLevel => "water_level",
            CoopsProduct::HourlyHeight => "hourly_height",
            CoopsProduct::WaterTemperature => "water_temperature",
            CoopsProduct::AirTemperature => "air_temperature",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoopsDatum {
    Mhhw,
    Mhw,
    Mtl,
    Msl,
    Mlw,
    Mllw,
    Navd,
    Stnd,
}

impl CoopsDatum {
    fn query_value(&self) -> &'static str {
        match self {
            CoopsDatum::Mhhw => "MHHW",
            CoopsDatum::Mhw => "MHW",
            CoopsDatum::Mtl => "MTL",
            CoopsDatum::Msl => "MSL",
            CoopsDatum::Mlw => "MLW",
            CoopsDatum::Mllw => "MLLW",
            CoopsDatum::Navd => "NAVD",
            CoopsDatum::Stnd => "STND",
        }
    }
}

// stations.json?type=waterlevels&expand=details
#[derive(Debug, Deserialize)]
struct StationsResponse {
    #[serde(default)]
    stations: Vec<RawStation>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStation {
    id: String,
    name: String,
    #[serde(default)]
    state: String,
    lat: f64,
    lng: f64,
    #[serde(default)]
    affiliations: Option<String>,
    #[serde(default)]
    tidal: Option<bool>,
    #[serde(rename = "greatlakes", default)]
    great_lakes: Option<bool>,
    #[serde(default)]
    details: Option<RawDetails>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDetails {
    #[serde(default)]
    established: Option<String>,
    #[serde(default)]
    removed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoopsStation {
    pub id: String,
    pub name: String,
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
    pub affiliations: Option<String>,
    pub tidal: bool,
    pub great_lakes: bool,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub established: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub removed: Option<OffsetDateTime>,
}

impl CoopsStation {
    pub fn is_active(&self) -> bool {
        self.removed.is_none()
    }
}

impl TryFrom<RawStation> for CoopsStation {
    type Error = Error;
    fn try_from(val: RawStation) -> Result<Self, Self::Error> {
        let details = val.details.unwrap_or(RawDetails {
            established: None,
            removed: None,
        });
        Ok(CoopsStation {
            id: val.id,
            name: val.name,
            state: val.state,
            latitude: val.lat,
            longitude: val.lng,
            affiliations: val.affiliations,
            tidal: val.tidal.unwrap_or(false),
            great_lakes: val.great_lakes.unwrap_or(false),
            established: parse_timestamp_opt(details.established)?,
            removed: parse_timestamp_opt(details.removed)?,
        })
    }
}

// datagetter payloads carry either a data array or an error object
#[derive(Debug, Deserialize)]
struct DataResponse {
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    data: Option<Vec<RawObservation>>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawObservation {
    t: String,
    #[serde(default)]
    v: Option<String>,
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    f: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoopsObservation {
    pub station_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    pub value: f64,
    pub sigma: Option<f64>,
    pub flags: Option<String>,
}

pub struct CoopsService {
    pub logger: Logger,
    pub fetcher: Arc<HttpFetcher>,
}

impl CoopsService {
    pub fn new(logger: Logger, fetcher: Arc<HttpFetcher>) -> Self {
        CoopsService { logger, fetcher }
    }

    pub async fn stations(
        &self,
        station_type: CoopsStationType,
    ) -> Result<Vec<CoopsStation>, Error> {
        let url = format!(
            "{}?type={}&expand=details",
            METADATA_URL,
            station_type.query_value()
        );
        let response: StationsResponse = self.fetcher.fetch_json(&url).await?;
        debug!(
            self.logger,
            "co-ops answered with {} stations",
            response.stations.len()
        );

        let mut stations = Vec::with_capacity(response.stations.len());
        for raw in response.stations {
            stations.push(raw.try_into()?);
        }
        Ok(stations)
    }

    pub async fn data(
        &self,
        station_id: &str,
        product: CoopsProduct,
        datum: CoopsDatum,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<CoopsObservation>, Error> {
        let date_format = format_description!("[year][month][day]");
        let mut observations = vec![];
        for (window_start, window_end) in split_time_range(start, end, MAX_WINDOW_DAYS) {
            let url = format!(
                "{}?product={}&datum={}&station={}&begin_date={}&end_date={}&time_zone=gmt&units=metric&format=json&application={}",
                DATA_URL,
                product.query_value(),
                datum.query_value(),
                station_id,
                window_start.format(date_format)?,
                window_end.format(date_format)?,
                fetch::USER_AGENT,
            );
            let payload: DataResponse = self.fetcher.fetch_json(&url).await?;
            if let Some(err) = payload.error {
                return Err(Error::Api(err.message));
            }
            observations.extend(convert_data_rows(
                station_id,
                payload.data.unwrap_or_default(),
            )?);
        }
        Ok(observations)
    }
}

fn convert_data_rows(
    station_id: &str,
    rows: Vec<RawObservation>,
) -> Result<Vec<CoopsObservation>, Error> {
    let mut observations = vec![];
    for row in rows {
        // the api reports gaps as rows with an empty value, skip those
        let value = match row.v.as_deref().unwrap_or("").parse::<f64>() {
            Ok(value) => value,
            Err(_) => continue,
        };
        observations.push(CoopsObservation {
            station_id: station_id.to_string(),
            observed_at: parse_timestamp(&row.t)?,
            value,
            sigma: row.s.as_deref().and_then(|s| s.parse::<f64>().ok()),
            flags: row.f,
        });
    }
    Ok(observations)
}

// metadata timestamps show up both with and without a trailing fractional
// second ("2013-04-04 14:11:00.0"), data timestamps without seconds at all
fn parse_timestamp(value: &str) -> Result<OffsetDateTime, Error> {
    let with_subsecond =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
    let with_second = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let minutes_only = format_description!("[year]-[month]-[day] [hour]:[minute]");

    let trimmed = value.trim();
    PrimitiveDateTime::parse(trimmed, with_subsecond)
        .or_else(|_| PrimitiveDateTime::parse(trimmed, with_second))
        .or_else(|_| PrimitiveDateTime::parse(trimmed, minutes_only))
        .map(|dt| dt.assume_utc())
        .map_err(|source| Error::Timestamp {
            value: trimmed.to_string(),
            source,
        })
}

fn parse_timestamp_opt(value: Option<String>) -> Result<Option<OffsetDateTime>, Error> {
    match value {
        Some(raw) if !raw.trim().is_empty() => parse_timestamp(&raw).map(Some),
        _ => Ok(None),
    }
}

/// Pulls the CO-OPS station catalog for one station type. A station is active
/// when its expanded details carry no removal date.
pub async fn get_coops_stations(
    logger: &Logger,
    station_type: CoopsStationType,
) -> Result<Vec<CoopsStation>, Error> {
    let fetcher = Arc::new(HttpFetcher::new(logger.clone())?);
    CoopsService::new(logger.clone(), fetcher)
        .stations(station_type)
        .await
}

/// Pulls an observation product for one station, paging through the range in
/// windows the data api accepts.
pub async fn get_coops_data(
    logger: &Logger,
    station_id: &str,
    product: CoopsProduct,
    datum: CoopsDatum,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<CoopsObservation>, Error> {
    let fetcher = Arc::new(HttpFetcher::new(logger.clone())?);
    CoopsService::new(logger.clone(), fetcher)
        .data(station_id, product, datum, start, end)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const STATIONS_FIXTURE: &str = r#"{
        "count": 2,
        "units": null,
        "stations": [
            {
                "id": "8454000",
                "name": "Providence",
                "state": "RI",
                "lat": 41.8071,
                "lng": -71.4012,
                "affiliations": "NWLON",
                "tidal": true,
                "greatlakes": false,
                "details": {
                    "established": "1938-06-03 00:00:00.0",
                    "removed": null
                }
            },
            {
                "id": "8774230",
                "name": "Aransas Wildlife Refuge",
                "state": "TX",
                "lat": 28.2283,
                "lng": -96.795,
                "tidal": true,
                "details": {
                    "established": "2006-01-18 00:00:00.0",
                    "removed": "2013-04-04 14:11:00.0"
                }
            }
        ]
    }"#;

    #[test]
    fn parses_station_catalog() {
        let response: StationsResponse = serde_json::from_str(STATIONS_FIXTURE).unwrap();
        let stations: Vec<CoopsStation> = response
            .stations
            .into_iter()
            .map(|raw| raw.try_into().unwrap())
            .collect();

        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].id, "8454000");
        assert!(stations[0].is_active());
        assert_eq!(stations[0].established, Some(datetime!(1938-06-03 00:00 UTC)));
        assert!(!stations[1].is_active());
        assert_eq!(stations[1].removed, Some(datetime!(2013-04-04 14:11 UTC)));
        assert_eq!(stations[1].state, "TX");
    }

    #[test]
    fn parses_timestamps_with_and_without_subseconds() {
        assert_eq!(
            parse_timestamp("2013-04-04 14:11:00.0").unwrap(),
            datetime!(2013-04-04 14:11 UTC)
        );
        assert_eq!(
            parse_timestamp("2013-04-04 14:11:00").unwrap(),
            datetime!(2013-04-04 14:11 UTC)
        );
        assert_eq!(
            parse_timestamp("2020-01-01 06:30").unwrap(),
            datetime!(2020-01-01 06:30 UTC)
        );
        assert!(parse_timestamp("04/04/2013").is_err());
    }

    #[test]
    fn data_rows_skip_gaps() {
        let payload: DataResponse = serde_json::from_str(
            r#"{
                "data": [
                    {"t": "2020-01-01 00:00", "v": "1.234", "s": "0.003", "f": "0,0,0,0"},
                    {"t": "2020-01-01 00:06", "v": "", "s": "", "f": "0,0,0,1"},
                    {"t": "2020-01-01 00:12", "v": "1.241", "s": "0.004", "f": "0,0,0,0"}
                ]
            }"#,
        )
        .unwrap();
        assert!(payload.error.is_none());

        let observations = convert_data_rows("8454000", payload.data.unwrap()).unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].value, 1.234);
        assert_eq!(observations[0].sigma, Some(0.003));
        assert_eq!(observations[1].observed_at, datetime!(2020-01-01 00:12 UTC));
    }

    #[test]
    fn error_payload_is_detected() {
        let payload: DataResponse = serde_json::from_str(
            r#"{"error": {"message": "No data was found for this station"}}"#,
        )
        .unwrap();
        assert_eq!(
            payload.error.unwrap().message,
            "No data was found for this station"
        );
    }

    #[test]
    fn station_type_query_values() {
        assert_eq!(CoopsStationType::WaterLevels.to_string(), "waterlevels");
        assert_eq!(CoopsProduct::WaterLevel.query_value(), "water_level");
        assert_eq!(CoopsDatum::Msl.query_value(), "MSL");
    }
}
