use futures::future::join_all;
use serde::{Deserialize, Deserializer, Serialize};
use slog::{debug, Logger};
use std::sync::Arc;
use time::{macros::format_description, Duration, OffsetDateTime, PrimitiveDateTime};

use crate::fetch::{self, split_time_range, HttpFetcher};

const SERVICE_URL: &str = "https://www.ioc-sealevelmonitoring.org/service.php";

// the service rejects data queries spanning more than 30 days
const MAX_WINDOW_DAYS: i64 = 30;

// a station with no reading for this long counts as inactive
const FRESHNESS_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] fetch::Error),
    #[error("ioc service rejected the request: {0}")]
    Api(String),
    #[error("error parsing ioc coordinate {0}")]
    Coordinate(String),
    #[error("error parsing ioc timestamp {value}: {source}")]
    Timestamp {
        value: String,
        source: time::error::Parse,
    },
    #[error("error formatting query time: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("observation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

// the station list serves numbers and strings interchangeably across fields
fn de_stringish<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn de_stringish_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// service.php?query=stationlist&showall=all&format=json
#[derive(Debug, Clone, Deserialize)]
struct RawIocStation {
    #[serde(alias = "Code")]
    code: String,
    #[serde(alias = "Location", default)]
    location: String,
    #[serde(alias = "Country", default)]
    country: Option<String>,
    #[serde(alias = "Lon", deserialize_with = "de_stringish")]
    lon: String,
    #[serde(alias = "Lat", deserialize_with = "de_stringish")]
    lat: String,
    #[serde(
        alias = "dcpid",
        alias = "dcp_id",
        default,
        deserialize_with = "de_stringish_opt"
    )]
    dcp_id: Option<String>,
    #[serde(alias = "lasttime", alias = "last_time", default)]
    last_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocStation {
    pub code: String,
    pub location: String,
    pub country: Option<String>,
    pub lon: String,
    pub lat: String,
    pub dcp_id: Option<String>,
    pub last_observation: Option<String>,
}

impl From<RawIocStation> for IocStation {
    fn from(value: RawIocStation) -> Self {
        IocStation {
            code: value.code,
            location: value.location,
            country: value.country,
            lon: value.lon,
            lat: value.lat,
            dcp_id: value.dcp_id,
            last_observation: value.last_time,
        }
    }
}

impl IocStation {
    pub fn coordinates(&self) -> Result<(f64, f64), Error> {
        let lon = self
            .lon
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::Coordinate(self.lon.clone()))?;
        let lat = self
            .lat
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::Coordinate(self.lat.clone()))?;
        Ok((lon, lat))
    }

    pub fn last_observed_at(&self) -> Option<OffsetDateTime> {
        self.last_observation
            .as_deref()
            .and_then(|raw| parse_timestamp(raw).ok())
    }

    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        match self.last_observed_at() {
            Some(last) => now - last <= Duration::days(FRESHNESS_DAYS),
            None => false,
        }
    }
}

// data payloads are either a reading array or an error object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataPayload {
    Readings(Vec<RawReading>),
    Error { error: String },
}

#[derive(Debug, Clone, Deserialize)]
struct RawReading {
    #[serde(default)]
    sensor: Option<String>,
    stime: String,
    #[serde(default)]
    slevel: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IocObservation {
    pub station_id: String,
    pub sensor: String,
    #[serde(with = "time::serde::rfc3339")]
    pub observed_at: OffsetDateTime,
    /// Sea level in meters relative to the station reference.
    pub sea_level: f64,
}

pub struct IocService {
    pub logger: Logger,
    pub fetcher: Arc<HttpFetcher>,
}

impl IocService {
    pub fn new(logger: Logger, fetcher: Arc<HttpFetcher>) -> Self {
        IocService { logger, fetcher }
    }

    pub async fn stations(&self) -> Result<Vec<IocStation>, Error> {
        let url = format!("{SERVICE_URL}?query=stationlist&showall=all&format=json");
        let raw: Vec<RawIocStation> = self.fetcher.fetch_json(&url).await?;
        debug!(self.logger, "ioc answered with {} stations", raw.len());
        Ok(raw.into_iter().map(IocStation::from).collect())
    }

    pub async fn data(
        &self,
        codes: &[String],
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<IocObservation>, Error> {
        let date_format = format_description!("[year]-[month]-[day]");
        let mut tasks = vec![];
        for code in codes {
            for (window_start, window_end) in split_time_range(start, end, MAX_WINDOW_DAYS) {
                let url = format!(
                    "{SERVICE_URL}?query=data&code={code}&format=json&timestart={}&timestop={}",
                    window_start.format(date_format)?,
                    window_end.format(date_format)?,
                );
                let fetcher = Arc::clone(&self.fetcher);
                let code = code.clone();
                let task = tokio::spawn(async move {
                    fetcher
                        .fetch_json::<DataPayload>(&url)
                        .await
                        .map(|payload| (code, payload))
                });
                tasks.push(task);
            }
        }
        debug!(self.logger, "requesting {} ioc data windows", tasks.len());

        let mut observations = vec![];
        for joined in join_all(tasks).await {
            let (code, payload) = joined??;
            match payload {
                DataPayload::Readings(readings) => {
                    observations.extend(convert_readings(&code, readings)?);
                }
                DataPayload::Error { error } => return Err(Error::Api(error)),
            }
        }
        observations.sort_by(|a, b| {
            a.station_id
                .cmp(&b.station_id)
                .then(a.observed_at.cmp(&b.observed_at))
        });
        Ok(observations)
    }
}

fn convert_readings(code: &str, readings: Vec<RawReading>) -> Result<Vec<IocObservation>, Error> {
    let mut observations = vec![];
    for reading in readings {
        // sensors report gaps as null levels, skip those
        let sea_level = match reading.slevel {
            Some(level) => level,
            None => continue,
        };
        observations.push(IocObservation {
            station_id: code.to_string(),
            sensor: reading.sensor.unwrap_or_default(),
            observed_at: parse_timestamp(&reading.stime)?,
            sea_level,
        });
    }
    Ok(observations)
}

// service times are "2024-03-12 01:23:45", always UTC
fn parse_timestamp(value: &str) -> Result<OffsetDateTime, Error> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value.trim(), format)
        .map(|dt| dt.assume_utc())
        .map_err(|source| Error::Timestamp {
            value: value.trim().to_string(),
            source,
        })
}

/// Pulls the full IOC station catalog, including stations that stopped
/// transmitting.
pub async fn get_ioc_stations(logger: &Logger) -> Result<Vec<IocStation>, Error> {
    let fetcher = Arc::new(HttpFetcher::new(logger.clone())?);
    IocService::new(logger.clone(), fetcher).stations().await
}

/// Pulls sea level readings for a set of station codes. The range is split
/// into windows the service accepts and every station/window pair is fetched
/// concurrently behind the shared rate limiter. Results are ordered by
/// station code, then observation time.
pub async fn get_ioc_data(
    logger: &Logger,
    codes: &[String],
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<IocObservation>, Error> {
    let fetcher = Arc::new(HttpFetcher::new(logger.clone())?);
    IocService::new(logger.clone(), fetcher)
        .data(codes, start, end)
        .await
}
