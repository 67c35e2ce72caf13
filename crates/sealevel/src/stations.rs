use futures::future::join_all;
use serde::{Deserialize, Serialize};
use slog::{debug, warn, Logger};
use std::{fmt, str::FromStr, sync::Arc};
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::{
    coops::{self, CoopsService, CoopsStation, CoopsStationType},
    fetch::{self, HttpFetcher},
    ioc::{self, IocService, IocStation},
    usgs::{self, UsgsService, UsgsStation},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] fetch::Error),
    #[error("failed to get co-ops stations: {0}")]
    Coops(#[from] coops::Error),
    #[error("failed to get ioc stations: {0}")]
    Ioc(#[from] ioc::Error),
    #[error("failed to get usgs stations: {0}")]
    Usgs(#[from] usgs::Error),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("malformed bounding box: {0}")]
    BoundingBox(String),
    #[error("provider task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    All,
    Coops,
    Ioc,
    Usgs,
}

impl Provider {
    fn includes(&self, other: Provider) -> bool {
        *self == Provider::All || *self == other
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::All => "all",
            Provider::Coops => "coops",
            Provider::Ioc => "ioc",
            Provider::Usgs => "usgs",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Provider {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Provider::All),
            "coops" => Ok(Provider::Coops),
            "ioc" => Ok(Provider::Ioc),
            "usgs" => Ok(Provider::Usgs),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// One station in the unified catalog, whichever provider it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub provider: Provider,
    pub provider_id: String,
    pub name: String,
    pub country: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub removed: Option<OffsetDateTime>,
}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Provider: {}, Station ID: {}, Name: {}, Latitude: {}, Longitude: {}",
            self.provider, self.provider_id, self.name, self.latitude, self.longitude
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// The whole globe, used when no region is given.
pub const WORLD: BoundingBox = BoundingBox {
    west: -180.0,
    south: -90.0,
    east: 180.0,
    north: 90.0,
};

impl BoundingBox {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    /// Cuts the box into tiles no wider or taller than `max_span` degrees.
    pub fn split(&self, max_span: f64) -> Vec<BoundingBox> {
        let mut tiles = vec![];
        let mut west = self.west;
        while west < self.east {
            let east = (west + max_span).min(self.east);
            let mut south = self.south;
            while south < self.north {
                let north = (south + max_span).min(self.north);
                tiles.push(BoundingBox {
                    west,
                    south,
                    east,
                    north,
                });
                south = north;
            }
            west = east;
        }
        if tiles.is_empty() {
            tiles.push(*self);
        }
        tiles
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.west, self.south, self.east, self.north
        )
    }
}

impl FromStr for BoundingBox {
    type Err = Error;

    // "west,south,east,north"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| Error::BoundingBox(s.to_string()))?;
        if parts.len() != 4 {
            return Err(Error::BoundingBox(s.to_string()));
        }
        let bbox = BoundingBox {
            west: parts[0],
            south: parts[1],
            east: parts[2],
            north: parts[3],
        };
        if bbox.west >= bbox.east || bbox.south >= bbox.north {
            return Err(Error::BoundingBox(s.to_string()));
        }
        Ok(bbox)
    }
}

impl From<CoopsStation> for Station {
    fn from(value: CoopsStation) -> Self {
        let is_active = value.is_active();
        Station {
            provider: Provider::Coops,
            provider_id: value.id,
            name: value.name,
            country: None,
            longitude: value.longitude,
            latitude: value.latitude,
            is_active,
            removed: value.removed,
        }
    }
}

impl From<UsgsStation> for Station {
    fn from(value: UsgsStation) -> Self {
        Station {
            provider: Provider::Usgs,
            provider_id: value.site_no,
            name: value.name,
            country: None,
            longitude: value.longitude,
            latitude: value.latitude,
            // the site service reports no per-site status
            is_active: true,
            removed: None,
        }
    }
}

fn normalize_coops(stations: Vec<CoopsStation>) -> Vec<Station> {
    stations.into_iter().map(Station::from).collect()
}

fn normalize_ioc(logger: &Logger, stations: Vec<IocStation>, now: OffsetDateTime) -> Vec<Station> {
    let mut normalized = vec![];
    for station in stations {
        // skip stations without usable coordinates
        let (longitude, latitude) = match station.coordinates() {
            Ok(coordinates) => coordinates,
            Err(e) => {
                warn!(logger, "dropping ioc station {}: {}", station.code, e);
                continue;
            }
        };
        normalized.push(Station {
            provider: Provider::Ioc,
            provider_id: station.code.clone(),
            name: station.location.clone(),
            country: station.country.clone(),
            longitude,
            latitude,
            is_active: station.is_active(now),
            removed: None,
        });
    }
    normalized
}

fn normalize_usgs(stations: Vec<UsgsStation>) -> Vec<Station> {
    stations.into_iter().map(Station::from).collect()
}

/// Pulls the station catalog for one provider, or for all of them merged in
/// provider order (CO-OPS, IOC, USGS). The provider fetches run concurrently
/// behind one shared rate limiter. An optional region keeps only stations
/// whose coordinates fall inside the box.
pub async fn get_stations(
    logger: &Logger,
    provider: Provider,
    region: Option<BoundingBox>,
) -> Result<Vec<Station>, Error> {
    let fetcher = Arc::new(HttpFetcher::new(logger.clone())?);
    let now = OffsetDateTime::now_utc();

    let mut tasks: Vec<JoinHandle<Result<Vec<Station>, Error>>> = vec![];
    if provider.includes(Provider::Coops) {
        let logger = logger.clone();
        let fetcher = Arc::clone(&fetcher);
        tasks.push(tokio::spawn(async move {
            let raw = CoopsService::new(logger, fetcher)
                .stations(CoopsStationType::WaterLevels)
                .await?;
            Ok(normalize_coops(raw))
        }));
    }
    if provider.includes(Provider::Ioc) {
        let logger = logger.clone();
        let fetcher = Arc::clone(&fetcher);
        tasks.push(tokio::spawn(async move {
            let raw = IocService::new(logger.clone(), fetcher).stations().await?;
            Ok(normalize_ioc(&logger, raw, now))
        }));
    }
    if provider.includes(Provider::Usgs) {
        let logger = logger.clone();
        let fetcher = Arc::clone(&fetcher);
        let bbox = region.unwrap_or(WORLD);
        tasks.push(tokio::spawn(async move {
            let raw = UsgsService::new(logger, fetcher).stations(bbox).await?;
            Ok(normalize_usgs(raw))
        }));
    }

    let mut stations = vec![];
    for joined in join_all(tasks).await {
        stations.extend(joined??);
    }
    if let Some(region) = region {
        stations.retain(|station| region.contains(station.longitude, station.latitude));
    }
    debug!(logger, "merged {} stations", stations.len());
    Ok(stations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn coops_station(id: &str, removed: Option<OffsetDateTime>) -> CoopsStation {
        CoopsStation {
            id: id.to_string(),
            name: String::from("Somewhere"),
            state: String::from("RI"),
            latitude: 41.8,
            longitude: -71.4,
            affiliations: None,
            tidal: true,
            great_lakes: false,
            established: None,
            removed,
        }
    }

    fn ioc_station(code: &str, lon: &str, lat: &str, last: Option<&str>) -> IocStation {
        IocStation {
            code: code.to_string(),
            location: String::from("Somewhere"),
            country: Some(String::from("Japan")),
            lon: lon.to_string(),
            lat: lat.to_string(),
            dcp_id: None,
            last_observation: last.map(|s| s.to_string()),
        }
    }

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn provider_round_trips_through_strings() {
        for provider in [Provider::All, Provider::Coops, Provider::Ioc, Provider::Usgs] {
            assert_eq!(provider.to_string().parse::<Provider>().unwrap(), provider);
        }
        assert!("noaa".parse::<Provider>().is_err());
        assert_eq!("COOPS".parse::<Provider>().unwrap(), Provider::Coops);
    }

    #[test]
    fn all_includes_every_provider() {
        assert!(Provider::All.includes(Provider::Coops));
        assert!(Provider::All.includes(Provider::Usgs));
        assert!(Provider::Ioc.includes(Provider::Ioc));
        assert!(!Provider::Ioc.includes(Provider::Coops));
    }

    #[test]
    fn bounding_box_contains_and_parses() {
        let bbox: BoundingBox = "-75.0,38.0,-70.0,42.0".parse().unwrap();
        assert!(bbox.contains(-71.4, 41.8));
        assert!(!bbox.contains(-76.0, 41.8));
        assert!(!bbox.contains(-71.4, 43.0));

        assert!("-75.0,38.0,-70.0".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
        // west must sit west of east
        assert!("-70.0,38.0,-75.0,42.0".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn bounding_box_split_covers_the_box() {
        let tiles = WORLD.split(25.0);
        assert!(tiles.len() > 1);
        for tile in &tiles {
            assert!(tile.east - tile.west <= 25.0 + f64::EPSILON);
            assert!(tile.north - tile.south <= 25.0 + f64::EPSILON);
        }
        assert!(tiles.iter().any(|t| t.contains(-71.4, 41.8)));
        assert!(tiles.iter().any(|t| t.contains(144.29, 44.02)));

        let small = BoundingBox {
            west: -75.0,
            south: 38.0,
            east: -70.0,
            north: 42.0,
        };
        assert_eq!(small.split(25.0), vec![small]);
    }

    #[test]
    fn coops_normalization_keeps_removal() {
        let removed_at = datetime!(2013-04-04 14:11 UTC);
        let stations = normalize_coops(vec![
            coops_station("8454000", None),
            coops_station("8774230", Some(removed_at)),
        ]);
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].provider, Provider::Coops);
        assert!(stations[0].is_active);
        assert!(!stations[1].is_active);
        assert_eq!(stations[1].removed, Some(removed_at));
    }

    #[test]
    fn ioc_normalization_drops_bad_coordinates() {
        let now = datetime!(2024-05-07 00:00 UTC);
        let stations = normalize_ioc(
            &test_logger(),
            vec![
                ioc_station("abas", "144.29", "44.02", Some("2024-05-06 07:08:09")),
                ioc_station("bad1", "not-a-number", "44.02", None),
                ioc_station("cold", "10.0", "60.0", Some("2023-01-01 00:00:00")),
            ],
            now,
        );
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].provider_id, "abas");
        assert!(stations[0].is_active);
        assert_eq!(stations[0].country.as_deref(), Some("Japan"));
        assert!(!stations[1].is_active);
    }

    #[test]
    fn usgs_normalization_marks_sites_active() {
        let stations = normalize_usgs(vec![UsgsStation {
            agency: String::from("USGS"),
            site_no: String::from("01646500"),
            name: String::from("POTOMAC RIVER NEAR WASH, DC"),
            site_type: String::from("ST"),
            latitude: 38.9497,
            longitude: -77.1276,
            datum: Some(String::from("NAD83")),
            altitude: Some(37.2),
            huc: Some(String::from("02070008")),
        }]);
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].provider, Provider::Usgs);
        assert!(stations[0].is_active);
        assert!(stations[0].removed.is_none());
    }
}
