use futures::future::join_all;
use regex::Regex;
use serde::{Deserialize, Serialize};
use slog::{debug, Logger};
use std::{collections::HashSet, sync::Arc};

use crate::{
    fetch::{self, HttpFetcher},
    stations::BoundingBox,
};

const SITE_URL: &str = "https://waterservices.usgs.gov/nwis/site/";

// the site service caps bounding boxes, wider requests get tiled
const MAX_TILE_SPAN: f64 = 25.0;

// surface water site types that report stage or tide data
const SITE_TYPES: &str = "ST,LK,ES,OC";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] fetch::Error),
    #[error("rdb response is missing column {0}")]
    MissingColumn(&'static str),
    #[error("error reading rdb record: {0}")]
    Record(#[from] csv::Error),
    #[error("site task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsgsStation {
    pub agency: String,
    pub site_no: String,
    pub name: String,
    pub site_type: String,
    pub latitude: f64,
    pub longitude: f64,
    pub datum: Option<String>,
    pub altitude: Option<f64>,
    pub huc: Option<String>,
}

pub struct UsgsService {
    pub logger: Logger,
    pub fetcher: Arc<HttpFetcher>,
}

impl UsgsService {
    pub fn new(logger: Logger, fetcher: Arc<HttpFetcher>) -> Self {
        UsgsService { logger, fetcher }
    }

    pub async fn stations(&self, bbox: BoundingBox) -> Result<Vec<UsgsStation>, Error> {
        let tiles = bbox.split(MAX_TILE_SPAN);
        debug!(self.logger, "requesting {} nwis tiles", tiles.len());

        let mut tasks = vec![];
        for tile in tiles {
            let url = format!(
                "{SITE_URL}?format=rdb&bBox={:.4},{:.4},{:.4},{:.4}&siteType={SITE_TYPES}&siteStatus=all&hasDataTypeCd=iv",
                tile.west, tile.south, tile.east, tile.north,
            );
            let fetcher = Arc::clone(&self.fetcher);
            let task = tokio::spawn(async move { fetcher.fetch_text(&url).await });
            tasks.push(task);
        }

        let mut stations = vec![];
        let mut seen: HashSet<String> = HashSet::new();
        for joined in join_all(tasks).await {
            let content = joined??;
            for station in parse_rdb(&content)? {
                // tiles overlap at their edges, keep the first copy of a site
                if seen.insert(station.site_no.clone()) {
                    stations.push(station);
                }
            }
        }
        Ok(stations)
    }
}

/// Parses an NWIS RDB document: `#` comment lines, a header row, a
/// field-width row (cells like `5s` or `16s`), then tab-separated records.
fn parse_rdb(content: &str) -> Result<Vec<UsgsStation>, Error> {
    let width_row = Regex::new(r"^\d+[a-z]$").expect("static pattern");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers()?.clone();
    // an empty tile answers with comments only
    if headers.len() == 0 || (headers.len() == 1 && headers[0].is_empty()) {
        return Ok(vec![]);
    }
    let index = |name: &'static str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or(Error::MissingColumn(name))
    };
    let agency_idx = index("agency_cd")?;
    let site_no_idx = index("site_no")?;
    let name_idx = index("station_nm")?;
    let type_idx = index("site_tp_cd")?;
    let lat_idx = index("dec_lat_va")?;
    let lon_idx = index("dec_long_va")?;
    let datum_idx = headers.iter().position(|h| h == "dec_coord_datum_cd");
    let alt_idx = headers.iter().position(|h| h == "alt_va");
    let huc_idx = headers.iter().position(|h| h == "huc_cd");

    let field = |record: &csv::StringRecord, idx: usize| -> String {
        record.get(idx).unwrap_or("").trim().to_string()
    };

    let mut stations = vec![];
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| width_row.is_match(cell.trim())) {
            continue;
        }
        // skip sites without usable coordinates
        let latitude = match field(&record, lat_idx).parse::<f64>() {
            Ok(latitude) => latitude,
            Err(_) => continue,
        };
        let longitude = match field(&record, lon_idx).parse::<f64>() {
            Ok(longitude) => longitude,
            Err(_) => continue,
        };
        stations.push(UsgsStation {
            agency: field(&record, agency_idx),
            site_no: field(&record, site_no_idx),
            name: field(&record, name_idx),
            site_type: field(&record, type_idx),
            latitude,
            longitude,
            datum: datum_idx.map(|idx| field(&record, idx)).filter(|v| !v.is_empty()),
            altitude: alt_idx.and_then(|idx| field(&record, idx).parse::<f64>().ok()),
            huc: huc_idx.map(|idx| field(&record, idx)).filter(|v| !v.is_empty()),
        });
    }
    Ok(stations)
}

/// Pulls USGS NWIS surface-water sites inside a bounding box. Wide boxes are
/// tiled to stay under the service limit and the tiles are fetched
/// concurrently; overlapping sites are de-duplicated by site number.
pub async fn get_usgs_stations(
    logger: &Logger,
    bbox: BoundingBox,
) -> Result<Vec<UsgsStation>, Error> {
    let fetcher = Arc::new(HttpFetcher::new(logger.clone())?);
    UsgsService::new(logger.clone(), fetcher)
        .stations(bbox)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const RDB_FIXTURE: &str = "\
#
# US Geological Survey
# retrieved: 2024-05-06 07:08:09 EDT
#
# The Site File stores location and general information about groundwater,
# surface water, and meteorological sites.
#
agency_cd\tsite_no\tstation_nm\tsite_tp_cd\tdec_lat_va\tdec_long_va\tcoord_acy_cd\tdec_coord_datum_cd\talt_va\talt_acy_va\talt_datum_cd\thuc_cd
5s\t15s\t50s\t7s\t16s\t16s\t1s\t10s\t8s\t3s\t10s\t16s
USGS\t01646500\tPOTOMAC RIVER NEAR WASH, DC\tST\t38.94977778\t-77.12763889\tS\tNAD83\t37.20\t.1\tNAVD88\t02070008
USGS\t01654000\tACCOTINK CREEK NEAR ANNANDALE, VA\tST\t38.81205556\t-77.22846522\tS\tNAD83\t\t\t\t02070010
USGS\t01653600\tBROKEN SITE\tST\t\t-77.1\tS\tNAD83\t12.0\t.1\tNAVD88\t02070010
";

    #[test]
    fn parses_rdb_document() {
        let stations = parse_rdb(RDB_FIXTURE).unwrap();
        assert_eq!(stations.len(), 2);

        assert_eq!(stations[0].site_no, "01646500");
        assert_eq!(stations[0].agency, "USGS");
        assert_eq!(stations[0].site_type, "ST");
        assert_eq!(stations[0].latitude, 38.94977778);
        assert_eq!(stations[0].longitude, -77.12763889);
        assert_eq!(stations[0].datum.as_deref(), Some("NAD83"));
        assert_eq!(stations[0].altitude, Some(37.20));
        assert_eq!(stations[0].huc.as_deref(), Some("02070008"));

        // missing altitude stays empty rather than zero
        assert_eq!(stations[1].altitude, None);
    }

    #[test]
    fn skips_sites_without_coordinates() {
        let stations = parse_rdb(RDB_FIXTURE).unwrap();
        assert!(stations.iter().all(|s| s.site_no != "01653600"));
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let content = "agency_cd\tstation_nm\nUSGS\tSOMEWHERE\n";
        match parse_rdb(content) {
            Err(Error::MissingColumn(column)) => assert_eq!(column, "site_no"),
            other => panic!("expected a missing column error, got {other:?}"),
        }
    }

    #[test]
    fn comment_only_document_is_empty() {
        assert!(parse_rdb("# nothing here\n# at all\n").unwrap().is_empty());
    }
}
