pub mod coops;
pub mod fetch;
pub mod ioc;
pub mod stations;
pub mod usgs;

pub use coops::{
    get_coops_data, get_coops_stations, CoopsDatum, CoopsObservation, CoopsProduct, CoopsService,
    CoopsStation, CoopsStationType,
};
pub use fetch::{HttpFetcher, RateLimiter};
pub use ioc::{get_ioc_data, get_ioc_stations, IocObservation, IocService, IocStation};
pub use stations::{get_stations, BoundingBox, Provider, Station, WORLD};
pub use usgs::{get_usgs_stations, UsgsService, UsgsStation};
