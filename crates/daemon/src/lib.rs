mod models;
mod parquet_handler;
mod utils;

pub use models::*;
pub use parquet_handler::*;
pub use utils::*;
