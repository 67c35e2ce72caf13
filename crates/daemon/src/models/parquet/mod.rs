pub mod sea_level;
pub mod stations;

pub use sea_level::*;
pub use stations::*;
