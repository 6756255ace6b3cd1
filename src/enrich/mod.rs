pub mod geo;
pub mod ua;

pub use geo::{GeoEnricher, GeoInfo};
pub use ua::{parse_ua, UaInfo};
