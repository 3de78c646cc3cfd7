//! I/O modules for catalog search and raster asset access

pub mod raster;
pub mod stac;

pub use raster::{AssetReader, Resampling};
pub use stac::{CatalogClient, StacProvider};
