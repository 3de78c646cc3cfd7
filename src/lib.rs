//! sits: A Fast, Modular Satellite Image Time Series Extractor
//!
//! This library turns a set of geographic sites and a STAC-compliant
//! imagery catalog into per-site (time, band, y, x) data cubes: it searches
//! the catalog for matching scenes, reads and aligns the requested band
//! rasters onto a common grid, removes the Sentinel-2 processing-baseline
//! radiometric offset, and exports the result as Zarr stores or flat CSV
//! tables.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types
pub use types::{
    AssetRef, BoundingBox, Extent, GeoTransform, SceneItem, SearchCriteria, Site, SitsError,
    SitsResult,
};

pub use io::{AssetReader, CatalogClient, Resampling, StacProvider};

pub use core::{
    BandKind, BaselineCorrector, BatchReport, CollectionConfig, CubeBuilder, ExportFormat,
    ExtractRequest, Extractor, GridSpec, Reduction, SiteCube, StacConfig, TableExporter,
    ZarrExporter,
};
