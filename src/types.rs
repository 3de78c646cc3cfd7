use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel value recorded when a scene carries no processing-baseline
/// metadata. A missing baseline never triggers radiometric correction.
pub const MISSING_BASELINE: f32 = 0.0;

/// Geographic bounding box in lon/lat (EPSG:4326), as used by STAC search
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    /// STAC wire order: [west, south, east, north]
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn validate(&self) -> SitsResult<()> {
        if !self.min_lon.is_finite()
            || !self.min_lat.is_finite()
            || !self.max_lon.is_finite()
            || !self.max_lat.is_finite()
        {
            return Err(SitsError::InvalidCriteria(
                "bounding box contains non-finite coordinates".to_string(),
            ));
        }
        if self.min_lon >= self.max_lon || self.min_lat >= self.max_lat {
            return Err(SitsError::InvalidCriteria(format!(
                "degenerate bounding box: [{}, {}, {}, {}]",
                self.min_lon, self.min_lat, self.max_lon, self.max_lat
            )));
        }
        if self.min_lon < -180.0
            || self.max_lon > 180.0
            || self.min_lat < -90.0
            || self.max_lat > 90.0
        {
            return Err(SitsError::InvalidCriteria(format!(
                "bounding box outside lon/lat range: [{}, {}, {}, {}]",
                self.min_lon, self.min_lat, self.max_lon, self.max_lat
            )));
        }
        Ok(())
    }
}

/// Rectangular extent in a projected CRS (units of that CRS)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Grow the extent by `radius` on every side
    pub fn buffered(&self, radius: f64) -> Self {
        Self {
            min_x: self.min_x - radius,
            min_y: self.min_y - radius,
            max_x: self.max_x + radius,
            max_y: self.max_y + radius,
        }
    }
}

/// Geospatial transformation parameters (GDAL affine convention)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn from_array(gt: &[f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

/// Search parameters for one catalog query. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCriteria {
    pub collection: String,
    pub bbox: BoundingBox,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Ceiling on `eo:cloud_cover`, in percent
    pub max_cloud_cover: Option<f64>,
    /// Page size requested from the catalog
    pub page_limit: usize,
}

impl SearchCriteria {
    pub fn new(
        collection: &str,
        bbox: BoundingBox,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            collection: collection.to_string(),
            bbox,
            start,
            end,
            max_cloud_cover: None,
            page_limit: 250,
        }
    }

    pub fn with_max_cloud_cover(mut self, ceiling: f64) -> Self {
        self.max_cloud_cover = Some(ceiling);
        self
    }

    pub fn validate(&self) -> SitsResult<()> {
        if self.collection.is_empty() {
            return Err(SitsError::InvalidCriteria(
                "empty collection identifier".to_string(),
            ));
        }
        if self.end < self.start {
            return Err(SitsError::InvalidCriteria(format!(
                "temporal range ends before it starts: {} / {}",
                self.start, self.end
            )));
        }
        self.bbox.validate()
    }
}

/// One raster asset of a catalog item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRef {
    pub href: String,
    /// Ground sample distance in meters, when advertised by the catalog
    pub gsd: Option<f64>,
}

/// One catalog search result: a single satellite acquisition with its
/// raster assets. Read-only downstream of the catalog client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneItem {
    pub id: String,
    pub datetime: DateTime<Utc>,
    pub bbox: Option<BoundingBox>,
    /// Parsed `s2:processing_baseline`; [`MISSING_BASELINE`] when absent
    pub processing_baseline: f32,
    pub cloud_cover: Option<f64>,
    pub assets: HashMap<String, AssetRef>,
}

/// One input geometry: identifier, point or polygon, and the projected CRS
/// the output grid is defined in. Supplied by the geometry provider.
#[derive(Debug, Clone)]
pub struct Site {
    pub id: String,
    pub geometry: geo_types::Geometry<f64>,
    pub crs_epsg: u32,
    /// Optional buffer radius in CRS units, applied to the footprint
    pub buffer: Option<f64>,
}

impl Site {
    pub fn new(id: &str, geometry: geo_types::Geometry<f64>, crs_epsg: u32) -> Self {
        Self { id: id.to_string(), geometry, crs_epsg, buffer: None }
    }

    pub fn with_buffer(mut self, radius: f64) -> Self {
        self.buffer = Some(radius);
        self
    }

    /// Footprint extent in the site CRS, buffer included
    pub fn extent(&self) -> SitsResult<Extent> {
        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        let mut take = |x: f64, y: f64| {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        };

        match &self.geometry {
            geo_types::Geometry::Point(p) => take(p.x(), p.y()),
            geo_types::Geometry::MultiPoint(mp) => {
                for p in &mp.0 {
                    take(p.x(), p.y());
                }
            }
            geo_types::Geometry::Polygon(poly) => {
                for c in poly.exterior().coords() {
                    take(c.x, c.y);
                }
            }
            geo_types::Geometry::MultiPolygon(mp) => {
                for poly in &mp.0 {
                    for c in poly.exterior().coords() {
                        take(c.x, c.y);
                    }
                }
            }
            other => {
                return Err(SitsError::GeometryMismatch(format!(
                    "unsupported geometry type for site {}: {:?}",
                    self.id, other
                )))
            }
        }

        if !min_x.is_finite() || !min_y.is_finite() {
            return Err(SitsError::GeometryMismatch(format!(
                "empty geometry for site {}",
                self.id
            )));
        }

        let extent = Extent::new(min_x, min_y, max_x, max_y);
        Ok(match self.buffer {
            Some(r) => extent.buffered(r),
            None => extent,
        })
    }
}

/// Error types for SITS extraction
#[derive(Debug, thiserror::Error)]
pub enum SitsError {
    #[error("invalid search criteria: {0}")]
    InvalidCriteria(String),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("band not found: {0}")]
    BandNotFound(String),

    #[error("geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("unsupported cube shape: {0}")]
    UnsupportedShape(String),

    #[error("raster read failed: {0}")]
    ReadError(String),

    #[error("write failed: {0}")]
    WriteError(String),

    #[error("cube has already been harmonized")]
    AlreadyCorrected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for SITS operations
pub type SitsResult<T> = Result<T, SitsError>;
