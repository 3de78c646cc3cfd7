use crate::types::{Extent, GeoTransform, SitsError, SitsResult};

/// Regular target grid a site cube is sampled on: projected CRS, affine
/// transform and pixel dimensions.
///
/// North-up convention: `pixel_height` is negative and row 0 is the
/// northernmost row.
#[derive(Debug, Clone, Copy)]
pub struct GridSpec {
    pub crs_epsg: u32,
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub resolution: f64,
}

impl GridSpec {
    /// Grid covering `extent` at `resolution`, edges snapped outward to
    /// the resolution lattice (image mode).
    pub fn from_extent(extent: &Extent, crs_epsg: u32, resolution: f64) -> SitsResult<Self> {
        if resolution <= 0.0 || !resolution.is_finite() {
            return Err(SitsError::GeometryMismatch(format!(
                "invalid grid resolution: {}",
                resolution
            )));
        }
        if extent.width() < 0.0 || extent.height() < 0.0 {
            return Err(SitsError::GeometryMismatch(format!(
                "inverted extent: {:?}",
                extent
            )));
        }

        let min_x = (extent.min_x / resolution).floor() * resolution;
        let min_y = (extent.min_y / resolution).floor() * resolution;
        let max_x = (extent.max_x / resolution).ceil() * resolution;
        let max_y = (extent.max_y / resolution).ceil() * resolution;

        let width = ((max_x - min_x) / resolution).round().max(1.0) as usize;
        let height = ((max_y - min_y) / resolution).round().max(1.0) as usize;

        Ok(Self {
            crs_epsg,
            transform: GeoTransform {
                top_left_x: min_x,
                pixel_width: resolution,
                rotation_x: 0.0,
                top_left_y: min_y + height as f64 * resolution,
                rotation_y: 0.0,
                pixel_height: -resolution,
            },
            width,
            height,
            resolution,
        })
    }

    /// Fixed-shape patch grid centered on `extent` (patch mode).
    ///
    /// The extent is snapped to the resolution lattice, then the requested
    /// (width, height) window is centered on it, so every site yields an
    /// identically shaped patch regardless of its footprint size.
    pub fn with_shape(
        extent: &Extent,
        crs_epsg: u32,
        resolution: f64,
        shape: (usize, usize),
    ) -> SitsResult<Self> {
        let (dim_x, dim_y) = shape;
        if dim_x == 0 || dim_y == 0 {
            return Err(SitsError::GeometryMismatch(format!(
                "patch shape must be non-zero, got {}x{}",
                dim_x, dim_y
            )));
        }
        if resolution <= 0.0 || !resolution.is_finite() {
            return Err(SitsError::GeometryMismatch(format!(
                "invalid grid resolution: {}",
                resolution
            )));
        }

        // Size of the footprint in pixels, then the shift that centers the
        // requested shape on it
        let size_x = (extent.width() / resolution).round();
        let size_y = (extent.height() / resolution).round();
        let shift_x = ((dim_x as f64 - size_x) / 2.0).round();
        let shift_y = ((dim_y as f64 - size_y) / 2.0).round();

        let min_x = resolution * ((extent.min_x / resolution).round() - shift_x);
        let min_y = resolution * ((extent.min_y / resolution).round() - shift_y);
        let max_y = min_y + dim_y as f64 * resolution;

        Ok(Self {
            crs_epsg,
            transform: GeoTransform {
                top_left_x: min_x,
                pixel_width: resolution,
                rotation_x: 0.0,
                top_left_y: max_y,
                rotation_y: 0.0,
                pixel_height: -resolution,
            },
            width: dim_x,
            height: dim_y,
            resolution,
        })
    }

    /// Single-pixel grid centered on a point footprint
    pub fn single_pixel(extent: &Extent, crs_epsg: u32, resolution: f64) -> SitsResult<Self> {
        Self::with_shape(extent, crs_epsg, resolution, (1, 1))
    }

    pub fn extent(&self) -> Extent {
        Extent::new(
            self.transform.top_left_x,
            self.transform.top_left_y + self.height as f64 * self.transform.pixel_height,
            self.transform.top_left_x + self.width as f64 * self.transform.pixel_width,
            self.transform.top_left_y,
        )
    }

    /// Pixel-center x coordinates, west to east
    pub fn x_coords(&self) -> Vec<f64> {
        (0..self.width)
            .map(|col| self.transform.top_left_x + (col as f64 + 0.5) * self.transform.pixel_width)
            .collect()
    }

    /// Pixel-center y coordinates, north to south
    pub fn y_coords(&self) -> Vec<f64> {
        (0..self.height)
            .map(|row| self.transform.top_left_y + (row as f64 + 0.5) * self.transform.pixel_height)
            .collect()
    }
}
