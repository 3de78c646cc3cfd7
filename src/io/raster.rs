use crate::core::grid::GridSpec;
use crate::types::{SitsError, SitsResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// Resampling applied when a source asset grid differs from the target grid.
///
/// Classification bands must use `Nearest`; continuous reflectance bands
/// may use `Bilinear`. The choice is made per band by the band registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    Nearest,
    Bilinear,
}

/// Reader for windowed access to remote or local raster assets.
///
/// Each call opens the asset, reads the single window covering the target
/// grid and drops the dataset handle before returning, so a large batch
/// never accumulates open files, read failures included.
pub struct AssetReader;

impl AssetReader {
    /// Read the pixel window covering `grid` from one raster asset,
    /// resampled onto the target grid.
    ///
    /// Target pixels falling outside the source extent are filled with
    /// `nodata`, never an error. Source nodata values are mapped to
    /// `nodata` as well.
    pub fn read_window(
        href: &str,
        grid: &GridSpec,
        nodata: f32,
        resampling: Resampling,
    ) -> SitsResult<Array2<f32>> {
        let path = Self::vsi_path(href);
        log::debug!("reading {}x{} window from {}", grid.width, grid.height, path);

        let dataset = Dataset::open(Path::new(&path))
            .map_err(|e| SitsError::ReadError(format!("failed to open {}: {}", href, e)))?;

        let gt = dataset
            .geo_transform()
            .map_err(|e| SitsError::ReadError(format!("no geotransform in {}: {}", href, e)))?;
        if gt[2] != 0.0 || gt[4] != 0.0 {
            return Err(SitsError::ReadError(format!(
                "rotated source rasters are not supported: {}",
                href
            )));
        }
        if gt[1] == 0.0 || gt[5] == 0.0 {
            return Err(SitsError::ReadError(format!(
                "degenerate pixel size in {}",
                href
            )));
        }

        let (src_width, src_height) = dataset.raster_size();

        // Target pixel centers expressed in the source CRS
        let (cols_f, rows_f) = Self::source_pixel_coords(&dataset, grid, &gt, href)?;

        // One window read covering every needed source pixel, with a one
        // pixel margin for bilinear neighbors
        let margin = 1.0;
        let mut min_col = f64::INFINITY;
        let mut max_col = f64::NEG_INFINITY;
        let mut min_row = f64::INFINITY;
        let mut max_row = f64::NEG_INFINITY;
        for (&c, &r) in cols_f.iter().zip(rows_f.iter()) {
            if c.is_finite() && r.is_finite() {
                min_col = min_col.min(c);
                max_col = max_col.max(c);
                min_row = min_row.min(r);
                max_row = max_row.max(r);
            }
        }
        if !min_col.is_finite() {
            return Ok(Array2::from_elem((grid.height, grid.width), nodata));
        }

        let win_x0 = ((min_col - margin).floor().max(0.0) as usize).min(src_width);
        let win_y0 = ((min_row - margin).floor().max(0.0) as usize).min(src_height);
        let win_x1 = (((max_col + margin).ceil() + 1.0).max(0.0) as usize).min(src_width);
        let win_y1 = (((max_row + margin).ceil() + 1.0).max(0.0) as usize).min(src_height);

        if win_x0 >= win_x1 || win_y0 >= win_y1 {
            // Requested grid lies entirely outside the source extent
            log::debug!("window fully outside {}, returning nodata grid", href);
            return Ok(Array2::from_elem((grid.height, grid.width), nodata));
        }

        let win_w = win_x1 - win_x0;
        let win_h = win_y1 - win_y0;

        let rasterband = dataset
            .rasterband(1)
            .map_err(|e| SitsError::ReadError(format!("no raster band in {}: {}", href, e)))?;
        let src_nodata = rasterband.no_data_value().map(|v| v as f32);
        let buffer = rasterband
            .read_as::<f32>(
                (win_x0 as isize, win_y0 as isize),
                (win_w, win_h),
                (win_w, win_h),
                None,
            )
            .map_err(|e| SitsError::ReadError(format!("window read failed for {}: {}", href, e)))?;
        let window = buffer.data;

        let mut out = Array2::from_elem((grid.height, grid.width), nodata);
        let sample = |col: usize, row: usize| -> Option<f32> {
            if col < win_x0 || col >= win_x1 || row < win_y0 || row >= win_y1 {
                return None;
            }
            let v = window[(row - win_y0) * win_w + (col - win_x0)];
            match src_nodata {
                Some(nd) if v == nd => None,
                _ if !v.is_finite() => None,
                _ => Some(v),
            }
        };

        for row in 0..grid.height {
            for col in 0..grid.width {
                let idx = row * grid.width + col;
                let col_f = cols_f[idx];
                let row_f = rows_f[idx];
                if !col_f.is_finite() || !row_f.is_finite() {
                    continue;
                }

                let value = match resampling {
                    Resampling::Nearest => {
                        if col_f < 0.0 || row_f < 0.0 {
                            None
                        } else {
                            sample(col_f.floor() as usize, row_f.floor() as usize)
                        }
                    }
                    Resampling::Bilinear => {
                        Self::bilinear(col_f, row_f, src_width, src_height, &sample)
                    }
                };
                if let Some(v) = value {
                    out[[row, col]] = v;
                }
            }
        }

        Ok(out)
    }

    /// Fractional source pixel coordinates of every target pixel center
    fn source_pixel_coords(
        dataset: &Dataset,
        grid: &GridSpec,
        gt: &[f64; 6],
        href: &str,
    ) -> SitsResult<(Vec<f64>, Vec<f64>)> {
        let n = grid.width * grid.height;
        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        for row in 0..grid.height {
            let y = grid.transform.top_left_y + (row as f64 + 0.5) * grid.transform.pixel_height;
            for col in 0..grid.width {
                let x = grid.transform.top_left_x + (col as f64 + 0.5) * grid.transform.pixel_width;
                xs.push(x);
                ys.push(y);
            }
        }

        let mut grid_srs = SpatialRef::from_epsg(grid.crs_epsg)
            .map_err(|e| SitsError::ReadError(format!("unknown grid EPSG {}: {}", grid.crs_epsg, e)))?;
        let mut src_srs = dataset
            .spatial_ref()
            .map_err(|e| SitsError::ReadError(format!("no spatial reference in {}: {}", href, e)))?;
        // Keep lon/lat order stable regardless of EPSG axis definitions
        grid_srs
            .set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        src_srs
            .set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);

        let transform = CoordTransform::new(&grid_srs, &src_srs)
            .map_err(|e| SitsError::ReadError(format!("CRS transform setup failed: {}", e)))?;
        let mut zs = vec![0.0; n];
        transform
            .transform_coords(&mut xs, &mut ys, &mut zs)
            .map_err(|e| SitsError::ReadError(format!("CRS transform failed for {}: {}", href, e)))?;

        // Affine inverse, no rotation terms
        let cols_f = xs.iter().map(|x| (x - gt[0]) / gt[1]).collect();
        let rows_f = ys.iter().map(|y| (y - gt[3]) / gt[5]).collect();
        Ok((cols_f, rows_f))
    }

    /// Bilinear sample at fractional pixel coordinates, skipping nodata
    /// neighbors and renormalizing the remaining weights
    fn bilinear(
        col_f: f64,
        row_f: f64,
        src_width: usize,
        src_height: usize,
        sample: &dyn Fn(usize, usize) -> Option<f32>,
    ) -> Option<f32> {
        let u = col_f - 0.5;
        let v = row_f - 0.5;
        let i0 = u.floor();
        let j0 = v.floor();
        let fu = (u - i0) as f32;
        let fv = (v - j0) as f32;

        let mut total = 0.0f32;
        let mut weight_sum = 0.0f32;
        for (di, dj, w) in [
            (0.0, 0.0, (1.0 - fu) * (1.0 - fv)),
            (1.0, 0.0, fu * (1.0 - fv)),
            (0.0, 1.0, (1.0 - fu) * fv),
            (1.0, 1.0, fu * fv),
        ] {
            let ci = i0 + di;
            let cj = j0 + dj;
            if ci < 0.0 || cj < 0.0 || ci >= src_width as f64 || cj >= src_height as f64 {
                continue;
            }
            if let Some(value) = sample(ci as usize, cj as usize) {
                total += value * w;
                weight_sum += w;
            }
        }

        if weight_sum > 0.0 {
            Some(total / weight_sum)
        } else {
            None
        }
    }

    /// Map an asset href onto a GDAL virtual filesystem path
    pub fn vsi_path(href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            format!("/vsicurl/{}", href)
        } else if let Some(rest) = href.strip_prefix("s3://") {
            format!("/vsis3/{}", rest)
        } else {
            href.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsi_path_mapping() {
        assert_eq!(
            AssetReader::vsi_path("https://example.com/B04.tif"),
            "/vsicurl/https://example.com/B04.tif"
        );
        assert_eq!(
            AssetReader::vsi_path("s3://bucket/key/B04.tif"),
            "/vsis3/bucket/key/B04.tif"
        );
        assert_eq!(AssetReader::vsi_path("/data/B04.tif"), "/data/B04.tif");
    }

    #[test]
    fn test_bilinear_all_neighbors_missing() {
        let sample = |_c: usize, _r: usize| -> Option<f32> { None };
        assert_eq!(AssetReader::bilinear(5.5, 5.5, 10, 10, &sample), None);
    }

    #[test]
    fn test_bilinear_center_of_pixel() {
        // Sampling exactly at a pixel center returns that pixel's value
        let sample = |c: usize, r: usize| -> Option<f32> { Some((r * 10 + c) as f32) };
        let v = AssetReader::bilinear(3.5, 2.5, 10, 10, &sample).unwrap();
        assert!((v - 23.0).abs() < 1e-6);
    }

    #[test]
    fn test_bilinear_renormalizes_on_partial_nodata() {
        // Left column nodata; interpolation between the two valid
        // right-hand neighbors only
        let sample = |c: usize, _r: usize| -> Option<f32> {
            if c < 3 {
                None
            } else {
                Some(100.0)
            }
        };
        let v = AssetReader::bilinear(3.0, 2.5, 10, 10, &sample).unwrap();
        assert!((v - 100.0).abs() < 1e-6);
    }
}
