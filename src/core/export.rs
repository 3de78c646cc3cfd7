use crate::core::bands::BandKind;
use crate::core::cube::SiteCube;
use crate::core::grid::GridSpec;
use crate::types::{GeoTransform, SitsError, SitsResult};
use chrono::{DateTime, TimeZone, Utc};
use ndarray::Array3;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::{Group, GroupBuilder};
use zarrs_filesystem::FilesystemStore;

/// Spatial reduction applied when flattening a patch cube to rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    /// Mean over valid (non-nodata) pixels of the patch
    Mean,
}

/// Flattens cubes to one row per (site, timestamp) with one column per
/// band, plus identifier and date columns.
///
/// Patch-shaped cubes require an explicit [`Reduction`]; exporting one
/// without it fails with `UnsupportedShape`.
pub struct TableExporter {
    reduction: Option<Reduction>,
}

impl Default for TableExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableExporter {
    pub fn new() -> Self {
        Self { reduction: None }
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = Some(reduction);
        self
    }

    pub fn export(&self, cube: &SiteCube, dest: &Path) -> SitsResult<()> {
        self.export_many(std::slice::from_ref(cube), dest)
    }

    /// Write one CSV table covering a batch of cubes.
    ///
    /// The file is staged in the destination directory and atomically
    /// renamed into place; a failed export leaves no partial file.
    pub fn export_many(&self, cubes: &[SiteCube], dest: &Path) -> SitsResult<()> {
        for cube in cubes {
            if !cube.is_single_pixel() && self.reduction.is_none() {
                return Err(SitsError::UnsupportedShape(format!(
                    "cube for site {} is {}x{} pixels; flat tables need a reduction strategy",
                    cube.site_id, cube.grid.height, cube.grid.width
                )));
            }
        }
        let band_names = match cubes.first() {
            Some(first) => &first.band_names,
            None => {
                return Err(SitsError::UnsupportedShape(
                    "no cubes to export".to_string(),
                ))
            }
        };

        let dir = dest.parent().filter(|p| !p.as_os_str().is_empty());
        let tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))
            .map_err(|e| SitsError::WriteError(format!("staging {}: {}", dest.display(), e)))?;

        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            let mut header = vec![
                "site".to_string(),
                "scene".to_string(),
                "datetime".to_string(),
                "cloud_cover".to_string(),
                "baseline".to_string(),
            ];
            header.extend(band_names.iter().cloned());
            writer
                .write_record(&header)
                .map_err(|e| SitsError::WriteError(e.to_string()))?;

            for cube in cubes {
                self.write_rows(&mut writer, cube, band_names)?;
            }
            writer
                .flush()
                .map_err(|e| SitsError::WriteError(e.to_string()))?;
        }

        tmp.persist(dest)
            .map_err(|e| SitsError::WriteError(format!("persisting {}: {}", dest.display(), e)))?;
        log::info!("wrote table for {} cube(s) to {}", cubes.len(), dest.display());
        Ok(())
    }

    fn write_rows<W: std::io::Write>(
        &self,
        writer: &mut csv::Writer<W>,
        cube: &SiteCube,
        band_names: &[String],
    ) -> SitsResult<()> {
        for (t, timestamp) in cube.timestamps.iter().enumerate() {
            let mut row = vec![
                cube.site_id.clone(),
                cube.scene_ids[t].clone(),
                timestamp.to_rfc3339(),
                cube.cloud_cover[t].map(|c| c.to_string()).unwrap_or_default(),
                cube.baselines[t].to_string(),
            ];
            for name in band_names {
                let value = cube
                    .band(name)
                    .and_then(|stack| self.reduce(stack, t, cube.nodata));
                row.push(value.map(|v| v.to_string()).unwrap_or_default());
            }
            writer
                .write_record(&row)
                .map_err(|e| SitsError::WriteError(e.to_string()))?;
        }
        Ok(())
    }

    /// Reduce one timestamp's plane to a scalar; `None` when every pixel
    /// is nodata
    fn reduce(&self, stack: &Array3<f32>, t: usize, nodata: f32) -> Option<f32> {
        let plane = stack.index_axis(ndarray::Axis(0), t);
        if plane.len() == 1 {
            let v = plane[[0, 0]];
            return if v == nodata { None } else { Some(v) };
        }
        match self.reduction {
            Some(Reduction::Mean) => {
                let mut sum = 0.0f64;
                let mut count = 0usize;
                for &v in plane.iter() {
                    if v != nodata {
                        sum += v as f64;
                        count += 1;
                    }
                }
                if count > 0 {
                    Some((sum / count as f64) as f32)
                } else {
                    None
                }
            }
            // single-pixel cubes never reach here; export_many rejects
            // patch cubes without a reduction up front
            None => None,
        }
    }
}

/// Writes cubes as self-describing Zarr v3 hierarchies: one Float32 array
/// per band with (time, y, x) dimensions, coordinate arrays, and the
/// per-site attributes needed to read the cube back losslessly.
pub struct ZarrExporter;

impl ZarrExporter {
    /// Export one cube to `dest` (a `.zarr` directory).
    ///
    /// The hierarchy is staged next to the destination and atomically
    /// renamed into place, so a crashed export never leaves a partial
    /// store behind.
    pub fn export(cube: &SiteCube, dest: &Path) -> SitsResult<()> {
        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SitsError::WriteError(format!("invalid destination: {}", dest.display()))
            })?;
        let stage = dest.with_file_name(format!("{}.partial", file_name));
        if stage.exists() {
            std::fs::remove_dir_all(&stage)
                .map_err(|e| SitsError::WriteError(format!("clearing stage dir: {}", e)))?;
        }
        std::fs::create_dir_all(&stage)
            .map_err(|e| SitsError::WriteError(format!("creating stage dir: {}", e)))?;

        let result = Self::write_store(cube, &stage);
        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(&stage);
            return Err(e);
        }

        if dest.exists() {
            std::fs::remove_dir_all(dest)
                .map_err(|e| SitsError::WriteError(format!("replacing {}: {}", dest.display(), e)))?;
        }
        std::fs::rename(&stage, dest)
            .map_err(|e| SitsError::WriteError(format!("renaming into {}: {}", dest.display(), e)))?;
        log::info!(
            "wrote cube for site {} ({} timestamps, {} bands) to {}",
            cube.site_id,
            cube.timestamps.len(),
            cube.band_names.len(),
            dest.display()
        );
        Ok(())
    }

    /// Export a batch, one store per site, named `<site_id>.zarr`
    pub fn export_batch(cubes: &[SiteCube], out_dir: &Path) -> SitsResult<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)
            .map_err(|e| SitsError::WriteError(format!("creating {}: {}", out_dir.display(), e)))?;
        cubes
            .iter()
            .map(|cube| {
                let dest = out_dir.join(format!("{}.zarr", cube.site_id));
                Self::export(cube, &dest)?;
                Ok(dest)
            })
            .collect()
    }

    fn write_store(cube: &SiteCube, stage: &Path) -> SitsResult<()> {
        let store = Arc::new(
            FilesystemStore::new(stage)
                .map_err(|e| SitsError::WriteError(format!("opening store: {}", e)))?,
        );
        let (nt, ny, nx) = cube.shape();

        let group = GroupBuilder::new()
            .attributes(Self::group_attributes(cube))
            .build(store.clone(), "/")
            .map_err(|e| SitsError::WriteError(e.to_string()))?;
        group
            .store_metadata()
            .map_err(|e| SitsError::WriteError(e.to_string()))?;

        for name in &cube.band_names {
            let stack = cube.band(name).ok_or_else(|| {
                SitsError::WriteError(format!("cube is missing band array {}", name))
            })?;
            let mut attrs = Map::new();
            if let Some(kind) = cube.band_kinds.get(name) {
                attrs.insert("kind".to_string(), json!(kind.as_str()));
            }

            let chunk_grid: zarrs::array::ChunkGrid =
                vec![nt.max(1) as u64, ny as u64, nx as u64]
                    .try_into()
                    .map_err(|e| SitsError::WriteError(format!("chunk grid: {:?}", e)))?;
            let array = ArrayBuilder::new(
                vec![nt as u64, ny as u64, nx as u64],
                DataType::Float32,
                chunk_grid,
                FillValue::from(cube.nodata),
            )
            .dimension_names(["time", "y", "x"].into())
            .attributes(attrs)
            .build(store.clone(), &format!("/{}", name))
            .map_err(|e| SitsError::WriteError(e.to_string()))?;
            array
                .store_metadata()
                .map_err(|e| SitsError::WriteError(e.to_string()))?;

            if nt > 0 {
                let layout = stack.as_standard_layout();
                let data = layout.as_slice().ok_or_else(|| {
                    SitsError::WriteError(format!("band {} is not contiguous", name))
                })?;
                let subset = ArraySubset::new_with_start_shape(
                    vec![0, 0, 0],
                    vec![nt as u64, ny as u64, nx as u64],
                )
                .map_err(|e| SitsError::WriteError(e.to_string()))?;
                array
                    .store_array_subset_elements(&subset, data)
                    .map_err(|e| SitsError::WriteError(e.to_string()))?;
            }
        }

        let seconds: Vec<i64> = cube.timestamps.iter().map(|t| t.timestamp()).collect();
        Self::write_coord(
            &store,
            "/time",
            DataType::Int64,
            FillValue::from(0i64),
            &seconds,
            "time",
            json!({"units": "seconds since 1970-01-01T00:00:00Z"}),
        )?;
        Self::write_coord(
            &store,
            "/x",
            DataType::Float64,
            FillValue::from(f64::NAN),
            &cube.grid.x_coords(),
            "x",
            json!({"units": "meters"}),
        )?;
        Self::write_coord(
            &store,
            "/y",
            DataType::Float64,
            FillValue::from(f64::NAN),
            &cube.grid.y_coords(),
            "y",
            json!({"units": "meters"}),
        )?;

        Ok(())
    }

    fn write_coord<T: zarrs::array::Element + Copy>(
        store: &Arc<FilesystemStore>,
        path: &str,
        data_type: DataType,
        fill_value: FillValue,
        values: &[T],
        dimension: &str,
        attrs_json: Value,
    ) -> SitsResult<()> {
        let mut attrs = Map::new();
        if let Value::Object(map) = attrs_json {
            attrs = map;
        }
        let chunk_grid: zarrs::array::ChunkGrid = vec![values.len().max(1) as u64]
            .try_into()
            .map_err(|e| SitsError::WriteError(format!("chunk grid: {:?}", e)))?;
        let array = ArrayBuilder::new(
            vec![values.len() as u64],
            data_type,
            chunk_grid,
            fill_value,
        )
        .dimension_names([dimension].into())
        .attributes(attrs)
        .build(store.clone(), path)
        .map_err(|e| SitsError::WriteError(e.to_string()))?;
        array
            .store_metadata()
            .map_err(|e| SitsError::WriteError(e.to_string()))?;
        if !values.is_empty() {
            let subset =
                ArraySubset::new_with_start_shape(vec![0], vec![values.len() as u64])
                    .map_err(|e| SitsError::WriteError(e.to_string()))?;
            array
                .store_array_subset_elements(&subset, values)
                .map_err(|e| SitsError::WriteError(e.to_string()))?;
        }
        Ok(())
    }

    fn group_attributes(cube: &SiteCube) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert("site_id".to_string(), json!(cube.site_id));
        attrs.insert("collection".to_string(), json!(cube.collection));
        attrs.insert("crs_epsg".to_string(), json!(cube.grid.crs_epsg));
        attrs.insert("resolution".to_string(), json!(cube.grid.resolution));
        attrs.insert(
            "geo_transform".to_string(),
            json!(cube.grid.transform.to_array()),
        );
        attrs.insert("nodata".to_string(), json!(cube.nodata));
        attrs.insert("harmonized".to_string(), json!(cube.harmonized));
        attrs.insert("band_names".to_string(), json!(cube.band_names));
        attrs.insert("scene_ids".to_string(), json!(cube.scene_ids));
        attrs.insert("baselines".to_string(), json!(cube.baselines));
        attrs.insert("cloud_cover".to_string(), json!(cube.cloud_cover));
        attrs
    }

    /// Read a cube back from a store written by [`ZarrExporter::export`].
    ///
    /// Round-trips are lossless: band values, timestamps and coordinates
    /// come back bit-exact for f32 grids.
    pub fn import(src: &Path) -> SitsResult<SiteCube> {
        let store = Arc::new(
            FilesystemStore::new(src)
                .map_err(|e| SitsError::ReadError(format!("opening store: {}", e)))?,
        );
        let group = Group::open(store.clone(), "/")
            .map_err(|e| SitsError::ReadError(format!("opening {}: {}", src.display(), e)))?;
        let attrs = group.attributes();

        let site_id: String = Self::attr(attrs, "site_id")?;
        let collection: String = Self::attr(attrs, "collection")?;
        let crs_epsg: u32 = Self::attr(attrs, "crs_epsg")?;
        let resolution: f64 = Self::attr(attrs, "resolution")?;
        let gt: [f64; 6] = Self::attr(attrs, "geo_transform")?;
        let nodata: f32 = Self::attr(attrs, "nodata")?;
        let harmonized: bool = Self::attr(attrs, "harmonized")?;
        let band_names: Vec<String> = Self::attr(attrs, "band_names")?;
        let scene_ids: Vec<String> = Self::attr(attrs, "scene_ids")?;
        let baselines: Vec<f32> = Self::attr(attrs, "baselines")?;
        let cloud_cover: Vec<Option<f64>> = Self::attr(attrs, "cloud_cover")?;

        let seconds: Vec<i64> = Self::read_coord(&store, "/time")?;
        let timestamps = seconds
            .iter()
            .map(|&s| {
                Utc.timestamp_opt(s, 0).single().ok_or_else(|| {
                    SitsError::ReadError(format!("invalid stored timestamp: {}", s))
                })
            })
            .collect::<SitsResult<Vec<DateTime<Utc>>>>()?;

        let mut bands = HashMap::new();
        let mut band_kinds = HashMap::new();
        let mut dims = (timestamps.len(), 0usize, 0usize);
        for name in &band_names {
            let array = Array::open(store.clone(), &format!("/{}", name))
                .map_err(|e| SitsError::ReadError(format!("opening band {}: {}", name, e)))?;
            let shape = array.shape().to_vec();
            if shape.len() != 3 {
                return Err(SitsError::ReadError(format!(
                    "band {} has {} dimensions, expected 3",
                    name,
                    shape.len()
                )));
            }
            let (nt, ny, nx) = (shape[0] as usize, shape[1] as usize, shape[2] as usize);
            dims = (nt, ny, nx);
            let data: Vec<f32> = if nt > 0 {
                let subset = ArraySubset::new_with_start_shape(vec![0, 0, 0], shape)
                    .map_err(|e| SitsError::ReadError(e.to_string()))?;
                array
                    .retrieve_array_subset_elements(&subset)
                    .map_err(|e| SitsError::ReadError(e.to_string()))?
            } else {
                Vec::new()
            };
            let stack = Array3::from_shape_vec((nt, ny, nx), data)
                .map_err(|e| SitsError::ReadError(format!("reshaping band {}: {}", name, e)))?;
            if let Some(kind) = array
                .attributes()
                .get("kind")
                .and_then(Value::as_str)
                .and_then(BandKind::from_str)
            {
                band_kinds.insert(name.clone(), kind);
            }
            bands.insert(name.clone(), stack);
        }

        let grid = GridSpec {
            crs_epsg,
            transform: GeoTransform::from_array(&gt),
            width: dims.2,
            height: dims.1,
            resolution,
        };

        Ok(SiteCube {
            site_id,
            collection,
            grid,
            nodata,
            timestamps,
            band_names,
            bands,
            band_kinds,
            scene_ids,
            baselines,
            cloud_cover,
            skipped: Vec::new(),
            harmonized,
        })
    }

    fn read_coord<T: zarrs::array::ElementOwned>(
        store: &Arc<FilesystemStore>,
        path: &str,
    ) -> SitsResult<Vec<T>> {
        let array = Array::open(store.clone(), path)
            .map_err(|e| SitsError::ReadError(format!("opening {}: {}", path, e)))?;
        let shape = array.shape().to_vec();
        if shape == [0] {
            return Ok(Vec::new());
        }
        let subset = ArraySubset::new_with_start_shape(vec![0], shape)
            .map_err(|e| SitsError::ReadError(e.to_string()))?;
        array
            .retrieve_array_subset_elements(&subset)
            .map_err(|e| SitsError::ReadError(e.to_string()))
    }

    fn attr<T: serde::de::DeserializeOwned>(
        attrs: &Map<String, Value>,
        key: &str,
    ) -> SitsResult<T> {
        let value = attrs
            .get(key)
            .ok_or_else(|| SitsError::ReadError(format!("missing store attribute {}", key)))?;
        serde_json::from_value(value.clone())
            .map_err(|e| SitsError::ReadError(format!("attribute {}: {}", key, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bands::BandKind;
    use crate::core::grid::GridSpec;
    use crate::types::Extent;
    use chrono::TimeZone;
    use ndarray::Array3;

    fn patch_cube() -> SiteCube {
        let extent = Extent::new(4010450.0, 2794550.0, 4010550.0, 2794650.0);
        let grid = GridSpec::with_shape(&extent, 3035, 10.0, (4, 4)).unwrap();
        let mut b04 = Array3::from_elem((2, 4, 4), 1200.0);
        b04[[0, 0, 0]] = 0.0;
        b04[[1, 2, 3]] = 850.0;

        let mut bands = HashMap::new();
        bands.insert("B04".to_string(), b04);
        let mut band_kinds = HashMap::new();
        band_kinds.insert("B04".to_string(), BandKind::Reflectance);

        SiteCube {
            site_id: "st-07".to_string(),
            collection: "sentinel-2-l2a".to_string(),
            grid,
            nodata: 0.0,
            timestamps: vec![
                Utc.with_ymd_and_hms(2023, 5, 2, 10, 30, 0).unwrap(),
                Utc.with_ymd_and_hms(2023, 5, 12, 10, 30, 0).unwrap(),
            ],
            band_names: vec!["B04".to_string()],
            bands,
            band_kinds,
            scene_ids: vec!["S2A_1".to_string(), "S2B_2".to_string()],
            baselines: vec![3.01, 5.0],
            cloud_cover: vec![Some(1.5), None],
            skipped: Vec::new(),
            harmonized: false,
        }
    }

    #[test]
    fn test_patch_without_reduction_is_rejected() {
        let cube = patch_cube();
        let dir = tempfile::tempdir().unwrap();
        let result = TableExporter::new().export(&cube, &dir.path().join("out.csv"));
        assert!(matches!(result, Err(SitsError::UnsupportedShape(_))));
        // nothing was written
        assert!(!dir.path().join("out.csv").exists());
    }

    #[test]
    fn test_mean_reduction_skips_nodata() {
        let cube = patch_cube();
        let exporter = TableExporter::new().with_reduction(Reduction::Mean);
        let stack = cube.band("B04").unwrap();
        // t=0 has one nodata pixel out of 16
        let mean = exporter.reduce(stack, 0, cube.nodata).unwrap();
        assert!((mean - 1200.0).abs() < 1e-3);
        let mean1 = exporter.reduce(stack, 1, cube.nodata).unwrap();
        let expected = (15.0 * 1200.0 + 850.0) / 16.0;
        assert!((mean1 - expected).abs() < 1e-3);
    }

    #[test]
    fn test_csv_rows_per_site_and_timestamp() {
        let cube = patch_cube();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("table.csv");
        TableExporter::new()
            .with_reduction(Reduction::Mean)
            .export(&cube, &dest)
            .unwrap();

        let content = std::fs::read_to_string(&dest).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3); // header + 2 timestamps
        assert!(lines[0].starts_with("site,scene,datetime,cloud_cover,baseline,B04"));
        assert!(lines[1].starts_with("st-07,S2A_1,"));
        // missing cloud cover serializes as an empty field
        assert!(lines[2].contains(",,"));
    }
}
