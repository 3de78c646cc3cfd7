use crate::core::bands::{BandKind, CollectionConfig};
use crate::core::grid::GridSpec;
use crate::io::raster::AssetReader;
use crate::types::{SceneItem, Site, SitsError, SitsResult};
use chrono::{DateTime, Utc};
use ndarray::{s, Array2, Array3};
use std::collections::HashMap;

/// A scene excluded from a cube, with the reason. Skips are reported,
/// never silently swallowed.
#[derive(Debug, Clone)]
pub struct SceneSkip {
    pub scene_id: String,
    pub reason: String,
}

/// Per-site output: band grids stacked along time on one common target
/// grid, plus per-scene tabular attributes.
///
/// Invariant: every band array has the identical (time, height, width)
/// shape and timestamps are strictly ascending; a scene missing any
/// requested band contributes no timestamp at all.
#[derive(Debug, Clone)]
pub struct SiteCube {
    pub site_id: String,
    pub collection: String,
    pub grid: GridSpec,
    pub nodata: f32,
    pub timestamps: Vec<DateTime<Utc>>,
    pub band_names: Vec<String>,
    pub bands: HashMap<String, Array3<f32>>,
    pub band_kinds: HashMap<String, BandKind>,
    pub scene_ids: Vec<String>,
    pub baselines: Vec<f32>,
    pub cloud_cover: Vec<Option<f64>>,
    /// Scenes dropped during the build, with reasons
    pub skipped: Vec<SceneSkip>,
    /// Set once the baseline offset correction has been applied
    pub harmonized: bool,
}

impl SiteCube {
    /// (time, height, width)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.timestamps.len(), self.grid.height, self.grid.width)
    }

    pub fn band(&self, name: &str) -> Option<&Array3<f32>> {
        self.bands.get(name)
    }

    /// True when the spatial footprint is a single pixel
    pub fn is_single_pixel(&self) -> bool {
        self.grid.width == 1 && self.grid.height == 1
    }

    /// Check the cross-band alignment invariant
    pub fn is_aligned(&self) -> bool {
        let expected = (self.timestamps.len(), self.grid.height, self.grid.width);
        self.band_names.len() == self.bands.len()
            && self.bands.values().all(|a| a.dim() == expected)
            && self.scene_ids.len() == self.timestamps.len()
            && self.baselines.len() == self.timestamps.len()
            && self.cloud_cover.len() == self.timestamps.len()
            && self.timestamps.windows(2).all(|w| w[0] < w[1])
    }
}

/// Builds one [`SiteCube`] from a site, a set of catalog items and a band
/// registry.
pub struct CubeBuilder<'a> {
    config: &'a CollectionConfig,
}

impl<'a> CubeBuilder<'a> {
    pub fn new(config: &'a CollectionConfig) -> Self {
        Self { config }
    }

    /// Read, clip and stack the requested bands of every usable scene.
    ///
    /// `items` must be sorted by ascending acquisition time, as returned
    /// by the catalog client. Scenes sharing a timestamp are deduplicated
    /// (first id wins); scenes with unreadable or missing assets are
    /// skipped with a recorded reason and the batch continues.
    pub fn build(
        &self,
        site: &Site,
        items: &[SceneItem],
        requested: &[String],
        grid: &GridSpec,
    ) -> SitsResult<SiteCube> {
        // Registry lookup fails fast, before any raster is touched
        self.config.lookup(requested)?;

        let mut timestamps: Vec<DateTime<Utc>> = Vec::new();
        let mut scene_ids = Vec::new();
        let mut baselines = Vec::new();
        let mut cloud_cover = Vec::new();
        let mut skipped = Vec::new();
        let mut planes: Vec<HashMap<String, Array2<f32>>> = Vec::new();

        for item in items {
            if timestamps.last() == Some(&item.datetime) {
                log::debug!(
                    "site {}: duplicate timestamp {} from {}, first item wins",
                    site.id,
                    item.datetime,
                    item.id
                );
                continue;
            }

            match self.read_scene(site, item, requested, grid) {
                Ok(Some(scene_planes)) => {
                    timestamps.push(item.datetime);
                    scene_ids.push(item.id.clone());
                    baselines.push(item.processing_baseline);
                    cloud_cover.push(item.cloud_cover);
                    planes.push(scene_planes);
                }
                Ok(None) => skipped.push(SceneSkip {
                    scene_id: item.id.clone(),
                    reason: "missing asset for a requested band".to_string(),
                }),
                Err(SitsError::ReadError(reason)) => {
                    log::warn!("site {}: skipping scene {}: {}", site.id, item.id, reason);
                    skipped.push(SceneSkip { scene_id: item.id.clone(), reason });
                }
                Err(other) => return Err(other),
            }
        }

        // Stack per-scene planes into (time, y, x) blocks per band
        let shape = (timestamps.len(), grid.height, grid.width);
        let mut bands = HashMap::new();
        let mut band_kinds = HashMap::new();
        for (name, config) in self.config.lookup(requested)? {
            let mut stack = Array3::from_elem(shape, self.config.nodata);
            for (t, scene_planes) in planes.iter().enumerate() {
                // Every kept scene produced every requested band
                if let Some(plane) = scene_planes.get(name) {
                    stack.slice_mut(s![t, .., ..]).assign(plane);
                }
            }
            bands.insert(name.to_string(), stack);
            band_kinds.insert(name.to_string(), config.kind);
        }

        if !skipped.is_empty() {
            log::info!(
                "site {}: {} of {} scenes skipped",
                site.id,
                skipped.len(),
                items.len()
            );
        }

        Ok(SiteCube {
            site_id: site.id.clone(),
            collection: self.config.collection.clone(),
            grid: *grid,
            nodata: self.config.nodata,
            timestamps,
            band_names: requested.to_vec(),
            bands,
            band_kinds,
            scene_ids,
            baselines,
            cloud_cover,
            skipped,
            harmonized: false,
        })
    }

    /// Read every requested band of one scene onto the target grid.
    ///
    /// `Ok(None)` excludes the timestamp (missing asset); a `ReadError`
    /// bubbles up for the caller to record as a skip.
    fn read_scene(
        &self,
        site: &Site,
        item: &SceneItem,
        requested: &[String],
        grid: &GridSpec,
    ) -> SitsResult<Option<HashMap<String, Array2<f32>>>> {
        let resolved = match self.config.resolve(item, requested)? {
            Some(resolved) => resolved,
            None => return Ok(None),
        };

        let mut scene_planes = HashMap::with_capacity(resolved.len());
        for band in resolved {
            let plane = AssetReader::read_window(
                &band.asset.href,
                grid,
                self.config.nodata,
                band.config.kind.resampling(),
            )?;
            scene_planes.insert(band.name.to_string(), plane);
        }
        log::debug!(
            "site {}: read {} bands of scene {}",
            site.id,
            scene_planes.len(),
            item.id
        );
        Ok(Some(scene_planes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grid::GridSpec;
    use crate::types::Extent;
    use chrono::TimeZone;

    fn grid_1x1() -> GridSpec {
        let extent = Extent::new(4010500.0, 2794600.0, 4010500.0, 2794600.0);
        GridSpec::single_pixel(&extent, 3035, 10.0).unwrap()
    }

    /// Build a cube by hand, the way CubeBuilder assembles one
    fn cube_with_bands(names: &[&str], nt: usize) -> SiteCube {
        let grid = grid_1x1();
        let base = Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap();
        let timestamps: Vec<_> = (0..nt)
            .map(|i| base + chrono::Duration::days(i as i64 * 5))
            .collect();
        let bands = names
            .iter()
            .map(|n| (n.to_string(), Array3::from_elem((nt, 1, 1), 100.0)))
            .collect();
        let band_kinds = names
            .iter()
            .map(|n| {
                let kind = if *n == "SCL" { BandKind::Classification } else { BandKind::Reflectance };
                (n.to_string(), kind)
            })
            .collect();
        SiteCube {
            site_id: "st-01".to_string(),
            collection: "sentinel-2-l2a".to_string(),
            grid,
            nodata: 0.0,
            timestamps: timestamps.clone(),
            band_names: names.iter().map(|n| n.to_string()).collect(),
            bands,
            band_kinds,
            scene_ids: (0..nt).map(|i| format!("S2_{}", i)).collect(),
            baselines: vec![0.0; nt],
            cloud_cover: vec![None; nt],
            skipped: Vec::new(),
            harmonized: false,
        }
    }

    #[test]
    fn test_alignment_invariant() {
        let cube = cube_with_bands(&["B04", "B08", "SCL"], 4);
        assert!(cube.is_aligned());
        assert_eq!(cube.shape(), (4, 1, 1));
    }

    #[test]
    fn test_misaligned_band_detected() {
        let mut cube = cube_with_bands(&["B04", "B08"], 4);
        cube.bands
            .insert("B08".to_string(), Array3::from_elem((3, 1, 1), 100.0));
        assert!(!cube.is_aligned());
    }

    #[test]
    fn test_band_not_found_before_any_read() {
        let config = CollectionConfig::sentinel2_l2a();
        let builder = CubeBuilder::new(&config);
        let site = Site::new(
            "st-01",
            geo_types::Geometry::Point(geo_types::Point::new(4010500.0, 2794600.0)),
            3035,
        );
        // Asset href is unreachable; the registry miss must win before
        // any read is attempted
        let item = SceneItem {
            id: "S2B_TEST".to_string(),
            datetime: Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap(),
            bbox: None,
            processing_baseline: 0.0,
            cloud_cover: None,
            assets: HashMap::new(),
        };
        let result = builder.build(
            &site,
            &[item],
            &["NOT_A_BAND".to_string()],
            &grid_1x1(),
        );
        assert!(matches!(result, Err(SitsError::BandNotFound(_))));
    }

    #[test]
    fn test_missing_asset_skips_whole_scene() {
        let config = CollectionConfig::sentinel2_l2a();
        let builder = CubeBuilder::new(&config);
        let site = Site::new(
            "st-01",
            geo_types::Geometry::Point(geo_types::Point::new(4010500.0, 2794600.0)),
            3035,
        );
        let item = SceneItem {
            id: "S2B_NO_ASSETS".to_string(),
            datetime: Utc.with_ymd_and_hms(2023, 6, 1, 10, 0, 0).unwrap(),
            bbox: None,
            processing_baseline: 0.0,
            cloud_cover: None,
            assets: HashMap::new(),
        };
        let cube = builder
            .build(&site, &[item], &["B04".to_string()], &grid_1x1())
            .unwrap();
        assert_eq!(cube.timestamps.len(), 0);
        assert_eq!(cube.skipped.len(), 1);
        assert_eq!(cube.skipped[0].scene_id, "S2B_NO_ASSETS");
        assert!(cube.is_aligned());
    }
}
