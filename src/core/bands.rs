use crate::io::raster::Resampling;
use crate::types::{AssetRef, SceneItem, SitsError, SitsResult};
use std::collections::HashMap;

/// Radiometric nature of a band, driving resampling and correction rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandKind {
    /// Continuous surface-reflectance digital numbers
    Reflectance,
    /// Categorical masks (scene classification, quality flags)
    Classification,
}

impl BandKind {
    /// Classification bands must never be interpolated
    pub fn resampling(&self) -> Resampling {
        match self {
            BandKind::Reflectance => Resampling::Bilinear,
            BandKind::Classification => Resampling::Nearest,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BandKind::Reflectance => "reflectance",
            BandKind::Classification => "classification",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reflectance" => Some(BandKind::Reflectance),
            "classification" => Some(BandKind::Classification),
            _ => None,
        }
    }
}

/// Static mapping from one semantic band name to a catalog asset
#[derive(Debug, Clone)]
pub struct BandConfig {
    /// Asset key in the item's asset dictionary
    pub asset_key: String,
    /// Native resolution in meters
    pub resolution: f64,
    pub kind: BandKind,
}

/// Band registry for one catalog collection: semantic name to asset key,
/// default resolution and nodata value. Loaded once, read-only during
/// extraction.
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub collection: String,
    pub default_resolution: f64,
    pub nodata: f32,
    bands: HashMap<String, BandConfig>,
}

/// One requested band resolved against a scene item
#[derive(Debug)]
pub struct ResolvedBand<'a> {
    pub name: &'a str,
    pub config: &'a BandConfig,
    pub asset: &'a AssetRef,
}

impl CollectionConfig {
    pub fn new(collection: &str, default_resolution: f64, nodata: f32) -> Self {
        Self {
            collection: collection.to_string(),
            default_resolution,
            nodata,
            bands: HashMap::new(),
        }
    }

    pub fn with_band(mut self, name: &str, asset_key: &str, resolution: f64, kind: BandKind) -> Self {
        self.bands.insert(
            name.to_string(),
            BandConfig { asset_key: asset_key.to_string(), resolution, kind },
        );
        self
    }

    /// Sentinel-2 Level-2A: ten reflectance bands plus the scene
    /// classification layer, uint16 digital numbers, nodata 0. Asset keys
    /// follow the Planetary Computer naming, which matches the band names.
    pub fn sentinel2_l2a() -> Self {
        let mut config = Self::new("sentinel-2-l2a", 10.0, 0.0);
        for (name, resolution) in [
            ("B02", 10.0),
            ("B03", 10.0),
            ("B04", 10.0),
            ("B05", 20.0),
            ("B06", 20.0),
            ("B07", 20.0),
            ("B08", 10.0),
            ("B8A", 20.0),
            ("B11", 20.0),
            ("B12", 20.0),
        ] {
            config = config.with_band(name, name, resolution, BandKind::Reflectance);
        }
        config.with_band("SCL", "SCL", 20.0, BandKind::Classification)
    }

    /// Default band set of the collection, reflectance bands first,
    /// sorted by name
    pub fn default_bands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registry lookup for a set of requested semantic bands.
    ///
    /// Fails with `BandNotFound` before any raster I/O when a name has no
    /// mapping in this collection. Deterministic for a given config.
    pub fn lookup<'a>(&'a self, requested: &'a [String]) -> SitsResult<Vec<(&'a str, &'a BandConfig)>> {
        requested
            .iter()
            .map(|name| {
                self.bands
                    .get(name)
                    .map(|config| (name.as_str(), config))
                    .ok_or_else(|| {
                        SitsError::BandNotFound(format!(
                            "band {} has no asset mapping in collection {}",
                            name, self.collection
                        ))
                    })
            })
            .collect()
    }

    /// Resolve requested bands against one scene item.
    ///
    /// Returns `Ok(None)` when the item lacks an asset for any requested
    /// band; the caller excludes that timestamp rather than representing
    /// the scene partially.
    pub fn resolve<'a>(
        &'a self,
        item: &'a SceneItem,
        requested: &'a [String],
    ) -> SitsResult<Option<Vec<ResolvedBand<'a>>>> {
        let mapped = self.lookup(requested)?;
        let mut resolved = Vec::with_capacity(mapped.len());
        for (name, config) in mapped {
            match item.assets.get(&config.asset_key) {
                Some(asset) => resolved.push(ResolvedBand { name, config, asset }),
                None => {
                    log::warn!(
                        "item {} has no asset {} for band {}, excluding timestamp",
                        item.id,
                        config.asset_key,
                        name
                    );
                    return Ok(None);
                }
            }
        }
        Ok(Some(resolved))
    }
}

/// Process-wide band registry: one [`CollectionConfig`] per supported
/// catalog collection. Loaded once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct StacConfig {
    collections: HashMap<String, CollectionConfig>,
}

impl StacConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in collection presets
    pub fn builtin() -> Self {
        Self::new().with_collection(CollectionConfig::sentinel2_l2a())
    }

    pub fn with_collection(mut self, config: CollectionConfig) -> Self {
        self.collections.insert(config.collection.clone(), config);
        self
    }

    pub fn collection(&self, id: &str) -> SitsResult<&CollectionConfig> {
        self.collections.get(id).ok_or_else(|| {
            SitsError::BandNotFound(format!("no band configuration for collection {}", id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MISSING_BASELINE;
    use chrono::{TimeZone, Utc};

    fn item_with_assets(keys: &[&str]) -> SceneItem {
        SceneItem {
            id: "S2B_TEST".to_string(),
            datetime: Utc.with_ymd_and_hms(2023, 6, 1, 10, 30, 0).unwrap(),
            bbox: None,
            processing_baseline: MISSING_BASELINE,
            cloud_cover: None,
            assets: keys
                .iter()
                .map(|k| {
                    (
                        k.to_string(),
                        AssetRef { href: format!("https://example.com/{}.tif", k), gsd: None },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_unknown_band_fails_before_io() {
        let config = CollectionConfig::sentinel2_l2a();
        let requested = vec!["B99".to_string()];
        assert!(matches!(
            config.lookup(&requested),
            Err(SitsError::BandNotFound(_))
        ));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let config = CollectionConfig::sentinel2_l2a();
        let item = item_with_assets(&["B04", "SCL"]);
        let requested = vec!["B04".to_string(), "SCL".to_string()];

        for _ in 0..3 {
            let resolved = config.resolve(&item, &requested).unwrap().unwrap();
            assert_eq!(resolved.len(), 2);
            assert_eq!(resolved[0].name, "B04");
            assert_eq!(resolved[0].asset.href, "https://example.com/B04.tif");
            assert_eq!(resolved[1].config.kind, BandKind::Classification);
        }
    }

    #[test]
    fn test_missing_item_asset_excludes_scene() {
        let config = CollectionConfig::sentinel2_l2a();
        let item = item_with_assets(&["B04"]);
        let requested = vec!["B04".to_string(), "B08".to_string()];
        assert!(config.resolve(&item, &requested).unwrap().is_none());
    }

    #[test]
    fn test_classification_resamples_nearest() {
        assert_eq!(BandKind::Classification.resampling(), Resampling::Nearest);
        assert_eq!(BandKind::Reflectance.resampling(), Resampling::Bilinear);
    }

    #[test]
    fn test_registry_lookup_by_collection() {
        let registry = StacConfig::builtin();
        assert!(registry.collection("sentinel-2-l2a").is_ok());
        assert!(matches!(
            registry.collection("landsat-c2-l2"),
            Err(SitsError::BandNotFound(_))
        ));
    }
}
