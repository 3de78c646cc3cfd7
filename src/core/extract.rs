use crate::core::bands::CollectionConfig;
use crate::core::cube::{CubeBuilder, SiteCube};
use crate::core::export::{Reduction, TableExporter, ZarrExporter};
use crate::core::grid::GridSpec;
use crate::core::harmonize::BaselineCorrector;
use crate::io::stac::CatalogClient;
use crate::types::{SceneItem, SearchCriteria, Site, SitsError, SitsResult};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Output format of a batch run
#[derive(Debug, Clone, Copy)]
pub enum ExportFormat {
    /// One Zarr store per site
    Zarr,
    /// One CSV table per site; patch cubes need a reduction
    Table(Option<Reduction>),
}

/// Everything one batch extraction needs besides the sites themselves
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub criteria: SearchCriteria,
    pub bands: Vec<String>,
    /// Fixed patch shape (width, height); `None` means the grid follows
    /// each site's own footprint
    pub patch_shape: Option<(usize, usize)>,
    /// Target resolution in CRS units per pixel
    pub resolution: f64,
    /// Apply the processing-baseline offset correction after the build
    pub harmonize: bool,
    pub format: ExportFormat,
}

/// Result of one site's extraction
#[derive(Debug)]
pub struct SiteReport {
    pub site_id: String,
    pub outcome: Result<SiteSuccess, String>,
}

#[derive(Debug)]
pub struct SiteSuccess {
    pub path: PathBuf,
    pub timestamps: usize,
    pub skipped: usize,
}

/// Per-site success/failure summary of a batch; one site's failure never
/// aborts the others.
#[derive(Debug)]
pub struct BatchReport {
    pub reports: Vec<SiteReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }
}

/// Cooperative cancellation flag checked between sites. Cubes already
/// exported when cancellation is requested are left intact.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives search, cube construction, harmonization and export for a batch
/// of sites against one catalog.
pub struct Extractor {
    client: CatalogClient,
    config: CollectionConfig,
}

impl Extractor {
    pub fn new(client: CatalogClient, config: CollectionConfig) -> Self {
        Self { client, config }
    }

    /// Run a batch extraction into `out_dir`.
    ///
    /// The catalog is searched once; the item list is shared read-only
    /// across sites and each site is processed independently on the rayon
    /// pool. Site outputs are written atomically, so early termination via
    /// `cancel` never corrupts cubes that were already exported.
    pub fn run(
        &self,
        sites: &[Site],
        request: &ExtractRequest,
        out_dir: &Path,
        cancel: &CancelToken,
    ) -> SitsResult<BatchReport> {
        let items = self.client.search(&request.criteria)?;
        log::info!(
            "extracting {} sites against {} catalog items",
            sites.len(),
            items.len()
        );
        std::fs::create_dir_all(out_dir)
            .map_err(|e| SitsError::WriteError(format!("creating {}: {}", out_dir.display(), e)))?;

        let reports = sites
            .par_iter()
            .map(|site| {
                if cancel.is_cancelled() {
                    return SiteReport {
                        site_id: site.id.clone(),
                        outcome: Err("cancelled before processing".to_string()),
                    };
                }
                let outcome = self
                    .extract_site(site, &items, request, out_dir)
                    .map_err(|e| e.to_string());
                SiteReport { site_id: site.id.clone(), outcome }
            })
            .collect();

        Ok(BatchReport { reports })
    }

    /// Build, harmonize and export one site's cube
    fn extract_site(
        &self,
        site: &Site,
        items: &[SceneItem],
        request: &ExtractRequest,
        out_dir: &Path,
    ) -> SitsResult<SiteSuccess> {
        let mut cube = self.build_cube(site, items, request)?;
        if request.harmonize {
            BaselineCorrector::default().apply(&mut cube)?;
        }

        let path = match request.format {
            ExportFormat::Zarr => {
                let dest = out_dir.join(format!("{}.zarr", site.id));
                ZarrExporter::export(&cube, &dest)?;
                dest
            }
            ExportFormat::Table(reduction) => {
                let dest = out_dir.join(format!("{}.csv", site.id));
                let mut exporter = TableExporter::new();
                if let Some(reduction) = reduction {
                    exporter = exporter.with_reduction(reduction);
                }
                exporter.export(&cube, &dest)?;
                dest
            }
        };

        Ok(SiteSuccess {
            path,
            timestamps: cube.timestamps.len(),
            skipped: cube.skipped.len(),
        })
    }

    /// Search-free single-site entry point, also used by `run`
    pub fn build_cube(
        &self,
        site: &Site,
        items: &[SceneItem],
        request: &ExtractRequest,
    ) -> SitsResult<SiteCube> {
        let extent = site.extent()?;
        let grid = match request.patch_shape {
            Some(shape) => {
                GridSpec::with_shape(&extent, site.crs_epsg, request.resolution, shape)?
            }
            None => GridSpec::from_extent(&extent, site.crs_epsg, request.resolution)?,
        };
        CubeBuilder::new(&self.config).build(site, items, &request.bands, &grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_report_counts() {
        let report = BatchReport {
            reports: vec![
                SiteReport {
                    site_id: "a".to_string(),
                    outcome: Ok(SiteSuccess {
                        path: PathBuf::from("/out/a.zarr"),
                        timestamps: 12,
                        skipped: 1,
                    }),
                },
                SiteReport {
                    site_id: "b".to_string(),
                    outcome: Err("raster read failed: corrupt asset".to_string()),
                },
            ],
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
    }
}
