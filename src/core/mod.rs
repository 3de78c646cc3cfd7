//! Core extraction pipeline modules

pub mod bands;
pub mod cube;
pub mod export;
pub mod extract;
pub mod grid;
pub mod harmonize;

// Re-export main types
pub use bands::{BandConfig, BandKind, CollectionConfig, ResolvedBand, StacConfig};
pub use cube::{CubeBuilder, SceneSkip, SiteCube};
pub use export::{Reduction, TableExporter, ZarrExporter};
pub use extract::{
    BatchReport, CancelToken, ExportFormat, ExtractRequest, Extractor, SiteReport, SiteSuccess,
};
pub use grid::GridSpec;
pub use harmonize::{BaselineCorrector, BASELINE_OFFSET, BASELINE_THRESHOLD};
