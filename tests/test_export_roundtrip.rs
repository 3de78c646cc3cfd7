//! Export round-trips: a cube written to a Zarr store reads back
//! bit-exact, tables reject shapes they cannot represent, and neither
//! format ever leaves partial output behind.

use chrono::{TimeZone, Utc};
use ndarray::Array3;
use sits::core::{
    BandKind, CollectionConfig, GridSpec, Reduction, SiteCube, TableExporter, ZarrExporter,
};
use sits::types::{Extent, SitsError};
use std::collections::HashMap;

fn patch_cube(site_id: &str) -> SiteCube {
    let extent = Extent::new(4010450.0, 2794550.0, 4010550.0, 2794650.0);
    let grid = GridSpec::with_shape(&extent, 3035, 10.0, (6, 4)).unwrap();
    let config = CollectionConfig::sentinel2_l2a();

    let band_names = vec!["B04".to_string(), "B08".to_string(), "SCL".to_string()];
    let mut bands = HashMap::new();
    let mut band_kinds = HashMap::new();
    for (i, name) in band_names.iter().enumerate() {
        let mut stack = Array3::zeros((3, 4, 6));
        for (idx, v) in stack.iter_mut().enumerate() {
            // deterministic, band-dependent values with a fractional part
            *v = (idx as f32) * 0.25 + i as f32 * 1000.0;
        }
        bands.insert(name.clone(), stack);
        let kind = if name == "SCL" { BandKind::Classification } else { BandKind::Reflectance };
        band_kinds.insert(name.clone(), kind);
    }

    SiteCube {
        site_id: site_id.to_string(),
        collection: config.collection.clone(),
        grid,
        nodata: 0.0,
        timestamps: vec![
            Utc.with_ymd_and_hms(2023, 4, 2, 10, 30, 11).unwrap(),
            Utc.with_ymd_and_hms(2023, 4, 12, 10, 30, 9).unwrap(),
            Utc.with_ymd_and_hms(2023, 4, 27, 10, 30, 21).unwrap(),
        ],
        band_names,
        bands,
        band_kinds,
        scene_ids: vec!["S2A_1".to_string(), "S2B_2".to_string(), "S2A_3".to_string()],
        baselines: vec![3.01, 5.0, 5.09],
        cloud_cover: vec![Some(2.5), None, Some(64.0)],
        skipped: Vec::new(),
        harmonized: true,
    }
}

#[test]
fn test_zarr_roundtrip_is_bit_exact() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("st-03.zarr");

    let cube = patch_cube("st-03");
    ZarrExporter::export(&cube, &dest).expect("export");

    // no staging leftovers
    assert!(dest.is_dir());
    assert!(!dir.path().join("st-03.zarr.partial").exists());

    let restored = ZarrExporter::import(&dest).expect("import");

    assert_eq!(restored.site_id, cube.site_id);
    assert_eq!(restored.collection, cube.collection);
    assert_eq!(restored.timestamps, cube.timestamps);
    assert_eq!(restored.scene_ids, cube.scene_ids);
    assert_eq!(restored.baselines, cube.baselines);
    assert_eq!(restored.cloud_cover, cube.cloud_cover);
    assert_eq!(restored.band_names, cube.band_names);
    assert_eq!(restored.harmonized, cube.harmonized);
    assert_eq!(restored.nodata, cube.nodata);
    assert_eq!(restored.grid.crs_epsg, cube.grid.crs_epsg);
    assert_eq!(restored.grid.transform.to_array(), cube.grid.transform.to_array());
    assert_eq!(restored.shape(), cube.shape());

    for name in &cube.band_names {
        // bit-exact for f32 grids
        assert_eq!(restored.band(name).unwrap(), cube.band(name).unwrap(), "band {}", name);
        assert_eq!(restored.band_kinds.get(name), cube.band_kinds.get(name));
    }
    assert_eq!(restored.grid.x_coords(), cube.grid.x_coords());
    assert_eq!(restored.grid.y_coords(), cube.grid.y_coords());
    assert!(restored.is_aligned());
}

#[test]
fn test_zarr_export_replaces_existing_store() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("st-04.zarr");

    let mut cube = patch_cube("st-04");
    ZarrExporter::export(&cube, &dest).expect("first export");

    // second export with fewer timestamps atomically replaces the first
    cube.timestamps.truncate(2);
    cube.scene_ids.truncate(2);
    cube.baselines.truncate(2);
    cube.cloud_cover.truncate(2);
    for stack in cube.bands.values_mut() {
        *stack = stack.slice(ndarray::s![0..2, .., ..]).to_owned();
    }
    assert!(cube.is_aligned());
    ZarrExporter::export(&cube, &dest).expect("second export");

    let restored = ZarrExporter::import(&dest).expect("import");
    assert_eq!(restored.timestamps.len(), 2);
}

#[test]
fn test_zarr_batch_writes_one_store_per_site() {
    let dir = tempfile::tempdir().unwrap();
    let cubes = vec![patch_cube("st-10"), patch_cube("st-11")];

    let paths = ZarrExporter::export_batch(&cubes, dir.path()).expect("batch export");
    assert_eq!(paths.len(), 2);
    assert!(dir.path().join("st-10.zarr").is_dir());
    assert!(dir.path().join("st-11.zarr").is_dir());
}

#[test]
fn test_empty_cube_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.zarr");

    let mut cube = patch_cube("empty");
    cube.timestamps.clear();
    cube.scene_ids.clear();
    cube.baselines.clear();
    cube.cloud_cover.clear();
    for stack in cube.bands.values_mut() {
        *stack = Array3::zeros((0, 4, 6));
    }

    ZarrExporter::export(&cube, &dest).expect("export empty");
    let restored = ZarrExporter::import(&dest).expect("import empty");
    assert_eq!(restored.timestamps.len(), 0);
    assert_eq!(restored.band("B04").unwrap().dim(), (0, 4, 6));
}

#[test]
fn test_patch_table_requires_reduction() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("table.csv");

    let cube = patch_cube("st-05");
    let result = TableExporter::new().export(&cube, &dest);
    assert!(matches!(result, Err(SitsError::UnsupportedShape(_))));
    assert!(!dest.exists());

    TableExporter::new()
        .with_reduction(Reduction::Mean)
        .export(&cube, &dest)
        .expect("reduced export");
    let content = std::fs::read_to_string(&dest).unwrap();
    assert_eq!(content.lines().count(), 4); // header + 3 timestamps
}

#[test]
fn test_batch_table_one_row_per_site_and_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("batch.csv");

    let cubes = vec![patch_cube("st-06"), patch_cube("st-07")];
    TableExporter::new()
        .with_reduction(Reduction::Mean)
        .export_many(&cubes, &dest)
        .expect("batch export");

    let content = std::fs::read_to_string(&dest).unwrap();
    assert_eq!(content.lines().count(), 7); // header + 2 sites x 3 timestamps
    assert!(content.contains("st-06"));
    assert!(content.contains("st-07"));
}
