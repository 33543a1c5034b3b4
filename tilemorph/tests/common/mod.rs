//! Fixtures shared by the integration tests: a synthetic tile, its catalogs,
//! a filesystem mirror laid out like the survey store, and test doubles for
//! the decompressor and the morphology engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use shared::io::fits::write_typed_fits;
use shared::io::FitsDataType;
use shared::test_util::{synthetic_galaxy_field, SyntheticField, SyntheticSource};
use tilemorph::catalog::Candidate;
use tilemorph::morphology::{
    MeasurementRequest, MorphologyEngine, MorphologyError, MorphologyOutput, QUANTITY_NAMES,
};
use tilemorph::staging::{
    DecompressError, Decompressor, MirrorObjectStore, ObjectStore, ProductKind, StoreError,
};
use tilemorph::TileId;

pub const SHAPE: (usize, usize) = (160, 160);

/// One row of the fixture catalogs.
#[derive(Debug, Clone, Copy)]
pub struct Row {
    pub x: f64,
    pub y: f64,
    pub mag: f64,
    pub prediq: f64,
    pub s21: f64,
    pub s31: f64,
}

impl Row {
    pub fn galaxy(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            mag: 20.0,
            prediq: 0.8,
            s21: 10.0,
            s31: 10.0,
        }
    }

    pub fn candidate(&self, idx: usize) -> Candidate {
        Candidate {
            idx,
            x_image: self.x,
            y_image: self.y,
            a_world: 1.0,
            b_world: 0.8,
            flux_radius: 4.5,
            mag_cog: self.mag,
            flags: 0.0,
            prediq: self.prediq,
            ra: 180.0 + idx as f64 * 1e-3,
            dec: 30.0,
            m1: 21.0,
            m2: 20.0,
            m3: 19.5,
            s21: self.s21,
            s31: self.s31,
        }
    }
}

/// Five galaxies; the fourth (index 3) lies outside the raster.
pub fn galaxy_rows() -> Vec<Row> {
    vec![
        Row::galaxy(30.0, 30.0),
        Row::galaxy(80.0, 40.0),
        Row::galaxy(130.0, 30.0),
        Row::galaxy(500.0, 500.0),
        Row::galaxy(60.0, 120.0),
    ]
}

/// Galaxies followed by a star and a source too faint to select.
pub fn tile_rows() -> Vec<Row> {
    let mut rows = galaxy_rows();
    rows.push(Row {
        s21: 1.0,
        s31: 1.0,
        ..Row::galaxy(120.0, 120.0)
    });
    rows.push(Row {
        mag: 28.0,
        ..Row::galaxy(100.0, 90.0)
    });
    rows
}

pub fn candidates(rows: &[Row]) -> Vec<Candidate> {
    rows.iter().enumerate().map(|(i, r)| r.candidate(i)).collect()
}

pub fn synthetic_tile(rows: &[Row]) -> SyntheticField {
    let sources: Vec<SyntheticSource> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.x < SHAPE.1 as f64 && r.y < SHAPE.0 as f64)
        .map(|(i, r)| SyntheticSource {
            x: r.x,
            y: r.y,
            amplitude: 200.0,
            sigma: 3.0,
            label: i as i32 + 1,
        })
        .collect();
    synthetic_galaxy_field(SHAPE, 50.0, 2.0, &sources, 11).unwrap()
}

pub fn write_sextractor(path: &Path, rows: &[Row]) {
    let mut text = String::new();
    for (i, name) in [
        "X_IMAGE",
        "Y_IMAGE",
        "A_WORLD",
        "B_WORLD",
        "FLUX_RADIUS",
        "MAG_COG",
        "FLAGS",
        "PREDIQ",
        "ALPHA_J2000",
        "DELTA_J2000",
    ]
    .iter()
    .enumerate()
    {
        text.push_str(&format!("# {:>3} {name:<16} fixture column\n", i + 1));
    }
    for c in candidates(rows) {
        text.push_str(&format!(
            "{} {} {} {} {} {} {} {} {} {}\n",
            c.x_image,
            c.y_image,
            c.a_world,
            c.b_world,
            c.flux_radius,
            c.mag_cog,
            c.flags,
            c.prediq,
            c.ra,
            c.dec
        ));
    }
    fs::write(path, text).unwrap();
}

pub fn write_star_galaxy(path: &Path, rows: &[Row]) {
    let mut text = String::from("M1 M2 M3 s21 s31\n");
    for c in candidates(rows) {
        text.push_str(&format!("{} {} {} {} {}\n", c.m1, c.m2, c.m3, c.s21, c.s31));
    }
    fs::write(path, text).unwrap();
}

/// Lay out every mandatory product of `tile` under `root` at its remote path.
pub fn populate_mirror(root: &Path, tile: &TileId, rows: &[Row]) {
    let field = synthetic_tile(rows);
    let remote = |kind: ProductKind| {
        let path = root.join(&kind.remote_paths("cfis", tile)[0]);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        path
    };

    write_typed_fits(
        remote(ProductKind::Image),
        Some(&FitsDataType::Float32(field.image.clone())),
        &[],
    )
    .unwrap();
    write_typed_fits(
        remote(ProductKind::Weight),
        None,
        &[("WEIGHT", FitsDataType::Float32(field.weight.clone()))],
    )
    .unwrap();
    write_typed_fits(
        remote(ProductKind::Segmentation),
        None,
        &[("SEGMAP", FitsDataType::Int32(field.segmentation.clone()))],
    )
    .unwrap();
    write_sextractor(&remote(ProductKind::Catalog), rows);
    write_star_galaxy(&remote(ProductKind::StarGalaxy), rows);
}

/// Decompressor double: the mirror holds uncompressed FITS under `.fz` names.
pub struct CopyDecompressor;

impl Decompressor for CopyDecompressor {
    fn decompress(&self, compressed: &Path, output: &Path) -> Result<(), DecompressError> {
        fs::copy(compressed, output).map_err(|source| DecompressError::Spawn {
            program: "copy".to_string(),
            source,
        })?;
        Ok(())
    }
}

/// Mirror store counting every copy request.
pub struct CountingStore {
    inner: MirrorObjectStore,
    calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn new(root: &Path) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Self {
            inner: MirrorObjectStore::new(root),
            calls: calls.clone(),
        };
        (store, calls)
    }
}

impl ObjectStore for CountingStore {
    fn copy(&self, remote: &str, local: &Path) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(remote, local)
    }
}

/// Engine double reporting fixed quantities.
///
/// Panics (or returns an engine error) when the PSF it receives is larger
/// than `panic_above_psf` (or `fail_above_psf`) pixels on a side, which lets
/// tests single out one source through its seeing.
#[derive(Default)]
pub struct FakeEngine {
    pub panic_above_psf: Option<usize>,
    pub fail_above_psf: Option<usize>,
    pub calls: Arc<AtomicUsize>,
}

impl MorphologyEngine for FakeEngine {
    fn measure(
        &self,
        request: &MeasurementRequest<'_>,
    ) -> Result<MorphologyOutput, MorphologyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.panic_above_psf {
            if request.psf.nrows() > limit {
                panic!("PSF of {} pixels", request.psf.nrows());
            }
        }
        if let Some(limit) = self.fail_above_psf {
            if request.psf.nrows() > limit {
                return Err(MorphologyError::Engine(format!(
                    "fit diverged with a {}-pixel PSF",
                    request.psf.nrows()
                )));
            }
        }

        let mut quantities: HashMap<String, f64> = QUANTITY_NAMES
            .iter()
            .map(|name| (name.to_string(), 0.5))
            .collect();
        let (rows, cols) = request.image.dim();
        quantities.insert("nx_stamp".to_string(), cols as f64);
        quantities.insert("ny_stamp".to_string(), rows as f64);

        Ok(MorphologyOutput {
            quantities,
            isophote_asymmetry: vec![0.1; request.isophote_fluxes.len()],
            flag: 0,
            flag_sersic: 0,
        })
    }
}

/// Parsed results file: header and rows.
pub fn read_results(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let header = reader.headers().unwrap().iter().map(str::to_string).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect();
    (header, rows)
}
