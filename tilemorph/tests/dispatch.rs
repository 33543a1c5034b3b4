mod common;

use std::collections::BTreeSet;

use common::{candidates, galaxy_rows, read_results, synthetic_tile, FakeEngine};
use shared::image_proc::{CutoutConfig, RasterSet, ReferencePsf};
use shared::test_util::gaussian_kernel;
use tilemorph::dispatch::{Dispatcher, FailureStage, SourceOutcome};
use tilemorph::morphology::{IsophoteSchedule, MorphologyAdapter, QUANTITY_NAMES};
use tilemorph::results::ResultsWriter;
use tilemorph::TileId;

fn adapter(engine: FakeEngine) -> MorphologyAdapter {
    MorphologyAdapter::new(
        Box::new(engine),
        IsophoteSchedule::new(22.0, 26.0, 0.5, 0.1857, 30.0),
        (0.1, 6.0),
    )
}

fn reference_psf() -> ReferencePsf {
    ReferencePsf::new(gaussian_kernel(15, 2.0), 1.0).unwrap()
}

#[test]
fn test_failed_source_only_loses_its_row() {
    let rows = galaxy_rows();
    let field = synthetic_tile(&rows);
    let rasters = RasterSet::new(
        field.image.view(),
        field.weight.view(),
        field.segmentation.view(),
    )
    .unwrap();
    let tile = TileId::parse("123.456").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let results_path = dir.path().join("morphology.csv");
    let mut results = ResultsWriter::open(&results_path).unwrap();

    let dispatcher = Dispatcher::new(Some(2), CutoutConfig::default()).unwrap();
    let summary = dispatcher.run(
        &tile,
        &candidates(&rows),
        &rasters,
        &reference_psf(),
        &adapter(FakeEngine::default()),
        &mut results,
    );

    assert_eq!(summary.outcomes.len(), 5);
    assert_eq!(summary.measured(), 4);
    assert_eq!(summary.written, 4);
    assert_eq!(summary.write_failures, 0);
    let failed: Vec<_> = summary.failures().collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        failed[0],
        SourceOutcome::Failed {
            idx: 3,
            stage: FailureStage::Cutout,
            ..
        }
    ));

    drop(results);
    let (header, records) = read_results(&results_path);
    assert_eq!(&header[..5], &["tile", "idx", "ra", "dec", "fwhm"]);
    assert_eq!(header[5], QUANTITY_NAMES[0]);
    assert!(header.iter().any(|h| h == "aiso_22.0"));
    assert!(header.iter().any(|h| h == "aiso_26.0"));
    assert_eq!(&header[header.len() - 2..], &["flag", "flag_sersic"]);

    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.len() == header.len()));
    assert!(records.iter().all(|r| r[0] == "123.456"));
    let indices: BTreeSet<&str> = records.iter().map(|r| r[1].as_str()).collect();
    assert_eq!(indices, BTreeSet::from(["0", "1", "2", "4"]));
}

#[test]
fn test_panicking_source_is_isolated() {
    let mut rows = galaxy_rows();
    rows[3].x = 110.0;
    rows[3].y = 100.0;
    // Wider seeing yields a PSF larger than the reference kernel
    rows[1].prediq = 1.5;

    let field = synthetic_tile(&rows);
    let rasters = RasterSet::new(
        field.image.view(),
        field.weight.view(),
        field.segmentation.view(),
    )
    .unwrap();
    let tile = TileId::parse("123.456").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let results_path = dir.path().join("morphology.csv");
    let mut results = ResultsWriter::open(&results_path).unwrap();

    let engine = FakeEngine {
        panic_above_psf: Some(15),
        ..Default::default()
    };
    let calls = engine.calls.clone();
    let dispatcher = Dispatcher::new(Some(3), CutoutConfig::default()).unwrap();
    let summary = dispatcher.run(
        &tile,
        &candidates(&rows),
        &rasters,
        &reference_psf(),
        &adapter(engine),
        &mut results,
    );

    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 5);
    assert_eq!(summary.measured(), 4);
    assert_eq!(summary.written, 4);
    match &summary.outcomes[1] {
        SourceOutcome::Failed { stage, reason, .. } => {
            assert_eq!(*stage, FailureStage::Panic);
            assert!(reason.contains("PSF of"), "{reason}");
        }
        other => panic!("expected a failed outcome, got {other:?}"),
    }

    drop(results);
    let (_, records) = read_results(&results_path);
    let indices: BTreeSet<&str> = records.iter().map(|r| r[1].as_str()).collect();
    assert_eq!(indices, BTreeSet::from(["0", "2", "3", "4"]));
}

#[test]
fn test_engine_error_only_loses_its_row() {
    let mut rows = galaxy_rows();
    rows[3].x = 110.0;
    rows[3].y = 100.0;
    rows[2].prediq = 1.5;

    let field = synthetic_tile(&rows);
    let rasters = RasterSet::new(
        field.image.view(),
        field.weight.view(),
        field.segmentation.view(),
    )
    .unwrap();
    let tile = TileId::parse("123.456").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let results_path = dir.path().join("morphology.csv");
    let mut results = ResultsWriter::open(&results_path).unwrap();

    let engine = FakeEngine {
        fail_above_psf: Some(15),
        ..Default::default()
    };
    let dispatcher = Dispatcher::new(Some(2), CutoutConfig::default()).unwrap();
    let summary = dispatcher.run(
        &tile,
        &candidates(&rows),
        &rasters,
        &reference_psf(),
        &adapter(engine),
        &mut results,
    );

    assert_eq!(summary.measured(), 4);
    assert_eq!(summary.written, 4);
    let failed: Vec<_> = summary.failures().collect();
    assert_eq!(failed.len(), 1);
    match failed[0] {
        SourceOutcome::Failed { idx, stage, reason } => {
            assert_eq!(*idx, 2);
            assert_eq!(*stage, FailureStage::Measurement);
            assert!(reason.contains("fit diverged"), "{reason}");
        }
        other => panic!("expected a failed outcome, got {other:?}"),
    }

    drop(results);
    let (_, records) = read_results(&results_path);
    let indices: BTreeSet<&str> = records.iter().map(|r| r[1].as_str()).collect();
    assert_eq!(indices, BTreeSet::from(["0", "1", "3", "4"]));
}

#[test]
fn test_no_candidates_writes_nothing() {
    let rows = galaxy_rows();
    let field = synthetic_tile(&rows);
    let rasters = RasterSet::new(
        field.image.view(),
        field.weight.view(),
        field.segmentation.view(),
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let results_path = dir.path().join("morphology.csv");
    let mut results = ResultsWriter::open(&results_path).unwrap();

    let dispatcher = Dispatcher::new(Some(2), CutoutConfig::default()).unwrap();
    let summary = dispatcher.run(
        &TileId::parse("123.456").unwrap(),
        &[],
        &rasters,
        &reference_psf(),
        &adapter(FakeEngine::default()),
        &mut results,
    );

    assert!(summary.outcomes.is_empty());
    assert_eq!(summary.written, 0);
    assert_eq!(results.rows_written(), 0);
}
