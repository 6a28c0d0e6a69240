use gica::core_modules::pairs::r_max;
use gica::{
    split_channels, ActivationCache, AnalysisConfig, GammaNorm, GicaError, IntensityPlane,
    MeasurementLog, Region, ScanOutcome, ScanState,
};
use image::{DynamicImage, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

/// Three channels sharing two bright squares on a noisy background.
fn colocalized_rgb(size: u32, seed: u64) -> DynamicImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let image = RgbImage::from_fn(size, size, |x, y| {
        let in_blob = (8..20).contains(&x) && (8..20).contains(&y)
            || (30..40).contains(&x) && (26..38).contains(&y);
        let mut channel = || {
            let noise = rng.gen_range(0..20u8);
            if in_blob { 200 + noise } else { noise }
        };
        Rgb([channel(), channel(), channel()])
    });
    DynamicImage::ImageRgb8(image)
}

/// Channels with independent random structure.
fn independent_planes(size: usize, seed: u64) -> Vec<IntensityPlane> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..3)
        .map(|_| IntensityPlane::from_fn(size, size, |_, _| rng.gen_range(0.0..100.0)))
        .collect()
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        threshold_factor: 1.0,
        topology_bin_size: 8,
        topology_stat_count: 10,
        rows_per_chunk: 4,
        worker_count: Some(2),
        sample_cache_len: 1 << 14,
        seed: Some(1234),
        ..AnalysisConfig::default()
    }
}

#[test]
fn rgb_image_measures_as_three_channels() {
    let planes = split_channels(&colocalized_rgb(48, 1)).unwrap();
    assert_eq!(planes.len(), 3);

    let analysis = GammaNorm::from_planes(&planes, config()).unwrap();
    let result = analysis.measure_region(Region::full(48, 48), "rgb").unwrap();

    assert_eq!(result.per_map_counts.len(), 4);
    assert!(result.g_norm > 0.8 * r_max(3), "g_norm {}", result.g_norm);
    assert!(result.af < 0.2);
    assert!(result.coloc_fraction > 0.0 && result.coloc_fraction < 1.0);

    let mut log = MeasurementLog::new();
    log.push(result);
    let rendered = log.to_string();
    assert!(rendered.starts_with(MeasurementLog::HEADER));
    assert!(rendered.trim_end().ends_with("rgb"));
}

#[test]
fn colocalized_channels_outscore_independent_ones() {
    let coloc = GammaNorm::from_planes(&split_channels(&colocalized_rgb(48, 2)).unwrap(), config())
        .unwrap()
        .measure_region(Region::full(48, 48), "coloc")
        .unwrap();
    let independent = GammaNorm::from_planes(&independent_planes(48, 2), config())
        .unwrap()
        .measure_region(Region::full(48, 48), "independent")
        .unwrap();
    assert!(coloc.g_norm > independent.g_norm);
    assert!(coloc.af < independent.af);
}

#[test]
fn validation_errors_surface_before_any_work() {
    let planes = independent_planes(16, 3);
    let err = GammaNorm::from_planes(&planes[..1], config()).unwrap_err();
    assert!(matches!(err, GicaError::ChannelCount { count: 1, .. }));
    assert!(err.is_validation());

    let analysis = GammaNorm::from_planes(&planes, config()).unwrap();
    let err = analysis.measure_region(Region::new(10, 10, 10, 10), "x").unwrap_err();
    assert!(matches!(err, GicaError::RegionOutOfBounds { .. }));
    let err = analysis.measure_region(Region::new(0, 0, 0, 5), "x").unwrap_err();
    assert_eq!(err, GicaError::EmptyRegion);
    let err = analysis.measure_region(Region::new(0, 0, 4, 4), "x").unwrap_err();
    assert!(matches!(err, GicaError::RegionTooSmall { bin_size: 8, .. }));
    assert!(err.is_validation());
}

#[test]
fn cache_reuses_thresholded_channels() {
    let cache = ActivationCache::new();
    let image = colocalized_rgb(32, 4);
    let first = cache
        .get_or_compute("sample.png", 1.0, || split_channels(&image))
        .unwrap();
    let second = cache
        .get_or_compute("sample.png", 1.0, || panic!("cached set should be reused"))
        .unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    let analysis = GammaNorm::new(second, config()).unwrap();
    assert_eq!(analysis.channels().len(), 3);
}

#[tokio::test]
async fn topology_highlights_the_shared_blobs() {
    let planes = split_channels(&colocalized_rgb(48, 5)).unwrap();
    let analysis = GammaNorm::from_planes(&planes, config()).unwrap();
    let result = analysis.topology().await.unwrap().completed().unwrap();

    assert_eq!(result.normalized.dimensions(), (48, 48));
    // a window straddling the blob edge correlates strongly, plain background does not
    let edge = result.normalized.get_pixel(20, 14).0[0];
    let background = result.normalized.get_pixel(40, 8).0[0];
    assert!(edge > background, "edge {edge} background {background}");

    let reopened = result.analysis().unwrap();
    assert_eq!(reopened.config(), &config());
}

#[tokio::test]
async fn topology_can_be_cancelled_mid_scan() {
    let analysis = GammaNorm::from_planes(
        &independent_planes(160, 6),
        AnalysisConfig {
            topology_bin_size: 12,
            topology_stat_count: 20,
            rows_per_chunk: 1,
            ..config()
        },
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let scanner = analysis.topology_scanner().unwrap().with_progress(tx);
    let total = scanner.row_chunks().len();
    let cancel = scanner.cancel_handle();
    let mut states = scanner.subscribe();

    let canceller = tokio::spawn(async move {
        if rx.recv().await.is_some() {
            cancel.cancel();
        }
        let mut seen = 1;
        while rx.recv().await.is_some() {
            seen += 1;
        }
        seen
    });

    let outcome = scanner.run().await.unwrap();
    assert!(matches!(outcome, ScanOutcome::Cancelled));
    assert_eq!(*states.borrow_and_update(), ScanState::Cancelled);
    drop(scanner);

    let finished = canceller.await.unwrap();
    assert!(finished < total, "{finished} of {total} chunks ran");
}

#[tokio::test]
async fn async_measurement_matches_sync_measurement() {
    let analysis = GammaNorm::from_planes(&independent_planes(24, 7), config()).unwrap();
    let region = Region::new(2, 2, 16, 16);
    let sync = analysis.measure_region(region, "same").unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let asynchronous = analysis.measure_region_async(region, "same", Some(tx)).await.unwrap();
    assert_eq!(sync, asynchronous);

    let mut last = None;
    while let Some(p) = rx.recv().await {
        last = Some(p);
    }
    let last = last.unwrap();
    assert_eq!(last.completed, last.total);
}
