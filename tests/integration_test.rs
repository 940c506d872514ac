use std::fs;
use std::path::Path;

use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;

use img2mesh_rs::mocks::{
    FailingBackgroundRemover, FailingMeshGenerator, MockBackgroundRemover, MockMeshGenerator,
};
use img2mesh_rs::{
    parse_resolution, run_background_removal, run_generation, PipelineConfig, Resolution,
    StageReport,
};

fn test_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        input_dir: root.join("inputs"),
        processed_dir: root.join("processed"),
        output_dir: root.join("output"),
        ..PipelineConfig::default()
    }
}

fn write_test_image(path: &Path) {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([200, 100, 50])));
    image.save(path).unwrap();
}

#[test]
fn scan_ignores_unsupported_files() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.input_dir).unwrap();
    write_test_image(&config.input_dir.join("a.png"));
    write_test_image(&config.input_dir.join("b.jpg"));
    fs::write(config.input_dir.join("c.txt"), b"not an image").unwrap();

    let report = run_background_removal(&config, &MockBackgroundRemover::default()).unwrap();
    assert_eq!(report.total, 2);
    assert_eq!(report.processed, 2);
    assert!(config.processed_dir.join("a.png").exists());
    assert!(config.processed_dir.join("b.png").exists());
    assert!(!config.processed_dir.join("c.png").exists());
}

#[test]
fn existing_output_is_never_reprocessed() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.input_dir).unwrap();
    fs::create_dir_all(&config.processed_dir).unwrap();
    write_test_image(&config.input_dir.join("a.png"));
    fs::write(config.processed_dir.join("a.png"), b"existing output").unwrap();

    let report = run_background_removal(&config, &MockBackgroundRemover::default()).unwrap();
    assert_eq!(
        report,
        StageReport {
            total: 1,
            processed: 0,
            skipped: 1,
            failed: 0
        }
    );
    // The pre-existing file is untouched.
    assert_eq!(
        fs::read(config.processed_dir.join("a.png")).unwrap(),
        b"existing output"
    );
}

#[test]
fn second_run_processes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.input_dir).unwrap();
    write_test_image(&config.input_dir.join("a.png"));
    write_test_image(&config.input_dir.join("b.jpg"));

    let model = MockBackgroundRemover::default();
    let first = run_background_removal(&config, &model).unwrap();
    assert_eq!(first.processed, 2);

    let second = run_background_removal(&config, &model).unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 2);
}

#[test]
fn failed_image_leaves_no_output_and_loop_continues() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.input_dir).unwrap();
    write_test_image(&config.input_dir.join("a.png"));
    write_test_image(&config.input_dir.join("b.png"));

    let report = run_background_removal(&config, &FailingBackgroundRemover).unwrap();
    assert_eq!(report.failed, 2);
    assert_eq!(report.processed, 0);
    // No outputs, not even partial ones.
    assert_eq!(fs::read_dir(&config.processed_dir).unwrap().count(), 0);
}

#[test]
fn resolution_selector_round_trip() {
    let mut config = PipelineConfig::default();
    assert_eq!(config.resolution, Resolution::Cascade1024);

    let (resolution, _) = parse_resolution("512").unwrap();
    config.resolution = resolution;
    assert_eq!(config.resolution, Resolution::R512);

    let (resolution, _) = parse_resolution("1024").unwrap();
    config.resolution = resolution;
    assert_eq!(config.resolution, Resolution::R1024);

    // Rejected overrides leave the configuration unchanged.
    assert!(parse_resolution("2048").is_err());
    assert!(parse_resolution("abc").is_err());
    assert_eq!(config.resolution, Resolution::R1024);
}

#[test]
fn end_to_end_with_mock_models() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.input_dir).unwrap();
    write_test_image(&config.input_dir.join("cat.png"));

    let background = run_background_removal(&config, &MockBackgroundRemover::default()).unwrap();
    assert_eq!(background.processed, 1);

    let processed = config.processed_dir.join("cat.png");
    let cutout = image::open(&processed).unwrap();
    assert_eq!(cutout.color(), image::ColorType::Rgba8);

    let generation = run_generation(&config, &MockMeshGenerator).unwrap();
    assert_eq!(generation.processed, 1);

    let glb = fs::read(config.output_dir.join("cat.glb")).unwrap();
    assert!(!glb.is_empty());
    assert_eq!(&glb[0..4], b"glTF");
}

#[test]
fn segmentation_failure_starves_the_generation_stage() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.input_dir).unwrap();
    write_test_image(&config.input_dir.join("cat.png"));

    let background = run_background_removal(&config, &FailingBackgroundRemover).unwrap();
    assert_eq!(background.failed, 1);
    assert!(!config.processed_dir.join("cat.png").exists());

    // The generation stage finds nothing to do.
    let generation = run_generation(&config, &MockMeshGenerator).unwrap();
    assert_eq!(generation, StageReport::default());
    assert_eq!(fs::read_dir(&config.output_dir).unwrap().count(), 0);
}

#[test]
fn generation_failure_leaves_no_partial_scene_file() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.processed_dir).unwrap();
    write_test_image(&config.processed_dir.join("cat.png"));

    let report = run_generation(&config, &FailingMeshGenerator).unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(fs::read_dir(&config.output_dir).unwrap().count(), 0);
}

#[test]
fn generation_skips_existing_scene_files() {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    fs::create_dir_all(&config.processed_dir).unwrap();
    fs::create_dir_all(&config.output_dir).unwrap();
    write_test_image(&config.processed_dir.join("cat.png"));
    fs::write(config.output_dir.join("cat.glb"), b"existing scene").unwrap();

    let report = run_generation(&config, &MockMeshGenerator).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 0);
    assert_eq!(
        fs::read(config.output_dir.join("cat.glb")).unwrap(),
        b"existing scene"
    );
}
