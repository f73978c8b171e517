use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};

use super::*;
use crate::error::CalibrationError;
use crate::error::PatternError;

const CHANNELS: usize = 12;
const CALIBRATION_ROWS: usize = 10;

fn instrument_text(saved_at: &str, radiance: f64) -> String {
    let mut text = format!(
        "New ASD spectrum file: Program version = 6.4\nSpectrum saved: {saved_at}\nVNIR integration time : 136\n\nWavelength\tvalue\n"
    );
    for offset in 0..CHANNELS {
        text.push_str(&format!("{}\t{}\n", 350 + offset, radiance + offset as f64 * 0.001));
    }
    text
}

struct Fixture {
    _root: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    calibration: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let input = root.path().join("in");
        let output = root.path().join("out");
        let calibration = root.path().join("SRT-99-120.txt");
        fs::create_dir_all(&input).expect("mkdir");

        let mut curve = String::from("Wavelength Reflectance\n");
        for offset in 0..CALIBRATION_ROWS {
            curve.push_str(&format!("{} 0.5\n", 350 + offset));
        }
        fs::write(&calibration, curve).expect("write calibration");

        Self {
            _root: root,
            input,
            output,
            calibration,
        }
    }

    fn batch_dir(&self, campaign: &str, kind: DomainKind) -> PathBuf {
        let [parent, leaf] = kind.folder_signature();
        let dir = self.input.join(campaign).join(parent).join(leaf);
        fs::create_dir_all(&dir).expect("mkdir batch");
        dir
    }

    fn run(&self, kind: DomainKind, config: Value) -> Result<RunResult, RunError> {
        let Value::Object(map) = config else {
            panic!("config must be an object");
        };
        let config = RunConfig::from_map(&map).expect("config");
        let parser = InstrumentParser::new().expect("parser");
        run(kind, &parser, &self.input, &self.output, &config, &self.calibration)
    }
}

fn write_files(dir: &Path, radiances: &[f64]) {
    for (index, radiance) in radiances.iter().enumerate() {
        let name = format!("ROI{:05}.asd.txt", index + 1);
        let saved_at = format!("03/14/2024 at 10:{:02}:00", index);
        fs::write(dir.join(name), instrument_text(&saved_at, *radiance)).expect("write file");
    }
}

fn read_series(path: &Path) -> Vec<f64> {
    fs::read_to_string(path)
        .expect("read series")
        .lines()
        .map(|line| line.parse::<f64>().expect("numeric line"))
        .collect()
}

fn names(paths: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = paths
        .iter()
        .map(|path| path.file_name().expect("name").to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn single_cycle_produces_the_full_manifest() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("Campo 1", DomainKind::Soil);
    write_files(&dir, &[2.0, 2.0, 1.0, 1.0]);

    let result = fixture
        .run(
            DomainKind::Soil,
            json!({
                "spectrum": 1,
                "meas_order": ["panel", "panel", "target", "target"],
                "ref_error_method": "both"
            }),
        )
        .expect("run");

    assert_eq!(result.campaigns, vec!["Campo 1"]);
    assert!(result.skipped_cycles.is_empty());
    assert!(result.warnings.is_empty());
    assert_eq!(
        names(&result.produced),
        vec![
            "MED_001_metadata.json",
            "MED_001_rad-error.txt",
            "MED_001_rad.png",
            "MED_001_rad.txt",
            "MED_001_ref-error.txt",
            "MED_001_ref.png",
            "MED_001_ref.txt",
        ]
    );
    assert!(result.produced.iter().all(|path| path.starts_with(&fixture.output)));

    let artifacts = CycleArtifacts::new(&fixture.output, "Campo 1", "MED_001");
    let reflectance = read_series(&artifacts.reflectance());
    assert_eq!(reflectance.len(), CALIBRATION_ROWS);
    assert!((reflectance[0] - 0.25).abs() < 1e-12);
    assert_eq!(read_series(&artifacts.radiance()).len(), CALIBRATION_ROWS);

    let metadata: Value =
        serde_json::from_slice(&fs::read(artifacts.metadata()).expect("metadata")).expect("json");
    assert_eq!(metadata[START_TIME_FIELD], "03/14/2024 at 10:00:00");
    assert_eq!(metadata[END_TIME_FIELD], "03/14/2024 at 10:03:00");
    assert_eq!(metadata[PANEL_FILES_FIELD], json!(["ROI00001.asd.txt", "ROI00002.asd.txt"]));
    assert_eq!(metadata[TARGET_FILES_FIELD], json!(["ROI00003.asd.txt", "ROI00004.asd.txt"]));
    assert_eq!(metadata["VNIR integration time"], 136);
}

#[test]
fn plots_can_be_switched_off_and_overview_on() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("C", DomainKind::Soil);
    write_files(&dir, &[2.0, 1.0]);

    let plain = fixture
        .run(
            DomainKind::Soil,
            json!({"spectrum": 1, "meas_order": ["panel", "target"], "rad_plot": 0, "ref_plot": 0}),
        )
        .expect("run");
    assert_eq!(plain.produced.len(), 5);

    let overview = fixture
        .run(
            DomainKind::Soil,
            json!({"spectrum": 1, "meas_order": ["panel", "target"], "rad_plot": 0, "ref_plot": 0, "rad_all_plot": 1}),
        )
        .expect("run");
    assert!(names(&overview.produced).contains(&"MED_001_rad_all.png".to_string()));
}

#[test]
fn failing_cycle_is_skipped_and_the_rest_continue() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("C", DomainKind::Soil);
    write_files(&dir, &[2.0, 1.0, 2.0, 1.0, 2.0, 1.0]);
    fs::write(dir.join("ROI00004.asd.txt"), "header only, no separator").expect("corrupt");

    let result = fixture
        .run(
            DomainKind::Soil,
            json!({"spectrum": 1, "meas_order": ["panel", "target"], "target_list": ["a", "b", "c"]}),
        )
        .expect("run");

    assert_eq!(result.skipped_cycles.len(), 1);
    assert_eq!(result.skipped_cycles[0].cycle, 1);
    assert!(result.skipped_cycles[0].reason.contains("ROI00004.asd.txt"));
    let produced = names(&result.produced);
    assert!(produced.contains(&"a_ref.txt".to_string()));
    assert!(produced.contains(&"c_ref.txt".to_string()));
    assert!(!produced.iter().any(|name| name.starts_with("b_")));
}

#[test]
fn short_rows_are_a_per_cycle_shape_failure() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("C", DomainKind::Soil);
    write_files(&dir, &[2.0, 1.0]);
    fs::write(dir.join("ROI00002.asd.txt"), "h: 1\n\n350 1.0\n351 1.0\n").expect("short");

    let result = fixture
        .run(DomainKind::Soil, json!({"spectrum": 1, "meas_order": ["panel", "target"]}))
        .expect("run");
    assert!(result.produced.is_empty());
    assert_eq!(result.skipped_cycles.len(), 1);
}

#[test]
fn trailing_files_are_dropped_with_a_warning() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("C", DomainKind::Soil);
    write_files(&dir, &[2.0, 2.0, 1.0, 1.0, 2.0]);

    let result = fixture
        .run(
            DomainKind::Soil,
            json!({"spectrum": 2, "meas_order": ["panel", "target"], "rad_plot": 0, "ref_plot": 0}),
        )
        .expect("run");
    assert_eq!(result.produced.len(), 5);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("1 trailing file"));
}

#[test]
fn missing_batches_return_an_empty_manifest() {
    let fixture = Fixture::new();
    let result = fixture
        .run(DomainKind::Water, json!({"spectrum": 1, "meas_order": ["panel", "target"]}))
        .expect("run");
    assert!(result.produced.is_empty());
    assert!(result.campaigns.is_empty());
    assert!(result.warnings[0].contains("no measurement batches"));
    assert_eq!(result.calibration_sha256.len(), 64);
}

#[test]
fn pattern_without_target_fails_the_run() {
    let fixture = Fixture::new();
    let err = fixture
        .run(DomainKind::Soil, json!({"spectrum": 1, "meas_order": ["panel", "sky"]}))
        .expect_err("invalid pattern");
    assert!(matches!(err, RunError::Pattern(PatternError::InvalidPattern(_))));
}

#[test]
fn missing_calibration_fails_the_run() {
    let fixture = Fixture::new();
    fs::remove_file(&fixture.calibration).expect("remove");
    let err = fixture
        .run(DomainKind::Soil, json!({"spectrum": 1, "meas_order": ["panel", "target"]}))
        .expect_err("no calibration");
    assert!(matches!(err, RunError::Calibration(CalibrationError::NotFound { .. })));
}

#[test]
fn calibration_override_wins_when_present() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("C", DomainKind::Soil);
    write_files(&dir, &[2.0, 1.0]);
    let override_path = fixture.input.join("custom.txt");
    fs::write(&override_path, "header\n350 1.0\n351 1.0\n").expect("override");

    let result = fixture
        .run(
            DomainKind::Soil,
            json!({
                "spectrum": 1,
                "meas_order": ["panel", "target"],
                "spectralon_file": override_path,
                "rad_plot": 0,
                "ref_plot": 0
            }),
        )
        .expect("run");
    assert_eq!(result.calibration_path, override_path);
    let artifacts = CycleArtifacts::new(&fixture.output, "C", "MED_001");
    let reflectance = read_series(&artifacts.reflectance());
    assert_eq!(reflectance.len(), 2);
    assert!((reflectance[0] - 0.5).abs() < 1e-12);
}

#[test]
fn water_subtracts_sky_glint_from_target() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("Lago", DomainKind::Water);
    write_files(&dir, &[4.0, 2.0, 100.0]);

    let result = fixture
        .run(
            DomainKind::Water,
            json!({
                "spectrum": 1,
                "meas_order": ["panel", "target", "sky"],
                "sky_glint_factor": 0.01,
                "rad_plot": 0,
                "ref_plot": 0
            }),
        )
        .expect("run");
    assert_eq!(result.campaigns, vec!["Lago"]);

    let artifacts = CycleArtifacts::new(&fixture.output, "Lago", "MED_001");
    let reflectance = read_series(&artifacts.reflectance());
    // 0.5 * (2.0 - 0.01 * 100.0) / 4.0
    assert!((reflectance[0] - 0.125).abs() < 1e-12);

    let radiance = read_series(&artifacts.radiance());
    assert_eq!(radiance.len(), CALIBRATION_ROWS);
    assert_eq!(radiance[0], 2.0, "target radiance is reported as measured");
    assert_eq!(read_series(&artifacts.radiance_error())[0], 0.0);

    let metadata: Value =
        serde_json::from_slice(&fs::read(artifacts.metadata()).expect("metadata")).expect("json");
    assert_eq!(metadata[SKY_FILES_FIELD], json!(["ROI00003.asd.txt"]));
    assert_eq!(metadata[END_TIME_FIELD], "unknown");
}

#[test]
fn soil_ignores_sky_steps() {
    let fixture = Fixture::new();
    let dir = fixture.batch_dir("C", DomainKind::Soil);
    write_files(&dir, &[4.0, 2.0, 100.0]);

    fixture
        .run(
            DomainKind::Soil,
            json!({"spectrum": 1, "meas_order": ["panel", "target", "sky"], "rad_plot": 0, "ref_plot": 0}),
        )
        .expect("run");
    let artifacts = CycleArtifacts::new(&fixture.output, "C", "MED_001");
    let reflectance = read_series(&artifacts.reflectance());
    assert!((reflectance[0] - 0.25).abs() < 1e-12);
}
