use std::io::Write;

use approx::assert_relative_eq;
use haberman_survival::{
    config::{AnalysisConfig, FilterConfig, InputConfig},
    dataset::{Cohort, PatientRecord},
    distributions::chi2_sf,
    logrank_test, pipeline, proportional_hazard_test, AgeGroup, CoxModel, KaplanMeier,
    NodesGroup, SurvivalData, SurvivalError, TieMethod, TimeTransform,
};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn create_synthetic_data(n_samples: usize, seed: u64) -> SurvivalData {
    let mut rng = StdRng::seed_from_u64(seed);

    let mut covariates_vec = Vec::with_capacity(n_samples * 2);
    for _ in 0..(n_samples * 2) {
        covariates_vec.push(rng.gen_range(-2.0f64..2.0));
    }
    let covariates = Array2::from_shape_vec((n_samples, 2), covariates_vec).unwrap();

    let true_coefficients = Array1::from(vec![0.5, -0.3]);
    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);

    for i in 0..n_samples {
        let hazard = covariates.row(i).dot(&true_coefficients).exp();
        let time = (-rng.r#gen::<f64>().ln() / (0.1 * hazard)).max(0.01);
        let censoring_time = rng.gen_range(1.0..20.0);

        if time < censoring_time {
            times.push(time);
            events.push(true);
        } else {
            times.push(censoring_time);
            events.push(false);
        }
    }

    SurvivalData::new(times, events, covariates).unwrap()
}

/// haberman-shaped rows: integer age and nodes, follow-up in whole years,
/// more nodes means earlier death
fn synthetic_records(n_samples: usize, seed: u64) -> Vec<PatientRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_samples)
        .map(|_| {
            let age = rng.gen_range(30..=83) as f64;
            let nodes = (if rng.gen_bool(0.6) { rng.gen_range(0..=5) } else { rng.gen_range(6..=25) }) as f64;
            let hazard = 0.08 * (0.01 * (age - 50.0) + 0.07 * nodes).exp();
            let death = -rng.r#gen::<f64>().ln() / hazard;
            let follow_up = rng.gen_range(1.0..12.0);
            let (year, status) = if death < follow_up { (death, 2.0) } else { (follow_up, 1.0) };
            PatientRecord::new(age, year.ceil(), nodes, status)
        })
        .collect()
}

fn write_csv(records: &[PatientRecord]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "age;year;nodes;status").unwrap();
    for r in records {
        writeln!(
            file,
            "{};{};{};{}",
            r.age.unwrap(),
            r.year.unwrap(),
            r.nodes.unwrap(),
            r.survival_status.unwrap()
        )
        .unwrap();
    }
    file.flush().unwrap();
    file
}

#[test]
fn test_cox_model_recovers_coefficients() {
    let data = create_synthetic_data(600, 42);

    let mut model = CoxModel::new()
        .with_max_iterations(1000)
        .with_feature_names(vec!["a".into(), "b".into()]);
    assert!(model.fit(&data).is_ok());
    assert!(model.is_fitted());

    let coefficients = model.coefficients().unwrap();
    assert_eq!(coefficients.len(), 2);
    assert!((coefficients[0] - 0.5).abs() < 0.2, "got {}", coefficients[0]);
    assert!((coefficients[1] + 0.3).abs() < 0.2, "got {}", coefficients[1]);

    let summary = model.summary().unwrap();
    assert!(summary.p_values[0] < 0.05);
    for i in 0..2 {
        assert!(summary.hazard_ratio_lower[i] < summary.hazard_ratios[i]);
        assert!(summary.hazard_ratios[i] < summary.hazard_ratio_upper[i]);
    }

    let predictions = model.predict(data.covariates()).unwrap();
    assert_eq!(predictions.len(), 600);
    assert!(predictions.iter().all(|x| x.is_finite()));
}

#[test]
fn test_breslow_and_efron_agree_without_ties() {
    let data = create_synthetic_data(150, 7);

    let mut efron = CoxModel::new().with_ties(TieMethod::Efron).with_tolerance(1e-10);
    let mut breslow = CoxModel::new().with_ties(TieMethod::Breslow).with_tolerance(1e-10);
    efron.fit(&data).unwrap();
    breslow.fit(&data).unwrap();

    let a = efron.coefficients().unwrap();
    let b = breslow.coefficients().unwrap();
    for i in 0..2 {
        assert_relative_eq!(a[i], b[i], epsilon = 1e-6);
    }
}

#[test]
fn test_two_covariate_patterns_converge() {
    // 2 nodes vs 10 nodes, the second dying earlier on average. a single
    // column: with two patterns, age and nodes together would be collinear
    let mut times = Vec::new();
    let mut events = Vec::new();
    let mut nodes = Vec::new();
    for i in 0..20 {
        times.push(2.0 + i as f64 * 0.5);
        events.push(i % 3 != 0);
        nodes.push(2.0);

        times.push(1.0 + i as f64 * 0.4);
        events.push(i % 4 != 0);
        nodes.push(10.0);
    }
    let covariates = Array2::from_shape_vec((40, 1), nodes).unwrap();
    let data = SurvivalData::new(times, events, covariates).unwrap();

    let mut model = CoxModel::new().with_max_iterations(1000);
    model.fit(&data).unwrap();
    assert!(model.iterations().unwrap() < 1000);
    assert!(model.coefficients().unwrap()[0] > 0.0);

    let c_index = model.concordance(&data).unwrap();
    assert!((0.5..=1.0).contains(&c_index), "c-index {c_index}");

    let profiles = Array2::from_shape_vec((2, 1), vec![2.0, 10.0]).unwrap();
    let hazards = model.predict_partial_hazard(profiles.view()).unwrap();
    assert!(hazards[1] > hazards[0]);
}

#[test]
fn test_iteration_cap_is_reported() {
    let data = create_synthetic_data(100, 3);
    let mut model = CoxModel::new().with_max_iterations(1).with_tolerance(1e-300);
    match model.fit(&data) {
        Err(SurvivalError::OptimizationFailed { .. }) => {}
        other => panic!("expected OptimizationFailed, got {:?}", other.map(|_| ())),
    }
    assert!(!model.is_fitted());
}

#[test]
fn test_kaplan_meier_is_non_increasing_with_bracketing_ci() {
    let data = create_synthetic_data(200, 11);
    let curve = KaplanMeier::fit(&data, "all", 0.05).unwrap();

    let survival = curve.survival();
    assert!(survival.windows(2).all(|w| w[1] <= w[0]));
    assert!(survival.iter().all(|&s| (0.0..=1.0).contains(&s)));

    for i in 0..survival.len() {
        let s = survival[i];
        if s > 0.0 && s < 1.0 {
            assert!(curve.confidence_lower()[i] <= s + 1e-12);
            assert!(curve.confidence_upper()[i] >= s - 1e-12);
        }
    }
    assert_eq!(curve.at_risk()[0], 200);
}

#[test]
fn test_logrank_p_value_matches_chi_square() {
    let data = create_synthetic_data(200, 5);
    // split on the first covariate, which carries a real effect
    let groups: Vec<u8> = data.covariates().column(0).iter().map(|&x| u8::from(x > 0.0)).collect();

    let result = logrank_test(&data, &groups).unwrap();
    assert_eq!(result.degrees_of_freedom, 1);
    assert_relative_eq!(result.p_value, chi2_sf(result.statistic, 1).unwrap(), epsilon = 1e-12);
    assert!(result.is_significant(0.05));

    let observed: f64 = result.observed.iter().sum();
    let expected: f64 = result.expected.iter().sum();
    assert_relative_eq!(observed, expected, epsilon = 1e-9);
}

#[test]
fn test_schoenfeld_test_on_proportional_data() {
    let data = create_synthetic_data(300, 21);
    let mut model = CoxModel::new();
    model.fit(&data).unwrap();

    for transform in [TimeTransform::Rank, TimeTransform::Km, TimeTransform::Identity, TimeTransform::Log] {
        let (test, residuals) = proportional_hazard_test(&model, &data, transform).unwrap();
        assert_eq!(test.rows.len(), 2);
        assert_eq!(residuals.n_deaths(), data.n_events());
        for row in &test.rows {
            assert!((0.0..=1.0).contains(&row.p_value));
        }
    }
}

#[test]
fn test_example_row_recoding() {
    let record = PatientRecord::new(45.0, 3.0, 2.0, 2.0);
    let cohort = Cohort::from_records(&[record], &FilterConfig::default());
    let patient = cohort.patients()[0];

    assert_eq!(patient.event, 1);
    assert_eq!(patient.age_group, AgeGroup::Middle);
    assert_eq!(patient.age_group.to_string(), "41-60");
    assert_eq!(patient.nodes_group, NodesGroup::Low);
    assert_eq!(patient.nodes_group.to_string(), "Faible (≤5)");
}

#[test]
fn test_filter_bounds() {
    let records = vec![
        PatientRecord::new(20.0, 3.0, 1.0, 1.0), // age on the open edge
        PatientRecord::new(21.0, 3.0, 0.0, 1.0),
        PatientRecord::new(90.0, 3.0, 30.0, 2.0),
        PatientRecord::new(91.0, 3.0, 1.0, 1.0),
        PatientRecord::new(50.0, 3.0, 31.0, 2.0),
        PatientRecord::new(50.0, 3.0, 4.0, 3.0), // unknown status
    ];
    let cohort = Cohort::from_records(&records, &FilterConfig::default());
    assert_eq!(cohort.len(), 2);
    assert_eq!(cohort.dropped(), 4);
    for patient in cohort.patients() {
        assert!(patient.age > 20.0 && patient.age <= 90.0);
        assert!(patient.nodes >= 0.0 && patient.nodes <= 30.0);
    }
}

#[test]
fn test_load_from_file() {
    let records = synthetic_records(50, 9);
    let file = write_csv(&records);
    let input = InputConfig { path: file.path().to_path_buf(), ..InputConfig::default() };

    let cohort = Cohort::load(&input, &FilterConfig::default()).unwrap();
    assert_eq!(cohort.len() + cohort.dropped(), 50);
    for patient in cohort.patients() {
        assert_eq!(patient.event == 1, patient.status.code() == 2);
    }
}

#[test]
fn test_wrong_column_count_fails_loudly() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "age;year;nodes;status").unwrap();
    writeln!(file, "45;3;2;2").unwrap();
    writeln!(file, "50;4;1").unwrap();
    file.flush().unwrap();
    let input = InputConfig { path: file.path().to_path_buf(), ..InputConfig::default() };

    match Cohort::load(&input, &FilterConfig::default()) {
        Err(SurvivalError::InvalidColumnCount { expected, found, line }) => {
            assert_eq!(expected, 4);
            assert_eq!(found, 3);
            assert_eq!(line, 3);
        }
        other => panic!("expected InvalidColumnCount, got {:?}", other.map(|c| c.len())),
    }
}

#[test]
fn test_full_run_writes_every_chart() {
    let file = write_csv(&synthetic_records(150, 2024));
    let output = tempfile::tempdir().unwrap();

    let mut config = AnalysisConfig::default();
    config.input.path = file.path().to_path_buf();
    config.plots.output_dir = output.path().join("plots");

    let report = pipeline::run(&config).unwrap();
    assert_eq!(report.cox.feature_names, vec!["Age", "Nodes"]);
    assert!(report.cox.coefficients[1] > 0.0, "nodes should raise the hazard");
    assert!((0.5..=1.0).contains(&report.metrics.c_index));
    assert_eq!(report.predictions.len(), 2);

    let logrank = report.logrank_nodes.as_ref().unwrap();
    assert_relative_eq!(logrank.p_value, chi2_sf(logrank.statistic, 1).unwrap(), epsilon = 1e-12);

    let expected = [
        "km_overall.svg",
        "km_by_nodes.svg",
        "km_by_age.svg",
        "cox_forest.svg",
        "schoenfeld_residuals.svg",
        "cox_predictions.svg",
    ];
    assert_eq!(report.plots.len(), expected.len());
    for name in expected {
        let path = config.plots.output_dir.join(name);
        assert!(path.exists(), "missing {}", path.display());
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
    }
}

#[test]
fn test_yaml_config_drives_run() {
    let file = write_csv(&synthetic_records(120, 77));
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            "input:\n  path: {}\ncox:\n  ties: breslow\n  time_transform: km\nplots:\n  enabled: false\n",
            file.path().display()
        ),
    )
    .unwrap();

    let config = AnalysisConfig::from_file(&config_path).unwrap();
    assert_eq!(config.cox.ties, TieMethod::Breslow);
    assert_eq!(config.cox.time_transform, TimeTransform::Km);

    let report = pipeline::run(&config).unwrap();
    assert_eq!(report.cox.ties, TieMethod::Breslow);
    assert_eq!(report.ph_test.transform, TimeTransform::Km);
    assert!(report.plots.is_empty());
}
