//! The analysis run, start to finish.
//!
//! Each step logs what it is doing and prints its table to stdout; the
//! collected results come back as an [`AnalysisReport`] so callers (and
//! tests) can inspect them without scraping the console.

use std::{fmt::Display, path::PathBuf};

use log::{info, warn};
use ndarray::{Array1, Array2};

use crate::{
    config::AnalysisConfig,
    correlation::{CollinearPair, CorrelationMatrix},
    data::SurvivalData,
    dataset::{Cohort, Covariate},
    error::{Result, SurvivalError},
    kaplan_meier::KaplanMeier,
    logrank::{logrank_test, LogRankResult},
    metrics::ModelMetrics,
    model::{profile_matrix, CoxModel, CoxModelSummary},
    plotting::SurvivalPlots,
    schoenfeld::{proportional_hazard_test, ProportionalHazardTest},
};

/// covariates entering the Cox model, in coefficient order
pub const COX_COVARIATES: [Covariate; 2] = [Covariate::Age, Covariate::Nodes];

/// columns checked for collinearity before the fit
pub const CORRELATION_COLUMNS: [Covariate; 3] = [Covariate::Age, Covariate::Year, Covariate::Nodes];

/// horizons (years) at which profile survival is reported
pub const PREDICTION_HORIZONS: [f64; 3] = [1.0, 3.0, 5.0];

/// predicted survival for one patient profile
#[derive(Debug, Clone)]
pub struct ProfilePrediction {
    pub label: String,
    pub age: f64,
    pub nodes: f64,
    /// exp((x - x̄)β), hazard relative to the average patient
    pub relative_hazard: f64,
    /// (horizon, S(horizon))
    pub survival: Vec<(f64, f64)>,
}

/// everything the run computed
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub n_patients: usize,
    pub n_events: usize,
    pub dropped: usize,
    pub overall: KaplanMeier,
    pub by_nodes: Vec<KaplanMeier>,
    pub by_age: Vec<KaplanMeier>,
    pub logrank_nodes: Option<LogRankResult>,
    pub logrank_age: Option<LogRankResult>,
    pub correlation: CorrelationMatrix,
    pub collinear: Vec<CollinearPair>,
    pub cox: CoxModelSummary,
    pub metrics: ModelMetrics,
    pub ph_test: ProportionalHazardTest,
    pub predictions: Vec<ProfilePrediction>,
    pub plots: Vec<PathBuf>,
}

fn section(title: &str) {
    println!();
    println!("{title}");
    println!("{}", "=".repeat(title.chars().count()));
}

/// load, recode, filter, then run every estimator on the cohort
pub fn run(config: &AnalysisConfig) -> Result<AnalysisReport> {
    config.validate()?;

    // 1-3: load, recode, filter
    let cohort = Cohort::load(&config.input, &config.filter)?;
    analyze(&cohort, config)
}

/// steps 4-11 on an already filtered cohort
pub fn analyze(cohort: &Cohort, config: &AnalysisConfig) -> Result<AnalysisReport> {
    if cohort.is_empty() {
        return Err(SurvivalError::invalid_survival_data(
            "no patients left after filtering",
        ));
    }
    section("cohort");
    println!(
        "{} patients, {} deaths, {} rows dropped",
        cohort.len(),
        cohort.n_events(),
        cohort.dropped()
    );

    // 4: survival object
    let data = cohort.to_survival_data(&COX_COVARIATES)?;
    info!("survival object: n = {}, events = {}", data.n_samples(), data.n_events());

    // 5: overall curve
    section("kaplan-meier, all patients");
    let overall = KaplanMeier::fit(&data, "all patients", config.alpha)?;
    overall.print();

    // 6: stratified curves
    section("kaplan-meier by nodes group");
    let by_nodes = stratify(&data, &cohort.nodes_groups(), config.alpha)?;
    section("kaplan-meier by age group");
    let by_age = stratify(&data, &cohort.age_groups(), config.alpha)?;

    // 7: log-rank
    section("log-rank test, nodes group");
    let logrank_nodes = compare_groups(&data, &cohort.nodes_groups(), config.alpha, "nodes group")?;
    section("log-rank test, age group");
    let logrank_age = compare_groups(&data, &cohort.age_groups(), config.alpha, "age group")?;

    // 8: correlation
    section("correlation");
    let correlation = correlation_check(cohort)?;
    correlation.print();
    let collinear = correlation.collinear_pairs(config.collinearity_threshold);
    for pair in &collinear {
        warn!(
            "{} and {} are collinear (r = {:.3} > {})",
            pair.first, pair.second, pair.r, config.collinearity_threshold
        );
    }
    if collinear.is_empty() {
        println!("no pair above |r| = {}", config.collinearity_threshold);
    }

    // 9: Cox model
    section("cox proportional hazards");
    info!(
        "fitting cox model on {:?} (ties = {:?}, max {} iterations)",
        COX_COVARIATES, config.cox.ties, config.cox.max_iterations
    );
    let mut model = CoxModel::new()
        .with_max_iterations(config.cox.max_iterations)
        .with_tolerance(config.cox.tolerance)
        .with_ties(config.cox.ties)
        .with_alpha(config.alpha)
        .with_feature_names(COX_COVARIATES.iter().map(|c| c.name().to_string()).collect());
    model.fit(&data)?;
    let cox = model.summary()?;
    cox.print();
    let metrics = model.metrics(&data)?;
    println!();
    metrics.print();

    // 10: proportional hazards
    section("proportional hazards check");
    let (ph_test, residuals) = proportional_hazard_test(&model, &data, config.cox.time_transform)?;
    ph_test.print();
    for row in ph_test.violations(config.alpha) {
        warn!(
            "proportional hazards assumption questionable for {} (p = {:.4})",
            row.feature, row.p_value
        );
    }

    // 11: predictions
    section("predicted survival");
    let (profiles, predictions) = predict_profiles(&model, config)?;
    for prediction in &predictions {
        let horizons: Vec<String> = prediction
            .survival
            .iter()
            .map(|(t, s)| format!("S({t:.0}) = {s:.3}"))
            .collect();
        println!(
            "{:<20} relative hazard {:>6.3}   {}",
            prediction.label,
            prediction.relative_hazard,
            horizons.join("  ")
        );
    }

    let mut plots = Vec::new();
    if config.plots.enabled {
        info!("writing plots to {}", config.plots.output_dir.display());
        let plotter = SurvivalPlots::new(&config.plots)?;
        plots.push(plotter.kaplan_meier("km_overall.svg", "kaplan-meier survival, all patients", &overall)?);
        plots.push(plotter.stratified(
            "km_by_nodes.svg",
            "kaplan-meier survival by positive nodes",
            &by_nodes.iter().collect::<Vec<_>>(),
        )?);
        plots.push(plotter.stratified(
            "km_by_age.svg",
            "kaplan-meier survival by age group",
            &by_age.iter().collect::<Vec<_>>(),
        )?);
        plots.push(plotter.forest("cox_forest.svg", &cox)?);
        plots.push(plotter.schoenfeld("schoenfeld_residuals.svg", &residuals)?);
        let (timeline, survival) = model.predict_survival_function(profiles.view())?;
        let labels: Vec<String> = predictions.iter().map(|p| p.label.clone()).collect();
        plots.push(plotter.predictions("cox_predictions.svg", &timeline, &survival, &labels)?);
        info!("wrote {} plots", plots.len());
    }

    Ok(AnalysisReport {
        n_patients: cohort.len(),
        n_events: cohort.n_events(),
        dropped: cohort.dropped(),
        overall,
        by_nodes,
        by_age,
        logrank_nodes,
        logrank_age,
        correlation,
        collinear,
        cox,
        metrics,
        ph_test,
        predictions,
        plots,
    })
}

fn stratify<G>(data: &SurvivalData, groups: &[G], alpha: f64) -> Result<Vec<KaplanMeier>>
where
    G: Ord + Copy + Display,
{
    let curves = KaplanMeier::fit_by_group(data, groups, alpha)?;
    for (group, curve) in &curves {
        let median = curve
            .median_survival()
            .map_or_else(|| "not reached".to_string(), |m| format!("{m:.1}"));
        println!(
            "{:<16} n = {:>4}, deaths = {:>4}, median = {}",
            group.to_string(),
            curve.n_samples(),
            curve.n_events(),
            median
        );
    }
    Ok(curves.into_iter().map(|(_, curve)| curve).collect())
}

/// None when fewer than two groups are populated
fn compare_groups<G>(data: &SurvivalData, groups: &[G], alpha: f64, what: &str) -> Result<Option<LogRankResult>>
where
    G: Ord + Copy + Display,
{
    let mut present: Vec<G> = groups.to_vec();
    present.sort();
    present.dedup();
    if present.len() < 2 {
        warn!("only one {what} present, skipping log-rank test");
        return Ok(None);
    }

    let result = logrank_test(data, groups)?;
    result.print();
    if result.is_significant(alpha) {
        info!("survival differs by {what} (p = {:.4})", result.p_value);
    } else {
        info!("no significant survival difference by {what} (p = {:.4})", result.p_value);
    }
    Ok(Some(result))
}

fn correlation_check(cohort: &Cohort) -> Result<CorrelationMatrix> {
    let n = cohort.len();
    let mut columns = Array2::zeros((n, CORRELATION_COLUMNS.len()));
    for (j, &covariate) in CORRELATION_COLUMNS.iter().enumerate() {
        columns.column_mut(j).assign(&Array1::from(cohort.column(covariate)));
    }
    let names = CORRELATION_COLUMNS.iter().map(|c| c.name().to_string()).collect();
    CorrelationMatrix::pearson(columns.view(), names)
}

fn predict_profiles(model: &CoxModel, config: &AnalysisConfig) -> Result<(Array2<f64>, Vec<ProfilePrediction>)> {
    let rows: Vec<Vec<f64>> = config
        .profiles
        .iter()
        .map(|p| {
            COX_COVARIATES
                .iter()
                .map(|c| match c {
                    Covariate::Age => p.age,
                    Covariate::Nodes => p.nodes,
                    Covariate::Year => 0.0,
                })
                .collect()
        })
        .collect();
    let profiles = profile_matrix(&rows)?;

    let relative = model.predict_partial_hazard(profiles.view())?;
    let horizons = Array1::from(PREDICTION_HORIZONS.to_vec());
    let survival = model.predict_survival(profiles.view(), horizons.view())?;

    let predictions = config
        .profiles
        .iter()
        .enumerate()
        .map(|(i, p)| ProfilePrediction {
            label: p.label.clone(),
            age: p.age,
            nodes: p.nodes,
            relative_hazard: relative[i],
            survival: PREDICTION_HORIZONS
                .iter()
                .zip(survival.row(i))
                .map(|(&t, &s)| (t, s))
                .collect(),
        })
        .collect();

    Ok((profiles, predictions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ProfileConfig, dataset::PatientRecord};

    fn cohort() -> Cohort {
        let rows = [
            (30.0, 5.0, 0.0, 1.0),
            (34.0, 2.0, 8.0, 2.0),
            (38.0, 6.0, 1.0, 1.0),
            (42.0, 1.0, 12.0, 2.0),
            (45.0, 3.0, 2.0, 2.0),
            (47.0, 7.0, 0.0, 1.0),
            (52.0, 4.0, 6.0, 2.0),
            (55.0, 8.0, 3.0, 1.0),
            (58.0, 2.0, 9.0, 2.0),
            (63.0, 5.0, 4.0, 1.0),
            (66.0, 1.0, 20.0, 2.0),
            (70.0, 6.0, 1.0, 1.0),
            (74.0, 3.0, 7.0, 2.0),
            (78.0, 9.0, 0.0, 1.0),
            (83.0, 4.0, 2.0, 1.0),
            // earliest death sits inside the covariate cloud, keeps the MLE finite
            (55.0, 0.5, 5.0, 2.0),
        ];
        let records: Vec<PatientRecord> = rows
            .iter()
            .map(|&(a, y, n, s)| PatientRecord::new(a, y, n, s))
            .collect();
        Cohort::from_records(&records, &AnalysisConfig::default().filter)
    }

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::default();
        config.plots.enabled = false;
        config
    }

    #[test]
    fn test_analyze_without_plots() {
        let report = analyze(&cohort(), &config()).unwrap();
        assert_eq!(report.n_patients, 16);
        assert_eq!(report.n_events, 8);
        assert_eq!(report.by_nodes.len(), 2);
        assert_eq!(report.by_age.len(), 3);
        assert!(report.logrank_nodes.is_some());
        assert_eq!(report.cox.feature_names, vec!["Age", "Nodes"]);
        assert!(report.metrics.c_index >= 0.5 && report.metrics.c_index <= 1.0);
        assert_eq!(report.predictions.len(), 2);
        assert!(report.plots.is_empty());
    }

    #[test]
    fn test_more_nodes_predicts_worse_survival() {
        let report = analyze(&cohort(), &config()).unwrap();
        let good = &report.predictions[0];
        let bad = &report.predictions[1];
        assert!(bad.relative_hazard > good.relative_hazard);
        for ((_, s_good), (_, s_bad)) in good.survival.iter().zip(&bad.survival) {
            assert!(s_bad <= s_good);
        }
    }

    #[test]
    fn test_single_group_skips_logrank() {
        let records: Vec<PatientRecord> = (0..6)
            .map(|i| PatientRecord::new(30.0 + i as f64, 1.0 + i as f64, 1.0, if i % 2 == 0 { 2.0 } else { 1.0 }))
            .collect();
        let cohort = Cohort::from_records(&records, &AnalysisConfig::default().filter);
        let data = cohort.to_survival_data(&COX_COVARIATES).unwrap();
        let result = compare_groups(&data, &cohort.nodes_groups(), 0.05, "nodes group").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_profiles_follow_config() {
        let mut config = config();
        config.profiles = vec![ProfileConfig { label: "only".into(), age: 50.0, nodes: 0.0 }];
        let report = analyze(&cohort(), &config).unwrap();
        assert_eq!(report.predictions.len(), 1);
        assert_eq!(report.predictions[0].survival.len(), PREDICTION_HORIZONS.len());
    }

    #[test]
    fn test_empty_cohort_rejected() {
        let cohort = Cohort::from_records(&[], &AnalysisConfig::default().filter);
        assert!(analyze(&cohort, &config()).is_err());
    }
}
