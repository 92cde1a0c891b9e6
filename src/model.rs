use log::info;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use crate::{
    data::SurvivalData,
    distributions::{critical_z, normal_two_sided_p},
    error::{SurvivalError, Result},
    metrics::{harrell_c_index, ModelMetrics},
    optimization::{centered_covariates, invert_matrix, CoxOptimizer, OptimizationConfig, TieMethod},
};

/// cox proportional hazards model
#[derive(Debug, Clone)]
pub struct CoxModel {
    max_iterations: usize,              // optimization limit
    tolerance: f64,                     // convergence threshold
    ties: TieMethod,                    // efron unless told otherwise
    alpha: f64,                         // CI level is 1 - alpha
    feature_names: Option<Vec<String>>, // optional feature labels
    fitted: Option<FittedCox>,
}

/// everything kept after a successful fit
#[derive(Debug, Clone)]
struct FittedCox {
    coefficients: Array1<f64>,
    variance: Array2<f64>,             // inverse information
    means: Array1<f64>,                // covariate means the baseline is centred on
    baseline_times: Vec<f64>,          // distinct event times
    baseline_cumulative_hazard: Vec<f64>,
    log_likelihood: f64,
    null_log_likelihood: f64,
    iterations: usize,
    n_samples: usize,
    n_events: usize,
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-7,
            ties: TieMethod::Efron,
            alpha: 0.05,
            feature_names: None,
            fitted: None,
        }
    }
}

impl CoxModel {
    /// new cox model w/ defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// max iterations before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.max_iterations = max_iter;
        self
    }

    /// how close is close enough for convergence
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tolerance = tol;
        self
    }

    pub fn with_ties(mut self, ties: TieMethod) -> Self {
        self.ties = ties;
        self
    }

    /// confidence intervals in the summary are at level 1 - alpha
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// give names to your features for nicer output
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = Some(names);
        self
    }

    /// fit the model to data - this does the actual work
    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(SurvivalError::invalid_parameter("alpha", self.alpha.to_string()));
        }
        if let Some(names) = &self.feature_names {
            if names.len() != data.n_features() {
                return Err(SurvivalError::invalid_dimensions(format!(
                    "{} feature names for {} features", names.len(), data.n_features()
                )));
            }
        }

        let config = OptimizationConfig {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            ties: self.ties,
            ..OptimizationConfig::default()
        };

        let optimizer = CoxOptimizer::new(config);
        let result = optimizer.optimize(data)?;
        info!(
            "cox fit converged after {} iterations, loglik = {:.4}",
            result.iterations, result.log_likelihood
        );

        let variance = invert_matrix(&result.information).map_err(|_| {
            SurvivalError::numerical_error(
                "information matrix is singular: a covariate is constant or collinear with the others",
            )
        })?;
        let (baseline_times, baseline_cumulative_hazard) =
            breslow_baseline(data, &result.coefficients);

        self.fitted = Some(FittedCox {
            coefficients: result.coefficients,
            variance,
            means: data.covariate_means(),
            baseline_times,
            baseline_cumulative_hazard,
            log_likelihood: result.log_likelihood,
            null_log_likelihood: result.null_log_likelihood,
            iterations: result.iterations,
            n_samples: data.n_samples(),
            n_events: data.n_events(),
        });

        Ok(self)
    }

    fn fitted(&self) -> Result<&FittedCox> {
        self.fitted.as_ref().ok_or(SurvivalError::ModelNotFitted)
    }

    /// get the fitted coefficients (betas)
    pub fn coefficients(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.fitted()?.coefficients.view())
    }

    /// covariance of the coefficients (inverse observed information)
    pub fn variance_matrix(&self) -> Result<&Array2<f64>> {
        Ok(&self.fitted()?.variance)
    }

    pub fn standard_errors(&self) -> Result<Array1<f64>> {
        Ok(self.fitted()?.variance.diag().mapv(f64::sqrt))
    }

    pub fn log_likelihood(&self) -> Result<f64> {
        Ok(self.fitted()?.log_likelihood)
    }

    pub fn iterations(&self) -> Result<usize> {
        Ok(self.fitted()?.iterations)
    }

    pub fn ties(&self) -> TieMethod {
        self.ties
    }

    /// predict risk scores (linear predictor x·β) for new patients
    pub fn predict(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let coefs = self.coefficients()?;

        if covariates.ncols() != coefs.len() {
            return Err(SurvivalError::invalid_dimensions(
                format!("feature count mismatch: expected {}, got {}",
                       coefs.len(), covariates.ncols())
            ));
        }

        Ok(covariates.dot(&coefs))  // linear combination
    }

    /// hazard relative to the average patient: exp((x - x̄)·β)
    pub fn predict_partial_hazard(&self, covariates: ArrayView2<f64>) -> Result<Array1<f64>> {
        let fitted = self.fitted()?;
        let risk = self.predict(covariates)?;
        let offset = fitted.means.dot(&fitted.coefficients);
        Ok(risk.mapv(|r| (r - offset).exp()))
    }

    /// Breslow cumulative baseline hazard for the average patient
    pub fn baseline_cumulative_hazard(&self) -> Result<(&[f64], &[f64])> {
        let fitted = self.fitted()?;
        Ok((&fitted.baseline_times, &fitted.baseline_cumulative_hazard))
    }

    fn cumulative_hazard_at(fitted: &FittedCox, time: f64) -> f64 {
        match fitted.baseline_times.iter().rposition(|&t| t <= time) {
            Some(i) => fitted.baseline_cumulative_hazard[i],
            None => 0.0,
        }
    }

    /// predict survival probs at specific time points (n_samples x n_times)
    pub fn predict_survival(&self, covariates: ArrayView2<f64>, times: ArrayView1<f64>) -> Result<Array2<f64>> {
        let fitted = self.fitted()?;
        let partial_hazards = self.predict_partial_hazard(covariates)?;

        let mut survival_probs = Array2::zeros((covariates.nrows(), times.len()));
        for (i, &time) in times.iter().enumerate() {
            let baseline = Self::cumulative_hazard_at(fitted, time);
            for (j, &hazard) in partial_hazards.iter().enumerate() {
                survival_probs[[j, i]] = (-baseline * hazard).exp();
            }
        }

        Ok(survival_probs)
    }

    /// survival curves on the baseline timeline, with t = 0 prepended
    pub fn predict_survival_function(&self, covariates: ArrayView2<f64>) -> Result<(Vec<f64>, Array2<f64>)> {
        let fitted = self.fitted()?;
        let mut timeline = Vec::with_capacity(fitted.baseline_times.len() + 1);
        if fitted.baseline_times.first().map_or(true, |&t| t > 0.0) {
            timeline.push(0.0);
        }
        timeline.extend_from_slice(&fitted.baseline_times);
        let survival = self.predict_survival(covariates, ArrayView1::from(&timeline[..]))?;
        Ok((timeline, survival))
    }

    /// Harrell's C on some data, higher risk score should mean earlier death
    pub fn concordance(&self, data: &SurvivalData) -> Result<f64> {
        let risk_scores = self.predict(data.covariates())?;
        harrell_c_index(risk_scores.view(), data.times(), data.events())
    }

    pub fn metrics(&self, data: &SurvivalData) -> Result<ModelMetrics> {
        let fitted = self.fitted()?;
        let risk_scores = self.predict(data.covariates())?;
        ModelMetrics::compute(
            risk_scores.view(),
            data.times(),
            data.events(),
            fitted.log_likelihood,
            fitted.null_log_likelihood,
            fitted.coefficients.len(),
        )
    }

    /// get a nice summary of the fitted model
    pub fn summary(&self) -> Result<CoxModelSummary> {
        let fitted = self.fitted()?;
        let z_crit = critical_z(self.alpha)?;

        let coefficients = fitted.coefficients.clone();
        let standard_errors = self.standard_errors()?;
        let z_scores = &coefficients / &standard_errors;
        let p_values = z_scores
            .iter()
            .map(|&z| normal_two_sided_p(z))
            .collect::<Result<Vec<_>>>()?;
        let lower = &coefficients - &(z_crit * &standard_errors);
        let upper = &coefficients + &(z_crit * &standard_errors);

        let feature_names = match &self.feature_names {
            Some(names) => names.clone(),
            None => (0..coefficients.len()).map(|i| format!("x{}", i)).collect(),
        };

        Ok(CoxModelSummary {
            hazard_ratios: coefficients.mapv(f64::exp),
            hazard_ratio_lower: lower.mapv(f64::exp),
            hazard_ratio_upper: upper.mapv(f64::exp),
            coefficients,
            standard_errors,
            z_scores,
            p_values: Array1::from(p_values),
            coefficient_lower: lower,
            coefficient_upper: upper,
            feature_names,
            alpha: self.alpha,
            ties: self.ties,
            n_samples: fitted.n_samples,
            n_events: fitted.n_events,
            iterations: fitted.iterations,
        })
    }

    /// has this model been fit to data yet?
    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }
}

/// Breslow estimator on centred covariates: H0(t) = Σ d / Σ_R exp((x - x̄)β)
fn breslow_baseline(data: &SurvivalData, beta: &Array1<f64>) -> (Vec<f64>, Vec<f64>) {
    let weights = centered_covariates(data).dot(beta).mapv(f64::exp);
    let mut cumulative = 0.0;
    let hazard = data
        .event_times()
        .iter()
        .zip(data.risk_sets())
        .map(|(&t, risk_set)| {
            let deaths = data.deaths_at(t).len() as f64;
            let denom: f64 = risk_set.iter().map(|&i| weights[i]).sum();
            cumulative += deaths / denom;
            cumulative
        })
        .collect();
    (data.event_times().to_vec(), hazard)
}

/// nice summary of what the model learned
#[derive(Debug, Clone)]
pub struct CoxModelSummary {
    pub coefficients: Array1<f64>,   // the betas
    pub hazard_ratios: Array1<f64>,  // exp(betas)
    pub standard_errors: Array1<f64>,
    pub z_scores: Array1<f64>,
    pub p_values: Array1<f64>,
    pub coefficient_lower: Array1<f64>,
    pub coefficient_upper: Array1<f64>,
    pub hazard_ratio_lower: Array1<f64>,
    pub hazard_ratio_upper: Array1<f64>,
    pub feature_names: Vec<String>,
    pub alpha: f64,
    pub ties: TieMethod,
    pub n_samples: usize,
    pub n_events: usize,
    pub iterations: usize,
}

impl CoxModelSummary {
    /// print out what we learned
    pub fn print(&self) {
        let level = 100.0 * (1.0 - self.alpha);
        println!("cox proportional hazards model summary");
        println!("=====================================");
        println!(
            "n = {}, events = {}, ties = {:?}, iterations = {}",
            self.n_samples, self.n_events, self.ties, self.iterations
        );
        println!();

        println!(
            "{:<12} {:>10} {:>10} {:>10} {:>8} {:>10} {:>10} {:>10}",
            "feature", "coef", "exp(coef)", "se(coef)", "z", "p",
            format!("hr lo {level:.0}%"), format!("hr hi {level:.0}%"),
        );
        println!("{:-<87}", "");

        for i in 0..self.coefficients.len() {
            println!(
                "{:<12} {:>10.5} {:>10.5} {:>10.5} {:>8.3} {:>10.3e} {:>10.5} {:>10.5}",
                self.feature_names[i],
                self.coefficients[i],
                self.hazard_ratios[i],
                self.standard_errors[i],
                self.z_scores[i],
                self.p_values[i],
                self.hazard_ratio_lower[i],
                self.hazard_ratio_upper[i],
            );
        }
    }
}

/// one row of covariates per profile, for prediction
pub fn profile_matrix(profiles: &[Vec<f64>]) -> Result<Array2<f64>> {
    let n_features = profiles.first().map_or(0, Vec::len);
    if profiles.iter().any(|p| p.len() != n_features) {
        return Err(SurvivalError::invalid_dimensions("profiles have different lengths"));
    }
    let flat: Vec<f64> = profiles.iter().flatten().copied().collect();
    Array2::from_shape_vec((profiles.len(), n_features), flat)
        .map_err(|e| SurvivalError::invalid_dimensions(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;
    use approx::assert_relative_eq;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let events = vec![true, false, true, true, false, true, true, false];
        let covariates = Array2::from_shape_vec((8, 2), vec![
            1.0, 0.5,
            0.0, 1.0,
            1.0, 0.0,
            -1.0, 1.0,
            0.0, -1.0,
            1.0, -1.0,
            -1.0, 0.5,
            0.0, 0.0,
        ]).unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_model_creation() {
        let model = CoxModel::new()
            .with_max_iterations(500)
            .with_tolerance(1e-6)
            .with_ties(TieMethod::Breslow);

        assert_eq!(model.max_iterations, 500);
        assert_eq!(model.tolerance, 1e-6);
        assert_eq!(model.ties(), TieMethod::Breslow);
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_model_not_fitted_error() {
        let model = CoxModel::new();
        assert!(model.coefficients().is_err());
        assert!(model.summary().is_err());

        let covariates = Array2::zeros((5, 3));
        assert!(model.predict(covariates.view()).is_err());
    }

    #[test]
    fn test_feature_names() {
        let names = vec!["age".to_string(), "nodes".to_string()];
        let data = create_test_data();
        let mut model = CoxModel::new().with_feature_names(names.clone());
        model.fit(&data).unwrap();
        assert_eq!(model.summary().unwrap().feature_names, names);

        let mut wrong = CoxModel::new().with_feature_names(vec!["only".into()]);
        assert!(wrong.fit(&data).is_err());
    }

    #[test]
    fn test_prediction_dimension_mismatch() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        // Wrong number of features
        let wrong_covariates = Array2::zeros((5, 3)); // Should be 2 features
        assert!(model.predict(wrong_covariates.view()).is_err());
    }

    #[test]
    fn test_summary_consistency() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();
        let summary = model.summary().unwrap();

        for i in 0..2 {
            assert_relative_eq!(summary.hazard_ratios[i], summary.coefficients[i].exp(), epsilon = 1e-12);
            assert!(summary.hazard_ratio_lower[i] < summary.hazard_ratios[i]);
            assert!(summary.hazard_ratio_upper[i] > summary.hazard_ratios[i]);
            assert!(summary.p_values[i] > 0.0 && summary.p_values[i] <= 1.0);
            assert_relative_eq!(
                summary.z_scores[i],
                summary.coefficients[i] / summary.standard_errors[i],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_predicted_survival_is_monotone() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        let profiles = profile_matrix(&[vec![1.0, 0.0], vec![-1.0, 0.0]]).unwrap();
        let (timeline, curves) = model.predict_survival_function(profiles.view()).unwrap();
        assert_eq!(timeline[0], 0.0);
        assert_eq!(curves.ncols(), timeline.len());
        for row in curves.rows() {
            assert_relative_eq!(row[0], 1.0);
            for k in 1..row.len() {
                assert!(row[k] <= row[k - 1] + 1e-15);
            }
        }
    }

    #[test]
    fn test_partial_hazard_of_mean_patient_is_one() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        let mean_row = data.covariate_means().insert_axis(Axis(0));
        let partial = model.predict_partial_hazard(mean_row.view()).unwrap();
        assert_relative_eq!(partial[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_baseline_cumulative_hazard_steps_at_deaths() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        let (times, hazard) = model.baseline_cumulative_hazard().unwrap();
        assert_eq!(times.len(), hazard.len());
        assert_eq!(times, data.event_times());
        assert!(hazard[0] > 0.0);
        for k in 1..hazard.len() {
            assert!(hazard[k] > hazard[k - 1]);
        }
        let ll = model.log_likelihood().unwrap();
        assert!(ll.is_finite() && ll < 0.0);
    }

    #[test]
    fn test_constant_covariate_reports_collinearity() {
        let times = vec![1.0, 2.0, 3.0, 4.0];
        let events = vec![true, false, true, true];
        let covariates = Array2::from_elem((4, 1), 3.0);
        let data = SurvivalData::new(times, events, covariates).unwrap();

        let mut model = CoxModel::new();
        match model.fit(&data) {
            Err(SurvivalError::NumericalError { message }) => assert!(message.contains("collinear")),
            other => panic!("expected a collinearity error, got {other:?}"),
        }
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_profile_matrix_rejects_ragged_rows() {
        assert!(profile_matrix(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }
}
