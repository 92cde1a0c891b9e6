use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalData,
    error::{SurvivalError, Result},
};

/// How tied death times enter the partial likelihood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieMethod {
    Breslow,
    #[default]
    Efron,
}

/// Configuration for Cox model optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub ties: TieMethod,
    /// max number of step halvings when a Newton step lowers the likelihood
    pub max_halvings: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-7,
            ties: TieMethod::Efron,
            max_halvings: 30,
        }
    }
}

/// What the optimizer hands back to the model
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub coefficients: Array1<f64>,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    /// observed information (negative hessian) at the optimum
    pub information: Array2<f64>,
    pub iterations: usize,
}

/// Newton-Raphson on the Cox partial likelihood
pub struct CoxOptimizer {
    config: OptimizationConfig,
}

/// log partial likelihood, score and information at one beta
pub(crate) struct Derivatives {
    pub loglik: f64,
    pub gradient: Array1<f64>,
    pub information: Array2<f64>,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Fit coefficients. Covariates are centred first; this leaves beta
    /// unchanged but keeps exp(x beta) away from overflow.
    pub fn optimize(&self, data: &SurvivalData) -> Result<OptimizationResult> {
        if data.n_events() == 0 {
            return Err(SurvivalError::invalid_survival_data(
                "no events - partial likelihood is flat"
            ));
        }

        let centered = centered_covariates(data);
        let n_features = data.n_features();
        let mut beta = Array1::zeros(n_features);

        let mut current = compute_derivatives(data, &centered, &beta, self.config.ties)?;
        let null_log_likelihood = current.loglik;

        for iteration in 0..self.config.max_iterations {
            let step = match solve_linear_system(&current.information, &current.gradient) {
                Ok(step) => step,
                Err(_) => {
                    // Fall back to gradient ascent
                    warn!("information matrix singular at iteration {iteration}, taking a gradient step");
                    0.01 * &current.gradient
                }
            };

            let decrement = 0.5 * current.gradient.dot(&step);
            debug!(
                "iteration {iteration}: loglik = {:.8}, decrement = {:.3e}",
                current.loglik, decrement
            );
            if decrement.abs() < self.config.tolerance {
                return Ok(OptimizationResult {
                    coefficients: beta,
                    log_likelihood: current.loglik,
                    null_log_likelihood,
                    information: current.information,
                    iterations: iteration,
                });
            }

            // Newton step, halved until the likelihood stops dropping
            let mut scale = 1.0;
            let mut candidate = &beta + &step;
            let mut next = compute_derivatives(data, &centered, &candidate, self.config.ties);
            let mut halvings = 0;
            while !matches!(&next, Ok(d) if d.loglik >= current.loglik - 1e-12) {
                if halvings == self.config.max_halvings {
                    return Err(SurvivalError::optimization_failed(format!(
                        "step halving failed at iteration {iteration}"
                    )));
                }
                halvings += 1;
                scale *= 0.5;
                candidate = &beta + &(scale * &step);
                next = compute_derivatives(data, &centered, &candidate, self.config.ties);
            }

            beta = candidate;
            current = next?;

            if beta.iter().any(|b| !b.is_finite()) {
                return Err(SurvivalError::numerical_error("coefficients diverged"));
            }
        }

        Err(SurvivalError::optimization_failed(format!(
            "Newton-Raphson failed to converge in {} iterations",
            self.config.max_iterations
        )))
    }

    /// partial log-likelihood at an arbitrary beta
    pub fn log_likelihood(&self, data: &SurvivalData, beta: ArrayView1<f64>) -> Result<f64> {
        if beta.len() != data.n_features() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "beta len ({}) != n_features ({})",
                beta.len(),
                data.n_features()
            )));
        }
        let centered = centered_covariates(data);
        Ok(compute_derivatives(data, &centered, &beta.to_owned(), self.config.ties)?.loglik)
    }
}

pub(crate) fn centered_covariates(data: &SurvivalData) -> Array2<f64> {
    let means = data.covariate_means();
    &data.covariates() - &means.insert_axis(Axis(0))
}

/// risk-set sums: S0 = Σ w, S1 = Σ w x, S2 = Σ w x xᵀ
pub(crate) fn risk_set_moments(
    x: &Array2<f64>,
    weights: &Array1<f64>,
    members: &[usize],
) -> (f64, Array1<f64>, Array2<f64>) {
    let p = x.ncols();
    let mut s0 = 0.0;
    let mut s1 = Array1::zeros(p);
    let mut s2 = Array2::zeros((p, p));
    for &i in members {
        let w = weights[i];
        let row = x.row(i);
        s0 += w;
        s1.scaled_add(w, &row);
        for j in 0..p {
            for k in 0..p {
                s2[[j, k]] += w * row[j] * row[k];
            }
        }
    }
    (s0, s1, s2)
}

/// Efron (or Breslow) log partial likelihood with score and information
pub(crate) fn compute_derivatives(
    data: &SurvivalData,
    x: &Array2<f64>,
    beta: &Array1<f64>,
    ties: TieMethod,
) -> Result<Derivatives> {
    let p = x.ncols();
    let eta = x.dot(beta);
    let weights = eta.mapv(f64::exp);

    if weights.iter().any(|w| !w.is_finite()) {
        return Err(SurvivalError::numerical_error(
            "exp(linear predictor) overflowed"
        ));
    }

    let mut loglik = 0.0;
    let mut gradient = Array1::zeros(p);
    let mut information = Array2::zeros((p, p));

    for (&event_time, risk_set) in data.event_times().iter().zip(data.risk_sets()) {
        let deaths = data.deaths_at(event_time);
        let d = deaths.len() as f64;

        let (r0, r1, r2) = risk_set_moments(x, &weights, risk_set);
        let (d0, d1, d2) = risk_set_moments(x, &weights, &deaths);

        for &i in &deaths {
            loglik += eta[i];
            gradient += &x.row(i);
        }

        for l in 0..deaths.len() {
            let fraction = match ties {
                TieMethod::Breslow => 0.0,
                TieMethod::Efron => l as f64 / d,
            };
            let s0 = r0 - fraction * d0;
            if s0 <= 0.0 {
                return Err(SurvivalError::numerical_error("Risk set sum is non-positive"));
            }
            let s1 = &r1 - &(fraction * &d1);
            let s2 = &r2 - &(fraction * &d2);
            let mean = &s1 / s0;

            loglik -= s0.ln();
            gradient -= &mean;
            for j in 0..p {
                for k in 0..p {
                    information[[j, k]] += s2[[j, k]] / s0 - mean[j] * mean[k];
                }
            }
        }
    }

    Ok(Derivatives { loglik, gradient, information })
}

/// Solve linear system Ax = b
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    // gaussian elimination with partial pivoting
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(SurvivalError::invalid_dimensions("Matrix dimensions mismatch"));
    }

    let mut a_copy = a.clone();
    let mut b_copy = b.clone();

    // Forward elimination
    for i in 0..n {
        // Find pivot
        let mut max_row = i;
        for k in i + 1..n {
            if a_copy[[k, i]].abs() > a_copy[[max_row, i]].abs() {
                max_row = k;
            }
        }

        if a_copy[[max_row, i]].abs() < 1e-12 {
            return Err(SurvivalError::numerical_error("Matrix is singular"));
        }

        // Swap rows
        if max_row != i {
            for j in 0..n {
                a_copy.swap([i, j], [max_row, j]);
            }
            b_copy.swap(i, max_row);
        }

        // Eliminate
        for k in i + 1..n {
            let factor = a_copy[[k, i]] / a_copy[[i, i]];
            for j in i..n {
                a_copy[[k, j]] -= factor * a_copy[[i, j]];
            }
            b_copy[k] -= factor * b_copy[i];
        }
    }

    // Back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = b_copy[i];
        for j in i + 1..n {
            x[i] -= a_copy[[i, j]] * x[j];
        }
        x[i] /= a_copy[[i, i]];
    }

    Ok(x)
}

/// inverse via one solve per unit vector
pub fn invert_matrix(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let mut inverse = Array2::zeros((n, n));
    for j in 0..n {
        let mut unit = Array1::zeros(n);
        unit[j] = 1.0;
        let column = solve_linear_system(a, &unit)?;
        inverse.column_mut(j).assign(&column);
    }
    Ok(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let events = vec![true, true, false, true, true, true];
        let covariates = Array2::from_shape_vec((6, 1), vec![
            2.0,
            0.0,
            1.0,
            1.0,
            0.0,
            -1.0,
        ]).unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_optimizer_creation() {
        let config = OptimizationConfig::default();
        let optimizer = CoxOptimizer::new(config.clone());
        assert_eq!(optimizer.config().max_iterations, 1000);
        assert_eq!(optimizer.config().ties, TieMethod::Efron);
    }

    #[test]
    fn test_optimum_has_zero_score() {
        let data = create_test_data();
        let optimizer = CoxOptimizer::new(OptimizationConfig::default());
        let result = optimizer.optimize(&data).unwrap();

        let centered = centered_covariates(&data);
        let at_optimum = compute_derivatives(&data, &centered, &result.coefficients, TieMethod::Efron).unwrap();
        assert_relative_eq!(at_optimum.gradient[0], 0.0, epsilon = 1e-5);
        assert!(result.log_likelihood >= result.null_log_likelihood);
        assert!(result.coefficients[0] > 0.0); // higher x dies first
    }

    #[test]
    fn test_single_event_closed_form() {
        // one death among two subjects with x = 1 and x = 0:
        // L(b) = e^b / (e^b + 1) → the score at 0 is 1/2, information 1/4
        let data = SurvivalData::new(
            vec![1.0, 2.0],
            vec![true, false],
            Array2::from_shape_vec((2, 1), vec![1.0, 0.0]).unwrap(),
        ).unwrap();
        let centered = centered_covariates(&data);
        let d = compute_derivatives(&data, &centered, &Array1::zeros(1), TieMethod::Breslow).unwrap();
        assert_relative_eq!(d.loglik, -(2.0f64).ln(), epsilon = 1e-12);
        assert_relative_eq!(d.gradient[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(d.information[[0, 0]], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_efron_and_breslow_agree_without_ties() {
        let data = create_test_data();
        let centered = centered_covariates(&data);
        let beta = Array1::from(vec![0.3]);
        let efron = compute_derivatives(&data, &centered, &beta, TieMethod::Efron).unwrap();
        let breslow = compute_derivatives(&data, &centered, &beta, TieMethod::Breslow).unwrap();
        assert_relative_eq!(efron.loglik, breslow.loglik, epsilon = 1e-12);

        let optimizer = CoxOptimizer::new(OptimizationConfig::default());
        assert_relative_eq!(
            optimizer.log_likelihood(&data, beta.view()).unwrap(),
            efron.loglik,
            epsilon = 1e-12
        );
        assert!(optimizer.log_likelihood(&data, Array1::<f64>::zeros(2).view()).is_err());
    }

    #[test]
    fn test_efron_differs_with_ties() {
        let data = SurvivalData::new(
            vec![1.0, 1.0, 2.0, 3.0],
            vec![true, true, true, false],
            Array2::from_shape_vec((4, 1), vec![1.0, 0.0, 1.0, 0.0]).unwrap(),
        ).unwrap();
        let centered = centered_covariates(&data);
        let beta = Array1::zeros(1);
        let efron = compute_derivatives(&data, &centered, &beta, TieMethod::Efron).unwrap();
        let breslow = compute_derivatives(&data, &centered, &beta, TieMethod::Breslow).unwrap();
        // at beta = 0: breslow -2 ln 4 - ln 2, efron -ln 4 - ln 3 - ln 2
        assert_relative_eq!(breslow.loglik, -2.0 * 4.0f64.ln() - 2.0f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(efron.loglik, -4.0f64.ln() - 3.0f64.ln() - 2.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_no_events_rejected() {
        let data = SurvivalData::new(
            vec![1.0, 2.0],
            vec![false, false],
            Array2::zeros((2, 1)),
        ).unwrap();
        let optimizer = CoxOptimizer::new(OptimizationConfig::default());
        assert!(optimizer.optimize(&data).is_err());
    }

    #[test]
    fn test_iteration_cap() {
        let data = create_test_data();
        let optimizer = CoxOptimizer::new(OptimizationConfig {
            max_iterations: 1,
            tolerance: 1e-300,
            ..OptimizationConfig::default()
        });
        assert!(matches!(
            optimizer.optimize(&data),
            Err(SurvivalError::OptimizationFailed { .. })
        ));
    }

    #[test]
    fn test_solve_and_invert() {
        let a = Array2::from_shape_vec((2, 2), vec![4.0, 1.0, 2.0, 3.0]).unwrap();
        let b = Array1::from(vec![1.0, 2.0]);
        let x = solve_linear_system(&a, &b).unwrap();
        assert_relative_eq!(x[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(x[1], 0.6, epsilon = 1e-12);

        let inv = invert_matrix(&a).unwrap();
        let identity = a.dot(&inv);
        assert_relative_eq!(identity[[0, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(identity[[0, 1]], 0.0, epsilon = 1e-12);

        let singular = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 2.0, 4.0]).unwrap();
        assert!(solve_linear_system(&singular, &b).is_err());
    }
}
