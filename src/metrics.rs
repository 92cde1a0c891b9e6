use ndarray::ArrayView1;
use crate::{
    distributions::chi2_sf,
    error::{SurvivalError, Result},
};

/// Harrell's C-index with tie handling
///
/// a pair is comparable when the shorter time is a death (a censoring at the
/// same time as a death counts as the longer survivor). tied risk scores
/// score one half.
pub fn harrell_c_index(
    risk_scores: ArrayView1<f64>,
    times: ArrayView1<f64>,
    events: &[bool],
) -> Result<f64> {
    let n = risk_scores.len();
    if n != times.len() || n != events.len() {
        return Err(SurvivalError::invalid_dimensions(
            "risk scores, times, and events must have same length"
        ));
    }

    let mut concordant = 0.0;
    let mut discordant = 0.0;
    let mut tied_risk = 0.0;

    for i in 0..n {
        if !events[i] {
            continue; // skip censored obs as event times
        }

        for j in 0..n {
            if i == j {
                continue;
            }

            // j is comparable to i if j survived longer (event or censored)
            if times[j] > times[i] || (!events[j] && times[j] >= times[i]) {
                if risk_scores[i] > risk_scores[j] {
                    concordant += 1.0;
                } else if risk_scores[i] < risk_scores[j] {
                    discordant += 1.0;
                } else {
                    tied_risk += 1.0;
                }
            }
        }
    }

    let total_pairs = concordant + discordant + tied_risk;
    if total_pairs == 0.0 {
        return Err(SurvivalError::numerical_error(
            "no comparable pairs for concordance calc"
        ));
    }

    Ok((concordant + 0.5 * tied_risk) / total_pairs)
}

/// AIC on the partial likelihood
pub fn aic(log_likelihood: f64, n_parameters: usize) -> f64 {
    2.0 * n_parameters as f64 - 2.0 * log_likelihood
}

/// likelihood-ratio test of the fitted model against beta = 0
#[derive(Debug, Clone, Copy)]
pub struct LikelihoodRatioTest {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
}

impl LikelihoodRatioTest {
    pub fn compute(log_likelihood: f64, null_log_likelihood: f64, n_parameters: usize) -> Result<Self> {
        let statistic = (2.0 * (log_likelihood - null_log_likelihood)).max(0.0);
        Ok(Self {
            statistic,
            degrees_of_freedom: n_parameters,
            p_value: chi2_sf(statistic, n_parameters)?,
        })
    }
}

/// Model evaluation metrics
#[derive(Debug, Clone)]
pub struct ModelMetrics {
    pub c_index: f64,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub aic: f64,
    pub likelihood_ratio: LikelihoodRatioTest,
}

impl ModelMetrics {
    pub fn compute(
        risk_scores: ArrayView1<f64>,
        times: ArrayView1<f64>,
        events: &[bool],
        log_likelihood: f64,
        null_log_likelihood: f64,
        n_parameters: usize,
    ) -> Result<Self> {
        Ok(Self {
            c_index: harrell_c_index(risk_scores, times, events)?,
            log_likelihood,
            null_log_likelihood,
            aic: aic(log_likelihood, n_parameters),
            likelihood_ratio: LikelihoodRatioTest::compute(log_likelihood, null_log_likelihood, n_parameters)?,
        })
    }

    /// Print metrics summary
    pub fn print(&self) {
        println!("Concordance (C-index): {:.4}", self.c_index);
        println!("Partial log-likelihood: {:.4} (null {:.4})", self.log_likelihood, self.null_log_likelihood);
        println!("Partial AIC:            {:.4}", self.aic);
        println!(
            "Likelihood ratio test:  {:.4} on {} df, p = {:.6}",
            self.likelihood_ratio.statistic,
            self.likelihood_ratio.degrees_of_freedom,
            self.likelihood_ratio.p_value
        );
    }
}
