//! Schoenfeld residuals and the proportional-hazards check built on them.
//!
//! One residual row per observed death: the dead subject's covariates minus
//! the risk-weighted covariate mean of everybody at risk at that time. Scaled
//! residuals are `D · r · Var(β) + β`, which for a covariate with a
//! time-constant effect should scatter flat around β over time. The test
//! correlates them with a transform of time (Grambsch & Therneau, one degree
//! of freedom per covariate).

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{
    data::SurvivalData,
    distributions::chi2_sf,
    error::{Result, SurvivalError},
    kaplan_meier::KaplanMeier,
    model::CoxModel,
    optimization::risk_set_moments,
};

/// how death times are transformed before correlating with the residuals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeTransform {
    Identity,
    Log,
    #[default]
    Rank,
    /// 1 - Kaplan-Meier estimate at the death time
    Km,
}

impl TimeTransform {
    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Log => "log",
            Self::Rank => "rank",
            Self::Km => "km",
        }
    }

    /// transformed death times, in the order given
    pub fn apply(self, death_times: &[f64], data: &SurvivalData) -> Result<Vec<f64>> {
        match self {
            Self::Identity => Ok(death_times.to_vec()),
            Self::Log => {
                if death_times.iter().any(|&t| t <= 0.0) {
                    return Err(SurvivalError::invalid_parameter(
                        "time_transform",
                        "log needs strictly positive death times",
                    ));
                }
                Ok(death_times.iter().map(|t| t.ln()).collect())
            }
            Self::Rank => Ok(average_ranks(death_times)),
            Self::Km => {
                let km = KaplanMeier::fit(data, "all", 0.05)?;
                Ok(death_times.iter().map(|&t| 1.0 - km.survival_at(t)).collect())
            }
        }
    }
}

/// 1-based ranks, ties share the average of their positions
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &i in &order[start..=end] {
            ranks[i] = rank;
        }
        start = end + 1;
    }
    ranks
}

#[derive(Debug, Clone)]
pub struct SchoenfeldResiduals {
    /// death time of each residual row, ascending
    pub times: Vec<f64>,
    /// raw residuals (n_deaths x n_features)
    pub residuals: Array2<f64>,
    /// scaled residuals, centred on the coefficients
    pub scaled: Array2<f64>,
    pub feature_names: Vec<String>,
}

impl SchoenfeldResiduals {
    pub fn compute(model: &CoxModel, data: &SurvivalData) -> Result<Self> {
        let beta = model.coefficients()?.to_owned();
        if beta.len() != data.n_features() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "model has {} coefficients, data has {} features",
                beta.len(),
                data.n_features()
            )));
        }
        let variance = model.variance_matrix()?;
        let feature_names = model.summary()?.feature_names;

        let x = data.covariates().to_owned();
        let weights = x.dot(&beta).mapv(f64::exp);
        let p = data.n_features();
        let n_deaths = data.n_events();

        let mut times = Vec::with_capacity(n_deaths);
        let mut residuals = Array2::zeros((n_deaths, p));
        let mut row = 0;

        for (&t, risk_set) in data.event_times().iter().zip(data.risk_sets()) {
            let (s0, s1, _) = risk_set_moments(&x, &weights, risk_set);
            let mean = &s1 / s0;
            for i in data.deaths_at(t) {
                let r: Array1<f64> = &x.row(i) - &mean;
                residuals.row_mut(row).assign(&r);
                times.push(t);
                row += 1;
            }
        }

        let mut scaled = residuals.dot(variance) * n_deaths as f64;
        for mut r in scaled.rows_mut() {
            r += &beta;
        }

        Ok(Self { times, residuals, scaled, feature_names })
    }

    pub fn n_deaths(&self) -> usize {
        self.times.len()
    }
}

/// per-covariate result of the proportional-hazards test
#[derive(Debug, Clone)]
pub struct PhTestRow {
    pub feature: String,
    pub statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone)]
pub struct ProportionalHazardTest {
    pub transform: TimeTransform,
    pub rows: Vec<PhTestRow>,
}

impl ProportionalHazardTest {
    /// covariates whose p-value falls below alpha
    pub fn violations(&self, alpha: f64) -> Vec<&PhTestRow> {
        self.rows.iter().filter(|r| r.p_value < alpha).collect()
    }

    pub fn print(&self) {
        println!("proportional hazards test (scaled schoenfeld, time transform = {})", self.transform.name());
        println!("{:<12} {:>12} {:>12}", "feature", "statistic", "p");
        println!("{:-<38}", "");
        for row in &self.rows {
            println!("{:<12} {:>12.4} {:>12.6}", row.feature, row.statistic, row.p_value);
        }
    }
}

pub fn proportional_hazard_test(
    model: &CoxModel,
    data: &SurvivalData,
    transform: TimeTransform,
) -> Result<(ProportionalHazardTest, SchoenfeldResiduals)> {
    let residuals = SchoenfeldResiduals::compute(model, data)?;
    let n_deaths = residuals.n_deaths();
    if n_deaths < 2 {
        return Err(SurvivalError::invalid_survival_data(
            "need at least 2 deaths for the proportional hazards test"
        ));
    }

    let g = transform.apply(&residuals.times, data)?;
    let g_mean = g.iter().sum::<f64>() / n_deaths as f64;
    let demeaned: Array1<f64> = g.iter().map(|v| v - g_mean).collect();
    let g_ss = demeaned.dot(&demeaned);
    if g_ss <= 0.0 {
        return Err(SurvivalError::numerical_error(
            "all deaths share one transformed time - nothing to correlate"
        ));
    }

    let variance = model.variance_matrix()?;
    let mut rows = Vec::with_capacity(residuals.feature_names.len());
    for (k, name) in residuals.feature_names.iter().enumerate() {
        let numerator = demeaned.dot(&residuals.scaled.column(k));
        let statistic = numerator * numerator / (n_deaths as f64 * variance[[k, k]] * g_ss);
        rows.push(PhTestRow {
            feature: name.clone(),
            statistic,
            p_value: chi2_sf(statistic, 1)?,
        });
    }

    Ok((ProportionalHazardTest { transform, rows }, residuals))
}
