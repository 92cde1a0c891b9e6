use std::{collections::BTreeSet, fmt::Display};

use ndarray::{Array1, Array2};

use crate::{
    data::SurvivalData,
    distributions::chi2_sf,
    error::{Result, SurvivalError},
    optimization::solve_linear_system,
};

/// outcome of a k-group log-rank test
#[derive(Debug, Clone)]
pub struct LogRankResult {
    pub groups: Vec<String>,
    pub n_per_group: Vec<usize>,
    pub observed: Vec<f64>,   // deaths seen per group
    pub expected: Vec<f64>,   // deaths expected under H0
    pub statistic: f64,       // chi-square
    pub degrees_of_freedom: usize,
    pub p_value: f64,
}

impl LogRankResult {
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }

    pub fn print(&self) {
        println!("log-rank test");
        println!("=============");
        println!("{:<16} {:>6} {:>10} {:>10}", "group", "n", "observed", "expected");
        println!("{:-<45}", "");
        for i in 0..self.groups.len() {
            println!(
                "{:<16} {:>6} {:>10.0} {:>10.3}",
                self.groups[i], self.n_per_group[i], self.observed[i], self.expected[i]
            );
        }
        println!("chi-square = {:.4}, df = {}, p = {:.6}", self.statistic, self.degrees_of_freedom, self.p_value);
    }
}

/// compare the survival distributions of the groups in `groups`
///
/// uses the full hypergeometric variance of (O - E), dropping the last group
/// so the covariance matrix is invertible.
pub fn logrank_test<G>(data: &SurvivalData, groups: &[G]) -> Result<LogRankResult>
where
    G: Ord + Copy + Display,
{
    if groups.len() != data.n_samples() {
        return Err(SurvivalError::invalid_dimensions(format!(
            "group labels ({}) != n_samples ({})",
            groups.len(),
            data.n_samples()
        )));
    }

    let labels: Vec<G> = groups.iter().copied().collect::<BTreeSet<G>>().into_iter().collect();
    let group_of: Vec<usize> = groups
        .iter()
        .map(|g| labels.binary_search(g).unwrap_or_else(|i| i))
        .collect();

    let k = labels.len();
    if k < 2 {
        return Err(SurvivalError::invalid_parameter(
            "groups",
            format!("need at least 2 groups, got {k}"),
        ));
    }

    let times = data.times();
    let events = data.events();
    let mut observed = Array1::<f64>::zeros(k);
    let mut expected = Array1::<f64>::zeros(k);
    let mut covariance = Array2::<f64>::zeros((k, k));

    for (&t, risk_set) in data.event_times().iter().zip(data.risk_sets()) {
        let mut at_risk = vec![0.0; k];
        let mut deaths = vec![0.0; k];
        for &i in risk_set {
            at_risk[group_of[i]] += 1.0;
            if events[i] && times[i] == t {
                deaths[group_of[i]] += 1.0;
            }
        }

        let n: f64 = at_risk.iter().sum();
        let d: f64 = deaths.iter().sum();

        for g in 0..k {
            observed[g] += deaths[g];
            expected[g] += d * at_risk[g] / n;
        }

        if n > 1.0 {
            let scale = d * (n - d) / (n - 1.0);
            for g in 0..k {
                for h in 0..k {
                    let kronecker = if g == h { 1.0 } else { 0.0 };
                    covariance[[g, h]] += scale * at_risk[g] / n * (kronecker - at_risk[h] / n);
                }
            }
        }
    }

    let df = k - 1;
    let diff = (&observed - &expected).slice(ndarray::s![..df]).to_owned();
    let reduced = covariance.slice(ndarray::s![..df, ..df]).to_owned();
    let statistic = if diff.iter().all(|x| x.abs() < 1e-12) {
        0.0
    } else {
        let solved = solve_linear_system(&reduced, &diff)?;
        diff.dot(&solved)
    };
    let p_value = chi2_sf(statistic, df)?;

    let mut n_per_group = vec![0; k];
    for &g in &group_of {
        n_per_group[g] += 1;
    }

    Ok(LogRankResult {
        groups: labels.iter().map(ToString::to_string).collect(),
        n_per_group,
        observed: observed.to_vec(),
        expected: expected.to_vec(),
        statistic,
        degrees_of_freedom: df,
        p_value,
    })
}
