//! Kaplan-Meier estimation for right-censored follow-up times.
//!
//! The curve is stored on every distinct observed time (deaths and
//! censorings), so the at-risk table and censoring ticks can be read off the
//! same timeline the survival estimate uses.

use std::{collections::BTreeMap, fmt::Display};

use crate::{
    data::{distinct_sorted, SurvivalData},
    distributions::critical_z,
    error::{Result, SurvivalError},
};

/// Kaplan-Meier survival curve with Greenwood pointwise confidence bands.
#[derive(Debug, Clone)]
pub struct KaplanMeier {
    label: String,
    n_samples: usize,
    alpha: f64,
    /// distinct observed times, ascending
    timeline: Vec<f64>,
    /// subjects with time >= timeline[i]
    at_risk: Vec<usize>,
    /// deaths at timeline[i]
    events: Vec<usize>,
    /// censorings at timeline[i]
    censored: Vec<usize>,
    survival: Vec<f64>,
    /// Greenwood sum Σ d / (n (n - d)) up to timeline[i]
    greenwood: Vec<f64>,
    ci_lower: Vec<f64>,
    ci_upper: Vec<f64>,
}

impl KaplanMeier {
    /// Fits the estimator.
    ///
    /// `alpha` sets the confidence level of the band to `1 - alpha`. The band
    /// uses the log(-log) transform, so it always stays inside [0, 1].
    pub fn fit(data: &SurvivalData, label: impl Into<String>, alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(SurvivalError::invalid_parameter("alpha", alpha.to_string()));
        }
        let label = label.into();
        if data.n_samples() == 0 {
            return Err(SurvivalError::empty_group(label));
        }

        let z = critical_z(alpha)?;
        let times = data.times();
        let flags = data.events();
        let timeline = distinct_sorted(times.iter().copied());

        let mut at_risk = Vec::with_capacity(timeline.len());
        let mut events = Vec::with_capacity(timeline.len());
        let mut censored = Vec::with_capacity(timeline.len());
        let mut survival = Vec::with_capacity(timeline.len());
        let mut greenwood = Vec::with_capacity(timeline.len());
        let mut ci_lower = Vec::with_capacity(timeline.len());
        let mut ci_upper = Vec::with_capacity(timeline.len());

        let mut current = 1.0;
        let mut variance_sum = 0.0;

        for &t in &timeline {
            let n = times.iter().filter(|&&ti| ti >= t).count();
            let (mut d, mut c) = (0usize, 0usize);
            for (&ti, &event) in times.iter().zip(flags) {
                if ti == t {
                    if event {
                        d += 1;
                    } else {
                        c += 1;
                    }
                }
            }

            if d > 0 {
                current *= 1.0 - d as f64 / n as f64;
                variance_sum += if n > d {
                    d as f64 / (n as f64 * (n - d) as f64)
                } else {
                    f64::INFINITY
                };
            }

            let (lower, upper) = log_log_interval(current, variance_sum, z);
            at_risk.push(n);
            events.push(d);
            censored.push(c);
            survival.push(current);
            greenwood.push(variance_sum);
            ci_lower.push(lower);
            ci_upper.push(upper);
        }

        Ok(Self {
            label,
            n_samples: data.n_samples(),
            alpha,
            timeline,
            at_risk,
            events,
            censored,
            survival,
            greenwood,
            ci_lower,
            ci_upper,
        })
    }

    /// one curve per group value present in `groups`, in group order
    pub fn fit_by_group<G>(data: &SurvivalData, groups: &[G], alpha: f64) -> Result<Vec<(G, KaplanMeier)>>
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

        let mut members: BTreeMap<G, Vec<usize>> = BTreeMap::new();
        for (i, &group) in groups.iter().enumerate() {
            members.entry(group).or_default().push(i);
        }

        members
            .into_iter()
            .map(|(group, indices)| -> Result<(G, KaplanMeier)> {
                let stratum = data.subset(&indices)?;
                Ok((group, Self::fit(&stratum, group.to_string(), alpha)?))
            })
            .collect()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().sum()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn timeline(&self) -> &[f64] {
        &self.timeline
    }

    pub fn survival(&self) -> &[f64] {
        &self.survival
    }

    pub fn confidence_lower(&self) -> &[f64] {
        &self.ci_lower
    }

    pub fn confidence_upper(&self) -> &[f64] {
        &self.ci_upper
    }

    pub fn at_risk(&self) -> &[usize] {
        &self.at_risk
    }

    pub fn events(&self) -> &[usize] {
        &self.events
    }

    pub fn censored(&self) -> &[usize] {
        &self.censored
    }

    /// Greenwood variance of the estimate at each timeline point
    pub fn variance(&self) -> Vec<f64> {
        self.survival
            .iter()
            .zip(&self.greenwood)
            .map(|(&s, &g)| if s > 0.0 { s * s * g } else { 0.0 })
            .collect()
    }

    /// step-function value at `time`; 1.0 before the first observation
    pub fn survival_at(&self, time: f64) -> f64 {
        match self.last_index_at_or_before(time) {
            Some(i) => self.survival[i],
            None => 1.0,
        }
    }

    /// number still under observation at `time` (follow-up >= time)
    pub fn at_risk_at(&self, time: f64) -> usize {
        match self.timeline.iter().position(|&t| t >= time) {
            Some(i) => self.at_risk[i],
            None => 0,
        }
    }

    /// first time the curve reaches 0.5 or below
    pub fn median_survival(&self) -> Option<f64> {
        self.survival
            .iter()
            .position(|&s| s <= 0.5)
            .map(|i| self.timeline[i])
    }

    /// at-risk counts at evenly spaced ticks from 0 to the last observed time
    pub fn at_risk_table(&self, n_ticks: usize) -> Vec<(f64, usize)> {
        let last = self.timeline.last().copied().unwrap_or(0.0);
        if n_ticks < 2 || last <= 0.0 {
            return vec![(0.0, self.n_samples)];
        }
        (0..n_ticks)
            .map(|k| {
                let t = last * k as f64 / (n_ticks - 1) as f64;
                (t, self.at_risk_at(t))
            })
            .collect()
    }

    fn last_index_at_or_before(&self, time: f64) -> Option<usize> {
        self.timeline.iter().rposition(|&t| t <= time)
    }

    pub fn print(&self) {
        println!("kaplan-meier: {} (n = {}, events = {})", self.label, self.n_samples, self.n_events());
        println!("{:-<78}", "");
        println!(
            "{:>8} {:>8} {:>8} {:>8} {:>10} {:>10} {:>10}",
            "time", "at risk", "events", "censor", "survival",
            format!("lo {:.0}%", 100.0 * (1.0 - self.alpha)),
            format!("hi {:.0}%", 100.0 * (1.0 - self.alpha)),
        );
        for i in 0..self.timeline.len() {
            println!(
                "{:>8.2} {:>8} {:>8} {:>8} {:>10.4} {:>10.4} {:>10.4}",
                self.timeline[i], self.at_risk[i], self.events[i], self.censored[i],
                self.survival[i], self.ci_lower[i], self.ci_upper[i],
            );
        }
        println!("{}", self.median_line());
    }

    /// the one line of the printout that reports the median
    pub fn median_line(&self) -> String {
        match self.median_survival() {
            Some(m) => format!("median survival time: {m:.2}"),
            None => "median survival time: not reached".to_string(),
        }
    }
}

/// exp-Greenwood interval: S^exp(±z σ) with σ² = Σ / (ln S)²
fn log_log_interval(s: f64, greenwood_sum: f64, z: f64) -> (f64, f64) {
    if s >= 1.0 {
        return (1.0, 1.0);
    }
    if s <= 0.0 || !greenwood_sum.is_finite() {
        return (0.0, 0.0);
    }
    let log_s = s.ln();
    let sigma = (greenwood_sum / (log_s * log_s)).sqrt();
    (s.powf((z * sigma).exp()), s.powf((-z * sigma).exp()))
}
