use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use crate::error::{SurvivalError, Result};

/// survival object - times, events, and patient covariates
#[derive(Debug, Clone)]
pub struct SurvivalData {
    times: Array1<f64>,              // follow-up time to event/censoring
    events: Vec<bool>,               // true = died, false = censored
    covariates: Array2<f64>,         // patient features (n_samples x n_features)
    event_times: Vec<f64>,           // distinct event times, ascending
    risk_set_indices: Vec<Vec<usize>>, // who is at risk at each event time
}

impl SurvivalData {
    /// make new survival data from raw vecs/arrays
    pub fn new(
        times: Vec<f64>,        // survival/censoring times
        events: Vec<bool>,      // true = event occurred, false = censored
        covariates: Array2<f64>, // patient features matrix
    ) -> Result<Self> {
        let n_samples = times.len();

        if events.len() != n_samples {
            return Err(SurvivalError::invalid_dimensions(
                format!("times len ({}) != events len ({})", n_samples, events.len())
            ));
        }

        if covariates.nrows() != n_samples {
            return Err(SurvivalError::invalid_dimensions(
                format!("covariates rows ({}) != n_samples ({})", covariates.nrows(), n_samples)
            ));
        }

        if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "survival times must be non-negative & finite"
            ));
        }

        if covariates.iter().any(|x| !x.is_finite()) {
            return Err(SurvivalError::invalid_survival_data(
                "covariates must be finite"
            ));
        }

        let mut data = Self {
            times: Array1::from(times),
            events,
            covariates,
            event_times: Vec::new(),
            risk_set_indices: Vec::new(),
        };

        data.compute_risk_sets();
        Ok(data)
    }

    /// survival object without covariates, enough for km / log-rank
    pub fn without_covariates(times: Vec<f64>, events: Vec<bool>) -> Result<Self> {
        let n = times.len();
        Self::new(times, events, Array2::zeros((n, 0)))
    }

    /// precompute risk sets for each event time (who's still at risk)
    fn compute_risk_sets(&mut self) {
        self.event_times = distinct_sorted(
            self.times
                .iter()
                .zip(self.events.iter())
                .filter_map(|(time, event)| if *event { Some(*time) } else { None }),
        );

        self.risk_set_indices = self
            .event_times
            .iter()
            .map(|&event_time| {
                // everyone who hasn't died/been censored before this time
                (0..self.n_samples())
                    .filter(|&i| self.times[i] >= event_time)
                    .collect()
            })
            .collect();
    }

    /// how many patients
    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    /// how many features per patient
    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    /// survival/censoring times
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        &self.events
    }

    /// patient feature matrix
    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    /// precomputed risk sets, parallel to `event_times()`
    pub fn risk_sets(&self) -> &[Vec<usize>] {
        &self.risk_set_indices
    }

    /// unique event times in order
    pub fn event_times(&self) -> &[f64] {
        &self.event_times
    }

    /// subjects who died exactly at `time`
    pub fn deaths_at(&self, time: f64) -> Vec<usize> {
        (0..self.n_samples())
            .filter(|&i| self.events[i] && self.times[i] == time)
            .collect()
    }

    /// column means, used to centre the linear predictor
    pub fn covariate_means(&self) -> Array1<f64> {
        self.covariates
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(self.n_features()))
    }

    /// grab a subset of patients by indices
    pub fn subset(&self, indices: &[usize]) -> Result<Self> {
        if indices.iter().any(|&i| i >= self.n_samples()) {
            return Err(SurvivalError::invalid_dimensions(
                "subset index out of bounds"
            ));
        }

        let times: Vec<f64> = indices.iter().map(|&i| self.times[i]).collect();
        let events: Vec<bool> = indices.iter().map(|&i| self.events[i]).collect();
        let covariates = self.covariates.select(Axis(0), indices);

        Self::new(times, events, covariates)
    }
}

/// sorted, de-duplicated copy of some finite values
pub(crate) fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(f64::total_cmp);
    values.dedup();
    values
}
