//! # haberman survival
//!
//! survival analysis of post-surgical breast cancer follow-up - load the 4-column
//! table, recode it, and run the usual battery of estimators on it
//!
//! ## what you get
//!
//! - kaplan-meier curves w/ greenwood confidence bands, medians & at-risk tables
//! - k-group log-rank test
//! - cox regression (efron or breslow ties) with hazard ratios & concordance
//! - proportional hazards check on scaled schoenfeld residuals
//! - svg charts for all of it
//!
//! ## quick start
//!
//! ```rust
//! use haberman_survival::{CoxModel, KaplanMeier, SurvivalData};
//! use ndarray::Array2;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // years of follow-up, whether the patient died, and (age, nodes)
//! let times = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let events = vec![true, true, false, true, false, true]; // true = died, false = censored
//! let covariates = Array2::from_shape_vec((6, 2), vec![
//!     57.0, 3.0,
//!     55.0, 1.0,
//!     48.0, 0.0,
//!     70.0, 3.0,
//!     41.0, 2.0,
//!     58.0, 4.0,
//! ])?;
//! let data = SurvivalData::new(times, events, covariates)?;
//!
//! let curve = KaplanMeier::fit(&data, "all", 0.05)?;
//! println!("median survival: {:?}", curve.median_survival());
//!
//! let mut model = CoxModel::new().with_max_iterations(1000);
//! model.fit(&data)?;
//! let risk_scores = model.predict(data.covariates())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod correlation;
pub mod data;
pub mod dataset;
pub mod distributions;
pub mod error;
pub mod kaplan_meier;
pub mod logrank;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod pipeline;
pub mod plotting;
pub mod schoenfeld;

pub use config::AnalysisConfig;
pub use data::SurvivalData;
pub use dataset::{AgeGroup, Cohort, NodesGroup, Patient, PatientRecord};
pub use error::{Result, SurvivalError};
pub use kaplan_meier::KaplanMeier;
pub use logrank::{logrank_test, LogRankResult};
pub use model::CoxModel;
pub use optimization::TieMethod;
pub use schoenfeld::{proportional_hazard_test, TimeTransform};

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_basic_functionality() {
        let n_samples = 100;
        let n_features = 2;

        let times: Vec<f64> = (0..n_samples).map(|i| 1.0 + (i % 10) as f64).collect();
        let events = vec![true; n_samples];
        let covariates = Array2::zeros((n_samples, n_features));

        let data = SurvivalData::new(times, events, covariates).unwrap();
        assert_eq!(data.n_samples(), n_samples);
        assert_eq!(data.n_features(), n_features);

        let curve = KaplanMeier::fit(&data, "all", 0.05).unwrap();
        assert_eq!(curve.n_events(), n_samples);
        assert_eq!(curve.survival().last().copied(), Some(0.0));
    }
}
