//! Analysis configuration.
//!
//! Everything has a default matching the reference run, so a YAML file only
//! needs the keys it wants to change.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    dataset::{AGE_BANDS_MAX, AGE_BANDS_MIN},
    error::{Result, SurvivalError},
    optimization::TieMethod,
    schoenfeld::TimeTransform,
};

/// top-level config for one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub input: InputConfig,
    pub filter: FilterConfig,
    pub cox: CoxConfig,
    pub plots: PlotConfig,
    /// significance level for every confidence interval in the report
    pub alpha: f64,
    /// |r| above this flags a covariate pair as collinear
    pub collinearity_threshold: f64,
    /// patient profiles to predict survival curves for
    pub profiles: Vec<ProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub path: PathBuf,
    pub delimiter: char,
    pub has_headers: bool,
}

/// outlier bounds: age in (min_age, max_age], nodes in [min_nodes, max_nodes]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub min_age: f64,
    pub max_age: f64,
    pub min_nodes: f64,
    pub max_nodes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoxConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub ties: TieMethod,
    pub time_transform: TimeTransform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub enabled: bool,
    pub output_dir: PathBuf,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub label: String,
    pub age: f64,
    pub nodes: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            filter: FilterConfig::default(),
            cox: CoxConfig::default(),
            plots: PlotConfig::default(),
            alpha: 0.05,
            collinearity_threshold: 0.8,
            profiles: vec![
                ProfileConfig { label: "Age 45, 2 nodes".into(), age: 45.0, nodes: 2.0 },
                ProfileConfig { label: "Age 65, 10 nodes".into(), age: 65.0, nodes: 10.0 },
            ],
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("haberman.csv"),
            delimiter: ';',
            has_headers: true,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_age: 20.0,
            max_age: 90.0,
            min_nodes: 0.0,
            max_nodes: 30.0,
        }
    }
}

impl Default for CoxConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-7,
            ties: TieMethod::Efron,
            time_transform: TimeTransform::Rank,
        }
    }
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_dir: PathBuf::from("plots"),
            width: 1000,
            height: 700,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.input.delimiter.is_ascii() {
            return Err(SurvivalError::config("delimiter must be a single ascii character"));
        }
        if self.filter.min_age >= self.filter.max_age {
            return Err(SurvivalError::config("filter.min_age must be below filter.max_age"));
        }
        if self.filter.min_nodes > self.filter.max_nodes {
            return Err(SurvivalError::config("filter.min_nodes must not exceed filter.max_nodes"));
        }
        if self.filter.min_age < AGE_BANDS_MIN || self.filter.max_age > AGE_BANDS_MAX {
            return Err(SurvivalError::config(format!(
                "age filter must stay inside the age bands ({AGE_BANDS_MIN}, {AGE_BANDS_MAX}]"
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(SurvivalError::config("alpha must be in (0, 1)"));
        }
        if !(self.collinearity_threshold > 0.0 && self.collinearity_threshold <= 1.0) {
            return Err(SurvivalError::config("collinearity_threshold must be in (0, 1]"));
        }
        if self.cox.max_iterations == 0 {
            return Err(SurvivalError::config("cox.max_iterations must be positive"));
        }
        if self.cox.tolerance <= 0.0 {
            return Err(SurvivalError::config("cox.tolerance must be positive"));
        }
        if self.plots.width < 200 || self.plots.height < 200 {
            return Err(SurvivalError::config("plots need at least 200x200 pixels"));
        }
        Ok(())
    }
}
