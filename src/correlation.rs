//! Pearson correlation between the numeric columns, run before the Cox fit
//! to spot covariates that would make the coefficients unstable.

use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{Result, SurvivalError};

#[derive(Debug, Clone)]
pub struct CorrelationMatrix {
    names: Vec<String>,
    values: Array2<f64>,
}

/// a covariate pair whose |r| crossed the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct CollinearPair {
    pub first: String,
    pub second: String,
    pub r: f64,
}

impl CorrelationMatrix {
    /// columns of `data` are variables, rows are observations
    pub fn pearson(data: ArrayView2<f64>, names: Vec<String>) -> Result<Self> {
        let (n, p) = data.dim();
        if names.len() != p {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} names for {} columns", names.len(), p
            )));
        }
        if n < 2 {
            return Err(SurvivalError::invalid_dimensions("need at least 2 rows for a correlation"));
        }

        let means = data
            .mean_axis(Axis(0))
            .ok_or_else(|| SurvivalError::invalid_dimensions("empty data"))?;
        let centered = &data - &means.insert_axis(Axis(0));
        let cross = centered.t().dot(&centered);

        let mut values = Array2::zeros((p, p));
        for i in 0..p {
            for j in 0..p {
                let denom = (cross[[i, i]] * cross[[j, j]]).sqrt();
                values[[i, j]] = if i == j {
                    1.0
                } else if denom > 0.0 {
                    (cross[[i, j]] / denom).clamp(-1.0, 1.0)
                } else {
                    f64::NAN // constant column
                };
            }
        }

        Ok(Self { names, values })
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// upper-triangle pairs with |r| > threshold
    pub fn collinear_pairs(&self, threshold: f64) -> Vec<CollinearPair> {
        let p = self.names.len();
        let mut pairs = Vec::new();
        for i in 0..p {
            for j in i + 1..p {
                let r = self.values[[i, j]];
                if r.abs() > threshold {
                    pairs.push(CollinearPair {
                        first: self.names[i].clone(),
                        second: self.names[j].clone(),
                        r,
                    });
                }
            }
        }
        pairs
    }

    pub fn print(&self) {
        print!("{:<10}", "");
        for name in &self.names {
            print!(" {:>8}", name);
        }
        println!();
        for (i, name) in self.names.iter().enumerate() {
            print!("{:<10}", name);
            for j in 0..self.names.len() {
                print!(" {:>8.3}", self.values[[i, j]]);
            }
            println!();
        }
    }
}
