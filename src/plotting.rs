//! SVG figures for the report: survival curves, the forest plot of hazard
//! ratios, scaled Schoenfeld residuals and predicted survival.

use std::{fs, path::PathBuf};

use log::debug;
use ndarray::Array2;
use plotters::{
    coord::{types::RangedCoordf64, Shift},
    prelude::*,
};

use crate::{
    config::PlotConfig,
    error::{Result, SurvivalError},
    kaplan_meier::KaplanMeier,
    model::CoxModelSummary,
    schoenfeld::SchoenfeldResiduals,
};

const FONT: &str = "sans-serif";
const AT_RISK_TICKS: usize = 6;

/// writes every figure into one output directory
#[derive(Debug, Clone)]
pub struct SurvivalPlots {
    output_dir: PathBuf,
    size: (u32, u32),
}

impl SurvivalPlots {
    pub fn new(config: &PlotConfig) -> Result<Self> {
        fs::create_dir_all(&config.output_dir)?;
        Ok(Self {
            output_dir: config.output_dir.clone(),
            size: (config.width, config.height),
        })
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// single curve with its confidence band, censoring marks and an
    /// at-risk table under the x axis
    pub fn kaplan_meier(&self, file_name: &str, title: &str, curve: &KaplanMeier) -> Result<PathBuf> {
        let path = self.path(file_name);
        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE)?;
            let table_height = self.size.1 / 6;
            let (upper, lower) = root.split_vertically(self.size.1 - table_height);

            let x_max = time_axis_max(curve.timeline());
            let mut chart = ChartBuilder::on(&upper)
                .caption(title, (FONT, 22))
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(0.0..x_max, 0.0..1.05)?;

            chart
                .configure_mesh()
                .x_desc("time (years)")
                .y_desc("survival probability")
                .draw()?;

            let upper_band = step_points(curve.timeline(), curve.confidence_upper());
            let mut band = step_points(curve.timeline(), curve.confidence_lower());
            band.reverse();
            let mut polygon = upper_band;
            polygon.extend(band);
            chart.draw_series(std::iter::once(Polygon::new(polygon, BLUE.mix(0.2).filled())))?;

            chart
                .draw_series(LineSeries::new(
                    step_points(curve.timeline(), curve.survival()),
                    BLUE.stroke_width(2),
                ))?
                .label(curve.label())
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
            chart.draw_series(censor_marks(curve, BLUE.to_rgba()))?;

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;

            draw_at_risk_table(&chart, &lower, &[curve])?;
            root.present()?;
        }
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// one coloured curve per stratum
    pub fn stratified(&self, file_name: &str, title: &str, curves: &[&KaplanMeier]) -> Result<PathBuf> {
        if curves.is_empty() {
            return Err(SurvivalError::plot("no curves to draw"));
        }
        let path = self.path(file_name);
        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE)?;
            let table_height = (self.size.1 / 12) * (curves.len() as u32).max(2);
            let (upper, lower) = root.split_vertically(self.size.1 - table_height.min(self.size.1 / 2));

            let x_max = curves
                .iter()
                .map(|c| time_axis_max(c.timeline()))
                .fold(1.0, f64::max);
            let mut chart = ChartBuilder::on(&upper)
                .caption(title, (FONT, 22))
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(0.0..x_max, 0.0..1.05)?;

            chart
                .configure_mesh()
                .x_desc("time (years)")
                .y_desc("survival probability")
                .draw()?;

            for (i, curve) in curves.iter().enumerate() {
                let color = Palette99::pick(i).to_rgba();
                chart
                    .draw_series(LineSeries::new(
                        step_points(curve.timeline(), curve.survival()),
                        color.stroke_width(2),
                    ))?
                    .label(format!("{} (n = {})", curve.label(), curve.n_samples()))
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
                chart.draw_series(censor_marks(curve, color))?;
            }

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;

            draw_at_risk_table(&chart, &lower, curves)?;
            root.present()?;
        }
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// hazard ratios with their confidence intervals, reference line at 1
    pub fn forest(&self, file_name: &str, summary: &CoxModelSummary) -> Result<PathBuf> {
        let n = summary.hazard_ratios.len();
        if n == 0 {
            return Err(SurvivalError::plot("model has no coefficients"));
        }
        let path = self.path(file_name);
        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE)?;

            let lo = summary.hazard_ratio_lower.iter().fold(1.0, |a: f64, &b| a.min(b));
            let hi = summary.hazard_ratio_upper.iter().fold(1.0, |a: f64, &b| a.max(b));
            let pad = 0.1 * (hi - lo).max(1e-3);

            let names = &summary.feature_names;
            let mut chart = ChartBuilder::on(&root)
                .caption(
                    format!("hazard ratios ({:.0}% CI)", 100.0 * (1.0 - summary.alpha)),
                    (FONT, 22),
                )
                .margin(20)
                .x_label_area_size(40)
                .y_label_area_size(100)
                .build_cartesian_2d((lo - pad).max(0.0)..hi + pad, (0..n).into_segmented())?;

            chart
                .configure_mesh()
                .disable_y_mesh()
                .x_desc("hazard ratio")
                .y_label_formatter(&|v| match v {
                    SegmentValue::CenterOf(i) => names.get(*i).cloned().unwrap_or_default(),
                    _ => String::new(),
                })
                .draw()?;

            chart.draw_series(std::iter::once(PathElement::new(
                vec![(1.0, SegmentValue::Exact(0)), (1.0, SegmentValue::Exact(n))],
                BLACK.mix(0.5),
            )))?;

            for i in 0..n {
                let y = SegmentValue::CenterOf(i);
                chart.draw_series(std::iter::once(PathElement::new(
                    vec![
                        (summary.hazard_ratio_lower[i], y.clone()),
                        (summary.hazard_ratio_upper[i], y.clone()),
                    ],
                    BLUE.stroke_width(2),
                )))?;
                chart.draw_series(std::iter::once(Circle::new(
                    (summary.hazard_ratios[i], y),
                    5,
                    BLUE.filled(),
                )))?;
            }

            root.present()?;
        }
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// one panel per covariate: scaled residuals against death time
    pub fn schoenfeld(&self, file_name: &str, residuals: &SchoenfeldResiduals) -> Result<PathBuf> {
        let p = residuals.feature_names.len();
        if p == 0 || residuals.n_deaths() == 0 {
            return Err(SurvivalError::plot("no residuals to draw"));
        }
        let path = self.path(file_name);
        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE)?;
            let panels = root.split_evenly((1, p));

            let x_max = time_axis_max(&residuals.times);
            for (k, panel) in panels.iter().enumerate() {
                let column = residuals.scaled.column(k);
                let (y_lo, y_hi) = padded_range(column.iter().copied());
                let mean = column.mean().unwrap_or(0.0);

                let mut chart = ChartBuilder::on(panel)
                    .caption(format!("scaled schoenfeld: {}", residuals.feature_names[k]), (FONT, 18))
                    .margin(10)
                    .x_label_area_size(40)
                    .y_label_area_size(60)
                    .build_cartesian_2d(0.0..x_max, y_lo..y_hi)?;

                chart
                    .configure_mesh()
                    .x_desc("time (years)")
                    .y_desc("beta(t)")
                    .draw()?;

                chart.draw_series(
                    residuals
                        .times
                        .iter()
                        .zip(column.iter())
                        .map(|(&t, &r)| Circle::new((t, r), 3, BLUE.mix(0.6).filled())),
                )?;
                chart.draw_series(LineSeries::new(vec![(0.0, mean), (x_max, mean)], RED.stroke_width(2)))?;
            }

            root.present()?;
        }
        debug!("wrote {}", path.display());
        Ok(path)
    }

    /// predicted survival curves, one row of `survival` per profile
    pub fn predictions(
        &self,
        file_name: &str,
        timeline: &[f64],
        survival: &Array2<f64>,
        labels: &[String],
    ) -> Result<PathBuf> {
        if survival.nrows() != labels.len() || survival.ncols() != timeline.len() {
            return Err(SurvivalError::invalid_dimensions(format!(
                "{} labels and {} time points for a {:?} survival matrix",
                labels.len(),
                timeline.len(),
                survival.dim()
            )));
        }
        let path = self.path(file_name);
        {
            let root = SVGBackend::new(&path, self.size).into_drawing_area();
            root.fill(&WHITE)?;

            let mut chart = ChartBuilder::on(&root)
                .caption("predicted survival by profile", (FONT, 22))
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(0.0..time_axis_max(timeline), 0.0..1.05)?;

            chart
                .configure_mesh()
                .x_desc("time (years)")
                .y_desc("survival probability")
                .draw()?;

            for (i, (row, label)) in survival.rows().into_iter().zip(labels).enumerate() {
                let color = Palette99::pick(i).to_rgba();
                let values: Vec<f64> = row.to_vec();
                chart
                    .draw_series(LineSeries::new(step_points(timeline, &values), color.stroke_width(2)))?
                    .label(label.as_str())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
            }

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;

            root.present()?;
        }
        debug!("wrote {}", path.display());
        Ok(path)
    }
}

/// right-continuous step function starting at (0, 1)
fn step_points(times: &[f64], values: &[f64]) -> Vec<(f64, f64)> {
    let mut points = Vec::with_capacity(2 * times.len() + 1);
    let mut previous = 1.0;
    points.push((0.0, previous));
    for (&t, &v) in times.iter().zip(values) {
        points.push((t, previous));
        points.push((t, v));
        previous = v;
    }
    points
}

fn censor_marks(curve: &KaplanMeier, color: RGBAColor) -> Vec<Cross<(f64, f64), i32>> {
    curve
        .timeline()
        .iter()
        .zip(curve.survival())
        .zip(curve.censored())
        .filter(|(_, c)| **c > 0)
        .map(|((&t, &s), _)| Cross::new((t, s), 4, color.stroke_width(1)))
        .collect()
}

fn time_axis_max(times: &[f64]) -> f64 {
    times.iter().copied().fold(0.0, f64::max).max(1.0) * 1.05
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (-1.0, 1.0);
    }
    let pad = 0.1 * (hi - lo).max(1e-6);
    (lo - pad, hi + pad)
}

/// number at risk under each tick, one text row per curve, aligned with the
/// chart's x axis
fn draw_at_risk_table(
    chart: &ChartContext<'_, SVGBackend<'_>, Cartesian2d<RangedCoordf64, RangedCoordf64>>,
    area: &DrawingArea<SVGBackend<'_>, Shift>,
    curves: &[&KaplanMeier],
) -> Result<()> {
    let style = (FONT, 14).into_font().color(&BLACK);
    area.draw(&Text::new("at risk", (10, 5), style.clone()))?;

    for (row, curve) in curves.iter().enumerate() {
        let y = 25 + 20 * row as i32;
        area.draw(&Text::new(curve.label().to_string(), (10, y), style.clone()))?;
        for (t, n) in curve.at_risk_table(AT_RISK_TICKS) {
            let (x, _) = chart.backend_coord(&(t, 0.0));
            area.draw(&Text::new(n.to_string(), (x, y), style.clone()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_points_start_at_one() {
        let points = step_points(&[1.0, 3.0], &[0.8, 0.5]);
        assert_eq!(points, vec![(0.0, 1.0), (1.0, 1.0), (1.0, 0.8), (3.0, 0.8), (3.0, 0.5)]);
    }

    #[test]
    fn test_padded_range() {
        let (lo, hi) = padded_range([1.0, 3.0, f64::NAN].into_iter());
        assert!(lo < 1.0 && hi > 3.0);
        assert_eq!(padded_range(std::iter::empty()), (-1.0, 1.0));
    }
}
