//! Trace plots for inspecting chain convergence.
//!
//! [`examine`] builds one [`TraceFigure`] per requested parameter from the chain
//! store without modifying it. Figures carry their data and can be rendered to SVG
//! at the caller's discretion.

use crate::chain::ChainStore;
use crate::{Error, Result};
use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

/// Selection of the traces to examine. Every filter defaults to "everything".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamineOptions {
    /// Parameter labels to plot, one figure each, in this order
    pub param_list: Option<Vec<String>>,

    /// Temperature rung to plot (parallel tempering only; defaults to the cold rung)
    pub temp: Option<usize>,

    /// Explicit walker indices to plot
    pub walker_list: Option<Vec<usize>>,

    /// Plot a random subset of this many walkers (ignored when `walker_list` is set)
    pub n_walkers: Option<usize>,

    /// Half-open range of steps to plot
    pub step_range: Option<(usize, usize)>,
}

impl ExamineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_list = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn temp(mut self, rung: usize) -> Self {
        self.temp = Some(rung);
        self
    }

    pub fn walkers(mut self, walkers: Vec<usize>) -> Self {
        self.walker_list = Some(walkers);
        self
    }

    pub fn n_walkers(mut self, n: usize) -> Self {
        self.n_walkers = Some(n);
        self
    }

    pub fn step_range(mut self, start: usize, end: usize) -> Self {
        self.step_range = Some((start, end));
        self
    }
}

/// Step-versus-value traces of one parameter for a set of walkers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFigure {
    pub label: String,

    /// Temperature rung the traces come from
    pub rung: usize,

    /// Walker index of each row of `values`
    pub walkers: Vec<usize>,

    /// Steps covered by the columns of `values`
    pub steps: Range<usize>,

    /// Parameter values: shape (walkers.len(), steps.len())
    pub values: Array2<f64>,
}

impl TraceFigure {
    pub fn title(&self) -> String {
        if self.rung == 0 {
            format!("{} ({} walkers)", self.label, self.walkers.len())
        } else {
            format!(
                "{} ({} walkers, rung {})",
                self.label,
                self.walkers.len(),
                self.rung
            )
        }
    }

    /// Render the figure as an SVG document.
    pub fn to_svg_string(&self, size: (u32, u32)) -> Result<String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
            self.draw(&root)?;
        }
        Ok(svg)
    }

    /// Render the figure to an SVG file.
    pub fn save_svg<P: AsRef<Path>>(&self, path: P, size: (u32, u32)) -> Result<()> {
        let root = SVGBackend::new(path.as_ref(), size).into_drawing_area();
        self.draw(&root)
    }

    fn value_range(&self) -> Range<f64> {
        let (lo, hi) = self
            .values
            .iter()
            .filter(|v| v.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        if !lo.is_finite() {
            0.0..1.0
        } else if lo == hi {
            lo - 0.5..hi + 0.5
        } else {
            let pad = 0.05 * (hi - lo);
            lo - pad..hi + pad
        }
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        root.fill(&WHITE).map_err(plot_error)?;

        let x_start = self.steps.start as f64;
        let x_end = (self.steps.end as f64).max(x_start + 1.0);

        let mut chart = ChartBuilder::on(root)
            .caption(self.title(), ("sans-serif", 24))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(x_start..x_end, self.value_range())
            .map_err(plot_error)?;

        chart
            .configure_mesh()
            .x_desc("Step")
            .y_desc(self.label.as_str())
            .draw()
            .map_err(plot_error)?;

        let n_traces = self.values.nrows().max(1) as f64;
        for (i, trace) in self.values.outer_iter().enumerate() {
            let colour = HSLColor(i as f64 / n_traces, 0.7, 0.45).mix(0.6);
            let points = trace
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(s, &v)| ((self.steps.start + s) as f64, v));

            chart
                .draw_series(LineSeries::new(points, colour.stroke_width(1)))
                .map_err(plot_error)?;
        }

        root.present().map_err(plot_error)?;
        Ok(())
    }
}

fn plot_error<E: std::fmt::Display>(e: E) -> Error {
    Error::Plot(e.to_string())
}

/// Build trace figures from `chain` according to `options`.
///
/// Fails with [`Error::InvalidArgument`] for selectors that cannot apply to this
/// chain: a temperature in ensemble mode or beyond the ladder, unknown labels,
/// out-of-range walkers, an empty or oversized random subset, or a reversed step
/// range. Step ranges reaching past the end of the chain are clamped.
pub fn examine<R: Rng + ?Sized>(
    chain: &ChainStore,
    options: &ExamineOptions,
    rng: &mut R,
) -> Result<Vec<TraceFigure>> {
    let rung = select_rung(chain, options.temp)?;
    let params = select_params(chain, options.param_list.as_deref())?;
    let walkers = select_walkers(chain, options, rng)?;
    let steps = select_steps(chain, options.step_range)?;

    Ok(params
        .into_iter()
        .map(|(index, label)| TraceFigure {
            label,
            rung,
            walkers: walkers.clone(),
            steps: steps.clone(),
            values: chain.traces(rung, index, &walkers, steps.clone()),
        })
        .collect())
}

fn select_rung(chain: &ChainStore, temp: Option<usize>) -> Result<usize> {
    match temp {
        None => Ok(0),
        Some(_) if !chain.is_tempered() => Err(Error::InvalidArgument(
            "A temperature can only be selected in parallel-tempering mode".to_string(),
        )),
        Some(t) if t >= chain.n_rungs() => Err(Error::InvalidArgument(format!(
            "Temperature index {} out of range for {} rungs",
            t,
            chain.n_rungs()
        ))),
        Some(t) => Ok(t),
    }
}

fn select_params(chain: &ChainStore, labels: Option<&[String]>) -> Result<Vec<(usize, String)>> {
    let all = chain.param_labels();
    match labels {
        None => Ok(all.iter().cloned().enumerate().collect()),
        Some(labels) => labels
            .iter()
            .map(|label| {
                all.iter()
                    .position(|l| l == label)
                    .map(|i| (i, label.clone()))
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "Unknown parameter '{}'; expected one of {:?}",
                            label, all
                        ))
                    })
            })
            .collect(),
    }
}

fn select_walkers<R: Rng + ?Sized>(
    chain: &ChainStore,
    options: &ExamineOptions,
    rng: &mut R,
) -> Result<Vec<usize>> {
    let total = chain.n_walkers();

    if let Some(list) = &options.walker_list {
        if list.is_empty() {
            return Err(Error::InvalidArgument(
                "walker_list must not be empty".to_string(),
            ));
        }
        if let Some(&bad) = list.iter().find(|&&w| w >= total) {
            return Err(Error::InvalidArgument(format!(
                "Walker index {} out of range for {} walkers",
                bad, total
            )));
        }
        return Ok(list.clone());
    }

    match options.n_walkers {
        None => Ok((0..total).collect()),
        Some(n) if n == 0 || n > total => Err(Error::InvalidArgument(format!(
            "Cannot select {} random walkers out of {}",
            n, total
        ))),
        Some(n) => {
            let mut chosen = rand::seq::index::sample(rng, total, n).into_vec();
            chosen.sort_unstable();
            Ok(chosen)
        }
    }
}

fn select_steps(chain: &ChainStore, step_range: Option<(usize, usize)>) -> Result<Range<usize>> {
    let len = chain.len();
    match step_range {
        None => Ok(0..len),
        Some((start, end)) if start > end => Err(Error::InvalidArgument(format!(
            "Step range start {} is after its end {}",
            start, end
        ))),
        Some((start, end)) => Ok(start.min(len)..end.min(len)),
    }
}
