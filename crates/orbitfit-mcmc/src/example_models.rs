//! Lightweight orbit models used for testing and demonstration.
//!
//! These stand in for a full orbital-mechanics system: cheap to evaluate, with a
//! known posterior, but exposing the same parameter labels and failure modes.

use crate::model::OrbitModel;
use crate::{Error, Result};
use rand::{Rng, RngCore};
use std::f64::consts::PI;

/// A single-body orbit with uniform priors and an independent Gaussian likelihood
/// centred on a reference orbit.
///
/// Parameters are `sma1, ecc1, inc1, aop1, pan1, tau1, plx, mtot`. Unbound orbits
/// (`ecc1 >= 1`) and non-positive semi-major axes are rejected with
/// [`Error::Model`], mirroring how a real orbit solver refuses invalid elements.
#[derive(Debug, Clone)]
pub struct GaussianOrbitModel {
    labels: Vec<String>,
    reference: Vec<f64>,
    sigma: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

impl Default for GaussianOrbitModel {
    fn default() -> Self {
        let elements: [(&str, f64, f64, (f64, f64)); 8] = [
            ("sma1", 10.0, 0.5, (1.0, 50.0)),
            ("ecc1", 0.3, 0.05, (0.0, 1.0)),
            ("inc1", 1.0, 0.1, (0.0, PI)),
            ("aop1", 2.0, 0.2, (0.0, 2.0 * PI)),
            ("pan1", 1.5, 0.2, (0.0, 2.0 * PI)),
            ("tau1", 0.4, 0.05, (0.0, 1.0)),
            ("plx", 50.0, 1.0, (40.0, 60.0)),
            ("mtot", 1.2, 0.1, (0.5, 2.0)),
        ];

        Self {
            labels: elements.iter().map(|s| s.0.to_string()).collect(),
            reference: elements.iter().map(|s| s.1).collect(),
            sigma: elements.iter().map(|s| s.2).collect(),
            bounds: elements.iter().map(|s| s.3).collect(),
        }
    }
}

impl GaussianOrbitModel {
    /// Build a model from explicit labels, reference values, widths and prior bounds.
    pub fn new(
        labels: Vec<String>,
        reference: Vec<f64>,
        sigma: Vec<f64>,
        bounds: Vec<(f64, f64)>,
    ) -> Result<Self> {
        let n = labels.len();
        if reference.len() != n || sigma.len() != n || bounds.len() != n {
            return Err(Error::Configuration(format!(
                "Model definition lengths differ: {} labels, {} references, {} widths, {} bounds",
                n,
                reference.len(),
                sigma.len(),
                bounds.len()
            )));
        }
        if bounds.iter().any(|(lo, hi)| !(lo < hi)) {
            return Err(Error::Configuration(
                "Prior bounds must satisfy lower < upper".to_string(),
            ));
        }
        Ok(Self {
            labels,
            reference,
            sigma,
            bounds,
        })
    }

    /// The orbit the likelihood is centred on.
    pub fn reference(&self) -> &[f64] {
        &self.reference
    }
}

impl OrbitModel for GaussianOrbitModel {
    fn param_labels(&self) -> &[String] {
        &self.labels
    }

    fn sample_prior(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        self.bounds
            .iter()
            .map(|&(lo, hi)| rng.gen_range(lo..hi))
            .collect()
    }

    fn ln_prior(&self, params: &[f64]) -> f64 {
        let mut ln_p = 0.0;
        for (&x, &(lo, hi)) in params.iter().zip(&self.bounds) {
            if !(lo..=hi).contains(&x) {
                return f64::NEG_INFINITY;
            }
            ln_p -= (hi - lo).ln();
        }
        ln_p
    }

    fn ln_likelihood(&self, params: &[f64]) -> Result<f64> {
        if let Some(i) = self.labels.iter().position(|l| l == "ecc1") {
            if params[i] >= 1.0 {
                return Err(Error::Model(format!(
                    "Unbound orbit with eccentricity {}",
                    params[i]
                )));
            }
        }
        if let Some(i) = self.labels.iter().position(|l| l == "sma1") {
            if params[i] <= 0.0 {
                return Err(Error::Model(format!(
                    "Non-positive semi-major axis {}",
                    params[i]
                )));
            }
        }

        let chi2: f64 = params
            .iter()
            .zip(&self.reference)
            .zip(&self.sigma)
            .map(|((x, mu), s)| ((x - mu) / s).powi(2))
            .sum();
        Ok(-0.5 * chi2)
    }
}
