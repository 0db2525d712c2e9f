//! Sampler configuration.
//!
//! All tuning knobs of the sampler live in [`SamplerConfig`], which can be built
//! in code or read from a TOML document. Missing keys fall back to their defaults.
//!
//! ```toml
//! num_temps = 5
//! num_walkers = 100
//! num_threads = 4
//! seed = 42
//! min_acceptance_fraction = 0.005
//!
//! [walker_init.ball]
//! center = [1.0, 0.1, 45.0]
//! radius = 0.01
//! ```

use crate::walkers::WalkerInit;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for an [`MCMC`](crate::MCMC) sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of temperature rungs.
    /// 0 or 1 selects the affine-invariant ensemble sampler, anything larger
    /// selects parallel tempering with that many rungs.
    /// Default: 0
    pub num_temps: usize,

    /// Number of walkers per rung. Must be at least twice the parameter count.
    /// Default: 100
    pub num_walkers: usize,

    /// Number of worker threads evaluating the likelihood.
    /// Default: 1
    pub num_threads: usize,

    /// Seed for all random draws. A random seed is chosen at construction when unset.
    pub seed: Option<u64>,

    /// Scale parameter `a` of the stretch move.
    /// Default: 2.0
    pub stretch_scale: f64,

    /// Store every `thin`-th sampling generation.
    /// Default: 1
    pub thin: usize,

    /// Ratio between successive temperatures of the ladder.
    /// Derived from the parameter count when unset.
    pub temperature_step: Option<f64>,

    /// Acceptance fraction below which a walker counts as stuck. A
    /// [`ConvergenceWarning`](crate::ConvergenceWarning) is raised when every
    /// cold-chain walker is stuck over a run.
    /// Default: 0.01
    pub min_acceptance_fraction: f64,

    /// Write a checkpoint every N completed generations (0 disables).
    /// Default: 0
    pub checkpoint_every: usize,

    /// Destination of periodic checkpoints.
    pub checkpoint_path: Option<PathBuf>,

    /// How walkers are placed before the first generation.
    /// Default: drawn from the prior
    pub walker_init: WalkerInit,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_temps: 0,
            num_walkers: 100,
            num_threads: 1,
            seed: None,
            stretch_scale: 2.0,
            thin: 1,
            temperature_step: None,
            min_acceptance_fraction: 0.01,
            checkpoint_every: 0,
            checkpoint_path: None,
            walker_init: WalkerInit::FromPrior,
        }
    }
}

impl SamplerConfig {
    /// Create a configuration with the given mode, walker count and thread count.
    pub fn new(num_temps: usize, num_walkers: usize, num_threads: usize) -> Self {
        Self {
            num_temps,
            num_walkers,
            num_threads,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_thin(mut self, thin: usize) -> Self {
        self.thin = thin;
        self
    }

    pub fn with_walker_init(mut self, init: WalkerInit) -> Self {
        self.walker_init = init;
        self
    }

    pub fn with_min_acceptance_fraction(mut self, threshold: f64) -> Self {
        self.min_acceptance_fraction = threshold;
        self
    }

    pub fn with_checkpoint<P: Into<PathBuf>>(mut self, every: usize, path: P) -> Self {
        self.checkpoint_every = every;
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Parse a configuration from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Read a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Whether this configuration selects parallel tempering.
    pub fn is_tempered(&self) -> bool {
        self.num_temps > 1
    }

    /// Number of rungs held by the sampler (1 in ensemble mode).
    pub fn n_rungs(&self) -> usize {
        self.num_temps.max(1)
    }

    /// Check the configuration against a model with `n_params` free parameters.
    pub fn validate(&self, n_params: usize) -> Result<()> {
        if n_params == 0 {
            return Err(Error::Configuration(
                "Model must expose at least one parameter".to_string(),
            ));
        }
        if self.num_walkers < 2 * n_params {
            return Err(Error::Configuration(format!(
                "Need at least {} walkers (2 x {} parameters) for ensemble proposals, got {}",
                2 * n_params,
                n_params,
                self.num_walkers
            )));
        }
        if self.num_threads == 0 {
            return Err(Error::Configuration(
                "Number of threads must be at least 1".to_string(),
            ));
        }
        if self.stretch_scale.is_nan() || self.stretch_scale <= 1.0 {
            return Err(Error::Configuration(format!(
                "Stretch move scale parameter must be > 1.0, got {}",
                self.stretch_scale
            )));
        }
        if self.thin == 0 {
            return Err(Error::Configuration(
                "Thinning interval must be at least 1".to_string(),
            ));
        }
        if let Some(step) = self.temperature_step {
            if !step.is_finite() || step <= 1.0 {
                return Err(Error::Configuration(format!(
                    "Temperature step must be a finite value > 1.0, got {}",
                    step
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_acceptance_fraction) {
            return Err(Error::Configuration(format!(
                "Minimum acceptance fraction must lie in [0, 1], got {}",
                self.min_acceptance_fraction
            )));
        }
        if self.checkpoint_every > 0 && self.checkpoint_path.is_none() {
            return Err(Error::Configuration(
                "checkpoint_every is set but no checkpoint_path was given".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SamplerConfig::default();
        assert_eq!(config.num_temps, 0);
        assert_eq!(config.num_walkers, 100);
        assert_eq!(config.thin, 1);
        assert_eq!(config.stretch_scale, 2.0);
        assert!(!config.is_tempered());
        assert_eq!(config.n_rungs(), 1);
    }

    #[test]
    fn test_mode_selection() {
        assert!(!SamplerConfig::new(1, 20, 1).is_tempered());
        assert_eq!(SamplerConfig::new(1, 20, 1).n_rungs(), 1);
        assert!(SamplerConfig::new(5, 20, 1).is_tempered());
        assert_eq!(SamplerConfig::new(5, 20, 1).n_rungs(), 5);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = SamplerConfig::from_toml_str(
            r#"
            num_temps = 3
            num_walkers = 40
            seed = 7
            min_acceptance_fraction = 0.005

            [walker_init.ball]
            center = [1.0, 2.0]
            radius = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.num_temps, 3);
        assert_eq!(config.num_walkers, 40);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.min_acceptance_fraction, 0.005);
        // Unspecified keys keep their defaults
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.thin, 1);
        assert_eq!(
            config.walker_init,
            WalkerInit::Ball {
                center: vec![1.0, 2.0],
                radius: 0.5
            }
        );
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SamplerConfig::new(4, 32, 2).with_seed(11).with_thin(3);
        let serialised = config.to_toml_string().unwrap();
        let deserialised = SamplerConfig::from_toml_str(&serialised).unwrap();
        assert_eq!(deserialised, config);
    }

    #[test]
    fn test_validate_walker_count() {
        let config = SamplerConfig::new(0, 15, 1);
        assert!(matches!(config.validate(8), Err(Error::Configuration(_))));
        assert!(SamplerConfig::new(0, 16, 1).validate(8).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = SamplerConfig::new(0, 20, 1);

        assert!(base.validate(0).is_err());
        assert!(SamplerConfig::new(0, 20, 0).validate(2).is_err());

        let mut config = base.clone();
        config.stretch_scale = 1.0;
        assert!(config.validate(2).is_err());
        config.stretch_scale = f64::NAN;
        assert!(config.validate(2).is_err());

        assert!(base.clone().with_thin(0).validate(2).is_err());

        let mut config = base.clone();
        config.temperature_step = Some(0.9);
        assert!(config.validate(2).is_err());

        assert!(base
            .clone()
            .with_min_acceptance_fraction(1.5)
            .validate(2)
            .is_err());

        let mut config = base.clone();
        config.checkpoint_every = 10;
        assert!(config.validate(2).is_err());
    }
}
