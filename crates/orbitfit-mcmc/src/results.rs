//! Flattened posterior samples for downstream statistics.

use crate::chain::ChainStore;
use crate::Result;
use indexmap::IndexMap;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Posterior samples and log-likelihoods of the cold chain.
///
/// `post` has one row per sample and one column per parameter; `lnlike[i]` belongs
/// to `post.row(i)`. Samples are ordered walker-major: all retained steps of walker
/// 0, then walker 1, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    /// Posterior samples: shape (n_samples, n_params)
    pub post: Array2<f64>,

    /// Log-likelihood of each sample: shape (n_samples,)
    pub lnlike: Array1<f64>,

    /// Parameter labels in column order
    pub labels: Vec<String>,
}

impl Results {
    pub fn empty(labels: Vec<String>) -> Self {
        Self {
            post: Array2::zeros((0, labels.len())),
            lnlike: Array1::zeros(0),
            labels,
        }
    }

    /// Build results from the retained cold-chain slice of `chain`.
    pub fn from_chain(chain: &ChainStore) -> Self {
        let (post, lnlike) = chain.flatten_cold();
        Self {
            post,
            lnlike,
            labels: chain.param_labels().to_vec(),
        }
    }

    pub fn n_samples(&self) -> usize {
        self.lnlike.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lnlike.is_empty()
    }

    /// Map from parameter label to its column of samples.
    pub fn to_param_map(&self) -> IndexMap<String, Array1<f64>> {
        self.labels
            .iter()
            .zip(self.post.axis_iter(Axis(1)))
            .map(|(label, column)| (label.clone(), column.to_owned()))
            .collect()
    }

    /// Index of the sample with the highest log-likelihood.
    pub fn max_lnlike_index(&self) -> Option<usize> {
        self.lnlike
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.is_nan())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    /// Save results to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load results from a file written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn sample_results() -> Results {
        let labels = vec!["sma1".to_string(), "ecc1".to_string()];
        let mut chain = ChainStore::new(labels, 1, 2, false, 1);
        chain.push(&array![[[10.0, 0.1], [11.0, 0.2]]], &array![[-1.0, -2.0]]);
        chain.push(&array![[[10.5, 0.15], [11.5, 0.25]]], &array![[-0.5, -3.0]]);
        Results::from_chain(&chain)
    }

    #[test]
    fn test_empty() {
        let results = Results::empty(vec!["x".to_string()]);
        assert!(results.is_empty());
        assert_eq!(results.post.dim(), (0, 1));
        assert_eq!(results.max_lnlike_index(), None);
    }

    #[test]
    fn test_from_chain_alignment() {
        let results = sample_results();

        assert_eq!(results.n_samples(), 4);
        assert_eq!(results.post.nrows(), results.lnlike.len());
        assert_eq!(results.post.row(1), array![10.5, 0.15]);
        assert_eq!(results.lnlike[1], -0.5);
        assert_eq!(results.post.row(2), array![11.0, 0.2]);
    }

    #[test]
    fn test_param_map() {
        let map = sample_results().to_param_map();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["sma1", "ecc1"]);
        assert_eq!(map["sma1"], array![10.0, 10.5, 11.0, 11.5]);
    }

    #[test]
    fn test_max_lnlike() {
        assert_eq!(sample_results().max_lnlike_index(), Some(1));
    }

    #[test]
    fn test_save_load() {
        let results = sample_results();
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.bin");

        results.save(&path).unwrap();
        let loaded = Results::load(&path).unwrap();

        assert_eq!(loaded, results);
    }

    #[test]
    fn test_from_empty_chain() {
        let chain = ChainStore::new(vec!["x".to_string()], 1, 4, false, 1);
        let results = Results::from_chain(&chain);
        assert_eq!(results.post.dim(), (0, 1));
        assert!(results.lnlike.is_empty());
    }
}
