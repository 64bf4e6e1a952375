//! Posterior error probability estimation.
//!
//! PEP models are pluggable: the engine hands a set of candidate matches to a
//! [`PepEstimator`] and gets back one probability per candidate. The built-in
//! model lives in [`crate::ml::DiscriminantPep`].

use crate::psm::SpectralMatch;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Digestion agent name used by top-down searches
pub const TOP_DOWN: &str = "top-down";

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SearchType {
    Standard,
    TopDown,
    Crosslink,
}

impl SearchType {
    /// Derived from the first candidate: top-down digestion, then crosslink
    /// matches, else a standard bottom-up search
    pub fn from_matches<'a, I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = &'a SpectralMatch>,
    {
        match candidates.into_iter().next() {
            Some(m) if m.digestion_agent == TOP_DOWN => SearchType::TopDown,
            Some(m) if m.crosslink => SearchType::Crosslink,
            _ => SearchType::Standard,
        }
    }
}

/// Search settings specific to a single raw file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileParameters {
    pub file: String,
    /// Precursor mass tolerance in ppm (half-width)
    pub precursor_tolerance_ppm: f64,
}

/// Everything an estimator may need besides the candidates themselves
pub struct PepContext<'a> {
    pub search_type: SearchType,
    pub digestion_agent: &'a str,
    pub analysis_type: &'a str,
    pub file_parameters: &'a [FileParameters],
    /// Where to write model diagnostics, if anywhere
    pub output_folder: Option<&'a Path>,
}

/// Summary of a trained PEP model, reported alongside analysis results
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PepDiagnostics {
    pub search_type: SearchType,
    pub digestion_agent: String,
    pub training_targets: usize,
    pub training_decoys: usize,
    /// Kernel bandwidth of the target score density
    pub bandwidth: f64,
    /// Linear discriminant weights, empty if no discriminant was used
    pub weights: Vec<f64>,
    /// True if the model fell back to ranking by raw score
    pub fallback: bool,
}

pub struct PepEstimate {
    /// One value per candidate, in candidate order
    pub posterior_errors: Vec<f64>,
    pub diagnostics: PepDiagnostics,
}

pub trait PepEstimator: Send + Sync {
    fn estimate(
        &self,
        candidates: &[&SpectralMatch],
        context: &PepContext<'_>,
    ) -> Result<PepEstimate, Error>;
}

impl<F> PepEstimator for F
where
    F: Fn(&[&SpectralMatch], &PepContext<'_>) -> Result<PepEstimate, Error> + Send + Sync,
{
    fn estimate(
        &self,
        candidates: &[&SpectralMatch],
        context: &PepContext<'_>,
    ) -> Result<PepEstimate, Error> {
        self(candidates, context)
    }
}

/// Run `estimator` over `candidates`, checking that one value was returned
/// per candidate and clamping each into [0, 1]
pub(crate) fn checked_estimate(
    estimator: &dyn PepEstimator,
    candidates: &[&SpectralMatch],
    context: &PepContext<'_>,
) -> Result<PepEstimate, Error> {
    let mut estimate = estimator.estimate(candidates, context)?;
    if estimate.posterior_errors.len() != candidates.len() {
        return Err(Error::EstimateLength {
            expected: candidates.len(),
            found: estimate.posterior_errors.len(),
        });
    }
    estimate.posterior_errors.iter_mut().for_each(|pep| {
        *pep = match pep.is_nan() {
            true => 1.0,
            false => pep.clamp(0.0, 1.0),
        }
    });
    Ok(estimate)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::psm::Hypothesis;

    fn context() -> PepContext<'static> {
        PepContext {
            search_type: SearchType::Standard,
            digestion_agent: "trypsin",
            analysis_type: "PSM",
            file_parameters: &[],
            output_folder: None,
        }
    }

    fn diagnostics() -> PepDiagnostics {
        PepDiagnostics {
            search_type: SearchType::Standard,
            digestion_agent: "trypsin".into(),
            training_targets: 0,
            training_decoys: 0,
            bandwidth: 0.0,
            weights: Vec::new(),
            fallback: false,
        }
    }

    #[test]
    fn search_type() {
        let td = SpectralMatch::new("a", 1, 1.0, TOP_DOWN);
        let mut xl = SpectralMatch::new("a", 1, 1.0, "trypsin");
        xl.crosslink = true;
        let std = SpectralMatch::new("a", 1, 1.0, "trypsin");

        assert_eq!(SearchType::from_matches([&td, &xl]), SearchType::TopDown);
        assert_eq!(SearchType::from_matches([&xl, &td]), SearchType::Crosslink);
        assert_eq!(SearchType::from_matches([&std]), SearchType::Standard);
        assert_eq!(
            SearchType::from_matches(std::iter::empty()),
            SearchType::Standard
        );
    }

    #[test]
    fn closure_estimator_is_clamped() {
        let m = SpectralMatch::new("a", 1, 1.0, "trypsin")
            .with_hypothesis(Hypothesis::target("PEPTIDE"));
        let estimator = |c: &[&SpectralMatch], _: &PepContext<'_>| {
            Ok(PepEstimate {
                posterior_errors: c.iter().map(|_| 1.5).collect(),
                diagnostics: diagnostics(),
            })
        };
        let estimate = checked_estimate(&estimator, &[&m, &m], &context()).unwrap();
        assert_eq!(estimate.posterior_errors, vec![1.0, 1.0]);
    }

    #[test]
    fn wrong_length_is_an_error() {
        let m = SpectralMatch::new("a", 1, 1.0, "trypsin");
        let estimator = |_: &[&SpectralMatch], _: &PepContext<'_>| {
            Ok(PepEstimate {
                posterior_errors: vec![0.5],
                diagnostics: diagnostics(),
            })
        };
        match checked_estimate(&estimator, &[&m, &m], &context()) {
            Err(Error::EstimateLength { expected, found }) => {
                assert_eq!((expected, found), (2, 1));
            }
            _ => panic!("expected a length error"),
        }
    }
}
