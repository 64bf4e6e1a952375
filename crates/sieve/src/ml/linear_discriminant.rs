//! Linear Discriminant Analysis for PEP estimation
//!
//! Candidate features are projected onto the direction that best separates
//! targets from decoys, and the resulting discriminant score is turned into
//! a posterior error probability by the kernel density model in [`super::kde`].

use super::gauss;
use super::kde;
use super::matrix::Matrix;
use crate::pep::{PepContext, PepDiagnostics, PepEstimate, PepEstimator};
use crate::psm::SpectralMatch;
use crate::Error;
use fnv::FnvHashMap;
use rayon::prelude::*;

pub struct LinearDiscriminantAnalysis {
    eigenvector: Vec<f64>,
}

impl LinearDiscriminantAnalysis {
    pub fn train(features: &Matrix, decoy: &[bool]) -> Option<LinearDiscriminantAnalysis> {
        assert_eq!(features.rows, decoy.len());

        let x_bar = features.mean();
        let mut scatter_within = Matrix::zeros(features.cols, features.cols);
        let mut scatter_between = Matrix::zeros(features.cols, features.cols);

        let mut class_means = Vec::new();

        for class in [true, false] {
            let count = decoy.iter().filter(|&label| *label == class).count();
            if count == 0 {
                return None;
            }

            let class_data = (0..features.rows)
                .zip(decoy)
                .filter(|&(_, label)| *label == class)
                .flat_map(|(row, _)| features.row(row))
                .collect::<Vec<_>>();

            let mut class_data = Matrix::new(class_data, count, features.cols);
            let class_mean = class_data.mean();

            for row in 0..class_data.rows {
                for col in 0..class_data.cols {
                    class_data[(row, col)] -= class_mean[col];
                }
            }

            scatter_within += class_data.transpose().dot(&class_data);

            let diff = Matrix::col_vector(
                class_mean
                    .iter()
                    .zip(x_bar.iter())
                    .map(|(x, y)| x - y)
                    .collect::<Vec<_>>(),
            );

            scatter_between += diff.dot(&diff.transpose());
            class_means.extend(class_mean);
        }

        // Overall mean is the starting vector for power iteration
        let mut evec =
            gauss::solve(scatter_within, scatter_between).map(|mat| mat.power_method(&x_bar))?;

        // Power iteration may return the eigenvector with its sign flipped:
        // orient it so that targets score higher than decoys
        let class_means = Matrix::new(class_means, 2, features.cols);
        let coef = class_means.dotv(&evec);
        if coef[1] < coef[0] {
            evec.iter_mut().for_each(|c| *c *= -1.0);
        }

        log::trace!("- linear model fit with eigenvector: {:?}", evec);

        Some(LinearDiscriminantAnalysis { eigenvector: evec })
    }

    pub fn score(&self, features: &Matrix) -> Vec<f64> {
        features.dotv(&self.eigenvector)
    }

    pub fn weights(&self) -> &[f64] {
        &self.eigenvector
    }
}

/// Built-in PEP model: linear discriminant over match features, followed by a
/// kernel density estimate of target and decoy discriminant scores
#[derive(Copy, Clone, Debug)]
pub struct DiscriminantPep {
    bins: usize,
}

impl Default for DiscriminantPep {
    fn default() -> Self {
        Self { bins: 1000 }
    }
}

impl DiscriminantPep {
    /// Number of grid points the PEP curve is evaluated on
    pub fn bins(mut self, bins: usize) -> Self {
        self.bins = bins.max(2);
        self
    }

    fn features(candidates: &[&SpectralMatch], context: &PepContext<'_>) -> Matrix {
        let tolerances = context
            .file_parameters
            .iter()
            .map(|p| (p.file.as_str(), p.precursor_tolerance_ppm))
            .collect::<FnvHashMap<_, _>>();

        // Caller-supplied features are padded/truncated to the first candidate's width
        let extra = candidates.first().map(|m| m.features.len()).unwrap_or(0);
        let width = 4 + extra;

        let data = candidates
            .par_iter()
            .flat_map_iter(|m| {
                let tolerance = tolerances
                    .get(m.file.as_str())
                    .copied()
                    .filter(|tol| *tol > 0.0)
                    .unwrap_or(1.0);
                [
                    m.score,
                    m.delta_score,
                    m.precursor_ppm.abs() / tolerance,
                    m.notch.map(|n| n as f64).unwrap_or(-1.0),
                ]
                .into_iter()
                .chain((0..extra).map(move |ix| m.features.get(ix).copied().unwrap_or(0.0)))
            })
            .map(|x| if x.is_finite() { x } else { 0.0 })
            .collect::<Vec<_>>();

        Matrix::new(data, candidates.len(), width)
    }
}

impl PepEstimator for DiscriminantPep {
    fn estimate(
        &self,
        candidates: &[&SpectralMatch],
        context: &PepContext<'_>,
    ) -> Result<PepEstimate, Error> {
        log::trace!(
            "fitting PEP model for {} candidates ({})",
            candidates.len(),
            context.digestion_agent
        );

        let decoys = candidates.iter().map(|m| m.is_decoy()).collect::<Vec<_>>();
        let training_decoys = decoys.iter().filter(|&&d| d).count();
        let training_targets = decoys.len() - training_decoys;

        let mut diagnostics = PepDiagnostics {
            search_type: context.search_type,
            digestion_agent: context.digestion_agent.to_string(),
            training_targets,
            training_decoys,
            bandwidth: 0.0,
            weights: Vec::new(),
            fallback: false,
        };

        let posterior_errors = if training_decoys == 0 || training_targets == 0 {
            log::warn!(
                "{}: cannot fit PEP model with {} targets and {} decoys",
                context.digestion_agent,
                training_targets,
                training_decoys
            );
            diagnostics.fallback = true;
            let pep = if training_decoys == 0 { 0.0 } else { 1.0 };
            vec![pep; candidates.len()]
        } else {
            let features = Self::features(candidates, context);
            let discriminants = match LinearDiscriminantAnalysis::train(&features, &decoys) {
                Some(lda) if lda.weights().iter().all(|w| w.is_finite()) => {
                    let scores = lda.score(&features);
                    diagnostics.weights = lda.weights().to_vec();
                    scores
                }
                _ => {
                    log::warn!(
                        "{}: linear model fitting failed, falling back to raw score",
                        context.digestion_agent
                    );
                    diagnostics.fallback = true;
                    candidates.iter().map(|m| m.score).collect()
                }
            };

            let kde = kde::Builder::default()
                .bins(self.bins)
                .build(&discriminants, &decoys);
            diagnostics.bandwidth = kde.bandwidth;

            discriminants
                .par_iter()
                .map(|score| kde.posterior_error(*score))
                .collect()
        };

        if let Some(folder) = context.output_folder {
            let name = format!(
                "{}_{}_pep_model.json",
                context.analysis_type, context.digestion_agent
            )
            .chars()
            .map(|c| match c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                true => c,
                false => '_',
            })
            .collect::<String>();
            std::fs::create_dir_all(folder)?;
            let bytes = serde_json::to_vec_pretty(&diagnostics)?;
            std::fs::write(folder.join(name), bytes)?;
        }

        Ok(PepEstimate {
            posterior_errors,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ml::*;
    use crate::pep::SearchType;
    use crate::psm::Hypothesis;

    #[test]
    fn linear_discriminant() {
        let a = Matrix::new([1., 2., 3., 4.], 2, 2);
        let eigenvector = [0.4159736, 0.90937671];
        assert!(all_close(
            &a.power_method(&[0.54, 0.34]),
            &eigenvector,
            1E-5
        ));

        #[rustfmt::skip]
        let feats = Matrix::new(
            [
                5., 4., 3., 2.,
                4., 5., 4., 3.,
                6., 3., 4., 5.,
                1., 0., 2., 9.,
                5., 4., 4., 3.,
                2., 1., 1., 9.5,
                1., 0., 2., 8.,
                3., 2., -2., 10.,
            ],
            8,
            4,
        );

        let lda = LinearDiscriminantAnalysis::train(
            &feats,
            &[false, false, false, true, false, true, true, true],
        )
        .expect("error training LDA");

        let mut scores = lda.score(&feats);
        let norm = norm(&scores);
        scores = scores.into_iter().map(|s| s / norm).collect();

        let expected = [
            0.49706043,
            0.48920177,
            0.48920177,
            -0.07209359,
            0.51204672,
            -0.02849527,
            -0.04924864,
            -0.06055943,
        ];

        assert!(
            all_close(&scores, &expected, 1E-6),
            "{:?} {:?}",
            scores,
            expected
        );
    }

    #[test]
    fn single_class_cannot_train() {
        let feats = Matrix::new([1., 2., 3., 4.], 2, 2);
        assert!(LinearDiscriminantAnalysis::train(&feats, &[false, false]).is_none());
    }

    fn synthetic(n: usize) -> Vec<SpectralMatch> {
        (0..n)
            .map(|i| {
                let decoy = i % 3 == 0;
                let jitter = ((i * 7919) % 100) as f64 / 50.0;
                let score = if decoy { 5.0 + jitter } else { 12.0 + jitter };
                let seq = format!("SEQ{}K", i);
                let mut m = SpectralMatch::new("a.mzML", i, score, "trypsin").with_hypothesis(
                    match decoy {
                        true => Hypothesis::decoy(seq),
                        false => Hypothesis::target(seq),
                    },
                );
                m.delta_score = ((i * 31) % 17) as f64 / 10.0;
                m.precursor_ppm = if decoy { 8.0 - jitter } else { 1.0 + jitter };
                m.features = vec![(i % 5) as f64];
                m
            })
            .collect()
    }

    fn context(folder: Option<&std::path::Path>) -> PepContext<'_> {
        PepContext {
            search_type: SearchType::Standard,
            digestion_agent: "trypsin",
            analysis_type: "PSM",
            file_parameters: &[],
            output_folder: folder,
        }
    }

    #[test]
    fn separates_targets_from_decoys() {
        let matches = synthetic(300);
        let candidates = matches.iter().collect::<Vec<_>>();
        let estimate = DiscriminantPep::default()
            .estimate(&candidates, &context(None))
            .expect("estimation succeeds");

        assert_eq!(estimate.posterior_errors.len(), 300);
        assert_eq!(estimate.diagnostics.training_decoys, 100);
        assert_eq!(estimate.diagnostics.training_targets, 200);
        assert!(estimate
            .posterior_errors
            .iter()
            .all(|p| (0.0..=1.0).contains(p)));

        let mean = |decoy: bool| {
            let v = matches
                .iter()
                .zip(&estimate.posterior_errors)
                .filter(|(m, _)| m.is_decoy() == decoy)
                .map(|(_, p)| *p)
                .collect::<Vec<_>>();
            crate::ml::mean(&v)
        };
        assert!(mean(false) < 0.1, "{}", mean(false));
        assert!(mean(true) > 0.9, "{}", mean(true));
    }

    #[test]
    fn no_decoys() {
        let matches = synthetic(30)
            .into_iter()
            .filter(|m| !m.is_decoy())
            .collect::<Vec<_>>();
        let candidates = matches.iter().collect::<Vec<_>>();
        let estimate = DiscriminantPep::default()
            .estimate(&candidates, &context(None))
            .unwrap();
        assert!(estimate.diagnostics.fallback);
        assert!(estimate.posterior_errors.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn writes_diagnostics() {
        let folder = std::env::temp_dir().join(format!("sieve-lda-{}", std::process::id()));
        let matches = synthetic(60);
        let candidates = matches.iter().collect::<Vec<_>>();
        DiscriminantPep::default()
            .bins(100)
            .estimate(&candidates, &context(Some(&folder)))
            .unwrap();

        let path = folder.join("PSM_trypsin_pep_model.json");
        let written: PepDiagnostics = crate::read_json(&path).unwrap();
        assert_eq!(written.training_targets, 40);
        std::fs::remove_dir_all(&folder).ok();
    }
}
