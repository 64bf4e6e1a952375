//! Posterior error probabilities from a non-parametric model of the
//! discriminant score distribution.
//!
//! Target and decoy score densities are estimated with Gaussian kernels.
//! The PEP is evaluated on a fixed grid of scores and linearly interpolated
//! between grid points, which keeps the cost independent of the number of
//! matches being scored.
//!
//! Käll, 2008 [https://pubmed.ncbi.nlm.nih.gov/18052118/]

use super::*;
use rayon::prelude::*;

pub struct Kde<'a> {
    sample: &'a [f64],
    pub bandwidth: f64,
    constant: f64,
}

impl<'a> Kde<'a> {
    /// Gaussian KDE with Silverman's rule-of-thumb bandwidth. A sample with
    /// no spread falls back to `fallback_bandwidth`.
    pub fn new(sample: &'a [f64], fallback_bandwidth: f64) -> Self {
        let factor = 4. / 3.;
        let exponent = 1. / 5.;
        let sigma = std(sample);
        let mut bandwidth = sigma * (factor / sample.len() as f64).powf(exponent);
        if !(bandwidth > 0.0 && bandwidth.is_finite()) {
            bandwidth = fallback_bandwidth;
        }
        let constant = (2.0 * std::f64::consts::PI).sqrt() * bandwidth * sample.len() as f64;
        Self {
            sample,
            bandwidth,
            constant,
        }
    }

    fn kernel(&self, x: f64) -> f64 {
        (-0.5 * x.powi(2)).exp()
    }

    pub fn pdf(&self, x: f64) -> f64 {
        let h = self.bandwidth;

        let sum = self
            .sample
            .iter()
            .map(|xi| self.kernel((x - xi) / h))
            .sum::<f64>();

        sum / self.constant
    }
}

pub struct Builder {
    bins: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self { bins: 1000 }
    }
}

impl Builder {
    pub fn bins(mut self, bins: usize) -> Self {
        self.bins = bins.max(2);
        self
    }

    /// Fit target and decoy densities.
    ///
    /// # Invariants
    /// * `scores` and `decoys` have the same length
    /// * both classes are present
    pub fn build(self, scores: &[f64], decoys: &[bool]) -> Estimator {
        let d = scores
            .par_iter()
            .zip(decoys)
            .filter(|&(_, d)| *d)
            .map(|(s, _)| *s)
            .collect::<Vec<_>>();

        let t = scores
            .par_iter()
            .zip(decoys)
            .filter(|&(_, d)| !*d)
            .map(|(s, _)| *s)
            .collect::<Vec<_>>();

        let mut min_score = f64::MAX;
        let mut max_score = f64::MIN;
        for s in scores {
            min_score = min_score.min(*s);
            max_score = max_score.max(*s);
        }

        // P(decoy)
        let pi = d.len() as f64 / scores.len() as f64;

        if max_score <= min_score {
            return Estimator {
                bins: vec![pi],
                min_score,
                score_step: 0.0,
                bandwidth: 0.0,
            };
        }

        let score_step = (max_score - min_score) / (self.bins - 1) as f64;
        let decoy = Kde::new(&d, score_step);
        let target = Kde::new(&t, score_step);

        // Essentially, np.linspace(scores.min(), scores.max(), bins)
        let mut bins = (0..self.bins)
            .into_par_iter()
            .map(|bin| {
                let score = (bin as f64 * score_step) + min_score;
                let decoy = decoy.pdf(score) * pi;
                let target = target.pdf(score) * (1.0 - pi);
                match decoy + target {
                    total if total > 0.0 => decoy / total,
                    _ => pi,
                }
            })
            .collect::<Vec<_>>();

        // PEP is non-increasing as score increases
        let mut acc = 0.0f64;
        for x in bins.iter_mut().rev() {
            acc = acc.max(*x);
            *x = acc;
        }

        log::trace!(
            "- kde bandwidths: target {:.4}, decoy {:.4}",
            target.bandwidth,
            decoy.bandwidth
        );

        Estimator {
            bins,
            min_score,
            score_step,
            bandwidth: target.bandwidth,
        }
    }
}

pub struct Estimator {
    bins: Vec<f64>,
    min_score: f64,
    score_step: f64,
    /// Kernel bandwidth of the target density
    pub bandwidth: f64,
}

impl Estimator {
    pub fn fit(scores: &[f64], decoys: &[bool]) -> Estimator {
        Builder::default().build(scores, decoys)
    }

    /// Calculate the posterior error probability for a given score, under the
    /// pre-fit non-parametric probability model. Scores outside of the fitted
    /// range take the value of the nearest grid point.
    pub fn posterior_error(&self, score: f64) -> f64 {
        if self.score_step <= 0.0 || score <= self.min_score {
            return self.bins[0].clamp(0.0, 1.0);
        }
        let last = self.bins.len() - 1;
        let bin_lo = last.min(((score - self.min_score) / self.score_step).floor() as usize);
        let bin_hi = last.min(bin_lo + 1);

        let lower = self.bins[bin_lo];
        let upper = self.bins[bin_hi];

        // What fraction of the way to the higher bin are we?
        let bin_lo_score = bin_lo as f64 * self.score_step + self.min_score;
        let linear = ((score - bin_lo_score) / self.score_step).min(1.0);

        (lower + (upper - lower) * linear).clamp(0.0, 1.0)
    }
}
