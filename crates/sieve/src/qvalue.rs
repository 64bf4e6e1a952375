//! Target-decoy q-value assignment over a ranked list of matches.
//!
//! Two strategies are used depending on how many matches are ranked:
//! * `Traditional`: walk best to worst, q = running max of decoy / target
//! * `Inverted`: walk worst to best, q = running min of (decoy + 1) / target
//!
//! The +1 correction of the inverted strategy only makes sense once there
//! is enough data that it does not bias the tail of the curve.

use crate::cancel::Cancellation;
use crate::psm::{Granularity, SpectralMatch};

/// Matches ranked below this many use the traditional strategy
pub const LARGE_SAMPLE_THRESHOLD: usize = 1000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    Traditional,
    Inverted,
}

impl Strategy {
    pub fn select(len: usize, threshold: usize, force_inverted: bool) -> Self {
        if force_inverted || len >= threshold {
            Strategy::Inverted
        } else {
            Strategy::Traditional
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct QValueParameters {
    pub num_notches: usize,
    pub granularity: Granularity,
    pub strategy: Strategy,
    /// Compute `pep_q_value` instead of `q_value`/`q_value_notch`
    pub use_pep: bool,
}

/// Whether a traversal ran to the end
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Complete,
    Cancelled,
}

impl Completion {
    pub fn is_complete(self) -> bool {
        self == Completion::Complete
    }
}

/// Assign cumulative counts and q-values in place.
///
/// # Invariants
/// * `order` holds indices into `matches`, best match first. Matches not
///   listed in `order` are left untouched.
///
/// # Panics
/// * If a match has `notch > num_notches`
pub fn compute_q_values(
    matches: &mut [SpectralMatch],
    order: &[usize],
    parameters: &QValueParameters,
    cancel: &Cancellation,
) -> Completion {
    if order.is_empty() {
        return Completion::Complete;
    }

    let totals = match cumulative_counts(matches, order, parameters, cancel) {
        Some(totals) => totals,
        None => return Completion::Cancelled,
    };

    if parameters.use_pep {
        return pep_q_values(matches, order, parameters.granularity, cancel);
    }

    match parameters.strategy {
        Strategy::Traditional => traditional(matches, order, parameters, cancel),
        Strategy::Inverted => inverted(matches, order, parameters, &totals, cancel),
    }
}

/// Decoy totals over the whole traversal, overall and per notch
struct Totals {
    decoy: f64,
    decoy_notch: Vec<f64>,
}

impl Totals {
    fn no_decoys(&self, notch: Option<usize>) -> bool {
        match notch {
            None => self.decoy == 0.0,
            Some(n) => self.decoy_notch[n] == 0.0,
        }
    }
}

fn cumulative_counts(
    matches: &mut [SpectralMatch],
    order: &[usize],
    parameters: &QValueParameters,
    cancel: &Cancellation,
) -> Option<Totals> {
    let notches = parameters.num_notches + 1;
    let mut target = 0.0;
    let mut decoy = 0.0;
    let mut target_notch = vec![0.0; notches];
    let mut decoy_notch = vec![0.0; notches];

    for &ix in order {
        if cancel.is_cancelled() {
            return None;
        }
        let m = &mut matches[ix];
        let notch = m.notch.unwrap_or(parameters.num_notches);

        if m.is_decoy() {
            let weight = m.decoy_weight();
            decoy += weight;
            decoy_notch[notch] += weight;
        } else {
            target += 1.0;
            target_notch[notch] += 1.0;
        }

        let info = m.fdr_mut(parameters.granularity);
        info.cumulative_target = target;
        info.cumulative_decoy = decoy;
        info.cumulative_target_notch = target_notch[notch];
        info.cumulative_decoy_notch = decoy_notch[notch];
    }

    Some(Totals { decoy, decoy_notch })
}

fn traditional(
    matches: &mut [SpectralMatch],
    order: &[usize],
    parameters: &QValueParameters,
    cancel: &Cancellation,
) -> Completion {
    let mut q_value = 0.0f64;
    let mut q_notch = vec![0.0f64; parameters.num_notches + 1];

    for &ix in order {
        if cancel.is_cancelled() {
            return Completion::Cancelled;
        }
        let m = &mut matches[ix];
        let notch = m.notch.unwrap_or(parameters.num_notches);
        let info = m.fdr_mut(parameters.granularity);

        q_value = q_value.max(info.cumulative_decoy / info.cumulative_target.max(1.0));
        q_notch[notch] = q_notch[notch]
            .max(info.cumulative_decoy_notch / info.cumulative_target_notch.max(1.0));

        info.q_value = q_value.min(1.0);
        info.q_value_notch = q_notch[notch].min(1.0);
    }
    Completion::Complete
}

fn inverted(
    matches: &mut [SpectralMatch],
    order: &[usize],
    parameters: &QValueParameters,
    totals: &Totals,
    cancel: &Cancellation,
) -> Completion {
    let corrected = |decoy: f64, target: f64| (decoy + 1.0) / target.max(1.0);

    let worst = matches[order[order.len() - 1]].fdr(parameters.granularity);
    let mut q_value = corrected(worst.cumulative_decoy, worst.cumulative_target);
    let mut q_notch: Vec<Option<f64>> = vec![None; parameters.num_notches + 1];

    for &ix in order.iter().rev() {
        if cancel.is_cancelled() {
            return Completion::Cancelled;
        }
        let m = &mut matches[ix];
        let notch = m.notch.unwrap_or(parameters.num_notches);
        let info = m.fdr_mut(parameters.granularity);

        q_value = q_value.min(corrected(info.cumulative_decoy, info.cumulative_target));

        let local = corrected(info.cumulative_decoy_notch, info.cumulative_target_notch);
        let notch_q = q_notch[notch].get_or_insert(local);
        *notch_q = notch_q.min(local);

        info.q_value = match totals.no_decoys(None) {
            true => 0.0,
            false => q_value.min(1.0),
        };
        info.q_value_notch = match totals.no_decoys(Some(notch)) {
            true => 0.0,
            false => notch_q.min(1.0),
        };
    }
    Completion::Complete
}

/// Inverted q-value over a PEP-ranked list. The target count is not floored
/// at 1: a tail consisting only of decoys yields an infinite ratio, which the
/// running minimum and the final cap at 1.0 absorb.
fn pep_q_values(
    matches: &mut [SpectralMatch],
    order: &[usize],
    granularity: Granularity,
    cancel: &Cancellation,
) -> Completion {
    let mut q_value = f64::INFINITY;
    for &ix in order.iter().rev() {
        if cancel.is_cancelled() {
            return Completion::Cancelled;
        }
        let info = matches[ix].fdr_mut(granularity);
        q_value = q_value.min((info.cumulative_decoy + 1.0) / info.cumulative_target);
        info.pep_q_value = q_value.min(1.0);
    }
    Completion::Complete
}

/// Number of target matches in `order` with a q-value at or below `threshold`
pub fn count_passing(
    matches: &[SpectralMatch],
    order: &[usize],
    granularity: Granularity,
    threshold: f64,
) -> usize {
    order
        .iter()
        .map(|&ix| &matches[ix])
        .filter(|m| !m.is_decoy() && m.fdr(granularity).q_value <= threshold)
        .count()
}
