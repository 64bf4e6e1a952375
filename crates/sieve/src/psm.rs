use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;

/// One of the equally best-scoring sequence explanations for a spectrum
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hypothesis {
    /// Modified sequence, e.g. `PEPTM[Oxidation]IDE`
    pub full_sequence: String,
    pub decoy: bool,
}

impl Hypothesis {
    pub fn target<S: Into<String>>(full_sequence: S) -> Self {
        Self {
            full_sequence: full_sequence.into(),
            decoy: false,
        }
    }

    pub fn decoy<S: Into<String>>(full_sequence: S) -> Self {
        Self {
            full_sequence: full_sequence.into(),
            decoy: true,
        }
    }
}

/// Which statistics block of a match is being read or written
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Granularity {
    Psm,
    Peptide,
}

/// Target-decoy statistics for a match at one granularity
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct FdrInfo {
    /// Number of targets ranked at or above this match
    pub cumulative_target: f64,
    /// Weighted number of decoys ranked at or above this match
    pub cumulative_decoy: f64,
    /// Same as `cumulative_target`, restricted to this match's notch
    pub cumulative_target_notch: f64,
    /// Same as `cumulative_decoy`, restricted to this match's notch
    pub cumulative_decoy_notch: f64,
    pub q_value: f64,
    pub q_value_notch: f64,
    /// Posterior error probability, if a model has been applied
    pub pep: Option<f64>,
    /// Q-value computed over matches ranked by PEP
    pub pep_q_value: f64,
}

const UNSET: FdrInfo = FdrInfo {
    cumulative_target: 0.0,
    cumulative_decoy: 0.0,
    cumulative_target_notch: 0.0,
    cumulative_decoy_notch: 0.0,
    q_value: 1.0,
    q_value_notch: 1.0,
    pep: None,
    pep_q_value: 1.0,
};

impl Default for FdrInfo {
    fn default() -> Self {
        UNSET
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
/// A scored candidate match between an observed spectrum and one or more
/// sequence hypotheses
pub struct SpectralMatch {
    /// Raw file the spectrum was acquired in
    pub file: String,
    /// Scan number of the spectrum within `file`
    pub scan: usize,
    /// Search engine score, higher is better
    pub score: f64,
    /// Difference between this score and the runner-up candidate
    pub delta_score: f64,
    /// Precursor mass error in ppm
    pub precursor_ppm: f64,
    /// Precursor mass tolerance bin this match fell in, if any
    pub notch: Option<usize>,
    /// Protease (or "top-down") used to generate the searched sequences
    pub digestion_agent: String,
    /// Best-scoring hypotheses, tied at `score`
    pub hypotheses: Vec<Hypothesis>,
    /// Match produced by a crosslink search
    pub crosslink: bool,
    /// Additional engine-specific features, used when training PEP models
    pub features: Vec<f64>,
    /// Number of confident PSMs sharing this match's full sequence
    pub psm_count: usize,

    pub psm_fdr: Option<FdrInfo>,
    pub peptide_fdr: Option<FdrInfo>,
}

impl SpectralMatch {
    pub fn new<F, D>(file: F, scan: usize, score: f64, digestion_agent: D) -> Self
    where
        F: Into<String>,
        D: Into<String>,
    {
        Self {
            file: file.into(),
            scan,
            score,
            digestion_agent: digestion_agent.into(),
            ..Default::default()
        }
    }

    pub fn with_hypothesis(mut self, hypothesis: Hypothesis) -> Self {
        self.hypotheses.push(hypothesis);
        self
    }

    pub fn with_notch(mut self, notch: Option<usize>) -> Self {
        self.notch = notch;
        self
    }

    /// True if any of the tied hypotheses is a decoy
    pub fn is_decoy(&self) -> bool {
        self.hypotheses.iter().any(|h| h.decoy)
    }

    /// Fraction of tied hypotheses that are decoys. A match explained by one
    /// target and one decoy sequence contributes half a decoy.
    pub fn decoy_weight(&self) -> f64 {
        if self.hypotheses.is_empty() {
            return 0.0;
        }
        let decoys = self.hypotheses.iter().filter(|h| h.decoy).count();
        decoys as f64 / self.hypotheses.len() as f64
    }

    /// The full sequence, if every tied hypothesis agrees on it
    pub fn full_sequence(&self) -> Option<&str> {
        let (first, rest) = self.hypotheses.split_first()?;
        rest.iter()
            .all(|h| h.full_sequence == first.full_sequence)
            .then(|| first.full_sequence.as_str())
    }

    /// Key used to collapse matches into peptides. Ambiguous matches are
    /// keyed by all of their distinct sequences.
    pub fn peptide_key(&self) -> Cow<'_, str> {
        match self.full_sequence() {
            Some(seq) => Cow::Borrowed(seq),
            None => {
                let mut seqs = self
                    .hypotheses
                    .iter()
                    .map(|h| h.full_sequence.as_str())
                    .collect::<Vec<_>>();
                seqs.sort_unstable();
                seqs.dedup();
                Cow::Owned(seqs.join("|"))
            }
        }
    }

    /// Initialize any missing statistics blocks, leaving existing ones intact
    pub fn ensure_fdr(&mut self) {
        self.psm_fdr.get_or_insert_with(FdrInfo::default);
        self.peptide_fdr.get_or_insert_with(FdrInfo::default);
    }

    pub fn fdr(&self, granularity: Granularity) -> &FdrInfo {
        let block = match granularity {
            Granularity::Psm => &self.psm_fdr,
            Granularity::Peptide => &self.peptide_fdr,
        };
        block.as_ref().unwrap_or(&UNSET)
    }

    pub fn fdr_mut(&mut self, granularity: Granularity) -> &mut FdrInfo {
        let block = match granularity {
            Granularity::Psm => &mut self.psm_fdr,
            Granularity::Peptide => &mut self.peptide_fdr,
        };
        block.get_or_insert_with(FdrInfo::default)
    }

    pub fn pep(&self) -> Option<f64> {
        self.fdr(Granularity::Psm).pep
    }

    /// Store a posterior error probability on both statistics blocks
    pub fn assign_pep(&mut self, pep: f64) {
        self.fdr_mut(Granularity::Psm).pep = Some(pep);
        self.fdr_mut(Granularity::Peptide).pep = Some(pep);
    }
}

/// Default ranking of matches: score descending, with ties broken by notch,
/// sequence and spectrum identity so that the order is total.
pub fn cmp_default(a: &SpectralMatch, b: &SpectralMatch) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.notch, b.notch) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.peptide_key().cmp(&b.peptide_key()))
        .then_with(|| a.file.cmp(&b.file))
        .then_with(|| a.scan.cmp(&b.scan))
}

/// Ranking by posterior error probability ascending, falling back to the
/// default ranking. Matches without a PEP sort as if PEP were 1.
pub fn cmp_pep(a: &SpectralMatch, b: &SpectralMatch) -> Ordering {
    let pa = a.pep().unwrap_or(1.0);
    let pb = b.pep().unwrap_or(1.0);
    pa.total_cmp(&pb).then_with(|| cmp_default(a, b))
}
