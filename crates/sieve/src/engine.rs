//! FDR analysis over a set of candidate matches.
//!
//! Matches are partitioned by digestion agent, and each partition goes
//! through the same three stages:
//! 1. `Provisional`: q-values under the default (score) ranking
//! 2. `PepTrained`: optional PEP model, and q-values over the PEP ranking
//! 3. `Final`: authoritative q-values under the final ranking
//!
//! Partitions never share matches, so they are processed in parallel.

use crate::cancel::Cancellation;
use crate::pep::{checked_estimate, FileParameters, PepContext, PepDiagnostics, PepEstimate};
use crate::pep::{PepEstimator, SearchType};
use crate::psm::{cmp_default, cmp_pep, Granularity, SpectralMatch};
use crate::qvalue::{self, Completion, QValueParameters, Strategy, LARGE_SAMPLE_THRESHOLD};
use crate::Error;
use fnv::{FnvHashMap, FnvHashSet};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
/// Parameters used for an FDR analysis, all optional except for
/// `file_parameters`
pub struct Builder {
    /// Number of precursor mass notches searched
    pub num_notches: Option<usize>,
    /// Label used in logs and diagnostic file names, e.g. "PSM" or "crosslink"
    pub analysis_type: Option<String>,
    /// Train a PEP model when there is enough data
    pub do_pep: Option<bool>,
    /// Directory that PEP model diagnostics are written to
    pub output_folder: Option<PathBuf>,
    /// Rankings at least this long are considered large samples
    pub large_sample_threshold: Option<usize>,
    /// Treat every ranking as a large sample. Only useful for small test sets
    pub force_large_sample: Option<bool>,
    /// Q-value used for PSM counting and reporting
    pub q_value_threshold: Option<f64>,
    pub file_parameters: Option<Vec<FileParameters>>,
}

impl Builder {
    pub fn make_parameters(self) -> Result<Parameters, Error> {
        Ok(Parameters {
            num_notches: self.num_notches.unwrap_or(0),
            analysis_type: self.analysis_type.unwrap_or_else(|| "PSM".into()),
            do_pep: self.do_pep.unwrap_or(true),
            output_folder: self.output_folder,
            large_sample_threshold: self
                .large_sample_threshold
                .unwrap_or(LARGE_SAMPLE_THRESHOLD),
            force_large_sample: self.force_large_sample.unwrap_or(false),
            q_value_threshold: self.q_value_threshold.unwrap_or(0.01),
            file_parameters: self
                .file_parameters
                .ok_or(Error::MissingParameter("file_parameters"))?,
        })
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Parameters {
    pub num_notches: usize,
    pub analysis_type: String,
    pub do_pep: bool,
    pub output_folder: Option<PathBuf>,
    pub large_sample_threshold: usize,
    pub force_large_sample: bool,
    pub q_value_threshold: f64,
    pub file_parameters: Vec<FileParameters>,
}

impl Parameters {
    /// Is a ranking of `n` matches large enough for the inverted q-value
    /// strategy and for PEP training?
    pub fn is_large(&self, n: usize) -> bool {
        self.force_large_sample || n >= self.large_sample_threshold
    }

    pub fn strategy(&self, n: usize) -> Strategy {
        Strategy::select(n, self.large_sample_threshold, self.force_large_sample)
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Provisional,
    PepTrained,
    Final,
}

/// Where the PEP values of a partition came from
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq)]
pub enum PepLevel {
    None,
    /// Model trained on one representative per peptide
    Peptide,
    /// Model trained on all PSMs
    Psm,
    /// PEP values already present on the matches were reused
    Reused,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PartitionReport {
    pub digestion_agent: String,
    pub psms: usize,
    pub peptides: usize,
    pub passing_psms: usize,
    pub passing_peptides: usize,
    /// Last stage that ran to completion
    pub stage: Stage,
    pub pep: PepLevel,
}

#[derive(Serialize, Clone, Debug)]
pub struct AnalysisResult {
    pub analysis_type: String,
    /// Target PSMs at or below the q-value threshold, over all partitions
    pub passing_psms: usize,
    pub partitions: Vec<PartitionReport>,
    pub diagnostics: Vec<PepDiagnostics>,
    /// False if the analysis was cancelled. Statistics of an incomplete
    /// analysis must not be used.
    pub complete: bool,
}

pub struct FdrAnalysis<'a> {
    matches: &'a mut [SpectralMatch],
    parameters: Parameters,
    estimator: &'a dyn PepEstimator,
    cancel: Cancellation,
}

impl<'a> FdrAnalysis<'a> {
    pub fn new(
        matches: &'a mut [SpectralMatch],
        parameters: Parameters,
        estimator: &'a dyn PepEstimator,
        cancel: Cancellation,
    ) -> Result<Self, Error> {
        if let Some(notch) = matches
            .iter()
            .filter_map(|m| m.notch)
            .find(|&notch| notch > parameters.num_notches)
        {
            return Err(Error::NotchOutOfRange {
                notch,
                num_notches: parameters.num_notches,
            });
        }

        matches.iter_mut().for_each(SpectralMatch::ensure_fdr);

        Ok(Self {
            matches,
            parameters,
            estimator,
            cancel,
        })
    }

    /// Run the analysis, leaving `matches` sorted by digestion agent (in
    /// order of first appearance) and then by the default ranking
    pub fn run(self) -> Result<AnalysisResult, Error> {
        let FdrAnalysis {
            matches,
            parameters,
            estimator,
            cancel,
        } = self;

        if cancel.is_cancelled() {
            log::warn!("FDR analysis cancelled before it started");
            return Ok(AnalysisResult {
                analysis_type: parameters.analysis_type,
                passing_psms: 0,
                partitions: Vec::new(),
                diagnostics: Vec::new(),
                complete: false,
            });
        }

        let partitions = split_partitions(matches)
            .into_par_iter()
            .map(|matches| -> Result<_, Error> {
                let mut partition = Partition::new(matches, &parameters, estimator, &cancel);
                let completion = partition.analyze()?;
                Ok((partition.report(), partition.diagnostics, completion))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let complete = partitions.iter().all(|(_, _, c)| c.is_complete());
        let mut result = AnalysisResult {
            analysis_type: parameters.analysis_type.clone(),
            passing_psms: 0,
            partitions: Vec::with_capacity(partitions.len()),
            diagnostics: Vec::new(),
            complete,
        };

        for (report, diagnostics, _) in partitions {
            result.passing_psms += report.passing_psms;
            result.partitions.push(report);
            result.diagnostics.extend(diagnostics);
        }

        if complete {
            log::info!(
                "discovered {} target peptide-spectrum matches at {}% FDR",
                result.passing_psms,
                parameters.q_value_threshold * 100.0
            );
        } else {
            log::warn!("FDR analysis was cancelled, results are incomplete");
        }

        Ok(result)
    }
}

/// Sort `matches` by digestion agent and default ranking, and split them into
/// one disjoint slice per digestion agent
fn split_partitions(matches: &mut [SpectralMatch]) -> Vec<&mut [SpectralMatch]> {
    let mut rank: FnvHashMap<String, usize> = FnvHashMap::default();
    for m in matches.iter() {
        let next = rank.len();
        rank.entry(m.digestion_agent.clone()).or_insert(next);
    }

    matches.par_sort_by(|a, b| {
        rank[a.digestion_agent.as_str()]
            .cmp(&rank[b.digestion_agent.as_str()])
            .then_with(|| cmp_default(a, b))
    });

    let mut partitions = Vec::with_capacity(rank.len());
    let mut rest = matches;
    while let Some(first) = rest.first() {
        let agent = &first.digestion_agent;
        let len = rest
            .iter()
            .take_while(|m| &m.digestion_agent == agent)
            .count();
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(len);
        partitions.push(head);
        rest = tail;
    }
    partitions
}

/// Indices of the first match for each peptide, in `order`
fn representatives(matches: &[SpectralMatch], order: &[usize]) -> Vec<usize> {
    let mut seen = FnvHashSet::default();
    order
        .iter()
        .copied()
        .filter(|&ix| seen.insert(matches[ix].peptide_key().into_owned()))
        .collect()
}

macro_rules! proceed {
    ($completion:expr) => {
        if !$completion.is_complete() {
            return Ok(Completion::Cancelled);
        }
    };
}

struct Partition<'a, 'p> {
    matches: &'a mut [SpectralMatch],
    parameters: &'p Parameters,
    estimator: &'p dyn PepEstimator,
    cancel: &'p Cancellation,
    digestion_agent: String,
    peptides: usize,
    passing_psms: usize,
    passing_peptides: usize,
    stage: Stage,
    pep: PepLevel,
    diagnostics: Option<PepDiagnostics>,
}

impl<'a, 'p> Partition<'a, 'p> {
    fn new(
        matches: &'a mut [SpectralMatch],
        parameters: &'p Parameters,
        estimator: &'p dyn PepEstimator,
        cancel: &'p Cancellation,
    ) -> Self {
        let digestion_agent = matches
            .first()
            .map(|m| m.digestion_agent.clone())
            .unwrap_or_default();
        Self {
            matches,
            parameters,
            estimator,
            cancel,
            digestion_agent,
            peptides: 0,
            passing_psms: 0,
            passing_peptides: 0,
            stage: Stage::Provisional,
            pep: PepLevel::None,
            diagnostics: None,
        }
    }

    fn report(&self) -> PartitionReport {
        PartitionReport {
            digestion_agent: self.digestion_agent.clone(),
            psms: self.matches.len(),
            peptides: self.peptides,
            passing_psms: self.passing_psms,
            passing_peptides: self.passing_peptides,
            stage: self.stage,
            pep: self.pep,
        }
    }

    fn q_values(&mut self, order: &[usize], granularity: Granularity, use_pep: bool) -> Completion {
        let parameters = QValueParameters {
            num_notches: self.parameters.num_notches,
            granularity,
            strategy: self.parameters.strategy(order.len()),
            use_pep,
        };
        qvalue::compute_q_values(self.matches, order, &parameters, self.cancel)
    }

    /// Match indices ranked by PEP, then by default order
    fn pep_order(&self) -> Vec<usize> {
        let mut order = (0..self.matches.len()).collect::<Vec<_>>();
        order.sort_by(|&a, &b| cmp_pep(&self.matches[a], &self.matches[b]));
        order
    }

    fn estimate(&self, order: &[usize]) -> Result<PepEstimate, Error> {
        let candidates = order.iter().map(|&ix| &self.matches[ix]).collect::<Vec<_>>();
        let context = PepContext {
            search_type: SearchType::from_matches(candidates.iter().copied()),
            digestion_agent: &self.digestion_agent,
            analysis_type: &self.parameters.analysis_type,
            file_parameters: &self.parameters.file_parameters,
            output_folder: self.parameters.output_folder.as_deref(),
        };
        checked_estimate(self.estimator, &candidates, &context)
    }

    fn analyze(&mut self) -> Result<Completion, Error> {
        if self.cancel.is_cancelled() {
            return Ok(Completion::Cancelled);
        }

        // `matches` is already in default order
        let psm_order = (0..self.matches.len()).collect::<Vec<_>>();
        let peptide_order = representatives(self.matches, &psm_order);
        self.peptides = peptide_order.len();

        log::debug!(
            "{}: {} PSMs, {} peptides",
            self.digestion_agent,
            psm_order.len(),
            peptide_order.len()
        );

        proceed!(self.q_values(&peptide_order, Granularity::Peptide, false));
        proceed!(self.q_values(&psm_order, Granularity::Psm, false));

        // Reused PEP values take the same peptide/PSM split as training
        let peptide_level = self.parameters.is_large(peptide_order.len());

        if self.parameters.do_pep && self.parameters.is_large(psm_order.len()) {
            if peptide_level {
                let estimate = self.estimate(&peptide_order)?;
                let by_peptide = peptide_order
                    .iter()
                    .zip(&estimate.posterior_errors)
                    .map(|(&ix, &pep)| (self.matches[ix].peptide_key().into_owned(), pep))
                    .collect::<FnvHashMap<_, _>>();

                for m in self.matches.iter_mut() {
                    let pep = by_peptide.get(&*m.peptide_key()).copied();
                    if let Some(pep) = pep {
                        m.assign_pep(pep);
                    }
                }
                self.pep = PepLevel::Peptide;
                self.diagnostics = Some(estimate.diagnostics);
            } else {
                let estimate = self.estimate(&psm_order)?;
                for (&ix, &pep) in psm_order.iter().zip(&estimate.posterior_errors) {
                    self.matches[ix].assign_pep(pep);
                }
                self.pep = PepLevel::Psm;
                self.diagnostics = Some(estimate.diagnostics);
            }
        } else if self.matches.iter().any(|m| m.pep().is_some()) {
            self.pep = PepLevel::Reused;
        }

        if self.pep != PepLevel::None {
            let order = self.pep_order();
            if peptide_level {
                let peptides = representatives(self.matches, &order);
                proceed!(self.q_values(&peptides, Granularity::Peptide, true));
            }
            proceed!(self.q_values(&order, Granularity::Psm, true));
            self.stage = Stage::PepTrained;
            log::debug!("{}: PEP q-values from {:?}", self.digestion_agent, self.pep);
        }

        // Best-PEP representative per peptide, ranked in default order
        let mut peptides = representatives(self.matches, &self.pep_order());
        peptides.sort_by(|&a, &b| cmp_default(&self.matches[a], &self.matches[b]));

        proceed!(self.q_values(&peptides, Granularity::Peptide, false));
        proceed!(self.q_values(&psm_order, Granularity::Psm, false));
        self.stage = Stage::Final;

        self.annotate_psm_counts();

        let threshold = self.parameters.q_value_threshold;
        self.passing_psms =
            qvalue::count_passing(self.matches, &psm_order, Granularity::Psm, threshold);
        self.passing_peptides =
            qvalue::count_passing(self.matches, &peptides, Granularity::Peptide, threshold);

        log::debug!(
            "{}: {} PSMs and {} peptides pass",
            self.digestion_agent,
            self.passing_psms,
            self.passing_peptides
        );

        Ok(Completion::Complete)
    }

    /// Stamp each unambiguous match with the number of confident PSMs that
    /// share its full sequence. Ambiguous matches are left alone.
    fn annotate_psm_counts(&mut self) {
        let threshold = self.parameters.q_value_threshold;
        let mut counts: FnvHashMap<String, usize> = FnvHashMap::default();
        for m in self.matches.iter() {
            let fdr = m.fdr(Granularity::Psm);
            if fdr.q_value > threshold || fdr.q_value_notch > threshold {
                continue;
            }
            if let Some(seq) = m.full_sequence() {
                *counts.entry(seq.to_string()).or_default() += 1;
            }
        }

        for m in self.matches.iter_mut() {
            let count = m
                .full_sequence()
                .map(|seq| counts.get(seq).copied().unwrap_or(0));
            if let Some(count) = count {
                m.psm_count = count;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::psm::Hypothesis;

    fn psm(agent: &str, score: f64, seq: &str, decoy: bool) -> SpectralMatch {
        let hyp = match decoy {
            true => Hypothesis::decoy(seq),
            false => Hypothesis::target(seq),
        };
        SpectralMatch::new("a.mzML", score as usize, score, agent).with_hypothesis(hyp)
    }

    fn parameters() -> Parameters {
        Builder {
            file_parameters: Some(Vec::new()),
            ..Default::default()
        }
        .make_parameters()
        .unwrap()
    }

    fn no_pep(_: &[&SpectralMatch], _: &PepContext<'_>) -> Result<PepEstimate, Error> {
        Err(Error::Estimator("should not be called".into()))
    }

    #[test]
    fn builder_defaults() {
        let p: Builder = serde_json::from_str(r#"{ "file_parameters": [] }"#).unwrap();
        let p = p.make_parameters().unwrap();
        assert_eq!(p.num_notches, 0);
        assert_eq!(p.analysis_type, "PSM");
        assert!(p.do_pep);
        assert_eq!(p.large_sample_threshold, 1000);
        assert!(!p.force_large_sample);
        assert_eq!(p.q_value_threshold, 0.01);

        assert!(!p.is_large(999));
        assert!(p.is_large(1000));
        assert_eq!(p.strategy(999), Strategy::Traditional);
        assert_eq!(p.strategy(1000), Strategy::Inverted);
    }

    #[test]
    fn missing_file_parameters() {
        match Builder::default().make_parameters() {
            Err(Error::MissingParameter(name)) => assert_eq!(name, "file_parameters"),
            _ => panic!("file parameters are required"),
        }
    }

    #[test]
    fn partitions_in_order_of_appearance() {
        let mut matches = vec![
            psm("lysc", 3.0, "AAA", false),
            psm("trypsin", 9.0, "CCC", false),
            psm("lysc", 8.0, "DDD", false),
            psm("trypsin", 1.0, "EEE", false),
            psm("lysc", 5.0, "FFF", false),
        ];
        let partitions = split_partitions(&mut matches);
        assert_eq!(partitions.len(), 2);

        let scores = |p: &[SpectralMatch]| p.iter().map(|m| m.score).collect::<Vec<_>>();
        assert_eq!(scores(partitions[0]), vec![8.0, 5.0, 3.0]);
        assert!(partitions[0].iter().all(|m| m.digestion_agent == "lysc"));
        assert_eq!(scores(partitions[1]), vec![9.0, 1.0]);
    }

    #[test]
    fn representative_is_first_in_order() {
        let matches = vec![
            psm("trypsin", 9.0, "AAA", false),
            psm("trypsin", 8.0, "CCC", false),
            psm("trypsin", 7.0, "AAA", false),
        ];
        assert_eq!(representatives(&matches, &[0, 1, 2]), vec![0, 1]);
        assert_eq!(representatives(&matches, &[2, 1, 0]), vec![2, 1]);
    }

    #[test]
    fn psm_count_annotation() {
        let mut matches = (0..20)
            .map(|i| psm("trypsin", 100.0 - i as f64, &format!("PEPTIDE{}", i), false))
            .collect::<Vec<_>>();
        matches.push(psm("trypsin", 50.5, "PEPTIDE0", false));
        let ambiguous = SpectralMatch::new("a.mzML", 99, 50.0, "trypsin")
            .with_hypothesis(Hypothesis::target("PEPTIDE0"))
            .with_hypothesis(Hypothesis::target("PEPTIDE1"));
        matches.push(ambiguous);

        let result = FdrAnalysis::new(&mut matches, parameters(), &no_pep, Cancellation::new())
            .unwrap()
            .run()
            .unwrap();
        assert!(result.complete);

        for m in &matches {
            match m.full_sequence() {
                Some("PEPTIDE0") => assert_eq!(m.psm_count, 2),
                Some(_) => assert_eq!(m.psm_count, 1),
                None => assert_eq!(m.psm_count, 0),
            }
        }
    }

    #[test]
    fn uncounted_sequences_get_zero() {
        let mut matches = vec![
            psm("trypsin", 10.0, "AAA", true),
            psm("trypsin", 9.0, "CCC", false),
        ];
        matches[1].psm_count = 7;
        FdrAnalysis::new(&mut matches, parameters(), &no_pep, Cancellation::new())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(matches[1].fdr(Granularity::Psm).q_value, 1.0);
        assert_eq!(matches[1].psm_count, 0);
    }

    #[test]
    fn notch_out_of_range() {
        let mut matches = vec![psm("trypsin", 10.0, "AAA", false).with_notch(Some(2))];
        let result = FdrAnalysis::new(&mut matches, parameters(), &no_pep, Cancellation::new());
        assert!(matches!(
            result,
            Err(Error::NotchOutOfRange {
                notch: 2,
                num_notches: 0
            })
        ));
    }

    #[test]
    fn reuses_existing_pep() {
        let mut matches = vec![
            psm("trypsin", 10.0, "AAA", false),
            psm("trypsin", 9.0, "CCC", true),
            psm("trypsin", 8.0, "DDD", false),
        ];
        matches[0].assign_pep(0.5);
        matches[1].assign_pep(0.9);
        matches[2].assign_pep(0.01);

        let result = FdrAnalysis::new(&mut matches, parameters(), &no_pep, Cancellation::new())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(result.partitions[0].pep, PepLevel::Reused);
        assert_eq!(result.partitions[0].stage, Stage::Final);
        assert!(result.diagnostics.is_empty());

        // PEP ranking: DDD, AAA, CCC(decoy)
        let ddd = matches.iter().find(|m| m.score == 8.0).unwrap();
        assert_eq!(ddd.fdr(Granularity::Psm).pep_q_value, 0.5);
        // Counts are rewritten by the final pass in default order
        assert_eq!(ddd.fdr(Granularity::Psm).cumulative_target, 2.0);
        assert_eq!(ddd.pep(), Some(0.01));
    }

    #[test]
    fn strategy_switches_at_threshold() {
        let parameters = Builder {
            do_pep: Some(false),
            large_sample_threshold: Some(4),
            file_parameters: Some(Vec::new()),
            ..Default::default()
        }
        .make_parameters()
        .unwrap();
        let q_values = |matches: &[SpectralMatch]| {
            matches
                .iter()
                .map(|m| m.fdr(Granularity::Psm).q_value)
                .collect::<Vec<_>>()
        };

        // One short of the threshold: running max of decoy / target
        let mut matches = vec![
            psm("trypsin", 10.0, "AAA", false),
            psm("trypsin", 9.0, "CCC", true),
            psm("trypsin", 8.0, "DDD", false),
        ];
        FdrAnalysis::new(&mut matches, parameters.clone(), &no_pep, Cancellation::new())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(q_values(&matches), vec![0.0, 1.0, 1.0]);

        // At the threshold: running min of (decoy + 1) / target, worst first
        matches.push(psm("trypsin", 7.0, "EEE", false));
        FdrAnalysis::new(&mut matches, parameters, &no_pep, Cancellation::new())
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(q_values(&matches), vec![2.0 / 3.0; 4]);
    }

    #[test]
    fn cancelled_before_run() {
        let mut matches = vec![psm("trypsin", 10.0, "AAA", false)];
        let cancel = Cancellation::new();
        cancel.cancel();
        let result = FdrAnalysis::new(&mut matches, parameters(), &no_pep, cancel)
            .unwrap()
            .run()
            .unwrap();
        assert!(!result.complete);
        assert!(result.partitions.is_empty());
    }
}
