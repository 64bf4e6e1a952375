use super::input::Search;
use anyhow::{ensure, Context};
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sieve_core::cancel::Cancellation;
use sieve_core::engine::{AnalysisResult, FdrAnalysis};
use sieve_core::ml::DiscriminantPep;
use sieve_core::psm::{Hypothesis, SpectralMatch};
use std::path::PathBuf;
use std::time::Instant;

pub struct Runner {
    pub parameters: Search,
    start: Instant,
}

/// One row of an input matches file
#[derive(Deserialize, Debug)]
struct Record {
    file: String,
    scan: usize,
    score: f64,
    delta_score: f64,
    precursor_ppm: f64,
    notch: Option<usize>,
    digestion_agent: String,
    full_sequence: String,
    decoy: String,
    #[serde(default)]
    crosslink: Option<String>,
}

fn parse_flag(flag: &str) -> anyhow::Result<bool> {
    match flag.trim() {
        "Y" | "y" => Ok(true),
        "N" | "n" => Ok(false),
        x => anyhow::bail!("expected `Y` or `N`, found `{}`", x),
    }
}

impl Record {
    fn into_match(self) -> anyhow::Result<SpectralMatch> {
        let sequences = self.full_sequence.split('|').collect::<Vec<_>>();
        let decoys = self
            .decoy
            .split('|')
            .map(parse_flag)
            .collect::<anyhow::Result<Vec<_>>>()?;
        ensure!(
            sequences.len() == decoys.len(),
            "{} sequences but {} decoy flags",
            sequences.len(),
            decoys.len()
        );

        let mut m = SpectralMatch::new(self.file, self.scan, self.score, self.digestion_agent)
            .with_notch(self.notch);
        m.delta_score = self.delta_score;
        m.precursor_ppm = self.precursor_ppm;
        m.crosslink = match self.crosslink.as_deref() {
            Some(flag) if !flag.trim().is_empty() => parse_flag(flag)?,
            _ => false,
        };
        m.hypotheses = sequences
            .into_iter()
            .zip(decoys)
            .map(|(seq, decoy)| Hypothesis {
                full_sequence: seq.trim().into(),
                decoy,
            })
            .collect();
        Ok(m)
    }
}

#[derive(Serialize)]
struct Results<'a> {
    search: &'a Search,
    analysis: &'a AnalysisResult,
}

impl Runner {
    pub fn new(parameters: Search) -> Self {
        Self {
            parameters,
            start: Instant::now(),
        }
    }

    // Create a path for `file_name` in the output directory
    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    fn read_matches_file(path: &str) -> anyhow::Result<Vec<SpectralMatch>> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("Failed to open `{}`", path))?;

        rdr.deserialize::<Record>()
            .enumerate()
            .map(|(row, record)| {
                record
                    .map_err(anyhow::Error::from)
                    .and_then(Record::into_match)
                    .with_context(|| format!("Invalid record {} in `{}`", row + 1, path))
            })
            .collect()
    }

    pub fn read_matches(&self) -> anyhow::Result<Vec<SpectralMatch>> {
        let start = Instant::now();
        let matches = self
            .parameters
            .matches_paths
            .par_iter()
            .map(|path| Self::read_matches_file(path))
            .collect::<anyhow::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        info!(
            "read {} matches from {} files in {}ms",
            matches.len(),
            self.parameters.matches_paths.len(),
            start.elapsed().as_millis()
        );
        Ok(matches)
    }

    pub fn run(mut self) -> anyhow::Result<AnalysisResult> {
        let mut matches = self.read_matches()?;

        let start = Instant::now();
        let estimator = DiscriminantPep::default();
        let result = FdrAnalysis::new(
            &mut matches,
            self.parameters.fdr.clone(),
            &estimator,
            Cancellation::new(),
        )?
        .run()?;
        ensure!(result.complete, "FDR analysis did not complete");

        for partition in &result.partitions {
            info!(
                "- {}: {} PSMs, {} peptides at {}% FDR (PEP: {:?})",
                partition.digestion_agent,
                partition.passing_psms,
                partition.passing_peptides,
                self.parameters.fdr.q_value_threshold * 100.0,
                partition.pep
            );
        }
        info!("- fdr:     {:8} ms", start.elapsed().as_millis());

        let path = self.write_matches(&matches)?;
        self.parameters.output_paths.push(path);

        let path = self.make_path("results.json");
        self.parameters
            .output_paths
            .push(path.display().to_string());

        let results = Results {
            search: &self.parameters,
            analysis: &result,
        };
        println!("{}", serde_json::to_string_pretty(&results)?);
        let bytes = serde_json::to_vec_pretty(&results)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write `{}`", path.display()))?;

        let run_time = (Instant::now() - self.start).as_secs();
        info!("finished in {}s", run_time);

        Ok(result)
    }
}
