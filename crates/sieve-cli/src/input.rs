use anyhow::{ensure, Context};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use sieve_core::engine::{Builder, Parameters};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
/// Actual analysis parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub fdr: Parameters,
    pub matches_paths: Vec<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Deserialize, Default)]
/// Input parameters deserialized from JSON file
pub struct Input {
    fdr: Option<Builder>,
    output_directory: Option<String>,
    matches_paths: Option<Vec<String>>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("`parameters` must be set. For more information try '--help'")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(matches_paths) = matches.get_many::<String>("matches_paths") {
            log::trace!("overriding `matches_paths` parameter.");
            input.matches_paths = Some(matches_paths.into_iter().map(|p| p.into()).collect());
        }
        if matches.get_flag("no-pep") {
            log::trace!("overriding `fdr.do_pep` parameter.");
            input.fdr.get_or_insert_with(Builder::default).do_pep = Some(false);
        }
        if matches.get_flag("force-large-sample") {
            log::trace!("overriding `fdr.force_large_sample` parameter.");
            input
                .fdr
                .get_or_insert_with(Builder::default)
                .force_large_sample = Some(true);
        }

        ensure!(
            input.matches_paths.as_ref().map_or(false, |p| !p.is_empty()),
            "`matches_paths` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        sieve_core::read_json(path).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Search> {
        let fdr = self
            .fdr
            .unwrap_or_default()
            .make_parameters()
            .context("Invalid `fdr` parameters")?;

        if fdr.q_value_threshold <= 0.0 || fdr.q_value_threshold >= 1.0 {
            log::warn!(
                "`fdr.q_value_threshold` of {} is outside of (0, 1)",
                fdr.q_value_threshold
            );
        }
        if fdr.force_large_sample {
            log::warn!(
                "`fdr.force_large_sample` is set: every ranking is treated as a large sample"
            );
        }

        let matches_paths = self
            .matches_paths
            .context("`matches_paths` must be provided!")?;

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create `{}`", path.display()))?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            fdr,
            matches_paths,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}
