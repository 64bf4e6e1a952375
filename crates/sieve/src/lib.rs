pub mod cancel;
pub mod engine;
pub mod ml;
pub mod pep;
pub mod psm;
pub mod qvalue;

use std::path::Path;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// A required configuration value was not supplied
    MissingParameter(&'static str),
    /// A match was assigned a notch beyond the configured number of notches
    NotchOutOfRange { notch: usize, num_notches: usize },
    /// A PEP estimator returned a different number of values than candidates
    EstimateLength { expected: usize, found: usize },
    /// Failure reported by a PEP estimator
    Estimator(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::MissingParameter(name) => write!(f, "`{}` must be set", name),
            Self::NotchOutOfRange { notch, num_notches } => write!(
                f,
                "match has notch {} but only {} notches are configured",
                notch, num_notches
            ),
            Self::EstimateLength { expected, found } => write!(
                f,
                "PEP estimator returned {} values for {} candidates",
                found, expected
            ),
            Self::Estimator(msg) => write!(f, "PEP estimation failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub fn read_json<P, T>(path: P) -> Result<T, Error>
where
    P: AsRef<Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
