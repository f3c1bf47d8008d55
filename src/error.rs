//src/error.rs

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A single Kraken output line that could not be understood.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected at least 5 tab-separated fields, found {0}")]
    MissingFields(usize),
    #[error("k-mer call `{0}` is not of the form taxid:count")]
    BadCall(String),
    #[error("could not parse k-mer count `{0}`")]
    BadCount(String),
    #[error("could not parse taxon name `{0}`")]
    BadTaxonName(String),
    #[error("taxon ID `{0}` is not numeric")]
    BadTaxid(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("could not create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("line {line}: {source}")]
    Parse { line: u64, source: ParseError },
    #[error("no taxonkit installation could be found: {0}")]
    ResolverMissing(String),
    #[error("taxonkit failed ({status}): {stderr}")]
    ResolverFailed { status: String, stderr: String },
    #[error("unexpected taxonkit output: {0}")]
    ResolverOutput(String),
    #[error("invalid rank format `{0}`")]
    InvalidRankFormat(String),
    #[error("column `{0}` not found in header")]
    MissingColumn(String),
    #[error("{0} already contains lineage information")]
    AlreadyAnnotated(PathBuf),
}

impl Error {
    pub(crate) fn parse(line: u64, source: ParseError) -> Self {
        Error::Parse { line, source }
    }
}
