//src/config.rs

use std::path::PathBuf;

/// Rank template used for read scoring (taxonkit `{k}` = superkingdom).
pub const DEFAULT_SCORE_FORMAT: &str = "{k};{p};{c};{o};{f};{g};{s}";

/// Rank template used for rank summaries (taxonkit `{K}` = kingdom).
pub const DEFAULT_SUMMARY_FORMAT: &str = "{K};{p};{c};{o};{f};{g};{s}";

/// Number of lines handed to the worker pool at once.
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// How the assigned-taxon column of a Kraken line is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaxidField {
    /// `816`
    #[default]
    Bare,
    /// `Bacteroides (taxid 816)`, as written by `kraken2 --use-names`.
    Named,
}

/// Where lineages come from and which ranks to request.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Directory holding the NCBI taxonomy dumps; `None` uses taxonkit's default.
    pub data_dir: Option<PathBuf>,
    /// Rank template, e.g. `{k};{p};{c};{o};{f};{g};{s}`.
    pub format: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            format: DEFAULT_SCORE_FORMAT.to_string(),
        }
    }
}

/// Settings shared by every streaming pass over a Kraken file.
#[derive(Debug, Clone, Copy)]
pub struct PassConfig {
    pub taxid_field: TaxidField,
    pub batch_size: usize,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            taxid_field: TaxidField::Bare,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PassConfig {
    pub fn named(mut self, named: bool) -> Self {
        self.taxid_field = if named { TaxidField::Named } else { TaxidField::Bare };
        self
    }
}

/// Reads pass the filter only if every threshold holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterThresholds {
    pub min_consistency: f64,
    pub max_entropy: f64,
    pub max_multiplicity: u32,
}

impl Default for FilterThresholds {
    fn default() -> Self {
        Self {
            min_consistency: 0.9,
            max_entropy: 0.1,
            max_multiplicity: 2,
        }
    }
}

/// Which lineage names a collapsed rank bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollapseKey {
    /// The reference taxon's name at the matched rank.
    #[default]
    Reference,
    /// The k-mer taxon's name at the matched rank.
    Kmer,
}
