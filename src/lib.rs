// src/lib.rs
//! Read-level quality scores and rank summaries for Kraken2 output.
//!
//! Kraken2 assigns each read to a taxon and reports how every k-mer of the
//! read was classified. This crate looks at that k-mer evidence:
//!
//! - **consistency**: share of k-mers whose call lies on the read's lineage,
//! - **confidence**: share of k-mers at the read's rank that agree with it,
//! - **multiplicity** and **entropy**: how many different names the k-mers
//!   point to at the read's rank, and how evenly.
//!
//! Lineages come from a [`LineageResolver`]; the default one runs `taxonkit`
//! once per file. Every file is read twice: once to collect the taxa to
//! resolve and once to score.

pub mod annotate;
pub mod config;
pub mod error;
pub mod kraken_file;
pub mod mapping;
pub mod score;
pub mod taxdb;
pub mod types;
pub mod universe;

pub use crate::annotate::annotate_lineage;
pub use crate::config::{CollapseKey, FilterThresholds, PassConfig, ResolverConfig, TaxidField};
pub use crate::error::{Error, ParseError, Result};
pub use crate::mapping::{
    collapse_ranks, save_kmer_summary, save_rank_summary, summarize_kmers, summarize_ranks,
};
pub use crate::score::{filter_reads, score_read, score_reads_to_file, FilterStats};
pub use crate::taxdb::{InMemoryResolver, Lineage, LineageResolver, TaxonDB, TaxonkitResolver};
pub use crate::types::{ClassificationRecord, KmerCall, Mapping, ReadScore, TaxonAggregate};
pub use crate::universe::build_taxon_db;
