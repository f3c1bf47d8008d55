//src/mapping.rs

use std::cmp::Reverse;
use std::path::Path;

use ahash::AHashSet;
use rayon::prelude::*;

use crate::config::{CollapseKey, PassConfig};
use crate::error::{Error, Result};
use crate::kraken_file::{create_output, open_kraken_file, parse_line, LineBatches};
use crate::taxdb::{matching_ranks, resolve_lineages, Lineage, LineageResolver, TaxonDB};
use crate::types::{is_sentinel, rank_code, ClassificationRecord, Mapping, TaxonAggregate};

pub const KMER_SUMMARY_HEADER: [&str; 5] = ["sample_id", "classification", "total_reads", "taxid", "kmers"];

pub const RANK_SUMMARY_HEADER: [&str; 8] = [
    "sample_id",
    "classification",
    "lineage",
    "total_reads",
    "name",
    "rank",
    "kmers",
    "in_lineage",
];

/// Adds one read and its informative k-mer calls to the entry of its assigned taxon.
pub fn add_record(mapping: &mut Mapping, record: &ClassificationRecord) {
    let entry = mapping.entry(record.assigned_taxon.clone()).or_default();
    entry.reads += 1;
    for call in record.informative_calls() {
        entry.add(&call.taxid, call.count);
    }
}

/// Merges two partial mappings from different threads.
pub fn merge_mappings(mut a: Mapping, mut b: Mapping) -> Mapping {
    if a.len() < b.len() {
        std::mem::swap(&mut a, &mut b);
    }
    a.reserve(b.len());
    for (taxid, agg) in b {
        match a.get_mut(&taxid) {
            Some(entry) => entry.merge(agg),
            None => {
                a.insert(taxid, agg);
            }
        }
    }
    a
}

/// Aggregates the k-mer calls of every read in a Kraken file by assigned taxon.
pub fn summarize_kmers<P: AsRef<Path>>(path: P, config: &PassConfig) -> Result<Mapping> {
    let path = path.as_ref();
    let field = config.taxid_field;
    let mut mapping = Mapping::new();
    let mut reads = 0u64;

    log::info!("Reading k-mer assignments from {}.", path.display());
    for batch in LineBatches::new(open_kraken_file(path)?, config.batch_size) {
        let batch = batch?;
        let first_line = batch.first_line;

        let partial = batch
            .lines
            .par_iter()
            .enumerate()
            .try_fold(Mapping::new, |mut acc, (i, line)| {
                let record = parse_line(line, field)
                    .map_err(|e| Error::parse(first_line + i as u64, e))?;
                add_record(&mut acc, &record);
                Ok::<_, Error>(acc)
            })
            .try_reduce(Mapping::new, |a, b| Ok(merge_mappings(a, b)))?;
        mapping = merge_mappings(mapping, partial);

        let before = reads;
        reads += batch.lines.len() as u64;
        if reads / 1_000_000 > before / 1_000_000 {
            log::info!("Processed {} reads...", reads);
        }
    }
    log::info!("Processing {} reads - Done.", reads);

    Ok(mapping)
}

/// All informative taxa of a mapping: the references and every attributed taxon.
pub fn mapping_taxa(mapping: &Mapping) -> AHashSet<String> {
    let mut taxa = AHashSet::with_capacity(mapping.len() * 4);
    for (taxid, agg) in mapping {
        if !is_sentinel(taxid) {
            taxa.insert(taxid.clone());
        }
        taxa.extend(agg.classes.keys().filter(|k| !is_sentinel(k)).cloned());
    }
    taxa
}

/// Credits `count` to every rank on which both lineages are resolved, walking
/// from the root and stopping at the first unresolved rank on either side.
/// Returns the number of ranks credited.
pub fn match_ranks(
    reference: &Lineage,
    other: &Lineage,
    count: u64,
    key: CollapseKey,
    entry: &mut TaxonAggregate,
) -> usize {
    let mut matched = 0;
    for (_, ref_name, other_name) in matching_ranks(reference, other) {
        let name = match key {
            CollapseKey::Reference => ref_name,
            CollapseKey::Kmer => other_name,
        };
        entry.add(name, count);
        matched += 1;
    }
    matched
}

/// Re-buckets the raw per-taxon k-mer counts of `mapping` by taxonomic rank.
/// Taxa without a lineage keep their read count but get no buckets.
pub fn collapse_ranks(mapping: &Mapping, taxondb: &TaxonDB, key: CollapseKey) -> Mapping {
    let mut collapsed = Mapping::with_capacity(mapping.len());

    for (ntaxa, (taxid, entry)) in mapping.iter().enumerate() {
        let reference = taxondb.get(taxid);
        let mut ranks = TaxonAggregate {
            lineage: reference.map(Lineage::joined_names).unwrap_or_default(),
            reads: entry.reads,
            ..Default::default()
        };

        if let Some(reference) = reference {
            for (class, &count) in &entry.classes {
                if let Some(other) = taxondb.get(class) {
                    match_ranks(reference, other, count, key, &mut ranks);
                }
            }
        }
        collapsed.insert(taxid.clone(), ranks);

        if (ntaxa + 1) % 1_000 == 0 {
            log::info!("Processed {} taxa...", ntaxa + 1);
        }
    }

    collapsed
}

/// Summarizes a Kraken file by rank: k-mer summary, one batch lineage lookup, then collapse.
pub fn summarize_ranks<P, R>(
    path: P,
    config: &PassConfig,
    resolver: &R,
    format: &str,
    key: CollapseKey,
) -> Result<Mapping>
where
    P: AsRef<Path>,
    R: LineageResolver + ?Sized,
{
    let mapping = summarize_kmers(path, config)?;
    let taxondb = resolve_lineages(resolver, &mapping_taxa(&mapping), format)?;
    log::info!(
        "Got taxonomy for {} unique taxa. Collapsing {} classifications on ranks.",
        taxondb.len(),
        mapping.len()
    );
    Ok(collapse_ranks(&mapping, &taxondb, key))
}

fn taxid_order(taxid: &str) -> (Option<u64>, &str) {
    (taxid.parse().ok(), taxid)
}

/// Mapping entries sorted by taxon ID, numerically where possible.
fn sorted_entries(mapping: &Mapping) -> Vec<(&String, &TaxonAggregate)> {
    let mut entries: Vec<(&String, &TaxonAggregate)> = mapping.iter().collect();
    entries.sort_by(|a, b| taxid_order(a.0).cmp(&taxid_order(b.0)));
    entries
}

/// Classes of an entry, largest k-mer count first.
fn sorted_classes(agg: &TaxonAggregate) -> Vec<(&String, u64)> {
    let mut classes: Vec<(&String, u64)> = agg.classes.iter().map(|(k, &v)| (k, v)).collect();
    classes.sort_by(|a, b| (Reverse(a.1), a.0).cmp(&(Reverse(b.1), b.0)));
    classes
}

/// Writes a raw k-mer summary (one row per reference taxon and k-mer taxon).
pub fn save_kmer_summary<P: AsRef<Path>>(mapping: &Mapping, path: P, sample_id: &str) -> Result<()> {
    let mut writer = csv::Writer::from_writer(create_output(&path)?);
    writer.write_record(KMER_SUMMARY_HEADER)?;
    for (class, agg) in sorted_entries(mapping) {
        let reads = agg.reads.to_string();
        for (taxid, n) in sorted_classes(agg) {
            writer.write_record([sample_id, class.as_str(), reads.as_str(), taxid.as_str(), n.to_string().as_str()])?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Writes a collapsed summary (one row per reference taxon and matched rank name).
pub fn save_rank_summary<P: AsRef<Path>>(mapping: &Mapping, path: P, sample_id: &str) -> Result<()> {
    let mut writer = csv::Writer::from_writer(create_output(&path)?);
    writer.write_record(RANK_SUMMARY_HEADER)?;
    for (class, agg) in sorted_entries(mapping) {
        let reads = agg.reads.to_string();
        for (name, n) in sorted_classes(agg) {
            let in_lineage = if agg.in_lineage(name) { "1" } else { "0" };
            writer.write_record([
                sample_id,
                class.as_str(),
                agg.lineage.as_str(),
                reads.as_str(),
                name.as_str(),
                rank_code(name),
                n.to_string().as_str(),
                in_lineage,
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}
