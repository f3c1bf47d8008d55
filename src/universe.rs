//src/universe.rs

use std::path::Path;

use ahash::AHashSet;
use rayon::prelude::*;

use crate::config::PassConfig;
use crate::error::{Error, Result};
use crate::kraken_file::{open_kraken_file, parse_line, LineBatches};
use crate::taxdb::{resolve_lineages, LineageResolver, TaxonDB};
use crate::types::{is_sentinel, ClassificationRecord};

/// Adds every informative taxon of a classified record to `taxa`.
pub fn record_taxa(record: &ClassificationRecord, taxa: &mut AHashSet<String>) {
    if !record.is_classified() {
        return;
    }
    if !is_sentinel(&record.assigned_taxon) {
        taxa.insert(record.assigned_taxon.clone());
    }
    for call in record.informative_calls() {
        if !taxa.contains(&call.taxid) {
            taxa.insert(call.taxid.clone());
        }
    }
}

/// Scans a Kraken file once and returns the distinct informative taxon IDs
/// together with the number of lines read.
pub fn collect_taxa<P: AsRef<Path>>(path: P, config: &PassConfig) -> Result<(AHashSet<String>, u64)> {
    let path = path.as_ref();
    let field = config.taxid_field;
    let mut taxa: AHashSet<String> = AHashSet::with_capacity(10_000);
    let mut reads = 0u64;

    log::info!("Reading k-mer assignments from {}.", path.display());
    for batch in LineBatches::new(open_kraken_file(path)?, config.batch_size) {
        let batch = batch?;
        let first_line = batch.first_line;

        let partial = batch
            .lines
            .par_iter()
            .enumerate()
            .try_fold(AHashSet::new, |mut acc, (i, line)| {
                let record = parse_line(line, field)
                    .map_err(|e| Error::parse(first_line + i as u64, e))?;
                record_taxa(&record, &mut acc);
                Ok::<_, Error>(acc)
            })
            .try_reduce(AHashSet::new, |mut a, mut b| {
                if a.len() < b.len() {
                    std::mem::swap(&mut a, &mut b);
                }
                a.extend(b);
                Ok(a)
            })?;
        taxa.extend(partial);

        let before = reads;
        reads += batch.lines.len() as u64;
        if reads / 1_000_000 > before / 1_000_000 {
            log::info!("Processed {} reads...", reads);
        }
    }
    log::info!("Processing {} reads - Done.", reads);

    Ok((taxa, reads))
}

/// Pass 1: collects every taxon referenced in the file and resolves all of
/// them with a single resolver call.
pub fn build_taxon_db<P, R>(path: P, config: &PassConfig, resolver: &R, format: &str) -> Result<TaxonDB>
where
    P: AsRef<Path>,
    R: LineageResolver + ?Sized,
{
    let (taxa, _) = collect_taxa(path, config)?;
    let db = resolve_lineages(resolver, &taxa, format)?;
    log::info!("Got lineages for {} taxa.", db.len());
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaxidField;

    #[test]
    fn collects_informative_taxa_only() {
        let mut taxa = AHashSet::new();
        let rec = parse_line("C\tr1\t816\t150\t816:50 1:5 A:3 0:1 817:2", TaxidField::Bare).unwrap();
        record_taxa(&rec, &mut taxa);
        let unclassified = parse_line("U\tr2\t0\t150\t0:50 9:3", TaxidField::Bare).unwrap();
        record_taxa(&unclassified, &mut taxa);

        let mut ids: Vec<&String> = taxa.iter().collect();
        ids.sort();
        assert_eq!(ids, vec!["816", "817"]);
    }

    #[test]
    fn root_assignment_is_not_looked_up() {
        let mut taxa = AHashSet::new();
        let rec = parse_line("C\tr1\t1\t150\t1:20 2:4", TaxidField::Bare).unwrap();
        record_taxa(&rec, &mut taxa);
        assert_eq!(taxa.len(), 1);
        assert!(taxa.contains("2"));
    }
}
