//src/score.rs

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ahash::AHashMap;
use rayon::prelude::*;

use crate::config::{FilterThresholds, PassConfig, TaxidField};
use crate::error::{Error, ParseError, Result};
use crate::kraken_file::{create_output, open_kraken_file, parse_line, sample_id, LineBatch, LineBatches};
use crate::taxdb::{is_placeholder, LineageResolver, TaxonDB};
use crate::types::{ClassificationRecord, ReadScore};
use crate::universe::build_taxon_db;

/// K-mer counts attributed to names at or below the read's rank.
pub type Abundances<'a> = AHashMap<&'a str, u64>;

pub const SCORE_HEADER: [&str; 10] = [
    "sample_id",
    "read_id",
    "taxid",
    "name",
    "rank",
    "n_kmers",
    "consistency",
    "confidence",
    "multiplicity",
    "entropy",
];

const PROGRESS_EVERY: u64 = 1_000_000;

/// Shannon entropy (natural log) of the abundance distribution; 0 when empty.
pub fn entropy(abundances: &Abundances) -> f64 {
    let total: u64 = abundances.values().sum();
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    abundances
        .values()
        .filter(|&&n| n > 0)
        .fold(0.0, |ent, &n| {
            let p = n as f64 / total;
            ent - p * p.ln()
        })
}

pub fn multiplicity(abundances: &Abundances) -> u32 {
    abundances.len() as u32
}

/// Share of the abundance mass on `name`; 0 when nothing was attributed.
pub fn confidence(abundances: &Abundances, name: &str) -> f64 {
    let total: u64 = abundances.values().sum();
    if total == 0 {
        return 0.0;
    }
    abundances.get(name).copied().unwrap_or(0) as f64 / total as f64
}

/// Scores one read against its assigned lineage.
///
/// Every resolvable k-mer call counts towards the classified total. Calls
/// resolved at least as deep as the read's own leaf rank are attributed by
/// name, with deeper calls lifted to the read's rank. A call is consistent if
/// its attributed name lies on the read's lineage.
///
/// Returns `None` for unclassified reads and reads whose taxon has no
/// resolved rank.
pub fn score_read(
    record: &ClassificationRecord,
    taxondb: &TaxonDB,
) -> std::result::Result<Option<ReadScore>, ParseError> {
    if !record.is_classified() {
        return Ok(None);
    }
    let taxid: u32 = record
        .assigned_taxon
        .parse()
        .map_err(|_| ParseError::BadTaxid(record.assigned_taxon.clone()))?;

    let Some(lineage) = taxondb.get(&record.assigned_taxon) else {
        return Ok(None);
    };
    let Some((rank, leaf)) = lineage.leaf() else {
        return Ok(None);
    };

    let mut abundances = Abundances::new();
    let mut consistent = 0u64;
    let mut classified = 0u64;

    for call in record.informative_calls() {
        let Some(call_lineage) = taxondb.get(&call.taxid) else {
            continue;
        };
        let Some((idx, mut name)) = call_lineage.leaf() else {
            continue;
        };
        if idx > rank {
            name = call_lineage.names[rank].as_str();
        }
        classified += call.count;
        // A gap above the call's leaf leaves it unresolved at the read's rank.
        if is_placeholder(name) {
            continue;
        }
        if idx >= rank && call.count > 0 {
            *abundances.entry(name).or_insert(0) += call.count;
        }
        if lineage.contains_name(name) {
            consistent += call.count;
        }
    }

    let consistency = if classified == 0 {
        0.0
    } else {
        consistent as f64 / classified as f64
    };

    Ok(Some(ReadScore {
        read_id: record.read_id.clone(),
        taxid,
        name: leaf.to_string(),
        kmers: classified,
        consistency,
        confidence: confidence(&abundances, leaf),
        multiplicity: multiplicity(&abundances),
        entropy: entropy(&abundances),
    }))
}

/// Scores a batch in parallel. Results keep the batch order; the error of the
/// earliest bad line wins.
pub fn score_batch(batch: &LineBatch, field: TaxidField, taxondb: &TaxonDB) -> Result<Vec<Option<ReadScore>>> {
    let results: Vec<std::result::Result<Option<ReadScore>, ParseError>> = batch
        .lines
        .par_iter()
        .map(|line| {
            let record = parse_line(line, field)?;
            score_read(&record, taxondb)
        })
        .collect();

    results
        .into_iter()
        .zip(batch.first_line..)
        .map(|(r, line)| r.map_err(|e| Error::parse(line, e)))
        .collect()
}

/// Pass 2 over an already resolved file, calling `sink` for each line with its score.
fn for_each_score<P, F>(path: P, config: &PassConfig, taxondb: &TaxonDB, mut sink: F) -> Result<u64>
where
    P: AsRef<Path>,
    F: FnMut(&str, Option<&ReadScore>) -> Result<()>,
{
    let mut reads = 0u64;
    for batch in LineBatches::new(open_kraken_file(path)?, config.batch_size) {
        let batch = batch?;
        let scores = score_batch(&batch, config.taxid_field, taxondb)?;
        for (line, score) in batch.lines.iter().zip(scores.iter()) {
            sink(line, score.as_ref())?;
            reads += 1;
            if reads % PROGRESS_EVERY == 0 {
                log::info!("Processed {} reads...", reads);
            }
        }
    }
    Ok(reads)
}

pub fn score_record(sample: &str, s: &ReadScore) -> [String; 10] {
    [
        sample.to_string(),
        s.read_id.clone(),
        s.taxid.to_string(),
        s.name.clone(),
        s.rank().to_string(),
        s.kmers.to_string(),
        s.consistency.to_string(),
        s.confidence.to_string(),
        s.multiplicity.to_string(),
        s.entropy.to_string(),
    ]
}

/// Writes the scores of an already resolved file as CSV. Returns the number of scored reads.
pub fn write_scores<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    config: &PassConfig,
    taxondb: &TaxonDB,
) -> Result<u64> {
    let sample = sample_id(&input);
    let mut writer = csv::Writer::from_writer(create_output(&output)?);
    writer.write_record(SCORE_HEADER)?;

    let mut scored = 0u64;
    let reads = for_each_score(&input, config, taxondb, |_, score| {
        if let Some(s) = score {
            writer.write_record(score_record(&sample, s))?;
            scored += 1;
        }
        Ok(())
    })?;
    writer.flush()?;

    log::info!("Processing {} reads - Done. Scored {} reads.", reads, scored);
    Ok(scored)
}

/// Scores every classified read of a Kraken file and writes one CSV row per read.
pub fn score_reads_to_file<P, Q, R>(
    input: P,
    output: Q,
    config: &PassConfig,
    resolver: &R,
    format: &str,
) -> Result<u64>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: LineageResolver + ?Sized,
{
    log::info!("Pass 1: Building the taxa database...");
    let taxondb = build_taxon_db(&input, config, resolver, format)?;

    log::info!("Pass 2: Scoring individual reads...");
    log::info!(
        "Reading k-mer assignments from {} and writing to {}.",
        input.as_ref().display(),
        output.as_ref().display()
    );
    write_scores(input, output, config, &taxondb)
}

pub fn passes(score: &ReadScore, thresholds: &FilterThresholds) -> bool {
    score.consistency >= thresholds.min_consistency
        && score.entropy <= thresholds.max_entropy
        && score.multiplicity <= thresholds.max_multiplicity
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub reads: u64,
    pub passed: u64,
}

/// Copies the Kraken lines of all reads whose score passes `thresholds` to `output`.
pub fn filter_reads<P, Q, R>(
    input: P,
    output: Q,
    config: &PassConfig,
    thresholds: &FilterThresholds,
    resolver: &R,
    format: &str,
) -> Result<FilterStats>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: LineageResolver + ?Sized,
{
    log::info!("Pass 1: Building the taxa database...");
    let taxondb = build_taxon_db(&input, config, resolver, format)?;

    log::info!("Pass 2: Scoring individual reads...");
    let mut writer: BufWriter<File> = BufWriter::new(create_output(&output)?);
    let mut passed = 0u64;
    let reads = for_each_score(&input, config, &taxondb, |line, score| {
        if score.is_some_and(|s| passes(s, thresholds)) {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            passed += 1;
        }
        Ok(())
    })?;
    writer.flush()?;

    log::info!(
        "Processing {} reads - Done. {}/{} reads passed the filter.",
        reads,
        passed,
        reads
    );
    Ok(FilterStats { reads, passed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxdb::Lineage;
    use approx::assert_relative_eq;

    fn lin(names: &str) -> Lineage {
        let n = names.split(';').count();
        Lineage::from_columns(names, &vec!["0"; n].join(";"))
    }

    fn db() -> TaxonDB {
        let mut db = TaxonDB::new();
        let bacteroides = "k__Bacteria;p__Bacteroidota;c__Bacteroidia;o__Bacteroidales;f__Bacteroidaceae;g__Bacteroides";
        db.insert("816", lin(&format!("{bacteroides};s__")));
        db.insert("817", lin(&format!("{bacteroides};s__Bacteroides fragilis")));
        db.insert("818", lin(&format!("{bacteroides};s__Bacteroides thetaiotaomicron")));
        db.insert("838", lin("k__Bacteria;p__Bacteroidota;c__Bacteroidia;o__Bacteroidales;f__Prevotellaceae;g__Prevotella;s__"));
        db.insert("976", lin("k__Bacteria;p__Bacteroidota;c__;o__;f__;g__;s__"));
        db.insert("2", lin("k__Bacteria;p__;c__;o__;f__;g__;s__"));
        db.insert("12908", lin("k__;p__;c__;o__;f__;g__;s__"));
        db.insert("500", lin("k__Bacteria;p__Bacteroidota;c__Bacteroidia;o__Bacteroidales;f__Bacteroidaceae;g__;s__"));
        db.insert("600", lin("k__Bacteria;p__Bacteroidota;c__Bacteroidia;o__Bacteroidales;f__;g__;s__Bacteroides sp."));
        db
    }

    fn score(line: &str) -> Option<ReadScore> {
        let rec = parse_line(line, TaxidField::Bare).unwrap();
        score_read(&rec, &db()).unwrap()
    }

    #[test]
    fn sentinels_and_markers_are_ignored() {
        let s = score("C\tr1\t816\t150\t816:50 1:5 A:3").unwrap();
        assert_eq!(s.name, "g__Bacteroides");
        assert_eq!(s.rank(), "g");
        assert_eq!(s.taxid, 816);
        assert_eq!(s.kmers, 50);
        assert_eq!(s.consistency, 1.0);
        assert_eq!(s.confidence, 1.0);
        assert_eq!(s.multiplicity, 1);
        assert_eq!(s.entropy, 0.0);
    }

    #[test]
    fn two_genera_split_seventy_thirty() {
        let s = score("C\tr1\t816\t150\t816:70 838:30").unwrap();
        assert_eq!(s.multiplicity, 2);
        assert_relative_eq!(s.entropy, -(0.7f64 * 0.7f64.ln() + 0.3f64 * 0.3f64.ln()), epsilon = 1e-12);
        assert_relative_eq!(s.entropy, 0.6109, epsilon = 1e-4);
        assert_relative_eq!(s.confidence, 0.7, epsilon = 1e-12);
        assert_relative_eq!(s.consistency, 0.7, epsilon = 1e-12);
    }

    #[test]
    fn deeper_calls_are_lifted_to_read_rank() {
        let s = score("C\tr1\t816\t150\t817:20 818:10").unwrap();
        assert_eq!(s.multiplicity, 1);
        assert_eq!(s.entropy, 0.0);
        assert_eq!(s.confidence, 1.0);
        assert_eq!(s.consistency, 1.0);
        assert_eq!(s.kmers, 30);
    }

    #[test]
    fn shallower_calls_count_only_towards_consistency() {
        // 976 is resolved at phylum: on the lineage, but above the read's rank.
        // 2 is resolved at kingdom: on the lineage too.
        let s = score("C\tr1\t817\t150\t817:10 976:5 2:5").unwrap();
        assert_eq!(s.name, "s__Bacteroides fragilis");
        assert_eq!(s.kmers, 20);
        assert_eq!(s.multiplicity, 1);
        assert_eq!(s.consistency, 1.0);
        assert_eq!(s.confidence, 1.0);
    }

    #[test]
    fn sibling_species_are_inconsistent() {
        let s = score("C\tr1\t817\t150\t817:6 818:2").unwrap();
        assert_eq!(s.multiplicity, 2);
        assert_relative_eq!(s.consistency, 0.75, epsilon = 1e-12);
        assert_relative_eq!(s.confidence, 0.75, epsilon = 1e-12);
        assert!(s.entropy > 0.0);
    }

    #[test]
    fn unresolvable_reads_have_no_score() {
        assert!(score("U\tr1\t0\t150\t0:120").is_none());
        assert!(score("C\tr1\t12908\t150\t12908:10").is_none());
        assert!(score("C\tr1\t4242\t150\t4242:10").is_none());
    }

    #[test]
    fn no_resolvable_calls_yield_zero_metrics() {
        let s = score("C\tr1\t816\t150\t0:10 1:4 A:2 12908:7 4242:1").unwrap();
        assert_eq!(s.kmers, 0);
        assert_eq!(s.consistency, 0.0);
        assert_eq!(s.confidence, 0.0);
        assert_eq!(s.multiplicity, 0);
        assert_eq!(s.entropy, 0.0);
    }

    #[test]
    fn non_numeric_assignment_is_an_error() {
        let rec = parse_line("C\tr1\tabc\t150\t816:1", TaxidField::Bare).unwrap();
        assert_eq!(score_read(&rec, &db()), Err(ParseError::BadTaxid("abc".into())));
    }

    #[test]
    fn metric_bounds_hold() {
        let lines = [
            "C\ta\t816\t150\t816:70 838:30",
            "C\tb\t817\t150\t817:6 818:2 976:9 1:3",
            "C\tc\t2\t150\t816:3 838:4 2:1",
            "C\td\t838\t150\t816:12 0:4",
        ];
        for line in lines {
            let s = score(line).unwrap();
            assert!((0.0..=1.0).contains(&s.consistency), "{line}");
            assert!((0.0..=1.0).contains(&s.confidence), "{line}");
            assert!(s.entropy >= 0.0);
            assert_eq!(s.entropy == 0.0, s.multiplicity <= 1, "{line}");
        }
    }

    #[test]
    fn batch_errors_report_line_number() {
        let batch = LineBatch {
            first_line: 10,
            lines: vec![
                "C\ta\t816\t150\t816:1".to_string(),
                "C\tb\t816\t150\t816:x".to_string(),
                "C\tc\t816".to_string(),
            ],
        };
        match score_batch(&batch, TaxidField::Bare, &db()) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 11),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn gap_above_call_leaf_is_unresolved_at_read_rank() {
        // 600 resolves to a species but has no family name.
        let s = score("C\tr\t500\t150\t500:10 600:10").unwrap();
        assert_eq!(s.name, "f__Bacteroidaceae");
        assert_eq!(s.kmers, 20);
        assert_eq!(s.multiplicity, 1);
        assert_eq!(s.confidence, 1.0);
        assert_eq!(s.entropy, 0.0);
        assert_relative_eq!(s.consistency, 0.5);
    }

    #[test]
    fn filter_thresholds() {
        let s = score("C\tr1\t816\t150\t816:70 838:30").unwrap();
        assert!(!passes(&s, &FilterThresholds::default()));
        let loose = FilterThresholds {
            min_consistency: 0.5,
            max_entropy: 1.0,
            max_multiplicity: 2,
        };
        assert!(passes(&s, &loose));
    }
}
