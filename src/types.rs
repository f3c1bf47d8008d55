//src/types.rs

use ahash::AHashMap;

/// Taxon IDs that never carry information: 0 (unclassified) and 1 (root).
pub fn is_sentinel(taxid: &str) -> bool {
    taxid == "0" || taxid == "1"
}

/// Rank code of a prefixed name, e.g. `g` for `g__Bacteroides`.
pub fn rank_code(name: &str) -> &str {
    name.split("__").next().unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Classified,
    Unclassified,
}

/// One `taxid:count` entry of a Kraken hitlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmerCall {
    pub taxid: String,
    pub count: u64,
}

impl KmerCall {
    pub fn is_sentinel(&self) -> bool {
        is_sentinel(&self.taxid)
    }
}

/// A structured representation of one Kraken output line.
/// Separator (`|:|`) and ambiguous (`A:n`) entries are dropped while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRecord {
    pub status: Status,
    pub read_id: String,
    /// Bare taxon ID, already extracted from `Name (taxid N)` if needed.
    pub assigned_taxon: String,
    /// Sequence length column, `150` or `150|148` for pairs.
    pub length: String,
    pub kmer_calls: Vec<KmerCall>,
}

impl ClassificationRecord {
    pub fn is_classified(&self) -> bool {
        self.status == Status::Classified
    }

    /// K-mer calls that carry taxonomic information.
    pub fn informative_calls(&self) -> impl Iterator<Item = &KmerCall> {
        self.kmer_calls.iter().filter(|c| !c.is_sentinel())
    }
}

/// Quality metrics of a single classified read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadScore {
    pub read_id: String,
    pub taxid: u32,
    /// Deepest resolved name of the assigned taxon, e.g. `g__Bacteroides`.
    pub name: String,
    /// Total k-mers with a resolvable, non-sentinel call.
    pub kmers: u64,
    pub consistency: f64,
    pub confidence: f64,
    pub multiplicity: u32,
    pub entropy: f64,
}

impl ReadScore {
    pub fn rank(&self) -> &str {
        rank_code(&self.name)
    }
}

/// K-mer evidence collected for all reads assigned to one taxon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonAggregate {
    /// `;`-joined lineage names; empty until ranks are collapsed.
    pub lineage: String,
    pub reads: u64,
    /// Attributed label -> k-mer count.
    pub classes: AHashMap<String, u64>,
}

impl TaxonAggregate {
    pub fn add(&mut self, label: &str, count: u64) {
        match self.classes.get_mut(label) {
            Some(n) => *n += count,
            None => {
                self.classes.insert(label.to_string(), count);
            }
        }
    }

    pub fn merge(&mut self, other: TaxonAggregate) {
        self.reads += other.reads;
        self.classes.reserve(other.classes.len());
        for (label, count) in other.classes {
            *self.classes.entry(label).or_insert(0) += count;
        }
        if self.lineage.is_empty() {
            self.lineage = other.lineage;
        }
    }

    /// Whether `name` is one of the names in this taxon's lineage.
    pub fn in_lineage(&self, name: &str) -> bool {
        self.lineage.split(';').any(|n| n == name)
    }
}

/// Reference taxon ID -> aggregated k-mer evidence.
pub type Mapping = AHashMap<String, TaxonAggregate>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_zero_and_one() {
        assert!(is_sentinel("0"));
        assert!(is_sentinel("1"));
        assert!(!is_sentinel("10"));
        assert!(!is_sentinel("816"));
    }

    #[test]
    fn rank_code_is_prefix() {
        assert_eq!(rank_code("g__Bacteroides"), "g");
        assert_eq!(rank_code("s__"), "s");
        assert_eq!(rank_code(""), "");
    }

    #[test]
    fn merge_sums_reads_and_classes() {
        let mut a = TaxonAggregate::default();
        a.reads = 2;
        a.add("816", 10);
        let mut b = TaxonAggregate::default();
        b.reads = 3;
        b.add("816", 5);
        b.add("817", 1);

        a.merge(b);
        assert_eq!(a.reads, 5);
        assert_eq!(a.classes["816"], 15);
        assert_eq!(a.classes["817"], 1);
    }

    #[test]
    fn in_lineage_matches_whole_names() {
        let agg = TaxonAggregate {
            lineage: "k__Bacteria;g__Bacteroides;s__".to_string(),
            ..Default::default()
        };
        assert!(agg.in_lineage("g__Bacteroides"));
        assert!(!agg.in_lineage("g__Bacter"));
    }
}
