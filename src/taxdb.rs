//src/taxdb.rs

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use ahash::{AHashMap, AHashSet};
use regex::Regex;

use crate::config::ResolverConfig;
use crate::error::{Error, Result};

/// Names of this length or shorter are bare rank prefixes like `s__`.
const PLACEHOLDER_MAX_LEN: usize = 3;

/// `true` if a lineage name carries no label, i.e. the rank is unresolved.
pub fn is_placeholder(name: &str) -> bool {
    name.len() <= PLACEHOLDER_MAX_LEN
}

/// Rank-prefixed names and taxon IDs of one taxon, root first.
/// Index `i` is the same rank for every lineage of one resolver request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    pub names: Vec<String>,
    pub taxids: Vec<String>,
}

impl Lineage {
    /// Builds a lineage from `;`-joined name and ID columns.
    pub fn from_columns(names: &str, taxids: &str) -> Self {
        Self {
            names: names.split(';').map(str::to_string).collect(),
            taxids: taxids.split(';').map(str::to_string).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Deepest resolved rank as `(index, name)`, scanning from the tip.
    /// Ranks above an unresolved gap still count.
    pub fn leaf(&self) -> Option<(usize, &str)> {
        self.names
            .iter()
            .enumerate()
            .rev()
            .find(|(_, name)| !is_placeholder(name))
            .map(|(i, name)| (i, name.as_str()))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    pub fn joined_names(&self) -> String {
        self.names.join(";")
    }

    pub fn joined_taxids(&self) -> String {
        self.taxids.join(";")
    }
}

/// Walks two lineages from the root and yields `(index, reference name, other name)`
/// for every rank up to the first one where either side is unresolved.
pub fn matching_ranks<'a>(
    reference: &'a Lineage,
    other: &'a Lineage,
) -> impl Iterator<Item = (usize, &'a str, &'a str)> + 'a {
    reference
        .names
        .iter()
        .zip(other.names.iter())
        .take_while(|(r, o)| !is_placeholder(r) && !is_placeholder(o))
        .enumerate()
        .map(|(i, (r, o))| (i, r.as_str(), o.as_str()))
}

/// Taxon ID -> lineage for every taxon seen in one input file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxonDB {
    lineages: AHashMap<String, Lineage>,
}

impl TaxonDB {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, taxid: impl Into<String>, lineage: Lineage) {
        self.lineages.insert(taxid.into(), lineage);
    }

    pub fn get(&self, taxid: &str) -> Option<&Lineage> {
        self.lineages.get(taxid)
    }

    pub fn contains(&self, taxid: &str) -> bool {
        self.lineages.contains_key(taxid)
    }

    pub fn len(&self) -> usize {
        self.lineages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lineages.is_empty()
    }

    /// Leaf of a taxon's lineage; `None` if unknown or fully unresolved.
    pub fn leaf(&self, taxid: &str) -> Option<(usize, &str)> {
        self.get(taxid).and_then(Lineage::leaf)
    }
}

impl FromIterator<(String, Lineage)> for TaxonDB {
    fn from_iter<I: IntoIterator<Item = (String, Lineage)>>(iter: I) -> Self {
        Self {
            lineages: iter.into_iter().collect(),
        }
    }
}

/// Rank codes of a format template, e.g. `{k};{p};{g}` -> `["k", "p", "g"]`.
pub fn parse_ranks(format: &str) -> Result<Vec<String>> {
    let re = Regex::new(r"\{(\w)\}").map_err(|e| Error::InvalidRankFormat(e.to_string()))?;
    let ranks: Vec<String> = re
        .captures_iter(format)
        .map(|c| c[1].to_string())
        .collect();

    if ranks.is_empty() || format.matches('{').count() != ranks.len() {
        return Err(Error::InvalidRankFormat(format.to_string()));
    }
    Ok(ranks)
}

/// Anything that maps a batch of taxon IDs to lineages for a rank template.
pub trait LineageResolver {
    fn resolve(&self, taxids: &[String], format: &str) -> Result<TaxonDB>;
}

impl<F> LineageResolver for F
where
    F: Fn(&[String], &str) -> Result<TaxonDB>,
{
    fn resolve(&self, taxids: &[String], format: &str) -> Result<TaxonDB> {
        self(taxids, format)
    }
}

/// Resolves a set of IDs in a single batch. An empty set never reaches the resolver.
pub fn resolve_lineages<R: LineageResolver + ?Sized>(
    resolver: &R,
    taxids: &AHashSet<String>,
    format: &str,
) -> Result<TaxonDB> {
    if taxids.is_empty() {
        log::info!("No taxa to resolve.");
        return Ok(TaxonDB::new());
    }

    let mut ids: Vec<String> = taxids.iter().cloned().collect();
    ids.sort_unstable();

    log::info!("Resolving lineages for {} unique taxa.", ids.len());
    let db = resolver.resolve(&ids, format)?;

    let missing = ids.iter().filter(|id| !db.contains(id)).count();
    if missing > 0 {
        log::warn!("{} of {} taxa could not be resolved and will be ignored.", missing, ids.len());
    }
    Ok(db)
}

/// Parses `taxid\tnames\ttaxids` rows as written by
/// `taxonkit reformat --show-lineage-taxids`. Rows without a lineage are skipped.
/// With `n_ranks`, every lineage must have exactly that many ranks.
pub fn parse_lineage_table<R: BufRead>(reader: R, n_ranks: Option<usize>) -> Result<TaxonDB> {
    let mut db = TaxonDB::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        let taxid = fields[0].trim();
        let names = fields.get(1).copied().unwrap_or("");
        let taxids = fields.get(2).copied().unwrap_or("");
        if names.is_empty() {
            continue;
        }

        let lineage = Lineage::from_columns(names, taxids);
        if lineage.names.len() != lineage.taxids.len() {
            return Err(Error::ResolverOutput(format!(
                "lineage of {} has {} names but {} taxon IDs",
                taxid,
                lineage.names.len(),
                lineage.taxids.len()
            )));
        }
        if let Some(n) = n_ranks {
            if lineage.len() != n {
                return Err(Error::ResolverOutput(format!(
                    "lineage of {} has {} ranks, expected {}",
                    taxid,
                    lineage.len(),
                    n
                )));
            }
        }
        db.insert(taxid, lineage);
    }
    Ok(db)
}

/// Returns the version of an installed taxonkit, e.g. `0.15.0`.
pub fn taxonkit_version<P: AsRef<Path>>(binary: P) -> Result<String> {
    let output = Command::new(binary.as_ref())
        .arg("version")
        .output()
        .map_err(|e| Error::ResolverMissing(e.to_string()))?;

    if !output.status.success() {
        return Err(Error::ResolverMissing(format!(
            "`{} version` exited with {}",
            binary.as_ref().display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .split_once(" v")
        .map(|(_, v)| v.trim().to_string())
        .ok_or_else(|| Error::ResolverMissing(format!("unrecognized version string `{}`", stdout.trim())))
}

/// Resolves lineages by running `taxonkit reformat` once per batch.
#[derive(Debug, Clone)]
pub struct TaxonkitResolver {
    pub binary: PathBuf,
    pub data_dir: Option<PathBuf>,
}

impl TaxonkitResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            binary: PathBuf::from("taxonkit"),
            data_dir: config.data_dir.clone(),
        }
    }

    /// Fails unless a working taxonkit is on the path.
    pub fn check(&self) -> Result<String> {
        taxonkit_version(&self.binary)
    }
}

impl LineageResolver for TaxonkitResolver {
    fn resolve(&self, taxids: &[String], format: &str) -> Result<TaxonDB> {
        let ranks = parse_ranks(format)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "reformat",
            "--taxid-field",
            "1",
            "--show-lineage-taxids",
            "--add-prefix",
            "--format",
            format,
        ]);
        if let Some(dir) = &self.data_dir {
            cmd.arg("--data-dir").arg(dir);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!("Running {:?} on {} taxa.", cmd, taxids.len());
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ResolverMissing(e.to_string()))?;

        // Feed stdin from another thread so a full stdout pipe cannot deadlock us.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ResolverOutput("could not open taxonkit stdin".into()))?;
        let mut input = taxids.join("\n");
        input.push('\n');
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| Error::ResolverOutput("stdin writer panicked".into()))?;

        if !output.status.success() {
            return Err(Error::ResolverFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written?;

        parse_lineage_table(output.stdout.as_slice(), Some(ranks.len()))
    }
}

/// Serves lineages from memory, e.g. a table exported from taxonkit once.
#[derive(Debug, Clone, Default)]
pub struct InMemoryResolver {
    db: TaxonDB,
}

impl InMemoryResolver {
    pub fn new(db: TaxonDB) -> Self {
        Self { db }
    }

    pub fn from_table<R: BufRead>(reader: R) -> Result<Self> {
        Ok(Self::new(parse_lineage_table(reader, None)?))
    }
}

impl LineageResolver for InMemoryResolver {
    fn resolve(&self, taxids: &[String], format: &str) -> Result<TaxonDB> {
        let n_ranks = parse_ranks(format)?.len();
        let mut db = TaxonDB::new();
        for id in taxids {
            if let Some(lineage) = self.db.get(id) {
                if lineage.len() != n_ranks {
                    return Err(Error::ResolverOutput(format!(
                        "lineage of {} has {} ranks, expected {}",
                        id,
                        lineage.len(),
                        n_ranks
                    )));
                }
                db.insert(id.clone(), lineage.clone());
            }
        }
        Ok(db)
    }
}
