//src/annotate.rs

use std::fs::File;
use std::path::Path;

use ahash::AHashSet;

use crate::error::{Error, Result};
use crate::kraken_file::create_output;
use crate::taxdb::{resolve_lineages, LineageResolver};
use crate::types::is_sentinel;

fn table_reader(path: &Path, delimiter: u8) -> Result<csv::Reader<File>> {
    let file = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new().delimiter(delimiter).from_reader(file))
}

/// Appends `lineage` and `taxid_lineage` columns to a delimited table, looking up
/// the taxon IDs found in `column`. The output is always comma-separated.
/// Returns the number of rows written.
pub fn annotate_lineage<P, Q, R>(
    input: P,
    output: Q,
    column: &str,
    delimiter: u8,
    resolver: &R,
    format: &str,
) -> Result<u64>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
    R: LineageResolver + ?Sized,
{
    let input = input.as_ref();
    log::info!("Mapping taxonomy IDs from {}.", input.display());

    let mut reader = table_reader(input, delimiter)?;
    let header = reader.headers()?.clone();
    if header.iter().any(|h| h == "lineage") {
        return Err(Error::AlreadyAnnotated(input.to_path_buf()));
    }
    let idx = header
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| Error::MissingColumn(column.to_string()))?;

    let mut taxa: AHashSet<String> = AHashSet::with_capacity(100);
    for record in reader.records() {
        let record = record?;
        if let Some(taxid) = record.get(idx) {
            if !is_sentinel(taxid) {
                taxa.insert(taxid.to_string());
            }
        }
    }
    let lineages = resolve_lineages(resolver, &taxa, format)?;

    log::info!("Writing annotated data to {}.", output.as_ref().display());
    let mut reader = table_reader(input, delimiter)?;
    let mut writer = csv::Writer::from_writer(create_output(&output)?);

    let mut out_header = reader.headers()?.clone();
    out_header.push_field("lineage");
    out_header.push_field("taxid_lineage");
    writer.write_record(&out_header)?;

    let mut rows = 0u64;
    for record in reader.records() {
        let mut record = record?;
        let lineage = record.get(idx).and_then(|taxid| lineages.get(taxid));
        let (names, taxids) = lineage
            .map(|l| (l.joined_names(), l.joined_taxids()))
            .unwrap_or_default();
        record.push_field(&names);
        record.push_field(&taxids);
        writer.write_record(&record)?;
        rows += 1;
    }
    writer.flush()?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxdb::{InMemoryResolver, Lineage, TaxonDB};
    use std::fs;

    fn resolver() -> InMemoryResolver {
        let mut db = TaxonDB::new();
        db.insert("816", Lineage::from_columns("k__Bacteria;g__Bacteroides", "2;816"));
        InMemoryResolver::new(db)
    }

    #[test]
    fn appends_lineage_columns() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bracken.tsv");
        let output = dir.path().join("annotated.csv");
        fs::write(&input, "name\ttaxonomy_id\tnew_est_reads\nBacteroides\t816\t10\nunknown\t4242\t1\n").unwrap();

        let rows = annotate_lineage(&input, &output, "taxonomy_id", b'\t', &resolver(), "{k};{g}").unwrap();
        assert_eq!(rows, 2);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "name,taxonomy_id,new_est_reads,lineage,taxid_lineage\n\
             Bacteroides,816,10,k__Bacteria;g__Bacteroides,2;816\n\
             unknown,4242,1,,\n"
        );
    }

    #[test]
    fn refuses_missing_column_and_annotated_tables() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.csv");

        let plain = dir.path().join("plain.csv");
        fs::write(&plain, "classification,kmers\n816,3\n").unwrap();
        let err = annotate_lineage(&plain, &output, "taxid", b',', &resolver(), "{k};{g}").unwrap_err();
        assert!(matches!(err, Error::MissingColumn(c) if c == "taxid"));

        let annotated = dir.path().join("annotated.csv");
        fs::write(&annotated, "classification,lineage\n816,x\n").unwrap();
        let err = annotate_lineage(&annotated, &output, "classification", b',', &resolver(), "{k};{g}").unwrap_err();
        assert!(matches!(err, Error::AlreadyAnnotated(_)));
    }
}
