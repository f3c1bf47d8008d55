//src/kraken_file.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::config::TaxidField;
use crate::error::{Error, ParseError, Result};
use crate::types::{ClassificationRecord, KmerCall, Status};

/// Hitlist label separating the two mates of a pair.
pub const PAIR_SEPARATOR: &str = "|";
/// Hitlist label for spans containing ambiguous nucleotides.
pub const AMBIGUOUS: &str = "A";

const TAXID_DELIMITER: &str = "(taxid ";

/// Opens a Kraken output file, transparently decompressing `.gz`.
pub fn open_kraken_file<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead + Send> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// Creates (or truncates) an output file.
pub fn create_output<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();
    File::create(path).map_err(|source| Error::Create {
        path: path.to_path_buf(),
        source,
    })
}

/// Sample name of a file: its base name up to the first `.`.
pub fn sample_id<P: AsRef<Path>>(path: P) -> String {
    path.as_ref()
        .file_name()
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .unwrap_or_default()
}

/// Pulls the taxon ID out of the assigned-taxon column.
pub fn extract_taxid(token: &str, field: TaxidField) -> std::result::Result<&str, ParseError> {
    match field {
        TaxidField::Bare => Ok(token.trim()),
        TaxidField::Named => token
            .split_once(TAXID_DELIMITER)
            .map(|(_, id)| id.trim_matches(|c| c == ' ' || c == ')'))
            .ok_or_else(|| ParseError::BadTaxonName(token.to_string())),
    }
}

/// Parses one line of Kraken2 output:
/// ```text
/// C\t<read id>\t<taxon>\t<length>\t<taxid:count taxid:count ...>
/// ```
pub fn parse_line(line: &str, field: TaxidField) -> std::result::Result<ClassificationRecord, ParseError> {
    let tokens: Vec<&str> = line.trim_matches(' ').split('\t').collect();
    if tokens.len() < 5 {
        return Err(ParseError::MissingFields(tokens.len()));
    }

    let status = if tokens[0] == "C" {
        Status::Classified
    } else {
        Status::Unclassified
    };
    let assigned_taxon = extract_taxid(tokens[2], field)?.to_string();

    let mut kmer_calls = Vec::new();
    for token in tokens[4].split(' ').filter(|t| !t.is_empty()) {
        let (label, count) = token
            .split_once(':')
            .ok_or_else(|| ParseError::BadCall(token.to_string()))?;
        if label == PAIR_SEPARATOR || label == AMBIGUOUS {
            continue;
        }
        let count: u64 = count
            .parse()
            .map_err(|_| ParseError::BadCount(count.to_string()))?;
        kmer_calls.push(KmerCall {
            taxid: label.to_string(),
            count,
        });
    }

    Ok(ClassificationRecord {
        status,
        read_id: tokens[1].to_string(),
        assigned_taxon,
        length: tokens[3].to_string(),
        kmer_calls,
    })
}

/// A run of consecutive lines together with the 1-based number of the first.
#[derive(Debug, Default)]
pub struct LineBatch {
    pub first_line: u64,
    pub lines: Vec<String>,
}

/// Streams a reader in fixed-size batches of lines so each batch can be
/// handed to the worker pool while the rest of the file stays on disk.
pub struct LineBatches<R> {
    reader: R,
    batch_size: usize,
    next_line: u64,
    done: bool,
}

impl<R: BufRead> LineBatches<R> {
    pub fn new(reader: R, batch_size: usize) -> Self {
        Self {
            reader,
            batch_size: batch_size.max(1),
            next_line: 1,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LineBatches<R> {
    type Item = Result<LineBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = LineBatch {
            first_line: self.next_line,
            lines: Vec::with_capacity(self.batch_size.min(4096)),
        };
        let mut line = String::new();
        while batch.lines.len() < self.batch_size {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim_end_matches(['\n', '\r']);
                    batch.lines.push(trimmed.to_string());
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        self.next_line += batch.lines.len() as u64;

        if batch.lines.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_bare_line() {
        let line = "C\tread1\t816\t150\t816:50 1:5 A:3 0:2";
        let rec = parse_line(line, TaxidField::Bare).unwrap();
        assert!(rec.is_classified());
        assert_eq!(rec.read_id, "read1");
        assert_eq!(rec.assigned_taxon, "816");
        assert_eq!(rec.length, "150");
        let labels: Vec<&str> = rec.kmer_calls.iter().map(|c| c.taxid.as_str()).collect();
        assert_eq!(labels, vec!["816", "1", "0"]);
        assert_eq!(rec.informative_calls().count(), 1);
    }

    #[test]
    fn skips_pair_separator() {
        let line = "C\tr\t816\t100|100\t816:10 |:| 817:4 ";
        let rec = parse_line(line, TaxidField::Bare).unwrap();
        assert_eq!(
            rec.kmer_calls,
            vec![
                KmerCall { taxid: "816".into(), count: 10 },
                KmerCall { taxid: "817".into(), count: 4 },
            ]
        );
    }

    #[test]
    fn unclassified_status() {
        let rec = parse_line("U\tr\t0\t90\t0:56", TaxidField::Bare).unwrap();
        assert_eq!(rec.status, Status::Unclassified);
    }

    #[test]
    fn named_taxon_field() {
        let line = "C\tr\tBacteroides (taxid 816)\t150\t816:3";
        let rec = parse_line(line, TaxidField::Named).unwrap();
        assert_eq!(rec.assigned_taxon, "816");

        let err = parse_line("C\tr\tBacteroides\t150\t816:3", TaxidField::Named).unwrap_err();
        assert_eq!(err, ParseError::BadTaxonName("Bacteroides".into()));
    }

    #[test]
    fn rejects_bad_counts_and_short_lines() {
        assert_eq!(
            parse_line("C\tr\t816\t150\t816:x", TaxidField::Bare).unwrap_err(),
            ParseError::BadCount("x".into())
        );
        assert_eq!(
            parse_line("C\tr\t816\t150\t816", TaxidField::Bare).unwrap_err(),
            ParseError::BadCall("816".into())
        );
        assert_eq!(
            parse_line("C\tr\t816", TaxidField::Bare).unwrap_err(),
            ParseError::MissingFields(3)
        );
    }

    #[test]
    fn sample_id_is_base_name_prefix() {
        assert_eq!(sample_id("/data/runs/S1.k2.txt.gz"), "S1");
        assert_eq!(sample_id("S2"), "S2");
    }

    #[test]
    fn batches_keep_line_numbers() {
        let data = "a\nb\r\nc\nd\ne";
        let batches: Vec<LineBatch> = LineBatches::new(Cursor::new(data), 2)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].first_line, 3);
        assert_eq!(batches[0].lines, vec!["a", "b"]);
        assert_eq!(batches[2].first_line, 5);
        assert_eq!(batches[2].lines, vec!["e"]);
    }
}
