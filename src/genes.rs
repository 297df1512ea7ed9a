//! GFF-backed gene-name resolution.
//!
//! Builds a dictionary of gene symbol → region from a GFF3 file so that
//! query locus strings can name genes (`SLC30A8`) instead of coordinates.
//! The file may be gzip-compressed. Symbols come from the `ID` or `Name`
//! attribute; comma-separated `Alias` values are registered as well.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tracing::{info, warn};

use crate::error::{BioIndexError, Result};
use crate::locus::{parse_chromosome, GeneResolver, Region};

/// Gene resolver backed by an in-memory dictionary loaded from GFF3.
pub struct GffGeneResolver {
    genes: HashMap<String, Region>,
}

impl GffGeneResolver {
    /// Load a GFF3 file from a local path; `.gz` files are decompressed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<GffGeneResolver> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            BioIndexError::invalid_config(format!("cannot open {}: {}", path.display(), e))
        })?;

        if path.extension().is_some_and(|ext| ext == "gz") {
            Self::from_reader(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Self::from_reader(BufReader::new(file))
        }
    }

    /// Load GFF3 content from raw bytes, sniffing gzip by magic number.
    pub fn from_bytes(data: &[u8]) -> Result<GffGeneResolver> {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::from_reader(BufReader::new(MultiGzDecoder::new(Cursor::new(
                data.to_vec(),
            ))))
        } else {
            Self::from_reader(Cursor::new(data.to_vec()))
        }
    }

    /// Parse GFF3 records from a reader and build the dictionary.
    pub fn from_reader(reader: impl BufRead) -> Result<GffGeneResolver> {
        let mut genes = HashMap::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                BioIndexError::invalid_config(format!("failed reading gene file: {}", e))
            })?;
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let columns: Vec<&str> = line.split('\t').collect();
            if columns.len() < 9 {
                warn!(line = line_num + 1, "short GFF record; skipping");
                continue;
            }

            let chromosome = match parse_chromosome(columns[0]) {
                Ok(c) => c,
                // scaffolds and patch contigs are expected; ignore them
                Err(_) => continue,
            };
            let (start, end) = match (columns[3].parse::<i64>(), columns[4].parse::<i64>()) {
                (Ok(start), Ok(end)) => (start, end),
                _ => {
                    warn!(line = line_num + 1, "bad GFF coordinates; skipping");
                    continue;
                }
            };

            // GFF is 1-based inclusive; normalize to half-open
            let region = Region {
                chromosome,
                start,
                end: end + 1,
            };

            let attributes = parse_attributes(columns[8]);
            if let Some(symbol) = attributes.get("ID").or_else(|| attributes.get("Name")) {
                genes.insert(symbol.to_uppercase(), region.clone());
            }
            if let Some(aliases) = attributes.get("Alias") {
                for alias in aliases.split(',') {
                    genes.insert(alias.trim().to_uppercase(), region.clone());
                }
            }
        }

        info!(genes = genes.len(), "gene dictionary built");
        Ok(GffGeneResolver { genes })
    }

    /// Number of known symbols.
    pub fn len(&self) -> usize {
        self.genes.len()
    }

    /// True if the dictionary is empty.
    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

impl GeneResolver for GffGeneResolver {
    fn resolve(&self, name: &str) -> Option<Region> {
        self.genes.get(&name.to_uppercase()).cloned()
    }
}

/// Parse a GFF3 attribute column (`ID=x;Name=y;Alias=a,b`).
fn parse_attributes(column: &str) -> HashMap<String, String> {
    column
        .split(';')
        .filter_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect()
}
