//! Genomic locus parsing and overlap tests.
//!
//! A locus is either a single position (SNP) or a half-open region on a
//! chromosome. Query strings accept 1-based inclusive coordinates and are
//! normalized to half-open `[start, end)` internally.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{BioIndexError, Result};

/// A genomic location extracted from a record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locus {
    /// A single base position.
    Snp {
        /// Normalized chromosome name.
        chromosome: String,
        /// 1-based position.
        position: i64,
    },
    /// A half-open region `[start, end)`.
    Region {
        /// Normalized chromosome name.
        chromosome: String,
        /// Region start (inclusive).
        start: i64,
        /// Region end (exclusive).
        end: i64,
    },
}

impl Locus {
    /// The chromosome this locus is on.
    pub fn chromosome(&self) -> &str {
        match self {
            Locus::Snp { chromosome, .. } => chromosome,
            Locus::Region { chromosome, .. } => chromosome,
        }
    }

    /// The half-open `[start, end)` range covered by this locus.
    pub fn range(&self) -> (i64, i64) {
        match self {
            Locus::Snp { position, .. } => (*position, *position + 1),
            Locus::Region { start, end, .. } => (*start, *end),
        }
    }

    /// True if this locus overlaps the query region.
    pub fn overlaps(&self, region: &Region) -> bool {
        let (start, end) = self.range();
        self.chromosome() == region.chromosome && end > region.start && start < region.end
    }
}

impl std::fmt::Display for Locus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locus::Snp {
                chromosome,
                position,
            } => write!(f, "{}:{}", chromosome, position),
            Locus::Region {
                chromosome,
                start,
                end,
            } => write!(f, "{}:{}-{}", chromosome, start, end),
        }
    }
}

/// A half-open query region `[start, end)` on a chromosome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    /// Normalized chromosome name.
    pub chromosome: String,
    /// Region start (inclusive).
    pub start: i64,
    /// Region end (exclusive).
    pub end: i64,
}

impl Region {
    /// Create a region, normalizing the chromosome.
    pub fn new(chromosome: &str, start: i64, end: i64) -> Result<Region> {
        Ok(Region {
            chromosome: parse_chromosome(chromosome)?,
            start,
            end,
        })
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

/// Collaborator that resolves a gene name or identifier to its region.
///
/// Provided by the caller; the engine itself never performs lookups. A
/// GFF-file-backed implementation lives in [`crate::genes`].
pub trait GeneResolver: Send + Sync {
    /// Resolve a gene symbol to its region, if known.
    fn resolve(&self, name: &str) -> Option<Region>;
}

fn chromosome_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)(?:chr)?([1-9]|1[0-9]|2[0-2]|x|y|xy|mt?)$").unwrap())
}

fn region_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)(?:chr)?([1-9]|1[0-9]|2[0-2]|x|y|xy|mt?):([\d,]+)(?:([+/-])([\d,]+))?$")
            .unwrap()
    })
}

/// Parse and normalize a chromosome name.
///
/// Accepts `1`–`22`, `X`, `Y`, `XY`, `M`, `MT` (case-insensitive) with an
/// optional `chr` prefix; `M` normalizes to `MT`.
pub fn parse_chromosome(s: &str) -> Result<String> {
    let captures = chromosome_re()
        .captures(s.trim())
        .ok_or_else(|| BioIndexError::invalid_locus(format!("bad chromosome: {}", s)))?;

    let chromosome = captures[1].to_uppercase();
    Ok(if chromosome == "M" {
        "MT".to_string()
    } else {
        chromosome
    })
}

/// Parse a region string into a half-open [`Region`].
///
/// Accepted forms:
///
/// * `chr` — the whole chromosome
/// * `chr:pos` — a single base, `[pos, pos+1)`
/// * `chr:start-end` — 1-based inclusive end, normalized to `[start, end+1)`
/// * `chr:start+length` — `[start, start+length)`
/// * `chr:pos/shift` — `[pos-shift, pos+shift+1)`
///
/// Positions may contain thousands-separator commas. Anything that does not
/// match is treated as a gene name and handed to `resolver`; without a
/// resolver (or for an unknown name) the parse fails with `UnknownLocus`.
pub fn parse_region(s: &str, resolver: Option<&dyn GeneResolver>) -> Result<Region> {
    let s = s.trim();

    // a bare chromosome covers everything on it
    if let Ok(chromosome) = parse_chromosome(s) {
        return Ok(Region {
            chromosome,
            start: 1,
            end: i64::MAX,
        });
    }

    let captures = match region_re().captures(s) {
        Some(captures) => captures,
        None => {
            return match resolver.and_then(|r| r.resolve(s)) {
                Some(region) => Ok(region),
                None => Err(BioIndexError::UnknownLocus {
                    name: s.to_string(),
                }),
            };
        }
    };

    let chromosome = parse_chromosome(&captures[1])?;
    let start = parse_position(&captures[2])?;

    let (start, end) = match (captures.get(3), captures.get(4)) {
        (None, _) => (start, start + 1),
        (Some(adjust), Some(value)) => {
            let value = parse_position(value.as_str())?;
            match adjust.as_str() {
                // end is a length
                "+" => (start, start + value),
                // end is a radius around the position
                "/" => (start - value, start + value + 1),
                // inclusive end position
                _ => (start, value + 1),
            }
        }
        _ => unreachable!("adjustment without value"),
    };

    if end <= start {
        return Err(BioIndexError::invalid_locus(format!(
            "end ({}) must be > start ({})",
            end, start
        )));
    }

    Ok(Region {
        chromosome,
        start,
        end,
    })
}

fn parse_position(s: &str) -> Result<i64> {
    s.replace(',', "")
        .parse::<i64>()
        .map_err(|_| BioIndexError::invalid_locus(format!("bad position: {}", s)))
}
