//! Index schema parsing.
//!
//! A schema string is a comma-separated list of key parts forming a
//! compound index, optionally terminated by a locus part. The order of the
//! parts matters and is the order records must be sorted in.
//!
//! Key parts are field names; interchangeable fields are joined with `|`
//! (`varId|dbSNP`). A locus part is either a pair/triple of field names
//! (`chrom:pos`, `chromosome:start-end`) or a field template
//! (`varId=$chr:$pos*`, `region=region_$chr/$start/$stop`) whose value is
//! both matched exactly as a key and parsed for the locus.
//!
//! Some example schemas:
//!
//! ```text
//! "phenotype"
//! "varId|dbSNP"
//! "chr:pos"
//! "chromosome:start-stop"
//! "varId=$chr:$pos"
//! "phenotype,chromosome:start-stop"
//! "consequence,chromosome,gene|transcript"
//! ```

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{BioIndexError, Result};
use crate::locus::{parse_chromosome, Locus};

/// One position of a compound key: a field name, or several
/// interchangeable field names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPart {
    /// Field names tried in order; any non-null one indexes the record.
    pub alternatives: Vec<String>,
}

impl KeyPart {
    /// Column name used for this part in the index table.
    pub fn column(&self) -> String {
        self.alternatives.join("|")
    }

    /// True if any alternative field on the record equals `value`.
    pub fn matches(&self, record: &Map<String, Value>, value: &str) -> bool {
        self.alternatives
            .iter()
            .any(|field| field_str(record, field).as_deref() == Some(value))
    }
}

/// The locus position of a schema, always last.
#[derive(Clone, Debug)]
pub enum LocusPart {
    /// The locus is spread over two or three record fields.
    Columns {
        /// Field holding the chromosome.
        chromosome: String,
        /// Field holding the position (SNP) or region start.
        start: String,
        /// Field holding the exclusive region end, if any.
        end: Option<String>,
    },

    /// The locus is embedded in a single field's value.
    Template {
        /// Field holding the locus identifier.
        column: String,
        /// Compiled template the value is parsed with.
        template: LocusTemplate,
    },
}

impl LocusPart {
    /// Extract the locus of a record.
    pub fn locus_of(&self, record: &Map<String, Value>) -> Result<Locus> {
        match self {
            LocusPart::Columns {
                chromosome,
                start,
                end,
            } => {
                let chromosome = field_str(record, chromosome)
                    .ok_or_else(|| BioIndexError::missing_key(chromosome))?;
                let chromosome = parse_chromosome(&chromosome)?;
                let start_pos = field_i64(record, start)?;

                match end {
                    None => Ok(Locus::Snp {
                        chromosome,
                        position: start_pos,
                    }),
                    Some(end) => Ok(Locus::Region {
                        chromosome,
                        start: start_pos,
                        end: field_i64(record, end)?,
                    }),
                }
            }
            LocusPart::Template { column, template } => {
                let value =
                    field_str(record, column).ok_or_else(|| BioIndexError::missing_key(column))?;
                template.parse(&value)
            }
        }
    }
}

/// A compiled `field=template` locus pattern.
///
/// The template is literal text with `$chr` and either `$pos` or
/// `$start`/`$stop` (alias `$end`) placeholders; a trailing `*` ignores the
/// rest of the value.
#[derive(Clone, Debug)]
pub struct LocusTemplate {
    pattern: Regex,
    is_snp: bool,
}

impl LocusTemplate {
    /// Compile a template string.
    pub fn compile(template: &str) -> Result<LocusTemplate> {
        let (template, _ignore_rest) = match template.strip_suffix('*') {
            Some(t) => (t, true),
            None => (template, false),
        };

        let mut pattern = String::from("^(?i)");
        let mut has_chr = false;
        let mut has_pos = false;
        let mut has_start = false;
        let mut has_stop = false;

        let mut rest = template;
        while let Some(dollar) = rest.find('$') {
            pattern.push_str(&regex::escape(&rest[..dollar]));
            rest = &rest[dollar + 1..];

            let ident: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect();
            rest = &rest[ident.len()..];

            match ident.as_str() {
                "chr" => {
                    has_chr = true;
                    pattern.push_str(r"(?:chr)?(?P<chr>[0-9]{1,2}|x|y|xy|m|mt)");
                }
                "pos" => {
                    has_pos = true;
                    pattern.push_str(r"(?P<pos>[\d,]+)");
                }
                "start" => {
                    has_start = true;
                    pattern.push_str(r"(?P<start>[\d,]+)");
                }
                "stop" | "end" => {
                    has_stop = true;
                    pattern.push_str(r"(?P<stop>[\d,]+)");
                }
                other => {
                    return Err(BioIndexError::malformed_schema(format!(
                        "unknown template field ${}",
                        other
                    )));
                }
            }
        }
        pattern.push_str(&regex::escape(rest));

        let is_snp = has_pos;
        if !has_chr || !(has_pos ^ (has_start && has_stop)) {
            return Err(BioIndexError::malformed_schema(format!(
                "locus template needs $chr and either $pos or $start/$stop: {}",
                template
            )));
        }

        let pattern = Regex::new(&pattern)
            .map_err(|e| BioIndexError::malformed_schema(format!("bad locus template: {}", e)))?;

        Ok(LocusTemplate { pattern, is_snp })
    }

    /// Parse a field value into a locus.
    pub fn parse(&self, value: &str) -> Result<Locus> {
        let captures = self
            .pattern
            .captures(value)
            .ok_or_else(|| BioIndexError::invalid_locus(format!("bad locus id: {}", value)))?;

        let chromosome = parse_chromosome(&captures["chr"])?;

        if self.is_snp {
            Ok(Locus::Snp {
                chromosome,
                position: capture_i64(&captures, "pos")?,
            })
        } else {
            Ok(Locus::Region {
                chromosome,
                start: capture_i64(&captures, "start")?,
                end: capture_i64(&captures, "stop")?,
            })
        }
    }
}

/// A parsed index schema: ordered key parts plus an optional locus.
#[derive(Clone, Debug)]
pub struct Schema {
    schema_str: String,
    key_parts: Vec<KeyPart>,
    locus: Option<LocusPart>,
}

impl Schema {
    /// Parse a schema string.
    ///
    /// # Errors
    ///
    /// `MalformedSchema` when a locus part is not last, a key part is
    /// empty, or the schema is empty.
    pub fn parse(schema_str: &str) -> Result<Schema> {
        let mut key_parts = Vec::new();
        let mut locus = None;

        for part in schema_str.split(',') {
            let part = part.trim();

            if locus.is_some() {
                return Err(BioIndexError::malformed_schema(format!(
                    "locus must be last: {}",
                    schema_str
                )));
            }

            if part.is_empty() {
                return Err(BioIndexError::malformed_schema(format!(
                    "empty key part: {}",
                    schema_str
                )));
            }

            match parse_locus_part(part)? {
                Some(parsed) => {
                    // a template column is also an exact key
                    if let LocusPart::Template { column, .. } = &parsed {
                        key_parts.push(KeyPart {
                            alternatives: vec![column.clone()],
                        });
                    }
                    locus = Some(parsed);
                }
                None => {
                    let alternatives: Vec<String> = part
                        .split('|')
                        .map(|s| s.trim().to_string())
                        .collect::<Vec<_>>();
                    if alternatives.iter().any(|a| a.is_empty()) {
                        return Err(BioIndexError::malformed_schema(format!(
                            "empty key part: {}",
                            schema_str
                        )));
                    }
                    key_parts.push(KeyPart { alternatives });
                }
            }
        }

        if key_parts.is_empty() && locus.is_none() {
            return Err(BioIndexError::malformed_schema(
                "no keys or locus specified",
            ));
        }

        Ok(Schema {
            schema_str: schema_str.to_string(),
            key_parts,
            locus,
        })
    }

    /// The original schema string.
    pub fn schema_str(&self) -> &str {
        &self.schema_str
    }

    /// The ordered key parts.
    pub fn key_parts(&self) -> &[KeyPart] {
        &self.key_parts
    }

    /// The locus part, if any.
    pub fn locus(&self) -> Option<&LocusPart> {
        self.locus.as_ref()
    }

    /// True if this schema ends in a locus.
    pub fn has_locus(&self) -> bool {
        self.locus.is_some()
    }

    /// Maximum number of query values: one per key part, plus an optional
    /// trailing region when the schema has a locus.
    pub fn arity(&self) -> usize {
        self.key_parts.len() + usize::from(self.has_locus())
    }

    /// All key tuples a record contributes to the index.
    ///
    /// One tuple per combination of distinct non-null alternative values,
    /// so a record with `a="x", b="y"` under schema `a|b` yields two
    /// tuples. A part with no usable value fails with `MissingKey`.
    pub fn key_tuples(&self, record: &Map<String, Value>) -> Result<Vec<Vec<String>>> {
        let mut tuples: Vec<Vec<String>> = vec![Vec::new()];

        for part in &self.key_parts {
            let mut values: Vec<String> = Vec::new();
            for field in &part.alternatives {
                if let Some(value) = field_str(record, field) {
                    if !values.contains(&value) {
                        values.push(value);
                    }
                }
            }
            if values.is_empty() {
                return Err(BioIndexError::missing_key(part.column()));
            }

            tuples = tuples
                .iter()
                .flat_map(|tuple| {
                    values.iter().map(move |value| {
                        let mut next = tuple.clone();
                        next.push(value.clone());
                        next
                    })
                })
                .collect();
        }

        Ok(tuples)
    }

    /// Extract the locus of a record per this schema.
    ///
    /// # Panics
    ///
    /// Never; returns `MissingKey`/`InvalidLocus` errors instead. Calling
    /// this on a schema without a locus is a logic error and returns
    /// `MalformedSchema`.
    pub fn locus_of_record(&self, record: &Map<String, Value>) -> Result<Locus> {
        match &self.locus {
            Some(part) => part.locus_of(record),
            None => Err(BioIndexError::malformed_schema(format!(
                "schema has no locus: {}",
                self.schema_str
            ))),
        }
    }
}

impl std::fmt::Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.schema_str)
    }
}

/// Parse one schema part as a locus, returning `None` for plain key parts.
fn parse_locus_part(part: &str) -> Result<Option<LocusPart>> {
    // field=template form
    if let Some((column, template)) = part.split_once('=') {
        let column = column.trim();
        if column.is_empty() {
            return Err(BioIndexError::malformed_schema(format!(
                "empty locus template column: {}",
                part
            )));
        }
        return Ok(Some(LocusPart::Template {
            column: column.to_string(),
            template: LocusTemplate::compile(template.trim())?,
        }));
    }

    // chrom:pos or chrom:start-end column form
    if let Some((chromosome, positions)) = part.split_once(':') {
        let chromosome = chromosome.trim();
        let (start, end) = match positions.split_once('-') {
            Some((start, end)) => (start.trim(), Some(end.trim())),
            None => (positions.trim(), None),
        };

        if chromosome.is_empty() || start.is_empty() || end == Some("") {
            return Err(BioIndexError::malformed_schema(format!(
                "bad locus columns: {}",
                part
            )));
        }

        return Ok(Some(LocusPart::Columns {
            chromosome: chromosome.to_string(),
            start: start.to_string(),
            end: end.map(|s| s.to_string()),
        }));
    }

    Ok(None)
}

/// Read a record field as a string key value; null, missing, and empty
/// values are treated as absent.
pub(crate) fn field_str(record: &Map<String, Value>, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field_i64(record: &Map<String, Value>, field: &str) -> Result<i64> {
    let value = record
        .get(field)
        .ok_or_else(|| BioIndexError::missing_key(field))?;

    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| BioIndexError::invalid_locus(format!("bad position in '{}'", field))),
        Value::String(s) => s
            .replace(',', "")
            .parse::<i64>()
            .map_err(|_| BioIndexError::invalid_locus(format!("bad position in '{}'", field))),
        Value::Null => Err(BioIndexError::missing_key(field)),
        _ => Err(BioIndexError::invalid_locus(format!(
            "bad position in '{}'",
            field
        ))),
    }
}

fn capture_i64(captures: &regex::Captures<'_>, name: &str) -> Result<i64> {
    captures[name]
        .replace(',', "")
        .parse::<i64>()
        .map_err(|_| BioIndexError::invalid_locus(format!("bad {} in locus id", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_parse_exact_schema() {
        let schema = Schema::parse("varId").unwrap();
        assert!(!schema.has_locus());
        assert_eq!(schema.arity(), 1);
        assert_eq!(schema.key_parts().len(), 1);
        assert_eq!(schema.key_parts()[0].column(), "varId");
    }

    #[test]
    fn test_parse_compound_schema() {
        let schema = Schema::parse("consequence,chromosome,gene|transcript").unwrap();
        assert_eq!(schema.key_parts().len(), 3);
        assert_eq!(schema.key_parts()[2].column(), "gene|transcript");
        assert_eq!(schema.arity(), 3);
    }

    #[test]
    fn test_parse_snp_locus() {
        let schema = Schema::parse("phenotype,chromosome:position").unwrap();
        assert!(schema.has_locus());
        assert_eq!(schema.arity(), 2);

        let locus = schema
            .locus_of_record(&record(json!({"chromosome": "8", "position": 100})))
            .unwrap();
        assert_eq!(
            locus,
            Locus::Snp {
                chromosome: "8".to_string(),
                position: 100
            }
        );
    }

    #[test]
    fn test_parse_region_locus() {
        let schema = Schema::parse("annotation,chromosome:start-end").unwrap();
        let locus = schema
            .locus_of_record(&record(
                json!({"chromosome": "chr8", "start": 100, "end": 300}),
            ))
            .unwrap();
        assert_eq!(
            locus,
            Locus::Region {
                chromosome: "8".to_string(),
                start: 100,
                end: 300
            }
        );
    }

    #[test]
    fn test_parse_template_locus() {
        let schema = Schema::parse("varId=$chr:$pos*").unwrap();
        assert!(schema.has_locus());
        // the template column is also a key
        assert_eq!(schema.key_parts().len(), 1);
        assert_eq!(schema.key_parts()[0].column(), "varId");
        assert_eq!(schema.arity(), 2);

        let locus = schema
            .locus_of_record(&record(json!({"varId": "8:118000:A:T"})))
            .unwrap();
        assert_eq!(
            locus,
            Locus::Snp {
                chromosome: "8".to_string(),
                position: 118000
            }
        );
    }

    #[test]
    fn test_parse_template_region_with_literals() {
        let schema = Schema::parse("region=region_$chr/$start/$stop").unwrap();
        let locus = schema
            .locus_of_record(&record(json!({"region": "region_8/100/300"})))
            .unwrap();
        assert_eq!(
            locus,
            Locus::Region {
                chromosome: "8".to_string(),
                start: 100,
                end: 300
            }
        );

        // a value that doesn't match the template is invalid
        assert!(schema
            .locus_of_record(&record(json!({"region": "8:100-300"})))
            .is_err());
    }

    #[test]
    fn test_locus_must_be_last() {
        assert!(matches!(
            Schema::parse("chromosome:position,phenotype"),
            Err(BioIndexError::MalformedSchema { .. })
        ));
        assert!(matches!(
            Schema::parse("chr:pos,chr:start-end"),
            Err(BioIndexError::MalformedSchema { .. })
        ));
    }

    #[test]
    fn test_empty_parts_rejected() {
        assert!(Schema::parse("").is_err());
        assert!(Schema::parse("phenotype,,gene").is_err());
        assert!(Schema::parse("a||b").is_err());
        assert!(Schema::parse("r=$chr").is_err()); // no position fields
    }

    #[test]
    fn test_key_tuples_simple() {
        let schema = Schema::parse("phenotype,gene").unwrap();
        let tuples = schema
            .key_tuples(&record(json!({"phenotype": "T2D", "gene": "SLC30A8"})))
            .unwrap();
        assert_eq!(tuples, vec![vec!["T2D".to_string(), "SLC30A8".to_string()]]);
    }

    #[test]
    fn test_key_tuples_interchangeable() {
        let schema = Schema::parse("varId|dbSNP").unwrap();

        // only one alternative present
        let tuples = schema
            .key_tuples(&record(json!({"varId": "8:1:A:T", "dbSNP": null})))
            .unwrap();
        assert_eq!(tuples, vec![vec!["8:1:A:T".to_string()]]);

        // both present with different values: one tuple per value
        let tuples = schema
            .key_tuples(&record(json!({"varId": "8:1:A:T", "dbSNP": "rs123"})))
            .unwrap();
        assert_eq!(tuples.len(), 2);

        // both present with the same value: deduplicated
        let tuples = schema
            .key_tuples(&record(json!({"varId": "x", "dbSNP": "x"})))
            .unwrap();
        assert_eq!(tuples.len(), 1);
    }

    #[test]
    fn test_key_tuples_missing_key() {
        let schema = Schema::parse("phenotype,gene").unwrap();
        assert!(matches!(
            schema.key_tuples(&record(json!({"phenotype": "T2D"}))),
            Err(BioIndexError::MissingKey { .. })
        ));
    }

    #[test]
    fn test_numeric_key_values() {
        let schema = Schema::parse("ancestry").unwrap();
        let tuples = schema
            .key_tuples(&record(json!({"ancestry": 42})))
            .unwrap();
        assert_eq!(tuples, vec![vec!["42".to_string()]]);
    }

    #[test]
    fn test_key_part_matches_any_alternative() {
        let schema = Schema::parse("varId|dbSNP").unwrap();
        let part = &schema.key_parts()[0];
        let rec = record(json!({"varId": "8:1:A:T", "dbSNP": "rs123"}));

        assert!(part.matches(&rec, "8:1:A:T"));
        assert!(part.matches(&rec, "rs123"));
        assert!(!part.matches(&rec, "rs999"));
    }
}
