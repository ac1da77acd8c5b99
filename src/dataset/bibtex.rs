//! Canonical serialization of the records file.
//!
//! The records file is BibTeX-shaped, but fields are written in a fixed order
//! with fixed indentation so that every change shows up as a small git diff.

use nom::branch::alt;
use nom::bytes::complete::{is_not, take_while1};
use nom::character::complete::{char, digit1, multispace0, multispace1, not_line_ending};
use nom::combinator::{cut, opt, recognize};
use nom::error::{context, VerboseError, VerboseErrorKind};
use nom::multi::{many0, many0_count};
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;
use std::collections::BTreeMap;
use std::io::BufRead;

use super::DatasetError;
use crate::process::RecordState;
use crate::record::fields::{self, CANONICAL_ORDER};
use crate::record::{Provenance, ProvenanceEntry, Record, Records};

const KEY_WIDTH: usize = 28;

fn list_separator() -> String {
    format!("\n{}", " ".repeat(36))
}

fn format_field(key: &str, value: &str) -> String {
    let pad = " ".repeat(KEY_WIDTH.saturating_sub(key.len()));
    format!(",\n   {key} {pad} = {{{value}}}")
}

fn format_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("{item};"))
        .collect::<Vec<_>>()
        .join(&list_separator())
}

fn format_provenance(provenance: &Provenance) -> String {
    provenance
        .iter()
        .map(|(key, entry)| format!("{key}:{};{};", entry.source, entry.note))
        .collect::<Vec<_>>()
        .join(&list_separator())
}

/// Serializes one record block, terminated by a newline.
pub fn serialize_record(record: &Record) -> String {
    let mut out = format!("@{}{{{}", record.entrytype, record.id);

    let mut ordered: Vec<(&str, String)> = Vec::new();
    for key in CANONICAL_ORDER {
        let value = match *key {
            fields::ORIGIN => Some(format_list(&record.origin)),
            fields::STATUS => Some(record.status.to_string()),
            fields::MD_PROV if !record.masterdata_provenance.is_empty() => {
                Some(format_provenance(&record.masterdata_provenance))
            }
            fields::D_PROV if !record.data_provenance.is_empty() => {
                Some(format_provenance(&record.data_provenance))
            }
            fields::COLREV_ID if !record.colrev_id.is_empty() => Some(format_list(&record.colrev_id)),
            fields::MD_PROV | fields::D_PROV | fields::COLREV_ID => None,
            other => record.fields.get(other).cloned(),
        };
        if let Some(value) = value {
            ordered.push((key, value));
        }
    }
    for (key, value) in &record.fields {
        if fields::canonical_position(key).is_none() {
            ordered.push((key.as_str(), value.clone()));
        }
    }

    for (key, value) in ordered {
        out.push_str(&format_field(key, &value));
    }
    out.push_str("\n}\n");
    out
}

/// Plain BibTeX without lifecycle fields, for search files and exports.
pub fn serialize_plain(record: &Record) -> String {
    let mut out = format!("@{}{{{}", record.entrytype, record.id);
    for (key, value) in record.data_fields() {
        if key == fields::SCREENING_CRITERIA || key == fields::PRESCREEN_EXCLUSION {
            continue;
        }
        out.push_str(&format!(",\n  {key} = {{{value}}}"));
    }
    out.push_str("\n}\n");
    out
}

/// Serializes all records, ordered by ID and separated by blank lines.
pub fn serialize_records(records: &Records) -> String {
    records
        .values()
        .map(serialize_record)
        .collect::<Vec<_>>()
        .join("\n")
}

/// One `@type{key, field = {value}, ...}` block before interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub entrytype: String,
    pub key: String,
    pub fields: Vec<(String, String)>,
    pub line: usize,
}

type ParseResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

fn identifier(input: &str) -> ParseResult<'_, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '/' | '+'))(input)
}

/// `{...}` with nested braces; yields the text between the outer braces.
fn braced(input: &str) -> ParseResult<'_, &str> {
    delimited(
        char('{'),
        recognize(many0_count(alt((is_not("{}"), recognize(braced))))),
        char('}'),
    )(input)
}

fn field(input: &str) -> ParseResult<'_, (&str, &str)> {
    let (input, name) = context("field name", identifier)(input)?;
    let (input, value) = cut(preceded(
        tuple((multispace0, context("'='", char('=')), multispace0)),
        context("a braced value", alt((braced, digit1))),
    ))(input)?;
    Ok((input, (name, value)))
}

fn entry_body(input: &str) -> ParseResult<'_, (&str, &str, Vec<(&str, &str)>)> {
    let (input, entrytype) = context("entry type", identifier)(input)?;
    let (input, _) = preceded(multispace0, context("'{'", char('{')))(input)?;
    let (input, key) = preceded(multispace0, context("citation key", identifier))(input)?;
    let (input, fields) = many0(preceded(tuple((multispace0, char(','), multispace0)), field))(input)?;
    let (input, _) = tuple((
        multispace0,
        opt(char(',')),
        multispace0,
        context("closing '}'", char('}')),
    ))(input)?;
    Ok((input, (entrytype, key, fields)))
}

/// Whitespace and `%` line comments between entries.
fn between_entries(input: &str) -> ParseResult<'_, usize> {
    many0_count(alt((multispace1, preceded(char('%'), not_line_ending))))(input)
}

fn line_at(content: &str, rest: &str) -> usize {
    content[..content.len() - rest.len()].matches('\n').count() + 1
}

fn parse_error(content: &str, err: nom::Err<VerboseError<&str>>) -> DatasetError {
    let (rest, expected) = match &err {
        nom::Err::Incomplete(_) => ("", None),
        nom::Err::Error(e) | nom::Err::Failure(e) => (
            e.errors.first().map_or("", |(rest, _)| *rest),
            e.errors.iter().find_map(|(_, kind)| match kind {
                VerboseErrorKind::Context(c) => Some(*c),
                _ => None,
            }),
        ),
    };
    let found = rest
        .chars()
        .next()
        .map_or_else(|| "end of file".to_string(), |c| format!("'{c}'"));
    DatasetError::Parse {
        line: line_at(content, rest),
        message: match expected {
            Some(expected) => format!("expected {expected}, found {found}"),
            None => format!("unexpected {found}"),
        },
    }
}

/// Parses entry blocks with a strict grammar (no string macros or concatenation).
pub fn parse_raw_entries(content: &str) -> Result<Vec<RawEntry>, DatasetError> {
    let mut entries = Vec::new();
    let mut rest = content;
    loop {
        (rest, _) = between_entries(rest).map_err(|e| parse_error(content, e))?;
        let Some(first) = rest.chars().next() else {
            break;
        };
        if first != '@' {
            return Err(DatasetError::Parse {
                line: line_at(content, rest),
                message: format!("unexpected '{first}' outside of an entry"),
            });
        }
        let line = line_at(content, rest);
        let (remaining, (entrytype, key, fields)) =
            preceded(char('@'), cut(entry_body))(rest).map_err(|e| parse_error(content, e))?;
        entries.push(RawEntry {
            entrytype: entrytype.to_lowercase(),
            key: key.to_string(),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            line,
        });
        rest = remaining;
    }
    Ok(entries)
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Parses `key:source;note;` items, one per line.
pub fn parse_provenance(value: &str) -> Provenance {
    value
        .lines()
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let item = item.strip_suffix(';').unwrap_or(item);
            let (head, note) = item.rsplit_once(';').unwrap_or((item, ""));
            let (key, source) = head.split_once(':')?;
            Some((key.trim().to_string(), ProvenanceEntry::new(source.trim(), note.trim())))
        })
        .collect()
}

fn status_of(key: &str, value: Option<&str>) -> Result<RecordState, DatasetError> {
    let value = value.unwrap_or("");
    value.trim().parse().map_err(|_| DatasetError::StatusFieldValue {
        id: key.to_string(),
        value: value.to_string(),
    })
}

fn record_from_raw(raw: RawEntry) -> Result<Record, DatasetError> {
    let status_value = raw
        .fields
        .iter()
        .find(|(k, _)| k == fields::STATUS)
        .map(|(_, v)| v.as_str());
    let mut record = Record::new(raw.key.clone(), raw.entrytype);
    record.status = status_of(&raw.key, status_value)?;
    for (key, value) in raw.fields {
        match key.as_str() {
            fields::STATUS => {}
            fields::ORIGIN => record.origin = parse_list(&value),
            fields::COLREV_ID => record.colrev_id = parse_list(&value),
            fields::MD_PROV => record.masterdata_provenance = parse_provenance(&value),
            fields::D_PROV => record.data_provenance = parse_provenance(&value),
            _ => {
                record.fields.insert(key, value);
            }
        }
    }
    Ok(record)
}

/// Parses the records file into records keyed by ID.
pub fn parse_records(content: &str) -> Result<Records, DatasetError> {
    let mut records = Records::new();
    let mut duplicates = Vec::new();
    for raw in parse_raw_entries(content)? {
        let record = record_from_raw(raw)?;
        if records.contains_key(&record.id) {
            duplicates.push(record.id.clone());
            continue;
        }
        records.insert(record.id.clone(), record);
    }
    if !duplicates.is_empty() {
        return Err(DatasetError::DuplicateIds(duplicates));
    }
    Ok(records)
}

/// The subset of a record needed for status computations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub id: String,
    pub origin: Vec<String>,
    pub status: RecordState,
    pub file: Option<String>,
    pub masterdata_provenance: Provenance,
    pub screening_criteria: Option<String>,
}

fn brace_balance(s: &str) -> i64 {
    s.chars().fold(0, |acc, c| match c {
        '{' => acc + 1,
        '}' => acc - 1,
        _ => acc,
    })
}

/// Strips the `= {` prefix and the closing `},` of a header field value.
fn header_value(raw: &str) -> String {
    let raw = raw.trim_end();
    let raw = raw.strip_suffix(',').unwrap_or(raw);
    let raw = raw.strip_suffix('}').unwrap_or(raw);
    raw.strip_prefix('{').unwrap_or(raw).to_string()
}

fn push_header(
    current: Option<(String, BTreeMap<String, String>)>,
    headers: &mut Vec<RecordHeader>,
) -> Result<(), DatasetError> {
    if let Some((id, values)) = current {
        headers.push(RecordHeader {
            status: status_of(&id, values.get(fields::STATUS).map(String::as_str))?,
            origin: values.get(fields::ORIGIN).map(|v| parse_list(v)).unwrap_or_default(),
            file: values.get(fields::FILE).cloned(),
            masterdata_provenance: values
                .get(fields::MD_PROV)
                .map(|v| parse_provenance(v))
                .unwrap_or_default(),
            screening_criteria: values.get(fields::SCREENING_CRITERIA).cloned(),
            id,
        });
    }
    Ok(())
}

/// A field value spanning several lines. Values of fields outside the header
/// are not kept, only their brace depth.
struct OpenValue {
    key: Option<String>,
    value: String,
    depth: i64,
}

/// Reads record headers line by line without parsing full records.
///
/// Only the fields of [`fields::HEADER_FIELDS`] are kept; past `file` in the
/// canonical order, lines are only scanned for braces so that a value line
/// starting with `@` is not taken for a new record.
pub fn parse_header_list<R: BufRead>(reader: R) -> Result<Vec<RecordHeader>, DatasetError> {
    let last_header_position = fields::canonical_position(fields::FILE).unwrap_or(usize::MAX);
    let mut headers = Vec::new();
    let mut current: Option<(String, BTreeMap<String, String>)> = None;
    let mut open: Option<OpenValue> = None;
    let mut past_header = false;

    for line in reader.lines() {
        let line = line?;
        if let Some(mut value) = open.take() {
            value.depth += brace_balance(&line);
            if value.key.is_some() {
                value.value.push('\n');
                value.value.push_str(&line);
            }
            if value.depth > 0 {
                open = Some(value);
            } else if let (Some(key), Some((_, values))) = (value.key, current.as_mut()) {
                values.insert(key, header_value(&value.value));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix('@') {
            push_header(current.take(), &mut headers)?;
            past_header = false;
            let id = rest
                .split_once('{')
                .map(|(_, id)| id.trim_end_matches(',').trim().to_string())
                .unwrap_or_default();
            current = Some((id, BTreeMap::new()));
            continue;
        }
        let Some((_, values)) = current.as_mut() else {
            continue;
        };
        let Some((key, value)) = line.trim_start().split_once('=') else {
            continue;
        };
        let key = key.trim();
        if fields::canonical_position(key).map_or(true, |pos| pos > last_header_position) {
            past_header = true;
        }
        let keep = !past_header && fields::HEADER_FIELDS.contains(&key);
        let value = value.trim_start();
        let depth = brace_balance(value);
        if depth > 0 {
            open = Some(OpenValue {
                key: keep.then(|| key.to_string()),
                value: if keep { value.to_string() } else { String::new() },
                depth,
            });
        } else if keep {
            values.insert(key.to_string(), header_value(value));
        }
    }
    push_header(current.take(), &mut headers)?;
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> Record {
        let mut record = Record::new("Staehr2010", "article");
        record.status = RecordState::MdPrepared;
        record.origin = vec!["crossref.bib/0001".into(), "dblp.bib/0002".into()];
        record
            .update_field("title", "Understanding the role of managerial agency", "crossref.bib/0001", "")
            .unwrap();
        record
            .update_field("author", "Staehr, Lorraine", "crossref.bib/0001", "")
            .unwrap();
        record
            .update_field("abstract", "Line one\nline two", "dblp.bib/0002", "")
            .unwrap();
        record.add_masterdata_provenance_note("number", "missing", "quality_model");
        record.set("colrev_pdf_id", "cpid1:abc");
        record
    }

    #[test]
    fn serialization_is_canonical() {
        let block = serialize_record(&sample());
        let expected_start = "@article{Staehr2010,\n   colrev_origin                 = {crossref.bib/0001;\n                                    dblp.bib/0002;},\n   colrev_status                 = {md_prepared},\n";
        assert!(block.starts_with(expected_start), "{block}");
        let pos = |needle: &str| block.find(needle).unwrap();
        assert!(pos("\n   colrev_masterdata_provenance ") < pos("\n   colrev_data_provenance "));
        assert!(pos("\n   colrev_pdf_id ") < pos("\n   author "));
        assert!(pos("\n   author ") < pos("\n   title "));
        assert!(pos("\n   title ") < pos("\n   abstract "));
        assert!(block.ends_with("\n}\n"));
    }

    #[test]
    fn parse_inverts_serialize() {
        let mut records = Records::new();
        records.insert("Staehr2010".into(), sample());
        let mut other = Record::new("Doe2021", "misc").with("title", "Other");
        other.origin = vec!["a.bib/1".into()];
        other.masterdata_provenance = Provenance::curated("https://github.com/org/repo");
        records.insert("Doe2021".into(), other);

        let text = serialize_records(&records);
        let parsed = parse_records(&text).unwrap();
        assert_eq!(parsed, records);
        assert_eq!(serialize_records(&parsed), text);
        assert!(text.contains("CURATED:https://github.com/org/repo;;"));
    }

    #[test]
    fn missing_status_is_rejected() {
        let err = parse_records("@article{A,\n   title = {x}\n}\n").unwrap_err();
        assert!(matches!(err, DatasetError::StatusFieldValue { .. }));
        let err = parse_records("@article{A,\n   colrev_status = {bogus}\n}\n").unwrap_err();
        assert!(matches!(err, DatasetError::StatusFieldValue { .. }));
    }

    #[test]
    fn malformed_input_reports_line() {
        let err = parse_records("@article{A,\n   colrev_status = {md_prepared},\n   title = {x\n").unwrap_err();
        assert!(matches!(err, DatasetError::Parse { .. }));

        let err = parse_records("@article{A,\n   colrev_status = {md_prepared}\n}\n\n@misc{B,\n   title {x}\n}\n")
            .unwrap_err();
        assert!(
            matches!(&err, DatasetError::Parse { line: 6, message } if message == "expected '=', found '{'"),
            "{err}"
        );

        let err = parse_records("@article{A,\n   colrev_status = {md_prepared}\n}\nstray\n").unwrap_err();
        assert!(matches!(err, DatasetError::Parse { line: 4, .. }));
    }

    #[test]
    fn comments_and_nested_braces() {
        let text = "% exported\n@Article{A,\n   colrev_status = {md_prepared},\n   title = {The {ERP} {L}ifecycle},\n   year = 2010,\n}\n";
        let records = parse_records(text).unwrap();
        assert_eq!(records["A"].entrytype, "article");
        assert_eq!(records["A"].get("title"), Some("The {ERP} {L}ifecycle"));
        assert_eq!(records["A"].get("year"), Some("2010"));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let block = "@article{A,\n   colrev_status = {md_prepared}\n}\n";
        let err = parse_records(&format!("{block}\n{block}")).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateIds(ids) if ids == vec!["A".to_string()]));
    }

    #[test]
    fn header_list_matches_full_parse() {
        let mut records = Records::new();
        let mut second = sample();
        second.id = "Zed2020".into();
        second.origin = vec!["z.bib/9".into()];
        second.set("file", "data/pdfs/Zed2020.pdf");
        second.set("screening_criteria", "c1=in;c2=in");
        records.insert("Staehr2010".into(), sample());
        records.insert("Zed2020".into(), second);
        let text = serialize_records(&records);

        let headers = parse_header_list(Cursor::new(text)).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].id, "Staehr2010");
        assert_eq!(headers[0].origin, vec!["crossref.bib/0001", "dblp.bib/0002"]);
        assert_eq!(headers[0].status, RecordState::MdPrepared);
        assert!(headers[0].masterdata_provenance.contains_key("number"));
        assert_eq!(headers[1].file.as_deref(), Some("data/pdfs/Zed2020.pdf"));
        assert_eq!(headers[1].screening_criteria.as_deref(), Some("c1=in;c2=in"));
    }

    #[test]
    fn header_scan_skips_value_lines_starting_with_at() {
        let mut records = Records::new();
        for id in ["A2020", "B2021"] {
            let mut record = sample();
            record.id = id.into();
            record.origin = vec![format!("s.bib/{id}")];
            record.set("abstract", "We study\n@handles on social media");
            record.set("note", "first line\n@second = {x}");
            records.insert(id.into(), record);
        }
        let text = serialize_records(&records);
        assert_eq!(parse_records(&text).unwrap(), records);

        let headers = parse_header_list(Cursor::new(text)).unwrap();
        let ids: Vec<&str> = headers.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["A2020", "B2021"]);
        assert_eq!(headers[1].origin, vec!["s.bib/B2021"]);
        assert!(headers.iter().all(|h| h.status == RecordState::MdPrepared));
    }

    #[test]
    fn header_scan_keeps_only_header_fields() {
        let mut record = sample();
        record.set("screening_criteria", "c1=in");
        record.set("file", "data/pdfs/Staehr2010.pdf");
        let text = serialize_record(&record);
        let headers = parse_header_list(Cursor::new(text)).unwrap();
        assert_eq!(headers.len(), 1);
        let header = &headers[0];
        assert_eq!(header.file.as_deref(), Some("data/pdfs/Staehr2010.pdf"));
        assert_eq!(header.screening_criteria.as_deref(), Some("c1=in"));
        assert_eq!(header.masterdata_provenance, record.masterdata_provenance);
    }
}
