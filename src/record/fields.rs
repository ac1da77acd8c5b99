//! Field names and per-ENTRYTYPE field requirements.

pub const ID: &str = "ID";
pub const ENTRYTYPE: &str = "ENTRYTYPE";
pub const STATUS: &str = "colrev_status";
pub const ORIGIN: &str = "colrev_origin";
pub const MD_PROV: &str = "colrev_masterdata_provenance";
pub const D_PROV: &str = "colrev_data_provenance";
pub const COLREV_ID: &str = "colrev_id";
pub const PDF_ID: &str = "colrev_pdf_id";
pub const SCREENING_CRITERIA: &str = "screening_criteria";
pub const FILE: &str = "file";
pub const PRESCREEN_EXCLUSION: &str = "prescreen_exclusion";
pub const DOI: &str = "doi";
pub const DBLP_KEY: &str = "dblp_key";
pub const URL: &str = "url";

pub const AUTHOR: &str = "author";
pub const EDITOR: &str = "editor";
pub const TITLE: &str = "title";
pub const YEAR: &str = "year";
pub const JOURNAL: &str = "journal";
pub const BOOKTITLE: &str = "booktitle";
pub const CHAPTER: &str = "chapter";
pub const PUBLISHER: &str = "publisher";
pub const VOLUME: &str = "volume";
pub const NUMBER: &str = "number";
pub const PAGES: &str = "pages";
pub const SCHOOL: &str = "school";
pub const INSTITUTION: &str = "institution";
pub const SERIES: &str = "series";
pub const HOWPUBLISHED: &str = "howpublished";
pub const ABSTRACT: &str = "abstract";
pub const KEYWORDS: &str = "keywords";
pub const LANGUAGE: &str = "language";
pub const CURATION_ID: &str = "curation_ID";

/// Placeholder for a value that is known to be unavailable.
pub const UNKNOWN: &str = "UNKNOWN";
/// Masterdata provenance key marking curated records.
pub const CURATED: &str = "CURATED";

/// Identifying bibliographic fields.
pub const MASTERDATA_FIELDS: &[&str] = &[
    TITLE, AUTHOR, YEAR, JOURNAL, BOOKTITLE, CHAPTER, PUBLISHER, VOLUME, NUMBER, PAGES, EDITOR, DOI,
];

/// Fields that carry their own structure and never get a provenance entry.
pub const SYSTEM_FIELDS: &[&str] = &[ID, ENTRYTYPE, STATUS, ORIGIN, MD_PROV, D_PROV, COLREV_ID, PDF_ID];

/// Serialization order of the records file; other fields follow alphabetically.
pub const CANONICAL_ORDER: &[&str] = &[
    ORIGIN,
    STATUS,
    MD_PROV,
    D_PROV,
    COLREV_ID,
    PDF_ID,
    SCREENING_CRITERIA,
    FILE,
    PRESCREEN_EXCLUSION,
    DOI,
    DBLP_KEY,
    AUTHOR,
    BOOKTITLE,
    JOURNAL,
    TITLE,
    YEAR,
    VOLUME,
    NUMBER,
    PAGES,
    EDITOR,
];

/// Fields returned by the header fast path.
pub const HEADER_FIELDS: &[&str] = &[ID, ORIGIN, STATUS, FILE, MD_PROV, SCREENING_CRITERIA];

pub fn is_masterdata(field: &str) -> bool {
    MASTERDATA_FIELDS.contains(&field)
}

pub fn is_system_field(field: &str) -> bool {
    SYSTEM_FIELDS.contains(&field)
}

/// Position in the canonical order, if the field has a fixed slot.
pub fn canonical_position(field: &str) -> Option<usize> {
    CANONICAL_ORDER.iter().position(|f| *f == field)
}

/// Fields a complete record of the given type must carry.
pub fn required_fields(entrytype: &str) -> &'static [&'static str] {
    match entrytype {
        "article" => &[AUTHOR, TITLE, JOURNAL, YEAR, VOLUME, NUMBER],
        "inproceedings" => &[AUTHOR, TITLE, BOOKTITLE, YEAR],
        "incollection" => &[AUTHOR, TITLE, BOOKTITLE, PUBLISHER, YEAR],
        "inbook" => &[AUTHOR, TITLE, CHAPTER, PUBLISHER, YEAR],
        "proceedings" => &[BOOKTITLE, EDITOR, YEAR],
        "book" => &[AUTHOR, TITLE, PUBLISHER, YEAR],
        "phdthesis" | "mastersthesis" | "thesis" => &[AUTHOR, TITLE, SCHOOL, YEAR],
        "techreport" => &[AUTHOR, TITLE, INSTITUTION, YEAR],
        "software" | "online" => &[AUTHOR, TITLE, URL],
        _ => &[AUTHOR, TITLE, YEAR],
    }
}

/// Fields that contradict the given type.
pub fn inconsistent_fields(entrytype: &str) -> &'static [&'static str] {
    match entrytype {
        "article" => &[BOOKTITLE],
        "inproceedings" => &[JOURNAL, NUMBER, "issue"],
        "incollection" => &[JOURNAL],
        "book" => &[JOURNAL, BOOKTITLE],
        "phdthesis" | "mastersthesis" | "thesis" => &[JOURNAL, BOOKTITLE],
        "techreport" => &[JOURNAL, BOOKTITLE],
        _ => &[],
    }
}

/// Types that carry little structure; a merge prefers anything else.
pub fn is_generic_entrytype(entrytype: &str) -> bool {
    matches!(entrytype, "misc" | "unpublished" | "online" | "other")
}
