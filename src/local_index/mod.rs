//! Content-addressed index of records across all projects on the machine.
//!
//! Rows are keyed by `sha256(colrev_id)`. A slot that is taken by a different
//! colrev_id is resolved by adding 10 to the hash (modulo 2^256) until a free
//! slot or the matching row is found; every reader follows the same chain.

pub mod store;
pub mod tei;

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dataset::{bibtex, ProjectPaths};
use crate::environment::registry::Registry;
use crate::matcher::{string_ratio, title_similarity};
use crate::process::RecordState;
use crate::record::colrev_id::create_colrev_id;
use crate::record::{fields, ColrevIdAuthors, Provenance, ProvenanceEntry, Record, RecordError, Records};
use crate::report::progress_bar;
use crate::settings::Settings;
use store::{GlobalKey, IndexRow, IndexStore};
use tei::TeiStore;

/// Minimum title similarity for accepting a hit on `colrev_pdf_id` alone.
const PDF_ID_TITLE_SIMILARITY: f64 = 0.9;
const HASH_INCREMENT: u8 = 10;
const SEARCH_LIMIT: usize = 100;
const TEI_SOURCE: &str = "tei";

#[derive(Error, Debug)]
pub enum LocalIndexError {
    #[error("local index database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("local index row cannot be decoded: {0}")]
    Json(#[from] serde_json::Error),
    #[error("local index IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid TEI document: {0}")]
    Tei(String),
    #[error("record {0} not in local index")]
    RecordNotInIndex(String),
    #[error("record {id} not in table of contents {toc_key}")]
    RecordNotInToc { id: String, toc_key: String },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("local index connection poisoned")]
    Poisoned,
}

/// Answer of [`LocalIndex::is_duplicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateVerdict {
    Yes,
    No,
    Unknown,
}

impl fmt::Display for DuplicateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DuplicateVerdict::Yes => "yes",
            DuplicateVerdict::No => "no",
            DuplicateVerdict::Unknown => "unknown",
        })
    }
}

/// How the records of one repository enter the index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexOptions {
    pub curated_masterdata: bool,
    pub curated_fields: Vec<String>,
    pub curation_url: Option<String>,
    pub colrev_id_authors: ColrevIdAuthors,
}

impl IndexOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            curated_masterdata: settings.project.curated_masterdata,
            curated_fields: settings.project.curated_fields.clone(),
            curation_url: settings.project.curation_url.clone(),
            colrev_id_authors: settings.project.colrev_id_authors,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexSummary {
    pub inserted: usize,
    pub amended: usize,
    pub skipped: usize,
}

impl IndexSummary {
    fn add(&mut self, other: IndexSummary) {
        self.inserted += other.inserted;
        self.amended += other.amended;
        self.skipped += other.skipped;
    }
}

enum Stored {
    Inserted(String),
    Amended(String),
}

pub fn record_hash(colrev_id: &str) -> String {
    hex::encode(Sha256::digest(colrev_id.as_bytes()))
}

/// Adds 10 to the 256-bit big-endian value of `hash`, wrapping around.
pub fn increment_hash(hash: &str) -> String {
    let Ok(mut bytes) = hex::decode(hash) else {
        return hash.to_string();
    };
    let mut carry = u16::from(HASH_INCREMENT);
    for byte in bytes.iter_mut().rev() {
        let sum = u16::from(*byte) + carry;
        *byte = (sum & 0xff) as u8;
        carry = sum >> 8;
        if carry == 0 {
            break;
        }
    }
    hex::encode(bytes)
}

fn set_provenance_source(provenance: &mut Provenance, key: &str, source: &str) {
    match provenance.get_mut(key) {
        Some(entry) => entry.source = source.to_string(),
        None => provenance.insert(key, ProvenanceEntry::new(source, "")),
    }
}

pub struct LocalIndex {
    store: IndexStore,
    tei: TeiStore,
}

impl LocalIndex {
    pub fn open(db_path: &Path, tei_dir: &Path) -> Result<Self, LocalIndexError> {
        Ok(Self {
            store: IndexStore::open(db_path)?,
            tei: TeiStore::new(tei_dir),
        })
    }

    pub fn in_memory(tei_dir: &Path) -> Result<Self, LocalIndexError> {
        Ok(Self {
            store: IndexStore::in_memory()?,
            tei: TeiStore::new(tei_dir),
        })
    }

    pub fn count(&self) -> Result<usize, LocalIndexError> {
        self.store.count()
    }

    pub fn reinitialize(&self) -> Result<(), LocalIndexError> {
        info!("reinitializing the local index");
        self.store.reinitialize()
    }

    /// Follows the rehash chain of `colrev_id` to its row.
    fn locate(&self, colrev_id: &str) -> Result<Option<IndexRow>, LocalIndexError> {
        let mut id = record_hash(colrev_id);
        while let Some(row) = self.store.get(&id)? {
            if row.colrev_id == colrev_id || row.colrev_ids.iter().any(|c| c == colrev_id) {
                return Ok(Some(row));
            }
            debug!("hash collision at {id} for {colrev_id}");
            id = increment_hash(&id);
        }
        Ok(None)
    }

    /// Copy of `record` as stored in the index, or `None` if it must not be indexed.
    fn prepare_for_indexing(
        &self,
        record: &Record,
        repo_source_path: &Path,
        options: &IndexOptions,
    ) -> Result<Option<(Record, String)>, RecordError> {
        // duplicates are only resolved from md_processed on
        if !record.status.is_post_md_processed() || record.status == RecordState::RevPrescreenExcluded {
            return Ok(None);
        }
        let mut record = record.clone();
        for key in [fields::SCREENING_CRITERIA, fields::PRESCREEN_EXCLUSION, "note", "link", "cited_by"] {
            record.remove_field(key);
        }
        if record.status < RecordState::PdfPrepared {
            record.remove_field(fields::PDF_ID);
        }
        if !record
            .known(fields::YEAR)
            .is_some_and(|y| !y.is_empty() && y.chars().all(|c| c.is_ascii_digit()))
        {
            debug!("{} not indexable: year", record.id);
            return Ok(None);
        }
        if record.get(fields::LANGUAGE).is_some_and(|l| l.chars().count() != 3) {
            record.remove_field(fields::LANGUAGE);
        }
        if let Some(file) = record.get(fields::FILE).map(String::from) {
            let path = repo_source_path.join(&file);
            if path.is_file() {
                record.set(fields::FILE, &path.to_string_lossy());
            } else {
                record.remove_field(fields::FILE);
            }
        }
        record.origin.clear();

        let repo = repo_source_path.to_string_lossy().into_owned();
        let curation_source = options.curation_url.clone().unwrap_or_else(|| repo.clone());
        if options.curated_masterdata {
            record.masterdata_provenance = Provenance::curated(&curation_source);
        }
        let keys: Vec<String> = record.data_fields().map(|(k, _)| k.clone()).collect();
        for key in keys {
            if fields::is_masterdata(&key) {
                if !record.masterdata_is_curated() {
                    set_provenance_source(&mut record.masterdata_provenance, &key, &repo);
                }
            } else if options.curated_fields.contains(&key) {
                set_provenance_source(
                    &mut record.data_provenance,
                    &key,
                    &format!("{}:{curation_source}", fields::CURATED),
                );
            } else {
                set_provenance_source(&mut record.data_provenance, &key, &repo);
            }
        }

        let colrev_id = create_colrev_id(&record, false, options.colrev_id_authors)?;
        if !record.colrev_id.contains(&colrev_id) {
            record.colrev_id.push(colrev_id.clone());
        }
        Ok(Some((record, colrev_id)))
    }

    /// Inserts into a free slot or amends the row that holds the same colrev_id.
    fn insert_or_amend(
        &self,
        record: Record,
        colrev_id: &str,
        repo: &str,
    ) -> Result<Stored, LocalIndexError> {
        let mut id = record_hash(colrev_id);
        loop {
            match self.store.get(&id)? {
                None => {
                    let row = IndexRow {
                        id: id.clone(),
                        colrev_id: colrev_id.to_string(),
                        colrev_ids: record.colrev_id.clone(),
                        curated_source: record.masterdata_provenance.curation_source().map(String::from),
                        repo_paths: vec![repo.to_string()],
                        record,
                    };
                    self.store.put(&row)?;
                    return Ok(Stored::Inserted(id));
                }
                Some(mut row)
                    if row.colrev_id == colrev_id || row.colrev_ids.iter().any(|c| c == colrev_id) =>
                {
                    Self::amend(&mut row, &record, repo);
                    self.store.put(&row)?;
                    return Ok(Stored::Amended(id));
                }
                Some(_) => {
                    debug!("hash collision at {id} for {colrev_id}");
                    id = increment_hash(&id);
                }
            }
        }
    }

    /// The first indexer wins: only absent fields and the repository path are added.
    /// Stored colrev_ids never change.
    fn amend(row: &mut IndexRow, record: &Record, repo: &str) {
        if !row.repo_paths.iter().any(|p| p == repo) {
            row.repo_paths.push(repo.to_string());
        }
        let stored_is_curated = row.record.masterdata_is_curated();
        for (key, value) in record.data_fields() {
            if row.record.contains(key) {
                continue;
            }
            let masterdata = fields::is_masterdata(key);
            if masterdata && stored_is_curated {
                continue;
            }
            row.record.set(key, value);
            let entry = record
                .provenance_for(key)
                .cloned()
                .unwrap_or_else(|| ProvenanceEntry::new(repo, ""));
            if masterdata {
                row.record.masterdata_provenance.insert(key.clone(), entry);
            } else {
                row.record.data_provenance.insert(key.clone(), entry);
            }
        }
    }

    /// Adds abstract and keywords from the project's TEI fulltext when missing.
    fn enrich_from_tei(record: &mut Record, tei: &str) {
        match tei::parse_tei(tei) {
            Ok(metadata) => {
                if let Some(text) = metadata.abstract_text.filter(|_| !record.contains(fields::ABSTRACT)) {
                    record.set(fields::ABSTRACT, &text);
                    set_provenance_source(&mut record.data_provenance, fields::ABSTRACT, TEI_SOURCE);
                }
                if !metadata.keywords.is_empty() && !record.contains(fields::KEYWORDS) {
                    record.set(fields::KEYWORDS, &metadata.keywords.join(", "));
                    set_provenance_source(&mut record.data_provenance, fields::KEYWORDS, TEI_SOURCE);
                }
            }
            Err(e) => warn!("{}: {e}", record.id),
        }
    }

    /// Indexes the records of one repository.
    pub fn index_records(
        &self,
        records: &Records,
        repo_source_path: &Path,
        options: &IndexOptions,
    ) -> Result<IndexSummary, LocalIndexError> {
        let paths = ProjectPaths::new(repo_source_path);
        let repo = repo_source_path.to_string_lossy().into_owned();
        let mut summary = IndexSummary::default();
        // None marks a dropped (incomplete) table of contents
        let mut tocs: BTreeMap<String, Option<Vec<String>>> = BTreeMap::new();

        for record in records.values() {
            if options.curated_masterdata && matches!(record.entrytype.as_str(), "article" | "inproceedings") {
                self.collect_toc_item(&mut tocs, record, options.colrev_id_authors);
            }
            let prepared = match self.prepare_for_indexing(record, repo_source_path, options) {
                Ok(Some(prepared)) => prepared,
                Ok(None) => {
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    debug!("{} not indexable: {e}", record.id);
                    summary.skipped += 1;
                    continue;
                }
            };
            let (mut indexed, colrev_id) = prepared;
            let tei_path = paths.tei_file(&record.id);
            let tei = if tei_path.is_file() {
                Some(fs::read_to_string(&tei_path)?)
            } else {
                None
            };
            if let Some(tei) = &tei {
                Self::enrich_from_tei(&mut indexed, tei);
            }
            let id = match self.insert_or_amend(indexed, &colrev_id, &repo)? {
                Stored::Inserted(id) => {
                    summary.inserted += 1;
                    id
                }
                Stored::Amended(id) => {
                    summary.amended += 1;
                    id
                }
            };
            if let Some(tei) = &tei {
                if self.tei.load(&id)?.is_none() {
                    self.tei.store(&id, tei)?;
                }
            }
        }

        for (toc_key, ids) in tocs {
            if let Some(ids) = ids {
                self.store.toc_add(&toc_key, &ids)?;
            }
        }
        Ok(summary)
    }

    fn collect_toc_item(
        &self,
        tocs: &mut BTreeMap<String, Option<Vec<String>>>,
        record: &Record,
        authors: ColrevIdAuthors,
    ) {
        let Ok(toc_key) = record.toc_key() else {
            return;
        };
        let colrev_id = if record.status.is_post_md_processed() {
            create_colrev_id(record, true, authors).ok()
        } else {
            None
        };
        match colrev_id {
            None => {
                tocs.insert(toc_key, None);
            }
            Some(cid) => {
                if let Some(ids) = tocs.entry(toc_key).or_insert_with(|| Some(Vec::new())) {
                    ids.push(cid);
                }
            }
        }
    }

    /// Indexes every registered repository. Curated repositories go first so that
    /// their masterdata takes precedence.
    pub fn index_repositories(&self, registry: &Registry) -> IndexSummary {
        let mut repos: Vec<(std::path::PathBuf, Settings)> = Vec::new();
        for repo in &registry.repos {
            let path = &repo.repo_source_path;
            let settings_file = ProjectPaths::new(path).settings_file();
            match Settings::load(&settings_file) {
                Ok(settings) => repos.push((path.clone(), settings)),
                Err(e) => warn!("skipping {}: {e}", path.display()),
            }
        }
        repos.sort_by_key(|(_, settings)| !settings.project.curated_masterdata);

        let pb = progress_bar(repos.len() as u64);

        let mut summary = IndexSummary::default();
        for (path, settings) in repos {
            pb.set_message(path.display().to_string());
            let records_file = ProjectPaths::new(&path).records_file();
            let records = fs::read_to_string(&records_file)
                .map_err(|e| e.to_string())
                .and_then(|content| bibtex::parse_records(&content).map_err(|e| e.to_string()));
            match records {
                Ok(records) => {
                    match self.index_records(&records, &path, &IndexOptions::from_settings(&settings)) {
                        Ok(s) => summary.add(s),
                        Err(e) => warn!("indexing {} failed: {e}", path.display()),
                    }
                }
                Err(e) => warn!("cannot read records of {}: {e}", path.display()),
            }
            pb.inc(1);
        }
        pb.finish_with_message("Done!");
        summary
    }

    fn prepare_for_return(row: IndexRow, include_file: bool, include_colrev_ids: bool) -> Record {
        let mut record = row.record;
        record.status = RecordState::MdPrepared;
        if record
            .get(fields::FILE)
            .is_some_and(|f| !Path::new(f).is_file())
        {
            record.remove_field(fields::FILE);
        }
        if include_colrev_ids {
            record.colrev_id = row.colrev_ids;
        } else {
            record.colrev_id.clear();
        }
        if !include_file {
            record.remove_field(fields::FILE);
            record.remove_field(fields::PDF_ID);
            record.data_provenance.remove(fields::PDF_ID);
        }
        if let Some(source) = record.masterdata_provenance.curation_source().map(String::from) {
            let curation_id = format!("{source}#{}", record.id);
            record.set(fields::CURATION_ID, &curation_id);
        }
        record
    }

    /// Looks a record up by colrev_id, then by global identifiers.
    /// `authors` is the fingerprint variant used when the record has no `colrev_id`.
    pub fn retrieve(
        &self,
        record: &Record,
        authors: ColrevIdAuthors,
        include_file: bool,
        include_colrev_ids: bool,
    ) -> Result<Record, LocalIndexError> {
        let colrev_ids = record.get_colrev_id(true, authors).unwrap_or_default();
        for colrev_id in &colrev_ids {
            if let Some(row) = self.locate(colrev_id)? {
                if row.record.entrytype == record.entrytype {
                    return Ok(Self::prepare_for_return(row, include_file, include_colrev_ids));
                }
            }
        }

        for key in GlobalKey::ALL {
            let Some(value) = record.get(key.column()) else {
                continue;
            };
            let Some(row) = self.store.find_by(key, value)? else {
                continue;
            };
            if key == GlobalKey::ColrevPdfId
                && record.known(fields::TITLE).is_some()
                && title_similarity(record, &row.record) < PDF_ID_TITLE_SIMILARITY
            {
                debug!("{}: colrev_pdf_id hit with a different title", record.id);
                continue;
            }
            return Ok(Self::prepare_for_return(row, include_file, include_colrev_ids));
        }
        Err(LocalIndexError::RecordNotInIndex(record.id.clone()))
    }

    /// Best match within the record's table of contents.
    pub fn retrieve_from_toc(
        &self,
        record: &Record,
        authors: ColrevIdAuthors,
        similarity_threshold: f64,
        include_file: bool,
    ) -> Result<Record, LocalIndexError> {
        let not_found = || LocalIndexError::RecordNotInIndex(record.id.clone());
        let toc_key = record.toc_key().map_err(|_| not_found())?;
        let toc_items = self.store.toc_get(&toc_key)?.unwrap_or_default();
        if toc_items.is_empty() {
            return Err(not_found());
        }
        let colrev_id = create_colrev_id(record, true, authors)?;
        let best = toc_items
            .iter()
            .map(|cid| (cid, string_ratio(&colrev_id, cid)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((cid, similarity)) if similarity > similarity_threshold => {
                let row = self.locate(cid)?.ok_or_else(not_found)?;
                Ok(Self::prepare_for_return(row, include_file, false))
            }
            _ => Err(LocalIndexError::RecordNotInToc {
                id: record.id.clone(),
                toc_key,
            }),
        }
    }

    /// Year of the issue the record belongs to (journal, volume, number).
    pub fn get_year_from_toc(&self, record: &Record) -> Result<Option<String>, LocalIndexError> {
        let Ok(toc_key) = record.toc_key() else {
            return Ok(None);
        };
        let Some(first) = self.store.toc_get(&toc_key)?.and_then(|ids| ids.into_iter().next()) else {
            return Ok(None);
        };
        Ok(self
            .locate(&first)?
            .and_then(|row| row.record.known(fields::YEAR).map(String::from)))
    }

    pub fn is_duplicate(&self, colrev_ids_a: &[String], colrev_ids_b: &[String]) -> DuplicateVerdict {
        if colrev_ids_a.is_empty()
            || colrev_ids_b.is_empty()
            || colrev_ids_a.iter().chain(colrev_ids_b).any(|c| c.len() < 20)
        {
            return DuplicateVerdict::Unknown;
        }
        if colrev_ids_a.iter().any(|c| colrev_ids_b.contains(c)) {
            return DuplicateVerdict::Yes;
        }
        match (self.locate_any(colrev_ids_a), self.locate_any(colrev_ids_b)) {
            (Ok(Some(a)), Ok(Some(b))) => Self::verdict_from_rows(&a, &b),
            (Err(e), _) | (_, Err(e)) => {
                warn!("local index lookup failed: {e}");
                DuplicateVerdict::Unknown
            }
            _ => DuplicateVerdict::Unknown,
        }
    }

    fn locate_any(&self, colrev_ids: &[String]) -> Result<Option<IndexRow>, LocalIndexError> {
        for colrev_id in colrev_ids {
            if let Some(row) = self.locate(colrev_id)? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn verdict_from_rows(a: &IndexRow, b: &IndexRow) -> DuplicateVerdict {
        let repos_a: BTreeSet<&String> = a.repo_paths.iter().collect();
        let same_repository = b.repo_paths.iter().any(|p| repos_a.contains(p));
        if same_repository {
            // there are no duplicates within a repository past md_processed
            return if a.colrev_ids.iter().any(|c| b.colrev_ids.contains(c)) {
                DuplicateVerdict::Yes
            } else {
                DuplicateVerdict::No
            };
        }
        // curated repositories partition the venues
        match (&a.curated_source, &b.curated_source) {
            (Some(x), Some(y)) if x != y => DuplicateVerdict::No,
            _ => DuplicateVerdict::Unknown,
        }
    }

    /// Fields the record's table of contents shows the venue does not use.
    pub fn get_fields_to_remove(&self, record: &Record) -> Result<Vec<String>, LocalIndexError> {
        if record.entrytype != "article"
            || record.get(fields::VOLUME).is_none()
            || record.get(fields::NUMBER).is_none()
        {
            return Ok(Vec::new());
        }
        let Ok(full) = record.toc_key() else {
            return Ok(Vec::new());
        };
        if self.store.toc_exists(&full)? {
            return Ok(Vec::new());
        }
        let variants: [&[&str]; 3] = [
            &[fields::NUMBER],
            &[fields::VOLUME],
            &[fields::NUMBER, fields::VOLUME],
        ];
        for removed in variants {
            let mut reduced = record.clone();
            for field in removed {
                reduced.fields.remove(*field);
            }
            let Ok(key) = reduced.toc_key() else {
                continue;
            };
            if self.store.toc_exists(&key)? {
                return Ok(removed.iter().map(|f| f.to_string()).collect());
            }
        }
        Ok(Vec::new())
    }

    /// Records whose title contains `query`.
    pub fn search(&self, query: &str) -> Result<Vec<Record>, LocalIndexError> {
        Ok(self
            .store
            .search_title(query, SEARCH_LIMIT)?
            .into_iter()
            .map(|row| Self::prepare_for_return(row, false, true))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn article(id: &str, title: &str, journal: &str, number: &str) -> Record {
        let mut record = Record::new(id, "article")
            .with(fields::AUTHOR, "Staehr, Lorraine")
            .with(fields::TITLE, title)
            .with(fields::JOURNAL, journal)
            .with(fields::VOLUME, "20")
            .with(fields::NUMBER, number)
            .with(fields::YEAR, "2010");
        record.status = RecordState::MdProcessed;
        record.origin = vec![format!("s.bib/{id}")];
        record
    }

    fn records(list: Vec<Record>) -> Records {
        list.into_iter().map(|r| (r.id.clone(), r)).collect()
    }

    fn index() -> (tempfile::TempDir, LocalIndex) {
        let dir = tempdir().unwrap();
        let index = LocalIndex::in_memory(&dir.path().join("tei")).unwrap();
        (dir, index)
    }

    fn cid(record: &Record) -> String {
        create_colrev_id(record, true, ColrevIdAuthors::FirstAuthor).unwrap()
    }

    fn curated(url: &str) -> IndexOptions {
        IndexOptions {
            curated_masterdata: true,
            curation_url: Some(url.to_string()),
            ..IndexOptions::default()
        }
    }

    #[test]
    fn increment_wraps_modulo_256_bits() {
        assert_eq!(increment_hash(&"00".repeat(32)), format!("{}0a", "00".repeat(31)));
        assert_eq!(increment_hash(&format!("{}fa", "00".repeat(31))), format!("{}0104", "00".repeat(30)));
        assert_eq!(increment_hash(&"ff".repeat(32)), format!("{}09", "00".repeat(31)));
    }

    #[test]
    fn index_and_retrieve() {
        let (_dir, index) = index();
        let paper = article("Staehr2010", "Understanding managerial agency", "Information Systems Journal", "3")
            .with(fields::DOI, "10.1111/j.1365-2575.2009.00345.x");
        let summary = index
            .index_records(&records(vec![paper.clone()]), Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();
        assert_eq!(summary.inserted, 1);

        let retrieved = index.retrieve(&paper, ColrevIdAuthors::FirstAuthor, false, true).unwrap();
        assert_eq!(retrieved.status, RecordState::MdPrepared);
        assert!(retrieved.origin.is_empty());
        assert_eq!(retrieved.colrev_id, vec![cid(&paper)]);

        // global identifier fallback
        let by_doi = Record::new("x", "misc").with(fields::DOI, "10.1111/j.1365-2575.2009.00345.x");
        assert_eq!(index.retrieve(&by_doi, ColrevIdAuthors::FirstAuthor, false, false).unwrap().id, "Staehr2010");

        let unknown = Record::new("y", "misc").with(fields::DOI, "10.1/other");
        assert!(matches!(
            index.retrieve(&unknown, ColrevIdAuthors::FirstAuthor, false, false),
            Err(LocalIndexError::RecordNotInIndex(_))
        ));
    }

    #[test]
    fn unprocessed_records_are_not_indexed() {
        let (_dir, index) = index();
        let mut paper = article("A", "Title", "Journal", "1");
        paper.status = RecordState::MdPrepared;
        let summary = index
            .index_records(&records(vec![paper]), Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();
        assert_eq!(summary, IndexSummary { inserted: 0, amended: 0, skipped: 1 });
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn amend_keeps_first_values_and_adds_repo_path() {
        let (_dir, index) = index();
        let first = article("A", "Title", "Journal", "1");
        let second = article("B", "Title", "Journal", "1")
            .with(fields::ABSTRACT, "Added later");
        index
            .index_records(&records(vec![first.clone()]), Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();
        let summary = index
            .index_records(&records(vec![second]), Path::new("/repos/b"), &IndexOptions::default())
            .unwrap();
        assert_eq!(summary.amended, 1);

        let row = index.locate(&cid(&first)).unwrap().unwrap();
        assert_eq!(row.record.id, "A");
        assert_eq!(row.record.get(fields::ABSTRACT), Some("Added later"));
        assert_eq!(row.repo_paths, vec!["/repos/a", "/repos/b"]);
        assert_eq!(row.colrev_ids, vec![cid(&first)]);
    }

    #[test]
    fn collisions_follow_the_rehash_chain() {
        let (_dir, index) = index();
        let paper = article("A", "Title", "Journal", "1");
        let colrev_id = cid(&paper);
        // occupy the slot with a foreign row
        index
            .store
            .put(&IndexRow {
                id: record_hash(&colrev_id),
                colrev_id: "colrev_id1:|a|other|1|1|2000|x|y".into(),
                colrev_ids: vec!["colrev_id1:|a|other|1|1|2000|x|y".into()],
                curated_source: None,
                repo_paths: vec!["/repos/z".into()],
                record: Record::new("Other", "article"),
            })
            .unwrap();
        index
            .index_records(&records(vec![paper.clone()]), Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();
        let row = index.locate(&colrev_id).unwrap().unwrap();
        assert_eq!(row.id, increment_hash(&record_hash(&colrev_id)));
        assert_eq!(index.retrieve(&paper, ColrevIdAuthors::FirstAuthor, false, false).unwrap().id, "A");
    }

    #[test]
    fn duplicate_verdicts() {
        let (_dir, index) = index();
        let x = article("X", "Platform governance", "Journal X", "1");
        let y = article("Y", "Ecosystem dynamics", "Journal Y", "1");
        index
            .index_records(&records(vec![x.clone()]), Path::new("/repos/x"), &curated("https://example.org/x"))
            .unwrap();
        index
            .index_records(&records(vec![y.clone()]), Path::new("/repos/y"), &curated("https://example.org/y"))
            .unwrap();
        let (cx, cy) = (vec![cid(&x)], vec![cid(&y)]);

        assert_eq!(index.is_duplicate(&cx, &cx), DuplicateVerdict::Yes);
        assert_eq!(index.is_duplicate(&cx, &cy), DuplicateVerdict::No);
        assert_eq!(index.is_duplicate(&cy, &cx), DuplicateVerdict::No);
        assert_eq!(index.is_duplicate(&[], &cx), DuplicateVerdict::Unknown);
        assert_eq!(index.is_duplicate(&["short".into()], &cx), DuplicateVerdict::Unknown);
        let absent = vec!["colrev_id1:|a|nowhere|1|1|2001|z|q".to_string()];
        assert_eq!(index.is_duplicate(&cx, &absent), DuplicateVerdict::Unknown);
    }

    #[test]
    fn same_repository_distinct_records_are_not_duplicates() {
        let (_dir, index) = index();
        let a = article("A", "First paper", "Journal", "1");
        let b = article("B", "Second paper", "Journal", "1");
        index
            .index_records(&records(vec![a.clone(), b.clone()]), Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();
        assert_eq!(index.is_duplicate(&[cid(&a)], &[cid(&b)]), DuplicateVerdict::No);
    }

    #[test]
    fn toc_retrieval_and_fields_to_remove() {
        let (_dir, index) = index();
        let mut paper = article("A", "Understanding managerial agency", "Journal", "");
        paper.fields.remove(fields::NUMBER);
        index
            .index_records(&records(vec![paper]), Path::new("/repos/c"), &curated("https://example.org/c"))
            .unwrap();

        // the venue does not use issue numbers
        let with_number = article("Q", "Understanding managerial agency", "Journal", "4");
        assert_eq!(index.get_fields_to_remove(&with_number).unwrap(), vec!["number"]);

        let mut query = with_number.clone();
        query.fields.remove(fields::NUMBER);
        query.set(fields::TITLE, "Understanding managerial agency.");
        let found = index.retrieve_from_toc(&query, ColrevIdAuthors::FirstAuthor, 0.8, false).unwrap();
        assert_eq!(found.id, "A");
        assert!(found.get(fields::CURATION_ID).is_some());
        assert_eq!(index.get_year_from_toc(&query).unwrap().as_deref(), Some("2010"));
    }

    #[test]
    fn incomplete_tables_of_contents_are_dropped() {
        let (_dir, index) = index();
        let done = article("A", "Understanding managerial agency", "Journal", "2");
        let mut pending = article("B", "Another paper of the issue", "Journal", "2");
        pending.status = RecordState::MdPrepared;
        index
            .index_records(&records(vec![done.clone(), pending]), Path::new("/repos/c"), &curated("https://example.org/c"))
            .unwrap();
        assert_eq!(index.count().unwrap(), 1);
        assert!(!index.store.toc_exists(&done.toc_key().unwrap()).unwrap());
        assert_eq!(index.get_year_from_toc(&done).unwrap(), None);
    }

    #[test]
    fn lookups_use_the_configured_author_variant() {
        let (_dir, index) = index();
        let paper = article("A", "Understanding managerial agency", "Journal", "1")
            .with(fields::AUTHOR, "Staehr, Lorraine and Shanks, Graeme");
        let options = IndexOptions {
            colrev_id_authors: ColrevIdAuthors::ThreeAuthors,
            ..IndexOptions::default()
        };
        index
            .index_records(&records(vec![paper.clone()]), Path::new("/repos/a"), &options)
            .unwrap();

        assert!(paper.colrev_id.is_empty());
        assert_eq!(
            index.retrieve(&paper, ColrevIdAuthors::ThreeAuthors, false, false).unwrap().id,
            "A"
        );
        assert!(matches!(
            index.retrieve(&paper, ColrevIdAuthors::FirstAuthor, false, false),
            Err(LocalIndexError::RecordNotInIndex(_))
        ));
    }

    #[test]
    fn verdicts_do_not_flip_when_more_repositories_are_indexed() {
        let (_dir, index) = index();
        let a = article("A", "First paper", "Journal", "1");
        let b = article("B", "Second paper", "Journal", "1");
        let x = article("X", "Platform governance", "Journal X", "1");
        let y = article("Y", "Ecosystem dynamics", "Journal Y", "1");
        index
            .index_records(&records(vec![a.clone(), b.clone()]), Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();
        index
            .index_records(&records(vec![x.clone()]), Path::new("/repos/x"), &curated("https://example.org/x"))
            .unwrap();
        index
            .index_records(&records(vec![y.clone()]), Path::new("/repos/y"), &curated("https://example.org/y"))
            .unwrap();
        let pairs = [
            (vec![cid(&a)], vec![cid(&b)]),
            (vec![cid(&x)], vec![cid(&y)]),
            (vec![cid(&a)], vec![cid(&a)]),
        ];
        let before: Vec<DuplicateVerdict> = pairs.iter().map(|(p, q)| index.is_duplicate(p, q)).collect();
        assert_eq!(before, vec![DuplicateVerdict::No, DuplicateVerdict::No, DuplicateVerdict::Yes]);

        // amends of every stored row plus new rows from other repositories
        let mut later = vec![
            a.clone().with(fields::ABSTRACT, "Amended"),
            b.clone().with(fields::DOI, "10.1000/b"),
            x.clone().with(fields::ABSTRACT, "Amended"),
            y.clone(),
        ];
        later.push(article("C", "Third paper", "Journal", "1"));
        index
            .index_records(&records(later), Path::new("/repos/b"), &IndexOptions::default())
            .unwrap();
        index
            .index_records(
                &records(vec![article("Z", "Platform governance revisited", "Journal X", "2")]),
                Path::new("/repos/z"),
                &curated("https://example.org/z"),
            )
            .unwrap();

        let after: Vec<DuplicateVerdict> = pairs.iter().map(|(p, q)| index.is_duplicate(p, q)).collect();
        assert_eq!(after, before);
        assert!(index.count().unwrap() >= 6);
    }

    #[test]
    fn pdf_id_hits_require_similar_titles() {
        let (_dir, index) = index();
        let mut paper = article("A", "Understanding managerial agency", "Journal", "1")
            .with(fields::PDF_ID, "cpid1:abc");
        paper.status = RecordState::RevIncluded;
        index
            .index_records(&records(vec![paper]), Path::new("/repos/a"), &IndexOptions::default())
            .unwrap();

        let same = Record::new("q", "misc")
            .with(fields::PDF_ID, "cpid1:abc")
            .with(fields::TITLE, "Understanding Managerial Agency");
        assert!(index.retrieve(&same, ColrevIdAuthors::FirstAuthor, false, false).is_ok());
        let other = Record::new("q", "misc")
            .with(fields::PDF_ID, "cpid1:abc")
            .with(fields::TITLE, "Quantum computing in finance");
        assert!(index.retrieve(&other, ColrevIdAuthors::FirstAuthor, false, false).is_err());
    }

    #[test]
    fn tei_fulltext_enriches_indexed_records() {
        let dir = tempdir().unwrap();
        let repo = dir.path().join("repo");
        let paths = ProjectPaths::new(&repo);
        fs::create_dir_all(paths.tei_file("A").parent().unwrap()).unwrap();
        fs::write(
            paths.tei_file("A"),
            "<TEI><teiHeader><profileDesc><abstract><p>Short abstract.</p></abstract></profileDesc></teiHeader></TEI>",
        )
        .unwrap();
        let index = LocalIndex::in_memory(&dir.path().join("tei")).unwrap();
        let paper = article("A", "Title", "Journal", "1");
        index
            .index_records(&records(vec![paper.clone()]), &repo, &IndexOptions::default())
            .unwrap();
        let row = index.locate(&cid(&paper)).unwrap().unwrap();
        assert_eq!(row.record.get(fields::ABSTRACT), Some("Short abstract."));
        assert!(index.tei.load(&row.id).unwrap().is_some());
        assert_eq!(index.search("title").unwrap().len(), 1);
    }
}
