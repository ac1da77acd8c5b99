pub mod bibtex;
pub mod checks;
pub mod git;

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::process::RecordState;
use crate::record::id_setter::{self, IdPattern};
use crate::record::{Record, RecordError, Records};
pub use bibtex::RecordHeader;
pub use git::{GitError, GitRepo};

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("records file, line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("invalid colrev_status in {id}: '{value}'")]
    StatusFieldValue { id: String, value: String },
    #[error("duplicate IDs: {}", .0.join(", "))]
    DuplicateIds(Vec<String>),
    #[error("record {0} not found in the records file")]
    RecordNotFound(String),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Well-known locations inside a project.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    root: PathBuf,
}

impl ProjectPaths {
    pub const RECORDS_FILE: &'static str = "data/records.bib";
    pub const SEARCH_DIR: &'static str = "data/search";
    pub const PDF_DIR: &'static str = "data/pdfs";
    pub const TEI_DIR: &'static str = "data/.tei";
    pub const PAPER: &'static str = "data/paper.md";
    pub const STATUS_FILE: &'static str = "status.yaml";
    pub const REPORT_LOG: &'static str = ".report.log";
    pub const CORRECTIONS_DIR: &'static str = ".corrections";
    pub const SETTINGS_FILE: &'static str = "settings.json";
    pub const GITIGNORE: &'static str = ".gitignore";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn records_file(&self) -> PathBuf {
        self.join(Self::RECORDS_FILE)
    }

    pub fn search_dir(&self) -> PathBuf {
        self.join(Self::SEARCH_DIR)
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.join(Self::PDF_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.join("data")
    }

    /// TEI fulltexts created during PDF preparation, one per record ID.
    pub fn tei_file(&self, id: &str) -> PathBuf {
        self.join(Self::TEI_DIR).join(format!("{id}.tei.xml"))
    }

    pub fn status_file(&self) -> PathBuf {
        self.join(Self::STATUS_FILE)
    }

    pub fn report_log(&self) -> PathBuf {
        self.join(Self::REPORT_LOG)
    }

    pub fn corrections_dir(&self) -> PathBuf {
        self.join(Self::CORRECTIONS_DIR)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.join(Self::SETTINGS_FILE)
    }

    /// Path relative to the project root, with `/` separators.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

/// Lazily walks the committed versions of the records file, newest first.
pub struct RecordsHistory<'a> {
    git: &'a GitRepo,
    commits: std::vec::IntoIter<git::CommitInfo>,
}

impl Iterator for RecordsHistory<'_> {
    type Item = Result<(git::CommitInfo, Records), DatasetError>;

    fn next(&mut self) -> Option<Self::Item> {
        for commit in self.commits.by_ref() {
            match self.git.show_file(&commit.sha, ProjectPaths::RECORDS_FILE) {
                Ok(Some(content)) => {
                    return Some(bibtex::parse_records(&content).map(|records| (commit, records)));
                }
                Ok(None) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}

/// Access to the records file and its git history.
#[derive(Debug, Clone)]
pub struct Dataset {
    paths: ProjectPaths,
    git: GitRepo,
}

impl Dataset {
    pub fn open(root: &Path) -> Result<Self, DatasetError> {
        Ok(Self {
            paths: ProjectPaths::new(root),
            git: GitRepo::open(root)?,
        })
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn git(&self) -> &GitRepo {
        &self.git
    }

    pub fn records_file_exists(&self) -> bool {
        self.paths.records_file().is_file()
    }

    pub fn load_records(&self) -> Result<Records, DatasetError> {
        let path = self.paths.records_file();
        if !path.is_file() {
            return Ok(Records::new());
        }
        bibtex::parse_records(&fs::read_to_string(path)?)
    }

    /// Header fields of every record (fast path).
    pub fn load_record_headers(&self) -> Result<Vec<RecordHeader>, DatasetError> {
        let path = self.paths.records_file();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        bibtex::parse_header_list(BufReader::new(File::open(path)?))
    }

    /// Set of states currently present in the records file.
    pub fn current_states(&self) -> Result<BTreeSet<RecordState>, DatasetError> {
        Ok(self.load_record_headers()?.into_iter().map(|h| h.status).collect())
    }

    fn write_atomically(&self, content: &str) -> Result<(), DatasetError> {
        let path = self.paths.records_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("bib.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn save_records(&self, records: &Records) -> Result<(), DatasetError> {
        self.write_atomically(&bibtex::serialize_records(records))?;
        debug!("saved {} records", records.len());
        Ok(())
    }

    /// Byte range of the block for `id` within `content`.
    fn locate_block(content: &str, id: &str) -> Option<(usize, usize)> {
        let mut offset = 0;
        for line in content.split_inclusive('\n') {
            if line.starts_with('@') {
                let key = line
                    .split_once('{')
                    .map(|(_, rest)| rest.trim_end().trim_end_matches(','));
                if key == Some(id) {
                    let end = content[offset..]
                        .find("\n}\n")
                        .map(|pos| offset + pos + 3)
                        .unwrap_or(content.len());
                    return Some((offset, end));
                }
            }
            offset += line.len();
        }
        None
    }

    /// Rewrites the block of `id` with the serialization of `record`.
    ///
    /// Equal-length blocks are patched in place; otherwise the file is written
    /// to a temporary file and renamed.
    pub fn update_record_by_id(&self, id: &str, record: &Record) -> Result<(), DatasetError> {
        let path = self.paths.records_file();
        let content = fs::read_to_string(&path)?;
        let (start, end) =
            Self::locate_block(&content, id).ok_or_else(|| DatasetError::RecordNotFound(id.to_string()))?;
        let block = bibtex::serialize_record(record);
        if block.len() == end - start {
            let mut file = OpenOptions::new().write(true).open(&path)?;
            file.seek(SeekFrom::Start(start as u64))?;
            file.write_all(block.as_bytes())?;
            file.flush()?;
            return Ok(());
        }
        let mut updated = String::with_capacity(content.len() + block.len());
        updated.push_str(&content[..start]);
        updated.push_str(&block);
        updated.push_str(&content[end..]);
        self.write_atomically(&updated)
    }

    /// Sets `key` to `value` in each of the listed records.
    pub fn replace_field(&self, ids: &[String], key: &str, value: &str) -> Result<(), DatasetError> {
        for id in ids {
            let content = fs::read_to_string(self.paths.records_file())?;
            let (start, end) = Self::locate_block(&content, id)
                .ok_or_else(|| DatasetError::RecordNotFound(id.clone()))?;
            let mut records = bibtex::parse_records(&content[start..end])?;
            let Some(mut record) = records.remove(id) else {
                return Err(DatasetError::RecordNotFound(id.clone()));
            };
            record.set(key, value);
            self.update_record_by_id(id, &record)?;
        }
        Ok(())
    }

    /// Re-serializes the records file canonically. Returns whether it changed.
    pub fn format_records_file(&self) -> Result<bool, DatasetError> {
        let path = self.paths.records_file();
        if !path.is_file() {
            return Ok(false);
        }
        let content = fs::read_to_string(&path)?;
        let formatted = bibtex::serialize_records(&bibtex::parse_records(&content)?);
        if formatted == content {
            return Ok(false);
        }
        self.write_atomically(&formatted)?;
        info!("formatted {}", ProjectPaths::RECORDS_FILE);
        Ok(true)
    }

    pub fn add_record_changes(&self) -> Result<(), DatasetError> {
        self.git.add(&[Path::new(ProjectPaths::RECORDS_FILE)])?;
        Ok(())
    }

    pub fn load_from_git_history(&self) -> Result<RecordsHistory<'_>, DatasetError> {
        let commits = self.git.log_for_path(ProjectPaths::RECORDS_FILE)?;
        Ok(RecordsHistory {
            git: &self.git,
            commits: commits.into_iter(),
        })
    }

    /// Records as of the last commit (empty before the first commit).
    pub fn committed_records(&self) -> Result<Records, DatasetError> {
        if !self.git.has_commits() {
            return Ok(Records::new());
        }
        match self.git.show_file("HEAD", ProjectPaths::RECORDS_FILE)? {
            Some(content) => bibtex::parse_records(&content),
            None => Ok(Records::new()),
        }
    }

    /// Last committed version of every record with curated masterdata.
    pub fn get_records_curated_prior_from_history(&self) -> Result<Records, DatasetError> {
        Ok(self
            .committed_records()?
            .into_iter()
            .filter(|(_, r)| r.masterdata_is_curated())
            .collect())
    }

    /// Origin to status, as committed.
    pub fn get_committed_origin_state(&self) -> Result<BTreeMap<String, RecordState>, DatasetError> {
        if !self.git.has_commits() {
            return Ok(BTreeMap::new());
        }
        let Some(content) = self.git.show_file("HEAD", ProjectPaths::RECORDS_FILE)? else {
            return Ok(BTreeMap::new());
        };
        let headers = bibtex::parse_header_list(std::io::Cursor::new(content))?;
        Ok(origin_states(&headers))
    }

    /// Origin to status, in the working tree.
    pub fn get_origin_state(&self) -> Result<BTreeMap<String, RecordState>, DatasetError> {
        Ok(origin_states(&self.load_record_headers()?))
    }

    /// Files in the project (outside the records file) that mention `id`.
    pub fn files_referencing_id(&self, id: &str) -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        for dir in [self.paths.search_dir(), self.paths.data_dir()] {
            if let Ok(entries) = fs::read_dir(&dir) {
                candidates.extend(entries.filter_map(|e| e.ok()).map(|e| e.path()).filter(|p| p.is_file()));
            }
        }
        let records_file = self.paths.records_file();
        candidates
            .into_iter()
            .filter(|p| *p != records_file)
            .filter(|p| {
                fs::read_to_string(p).is_ok_and(|content| {
                    content.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')).any(|w| w == id)
                })
            })
            .map(|p| PathBuf::from(self.paths.relative(&p)))
            .collect()
    }

    /// Re-keys records. Explicitly selected records that were already
    /// propagated are refused, listing the files that still cite them.
    pub fn set_ids(
        &self,
        records: &mut Records,
        pattern: IdPattern,
        selected: Option<&[String]>,
    ) -> Result<BTreeMap<String, String>, DatasetError> {
        if let Some(selected) = selected {
            let propagated: Vec<String> = selected
                .iter()
                .filter(|id| records.get(*id).is_some_and(|r| r.status.is_post_md_processed()))
                .cloned()
                .collect();
            if !propagated.is_empty() {
                let files = propagated
                    .iter()
                    .flat_map(|id| self.files_referencing_id(id))
                    .collect();
                return Err(RecordError::PropagatedIdChange {
                    ids: propagated,
                    files,
                }
                .into());
            }
        }
        Ok(id_setter::set_ids(records, pattern, selected))
    }
}

fn origin_states(headers: &[RecordHeader]) -> BTreeMap<String, RecordState> {
    headers
        .iter()
        .flat_map(|h| h.origin.iter().map(move |o| (o.clone(), h.status)))
        .collect()
}
