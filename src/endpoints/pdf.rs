//! PDF retrieval and preparation endpoints.

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{async_trait, EndpointError, PdfGetEndpoint, PdfPrepEndpoint, PdfPrepOutcome};
use crate::dataset::ProjectPaths;
use crate::environment::services::GROBID;
use crate::environment::Environment;
use crate::local_index::LocalIndexError;
use crate::matcher::{normalize_string, string_ratio};
use crate::record::{fields, ColrevIdAuthors, Record};
use crate::settings::EndpointSettings;

pub const PDF_ID_PREFIX: &str = "cpid1:";
const FILENAME_TITLE_SIMILARITY: f64 = 0.9;

/// `cpid1:<sha256 of the file bytes>`.
pub fn colrev_pdf_id(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{PDF_ID_PREFIX}{}", hex::encode(Sha256::digest(&bytes))))
}

/// PDFs indexed with records of other projects.
pub struct LocalIndexPdfGet {
    environment: Arc<Environment>,
    authors: ColrevIdAuthors,
}

impl LocalIndexPdfGet {
    pub fn new(environment: Arc<Environment>, authors: ColrevIdAuthors) -> Self {
        Self { environment, authors }
    }
}

#[async_trait]
impl PdfGetEndpoint for LocalIndexPdfGet {
    fn name(&self) -> &'static str {
        "colrev.local_index"
    }

    async fn get_pdf(&self, record: &Record) -> Result<Option<PathBuf>, EndpointError> {
        let retrieved = match self.environment.local_index().retrieve(record, self.authors, true, false) {
            Ok(retrieved) => retrieved,
            Err(LocalIndexError::RecordNotInIndex(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(retrieved
            .get(fields::FILE)
            .and_then(|files| files.split(';').map(PathBuf::from).find(|p| p.is_file())))
    }
}

/// A directory of PDFs named by record ID or by title.
pub struct PdfsDir {
    scan_dir: PathBuf,
}

impl PdfsDir {
    pub fn from_settings(paths: &ProjectPaths, settings: &EndpointSettings) -> Self {
        let scan_dir = match settings.option_str("scan_path") {
            Some(dir) => paths.root().join(dir),
            None => paths.pdf_dir(),
        };
        Self { scan_dir }
    }
}

#[async_trait]
impl PdfGetEndpoint for PdfsDir {
    fn name(&self) -> &'static str {
        "colrev.pdfs_dir"
    }

    async fn get_pdf(&self, record: &Record) -> Result<Option<PathBuf>, EndpointError> {
        let by_id = self.scan_dir.join(format!("{}.pdf", record.id));
        if by_id.is_file() {
            return Ok(Some(by_id));
        }
        let Some(title) = record.known(fields::TITLE).map(normalize_string) else {
            return Ok(None);
        };
        if !self.scan_dir.is_dir() {
            return Ok(None);
        }
        let mut best: Option<(PathBuf, f64)> = None;
        for entry in fs::read_dir(&self.scan_dir)? {
            let path = entry?.path();
            if !path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let similarity = string_ratio(&normalize_string(&stem.replace(['_', '-'], " ")), &title);
            if similarity >= FILENAME_TITLE_SIMILARITY && best.as_ref().map_or(true, |(_, s)| similarity > *s) {
                best = Some((path.clone(), similarity));
            }
        }
        Ok(best.map(|(path, _)| path))
    }
}

/// Verifies linked PDFs and extracts TEI fulltexts with GROBID when enabled.
pub struct PdfCheck {
    environment: Arc<Environment>,
    paths: ProjectPaths,
    create_tei: bool,
    client: Client,
}

impl PdfCheck {
    pub fn from_settings(environment: Arc<Environment>, paths: &ProjectPaths, settings: &EndpointSettings) -> Self {
        let create_tei = settings
            .options
            .get("create_tei")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self {
            environment,
            paths: paths.clone(),
            create_tei,
            client: Client::new(),
        }
    }

    fn check(record: &Record, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return Some("empty file".into());
        }
        if !bytes.starts_with(b"%PDF-") {
            return Some("not a PDF file".into());
        }
        let pdf_id = format!("{PDF_ID_PREFIX}{}", hex::encode(Sha256::digest(bytes)));
        match record.get(fields::PDF_ID) {
            Some(expected) if expected != pdf_id => Some("colrev_pdf_id does not match the file".into()),
            _ => None,
        }
    }

    async fn create_tei(&self, record: &Record, bytes: Vec<u8>) -> Result<(), EndpointError> {
        let target = self.paths.tei_file(&record.id);
        if target.is_file() {
            return Ok(());
        }
        self.environment.services().start(&GROBID).await?;
        let form = Form::new().part(
            "input",
            Part::bytes(bytes).file_name(format!("{}.pdf", record.id)),
        );
        let url = format!("http://localhost:{}/api/processFulltextDocument", GROBID.port);
        let tei = self
            .client
            .post(url)
            .multipart(form)
            .timeout(Duration::from_secs(120))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, tei)?;
        info!("{}: TEI written to {}", record.id, target.display());
        Ok(())
    }
}

#[async_trait]
impl PdfPrepEndpoint for PdfCheck {
    fn name(&self) -> &'static str {
        "colrev.pdf_check"
    }

    async fn prep_pdf(&self, record: &Record, pdf: &Path) -> Result<PdfPrepOutcome, EndpointError> {
        let path = if pdf.is_absolute() {
            pdf.to_path_buf()
        } else {
            self.paths.root().join(pdf)
        };
        if !path.is_file() {
            return Ok(PdfPrepOutcome::NeedsManualPreparation(format!(
                "{} does not exist",
                pdf.display()
            )));
        }
        let bytes = fs::read(&path)?;
        if let Some(reason) = Self::check(record, &bytes) {
            debug!("{}: {reason}", record.id);
            return Ok(PdfPrepOutcome::NeedsManualPreparation(reason));
        }
        if self.create_tei {
            self.create_tei(record, bytes).await?;
        }
        Ok(PdfPrepOutcome::Prepared)
    }
}
