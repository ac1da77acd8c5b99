pub mod colrev_id;
pub mod fields;
pub mod id_setter;
pub mod merge;
pub mod provenance;
pub mod quality;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::process::RecordState;
pub use colrev_id::{ColrevIdAuthors, COLREV_ID_PREFIX};
pub use provenance::{DefectCode, Note, Provenance, ProvenanceEntry};

/// Records keyed by ID; iteration order equals records-file order.
pub type Records = BTreeMap<String, Record>;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("not enough data to identify {id}: {reason}")]
    NotEnoughDataToIdentify { id: String, reason: String },
    #[error("invalid value for {field} in {id}: {message}")]
    FieldValue {
        id: String,
        field: String,
        message: String,
    },
    #[error("cannot change IDs that were already propagated: {} (still referenced in {})",
        .ids.join(", "),
        .files.iter().map(|f| f.display().to_string()).collect::<Vec<_>>().join(", "))]
    PropagatedIdChange { ids: Vec<String>, files: Vec<PathBuf> },
    #[error("{main} and {other} must not be merged: {reason}")]
    InvalidMerge {
        main: String,
        other: String,
        reason: String,
    },
    #[error("{id} cannot be located in a table of contents")]
    NotTocIdentifiable { id: String },
}

/// A bibliographic record with its lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub entrytype: String,
    pub status: RecordState,
    #[serde(default)]
    pub origin: Vec<String>,
    #[serde(default)]
    pub masterdata_provenance: Provenance,
    #[serde(default)]
    pub data_provenance: Provenance,
    #[serde(default)]
    pub colrev_id: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(id: impl Into<String>, entrytype: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entrytype: entrytype.into(),
            status: RecordState::MdRetrieved,
            origin: Vec::new(),
            masterdata_provenance: Provenance::new(),
            data_provenance: Provenance::new(),
            colrev_id: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter without provenance.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Value of a regular field, or of `ID`/`ENTRYTYPE`.
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            fields::ID => Some(self.id.as_str()),
            fields::ENTRYTYPE => Some(self.entrytype.as_str()),
            _ => self.fields.get(key).map(String::as_str),
        }
    }

    /// A value that is present, non-empty and not `UNKNOWN`.
    pub fn known(&self, key: &str) -> Option<&str> {
        self.get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != fields::UNKNOWN)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Raw write without provenance bookkeeping.
    pub fn set(&mut self, key: &str, value: &str) {
        match key {
            fields::ID => self.id = value.to_string(),
            fields::ENTRYTYPE => self.entrytype = value.to_string(),
            _ => {
                self.fields.insert(key.to_string(), value.to_string());
            }
        }
    }

    pub fn provenance_for(&self, key: &str) -> Option<&ProvenanceEntry> {
        if fields::is_masterdata(key) {
            self.masterdata_provenance.get(key)
        } else {
            self.data_provenance.get(key)
        }
    }

    fn provenance_map_mut(&mut self, key: &str) -> &mut Provenance {
        if fields::is_masterdata(key) {
            &mut self.masterdata_provenance
        } else {
            &mut self.data_provenance
        }
    }

    /// Writes a field together with its provenance.
    pub fn update_field(
        &mut self,
        key: &str,
        value: &str,
        source: &str,
        note: &str,
    ) -> Result<(), RecordError> {
        if self.masterdata_is_curated() && fields::is_masterdata(key) {
            if self.get(key) == Some(value) {
                return Ok(());
            }
            return Err(RecordError::FieldValue {
                id: self.id.clone(),
                field: key.to_string(),
                message: "masterdata is curated and read-only".to_string(),
            });
        }
        match key {
            fields::ID | fields::ENTRYTYPE => {
                self.set(key, value);
                return Ok(());
            }
            fields::STATUS => {
                self.status = value.parse().map_err(|e: crate::process::model::UnknownState| {
                    RecordError::FieldValue {
                        id: self.id.clone(),
                        field: key.to_string(),
                        message: e.to_string(),
                    }
                })?;
                return Ok(());
            }
            fields::ORIGIN | fields::MD_PROV | fields::D_PROV | fields::COLREV_ID => {
                return Err(RecordError::FieldValue {
                    id: self.id.clone(),
                    field: key.to_string(),
                    message: "system field cannot be set as a plain value".to_string(),
                });
            }
            _ => {}
        }
        self.set(key, value);
        if !fields::is_system_field(key) {
            self.provenance_map_mut(key)
                .insert(key, ProvenanceEntry::new(source, note));
        }
        Ok(())
    }

    /// Removes a field and its provenance.
    pub fn remove_field(&mut self, key: &str) -> Option<String> {
        let removed = self.fields.remove(key);
        if !(self.masterdata_is_curated() && fields::is_masterdata(key)) {
            self.provenance_map_mut(key).remove(key);
        }
        removed
    }

    /// Marks a masterdata field as missing instead of removing it silently.
    pub fn remove_field_as_missing(&mut self, key: &str, source: &str) {
        self.fields.remove(key);
        self.masterdata_provenance
            .insert(key, ProvenanceEntry::new(source, DefectCode::Missing.as_str()));
    }

    pub fn masterdata_is_curated(&self) -> bool {
        self.masterdata_provenance.is_curated()
    }

    pub fn add_masterdata_provenance_note(&mut self, key: &str, note: &str, source: &str) {
        self.masterdata_provenance.add_note(key, note, source);
    }

    pub fn add_data_provenance_note(&mut self, key: &str, note: &str, source: &str) {
        self.data_provenance.add_note(key, note, source);
    }

    pub fn remove_provenance_note(&mut self, key: &str, note: &str) {
        self.masterdata_provenance.remove_note(key, note);
        self.data_provenance.remove_note(key, note);
    }

    /// Active defects in both provenance maps.
    pub fn defects(&self) -> Vec<(String, DefectCode)> {
        let mut defects = self.masterdata_provenance.active_defects();
        defects.extend(self.data_provenance.active_defects());
        defects
    }

    pub fn has_quality_defects(&self) -> bool {
        !self.defects().is_empty()
    }

    /// Like [`has_quality_defects`](Self::has_quality_defects), ignoring the listed defects.
    pub fn has_quality_defects_except(&self, ignore: &[String]) -> bool {
        self.defects()
            .iter()
            .any(|(_, d)| !ignore.iter().any(|i| i == d.as_str()))
    }

    pub fn field_has_defect(&self, key: &str) -> bool {
        self.provenance_for(key)
            .map(|p| p.defects().iter().any(|d| !p.is_ignored(*d)))
            .unwrap_or(false)
    }

    /// Masterdata quality rank used when merging:
    /// curated > manually prepared > prepared > imported > retrieved.
    pub fn masterdata_quality(&self) -> u8 {
        if self.masterdata_is_curated() {
            return 4;
        }
        let manual = self
            .masterdata_provenance
            .iter()
            .any(|(_, p)| p.source.starts_with("manual"));
        match self.status {
            RecordState::MdRetrieved => 0,
            RecordState::MdImported | RecordState::MdNeedsManualPreparation => 1,
            _ if manual => 3,
            _ => 2,
        }
    }

    /// Sets the status reached after metadata preparation.
    pub fn set_prep_status(&mut self, defects_to_ignore: &[String]) {
        self.status = if self.masterdata_is_curated()
            || !self.has_quality_defects_except(defects_to_ignore)
        {
            RecordState::MdPrepared
        } else {
            RecordState::MdNeedsManualPreparation
        };
    }

    pub fn add_origin(&mut self, origin: &str) {
        if !self.origin.iter().any(|o| o == origin) {
            self.origin.push(origin.to_string());
            self.origin.sort();
        }
    }

    /// Regular fields other than system fields.
    pub fn data_fields(&self) -> impl Iterator<Item = (&String, &String)> {
        self.fields.iter().filter(|(k, _)| !fields::is_system_field(k))
    }

    /// Fields without a provenance entry (system fields excepted).
    pub fn fields_without_provenance(&self) -> Vec<String> {
        if self.masterdata_is_curated() {
            return self
                .data_fields()
                .filter(|(k, _)| !fields::is_masterdata(k) && !self.data_provenance.contains_key(k))
                .map(|(k, _)| k.clone())
                .collect();
        }
        self.data_fields()
            .filter(|(k, _)| self.provenance_for(k).is_none())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Fingerprints of the record: the stored list, or a freshly computed one.
    pub fn get_colrev_id(
        &self,
        assume_complete: bool,
        authors: ColrevIdAuthors,
    ) -> Result<Vec<String>, RecordError> {
        if !self.colrev_id.is_empty() {
            return Ok(self.colrev_id.clone());
        }
        Ok(vec![colrev_id::create_colrev_id(self, assume_complete, authors)?])
    }

    /// Adds the computed fingerprint to the stored list.
    pub fn update_colrev_id(&mut self, authors: ColrevIdAuthors) -> Result<(), RecordError> {
        let cid = colrev_id::create_colrev_id(self, true, authors)?;
        if !self.colrev_id.contains(&cid) {
            self.colrev_id.push(cid);
        }
        Ok(())
    }

    pub fn toc_key(&self) -> Result<String, RecordError> {
        colrev_id::toc_key(self)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let author = self.get(fields::AUTHOR).unwrap_or("");
        let year = self.get(fields::YEAR).unwrap_or("");
        let title = self.get(fields::TITLE).unwrap_or("");
        write!(f, "{} ({}) {} ({}). {}", self.id, self.status, author, year, title)
    }
}
