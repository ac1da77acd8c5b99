//! Fulltext TEI documents stored next to the index.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::path::{Path, PathBuf};

use super::LocalIndexError;

/// Abstract and keywords of a TEI document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeiMetadata {
    pub abstract_text: Option<String>,
    pub keywords: Vec<String>,
}

/// Extract the abstract and keywords from a GROBID TEI document
pub fn parse_tei(xml: &str) -> Result<TeiMetadata, LocalIndexError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut metadata = TeiMetadata::default();
    let mut abstract_parts: Vec<String> = Vec::new();
    let mut in_abstract = 0usize;
    let mut in_keywords = false;
    let mut in_term = false;
    let mut term = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"abstract" => in_abstract += 1,
                _ if in_abstract > 0 => in_abstract += 1,
                b"keywords" => in_keywords = true,
                b"term" if in_keywords => {
                    in_term = true;
                    term.clear();
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => {
                if in_abstract > 0 {
                    in_abstract -= 1;
                }
                match e.local_name().as_ref() {
                    b"keywords" => in_keywords = false,
                    b"term" if in_term => {
                        in_term = false;
                        if !term.trim().is_empty() {
                            metadata.keywords.push(term.trim().to_string());
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| LocalIndexError::Tei(err.to_string()))?
                    .to_string();
                if in_abstract > 0 {
                    abstract_parts.push(text);
                } else if in_term {
                    term.push_str(&text);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(LocalIndexError::Tei(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let abstract_text = abstract_parts.join(" ");
    if !abstract_text.trim().is_empty() {
        metadata.abstract_text = Some(abstract_text.split_whitespace().collect::<Vec<_>>().join(" "));
    }
    Ok(metadata)
}

/// `tei/<first two hex chars>/<rest>.tei.xml`, keyed like the record rows.
#[derive(Debug, Clone)]
pub struct TeiStore {
    root: PathBuf,
}

impl TeiStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn path_for(&self, index_id: &str) -> PathBuf {
        let split = index_id.len().min(2);
        self.root
            .join(&index_id[..split])
            .join(format!("{}.tei.xml", &index_id[split..]))
    }

    pub fn store(&self, index_id: &str, content: &str) -> Result<PathBuf, LocalIndexError> {
        let path = self.path_for(index_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    pub fn load(&self, index_id: &str) -> Result<Option<String>, LocalIndexError> {
        let path = self.path_for(index_id);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEI: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <profileDesc>
      <textClass>
        <keywords>
          <term>digital platforms</term>
          <term>ecosystems</term>
        </keywords>
      </textClass>
      <abstract>
        <div><p>We study platform &amp; ecosystem
          governance.</p></div>
      </abstract>
    </profileDesc>
  </teiHeader>
</TEI>"#;

    #[test]
    fn extracts_abstract_and_keywords() {
        let metadata = parse_tei(TEI).unwrap();
        assert_eq!(
            metadata.abstract_text.as_deref(),
            Some("We study platform & ecosystem governance.")
        );
        assert_eq!(metadata.keywords, vec!["digital platforms", "ecosystems"]);
    }

    #[test]
    fn store_layout() {
        let dir = tempdir().unwrap();
        let store = TeiStore::new(dir.path());
        let path = store.store("abcdef", TEI).unwrap();
        assert_eq!(path, dir.path().join("ab").join("cdef.tei.xml"));
        assert!(store.load("abcdef").unwrap().is_some());
        assert!(store.load("ffff").unwrap().is_none());
    }
}
