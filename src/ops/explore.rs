//! Explore: looking at the records in a state.

use crate::error::Result;
use crate::matcher::normalize_string;
use crate::process::RecordState;
use crate::record::{fields, Record};
use crate::review_manager::ReviewManager;

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub state: Option<RecordState>,
    /// Matched against title and author, ignoring case and punctuation.
    pub text: Option<String>,
}

fn matches_text(record: &Record, text: &str) -> bool {
    let needle = normalize_string(text);
    [fields::TITLE, fields::AUTHOR]
        .iter()
        .filter_map(|f| record.get(f))
        .any(|v| normalize_string(v).contains(&needle))
}

/// Records matching the query, in records-file order.
pub fn explore(review_manager: &ReviewManager, query: &Query) -> Result<Vec<Record>> {
    if !review_manager.dataset().records_file_exists() {
        return Ok(Vec::new());
    }
    Ok(review_manager
        .dataset()
        .load_records()?
        .into_values()
        .filter(|r| query.state.map_or(true, |s| r.status == s))
        .filter(|r| query.text.as_deref().map_or(true, |t| matches_text(r, t)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::{processed_project, project};

    #[tokio::test]
    async fn filters_by_state_and_text() {
        let (_dir, manager) = processed_project().await;
        let all = explore(&manager, &Query::default()).unwrap();
        assert_eq!(all.len(), 2);

        let processed = Query {
            state: Some(RecordState::MdProcessed),
            text: Some("MANAGERIAL agency".to_string()),
        };
        let found = explore(&manager, &processed).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].get(fields::AUTHOR).unwrap().contains("Staehr"));

        let prepared = Query {
            state: Some(RecordState::MdPrepared),
            text: None,
        };
        assert!(explore(&manager, &prepared).unwrap().is_empty());
    }

    #[test]
    fn empty_projects_have_no_records() {
        let (_dir, manager) = project("literature_review");
        assert!(explore(&manager, &Query::default()).unwrap().is_empty());
    }
}
