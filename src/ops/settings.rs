//! Settings: printing and changing `settings.json`.

use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::dataset::ProjectPaths;
use crate::error::{ColrevError, Result};
use crate::review_manager::ReviewManager;
use crate::settings::COLREV_VERSION;

/// Splits `/json/pointer=<json>`. A value that is not valid JSON is taken as a string.
pub fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    let (pointer, raw) = assignment
        .split_once('=')
        .filter(|(p, _)| p.starts_with('/'))
        .ok_or_else(|| {
            ColrevError::InvalidInput(format!("expected /json/pointer=value, got '{assignment}'"))
        })?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((pointer.to_string(), value))
}

/// Applies the assignments, saves the settings and commits them.
/// Nothing is written if one assignment is invalid.
pub fn set(review_manager: &mut ReviewManager, assignments: &[String]) -> Result<Option<String>> {
    let parsed = assignments
        .iter()
        .map(|a| parse_assignment(a))
        .collect::<Result<Vec<_>>>()?;
    let mut settings = review_manager.settings().clone();
    for (pointer, value) in &parsed {
        settings.set_value(pointer, value.clone())?;
    }
    *review_manager.settings_mut() = settings;
    review_manager.save_settings()?;

    let git = review_manager.git();
    git.add(&[Path::new(ProjectPaths::SETTINGS_FILE)])?;
    let changed: Vec<&str> = parsed.iter().map(|(p, _)| p.as_str()).collect();
    let message = format!(
        "Settings: {}\n\nSoftware\n colrev {COLREV_VERSION}\n\nCommand\n {}\n",
        changed.join(", "),
        review_manager.command_line()
    );
    let commit = git.commit(&message)?;
    info!("settings updated: {}", changed.join(", "));
    Ok(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::tests::project;
    use crate::settings::{Settings, ShareStatReq};

    #[test]
    fn assignments() {
        assert_eq!(
            parse_assignment("/project/delay_automated_processing=true").unwrap(),
            ("/project/delay_automated_processing".to_string(), Value::Bool(true))
        );
        assert_eq!(
            parse_assignment("/project/title=Platform studies").unwrap().1,
            Value::String("Platform studies".into())
        );
        assert!(parse_assignment("project.title=x").is_err());
        assert!(parse_assignment("/project/title").is_err());
    }

    #[test]
    fn set_saves_and_commits() {
        let (_dir, mut manager) = project("literature_review");
        let commit = set(
            &mut manager,
            &["/project/share_stat_req=\"SCREENED\"".to_string()],
        )
        .unwrap();
        assert!(commit.is_some());
        assert!(!manager.git().is_dirty().unwrap());
        assert_eq!(manager.settings().project.share_stat_req, ShareStatReq::Screened);
        let saved = Settings::load(&manager.paths().settings_file()).unwrap();
        assert_eq!(saved.project.share_stat_req, ShareStatReq::Screened);

        assert!(set(&mut manager, &["/project/id_pattern=\"none\"".to_string()]).is_err());
        assert_eq!(manager.settings().project.share_stat_req, ShareStatReq::Screened);
    }
}
