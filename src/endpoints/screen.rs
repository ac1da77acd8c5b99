//! Screen endpoints.

use super::{async_trait, Decision, EndpointError, ScreenEndpoint};
use crate::record::Records;

/// Includes every record; criteria are marked as met.
pub struct IncludeAll;

#[async_trait]
impl ScreenEndpoint for IncludeAll {
    fn name(&self) -> &'static str {
        "colrev.include_all"
    }

    async fn screen(
        &self,
        records: &Records,
        ids: &[String],
        criteria: &[String],
    ) -> Result<Vec<Decision>, EndpointError> {
        let detail = (!criteria.is_empty()).then(|| {
            criteria
                .iter()
                .map(|c| format!("{c}=in"))
                .collect::<Vec<_>>()
                .join(";")
        });
        Ok(ids
            .iter()
            .filter(|id| records.contains_key(*id))
            .map(|id| Decision {
                id: id.clone(),
                include: true,
                detail: detail.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[tokio::test]
    async fn includes_with_criteria_met() {
        let records: Records = [("A".to_string(), Record::new("A", "article"))].into_iter().collect();
        let decisions = IncludeAll
            .screen(&records, &["A".to_string()], &["focus".to_string(), "method".to_string()])
            .await
            .unwrap();
        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].include);
        assert_eq!(decisions[0].detail.as_deref(), Some("focus=in;method=in"));

        let none = IncludeAll.screen(&records, &["A".to_string()], &[]).await.unwrap();
        assert_eq!(none[0].detail, None);
    }
}
