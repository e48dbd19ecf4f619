//! Rising search terms from the Google Trends public dataset.
//!
//! Queries BigQuery's `bigquery-public-data.google_trends.top_rising_terms`
//! table through the synchronous `jobs.query` REST endpoint. Only the
//! latest refresh is considered; one row per term, strongest first.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::Duration;
use tracing::{info, instrument};

use crate::models::TrendTerm;
use crate::utils::truncate_for_log;

const BIGQUERY_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct QueryRequest {
    query: String,
    #[serde(rename = "useLegacySql")]
    use_legacy_sql: bool,
}

/// BigQuery encodes every scalar as a JSON string inside `{"v": ...}`.
#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>,
}

#[derive(Deserialize)]
struct Cell {
    v: Option<serde_json::Value>,
}

fn rising_terms_query(limit: usize) -> String {
    format!(
        "SELECT term, MAX(score) AS momentum \
         FROM `bigquery-public-data.google_trends.top_rising_terms` \
         WHERE refresh_date = (SELECT MAX(refresh_date) \
           FROM `bigquery-public-data.google_trends.top_rising_terms`) \
         GROUP BY term ORDER BY momentum DESC LIMIT {limit}"
    )
}

/// Fetch the current rising terms, strongest momentum first.
#[instrument(level = "info", skip(http, token))]
pub async fn rising_terms(
    http: &reqwest::Client,
    project_id: &str,
    token: &str,
    limit: usize,
) -> Result<Vec<TrendTerm>, Box<dyn Error>> {
    let request = QueryRequest {
        query: rising_terms_query(limit),
        use_legacy_sql: false,
    };

    let response = http
        .post(format!("{BIGQUERY_API_BASE}/projects/{project_id}/queries"))
        .bearer_auth(token)
        .json(&request)
        .timeout(REQUEST_TIMEOUT)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        return Err(format!(
            "BigQuery error ({status}): {}",
            truncate_for_log(&error_text, 500)
        )
        .into());
    }

    let reply: QueryResponse = response.json().await?;
    let terms = decode_rows(&reply);
    info!(terms = terms.len(), "Rising terms fetched");
    Ok(terms)
}

/// Decode result rows into terms, dropping anything malformed rather
/// than failing the batch.
fn decode_rows(response: &QueryResponse) -> Vec<TrendTerm> {
    response
        .rows
        .iter()
        .filter_map(|row| {
            let term = row.f.first()?.v.as_ref()?.as_str()?.trim().to_string();
            if term.is_empty() {
                return None;
            }
            let momentum = match row.f.get(1)?.v.as_ref()? {
                serde_json::Value::String(s) => s.parse::<f64>().ok()?,
                other => other.as_f64()?,
            };
            Some(TrendTerm { term, momentum })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_limits_and_targets_latest_refresh() {
        let query = rising_terms_query(7);
        assert!(query.contains("LIMIT 7"));
        assert!(query.contains("MAX(refresh_date)"));
    }

    #[test]
    fn test_decode_rows_handles_stringly_numbers() {
        let raw = r#"{
            "rows": [
                {"f": [{"v": "capybara"}, {"v": "1200"}]},
                {"f": [{"v": "eclipse"}, {"v": "850.5"}]}
            ]
        }"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();

        let terms = decode_rows(&response);

        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, "capybara");
        assert_eq!(terms[0].momentum, 1200.0);
        assert_eq!(terms[1].momentum, 850.5);
    }

    #[test]
    fn test_decode_rows_drops_malformed_rows() {
        let raw = r#"{
            "rows": [
                {"f": [{"v": ""}, {"v": "10"}]},
                {"f": [{"v": "ok"}]},
                {"f": [{"v": "kept"}, {"v": "3"}]},
                {"f": []}
            ]
        }"#;
        let response: QueryResponse = serde_json::from_str(raw).unwrap();

        let terms = decode_rows(&response);

        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].term, "kept");
    }

    #[test]
    fn test_decode_rows_tolerates_missing_rows_key() {
        let response: QueryResponse = serde_json::from_str("{}").unwrap();
        assert!(decode_rows(&response).is_empty());
    }
}
