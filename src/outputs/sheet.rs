//! CSV sheet written at the end of every harvest.
//!
//! The sheet is the run's durable artifact: it is written on every exit
//! path after the feed loaded, so even a zero-record run leaves a
//! header-only file behind as evidence the run happened.

use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use crate::harvest::HarvestError;
use crate::models::TweetRecord;
use crate::utils::timestamp_slug;

/// Column order for the harvest sheet.
pub const COLUMNS: [&str; 6] = [
    "account",
    "tweet_url",
    "text",
    "media_links",
    "likes",
    "retweets",
];

/// Write `records` to a timestamped CSV under `out_dir` and return the
/// path. The directory is created when missing.
#[instrument(level = "info", skip(records), fields(records = records.len()))]
pub fn write_records(records: &[TweetRecord], out_dir: &str) -> Result<PathBuf, HarvestError> {
    std::fs::create_dir_all(out_dir)?;
    let path = Path::new(out_dir).join(format!("x_tweets_{}.csv", timestamp_slug()));

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(COLUMNS)?;
    for record in records {
        let media = record.media_cell();
        writer.write_record([
            record.account.as_str(),
            record.permalink.as_str(),
            record.body.as_str(),
            media.as_str(),
            record.likes.as_str(),
            record.retweets.as_str(),
        ])?;
    }
    writer.flush()?;

    info!(sheet = %path.display(), "Sheet written");
    Ok(path)
}

/// Read the text column back from a previously written sheet.
pub fn read_bodies(path: &Path) -> Result<Vec<String>, HarvestError> {
    let mut reader = csv::Reader::from_path(path)?;
    let text_index = reader
        .headers()?
        .iter()
        .position(|h| h == "text")
        .unwrap_or(2);

    let mut bodies = Vec::new();
    for row in reader.records() {
        let row = row?;
        if let Some(body) = row.get(text_index) {
            if !body.is_empty() {
                bodies.push(body.to_string());
            }
        }
    }
    Ok(bodies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::models::MediaRef;

    fn record(body: &str) -> TweetRecord {
        TweetRecord {
            account: "@someone".to_string(),
            permalink: "https://x.com/someone/status/42".to_string(),
            body: body.to_string(),
            media: vec![
                MediaRef::Image("https://i/a.jpg".to_string()),
                MediaRef::Poster("https://i/b.jpg".to_string()),
            ],
            likes: "1,234".to_string(),
            retweets: "12.5K".to_string(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_sheet_roundtrips_awkward_text() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("line one\nline two, with a comma and \"quotes\"")];

        let path = write_records(&records, dir.path().to_str().unwrap()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            COLUMNS.to_vec()
        );
        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get(2).unwrap(),
            "line one\nline two, with a comma and \"quotes\""
        );
        assert_eq!(
            rows[0].get(3).unwrap(),
            "https://i/a.jpg | Poster: https://i/b.jpg"
        );
    }

    #[test]
    fn test_empty_run_still_leaves_a_header() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_records(&[], dir.path().to_str().unwrap()).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(reader.headers().unwrap().len(), COLUMNS.len());
        assert_eq!(reader.records().count(), 0);
    }

    #[test]
    fn test_sheet_filename_is_timestamped() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_records(&[], dir.path().to_str().unwrap()).unwrap();

        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("x_tweets_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "x_tweets_".len() + 15 + ".csv".len());
    }

    #[test]
    fn test_read_bodies_returns_the_text_column() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![record("first body"), record("second body")];

        let path = write_records(&records, dir.path().to_str().unwrap()).unwrap();

        let bodies = read_bodies(&path).unwrap();
        assert_eq!(bodies, vec!["first body", "second body"]);
    }
}
