use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::record::ProductRecord;

const REVIEW_BASE_COLUMNS: [&str; 3] = ["product_name", "url", "user_comments"];
const OPINION_COLUMNS: [&str; 2] = ["product_name", "comment_text"];

/// Write the end-of-crawl wide-format batch: one row per product, base
/// columns followed by the sorted union of every specification key seen
/// in the batch. The file lands atomically via a temp file + rename, so
/// a crash mid-write never leaves a truncated CSV behind.
pub fn write_review_batch(path: &Path, records: &[ProductRecord]) -> Result<()> {
    if records.is_empty() {
        info!("No records collected, skipping {}", path.display());
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
    }

    // First pass: the full key set, sorted for a deterministic schema.
    let spec_keys: Vec<&str> = records
        .iter()
        .flat_map(|r| r.specifications.keys())
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let tmp = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp)
        .with_context(|| format!("Failed to create {}", tmp.display()))?;

    let header: Vec<&str> = REVIEW_BASE_COLUMNS
        .iter()
        .copied()
        .chain(spec_keys.iter().copied())
        .collect();
    writer.write_record(&header)?;

    // Second pass: stream rows against the fixed schema.
    for record in records {
        let mut row = Vec::with_capacity(header.len());
        row.push(record.product_name.clone());
        row.push(record.source_url.clone());
        row.push(record.comments.join("\n"));
        for key in &spec_keys {
            row.push(
                record
                    .specifications
                    .get(*key)
                    .cloned()
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    info!("Wrote {} product rows to {}", records.len(), path.display());
    Ok(())
}

/// Append-only long-format stream: one row per (product, comment).
/// Created with a header on first use; an existing file is extended
/// without a second header, so output accumulates across restarts.
pub struct OpinionSink {
    writer: csv::Writer<File>,
    sync_handle: File,
}

impl OpinionSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }
        let exists = path.is_file();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let sync_handle = file.try_clone()?;
        let mut writer = csv::Writer::from_writer(file);
        if !exists {
            writer.write_record(OPINION_COLUMNS)?;
            writer.flush()?;
            info!("Created new output file: {}", path.display());
        }
        Ok(Self {
            writer,
            sync_handle,
        })
    }

    /// Append one row per comment, then flush through to disk so a crash
    /// after return cannot lose this product's rows. Returns the number
    /// of rows written.
    pub fn append(&mut self, product_name: &str, comments: &[String]) -> Result<usize> {
        for comment in comments {
            self.writer.write_record([product_name, comment.as_str()])?;
        }
        self.writer.flush()?;
        self.sync_handle.sync_data()?;
        Ok(comments.len())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn record(name: &str, specs: &[(&str, &str)], comments: &[&str]) -> ProductRecord {
        ProductRecord {
            product_name: name.to_string(),
            source_url: format!("https://reviews.test/{}", name.to_lowercase().replace(' ', "_")),
            specifications: specs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            comments: comments.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn wide_format_has_sorted_union_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews.csv");
        let batch = vec![
            record("Pixel 9", &[("Display", "6.3\""), ("Chipset", "Tensor G4")], &["nice"]),
            record("Galaxy S24", &[("Battery", "4000mAh"), ("Display", "6.2\"")], &[]),
        ];

        write_review_batch(&path, &batch).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let header = contents.lines().next().unwrap();
        assert_eq!(
            header,
            "product_name,url,user_comments,Battery,Chipset,Display"
        );
        // Missing keys become empty cells.
        let galaxy = contents.lines().find(|l| l.starts_with("Galaxy")).unwrap();
        assert!(galaxy.contains("4000mAh"));
        assert!(galaxy.contains(",,"));
    }

    #[test]
    fn wide_format_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let batch = vec![
            record("Pixel 9", &[("Display", "6.3\"")], &["a", "b"]),
            record("Galaxy S24", &[("Battery", "4000mAh")], &[]),
        ];

        let first = dir.path().join("first.csv");
        let second = dir.path().join("second.csv");
        write_review_batch(&first, &batch).unwrap();
        write_review_batch(&second, &batch).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn wide_format_joins_comments_with_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews.csv");
        write_review_batch(&path, &[record("Pixel 9", &[], &["first", "second"])]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let row = reader.records().next().unwrap().unwrap();
        assert_eq!(&row[2], "first\nsecond");
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reviews.csv");
        write_review_batch(&path, &[]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn long_format_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opinions.csv");

        let mut sink = OpinionSink::open(&path).unwrap();
        sink.append("Pixel 9", &["great".to_string()]).unwrap();
        drop(sink);

        let mut sink = OpinionSink::open(&path).unwrap();
        sink.append("Galaxy S24", &["meh".to_string(), "fine".to_string()])
            .unwrap();
        drop(sink);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(
            lines,
            [
                "product_name,comment_text",
                "Pixel 9,great",
                "Galaxy S24,meh",
                "Galaxy S24,fine",
            ]
        );
    }
}
