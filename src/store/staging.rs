// src/store/staging.rs

use crate::error::{AppError, AppResult};
use crate::model::EnrichedRecord;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

const FILE_PREFIX: &str = "tweets_";
const FILE_EXT: &str = "parquet";
const TIMESTAMP_FMT: &str = "%Y%m%d%H%M%S";

/// In-memory spool that drains to columnar files.
///
/// Records accumulate under one mutex; hitting `buffer_limit` flushes
/// synchronously within `append`. Files are written whole to a temp path and
/// renamed into place, so the staging directory never exposes partial writes.
#[derive(Debug)]
pub struct StagingBuffer {
    dir: PathBuf,
    buffer_limit: usize,
    buffer: Mutex<Vec<EnrichedRecord>>,
    staged_total: AtomicU64,
    flushes: AtomicU64,
}

impl StagingBuffer {
    pub fn new(dir: impl Into<PathBuf>, buffer_limit: usize) -> Self {
        Self {
            dir: dir.into(),
            buffer_limit,
            buffer: Mutex::new(Vec::new()),
            staged_total: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    pub async fn append(&self, record: EnrichedRecord) -> AppResult<()> {
        let mut buffer = self.buffer.lock().await;
        buffer.push(record);
        if buffer.len() >= self.buffer_limit {
            self.flush_locked(&mut buffer).await?;
        }
        Ok(())
    }

    /// Drain any buffered records to a file.
    pub async fn flush(&self) -> AppResult<()> {
        let mut buffer = self.buffer.lock().await;
        self.flush_locked(&mut buffer).await
    }

    /// On serialization or IO failure the buffer is left intact; the records
    /// go out with the next flush.
    async fn flush_locked(&self, buffer: &mut Vec<EnrichedRecord>) -> AppResult<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let bytes = to_parquet_bytes(buffer)?;

        tokio::fs::create_dir_all(&self.dir).await?;

        let filename = format!(
            "{FILE_PREFIX}{}.{FILE_EXT}",
            Utc::now().format(TIMESTAMP_FMT)
        );
        let path = self.dir.join(&filename);
        let tmp_path = self.dir.join(format!(".{filename}.tmp"));

        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        info!(count = buffer.len(), path = %path.display(), "flushed staging buffer");

        self.staged_total
            .fetch_add(buffer.len() as u64, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        buffer.clear();

        Ok(())
    }

    /// Delete staging files older than `older_than_days`, judged by the UTC
    /// timestamp encoded in the filename. Foreign files are left alone.
    pub async fn cleanup(&self, older_than_days: u32) -> AppResult<usize> {
        let cutoff = Utc::now().naive_utc() - ChronoDuration::days(older_than_days as i64);
        let mut removed = 0usize;

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = parse_file_timestamp(name) else {
                continue;
            };

            if stamp < cutoff {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => {
                        removed += 1;
                        info!(file = name, "removed old staging file");
                    }
                    Err(e) => warn!(file = name, error = %e, "failed to remove staging file"),
                }
            }
        }

        Ok(removed)
    }

    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Number of staging files currently on disk.
    pub async fn file_count(&self) -> AppResult<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut count = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if parse_file_timestamp(name).is_some() {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    #[inline]
    pub fn staged_total(&self) -> u64 {
        self.staged_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn parse_file_timestamp(filename: &str) -> Option<NaiveDateTime> {
    let stem = filename
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(&format!(".{FILE_EXT}"))?;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FMT).ok()
}

fn staging_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("author_id", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("retweet_count", DataType::Int64, false),
        Field::new("like_count", DataType::Int64, false),
        Field::new("reply_count", DataType::Int64, false),
        Field::new("quote_count", DataType::Int64, false),
        Field::new("bookmark_count", DataType::Int64, false),
        Field::new("impression_count", DataType::Int64, false),
        Field::new("cleaned_text", DataType::Utf8, false),
        Field::new("language", DataType::Utf8, false),
        Field::new("sentiment", DataType::Utf8, false),
        Field::new("confidence", DataType::Float64, false),
        Field::new("enriched_at", DataType::Utf8, false),
    ])
}

/// Serialize records to one parquet buffer: snappy-compressed, dictionary
/// encoded, suitable for the offline batch jobs downstream.
fn to_parquet_bytes(records: &[EnrichedRecord]) -> AppResult<Vec<u8>> {
    let schema = Arc::new(staging_schema());

    let strings = |f: &dyn Fn(&EnrichedRecord) -> String| -> ArrayRef {
        Arc::new(StringArray::from(
            records.iter().map(f).collect::<Vec<String>>(),
        ))
    };
    let ints = |f: &dyn Fn(&EnrichedRecord) -> i64| -> ArrayRef {
        Arc::new(Int64Array::from(
            records.iter().map(f).collect::<Vec<i64>>(),
        ))
    };

    let columns: Vec<ArrayRef> = vec![
        strings(&|r| r.id.clone()),
        strings(&|r| r.text.clone()),
        strings(&|r| r.author_id.clone()),
        strings(&|r| r.created_at.clone()),
        strings(&|r| r.source.clone()),
        ints(&|r| r.engagement.retweet_count),
        ints(&|r| r.engagement.like_count),
        ints(&|r| r.engagement.reply_count),
        ints(&|r| r.engagement.quote_count),
        ints(&|r| r.engagement.bookmark_count),
        ints(&|r| r.engagement.impression_count),
        strings(&|r| r.cleaned_text.clone()),
        strings(&|r| r.language.clone()),
        strings(&|r| r.sentiment.as_str().to_string()),
        Arc::new(Float64Array::from(
            records.iter().map(|r| r.confidence).collect::<Vec<f64>>(),
        )),
        strings(&|r| r.enriched_at.clone()),
    ];

    let batch = RecordBatch::try_new(Arc::clone(&schema), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_dictionary_enabled(true)
        .build();

    let mut out = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut out, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Engagement, Sentiment};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn record(id: &str) -> EnrichedRecord {
        EnrichedRecord {
            id: id.into(),
            text: format!("tweet {id}"),
            author_id: "u1".into(),
            created_at: "2024-01-15T10:00:00Z".into(),
            source: "test".into(),
            engagement: Engagement::default(),
            cleaned_text: format!("tweet {id}"),
            language: "en".into(),
            sentiment: Sentiment::Neutral,
            confidence: 0.5,
            enriched_at: "2024-01-15T10:00:01Z".into(),
        }
    }

    #[tokio::test]
    async fn below_threshold_keeps_records_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingBuffer::new(dir.path(), 5);

        for i in 0..4 {
            staging.append(record(&i.to_string())).await.unwrap();
        }

        assert_eq!(staging.pending().await, 4);
        assert_eq!(staging.file_count().await.unwrap(), 0);
        assert_eq!(staging.flush_count(), 0);
    }

    #[tokio::test]
    async fn threshold_triggers_flush() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingBuffer::new(dir.path(), 5);

        for i in 0..6 {
            staging.append(record(&i.to_string())).await.unwrap();
        }

        // 5 flushed, the 6th stays buffered.
        assert_eq!(staging.pending().await, 1);
        assert_eq!(staging.file_count().await.unwrap(), 1);
        assert_eq!(staging.staged_total(), 5);
        assert_eq!(staging.flush_count(), 1);
    }

    #[tokio::test]
    async fn flushed_file_is_readable_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingBuffer::new(dir.path(), 100);

        for i in 0..3 {
            staging.append(record(&format!("t{i}"))).await.unwrap();
        }
        staging.flush().await.unwrap();
        assert_eq!(staging.pending().await, 0);

        let path = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .find(|p| p.extension().is_some_and(|ext| ext == "parquet"))
            .expect("one parquet file");

        let file = std::fs::File::open(path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();

        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 3);
    }

    #[tokio::test]
    async fn flush_of_empty_buffer_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingBuffer::new(dir.path(), 5);

        staging.flush().await.unwrap();
        assert_eq!(staging.file_count().await.unwrap(), 0);
        assert_eq!(staging.flush_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingBuffer::new(dir.path(), 5);

        let old = dir.path().join("tweets_20200101000000.parquet");
        let fresh = dir
            .path()
            .join(format!("tweets_{}.parquet", Utc::now().format(TIMESTAMP_FMT)));
        let foreign = dir.path().join("notes.txt");
        std::fs::write(&old, b"x").unwrap();
        std::fs::write(&fresh, b"x").unwrap();
        std::fs::write(&foreign, b"x").unwrap();

        let removed = staging.cleanup(7).await.unwrap();

        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn filename_timestamps_parse() {
        assert!(parse_file_timestamp("tweets_20240115100000.parquet").is_some());
        assert!(parse_file_timestamp("tweets_garbage.parquet").is_none());
        assert!(parse_file_timestamp("other_20240115100000.parquet").is_none());
        assert!(parse_file_timestamp("tweets_20240115100000.csv").is_none());
    }
}
