//! Stream phase: fetch each planned file and append it to a ZIP that is
//! flushed to the sink entry by entry.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::plan::{ExportEntry, ExportPlan};
use crate::context::CollectService;
use crate::error::{CollectError, CollectResult};

pub const MANIFEST_ENTRY: &str = "manifest.csv";
pub const SKIPPED_ENTRY: &str = "skipped.txt";

#[derive(Error, Debug)]
#[error("export consumer went away")]
pub struct SinkClosed;

/// Where archive bytes go, in order.
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), SinkClosed>;

    /// Resolves once the consumer is gone. Never resolves by default.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Forwards chunks to a receiver, typically a streaming HTTP body.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ExportSink for ChannelSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.tx.send(chunk).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Collects the whole archive in memory.
#[derive(Default)]
pub struct BufferSink {
    buf: Vec<u8>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[async_trait]
impl ExportSink for BufferSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub entries_written: usize,
    /// Planned files that could not be fetched.
    pub entries_skipped: usize,
    pub bytes_written: u64,
    /// The consumer disconnected before the archive was complete.
    pub cancelled: bool,
}

/// Bytes already handed to the sink start before `base` and are gone.
#[derive(Default)]
struct Spool {
    base: u64,
    buf: Vec<u8>,
    pos: u64,
}

/// Seekable in-memory window over the archive. The ZIP writer only seeks
/// back into the entry it is finishing, so everything before that entry's
/// header can be drained.
#[derive(Clone, Default)]
struct SpoolWriter {
    inner: Arc<Mutex<Spool>>,
}

impl SpoolWriter {
    fn lock(&self) -> MutexGuard<'_, Spool> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn position(&self) -> u64 {
        self.lock().pos
    }

    /// Take every byte before absolute offset `upto`.
    fn drain_before(&self, upto: u64) -> Bytes {
        let mut spool = self.lock();
        let n = upto.saturating_sub(spool.base).min(spool.buf.len() as u64) as usize;
        let drained: Vec<u8> = spool.buf.drain(..n).collect();
        spool.base += n as u64;
        Bytes::from(drained)
    }

    fn drain_all(&self) -> Bytes {
        let end = {
            let spool = self.lock();
            spool.base + spool.buf.len() as u64
        };
        self.drain_before(end)
    }
}

impl Write for SpoolWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut spool = self.lock();
        if spool.pos < spool.base {
            return Err(io::Error::new(io::ErrorKind::Other, "write before flushed region"));
        }
        let offset = (spool.pos - spool.base) as usize;
        let end = offset + data.len();
        if spool.buf.len() < end {
            spool.buf.resize(end, 0);
        }
        spool.buf[offset..end].copy_from_slice(data);
        spool.pos += data.len() as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SpoolWriter {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let mut spool = self.lock();
        let end = spool.base + spool.buf.len() as u64;
        let next = match target {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => end.checked_add_signed(d),
            SeekFrom::Current(d) => spool.pos.checked_add_signed(d),
        };
        match next {
            Some(n) if n >= spool.base => {
                spool.pos = n;
                Ok(n)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek into flushed region",
            )),
        }
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

enum Fetched {
    Bytes(Bytes),
    Skipped,
    Cancelled,
}

/// Body of the note appended after the manifest when files were skipped.
pub fn skipped_note(paths: &[String]) -> String {
    let mut note = format!("{} file(s) could not be fetched:\n", paths.len());
    for path in paths {
        note.push_str(path);
        note.push('\n');
    }
    note
}

/// Appends one entry and hands everything before its header to the sink.
/// Returns false when the consumer is gone.
async fn append_entry(
    zip: &mut ZipWriter<SpoolWriter>,
    spool: &SpoolWriter,
    sink: &mut dyn ExportSink,
    report: &mut StreamReport,
    path: &str,
    data: &[u8],
) -> CollectResult<bool> {
    let header_at = spool.position();
    zip.start_file(path, entry_options())
        .map_err(|e| CollectError::Internal(format!("zip entry {}: {}", path, e)))?;
    zip.write_all(data)
        .map_err(|e| CollectError::Internal(format!("zip write {}: {}", path, e)))?;
    report.entries_written += 1;

    let ready = spool.drain_before(header_at);
    if ready.is_empty() {
        return Ok(true);
    }
    report.bytes_written += ready.len() as u64;
    Ok(sink.write_chunk(ready).await.is_ok())
}

impl CollectService {
    async fn fetch_entry(&self, entry: &ExportEntry, sink: &dyn ExportSink) -> Fetched {
        let url = match self
            .deps
            .blobs
            .create_signed_download_url(&self.bucket, &entry.file_key, self.signed_url_ttl(), &entry.file_name)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Skipping export entry {}: cannot sign URL: {}", entry.path, e);
                return Fetched::Skipped;
            }
        };
        tokio::select! {
            fetched = self.deps.fetcher.fetch(&url) => match fetched {
                Ok(bytes) => Fetched::Bytes(bytes),
                Err(e) => {
                    tracing::warn!("Skipping export entry {}: {}", entry.path, e);
                    Fetched::Skipped
                }
            },
            _ = sink.closed() => Fetched::Cancelled,
        }
    }

    /// Assemble the planned archive into `sink`. Files that cannot be fetched
    /// are skipped and listed in a trailing `skipped.txt`. Finalization errors
    /// are logged, not returned.
    pub async fn stream_zip(
        &self,
        plan: &ExportPlan,
        sink: &mut dyn ExportSink,
    ) -> CollectResult<StreamReport> {
        let spool = SpoolWriter::default();
        let mut zip = ZipWriter::new(spool.clone());
        let mut report = StreamReport::default();
        let mut skipped_paths = Vec::new();

        for entry in &plan.entries {
            if sink.is_closed() {
                report.cancelled = true;
                break;
            }
            let data = match self.fetch_entry(entry, &*sink).await {
                Fetched::Bytes(bytes) => bytes,
                Fetched::Skipped => {
                    report.entries_skipped += 1;
                    skipped_paths.push(entry.path.clone());
                    continue;
                }
                Fetched::Cancelled => {
                    report.cancelled = true;
                    break;
                }
            };
            if !append_entry(&mut zip, &spool, sink, &mut report, &entry.path, &data).await? {
                report.cancelled = true;
                break;
            }
        }

        if !report.cancelled {
            let mut trailer = vec![(MANIFEST_ENTRY, plan.manifest_csv.clone())];
            if !skipped_paths.is_empty() {
                trailer.push((SKIPPED_ENTRY, skipped_note(&skipped_paths)));
            }
            for (path, text) in trailer {
                if sink.is_closed()
                    || !append_entry(&mut zip, &spool, sink, &mut report, path, text.as_bytes()).await?
                {
                    report.cancelled = true;
                    break;
                }
            }
        }

        if report.cancelled {
            tracing::info!(
                "Export of task {} cancelled after {} entries",
                plan.task_id,
                report.entries_written
            );
            return Ok(report);
        }

        if let Err(e) = zip.finish() {
            tracing::warn!("Could not finalize archive for task {}: {}", plan.task_id, e);
        }
        let tail = spool.drain_all();
        if !tail.is_empty() {
            report.bytes_written += tail.len() as u64;
            if sink.write_chunk(tail).await.is_err() {
                report.cancelled = true;
            }
        }
        tracing::info!(
            "Streamed export of task {}: {} written, {} skipped, {} bytes",
            plan.task_id,
            report.entries_written,
            report.entries_skipped,
            report.bytes_written
        );
        Ok(report)
    }
}
