//! Segmented, checksummed, append-ordered record queue
//!
//! Files for a queue named `q` inside `options.directory`:
//! - `q.diskqueue.000000.dat`, `q.diskqueue.000001.dat`, ... (segments)
//! - `q.diskqueue.meta.json` (read/write cursors, persisted on sync)
//!
//! Reads are two-phase: `read_batch` peeks from the committed cursor and
//! `commit_read` advances it. A crash between the two re-delivers the batch
//! after reopen, never skips it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::errors::{DiskQueueError, DiskQueueResult};
use super::frame::{self, FrameRead};
use super::options::DiskQueueOptions;
use crate::observability::{log_event_at, log_event_with_fields, ReaderEvent, Severity};

/// Persisted cursors. `read_*` is the committed read position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct QueueMeta {
    depth: u64,
    read_segment: u64,
    read_offset: u64,
    write_segment: u64,
    write_offset: u64,
}

/// Cursor reached by the last `read_batch`, applied by `commit_read`.
#[derive(Debug, Clone, Copy)]
struct PendingRead {
    segment: u64,
    offset: u64,
    records: u64,
    bytes: u64,
}

/// Crash-durable named queue of byte records.
pub struct DiskQueue {
    name: String,
    options: DiskQueueOptions,
    write_file: File,
    meta: QueueMeta,
    pending_read: Option<PendingRead>,
    used_bytes: u64,
    last_written: Option<Vec<u8>>,
    unsynced_writes: u64,
    last_sync: Instant,
}

impl DiskQueue {
    /// Opens or creates the queue `name` under `options.directory`.
    ///
    /// Records appended after the last metadata sync are recovered by
    /// scanning forward from the persisted write cursor. A partially written
    /// tail frame is truncated.
    ///
    /// # Errors
    ///
    /// - `CDC_DQ_APPEND_FAILED` if the directory or segment cannot be opened
    /// - `CDC_DQ_METADATA_FAILED` if the metadata file is unreadable (FATAL)
    /// - `CDC_DQ_CORRUPTION` if the metadata points past the segment end (FATAL)
    pub fn open(name: &str, options: DiskQueueOptions) -> DiskQueueResult<Self> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(DiskQueueError::metadata_failed(format!(
                "invalid disk queue name: {:?}",
                name
            )));
        }

        fs::create_dir_all(&options.directory).map_err(|e| {
            DiskQueueError::append_failed(
                format!(
                    "Failed to create disk queue directory: {}",
                    options.directory.display()
                ),
                e,
            )
        })?;

        let meta_path = meta_path(&options.directory, name);
        let mut meta = load_meta(&meta_path)?;

        // Pick up segments started after the last metadata sync.
        loop {
            let path = segment_path(&options.directory, name, meta.write_segment);
            recover_segment_tail(&path, meta.write_segment, &mut meta)?;
            let next = segment_path(&options.directory, name, meta.write_segment + 1);
            if !next.exists() {
                break;
            }
            meta.write_segment += 1;
            meta.write_offset = 0;
        }

        let write_path = segment_path(&options.directory, name, meta.write_segment);
        let write_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&write_path)
            .map_err(|e| {
                DiskQueueError::append_failed(
                    format!("Failed to open segment: {}", write_path.display()),
                    e,
                )
            })?;

        let used_bytes = used_bytes(&options.directory, name, &meta)?;
        let mut last_written =
            scan_last_record(&write_path, meta.write_segment, meta.write_offset)?;
        if last_written.is_none() && meta.write_segment > 0 {
            // Fresh segment after a rotation; the sealed one may still exist.
            let sealed = meta.write_segment - 1;
            let sealed_path = segment_path(&options.directory, name, sealed);
            if let Ok(m) = fs::metadata(&sealed_path) {
                last_written = scan_last_record(&sealed_path, sealed, m.len())?;
            }
        }

        let mut queue = Self {
            name: name.to_string(),
            options,
            write_file,
            meta,
            pending_read: None,
            used_bytes,
            last_written,
            unsynced_writes: 0,
            last_sync: Instant::now(),
        };
        queue.persist_meta()?;
        Ok(queue)
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the directory holding this queue's files.
    pub fn directory(&self) -> &Path {
        &self.options.directory
    }

    /// Number of appended records not yet committed as read.
    pub fn depth(&self) -> u64 {
        self.meta.depth
    }

    /// Bytes occupied by unconsumed frames.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// The most recently appended record, if any.
    pub fn last_written(&self) -> Option<&[u8]> {
        self.last_written.as_deref()
    }

    /// Appends a record.
    ///
    /// The record is readable immediately; it is durable once the next sync
    /// runs (after `sync_every` records or `sync_interval`).
    ///
    /// # Errors
    ///
    /// - `CDC_DQ_INVALID_RECORD` if the size is outside the configured bounds
    /// - `CDC_DQ_FULL` if `max_size_bytes` would be exceeded
    /// - `CDC_DQ_APPEND_FAILED` if the write fails
    /// - `CDC_DQ_FSYNC_FAILED` if a due sync fails (FATAL)
    pub fn append(&mut self, data: &[u8]) -> DiskQueueResult<()> {
        let len = data.len();
        if len < self.options.min_record_bytes as usize || len > self.options.max_record_bytes as usize
        {
            return Err(DiskQueueError::invalid_record(
                len,
                self.options.min_record_bytes,
                self.options.max_record_bytes,
            ));
        }

        let frame_len = frame::frame_len(len);
        if self.used_bytes + frame_len > self.options.max_size_bytes {
            return Err(DiskQueueError::full(
                self.used_bytes + frame_len,
                self.options.max_size_bytes,
            ));
        }

        if self.meta.write_offset > 0
            && self.meta.write_offset + frame_len > self.options.segment_size_bytes
        {
            self.rotate()?;
        }

        self.write_file.write_all(&frame::encode(data)).map_err(|e| {
            DiskQueueError::append_failed(
                format!(
                    "Failed to append to segment {} at offset {}",
                    self.meta.write_segment, self.meta.write_offset
                ),
                e,
            )
        })?;

        self.meta.write_offset += frame_len;
        self.meta.depth += 1;
        self.used_bytes += frame_len;
        self.unsynced_writes += 1;
        self.last_written = Some(data.to_vec());

        self.maybe_sync()
    }

    /// Returns up to `read_batch_size` records from the committed cursor,
    /// in append order, without advancing it.
    ///
    /// Calling this again before `commit_read` returns the same records.
    ///
    /// # Errors
    ///
    /// Returns `CDC_DQ_CORRUPTION` (FATAL) if a frame fails validation or a
    /// segment between the cursors is missing.
    pub fn read_batch(&mut self) -> DiskQueueResult<Vec<Vec<u8>>> {
        let limit = self.options.read_batch_size;
        let mut segment = self.meta.read_segment;
        let mut offset = self.meta.read_offset;
        let mut records = Vec::new();
        let mut bytes = 0u64;

        while records.len() < limit {
            if segment == self.meta.write_segment && offset >= self.meta.write_offset {
                break;
            }

            let path = self.segment_path(segment);
            let segment_end = if segment == self.meta.write_segment {
                self.meta.write_offset
            } else {
                fs::metadata(&path)
                    .map_err(|e| {
                        DiskQueueError::corruption_at(
                            segment,
                            offset,
                            format!("segment unreadable: {}", e),
                        )
                    })?
                    .len()
            };

            if offset >= segment_end {
                segment += 1;
                offset = 0;
                continue;
            }

            let mut reader = open_segment_at(&path, segment, offset)?;
            while records.len() < limit && offset < segment_end {
                let read = frame::read_frame(&mut reader, segment_end - offset).map_err(|e| {
                    DiskQueueError::corruption_at(segment, offset, format!("read failed: {}", e))
                })?;
                match read {
                    FrameRead::Record(payload) => {
                        let len = frame::frame_len(payload.len());
                        offset += len;
                        bytes += len;
                        records.push(payload);
                    }
                    FrameRead::End => break,
                    FrameRead::Torn => {
                        return Err(DiskQueueError::corruption_at(
                            segment,
                            offset,
                            "frame extends past segment end",
                        ))
                    }
                    FrameRead::ChecksumMismatch => {
                        return Err(DiskQueueError::corruption_at(
                            segment,
                            offset,
                            "checksum mismatch",
                        ))
                    }
                }
            }
        }

        self.pending_read = Some(PendingRead {
            segment,
            offset,
            records: records.len() as u64,
            bytes,
        });
        Ok(records)
    }

    /// Advances the committed read cursor past the last `read_batch` and
    /// persists it.
    ///
    /// Segments that are now fully consumed are deleted. A no-op if no batch
    /// is pending.
    ///
    /// # Errors
    ///
    /// `CDC_DQ_FSYNC_FAILED` / `CDC_DQ_METADATA_FAILED` (FATAL)
    pub fn commit_read(&mut self) -> DiskQueueResult<()> {
        let Some(pending) = self.pending_read.take() else {
            return Ok(());
        };

        for consumed in self.meta.read_segment..pending.segment {
            let path = self.segment_path(consumed);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    log_event_at(
                        Severity::Warn,
                        ReaderEvent::DiskQueueSegmentRemoveFailed,
                        &[
                            ("queue", &self.name),
                            ("segment", &consumed.to_string()),
                            ("error", &e.to_string()),
                        ],
                    );
                }
            }
        }

        self.meta.read_segment = pending.segment;
        self.meta.read_offset = pending.offset;
        self.meta.depth = self.meta.depth.saturating_sub(pending.records);
        self.used_bytes = self.used_bytes.saturating_sub(pending.bytes);

        // Cursor and data go out together; metadata never runs ahead of data.
        self.sync()
    }

    /// Flushes segment data and persists the cursors.
    pub fn sync(&mut self) -> DiskQueueResult<()> {
        self.write_file.sync_data().map_err(|e| {
            DiskQueueError::fsync_failed(
                format!("fsync failed on segment {}", self.meta.write_segment),
                e,
            )
        })?;
        self.persist_meta()?;
        self.unsynced_writes = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Syncs and releases the queue.
    pub fn close(mut self) -> DiskQueueResult<()> {
        self.sync()
    }

    fn maybe_sync(&mut self) -> DiskQueueResult<()> {
        if self.unsynced_writes >= self.options.sync_every
            || self.last_sync.elapsed() >= self.options.sync_interval()
        {
            self.sync()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> DiskQueueResult<()> {
        self.write_file.sync_data().map_err(|e| {
            DiskQueueError::fsync_failed(
                format!("fsync failed sealing segment {}", self.meta.write_segment),
                e,
            )
        })?;

        let next = self.meta.write_segment + 1;
        let path = self.segment_path(next);
        self.write_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                DiskQueueError::append_failed(
                    format!("Failed to create segment: {}", path.display()),
                    e,
                )
            })?;
        self.meta.write_segment = next;
        self.meta.write_offset = 0;
        self.persist_meta()
    }

    fn persist_meta(&self) -> DiskQueueResult<()> {
        let path = meta_path(&self.options.directory, &self.name);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec(&self.meta).map_err(|e| {
            DiskQueueError::metadata_failed(format!("Failed to encode metadata: {}", e))
        })?;

        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&body)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| {
            DiskQueueError::metadata_failed(format!(
                "Failed to persist metadata {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn segment_path(&self, segment: u64) -> PathBuf {
        segment_path(&self.options.directory, &self.name, segment)
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        if self.unsynced_writes > 0 {
            let _ = self.sync();
        }
    }
}

fn segment_path(dir: &Path, name: &str, segment: u64) -> PathBuf {
    dir.join(format!("{}.diskqueue.{:06}.dat", name, segment))
}

fn meta_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.diskqueue.meta.json", name))
}

fn load_meta(path: &Path) -> DiskQueueResult<QueueMeta> {
    match fs::read(path) {
        Ok(body) => serde_json::from_slice(&body).map_err(|e| {
            DiskQueueError::metadata_failed(format!(
                "Invalid metadata {}: {}",
                path.display(),
                e
            ))
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(QueueMeta::default()),
        Err(e) => Err(DiskQueueError::metadata_failed(format!(
            "Failed to read metadata {}: {}",
            path.display(),
            e
        ))),
    }
}

fn open_segment_at(path: &Path, segment: u64, offset: u64) -> DiskQueueResult<BufReader<File>> {
    let mut file = File::open(path).map_err(|e| {
        DiskQueueError::corruption_at(segment, offset, format!("segment unreadable: {}", e))
    })?;
    file.seek(SeekFrom::Start(offset)).map_err(|e| {
        DiskQueueError::corruption_at(segment, offset, format!("seek failed: {}", e))
    })?;
    Ok(BufReader::new(file))
}

/// Extends `meta` with complete frames found past `meta.write_offset` and
/// truncates whatever follows the last complete frame.
fn recover_segment_tail(path: &Path, segment: u64, meta: &mut QueueMeta) -> DiskQueueResult<()> {
    let len = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
        Err(e) => {
            return Err(DiskQueueError::corruption_at(
                segment,
                0,
                format!("segment unreadable: {}", e),
            ))
        }
    };

    if len < meta.write_offset {
        return Err(DiskQueueError::corruption_at(
            segment,
            len,
            format!(
                "segment is {} bytes but metadata records {} written",
                len, meta.write_offset
            ),
        ));
    }
    if len == meta.write_offset {
        return Ok(());
    }

    let mut reader = open_segment_at(path, segment, meta.write_offset)?;
    let mut recovered = 0u64;
    loop {
        let read = frame::read_frame(&mut reader, len - meta.write_offset).map_err(|e| {
            DiskQueueError::corruption_at(segment, meta.write_offset, format!("read failed: {}", e))
        })?;
        match read {
            FrameRead::Record(payload) => {
                meta.write_offset += frame::frame_len(payload.len());
                meta.depth += 1;
                recovered += 1;
            }
            FrameRead::End => break,
            FrameRead::Torn | FrameRead::ChecksumMismatch => {
                log_event_at(
                    Severity::Warn,
                    ReaderEvent::DiskQueueTailTruncated,
                    &[
                        ("segment", &segment.to_string()),
                        ("offset", &meta.write_offset.to_string()),
                        ("segment_len", &len.to_string()),
                    ],
                );
                let file = OpenOptions::new().write(true).open(path).map_err(|e| {
                    DiskQueueError::append_failed("Failed to open segment for truncation", e)
                })?;
                file.set_len(meta.write_offset).map_err(|e| {
                    DiskQueueError::append_failed("Failed to truncate torn segment tail", e)
                })?;
                file.sync_all().map_err(|e| {
                    DiskQueueError::fsync_failed("fsync failed after truncation", e)
                })?;
                break;
            }
        }
    }

    if recovered > 0 {
        log_event_with_fields(
            ReaderEvent::DiskQueueRecovered,
            &[
                ("segment", &segment.to_string()),
                ("records", &recovered.to_string()),
            ],
        );
    }
    Ok(())
}

fn used_bytes(dir: &Path, name: &str, meta: &QueueMeta) -> DiskQueueResult<u64> {
    let mut total = 0u64;
    for segment in meta.read_segment..=meta.write_segment {
        let len = if segment == meta.write_segment {
            meta.write_offset
        } else {
            fs::metadata(segment_path(dir, name, segment))
                .map_err(|e| {
                    DiskQueueError::corruption_at(
                        segment,
                        0,
                        format!("unconsumed segment missing: {}", e),
                    )
                })?
                .len()
        };
        total += len;
    }
    Ok(total.saturating_sub(meta.read_offset))
}

fn scan_last_record(path: &Path, segment: u64, end: u64) -> DiskQueueResult<Option<Vec<u8>>> {
    if end == 0 {
        return Ok(None);
    }
    let mut reader = open_segment_at(path, segment, 0)?;
    let mut offset = 0u64;
    let mut last = None;
    while offset < end {
        match frame::read_frame(&mut reader, end - offset).map_err(|e| {
            DiskQueueError::corruption_at(segment, offset, format!("read failed: {}", e))
        })? {
            FrameRead::Record(payload) => {
                offset += frame::frame_len(payload.len());
                last = Some(payload);
            }
            FrameRead::End => break,
            FrameRead::Torn | FrameRead::ChecksumMismatch => {
                return Err(DiskQueueError::corruption_at(
                    segment,
                    offset,
                    "invalid frame in committed region",
                ))
            }
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> DiskQueueOptions {
        DiskQueueOptions {
            sync_every: 1,
            ..DiskQueueOptions::in_directory(dir.path())
        }
    }

    fn drain(queue: &mut DiskQueue) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let batch = queue.read_batch().unwrap();
            if batch.is_empty() {
                return out;
            }
            out.extend(batch);
            queue.commit_read().unwrap();
        }
    }

    #[test]
    fn test_open_creates_files() {
        let temp_dir = TempDir::new().unwrap();
        let queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();

        assert_eq!(queue.name(), "rs0");
        assert_eq!(queue.depth(), 0);
        assert!(queue.last_written().is_none());
        assert!(temp_dir.path().join("rs0.diskqueue.000000.dat").exists());
        assert!(temp_dir.path().join("rs0.diskqueue.meta.json").exists());
    }

    #[test]
    fn test_rejects_names_with_separators() {
        let temp_dir = TempDir::new().unwrap();
        assert!(DiskQueue::open("a/b", options(&temp_dir)).is_err());
        assert!(DiskQueue::open("", options(&temp_dir)).is_err());
    }

    #[test]
    fn test_reads_in_append_order() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();

        for i in 0..5u8 {
            queue.append(&[i; 4]).unwrap();
        }
        assert_eq!(queue.depth(), 5);
        assert_eq!(queue.last_written(), Some(&[4u8; 4][..]));

        let records = drain(&mut queue);
        assert_eq!(records, (0..5u8).map(|i| vec![i; 4]).collect::<Vec<_>>());
        assert_eq!(queue.depth(), 0);
        assert_eq!(queue.used_bytes(), 0);
    }

    #[test]
    fn test_read_batch_is_idempotent_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = DiskQueue::open(
            "rs0",
            DiskQueueOptions {
                read_batch_size: 2,
                ..options(&temp_dir)
            },
        )
        .unwrap();

        for payload in [b"a", b"b", b"c"] {
            queue.append(payload).unwrap();
        }

        let first = queue.read_batch().unwrap();
        let again = queue.read_batch().unwrap();
        assert_eq!(first, vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(first, again);

        queue.commit_read().unwrap();
        assert_eq!(queue.read_batch().unwrap(), vec![b"c".to_vec()]);
    }

    #[test]
    fn test_uncommitted_batch_redelivered_after_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();
            queue.append(b"one").unwrap();
            queue.append(b"two").unwrap();
            assert_eq!(queue.read_batch().unwrap().len(), 2);
            // dropped without commit
        }

        let mut queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();
        assert_eq!(queue.depth(), 2);
        assert_eq!(drain(&mut queue), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_segments_rotate_and_consumed_ones_are_removed() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = DiskQueue::open(
            "rs0",
            DiskQueueOptions {
                segment_size_bytes: 40,
                ..options(&temp_dir)
            },
        )
        .unwrap();

        // 8 header + 16 payload = 24 bytes per frame, one frame per segment
        for i in 0..3u8 {
            queue.append(&[i; 16]).unwrap();
        }
        assert!(temp_dir.path().join("rs0.diskqueue.000002.dat").exists());

        let records = drain(&mut queue);
        assert_eq!(records.len(), 3);
        assert!(!temp_dir.path().join("rs0.diskqueue.000000.dat").exists());
        assert!(!temp_dir.path().join("rs0.diskqueue.000001.dat").exists());
        assert!(temp_dir.path().join("rs0.diskqueue.000002.dat").exists());
    }

    #[test]
    fn test_max_size_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = DiskQueue::open(
            "rs0",
            DiskQueueOptions {
                max_size_bytes: 20,
                ..options(&temp_dir)
            },
        )
        .unwrap();

        queue.append(&[0u8; 10]).unwrap();
        let err = queue.append(&[0u8; 10]).unwrap_err();
        assert_eq!(err.code(), super::super::errors::DiskQueueErrorCode::Full);
        assert!(!err.is_fatal());

        drain(&mut queue);
        assert!(queue.append(&[0u8; 10]).is_ok());
    }

    #[test]
    fn test_record_bounds_enforced() {
        let temp_dir = TempDir::new().unwrap();
        let mut queue = DiskQueue::open(
            "rs0",
            DiskQueueOptions {
                min_record_bytes: 2,
                max_record_bytes: 4,
                ..options(&temp_dir)
            },
        )
        .unwrap();

        assert!(queue.append(b"a").is_err());
        assert!(queue.append(b"abcde").is_err());
        assert!(queue.append(b"abc").is_ok());
        assert_eq!(queue.depth(), 1);
    }

    #[test]
    fn test_unsynced_appends_recovered_from_segment() {
        let temp_dir = TempDir::new().unwrap();
        let lazy = DiskQueueOptions {
            sync_every: 1000,
            sync_interval_ms: 60_000,
            ..DiskQueueOptions::in_directory(temp_dir.path())
        };
        {
            let mut queue = DiskQueue::open("rs0", lazy.clone()).unwrap();
            queue.append(b"x").unwrap();
            queue.append(b"y").unwrap();
            // Skip Drop so metadata never records these appends.
            std::mem::forget(queue);
        }

        let mut queue = DiskQueue::open("rs0", lazy).unwrap();
        assert_eq!(queue.depth(), 2);
        assert_eq!(queue.last_written(), Some(&b"y"[..]));
        assert_eq!(drain(&mut queue), vec![b"x".to_vec(), b"y".to_vec()]);
    }

    #[test]
    fn test_torn_tail_truncated_on_open() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();
            queue.append(b"complete").unwrap();
        }

        let segment = temp_dir.path().join("rs0.diskqueue.000000.dat");
        let intact_len = fs::metadata(&segment).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
        file.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let mut queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();
        assert_eq!(fs::metadata(&segment).unwrap().len(), intact_len);
        assert_eq!(drain(&mut queue), vec![b"complete".to_vec()]);
    }

    #[test]
    fn test_corrupt_committed_frame_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();
            queue.append(b"payload").unwrap();
        }

        let segment = temp_dir.path().join("rs0.diskqueue.000000.dat");
        let mut bytes = fs::read(&segment).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&segment, bytes).unwrap();

        let err = DiskQueue::open("rs0", options(&temp_dir)).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_last_written_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let mut queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();
            queue.append(b"first").unwrap();
            queue.append(b"second").unwrap();
            queue.close().unwrap();
        }

        let queue = DiskQueue::open("rs0", options(&temp_dir)).unwrap();
        assert_eq!(queue.last_written(), Some(&b"second"[..]));
    }
}
