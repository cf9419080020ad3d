//! Gzip/tar decoding.
//!
//! Tar entries must be read in stream order, so decoding runs on one
//! blocking thread that hands finished entries to the async side through a
//! bounded channel. Dropping the [`ArchiveStream`] stops the producer at the
//! next entry boundary without reporting an error.

use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use flate2::read::GzDecoder;
use hostdeck_core::config::DEFAULT_MAX_ENTRY_SIZE;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{BundleError, BundleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// One decoded archive entry. `path` is exactly as stored in the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub content: Bytes,
}

/// Wraps the bundle source and remembers whether it, rather than the
/// decoder, produced the failure.
struct TrackedReader<R> {
    inner: R,
    failure: Arc<Mutex<Option<String>>>,
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.inner.read(buf) {
            Err(e) if e.kind() != std::io::ErrorKind::Interrupted => {
                if let Ok(mut slot) = self.failure.lock() {
                    slot.get_or_insert_with(|| e.to_string());
                }
                Err(e)
            }
            other => other,
        }
    }
}

fn classify(err: std::io::Error, failure: &Mutex<Option<String>>) -> BundleError {
    let source_failure = failure.lock().ok().and_then(|slot| slot.clone());
    match source_failure {
        Some(reason) => BundleError::BundleRead(reason),
        None => BundleError::ArchiveDecode(err.to_string()),
    }
}

fn entry_kind(entry_type: tar::EntryType) -> EntryKind {
    if entry_type.is_file() {
        EntryKind::File
    } else if entry_type.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::Other
    }
}

/// Lazy sequence of archive entries decoded on a blocking thread.
pub struct ArchiveStream {
    rx: mpsc::Receiver<BundleResult<ArchiveEntry>>,
    cancel: Arc<AtomicBool>,
}

impl ArchiveStream {
    /// Start decoding `reader`. At most `capacity` decoded entries are held
    /// in memory ahead of the consumer.
    pub fn open<R>(reader: R, capacity: usize) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::open_with_limit(reader, capacity, DEFAULT_MAX_ENTRY_SIZE)
    }

    /// Like [`open`](Self::open), failing with `ArchiveDecode` on any file
    /// entry larger than `max_entry_size` bytes.
    pub fn open_with_limit<R>(reader: R, capacity: usize, max_entry_size: u64) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = Arc::new(AtomicBool::new(false));
        let producer_cancel = cancel.clone();

        tokio::task::spawn_blocking(move || decode(reader, tx, producer_cancel, max_entry_size));

        Self { rx, cancel }
    }

    /// Next entry, or `None` at end of archive. After an error no further
    /// entries are produced.
    pub async fn next_entry(&mut self) -> Option<BundleResult<ArchiveEntry>> {
        self.rx.recv().await
    }

    /// Stop decoding. Entries already decoded are discarded.
    pub fn abort(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for ArchiveStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

fn decode<R: Read>(
    reader: R,
    tx: mpsc::Sender<BundleResult<ArchiveEntry>>,
    cancel: Arc<AtomicBool>,
    max_entry_size: u64,
) {
    let failure = Arc::new(Mutex::new(None));
    let tracked = TrackedReader {
        inner: reader,
        failure: failure.clone(),
    };
    let mut archive = tar::Archive::new(GzDecoder::new(tracked));

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => {
            let _ = tx.blocking_send(Err(classify(e, &failure)));
            return;
        }
    };

    let mut produced = 0usize;
    for entry in entries {
        if cancel.load(Ordering::SeqCst) {
            debug!(produced, "archive decoding aborted");
            return;
        }

        let decoded = entry
            .map_err(|e| classify(e, &failure))
            .and_then(|entry| read_entry(entry, max_entry_size, &failure));

        match decoded {
            Ok(entry) => {
                produced += 1;
                // Receiver gone: the consumer stopped early.
                if tx.blocking_send(Ok(entry)).is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to decode bundle");
                let _ = tx.blocking_send(Err(err));
                return;
            }
        }
    }
    debug!(produced, "end of archive");
}

/// Read one entry's body. The declared size comes from the archive header,
/// so it is checked before anything is buffered and the read is capped.
fn read_entry<R: Read>(
    mut entry: tar::Entry<'_, R>,
    max_entry_size: u64,
    failure: &Mutex<Option<String>>,
) -> BundleResult<ArchiveEntry> {
    let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
    let kind = entry_kind(entry.header().entry_type());
    let size = entry.size();
    if kind != EntryKind::File {
        return Ok(ArchiveEntry {
            path,
            kind,
            size,
            content: Bytes::new(),
        });
    }
    if size > max_entry_size {
        return Err(BundleError::ArchiveDecode(format!(
            "entry {path} declares {size} bytes, more than the {max_entry_size} byte limit"
        )));
    }

    let mut buf = Vec::new();
    (&mut entry)
        .take(max_entry_size)
        .read_to_end(&mut buf)
        .map_err(|e| classify(e, failure))?;
    if (buf.len() as u64) < size {
        return Err(BundleError::ArchiveDecode(format!(
            "entry {path} is truncated: {} of {size} bytes",
            buf.len()
        )));
    }
    Ok(ArchiveEntry {
        path,
        kind,
        size,
        content: Bytes::from(buf),
    })
}

/// Strip the synthetic top-level directory and reject anything that is not a
/// plain relative path.
fn stripped_relative_path(raw: &str) -> BundleResult<Option<PathBuf>> {
    let Some((_, rest)) = raw.split_once('/') else {
        return Ok(None);
    };
    let mut out = PathBuf::new();
    for component in Path::new(rest).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(BundleError::UnsafePath(raw.to_string())),
        }
    }
    Ok((!out.as_os_str().is_empty()).then_some(out))
}

/// Extract an archive under `dest`, dropping the top-level directory.
/// Returns the number of files written. Links and special entries are
/// skipped.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> BundleResult<usize> {
    let failure = Arc::new(Mutex::new(None));
    let tracked = TrackedReader {
        inner: reader,
        failure: failure.clone(),
    };
    let mut archive = tar::Archive::new(GzDecoder::new(tracked));
    let io_err = |path: &Path, source: std::io::Error| BundleError::Io {
        path: path.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;

    let mut files = 0;
    for entry in archive.entries().map_err(|e| classify(e, &failure))? {
        let mut entry = entry.map_err(|e| classify(e, &failure))?;
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(rel) = stripped_relative_path(&raw)? else {
            continue;
        };
        let target = dest.join(&rel);

        match entry_kind(entry.header().entry_type()) {
            EntryKind::Directory => {
                std::fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
            }
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                entry
                    .unpack(&target)
                    .map_err(|e| classify(e, &failure))?;
                files += 1;
            }
            EntryKind::Other => {
                debug!(path = %raw, "skipping non-file archive entry");
            }
        }
    }
    debug!(files, dest = %dest.display(), "bundle unpacked");
    Ok(files)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Build a gzip tar from `(path, contents)` pairs. Paths ending in `/`
    /// become directory entries.
    pub(crate) fn build_archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            if path.ends_with('/') {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
            } else {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
            }
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    struct FailingReader {
        data: std::io::Cursor<Vec<u8>>,
        fail_after: usize,
        read: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.read >= self.fail_after {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                ));
            }
            let limit = buf.len().min(self.fail_after - self.read);
            let n = self.data.read(&mut buf[..limit])?;
            self.read += n;
            Ok(n)
        }
    }

    async fn collect(stream: &mut ArchiveStream) -> Vec<BundleResult<ArchiveEntry>> {
        let mut out = Vec::new();
        while let Some(item) = stream.next_entry().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn decodes_entries_in_order() {
        let data = build_archive(&[
            ("site/", b""),
            ("site/index.html", b"<h1>hi</h1>"),
            ("site/js/app.js", b"console.log(1)"),
        ]);
        let mut stream = ArchiveStream::open(std::io::Cursor::new(data), 4);
        let entries: Vec<ArchiveEntry> = collect(&mut stream)
            .await
            .into_iter()
            .map(|e| e.unwrap())
            .collect();

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        assert_eq!(entries[1].path, "site/index.html");
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].size, 11);
        assert_eq!(&entries[2].content[..], b"console.log(1)");
    }

    #[tokio::test]
    async fn malformed_gzip_is_decode_error() {
        let mut stream = ArchiveStream::open(std::io::Cursor::new(b"not gzip".to_vec()), 4);
        let items = collect(&mut stream).await;
        assert_eq!(items.len(), 1);
        let err = items.into_iter().next().unwrap().unwrap_err();
        assert!(matches!(err, BundleError::ArchiveDecode(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn source_failure_is_retryable_read_error() {
        let data = build_archive(&[("site/a.html", &[b'a'; 4096]), ("site/b.html", b"b")]);
        let reader = FailingReader {
            fail_after: 20,
            data: std::io::Cursor::new(data),
            read: 0,
        };
        let mut stream = ArchiveStream::open(reader, 4);
        let items = collect(&mut stream).await;
        let err = items
            .into_iter()
            .find_map(|item| item.err())
            .expect("expected an error");
        assert!(matches!(err, BundleError::BundleRead(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn dropping_stream_stops_quietly() {
        let entries: Vec<(String, Vec<u8>)> = (0..200)
            .map(|i| (format!("site/f{i}.txt"), vec![b'x'; 64]))
            .collect();
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(p, d)| (p.as_str(), d.as_slice()))
            .collect();
        let data = build_archive(&refs);

        let mut stream = ArchiveStream::open(std::io::Cursor::new(data), 2);
        let first = stream.next_entry().await.unwrap().unwrap();
        assert_eq!(first.path, "site/f0.txt");
        stream.abort();
        assert!(stream.next_entry().await.is_none());
    }

    /// A single GNU header claiming `size` bytes, followed by one data block.
    fn oversized_archive(size: u64) -> Vec<u8> {
        use std::io::Write;

        let mut header = tar::Header::new_gnu();
        header.set_path("site/huge.bin").unwrap();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(size);
        header.set_cksum();

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(header.as_bytes()).unwrap();
        encoder.write_all(&[0u8; 512]).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn huge_declared_size_is_decode_error() {
        let data = oversized_archive(1u64 << 45);
        let mut stream = ArchiveStream::open(std::io::Cursor::new(data), 4);
        let items = collect(&mut stream).await;
        assert_eq!(items.len(), 1);
        let err = items.into_iter().next().unwrap().unwrap_err();
        assert!(matches!(err, BundleError::ArchiveDecode(_)));
        assert!(err.to_string().contains("huge.bin"));
    }

    #[tokio::test]
    async fn entry_limit_is_configurable() {
        let data = build_archive(&[("site/a.txt", b"0123456789"), ("site/b.txt", b"ok")]);
        let mut stream = ArchiveStream::open_with_limit(std::io::Cursor::new(data.clone()), 4, 9);
        let items = collect(&mut stream).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(BundleError::ArchiveDecode(_))));

        let mut stream = ArchiveStream::open_with_limit(std::io::Cursor::new(data), 4, 10);
        let items = collect(&mut stream).await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.is_ok()));
    }

    #[tokio::test]
    async fn short_body_is_decode_error() {
        // Declares 4 KiB but carries a single 512 byte block.
        let data = oversized_archive(4096);
        let mut stream = ArchiveStream::open(std::io::Cursor::new(data), 4);
        let items = collect(&mut stream).await;
        let err = items.into_iter().find_map(|item| item.err()).unwrap();
        assert!(matches!(err, BundleError::ArchiveDecode(_)));
    }

    #[test]
    fn unpack_strips_top_level_directory() {
        let data = build_archive(&[
            ("app/", b""),
            ("app/package.json", b"{}"),
            ("app/src/", b""),
            ("app/src/index.md", b"# hi"),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let files = unpack(std::io::Cursor::new(data), dir.path()).unwrap();

        assert_eq!(files, 2);
        assert_eq!(std::fs::read(dir.path().join("package.json")).unwrap(), b"{}");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/index.md")).unwrap(),
            "# hi"
        );
        assert!(!dir.path().join("app").exists());
    }

    #[test]
    fn stripped_path_rejects_escape() {
        assert!(matches!(
            stripped_relative_path("app/../../etc/passwd"),
            Err(BundleError::UnsafePath(_))
        ));
        assert_eq!(stripped_relative_path("app").unwrap(), None);
        assert_eq!(stripped_relative_path("app/").unwrap(), None);
        assert_eq!(
            stripped_relative_path("app/./a/b.txt").unwrap(),
            Some(PathBuf::from("a/b.txt"))
        );
    }
}
