//! Content-addressed body storage and the screenshot store.
//!
//! Bodies are written once per content hash: the sha256 of the raw bytes is
//! the identity, the sniffed content type gates what is stored at all, and
//! an optional gzip pass shrinks what lands on disk. Screenshots have no
//! identity worth deduplicating; they get random names under their domain.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::BrowserScreenshot;
use crate::parse::detect_content_type;

/// How stored bodies are compressed on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    /// gzip at best compression.
    Gzip,
}

impl Compression {
    fn ext(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
        }
    }

    fn write(&self, path: &Path, raw: &[u8]) -> std::io::Result<()> {
        match self {
            Compression::None => std::fs::write(path, raw),
            Compression::Gzip => {
                let file = std::fs::File::create(path)?;
                let mut encoder = GzEncoder::new(file, GzLevel::best());
                encoder.write_all(raw)?;
                encoder.finish()?;
                Ok(())
            }
        }
    }
}

/// Metadata describing one stored (or refused) body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub hash: String,
    pub hash_type: &'static str,
    /// Length of the raw bytes.
    pub org_size: usize,
    /// On-disk size after compression; unset when nothing was written.
    pub comp_size: Option<u64>,
    /// Absolute path of the written file; unset when the mime was refused.
    pub path: Option<PathBuf>,
    /// Content type sniffed from the raw bytes.
    pub mime_type: String,
}

impl fmt::Display for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({}, {} bytes)",
            self.hash_type, self.hash, self.mime_type, self.org_size
        )
    }
}

#[derive(Error, Debug)]
pub enum FileStoreError {
    /// The sniffed mime failed the allow-list. Carries the metadata that
    /// would have been stored so callers can still record the body facts.
    #[error("mime type is not allowed to be stored: {}", .0.mime_type)]
    NotAllowedMime(StoredFile),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Predicate over a sniffed content type.
pub type MimeValidator = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub fn mime_any() -> MimeValidator {
    Box::new(|_| true)
}

pub fn mime_is_text() -> MimeValidator {
    Box::new(|mime| mime.starts_with("text/"))
}

pub fn mime_matches(re: regex::Regex) -> MimeValidator {
    Box::new(move |mime| re.is_match(mime))
}

/// Content-addressed writer for response bodies.
pub struct FileStore {
    root: PathBuf,
    compression: Compression,
    validators: Vec<MimeValidator>,
    known: Mutex<HashMap<String, StoredFile>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compression: Compression::None,
            validators: vec![mime_any()],
            known: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Replaces the allow-list; a body is stored when any validator accepts
    /// its sniffed mime.
    pub fn with_mime_validators(mut self, validators: Vec<MimeValidator>) -> Self {
        self.validators = validators;
        self
    }

    fn mime_allowed(&self, mime: &str) -> bool {
        self.validators.iter().any(|v| v(mime))
    }

    /// Stores raw bytes, returning the prior record when the hash is known.
    ///
    /// # Errors
    ///
    /// `NotAllowedMime` when the sniffed type fails the allow-list (the
    /// carried metadata is fully populated except for the path), or an I/O
    /// error from the filesystem.
    pub fn store(&self, raw: &[u8]) -> Result<StoredFile, FileStoreError> {
        let hash = format!("{:x}", Sha256::digest(raw));
        let mime_type = detect_content_type(raw).to_string();

        let mut stored = StoredFile {
            hash: hash.clone(),
            hash_type: "sha256",
            org_size: raw.len(),
            comp_size: None,
            path: None,
            mime_type: mime_type.clone(),
        };

        if !self.mime_allowed(&mime_type) {
            return Err(FileStoreError::NotAllowedMime(stored));
        }

        if let Some(known) = self.known.lock().expect("file store poisoned").get(&hash) {
            return Ok(known.clone());
        }

        let filename = format!(
            "{hash}{}{}",
            extension_for_mime(&mime_type),
            self.compression.ext()
        );
        let path = self.root.join(filename);

        self.compression.write(&path, raw)?;
        stored.comp_size = Some(std::fs::metadata(&path)?.len());
        stored.path = Some(path);

        self.known
            .lock()
            .expect("file store poisoned")
            .insert(hash, stored.clone());

        Ok(stored)
    }
}

/// File extension for the mime types the sniffer can produce.
fn extension_for_mime(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    match essence {
        "text/html" => ".html",
        "text/plain" => ".txt",
        "application/pdf" => ".pdf",
        "application/postscript" => ".ps",
        "image/gif" => ".gif",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/bmp" => ".bmp",
        "image/webp" => ".webp",
        "application/x-gzip" => ".gz",
        "application/zip" => ".zip",
        "application/x-rar-compressed" => ".rar",
        "application/ogg" => ".ogx",
        "video/webm" => ".webm",
        "video/mp4" => ".mp4",
        "audio/mpeg" => ".mp3",
        "audio/wave" => ".wav",
        "font/woff" => ".woff",
        "font/woff2" => ".woff2",
        _ => "",
    }
}

const FILENAME_LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn rand_letters(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| FILENAME_LETTERS[rng.gen_range(0..FILENAME_LETTERS.len())] as char)
        .collect()
}

/// Writer for screenshots, one directory per domain.
pub struct ScreenshotStore {
    root: PathBuf,
}

impl ScreenshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes a screenshot under `<root>/<lower(domain)>/` with a random
    /// 16-letter prefix and returns the path.
    pub fn store(
        &self,
        shot: &BrowserScreenshot,
        domain: &str,
    ) -> Result<PathBuf, FileStoreError> {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() {
            return Err(FileStoreError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "domain cannot be empty",
            )));
        }

        let filename = format!(
            "{}-{}.{}",
            rand_letters(16),
            shot.resolution,
            shot.kind.to_lowercase()
        );

        let folder = self.root.join(domain);
        std::fs::create_dir_all(&folder)?;

        let path = folder.join(filename);
        std::fs::write(&path, &shot.data)?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flate2::read::GzDecoder;
    use std::io::Read;

    use crate::models::Resolution;

    #[test]
    fn identical_bytes_are_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let first = store.store(b"hello world\n").unwrap();
        let second = store.store(b"hello world\n").unwrap();
        assert_eq!(first, second);
        assert_eq!(first.org_size, 12);
        assert!(first.mime_type.starts_with("text/plain"));

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn gzip_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).with_compression(Compression::Gzip);

        let payload = b"hello world hello world hello world\n";
        let stored = store.store(payload).unwrap();
        let path = stored.path.as_ref().unwrap();
        assert!(path.to_string_lossy().ends_with(".txt.gz"));

        let mut decoder = GzDecoder::new(std::fs::File::open(path).unwrap());
        let mut back = Vec::new();
        decoder.read_to_end(&mut back).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn refused_mime_populates_metadata_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).with_mime_validators(vec![mime_is_text()]);

        let png = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0];
        match store.store(&png) {
            Err(FileStoreError::NotAllowedMime(file)) => {
                assert_eq!(file.mime_type, "image/png");
                assert_eq!(file.org_size, png.len());
                assert!(file.path.is_none());
                assert!(file.comp_size.is_none());
                assert!(!file.hash.is_empty());
            }
            other => panic!("expected NotAllowedMime, got {other:?}"),
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn regex_validator_gates_on_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path())
            .with_mime_validators(vec![mime_matches(regex::Regex::new("^text/html").unwrap())]);

        assert!(store.store(b"<html><body>x</body></html>").is_ok());
        assert!(matches!(
            store.store(b"plain body"),
            Err(FileStoreError::NotAllowedMime(_))
        ));
    }

    #[test]
    fn screenshots_land_in_domain_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path());

        let shot = BrowserScreenshot {
            data: vec![1, 2, 3],
            taken: Utc::now(),
            resolution: Resolution::new(800, 600),
            kind: "PNG".into(),
        };

        let path = store.store(&shot, "Example.COM").unwrap();
        assert!(path.starts_with(dir.path().join("example.com")));

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-800x600.png"));
        // 16 random letters, dash, resolution, extension
        assert_eq!(name.split('-').next().unwrap().len(), 16);
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn empty_domain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenshotStore::new(dir.path());
        let shot = BrowserScreenshot {
            data: vec![],
            taken: Utc::now(),
            resolution: Resolution::default(),
            kind: "png".into(),
        };
        assert!(store.store(&shot, "  ").is_err());
    }
}
