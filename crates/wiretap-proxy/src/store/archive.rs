//! txtar-backed snapshot store.

use super::txtar::{self, Archive, File};
use super::{SnapshotStore, StoreError};
use crate::snapshot::{wire, Snapshot, SnapshotRef};
use hyper::body::Bytes;
use hyper::header::{HeaderName, CONTENT_LENGTH};
use hyper::{HeaderMap, Request, Response};
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ARCHIVE_EXTENSION: &str = "txtar";
pub const REQUEST_SECTION: &str = "request.bin.http";
pub const RESPONSE_SECTION: &str = "response.bin.http";

/// Request headers that may be written to disk. Everything else is dropped
/// because it may carry credentials. `Content-Length` is excluded since
/// stored bodies are meant to be edited.
pub const SAFE_HEADERS: &[&str] = &[
    "accept",
    "accept-encoding",
    "accept-language",
    "cache-control",
    "connection",
    "content-type",
    "host",
    "origin",
    "referer",
    "user-agent",
    "x-test-header",
    "grpc-accept-encoding",
    "grpc-encoding",
    "grpc-timeout",
    "grpc-trace-bin",
    "grpc-status",
    "grpc-message",
    "grpc-status-details-bin",
    "grpc-previous-rpc-attempts",
    "grpc-retry-pushback-ms",
    "grpc-retry-attempts",
    "grpc-retry-max-attempts",
];

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `<dir>/<id>.txtar`
pub fn archive_filename(dir: &Path, reference: &SnapshotRef) -> PathBuf {
    dir.join(format!("{}.{}", reference.id, ARCHIVE_EXTENSION))
}

impl SnapshotStore for ArchiveStore {
    fn read(&self, reference: &SnapshotRef) -> Result<Snapshot, StoreError> {
        let path = archive_filename(&self.dir, reference);
        let bytes = fs::read(&path).map_err(|source| StoreError::Io { path, source })?;
        parse_archive(&bytes, &reference.id)
    }

    fn write(&self, snapshot: &Snapshot) -> Result<SnapshotRef, StoreError> {
        let archive = archive_from_snapshot(snapshot)?;
        let reference = snapshot.reference();
        let path = archive_filename(&self.dir, &reference);

        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, txtar::format(&archive)).map_err(io_err)?;

        debug!("Wrote snapshot archive {}", path.display());
        Ok(reference)
    }
}

fn copy_safe_headers(source: &HeaderMap) -> HeaderMap {
    let mut safe = HeaderMap::new();
    for name in SAFE_HEADERS {
        for value in source.get_all(*name) {
            safe.append(HeaderName::from_static(*name), value.clone());
        }
    }
    safe
}

fn archive_from_snapshot(snapshot: &Snapshot) -> Result<Archive, StoreError> {
    if snapshot.id.is_empty() {
        return Err(StoreError::SnapshotIdRequired);
    }

    let stored_req = snapshot.request()?;
    let mut req = Request::new(stored_req.message.body.clone());
    *req.method_mut() = stored_req.method.clone();
    *req.uri_mut() = stored_req.url.clone();
    *req.headers_mut() = copy_safe_headers(&stored_req.message.header);

    let stored_res = snapshot.response()?;
    let mut res = Response::new(stored_res.message.body.clone());
    *res.status_mut() = stored_res.status_code;
    *res.headers_mut() = stored_res.message.header.clone();
    res.headers_mut().remove(CONTENT_LENGTH);

    Ok(Archive {
        comment: Vec::new(),
        files: vec![
            File {
                name: REQUEST_SECTION.to_string(),
                data: wire::dump_request(&req),
            },
            File {
                name: RESPONSE_SECTION.to_string(),
                data: wire::dump_response(&res),
            },
        ],
    })
}

fn section<'a>(archive: &'a Archive, name: &str) -> Result<&'a [u8], StoreError> {
    archive
        .file(name)
        .map(|f| f.data.as_slice())
        .ok_or_else(|| StoreError::SectionNotFound(name.to_string()))
}

/// Rebuild a snapshot from archive bytes, restoring `id` (minus any `.txtar`).
pub fn parse_archive(bytes: &[u8], id: &str) -> Result<Snapshot, StoreError> {
    let archive = catch_unwind(AssertUnwindSafe(|| txtar::parse(bytes))).map_err(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        StoreError::Malformed(format!("panic parsing txt archive: {reason}"))
    })?;

    let req: Request<Bytes> = wire::parse_request(section(&archive, REQUEST_SECTION)?)?;
    let res: Response<Bytes> = wire::parse_response(section(&archive, RESPONSE_SECTION)?)?;

    let id = id
        .strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))
        .unwrap_or(id);
    Ok(Snapshot::new(id, &req, &res, Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(id: &str) -> Snapshot {
        let req = Request::builder()
            .method("POST")
            .uri("https://api.example.com/v1/users?page=2")
            .header("host", "api.example.com")
            .header("authorization", "Bearer secret")
            .header("cookie", "session=abc")
            .header("content-type", "application/json")
            .header("user-agent", "wiretap-test")
            .header("grpc-timeout", "1S")
            .body(Bytes::from(r#"{"name":"ada"}"#))
            .unwrap();
        let res = Response::builder()
            .status(201)
            .header("content-type", "application/json")
            .header("content-length", "12")
            .header("x-request-id", "r-1")
            .body(Bytes::from("{\"id\":42}\n\n"))
            .unwrap();
        Snapshot::new(id, &req, &res, Duration::from_millis(3))
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let original = snapshot("2021-01-03-d3f4gx2-post_api_example_com_v1_users");

        let reference = store.write(&original).unwrap();
        assert_eq!(reference, original.reference());
        assert!(archive_filename(dir.path(), &reference).exists());

        let loaded = store.read(&reference).unwrap();
        assert_eq!(loaded.id, original.id);
        assert!(loaded.secure);

        let (orig_req, loaded_req) = (original.request().unwrap(), loaded.request().unwrap());
        assert_eq!(loaded_req.method, orig_req.method);
        assert_eq!(loaded_req.url, orig_req.url);
        assert_eq!(loaded_req.message.body, orig_req.message.body);

        let (orig_res, loaded_res) = (original.response().unwrap(), loaded.response().unwrap());
        assert_eq!(loaded_res.status_code, orig_res.status_code);
        assert_eq!(loaded_res.message.body, orig_res.message.body);
        assert_eq!(loaded_res.message.header["x-request-id"], "r-1");
    }

    #[test]
    fn test_write_redacts_request_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let reference = store.write(&snapshot("redacted")).unwrap();

        let loaded = store.read(&reference).unwrap();
        let headers = &loaded.request().unwrap().message.header;
        for name in headers.keys() {
            assert!(
                name == CONTENT_LENGTH || SAFE_HEADERS.contains(&name.as_str()),
                "unexpected header stored: {name}"
            );
        }
        assert!(headers.get("authorization").is_none());
        assert!(headers.get("cookie").is_none());
        assert_eq!(headers["user-agent"], "wiretap-test");
        assert_eq!(headers["grpc-timeout"], "1S");

        let raw = fs::read_to_string(archive_filename(dir.path(), &reference)).unwrap();
        assert!(!raw.contains("secret"));
    }

    #[test]
    fn test_write_strips_response_content_length() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let reference = store.write(&snapshot("no-length")).unwrap();

        let raw = fs::read_to_string(archive_filename(dir.path(), &reference)).unwrap();
        let response = raw.split("-- response.bin.http --").nth(1).unwrap();
        assert!(!response.to_lowercase().contains("content-length"));
    }

    #[test]
    fn test_write_requires_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let err = store.write(&snapshot("")).unwrap_err();
        assert!(matches!(err, StoreError::SnapshotIdRequired));
        assert_eq!(err.to_string(), "snapshot ID is required");
    }

    #[test]
    fn test_write_requires_response() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        let mut incomplete = snapshot("incomplete");
        incomplete.response = None;
        assert!(matches!(
            store.write(&incomplete),
            Err(StoreError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_missing_section() {
        let bytes = b"-- request.bin.http --\nGET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n\n";
        let err = parse_archive(bytes, "x").unwrap_err();
        assert!(matches!(&err, StoreError::SectionNotFound(name) if name == RESPONSE_SECTION));
        assert!(err.to_string().starts_with("file not found in txt archive"));
    }

    #[test]
    fn test_parse_malformed_bytes() {
        assert!(parse_archive(b"\xff\xfe garbage", "x").is_err());
        let bad = b"-- request.bin.http --\nnonsense\n-- response.bin.http --\nHTTP/1.1 200 OK\r\n\r\n\n";
        assert!(matches!(
            parse_archive(bad, "x"),
            Err(StoreError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_restores_id_without_extension() {
        let bytes = b"-- request.bin.http --\nGET /health HTTP/1.1\r\nHost: svc.local\r\n\r\n\n-- response.bin.http --\nHTTP/1.1 204 No Content\r\n\r\n\n";
        let snapshot = parse_archive(bytes, "custom-name.txtar").unwrap();
        assert_eq!(snapshot.id, "custom-name");
        assert_eq!(
            snapshot.request().unwrap().url.to_string(),
            "http://svc.local/health"
        );
        assert_eq!(snapshot.response().unwrap().status_code, 204);
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArchiveStore::new(dir.path());
        assert!(matches!(
            store.read(&SnapshotRef::new("missing")),
            Err(StoreError::Io { .. })
        ));
    }
}
