//! Snapshot identifiers: `YYYY-MM-DD-<nonce>-<method_host_path>`.

use chrono::{DateTime, Utc};
use hyper::{Method, Uri};
use rand::Rng;

const NONCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz1234567890";
const NONCE_LEN: usize = 7;

/// Filesystem-safe description of a request: `get_example_com_8080_a_b`.
pub fn request_id(method: &Method, uri: &Uri) -> String {
    let method = method.as_str().to_lowercase();
    let host = uri
        .authority()
        .map(|a| a.as_str())
        .unwrap_or_default()
        .replace(['.', ':'], "_");
    let path = uri.path().trim_start_matches('/').replace('/', "_");

    [method, host, path]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn random_nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..NONCE_LEN)
        .map(|_| NONCE_ALPHABET[rng.gen_range(0..NONCE_ALPHABET.len())] as char)
        .collect()
}

pub fn format_snapshot_id(date: DateTime<Utc>, nonce: &str, method: &Method, uri: &Uri) -> String {
    format!(
        "{}-{}-{}",
        date.format("%Y-%m-%d"),
        nonce,
        request_id(method, uri)
    )
}

/// A fresh identifier dated `now` with a random nonce.
pub fn new_snapshot_id(now: DateTime<Utc>, method: &Method, uri: &Uri) -> String {
    format_snapshot_id(now, &random_nonce(), method, uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rid(method: Method, url: &str) -> String {
        request_id(&method, &url.parse().unwrap())
    }

    #[test]
    fn test_request_id() {
        let cases = [
            (Method::GET, "https://api.example.com", "get_api_example_com"),
            (Method::POST, "https://example.com", "post_example_com"),
            (Method::DELETE, "https://example.com", "delete_example_com"),
            (Method::CONNECT, "https://example.com", "connect_example_com"),
            (Method::GET, "https://example.com/path", "get_example_com_path"),
            (
                Method::GET,
                "https://example.com/path?test=true&search=query",
                "get_example_com_path",
            ),
            (
                Method::GET,
                "https://example.com/path/With/Capitalization",
                "get_example_com_path_With_Capitalization",
            ),
            (
                Method::GET,
                "https://example.com:9090/path",
                "get_example_com_9090_path",
            ),
        ];

        for (method, url, expected) in cases {
            assert_eq!(rid(method, url), expected, "url: {url}");
        }
    }

    #[test]
    fn test_format_snapshot_id_is_deterministic() {
        let date = Utc.with_ymd_and_hms(2021, 1, 3, 0, 0, 0).unwrap();
        let uri: Uri = "https://example.com/path".parse().unwrap();
        assert_eq!(
            format_snapshot_id(date, "d3f4gx2", &Method::GET, &uri),
            "2021-01-03-d3f4gx2-get_example_com_path"
        );
    }

    #[test]
    fn test_new_snapshot_id_has_random_nonce() {
        let now = Utc::now();
        let uri: Uri = "https://example.com/path".parse().unwrap();
        let id = new_snapshot_id(now, &Method::GET, &uri);

        assert!(id.ends_with("-get_example_com_path"));
        let nonce = &id[11..18];
        assert_eq!(nonce.len(), NONCE_LEN);
        assert!(nonce.bytes().all(|b| NONCE_ALPHABET.contains(&b)));
    }
}
