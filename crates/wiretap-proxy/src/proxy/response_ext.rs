//! Response extension traits for converting buffered responses into
//! handler responses.

use super::{full, ProxyBody};
use hyper::body::Bytes;
use hyper::Response;

pub trait ResponseExt {
    /// Convert the buffered body into a [`ProxyBody`].
    fn into_boxed(self) -> Response<ProxyBody>;
}

impl ResponseExt for Response<Bytes> {
    fn into_boxed(self) -> Response<ProxyBody> {
        self.map(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_into_boxed_preserves_parts() {
        let response = Response::builder()
            .status(404)
            .header("X-Custom", "value")
            .body(Bytes::from("not found"))
            .unwrap();

        let boxed = response.into_boxed();
        assert_eq!(boxed.status(), 404);
        assert_eq!(boxed.headers().get("X-Custom").unwrap(), "value");

        let body = boxed.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "not found");
    }
}
