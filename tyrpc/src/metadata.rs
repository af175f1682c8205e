use std::net::SocketAddr;

use hyper::{
    HeaderMap, Method, Uri,
    header::{HeaderName, HeaderValue},
};

/// Transport metadata of one unit of work: the HTTP request carrying a batch,
/// or the upgrade request that opened a subscription connection.
#[derive(Clone, Debug, Default)]
pub struct Metadata {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl Metadata {
    #[must_use]
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method,
            uri,
            headers,
            remote_addr,
        }
    }

    /// Merges query-string pairs into the headers as lower-cased pseudo-headers.
    ///
    /// Browsers cannot set headers on a WebSocket handshake, so clients pass
    /// e.g. `?authorization=...` instead. Pairs that are not valid header
    /// names or values are skipped.
    #[must_use]
    pub fn with_query_headers(mut self) -> Self {
        let Some(query) = self.uri.query() else {
            return self;
        };
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        for (key, value) in pairs {
            match (HeaderName::from_bytes(key.as_bytes()), HeaderValue::from_str(&value)) {
                (Ok(name), Ok(value)) => {
                    self.headers.insert(name, value);
                }
                _ => tracing::debug!("skip query pseudo-header {key:?}"),
            }
        }
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-origin", HeaderValue::from_static("header"));
        let meta = Metadata::new(
            Method::GET,
            Uri::from_static("/?Authorization=Bearer%20abc&x-origin=query&bad%20name=1"),
            headers,
            None,
        )
        .with_query_headers();

        assert_eq!(meta.header("authorization"), Some("Bearer abc"));
        assert_eq!(meta.header("x-origin"), Some("query"));
        assert_eq!(meta.headers.len(), 2);
    }

    #[test]
    fn test_no_query() {
        let meta = Metadata::default().with_query_headers();
        assert!(meta.headers.is_empty());
        assert_eq!(meta.header("authorization"), None);
    }
}
