//! HTTP client abstraction.
//!
//! Remote endpoints are reached through [`HttpClient`], so any HTTP library
//! (or none, see [`LoopbackClient`]) can carry replication traffic. Bodies
//! are JSON except attachment downloads, which are raw bytes.

use std::collections::BTreeMap;
use std::fmt;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `PUT`
    Put,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        })
    }
}

/// A response: status plus body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. An `Err` is a
/// failure to get any response at all; error statuses are returned as `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    fn send(
        &self,
        method: Method,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a request for `path` (which may carry a query string).
    fn handle(&self, method: Method, path: &str, body: &[u8]) -> HttpResponse;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

/// Returns the path (and query) of a URL, dropping scheme and authority.
pub fn url_path(url: &str) -> &str {
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => url,
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn send(
        &self,
        method: Method,
        url: &str,
        _headers: &BTreeMap<String, String>,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, String> {
        let body = body.unwrap_or_default();
        Ok(self.server.handle(method, url_path(url), &body))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl LoopbackServer for Echo {
        fn handle(&self, method: Method, path: &str, body: &[u8]) -> HttpResponse {
            let mut out = format!("{method} {path} ").into_bytes();
            out.extend_from_slice(body);
            HttpResponse::new(200, out)
        }
    }

    #[test]
    fn paths() {
        assert_eq!(url_path("http://host:5984/db/_changes"), "/db/_changes");
        assert_eq!(url_path("https://host"), "/");
        assert_eq!(url_path("/db/x?revs=true"), "/db/x?revs=true");
    }

    #[test]
    fn loopback_routes_to_server() {
        let client = LoopbackClient::new(Echo);
        let res = client
            .send(
                Method::Post,
                "http://remote/db/_bulk_docs",
                &BTreeMap::new(),
                Some(b"{}".to_vec()),
            )
            .unwrap();
        assert!(res.is_success());
        assert_eq!(res.body, b"POST /db/_bulk_docs {}");
        assert!(client.is_healthy());
    }
}
