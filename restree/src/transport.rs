//! Sending rendered requests.

use std::time::Instant;

use reqwest::blocking::{Body, Client, ClientBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, EXPECT};
use tracing::debug;

use crate::error::{Error, Result};
use crate::request::{BodySource, Request};
use crate::response::Response;

pub trait Transport {
    /// # Errors
    ///
    /// Fails when the request cannot be built or sent.
    fn execute(&self, request: Request) -> Result<Response>;
}

/// Blocking reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    body_threshold: usize,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Fails when the TLS backend cannot be initialised.
    pub fn new(user_agent: &str, body_threshold: usize) -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(user_agent)
            .build()
            .map_err(Error::Client)?;
        Ok(Self {
            client,
            body_threshold,
        })
    }
}

impl Transport for HttpTransport {
    fn execute(&self, request: Request) -> Result<Response> {
        let headers = header_map(&request)?;
        let mut builder = self
            .client
            .request(request.method.clone(), &request.uri)
            .timeout(request.timeout)
            .headers(headers);
        match &request.body {
            BodySource::Empty => {}
            BodySource::Text(text) => builder = builder.body(text.clone()),
            BodySource::File(_) => builder = builder.body(Body::new(request.body.open()?)),
        }

        debug!("-> {} {}", request.method, request.uri);
        let start = Instant::now();
        let resp = builder.send().map_err(|source| Error::Http {
            uri: request.uri.clone(),
            source,
        })?;
        debug!("<- {} ({} ms)", resp.status(), start.elapsed().as_millis());

        let status = resp.status();
        let headers = resp.headers().clone();
        Ok(Response::new(
            status,
            headers,
            Box::new(resp),
            self.body_threshold,
        ))
    }
}

fn header_map(request: &Request) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, values) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("invalid header name: {name}")))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::InvalidRequest(format!("invalid header value for {name}")))?;
            map.append(name.clone(), value);
        }
    }
    if request.expect_continue && !map.contains_key(EXPECT) {
        map.insert(EXPECT, HeaderValue::from_static("100-continue"));
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(method: Method, uri: String) -> Request {
        Request {
            method,
            uri,
            headers: BTreeMap::new(),
            body: BodySource::Empty,
            timeout: Duration::from_secs(5),
            expect_continue: false,
        }
    }

    // ==================== header tests ====================

    #[test]
    fn test_header_map_multi_values_and_expect() {
        let mut req = request(Method::POST, "http://localhost/".to_string());
        req.headers.insert(
            "X-Tag".to_string(),
            vec!["a".to_string(), "b".to_string()],
        );
        req.expect_continue = true;
        let map = header_map(&req).unwrap();
        let tags: Vec<_> = map.get_all("x-tag").iter().collect();
        assert_eq!(tags.len(), 2);
        assert_eq!(map[EXPECT], "100-continue");
    }

    #[test]
    fn test_header_map_invalid_name() {
        let mut req = request(Method::GET, "http://localhost/".to_string());
        req.headers
            .insert("bad header".to_string(), vec!["x".to_string()]);
        assert!(matches!(header_map(&req), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_new_rejects_invalid_user_agent() {
        let err = HttpTransport::new("restree\nbroken", 1024).unwrap_err();
        assert!(matches!(err, Error::Client(_)));
        assert_eq!(err.to_string(), "failed to initialise the HTTP client");
    }

    // ==================== HTTP round trip tests ====================

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_get_with_query_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items/7"))
            .and(query_param("tag", "a"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"id\":7}"))
            .mount(&server)
            .await;

        let uri = format!("{}/items/7?tag=a", server.uri());
        let (status, body) = tokio::task::spawn_blocking(move || {
            let transport = HttpTransport::new("restree-test", 1024).unwrap();
            let mut req = request(Method::GET, uri);
            req.headers.insert(
                "Accept".to_string(),
                vec!["application/json".to_string()],
            );
            let mut resp = transport.execute(req).unwrap();
            let body = resp.body().unwrap().text().unwrap();
            (resp.status().as_u16(), body)
        })
        .await
        .unwrap();

        assert_eq!(status, 200);
        assert_eq!(body, "{\"id\":7}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_post_text_body_and_spill() {
        let server = MockServer::start().await;
        let large = "z".repeat(4096);
        Mock::given(method("POST"))
            .and(path("/upload"))
            .and(body_string("hello"))
            .respond_with(ResponseTemplate::new(201).set_body_string(large.clone()))
            .mount(&server)
            .await;

        let uri = format!("{}/upload", server.uri());
        let (status, spilled, body) = tokio::task::spawn_blocking(move || {
            let transport = HttpTransport::new("restree-test", 1024).unwrap();
            let mut req = request(Method::POST, uri);
            req.body = BodySource::Text("hello".to_string());
            let mut resp = transport.execute(req).unwrap();
            let provider = resp.body().unwrap();
            let spilled = provider.spill_path().is_some();
            let body = provider.text().unwrap();
            (resp.status().as_u16(), spilled, body)
        })
        .await
        .unwrap();

        assert_eq!(status, 201);
        assert!(spilled);
        assert_eq!(body, large);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_connection_refused() {
        let err = tokio::task::spawn_blocking(|| {
            let transport = HttpTransport::new("restree-test", 1024).unwrap();
            transport
                .execute(request(Method::GET, "http://127.0.0.1:9/".to_string()))
                .unwrap_err()
        })
        .await
        .unwrap();
        assert!(matches!(err, Error::Http { .. }));
    }
}
