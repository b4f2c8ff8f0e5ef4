//! Route handlers

pub mod api_keys;
pub mod auth;
pub mod computers;
pub mod health;
pub mod templates;
pub mod users;
pub mod webhook;

use uuid::Uuid;

use crate::error::ApiError;

/// Path ids that are not UUIDs cannot name anything.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| hangar_core::Error::not_found(format!("{} {} not found", what, raw)).into())
}

#[cfg(test)]
pub(crate) mod test_util {
    use axum::{
        body::{to_bytes, Body},
        http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    /// Request builder so tests read as method, path, credentials, body.
    pub struct TestRequest {
        method: Method,
        uri: String,
        body: Option<Value>,
        headers: Vec<(HeaderName, HeaderValue)>,
    }

    impl TestRequest {
        pub fn new(method: Method, uri: &str) -> Self {
            Self {
                method,
                uri: uri.to_string(),
                body: None,
                headers: Vec::new(),
            }
        }

        pub fn json(mut self, body: Value) -> Self {
            self.body = Some(body);
            self
        }

        pub fn header(mut self, name: HeaderName, value: &str) -> Self {
            self.headers.push((name, HeaderValue::from_str(value).unwrap()));
            self
        }

        pub fn cookie(mut self, cookie: &HeaderValue) -> Self {
            self.headers.push((header::COOKIE, cookie.clone()));
            self
        }

        pub fn bearer(self, token: &str) -> Self {
            self.header(header::AUTHORIZATION, &format!("Bearer {}", token))
        }

        pub fn build(self) -> Request<Body> {
            let mut builder = Request::builder().method(self.method).uri(self.uri);
            for (name, value) in self.headers {
                builder = builder.header(name, value);
            }
            match self.body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            }
        }
    }

    /// Send one request and decode the JSON body (`Null` when empty).
    pub async fn send(router: &Router, request: TestRequest) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request.build()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }
}
