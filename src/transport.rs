// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of tracing-endpoints.
//
// tracing-endpoints is free software: you can redistribute it and/or modify it under the terms of
// the GNU General Public License as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// tracing-endpoints is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See
// the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with tracing-endpoints.
// If not, see <http://www.gnu.org/licenses/>.

//! The network transport layer.
//!
//! This module defines the [`Transport`] trait through which the HTTP endpoint uploads entries, as
//! well as the production implementation, [`HttpTransport`]. Uploads are fire-and-forget: the
//! transport calls back with an [`Outcome`] once the upload resolves, on whatever thread it likes.
//!
//! # Examples
//!
//! To POST to a collector on localhost:
//!
//! ```rust
//! use tracing_endpoints::transport::{HttpTransport, Request};
//! let request = Request::new("http://localhost:8080/logs", "POST").unwrap();
//! let transpo = HttpTransport::new().unwrap();
//! ```
//!
//! URLs are checked up front:
//!
//! ```rust
//! use tracing_endpoints::transport::Request;
//! assert!(Request::new("not a url", "POST").is_err());
//! ```

use crate::{
    diagnostics,
    error::{Error, Result},
};

use backtrace::Backtrace;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method, Url,
};

use std::time::Duration;

/// Everything about an upload except its body
#[derive(Clone, Debug)]
pub struct Request {
    url: Url,
    method: Method,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl Request {
    /// Build a request for `method` (`"POST"`, `"PUT"`, ...) against `url`.
    pub fn new(url: &str, method: &str) -> Result<Request> {
        let url = Url::parse(url).map_err(|err| Error::BadRequest {
            what: format!("{}: {}", url, err),
            back: Backtrace::new(),
        })?;
        let method = Method::from_bytes(method.as_bytes()).map_err(|err| Error::BadRequest {
            what: format!("{}: {}", method, err),
            back: Backtrace::new(),
        })?;
        Ok(Request {
            url,
            method,
            headers: HeaderMap::new(),
            timeout: None,
        })
    }
    /// Set header `name` to `value`, replacing any previous value.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Request> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| Error::BadRequest {
            what: format!("{}: {}", name, err),
            back: Backtrace::new(),
        })?;
        let value = HeaderValue::from_str(value).map_err(|err| Error::BadRequest {
            what: format!("{}: {}", value, err),
            back: Backtrace::new(),
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Request {
        self.timeout = Some(timeout);
        self
    }
    pub fn url(&self) -> &Url {
        &self.url
    }
    pub fn method(&self) -> &Method {
        &self.method
    }
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// How an upload resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The server answered with this status
    Status(u16),
    /// No answer: connection refused, timed out &c
    Failed(String),
}

/// Called exactly once per upload, from any thread
pub type Completion = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Operations all transport layers must support.
pub trait Transport: Send + Sync {
    /// Start uploading `body` per `request`; call `done` when the upload resolves.
    ///
    /// Implementations must not block on the network, and must not call `done` more than once.
    /// If an upload can't even be started, `done` may simply be dropped: the caller's lease
    /// on the entry will lapse & it will be tried again.
    fn send(&self, request: &Request, body: Vec<u8>, done: Completion);
}

/// Uploading via HTTP(S), one thread per upload.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Construct a [`Transport`] implementation with reqwest's default settings.
    ///
    /// Like any blocking reqwest client, this mustn't be called from within an async runtime.
    pub fn new() -> Result<HttpTransport> {
        HttpTransport::with_client(reqwest::blocking::Client::builder())
    }
    /// Construct a [`Transport`] implementation from a customized client builder.
    pub fn with_client(builder: reqwest::blocking::ClientBuilder) -> Result<HttpTransport> {
        let client = builder.build().map_err(|err| Error::Transport {
            source: Box::new(err),
            back: Backtrace::new(),
        })?;
        Ok(HttpTransport { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request, body: Vec<u8>, done: Completion) {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .body(body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        let res = std::thread::Builder::new()
            .name("http-upload".to_owned())
            .spawn(move || {
                let outcome = match builder.send() {
                    Ok(rsp) => Outcome::Status(rsp.status().as_u16()),
                    Err(err) => Outcome::Failed(err.to_string()),
                };
                done(outcome);
            });
        if let Err(err) = res {
            tracing::warn!(
                target: diagnostics::TARGET,
                "couldn't start an upload to {}: {}",
                request.url,
                err
            );
        }
    }
}
