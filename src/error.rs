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

//! [tracing-endpoints](crate) errors

use backtrace::Backtrace;

use std::path::PathBuf;

/// [tracing-endpoints](crate) error type
///
/// [tracing-endpoints](crate) eschews libraries like [thiserror], [anyhow] & [Snafu] in favor of
/// a straightforward enumeration with a few match arms chosen on the basis what the caller will
/// need to respond.
///
/// Only endpoint _construction_ returns these; once an endpoint exists, failures are reported on
/// the [diagnostic](crate::diagnostics) channel and never reach the logging call site.
///
/// [thiserror]: https://docs.rs/thiserror
/// [anyhow]: https://docs.rs/anyhow
/// [Snafu]: https://docs.rs/snafu/latest/snafu
#[non_exhaustive]
pub enum Error {
    /// The base path for a file endpoint has no file name (or no parent directory)
    BadPath { path: PathBuf, back: Backtrace },
    /// Filesystem error on `path`
    Io {
        path: PathBuf,
        source: std::io::Error,
        back: Backtrace,
    },
    /// An entry formatter failed to render an [`Entry`](crate::entry::Entry)
    Format {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
    /// General transport layer error (building the HTTP client, for instance)
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
        back: Backtrace,
    },
    /// The target URL, method or a header couldn't be parsed
    BadRequest { what: String, back: Backtrace },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Error {
        Error::Io {
            path: path.into(),
            source,
            back: Backtrace::new(),
        }
    }
}

impl std::fmt::Display for Error {
    // `Error` is non-exhaustive so that adding variants won't be a breaking change to our
    // callers. That means the compiler won't catch us if we miss a variant here, so we
    // always include a `_` arm.
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadPath { path, .. } => write!(
                f,
                "{} can't be used as the base path of a log file",
                path.display()
            ),
            Error::Io { path, source, .. } => {
                write!(f, "While working on {}, got {}", path.display(), source)
            }
            Error::Format { source, .. } => write!(f, "While formatting an entry, got {}", source),
            Error::Transport { source, .. } => write!(f, "Transport error: {}", source),
            Error::BadRequest { what, .. } => write!(f, "Bad request: {}", what),
            _ => write!(f, "Other tracing-endpoints error"),
        }
    }
}

impl std::fmt::Debug for Error {
    #[allow(unreachable_patterns)]
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::BadPath { path: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Io { back, .. } => write!(f, "{}\n{:#?}", self, back),
            Error::Format { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::Transport { source: _, back } => write!(f, "{}\n{:#?}", self, back),
            Error::BadRequest { what: _, back } => write!(f, "{}\n{:#?}", self, back),
            err => write!(f, "tracing-endpoints error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::Format { source, .. } => Some(source.as_ref()),
            Error::Transport { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
