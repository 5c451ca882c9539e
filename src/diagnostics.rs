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

//! The diagnostic channel.
//!
//! Endpoints never return errors to the code doing the logging. When something goes wrong after
//! construction (a rotation that couldn't open its next file, an upload that failed, a corrupt
//! line in an outbox) the endpoint says so here: an ordinary [`tracing`] event with target
//! [`TARGET`].
//!
//! [`tracing`]: https://docs.rs/tracing/latest/tracing/index.html
//!
//! [`Logger`](crate::logger::Logger) drops events carrying this target, so an endpoint that is
//! failing can't be handed its own complaints. Hosts that want to see them can install any other
//! subscriber layer (a `fmt` layer filtered on the target, say).

/// Target used for every diagnostic event this crate emits
pub const TARGET: &str = "tracing_endpoints::diagnostics";

/// True if `target` names the diagnostic channel
pub fn is_diagnostic(target: &str) -> bool {
    target == TARGET
}
