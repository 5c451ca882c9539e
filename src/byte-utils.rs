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

/// Produce a [`String`] from an [`OsString`], replacing anything that isn't UTF-8.
///
/// [`OsString`]: std::ffi::OsString
#[cfg(unix)]
pub fn string_from_os_str(s: std::ffi::OsString) -> String {
    use std::os::unix::ffi::OsStringExt;
    match String::from_utf8(s.into_vec()) {
        Ok(s) => s,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    }
}

#[cfg(not(unix))]
pub fn string_from_os_str(s: std::ffi::OsString) -> String {
    s.to_string_lossy().into_owned()
}

/// Produce a NUL-terminated byte string from a [`Path`], for handing to libc.
///
/// [`Path`]: std::path::Path
#[cfg(unix)]
pub fn c_path(p: &std::path::Path) -> Option<std::ffi::CString> {
    use std::os::unix::ffi::OsStrExt;
    std::ffi::CString::new(p.as_os_str().as_bytes()).ok()
}
