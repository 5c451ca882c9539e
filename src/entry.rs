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

//! Log entries.
//!
//! An [`Entry`] is everything known about one logging call: the message & its side-table of
//! key/value pairs, the severity, when & where it happened, which thread made it, and a handful of
//! facts about the process that don't change over its lifetime ([`ProcessInfo`]). The
//! [`Logger`](crate::logger::Logger) builds exactly one per call & lends it, read-only, to every
//! endpoint that will render it.

use crate::byte_utils::string_from_os_str;

use chrono::prelude::*;
use serde::{Serialize, Serializer};
use serde_json::Value;

use std::{collections::BTreeMap, sync::OnceLock};

/// Where in the source a logging call was made.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CallSite {
    /// The enclosing function, or the closest thing available (a module path, or the `tracing`
    /// target)
    pub function: String,
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// The thread that made a logging call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ThreadInfo {
    pub thread_id: String,
    pub thread_name: Option<String>,
    pub is_main_thread: bool,
}

impl ThreadInfo {
    /// Describe the calling thread.
    pub fn current() -> ThreadInfo {
        let thread = std::thread::current();
        // `ThreadId` offers nothing but `Debug` on stable, which renders as "ThreadId(N)".
        let id = format!("{:?}", thread.id());
        let thread_id = id
            .strip_prefix("ThreadId(")
            .and_then(|s| s.strip_suffix(')'))
            .map(str::to_owned)
            .unwrap_or(id);
        ThreadInfo {
            thread_id,
            thread_name: thread.name().map(str::to_owned),
            is_main_thread: thread.name() == Some("main"),
        }
    }
}

/// Facts about this process & host that are attached to every entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub os_version: String,
    pub device_model: String,
    pub bundle_id: String,
    pub library_version: String,
}

impl ProcessInfo {
    /// The facts for this process, computed on first use.
    pub fn get() -> &'static ProcessInfo {
        static INFO: OnceLock<ProcessInfo> = OnceLock::new();
        INFO.get_or_init(ProcessInfo::discover)
    }

    fn discover() -> ProcessInfo {
        ProcessInfo {
            os_version: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            device_model: device_name(),
            bundle_id: bundle_id(),
            library_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// Try the host name, then a local IP address, and finally give up with "-".
fn device_name() -> String {
    hostname::get()
        .map(string_from_os_str)
        .ok()
        .filter(|name| !name.is_empty())
        .or_else(|| local_ip_address::local_ip().ok().map(|ip| ip.to_string()))
        .unwrap_or_else(|| "-".to_owned())
}

/// The name of the running executable, or "-".
fn bundle_id() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|pbuf| pbuf.file_name().map(|s| string_from_os_str(s.to_os_string())))
        .unwrap_or_else(|| "-".to_owned())
}

fn serialize_level<S: Serializer>(level: &tracing::Level, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(level)
}

/// One logging call, fully populated & immutable once shared.
///
/// Serializes to a flat JSON object: every field below, plus the fields of [`CallSite`],
/// [`ThreadInfo`] & [`ProcessInfo`] at the same level, with `user_info` as a nested object.
#[derive(Clone, Debug, Serialize)]
pub struct Entry {
    message: String,
    user_info: BTreeMap<String, Value>,
    #[serde(serialize_with = "serialize_level")]
    level: tracing::Level,
    /// Seconds since the Unix epoch
    timestamp: f64,
    /// `timestamp`, pre-rendered by the logger's date formatter
    date: String,
    #[serde(flatten)]
    call_site: CallSite,
    #[serde(flatten)]
    thread: ThreadInfo,
    #[serde(flatten)]
    process: ProcessInfo,
    #[serde(skip)]
    time: DateTime<Utc>,
}

impl Entry {
    /// A new entry made on the calling thread at `time`. `date` is `time` rendered for humans.
    pub fn new(
        level: tracing::Level,
        message: impl Into<String>,
        time: DateTime<Utc>,
        date: impl Into<String>,
    ) -> Entry {
        Entry {
            message: message.into(),
            user_info: BTreeMap::new(),
            level,
            timestamp: time.timestamp() as f64 + time.timestamp_subsec_nanos() as f64 / 1e9,
            date: date.into(),
            call_site: CallSite::default(),
            thread: ThreadInfo::current(),
            process: ProcessInfo::get().clone(),
            time,
        }
    }
    pub fn with_call_site(mut self, call_site: CallSite) -> Entry {
        self.call_site = call_site;
        self
    }
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Entry {
        self.user_info.insert(key.into(), value.into());
        self
    }
    pub fn with_fields(mut self, fields: BTreeMap<String, Value>) -> Entry {
        self.user_info.extend(fields);
        self
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    pub fn user_info(&self) -> &BTreeMap<String, Value> {
        &self.user_info
    }
    pub fn level(&self) -> tracing::Level {
        self.level
    }
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }
    pub fn date(&self) -> &str {
        &self.date
    }
    pub fn call_site(&self) -> &CallSite {
        &self.call_site
    }
    pub fn thread(&self) -> &ThreadInfo {
        &self.thread
    }
    pub fn process(&self) -> &ProcessInfo {
        &self.process
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn flat_json() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        let e = Entry::new(tracing::Level::WARN, "disk nearly full", t, "2024-03-01")
            .with_call_site(CallSite {
                function: "app::disk".to_owned(),
                file: "src/disk.rs".to_owned(),
                line: Some(42),
                column: None,
            })
            .with_field("free", 12)
            .with_field("volume", "/var");

        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["message"], "disk nearly full");
        assert_eq!(v["level"], "WARN");
        assert_eq!(v["timestamp"], 1709294400.25);
        assert_eq!(v["date"], "2024-03-01");
        assert_eq!(v["function"], "app::disk");
        assert_eq!(v["line"], 42);
        assert_eq!(v["column"], Value::Null);
        assert_eq!(v["user_info"]["free"], 12);
        assert_eq!(v["user_info"]["volume"], "/var");
        assert_eq!(v["library_version"], env!("CARGO_PKG_VERSION"));
        assert!(v["thread_id"].is_string());
        assert!(v["is_main_thread"].is_boolean());
        assert!(v.get("time").is_none());
    }

    #[test]
    fn thread_info() {
        let info = std::thread::Builder::new()
            .name("worker".to_owned())
            .spawn(ThreadInfo::current)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(info.thread_name.as_deref(), Some("worker"));
        assert!(!info.is_main_thread);
        assert!(info.thread_id.chars().all(|c| c.is_ascii_digit()));
    }
}
