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

//! Rotation policies.
//!
//! There is one rotation engine ([`FileEndpoint`](crate::file::FileEndpoint)); what varies between
//! a size-bounded set of files, a single append-only file & one file per day is captured by a
//! [`RotationPolicy`]: which file names are in play, which one follows which, and whether it's
//! time to move on. Policies do no I/O (beyond [`recover`]'s probe), so they can be tested on
//! their own.

use crate::log_file::FileStatus;

use chrono::prelude::*;

use std::{path::Path, time::SystemTime};

/// A position in a rotation: the N-th file of a fixed set, or the file for a given (UTC) day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Slot {
    Index(usize),
    Date(NaiveDate),
}

/// What distinguishes one flavor of file endpoint from another.
pub trait RotationPolicy: Send + Sync + 'static {
    /// Name of the endpoint flavor this policy implements (recorded on the files it creates)
    fn kind(&self) -> &'static str;
    /// Every slot that might hold the current file, in order of preference; never empty.
    fn candidates(&self, today: NaiveDate) -> Vec<Slot>;
    /// The file name for `slot`, given the endpoint's base file name
    fn file_name(&self, base: &str, slot: &Slot) -> String;
    /// The slot that follows `current`, or `None` if rotating would leave us where we are
    fn next(&self, current: &Slot, today: NaiveDate) -> Option<Slot>;
    /// Whether the current file must be rotated before `incoming` more bytes are written to it.
    /// `status` is `None` if the current file's size & modification time couldn't be determined.
    fn should_rotate(&self, status: Option<&FileStatus>, incoming: u64, today: NaiveDate) -> bool;
    /// Whether this policy ever retires files; if not, rotation never scans the directory.
    fn retires_files(&self) -> bool {
        false
    }
    /// Whether the file named `file_name` has aged out of the rotation & should be removed
    fn is_retired(&self, _base: &str, _file_name: &str, _today: NaiveDate) -> bool {
        false
    }
}

fn digits(mut n: usize) -> usize {
    let mut d = 1;
    while n >= 10 {
        n /= 10;
        d += 1;
    }
    d
}

/// A fixed ring of `number_of_files` files, moving on when the next write would take the current
/// file over `max_file_size` bytes.
///
/// Files are named by prefixing a zero-padded index to the base name (`0_app.log`, `1_app.log`,
/// ... or `00_app.log` ... `11_app.log` for twelve files).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizePolicy {
    number_of_files: usize,
    max_file_size: Option<u64>,
}

impl SizePolicy {
    /// `max_file_size` is in bytes; `None` means never rotate on account of size. A ring of zero
    /// files is taken to mean one.
    pub fn new(number_of_files: usize, max_file_size: Option<u64>) -> SizePolicy {
        SizePolicy {
            number_of_files: number_of_files.max(1),
            max_file_size,
        }
    }
    pub fn number_of_files(&self) -> usize {
        self.number_of_files
    }
    pub fn max_file_size(&self) -> Option<u64> {
        self.max_file_size
    }
}

impl RotationPolicy for SizePolicy {
    fn kind(&self) -> &'static str {
        "RotatingFileEndpoint"
    }
    fn candidates(&self, _today: NaiveDate) -> Vec<Slot> {
        (0..self.number_of_files).map(Slot::Index).collect()
    }
    fn file_name(&self, base: &str, slot: &Slot) -> String {
        match slot {
            Slot::Index(i) => format!(
                "{:0width$}_{}",
                i,
                base,
                width = digits(self.number_of_files)
            ),
            Slot::Date(d) => format!("{}_{}", d.format("%Y-%m-%d"), base),
        }
    }
    fn next(&self, current: &Slot, _today: NaiveDate) -> Option<Slot> {
        match current {
            Slot::Index(i) => Some(Slot::Index((i + 1) % self.number_of_files)),
            Slot::Date(_) => Some(Slot::Index(0)),
        }
    }
    fn should_rotate(
        &self,
        status: Option<&FileStatus>,
        incoming: u64,
        _today: NaiveDate,
    ) -> bool {
        match (self.max_file_size, status) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(max), Some(status)) => status.size + incoming > max,
        }
    }
}

/// One file, appended to forever; never rotates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinglePolicy;

impl RotationPolicy for SinglePolicy {
    fn kind(&self) -> &'static str {
        "SingleFileEndpoint"
    }
    fn candidates(&self, _today: NaiveDate) -> Vec<Slot> {
        vec![Slot::Index(0)]
    }
    fn file_name(&self, base: &str, _slot: &Slot) -> String {
        base.to_owned()
    }
    fn next(&self, _current: &Slot, _today: NaiveDate) -> Option<Slot> {
        None
    }
    fn should_rotate(
        &self,
        _status: Option<&FileStatus>,
        _incoming: u64,
        _today: NaiveDate,
    ) -> bool {
        false
    }
}

/// One file per UTC calendar day, named by prefixing the date to the base name
/// (`2024-03-01_app.log`). Size is ignored.
///
/// With `retain` set, only that many days' files are kept: older ones are removed as the
/// endpoint rotates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DatedPolicy {
    retain: Option<usize>,
}

impl DatedPolicy {
    pub fn new(retain: Option<usize>) -> DatedPolicy {
        DatedPolicy {
            retain: retain.map(|n| n.max(1)),
        }
    }
    fn parse_date(base: &str, file_name: &str) -> Option<NaiveDate> {
        let prefix = file_name.strip_suffix(base)?.strip_suffix('_')?;
        NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
    }
}

impl RotationPolicy for DatedPolicy {
    fn kind(&self) -> &'static str {
        "DatedFileEndpoint"
    }
    fn candidates(&self, today: NaiveDate) -> Vec<Slot> {
        // Walk back over the retained days; without a limit, only today's file is a candidate.
        (0..self.retain.unwrap_or(1) as i64)
            .filter_map(|n| today.checked_sub_signed(chrono::Duration::days(n)))
            .map(Slot::Date)
            .collect()
    }
    fn file_name(&self, base: &str, slot: &Slot) -> String {
        match slot {
            Slot::Date(d) => format!("{}_{}", d.format("%Y-%m-%d"), base),
            Slot::Index(i) => format!("{}_{}", i, base),
        }
    }
    fn next(&self, current: &Slot, today: NaiveDate) -> Option<Slot> {
        if *current == Slot::Date(today) {
            None
        } else {
            Some(Slot::Date(today))
        }
    }
    fn should_rotate(
        &self,
        status: Option<&FileStatus>,
        _incoming: u64,
        today: NaiveDate,
    ) -> bool {
        status
            .and_then(|status| status.modified)
            .map_or(true, |modified| modified.date_naive() != today)
    }
    fn retires_files(&self) -> bool {
        self.retain.is_some()
    }
    fn is_retired(&self, base: &str, file_name: &str, today: NaiveDate) -> bool {
        match (self.retain, DatedPolicy::parse_date(base, file_name)) {
            (Some(n), Some(date)) => (today - date).num_days() >= n as i64,
            _ => false,
        }
    }
}

/// Work out which slot was current when the endpoint last ran.
///
/// Every candidate file that exists is examined; the most recently modified wins. If none exist,
/// or if the newest modification time is shared by more than one file, the first candidate wins.
pub fn recover(policy: &dyn RotationPolicy, dir: &Path, base: &str, today: NaiveDate) -> Slot {
    let candidates = policy.candidates(today);
    let mut newest: Option<(SystemTime, Slot)> = None;
    let mut tied = false;
    for slot in &candidates {
        let path = dir.join(policy.file_name(base, slot));
        let modified = match std::fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        let newer = match &newest {
            None => true,
            Some((t, _)) => {
                tied |= modified == *t;
                modified > *t
            }
        };
        if newer {
            newest = Some((modified, *slot));
            tied = false;
        }
    }
    match newest {
        Some((_, slot)) if !tied => slot,
        _ => candidates[0],
    }
}

#[cfg(test)]
mod test {

    use super::*;

    use std::time::Duration;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn status(size: u64, modified: Option<DateTime<Utc>>) -> FileStatus {
        FileStatus { size, modified }
    }

    #[test]
    fn size_names_and_ring() {
        let p = SizePolicy::new(5, Some(100));
        assert_eq!(p.file_name("app.log", &Slot::Index(3)), "3_app.log");
        let p12 = SizePolicy::new(12, None);
        assert_eq!(p12.file_name("app.log", &Slot::Index(3)), "03_app.log");
        assert_eq!(p12.file_name("app.log", &Slot::Index(11)), "11_app.log");

        let mut slot = Slot::Index(0);
        let mut seen = vec![slot];
        for _ in 0..5 {
            slot = p.next(&slot, today()).unwrap();
            seen.push(slot);
        }
        assert_eq!(seen.first(), seen.last());
        assert_eq!(seen[1..].len(), 5);
        assert_eq!(p.candidates(today()).len(), 5);
        // The ring reuses its files; nothing is ever removed.
        assert!(!p.retires_files());
    }

    #[test]
    fn size_predicate() {
        let p = SizePolicy::new(2, Some(100));
        assert!(!p.should_rotate(Some(&status(0, None)), 100, today()));
        assert!(!p.should_rotate(Some(&status(50, None)), 50, today()));
        assert!(p.should_rotate(Some(&status(50, None)), 51, today()));
        // Can't tell? Rotate.
        assert!(p.should_rotate(None, 1, today()));
        // No limit, never rotate.
        let unbounded = SizePolicy::new(2, None);
        assert!(!unbounded.should_rotate(Some(&status(u64::MAX / 2, None)), 1, today()));
        assert!(!unbounded.should_rotate(None, 1, today()));
    }

    #[test]
    fn single_never_moves() {
        let p = SinglePolicy;
        assert_eq!(p.file_name("app.log", &Slot::Index(0)), "app.log");
        assert!(p.next(&Slot::Index(0), today()).is_none());
        assert!(!p.should_rotate(None, u64::MAX, today()));
        assert!(!p.retires_files());
    }

    #[test]
    fn dated_policy() {
        let p = DatedPolicy::new(Some(3));
        let t = today();
        assert_eq!(p.file_name("app.log", &Slot::Date(t)), "2024-03-01_app.log");
        assert_eq!(
            p.candidates(t),
            vec![
                Slot::Date(t),
                Slot::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
                Slot::Date(NaiveDate::from_ymd_opt(2024, 2, 28).unwrap()),
            ]
        );
        assert!(p.next(&Slot::Date(t), t).is_none());
        let yesterday = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(p.next(&Slot::Date(yesterday), t), Some(Slot::Date(t)));

        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let last_night = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap();
        assert!(!p.should_rotate(Some(&status(1 << 40, Some(noon))), 1 << 40, t));
        assert!(p.should_rotate(Some(&status(0, Some(last_night))), 1, t));
        assert!(p.should_rotate(Some(&status(0, None)), 1, t));
        assert!(p.should_rotate(None, 1, t));

        assert!(!p.is_retired("app.log", "2024-02-28_app.log", t));
        assert!(p.is_retired("app.log", "2024-02-27_app.log", t));
        assert!(!p.is_retired("app.log", "2024-02-27_other.log", t));
        assert!(!p.is_retired("app.log", "notes.txt", t));
        assert!(!DatedPolicy::new(None).is_retired("app.log", "1999-01-01_app.log", t));
        assert!(p.retires_files());
        assert!(!DatedPolicy::new(None).retires_files());
    }

    fn touch(path: &Path, age: Duration) {
        let f = std::fs::File::create(path).unwrap();
        f.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn recover_picks_newest() {
        let dir = tempfile::tempdir().unwrap();
        let p = SizePolicy::new(5, Some(1024));
        touch(&dir.path().join("0_app.log"), Duration::from_secs(300));
        touch(&dir.path().join("1_app.log"), Duration::from_secs(200));
        touch(&dir.path().join("2_app.log"), Duration::from_secs(100));
        touch(&dir.path().join("3_app.log"), Duration::from_secs(400));
        assert_eq!(recover(&p, dir.path(), "app.log", today()), Slot::Index(2));
    }

    #[test]
    fn recover_defaults_to_first() {
        let dir = tempfile::tempdir().unwrap();
        let p = SizePolicy::new(3, Some(1024));
        assert_eq!(recover(&p, dir.path(), "app.log", today()), Slot::Index(0));

        let t = SystemTime::now() - Duration::from_secs(60);
        for name in ["1_app.log", "2_app.log"] {
            let f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.set_modified(t).unwrap();
        }
        assert_eq!(recover(&p, dir.path(), "app.log", today()), Slot::Index(0));
    }
}
