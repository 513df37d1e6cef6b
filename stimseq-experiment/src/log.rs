use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use stimseq_core::{Nerve, TriggerCode};

pub const LOG_HEADER: &str = "timestamp, block, ISI, nerve, trigger";

/// One emitted block event.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LogRecord {
    /// Seconds since session start, monotonic clock.
    pub timestamp: f64,
    /// 1-based block index.
    pub block: usize,
    #[serde(rename = "ISI")]
    pub isi: f64,
    #[serde(deserialize_with = "nerve_from_label")]
    pub nerve: Nerve,
    pub trigger: TriggerCode,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}",
            self.timestamp,
            self.block,
            self.isi,
            self.nerve.label(),
            self.trigger
        )
    }
}

/// Reads back a log written by [`EventLog`], header included.
pub fn read_log<R: Read>(reader: R) -> Result<Vec<LogRecord>, csv::Error> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .deserialize()
        .collect()
}

fn nerve_from_label<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Nerve, D::Error> {
    let label = String::deserialize(deserializer)?;
    [Nerve::Tibial, Nerve::Median, Nerve::None]
        .into_iter()
        .find(|nerve| nerve.label() == label)
        .ok_or_else(|| de::Error::custom(format!("unknown nerve label `{label}`")))
}

/// Append-only session log. Every record is flushed before `append` returns,
/// so an abrupt exit loses at most the event in flight.
#[derive(Debug)]
pub struct EventLog<W: Write> {
    out: W,
    records: usize,
}

impl EventLog<File> {
    /// Creates (truncating) the log file and its parent directories.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::new(file)
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(mut out: W) -> io::Result<Self> {
        writeln!(out, "{LOG_HEADER}")?;
        out.flush()?;
        Ok(Self { out, records: 0 })
    }

    pub fn append(&mut self, record: &LogRecord) -> io::Result<()> {
        writeln!(self.out, "{record}")?;
        self.out.flush()?;
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn records(&self) -> usize {
        self.records
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }
}

impl<W: Write> Drop for EventLog<W> {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LogRecord {
        LogRecord {
            timestamp: 12.000_123_456,
            block: 3,
            isi: 0.65,
            nerve: Nerve::Tibial,
            trigger: 10,
        }
    }

    #[test]
    fn rows_follow_the_header_format() {
        let mut log = EventLog::new(Vec::new()).unwrap();
        log.append(&record()).unwrap();
        log.append(&LogRecord {
            nerve: Nerve::None,
            isi: 1.0,
            ..record()
        })
        .unwrap();
        let text = String::from_utf8(log.get_ref().clone()).unwrap();
        assert_eq!(
            text,
            "timestamp, block, ISI, nerve, trigger\n\
             12.000123456, 3, 0.65, tibial, 10\n\
             12.000123456, 3, 1, None, 10\n"
        );
        assert_eq!(log.records(), 2);
    }

    #[test]
    fn rows_read_back() {
        let mut log = EventLog::new(Vec::new()).unwrap();
        let none = LogRecord {
            nerve: Nerve::None,
            trigger: 30,
            ..record()
        };
        log.append(&record()).unwrap();
        log.append(&none).unwrap();
        assert_eq!(read_log(log.get_ref().as_slice()).unwrap(), vec![record(), none]);

        assert!(read_log(format!("{LOG_HEADER}\n").as_bytes()).unwrap().is_empty());
        let bad = format!("{LOG_HEADER}\n1.0, 1, 0.5, ulnar, 3\n");
        assert!(read_log(bad.as_bytes()).is_err());
    }

    #[test]
    fn create_truncates_and_makes_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("007").join("logfile_007.csv");
        {
            let mut log = EventLog::create(&path).unwrap();
            log.append(&record()).unwrap();
        }
        {
            let _log = EventLog::create(&path).unwrap();
        }
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("{LOG_HEADER}\n"));
    }

    #[test]
    fn rows_are_on_disk_before_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut log = EventLog::create(&path).unwrap();
        log.append(&record()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        drop(log);
    }
}
