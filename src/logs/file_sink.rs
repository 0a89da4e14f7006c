//! Rotating append-only log file writer + line parser (§4.2).
//!
//! No example repo in the retrieval pack does log-line rotation, so this is
//! authored fresh in the teacher's manual-parsing idiom — it favors
//! hand-written string splitting (see `extract_charge_point_id` in
//! `interfaces/ws/ocpp_server.rs`) over a regex dependency, so the parser
//! below is a hand-rolled tokenizer against the documented grammar rather
//! than a `regex` crate user.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::domain::log_entry::{Level, LogEntry};
use crate::support::InfraError;

/// A line longer than this (§4.2) is a hard parse error rather than a
/// silent skip.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Grammar: `[YYYY-MM-DD HH:MM:SS.mmm] [LEVEL] [OUT|ERR] <message>` (§6).
const TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Append-only file sink for one service's log, with size-based rotation.
pub struct LogFile {
    dir: PathBuf,
    service: String,
    rotation_bytes: u64,
    file: File,
    written: u64,
}

impl LogFile {
    /// Opens (creating if needed) `<dir>/<service>.log` for append.
    pub async fn open(dir: &Path, service: &str, rotation_bytes: u64) -> Result<Self, InfraError> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{service}.log"));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let written = file.seek(SeekFrom::End(0)).await?;
        Ok(Self {
            dir: dir.to_path_buf(),
            service: service.to_string(),
            rotation_bytes: rotation_bytes.max(1),
            file,
            written,
        })
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.service))
    }

    fn rotated_path(&self, generation: u8) -> PathBuf {
        self.dir.join(format!("{}.log.{generation}", self.service))
    }

    /// Formats and appends one entry, rotating first if the active file has
    /// reached `rotation_bytes`. Rotation is rename-then-reopen, which is
    /// atomic against readers walking `.log.2 -> .log.1 -> .log` (§4.2).
    pub async fn write(&mut self, entry: &LogEntry) -> Result<(), InfraError> {
        if self.written >= self.rotation_bytes {
            self.rotate().await?;
        }
        let line = format_line(entry);
        self.file.write_all(line.as_bytes()).await?;
        self.written += line.len() as u64;
        Ok(())
    }

    async fn rotate(&mut self) -> Result<(), InfraError> {
        self.file.flush().await?;

        let gen2 = self.rotated_path(2);
        let gen1 = self.rotated_path(1);
        let active = self.active_path();

        if gen1.exists() {
            // Discard any prior `.2`, then `.1 -> .2`.
            let _ = fs::remove_file(&gen2).await;
            fs::rename(&gen1, &gen2).await?;
        }
        if active.exists() {
            fs::rename(&active, &gen1).await?;
        }

        let new_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&active)
            .await?;
        self.file = new_file;
        self.written = 0;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), InfraError> {
        self.file.flush().await?;
        Ok(())
    }
}

fn format_line(entry: &LogEntry) -> String {
    let ts = entry.timestamp.format(TIMESTAMP_FMT);
    let stream = if entry.is_stderr { "ERR" } else { "OUT" };
    format!(
        "[{}] [{}] [{}] {}\n",
        ts,
        entry.level.as_file_token(),
        stream,
        entry.message
    )
}

#[derive(Debug)]
pub enum ParseError {
    LineTooLong(usize),
}

/// Recovers a `LogEntry` from one formatted line. Malformed lines are
/// skipped silently by returning `Ok(None)`; a line over `MAX_LINE_BYTES`
/// is a surfaced `ParseError` instead (§4.2).
pub fn parse_line(service: &str, line: &str) -> Result<Option<LogEntry>, ParseError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ParseError::LineTooLong(line.len()));
    }

    let Some(rest) = line.strip_prefix('[') else {
        return Ok(None);
    };
    let Some((ts_str, rest)) = rest.split_once("] [") else {
        return Ok(None);
    };
    let Some((level_str, rest)) = rest.split_once("] [") else {
        return Ok(None);
    };
    let Some((stream_str, message)) = rest.split_once("] ") else {
        return Ok(None);
    };

    let Ok(naive) = NaiveDateTime::parse_from_str(ts_str, TIMESTAMP_FMT) else {
        return Ok(None);
    };
    let timestamp: DateTime<Utc> = Utc.from_utc_datetime(&naive);

    let Some(level) = Level::from_file_token(level_str) else {
        return Ok(None);
    };

    let is_stderr = match stream_str {
        "OUT" => false,
        "ERR" => true,
        _ => return Ok(None),
    };

    Ok(Some(LogEntry {
        service: service.to_string(),
        timestamp,
        level,
        message: message.trim_end_matches(['\n', '\r']).to_string(),
        is_stderr,
    }))
}

/// Reads every entry for `service` across rotation generations, oldest
/// generation first (`.log.2`, `.log.1`, `.log`), preserving within-file
/// order (§4.2).
pub async fn read_all(dir: &Path, service: &str) -> Result<Vec<LogEntry>, InfraError> {
    let mut entries = Vec::new();
    for suffix in [".log.2", ".log.1", ".log"] {
        let path = dir.join(format!("{service}{suffix}"));
        if !path.exists() {
            continue;
        }
        let contents = fs::read_to_string(&path).await?;
        for line in contents.lines() {
            if let Ok(Some(entry)) = parse_line(service, line) {
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_format_and_parse() {
        let entry = LogEntry::new("api", "server listening on :3000", false);
        let formatted = format_line(&entry);
        let parsed = parse_line("api", formatted.trim_end()).unwrap().unwrap();
        assert_eq!(parsed.message, entry.message);
        assert_eq!(parsed.level, entry.level);
        assert_eq!(parsed.is_stderr, entry.is_stderr);
        assert_eq!(
            parsed.timestamp.timestamp_millis(),
            entry.timestamp.timestamp_millis()
        );
    }

    #[test]
    fn malformed_line_is_skipped_silently() {
        assert!(parse_line("api", "not a log line at all").unwrap().is_none());
        assert!(parse_line("api", "[2024-01-01 00:00:00.000] garbage")
            .unwrap()
            .is_none());
    }

    #[test]
    fn oversized_line_is_a_parse_error() {
        let huge = "x".repeat(MAX_LINE_BYTES + 1);
        assert!(matches!(parse_line("api", &huge), Err(ParseError::LineTooLong(_))));
    }

    #[test]
    fn line_just_under_one_mib_parses() {
        let msg = "x".repeat(64 * 1024 + 100);
        let entry = LogEntry::new("api", msg, false);
        let formatted = format_line(&entry);
        assert!(formatted.len() < MAX_LINE_BYTES);
        assert!(parse_line("api", formatted.trim_end()).unwrap().is_some());
    }

    #[tokio::test]
    async fn rotation_renames_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogFile::open(dir.path(), "svc", 50).await.unwrap();

        for i in 0..20 {
            log.write(&LogEntry::new("svc", format!("line {i}"), false))
                .await
                .unwrap();
        }
        log.flush().await.unwrap();

        assert!(dir.path().join("svc.log.1").exists());
        assert!(dir.path().join("svc.log").exists());

        let active_len = fs::metadata(dir.path().join("svc.log")).await.unwrap().len();
        assert!(active_len < 1024 * 1024);
    }

    #[tokio::test]
    async fn read_all_preserves_cross_generation_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = LogFile::open(dir.path(), "svc", 40).await.unwrap();
        for i in 0..30 {
            log.write(&LogEntry::new("svc", format!("line {i}"), false))
                .await
                .unwrap();
        }
        log.flush().await.unwrap();

        let all = read_all(dir.path(), "svc").await.unwrap();
        let messages: Vec<&str> = all.iter().map(|e| e.message.as_str()).collect();
        let mut sorted = messages.clone();
        sorted.sort_by_key(|m| m[5..].parse::<u32>().unwrap_or(0));
        assert_eq!(messages, sorted);
    }
}
