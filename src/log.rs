use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use time::{macros::format_description, OffsetDateTime};

const LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

#[derive(Debug)]
pub struct Logger {
    entries: Vec<LogEntry>,
    path: Option<PathBuf>,
}

impl Logger {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            path,
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if let Some(path) = &self.path {
            let _ = append_log_file(path, level, &message);
        }

        self.entries.push(LogEntry { level, message });
        if self.entries.len() > LOG_CAPACITY {
            let overflow = self.entries.len() - LOG_CAPACITY;
            self.entries.drain(0..overflow);
        }
    }
}

fn append_log_file(path: &Path, level: LogLevel, message: &str) -> std::io::Result<()> {
    let label = level.label();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{} [{label}] {message}", timestamp())
}

fn timestamp() -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_is_bounded() {
        let mut logger = Logger::new(None);
        for i in 0..(LOG_CAPACITY + 15) {
            logger.info(format!("line {i}"));
        }
        assert_eq!(logger.entries().len(), LOG_CAPACITY);
        assert_eq!(logger.entries()[0].message, "line 15");
    }

    #[test]
    fn entries_are_appended_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aulgk.log");
        let mut logger = Logger::new(Some(path.clone()));
        logger.info("first");
        logger.error("second");

        let raw = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[INFO] first"));
        assert!(lines[1].ends_with("[ERROR] second"));
    }
}
