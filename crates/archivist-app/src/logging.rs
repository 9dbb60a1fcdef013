use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "archivist-";
pub const LOG_FILE_SUFFIX: &str = ".log";
pub const LOG_RETENTION_DAYS: u64 = 30;

fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

/// Log to daily files under `log_dir`. Used when a host supervisor owns the process.
pub fn init_file_logging(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    remove_expired_logs(log_dir, Utc::now().date_naive(), LOG_RETENTION_DAYS)?;

    let writer = DailyLogWriter::open(log_dir.to_path_buf())?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(writer)
        .init();
    Ok(())
}

pub fn init_console_logging() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

struct OpenDay {
    day: NaiveDate,
    file: File,
}

/// Appends to `archivist-YYYY-MM-DD.log`, switching files at UTC midnight.
#[derive(Clone)]
struct DailyLogWriter {
    log_dir: PathBuf,
    current: Arc<Mutex<OpenDay>>,
}

impl DailyLogWriter {
    fn open(log_dir: PathBuf) -> Result<Self> {
        let day = Utc::now().date_naive();
        let file = append_to(&log_path(&log_dir, day))
            .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;
        Ok(Self {
            log_dir,
            current: Arc::new(Mutex::new(OpenDay { day, file })),
        })
    }

    fn write_at(&self, now: DateTime<Utc>, buf: &[u8]) -> io::Result<usize> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        let today = now.date_naive();
        if current.day != today {
            current.file.flush()?;
            current.file = append_to(&log_path(&self.log_dir, today))?;
            current.day = today;
            let _ = remove_expired_logs(&self.log_dir, today, LOG_RETENTION_DAYS);
        }
        current.file.write(buf)
    }
}

impl<'a> MakeWriter<'a> for DailyLogWriter {
    type Writer = DailyLogHandle;

    fn make_writer(&'a self) -> Self::Writer {
        DailyLogHandle(self.clone())
    }
}

struct DailyLogHandle(DailyLogWriter);

impl Write for DailyLogHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write_at(Utc::now(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut current = self
            .0
            .current
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        current.file.flush()
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn log_path(log_dir: &Path, day: NaiveDate) -> PathBuf {
    log_dir.join(format!(
        "{LOG_FILE_PREFIX}{}{LOG_FILE_SUFFIX}",
        day.format("%Y-%m-%d")
    ))
}

fn log_file_day(file_name: &str) -> Option<NaiveDate> {
    let body = file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_SUFFIX)?;
    NaiveDate::parse_from_str(body, "%Y-%m-%d").ok()
}

fn log_files(log_dir: &Path) -> Result<Vec<(NaiveDate, PathBuf)>> {
    let entries = match fs::read_dir(log_dir) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", log_dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(day) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(log_file_day)
        else {
            continue;
        };
        files.push((day, path));
    }
    files.sort();
    Ok(files)
}

pub fn remove_expired_logs(log_dir: &Path, today: NaiveDate, retention_days: u64) -> Result<()> {
    let Some(cutoff) = today.checked_sub_days(Days::new(retention_days)) else {
        return Ok(());
    };
    for (day, path) in log_files(log_dir)? {
        if day < cutoff {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

/// Last `max_lines` lines across all log files, oldest first.
pub fn read_recent_log_lines(log_dir: &Path, max_lines: usize) -> Result<Vec<String>> {
    let mut tail: VecDeque<String> = VecDeque::with_capacity(max_lines);
    for (_, path) in log_files(log_dir)? {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for line in content.lines() {
            if tail.len() == max_lines {
                tail.pop_front();
            }
            if max_lines > 0 {
                tail.push_back(line.to_string());
            }
        }
    }
    Ok(tail.into())
}
