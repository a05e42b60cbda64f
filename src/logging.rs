//! Server logging: every tracing event is tee'd to standard output and the
//! log file, and clients can read the file's tail back over the wire.
//!
//! The file handle sits behind one mutex shared by the subscriber's writer and
//! [`ServerLog::tail`], so a tail never observes a half-written line.

use crate::error::Result;
use crate::locks::relock;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::FmtSubscriber;

/// The append-only server log file, shared between the tracing subscriber and
/// the request handler that serves tail reads.
#[derive(Clone)]
pub struct ServerLog {
    file: Arc<Mutex<File>>,
}

impl ServerLog {
    /// Opens (or creates) the log file in append mode.
    pub fn open(path: &Path) -> Result<ServerLog> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Ok(ServerLog {
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Returns the last `lines` log lines as one newline-terminated string.
    /// A file with fewer lines comes back whole; an empty file reports itself.
    pub fn tail(&self, lines: usize) -> Result<String> {
        let mut file = relock(&self.file);
        if file.metadata()?.len() == 0 {
            return Ok("Log file empty.".to_string());
        }

        file.seek(SeekFrom::Start(0))?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;

        let trimmed = data.strip_suffix('\n').unwrap_or(&data);
        let all: Vec<&str> = trimmed.split('\n').collect();
        let start = all.len().saturating_sub(lines);
        Ok(format!("{}\n", all[start..].join("\n")))
    }

    /// A writer for the tracing subscriber that appends to the file and
    /// mirrors to standard output.
    pub fn tee_writer(&self) -> LogTee {
        LogTee {
            file: Arc::clone(&self.file),
        }
    }
}

/// An `io::Write` that duplicates everything to the log file and stdout.
#[derive(Clone)]
pub struct LogTee {
    file: Arc<Mutex<File>>,
}

impl Write for LogTee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        {
            let mut file = relock(&self.file);
            file.write_all(buf)?;
        }
        io::stdout().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        relock(&self.file).flush()?;
        io::stdout().flush()
    }
}

impl<'a> MakeWriter<'a> for LogTee {
    type Writer = LogTee;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// configures the global tracing subscriber to write through the log tee
pub fn init(log: &ServerLog) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        // plain text: the file is read back over the wire
        .with_ansi(false)
        .with_writer(log.tee_writer())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
