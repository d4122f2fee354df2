//! Diagnostics sink: a size-capped log file with archival on rotation.
//!
//! [`RotatingFile`] is a plain `io::Write` that [`init_logging`] hands to
//! `simplelog`. Output is buffered into whole lines so a rotation never splits
//! a log line across two files. When the next line would push the file past
//! `max_bytes`, the current file is closed and passed to the archiver, and a
//! fresh file is opened in its place.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use simplelog::{
    format_description, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, SimpleLogger,
    WriteLogger,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::LogConfig;

/// Called with the path of a full log file. It must move the file out of
/// the way; the sink reopens the path afterwards.
pub type Archiver = Box<dyn FnMut(&Path) -> io::Result<()> + Send>;

pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
    pending: Vec<u8>,
    archiver: Archiver,
}

impl RotatingFile {
    /// Opens (appending) `path`. `max_bytes == 0` disables rotation.
    pub fn open(path: &Path, max_bytes: u64) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = open_append(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            max_bytes,
            file,
            written,
            pending: Vec::new(),
            archiver: Box::new(gzip_archive),
        })
    }

    pub fn with_archiver(mut self, archiver: Archiver) -> Self {
        self.archiver = archiver;
        self
    }

    fn emit(&mut self, line: &[u8]) -> io::Result<()> {
        let len = line.len() as u64;
        if self.max_bytes > 0 && self.written > 0 && self.written + len > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(line)?;
        self.written += len;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        (self.archiver)(&self.path)?;
        self.file = open_append(&self.path)?;
        self.written = self.file.metadata()?.len();
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let partial = std::mem::take(&mut self.pending);
            self.emit(&partial)?;
        }
        self.file.flush()
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// First unused `<path>.<n>.gz`, counting from 1.
pub fn next_archive_path(path: &Path) -> PathBuf {
    let mut n = 1u32;
    loop {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{}.gz", n));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Default archiver: gzip the file into the next free numbered slot and
/// remove the original.
pub fn gzip_archive(path: &Path) -> io::Result<()> {
    let target = next_archive_path(path);
    let mut source = File::open(path)?;
    let mut encoder = GzEncoder::new(File::create(&target)?, Compression::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)
}

/// Log target for per-row duplicate reports. They go to the log file only,
/// so an unchanged snapshot does not flood the console.
pub const DUPLICATES_TARGET: &str = "speedmap::duplicates";

fn base_config() -> ConfigBuilder {
    let mut builder = ConfigBuilder::new();
    builder
        .set_time_format_custom(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second],[subsecond digits:3]"
        ))
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_location_level(LevelFilter::Off)
        // Only our own events; sqlx and friends are noisy at debug.
        .add_filter_allow_str("speedmap");
    builder
}

/// Installs the global logger: the rotating file (when configured) at
/// debug/info, plus warnings and errors on the console.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let level = if config.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    match &config.path {
        Some(path) => {
            let sink = RotatingFile::open(path, config.max_bytes)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            loggers.push(WriteLogger::new(level, base_config().build(), sink));

            let console = base_config()
                .add_filter_ignore_str(DUPLICATES_TARGET)
                .build();
            loggers.push(SimpleLogger::new(LevelFilter::Warn, console));
        }
        None => loggers.push(SimpleLogger::new(level, base_config().build())),
    }

    CombinedLogger::init(loggers).context("Failed to initialize logging")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn gunzip(path: &Path) -> String {
        let mut out = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_rotation_archives_full_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("speedmap.log");
        let mut sink = RotatingFile::open(&path, 20).unwrap();

        sink.write_all(b"first line here\n").unwrap();
        sink.write_all(b"second line here\n").unwrap();
        sink.flush().unwrap();

        let archive = tmp.path().join("speedmap.log.1.gz");
        assert_eq!(gunzip(&archive), "first line here\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), "second line here\n");
    }

    #[test]
    fn test_archives_are_numbered_from_one() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("speedmap.log");
        let mut sink = RotatingFile::open(&path, 10).unwrap();

        for i in 0..4 {
            writeln!(sink, "line {:05}", i).unwrap();
        }
        sink.flush().unwrap();

        for n in 1..=3 {
            let archive = tmp.path().join(format!("speedmap.log.{}.gz", n));
            assert_eq!(gunzip(&archive), format!("line {:05}\n", n - 1));
        }
        assert!(!tmp.path().join("speedmap.log.4.gz").exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "line 00003\n");
    }

    #[test]
    fn test_existing_archives_are_not_overwritten() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("speedmap.log");
        fs::write(tmp.path().join("speedmap.log.1.gz"), b"old").unwrap();
        assert_eq!(next_archive_path(&path), tmp.path().join("speedmap.log.2.gz"));
    }

    #[test]
    fn test_lines_written_in_pieces_stay_whole() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("speedmap.log");
        let rotations = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&rotations);
        let mut sink = RotatingFile::open(&path, 16)
            .unwrap()
            .with_archiver(Box::new(move |p: &Path| {
                seen.lock().unwrap().push(fs::read_to_string(p)?);
                fs::remove_file(p)
            }));

        sink.write_all(b"2020 ").unwrap();
        sink.write_all(b"INFO ").unwrap();
        sink.write_all(b"start\n").unwrap();
        sink.write_all(b"2020 ").unwrap();
        sink.write_all(b"ERROR ").unwrap();
        sink.write_all(b"boom\n").unwrap();
        sink.flush().unwrap();

        assert_eq!(*rotations.lock().unwrap(), vec!["2020 INFO start\n".to_string()]);
        assert_eq!(fs::read_to_string(&path).unwrap(), "2020 ERROR boom\n");
    }

    #[test]
    fn test_zero_cap_never_rotates() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("speedmap.log");
        let mut sink = RotatingFile::open(&path, 0).unwrap();
        for _ in 0..100 {
            sink.write_all(b"a fairly long diagnostic line\n").unwrap();
        }
        sink.flush().unwrap();
        assert!(!tmp.path().join("speedmap.log.1.gz").exists());
    }

    #[test]
    fn test_reopen_appends_and_counts_existing_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("speedmap.log");
        fs::write(&path, "0123456789\n").unwrap();

        let mut sink = RotatingFile::open(&path, 15).unwrap();
        sink.write_all(b"next run\n").unwrap();
        sink.flush().unwrap();

        assert_eq!(
            gunzip(&tmp.path().join("speedmap.log.1.gz")),
            "0123456789\n"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "next run\n");
    }
}
