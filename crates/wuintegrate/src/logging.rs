use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger,
    TerminalMode, WriteLogger,
};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use wuintegrate_platform::AppPaths;

/// Append-only `debug.log` that is recreated if something deletes it while
/// the run is going, and cut back to its newer half whenever it grows past
/// `max_size`. The cap is checked on every write.
struct CappedLogFile {
    path: PathBuf,
    max_size: u64,
    file: Option<File>,
    len: u64,
}

impl CappedLogFile {
    fn open(path: PathBuf, max_size: u64) -> io::Result<Self> {
        let mut log = Self {
            path,
            max_size,
            file: None,
            len: 0,
        };
        log.len = keep_recent_half(&log.path, max_size)?;
        log.file = Some(log.append_handle()?);
        Ok(log)
    }

    fn append_handle(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    fn current_file(&mut self) -> io::Result<&mut File> {
        if !self.path.exists() {
            self.file = None;
            self.len = 0;
        } else if self.len > self.max_size {
            self.file = None;
            self.len = keep_recent_half(&self.path, self.max_size)?;
        }
        if self.file.is_none() {
            self.file = Some(self.append_handle()?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file not available"))
    }
}

impl Write for CappedLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.current_file()?.write(buf)?;
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Drop the older half of `path` once it exceeds `max_size`, starting the
/// kept part on a line boundary. Returns the resulting length; a missing
/// file counts as empty.
fn keep_recent_half(path: &Path, max_size: u64) -> io::Result<u64> {
    let len = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    if len <= max_size {
        return Ok(len);
    }

    let contents = std::fs::read(path)?;
    let half = contents.len() / 2;
    let keep_from = contents[half..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(half, |pos| half + pos + 1);
    std::fs::write(path, &contents[keep_from..])?;
    Ok((contents.len() - keep_from) as u64)
}

fn terminal_level(debug_enabled: bool) -> LevelFilter {
    if debug_enabled {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Log to the terminal and to `debug.log` in the data directory.
///
/// The file always receives debug output; the terminal shows it only when
/// `debug_enabled` is set. Returns the log file path when one was opened.
pub fn init_logging(debug_enabled: bool, max_log_size: u64) -> Option<PathBuf> {
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("wuintegrate")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        terminal_level(debug_enabled),
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    let log_path = AppPaths::new()
        .ok()
        .filter(|paths| paths.ensure_dirs().is_ok())
        .map(|paths| paths.log_file());

    let opened = log_path.and_then(|path| {
        CappedLogFile::open(path.clone(), max_log_size)
            .ok()
            .map(|writer| (path, writer))
    });

    let log_file = opened.map(|(path, writer)| {
        loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer));
        path
    });

    let _ = CombinedLogger::init(loggers);

    if let Some(path) = &log_file {
        log::debug!("Logging to {}", path.display());
    }
    log_file
}
