//! Logger setup for the pipeline binaries.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use env_logger::{Builder, Env, Target};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("failed to open log file {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("logger already initialized: {0}")]
    Init(#[from] log::SetLoggerError),
}

/// Writer duplicating everything to two sinks.
pub struct TeeWriter<A, B> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> TeeWriter<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    #[cfg(test)]
    fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: Write, B: Write> Write for TeeWriter<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}

/// Initialize `env_logger` with an `info` default filter.
///
/// `RUST_LOG` overrides the filter. With `log_path` set, records are appended
/// to that file as well as written to stderr.
pub fn init_logging(log_path: Option<&Path>) -> Result<(), LoggingError> {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {} - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.target(),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_path {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LoggingError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        builder.target(Target::Pipe(Box::new(TeeWriter::new(io::stderr(), file))));
    }

    builder.try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writes_both() {
        let mut tee = TeeWriter::new(Vec::new(), Vec::new());
        write!(tee, "tile {}", "123.456").unwrap();
        tee.flush().unwrap();
        let (a, b) = tee.into_inner();
        assert_eq!(a, b"tile 123.456");
        assert_eq!(a, b);
    }
}
