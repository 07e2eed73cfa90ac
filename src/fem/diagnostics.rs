use crate::base::FsiError;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Writes time-indexed text channels (one file per channel)
///
/// A row recorded at time zero truncates the channel and writes its header
/// first; later rows are appended. Thus a run restarted from a checkpoint
/// keeps extending the existing files. Only the writer rank holds an enabled
/// sink; every other rank holds a disabled one.
#[derive(Clone, Debug)]
pub struct DiagnosticsSink {
    directory: Option<PathBuf>,
}

impl DiagnosticsSink {
    /// Allocates a new instance writing to `directory` if `rank == 0`
    pub fn new(directory: &str, rank: usize) -> Self {
        DiagnosticsSink {
            directory: if rank == 0 { Some(PathBuf::from(directory)) } else { None },
        }
    }

    /// Allocates a sink that writes nothing
    pub fn disabled() -> Self {
        DiagnosticsSink { directory: None }
    }

    /// Returns true if this sink writes files
    pub fn enabled(&self) -> bool {
        self.directory.is_some()
    }

    /// Returns the path of a channel
    pub fn path(&self, channel: &str) -> Option<PathBuf> {
        self.directory.as_ref().map(|d| d.join(channel))
    }

    /// Records the row `time, values...` (tab-separated)
    pub fn record(&self, channel: &str, header: &str, time: f64, values: &[f64]) -> Result<(), FsiError> {
        let mut line = format!("{}", time);
        for v in values {
            line.push_str(&format!("\t{}", v));
        }
        self.record_line(channel, header, time == 0.0, &line)
    }

    /// Records a preformatted row; `restart` truncates the channel and writes the header
    pub fn record_line(&self, channel: &str, header: &str, restart: bool, line: &str) -> Result<(), FsiError> {
        let path = match self.path(channel) {
            Some(p) => p,
            None => return Ok(()),
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = if restart {
            let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(&path)?;
            writeln!(file, "{}", header)?;
            file
        } else {
            OpenOptions::new().create(true).append(true).open(&path)?
        };
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////////////////////////
