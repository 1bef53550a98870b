use std::fmt;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::constants::CONSOLE_FILE;
use crate::file_io::open_file_for_append;
use crate::Result;

/// Where a supervised process's stdout/stderr go
#[derive(Debug, Clone)]
pub enum ConsoleOutput {
    /// Share the harness's own stdout/stderr
    Inherit,
    Discard,
    /// Append to a file
    ToFile(PathBuf),
    /// Forward each line to an in-memory writer
    ToSink(ConsoleSink),
}

/// Shared line writer for [`ConsoleOutput::ToSink`]
#[derive(Clone)]
pub struct ConsoleSink(Arc<Mutex<Box<dyn Write + Send>>>);

impl ConsoleSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    pub fn write_line(
        &self,
        line: &str,
    ) {
        let mut w = self.0.lock();
        if let Err(e) = writeln!(w, "{line}").and_then(|_| w.flush()) {
            warn!("console sink write failed: {}", e);
        }
    }
}

impl fmt::Debug for ConsoleSink {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("ConsoleSink")
    }
}

/// Per-process console bookkeeping.
///
/// The default console file lives inside the data directory, but `create`
/// wants that directory empty, so until the first launch the file is staged
/// next to it and moved in afterwards.
#[derive(Debug)]
pub(crate) struct Console {
    output: ConsoleOutput,
    staged: Option<PathBuf>,
}

impl Console {
    pub(crate) fn new(output: ConsoleOutput) -> Self {
        Self { output, staged: None }
    }

    pub(crate) fn in_data_dir(data_dir: &Path) -> Self {
        let target = data_dir.join(CONSOLE_FILE);
        let staged = match (data_dir.parent(), data_dir.file_name()) {
            (Some(parent), Some(dir_name)) if !target.exists() => Some(parent.join(format!(
                ".{}_{}",
                dir_name.to_string_lossy(),
                CONSOLE_FILE
            ))),
            _ => None,
        };
        Self {
            output: ConsoleOutput::ToFile(target),
            staged,
        }
    }

    fn active_file(&self) -> Option<PathBuf> {
        match &self.output {
            ConsoleOutput::ToFile(path) => Some(self.staged.clone().unwrap_or_else(|| path.clone())),
            _ => None,
        }
    }

    /// Writes a harness note ("Launching at ...") to the console target
    pub(crate) fn note(
        &self,
        text: &str,
    ) -> Result<()> {
        match &self.output {
            ConsoleOutput::Inherit => {
                println!("{text}");
            }
            ConsoleOutput::Discard => {}
            ConsoleOutput::ToSink(sink) => sink.write_line(text),
            ConsoleOutput::ToFile(_) => {
                if let Some(path) = self.active_file() {
                    let mut f = open_file_for_append(&path)?;
                    writeln!(f, "{text}")?;
                }
            }
        }
        Ok(())
    }

    /// stdout/stderr for a child; `true` when output must be forwarded
    pub(crate) fn stdio(&self) -> Result<(Stdio, Stdio, bool)> {
        Ok(match &self.output {
            ConsoleOutput::Inherit => (Stdio::inherit(), Stdio::inherit(), false),
            ConsoleOutput::Discard => (Stdio::null(), Stdio::null(), false),
            ConsoleOutput::ToSink(_) => (Stdio::piped(), Stdio::piped(), true),
            ConsoleOutput::ToFile(_) => match self.active_file() {
                Some(path) => {
                    let out = open_file_for_append(&path)?;
                    let err = out.try_clone()?;
                    (Stdio::from(out), Stdio::from(err), false)
                }
                None => (Stdio::null(), Stdio::null(), false),
            },
        })
    }

    pub(crate) fn forward<R>(
        &self,
        reader: R,
    ) -> Option<JoinHandle<()>>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let ConsoleOutput::ToSink(sink) = &self.output else {
            return None;
        };
        let sink = sink.clone();
        Some(tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                sink.write_line(&line);
            }
        }))
    }

    /// Moves a staged console file into the data directory
    pub(crate) fn promote(&mut self) {
        let (Some(staged), ConsoleOutput::ToFile(target)) = (&self.staged, &self.output) else {
            return;
        };
        if staged.exists() && !target.exists() {
            if let Err(e) = std::fs::rename(staged, target) {
                warn!("could not move console file {:?} to {:?}: {}", staged, target, e);
                return;
            }
        }
        self.staged = None;
    }

    /// Current content of a file-backed console, empty otherwise
    pub(crate) fn contents(&self) -> String {
        match self.active_file() {
            Some(path) => std::fs::read_to_string(&path).unwrap_or_else(|e| {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("unable to read console output {:?}: {}", path, e);
                }
                String::new()
            }),
            None => String::new(),
        }
    }
}
