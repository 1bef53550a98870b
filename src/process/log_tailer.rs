use std::io::ErrorKind;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tracing::debug;

use crate::Result;

/// Reads lines appended to a growing log file.
///
/// Only complete (newline-terminated) lines are returned; a trailing partial
/// line is kept until the writer finishes it.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    partial: Vec<u8>,
}

impl LogTailer {
    /// Starts reading at byte `offset`, skipping whatever an earlier run left
    /// in the file.
    pub fn new(
        path: impl Into<PathBuf>,
        offset: u64,
    ) -> Self {
        Self {
            path: path.into(),
            offset,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path).await.map(|m| m.is_file()).unwrap_or(false)
    }

    /// Returns the lines completed since the previous call. A missing file
    /// reads as empty.
    pub async fn read_new_lines(&mut self) -> Result<Vec<String>> {
        let mut file = match File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            debug!("{:?} shrank from {} to {} bytes, rereading", self.path, self.offset, len);
            self.offset = 0;
            self.partial.clear();
        }
        if len == self.offset {
            return Ok(vec![]);
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf).await?;
        self.offset += buf.len() as u64;
        self.partial.extend_from_slice(&buf);

        let mut lines = vec![];
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let rest = self.partial.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        Ok(lines)
    }
}
