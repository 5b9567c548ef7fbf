//! Splitting the combined log stream into stdout and stderr.

use std::fmt::Write as _;

use futures_util::StreamExt;
use thiserror::Error;

use crate::backend::{LogStream, StreamKind};
use crate::error::RuntimeError;

/// Failure while reading or splitting a combined log stream.
#[derive(Debug, Error)]
pub enum DemuxError {
    /// The stream broke before it ended.
    #[error("log stream interrupted")]
    Read(#[source] RuntimeError),

    /// A raw console frame arrived; the stream is not multiplexed.
    #[error("unexpected unframed console output ({len} bytes); was a TTY allocated?")]
    Unframed {
        /// Size of the offending frame.
        len: usize,
    },

    /// The caller cancelled while the stream was being read.
    #[error("operation cancelled")]
    Cancelled,
}

/// Standard output and standard error of a finished container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxedOutput {
    /// Everything written to standard output.
    pub stdout: Vec<u8>,
    /// Everything written to standard error.
    pub stderr: Vec<u8>,
}

impl DemuxedOutput {
    /// Renders the operator-facing log block.
    ///
    /// A `STDOUT:` section and then a `STDERR:` section, each trimmed and
    /// each omitted when its channel is empty. The block itself is trimmed.
    #[must_use]
    pub fn render(&self) -> String {
        let mut block = String::new();
        for (header, data) in [("STDOUT", &self.stdout), ("STDERR", &self.stderr)] {
            if !data.is_empty() {
                let _ = writeln!(block, "{header}:\n{}", String::from_utf8_lossy(data).trim());
            }
        }
        block.trim().to_string()
    }
}

/// Reads `frames` to the end, sorting stdout and stderr into separate buffers.
///
/// Echoed stdin frames are dropped.
///
/// # Errors
///
/// Returns [`DemuxError::Read`] if the stream yields an error and
/// [`DemuxError::Unframed`] on console output.
pub async fn demultiplex(mut frames: LogStream) -> Result<DemuxedOutput, DemuxError> {
    let mut output = DemuxedOutput::default();
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(DemuxError::Read)?;
        match frame.stream {
            StreamKind::Stdout => output.stdout.extend_from_slice(&frame.bytes),
            StreamKind::Stderr => output.stderr.extend_from_slice(&frame.bytes),
            StreamKind::Stdin => {}
            StreamKind::Console => {
                return Err(DemuxError::Unframed {
                    len: frame.bytes.len(),
                });
            }
        }
    }
    Ok(output)
}
