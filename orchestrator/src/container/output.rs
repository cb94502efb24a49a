//! Bounded capture of an exec output stream

use bollard::container::LogOutput;
use futures::{Stream, StreamExt};

use super::runtime::{EngineError, ExecOutput};

/// One frame of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

impl From<LogOutput> for OutputChunk {
    fn from(log: LogOutput) -> Self {
        match log {
            LogOutput::StdErr { message } => OutputChunk::Stderr(message.to_vec()),
            LogOutput::StdOut { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => OutputChunk::Stdout(message.to_vec()),
        }
    }
}

/// Read `stream` until it ends, keeping at most `limit` bytes.
///
/// The stream is always drained to completion so the process can exit even
/// when its output overflows the buffer. A stream error aborts the read.
pub async fn collect_output<S>(mut stream: S, limit: usize) -> Result<ExecOutput, EngineError>
where
    S: Stream<Item = Result<OutputChunk, EngineError>> + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut stderr_seen = false;
    let mut truncated = false;

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk? {
            OutputChunk::Stdout(bytes) => bytes,
            OutputChunk::Stderr(bytes) => {
                stderr_seen |= !bytes.is_empty();
                bytes
            }
        };

        let room = limit.saturating_sub(buffer.len());
        if bytes.len() > room {
            truncated = true;
        }
        buffer.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    Ok(ExecOutput {
        output: String::from_utf8_lossy(&buffer).trim_end().to_string(),
        stderr_seen,
        truncated,
        exit_code: None,
    })
}
