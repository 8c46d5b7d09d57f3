use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::RawLine;
use crate::device::Adb;
use crate::error::{Error, Result};
use crate::subprocess::{ExitStatus, LineStream, ProcessControl, ProcessRunner};

/// Outcome of waiting for the next log line
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Line(RawLine),
    /// The caller's deadline passed before a line arrived
    Timeout,
    Cancelled,
    EndOfStream,
}

/// Spawns tag-filtered log streams
#[derive(Clone)]
pub struct StreamReader {
    runner: Arc<dyn ProcessRunner>,
    adb: Adb,
}

impl StreamReader {
    pub fn new(runner: Arc<dyn ProcessRunner>, adb: Adb) -> Self {
        Self { runner, adb }
    }

    /// Start `adb -s <id> logcat -s <TAG>:* ...` for one device
    pub async fn open(&self, device_id: &str, tags: &[String]) -> Result<LogStream> {
        let stream = self
            .runner
            .run_streaming(self.adb.logcat(device_id, tags))
            .await
            .map_err(|e| Error::device_unavailable(device_id, e))?;

        tracing::debug!(
            "Opened log stream for {} (pid {:?})",
            device_id,
            stream.control.id()
        );

        Ok(LogStream {
            device_id: device_id.to_string(),
            lines: stream.lines,
            control: stream.control,
        })
    }
}

/// A running log stream for one device
pub struct LogStream {
    device_id: String,
    lines: LineStream,
    control: Box<dyn ProcessControl>,
}

impl LogStream {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Wait for the next line, giving up at `deadline` or when `cancel` fires.
    ///
    /// Only the calling worker is suspended.
    pub async fn next_line(
        &mut self,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<StreamEvent> {
        let sleep = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Ok(StreamEvent::Cancelled),
            item = self.lines.next() => match item {
                Some(Ok(text)) => Ok(StreamEvent::Line(RawLine {
                    device_id: self.device_id.clone(),
                    text,
                })),
                Some(Err(e)) => Err(Error::stream_read(&self.device_id, e)),
                None => Ok(StreamEvent::EndOfStream),
            },
            _ = sleep => Ok(StreamEvent::Timeout),
        }
    }

    /// Stop the stream: SIGTERM, then kill once `grace` has elapsed
    pub async fn close(mut self, grace: Duration) -> Result<ExitStatus> {
        let status = self.control.terminate(grace).await?;
        tracing::debug!("Log stream for {} closed: {:?}", self.device_id, status);
        Ok(status)
    }
}
