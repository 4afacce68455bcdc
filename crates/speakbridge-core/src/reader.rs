//! The reader loop: softsynth device bytes in, queued commands out.
//!
//! A buffer containing a flush byte first makes the synth worker cancel
//! everything and acknowledge, then only the bytes after the last flush are
//! tokenized and queued.

use crate::audio::IndexReporter;
use crate::config::PipelineConfig;
use crate::error::{SpeakbridgeError, SpeakbridgeResult};
use crate::state::PipelineState;
use crate::tokenizer::{queueable_commands, split_at_flush};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::{File, OpenOptions};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Anything the reader can poll and read from
pub trait InputDevice: Read + AsFd + Send {}

impl<T: Read + AsFd + Send> InputDevice for T {}

/// Open the softsynth device for non-blocking reads.
///
/// # Errors
///
/// Returns [`SpeakbridgeError::DeviceRead`] if the device cannot be opened
pub fn open_device<P: AsRef<Path>>(path: P) -> SpeakbridgeResult<File> {
    let path = path.as_ref();
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NONBLOCK.bits())
        .open(path)
        .map_err(|e| {
            error!("Unable to open softsynth device {}: {}", path.display(), e);
            SpeakbridgeError::device_read(format!("{}: {e}", path.display()))
        })
}

/// Report reached index marks back to the softsynth device.
///
/// Each mark is written as `CTRL-A <index> i`, the same form the device
/// uses for index commands, so the screen reader can track the position
/// being spoken. Write failures are logged and the mark is dropped.
pub fn device_index_reporter<W>(writer: W) -> IndexReporter
where
    W: Write + Send + 'static,
{
    let writer = Mutex::new(writer);
    Arc::new(move |index: u8| {
        let report = format!("\x01{index}i");
        if let Err(e) = writer.lock().write_all(report.as_bytes()) {
            warn!(index, "Unable to report index mark to device: {}", e);
        }
    })
}

/// Reads the device and feeds the shared queue
#[derive(Debug)]
pub struct Reader<D> {
    device: D,
    state: Arc<PipelineState>,
    buf: Vec<u8>,
    stop_ack_timeout: Duration,
}

impl<D: InputDevice> Reader<D> {
    /// Create a reader over `device`
    pub fn new(device: D, state: Arc<PipelineState>, config: &PipelineConfig) -> Self {
        Self {
            device,
            state,
            buf: vec![0; config.read_buffer_size.max(1)],
            stop_ack_timeout: config.stop_ack_timeout(),
        }
    }

    /// Run until shutdown is requested or the device closes.
    ///
    /// # Errors
    ///
    /// Returns [`SpeakbridgeError::DeviceRead`] on an unrecoverable read or
    /// poll failure; shutdown has already been requested in that case.
    pub fn run(&mut self) -> SpeakbridgeResult<()> {
        info!("Reader started");
        while self.state.is_running() {
            let (device_ready, wake_ready) = self.wait_readable()?;
            if wake_ready {
                self.state.drain_wake();
                continue;
            }
            if !device_ready {
                continue;
            }

            match self.device.read(&mut self.buf) {
                Ok(0) => {
                    info!("Softsynth device closed");
                    self.state.request_shutdown();
                }
                Ok(n) => {
                    self.process_buffer(&self.buf[..n]);
                }
                Err(e) if matches!(e.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
                Err(e) => {
                    error!("Read from softsynth device failed: {}", e);
                    self.state.request_shutdown();
                    return Err(SpeakbridgeError::device_read(e.to_string()));
                }
            }
        }
        info!("Reader stopped");
        Ok(())
    }

    /// Wait until the device or the wake pipe has something to read
    fn wait_readable(&self) -> SpeakbridgeResult<(bool, bool)> {
        let mut fds = [
            PollFd::new(self.device.as_fd(), PollFlags::POLLIN),
            PollFd::new(self.state.wake_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok((false, false)),
            Err(e) => {
                error!("Waiting on softsynth device failed: {}", e);
                self.state.request_shutdown();
                return Err(SpeakbridgeError::device_read(e.to_string()));
            }
        }

        let ready = |fd: &PollFd<'_>| {
            fd.revents().is_some_and(|events| {
                events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            })
        };
        Ok((ready(&fds[0]), ready(&fds[1])))
    }

    /// Handle one buffer read from the device and return how many commands
    /// were queued.
    pub fn process_buffer(&self, bytes: &[u8]) -> usize {
        let (flushed, rest) = split_at_flush(bytes);
        if flushed {
            match self.state.request_stop(self.stop_ack_timeout) {
                Ok(outcome) => debug!(?outcome, "Flush completed"),
                Err(e) => warn!("Flush not acknowledged, continuing: {}", e),
            }
        }

        let queued = self.state.enqueue_all(queueable_commands(rest));
        debug!(bytes = bytes.len(), queued, flushed, "Processed device buffer");
        queued
    }
}
