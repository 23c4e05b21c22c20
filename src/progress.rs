//! Shared progress tracking utilities.
//!
//! `ProgressReader` wraps any reader, tracks bytes read, and calls a
//! callback after each read, enabling byte-based progress bars for
//! commands that stream through dump files.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;

/// A reader wrapper that tracks bytes read and calls a progress callback.
pub struct ProgressReader<R: Read> {
    reader: R,
    callback: Box<dyn Fn(u64)>,
    bytes_read: u64,
}

impl<R: Read> ProgressReader<R> {
    /// The callback receives the total bytes read so far after each
    /// successful read operation.
    pub fn new<F>(reader: R, callback: F) -> Self
    where
        F: Fn(u64) + 'static,
    {
        Self {
            reader,
            callback: Box::new(callback),
            bytes_read: 0,
        }
    }

    /// Wrap a reader with an indicatif bar sized to `total_bytes`, or a
    /// spinner when the total is unknown (compressed input).
    pub fn spinner(reader: R, total_bytes: u64) -> Self {
        let bar = byte_progress_bar(total_bytes);
        Self::new(reader, move |bytes| bar.set_position(bytes))
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.reader.read(buf)?;
        self.bytes_read += n as u64;
        (self.callback)(self.bytes_read);
        Ok(n)
    }
}

pub fn byte_progress_bar(total_bytes: u64) -> ProgressBar {
    if total_bytes == 0 {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {bytes} read ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        return spinner;
    }
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar
}
