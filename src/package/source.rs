// src/package/source.rs

//! Byte sources feeding the streaming extractor
//!
//! A source hands out bytes as they become available. When nothing is
//! buffered yet it answers [`ReadOutcome::WouldBlock`], and the extractor
//! parks in [`ByteSource::wait`] for at most one poll interval before
//! checking for cancellation and trying again.

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::package::CancelHandle;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a single non-blocking read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were copied into the buffer (never zero)
    Read(usize),
    /// The source is exhausted
    Eof,
    /// Nothing available right now, but more may come
    WouldBlock,
}

/// Anything the extractor can pull package bytes from
pub trait ByteSource: Send {
    /// Copy available bytes into `buf` without blocking
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Total length in bytes, when known in advance
    fn length_hint(&self) -> Option<u64> {
        None
    }

    /// Block until more bytes may be available, or `timeout` elapses
    fn wait(&mut self, timeout: Duration) {
        let _ = timeout;
    }
}

/// Local package file
#[derive(Debug)]
pub struct FileSource {
    file: File,
    length: Option<u64>,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let length = file.metadata().ok().map(|m| m.len());
        Ok(Self { file, length })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            match self.file.read(buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Read(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn length_hint(&self) -> Option<u64> {
        self.length
    }
}

/// Any in-memory or already-open reader, read eagerly
pub struct ReaderSource<R> {
    reader: R,
    length: Option<u64>,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R, length: Option<u64>) -> Self {
        Self { reader, length }
    }
}

impl<R: Read + Send> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        match self.reader.read(buf)? {
            0 => Ok(ReadOutcome::Eof),
            n => Ok(ReadOutcome::Read(n)),
        }
    }

    fn length_hint(&self) -> Option<u64> {
        self.length
    }
}

/// Producer half of a [`ChannelSource`]
///
/// Held by whatever transport delivers the package (a download thread, an
/// IPC pipe reader). Dropping it marks the end of the stream.
#[derive(Debug, Clone)]
pub struct ChannelFeeder {
    sender: Sender<Result<Vec<u8>>>,
}

impl ChannelFeeder {
    /// Push a chunk; returns false once the consumer has gone away
    pub fn send(&self, chunk: Vec<u8>) -> bool {
        self.sender.send(Ok(chunk)).is_ok()
    }

    /// Report a transport failure to the consumer
    pub fn fail(&self, error: Error) {
        let _ = self.sender.send(Err(error));
    }
}

/// Byte source fed chunk by chunk from another thread
#[derive(Debug)]
pub struct ChannelSource {
    receiver: Receiver<Result<Vec<u8>>>,
    pending: Vec<u8>,
    offset: usize,
    length: Option<u64>,
    finished: bool,
    failure: Option<Error>,
}

impl ChannelSource {
    /// Create a connected feeder/source pair
    pub fn new(length: Option<u64>) -> (ChannelFeeder, Self) {
        let (sender, receiver) = mpsc::channel();
        (
            ChannelFeeder { sender },
            Self {
                receiver,
                pending: Vec::new(),
                offset: 0,
                length,
                finished: false,
                failure: None,
            },
        )
    }

    fn accept(&mut self, chunk: Result<Vec<u8>>) -> Result<()> {
        self.pending = chunk?;
        self.offset = 0;
        Ok(())
    }
}

impl ByteSource for ChannelSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if let Some(error) = self.failure.take() {
            self.finished = true;
            return Err(error);
        }
        while self.offset >= self.pending.len() {
            if self.finished {
                return Ok(ReadOutcome::Eof);
            }
            match self.receiver.try_recv() {
                Ok(chunk) => self.accept(chunk)?,
                Err(TryRecvError::Empty) => return Ok(ReadOutcome::WouldBlock),
                Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                    return Ok(ReadOutcome::Eof);
                }
            }
        }

        let available = &self.pending[self.offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.offset += n;
        Ok(ReadOutcome::Read(n))
    }

    fn length_hint(&self) -> Option<u64> {
        self.length
    }

    fn wait(&mut self, timeout: Duration) {
        if self.finished || self.failure.is_some() || self.offset < self.pending.len() {
            return;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(chunk)) => {
                self.pending = chunk;
                self.offset = 0;
            }
            Ok(Err(error)) => self.failure = Some(error),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => self.finished = true,
        }
    }
}

/// Package streamed over HTTP(S) while it is being extracted
///
/// The download runs on its own thread and pushes chunks into a
/// [`ChannelSource`]; redirects are followed by the HTTP client.
#[derive(Debug)]
pub struct HttpSource {
    inner: ChannelSource,
}

impl HttpSource {
    /// Start downloading `url`
    ///
    /// Connection and HTTP status errors are reported here; errors later in
    /// the transfer surface from [`ByteSource::read`] as network errors.
    pub fn start(url: &str, config: &DownloadConfig, cancel: CancelHandle) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Network(format!("failed to create HTTP client: {}", e)))?;

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Network(format!("{}: {}", url, e)))?;

        let length = response.content_length();
        debug!("Downloading {} ({:?} bytes)", url, length);

        let (feeder, inner) = ChannelSource::new(length);
        let url = url.to_string();

        // Detached: the worker stops once the source is dropped or canceled
        thread::Builder::new()
            .name("ampkg-download".to_string())
            .spawn(move || pump_response(response, feeder, &cancel, &url))?;

        Ok(Self { inner })
    }
}

fn pump_response(
    mut response: reqwest::blocking::Response,
    feeder: ChannelFeeder,
    cancel: &CancelHandle,
    url: &str,
) {
    let mut buf = vec![0u8; 64 * 1024];
    let mut received = 0u64;
    loop {
        if cancel.is_canceled() {
            debug!("Download of {} canceled", url);
            return;
        }
        match response.read(&mut buf) {
            Ok(0) => {
                debug!("Download of {} complete ({} bytes)", url, received);
                return;
            }
            Ok(n) => {
                received += n as u64;
                if !feeder.send(buf[..n].to_vec()) {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Download of {} failed: {}", url, e);
                feeder.fail(Error::Network(format!("{}: {}", url, e)));
                return;
            }
        }
    }
}

impl ByteSource for HttpSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        self.inner.read(buf)
    }

    fn length_hint(&self) -> Option<u64> {
        self.inner.length_hint()
    }

    fn wait(&mut self, timeout: Duration) {
        self.inner.wait(timeout);
    }
}

/// Adapts a [`ByteSource`] to `io::Read` for the archive decoder
///
/// This is where the extractor suspends: an empty source makes it wait one
/// poll interval at a time, checking the cancellation flag before and after
/// every wait.
pub(crate) struct SourceReader<S> {
    source: S,
    cancel: CancelHandle,
    poll_interval: Duration,
    consumed: Arc<AtomicU64>,
}

impl<S: ByteSource> SourceReader<S> {
    pub(crate) fn new(
        source: S,
        cancel: CancelHandle,
        poll_interval: Duration,
        consumed: Arc<AtomicU64>,
    ) -> Self {
        Self {
            source,
            cancel,
            poll_interval,
            consumed,
        }
    }
}

impl<S: ByteSource> Read for SourceReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.cancel.is_canceled() {
                return Err(Error::Canceled.into_io_tunnel());
            }
            match self.source.read(buf).map_err(Error::into_io_tunnel)? {
                ReadOutcome::Read(n) => {
                    self.consumed.fetch_add(n as u64, Ordering::Relaxed);
                    return Ok(n);
                }
                ReadOutcome::Eof => return Ok(0),
                ReadOutcome::WouldBlock => {
                    self.source.wait(self.poll_interval);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn read_all<S: ByteSource>(source: S) -> io::Result<Vec<u8>> {
        let mut reader = SourceReader::new(
            source,
            CancelHandle::new(),
            Duration::from_millis(5),
            Arc::new(AtomicU64::new(0)),
        );
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_channel_source_in_order() {
        let (feeder, source) = ChannelSource::new(Some(6));
        let producer = thread::spawn(move || {
            feeder.send(b"abc".to_vec());
            thread::sleep(Duration::from_millis(20));
            feeder.send(b"def".to_vec());
        });
        let out = read_all(source).unwrap();
        producer.join().unwrap();
        assert_eq!(out, b"abcdef");
    }

    #[test]
    fn test_channel_source_error() {
        let (feeder, source) = ChannelSource::new(None);
        feeder.send(b"ab".to_vec());
        feeder.fail(Error::Network("reset".into()));
        let err = read_all(source).unwrap_err();
        assert!(matches!(Error::from_io_tunnel(err), Error::Network(_)));
    }

    #[test]
    fn test_channel_source_error_while_waiting() {
        let (feeder, source) = ChannelSource::new(None);
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            feeder.fail(Error::Network("timeout".into()));
        });
        let err = read_all(source).unwrap_err();
        producer.join().unwrap();
        assert!(matches!(Error::from_io_tunnel(err), Error::Network(_)));
    }

    #[test]
    fn test_cancel_while_waiting() {
        let (_feeder, source) = ChannelSource::new(None);
        let cancel = CancelHandle::new();
        let mut reader = SourceReader::new(
            source,
            cancel.clone(),
            Duration::from_millis(10),
            Arc::new(AtomicU64::new(0)),
        );

        let canceler = cancel.clone();
        let started = Instant::now();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            canceler.cancel();
        });

        let mut buf = [0u8; 16];
        let err = reader.read(&mut buf).unwrap_err();
        assert!(Error::from_io_tunnel(err).is_canceled());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_file_source_length_hint() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"0123456789").unwrap();
        let source = FileSource::open(temp.path()).unwrap();
        assert_eq!(source.length_hint(), Some(10));
        assert_eq!(read_all(source).unwrap(), b"0123456789");
    }
}
