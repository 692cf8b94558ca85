//! Upload sources and rewindable fragment views.
//!
//! An [`UploadStream`] is the payload handed to `store`: a reader plus its
//! declared length. Large uploads are carved into [`FragmentView`]s, each a
//! bounded window `[offset, offset + len)` over the shared source. A view
//! streams its bytes into a request body and tracks how much of the window
//! the transport consumed, so a failed attempt can be rewound:
//!
//! - nothing consumed: resend as-is
//! - seekable source: seek back to `offset`
//! - forward-only source, partially consumed: cannot be rewound

use std::io::{self, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::constants::STREAM_CHUNK_SIZE;
use super::error::BackendError;

/// Readers that can also seek.
pub trait SeekableReader: AsyncRead + AsyncSeek + Send + Sync + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Sync + Unpin> SeekableReader for T {}

enum Reader {
    Seekable(Box<dyn SeekableReader>),
    Forward(Box<dyn AsyncRead + Send + Sync + Unpin>),
}

/// Payload of a store operation.
pub struct UploadStream {
    reader: Reader,
    len: u64,
}

impl std::fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("len", &self.len)
            .field("seekable", &self.is_seekable())
            .finish_non_exhaustive()
    }
}

impl UploadStream {
    /// A seekable source positioned at its start. Fragment offsets are
    /// absolute positions in the reader.
    pub fn seekable(reader: impl SeekableReader + 'static, len: u64) -> Self {
        Self {
            reader: Reader::Seekable(Box::new(reader)),
            len,
        }
    }

    /// A source that can only be read forward (pipes, sockets, encoders).
    pub fn forward_only(reader: impl AsyncRead + Send + Sync + Unpin + 'static, len: u64) -> Self {
        Self {
            reader: Reader::Forward(Box::new(reader)),
            len,
        }
    }

    /// An in-memory seekable source.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let len = bytes.len() as u64;
        Self::seekable(io::Cursor::new(bytes), len)
    }

    /// Opens a local file as a seekable source.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Io`] if the file cannot be opened or stat'ed.
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| BackendError::io(format!("opening {}", path.display()), e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| BackendError::io(format!("reading metadata of {}", path.display()), e))?
            .len();
        Ok(Self::seekable(file, len))
    }

    /// Declared length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the declared length is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if failed fragments can always be rewound.
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        matches!(self.reader, Reader::Seekable(_))
    }

    fn poll_read_inner(&mut self, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match &mut self.reader {
            Reader::Seekable(reader) => Pin::new(reader).poll_read(cx, buf),
            Reader::Forward(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

/// Why a fragment view could not be rewound.
#[derive(Debug)]
pub enum RewindError {
    /// Forward-only source with part of the window already consumed.
    NotSeekable {
        /// Bytes of the window that were read.
        consumed: u64,
    },
    /// The seek itself failed.
    Seek(io::Error),
}

/// A bounded window over a shared [`UploadStream`].
#[derive(Debug, Clone)]
pub struct FragmentView {
    source: Arc<Mutex<UploadStream>>,
    offset: u64,
    len: u64,
    consumed: Arc<AtomicU64>,
    read_error: Arc<StdMutex<Option<io::Error>>>,
}

impl FragmentView {
    /// Creates a view of `len` bytes starting at `offset`.
    #[must_use]
    pub fn new(source: Arc<Mutex<UploadStream>>, offset: u64, len: u64) -> Self {
        Self {
            source,
            offset,
            len,
            consumed: Arc::new(AtomicU64::new(0)),
            read_error: Arc::new(StdMutex::new(None)),
        }
    }

    /// Start of the window.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the window.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True for an empty window.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes of the window handed to the transport so far.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    /// Streams the window into a request body.
    ///
    /// Holds the source lock until the body is dropped by the transport.
    pub async fn body(&self) -> reqwest::Body {
        let guard = Arc::clone(&self.source).lock_owned().await;
        reqwest::Body::wrap_stream(FragmentBody {
            source: guard,
            remaining: self.len,
            consumed: Arc::clone(&self.consumed),
            read_error: Arc::clone(&self.read_error),
            buf: vec![0; STREAM_CHUNK_SIZE],
        })
    }

    /// Takes the local read error of the last attempt, if the body failed
    /// because the source did.
    #[must_use]
    pub fn take_read_error(&self) -> Option<io::Error> {
        self.read_error.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Positions the source back at the start of the window.
    ///
    /// # Errors
    ///
    /// Returns [`RewindError::NotSeekable`] if a forward-only source was
    /// partially read, or [`RewindError::Seek`] if seeking failed.
    pub async fn rewind(&self) -> Result<(), RewindError> {
        let consumed = self.consumed();
        if consumed == 0 {
            return Ok(());
        }

        let mut source = self.source.lock().await;
        match &mut source.reader {
            Reader::Seekable(reader) => {
                reader
                    .seek(SeekFrom::Start(self.offset))
                    .await
                    .map_err(RewindError::Seek)?;
                self.consumed.store(0, Ordering::SeqCst);
                debug!(offset = self.offset, consumed, "rewound fragment");
                Ok(())
            }
            Reader::Forward(_) => Err(RewindError::NotSeekable { consumed }),
        }
    }
}

/// Request body reading one window of the source in chunks.
struct FragmentBody {
    source: OwnedMutexGuard<UploadStream>,
    remaining: u64,
    consumed: Arc<AtomicU64>,
    read_error: Arc<StdMutex<Option<io::Error>>>,
    buf: Vec<u8>,
}

impl FragmentBody {
    fn fail(&mut self, error: io::Error) -> Poll<Option<io::Result<Vec<u8>>>> {
        let message = error.to_string();
        if let Ok(mut slot) = self.read_error.lock() {
            *slot = Some(error);
        }
        self.remaining = 0;
        Poll::Ready(Some(Err(io::Error::other(message))))
    }
}

impl Stream for FragmentBody {
    type Item = io::Result<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.remaining == 0 {
            return Poll::Ready(None);
        }

        let want = usize::try_from(this.remaining)
            .unwrap_or(usize::MAX)
            .min(this.buf.len());
        let mut read_buf = ReadBuf::new(&mut this.buf[..want]);
        match this.source.poll_read_inner(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(error)) => this.fail(error),
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled().len();
                if filled == 0 {
                    return this.fail(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("source ended {} bytes before the fragment did", this.remaining),
                    ));
                }
                let chunk = this.buf[..filled].to_vec();
                this.remaining -= filled as u64;
                this.consumed.fetch_add(filled as u64, Ordering::SeqCst);
                Poll::Ready(Some(Ok(chunk)))
            }
        }
    }
}
