//! Transfer server: accept peer connections, one request per connection, one task per connection.
//!
//! Per connection: read request line -> serve LIST | receive PREPARE push | serve CHUNK -> close.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use lansync_core::protocol::{ProtocolError, MAX_LINE_LEN};
use lansync_core::{chunk, encode_listing, staging_name, PrepareReply, Request, TransferSession};
use tokio::fs::File;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite,
    AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::{Result, SyncError};
use crate::index::FileIndex;
use crate::shutdown::Shutdown;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Applies to each read or write of a bulk transfer.
pub const IO_TIMEOUT: Duration = Duration::from_secs(15);
/// Cap on per-connection copy buffers, independent of block size.
const MAX_IO_BUFFER: u64 = 1024 * 1024;

/// Run `fut` with a deadline; expiry becomes an ordinary `TimedOut` I/O error.
pub(crate) async fn timed<T>(
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{what} timed out after {}s", limit.as_secs()),
        )),
    }
}

/// Read one `\n`-terminated line of at most [`MAX_LINE_LEN`] bytes.
pub(crate) async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    peer: SocketAddr,
) -> Result<String> {
    let mut line = Vec::new();
    let mut limited = reader.take(MAX_LINE_LEN as u64);
    timed(
        REQUEST_TIMEOUT,
        "line read",
        limited.read_until(b'\n', &mut line),
    )
    .await
    .map_err(SyncError::network(peer))?;
    if line.last() != Some(&b'\n') {
        if line.len() < MAX_LINE_LEN {
            return Err(ProtocolError::Closed.into());
        }
        return Err(ProtocolError::Unterminated.into());
    }
    String::from_utf8(line).map_err(|_| ProtocolError::NotUtf8.into())
}

pub(crate) fn io_buffer(block_size: u64) -> Vec<u8> {
    vec![0u8; block_size.min(MAX_IO_BUFFER) as usize]
}

pub async fn bind(port: u16) -> io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port)).await
}

/// Accept loop. Each connection runs in its own task; its failure is logged and goes no further.
pub async fn run_transport(
    listener: TcpListener,
    index: Arc<FileIndex>,
    shutdown: Shutdown,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        debug!(%addr, "transfer server listening");
    }
    loop {
        let accepted = tokio::select! {
            r = listener.accept() => r,
            _ = shutdown.cancelled() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                let index = index.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, &index).await {
                        error!(%peer, class = ?e.class(), error = %e, "request failed");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                if !shutdown.sleep(Duration::from_millis(100)).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, index: &FileIndex) -> Result<()> {
    let mut stream = BufReader::new(stream);
    let line = read_line(&mut stream, peer).await?;
    let request = Request::parse(&line)?;
    debug!(%peer, verb = request.verb(), "request");
    match request {
        Request::List => serve_list(&mut stream, peer, index).await,
        Request::Prepare { filename, size } => {
            receive_push(&mut stream, peer, index, &filename, size).await
        }
        Request::Chunk {
            filename,
            block_index,
        } => serve_block(&mut stream, peer, index, &filename, block_index).await,
    }
}

async fn serve_list<S: AsyncWrite + Unpin>(
    stream: &mut S,
    peer: SocketAddr,
    index: &FileIndex,
) -> Result<()> {
    let listing = index.snapshot().await;
    let frame = encode_listing(&listing)?;
    let net = SyncError::network(peer);
    timed(IO_TIMEOUT, "listing write", stream.write_all(&frame))
        .await
        .map_err(net)?;
    let _ = stream.shutdown().await;
    info!(%peer, files = listing.len(), "sent file list");
    Ok(())
}

/// RECEIVE_PUSH: stage, reply READY, read exactly `size` bytes, rename, reply DONE.
/// Staging is removed on any failure and the sender gets an ERROR line if it is still listening.
async fn receive_push<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    peer: SocketAddr,
    index: &FileIndex,
    filename: &str,
    size: u64,
) -> Result<()> {
    let staging = index.path_of(&staging_name(filename));
    let mut file = match File::create(&staging).await {
        Ok(f) => f,
        Err(e) => {
            reply_error(stream, "cannot create staging file").await;
            return Err(SyncError::filesystem(&staging)(e));
        }
    };
    let mut session = TransferSession::new(filename, size, staging);
    let received = receive_into(stream, peer, &mut file, &mut session, index.block_size()).await;
    drop(file);

    match received {
        Ok(()) => {
            let target = index.path_of(filename);
            if let Err(e) = tokio::fs::rename(&session.staging_path, &target).await {
                discard(&session.staging_path).await;
                reply_error(stream, "cannot install file").await;
                return Err(SyncError::filesystem(&target)(e));
            }
            index.invalidate().await;
            info!(%peer, file = %filename, bytes = size, "file received");
            timed(
                REQUEST_TIMEOUT,
                "reply write",
                stream.write_all(&PrepareReply::Done.encode()),
            )
            .await
            .map_err(SyncError::network(peer))?;
            let _ = stream.shutdown().await;
            Ok(())
        }
        Err(e) => {
            discard(&session.staging_path).await;
            reply_error(stream, "transfer incomplete").await;
            warn!(
                %peer,
                file = %filename,
                received = session.bytes_transferred,
                expected = size,
                "push aborted, staging discarded"
            );
            Err(e)
        }
    }
}

async fn receive_into<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    peer: SocketAddr,
    file: &mut File,
    session: &mut TransferSession,
    block_size: u64,
) -> Result<()> {
    let net = SyncError::network(peer);
    timed(
        REQUEST_TIMEOUT,
        "reply write",
        stream.write_all(&PrepareReply::Ready.encode()),
    )
    .await
    .map_err(net)?;
    timed(REQUEST_TIMEOUT, "reply flush", stream.flush())
        .await
        .map_err(net)?;
    debug!(%peer, file = %session.filename, bytes = session.expected_size, "ready to receive");

    let mut buf = io_buffer(block_size);
    while session.remaining() > 0 {
        let want = session.remaining().min(buf.len() as u64) as usize;
        let n = timed(IO_TIMEOUT, "payload read", stream.read(&mut buf[..want]))
            .await
            .map_err(net)?;
        if n == 0 {
            // Sender closed early.
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(SyncError::filesystem(&session.staging_path))?;
        session.record(n as u64);
    }
    session.verify().map_err(|mismatch| SyncError::SizeMismatch {
        filename: session.filename.clone(),
        mismatch,
    })?;
    file.flush()
        .await
        .map_err(SyncError::filesystem(&session.staging_path))?;
    file.sync_all()
        .await
        .map_err(SyncError::filesystem(&session.staging_path))
}

async fn reply_error<S: AsyncWrite + Unpin>(stream: &mut S, reason: &str) {
    let reply = PrepareReply::Error(reason.into()).encode();
    let _ = timed(REQUEST_TIMEOUT, "reply write", stream.write_all(&reply)).await;
}

/// SERVE_BLOCK: raw bytes of one block, no header. Missing file or index past EOF sends nothing.
async fn serve_block<S: AsyncWrite + Unpin>(
    stream: &mut S,
    peer: SocketAddr,
    index: &FileIndex,
    filename: &str,
    block_index: u64,
) -> Result<()> {
    let path = index.path_of(filename);
    let block_size = index.block_size();
    let mut file = match File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(%peer, file = %filename, "block requested for missing file");
            let _ = stream.shutdown().await;
            return Ok(());
        }
        Err(e) => return Err(SyncError::filesystem(&path)(e)),
    };
    let size = file
        .metadata()
        .await
        .map_err(SyncError::filesystem(&path))?
        .len();
    let len = chunk::block_len(size, block_index, block_size);
    let offset = match chunk::block_offset(block_index, block_size) {
        Some(offset) if len > 0 => offset,
        _ => {
            debug!(%peer, file = %filename, block = block_index, "block past end of file");
            let _ = stream.shutdown().await;
            return Ok(());
        }
    };
    file.seek(io::SeekFrom::Start(offset))
        .await
        .map_err(SyncError::filesystem(&path))?;

    let net = SyncError::network(peer);
    let mut block = file.take(len);
    let mut buf = io_buffer(block_size);
    let mut sent = 0u64;
    loop {
        let n = block
            .read(&mut buf)
            .await
            .map_err(SyncError::filesystem(&path))?;
        if n == 0 {
            break;
        }
        timed(IO_TIMEOUT, "block write", stream.write_all(&buf[..n]))
            .await
            .map_err(net)?;
        sent += n as u64;
    }
    let _ = stream.shutdown().await;
    debug!(%peer, file = %filename, block = block_index, bytes = sent, "sent block");
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "cannot remove staging file");
        }
    }
}
