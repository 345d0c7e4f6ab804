//! Transfer client: the initiator side of LIST, PREPARE push and CHUNK pull.

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use lansync_core::chunk::BlockRange;
use lansync_core::integrity::{self, is_absent};
use lansync_core::wire::{self, LEN_SIZE};
use lansync_core::{
    block_count, split_into_blocks, staging_name, Listing, PrepareReply, ProtocolError, Request,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::index::FileIndex;
use crate::transport::{io_buffer, read_line, timed, CONNECT_TIMEOUT, IO_TIMEOUT, REQUEST_TIMEOUT};

/// Outbound half of the transfer protocol, bound to the local shared directory.
#[derive(Clone)]
pub struct TransferClient {
    index: Arc<FileIndex>,
}

impl TransferClient {
    pub fn new(index: Arc<FileIndex>) -> Self {
        Self { index }
    }

    async fn connect(&self, peer: SocketAddr) -> Result<TcpStream> {
        timed(CONNECT_TIMEOUT, "connect", TcpStream::connect(peer))
            .await
            .map_err(SyncError::network(peer))
    }

    async fn send_request(&self, peer: SocketAddr, request: &Request) -> Result<TcpStream> {
        let mut stream = self.connect(peer).await?;
        timed(REQUEST_TIMEOUT, "request write", stream.write_all(&request.encode()))
            .await
            .map_err(SyncError::network(peer))?;
        Ok(stream)
    }

    /// LIST: the peer's full snapshot.
    pub async fn fetch_listing(&self, peer: SocketAddr) -> Result<Listing> {
        let mut stream = self.send_request(peer, &Request::List).await?;
        let net = SyncError::network(peer);
        let mut header = [0u8; LEN_SIZE];
        timed(REQUEST_TIMEOUT, "listing header", stream.read_exact(&mut header))
            .await
            .map_err(net)?;
        let expected = wire::payload_len(header);
        let payload = read_up_to(&mut stream, peer, expected).await?;
        if payload.len() as u64 != expected {
            return Err(lansync_core::FrameDecodeError::Truncated {
                expected,
                received: payload.len() as u64,
            }
            .into());
        }
        let mut frame = header.to_vec();
        frame.extend_from_slice(&payload);
        let (listing, _) = wire::decode_listing(&frame)?;
        debug!(%peer, files = listing.len(), "fetched listing");
        Ok(listing)
    }

    /// PREPARE push: announce size, wait for READY, then stream the file as one payload.
    /// Returns the number of bytes sent.
    pub async fn push(&self, peer: SocketAddr, filename: &str) -> Result<u64> {
        let path = self.index.path_of(filename);
        let fs = SyncError::filesystem(&path);
        let file = File::open(&path).await.map_err(fs)?;
        let size = file.metadata().await.map_err(fs)?.len();

        let request = Request::Prepare {
            filename: filename.to_string(),
            size,
        };
        let mut stream = BufReader::new(self.send_request(peer, &request).await?);
        let reply = read_line(&mut stream, peer).await?;
        match PrepareReply::parse(&reply)? {
            PrepareReply::Ready => {}
            PrepareReply::Error(reason) => {
                return Err(SyncError::Refused {
                    filename: filename.to_string(),
                    reason,
                })
            }
            PrepareReply::Done => return Err(ProtocolError::UnexpectedReply(reply).into()),
        }

        let net = SyncError::network(peer);
        let mut source = file.take(size);
        let mut buf = io_buffer(self.index.block_size());
        let mut sent = 0u64;
        loop {
            let n = source.read(&mut buf).await.map_err(fs)?;
            if n == 0 {
                break;
            }
            timed(IO_TIMEOUT, "payload write", stream.write_all(&buf[..n]))
                .await
                .map_err(net)?;
            sent += n as u64;
            debug!(%peer, file = %filename, sent, size, "push progress");
        }
        if sent != size {
            // File shrank under us; the receiver sees a short stream and discards it.
            return Err(SyncError::SizeMismatch {
                filename: filename.to_string(),
                mismatch: lansync_core::chunk::SizeMismatch {
                    expected: size,
                    received: sent,
                },
            });
        }
        timed(IO_TIMEOUT, "payload flush", stream.shutdown())
            .await
            .map_err(net)?;
        // Only DONE means the receiver installed the file.
        let verdict = read_line(&mut stream, peer).await?;
        match PrepareReply::parse(&verdict)? {
            PrepareReply::Done => {}
            PrepareReply::Error(reason) => {
                return Err(SyncError::Refused {
                    filename: filename.to_string(),
                    reason,
                })
            }
            PrepareReply::Ready => return Err(ProtocolError::UnexpectedReply(verdict).into()),
        }
        info!(%peer, file = %filename, bytes = size, "file sent");
        Ok(size)
    }

    /// CHUNK pull: one request per block into a staging file, verified, then renamed into place.
    /// A non-empty `expected_hash` must match the assembled content.
    pub async fn pull(
        &self,
        peer: SocketAddr,
        filename: &str,
        size: u64,
        expected_hash: &str,
    ) -> Result<()> {
        let staging = self.index.path_of(&staging_name(filename));
        let pulled = self
            .pull_into(peer, filename, size, expected_hash, &staging)
            .await;
        if let Err(e) = pulled {
            if let Err(rm) = tokio::fs::remove_file(&staging).await {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %rm, "cannot remove staging file");
                }
            }
            return Err(e);
        }
        let target = self.index.path_of(filename);
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(SyncError::filesystem(&target)(e));
        }
        self.index.invalidate().await;
        info!(%peer, file = %filename, bytes = size, "file downloaded");
        Ok(())
    }

    async fn pull_into(
        &self,
        peer: SocketAddr,
        filename: &str,
        size: u64,
        expected_hash: &str,
        staging: &Path,
    ) -> Result<()> {
        let fs = SyncError::filesystem(staging);
        let mut file = File::create(staging).await.map_err(fs)?;
        debug!(
            %peer,
            file = %filename,
            blocks = block_count(size, self.index.block_size()),
            "pulling"
        );
        for block in split_into_blocks(size, self.index.block_size()) {
            let data = self.fetch_block(peer, filename, block).await?;
            file.seek(io::SeekFrom::Start(block.start))
                .await
                .map_err(fs)?;
            file.write_all(&data).await.map_err(fs)?;
        }
        file.flush().await.map_err(fs)?;
        file.sync_all().await.map_err(fs)?;
        drop(file);

        if !is_absent(expected_hash) {
            let path = staging.to_path_buf();
            let block_size = self.index.block_size();
            let actual = tokio::task::spawn_blocking(move || integrity::hash_file(&path, block_size))
                .await
                .map_err(|e| fs(io::Error::new(io::ErrorKind::Other, e)))?
                .map_err(fs)?;
            if actual != expected_hash {
                return Err(SyncError::HashMismatch {
                    filename: filename.to_string(),
                    expected: expected_hash.to_string(),
                    actual,
                });
            }
        }
        Ok(())
    }

    /// One CHUNK round trip on its own connection. Anything but the exact block length fails.
    async fn fetch_block(
        &self,
        peer: SocketAddr,
        filename: &str,
        block: BlockRange,
    ) -> Result<Vec<u8>> {
        let request = Request::Chunk {
            filename: filename.to_string(),
            block_index: block.index,
        };
        let mut stream = self.send_request(peer, &request).await?;
        let data = read_up_to(&mut stream, peer, block.len()).await?;
        if data.len() as u64 != block.len() {
            return Err(SyncError::ShortBlock {
                filename: filename.to_string(),
                index: block.index,
                expected: block.len(),
                received: data.len() as u64,
            });
        }
        debug!(%peer, file = %filename, block = block.index, bytes = data.len(), "received block");
        Ok(data)
    }
}

/// Read until `limit` bytes or end of stream, each read under [`IO_TIMEOUT`].
/// Grows the buffer as data arrives rather than trusting `limit` up front.
async fn read_up_to<R: AsyncRead + Unpin>(
    reader: &mut R,
    peer: SocketAddr,
    limit: u64,
) -> Result<Vec<u8>> {
    let net = SyncError::network(peer);
    let mut out = Vec::new();
    let mut buf = io_buffer(limit.max(1));
    while (out.len() as u64) < limit {
        let want = (limit - out.len() as u64).min(buf.len() as u64) as usize;
        let n = timed(IO_TIMEOUT, "payload read", reader.read(&mut buf[..want]))
            .await
            .map_err(net)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use lansync_core::integrity::hash_hex;
    use tokio::net::TcpListener;

    use crate::transport::tests::spawn_server;

    fn client_for(dir: &Path, block_size: u64) -> TransferClient {
        TransferClient::new(Arc::new(FileIndex::new(
            dir,
            block_size,
            Duration::from_secs(3600),
        )))
    }

    fn staging_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok()?.file_name().into_string().ok())
            .filter(|n| n.starts_with(lansync_core::STAGING_PREFIX))
            .count()
    }

    #[tokio::test]
    async fn fetch_listing_from_peer() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("a.txt"), b"hello").unwrap();
        let (addr, _index, _shutdown) = spawn_server(remote.path(), 1024).await;

        let listing = client_for(local.path(), 1024)
            .fetch_listing(addr)
            .await
            .unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing["a.txt"].hash, hash_hex(b"hello"));
        assert_eq!(listing["a.txt"].size, 5);
    }

    #[tokio::test]
    async fn push_then_remote_has_identical_content() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(local.path().join("data.bin"), &data).unwrap();
        let (addr, _index, _shutdown) = spawn_server(remote.path(), 1000).await;

        let sent = client_for(local.path(), 1000)
            .push(addr, "data.bin")
            .await
            .unwrap();
        assert_eq!(sent, 10_000);
        assert_eq!(std::fs::read(remote.path().join("data.bin")).unwrap(), data);
        assert_eq!(staging_entries(remote.path()), 0);
    }

    #[tokio::test]
    async fn push_of_missing_file_is_filesystem_error() {
        let local = tempfile::tempdir().unwrap();
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = client_for(local.path(), 1024)
            .push(peer, "gone.txt")
            .await
            .unwrap_err();
        assert!(err.is_missing_file());
    }

    #[tokio::test]
    async fn push_aborts_without_ready() {
        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.txt"), b"hello").unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            tokio::io::AsyncBufReadExt::read_line(&mut stream, &mut line)
                .await
                .unwrap();
            stream.write_all(b"NOPE\n").await.unwrap();
        });
        let err = client_for(local.path(), 1024)
            .push(addr, "a.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    /// Receiver that answers READY, reads `take` payload bytes, then sends `verdict` (if any) and hangs up.
    async fn scripted_receiver(take: usize, verdict: Option<&'static [u8]>) -> SocketAddr {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            tokio::io::AsyncBufReadExt::read_line(&mut stream, &mut line)
                .await
                .unwrap();
            stream.write_all(b"READY\n").await.unwrap();
            let mut payload = vec![0u8; take];
            stream.read_exact(&mut payload).await.unwrap();
            if let Some(verdict) = verdict {
                stream.write_all(verdict).await.unwrap();
                let mut rest = Vec::new();
                let _ = stream.read_to_end(&mut rest).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn push_fails_when_receiver_drops_mid_payload() {
        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("f.bin"), vec![5u8; 100]).unwrap();
        let addr = scripted_receiver(10, None).await;

        let pushed = client_for(local.path(), 1024).push(addr, "f.bin").await;
        assert!(pushed.is_err(), "{pushed:?}");
    }

    #[tokio::test]
    async fn push_fails_when_receiver_cannot_install() {
        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("f.bin"), vec![5u8; 100]).unwrap();
        let addr = scripted_receiver(100, Some(b"ERROR:cannot install file\n")).await;

        let err = client_for(local.path(), 1024)
            .push(addr, "f.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Refused { .. }), "{err}");
    }

    #[tokio::test]
    async fn pull_multi_block_file() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let data: Vec<u8> = (0..2500u32).map(|i| (i % 199) as u8).collect();
        std::fs::write(remote.path().join("big.bin"), &data).unwrap();
        let (addr, _index, _shutdown) = spawn_server(remote.path(), 1000).await;

        client_for(local.path(), 1000)
            .pull(addr, "big.bin", 2500, &hash_hex(&data))
            .await
            .unwrap();
        assert_eq!(std::fs::read(local.path().join("big.bin")).unwrap(), data);
        assert_eq!(staging_entries(local.path()), 0);
    }

    #[tokio::test]
    async fn pull_zero_byte_file_sends_no_requests() {
        let local = tempfile::tempdir().unwrap();
        // Nothing listens here: any block request would fail.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        client_for(local.path(), 1024)
            .pull(addr, "empty.txt", 0, &hash_hex(b""))
            .await
            .unwrap();
        let meta = std::fs::metadata(local.path().join("empty.txt")).unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[tokio::test]
    async fn pull_from_unreachable_peer_leaves_nothing() {
        let local = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client_for(local.path(), 1024)
            .pull(addr, "a.txt", 10, "")
            .await
            .unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Network);
        assert!(!local.path().join("a.txt").exists());
        assert_eq!(staging_entries(local.path()), 0);
    }

    #[tokio::test]
    async fn pull_short_block_is_discarded() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        // Advertised 3000 bytes, peer only has 1500.
        std::fs::write(remote.path().join("f.bin"), vec![1u8; 1500]).unwrap();
        let (addr, _index, _shutdown) = spawn_server(remote.path(), 1000).await;

        let err = client_for(local.path(), 1000)
            .pull(addr, "f.bin", 3000, "")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ShortBlock { index: 1, .. }));
        assert!(!local.path().join("f.bin").exists());
        assert_eq!(staging_entries(local.path()), 0);
    }

    #[tokio::test]
    async fn pull_with_wrong_hash_is_discarded() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        std::fs::write(remote.path().join("a.txt"), b"hello").unwrap();
        let (addr, _index, _shutdown) = spawn_server(remote.path(), 1024).await;

        let err = client_for(local.path(), 1024)
            .pull(addr, "a.txt", 5, &hash_hex(b"other"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::HashMismatch { .. }));
        assert!(!local.path().join("a.txt").exists());
    }
}
