use log::{debug, info};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use crate::utils::{ChatError, Result};

/// Bind a listener on an OS-assigned ephemeral port and report the port
/// back for the ACP reply. Binding to port 0 replaces any kind of
/// probe-and-retry port search.
pub async fn bind_ephemeral() -> Result<(TcpListener, u16)> {
    let listener = TcpListener::bind("0.0.0.0:0").await?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Accept exactly one connection and stream it to `dest` until the peer
/// closes. If no connection arrives within `accept_timeout` the listen is
/// abandoned and reported as a failure.
pub async fn download(
    listener: TcpListener,
    dest: &Path,
    accept_timeout: Duration,
    chunk_size: usize,
) -> Result<u64> {
    let (mut stream, peer) = timeout(accept_timeout, listener.accept())
        .await
        .map_err(|_| {
            ChatError::Transfer("no inbound connection before the accept timeout".to_string())
        })??;
    drop(listener);
    info!("downloading from {} into {:?}", peer, dest);

    let mut file = File::create(dest).await?;
    let mut buf = vec![0u8; chunk_size];
    let mut received = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        received += n as u64;
    }
    file.flush().await?;

    debug!("download from {} done, {} bytes", peer, received);
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::uploader;
    use std::net::SocketAddr;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lanchat-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn streamed_file_arrives_byte_identical() {
        let source = scratch("upload-src.bin");
        let dest = scratch("upload-dst.bin");
        // Larger than one chunk so the loop iterates.
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&source, &payload).await.unwrap();

        let (listener, port) = bind_ephemeral().await.unwrap();
        let dest_task = dest.clone();
        let receiver = tokio::spawn(async move {
            download(listener, &dest_task, Duration::from_secs(5), 4096).await
        });

        let target: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        let sent = uploader::upload(&source, target, 4096).await.unwrap();
        let received = receiver.await.unwrap().unwrap();

        assert_eq!(sent, payload.len() as u64);
        assert_eq!(received, sent);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), payload);

        let _ = tokio::fs::remove_file(&source).await;
        let _ = tokio::fs::remove_file(&dest).await;
    }

    #[tokio::test]
    async fn accept_timeout_abandons_the_listen() {
        let (listener, _port) = bind_ephemeral().await.unwrap();
        let dest = scratch("never-written.bin");
        let result = download(listener, &dest, Duration::from_millis(50), 4096).await;
        assert!(matches!(result, Err(ChatError::Transfer(_))));
        assert!(!dest.exists());
    }
}
