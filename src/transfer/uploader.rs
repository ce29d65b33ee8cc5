use log::{debug, info};
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::utils::Result;

/// Stream `source` to the accepted TCP port in fixed-size chunks until EOF.
/// The connection close is the end-of-file marker; there is no framing and
/// no checksum beyond what TCP provides.
pub async fn upload(source: &Path, target: SocketAddr, chunk_size: usize) -> Result<u64> {
    let mut file = File::open(source).await?;
    let mut stream = TcpStream::connect(target).await?;
    info!("uploading {:?} to {}", source, target);

    let mut buf = vec![0u8; chunk_size];
    let mut sent = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stream.write_all(&buf[..n]).await?;
        sent += n as u64;
    }
    stream.flush().await?;
    stream.shutdown().await?;

    debug!("upload to {} done, {} bytes", target, sent);
    Ok(sent)
}
