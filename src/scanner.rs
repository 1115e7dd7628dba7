use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An accepted TCP connection found by [`sweep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSocket {
    pub ip: IpAddr,
    pub port: u16,
    pub banner: Option<String>,
}

/// Sweep every target/port pair with asynchronous TCP connects.
///
/// - Limits concurrent socket attempts using a `Semaphore`.
/// - Uses `tokio::time::timeout` to bound connect time per socket.
/// - On successful connect, attempts a short, passive banner grab (up to 256 bytes, 200ms timeout).
/// - Stops queueing new attempts once `cancel` fires; attempts already started finish.
///
/// Results are sorted by address then port.
pub async fn sweep(
    targets: &[IpAddr],
    ports: &[u16],
    concurrency: usize,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Vec<OpenSocket> {
    let sem = Arc::new(Semaphore::new(concurrency.clamp(1, 5_000)));
    let mut set = JoinSet::new();

    'targets: for &ip in targets {
        for &port in ports {
            if cancel.is_cancelled() {
                debug!("sweep cancelled, not queueing further sockets");
                break 'targets;
            }
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break 'targets;
            };
            set.spawn(async move {
                let _permit = permit; // keep permit until task completes
                probe(SocketAddr::new(ip, port), timeout).await
            });
        }
    }

    let mut open = Vec::new();
    while let Some(res) = set.join_next().await {
        if let Ok(Some(socket)) = res {
            open.push(socket);
        }
    }
    open.sort_by(|a, b| (a.ip, a.port).cmp(&(b.ip, b.port)));
    open
}

async fn probe(addr: SocketAddr, timeout: Duration) -> Option<OpenSocket> {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(mut stream)) => {
            let banner = read_banner(&mut stream).await;
            Some(OpenSocket {
                ip: addr.ip(),
                port: addr.port(),
                banner,
            })
        }
        // Closed, filtered, or timed out.
        _ => None,
    }
}

/// Read up to 256 bytes with a short timeout, as lossy UTF-8 with line breaks escaped.
async fn read_banner(stream: &mut TcpStream) -> Option<String> {
    let mut buf = vec![0u8; 256];
    match time::timeout(Duration::from_millis(200), stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            let s = String::from_utf8_lossy(&buf).trim_end().to_string();
            Some(s.replace('\n', "\\n").replace('\r', "\\r"))
        }
        _ => None,
    }
}
