use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;

/// Whether a TCP connection to `addr` succeeds within `wait`.
pub async fn check_tcp_connectivity(addr: SocketAddr, wait: Duration) -> bool {
    match timeout(wait, tokio::net::TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            tracing::debug!(%addr, error = %err, "probe connection failed");
            false
        }
        Err(_) => {
            tracing::debug!(%addr, "probe timed out");
            false
        }
    }
}
