use std::{net::SocketAddr, sync::Arc};

use crate::{Result, State};

/// Binds `addr` and accepts connections on the server's supervisor until it
/// stops. Returns the bound address.
pub(crate) async fn start_listen(state: &Arc<State>, addr: SocketAddr) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let listener_addr = listener.local_addr()?;

    let accept_state = state.clone();
    state.supervisor.spawn(async move {
        tracing::info!("start listening: {listener_addr}");
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    tracing::debug!("accept connection from {addr}");
                    crate::http::serve_connection(&accept_state, stream, addr);
                }
                Err(e) => {
                    tracing::error!("accept on {listener_addr} failed: {e}");
                    break;
                }
            }
        }
    });

    Ok(listener_addr)
}
