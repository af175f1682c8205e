use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::DropGuard;

use crate::{Result, Router, ServerConfig, State};

/// Serves batches on `POST /` and subscriptions on WebSocket upgrades of `GET /`.
///
/// # Examples
///
/// ```rust,no_run
/// # use tyrpc::{RequestArgs, RequestEndpoint, Router, Schema, Server, ServerConfig, Type};
/// # use std::{net::SocketAddr, str::FromStr};
/// # #[tokio::main]
/// # async fn main() {
/// let mut router = Router::default();
/// router.add_request(
///     "hello",
///     RequestEndpoint::new(|args: RequestArgs| async move {
///         let name = args.params.field("name").as_str().unwrap_or_default().to_string();
///         Ok(format!("Hello, {name}!"))
///     })
///     .params(Schema::new().field("name", Type::string()))
///     .result(Type::string()),
/// );
///
/// let server = Server::create(router, &ServerConfig::default()).unwrap();
/// let addr = SocketAddr::from_str("127.0.0.1:8000").unwrap();
/// server.listen(addr).await.unwrap();
/// server.join().await;
/// # }
/// ```
pub struct Server {
    state: Arc<State>,
    _drop_guard: DropGuard,
}

impl Server {
    /// Creates a server around a filled registry.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn create(router: Router, config: &ServerConfig) -> Result<Self> {
        let state = State::create(router, config)?;
        let drop_guard = state.supervisor.drop_guard();
        Ok(Self {
            state,
            _drop_guard: drop_guard,
        })
    }

    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.state.router
    }

    /// Starts accepting connections on `addr`.
    ///
    /// Returns the bound address, which differs from `addr` when port 0 was
    /// requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn listen(&self, addr: SocketAddr) -> Result<SocketAddr> {
        crate::listener::start_listen(&self.state, addr).await
    }

    /// Stops accepting and closes every connection. Subscriptions of closed
    /// connections are destroyed.
    pub fn stop(&self) {
        tracing::info!("stop server");
        self.state.supervisor.stop();
    }

    /// Waits until every connection task has finished after [`stop`](Self::stop).
    pub async fn join(&self) {
        self.state.supervisor.all_stopped().await;
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("state", &self.state).finish()
    }
}
