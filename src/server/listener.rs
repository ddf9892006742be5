//! Relay server listener
//!
//! Serves WebSocket viewers and the JSON API over one HTTP listener.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::{api, websocket};
use crate::session::SessionManager;
use crate::transcode::Transcoder;

/// State shared by all request handlers
pub(crate) struct ServerState<T: Transcoder> {
    pub(crate) manager: Arc<SessionManager<T>>,
    pub(crate) config: Arc<ServerConfig>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<T: Transcoder> Clone for ServerState<T> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            config: Arc::clone(&self.config),
            connection_semaphore: self.connection_semaphore.clone(),
        }
    }
}

impl<T: Transcoder> ServerState<T> {
    /// Take a viewer slot; `Ok(None)` when connections are unlimited
    pub(crate) fn try_acquire_connection(
        &self,
    ) -> std::result::Result<Option<OwnedSemaphorePermit>, ()> {
        match self.connection_semaphore {
            Some(ref sem) => sem.clone().try_acquire_owned().map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }
}

/// RTSP-to-WebSocket relay server
pub struct RelayServer<T: Transcoder> {
    config: Arc<ServerConfig>,
    manager: Arc<SessionManager<T>>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<T: Transcoder> RelayServer<T> {
    /// Create a new server around a session manager
    pub fn new(config: ServerConfig, manager: Arc<SessionManager<T>>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            manager,
            connection_semaphore,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager<T>> {
        &self.manager
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let state = ServerState {
            manager: Arc::clone(&self.manager),
            config: Arc::clone(&self.config),
            connection_semaphore: self.connection_semaphore.clone(),
        };

        Router::new()
            .route("/", get(websocket::viewer_by_query::<T>))
            .route("/ws", get(websocket::viewer_by_query::<T>))
            .route("/ws/{stream}", get(websocket::viewer_by_path::<T>))
            .merge(api::routes::<T>())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    ///
    /// On shutdown every viewer is closed and every session ended before
    /// this returns.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "Relay server listening");

        // Spawn cleanup task for idle sessions
        let cleanup_handle = self.manager.spawn_cleanup_task();

        let manager = Arc::clone(&self.manager);
        let shutdown_timeout = self.config.shutdown_timeout;
        let signal = async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            // Closing viewers ends their connections so the server can drain
            if tokio::time::timeout(shutdown_timeout, manager.shutdown())
                .await
                .is_err()
            {
                tracing::warn!("Sessions did not shut down in time");
            }
        };

        let result = axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await;

        // Stop cleanup task on shutdown
        cleanup_handle.abort();

        result.map_err(Into::into)
    }
}
