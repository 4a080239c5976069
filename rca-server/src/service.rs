//! Stream server core logic.
//!
//! Accepts client connections and runs one registry per connection
//! until the client goes away or the server is stopped.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use rca_core::stream::source::shared;
use rca_core::{Connection, EncodePool, RcaError, SchedulerConfig, StreamRegistry, ViewAdapter};

use crate::config::ServerConfig;
use crate::pattern::PatternSource;

// ── RcaServer ────────────────────────────────────────────────────

/// The top-level stream server.
pub struct RcaServer {
    config: ServerConfig,
    running: Arc<AtomicBool>,
}

impl RcaServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for stopping the server from another task. Store `false`
    /// to stop accepting connections.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, RcaError> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!("RCA server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until stopped.
    pub async fn run(&self) -> Result<(), RcaError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept clients on `listener` until stopped.
    ///
    /// Each connection is served on its own task with its own registry;
    /// a failing session never affects the others.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RcaError> {
        // Fail before accepting anyone if the stream settings are unusable.
        let scheduler_config = self.config.to_scheduler_config()?;
        let pool = self.config.encode_pool();
        self.running.store(true, Ordering::SeqCst);

        while self.running.load(Ordering::SeqCst) {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            info!("client connected from {peer}");
            let session = Session {
                config: self.config.clone(),
                scheduler_config: scheduler_config.clone(),
                pool: Arc::clone(&pool),
            };
            tokio::spawn(async move {
                if let Err(e) = session.run(stream, peer).await {
                    error!("session with {peer} failed: {e}");
                }
            });
        }

        self.running.store(false, Ordering::SeqCst);
        info!("RCA server stopped");
        Ok(())
    }

    /// Signal the server to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// Everything one connection needs to build its areas.
struct Session {
    config: ServerConfig,
    scheduler_config: SchedulerConfig,
    pool: Arc<EncodePool>,
}

impl Session {
    async fn run(self, stream: TcpStream, peer: SocketAddr) -> Result<(), RcaError> {
        stream.set_nodelay(true)?;
        let connection = Connection::with_capacity(stream, self.config.network.outbound_queue);
        let (outbound, inbound) = connection.into_split();
        let registry = StreamRegistry::new(outbound);

        let areas = &self.config.areas;
        for (index, name) in areas.names.iter().enumerate() {
            let source = shared(PatternSource::new(
                areas.pattern_width,
                areas.pattern_height,
                (index as u8).wrapping_mul(40),
            ));
            let view = match ViewAdapter::new(
                name.as_str(),
                source,
                self.scheduler_config.clone(),
                Arc::clone(&self.pool),
            ) {
                Ok(view) => view,
                Err(e) => {
                    registry.close_all().await;
                    return Err(e);
                }
            };
            view.set_render_on_interaction(self.config.stream.render_on_interaction);
            registry.register_area(view);
        }

        registry.serve(inbound).await;
        info!("session with {peer} ended");
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rca_core::{ConnectionInfo, InteractionEvent, SizeSpec, StreamClient};

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.network.port = 0;
        config.stream.target_fps = 20.0;
        config.stream.encode_workers = 2;
        config.areas.names = vec!["left".into(), "right".into()];
        config.areas.pattern_width = 64;
        config.areas.pattern_height = 48;
        config
    }

    async fn start(config: ServerConfig) -> (Arc<RcaServer>, ConnectionInfo) {
        let server = Arc::new(RcaServer::new(config));
        let listener = server.bind().await.unwrap();
        let info = ConnectionInfo::from(listener.local_addr().unwrap());
        let task_server = Arc::clone(&server);
        tokio::spawn(async move { task_server.serve(listener).await.unwrap() });
        (server, info)
    }

    #[tokio::test]
    async fn serves_configured_areas() {
        let (server, info) = start(test_config()).await;

        let mut client = StreamClient::connect(&info).await.unwrap();
        client
            .update_size("right", "test", SizeSpec::new(50.0, 40.0, 1.0))
            .await
            .unwrap();
        client
            .send_event("right", "test", &InteractionEvent::new("MouseMove").with("x", 4).with("y", 4))
            .await
            .unwrap();

        let frame = client.next_frame(Duration::from_secs(5)).await.expect("no frame");
        assert_eq!(frame.name, "right");
        assert_eq!((frame.meta.w, frame.meta.h), (50, 40));
        assert_eq!(frame.meta.mime_type, "image/jpeg");

        server.stop();
    }

    #[tokio::test]
    async fn bad_encoder_fails_before_accepting() {
        let mut config = test_config();
        config.stream.encoder = "bmp".into();
        let server = RcaServer::new(config);
        let listener = server.bind().await.unwrap();
        assert!(matches!(
            server.serve(listener).await,
            Err(RcaError::Configuration(_))
        ));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn stop_ends_accept_loop() {
        let server = Arc::new(RcaServer::new(test_config()));
        let listener = server.bind().await.unwrap();
        let task_server = Arc::clone(&server);
        let task = tokio::spawn(async move { task_server.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.is_running());
        server.stop();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
