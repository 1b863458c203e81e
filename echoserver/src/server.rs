//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module fournit une abstraction simple pour créer des serveurs HTTP
//! avec Axum, en cachant la complexité de la configuration et du routage.
//!
//! ## Fonctionnalités
//!
//! - **Routes JSON simples** : endpoints API avec `add_route()`
//! - **Handlers personnalisés** : streaming, SSE, etc. avec `add_handler_with_state()`
//! - **Sous-routers** : montage d'un `Router` complet avec `add_router()`
//! - **Arrêt gracieux** : sur Ctrl+C ou via le jeton d'arrêt du serveur

use crate::logs::{LogState, LoggingOptions, create_logs_router, init_logging, log_dump, log_sse};
use anyhow::{Context, Result};
use axum::handler::Handler;
use axum::routing::get;
use axum::{Json, Router};
use echoconfig::Config;
use serde::Serialize;
use std::future::Future;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Délai laissé aux connexions ouvertes après la demande d'arrêt
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Info serveur sérialisable
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub listen_host: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    listen_host: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
    log_state: Option<LogState>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `listen_host` - Adresse d'écoute (ex: "0.0.0.0")
    /// * `http_port` - Port HTTP à écouter
    pub fn new(name: impl Into<String>, listen_host: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            listen_host: listen_host.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
            log_state: None,
            shutdown: CancellationToken::new(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn new_configured(config: &Config) -> Self {
        ServerBuilder::new_configured(config).build()
    }

    /// Ajoute une route JSON dynamique
    ///
    /// La closure fournie sera appelée à chaque requête GET sur le chemin spécifié.
    ///
    /// ```rust,no_run
    /// # use echoserver::Server;
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let mut server = Server::new("Test", "127.0.0.1", 3000);
    /// server.add_route("/info", || async {
    ///     serde_json::json!({"version": "1.0.0"})
    /// }).await;
    /// # }
    /// ```
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };

        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler Axum standard
    pub async fn add_handler<H, T>(&mut self, path: &str, handler: H)
    where
        H: Handler<T, ()> + Clone + 'static,
        T: 'static,
    {
        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler avec état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Ajoute un router complet au chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let normalized = if path == "/" {
            "/".to_string()
        } else {
            format!("/{}", path.trim_start_matches('/'))
        };
        self.mount(&normalized, sub_router).await;
    }

    async fn mount(&mut self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            std::mem::take(&mut *r).nest(path, route)
        };
    }

    /// Snapshot du router courant (utile pour les tests avec `tower::ServiceExt`)
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Jeton annulé lorsque le serveur s'arrête (Ctrl+C ou [`Server::shutdown`])
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Demande l'arrêt gracieux du serveur
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Démarre le serveur HTTP
    ///
    /// Lie le port configuré puis sert les requêtes dans une tâche de fond
    /// jusqu'à Ctrl+C ou l'annulation du jeton d'arrêt.
    pub async fn start(&mut self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.listen_host, self.http_port)
            .parse()
            .with_context(|| {
                format!("Invalid listen address {}:{}", self.listen_host, self.http_port)
            })?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        // port 0 : on garde le port réellement attribué
        let addr = listener.local_addr().unwrap_or(addr);
        self.http_port = addr.port();

        info!("Server {} running at http://{}", self.name, addr);

        let router = self.router.read().await.clone();
        let shutdown = self.shutdown.clone();
        let grace_token = self.shutdown.clone();
        let grace = self.shutdown_grace;

        let ctrl_c_token = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Ctrl+C reçu, arrêt gracieux"),
                        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
                    }
                    ctrl_c_token.cancel();
                }
                _ = ctrl_c_token.cancelled() => {}
            }
        });

        // Les flux sans fin (audio, SSE) ne doivent pas bloquer l'arrêt
        self.join_handle = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .into_future();
            tokio::select! {
                result = serve => {
                    if let Err(e) = result {
                        error!("HTTP server terminated with error: {}", e);
                    }
                }
                _ = async {
                    grace_token.cancelled().await;
                    tokio::time::sleep(grace).await;
                } => {
                    warn!("Connections still open {:?} after shutdown, dropping them", grace);
                }
            }
        }));

        Ok(())
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            listen_host: self.listen_host.clone(),
            http_port: self.http_port,
        }
    }

    /// Initialise le système de logging et enregistre les routes de logs
    ///
    /// Routes enregistrées : `/log-sse`, `/log-dump` et `/api/log_setup`.
    pub async fn init_logging(&mut self, options: LoggingOptions) -> Result<LogState> {
        let log_state = init_logging(options)?;
        self.register_log_routes(log_state.clone()).await;
        Ok(log_state)
    }

    /// Enregistre les routes de logs pour un `LogState` existant
    pub async fn register_log_routes(&mut self, log_state: LogState) {
        self.add_handler_with_state("/log-sse", log_sse, log_state.clone())
            .await;
        self.add_handler_with_state("/log-dump", log_dump, log_state.clone())
            .await;
        self.add_router("/api", create_logs_router(log_state.clone()))
            .await;

        self.log_state = Some(log_state);
    }

    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    listen_host: String,
    http_port: u16,
    shutdown_grace: Duration,
}

impl ServerBuilder {
    /// Crée un nouveau builder
    pub fn new(name: impl Into<String>, listen_host: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            listen_host: listen_host.into(),
            http_port,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn new_configured(config: &Config) -> Self {
        Self {
            name: "EchoRadio".to_string(),
            listen_host: config
                .get_listen_host()
                .unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: config.get_http_port(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn listen_host(mut self, host: impl Into<String>) -> Self {
        self.listen_host = host.into();
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Temps accordé aux connexions encore ouvertes lors de l'arrêt
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        let mut server = Server::new(self.name, self.listen_host, self.http_port);
        server.shutdown_grace = self.shutdown_grace;
        server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_add_route_serves_json() {
        let mut server = ServerBuilder::new("Test", "127.0.0.1", 0).build();
        server
            .add_route("/info", || async { serde_json::json!({"version": "1.0.0"}) })
            .await;

        let response = server
            .router()
            .await
            .oneshot(Request::get("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let server = ServerBuilder::new("Test", "127.0.0.1", 0).build();
        let response = server
            .router()
            .await
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mut server = ServerBuilder::new("Test", "127.0.0.1", 0).build();
        server.start().await.unwrap();
        server.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(5), server.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_reports_bound_port() {
        let mut server = ServerBuilder::new("Test", "127.0.0.1", 0).build();
        server.start().await.unwrap();
        assert_ne!(server.info().http_port, 0);
        server.shutdown();
        server.wait().await;
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_endless_bodies() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let mut server = ServerBuilder::new("Test", "127.0.0.1", 0)
            .shutdown_grace(Duration::from_millis(200))
            .build();
        server
            .add_handler("/forever", || async {
                // un octet, puis plus rien
                axum::body::Body::from_stream(async_stream::stream! {
                    yield Ok::<&'static [u8], std::io::Error>(b"x");
                    std::future::pending::<()>().await;
                })
            })
            .await;
        server.start().await.unwrap();

        let port = server.info().http_port;
        let mut client = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        client
            .write_all(b"GET /forever HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 200"));

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), server.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_builder_overrides() {
        let server = ServerBuilder::new("A", "0.0.0.0", 80)
            .name("B")
            .listen_host("127.0.0.1")
            .http_port(9000)
            .build();
        let info = server.info();
        assert_eq!(info.name, "B");
        assert_eq!(info.listen_host, "127.0.0.1");
        assert_eq!(info.http_port, 9000);
    }
}
