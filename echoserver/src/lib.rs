//! # echoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour exposer les routes HTTP
//! d'EchoRadio (flux audio, état de lecture, logs).
//!
//! ## Fonctionnalités
//!
//! - **API de haut niveau** : interface simple pour monter des routes Axum
//! - **Server-Sent Events (SSE)** : logs en temps réel via `/log-sse`
//! - **Arrêt gracieux** : Ctrl+C ou jeton d'annulation partagé
//!
//! ## Architecture
//!
//! - [`server`] : implémentation du serveur principal et du builder
//! - [`logs`] : système de logs (tracing + SSE) pour le monitoring
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use echoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyServer", "0.0.0.0", 8080).build();
//!     server.init_logging(LoggingOptions::default()).await?;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo};
