//! EAP Engine
//!
//! Session-aware EAP authenticator built on top of the `eap-proto` wire
//! formats.
//!
//! # Features
//!
//! - Async request handling with Tokio
//! - EAP-TLS and PEAPv0 over a per-session rustls task, with fragmentation
//!   and MPPE key export
//! - Identity, Legacy-Nak, GTC and MSCHAPv2 methods
//! - Pluggable session store and credential verifiers
//! - RADIUS adapter with Message-Authenticator and Response Authenticator
//! - JSON configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use eap_engine::{EapEngine, EngineConfig, MemoryStateManager, MethodConfiguration, RadiusAdapter, RadiusServer};
//! use eap_engine::engine::build_method_table;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_file("eap-engine.json")?;
//!
//!     let store = MemoryStateManager::new(MethodConfiguration::new(config.method_priority.clone()))
//!         .with_ttl(config.session_ttl());
//!     let engine = EapEngine::new(Arc::new(store), Arc::new(build_method_table(&config)?));
//!     let adapter = Arc::new(RadiusAdapter::new(Arc::new(engine)));
//!
//!     let server = RadiusServer::new(config.socket_addr()?, adapter, config.secret.clone()).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod conversation;
pub mod engine;
pub mod methods;
pub mod radius;
pub mod server;
pub mod state;
pub mod tunnel;
pub mod verifier;

pub use config::{ConfigError, EngineConfig, TlsSettings, UserEntry};
pub use conversation::{Conversation, Step};
pub use engine::{EapEngine, EngineError, Outcome};
pub use methods::{MethodError, MethodHandler, MethodTable};
pub use radius::{AdapterError, RadiusAdapter};
pub use server::{RadiusServer, ServerError};
pub use state::{
    MemoryStateManager, MethodConfiguration, MethodContext, SessionKeys, SessionState,
    StateError, StateManager, Status,
};
pub use tunnel::{TunnelError, TunnelSettings, TunnelState};
pub use verifier::{
    ChallengeVerifier, CredentialVerifier, PeerIdentity, StaticVerifier, Verdict, VerifierError,
};
