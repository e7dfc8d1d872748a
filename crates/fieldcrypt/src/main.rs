//! `fieldcrypt`: demo gateway binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (tracing, optional OTLP).
//! 3. Load the key ring; a missing active key is fatal.
//! 4. Load the field policy and check route ownership.
//! 5. Build the codec, boundary adapters and record store.
//! 6. Build the Axum router and start the server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use fieldcrypt::boundary::{EncryptedStore, HttpInterceptor, MemoryStore, PersistenceHook, RouteMap};
use fieldcrypt::codec::ObjectCodec;
use fieldcrypt::config::Config;
use fieldcrypt::crypto::CipherEngine;
use fieldcrypt::keys::KeyManager;
use fieldcrypt::server::{self, state::AppState};
use fieldcrypt::{policy, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen_port = cfg.listen_port,
        "fieldcrypt starting"
    );

    // -----------------------------------------------------------------------
    // 3. Key ring
    // -----------------------------------------------------------------------
    let keys = KeyManager::from_config(&cfg).context("failed to load encryption keys")?;
    info!(
        active_key_id = %cfg.active_key_id,
        keys_loaded = keys.len(),
        "key ring loaded"
    );

    // -----------------------------------------------------------------------
    // 4. Field policy
    // -----------------------------------------------------------------------
    let (doc, classifier) = policy::load(&cfg.field_policy_path, cfg.default_boundary)?;
    let classifier = Arc::new(classifier);
    let routes = RouteMap::from_document(&doc);

    // -----------------------------------------------------------------------
    // 5. Codec and boundary adapters
    // -----------------------------------------------------------------------
    let codec = ObjectCodec::new(classifier.clone(), CipherEngine::new(keys.clone()));
    let interceptor = HttpInterceptor::new(codec.clone(), routes, cfg.max_body_bytes)
        .context("invalid route configuration")?;
    info!(routes = interceptor.routes().len(), "http interceptor configured");
    let store = EncryptedStore::new(Arc::new(MemoryStore::new()), PersistenceHook::new(codec));

    // -----------------------------------------------------------------------
    // 6. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(keys, classifier, store, interceptor);
    let router = server::router::build(state);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.listen_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, router).await?;

    Ok(())
}
