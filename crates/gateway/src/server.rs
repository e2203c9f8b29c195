use std::{any::Any, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Json, Response},
        routing::{get, post},
    },
    scriptgate_config::GatewayConfig,
    scriptgate_host::Capabilities,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{self, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{debug, error, info},
};

use crate::{discovery, dynamic, mcp, rpc, state::GatewayState};

/// How often expired tool-protocol sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
///
/// Fixed routes win; every other path is an operation name handled by the
/// dynamic-route adapter (including streaming upgrades).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods(cors::Any)
        .allow_headers(cors::Any);

    Router::new()
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .route("/health", get(health_handler))
        .route("/nyan", get(discovery::summary))
        .route("/nyan/{api}", get(discovery::detail))
        .route("/nyan-rpc", post(rpc::handle))
        .route(
            "/mcp",
            post(mcp::handle_post)
                .get(mcp::handle_get)
                .delete(mcp::handle_delete),
        )
        .fallback(dynamic::handle)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ── Server startup ───────────────────────────────────────────────────────────

/// Start the gateway HTTP (or HTTPS) server and serve until it fails.
pub async fn start_gateway(config: GatewayConfig) -> anyhow::Result<()> {
    let capabilities =
        Capabilities::from_config(&config).context("failed to build script capabilities")?;
    let state = GatewayState::new(&config, capabilities);

    let manifest_path = config.scripts.manifest_path();
    let operations = match state.dispatcher.load_manifest().await {
        Ok(m) => format!("{} operations", m.len()),
        Err(e) => format!("manifest unavailable ({e})"),
    };

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let tls = tls_paths(&config);

    // Startup banner.
    let lines = [
        format!("scriptgate v{}", state.version),
        format!(
            "{} {}, listening on {}://{}",
            state.identity.name,
            state.identity.version,
            if tls.is_some() { "https" } else { "http" },
            addr
        ),
        format!("manifest: {} ({operations})", manifest_path.display()),
        format!(
            "mail: {}",
            if config.smtp.is_configured() {
                config.smtp.host.as_str()
            } else {
                "not configured"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    // Spawn session sweeper.
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = sweep_state.sessions.purge_expired();
            if removed > 0 {
                debug!(removed, "expired mcp sessions purged");
            }
        }
    });

    let app = build_gateway_app(state);

    match tls {
        Some((cert, key)) => serve_tls(app, addr, cert, key).await,
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            // ConnectInfo feeds `_remote_ip`.
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await?;
            Ok(())
        },
    }
}

/// Cert and key resolved against the deployment root.
fn tls_paths(config: &GatewayConfig) -> Option<(PathBuf, PathBuf)> {
    let (cert, key) = config.server.tls_pair()?;
    let root = &config.scripts.root;
    Some((root.join(cert), root.join(key)))
}

#[cfg(feature = "tls")]
async fn serve_tls(app: Router, addr: SocketAddr, cert: PathBuf, key: PathBuf) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    // Only the first install wins; later calls report the existing provider.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let tls = RustlsConfig::from_pem_file(&cert, &key)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS certificate {} / key {}",
                cert.display(),
                key.display()
            )
        })?;
    axum_server::bind_rustls(addr, tls)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}

#[cfg(not(feature = "tls"))]
async fn serve_tls(_: Router, _: SocketAddr, _: PathBuf, _: PathBuf) -> anyhow::Result<()> {
    anyhow::bail!("cert_path/key_path are set but this build has no TLS support (enable the `tls` feature)")
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "channels": state.push().len(),
        "sessions": state.sessions.len(),
    }))
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "request handler panicked");
    dynamic::error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
