mod broadcast;
mod catalogue;
mod download;
mod router;
mod session;
mod state;
mod status;
mod web;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State as AxumState;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use broadcaster_protocol::config::CoordinatorConfig;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use catalogue::SqliteCatalogueStore;
use state::CoordinatorState;
use web::{RadioNames, SessionAuthenticator, StaticTokenAuthenticator};

/// Log lines the coordinator forwards to the admin web view, mirroring the
/// teacher's `BroadcastMessage::Log` forwarding but repurposed: there the
/// destination is a TUI log panel, here it is any connected admin websocket.
#[derive(Debug, Clone)]
struct AdminLogLine(String);

/// A custom tracing layer that forwards WARN/ERROR events onto a broadcast
/// channel so the admin web view can show operational problems without the
/// administrator tailing the coordinator's own log file.
struct BroadcastLogLayer {
    sender: broadcast::Sender<AdminLogLine>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        let _ = self.sender.send(AdminLogLine(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{value:?}"));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[derive(Clone)]
struct AdminState {
    coordinator: Arc<CoordinatorState>,
    radio_names: RadioNames,
    authenticator: Arc<dyn SessionAuthenticator>,
    admin_log: broadcast::Sender<AdminLogLine>,
}

async fn web_status_ws(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<AdminState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        web::run_web_subscriber(
            socket,
            state.coordinator.server_status.clone(),
            state.radio_names.clone(),
            state.authenticator.clone(),
        )
    })
}

async fn admin_log_ws(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<AdminState>,
) -> impl IntoResponse {
    let mut rx = state.admin_log.subscribe();
    ws.on_upgrade(move |mut socket| async move {
        use axum::extract::ws::Message as WsMessage;
        while let Ok(AdminLogLine(line)) = rx.recv().await {
            if socket.send(WsMessage::Text(line)).await.is_err() {
                break;
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (admin_log_tx, _) = broadcast::channel::<AdminLogLine>(256);

    let data_dir = broadcaster_protocol::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("coordinator.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let broadcast_layer = BroadcastLogLayer {
        sender: admin_log_tx.clone(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,broadcaster_coordinator=debug")
            }),
        )
        .init();

    info!("log file: {:?}", log_path);

    let config = CoordinatorConfig::load()?;
    info!("config loaded from {:?}", CoordinatorConfig::config_path());

    let store = SqliteCatalogueStore::open(&config.database_path, &config.audio_files_path)?;
    let coordinator = Arc::new(CoordinatorState::new(Arc::new(store)));
    coordinator.refresh_radio_names().await?;

    let admin_state = AdminState {
        coordinator: coordinator.clone(),
        radio_names: coordinator.radio_names.clone(),
        authenticator: Arc::new(StaticTokenAuthenticator::new(std::iter::empty())),
        admin_log: admin_log_tx,
    };

    let http_router = Router::new()
        .merge(download::router(config.audio_files_path.clone()))
        .route("/web-status-ws", get(web_status_ws))
        .route("/admin-log-ws", get(admin_log_ws))
        .with_state(admin_state);

    let http_bind = config.http_bind.clone();
    let _http_handle = tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&http_bind).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("failed to bind HTTP server on {http_bind}: {e}");
                return;
            }
        };
        info!("HTTP server listening on http://{http_bind}");
        if let Err(e) = axum::serve(listener, http_router).await {
            tracing::error!("HTTP server error: {e}");
        }
    });

    let endpoint_addr = format!("{}:{}", config.bind_address, config.endpoint_port);
    let listener = tokio::net::TcpListener::bind(&endpoint_addr).await?;
    info!("endpoint TCP server listening on {endpoint_addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(?peer, "endpoint connected");
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            session::run_session(stream, peer, coordinator).await;
        });
    }
}
