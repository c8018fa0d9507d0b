//! Local development server.
//!
//! The server serves the output root over HTTP and keeps a WebSocket open to
//! every connected viewer. Notifications are fanned out through a broadcast
//! channel, so anything holding a [`DevServer`] handle can publish them:
//!
//! - [`Notification::Reload`] asks viewers for a full page reload,
//! - [`Notification::Style`] asks viewers to refetch a single stylesheet
//!   in place.
//!
//! Viewers pick up the client script from [`CLIENT_PATH`]; the HTML
//! passthrough injects it into copied pages while the dev loop is running.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use camino::Utf8Path;
use console::style;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tracing::info;

use crate::error::ServerError;

/// WebSocket endpoint viewers connect to.
pub const SOCKET_PATH: &str = "/__tsumiki/livereload";

/// Client script subscribing to [`SOCKET_PATH`].
pub const CLIENT_PATH: &str = "/__tsumiki/livereload.js";

const CLIENT_SCRIPT: &str = r#"(() => {
  const socket = new WebSocket(`ws://${location.host}/__tsumiki/livereload`);
  socket.addEventListener("message", (event) => {
    const message = JSON.parse(event.data);
    if (message.type !== "style") {
      location.reload();
      return;
    }
    for (const link of document.querySelectorAll('link[rel="stylesheet"]')) {
      const url = new URL(link.href);
      if (url.pathname === message.href) {
        url.searchParams.set("v", Date.now());
        link.href = url.href;
      }
    }
  });
})();
"#;

/// Message pushed to connected viewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    /// Full page reload.
    Reload,
    /// Refetch the stylesheet served at `href` without reloading the page.
    Style { href: String },
}

/// Handle to the development server.
///
/// The handle is cheap to clone and is passed explicitly to every component
/// that publishes notifications. A server is bound first and started later;
/// once started it keeps serving for the rest of the process.
#[derive(Clone)]
pub struct DevServer {
    address: SocketAddr,
    sender: broadcast::Sender<Notification>,
    listener: Arc<Mutex<Option<TcpListener>>>,
}

impl DevServer {
    /// Binds the listening socket. When `address` is taken, an ephemeral port
    /// on the same host is used instead.
    pub async fn bind(address: SocketAddr) -> Result<Self, ServerError> {
        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::warn!("{address} is taken, picking a free port");
                TcpListener::bind(SocketAddr::new(address.ip(), 0)).await?
            }
            Err(e) => return Err(e.into()),
        };

        let (sender, _) = broadcast::channel(64);

        Ok(Self {
            address: listener.local_addr()?,
            sender,
            listener: Arc::new(Mutex::new(Some(listener))),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Whether [`start`](Self::start) has already been called.
    pub fn is_serving(&self) -> bool {
        self.listener.lock().map(|slot| slot.is_none()).unwrap_or(true)
    }

    /// Starts serving `root` on the current runtime.
    pub fn start(&self, root: &Utf8Path) -> Result<(), ServerError> {
        let listener = self
            .listener
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(ServerError::AlreadyServing(self.address))?;

        let router = Router::new()
            .route(SOCKET_PATH, get(upgrade))
            .route(CLIENT_PATH, get(client_script))
            // path to the output root with generated assets
            .fallback_service(ServeDir::new(root.as_std_path()))
            .with_state(self.clone());

        let url = format!("http://{}/", self.address);
        info!(url = %style(url).yellow(), "starting a HTTP server");

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!("dev server stopped: {e}");
            }
        });

        Ok(())
    }

    /// Subscribes to notifications, as a viewer would.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publishes `notification` to every connected viewer. Returns the number
    /// of viewers it reached.
    pub fn notify(&self, notification: Notification) -> usize {
        tracing::debug!(?notification, "notifying viewers");
        self.sender.send(notification).unwrap_or(0)
    }
}

async fn client_script() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/javascript")], CLIENT_SCRIPT)
}

async fn upgrade(ws: WebSocketUpgrade, State(server): State<DevServer>) -> impl IntoResponse {
    let receiver = server.subscribe();
    ws.on_upgrade(move |socket| viewer(socket, receiver))
}

async fn viewer(mut socket: WebSocket, mut receiver: broadcast::Receiver<Notification>) {
    loop {
        tokio::select! {
            notification = receiver.recv() => match notification {
                Ok(notification) => {
                    let text = match serde_json::to_string(&notification) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!("Error: {e:?}");
                            continue;
                        }
                    };

                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
