//! Implémentations du transport
//!
//! Ce module contient :
//! - WebSocketConnector : WebSocket TLS vers le service (tokio-tungstenite)
//! - SimulatedConnector : transport en mémoire pour tests, dont l'autre
//!   extrémité (`SimulatedServer`) est pilotée par le test

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::{
    ClientConfig, Connector, FrameSink, FrameSource, NetworkError, NetworkResult, TransportFrame,
    TransportHandle,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport WebSocket réel
///
/// Ajoute les en-têtes `Authorization: Bearer <clé>` et `OpenAI-Beta: realtime=v1`
/// à la requête de poignée de main.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, config: &ClientConfig) -> NetworkResult<TransportHandle> {
        let url = config.url();

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| NetworkError::ConfigError(format!("URL invalide {url}: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", config.api_key.expose_secret())
                .parse()
                .map_err(|e| NetworkError::ConfigError(format!("En-tête d'autorisation invalide: {e}")))?,
        );
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|e| NetworkError::ConfigError(format!("En-tête invalide: {e}")))?,
        );

        info!(endpoint = %config.endpoint, model = %config.model, "Ouverture du WebSocket");

        let (stream, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    NetworkError::connection(format!(
                        "délai de {}ms dépassé",
                        config.connect_timeout.as_millis()
                    ))
                })?
                .map_err(|e| NetworkError::connection(e.to_string()))?;

        let (sink, source) = stream.split();

        Ok(TransportHandle {
            outbound: Box::new(WsSink {
                inner: sink,
                closed: false,
            }),
            inbound: Box::new(WsSource { inner: source }),
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

struct WsSink {
    inner: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> NetworkResult<()> {
        if self.closed {
            return Err(NetworkError::connection("WebSocket fermé"));
        }
        self.inner.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> NetworkResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Envoie la frame Close puis termine le flux
        self.inner.close().await?;
        Ok(())
    }
}

struct WsSource {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<NetworkResult<TransportFrame>> {
        loop {
            let message = match self.inner.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            let frame = match message {
                Message::Text(text) => TransportFrame::Text(text.as_str().to_owned()),
                Message::Binary(bytes) => TransportFrame::Binary(bytes.to_vec()),
                Message::Close(frame) => {
                    TransportFrame::Closed(frame.map(|f| f.reason.to_string()))
                }
                // Ping/pong gérés par tungstenite
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

// ── Transport simulé ──────────────────────────────────────────────

struct SimulatedInner {
    refuse_reason: Option<String>,
    open_delay: Duration,
    servers: VecDeque<SimulatedServer>,
    connections: usize,
}

/// Transport en mémoire pour les tests
///
/// Chaque `open` réussi crée une paire (transport client, `SimulatedServer`).
/// Le test récupère le côté serveur avec `next_server()`.
pub struct SimulatedConnector {
    inner: Mutex<SimulatedInner>,
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SimulatedInner {
                refuse_reason: None,
                open_delay: Duration::ZERO,
                servers: VecDeque::new(),
                connections: 0,
            }),
        }
    }

    /// Les ouvertures suivantes échoueront avec cette raison
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        self.inner.lock().refuse_reason = Some(reason.into());
    }

    /// Les ouvertures suivantes réussiront
    pub fn accept_connections(&self) {
        self.inner.lock().refuse_reason = None;
    }

    /// Retarde chaque poignée de main
    pub fn set_open_delay(&self, delay: Duration) {
        self.inner.lock().open_delay = delay;
    }

    /// Côté serveur de la plus ancienne connexion non encore récupérée
    pub fn next_server(&self) -> Option<SimulatedServer> {
        self.inner.lock().servers.pop_front()
    }

    /// Nombre de connexions réussies
    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn open(&self, _config: &ClientConfig) -> NetworkResult<TransportHandle> {
        let delay = self.inner.lock().open_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.refuse_reason {
            return Err(NetworkError::connection(reason.clone()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let client_closed = Arc::new(AtomicBool::new(false));

        inner.connections += 1;
        inner.servers.push_back(SimulatedServer {
            to_client: to_client.clone(),
            from_client,
            client_closed: Arc::clone(&client_closed),
        });

        debug!(connection = inner.connections, "Transport simulé ouvert");

        Ok(TransportHandle {
            outbound: Box::new(SimulatedSink {
                to_server,
                to_client,
                closed: client_closed,
            }),
            inbound: Box::new(SimulatedSource { from_server }),
        })
    }

    fn name(&self) -> &'static str {
        "simulé"
    }
}

struct SimulatedSink {
    to_server: mpsc::UnboundedSender<String>,
    /// Sert à renvoyer l'écho de fermeture au lecteur du client
    to_client: mpsc::UnboundedSender<TransportFrame>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for SimulatedSink {
    async fn send_text(&mut self, text: String) -> NetworkResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::connection("transport simulé fermé"));
        }
        self.to_server
            .send(text)
            .map_err(|_| NetworkError::connection("serveur simulé disparu"))
    }

    async fn close(&mut self) -> NetworkResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self
                .to_client
                .send(TransportFrame::Closed(Some("fermeture client".to_string())));
        }
        Ok(())
    }
}

struct SimulatedSource {
    from_server: mpsc::UnboundedReceiver<TransportFrame>,
}

#[async_trait]
impl FrameSource for SimulatedSource {
    async fn next_frame(&mut self) -> Option<NetworkResult<TransportFrame>> {
        self.from_server.recv().await.map(Ok)
    }
}

/// Extrémité serveur d'un transport simulé
pub struct SimulatedServer {
    to_client: mpsc::UnboundedSender<TransportFrame>,
    from_client: mpsc::UnboundedReceiver<String>,
    client_closed: Arc<AtomicBool>,
}

impl SimulatedServer {
    /// Délai d'attente de `recv_frame`
    pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    /// Prochaine frame envoyée par le client, parsée en JSON
    ///
    /// `None` si rien n'arrive dans `RECV_TIMEOUT` ou si le texte n'est pas du JSON.
    pub async fn recv_frame(&mut self) -> Option<serde_json::Value> {
        let text = tokio::time::timeout(Self::RECV_TIMEOUT, self.from_client.recv())
            .await
            .ok()??;
        serde_json::from_str(&text).ok()
    }

    /// Prochaine frame déjà envoyée, sans attendre
    pub fn try_recv_frame(&mut self) -> Option<serde_json::Value> {
        let text = self.from_client.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Toutes les frames déjà envoyées
    pub fn drain_frames(&mut self) -> Vec<serde_json::Value> {
        std::iter::from_fn(|| self.try_recv_frame()).collect()
    }

    /// Envoie une frame JSON au client
    pub fn push_json(&self, value: serde_json::Value) {
        self.push_text(value.to_string());
    }

    /// Envoie un texte brut au client (éventuellement invalide)
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(TransportFrame::Text(text.into()));
    }

    /// Ferme la connexion côté serveur
    pub fn close(&self, reason: Option<&str>) {
        let _ = self
            .to_client
            .send(TransportFrame::Closed(reason.map(str::to_string)));
    }

    /// Vrai si le client a fermé le transport
    pub fn client_closed(&self) -> bool {
        self.client_closed.load(Ordering::SeqCst)
    }
}
