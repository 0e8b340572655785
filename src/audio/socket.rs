use anyhow::{Context, Result};
use futures::StreamExt;
use serenity::model::id::{GuildId, UserId};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

use crate::audio::lavalink::SessionSlot;
use crate::audio::model::{IncomingMessage, PlayerUpdateState, TrackEvent};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Events forwarded from the Lavalink websocket to the bot.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    Ready { resumed: bool, session_id: String },
    PlayerUpdate { guild_id: GuildId, state: PlayerUpdateState },
    Track { guild_id: GuildId, event: TrackEvent },
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub url: String,
    pub password: String,
    pub user_id: UserId,
    pub client_name: String,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>, password: impl Into<String>, user_id: UserId) -> Self {
        Self {
            url: url.into(),
            password: password.into(),
            user_id,
            client_name: concat!("molten-music/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Starts the task that owns the Lavalink websocket.
///
/// The task keeps reconnecting until the receiving side of `events` is
/// dropped. While disconnected the session slot is empty, so REST calls that
/// need a session fail fast with `NoSession`.
pub fn spawn(
    config: SocketConfig,
    session: SessionSlot,
) -> (mpsc::UnboundedReceiver<NodeEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(run(config, session, tx));
    (rx, handle)
}

async fn run(config: SocketConfig, session: SessionSlot, events: mpsc::UnboundedSender<NodeEvent>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match connect_once(&config, &session, &events).await {
            Ok(true) => {
                info!("🔌 WebSocket de Lavalink cerrado, reconectando");
                backoff = INITIAL_BACKOFF;
            }
            Ok(false) => warn!("🔌 WebSocket de Lavalink cerrado antes de ready"),
            Err(e) => error!("❌ Error en el WebSocket de Lavalink: {:?}", e),
        }

        *session.write() = None;

        if events.is_closed() {
            debug!("Receptor de eventos cerrado, terminando tarea del WebSocket");
            return;
        }

        warn!("⏳ Reintentando conexión con Lavalink en {:?}", backoff);
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

/// Runs one websocket connection until it closes. Returns whether the node
/// sent `ready` during this connection.
async fn connect_once(
    config: &SocketConfig,
    session: &SessionSlot,
    events: &mpsc::UnboundedSender<NodeEvent>,
) -> Result<bool> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .context("URL de WebSocket inválida")?;

    let headers = request.headers_mut();
    headers.insert("Authorization", HeaderValue::from_str(&config.password)?);
    headers.insert("User-Id", HeaderValue::from_str(&config.user_id.to_string())?);
    headers.insert("Client-Name", HeaderValue::from_str(&config.client_name)?);

    let (mut stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("No se pudo conectar a {}", config.url))?;
    info!("🔌 Conectado al WebSocket de Lavalink {}", config.url);

    let mut got_ready = false;

    while let Some(message) = stream.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                info!("WebSocket cerrado por Lavalink: {:?}", frame);
                break;
            }
            _ => continue,
        };

        trace!("⬅️ {}", text);

        let Some(event) = parse_message(&text) else {
            continue;
        };

        if let NodeEvent::Ready { resumed, session_id } = &event {
            info!("✅ Sesión de Lavalink {} (resumed={})", session_id, resumed);
            *session.write() = Some(session_id.clone());
            got_ready = true;
        }

        if events.send(event).is_err() {
            break;
        }
    }

    Ok(got_ready)
}

/// Decodes one websocket text frame into the event the bot cares about.
pub fn parse_message(text: &str) -> Option<NodeEvent> {
    let message: IncomingMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Mensaje de Lavalink no reconocido: {} ({})", e, text);
            return None;
        }
    };

    match message {
        IncomingMessage::Ready { resumed, session_id } => Some(NodeEvent::Ready { resumed, session_id }),
        IncomingMessage::PlayerUpdate { guild_id, state } => Some(NodeEvent::PlayerUpdate {
            guild_id: parse_guild(&guild_id)?,
            state,
        }),
        IncomingMessage::Event(event) => Some(NodeEvent::Track {
            guild_id: parse_guild(event.guild_id())?,
            event,
        }),
        IncomingMessage::Stats(_) => None,
    }
}

fn parse_guild(raw: &str) -> Option<GuildId> {
    raw.parse::<u64>().ok().filter(|id| *id != 0).map(GuildId::new)
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::model::{fixtures::track_json, TrackEndReason};
    use serde_json::json;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_parse_ready() {
        let event = parse_message(r#"{"op":"ready","resumed":true,"sessionId":"xyz"}"#);
        assert_eq!(
            event,
            Some(NodeEvent::Ready {
                resumed: true,
                session_id: "xyz".into()
            })
        );
    }

    #[test]
    fn test_parse_track_end() {
        let text = json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "555",
            "track": track_json("Song"),
            "reason": "finished"
        })
        .to_string();

        match parse_message(&text) {
            Some(NodeEvent::Track {
                guild_id,
                event: TrackEvent::TrackEndEvent { reason, .. },
            }) => {
                assert_eq!(guild_id, GuildId::new(555));
                assert_eq!(reason, TrackEndReason::Finished);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stats_and_garbage_are_ignored() {
        assert!(parse_message(r#"{"op":"stats","players":0}"#).is_none());
        assert!(parse_message("not json").is_none());
        assert!(parse_message(
            r#"{"op":"playerUpdate","guildId":"abc","state":{"time":1,"connected":true}}"#
        )
        .is_none());
    }
}
