//! Optional operator dashboard: guild cards with live updates over a
//! websocket and a button to make the bot leave a guild.

use anyhow::{Context as _, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serenity::{model::id::GuildId, prelude::Context};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::audio::player::PlayerSnapshot;
use crate::bot::{actions, BotState};

const INDEX_HTML: &str = include_str!("dashboard.html");

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuildCard {
    pub id: String,
    pub name: String,
    pub member_count: u64,
    pub icon: Option<String>,
    pub connected: bool,
    pub vc_member_count: usize,
    pub current_track: Option<TrackCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackCard {
    pub title: String,
    pub url: Option<String>,
    pub thumbnail: Option<String>,
}

impl TrackCard {
    fn from_player(player: &PlayerSnapshot) -> Option<Self> {
        let info = &player.current.as_ref()?.track.info;
        Some(Self {
            title: info.title.clone(),
            url: info.uri.clone(),
            thumbnail: info.artwork_url.clone(),
        })
    }
}

#[derive(Clone)]
struct DashboardState {
    ctx: Context,
    bot: Arc<BotState>,
}

pub async fn serve(ctx: Context, bot: Arc<BotState>) -> Result<()> {
    let addr = format!("{}:{}", bot.config.dashboard_host, bot.config.dashboard_port);

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/remove/{guild_id}", post(remove_guild))
        .with_state(DashboardState { ctx, bot });

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("No se pudo abrir el dashboard en {}", addr))?;

    info!("📊 Dashboard disponible en http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Una tarjeta por guild en caché, con el estado de su player.
async fn snapshot(ctx: &Context, bot: &BotState) -> Vec<GuildCard> {
    let mut cards = Vec::new();

    for guild_id in ctx.cache.guilds() {
        let player = bot.players.snapshot(guild_id).await;
        if let Some(card) = guild_card(ctx, guild_id, player.as_ref()) {
            cards.push(card);
        }
    }

    cards
}

fn guild_card(ctx: &Context, guild_id: GuildId, player: Option<&PlayerSnapshot>) -> Option<GuildCard> {
    let guild = ctx.cache.guild(guild_id)?;

    let vc_member_count = player.map_or(0, |p| {
        guild
            .voice_states
            .values()
            .filter(|vs| vs.channel_id == Some(p.channel_id))
            .count()
    });

    Some(GuildCard {
        id: guild_id.to_string(),
        name: guild.name.clone(),
        member_count: guild.member_count,
        icon: guild.icon_url(),
        connected: player.is_some(),
        vc_member_count,
        current_track: player.and_then(TrackCard::from_player),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<DashboardState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn send_snapshot(socket: &mut WebSocket, state: &DashboardState) -> Result<(), axum::Error> {
    let cards = snapshot(&state.ctx, &state.bot).await;
    let json = serde_json::to_string(&cards).unwrap_or_else(|_| "[]".to_string());
    socket.send(Message::Text(json.into())).await
}

async fn client_loop(mut socket: WebSocket, state: DashboardState) {
    let mut changes = state.bot.subscribe_changes();
    debug!("📊 Cliente del dashboard conectado");

    if send_snapshot(&mut socket, &state).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(()) | Err(RecvError::Lagged(_)) => {
                    if send_snapshot(&mut socket, &state).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("📊 Cliente del dashboard desconectado");
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
    success: bool,
}

async fn remove_guild(Path(guild_id): Path<u64>, State(state): State<DashboardState>) -> Json<RemoveResponse> {
    if guild_id == 0 {
        return Json(RemoveResponse { success: false });
    }
    let guild_id = GuildId::new(guild_id);

    if state.bot.players.is_connected(guild_id) {
        if let Err(e) = actions::leave_voice(&state.ctx, &state.bot, guild_id).await {
            debug!("Error saliendo de voz en guild {}: {}", guild_id, e);
        }
    }

    let success = match guild_id.leave(&state.ctx.http).await {
        Ok(()) => {
            info!("🚪 Bot retirado de la guild {} desde el dashboard", guild_id);
            true
        }
        Err(e) => {
            warn!("No se pudo salir de la guild {}: {}", guild_id, e);
            false
        }
    };

    state.bot.notify_dashboard();
    Json(RemoveResponse { success })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::model::fixtures::track;
    use crate::audio::queue::QueuedTrack;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};

    #[test]
    fn test_card_json_shape() {
        let mut song = track("Song", 1000);
        song.info.artwork_url = Some("https://img/song.jpg".into());
        let player = PlayerSnapshot {
            channel_id: ChannelId::new(3),
            current: Some(QueuedTrack::new(song, UserId::new(1))),
            paused: false,
            position: 0,
            queue_len: 0,
            nightcore: false,
        };

        let card = GuildCard {
            id: "42".into(),
            name: "Guild".into(),
            member_count: 7,
            icon: None,
            connected: true,
            vc_member_count: 2,
            current_track: TrackCard::from_player(&player),
        };

        assert_eq!(
            serde_json::to_value(&card).unwrap(),
            serde_json::json!({
                "id": "42",
                "name": "Guild",
                "member_count": 7,
                "icon": null,
                "connected": true,
                "vc_member_count": 2,
                "current_track": {
                    "title": "Song",
                    "url": "https://example.com/song",
                    "thumbnail": "https://img/song.jpg"
                }
            })
        );
    }

    #[test]
    fn test_idle_player_has_no_track() {
        let player = PlayerSnapshot {
            channel_id: ChannelId::new(3),
            current: None,
            paused: false,
            position: 0,
            queue_len: 0,
            nightcore: false,
        };
        assert_eq!(TrackCard::from_player(&player), None);
        assert_eq!(
            serde_json::to_value(RemoveResponse { success: false }).unwrap(),
            serde_json::json!({ "success": false })
        );
    }
}
