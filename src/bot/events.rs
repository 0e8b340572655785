use serenity::{model::id::GuildId, prelude::Context};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::audio::{player::PlayerChange, socket::NodeEvent};
use crate::bot::{actions, setup, BotState};

/// Consume los eventos del nodo Lavalink y refleja los cambios en los
/// paneles y el dashboard.
pub async fn run_node_events(ctx: Context, state: Arc<BotState>, mut events: UnboundedReceiver<NodeEvent>) {
    info!("🎧 Procesando eventos de Lavalink");
    let mut had_session = false;

    while let Some(event) = events.recv().await {
        let guild_id = match &event {
            NodeEvent::Ready { resumed, session_id } => {
                debug!("Sesión de Lavalink {} (resumed={})", session_id, resumed);
                if should_reset(had_session, *resumed) {
                    reset_players(&ctx, &state).await;
                }
                had_session = true;
                continue;
            }
            NodeEvent::PlayerUpdate { guild_id, .. } | NodeEvent::Track { guild_id, .. } => *guild_id,
        };

        match state.players.handle_event(&event).await {
            PlayerChange::TrackStarted | PlayerChange::Idle => spawn_refresh(&ctx, &state, guild_id),
            PlayerChange::VoiceClosed => spawn_voice_cleanup(&ctx, &state, guild_id),
            PlayerChange::Nothing => {}
        }
    }

    warn!("🔌 Canal de eventos de Lavalink cerrado");
}

/// Una sesión nueva que no es reanudación invalida los players anteriores.
fn should_reset(had_session: bool, resumed: bool) -> bool {
    had_session && !resumed
}

fn spawn_voice_cleanup(ctx: &Context, state: &Arc<BotState>, guild_id: GuildId) {
    let ctx = ctx.clone();
    let state = Arc::clone(state);

    tokio::spawn(async move {
        warn!("🔇 Conexión de voz perdida en guild {}, liberando el player", guild_id);
        if let Err(e) = actions::leave_voice(&ctx, &state, guild_id).await {
            debug!("Error saliendo de voz en guild {}: {}", guild_id, e);
        }
        setup::refresh_panel(&ctx, &state, guild_id).await;
        state.notify_dashboard();
    });
}

fn spawn_refresh(ctx: &Context, state: &Arc<BotState>, guild_id: GuildId) {
    let ctx = ctx.clone();
    let state = Arc::clone(state);

    tokio::spawn(async move {
        setup::refresh_panel(&ctx, &state, guild_id).await;
        state.notify_dashboard();
    });
}

/// La sesión nueva de Lavalink no conoce los players anteriores: salir de
/// voz en esas guilds y dejar los paneles en reposo.
async fn reset_players(ctx: &Context, state: &Arc<BotState>) {
    let guilds = state.players.reset_all();
    if guilds.is_empty() {
        return;
    }

    warn!("♻️ Sesión de Lavalink nueva, reiniciando {} players", guilds.len());

    for guild_id in guilds {
        if let Err(e) = actions::leave_voice(ctx, state, guild_id).await {
            debug!("Error saliendo de voz en guild {}: {}", guild_id, e);
        }
        spawn_refresh(ctx, state, guild_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_a_fresh_session_after_another_resets() {
        assert!(!should_reset(false, false));
        assert!(!should_reset(false, true));
        assert!(!should_reset(true, true));
        assert!(should_reset(true, false));
    }
}
