//! Playback actions shared by slash commands, panel buttons and the setup
//! channel. Each one returns the text shown to the user.

use serenity::model::{
    id::{ChannelId, GuildId, UserId},
    user::User,
};
use serenity::prelude::Context;
use tracing::{debug, error, info, warn};

use crate::audio::{
    model::{LoadResult, Track, VoiceState},
    player::PlayerError,
    queue::QueuePage,
};
use crate::bot::{
    guards::{self, windows},
    setup, BotState,
};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("🚫 You must join a voice channel first.")]
    NotInVoice,

    #[error("🚫 You must be in the same voice channel as the bot (<#{0}>).")]
    OtherChannel(ChannelId),

    #[error("Too many button presses at once—please wait a moment.")]
    Busy,

    #[error("🚫 You need the `{0}` permission(s) to use this command.")]
    MissingPermission(&'static str),

    #[error("🚫 I’m not connected to any voice channel.")]
    NotConnected,

    #[error("🚫 Could not join your voice channel.")]
    JoinFailed,

    #[error("🔍 Could not search for that track.")]
    SearchFailed,

    #[error("❌ No results found for that query.")]
    NoResults,

    #[error("The queue is empty.")]
    QueueEmpty,

    #[error("This command can only be used in a server.")]
    GuildOnly,

    /// Lavalink rechazó la petición; el texto depende de la acción
    #[error("{0}")]
    Failed(&'static str),

    #[error(transparent)]
    Player(#[from] PlayerError),

    #[error("❌ An error occurred while running the command.")]
    Discord(#[from] Box<serenity::Error>),
}

impl From<serenity::Error> for ActionError {
    fn from(err: serenity::Error) -> Self {
        ActionError::Discord(Box::new(err))
    }
}

/// Quien pidió la acción, con el nombre que se muestra en el panel
#[derive(Debug, Clone)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

impl Requester {
    pub fn new(user: &User, nick: Option<&str>) -> Self {
        Self {
            id: user.id,
            name: nick.unwrap_or_else(|| user.display_name()).to_string(),
        }
    }
}

/// Maps a Lavalink failure to the action's own message; other player
/// errors keep their text.
fn failed(message: &'static str) -> impl FnOnce(PlayerError) -> ActionError {
    move |err| match err {
        PlayerError::Lavalink(e) => {
            error!("{}: {}", message, e);
            ActionError::Failed(message)
        }
        other => other.into(),
    }
}

fn precheck(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId, ActionError> {
    let (user_channel, bot_channel) = guards::voice_channels(ctx, guild_id, user_id);
    guards::check_voice(user_channel, bot_channel)
}

/// Decide qué se encola a partir del resultado de Lavalink.
///
/// Search results contribute their first hit; playlists are queued whole.
pub fn tracks_to_enqueue(result: LoadResult) -> Result<(Vec<Track>, String), ActionError> {
    match result {
        LoadResult::Track(track) => {
            let message = format!("Added **`{}`** to the queue.", track.title());
            Ok((vec![track], message))
        }
        LoadResult::Search(tracks) => {
            let track = tracks.into_iter().next().ok_or(ActionError::NoResults)?;
            let message = format!("Added **`{}`** to the queue.", track.title());
            Ok((vec![track], message))
        }
        LoadResult::Playlist(playlist) => {
            if playlist.tracks.is_empty() {
                return Err(ActionError::NoResults);
            }
            let message = format!("Added playlist **`{}`** to the queue.", playlist.info.name);
            Ok((playlist.tracks, message))
        }
        LoadResult::Empty {} => Err(ActionError::NoResults),
        LoadResult::Error(exception) => {
            warn!("🔍 Lavalink no pudo cargar la búsqueda: {:?}", exception.message);
            Err(ActionError::SearchFailed)
        }
    }
}

/// Joins `channel_id` through the voice gateway and hands the session to
/// Lavalink. No-op when the guild already has a player.
pub async fn ensure_joined(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Result<(), ActionError> {
    if state.players.is_connected(guild_id) {
        return Ok(());
    }

    let manager = songbird::get(ctx).await.ok_or_else(|| {
        error!("Songbird no está registrado en el cliente");
        ActionError::JoinFailed
    })?;

    let (info, _call) = manager.join_gateway(guild_id, channel_id).await.map_err(|e| {
        error!("❌ Error uniéndose al canal de voz {}: {}", channel_id, e);
        ActionError::JoinFailed
    })?;

    let voice = VoiceState {
        token: info.token,
        endpoint: info.endpoint,
        session_id: info.session_id,
    };

    if let Err(e) = state.players.connect(guild_id, channel_id, voice).await {
        error!("❌ Lavalink rechazó la sesión de voz: {}", e);
        if let Err(e) = manager.remove(guild_id).await {
            debug!("No se pudo abandonar el canal de voz: {}", e);
        }
        return Err(ActionError::JoinFailed);
    }

    Ok(())
}

/// Builds the Lavalink voice payload from a voice server update. Discord
/// sends a null endpoint while it allocates a new server.
fn voice_session(token: String, endpoint: Option<String>, session_id: Option<String>) -> Option<VoiceState> {
    Some(VoiceState {
        token,
        endpoint: endpoint?,
        session_id: session_id?,
    })
}

fn bot_session_id(ctx: &Context, guild_id: GuildId) -> Option<String> {
    let bot_id = ctx.cache.current_user().id;
    let guild = ctx.cache.guild(guild_id)?;
    guild.voice_states.get(&bot_id).map(|vs| vs.session_id.clone())
}

/// Forwards a later voice server update (for example a voice server
/// failover) to Lavalink so playback keeps going.
pub async fn forward_voice_server(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    token: String,
    endpoint: Option<String>,
) {
    if !state.players.is_connected(guild_id) {
        return;
    }

    let Some(voice) = voice_session(token, endpoint, bot_session_id(ctx, guild_id)) else {
        debug!("Servidor de voz aún no asignado en guild {}", guild_id);
        return;
    };

    if let Err(e) = state.players.update_voice(guild_id, voice).await {
        warn!("⚠️ No se pudo actualizar la sesión de voz en guild {}: {}", guild_id, e);
    }
}

/// Sale del canal de voz y destruye el player. Devuelve si había player.
pub async fn leave_voice(ctx: &Context, state: &BotState, guild_id: GuildId) -> Result<bool, PlayerError> {
    if let Some(manager) = songbird::get(ctx).await {
        if let Err(e) = manager.remove(guild_id).await {
            debug!("Guild {} sin llamada activa: {}", guild_id, e);
        }
    }

    state.players.disconnect(guild_id).await
}

pub async fn play(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
    query: &str,
) -> Result<String, ActionError> {
    let channel_id = precheck(ctx, guild_id, requester.id)?;
    state.debouncer.try_acquire(guild_id, windows::PLAY)?;

    let (joined, found) = tokio::join!(
        ensure_joined(ctx, state, guild_id, channel_id),
        state.players.search(query)
    );
    joined?;

    let found = found.map_err(|e| {
        error!("🔍 Búsqueda fallida para '{}': {}", query, e);
        ActionError::SearchFailed
    })?;
    let (tracks, message) = tracks_to_enqueue(found)?;

    let added = state.players.enqueue(guild_id, tracks, requester.id).await?;
    info!("➕ {} añadió {} canciones en guild {}", requester.name, added, guild_id);

    let started = state
        .players
        .start_if_idle(guild_id)
        .await
        .map_err(failed("Failed to start playback."))?;

    // Si ya sonaba algo, solo cambian los botones (p. ej. shuffle)
    if !started {
        setup::refresh_panel(ctx, state, guild_id).await;
    }

    Ok(message)
}

pub async fn stop(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
) -> Result<String, ActionError> {
    precheck(ctx, guild_id, requester.id)?;
    state.debouncer.try_acquire(guild_id, windows::CONTROL)?;

    if !state.players.is_connected(guild_id) {
        return Err(PlayerError::NoPlayer.into());
    }

    // El embed lo actualiza el evento de fin de track
    state
        .players
        .set_latest_action(guild_id, format!("Stopped by {}", requester.name), true);

    if let Err(e) = state.players.stop(guild_id).await {
        state.players.take_latest_action(guild_id);
        return Err(failed("Failed to stop playback.")(e));
    }

    Ok("Playback stopped and queue cleared.".to_string())
}

pub async fn skip(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
    count: usize,
) -> Result<String, ActionError> {
    precheck(ctx, guild_id, requester.id)?;
    state.debouncer.try_acquire(guild_id, windows::CONTROL)?;

    let count = count.max(1);
    state
        .players
        .set_latest_action(guild_id, format!("Skipped by {}", requester.name), true);

    if let Err(e) = state.players.skip(guild_id, count).await {
        state.players.take_latest_action(guild_id);
        return Err(failed("Failed to skip.")(e));
    }

    Ok(format!("⏭️ Skipped {} track{}.", count, if count > 1 { "s" } else { "" }))
}

pub async fn toggle(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
) -> Result<String, ActionError> {
    precheck(ctx, guild_id, requester.id)?;
    state.debouncer.try_acquire(guild_id, windows::CONTROL)?;

    let paused = state
        .players
        .toggle_pause(guild_id)
        .await
        .map_err(failed("Failed to toggle pause/resume."))?;

    let action = if paused { "Paused" } else { "Resumed" };
    state
        .players
        .set_latest_action(guild_id, format!("{} by {}", action, requester.name), false);
    setup::refresh_panel(ctx, state, guild_id).await;

    Ok(format!("{} the current track.", action))
}

pub async fn disconnect(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
) -> Result<String, ActionError> {
    if !state.players.is_connected(guild_id) {
        return Err(ActionError::NotConnected);
    }

    state
        .players
        .set_latest_action(guild_id, format!("Disconnected by {}", requester.name), false);

    leave_voice(ctx, state, guild_id)
        .await
        .map_err(failed("Failed to disconnect the player."))?;

    setup::refresh_panel(ctx, state, guild_id).await;
    state.notify_dashboard();

    Ok("Disconnected the player.".to_string())
}

pub async fn shuffle(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
) -> Result<String, ActionError> {
    precheck(ctx, guild_id, requester.id)?;

    state.players.shuffle(guild_id).await?;
    state
        .players
        .set_latest_action(guild_id, format!("Shuffled by {}", requester.name), false);
    setup::refresh_panel(ctx, state, guild_id).await;

    Ok("The queue has been shuffled!".to_string())
}

pub async fn queue(state: &BotState, guild_id: GuildId, page: usize, page_size: usize) -> Result<QueuePage, ActionError> {
    state
        .players
        .queue_page(guild_id, page, page_size)
        .await
        .ok_or(ActionError::QueueEmpty)
}

pub async fn forward(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
    seconds: u64,
) -> Result<String, ActionError> {
    precheck(ctx, guild_id, requester.id)?;
    state.debouncer.try_acquire(guild_id, windows::FORWARD)?;

    state
        .players
        .forward(guild_id, seconds)
        .await
        .map_err(|e| match e {
            PlayerError::NoPlayer => PlayerError::NothingPlaying.into(),
            other => failed("Failed to forward playback.")(other),
        })?;

    state.players.set_latest_action(
        guild_id,
        format!("Forwarded {}s by {}", seconds, requester.name),
        true,
    );
    setup::refresh_panel(ctx, state, guild_id).await;

    Ok(format!("⏩ Forwarded {} seconds.", seconds))
}

pub async fn nightcore(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
    requester: &Requester,
    enabled: bool,
) -> Result<String, ActionError> {
    precheck(ctx, guild_id, requester.id)?;

    state
        .players
        .set_nightcore(guild_id, enabled)
        .await
        .map_err(failed("Failed to update filters."))?;

    let (label, message) = if enabled {
        ("ON", "Nightcore effect enabled!")
    } else {
        ("OFF", "Nightcore effect disabled.")
    };
    state
        .players
        .set_latest_action(guild_id, format!("Nightcore {} by {}", label, requester.name), false);
    setup::refresh_panel(ctx, state, guild_id).await;

    Ok(message.to_string())
}

/// Alterna el modo 24/7 y revisa enseguida si hay que salir del canal.
pub async fn stay_247(ctx: &Context, state: &BotState, guild_id: GuildId) -> Result<String, ActionError> {
    let enabled = state
        .store
        .update(guild_id, |setup| {
            setup.stay_247 = !setup.stay_247;
            setup.stay_247
        })
        .await;

    info!("🌙 Modo 24/7 {} en guild {}", enabled, guild_id);
    leave_if_alone(ctx, state, guild_id).await;

    Ok(format!("24/7 mode {}!", if enabled { "enabled" } else { "disabled" }))
}

/// Leaves the voice channel when no human is left in it, unless 24/7 mode
/// is on. Returns whether the bot left.
pub async fn leave_if_alone(ctx: &Context, state: &BotState, guild_id: GuildId) -> bool {
    let Some(snapshot) = state.players.snapshot(guild_id).await else {
        return false;
    };

    if guards::humans_in_channel(ctx, guild_id, snapshot.channel_id) > 0 {
        return false;
    }

    if state.store.get(guild_id).is_some_and(|setup| setup.stay_247) {
        debug!("Guild {} en modo 24/7, el bot se queda", guild_id);
        return false;
    }

    info!("👋 Canal de voz vacío en guild {}, saliendo", guild_id);
    if let Err(e) = leave_voice(ctx, state, guild_id).await {
        warn!("Error saliendo del canal de voz: {}", e);
    }
    setup::refresh_panel(ctx, state, guild_id).await;
    state.notify_dashboard();
    true
}
