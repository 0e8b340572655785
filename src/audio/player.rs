use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::{
    lavalink::{LavalinkApi, LavalinkError},
    model::{Filters, LoadResult, Track, TrackEndReason, TrackEvent, UpdatePlayer, VoiceState},
    queue::{QueuePage, QueuedTrack, TrackQueue},
    socket::NodeEvent,
};

/// Errores de reproducción. El texto de cada variante es lo que ve el usuario.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("No active player.")]
    NoPlayer,

    #[error("No track is currently playing.")]
    NothingPlaying,

    #[error("Cannot skip {count} tracks; only {queued} in the queue.")]
    SkipTooMany { count: usize, queued: usize },

    #[error("Cannot forward beyond the end of the track.")]
    ForwardPastEnd,

    #[error("This track cannot be seeked.")]
    NotSeekable,

    #[error("No active player or the queue is empty.")]
    EmptyQueue,

    #[error("The audio node did not accept the request.")]
    Lavalink(#[from] LavalinkError),
}

/// Footer text shown on the next panel render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestAction {
    pub text: String,
    /// Survives the next track start
    pub persist: bool,
}

/// What the presentation layer should do after a Lavalink event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerChange {
    TrackStarted,
    Idle,
    /// Discord cerró la conexión de voz y no se puede reanudar
    VoiceClosed,
    Nothing,
}

/// Cierres de la voz de Discord que no se recuperan solos: sesión inválida
/// (4006) y bot desconectado o canal borrado (4014).
fn voice_closed_for_good(code: u16, by_remote: bool) -> bool {
    by_remote && matches!(code, 4006 | 4014)
}

#[derive(Debug)]
pub struct GuildPlayer {
    pub channel_id: ChannelId,
    pub current: Option<QueuedTrack>,
    pub paused: bool,
    /// Última posición reportada por Lavalink (ms)
    pub position: u64,
    pub position_at: Instant,
    pub volume: u16,
    pub filters: Filters,
    pub queue: TrackQueue,
}

impl GuildPlayer {
    fn new(channel_id: ChannelId, volume: u16) -> Self {
        Self {
            channel_id,
            current: None,
            paused: false,
            position: 0,
            position_at: Instant::now(),
            volume,
            filters: Filters::default(),
            queue: TrackQueue::new(),
        }
    }

    /// Position extrapolated from the last `playerUpdate`.
    pub fn estimated_position(&self) -> u64 {
        if self.paused || self.current.is_none() {
            return self.position;
        }
        self.position + self.position_at.elapsed().as_millis() as u64
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
        self.position_at = Instant::now();
    }
}

/// Read-only copy of a guild player used to render panels and pages.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub channel_id: ChannelId,
    pub current: Option<QueuedTrack>,
    pub paused: bool,
    pub position: u64,
    pub queue_len: usize,
    pub nightcore: bool,
}

pub struct PlayerManager {
    api: Arc<dyn LavalinkApi>,
    players: DashMap<GuildId, Arc<Mutex<GuildPlayer>>>,
    actions: DashMap<GuildId, LatestAction>,
    volume: u16,
    search_prefix: String,
}

impl PlayerManager {
    pub fn new(api: Arc<dyn LavalinkApi>, volume: u16, search_prefix: impl Into<String>) -> Self {
        Self {
            api,
            players: DashMap::new(),
            actions: DashMap::new(),
            volume,
            search_prefix: search_prefix.into(),
        }
    }

    fn player(&self, guild_id: GuildId) -> Result<Arc<Mutex<GuildPlayer>>, PlayerError> {
        self.players
            .get(&guild_id)
            .map(|p| Arc::clone(&p))
            .ok_or(PlayerError::NoPlayer)
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.players.contains_key(&guild_id)
    }

    pub fn guilds(&self) -> Vec<GuildId> {
        self.players.iter().map(|entry| *entry.key()).collect()
    }

    /// Crea (o actualiza) el player de la guild y le pasa a Lavalink la
    /// sesión de voz obtenida del gateway.
    pub async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        voice: VoiceState,
    ) -> Result<(), PlayerError> {
        let player = Arc::clone(
            &self
                .players
                .entry(guild_id)
                .or_insert_with(|| Arc::new(Mutex::new(GuildPlayer::new(channel_id, self.volume)))),
        );

        let mut player = player.lock().await;
        player.channel_id = channel_id;

        if let Err(e) = self
            .api
            .update_player(guild_id, &UpdatePlayer::voice(voice), false)
            .await
        {
            drop(player);
            self.players.remove(&guild_id);
            return Err(e.into());
        }

        info!("🔊 Player conectado en guild {} (canal {})", guild_id, channel_id);
        Ok(())
    }

    /// Reenvía a Lavalink una sesión de voz nueva (cambio de servidor de voz).
    /// Devuelve `false` si la guild no tiene player.
    pub async fn update_voice(&self, guild_id: GuildId, voice: VoiceState) -> Result<bool, PlayerError> {
        let Ok(player) = self.player(guild_id) else {
            return Ok(false);
        };
        let _player = player.lock().await;

        self.api
            .update_player(guild_id, &UpdatePlayer::voice(voice), false)
            .await?;

        debug!("🔁 Sesión de voz actualizada en guild {}", guild_id);
        Ok(true)
    }

    /// Registra que el bot fue movido a otro canal. Devuelve si cambió.
    pub async fn set_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let Ok(player) = self.player(guild_id) else {
            return false;
        };
        let mut player = player.lock().await;

        if player.channel_id == channel_id {
            return false;
        }

        info!("🔀 Bot movido al canal {} en guild {}", channel_id, guild_id);
        player.channel_id = channel_id;
        true
    }

    /// Busca en Lavalink. Las URLs se cargan tal cual; el resto pasa por el
    /// prefijo de búsqueda configurado.
    pub async fn search(&self, query: &str) -> Result<LoadResult, PlayerError> {
        let identifier = resolve_identifier(query, &self.search_prefix);
        Ok(self.api.load_tracks(&identifier).await?)
    }

    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        tracks: Vec<Track>,
        requester: UserId,
    ) -> Result<usize, PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;
        Ok(player
            .queue
            .extend(tracks.into_iter().map(|t| QueuedTrack::new(t, requester))))
    }

    /// Arranca el siguiente track si no hay nada sonando.
    pub async fn start_if_idle(&self, guild_id: GuildId) -> Result<bool, PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;

        if player.current.is_some() {
            return Ok(false);
        }

        self.play_next(guild_id, &mut player).await
    }

    /// Salta `count` canciones: descarta `count - 1` de la cola y reproduce
    /// la siguiente, o detiene si no queda nada.
    pub async fn skip(&self, guild_id: GuildId, count: usize) -> Result<(), PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;

        if player.current.is_none() {
            return Err(PlayerError::NoPlayer);
        }

        let count = count.max(1);
        let queued = player.queue.len();
        if count - 1 > queued {
            return Err(PlayerError::SkipTooMany { count, queued });
        }

        player.queue.drop_front(count - 1);

        if !self.play_next(guild_id, &mut player).await? {
            self.api
                .update_player(guild_id, &UpdatePlayer::stop(), false)
                .await?;
        }

        info!("⏭️ Saltadas {} canciones en guild {}", count, guild_id);
        Ok(())
    }

    /// Limpia la cola y detiene el track actual sin salir del canal.
    pub async fn stop(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;

        player.queue.clear();
        if player.current.is_some() {
            self.api
                .update_player(guild_id, &UpdatePlayer::stop(), false)
                .await?;
        }

        info!("⏹️ Reproducción detenida en guild {}", guild_id);
        Ok(())
    }

    pub async fn set_paused(&self, guild_id: GuildId, paused: bool) -> Result<(), PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;
        self.apply_pause(guild_id, &mut player, paused).await
    }

    /// Returns the new paused state.
    pub async fn toggle_pause(&self, guild_id: GuildId) -> Result<bool, PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;
        let paused = !player.paused;
        self.apply_pause(guild_id, &mut player, paused).await?;
        Ok(paused)
    }

    async fn apply_pause(
        &self,
        guild_id: GuildId,
        player: &mut GuildPlayer,
        paused: bool,
    ) -> Result<(), PlayerError> {
        self.api
            .update_player(guild_id, &UpdatePlayer::paused(paused), false)
            .await?;

        // Congelar la posición estimada antes de cambiar el estado
        let position = player.estimated_position();
        player.set_position(position);
        player.paused = paused;

        debug!("⏯️ Guild {} paused={}", guild_id, paused);
        Ok(())
    }

    /// Adelanta `seconds` segundos y devuelve la nueva posición en ms.
    pub async fn forward(&self, guild_id: GuildId, seconds: u64) -> Result<u64, PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;

        let (length, seekable) = match &player.current {
            Some(current) => (current.track.info.length, current.track.info.is_seekable),
            None => return Err(PlayerError::NothingPlaying),
        };

        if !seekable {
            return Err(PlayerError::NotSeekable);
        }

        let target = player.estimated_position() + seconds * 1000;
        if target >= length {
            return Err(PlayerError::ForwardPastEnd);
        }

        self.api
            .update_player(guild_id, &UpdatePlayer::seek(target), false)
            .await?;
        player.set_position(target);

        Ok(target)
    }

    pub async fn set_nightcore(&self, guild_id: GuildId, enabled: bool) -> Result<(), PlayerError> {
        let player = self.player(guild_id)?;
        let mut player = player.lock().await;

        let filters = if enabled {
            Filters::nightcore()
        } else {
            Filters::default()
        };

        self.api
            .update_player(guild_id, &UpdatePlayer::filters(filters.clone()), false)
            .await?;
        player.filters = filters;

        Ok(())
    }

    pub async fn shuffle(&self, guild_id: GuildId) -> Result<(), PlayerError> {
        let player = self.player(guild_id).map_err(|_| PlayerError::EmptyQueue)?;
        let mut player = player.lock().await;

        if player.queue.is_empty() {
            return Err(PlayerError::EmptyQueue);
        }

        player.queue.shuffle();
        Ok(())
    }

    /// Destruye el player en Lavalink y olvida la guild. Devuelve si existía.
    pub async fn disconnect(&self, guild_id: GuildId) -> Result<bool, PlayerError> {
        if self.players.remove(&guild_id).is_none() {
            return Ok(false);
        }

        match self.api.destroy_player(guild_id).await {
            Ok(()) | Err(LavalinkError::NoSession) => {}
            Err(LavalinkError::Status { status: 404, .. }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("👋 Player destruido en guild {}", guild_id);
        Ok(true)
    }

    /// Olvida todos los players (la sesión de Lavalink se perdió).
    pub fn reset_all(&self) -> Vec<GuildId> {
        let guilds = self.guilds();
        self.players.clear();
        guilds
    }

    pub async fn snapshot(&self, guild_id: GuildId) -> Option<PlayerSnapshot> {
        let player = self.player(guild_id).ok()?;
        let player = player.lock().await;

        Some(PlayerSnapshot {
            channel_id: player.channel_id,
            current: player.current.clone(),
            paused: player.paused,
            position: player.estimated_position(),
            queue_len: player.queue.len(),
            nightcore: player.filters.is_nightcore(),
        })
    }

    pub async fn queue_page(&self, guild_id: GuildId, page: usize, page_size: usize) -> Option<QueuePage> {
        let player = self.player(guild_id).ok()?;
        let player = player.lock().await;

        if player.queue.is_empty() {
            return None;
        }
        Some(player.queue.page(page, page_size))
    }

    pub fn set_latest_action(&self, guild_id: GuildId, text: impl Into<String>, persist: bool) {
        self.actions.insert(
            guild_id,
            LatestAction {
                text: text.into(),
                persist,
            },
        );
    }

    pub fn take_latest_action(&self, guild_id: GuildId) -> Option<String> {
        self.actions.remove(&guild_id).map(|(_, action)| action.text)
    }

    /// Aplica un evento del nodo al estado en memoria.
    pub async fn handle_event(&self, event: &NodeEvent) -> PlayerChange {
        let (guild_id, event) = match event {
            NodeEvent::PlayerUpdate { guild_id, state } => {
                if let Ok(player) = self.player(*guild_id) {
                    let mut player = player.lock().await;
                    player.position = state.position;
                    player.position_at = Instant::now();
                }
                return PlayerChange::Nothing;
            }
            NodeEvent::Ready { .. } => return PlayerChange::Nothing,
            NodeEvent::Track { guild_id, event } => (*guild_id, event),
        };

        let Ok(player) = self.player(guild_id) else {
            debug!("Evento para guild {} sin player: {:?}", guild_id, event);
            return PlayerChange::Nothing;
        };
        let mut player = player.lock().await;

        match event {
            TrackEvent::TrackStartEvent { track, .. } => {
                info!("▶️ Empezó '{}' en guild {}", track.title(), guild_id);
                player.set_position(0);
                player.paused = false;

                // Las acciones temporales no sobreviven al cambio de canción
                self.actions.remove_if(&guild_id, |_, action| !action.persist);

                PlayerChange::TrackStarted
            }
            TrackEvent::TrackEndEvent { reason, track, .. } => {
                debug!("⏹️ Terminó '{}' en guild {} ({:?})", track.title(), guild_id, reason);

                if *reason == TrackEndReason::Replaced {
                    return PlayerChange::Nothing;
                }

                player.current = None;

                if reason.may_start_next() {
                    match self.play_next(guild_id, &mut player).await {
                        Ok(true) => return PlayerChange::Nothing,
                        Ok(false) => {}
                        Err(e) => error!("Error reproduciendo siguiente track: {}", e),
                    }
                }

                PlayerChange::Idle
            }
            TrackEvent::TrackExceptionEvent { track, exception, .. } => {
                warn!(
                    "⚠️ Excepción en '{}' (guild {}): {:?}",
                    track.title(),
                    guild_id,
                    exception.message
                );
                PlayerChange::Nothing
            }
            TrackEvent::TrackStuckEvent { track, threshold_ms, .. } => {
                warn!(
                    "⚠️ Track '{}' atascado {}ms en guild {}, pasando al siguiente",
                    track.title(),
                    threshold_ms,
                    guild_id
                );
                player.current = None;
                match self.play_next(guild_id, &mut player).await {
                    Ok(true) => PlayerChange::Nothing,
                    Ok(false) => PlayerChange::Idle,
                    Err(e) => {
                        error!("Error reproduciendo siguiente track: {}", e);
                        PlayerChange::Idle
                    }
                }
            }
            TrackEvent::WebSocketClosedEvent { code, reason, by_remote, .. } => {
                warn!(
                    "🔌 Voz cerrada en guild {}: {} {} (remoto={})",
                    guild_id, code, reason, by_remote
                );
                if voice_closed_for_good(*code, *by_remote) {
                    PlayerChange::VoiceClosed
                } else {
                    PlayerChange::Nothing
                }
            }
        }
    }

    async fn play_next(&self, guild_id: GuildId, player: &mut GuildPlayer) -> Result<bool, PlayerError> {
        let Some(next) = player.queue.pop() else {
            debug!("📭 Cola vacía en guild {}", guild_id);
            return Ok(false);
        };

        self.api
            .update_player(guild_id, &UpdatePlayer::play(&next.track, player.volume), false)
            .await?;

        info!("🎵 Reproduciendo: {}", next.title());
        player.current = Some(next);
        player.paused = false;
        player.set_position(0);

        Ok(true)
    }
}

/// URLs go to Lavalink untouched; anything else becomes a search query.
pub fn resolve_identifier(query: &str, search_prefix: &str) -> String {
    let query = query.trim();
    match url::Url::parse(query) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => query.to_string(),
        _ => format!("{}:{}", search_prefix, query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::lavalink::MockLavalinkApi;
    use crate::audio::model::{fixtures::track, PlayerUpdateState};
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(10);
    const CHANNEL: ChannelId = ChannelId::new(20);
    const USER: UserId = UserId::new(30);

    fn voice() -> VoiceState {
        VoiceState {
            token: "t".into(),
            endpoint: "e".into(),
            session_id: "s".into(),
        }
    }

    fn accepting_api() -> MockLavalinkApi {
        let mut api = MockLavalinkApi::new();
        api.expect_update_player().returning(|_, _, _| Ok(()));
        api.expect_destroy_player().returning(|_| Ok(()));
        api
    }

    async fn manager_with(api: MockLavalinkApi, titles: &[&str]) -> PlayerManager {
        let manager = PlayerManager::new(Arc::new(api), 80, "ytsearch");
        manager.connect(GUILD, CHANNEL, voice()).await.unwrap();
        let tracks = titles.iter().map(|t| track(t, 180_000)).collect();
        manager.enqueue(GUILD, tracks, USER).await.unwrap();
        manager
    }

    fn end_event(reason: TrackEndReason) -> NodeEvent {
        NodeEvent::Track {
            guild_id: GUILD,
            event: TrackEvent::TrackEndEvent {
                guild_id: GUILD.to_string(),
                track: track("old", 1000),
                reason,
            },
        }
    }

    async fn current_title(manager: &PlayerManager) -> Option<String> {
        manager
            .snapshot(GUILD)
            .await
            .and_then(|s| s.current)
            .map(|c| c.title().to_string())
    }

    #[tokio::test]
    async fn test_start_if_idle_plays_first_with_volume() {
        let mut api = MockLavalinkApi::new();
        api.expect_update_player()
            .withf(|_, update, _| update.voice.is_some())
            .times(1)
            .returning(|_, _, _| Ok(()));
        api.expect_update_player()
            .withf(|guild, update, no_replace| {
                *guild == GUILD
                    && update.volume == Some(80)
                    && update.track.as_ref().and_then(|t| t.encoded.as_deref()) == Some("enc:a")
                    && !*no_replace
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let manager = manager_with(api, &["a", "b"]).await;
        assert!(manager.start_if_idle(GUILD).await.unwrap());
        assert!(!manager.start_if_idle(GUILD).await.unwrap());
        assert_eq!(current_title(&manager).await.as_deref(), Some("a"));
        assert_eq!(manager.snapshot(GUILD).await.unwrap().queue_len, 1);
    }

    #[tokio::test]
    async fn test_commands_without_player() {
        let manager = PlayerManager::new(Arc::new(MockLavalinkApi::new()), 100, "ytsearch");
        assert!(matches!(manager.skip(GUILD, 1).await, Err(PlayerError::NoPlayer)));
        assert!(matches!(manager.toggle_pause(GUILD).await, Err(PlayerError::NoPlayer)));
        assert!(matches!(manager.shuffle(GUILD).await, Err(PlayerError::EmptyQueue)));
        assert!(!manager.disconnect(GUILD).await.unwrap());
    }

    #[tokio::test]
    async fn test_skip_bounds() {
        let manager = manager_with(accepting_api(), &["a", "b", "c"]).await;
        manager.start_if_idle(GUILD).await.unwrap();

        let err = manager.skip(GUILD, 4).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot skip 4 tracks; only 2 in the queue.");

        manager.skip(GUILD, 2).await.unwrap();
        assert_eq!(current_title(&manager).await.as_deref(), Some("c"));
        assert_eq!(manager.snapshot(GUILD).await.unwrap().queue_len, 0);
    }

    #[tokio::test]
    async fn test_skip_last_track_stops() {
        let mut api = MockLavalinkApi::new();
        api.expect_update_player()
            .withf(|_, update, _| update.track.as_ref().is_some_and(|t| t.encoded.is_none()))
            .times(1)
            .returning(|_, _, _| Ok(()));
        api.expect_update_player().returning(|_, _, _| Ok(()));

        let manager = manager_with(api, &["only"]).await;
        manager.start_if_idle(GUILD).await.unwrap();
        manager.skip(GUILD, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_clears_queue() {
        let manager = manager_with(accepting_api(), &["a", "b", "c"]).await;
        manager.start_if_idle(GUILD).await.unwrap();
        manager.stop(GUILD).await.unwrap();

        assert_eq!(manager.snapshot(GUILD).await.unwrap().queue_len, 0);
        assert_eq!(manager.handle_event(&end_event(TrackEndReason::Stopped)).await, PlayerChange::Idle);
        assert_eq!(current_title(&manager).await, None);
        assert!(manager.is_connected(GUILD));
    }

    #[tokio::test]
    async fn test_track_end_advances_only_when_allowed() {
        let manager = manager_with(accepting_api(), &["a", "b", "c"]).await;
        manager.start_if_idle(GUILD).await.unwrap();

        assert_eq!(
            manager.handle_event(&end_event(TrackEndReason::Replaced)).await,
            PlayerChange::Nothing
        );
        assert_eq!(current_title(&manager).await.as_deref(), Some("a"));

        assert_eq!(
            manager.handle_event(&end_event(TrackEndReason::Finished)).await,
            PlayerChange::Nothing
        );
        assert_eq!(current_title(&manager).await.as_deref(), Some("b"));

        assert_eq!(
            manager.handle_event(&end_event(TrackEndReason::LoadFailed)).await,
            PlayerChange::Nothing
        );
        assert_eq!(current_title(&manager).await.as_deref(), Some("c"));

        assert_eq!(
            manager.handle_event(&end_event(TrackEndReason::Finished)).await,
            PlayerChange::Idle
        );
        assert_eq!(current_title(&manager).await, None);
    }

    #[tokio::test]
    async fn test_cleanup_does_not_advance() {
        let manager = manager_with(accepting_api(), &["a", "b"]).await;
        manager.start_if_idle(GUILD).await.unwrap();

        assert_eq!(manager.handle_event(&end_event(TrackEndReason::Cleanup)).await, PlayerChange::Idle);
        assert_eq!(manager.snapshot(GUILD).await.unwrap().queue_len, 1);
    }

    #[tokio::test]
    async fn test_forward_bounds() {
        let manager = manager_with(accepting_api(), &["a"]).await;
        assert!(matches!(manager.forward(GUILD, 10).await, Err(PlayerError::NothingPlaying)));

        manager.start_if_idle(GUILD).await.unwrap();
        manager.set_paused(GUILD, true).await.unwrap();
        manager
            .handle_event(&NodeEvent::PlayerUpdate {
                guild_id: GUILD,
                state: PlayerUpdateState {
                    time: 0,
                    position: 0,
                    connected: true,
                    ping: 10,
                },
            })
            .await;

        assert_eq!(manager.forward(GUILD, 30).await.unwrap(), 30_000);
        assert!(matches!(manager.forward(GUILD, 150).await, Err(PlayerError::ForwardPastEnd)));
        assert_eq!(manager.forward(GUILD, 149).await.unwrap(), 179_000);
    }

    #[tokio::test]
    async fn test_toggle_and_nightcore() {
        let manager = manager_with(accepting_api(), &["a"]).await;
        manager.start_if_idle(GUILD).await.unwrap();

        assert!(manager.toggle_pause(GUILD).await.unwrap());
        assert!(!manager.toggle_pause(GUILD).await.unwrap());

        manager.set_nightcore(GUILD, true).await.unwrap();
        assert!(manager.snapshot(GUILD).await.unwrap().nightcore);
        manager.set_nightcore(GUILD, false).await.unwrap();
        assert!(!manager.snapshot(GUILD).await.unwrap().nightcore);
    }

    #[tokio::test]
    async fn test_latest_action_persistence() {
        let manager = manager_with(accepting_api(), &["a"]).await;
        let start = NodeEvent::Track {
            guild_id: GUILD,
            event: TrackEvent::TrackStartEvent {
                guild_id: GUILD.to_string(),
                track: track("a", 1000),
            },
        };

        manager.set_latest_action(GUILD, "Paused by Ana", false);
        assert_eq!(manager.handle_event(&start).await, PlayerChange::TrackStarted);
        assert_eq!(manager.take_latest_action(GUILD), None);

        manager.set_latest_action(GUILD, "Skipped by Ana", true);
        manager.handle_event(&start).await;
        assert_eq!(manager.take_latest_action(GUILD).as_deref(), Some("Skipped by Ana"));
        assert_eq!(manager.take_latest_action(GUILD), None);
    }

    #[tokio::test]
    async fn test_failed_voice_update_forgets_player() {
        let mut api = MockLavalinkApi::new();
        api.expect_update_player()
            .returning(|_, _, _| Err(LavalinkError::NoSession));

        let manager = PlayerManager::new(Arc::new(api), 100, "ytsearch");
        assert!(manager.connect(GUILD, CHANNEL, voice()).await.is_err());
        assert!(!manager.is_connected(GUILD));
    }

    #[tokio::test]
    async fn test_set_channel_follows_bot_moves() {
        let manager = manager_with(accepting_api(), &[]).await;
        let moved = ChannelId::new(21);

        assert!(!manager.set_channel(GUILD, CHANNEL).await);
        assert!(manager.set_channel(GUILD, moved).await);
        assert_eq!(manager.snapshot(GUILD).await.unwrap().channel_id, moved);

        assert!(!manager.set_channel(GuildId::new(99), moved).await);
    }

    #[tokio::test]
    async fn test_update_voice_patches_existing_player_only() {
        let mut api = MockLavalinkApi::new();
        api.expect_update_player()
            .withf(|_, update, _| update.voice.as_ref().is_some_and(|v| v.endpoint == "e"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        api.expect_update_player()
            .withf(|_, update, _| update.voice.as_ref().is_some_and(|v| v.endpoint == "new-endpoint"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let manager = PlayerManager::new(Arc::new(api), 100, "ytsearch");
        assert!(!manager.update_voice(GUILD, voice()).await.unwrap());

        manager.connect(GUILD, CHANNEL, voice()).await.unwrap();
        let moved = VoiceState {
            endpoint: "new-endpoint".into(),
            ..voice()
        };
        assert!(manager.update_voice(GUILD, moved).await.unwrap());
    }

    #[tokio::test]
    async fn test_unrecoverable_voice_close() {
        let manager = manager_with(accepting_api(), &[]).await;
        let closed = |code, by_remote| NodeEvent::Track {
            guild_id: GUILD,
            event: TrackEvent::WebSocketClosedEvent {
                guild_id: GUILD.to_string(),
                code,
                reason: "closed".into(),
                by_remote,
            },
        };

        assert_eq!(manager.handle_event(&closed(4014, true)).await, PlayerChange::VoiceClosed);
        assert_eq!(manager.handle_event(&closed(4006, true)).await, PlayerChange::VoiceClosed);
        assert_eq!(manager.handle_event(&closed(4006, false)).await, PlayerChange::Nothing);
        assert_eq!(manager.handle_event(&closed(1000, true)).await, PlayerChange::Nothing);
    }

    #[tokio::test]
    async fn test_reset_all_forgets_every_player() {
        let manager = manager_with(accepting_api(), &["a"]).await;
        let other = GuildId::new(11);
        manager.connect(other, CHANNEL, voice()).await.unwrap();

        let mut reset = manager.reset_all();
        reset.sort();
        assert_eq!(reset, vec![GUILD, other]);
        assert!(!manager.is_connected(GUILD));
        assert!(!manager.is_connected(other));
        assert!(manager.guilds().is_empty());
        assert!(manager.reset_all().is_empty());
    }

    #[tokio::test]
    async fn test_search_uses_prefix() {
        let mut api = MockLavalinkApi::new();
        api.expect_load_tracks()
            .withf(|identifier| identifier == "scsearch:lofi beats")
            .times(1)
            .returning(|_| Ok(LoadResult::Empty {}));

        let manager = PlayerManager::new(Arc::new(api), 100, "scsearch");
        assert_eq!(manager.search("  lofi beats ").await.unwrap(), LoadResult::Empty {});
    }

    #[test]
    fn test_resolve_identifier() {
        assert_eq!(
            resolve_identifier("https://youtu.be/dQw4w9WgXcQ", "ytsearch"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
        assert_eq!(resolve_identifier("never gonna", "ytsearch"), "ytsearch:never gonna");
        assert_eq!(resolve_identifier("ftp://x", "ytsearch"), "ytsearch:ftp://x");
    }
}
