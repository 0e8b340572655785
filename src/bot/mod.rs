//! # Bot Module
//!
//! Discord glue for Molten Music.
//!
//! This module contains the gateway side of the bot, including:
//! - Slash command registration and dispatch
//! - The song request channel and its player panel
//! - Voice state tracking (leave when alone, 24/7 mode)
//! - The task that turns Lavalink events into panel updates
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`] trait. Everything the
//! handlers share lives in [`BotState`], behind an [`Arc`] so background
//! tasks can hold it too:
//!
//! - Per-guild players through [`PlayerManager`]
//! - Persistent setup data via [`SetupStore`]
//! - Debounce and panel bookkeeping
//!
//! ## Example
//!
//! ```rust,no_run
//! use molten_music::bot::{BotState, MusicBot};
//!
//! # fn example(config: molten_music::config::Config, store: std::sync::Arc<molten_music::storage::SetupStore>,
//! #            players: std::sync::Arc<molten_music::audio::player::PlayerManager>) {
//! let state = std::sync::Arc::new(BotState::new(config, store, players));
//! let bot = MusicBot::new(state);
//! let node_events = bot.node_events();
//! # }
//! ```

use anyhow::Result;
use parking_lot::Mutex;
use serenity::{
    all::{
        ActivityData, Context, EventHandler, GuildId, Interaction, Message, OnlineStatus, Ready,
        VoiceServerUpdateEvent, VoiceState,
    },
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{broadcast, mpsc::UnboundedReceiver};
use tracing::{debug, error, info, warn};

pub mod actions;
pub mod commands;
pub mod events;
pub mod guards;
pub mod handlers;
pub mod setup;

pub use actions::ActionError;

use crate::{
    audio::{player::PlayerManager, socket::NodeEvent},
    config::Config,
    dashboard,
    storage::SetupStore,
    ui::PanelStyle,
};

/// Receptor de eventos de Lavalink, entregado al bot una vez conectado el socket
pub type NodeEventSlot = Arc<Mutex<Option<UnboundedReceiver<NodeEvent>>>>;

/// State shared by the event handler, the node event loop and the dashboard.
pub struct BotState {
    pub config: Arc<Config>,
    pub store: Arc<SetupStore>,
    pub players: Arc<PlayerManager>,
    pub debouncer: guards::Debouncer,
    pub panels: setup::PanelTracker,
    pub style: PanelStyle,
    /// Avisos de cambio para el dashboard
    changes: broadcast::Sender<()>,
}

impl BotState {
    pub fn new(config: Config, store: Arc<SetupStore>, players: Arc<PlayerManager>) -> Self {
        let style = PanelStyle::from_config(&config);
        let (changes, _) = broadcast::channel(16);

        Self {
            config: Arc::new(config),
            store,
            players,
            debouncer: guards::Debouncer::new(),
            panels: setup::PanelTracker::default(),
            style,
            changes,
        }
    }

    /// Avisa al dashboard de que algo cambió. Sin suscriptores no hace nada.
    pub fn notify_dashboard(&self) {
        let _ = self.changes.send(());
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

/// Main Discord event handler.
///
/// Background work (the Lavalink event loop and the dashboard) starts on
/// the first `ready` only; later `ready` events after a gateway reconnect
/// just refresh the presence and commands.
pub struct MusicBot {
    state: Arc<BotState>,
    node_events: NodeEventSlot,
    started: AtomicBool,
}

impl MusicBot {
    pub fn new(state: Arc<BotState>) -> Self {
        Self {
            state,
            node_events: Arc::new(Mutex::new(None)),
            started: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> Arc<BotState> {
        Arc::clone(&self.state)
    }

    /// Slot where `main` drops the receiver once the Lavalink socket is up.
    pub fn node_events(&self) -> NodeEventSlot {
        Arc::clone(&self.node_events)
    }

    /// Registers slash commands with Discord.
    ///
    /// With `GUILD_ID` set, commands go to that guild only (instant
    /// propagation, meant for development); otherwise they are global.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.state.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    fn start_background_tasks(&self, ctx: &Context) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        match self.node_events.lock().take() {
            Some(events) => {
                let ctx = ctx.clone();
                let state = self.state();
                tokio::spawn(async move {
                    events::run_node_events(ctx, state, events).await;
                });
            }
            None => error!("❌ No hay canal de eventos de Lavalink; los paneles no se actualizarán"),
        }

        if self.state.config.dashboard_enabled {
            let ctx = ctx.clone();
            let state = self.state();
            tokio::spawn(async move {
                if let Err(e) = dashboard::serve(ctx, state).await {
                    error!("❌ Dashboard detenido: {:?}", e);
                }
            });
        }
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        ctx.set_presence(Some(ActivityData::listening("your requests ♫")), OnlineStatus::Online);

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        self.start_background_tasks(&ctx);
    }

    /// Once every guild is cached, drop setup data that points at things
    /// that no longer exist.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        info!("🗂️ Caché lista con {} guilds", guilds.len());

        let state = self.state();
        tokio::spawn(async move {
            setup::validate_setups(&ctx, &state).await;
            state.notify_dashboard();
        });
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::Command(command_interaction) => {
                if let Err(e) = handlers::handle_command(&ctx, command_interaction, &self.state).await {
                    error!("Error manejando comando: {:?}", e);
                }
            }
            Interaction::Component(component_interaction) => {
                if let Err(e) = handlers::handle_component(&ctx, component_interaction, &self.state).await {
                    error!("Error manejando componente: {:?}", e);
                }
            }
            _ => {}
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        if let Err(e) = handlers::handle_setup_message(&ctx, &message, &self.state).await {
            error!("Error manejando mensaje del canal de peticiones: {:?}", e);
        }
    }

    /// Discord moved the call to another voice server; Lavalink needs the
    /// new endpoint and token.
    async fn voice_server_update(&self, ctx: Context, event: VoiceServerUpdateEvent) {
        let Some(guild_id) = event.guild_id else {
            return;
        };
        actions::forward_voice_server(&ctx, &self.state, guild_id, event.token, event.endpoint).await;
    }

    /// Handles voice state updates for users and the bot.
    ///
    /// - **Bot disconnected externally**: forget the player and reset the panel
    /// - **Bot moved**: track the new channel and re-check for listeners
    /// - **Someone left**: leave when no human remains, unless 24/7 mode is on
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|o| o.guild_id)) else {
            return;
        };
        let current_user_id = ctx.cache.current_user().id;

        if new.user_id == current_user_id {
            match new.channel_id {
                None if self.state.players.is_connected(guild_id) => {
                    info!("🔌 Bot desconectado en guild {}", guild_id);

                    if let Err(e) = actions::leave_voice(&ctx, &self.state, guild_id).await {
                        error!("Error limpiando el player: {:?}", e);
                    }
                    setup::refresh_panel(&ctx, &self.state, guild_id).await;
                    self.state.notify_dashboard();
                }
                // Movido a otro canal: contar oyentes en el canal nuevo
                Some(channel_id) => {
                    if self.state.players.set_channel(guild_id, channel_id).await {
                        actions::leave_if_alone(&ctx, &self.state, guild_id).await;
                        self.state.notify_dashboard();
                    }
                }
                None => {}
            }
            return;
        }

        let left_channel = old.as_ref().and_then(|o| o.channel_id);
        if left_channel.is_some() && left_channel != new.channel_id {
            debug!("👤 {} salió de {:?} en guild {}", new.user_id, left_channel, guild_id);
            actions::leave_if_alone(&ctx, &self.state, guild_id).await;
        }

        self.state.notify_dashboard();
    }
}
