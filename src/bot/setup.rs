//! Setup channel, DJ role and the persistent player panel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::{
    builder::{CreateActionRow, CreateChannel, CreateEmbed, CreateMessage, EditMessage, EditRole},
    http::HttpError,
    model::{
        channel::{ChannelType, PermissionOverwrite, PermissionOverwriteType},
        id::{ChannelId, GuildId, MessageId, RoleId},
        Permissions,
    },
    prelude::Context,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::player::PlayerSnapshot;
use crate::bot::{ActionError, BotState};
use crate::ui::{
    buttons::control_row,
    embeds::{default_embed, now_playing_embed},
    PanelStyle,
};

pub const SETUP_CHANNEL_NAME: &str = "🎧song-requests";
pub const DJ_ROLE_NAME: &str = "Molten_DJ";

pub const MISSING_PERMISSIONS: &str = "I need the following permissions: `Connect`, `Embed Links`, \
    `Manage Channels`, `Manage Messages`, `Manage Roles`, `Send Messages`, `Speak` and `View Channels`.";

/// Un panel editado con más de esta antigüedad se reenvía en la siguiente actualización
const PANEL_MAX_AGE_SECS: i64 = 3600;

/// Guilds con más setups que esto se validan con pausa entre cada una
const VALIDATION_PACING_THRESHOLD: usize = 50;
const VALIDATION_PACING: Duration = Duration::from_millis(20);

/// Per-guild panel bookkeeping: old messages waiting to be re-sent and a
/// lock so two refreshes never race to send a new panel.
#[derive(Debug, Default)]
pub struct PanelTracker {
    stale: DashMap<GuildId, MessageId>,
    locks: DashMap<GuildId, Arc<Mutex<()>>>,
}

impl PanelTracker {
    fn lock_for(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(guild_id).or_default())
    }

    fn mark_stale(&self, guild_id: GuildId, message_id: MessageId) {
        self.stale.insert(guild_id, message_id);
    }

    /// Consume la marca si corresponde al panel actual.
    fn take_stale(&self, guild_id: GuildId, message_id: MessageId) -> bool {
        self.stale
            .remove_if(&guild_id, |_, tagged| *tagged == message_id)
            .is_some()
    }
}

/// HTTP status of a failed Discord request.
pub fn http_status(err: &serenity::Error) -> Option<u16> {
    match err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            Some(response.status_code.as_u16())
        }
        _ => None,
    }
}

pub fn panel_is_stale(message_id: MessageId, now: DateTime<Utc>) -> bool {
    now.timestamp() - message_id.created_at().unix_timestamp() > PANEL_MAX_AGE_SECS
}

/// Embed y botones del panel para el estado actual del player.
pub fn render_panel(
    snapshot: Option<&PlayerSnapshot>,
    style: &PanelStyle,
    footer: Option<&str>,
) -> (CreateEmbed, CreateActionRow) {
    match snapshot.and_then(|s| s.current.as_ref()) {
        Some(current) => (now_playing_embed(current, style, footer), control_row(snapshot)),
        None => (default_embed(style, footer), control_row(None)),
    }
}

fn role_exists(ctx: &Context, guild_id: GuildId, role_id: RoleId) -> bool {
    ctx.cache
        .guild(guild_id)
        .is_some_and(|guild| guild.roles.contains_key(&role_id))
}

fn channel_exists(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> bool {
    ctx.cache
        .guild(guild_id)
        .is_some_and(|guild| guild.channels.contains_key(&channel_id))
}

fn everyone(guild_id: GuildId) -> RoleId {
    RoleId::new(guild_id.get())
}

fn public_overwrite(guild_id: GuildId) -> PermissionOverwrite {
    PermissionOverwrite {
        allow: Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNEL,
        deny: Permissions::MANAGE_MESSAGES | Permissions::EMBED_LINKS,
        kind: PermissionOverwriteType::Role(everyone(guild_id)),
    }
}

/// Oculta el canal a @everyone y se lo abre al rol DJ.
async fn restrict_channel(
    ctx: &Context,
    guild_id: GuildId,
    channel_id: ChannelId,
    dj_role: RoleId,
) -> Result<(), serenity::Error> {
    channel_id
        .create_permission(
            &ctx.http,
            PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Role(everyone(guild_id)),
            },
        )
        .await?;

    channel_id
        .create_permission(
            &ctx.http,
            PermissionOverwrite {
                allow: Permissions::VIEW_CHANNEL
                    | Permissions::SEND_MESSAGES
                    | Permissions::MANAGE_MESSAGES
                    | Permissions::EMBED_LINKS,
                deny: Permissions::empty(),
                kind: PermissionOverwriteType::Role(dj_role),
            },
        )
        .await
}

/// Crea el canal de peticiones con su panel inicial.
pub async fn create_setup_channel(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
) -> Result<String, ActionError> {
    match build_setup_channel(ctx, state, guild_id).await {
        Ok(channel_id) => Ok(format!("Music channel created: <#{}>", channel_id)),
        Err(e) if http_status(&e) == Some(403) => {
            warn!("🔒 Sin permisos para crear el canal en guild {}", guild_id);
            Ok(MISSING_PERMISSIONS.to_string())
        }
        Err(e) => Err(e.into()),
    }
}

async fn build_setup_channel(
    ctx: &Context,
    state: &BotState,
    guild_id: GuildId,
) -> Result<ChannelId, serenity::Error> {
    let bot_id = ctx.cache.current_user().id;

    let overwrites = vec![
        PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL
                | Permissions::SEND_MESSAGES
                | Permissions::READ_MESSAGE_HISTORY
                | Permissions::MANAGE_MESSAGES
                | Permissions::EMBED_LINKS,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(bot_id),
        },
        public_overwrite(guild_id),
    ];

    let channel = guild_id
        .create_channel(
            &ctx.http,
            CreateChannel::new(SETUP_CHANNEL_NAME)
                .kind(ChannelType::Text)
                .permissions(overwrites)
                .rate_limit_per_user(2),
        )
        .await?;

    let panel = channel
        .id
        .send_message(
            &ctx.http,
            CreateMessage::new()
                .embed(default_embed(&state.style, None))
                .components(vec![control_row(None)]),
        )
        .await?;

    let dj_role = state
        .store
        .update(guild_id, |setup| {
            setup.channel = Some(channel.id.get());
            setup.message = Some(panel.id.get());
            setup.dj_role_id()
        })
        .await;

    if let Some(role) = dj_role.filter(|role| role_exists(ctx, guild_id, *role)) {
        restrict_channel(ctx, guild_id, channel.id, role).await?;
        info!("🎚️ Permisos del rol DJ aplicados al nuevo canal en guild {}", guild_id);
    }

    info!("🎧 Canal de peticiones creado en guild {}: {}", guild_id, channel.id);
    Ok(channel.id)
}

pub async fn create_dj_role(ctx: &Context, state: &BotState, guild_id: GuildId) -> Result<String, ActionError> {
    if let Some(role) = state.store.get(guild_id).and_then(|s| s.dj_role_id()) {
        if role_exists(ctx, guild_id, role) {
            return Ok(format!("DJ role already exists: <@&{}>", role));
        }
    }

    let builder = EditRole::new()
        .name(DJ_ROLE_NAME)
        .mentionable(true)
        .audit_log_reason("DJ role created via bot command.");

    let role = match guild_id.create_role(&ctx.http, builder).await {
        Ok(role) => role,
        Err(e) if http_status(&e) == Some(403) => {
            return Ok("I do not have permission to create roles.".to_string());
        }
        Err(e) => return Err(e.into()),
    };

    let channel = state
        .store
        .update(guild_id, |setup| {
            setup.dj_role = Some(role.id.get());
            setup.channel_id()
        })
        .await;

    if let Some(channel) = channel.filter(|c| channel_exists(ctx, guild_id, *c)) {
        restrict_channel(ctx, guild_id, channel, role.id).await?;
    }

    info!("🎚️ Rol DJ creado en guild {}: {}", guild_id, role.id);
    Ok(format!("DJ role created successfully: <@&{}>", role.id))
}

pub async fn remove_dj_role(ctx: &Context, state: &BotState, guild_id: GuildId) -> Result<String, ActionError> {
    let Some(role) = state
        .store
        .get(guild_id)
        .and_then(|s| s.dj_role_id())
        .filter(|role| role_exists(ctx, guild_id, *role))
    else {
        return Ok("No DJ role found to remove.".to_string());
    };

    match guild_id.delete_role(&ctx.http, role).await {
        Ok(()) => {}
        Err(e) if http_status(&e) == Some(403) => {
            return Ok("I do not have permission to delete roles.".to_string());
        }
        Err(e) => return Err(e.into()),
    }

    let channel = state
        .store
        .update(guild_id, |setup| {
            setup.dj_role = None;
            setup.channel_id()
        })
        .await;

    if let Some(channel) = channel.filter(|c| channel_exists(ctx, guild_id, *c)) {
        if let Err(e) = channel.create_permission(&ctx.http, public_overwrite(guild_id)).await {
            return Ok(format!("DJ role removed, but failed to update channel permissions: {}", e));
        }
    }

    info!("🎚️ Rol DJ eliminado en guild {}", guild_id);
    Ok("DJ role removed. The music channel is now public for everyone.".to_string())
}

/// Re-renders the guild's panel from the current player state.
///
/// Consumes the pending latest action. A deleted panel is re-sent and its
/// new id persisted; a panel tagged as stale is deleted and re-sent so it
/// stays at the bottom of the channel.
pub async fn refresh_panel(ctx: &Context, state: &BotState, guild_id: GuildId) {
    let Some(setup) = state.store.get(guild_id) else {
        return;
    };
    let Some(channel_id) = setup.channel_id() else {
        return;
    };

    let lock = state.panels.lock_for(guild_id);
    let _guard = lock.lock().await;

    let snapshot = state.players.snapshot(guild_id).await;
    let footer = state.players.take_latest_action(guild_id);
    let (embed, row) = render_panel(snapshot.as_ref(), &state.style, footer.as_deref());

    // Releer: otra actualización pudo haber cambiado el mensaje
    let message_id = state.store.get(guild_id).and_then(|s| s.message_id());

    if let Some(message_id) = message_id {
        if state.panels.take_stale(guild_id, message_id) {
            debug!("♻️ Reenviando panel antiguo en guild {}", guild_id);
            if let Err(e) = channel_id.delete_message(&ctx.http, message_id).await {
                debug!("No se pudo borrar el panel antiguo: {}", e);
            }
        } else {
            let edit = EditMessage::new()
                .embed(embed.clone())
                .components(vec![row.clone()]);

            match channel_id.edit_message(&ctx.http, message_id, edit).await {
                Ok(_) => {
                    if panel_is_stale(message_id, Utc::now()) {
                        state.panels.mark_stale(guild_id, message_id);
                    }
                    return;
                }
                Err(e) if http_status(&e) == Some(404) => {
                    warn!("🔍 Panel de guild {} no encontrado, enviando uno nuevo", guild_id);
                }
                Err(e) => {
                    error!("❌ Error actualizando el panel de guild {}: {}", guild_id, e);
                    return;
                }
            }
        }
    }

    let message = CreateMessage::new().embed(embed).components(vec![row]);
    match channel_id.send_message(&ctx.http, message).await {
        Ok(message) => {
            state
                .store
                .update(guild_id, |setup| setup.message = Some(message.id.get()))
                .await;
        }
        Err(e) => error!("❌ Error enviando el panel de guild {}: {}", guild_id, e),
    }
}

enum SetupCheck {
    GuildGone,
    ChannelGone,
    Present { dj_role_gone: bool },
}

fn check_setup(ctx: &Context, guild_id: GuildId, channel: Option<ChannelId>, dj_role: Option<RoleId>) -> SetupCheck {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return SetupCheck::GuildGone;
    };

    if channel.is_some_and(|c| !guild.channels.contains_key(&c)) {
        return SetupCheck::ChannelGone;
    }

    SetupCheck::Present {
        dj_role_gone: dj_role.is_some_and(|r| !guild.roles.contains_key(&r)),
    }
}

/// Drops stored setups whose guild, channel or panel message no longer
/// exists and forgets DJ roles that were deleted.
pub async fn validate_setups(ctx: &Context, state: &BotState) {
    let guilds = state.store.guilds();
    let pace = guilds.len() > VALIDATION_PACING_THRESHOLD;
    info!("🔎 Validando {} canales de peticiones", guilds.len());

    for guild_id in guilds {
        let Some(setup) = state.store.get(guild_id) else {
            continue;
        };

        match check_setup(ctx, guild_id, setup.channel_id(), setup.dj_role_id()) {
            SetupCheck::GuildGone => {
                warn!("Guild {} no encontrada, eliminando su setup", guild_id);
                state.store.remove(guild_id).await;
            }
            SetupCheck::ChannelGone => {
                warn!("Canal de peticiones de guild {} no encontrado, eliminando su setup", guild_id);
                state.store.remove(guild_id).await;
            }
            SetupCheck::Present { dj_role_gone } => {
                if let (Some(channel), Some(message)) = (setup.channel_id(), setup.message_id()) {
                    if let Err(e) = channel.message(ctx, message).await {
                        if matches!(http_status(&e), Some(403 | 404)) {
                            warn!("Panel de guild {} inaccesible ({}), eliminando su setup", guild_id, e);
                            state.store.remove(guild_id).await;
                            continue;
                        }
                        warn!("No se pudo comprobar el panel de guild {}: {}", guild_id, e);
                    }
                }

                if dj_role_gone {
                    warn!("Rol DJ de guild {} ya no existe, olvidándolo", guild_id);
                    state.store.update(guild_id, |setup| setup.dj_role = None).await;
                }
            }
        }

        if pace {
            tokio::time::sleep(VALIDATION_PACING).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::model::fixtures::track;
    use crate::audio::queue::QueuedTrack;
    use serenity::model::id::UserId;

    const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

    fn message_at(unix_secs: i64) -> MessageId {
        MessageId::new((unix_secs as u64 * 1000 - DISCORD_EPOCH_MS) << 22)
    }

    #[test]
    fn test_panel_age() {
        let sent = 1_704_067_200; // 2024-01-01T00:00:00Z
        let now = |secs: i64| DateTime::<Utc>::from_timestamp(secs, 0).unwrap();

        assert!(!panel_is_stale(message_at(sent), now(sent + 60)));
        assert!(!panel_is_stale(message_at(sent), now(sent + 3600)));
        assert!(panel_is_stale(message_at(sent), now(sent + 3601)));
    }

    #[test]
    fn test_stale_tag_matches_message() {
        let tracker = PanelTracker::default();
        let guild = GuildId::new(1);

        tracker.mark_stale(guild, MessageId::new(5));
        assert!(!tracker.take_stale(guild, MessageId::new(6)));
        assert!(tracker.take_stale(guild, MessageId::new(5)));
        assert!(!tracker.take_stale(guild, MessageId::new(5)));
    }

    #[test]
    fn test_render_panel_picks_embed() {
        let style = PanelStyle::default();

        let (idle, _) = render_panel(None, &style, Some("Stopped by Ana"));
        let idle = serde_json::to_value(idle).unwrap();
        assert_eq!(idle["description"], "No song currently playing");
        assert_eq!(idle["footer"]["text"], "Stopped by Ana");

        let snapshot = PlayerSnapshot {
            channel_id: ChannelId::new(1),
            current: Some(QueuedTrack::new(track("Song", 90_000), UserId::new(2))),
            paused: false,
            position: 0,
            queue_len: 0,
            nightcore: false,
        };
        let (playing, _) = render_panel(Some(&snapshot), &style, None);
        let playing = serde_json::to_value(playing).unwrap();
        assert_eq!(playing["title"], "Song");
        assert_eq!(playing["fields"][1]["value"], "1:30");
    }
}
