use dashmap::DashMap;
use serenity::model::{
    id::{ChannelId, GuildId, RoleId, UserId},
    Permissions,
};
use serenity::prelude::Context;
use std::time::{Duration, Instant};

use crate::bot::ActionError;

/// Ventanas de debounce por acción
pub mod windows {
    use std::time::Duration;

    pub const PLAY: Duration = Duration::from_millis(100);
    pub const FORWARD: Duration = Duration::from_millis(500);
    pub const CONTROL: Duration = Duration::from_secs(1);
}

/// Per-guild "busy until" map. An action claims the guild for its window;
/// anything arriving before the window ends is rejected.
#[derive(Debug, Default)]
pub struct Debouncer {
    busy_until: DashMap<GuildId, Instant>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, guild_id: GuildId, window: Duration) -> Result<(), ActionError> {
        let now = Instant::now();
        let mut busy_until = self.busy_until.entry(guild_id).or_insert(now);

        if *busy_until > now {
            return Err(ActionError::Busy);
        }

        *busy_until = now + window;
        Ok(())
    }
}

/// Voice precheck: the user must be in a voice channel and, when the bot is
/// already connected, in the same one. Returns the user's channel.
pub fn check_voice(
    user_channel: Option<ChannelId>,
    bot_channel: Option<ChannelId>,
) -> Result<ChannelId, ActionError> {
    let user_channel = user_channel.ok_or(ActionError::NotInVoice)?;

    match bot_channel {
        Some(bot_channel) if bot_channel != user_channel => Err(ActionError::OtherChannel(bot_channel)),
        _ => Ok(user_channel),
    }
}

/// Voice channels of `user_id` and of the bot, read from the cache.
pub fn voice_channels(ctx: &Context, guild_id: GuildId, user_id: UserId) -> (Option<ChannelId>, Option<ChannelId>) {
    let bot_id = ctx.cache.current_user().id;
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return (None, None);
    };

    let channel_of = |id: UserId| guild.voice_states.get(&id).and_then(|vs| vs.channel_id);
    (channel_of(user_id), channel_of(bot_id))
}

/// Whether a member may use playback commands.
///
/// A stored DJ role only gates commands while it still exists in the guild.
pub fn dj_allows(dj_role: Option<RoleId>, role_exists: bool, member_roles: &[RoleId]) -> bool {
    match dj_role {
        Some(role) if role_exists => member_roles.contains(&role),
        _ => true,
    }
}

/// Runtime check behind the declared default member permissions.
pub fn require_permission(
    member_permissions: Option<Permissions>,
    needed: Permissions,
    label: &'static str,
) -> Result<(), ActionError> {
    match member_permissions {
        Some(p) if p.administrator() || p.contains(needed) => Ok(()),
        _ => Err(ActionError::MissingPermission(label)),
    }
}

/// Non-bot members in `channel_id`, from the cached voice states.
pub fn humans_in_channel(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> usize {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return 0;
    };

    guild
        .voice_states
        .values()
        .filter(|vs| vs.channel_id == Some(channel_id))
        .filter(|vs| {
            let is_bot = vs
                .member
                .as_ref()
                .map(|m| m.user.bot)
                .or_else(|| guild.members.get(&vs.user_id).map(|m| m.user.bot))
                .unwrap_or(false);
            !is_bot
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(1);

    #[test]
    fn test_debounce_window() {
        let debouncer = Debouncer::new();
        assert!(debouncer.try_acquire(GUILD, Duration::from_secs(5)).is_ok());
        assert!(matches!(
            debouncer.try_acquire(GUILD, Duration::from_secs(5)),
            Err(ActionError::Busy)
        ));
        // Otra guild no se ve afectada
        assert!(debouncer.try_acquire(GuildId::new(2), Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_debounce_releases_after_window() {
        let debouncer = Debouncer::new();
        assert!(debouncer.try_acquire(GUILD, Duration::from_millis(20)).is_ok());
        std::thread::sleep(Duration::from_millis(40));
        assert!(debouncer.try_acquire(GUILD, Duration::from_millis(20)).is_ok());
    }

    #[test]
    fn test_busy_message() {
        assert_eq!(
            ActionError::Busy.to_string(),
            "Too many button presses at once—please wait a moment."
        );
    }

    #[test]
    fn test_voice_precheck() {
        let a = ChannelId::new(10);
        let b = ChannelId::new(11);

        assert!(matches!(check_voice(None, None), Err(ActionError::NotInVoice)));
        assert_eq!(check_voice(Some(a), None).unwrap(), a);
        assert_eq!(check_voice(Some(a), Some(a)).unwrap(), a);

        let err = check_voice(Some(a), Some(b)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "🚫 You must be in the same voice channel as the bot (<#11>)."
        );
    }

    #[test]
    fn test_dj_role_decision() {
        let dj = RoleId::new(5);
        assert!(dj_allows(None, false, &[]));
        assert!(dj_allows(Some(dj), false, &[]));
        assert!(!dj_allows(Some(dj), true, &[RoleId::new(6)]));
        assert!(dj_allows(Some(dj), true, &[RoleId::new(6), dj]));
    }

    #[test]
    fn test_require_permission() {
        assert!(require_permission(Some(Permissions::MANAGE_GUILD), Permissions::MANAGE_GUILD, "Manage Server").is_ok());
        assert!(require_permission(Some(Permissions::ADMINISTRATOR), Permissions::MANAGE_ROLES, "Manage Roles").is_ok());

        let err = require_permission(Some(Permissions::SEND_MESSAGES), Permissions::MANAGE_ROLES, "Manage Roles")
            .unwrap_err();
        assert_eq!(err.to_string(), "🚫 You need the `Manage Roles` permission(s) to use this command.");
        assert!(require_permission(None, Permissions::MANAGE_ROLES, "Manage Roles").is_err());
    }
}
