use anyhow::Result;
use serenity::{
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup, CreateInteractionResponseMessage,
        EditInteractionResponse,
    },
    model::{
        application::{CommandInteraction, ComponentInteraction},
        channel::Message,
        guild::Member,
        id::{ChannelId, GuildId, MessageId},
        Permissions,
    },
    prelude::Context,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::{
    bot::{
        actions::{self, ActionError, Requester},
        commands::PLAYBACK_COMMANDS,
        guards,
        setup::{self, DJ_ROLE_NAME},
        BotState,
    },
    ui::{
        buttons::{parse_queue_page, queue_nav_row, ControlButton},
        embeds,
    },
};

/// Respuestas de comandos de reproducción
const PLAYBACK_REPLY_TTL: Duration = Duration::from_secs(3);
/// Respuestas de comandos de administración y errores de permisos
const ADMIN_REPLY_TTL: Duration = Duration::from_secs(5);
const QUEUE_VIEW_TTL: Duration = Duration::from_secs(120);

/// Mensajes escritos en el canal de peticiones
const REQUEST_DELETE_DELAY: Duration = Duration::from_millis(200);
const REQUEST_REPLY_TTL: Duration = Duration::from_secs(5);

const DEFAULT_QUEUE_PAGE_SIZE: usize = 20;

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_i64())
}

fn str_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|option| option.name == name)
        .and_then(|option| option.value.as_str())
}

fn requester_of(command_user: &serenity::model::user::User, member: Option<&Member>) -> Requester {
    Requester::new(command_user, member.and_then(|m| m.nick.as_deref()))
}

/// Playback commands require the stored DJ role while it still exists.
fn check_dj(ctx: &Context, state: &BotState, guild_id: GuildId, member: Option<&Member>) -> Result<(), ActionError> {
    let dj_role = state.store.get(guild_id).and_then(|setup| setup.dj_role_id());
    let role_exists = dj_role.is_some_and(|role| {
        ctx.cache
            .guild(guild_id)
            .is_some_and(|guild| guild.roles.contains_key(&role))
    });
    let member_roles = member.map(|m| m.roles.as_slice()).unwrap_or_default();

    if guards::dj_allows(dj_role, role_exists, member_roles) {
        Ok(())
    } else {
        Err(ActionError::MissingPermission(DJ_ROLE_NAME))
    }
}

fn member_permissions(command: &CommandInteraction) -> Option<Permissions> {
    command.member.as_ref().and_then(|member| member.permissions)
}

fn delete_response_after(ctx: &Context, command: &CommandInteraction, delay: Duration) {
    let http = ctx.http.clone();
    let command = command.clone();

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = command.delete_response(&http).await {
            debug!("No se pudo borrar la respuesta de /{}: {}", command.data.name, e);
        }
    });
}

fn delete_message_after(ctx: &Context, channel_id: ChannelId, message_id: MessageId, delay: Duration) {
    let http = ctx.http.clone();

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = channel_id.delete_message(&http, message_id).await {
            debug!("No se pudo borrar el mensaje {}: {}", message_id, e);
        }
    });
}

async fn reply_ephemeral(
    ctx: &Context,
    command: &CommandInteraction,
    content: impl Into<String>,
    ttl: Option<Duration>,
) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await?;

    if let Some(ttl) = ttl {
        delete_response_after(ctx, command, ttl);
    }
    Ok(())
}

fn user_message(result: Result<String, ActionError>) -> String {
    match result {
        Ok(text) => text,
        Err(ActionError::Discord(e)) => {
            error!("❌ Error de Discord ejecutando la acción: {:?}", e);
            ActionError::Discord(e).to_string()
        }
        Err(e) => e.to_string(),
    }
}

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, state: &BotState) -> Result<()> {
    let name = command.data.name.as_str();

    let Some(guild_id) = command.guild_id else {
        return reply_ephemeral(ctx, &command, ActionError::GuildOnly.to_string(), None).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        name, command.user.name, guild_id
    );

    if PLAYBACK_COMMANDS.contains(&name) {
        if let Err(e) = check_dj(ctx, state, guild_id, command.member.as_deref()) {
            return reply_ephemeral(ctx, &command, e.to_string(), Some(ADMIN_REPLY_TTL)).await;
        }
    }

    match name {
        "help" => return handle_help(ctx, &command).await,
        "queue" => return handle_queue(ctx, &command, state, guild_id).await,
        _ => {}
    }

    // Unirse a voz y buscar puede superar los 3 s que da Discord
    command.defer_ephemeral(&ctx.http).await?;

    let requester = requester_of(&command.user, command.member.as_deref());

    let (result, ttl) = match name {
        "setup" => (
            match guards::require_permission(member_permissions(&command), Permissions::MANAGE_GUILD, "Manage Server") {
                Ok(()) => setup::create_setup_channel(ctx, state, guild_id).await,
                Err(e) => Err(e),
            },
            ADMIN_REPLY_TTL,
        ),
        "create_dj" => (
            match guards::require_permission(member_permissions(&command), Permissions::MANAGE_ROLES, "Manage Roles") {
                Ok(()) => setup::create_dj_role(ctx, state, guild_id).await,
                Err(e) => Err(e),
            },
            ADMIN_REPLY_TTL,
        ),
        "remove_dj" => (
            match guards::require_permission(member_permissions(&command), Permissions::MANAGE_ROLES, "Manage Roles") {
                Ok(()) => setup::remove_dj_role(ctx, state, guild_id).await,
                Err(e) => Err(e),
            },
            ADMIN_REPLY_TTL,
        ),
        "play" => {
            let query = str_option(&command, "query").unwrap_or_default();
            (actions::play(ctx, state, guild_id, &requester, query).await, PLAYBACK_REPLY_TTL)
        }
        "stop" => (actions::stop(ctx, state, guild_id, &requester).await, PLAYBACK_REPLY_TTL),
        "skip" => {
            let count = int_option(&command, "count").unwrap_or(1).max(1) as usize;
            (actions::skip(ctx, state, guild_id, &requester, count).await, PLAYBACK_REPLY_TTL)
        }
        "toggle" => (actions::toggle(ctx, state, guild_id, &requester).await, PLAYBACK_REPLY_TTL),
        "disconnect" => (actions::disconnect(ctx, state, guild_id, &requester).await, PLAYBACK_REPLY_TTL),
        "shuffle" => (actions::shuffle(ctx, state, guild_id, &requester).await, PLAYBACK_REPLY_TTL),
        "forward" => {
            let seconds = int_option(&command, "seconds").unwrap_or(1).max(1) as u64;
            (actions::forward(ctx, state, guild_id, &requester, seconds).await, PLAYBACK_REPLY_TTL)
        }
        "nightcore" => {
            let enabled = int_option(&command, "mode").unwrap_or(0) != 0;
            (actions::nightcore(ctx, state, guild_id, &requester, enabled).await, PLAYBACK_REPLY_TTL)
        }
        "247" => (actions::stay_247(ctx, state, guild_id).await, PLAYBACK_REPLY_TTL),
        other => {
            warn!("Comando desconocido: /{}", other);
            (Ok("❌ Unknown command.".to_string()), PLAYBACK_REPLY_TTL)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().content(user_message(result)))
        .await?;
    delete_response_after(ctx, &command, ttl);

    Ok(())
}

async fn handle_help(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .embed(embeds::help_embed())
                    .ephemeral(true),
            ),
        )
        .await?;
    Ok(())
}

async fn handle_queue(ctx: &Context, command: &CommandInteraction, state: &BotState, guild_id: GuildId) -> Result<()> {
    let page_size = int_option(command, "page_size")
        .map(|size| size.clamp(10, 25) as usize)
        .unwrap_or(DEFAULT_QUEUE_PAGE_SIZE);

    match actions::queue(state, guild_id, 1, page_size).await {
        Ok(page) => {
            command
                .create_response(
                    &ctx.http,
                    CreateInteractionResponse::Message(
                        CreateInteractionResponseMessage::new()
                            .embed(embeds::queue_embed(&page))
                            .components(vec![queue_nav_row(&page, page_size)])
                            .ephemeral(true),
                    ),
                )
                .await?;
            delete_response_after(ctx, command, QUEUE_VIEW_TTL);
            Ok(())
        }
        Err(e) => reply_ephemeral(ctx, command, e.to_string(), Some(PLAYBACK_REPLY_TTL)).await,
    }
}

/// Maneja interacciones con botones
pub async fn handle_component(ctx: &Context, component: ComponentInteraction, state: &BotState) -> Result<()> {
    let Some(guild_id) = component.guild_id else {
        return Ok(());
    };
    let custom_id = component.data.custom_id.as_str();

    if let Some((page, page_size)) = parse_queue_page(custom_id) {
        let message = match actions::queue(state, guild_id, page, page_size).await {
            Ok(page) => CreateInteractionResponseMessage::new()
                .embed(embeds::queue_embed(&page))
                .components(vec![queue_nav_row(&page, page_size)]),
            Err(e) => CreateInteractionResponseMessage::new()
                .content(e.to_string())
                .embeds(vec![])
                .components(vec![]),
        };

        component
            .create_response(&ctx.http, CreateInteractionResponse::UpdateMessage(message))
            .await?;
        return Ok(());
    }

    let Some(button) = ControlButton::from_custom_id(custom_id) else {
        warn!("Botón desconocido: {}", custom_id);
        return Ok(());
    };

    debug!("🔘 Botón {:?} pulsado por {} en guild {}", button, component.user.name, guild_id);
    component
        .create_response(&ctx.http, CreateInteractionResponse::Acknowledge)
        .await?;

    let requester = requester_of(&component.user, component.member.as_ref());
    let result = match button {
        ControlButton::Stop => actions::stop(ctx, state, guild_id, &requester).await,
        ControlButton::PauseResume => actions::toggle(ctx, state, guild_id, &requester).await,
        ControlButton::Skip => actions::skip(ctx, state, guild_id, &requester, 1).await,
        ControlButton::Shuffle => actions::shuffle(ctx, state, guild_id, &requester).await,
    };

    // Los aciertos se ven en el panel; solo los errores se responden
    if let Err(e) = result {
        let text = user_message(Err(e));
        component
            .create_followup(
                &ctx.http,
                CreateInteractionResponseFollowup::new().content(text).ephemeral(true),
            )
            .await?;
    }

    Ok(())
}

/// Trata los mensajes del canal de peticiones como `/play`.
pub async fn handle_setup_message(ctx: &Context, message: &Message, state: &BotState) -> Result<()> {
    if message.author.bot {
        return Ok(());
    }
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };
    let Some(setup_channel) = state.store.get(guild_id).and_then(|setup| setup.channel_id()) else {
        return Ok(());
    };
    if message.channel_id != setup_channel {
        return Ok(());
    }

    delete_message_after(ctx, message.channel_id, message.id, REQUEST_DELETE_DELAY);

    let query = message.content.trim();
    if query.is_empty() {
        return Ok(());
    }

    let requester = Requester::new(
        &message.author,
        message.member.as_ref().and_then(|member| member.nick.as_deref()),
    );
    info!("🎶 Petición de {} en guild {}: {}", requester.name, guild_id, query);

    let text = user_message(actions::play(ctx, state, guild_id, &requester, query).await);
    let reply = message.channel_id.say(&ctx.http, text).await?;
    delete_message_after(ctx, reply.channel_id, reply.id, REQUEST_REPLY_TTL);

    Ok(())
}
