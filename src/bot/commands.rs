use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId, Permissions},
    prelude::Context,
};

pub const PLAYBACK_COMMANDS: &[&str] = &[
    "play", "stop", "skip", "toggle", "disconnect", "shuffle", "queue", "forward", "nightcore", "247",
];

pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        setup_command(),
        play_command(),
        stop_command(),
        skip_command(),
        toggle_command(),
        disconnect_command(),
        shuffle_command(),
        queue_command(),
        forward_command(),
        nightcore_command(),
        create_dj_command(),
        remove_dj_command(),
        stay_247_command(),
        help_command(),
    ]
}

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    serenity::model::application::Command::set_global_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

// Configuración

fn setup_command() -> CreateCommand {
    CreateCommand::new("setup")
        .description("Create a dedicated music request channel with persistent player status.")
        .default_member_permissions(Permissions::MANAGE_GUILD)
}

fn create_dj_command() -> CreateCommand {
    CreateCommand::new("create_dj")
        .description("Create a DJ role to restrict music channel access and command usage.")
        .default_member_permissions(Permissions::MANAGE_ROLES)
}

fn remove_dj_command() -> CreateCommand {
    CreateCommand::new("remove_dj")
        .description("Remove the DJ role and make the music channel public.")
        .default_member_permissions(Permissions::MANAGE_ROLES)
}

fn stay_247_command() -> CreateCommand {
    CreateCommand::new("247")
        .description("Toggle 24/7 mode for the music channel.")
}

// Reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song with the given query.")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "Song name or URL")
                .required(true),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop")
        .description("Stop playback and clear the queue.")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Skip the current song.")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "count",
                "How many tracks to skip (default = 1)",
            )
            .min_int_value(1),
        )
}

fn toggle_command() -> CreateCommand {
    CreateCommand::new("toggle")
        .description("Toggle pause/resume of the current song.")
}

fn disconnect_command() -> CreateCommand {
    CreateCommand::new("disconnect")
        .description("Disconnect the player.")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle")
        .description("Shuffle the current queue of songs.")
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Display the current queue.")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "page_size",
                "Number of songs to display per page [10-25]",
            )
            .min_int_value(10)
            .max_int_value(25),
        )
}

fn forward_command() -> CreateCommand {
    CreateCommand::new("forward")
        .description("Forward song by a given number of seconds")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "seconds",
                "Number of seconds to skip forward",
            )
            .min_int_value(1)
            .required(true),
        )
}

fn nightcore_command() -> CreateCommand {
    CreateCommand::new("nightcore")
        .description("Toggle the Nightcore effect (timescale) on or off.")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "mode", "Toggle Nightcore effect")
                .add_int_choice("Off", 0)
                .add_int_choice("On", 1)
                .required(true),
        )
}

// Información

fn help_command() -> CreateCommand {
    CreateCommand::new("help")
        .description("Get information on how to set up the music bot and usage instructions.")
}
