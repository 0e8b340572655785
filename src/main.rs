use anyhow::{Context as _, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod dashboard;
mod storage;
mod ui;

use crate::audio::{
    lavalink::LavalinkRest,
    player::PlayerManager,
    socket::{self, SocketConfig},
};
use crate::bot::{BotState, MusicBot};
use crate::config::Config;
use crate::storage::SetupStore;

/// Intervalo entre intentos mientras Lavalink arranca
const LAVALINK_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar configuración (.env incluido)
    let config = Config::load()?;

    // Inicializar logging
    let crate_level = if config.log_level == "debug" { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("molten_music={}", crate_level).parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Molten Music v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    info!("{}", config.summary());

    // Datos de los canales de peticiones
    let store = Arc::new(SetupStore::open(config.setup_channels_path()).await?);

    // Esperar a que Lavalink responda
    info!("🎼 Esperando a Lavalink en {}...", config.lavalink_rest_url());
    let rest = Arc::new(LavalinkRest::new(&config)?);
    let node = rest.wait_until_ready(LAVALINK_POLL_INTERVAL, None).await?;
    info!("🧩 Fuentes de Lavalink: {}", node.source_managers.join(", "));

    let players = Arc::new(PlayerManager::new(
        rest.clone(),
        config.bot_volume,
        config.search_prefix.clone(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Crear handler del bot
    let token = config.discord_token.clone();
    let socket_url = config.lavalink_ws_url();
    let password = config.lavalink_password.clone();

    let handler = MusicBot::new(Arc::new(BotState::new(config, store, players)));
    let node_events = handler.node_events();

    // Construir cliente
    let mut client = Client::builder(&token, intents)
        .event_handler(handler)
        .register_songbird()
        .await
        .context("No se pudo crear el cliente de Discord")?;

    // Conectar el WebSocket de Lavalink con el id del bot
    let user_id = client.http.get_current_user().await?.id;
    let (events, _socket) = socket::spawn(SocketConfig::new(socket_url, password, user_id), rest.session());
    node_events.lock().replace(events);
    info!("✅ WebSocket de Lavalink iniciado para {}", user_id);

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Sale con éxito solo si Lavalink responde a `/v4/info`.
async fn health_check(config: &Config) -> Result<()> {
    let rest = LavalinkRest::new(config)?;

    match rest.info().await {
        Ok(info) => {
            println!("OK (Lavalink {})", info.version.semver);
            Ok(())
        }
        Err(e) => anyhow::bail!("Lavalink no responde: {}", e),
    }
}
