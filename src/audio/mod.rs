//! # Audio Module
//!
//! Everything that talks to the Lavalink node.
//!
//! The bot never touches audio bytes itself: Lavalink searches, decodes and
//! streams to Discord's voice servers. This module keeps the state the bot
//! needs to drive it.
//!
//! ## Architecture
//!
//! ### [`model`] - Wire types
//! - Lavalink v4 REST payloads and websocket messages
//!
//! ### [`lavalink`] - REST client
//! - `loadtracks`, player updates and player destruction
//! - [`lavalink::LavalinkApi`] is the seam mocked in tests
//!
//! ### [`socket`] - Websocket session
//! - Receives the session id, player positions and track events
//! - Reconnects with exponential backoff
//!
//! ### [`queue`] - Queue Management
//! - FIFO with shuffle, paging and index removal
//!
//! ### [`player`] - Per-guild players
//! - Playback commands and track advancement on `TrackEndEvent`
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use molten_music::audio::{lavalink::LavalinkRest, player::PlayerManager};
//! use serenity::all::GuildId;
//! use std::sync::Arc;
//!
//! # async fn example(config: &molten_music::config::Config) -> anyhow::Result<()> {
//! let rest = Arc::new(LavalinkRest::new(config)?);
//! let players = PlayerManager::new(rest, config.bot_volume, &config.search_prefix);
//! let guild_id = GuildId::new(123456789);
//!
//! players.skip(guild_id, 1).await?;
//! players.toggle_pause(guild_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod lavalink;
pub mod model;
pub mod player;
pub mod queue;
pub mod socket;
