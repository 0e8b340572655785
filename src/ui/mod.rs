//! Discord presentation: embeds and component rows.

pub mod buttons;
pub mod embeds;

use crate::config::Config;

/// Images used by the player panel.
#[derive(Debug, Clone, Default)]
pub struct PanelStyle {
    pub spin_gif_url: Option<String>,
    pub idle_image_url: Option<String>,
}

impl PanelStyle {
    pub fn from_config(config: &Config) -> Self {
        Self {
            spin_gif_url: config.now_playing_spin_gif_url.clone(),
            idle_image_url: config.no_song_playing_image_url.clone(),
        }
    }
}
