use serenity::{
    all::{ButtonStyle, ReactionType},
    builder::{CreateActionRow, CreateButton},
};

use crate::audio::{player::PlayerSnapshot, queue::QueuePage};

/// IDs personalizados para los botones
pub mod button_ids {
    pub const STOP: &str = "control_stop";
    pub const PAUSE_RESUME: &str = "control_pause_resume";
    pub const SKIP: &str = "control_skip";
    pub const SHUFFLE: &str = "control_shuffle";

    /// Prefijo de paginación: `queue_page:{page}:{page_size}`
    pub const QUEUE_PAGE: &str = "queue_page";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlButton {
    Stop,
    PauseResume,
    Skip,
    Shuffle,
}

impl ControlButton {
    pub const ALL: [ControlButton; 4] = [
        ControlButton::Stop,
        ControlButton::PauseResume,
        ControlButton::Skip,
        ControlButton::Shuffle,
    ];

    pub fn custom_id(self) -> &'static str {
        match self {
            ControlButton::Stop => button_ids::STOP,
            ControlButton::PauseResume => button_ids::PAUSE_RESUME,
            ControlButton::Skip => button_ids::SKIP,
            ControlButton::Shuffle => button_ids::SHUFFLE,
        }
    }

    pub fn from_custom_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|button| button.custom_id() == id)
    }
}

/// Estado visual de un botón del panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSpec {
    pub button: ControlButton,
    pub emoji: &'static str,
    pub disabled: bool,
}

/// Decide emoji y estado de cada botón.
///
/// Without a player, or with nothing playing, every button is disabled.
/// Shuffle needs at least two queued tracks.
pub fn control_specs(state: Option<&PlayerSnapshot>) -> [ControlSpec; 4] {
    let active = state.filter(|s| s.current.is_some());

    ControlButton::ALL.map(|button| {
        let emoji = match button {
            ControlButton::Stop => "\u{23F9}\u{FE0F}",
            ControlButton::PauseResume if active.is_some_and(|s| s.paused) => "\u{25B6}\u{FE0F}",
            ControlButton::PauseResume => "\u{23F8}\u{FE0F}",
            ControlButton::Skip => "\u{23ED}\u{FE0F}",
            ControlButton::Shuffle => "🔀",
        };

        let disabled = match (active, button) {
            (None, _) => true,
            (Some(s), ControlButton::Shuffle) => s.queue_len <= 1,
            _ => false,
        };

        ControlSpec { button, emoji, disabled }
    })
}

/// Fila de controles del panel
pub fn control_row(state: Option<&PlayerSnapshot>) -> CreateActionRow {
    let buttons = control_specs(state)
        .into_iter()
        .map(|spec| {
            CreateButton::new(spec.button.custom_id())
                .emoji(ReactionType::Unicode(spec.emoji.to_string()))
                .style(ButtonStyle::Secondary)
                .disabled(spec.disabled)
        })
        .collect();

    CreateActionRow::Buttons(buttons)
}

/// Controles de paginación para la cola
pub fn queue_nav_row(page: &QueuePage, page_size: usize) -> CreateActionRow {
    let prev = CreateButton::new(queue_page_id(page.current_page.saturating_sub(1).max(1), page_size, "prev"))
        .label("⬅️ Prev")
        .style(ButtonStyle::Secondary)
        .disabled(!page.has_prev());

    let next = CreateButton::new(queue_page_id(page.current_page + 1, page_size, "next"))
        .label("Next ➡️")
        .style(ButtonStyle::Secondary)
        .disabled(!page.has_next());

    CreateActionRow::Buttons(vec![prev, next])
}

fn queue_page_id(page: usize, page_size: usize, direction: &str) -> String {
    format!("{}:{}:{}:{}", button_ids::QUEUE_PAGE, page, page_size, direction)
}

/// Devuelve `(page, page_size)` de un botón de paginación.
pub fn parse_queue_page(custom_id: &str) -> Option<(usize, usize)> {
    let mut parts = custom_id.split(':');
    if parts.next()? != button_ids::QUEUE_PAGE {
        return None;
    }
    let page = parts.next()?.parse().ok()?;
    let page_size = parts.next()?.parse().ok()?;
    Some((page, page_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::model::fixtures::track;
    use crate::audio::queue::QueuedTrack;
    use serenity::model::id::{ChannelId, UserId};

    fn snapshot(playing: bool, paused: bool, queue_len: usize) -> PlayerSnapshot {
        PlayerSnapshot {
            channel_id: ChannelId::new(1),
            current: playing.then(|| QueuedTrack::new(track("x", 1000), UserId::new(1))),
            paused,
            position: 0,
            queue_len,
            nightcore: false,
        }
    }

    fn disabled(specs: &[ControlSpec; 4]) -> Vec<bool> {
        specs.iter().map(|s| s.disabled).collect()
    }

    #[test]
    fn test_everything_disabled_without_player() {
        assert_eq!(disabled(&control_specs(None)), vec![true; 4]);
        assert_eq!(disabled(&control_specs(Some(&snapshot(false, false, 3)))), vec![true; 4]);
    }

    #[test]
    fn test_pause_emoji_and_shuffle_rule() {
        let specs = control_specs(Some(&snapshot(true, true, 1)));
        assert_eq!(specs[1].emoji, "▶️");
        assert_eq!(disabled(&specs), vec![false, false, false, true]);

        let specs = control_specs(Some(&snapshot(true, false, 2)));
        assert_eq!(specs[1].emoji, "⏸️");
        assert!(specs[..3].iter().all(|spec| spec.emoji.ends_with('\u{FE0F}')));
        assert_eq!(disabled(&specs), vec![false; 4]);
    }

    #[test]
    fn test_custom_ids_round_trip() {
        for button in ControlButton::ALL {
            assert_eq!(ControlButton::from_custom_id(button.custom_id()), Some(button));
        }
        assert_eq!(ControlButton::from_custom_id("control_loop"), None);
    }

    #[test]
    fn test_queue_page_ids() {
        assert_eq!(parse_queue_page(&queue_page_id(3, 20, "next")), Some((3, 20)));
        assert_eq!(parse_queue_page("queue_page:x:20:next"), None);
        assert_eq!(parse_queue_page("control_stop"), None);
    }
}
