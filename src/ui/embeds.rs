use serenity::builder::{CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter};

use crate::audio::queue::{QueuePage, QueuedTrack};
use crate::ui::PanelStyle;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const NOW_PLAYING_BLUE: Colour = Colour::BLUE;
    pub const QUEUE_PURPLE: Colour = Colour::PURPLE;
    pub const IDLE_GRAY: Colour = Colour::from_rgb(108, 117, 125);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
}

/// Embed del panel mientras suena una canción
pub fn now_playing_embed(item: &QueuedTrack, style: &PanelStyle, footer: Option<&str>) -> CreateEmbed {
    let info = &item.track.info;

    let mut author = CreateEmbedAuthor::new("Now Playing");
    if let Some(gif) = &style.spin_gif_url {
        author = author.icon_url(gif);
    }

    let duration = if info.is_stream {
        "Live".to_string()
    } else {
        format_duration(info.length)
    };

    let mut embed = CreateEmbed::new()
        .title(&info.title)
        .color(colors::NOW_PLAYING_BLUE)
        .author(author)
        .field("Requested by", format!("<@{}>", item.requested_by), true)
        .field("Duration", duration, true);

    if let Some(uri) = &info.uri {
        embed = embed.url(uri);
    }

    if let Some(image) = info.artwork_url.as_ref().or(style.idle_image_url.as_ref()) {
        embed = embed.image(image);
    }

    with_footer(embed, footer)
}

/// Embed del panel cuando no hay nada sonando
pub fn default_embed(style: &PanelStyle, footer: Option<&str>) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("Now Playing")
        .description("No song currently playing")
        .color(colors::IDLE_GRAY);

    if let Some(image) = &style.idle_image_url {
        embed = embed.image(image);
    }

    with_footer(embed, footer)
}

fn with_footer(embed: CreateEmbed, footer: Option<&str>) -> CreateEmbed {
    match footer.filter(|text| !text.is_empty()) {
        Some(text) => embed.footer(CreateEmbedFooter::new(text)),
        None => embed,
    }
}

pub fn queue_embed(page: &QueuePage) -> CreateEmbed {
    CreateEmbed::new()
        .title("Queue")
        .description(queue_description(page))
        .color(colors::QUEUE_PURPLE)
}

pub fn queue_description(page: &QueuePage) -> String {
    let lines: Vec<String> = page
        .items
        .iter()
        .map(|(position, item)| queue_line(*position, item))
        .collect();

    format!(
        "Page {}/{}\nTotal tracks: {}\n\n{}",
        page.current_page,
        page.total_pages,
        page.total_items,
        lines.join("\n")
    )
}

fn queue_line(position: usize, item: &QueuedTrack) -> String {
    let info = &item.track.info;
    let length = info.length / 1000;
    let title = match &info.uri {
        Some(uri) => format!("[{}]({})", info.title, uri),
        None => info.title.clone(),
    };
    format!("**{}.** {} — `{}:{:02}`", position, title, length / 60, length % 60)
}

pub fn help_embed() -> CreateEmbed {
    CreateEmbed::new()
        .title("Music Bot Setup Help")
        .description(HELP_TEXT)
        .color(colors::INFO_BLUE)
}

pub const HELP_TEXT: &str = "\
To set up a music request channel in your server, use the `/setup` command. \
This will create a dedicated channel where users can send song requests.

Once the channel is created, you can:
- Use the `/play <song name>` command to play a song.
- Use the `/skip [count]` command to skip the current song.
- Use the `/toggle` command to pause or resume the song.
- Use the `/stop` command to stop playback and clear the queue.
- Use the `/shuffle` command to shuffle the current queue.
- Use the `/247` command to enable or disable 24/7 mode for the music channel.
- Use the `/nightcore` command to toggle the Nightcore effect on or off.
- Use the `/create_dj` command to create a DJ role that can manage the music channel and commands.
- Use the `/remove_dj` command to remove the DJ role and make the channel public.
- Use the `/disconnect` command to disconnect the player and stop playback.
- Use the `/forward <seconds>` command to skip forward by a given number of seconds.
- Use the `/queue` command to display the current queue of songs.

The bot will automatically manage the player and display the current song status in the setup channel.

Happy listening! 🎶";

/// Formatea milisegundos como `m:ss` o `h:mm:ss`
pub fn format_duration(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::model::fixtures::track;
    use crate::audio::queue::TrackQueue;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(59_999), "0:59");
        assert_eq!(format_duration(61_000), "1:01");
        assert_eq!(format_duration(3_600_000), "1:00:00");
        assert_eq!(format_duration(3_725_000), "1:02:05");
    }

    #[test]
    fn test_queue_description() {
        let mut queue = TrackQueue::new();
        queue.push(QueuedTrack::new(track("Alpha", 3_725_000), UserId::new(1)));
        let mut beta = track("Beta", 65_000);
        beta.info.uri = None;
        queue.push(QueuedTrack::new(beta, UserId::new(1)));

        let text = queue_description(&queue.page(1, 10));
        assert_eq!(
            text,
            "Page 1/1\nTotal tracks: 2\n\n\
             **1.** [Alpha](https://example.com/alpha) — `62:05`\n\
             **2.** Beta — `1:05`"
        );
    }

    #[test]
    fn test_footer_is_skipped_when_blank() {
        let style = PanelStyle::default();
        let with = serde_json::to_value(default_embed(&style, Some("Skipped by Ana"))).unwrap();
        assert_eq!(with["footer"]["text"], "Skipped by Ana");

        let without = serde_json::to_value(default_embed(&style, Some(""))).unwrap();
        assert!(without.get("footer").map_or(true, |f| f.is_null()));
    }

    #[test]
    fn test_now_playing_live_and_fallback_image() {
        let style = PanelStyle {
            spin_gif_url: Some("https://cdn/spin.gif".into()),
            idle_image_url: Some("https://cdn/idle.png".into()),
        };
        let mut live = track("Radio", 0);
        live.info.is_stream = true;
        let embed = serde_json::to_value(now_playing_embed(
            &QueuedTrack::new(live, UserId::new(7)),
            &style,
            None,
        ))
        .unwrap();

        assert_eq!(embed["title"], "Radio");
        assert_eq!(embed["author"]["name"], "Now Playing");
        assert_eq!(embed["fields"][0]["value"], "<@7>");
        assert_eq!(embed["fields"][1]["value"], "Live");
        assert_eq!(embed["image"]["url"], "https://cdn/idle.png");
    }
}
