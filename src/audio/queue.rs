use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use crate::audio::model::Track;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTrack {
    pub track: Track,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl QueuedTrack {
    pub fn new(track: Track, requested_by: UserId) -> Self {
        Self {
            track,
            requested_by,
            added_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &str {
        self.track.title()
    }
}

/// FIFO de canciones pendientes de una guild
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: VecDeque<QueuedTrack>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola
    pub fn push(&mut self, item: QueuedTrack) {
        debug!("➕ Agregado a la cola: {}", item.title());
        self.items.push_back(item);
    }

    /// Agrega múltiples tracks (playlist)
    pub fn extend(&mut self, items: impl IntoIterator<Item = QueuedTrack>) -> usize {
        let before = self.items.len();
        self.items.extend(items);
        let added = self.items.len() - before;
        info!("➕ Agregadas {} canciones a la cola", added);
        added
    }

    /// Obtiene el siguiente track (FIFO)
    pub fn pop(&mut self) -> Option<QueuedTrack> {
        let next = self.items.pop_front();
        if let Some(ref item) = next {
            debug!("➡️ Siguiente en cola: {}", item.title());
        }
        next
    }

    /// Elimina el track en `index` (base 0)
    pub fn delete(&mut self, index: usize) -> Option<QueuedTrack> {
        let removed = self.items.remove(index);
        if removed.is_some() {
            debug!("❌ Track eliminado en posición {}", index);
        }
        removed
    }

    /// Descarta los primeros `count` tracks y devuelve cuántos se quitaron
    pub fn drop_front(&mut self, count: usize) -> usize {
        let dropped = count.min(self.items.len());
        self.items.drain(..dropped);
        dropped
    }

    /// Mezcla la cola
    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Cola mezclada ({} canciones)", self.items.len());
    }

    /// Limpia la cola
    pub fn clear(&mut self) {
        self.items.clear();
        debug!("🗑️ Cola limpiada");
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedTrack> {
        self.items.iter()
    }

    pub fn snapshot(&self) -> Vec<QueuedTrack> {
        self.items.iter().cloned().collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.items
            .iter()
            .filter(|item| !item.track.info.is_stream)
            .map(|item| item.track.length())
            .sum()
    }

    /// Obtiene una página de la cola. `page` empieza en 1 y se ajusta al
    /// rango válido.
    pub fn page(&self, page: usize, page_size: usize) -> QueuePage {
        let page_size = page_size.max(1);
        let total_items = self.items.len();
        let total_pages = total_items.div_ceil(page_size).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * page_size;

        QueuePage {
            items: self
                .items
                .iter()
                .enumerate()
                .skip(start)
                .take(page_size)
                .map(|(i, item)| (i + 1, item.clone()))
                .collect(),
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    /// Items with their 1-based position in the whole queue
    pub items: Vec<(usize, QueuedTrack)>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl QueuePage {
    pub fn has_prev(&self) -> bool {
        self.current_page > 1
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }
}
