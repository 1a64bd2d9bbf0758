use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

use crate::sources::Song;

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub song: Song,
    pub added_at: DateTime<Utc>,
}

impl From<Song> for QueueItem {
    fn from(song: Song) -> Self {
        Self {
            song,
            added_at: Utc::now(),
        }
    }
}

/// Cola FIFO de canciones resueltas.
///
/// Sin límite de tamaño y sin deduplicación. El orden de inserción es el
/// orden en que terminó cada resolución. El único mutador es el controlador
/// de reproducción.
#[derive(Debug, Default)]
pub struct SongQueue {
    items: VecDeque<QueueItem>,
}

impl SongQueue {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Agrega una canción al final de la cola.
    pub fn push(&mut self, song: Song) {
        self.items.push_back(QueueItem::from(song));
    }

    /// Extrae la siguiente canción (FIFO).
    pub fn pop_front(&mut self) -> Option<Song> {
        let item = self.items.pop_front()?;
        let waited = (Utc::now() - item.added_at).num_seconds();
        debug!("➡️ Siguiente en cola: {} ({}s en espera)", item.song.title, waited);
        Some(item.song)
    }

    /// Vacía la cola por completo.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Snapshot ordenado para reportes de estado.
    pub fn snapshot(&self) -> Vec<Song> {
        self.items.iter().map(|item| item.song.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;
    use pretty_assertions::assert_eq;

    fn song(title: &str) -> Song {
        Song {
            title: title.to_string(),
            artist: "Artista".to_string(),
            source: SourceKind::YouTube,
            url: format!("https://youtu.be/{}", title),
            original_url: format!("https://youtu.be/{}", title),
            duration: Some(180),
            thumbnail: None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = SongQueue::new();
        queue.push(song("a"));
        queue.push(song("b"));
        queue.push(song("c"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front().unwrap().title, "a");
        assert_eq!(queue.pop_front().unwrap().title, "b");
        assert_eq!(queue.pop_front().unwrap().title, "c");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_clear() {
        let mut queue = SongQueue::new();
        queue.push(song("a"));
        queue.push(song("b"));

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_snapshot_preserves_order() {
        let mut queue = SongQueue::new();
        queue.push(song("a"));
        queue.push(song("b"));

        let titles: Vec<_> = queue.snapshot().into_iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["a", "b"]);
        // el snapshot no consume
        assert_eq!(queue.len(), 2);
    }
}
