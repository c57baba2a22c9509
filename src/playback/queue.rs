use crate::models::Track;
use rand::seq::SliceRandom;

/// Ordered track list plus the index of the playing track.
///
/// Invariant: `current_index < tracks.len()` whenever the queue is
/// non-empty, and `current_index == 0` when it is empty. Every mutation
/// re-derives the index before returning.
#[derive(Debug, Clone, Default)]
pub struct TrackQueue {
    tracks: Vec<Track>,
    current_index: usize,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.current_index)
    }

    /// Identities of every queued track, used as the autoplay exclude list.
    pub fn identities(&self) -> Vec<String> {
        self.tracks
            .iter()
            .map(|t| t.identity().to_string())
            .collect()
    }

    /// Replace the whole queue, pointing at `start_index` (clamped).
    pub fn set_tracks(&mut self, tracks: Vec<Track>, start_index: usize) {
        self.tracks = tracks;
        self.current_index = if self.tracks.is_empty() {
            0
        } else {
            start_index.min(self.tracks.len() - 1)
        };
    }

    pub fn append(&mut self, track: Track) {
        self.tracks.push(track);
    }

    /// Insert directly after the playing track.
    pub fn insert_next(&mut self, track: Track) {
        if self.tracks.is_empty() {
            self.tracks.push(track);
        } else {
            let at = (self.current_index + 1).min(self.tracks.len());
            self.tracks.insert(at, track);
        }
    }

    /// Remove the track at `i`. Out-of-range indices are a no-op.
    ///
    /// Removing an index below the current one shifts the pointer down;
    /// removing the playing track leaves the index numerically unchanged,
    /// which promotes the next track into the current slot without an
    /// explicit advance. That promotion reproduces long-observed behavior
    /// and is relied on by callers; see the tests below before changing it.
    pub fn remove_at(&mut self, i: usize) -> Option<Track> {
        if i >= self.tracks.len() {
            return None;
        }
        let removed = self.tracks.remove(i);
        if i < self.current_index {
            self.current_index -= 1;
        }
        if self.tracks.is_empty() {
            self.current_index = 0;
        } else {
            self.current_index = self.current_index.min(self.tracks.len() - 1);
        }
        Some(removed)
    }

    /// Reorder one track. The index is remapped so it keeps pointing at the
    /// same logical track that was playing before the move.
    pub fn move_item(&mut self, from: usize, to: usize) {
        let len = self.tracks.len();
        if from >= len || to >= len || from == to {
            return;
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);

        if from == self.current_index {
            self.current_index = to;
        } else if from < self.current_index && self.current_index <= to {
            self.current_index -= 1;
        } else if to <= self.current_index && self.current_index < from {
            self.current_index += 1;
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current_index = 0;
    }

    pub fn has_next(&self) -> bool {
        !self.tracks.is_empty() && self.current_index + 1 < self.tracks.len()
    }

    /// Step forward; returns the new current track if there was a next one.
    pub fn advance(&mut self) -> Option<&Track> {
        if self.has_next() {
            self.current_index += 1;
            self.current()
        } else {
            None
        }
    }

    /// Wrap back to the head of the queue (repeat-all).
    pub fn wrap_to_start(&mut self) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        self.current_index = 0;
        self.current()
    }

    /// Step back one track, clamped at the head.
    pub fn step_back(&mut self) -> bool {
        if self.current_index > 0 {
            self.current_index -= 1;
            true
        } else {
            false
        }
    }

    /// Point at the freshly appended last track (autoplay continuation).
    pub fn jump_to_last(&mut self) -> Option<&Track> {
        if self.tracks.is_empty() {
            return None;
        }
        self.current_index = self.tracks.len() - 1;
        self.current()
    }

    /// Shuffle everything after the playing track in place. The playing
    /// track and everything before it stay put.
    pub fn shuffle_upcoming(&mut self) {
        let start = self.current_index + 1;
        if start + 1 < self.tracks.len() {
            self.tracks[start..].shuffle(&mut rand::rng());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str) -> Track {
        Track {
            id: id.to_string(),
            external_id: id.to_string(),
            title: id.to_string(),
            artist: "artist".to_string(),
            duration: 180,
            genre: None,
            thumbnail: None,
            explicit: false,
        }
    }

    fn queue(ids: &[&str], current: usize) -> TrackQueue {
        let mut q = TrackQueue::new();
        q.set_tracks(ids.iter().map(|id| track(id)).collect(), current);
        q
    }

    #[test]
    fn remove_before_current_shifts_index_down() {
        let mut q = queue(&["a", "b", "c"], 1);
        q.remove_at(0);
        assert_eq!(q.current_index(), 0);
        assert_eq!(q.current().unwrap().identity(), "b");
    }

    #[test]
    fn remove_after_current_leaves_index_alone() {
        let mut q = queue(&["a", "b", "c"], 1);
        q.remove_at(2);
        assert_eq!(q.current_index(), 1);
        assert_eq!(q.current().unwrap().identity(), "b");
    }

    #[test]
    fn removing_current_promotes_next_without_advancing() {
        // Queue [A,B,C] with B playing: dropping A then B must leave C
        // current at index 0, never auto-advancing past it.
        let mut q = queue(&["a", "b", "c"], 1);
        q.remove_at(0);
        assert_eq!(q.tracks().len(), 2);
        assert_eq!(q.current_index(), 0);
        assert_eq!(q.current().unwrap().identity(), "b");

        q.remove_at(0);
        assert_eq!(q.tracks().len(), 1);
        assert_eq!(q.current_index(), 0);
        assert_eq!(q.current().unwrap().identity(), "c");
    }

    #[test]
    fn remove_last_track_clamps_index() {
        let mut q = queue(&["a", "b"], 1);
        q.remove_at(1);
        assert_eq!(q.current_index(), 0);
        assert_eq!(q.current().unwrap().identity(), "a");
    }

    #[test]
    fn remove_to_empty_resets_index() {
        let mut q = queue(&["a"], 0);
        q.remove_at(0);
        assert!(q.is_empty());
        assert_eq!(q.current_index(), 0);
        assert!(q.current().is_none());
    }

    #[test]
    fn remove_on_empty_queue_is_a_noop() {
        let mut q = TrackQueue::new();
        assert!(q.remove_at(0).is_none());
        assert_eq!(q.current_index(), 0);
    }

    #[test]
    fn move_current_follows_the_track() {
        let mut q = queue(&["a", "b", "c", "d"], 1);
        q.move_item(1, 3);
        assert_eq!(q.current_index(), 3);
        assert_eq!(q.current().unwrap().identity(), "b");
    }

    #[test]
    fn move_across_current_from_below() {
        let mut q = queue(&["a", "b", "c", "d"], 2);
        q.move_item(0, 3);
        assert_eq!(q.current_index(), 1);
        assert_eq!(q.current().unwrap().identity(), "c");
    }

    #[test]
    fn move_across_current_from_above() {
        let mut q = queue(&["a", "b", "c", "d"], 1);
        q.move_item(3, 0);
        assert_eq!(q.current_index(), 2);
        assert_eq!(q.current().unwrap().identity(), "b");
    }

    #[test]
    fn move_outside_current_is_transparent() {
        let mut q = queue(&["a", "b", "c", "d"], 0);
        q.move_item(2, 3);
        assert_eq!(q.current_index(), 0);
        assert_eq!(q.current().unwrap().identity(), "a");
    }

    #[test]
    fn insert_next_lands_after_current() {
        let mut q = queue(&["a", "b"], 0);
        q.insert_next(track("x"));
        let ids: Vec<&str> = q.tracks().iter().map(|t| t.identity()).collect();
        assert_eq!(ids, vec!["a", "x", "b"]);
        assert_eq!(q.current_index(), 0);
    }

    #[test]
    fn append_never_moves_the_index() {
        let mut q = queue(&["a", "b"], 1);
        q.append(track("x"));
        assert_eq!(q.current_index(), 1);
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn clear_resets_everything() {
        let mut q = queue(&["a", "b"], 1);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.current_index(), 0);
    }

    #[test]
    fn shuffle_upcoming_keeps_current_and_earlier() {
        let mut q = queue(&["a", "b", "c", "d", "e"], 1);
        q.shuffle_upcoming();
        assert_eq!(q.tracks()[0].identity(), "a");
        assert_eq!(q.current().unwrap().identity(), "b");
        let mut rest: Vec<&str> = q.tracks()[2..].iter().map(|t| t.identity()).collect();
        rest.sort_unstable();
        assert_eq!(rest, vec!["c", "d", "e"]);
    }
}
