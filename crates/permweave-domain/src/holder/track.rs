//! Tracks: named, ordered group ladders.

use dashmap::DashMap;

/// Registry of loaded tracks, keyed by lower-cased name.
#[derive(Debug, Default)]
pub struct TrackRegistry {
    tracks: DashMap<String, Vec<String>>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads or replaces a track. Group names are lower-cased.
    pub fn insert<I, S>(&self, name: &str, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let groups = groups
            .into_iter()
            .map(|g| g.as_ref().trim().to_lowercase())
            .collect();
        self.tracks.insert(name.trim().to_lowercase(), groups);
    }

    pub fn remove(&self, name: &str) -> Option<Vec<String>> {
        self.tracks
            .remove(&name.trim().to_lowercase())
            .map(|(_, groups)| groups)
    }

    pub fn groups(&self, name: &str) -> Option<Vec<String>> {
        self.tracks
            .get(&name.trim().to_lowercase())
            .map(|groups| groups.clone())
    }

    pub fn is_loaded(&self, track: &str) -> bool {
        self.tracks.contains_key(track)
    }

    /// `None` when the track is not loaded.
    pub fn contains_group(&self, track: &str, group: &str) -> Option<bool> {
        self.tracks
            .get(track)
            .map(|groups| groups.iter().any(|g| g == group))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tracks.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
