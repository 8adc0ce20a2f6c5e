//! Stream name -> published tracks

use rtcrelay_media::TrackKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// The outbound tracks currently published under one stream name.
/// Either slot may be empty.
pub struct TrackPair<T> {
    pub video: Option<Arc<T>>,
    pub audio: Option<Arc<T>>,
}

impl<T> TrackPair<T> {
    pub fn get(&self, kind: TrackKind) -> Option<&Arc<T>> {
        match kind {
            TrackKind::Video => self.video.as_ref(),
            TrackKind::Audio => self.audio.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: TrackKind) -> &mut Option<Arc<T>> {
        match kind {
            TrackKind::Video => &mut self.video,
            TrackKind::Audio => &mut self.audio,
        }
    }

    pub fn set(&mut self, kind: TrackKind, track: Arc<T>) -> Option<Arc<T>> {
        self.slot_mut(kind).replace(track)
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }

    /// Populated tracks, video first
    pub fn tracks(&self) -> Vec<Arc<T>> {
        self.video.iter().chain(self.audio.iter()).cloned().collect()
    }
}

impl<T> Default for TrackPair<T> {
    fn default() -> Self {
        Self {
            video: None,
            audio: None,
        }
    }
}

impl<T> Clone for TrackPair<T> {
    fn clone(&self) -> Self {
        Self {
            video: self.video.clone(),
            audio: self.audio.clone(),
        }
    }
}

/// What happens to a stream's tracks once its publisher goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackRetention {
    /// Keep them; late subscribers can still attach
    #[default]
    Retain,
    /// Clear the slots the departed publisher filled
    PruneOnDisconnect,
}

pub struct TrackStore<T> {
    pairs: RwLock<HashMap<String, TrackPair<T>>>,
}

impl<T> TrackStore<T> {
    pub fn new() -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
        }
    }

    /// Make sure an (empty) pair exists for `name`
    pub async fn ensure(&self, name: &str) {
        let mut pairs = self.pairs.write().await;
        if !pairs.contains_key(name) {
            pairs.insert(name.to_string(), TrackPair::default());
        }
    }

    /// Snapshot of the tracks under `name`; empty if the name is unknown
    pub async fn get(&self, name: &str) -> TrackPair<T> {
        self.pairs
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Store `track` in the `kind` slot of `name`, returning what it replaced
    pub async fn publish(&self, name: &str, kind: TrackKind, track: Arc<T>) -> Option<Arc<T>> {
        self.pairs
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .set(kind, track)
    }

    /// Clear the slots of `name` that still hold the tracks in `owned`.
    /// Slots taken over by a newer publisher are left alone. The pair is
    /// dropped once both slots are empty.
    pub async fn release(&self, name: &str, owned: &TrackPair<T>) -> usize {
        let mut pairs = self.pairs.write().await;
        let Some(pair) = pairs.get_mut(name) else {
            return 0;
        };

        let mut cleared = 0;
        for kind in [TrackKind::Video, TrackKind::Audio] {
            let (Some(current), Some(mine)) = (pair.get(kind), owned.get(kind)) else {
                continue;
            };
            if Arc::ptr_eq(current, mine) {
                pair.slot_mut(kind).take();
                cleared += 1;
            }
        }

        if pair.is_empty() {
            pairs.remove(name);
        }

        cleared
    }

    #[cfg(test)]
    pub async fn contains(&self, name: &str) -> bool {
        self.pairs.read().await.contains_key(name)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.pairs.read().await.len()
    }

    #[cfg(test)]
    pub async fn is_empty(&self) -> bool {
        self.pairs.read().await.is_empty()
    }
}

impl<T> Default for TrackStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
