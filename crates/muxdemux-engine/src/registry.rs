use std::collections::{HashMap, HashSet};

use muxdemux_channel::{Channel, ChannelConfig};

/// Substream names, their mirror channels, and which have finished.
///
/// A name moves from unknown to known to finished, never back. A name can be
/// known (announced by a peer) without a local mirror ever being created.
#[derive(Debug, Default)]
pub struct Registry {
    streams: HashMap<String, Channel>,
    known: HashSet<String>,
    finished: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mirror channel for `name`, if one exists.
    pub fn get(&self, name: &str) -> Option<Channel> {
        self.streams.get(name).cloned()
    }

    /// The mirror channel for `name`, creating it if needed. Returns whether
    /// it was created.
    pub fn get_or_create(&mut self, name: &str, config: ChannelConfig) -> (Channel, bool) {
        self.known.insert(name.to_string());
        if let Some(stream) = self.streams.get(name) {
            return (stream.clone(), false);
        }
        let stream = Channel::new(config);
        self.streams.insert(name.to_string(), stream.clone());
        (stream, true)
    }

    /// Record `name` as known. Returns true if it was not known before.
    pub fn note(&mut self, name: &str) -> bool {
        self.known.insert(name.to_string())
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    /// Mark `name` finished. Returns true if it was not finished before.
    pub fn mark_finished(&mut self, name: &str) -> bool {
        self.known.insert(name.to_string());
        self.finished.insert(name.to_string())
    }

    pub fn is_finished(&self, name: &str) -> bool {
        self.finished.contains(name)
    }

    /// Every known name has finished.
    pub fn all_finished(&self) -> bool {
        self.known.len() == self.finished.len()
    }

    /// Mirrors that exist and have not finished.
    pub fn open_streams(&self) -> Vec<(String, Channel)> {
        let mut open: Vec<_> = self
            .streams
            .iter()
            .filter(|(name, _)| !self.finished.contains(*name))
            .map(|(name, stream)| (name.clone(), stream.clone()))
            .collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        open
    }

    /// Known names in sorted order.
    pub fn known(&self) -> Vec<String> {
        let mut names: Vec<_> = self.known.iter().cloned().collect();
        names.sort();
        names
    }
}
