//! Decides which feed item is active (playing) from scroll visibility.
//!
//! Modeled on an intersection observer with a single visibility threshold:
//! targets report their visible ratio whenever it crosses the threshold or
//! enters/leaves the viewport, and the last target reported as intersecting
//! at or above the threshold becomes the only active item.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    pub target: String,
    /// Visible fraction of the target's area, in `[0, 1]`.
    pub ratio: f64,
    pub is_intersecting: bool,
}

/// One-item-per-screen vertical layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub item_height: f64,
    pub viewport_height: f64,
}

impl Layout {
    pub fn full_screen(height: f64) -> Self {
        Self {
            item_height: height,
            viewport_height: height,
        }
    }

    /// Visible ratio of item `index` with the viewport scrolled to `offset`.
    pub fn ratio_at(&self, index: usize, offset: f64) -> f64 {
        if self.item_height <= 0.0 {
            return 0.0;
        }
        let top = index as f64 * self.item_height;
        let bottom = top + self.item_height;
        let visible = bottom.min(offset + self.viewport_height) - top.max(offset);
        (visible / self.item_height).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Playback {
    pub playing: bool,
    pub position: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackCommand {
    Play { index: usize, id: String },
    /// Pause and seek back to the start, so re-entry never resumes mid-scrub.
    PauseAndRewind { index: usize, id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Hidden,
    Partial,
    Visible,
}

pub struct ViewportTracker {
    threshold: f64,
    items: Vec<String>,
    positions: HashMap<String, usize>,
    bands: HashMap<String, Band>,
    playback: HashMap<String, Playback>,
    active: Option<String>,
    layout: Option<Layout>,
    offset: f64,
}

impl ViewportTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            items: Vec::new(),
            positions: HashMap::new(),
            bands: HashMap::new(),
            playback: HashMap::new(),
            active: None,
            layout: None,
            offset: 0.0,
        }
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Switches layout and re-evaluates every target at the current offset.
    pub fn set_layout(&mut self, layout: Layout) -> Vec<PlaybackCommand> {
        self.layout = Some(layout);
        self.bands.clear();
        self.scroll_to(self.offset)
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Replaces the observed targets. Observers for removed ids are dropped;
    /// the active item stays active if it survived. With a layout set, the
    /// new targets are evaluated at the current scroll offset right away.
    pub fn rearm(&mut self, ids: Vec<String>) -> Vec<PlaybackCommand> {
        self.positions = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        let positions = &self.positions;
        self.bands.retain(|id, _| positions.contains_key(id));
        self.playback.retain(|id, _| positions.contains_key(id));
        for id in &ids {
            self.playback.entry(id.clone()).or_default();
        }
        if let Some(active) = &self.active {
            if !self.positions.contains_key(active) {
                tracing::debug!(item = %active, "active item left the feed");
                self.active = None;
            }
        }
        self.items = ids;

        match self.layout {
            Some(_) => self.scroll_to(self.offset),
            None => Vec::new(),
        }
    }

    /// Processes visibility changes in report order.
    pub fn report(&mut self, entries: &[IntersectionEntry]) -> Vec<PlaybackCommand> {
        let single = self.items.len() == 1;
        let mut candidate = None;
        for entry in entries {
            let Some(&index) = self.positions.get(&entry.target) else {
                continue;
            };
            let crossed = entry.is_intersecting
                && (entry.ratio >= self.threshold || (single && entry.ratio > 0.0));
            if crossed {
                candidate = Some(index);
            }
        }
        match candidate {
            Some(index) => self.activate(index),
            None => Vec::new(),
        }
    }

    /// Scrolls the viewport and reports the targets whose visibility band
    /// changed, the way an observer would.
    pub fn scroll_to(&mut self, offset: f64) -> Vec<PlaybackCommand> {
        self.offset = offset;
        let Some(layout) = self.layout else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for (index, id) in self.items.iter().enumerate() {
            let ratio = layout.ratio_at(index, offset);
            let band = if ratio >= self.threshold {
                Band::Visible
            } else if ratio > 0.0 {
                Band::Partial
            } else {
                Band::Hidden
            };
            if self.bands.insert(id.clone(), band) != Some(band) {
                entries.push(IntersectionEntry {
                    target: id.clone(),
                    ratio,
                    is_intersecting: ratio > 0.0,
                });
            }
        }
        self.report(&entries)
    }

    fn activate(&mut self, index: usize) -> Vec<PlaybackCommand> {
        let id = self.items[index].clone();
        if self.active.as_deref() == Some(id.as_str()) {
            return Vec::new();
        }

        let mut commands = Vec::with_capacity(2);
        if let Some(previous) = self.active.take() {
            if let Some(state) = self.playback.get_mut(&previous) {
                state.playing = false;
                state.position = Duration::ZERO;
            }
            if let Some(&prev_index) = self.positions.get(&previous) {
                commands.push(PlaybackCommand::PauseAndRewind {
                    index: prev_index,
                    id: previous,
                });
            }
        }

        self.playback.entry(id.clone()).or_default().playing = true;
        tracing::debug!(index, item = %id, "item activated");
        self.active = Some(id.clone());
        commands.push(PlaybackCommand::Play { index, id });
        commands
    }

    /// Advances the media clock of whatever is playing.
    pub fn advance(&mut self, elapsed: Duration) {
        for state in self.playback.values_mut().filter(|p| p.playing) {
            state.position += elapsed;
        }
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
            .as_ref()
            .and_then(|id| self.positions.get(id).copied())
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn playback(&self, id: &str) -> Option<Playback> {
        self.playback.get(id).copied()
    }

    pub fn observed_count(&self) -> usize {
        self.items.len()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}
