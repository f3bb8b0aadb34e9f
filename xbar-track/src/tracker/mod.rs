// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait and a number of [`Tracker`]s.

pub mod dev_null;
pub mod text;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

pub use dev_null::DevNullTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{Id, ROOT};

/// Error used to return configuration errors
#[derive(Debug)]
pub struct TrackConfigError(pub String);

impl std::fmt::Display for TrackConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TrackConfigError {}

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global ID
    fn unique_id(&self) -> Id;

    /// Determine whether tracking is enabled at `level` for an entity.
    fn is_entity_enabled(&self, id: Id, level: log::Level) -> bool;

    /// Record an entity being created so that its level can be resolved.
    fn add_entity(&self, id: Id, entity_name: &str);

    /// Track when an object with the given ID arrives.
    fn enter(&self, enter_into: Id, enter_obj: Id);

    /// Track when an object with the given ID leaves.
    fn exit(&self, exit_from: Id, exit_obj: Id);

    /// Track when an entity with the given ID is created.
    fn create(&self, created_by: Id, created_obj: Id, name: &str);

    /// Track when an entity with the given ID is destroyed.
    fn destroy(&self, destroyed_by: Id, destroyed_obj: Id);

    /// Track when an entity is connected to another entity
    fn connect(&self, connect_from: Id, connect_to: Id);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Id, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the time to the given clock tick.
    fn time(&self, set_by: Id, tick: u64);

    /// Perform any pre-exit shutdown/cleanup
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Rc<dyn Track>;

/// A [`Tracker`] that prints every event at or above `level` to `stdout`.
#[must_use]
pub fn stdout_tracker(level: log::Level) -> Tracker {
    let writer = Box::new(io::BufWriter::new(io::stdout()));
    Rc::new(TextTracker::new(EntityManager::new(level), writer))
}

/// A [`Tracker`] that discards everything.
#[must_use]
pub fn dev_null_tracker() -> Tracker {
    Rc::new(DevNullTracker {})
}

/// Resolves the log level of every entity and hands out unique [`Id`]s.
///
/// Levels come from the first filter whose regular expression matches the
/// full entity name, otherwise the default level applies. Only entities
/// whose level differs from the default are stored.
pub struct EntityManager {
    default_entity_level: log::Level,
    regex_to_entity_level: Vec<(Regex, log::Level)>,
    next_id: Cell<u64>,
    current_tick: Cell<u64>,
    entity_levels: RefCell<HashMap<Id, log::Level>>,
}

impl EntityManager {
    #[must_use]
    pub fn new(default_entity_level: log::Level) -> Self {
        Self {
            default_entity_level,
            regex_to_entity_level: Vec::new(),
            next_id: Cell::new(ROOT.0 + 1),
            current_tick: Cell::new(0),
            entity_levels: RefCell::new(HashMap::new()),
        }
    }

    fn unique_id(&self) -> Id {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        Id(id)
    }

    fn is_log_enabled_at_level(&self, id: Id, level: log::Level) -> bool {
        let entity_level = self
            .entity_levels
            .borrow()
            .get(&id)
            .copied()
            .unwrap_or(self.default_entity_level);
        level <= entity_level
    }

    fn add_entity(&self, id: Id, entity_name: &str) {
        let entity_level = self.log_level_for(entity_name);
        if entity_level == self.default_entity_level {
            return;
        }
        let previous = self.entity_levels.borrow_mut().insert(id, entity_level);
        assert!(previous.is_none(), "Entity ID {id} already seen ({entity_name})");
    }

    fn log_level_for(&self, entity_name: &str) -> log::Level {
        self.regex_to_entity_level
            .iter()
            .find(|(regex, _)| regex.is_match(entity_name))
            .map_or(self.default_entity_level, |(_, level)| *level)
    }

    /// Set entities whose name matches `regex_str` to `level`.
    ///
    /// Filters are tried in the order they were added.
    ///
    /// # Example
    ///
    /// ```rust
    /// use xbar_track::tracker::EntityManager;
    /// let mut manager = EntityManager::new(log::Level::Warn);
    /// manager.add_entity_level_filter(".*mux.*", log::Level::Trace).unwrap();
    /// ```
    pub fn add_entity_level_filter(
        &mut self,
        regex_str: &str,
        level: log::Level,
    ) -> Result<(), TrackConfigError> {
        let regex = Regex::new(regex_str)
            .map_err(|e| TrackConfigError(format!("Failed to parse regex {regex_str}:\n{e}\n")))?;
        self.regex_to_entity_level.push((regex, level));
        Ok(())
    }

    fn tick(&self) -> u64 {
        self.current_tick.get()
    }

    fn set_tick(&self, new_tick: u64) {
        assert!(new_tick >= self.current_tick.get(), "Time moving backwards");
        self.current_tick.set(new_tick);
    }
}

#[cfg(test)]
mod tests {
    use log::Level;

    use super::*;

    fn entity_paths() -> Vec<&'static str> {
        vec!["top", "top::xbar", "top::xbar::mux0", "top::xbar::mux1"]
    }

    #[test]
    fn no_filters() {
        let manager = EntityManager::new(Level::Error);

        for p in entity_paths() {
            assert_eq!(manager.log_level_for(p), Level::Error);
        }
    }

    #[test]
    fn filter_xbar_trace() {
        let mut manager = EntityManager::new(Level::Error);
        manager
            .add_entity_level_filter(r".*xbar.*", Level::Trace)
            .unwrap();

        let expected_levels = [Level::Error, Level::Trace, Level::Trace, Level::Trace];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn first_filter_wins() {
        let mut manager = EntityManager::new(Level::Error);
        manager
            .add_entity_level_filter(r".*mux0", Level::Warn)
            .unwrap();
        manager
            .add_entity_level_filter(r".*xbar.*", Level::Info)
            .unwrap();

        let expected_levels = [Level::Error, Level::Info, Level::Warn, Level::Info];

        for (i, p) in entity_paths().iter().enumerate() {
            assert_eq!(manager.log_level_for(p), expected_levels[i]);
        }
    }

    #[test]
    fn bad_regex() {
        let mut manager = EntityManager::new(Level::Error);
        assert!(manager.add_entity_level_filter(r"(", Level::Warn).is_err());
    }

    #[test]
    fn ids() {
        let manager = EntityManager::new(Level::Error);
        for i in 0..10 {
            assert_eq!(manager.unique_id(), Id(i + ROOT.0 + 1));
        }
    }

    #[test]
    fn level_lookup_by_id() {
        let mut manager = EntityManager::new(Level::Warn);
        manager
            .add_entity_level_filter(r".*mux0", Level::Trace)
            .unwrap();
        manager.add_entity(Id(10), "top::xbar::mux0");
        manager.add_entity(Id(11), "top::xbar::mux1");

        assert!(manager.is_log_enabled_at_level(Id(10), Level::Trace));
        assert!(!manager.is_log_enabled_at_level(Id(11), Level::Info));
        assert!(manager.is_log_enabled_at_level(Id(11), Level::Warn));
    }
}
