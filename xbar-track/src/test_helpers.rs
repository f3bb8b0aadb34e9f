// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! This module provides helper functions for testing tracking output
//!
//! The aim of this module is to provide commonly-used functions that enable the
//! testing of the output that should appear from the logging macros.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use regex::Regex;

use crate::tracker::{EntityManager, TextTracker};
use crate::{Id, Track, Tracker};

/// Environment variable used to raise the log level of test trackers.
pub const TEST_LOG_LEVEL_ENV: &str = "XBAR_TEST_LOG_LEVEL";

/// A tracker that keeps track events in memory.
pub struct TestTracker {
    events: RefCell<Vec<String>>,
    unique_id: Cell<u64>,
}

impl TestTracker {
    /// Create a new [`TestTracker`] whose IDs start at `initial_id`.
    #[must_use]
    pub fn new(initial_id: u64) -> Self {
        Self {
            events: RefCell::new(Vec::new()),
            unique_id: Cell::new(initial_id),
        }
    }

    fn add_event(&self, event: String) {
        println!("{event}");
        self.events.borrow_mut().push(event);
    }

    /// Number of events recorded since the last clear.
    #[must_use]
    pub fn num_events(&self) -> usize {
        self.events.borrow().len()
    }
}

impl Track for TestTracker {
    fn unique_id(&self) -> Id {
        let id = self.unique_id.get();
        self.unique_id.set(id + 1);
        Id(id)
    }

    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        true
    }

    fn add_entity(&self, _id: Id, _entity_name: &str) {}

    fn enter(&self, id: Id, item: Id) {
        self.add_event(format!("{id}: {item} entered"));
    }

    fn exit(&self, id: Id, item: Id) {
        self.add_event(format!("{id}: {item} exited"));
    }

    fn create(&self, created_by: Id, id: Id, name: &str) {
        self.add_event(format!("{created_by}: created {id}, {name}"));
    }

    fn destroy(&self, destroyed_by: Id, id: Id) {
        self.add_event(format!("{destroyed_by}: destroyed {id}"));
    }

    fn connect(&self, connect_from: Id, connect_to: Id) {
        self.add_event(format!("{connect_from}: connect to {connect_to}"));
    }

    fn log(&self, id: Id, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{id}:{level}: {msg}"));
    }

    fn time(&self, set_by: Id, tick: u64) {
        self.add_event(format!("{set_by}: set tick {tick}"));
    }

    fn shutdown(&self) {}
}

/// Create a [`TestTracker`] and the same object as a [`Tracker`].
///
/// # Examples
///
/// ```
/// use xbar_track::test_helpers;
///
/// let (test_tracker, tracker) = xbar_track::test_init!(10);
/// let _top = xbar_track::entity::toplevel(&tracker, "top");
/// test_helpers::check_and_clear(&test_tracker, &["0: created 10, top"]);
/// ```
#[macro_export]
macro_rules! test_init {
    ($start_id:expr) => {{
        let test_tracker = std::rc::Rc::new($crate::test_helpers::TestTracker::new($start_id));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Check and clear the events recorded by a [`TestTracker`].
///
/// Each recorded event must match the regular expression at the same index
/// in `expected`.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let mut events = tracker.events.borrow_mut();

    assert_eq!(
        expected.len(),
        events.len(),
        "Expected {expected:?}, got {:?}",
        *events
    );

    for (i, (log_expect, actual)) in expected.iter().zip(events.iter()).enumerate() {
        let re = Regex::new(log_expect).unwrap();
        assert!(
            re.is_match(actual),
            "Event {i}: {log_expect:?} does not match {actual:?}"
        );
    }

    events.clear();
}

/// Create the tracker used by a test.
///
/// Output goes to stdout (captured by the test harness) at `Warn` unless
/// the [`TEST_LOG_LEVEL_ENV`] environment variable selects another level.
/// The `full_filepath` (normally `file!()`) names the top-level entity.
#[must_use]
pub fn create_tracker(full_filepath: &str) -> Tracker {
    let level = std::env::var(TEST_LOG_LEVEL_ENV)
        .ok()
        .and_then(|lvl| crate::str_to_level(&lvl))
        .unwrap_or(log::Level::Warn);

    let name = Path::new(full_filepath)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("test");
    let entity_manager = EntityManager::new(level);
    let writer = Box::new(std::io::stdout());
    let tracker: Tracker = Rc::new(TextTracker::new(entity_manager, writer));
    tracker.log(crate::NO_ID, log::Level::Info, format_args!("test {name}"));
    tracker
}
