// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::Cell;

use crate::tracker::Track;
use crate::{Id, ROOT};

/// A tracker that does nothing.
///
/// IDs are still unique so that entities can be told apart.
pub struct DevNullTracker;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(ROOT.0 + 1) };
}

impl Track for DevNullTracker {
    fn unique_id(&self) -> Id {
        NEXT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            Id(id)
        })
    }

    fn is_entity_enabled(&self, _id: Id, _level: log::Level) -> bool {
        false
    }
    fn add_entity(&self, _id: Id, _entity_name: &str) {}
    fn enter(&self, _id: Id, _obj: Id) {}
    fn exit(&self, _id: Id, _obj: Id) {}
    fn create(&self, _id: Id, _obj: Id, _name: &str) {}
    fn destroy(&self, _id: Id, _obj: Id) {}
    fn connect(&self, _connect_from: Id, _connect_to: Id) {}
    fn log(&self, _id: Id, _level: log::Level, _msg: std::fmt::Arguments) {}
    fn time(&self, _set_by: Id, _tick: u64) {}
    fn shutdown(&self) {}
}
