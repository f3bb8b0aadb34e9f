// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Entities give every component a place in the model hierarchy, a unique
//! [`Id`] and access to the shared [`Tracker`].

use std::fmt;
use std::rc::Rc;

use crate::{Id, Tracker, create, destroy};

/// A named node in the simulation hierarchy.
///
/// Every entity except the one returned by [`toplevel`] has a parent.
pub struct Entity {
    pub name: String,

    /// `None` only for the top-level entity.
    pub parent: Option<Rc<Entity>>,

    /// Identifies this entity in track events.
    pub id: Id,

    pub tracker: Tracker,
}

const JOIN: &str = "::";

impl Entity {
    /// Create a new entity below `parent`.
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str) -> Self {
        let tracker = parent.tracker.clone();
        let id = tracker.unique_id();
        tracker.add_entity(id, &format!("{parent}{JOIN}{name}"));

        let entity = Self {
            name: name.to_string(),
            parent: Some(parent.clone()),
            id,
            tracker,
        };
        create!(entity);
        entity
    }

    /// The full hierarchical name, for example `top::xbar::demux0`.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl Drop for Entity {
    fn drop(&mut self) {
        destroy!(self);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.full_name())
            .field("id", &self.id)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{parent}{JOIN}{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Access to the [`Entity`] of a component.
pub trait GetEntity {
    /// Return the entity of this component.
    fn entity(&self) -> &Rc<Entity>;
}

/// Create the root of an entity hierarchy.
pub fn toplevel(tracker: &Tracker, name: &str) -> Rc<Entity> {
    let id = tracker.unique_id();
    tracker.add_entity(id, name);
    let top = Rc::new(Entity {
        name: name.to_string(),
        parent: None,
        id,
        tracker: tracker.clone(),
    });
    create!(top);
    top
}
