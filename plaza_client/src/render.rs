//! Presentation abstraction.
//!
//! The core does not depend on a graphics backend. It drives whatever
//! implements [`Presentation`] by entity id, once per tick.

use std::collections::HashMap;

use plaza_shared::math::Vec2;

use crate::anim::AnimationKey;

/// Derived view of one entity, handed to the presentation each tick.
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    pub position: Vec2,
    pub animation: &'a AnimationKey,
    pub tint: u32,
    pub label: &'a str,
    pub emote: Option<&'a str>,
}

/// Renderer collaborator.
pub trait Presentation {
    fn upsert_entity(&mut self, id: &str, view: EntityView<'_>);
    fn remove_entity(&mut self, id: &str);
    fn set_camera_follow(&mut self, id: &str);
}

/// Owned copy of an [`EntityView`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnEntity {
    pub position: Vec2,
    pub animation: AnimationKey,
    pub tint: u32,
    pub label: String,
    pub emote: Option<String>,
}

/// Keeps the latest view of every entity; what a real scene graph would hold.
#[derive(Debug, Default)]
pub struct RecordingPresentation {
    pub drawn: HashMap<String, DrawnEntity>,
    pub removed: Vec<String>,
    pub camera: Option<String>,
}

impl RecordingPresentation {
    pub fn get(&self, id: &str) -> Option<&DrawnEntity> {
        self.drawn.get(id)
    }
}

impl Presentation for RecordingPresentation {
    fn upsert_entity(&mut self, id: &str, view: EntityView<'_>) {
        self.drawn.insert(
            id.to_string(),
            DrawnEntity {
                position: view.position,
                animation: view.animation.clone(),
                tint: view.tint,
                label: view.label.to_string(),
                emote: view.emote.map(str::to_string),
            },
        );
    }

    fn remove_entity(&mut self, id: &str) {
        self.drawn.remove(id);
        self.removed.push(id.to_string());
    }

    fn set_camera_follow(&mut self, id: &str) {
        self.camera = Some(id.to_string());
    }
}
