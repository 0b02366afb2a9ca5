//! Tracks the ambient drawing style.
//!
//! Two modes: **Default** (no single shape selected) mirrors the user's
//! last-chosen style; **Editing** (exactly one non-group shape selected)
//! mirrors the selected shape. Entering Editing snapshots the default style
//! so leaving restores it — moving directly between selected shapes keeps
//! the original snapshot.

use crate::scene::{Scene, Shape, ShapeId, Style, StylePatch};

#[derive(Debug)]
pub struct StyleStateManager {
    active: Style,
    default_snapshot: Option<Style>,
    editing: Option<ShapeId>,
}

impl Default for StyleStateManager {
    fn default() -> Self {
        Self::new(Style::default())
    }
}

impl StyleStateManager {
    pub fn new(default_style: Style) -> Self {
        Self {
            active: default_style,
            default_snapshot: None,
            editing: None,
        }
    }

    /// The style the next drawn shape will receive, or the one mirrored from
    /// the selected shape while editing.
    pub fn active(&self) -> &Style {
        &self.active
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    /// Feed every selection change through here. Multi-shape and group
    /// selections count as "none" for style tracking.
    pub fn on_selection_changed(&mut self, selection: &[&Shape]) {
        match selection {
            [shape] if !shape.kind.is_group() => {
                if self.default_snapshot.is_none() {
                    self.default_snapshot = Some(self.active.clone());
                }
                self.active = shape.style.normalized();
                self.editing = Some(shape.id);
            }
            _ => {
                if let Some(default_style) = self.default_snapshot.take() {
                    self.active = default_style;
                }
                self.editing = None;
            }
        }
    }

    /// Apply a style change to the active style and to every selected shape.
    /// Groups propagate the change to each child and to the group itself so
    /// group-level reads stay consistent.
    pub fn apply(
        &mut self,
        patch: &StylePatch,
        scene: &mut Scene,
        selection: &[ShapeId],
        user: &str,
        now_ms: i64,
    ) {
        if patch.is_empty() {
            return;
        }
        let patch = patch.clone().normalized();
        patch.apply_to(&mut self.active);

        for &id in selection {
            if let Some(shape) = scene.get_mut(id) {
                patch.apply_to(&mut shape.style);
                if let crate::scene::ShapeKind::Group { children, .. } = &mut shape.kind {
                    for child in children {
                        patch.apply_to(&mut child.style);
                    }
                }
            }
            scene.touch(id, user, now_ms);
        }
    }
}
