use serde::{Deserialize, Serialize};

// ── Style ───────────────────────────────────────────────────────────────────

pub const TRANSPARENT: &str = "transparent";

pub const DEFAULT_STROKE: &str = "#ff2d2d";
pub const DEFAULT_STROKE_WIDTH: f32 = 8.0;
pub const DEFAULT_FONT_SIZE: f32 = 20.0;

/// Visual properties applied to new shapes or mirrored from a selected one.
///
/// Colors are CSS-style hex strings; an intentionally unset fill is the
/// literal `"transparent"`, never an absent value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    pub stroke: String,
    pub stroke_width: f32,
    #[serde(rename = "strokeDashArray", default, skip_serializing_if = "Option::is_none")]
    pub stroke_dash: Option<Vec<f32>>,
    pub fill: String,
    pub font_size: f32,
    pub font_weight: String,
    pub font_style: String,
    pub underline: bool,
    #[serde(rename = "textBackgroundColor")]
    pub text_background: String,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke: DEFAULT_STROKE.to_string(),
            stroke_width: DEFAULT_STROKE_WIDTH,
            stroke_dash: None,
            fill: TRANSPARENT.to_string(),
            font_size: DEFAULT_FONT_SIZE,
            font_weight: "normal".to_string(),
            font_style: "normal".to_string(),
            underline: false,
            text_background: TRANSPARENT.to_string(),
        }
    }
}

impl Style {
    /// Returns a copy with an empty fill normalized to `"transparent"`.
    pub fn normalized(&self) -> Self {
        let mut style = self.clone();
        if style.fill.is_empty() {
            style.fill = TRANSPARENT.to_string();
        }
        style
    }
}

/// Sparse style update; only present fields are applied.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StylePatch {
    pub stroke: Option<String>,
    pub stroke_width: Option<f32>,
    pub stroke_dash: Option<Option<Vec<f32>>>,
    pub fill: Option<String>,
    pub font_size: Option<f32>,
    pub font_weight: Option<String>,
    pub font_style: Option<String>,
    pub underline: Option<bool>,
    pub text_background: Option<String>,
}

impl StylePatch {
    pub fn is_empty(&self) -> bool {
        *self == StylePatch::default()
    }

    /// Normalize the fill: an explicitly empty fill becomes `"transparent"`.
    pub fn normalized(mut self) -> Self {
        if let Some(fill) = &self.fill {
            if fill.is_empty() {
                self.fill = Some(TRANSPARENT.to_string());
            }
        }
        self
    }

    pub fn apply_to(&self, style: &mut Style) {
        if let Some(v) = &self.stroke {
            style.stroke = v.clone();
        }
        if let Some(v) = self.stroke_width {
            style.stroke_width = v;
        }
        if let Some(v) = &self.stroke_dash {
            style.stroke_dash = v.clone();
        }
        if let Some(v) = &self.fill {
            style.fill = v.clone();
        }
        if let Some(v) = self.font_size {
            style.font_size = v;
        }
        if let Some(v) = &self.font_weight {
            style.font_weight = v.clone();
        }
        if let Some(v) = &self.font_style {
            style.font_style = v.clone();
        }
        if let Some(v) = self.underline {
            style.underline = v;
        }
        if let Some(v) = &self.text_background {
            style.text_background = v.clone();
        }
    }
}

// ── Shapes ──────────────────────────────────────────────────────────────────

pub type ShapeId = u64;

/// Marker stored on groups composed by the arrow tool.
pub const ARROW_GROUP: &str = "arrow";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShapeKind {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        rx: f32,
    },
    Ellipse {
        x: f32,
        y: f32,
        rx: f32,
        ry: f32,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
    },
    Triangle {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    Path {
        points: Vec<[f32; 2]>,
    },
    Text {
        x: f32,
        y: f32,
        content: String,
    },
    Group {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shape: Option<String>,
        children: Vec<Shape>,
    },
}

impl ShapeKind {
    pub fn translate(&mut self, dx: f32, dy: f32) {
        match self {
            ShapeKind::Rect { x, y, .. }
            | ShapeKind::Ellipse { x, y, .. }
            | ShapeKind::Triangle { x, y, .. }
            | ShapeKind::Text { x, y, .. } => {
                *x += dx;
                *y += dy;
            }
            ShapeKind::Line { x1, y1, x2, y2 } => {
                *x1 += dx;
                *y1 += dy;
                *x2 += dx;
                *y2 += dy;
            }
            ShapeKind::Path { points } => {
                for p in points {
                    p[0] += dx;
                    p[1] += dy;
                }
            }
            ShapeKind::Group { children, .. } => {
                for child in children {
                    child.kind.translate(dx, dy);
                }
            }
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ShapeKind::Group { .. })
    }
}

/// One drawable primitive, with style, display name and authorship metadata.
///
/// `created_by`/`created_time` are stamped exactly once, when the shape first
/// enters a scene; `modified_by`/`modified_time` move on every edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shape {
    pub id: ShapeId,
    pub name: String,
    /// Clockwise rotation in degrees.
    #[serde(default)]
    pub angle: f32,
    #[serde(flatten)]
    pub kind: ShapeKind,
    #[serde(flatten)]
    pub style: Style,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<i64>,
}

impl Shape {
    pub fn new(id: ShapeId, name: impl Into<String>, kind: ShapeKind, style: Style) -> Self {
        Self {
            id,
            name: name.into(),
            angle: 0.0,
            kind,
            style,
            created_by: None,
            modified_by: None,
            created_time: None,
            modified_time: None,
        }
    }

    fn is_unstamped(&self) -> bool {
        self.created_by.is_none() && self.created_time.is_none()
    }
}

// ── Scene ───────────────────────────────────────────────────────────────────

/// The ordered set of shapes composing one annotation's canvas content.
///
/// Owns id allocation and authorship stamping; z-order is vector order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
    shapes: Vec<Shape>,
    next_id: ShapeId,
    pub background: bool,
}

fn max_shape_id(shapes: &[Shape]) -> ShapeId {
    shapes
        .iter()
        .map(|s| {
            let child_max = match &s.kind {
                ShapeKind::Group { children, .. } => max_shape_id(children),
                _ => 0,
            };
            s.id.max(child_max)
        })
        .max()
        .unwrap_or(0)
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_shapes(shapes: Vec<Shape>, background: bool) -> Self {
        let next_id = max_shape_id(&shapes) + 1;
        Self {
            shapes,
            next_id,
            background,
        }
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    pub fn get(&self, id: ShapeId) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: ShapeId) -> Option<&mut Shape> {
        self.shapes.iter_mut().find(|s| s.id == id)
    }

    pub fn mint_id(&mut self) -> ShapeId {
        self.next_id += 1;
        self.next_id
    }

    /// Add a freshly built shape, stamping authorship on first insertion.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: ShapeKind,
        style: Style,
        user: &str,
        now_ms: i64,
    ) -> ShapeId {
        let id = self.mint_id();
        let shape = Shape::new(id, name, kind, style);
        self.insert(shape, user, now_ms);
        id
    }

    /// Insert a shape, stamping `created_*`/`modified_*` only if the shape
    /// has never been stamped before. Re-inserting a stamped shape (e.g. a
    /// reloaded one) leaves its creation metadata untouched.
    pub fn insert(&mut self, mut shape: Shape, user: &str, now_ms: i64) {
        if shape.is_unstamped() {
            shape.created_by = Some(user.to_string());
            shape.modified_by = Some(user.to_string());
            shape.created_time = Some(now_ms);
            shape.modified_time = Some(now_ms);
        }
        self.next_id = self.next_id.max(max_shape_id(std::slice::from_ref(&shape)) + 1);
        self.shapes.push(shape);
    }

    pub fn remove(&mut self, id: ShapeId) -> Option<Shape> {
        let index = self.shapes.iter().position(|s| s.id == id)?;
        Some(self.shapes.remove(index))
    }

    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    /// Record a content-modifying edit on a shape.
    pub fn touch(&mut self, id: ShapeId, user: &str, now_ms: i64) {
        if let Some(shape) = self.get_mut(id) {
            shape.modified_by = Some(user.to_string());
            shape.modified_time = Some(now_ms);
        }
    }
}
