//! The active drawing tool and its pointer-driven state machine.
//!
//! Tools are plain enum variants; the gesture in progress lives in
//! `DragState`, carrying only the context its finalization needs. Drawing
//! tools create a provisional shape on pointer-down, resize it on every
//! move (flipping the origin corner when the pointer crosses the anchor)
//! and finalize on pointer-up; one-shot tools then hand back to Select.

use crate::scene::{Scene, Shape, ShapeId, ShapeKind, Style, ARROW_GROUP};
use crate::viewport::{Point, Viewport};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Tool {
    #[default]
    Select,
    Move,
    Rect,
    Ellipse,
    Line,
    Arrow,
    Pencil,
    Text,
}

impl Tool {
    pub const ALL: [Tool; 8] = [
        Tool::Select,
        Tool::Move,
        Tool::Rect,
        Tool::Ellipse,
        Tool::Line,
        Tool::Arrow,
        Tool::Pencil,
        Tool::Text,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Tool::Select => "Select",
            Tool::Move => "Move",
            Tool::Rect => "Rectangle",
            Tool::Ellipse => "Ellipse",
            Tool::Line => "Line",
            Tool::Arrow => "Arrow",
            Tool::Pencil => "Pencil",
            Tool::Text => "Text",
        }
    }

    /// Tools that stay active after a completed shape; everything else
    /// auto-reverts to Select.
    pub fn is_persistent(self) -> bool {
        matches!(self, Tool::Select | Tool::Move | Tool::Pencil)
    }

    /// Only Select lets existing shapes be hit-tested and edited.
    pub fn allows_selection(self) -> bool {
        self == Tool::Select
    }
}

#[derive(Clone, Debug, Default)]
enum DragState {
    #[default]
    Idle,
    /// Sizing a provisional rect/ellipse/line from its anchor.
    Drawing { anchor: Point, shape: ShapeId },
    /// Arrow drags size two provisional shapes, grouped on release.
    DrawingArrow {
        anchor: Point,
        line: ShapeId,
        head: ShapeId,
    },
    /// Freehand stroke in progress.
    Sketching { shape: ShapeId },
    /// Move tool panning the viewport; `last` is in screen space.
    Panning { last: Point },
    /// Select tool dragging an existing shape; `last` is in world space.
    Moving { shape: ShapeId, last: Point },
}

/// What a finished gesture produced.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpOutcome {
    /// A shape that finished being created this gesture.
    pub committed: Option<ShapeId>,
    /// The tool is one-shot and the caller should switch back to Select.
    pub revert_to_select: bool,
}

#[derive(Debug, Default)]
pub struct ToolController {
    tool: Tool,
    drag: DragState,
    style: Style,
}

fn next_name(scene: &Scene, base: &str) -> String {
    let count = scene
        .shapes()
        .iter()
        .filter(|s| s.name.starts_with(base))
        .count();
    format!("{base} {}", count + 1)
}

impl ToolController {
    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn is_dragging(&self) -> bool {
        !matches!(self.drag, DragState::Idle)
    }

    /// Switch tools, dropping any gesture in progress.
    pub fn set_tool(&mut self, tool: Tool, style: &Style) {
        self.tool = tool;
        self.drag = DragState::Idle;
        self.configure(style);
    }

    /// Apply the active style as the defaults for shapes this tool creates.
    pub fn configure(&mut self, style: &Style) {
        self.style = style.normalized();
    }

    pub fn pointer_down(
        &mut self,
        world: Point,
        screen: Point,
        scene: &mut Scene,
        user: &str,
        now_ms: i64,
    ) {
        match self.tool {
            Tool::Rect => {
                let shape = scene.add(
                    next_name(scene, "Rectangle"),
                    ShapeKind::Rect {
                        x: world.x,
                        y: world.y,
                        width: 0.0,
                        height: 0.0,
                        rx: 10.0,
                    },
                    self.style.clone(),
                    user,
                    now_ms,
                );
                self.drag = DragState::Drawing { anchor: world, shape };
            }
            Tool::Ellipse => {
                let shape = scene.add(
                    next_name(scene, "Ellipse"),
                    ShapeKind::Ellipse {
                        x: world.x,
                        y: world.y,
                        rx: 1.0,
                        ry: 1.0,
                    },
                    self.style.clone(),
                    user,
                    now_ms,
                );
                self.drag = DragState::Drawing { anchor: world, shape };
            }
            Tool::Line => {
                let shape = scene.add(
                    next_name(scene, "Line"),
                    ShapeKind::Line {
                        x1: world.x,
                        y1: world.y,
                        x2: world.x,
                        y2: world.y,
                    },
                    self.style.clone(),
                    user,
                    now_ms,
                );
                self.drag = DragState::Drawing { anchor: world, shape };
            }
            Tool::Arrow => {
                let head_size = 3.0 * self.style.stroke_width;
                let line = scene.add(
                    "Arrow line",
                    ShapeKind::Line {
                        x1: world.x,
                        y1: world.y,
                        x2: world.x,
                        y2: world.y,
                    },
                    self.style.clone(),
                    user,
                    now_ms,
                );
                // the head is filled with the stroke color
                let mut head_style = self.style.clone();
                head_style.fill = head_style.stroke.clone();
                let head = scene.add(
                    "Arrow head",
                    ShapeKind::Triangle {
                        x: world.x,
                        y: world.y,
                        width: head_size,
                        height: head_size,
                    },
                    head_style,
                    user,
                    now_ms,
                );
                if let Some(shape) = scene.get_mut(head) {
                    shape.angle = 90.0;
                }
                self.drag = DragState::DrawingArrow {
                    anchor: world,
                    line,
                    head,
                };
            }
            Tool::Pencil => {
                let shape = scene.add(
                    next_name(scene, "Pencil"),
                    ShapeKind::Path {
                        points: vec![[world.x, world.y]],
                    },
                    self.style.clone(),
                    user,
                    now_ms,
                );
                self.drag = DragState::Sketching { shape };
            }
            Tool::Move => {
                self.drag = DragState::Panning { last: screen };
            }
            // Select drags start via begin_move after a hit-test; text
            // placement is driven by the view's input overlay
            Tool::Select | Tool::Text => {}
        }
    }

    /// Start dragging an existing shape (Select tool, after a hit).
    pub fn begin_move(&mut self, shape: ShapeId, world: Point) {
        self.drag = DragState::Moving { shape, last: world };
    }

    pub fn pointer_move(
        &mut self,
        world: Point,
        screen: Point,
        scene: &mut Scene,
        viewport: &mut Viewport,
        image_size: (f32, f32),
        canvas_size: (f32, f32),
    ) {
        match &mut self.drag {
            DragState::Idle => {}
            DragState::Drawing { anchor, shape } => {
                let anchor = *anchor;
                if let Some(s) = scene.get_mut(*shape) {
                    resize_from_anchor(&mut s.kind, anchor, world);
                }
            }
            DragState::DrawingArrow { anchor, line, head } => {
                let anchor = *anchor;
                let (line, head) = (*line, *head);
                if let Some(s) = scene.get_mut(line) {
                    if let ShapeKind::Line { x2, y2, .. } = &mut s.kind {
                        *x2 = world.x;
                        *y2 = world.y;
                    }
                }
                if let Some(s) = scene.get_mut(head) {
                    if let ShapeKind::Triangle { x, y, .. } = &mut s.kind {
                        *x = world.x;
                        *y = world.y;
                    }
                    let delta_y = world.y - anchor.y;
                    let delta_x = world.x - anchor.x;
                    s.angle = 90.0 + delta_y.atan2(delta_x).to_degrees();
                }
            }
            DragState::Sketching { shape } => {
                if let Some(s) = scene.get_mut(*shape) {
                    if let ShapeKind::Path { points } = &mut s.kind {
                        points.push([world.x, world.y]);
                    }
                }
            }
            DragState::Panning { last } => {
                let (dx, dy) = (screen.x - last.x, screen.y - last.y);
                *last = screen;
                viewport.pan_by(dx, dy, image_size, canvas_size);
            }
            DragState::Moving { shape, last } => {
                let (dx, dy) = (world.x - last.x, world.y - last.y);
                *last = world;
                if let Some(s) = scene.get_mut(*shape) {
                    s.kind.translate(dx, dy);
                }
            }
        }
    }

    pub fn pointer_up(&mut self, scene: &mut Scene, user: &str, now_ms: i64) -> UpOutcome {
        let drag = std::mem::take(&mut self.drag);
        match drag {
            DragState::Idle => UpOutcome::default(),
            DragState::Drawing { shape, .. } => UpOutcome {
                committed: Some(shape),
                revert_to_select: !self.tool.is_persistent(),
            },
            DragState::DrawingArrow { line, head, .. } => {
                // swap the provisional pair for one grouped arrow
                let parts: Vec<Shape> = [scene.remove(line), scene.remove(head)]
                    .into_iter()
                    .flatten()
                    .collect();
                let group = scene.add(
                    next_name(scene, "Arrow"),
                    ShapeKind::Group {
                        shape: Some(ARROW_GROUP.to_string()),
                        children: parts,
                    },
                    self.style.clone(),
                    user,
                    now_ms,
                );
                UpOutcome {
                    committed: Some(group),
                    revert_to_select: !self.tool.is_persistent(),
                }
            }
            DragState::Sketching { shape } => UpOutcome {
                committed: Some(shape),
                revert_to_select: false,
            },
            DragState::Panning { .. } => UpOutcome::default(),
            DragState::Moving { shape, .. } => {
                scene.touch(shape, user, now_ms);
                UpOutcome::default()
            }
        }
    }
}

/// Recompute a shape's extent from its anchor to the pointer, flipping the
/// origin corner/side so width and height never go negative.
fn resize_from_anchor(kind: &mut ShapeKind, anchor: Point, pointer: Point) {
    match kind {
        ShapeKind::Rect {
            x, y, width, height, ..
        } => {
            *x = anchor.x.min(pointer.x);
            *y = anchor.y.min(pointer.y);
            *width = (anchor.x - pointer.x).abs();
            *height = (anchor.y - pointer.y).abs();
        }
        ShapeKind::Ellipse { x, y, rx, ry } => {
            *x = anchor.x.min(pointer.x);
            *y = anchor.y.min(pointer.y);
            *rx = (anchor.x - pointer.x).abs() / 2.0;
            *ry = (anchor.y - pointer.y).abs() / 2.0;
        }
        ShapeKind::Line { x2, y2, .. } => {
            *x2 = pointer.x;
            *y2 = pointer.y;
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(tool: Tool) -> ToolController {
        let mut c = ToolController::default();
        c.set_tool(tool, &Style::default());
        c
    }

    fn p(x: f32, y: f32) -> Point {
        Point::new(x, y)
    }

    const IMAGE: (f32, f32) = (1000.0, 800.0);
    const CANVAS: (f32, f32) = (500.0, 400.0);

    fn drag(
        c: &mut ToolController,
        scene: &mut Scene,
        from: Point,
        to: Point,
    ) -> UpOutcome {
        let mut vp = Viewport::default();
        c.pointer_down(from, from, scene, "usrA", 0);
        c.pointer_move(to, to, scene, &mut vp, IMAGE, CANVAS);
        c.pointer_up(scene, "usrA", 1)
    }

    #[test]
    fn rect_flips_origin_when_crossing_the_anchor() {
        let mut scene = Scene::new();
        let mut c = controller(Tool::Rect);
        let outcome = drag(&mut c, &mut scene, p(10.0, 10.0), p(2.0, 3.0));
        let shape = scene.get(outcome.committed.unwrap()).unwrap();
        let ShapeKind::Rect {
            x, y, width, height, ..
        } = shape.kind
        else {
            panic!("not a rect");
        };
        assert_eq!((x, y), (2.0, 3.0));
        assert_eq!((width, height), (8.0, 7.0));
        assert!(outcome.revert_to_select);
    }

    #[test]
    fn ellipse_radii_are_half_extents() {
        let mut scene = Scene::new();
        let mut c = controller(Tool::Ellipse);
        let outcome = drag(&mut c, &mut scene, p(0.0, 0.0), p(20.0, 10.0));
        let ShapeKind::Ellipse { x, y, rx, ry } = scene.get(outcome.committed.unwrap()).unwrap().kind
        else {
            panic!("not an ellipse");
        };
        assert_eq!((x, y), (0.0, 0.0));
        assert_eq!((rx, ry), (10.0, 5.0));
    }

    #[test]
    fn degenerate_click_still_commits_a_shape() {
        let mut scene = Scene::new();
        let mut c = controller(Tool::Rect);
        c.pointer_down(p(5.0, 5.0), p(5.0, 5.0), &mut scene, "usrA", 0);
        let outcome = c.pointer_up(&mut scene, "usrA", 1);
        let shape = scene.get(outcome.committed.unwrap()).unwrap();
        let ShapeKind::Rect { width, height, .. } = shape.kind else {
            panic!("not a rect");
        };
        assert_eq!((width, height), (0.0, 0.0));
    }

    #[test]
    fn arrow_release_replaces_provisionals_with_one_group() {
        let mut scene = Scene::new();
        let mut c = controller(Tool::Arrow);
        let outcome = drag(&mut c, &mut scene, p(0.0, 0.0), p(30.0, 40.0));

        assert_eq!(scene.len(), 1);
        let group = scene.get(outcome.committed.unwrap()).unwrap();
        let ShapeKind::Group { shape, children } = &group.kind else {
            panic!("not a group");
        };
        assert_eq!(shape.as_deref(), Some(ARROW_GROUP));
        assert_eq!(children.len(), 2);
        let ShapeKind::Line { x2, y2, .. } = children[0].kind else {
            panic!("first child is not the line");
        };
        assert_eq!((x2, y2), (30.0, 40.0));
        let ShapeKind::Triangle { x, y, .. } = children[1].kind else {
            panic!("second child is not the head");
        };
        assert_eq!((x, y), (30.0, 40.0));
        // 90° base plus the drag direction
        let expected = 90.0 + (40.0f32).atan2(30.0).to_degrees();
        assert!((children[1].angle - expected).abs() < 1e-3);
        assert!(outcome.revert_to_select);
    }

    #[test]
    fn pencil_accumulates_points_and_persists() {
        let mut scene = Scene::new();
        let mut vp = Viewport::default();
        let mut c = controller(Tool::Pencil);
        c.pointer_down(p(0.0, 0.0), p(0.0, 0.0), &mut scene, "usrA", 0);
        for i in 1..=4 {
            c.pointer_move(p(i as f32, i as f32), p(i as f32, i as f32), &mut scene, &mut vp, IMAGE, CANVAS);
        }
        let outcome = c.pointer_up(&mut scene, "usrA", 1);
        assert!(!outcome.revert_to_select);
        let ShapeKind::Path { points } = &scene.get(outcome.committed.unwrap()).unwrap().kind else {
            panic!("not a path");
        };
        assert_eq!(points.len(), 5);
    }

    #[test]
    fn move_tool_pans_the_viewport_by_screen_delta() {
        let mut scene = Scene::new();
        let mut vp = Viewport::default();
        // pan away from the top-left clamp first
        vp.pan_x = -100.0;
        vp.pan_y = -100.0;
        let mut c = controller(Tool::Move);
        c.pointer_down(p(0.0, 0.0), p(200.0, 200.0), &mut scene, "usrA", 0);
        c.pointer_move(p(0.0, 0.0), p(230.0, 210.0), &mut scene, &mut vp, IMAGE, CANVAS);
        assert_eq!((vp.pan_x, vp.pan_y), (-70.0, -90.0));
        // panning hard right clamps at the image edge
        c.pointer_move(p(0.0, 0.0), p(5_000.0, 5_000.0), &mut scene, &mut vp, IMAGE, CANVAS);
        assert_eq!((vp.pan_x, vp.pan_y), (0.0, 0.0));
        let outcome = c.pointer_up(&mut scene, "usrA", 1);
        assert!(!outcome.revert_to_select);
        assert!(scene.is_empty());
    }

    #[test]
    fn select_drag_translates_and_stamps_modified() {
        let mut scene = Scene::new();
        let mut vp = Viewport::default();
        let id = scene.add(
            "Rectangle 1",
            ShapeKind::Rect {
                x: 10.0,
                y: 10.0,
                width: 5.0,
                height: 5.0,
                rx: 10.0,
            },
            Style::default(),
            "usrA",
            100,
        );
        let mut c = controller(Tool::Select);
        c.begin_move(id, p(12.0, 12.0));
        c.pointer_move(p(20.0, 17.0), p(20.0, 17.0), &mut scene, &mut vp, IMAGE, CANVAS);
        c.pointer_up(&mut scene, "usrB", 900);

        let shape = scene.get(id).unwrap();
        let ShapeKind::Rect { x, y, .. } = shape.kind else {
            panic!("not a rect");
        };
        assert_eq!((x, y), (18.0, 15.0));
        assert_eq!(shape.modified_by.as_deref(), Some("usrB"));
        assert_eq!(shape.modified_time, Some(900));
        assert_eq!(shape.created_by.as_deref(), Some("usrA"));
    }

    #[test]
    fn switching_tools_drops_the_gesture() {
        let mut scene = Scene::new();
        let mut c = controller(Tool::Rect);
        c.pointer_down(p(0.0, 0.0), p(0.0, 0.0), &mut scene, "usrA", 0);
        assert!(c.is_dragging());
        c.set_tool(Tool::Select, &Style::default());
        assert!(!c.is_dragging());
    }

    #[test]
    fn shape_names_count_up_per_kind() {
        let mut scene = Scene::new();
        let mut c = controller(Tool::Rect);
        let first = drag(&mut c, &mut scene, p(0.0, 0.0), p(1.0, 1.0)).committed.unwrap();
        c.set_tool(Tool::Rect, &Style::default());
        let second = drag(&mut c, &mut scene, p(2.0, 2.0), p(3.0, 3.0)).committed.unwrap();
        assert_eq!(scene.get(first).unwrap().name, "Rectangle 1");
        assert_eq!(scene.get(second).unwrap().name, "Rectangle 2");
    }
}
