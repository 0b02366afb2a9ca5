use std::path::PathBuf;
use std::time::{Duration, Instant};

use eframe::egui;
use image::{DynamicImage, RgbaImage};
use tracing::warn;

use crate::binding::AnnotationBinding;
use crate::config::EditorConfig;
use crate::error::EditorError;
use crate::host::{AttachmentRef, CellValue, FieldType, MemoryBase, RecordStore};
use crate::resolve;
use crate::scene::{Scene, Shape, ShapeId, ShapeKind, Style, StylePatch, TRANSPARENT};
use crate::serializer::{export_scene, import_scene};
use crate::style_state::StyleStateManager;
use crate::tools::{Tool, ToolController};
use crate::viewport::{Point, Viewport};

const NOTICE_DURATION: Duration = Duration::from_secs(5);
/// Drags shorter than this (screen px) discard the degenerate shape for
/// drag-drawn kinds, as in the original editor.
const MIN_DRAG_DISTANCE: f32 = 5.0;

struct Notice {
    message: String,
    expires: Instant,
}

/// A record in some source table whose attachment cell references the open
/// image; used for linked-table resolution and the creation path.
struct SourceRecord {
    table_id: String,
    record_id: String,
    attachment: AttachmentRef,
}

pub struct RedlineApp {
    workspace_path: PathBuf,
    store: MemoryBase,
    config_error: Option<EditorError>,
    saved_revision: u64,
    synced_revision: u64,

    image_path: Option<PathBuf>,
    texture: Option<egui::TextureHandle>,
    image_size: (f32, f32),
    raw_image: Option<DynamicImage>,

    scene: Scene,
    binding: Option<AnnotationBinding>,
    source: Option<SourceRecord>,
    controller: ToolController,
    styles: StyleStateManager,
    viewport: Viewport,
    viewport_fitted: bool,
    selected: Option<ShapeId>,
    scene_dirty: bool,
    permission_notice_shown: bool,

    drag_origin: Option<egui::Pos2>,

    text_input_pos: Option<(f32, f32)>,
    text_input_buf: String,

    notices: Vec<Notice>,
}

impl RedlineApp {
    pub fn new(workspace_path: PathBuf, store: MemoryBase, image_path: Option<PathBuf>) -> Self {
        let config_error = match &store.config {
            Some(config) => config.validate(&store).err(),
            None => Some(EditorError::SchemaMisconfigured(
                "No editor configuration in this workspace. Pick the annotations table and \
                 fields in setup."
                    .to_string(),
            )),
        };
        let saved_revision = store.revision();
        let synced_revision = store.revision();

        let mut app = Self {
            workspace_path,
            store,
            config_error,
            saved_revision,
            synced_revision,
            image_path: None,
            texture: None,
            image_size: (800.0, 600.0),
            raw_image: None,
            scene: Scene::new(),
            binding: None,
            source: None,
            controller: ToolController::default(),
            styles: StyleStateManager::default(),
            viewport: Viewport::default(),
            viewport_fitted: false,
            selected: None,
            scene_dirty: false,
            permission_notice_shown: false,
            drag_origin: None,
            text_input_pos: None,
            text_input_buf: String::new(),
            notices: Vec::new(),
        };
        app.controller.set_tool(Tool::Select, app.styles.active());
        if let Some(path) = image_path {
            app.open_image(path);
        }
        app
    }

    fn config(&self) -> Option<&EditorConfig> {
        if self.config_error.is_some() {
            None
        } else {
            self.store.config.as_ref()
        }
    }

    fn notify(&mut self, message: impl Into<String>) {
        self.notices.push(Notice {
            message: message.into(),
            expires: Instant::now() + NOTICE_DURATION,
        });
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    // ── Attachment lifecycle ────────────────────────────────────────────────

    /// Switch the editor to another image: flush what's pending, then
    /// rebuild binding and scene from the store ("remount" semantics).
    fn open_image(&mut self, path: PathBuf) {
        self.flush_pending();

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.raw_image = match image::open(&path) {
            Ok(img) => Some(img),
            Err(e) => {
                self.notify(format!("Couldn't open {}: {e}", path.display()));
                None
            }
        };
        // scene units cap the largest image dimension, like the original's
        // fixed canvas width, so the documented zoom range stays usable
        self.image_size = self
            .raw_image
            .as_ref()
            .map(|img| scaled_image_size(img.width() as f32, img.height() as f32))
            .unwrap_or((800.0, 600.0));
        self.texture = None;
        self.viewport_fitted = false;
        self.image_path = Some(path);

        self.scene = Scene::new();
        self.scene.background = self.raw_image.is_some();
        self.binding = None;
        self.source = None;
        self.selected = None;
        self.scene_dirty = false;
        self.permission_notice_shown = false;
        self.styles = StyleStateManager::default();
        self.controller.set_tool(Tool::Select, self.styles.active());

        let Some(config) = self.config().cloned() else {
            return;
        };

        self.source = find_source_record(&self.store, &config, &filename);
        let record_id = match self.resolve_record(&config, &filename) {
            Ok(record_id) => record_id,
            Err(e) => {
                self.notify(e.to_string());
                None
            }
        };

        let mut binding = AnnotationBinding::new(
            config.annotations_table_id.clone(),
            config.storage_field_id.clone(),
            filename,
            record_id,
        );
        if let Some(json) = binding.read(&self.store) {
            match import_scene(&json) {
                Ok(scene) => self.scene = scene,
                Err(e) => warn!("stored scene did not parse; starting empty: {e}"),
            }
        }
        self.scene.background = self.raw_image.is_some();

        let permission = binding.refresh_permission(&self.store).clone();
        if !permission.granted {
            let reason = permission
                .reason
                .unwrap_or_else(|| "You don't have permission to update this record".to_string());
            self.notify(format!("Your changes will NOT be saved: {reason}"));
            self.permission_notice_shown = true;
        }
        self.binding = Some(binding);
    }

    fn resolve_record(
        &self,
        config: &EditorConfig,
        filename: &str,
    ) -> Result<Option<String>, EditorError> {
        if let (Some(source), Some(_)) = (&self.source, &config.image_field_id) {
            let linked = resolve::find_linked_annotation(
                &self.store,
                config,
                &source.table_id,
                &source.record_id,
                &source.attachment.id,
            )?;
            if linked.is_some() {
                return Ok(linked);
            }
        }
        resolve::find_by_primary_value(&self.store, &config.annotations_table_id, filename)
    }

    /// Push any pending debounced write through before switching away.
    fn flush_pending(&mut self) {
        if let Some(binding) = &mut self.binding {
            if binding.has_pending() || self.scene_dirty {
                if let Err(e) = binding.write_store(&mut self.store, export_scene(&self.scene)) {
                    warn!("flush on switch failed: {e}");
                }
            }
        }
        self.persist_workspace();
    }

    fn create_annotation_record(&mut self) {
        let Some(config) = self.config().cloned() else {
            return;
        };
        let Some(source) = &self.source else {
            return;
        };
        let (table_id, record_id, attachment) = (
            source.table_id.clone(),
            source.record_id.clone(),
            source.attachment.clone(),
        );
        let name = attachment.filename.clone();
        match resolve::create_annotation(
            &mut self.store,
            &config,
            &table_id,
            &record_id,
            &name,
            Some(&attachment),
        ) {
            Ok(record_id) => {
                let table_name = self
                    .store
                    .table(&config.annotations_table_id)
                    .map(|t| t.name.clone())
                    .unwrap_or_default();
                self.notify(format!("Added '{name}' to '{table_name}'"));
                let mut binding = AnnotationBinding::new(
                    config.annotations_table_id,
                    config.storage_field_id,
                    name,
                    Some(record_id),
                );
                binding.refresh_permission(&self.store);
                self.binding = Some(binding);
                self.scene_dirty = true;
            }
            Err(e) => self.notify(e.to_string()),
        }
    }

    // ── Frame plumbing ──────────────────────────────────────────────────────

    fn ensure_texture(&mut self, ctx: &egui::Context) {
        if self.texture.is_some() {
            return;
        }
        if let Some(ref img) = self.raw_image {
            let rgba = img.to_rgba8();
            let size = [rgba.width() as usize, rgba.height() as usize];
            let pixels = rgba.as_flat_samples();
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, pixels.as_slice());
            self.texture =
                Some(ctx.load_texture("image", color_image, egui::TextureOptions::LINEAR));
        }
    }

    fn mark_scene_changed(&mut self) {
        self.scene_dirty = true;
    }

    fn sync_selection_styles(&mut self) {
        let selection: Vec<&Shape> = self
            .selected
            .and_then(|id| self.scene.get(id))
            .into_iter()
            .collect();
        self.styles.on_selection_changed(&selection);
        self.controller.configure(self.styles.active());
    }

    fn select(&mut self, id: Option<ShapeId>) {
        if self.selected != id {
            self.selected = id;
            self.sync_selection_styles();
        }
    }

    /// End-of-frame persistence: debounce tick, foreign-change poll and
    /// workspace flush.
    fn run_persistence(&mut self) {
        let now = Instant::now();
        if self.scene_dirty {
            if let Some(binding) = &mut self.binding {
                binding.queue(export_scene(&self.scene), now);
            }
            self.scene_dirty = false;
        }

        let mut tick_error = None;
        if let Some(binding) = &mut self.binding {
            let was_granted = binding.permission().granted;
            match binding.tick(&mut self.store, now) {
                Ok(wrote) => {
                    if wrote {
                        self.synced_revision = self.store.revision();
                    }
                }
                Err(e) => tick_error = Some(e),
            }
            if was_granted && !binding.permission().granted && !self.permission_notice_shown {
                let reason = binding.permission().reason_display();
                tick_error = Some(EditorError::PermissionDenied(format!(
                    "Your changes will NOT be saved: {reason}"
                )));
                self.permission_notice_shown = true;
            }
        }
        if let Some(e) = tick_error {
            self.notify(e.to_string());
        }

        // import foreign edits, suppressing echoes of our own state
        if self.store.revision() != self.synced_revision {
            self.synced_revision = self.store.revision();
            let local = export_scene(&self.scene);
            let remote = match &mut self.binding {
                Some(binding) => binding.should_import(&self.store, local.as_deref()),
                None => None,
            };
            if let Some(remote) = remote {
                match import_scene(&remote) {
                    Ok(mut scene) => {
                        scene.background = self.raw_image.is_some();
                        self.scene = scene;
                        self.select(None);
                    }
                    Err(e) => warn!("remote scene did not parse: {e}"),
                }
            }
        }

        self.persist_workspace();
    }

    fn persist_workspace(&mut self) {
        if self.store.revision() == self.saved_revision {
            return;
        }
        match self.store.save(&self.workspace_path) {
            Ok(()) => self.saved_revision = self.store.revision(),
            Err(e) => {
                warn!("workspace flush failed: {e}");
                self.saved_revision = self.store.revision();
                self.notify(e.to_string());
            }
        }
    }

    // ── Coordinate helpers ──────────────────────────────────────────────────

    fn to_screen(&self, canvas: egui::Rect, world: Point) -> egui::Pos2 {
        let p = self.viewport.world_to_screen(world);
        egui::pos2(canvas.min.x + p.x, canvas.min.y + p.y)
    }

    fn to_world(&self, canvas: egui::Rect, screen: egui::Pos2) -> Point {
        self.viewport
            .screen_to_world(Point::new(screen.x - canvas.min.x, screen.y - canvas.min.y))
    }

    fn canvas_size(&self, canvas: egui::Rect) -> (f32, f32) {
        (canvas.width(), canvas.height())
    }

    // ── Drawing ─────────────────────────────────────────────────────────────

    fn draw_shape(&self, painter: &egui::Painter, canvas: egui::Rect, shape: &Shape) {
        let zoom = self.viewport.zoom;
        let stroke = egui::Stroke::new(
            shape.style.stroke_width * zoom,
            parse_color(&shape.style.stroke).unwrap_or(egui::Color32::RED),
        );
        let fill = parse_color(&shape.style.fill);
        match &shape.kind {
            ShapeKind::Rect {
                x,
                y,
                width,
                height,
                rx,
            } => {
                let rect = egui::Rect::from_min_size(
                    self.to_screen(canvas, Point::new(*x, *y)),
                    egui::vec2(width * zoom, height * zoom),
                );
                if let Some(fill) = fill {
                    painter.rect_filled(rect, rx * zoom, fill);
                }
                painter.rect_stroke(rect, rx * zoom, stroke, egui::StrokeKind::Middle);
            }
            ShapeKind::Ellipse { x, y, rx, ry } => {
                let center = self.to_screen(canvas, Point::new(x + rx, y + ry));
                painter.add(egui::epaint::EllipseShape {
                    center,
                    radius: egui::vec2(rx * zoom, ry * zoom),
                    fill: fill.unwrap_or(egui::Color32::TRANSPARENT),
                    stroke,
                });
            }
            ShapeKind::Line { x1, y1, x2, y2 } => {
                let a = self.to_screen(canvas, Point::new(*x1, *y1));
                let b = self.to_screen(canvas, Point::new(*x2, *y2));
                match &shape.style.stroke_dash {
                    Some(dash) if dash.len() >= 2 => {
                        painter.extend(egui::Shape::dashed_line(
                            &[a, b],
                            stroke,
                            dash[0] * zoom,
                            dash[1] * zoom,
                        ));
                    }
                    _ => {
                        painter.line_segment([a, b], stroke);
                    }
                }
            }
            ShapeKind::Triangle {
                x,
                y,
                width,
                height,
            } => {
                let vertices = triangle_vertices(*x, *y, *width, *height, shape.angle)
                    .map(|v| self.to_screen(canvas, v));
                painter.add(egui::Shape::convex_polygon(
                    vertices.to_vec(),
                    fill.unwrap_or(stroke.color),
                    egui::Stroke::NONE,
                ));
            }
            ShapeKind::Path { points } => {
                let screen: Vec<egui::Pos2> = points
                    .iter()
                    .map(|p| self.to_screen(canvas, Point::new(p[0], p[1])))
                    .collect();
                if screen.len() > 1 {
                    painter.add(egui::Shape::line(screen, stroke));
                }
            }
            ShapeKind::Text { x, y, content } => {
                let pos = self.to_screen(canvas, Point::new(*x, *y));
                let color = parse_color(&shape.style.stroke).unwrap_or(egui::Color32::RED);
                let galley = painter.layout_no_wrap(
                    content.clone(),
                    egui::FontId::proportional(shape.style.font_size * zoom),
                    color,
                );
                if let Some(bg) = parse_color(&shape.style.text_background) {
                    painter.rect_filled(
                        egui::Rect::from_min_size(pos, galley.size()),
                        0.0,
                        bg,
                    );
                }
                painter.galley(pos, galley, color);
            }
            ShapeKind::Group { children, .. } => {
                for child in children {
                    self.draw_shape(painter, canvas, child);
                }
            }
        }

        if self.selected == Some(shape.id) {
            if let Some(rect) = self.shape_screen_rect(canvas, shape) {
                painter.rect_stroke(
                    rect.expand(4.0),
                    2.0,
                    egui::Stroke::new(1.5, egui::Color32::from_rgb(0, 120, 255)),
                    egui::StrokeKind::Middle,
                );
            }
        }
    }

    fn shape_screen_rect(&self, canvas: egui::Rect, shape: &Shape) -> Option<egui::Rect> {
        let (min, max) = kind_bounds(&shape.kind, &shape.style)?;
        Some(egui::Rect::from_min_max(
            self.to_screen(canvas, min),
            self.to_screen(canvas, max),
        ))
    }

    // ── Hit-testing ─────────────────────────────────────────────────────────

    fn hit_test(&self, canvas: egui::Rect, screen_pos: egui::Pos2) -> Option<ShapeId> {
        for shape in self.scene.shapes().iter().rev() {
            if self.kind_hit(canvas, &shape.kind, &shape.style, screen_pos) {
                return Some(shape.id);
            }
        }
        None
    }

    fn kind_hit(
        &self,
        canvas: egui::Rect,
        kind: &ShapeKind,
        style: &Style,
        pos: egui::Pos2,
    ) -> bool {
        let zoom = self.viewport.zoom;
        let slack = style.stroke_width * zoom + 8.0;
        match kind {
            ShapeKind::Rect {
                x,
                y,
                width,
                height,
                ..
            } => {
                let rect = egui::Rect::from_min_size(
                    self.to_screen(canvas, Point::new(*x, *y)),
                    egui::vec2(width * zoom, height * zoom),
                );
                rect.expand(slack).contains(pos) && !rect.shrink(slack).contains(pos)
            }
            ShapeKind::Ellipse { x, y, rx, ry } => {
                let center = self.to_screen(canvas, Point::new(x + rx, y + ry));
                let (sx, sy) = ((rx * zoom).max(1.0), (ry * zoom).max(1.0));
                let v = ((pos.x - center.x) / sx).powi(2) + ((pos.y - center.y) / sy).powi(2);
                (v.sqrt() - 1.0).abs() * sx.min(sy) < slack
            }
            ShapeKind::Line { x1, y1, x2, y2 } => {
                let a = self.to_screen(canvas, Point::new(*x1, *y1));
                let b = self.to_screen(canvas, Point::new(*x2, *y2));
                point_to_segment_dist(pos, a, b) < slack
            }
            ShapeKind::Triangle {
                x,
                y,
                width,
                height,
            } => {
                let center = self.to_screen(canvas, Point::new(*x, *y));
                let half = egui::vec2(width * zoom / 2.0, height * zoom / 2.0);
                egui::Rect::from_center_size(center, 2.0 * half)
                    .expand(4.0)
                    .contains(pos)
            }
            ShapeKind::Path { points } => points.windows(2).any(|w| {
                let a = self.to_screen(canvas, Point::new(w[0][0], w[0][1]));
                let b = self.to_screen(canvas, Point::new(w[1][0], w[1][1]));
                point_to_segment_dist(pos, a, b) < slack
            }),
            ShapeKind::Text { x, y, content } => {
                let p = self.to_screen(canvas, Point::new(*x, *y));
                let fs = style.font_size * zoom;
                let approx_width = content.len() as f32 * fs * 0.6;
                egui::Rect::from_min_size(p, egui::vec2(approx_width, fs * 1.2))
                    .expand(4.0)
                    .contains(pos)
            }
            ShapeKind::Group { children, .. } => children
                .iter()
                .any(|c| self.kind_hit(canvas, &c.kind, &c.style, pos)),
        }
    }

    // ── Raster export ───────────────────────────────────────────────────────

    fn export_annotated(&mut self) {
        let Some(path) = self.image_path.clone() else {
            return;
        };
        let Some(ref raw) = self.raw_image else {
            return;
        };
        // render at scene resolution so shape coordinates line up
        let mut img: RgbaImage = raw
            .resize_exact(
                self.image_size.0 as u32,
                self.image_size.1 as u32,
                image::imageops::FilterType::Triangle,
            )
            .to_rgba8();
        for shape in self.scene.shapes() {
            rasterize_shape(&mut img, shape);
        }
        let out_path = path.with_file_name(format!(
            "{}_annotated.png",
            path.file_stem().unwrap_or_default().to_string_lossy()
        ));
        match img.save(&out_path) {
            Ok(()) => self.notify(format!("Exported to {}", out_path.display())),
            Err(e) => self.notify(format!("Export failed: {e}")),
        }
    }

    // ── UI sections ─────────────────────────────────────────────────────────

    fn toolbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("Open image…").clicked() {
                    if let Some(path) = rfd::FileDialog::new()
                        .add_filter("Images", &["png", "jpg", "jpeg", "gif", "webp", "bmp"])
                        .pick_file()
                    {
                        self.open_image(path);
                    }
                }
                ui.separator();

                let mut clicked = None;
                for tool in Tool::ALL {
                    if ui
                        .selectable_label(self.controller.tool() == tool, tool.label())
                        .clicked()
                    {
                        clicked = Some(tool);
                    }
                }
                if let Some(tool) = clicked {
                    self.set_tool(tool);
                }
                ui.separator();

                self.style_controls(ui);
                ui.separator();

                let can_create = self.binding.as_ref().is_some_and(|b| b.record_id().is_none())
                    && self.source.is_some();
                if can_create {
                    if ui.button("New annotation").clicked() {
                        self.create_annotation_record();
                    }
                }
                if ui.button("Clear all").clicked() && !self.scene.is_empty() {
                    self.scene.clear();
                    self.select(None);
                    self.mark_scene_changed();
                }
                if ui.button("Export PNG").clicked() {
                    self.export_annotated();
                }
                ui.separator();

                ui.label(format!("Zoom: {:.0}%", self.viewport.zoom * 100.0));
                if let Some(binding) = &self.binding {
                    let permission = binding.permission();
                    if !permission.granted {
                        ui.label(
                            egui::RichText::new(format!("🔒 {}", permission.reason_display()))
                                .color(egui::Color32::from_rgb(200, 120, 0)),
                        );
                    }
                }
            });
        });
    }

    fn set_tool(&mut self, tool: Tool) {
        self.controller.set_tool(tool, self.styles.active());
        if !tool.allows_selection() {
            self.select(None);
        }
    }

    fn style_controls(&mut self, ui: &mut egui::Ui) {
        let active = self.styles.active().clone();
        let mut patch = StylePatch::default();

        ui.label("Stroke:");
        let mut stroke = parse_color(&active.stroke).unwrap_or(egui::Color32::RED);
        if ui.color_edit_button_srgba(&mut stroke).changed() {
            patch.stroke = Some(color_to_hex(stroke));
        }

        ui.label("Fill:");
        let mut filled = active.fill != TRANSPARENT;
        let response = ui.checkbox(&mut filled, "");
        if response.changed() {
            patch.fill = Some(if filled {
                active.stroke.clone()
            } else {
                TRANSPARENT.to_string()
            });
        } else if filled {
            let mut fill = parse_color(&active.fill).unwrap_or(egui::Color32::WHITE);
            if ui.color_edit_button_srgba(&mut fill).changed() {
                patch.fill = Some(color_to_hex(fill));
            }
        }

        ui.label("Width:");
        let mut width = active.stroke_width;
        if ui
            .add(egui::Slider::new(&mut width, 1.0..=20.0))
            .changed()
        {
            patch.stroke_width = Some(width);
        }

        if self.controller.tool() == Tool::Text || self.selected_is_text() {
            ui.label("Font:");
            let mut font_size = active.font_size;
            if ui
                .add(egui::Slider::new(&mut font_size, 8.0..=72.0))
                .changed()
            {
                patch.font_size = Some(font_size);
            }
        }

        if !patch.is_empty() {
            self.apply_style_patch(patch);
        }
    }

    fn selected_is_text(&self) -> bool {
        self.selected
            .and_then(|id| self.scene.get(id))
            .is_some_and(|s| matches!(s.kind, ShapeKind::Text { .. }))
    }

    fn apply_style_patch(&mut self, patch: StylePatch) {
        let selection: Vec<ShapeId> = self.selected.into_iter().collect();
        self.styles
            .apply(&patch, &mut self.scene, &selection, self.store.current_collaborator(), Self::now_ms());
        self.controller.configure(self.styles.active());
        if !selection.is_empty() {
            self.mark_scene_changed();
        }
    }

    fn properties_panel(&mut self, ctx: &egui::Context) {
        let Some(id) = self.selected else {
            return;
        };
        let Some(shape) = self.scene.get(id) else {
            return;
        };
        let mut name = shape.name.clone();
        let created = authorship_line(&self.store, shape.created_by.as_deref(), shape.created_time);
        let modified =
            authorship_line(&self.store, shape.modified_by.as_deref(), shape.modified_time);

        let mut renamed = None;
        egui::Window::new("Layer")
            .anchor(egui::Align2::RIGHT_TOP, egui::vec2(-10.0, 40.0))
            .resizable(false)
            .show(ctx, |ui| {
                if ui.text_edit_singleline(&mut name).changed() {
                    renamed = Some(name.clone());
                }
                ui.label(egui::RichText::new(format!("Created {created}")).small());
                ui.label(egui::RichText::new(format!("Modified {modified}")).small());
            });

        if let Some(new_name) = renamed {
            let user = self.store.current_collaborator().to_string();
            if let Some(shape) = self.scene.get_mut(id) {
                shape.name = new_name;
            }
            self.scene.touch(id, &user, Self::now_ms());
            self.mark_scene_changed();
        }
    }

    fn setup_screen(&mut self, ctx: &egui::Context, message: &str) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(80.0);
                ui.heading("Setup needed");
                ui.label(message);
                ui.add_space(10.0);
                ui.label(format!("Workspace: {}", self.workspace_path.display()));
            });
        });
    }

    fn text_overlay(&mut self, ctx: &egui::Context, canvas: egui::Rect) {
        let Some(img_pos) = self.text_input_pos else {
            return;
        };
        let screen_pos = self.to_screen(canvas, Point::new(img_pos.0, img_pos.1));
        egui::Area::new(egui::Id::new("text_input"))
            .fixed_pos(screen_pos)
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                ui.set_max_width(300.0);
                let te = ui.text_edit_singleline(&mut self.text_input_buf);
                if te.lost_focus() {
                    if !self.text_input_buf.is_empty() {
                        let content = std::mem::take(&mut self.text_input_buf);
                        let count = self
                            .scene
                            .shapes()
                            .iter()
                            .filter(|s| matches!(s.kind, ShapeKind::Text { .. }))
                            .count();
                        self.scene.add(
                            format!("Text {}", count + 1),
                            ShapeKind::Text {
                                x: img_pos.0,
                                y: img_pos.1,
                                content,
                            },
                            self.styles.active().clone(),
                            self.store.current_collaborator(),
                            Self::now_ms(),
                        );
                        self.mark_scene_changed();
                    }
                    self.text_input_buf.clear();
                    self.text_input_pos = None;
                    self.set_tool(Tool::Select);
                } else {
                    te.request_focus();
                }
            });
    }

    fn notices_overlay(&mut self, ctx: &egui::Context) {
        let now = Instant::now();
        self.notices.retain(|n| n.expires > now);
        if self.notices.is_empty() {
            return;
        }
        egui::Area::new(egui::Id::new("notices"))
            .anchor(egui::Align2::CENTER_BOTTOM, egui::vec2(0.0, -20.0))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                for notice in &self.notices {
                    egui::Frame::popup(ui.style()).show(ui, |ui| {
                        ui.label(&notice.message);
                    });
                }
            });
        ctx.request_repaint_after(Duration::from_millis(250));
    }

    // ── Canvas interaction ──────────────────────────────────────────────────

    fn canvas_panel(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let (response, painter) =
                ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
            let canvas = response.rect;
            let canvas_size = self.canvas_size(canvas);

            if !self.viewport_fitted {
                self.viewport.fit(self.image_size, canvas_size);
                self.viewport_fitted = true;
            }

            painter.rect_filled(canvas, 0.0, egui::Color32::from_gray(40));
            if let Some(ref tex) = self.texture {
                let img_rect = egui::Rect::from_min_max(
                    self.to_screen(canvas, Point::new(0.0, 0.0)),
                    self.to_screen(canvas, Point::new(self.image_size.0, self.image_size.1)),
                );
                painter.image(
                    tex.id(),
                    img_rect,
                    egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    egui::Color32::WHITE,
                );
            }

            for shape in self.scene.shapes() {
                self.draw_shape(&painter, canvas, shape);
            }

            self.text_overlay(ctx, canvas);

            // middle-mouse pan works regardless of the active tool
            let middle_down = ctx.input(|i| i.pointer.middle_down());
            if middle_down && response.hovered() {
                let delta = ctx.input(|i| i.pointer.delta());
                self.viewport
                    .pan_by(delta.x, delta.y, self.image_size, canvas_size);
            }

            let scroll_delta = ctx.input(|i| i.smooth_scroll_delta.y);
            if scroll_delta != 0.0 && response.hovered() {
                if let Some(cursor) = response.hover_pos() {
                    let factor = 1.0 + scroll_delta * 0.002;
                    let local = Point::new(cursor.x - canvas.min.x, cursor.y - canvas.min.y);
                    self.viewport
                        .zoom_at(local, factor, self.image_size, canvas_size);
                }
            }

            if response.drag_started_by(egui::PointerButton::Primary) {
                if let Some(pos) = response.hover_pos() {
                    self.drag_origin = Some(pos);
                    self.on_pointer_down(canvas, pos);
                }
            }
            if response.dragged_by(egui::PointerButton::Primary) {
                if let Some(pos) = response
                    .hover_pos()
                    .or(ctx.input(|i| i.pointer.latest_pos()))
                {
                    let world = self.to_world(canvas, pos);
                    let local = Point::new(pos.x - canvas.min.x, pos.y - canvas.min.y);
                    let image_size = self.image_size;
                    self.controller.pointer_move(
                        world,
                        local,
                        &mut self.scene,
                        &mut self.viewport,
                        image_size,
                        canvas_size,
                    );
                    if self.controller.is_dragging() {
                        // provisional geometry changes are edits too
                        self.mark_scene_changed();
                    }
                }
            }
            if response.drag_stopped_by(egui::PointerButton::Primary) {
                let end = response
                    .hover_pos()
                    .or(ctx.input(|i| i.pointer.latest_pos()));
                self.on_pointer_up(end);
            }
            if response.clicked() {
                if let Some(pos) = response.hover_pos() {
                    self.on_click(canvas, pos);
                }
            }
        });
    }

    fn on_pointer_down(&mut self, canvas: egui::Rect, pos: egui::Pos2) {
        let world = self.to_world(canvas, pos);
        let local = Point::new(pos.x - canvas.min.x, pos.y - canvas.min.y);
        match self.controller.tool() {
            Tool::Select => {
                if let Some(hit) = self.hit_test(canvas, pos) {
                    self.select(Some(hit));
                    self.controller.begin_move(hit, world);
                } else {
                    self.select(None);
                }
            }
            Tool::Text => {
                self.text_input_pos = Some((world.x, world.y));
                self.text_input_buf.clear();
            }
            _ => {
                let user = self.store.current_collaborator().to_string();
                self.controller
                    .pointer_down(world, local, &mut self.scene, &user, Self::now_ms());
            }
        }
    }

    fn on_pointer_up(&mut self, end: Option<egui::Pos2>) {
        let user = self.store.current_collaborator().to_string();
        let was_drawing = self.controller.is_dragging();
        let outcome = self.controller.pointer_up(&mut self.scene, &user, Self::now_ms());

        if let Some(committed) = outcome.committed {
            let too_short = match (self.drag_origin, end) {
                (Some(a), Some(b)) => (b - a).length() <= MIN_DRAG_DISTANCE,
                _ => false,
            };
            // pencil strokes keep even tiny marks; drag-drawn shapes with no
            // real drag are discarded before they ever persist
            if too_short && outcome.revert_to_select {
                self.scene.remove(committed);
            }
            self.mark_scene_changed();
        } else if was_drawing {
            self.mark_scene_changed();
        }

        if outcome.revert_to_select {
            self.set_tool(Tool::Select);
        }
        self.drag_origin = None;
    }

    fn on_click(&mut self, canvas: egui::Rect, pos: egui::Pos2) {
        match self.controller.tool() {
            Tool::Select => {
                let hit = self.hit_test(canvas, pos);
                self.select(hit);
            }
            Tool::Text if self.text_input_pos.is_none() => {
                let world = self.to_world(canvas, pos);
                self.text_input_pos = Some((world.x, world.y));
                self.text_input_buf.clear();
            }
            _ => {}
        }
    }

    fn handle_keys(&mut self, ctx: &egui::Context) {
        let delete_pressed = ctx.input(|i| {
            i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace)
        });
        if delete_pressed && self.text_input_pos.is_none() {
            if let Some(id) = self.selected {
                self.scene.remove(id);
                self.select(None);
                self.mark_scene_changed();
            }
        }
    }
}

impl eframe::App for RedlineApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.ensure_texture(ctx);
        self.handle_keys(ctx);
        self.toolbar(ctx);

        if let Some(error) = self.config_error.clone() {
            self.setup_screen(ctx, &error.to_string());
        } else if self.image_path.is_none() {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    ui.add_space(80.0);
                    ui.label("Open an image to start annotating");
                });
            });
        } else {
            self.canvas_panel(ctx);
            self.properties_panel(ctx);
        }

        self.notices_overlay(ctx);
        self.run_persistence();

        if self.binding.as_ref().is_some_and(AnnotationBinding::has_pending) {
            ctx.request_repaint_after(Duration::from_millis(50));
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Largest scene dimension is capped, mirroring the original editor's fixed
/// canvas width.
const MAX_SCENE_WIDTH: f32 = 1000.0;

fn scaled_image_size(width: f32, height: f32) -> (f32, f32) {
    let largest = width.max(height);
    if largest <= MAX_SCENE_WIDTH {
        (width, height)
    } else {
        let scale = MAX_SCENE_WIDTH / largest;
        (width * scale, height * scale)
    }
}

fn find_source_record(
    store: &MemoryBase,
    config: &EditorConfig,
    filename: &str,
) -> Option<SourceRecord> {
    for table in &store.tables {
        if table.id == config.annotations_table_id {
            continue;
        }
        let attachment_fields: Vec<&str> = table
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::Attachment)
            .map(|f| f.id.as_str())
            .collect();
        for record in &table.records {
            for field_id in &attachment_fields {
                let Some(CellValue::Attachments(attachments)) = record.cells.get(*field_id) else {
                    continue;
                };
                if let Some(attachment) = attachments
                    .iter()
                    .find(|a| a.filename == filename || a.id == filename)
                {
                    return Some(SourceRecord {
                        table_id: table.id.clone(),
                        record_id: record.id.clone(),
                        attachment: attachment.clone(),
                    });
                }
            }
        }
    }
    None
}

fn authorship_line(store: &MemoryBase, collaborator: Option<&str>, time_ms: Option<i64>) -> String {
    let who = collaborator
        .map(|id| store.collaborator_name(id).unwrap_or_else(|| id.to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    match time_ms {
        Some(ms) => format!("by {who}, {}", time_ago(ms)),
        None => format!("by {who}"),
    }
}

fn time_ago(epoch_ms: i64) -> String {
    let delta_ms = chrono::Utc::now().timestamp_millis() - epoch_ms;
    let seconds = (delta_ms / 1000).max(0);
    if seconds < 60 {
        "just now".to_string()
    } else if seconds < 3_600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3_600)
    } else {
        format!("{}d ago", seconds / 86_400)
    }
}

pub fn parse_color(value: &str) -> Option<egui::Color32> {
    let hex = value.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(egui::Color32::from_rgb(r, g, b))
}

pub fn color_to_hex(color: egui::Color32) -> String {
    format!("#{:02x}{:02x}{:02x}", color.r(), color.g(), color.b())
}

/// World-space bounding box of a shape, for the selection indicator.
fn kind_bounds(kind: &ShapeKind, style: &Style) -> Option<(Point, Point)> {
    match kind {
        ShapeKind::Rect {
            x,
            y,
            width,
            height,
            ..
        } => Some((Point::new(*x, *y), Point::new(x + width, y + height))),
        ShapeKind::Ellipse { x, y, rx, ry } => {
            Some((Point::new(*x, *y), Point::new(x + 2.0 * rx, y + 2.0 * ry)))
        }
        ShapeKind::Line { x1, y1, x2, y2 } => Some((
            Point::new(x1.min(*x2), y1.min(*y2)),
            Point::new(x1.max(*x2), y1.max(*y2)),
        )),
        ShapeKind::Triangle {
            x,
            y,
            width,
            height,
        } => Some((
            Point::new(x - width / 2.0, y - height / 2.0),
            Point::new(x + width / 2.0, y + height / 2.0),
        )),
        ShapeKind::Path { points } => {
            let first = points.first()?;
            let mut min = Point::new(first[0], first[1]);
            let mut max = min;
            for p in points {
                min.x = min.x.min(p[0]);
                min.y = min.y.min(p[1]);
                max.x = max.x.max(p[0]);
                max.y = max.y.max(p[1]);
            }
            Some((min, max))
        }
        ShapeKind::Text { x, y, content } => {
            let fs = style.font_size;
            Some((
                Point::new(*x, *y),
                Point::new(x + content.len() as f32 * fs * 0.6, y + fs * 1.2),
            ))
        }
        ShapeKind::Group { children, .. } => {
            let mut bounds: Option<(Point, Point)> = None;
            for child in children {
                if let Some((cmin, cmax)) = kind_bounds(&child.kind, &child.style) {
                    bounds = Some(match bounds {
                        None => (cmin, cmax),
                        Some((min, max)) => (
                            Point::new(min.x.min(cmin.x), min.y.min(cmin.y)),
                            Point::new(max.x.max(cmax.x), max.y.max(cmax.y)),
                        ),
                    });
                }
            }
            bounds
        }
    }
}

fn triangle_vertices(cx: f32, cy: f32, width: f32, height: f32, angle_deg: f32) -> [Point; 3] {
    let rad = angle_deg.to_radians();
    let (sin, cos) = rad.sin_cos();
    let rotate = |dx: f32, dy: f32| Point::new(cx + dx * cos - dy * sin, cy + dx * sin + dy * cos);
    [
        rotate(0.0, -height / 2.0),
        rotate(-width / 2.0, height / 2.0),
        rotate(width / 2.0, height / 2.0),
    ]
}

fn point_to_segment_dist(p: egui::Pos2, a: egui::Pos2, b: egui::Pos2) -> f32 {
    let ab = b - a;
    let ap = p - a;
    let denom = ab.dot(ab);
    if denom == 0.0 {
        return ap.length();
    }
    let t = (ap.dot(ab) / denom).clamp(0.0, 1.0);
    let closest = a + ab * t;
    (p - closest).length()
}

// ── Raster export (shapes onto the saved PNG) ───────────────────────────────

fn rasterize_shape(img: &mut RgbaImage, shape: &Shape) {
    let color = parse_color(&shape.style.stroke)
        .map(|c| [c.r(), c.g(), c.b(), 255])
        .unwrap_or([255, 0, 0, 255]);
    let thickness = shape.style.stroke_width;
    match &shape.kind {
        ShapeKind::Rect {
            x,
            y,
            width,
            height,
            ..
        } => {
            let (x2, y2) = (x + width, y + height);
            draw_line_on_image(img, *x, *y, x2, *y, thickness, color);
            draw_line_on_image(img, x2, *y, x2, y2, thickness, color);
            draw_line_on_image(img, x2, y2, *x, y2, thickness, color);
            draw_line_on_image(img, *x, y2, *x, *y, thickness, color);
        }
        ShapeKind::Ellipse { x, y, rx, ry } => {
            let (cx, cy) = (x + rx, y + ry);
            let steps = 128;
            let mut prev = (cx + rx, cy);
            for i in 1..=steps {
                let theta = std::f32::consts::TAU * i as f32 / steps as f32;
                let next = (cx + rx * theta.cos(), cy + ry * theta.sin());
                draw_line_on_image(img, prev.0, prev.1, next.0, next.1, thickness, color);
                prev = next;
            }
        }
        ShapeKind::Line { x1, y1, x2, y2 } => {
            draw_line_on_image(img, *x1, *y1, *x2, *y2, thickness, color);
        }
        ShapeKind::Triangle {
            x,
            y,
            width,
            height,
        } => {
            let v = triangle_vertices(*x, *y, *width, *height, shape.angle);
            for (a, b) in [(0, 1), (1, 2), (2, 0)] {
                draw_line_on_image(img, v[a].x, v[a].y, v[b].x, v[b].y, thickness, color);
            }
        }
        ShapeKind::Path { points } => {
            for w in points.windows(2) {
                draw_line_on_image(img, w[0][0], w[0][1], w[1][0], w[1][1], thickness, color);
            }
        }
        ShapeKind::Text { .. } => {
            // rasterizing text needs a font renderer; text annotations only
            // appear in the GUI for now
        }
        ShapeKind::Group { children, .. } => {
            for child in children {
                rasterize_shape(img, child);
            }
        }
    }
}

fn draw_line_on_image(
    img: &mut RgbaImage,
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    thickness: f32,
    color: [u8; 4],
) {
    let dx = x1 - x0;
    let dy = y1 - y0;
    let len = (dx * dx + dy * dy).sqrt();
    let steps = (len * 2.0) as i32;
    let half_t = (thickness / 2.0).max(0.5) as i32;
    let (w, h) = (img.width() as i32, img.height() as i32);

    for i in 0..=steps {
        let t = i as f32 / steps.max(1) as f32;
        let cx = (x0 + dx * t) as i32;
        let cy = (y0 + dy * t) as i32;
        for oy in -half_t..=half_t {
            for ox in -half_t..=half_t {
                let px = cx + ox;
                let py = cy + oy;
                if px >= 0 && px < w && py >= 0 && py < h {
                    img.put_pixel(px as u32, py as u32, image::Rgba(color));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_round_trip() {
        let color = parse_color("#3fa2c8").unwrap();
        assert_eq!(color_to_hex(color), "#3fa2c8");
        assert_eq!(parse_color("transparent"), None);
        assert_eq!(parse_color("#xyzxyz"), None);
        assert_eq!(parse_color("#fff"), None);
    }

    #[test]
    fn triangle_points_along_its_angle() {
        // angle 90: apex rotates from "up" to "right"
        let v = triangle_vertices(10.0, 10.0, 4.0, 4.0, 90.0);
        assert!((v[0].x - 12.0).abs() < 1e-3);
        assert!((v[0].y - 10.0).abs() < 1e-3);
    }

    #[test]
    fn segment_distance_handles_degenerate_segments() {
        let p = egui::pos2(3.0, 4.0);
        let a = egui::pos2(0.0, 0.0);
        assert_eq!(point_to_segment_dist(p, a, a), 5.0);
    }

    #[test]
    fn time_ago_buckets() {
        let now = chrono::Utc::now().timestamp_millis();
        assert_eq!(time_ago(now), "just now");
        assert_eq!(time_ago(now - 5 * 60 * 1000), "5m ago");
        assert_eq!(time_ago(now - 3 * 3_600 * 1000), "3h ago");
        assert_eq!(time_ago(now - 48 * 3_600 * 1000), "2d ago");
    }
}
