//! Pan/zoom viewport over the background image.
//!
//! Screen = world × zoom + pan, with world (0,0) at the image's top-left
//! corner. After every pan or zoom the offset is clamped so the image cannot
//! be pushed out of view.

/// Documented zoom floor; just under 1× so a fitted image can still be
/// nudged, matching the original editor's behavior.
pub const MIN_ZOOM: f32 = 0.98;
pub const MAX_ZOOM: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub pan_x: f32,
    pub pan_y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

fn clamp_axis(pan: f32, extent: f32, canvas: f32) -> f32 {
    if extent >= canvas {
        // image overflows the canvas: no gap may open at either edge
        pan.clamp(canvas - extent, 0.0)
    } else {
        // image fits: keep it fully inside the canvas
        pan.clamp(0.0, canvas - extent)
    }
}

impl Viewport {
    pub fn screen_to_world(&self, screen: Point) -> Point {
        Point {
            x: (screen.x - self.pan_x) / self.zoom,
            y: (screen.y - self.pan_y) / self.zoom,
        }
    }

    pub fn world_to_screen(&self, world: Point) -> Point {
        Point {
            x: world.x * self.zoom + self.pan_x,
            y: world.y * self.zoom + self.pan_y,
        }
    }

    /// Clamp the offset against the image extent scaled by the current zoom.
    pub fn clamp(&mut self, image_size: (f32, f32), canvas_size: (f32, f32)) {
        self.pan_x = clamp_axis(self.pan_x, image_size.0 * self.zoom, canvas_size.0);
        self.pan_y = clamp_axis(self.pan_y, image_size.1 * self.zoom, canvas_size.1);
    }

    pub fn pan_by(&mut self, dx: f32, dy: f32, image_size: (f32, f32), canvas_size: (f32, f32)) {
        self.pan_x += dx;
        self.pan_y += dy;
        self.clamp(image_size, canvas_size);
    }

    /// Zoom by `factor`, keeping the world point under `cursor` fixed on
    /// screen, then re-clamp.
    pub fn zoom_at(
        &mut self,
        cursor: Point,
        factor: f32,
        image_size: (f32, f32),
        canvas_size: (f32, f32),
    ) {
        let new_zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let scale = new_zoom / self.zoom;
        self.pan_x = cursor.x - (cursor.x - self.pan_x) * scale;
        self.pan_y = cursor.y - (cursor.y - self.pan_y) * scale;
        self.zoom = new_zoom;
        self.clamp(image_size, canvas_size);
    }

    /// Fit the image into the canvas and center it, like the original
    /// editor's initial layout.
    pub fn fit(&mut self, image_size: (f32, f32), canvas_size: (f32, f32)) {
        let scale = (canvas_size.0 / image_size.0)
            .min(canvas_size.1 / image_size.1)
            .clamp(MIN_ZOOM, MAX_ZOOM);
        self.zoom = scale;
        self.pan_x = (canvas_size.0 - image_size.0 * scale) / 2.0;
        self.pan_y = (canvas_size.1 - image_size.1 * scale) / 2.0;
        self.clamp(image_size, canvas_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: (f32, f32) = (800.0, 600.0);
    const CANVAS: (f32, f32) = (400.0, 300.0);

    fn approx_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn screen_world_round_trip() {
        let vp = Viewport {
            pan_x: 37.0,
            pan_y: -12.0,
            zoom: 2.5,
        };
        let world = Point::new(123.0, 456.0);
        let back = vp.screen_to_world(vp.world_to_screen(world));
        assert!(approx_eq(back.x, world.x) && approx_eq(back.y, world.y));
    }

    #[test]
    fn pan_cannot_expose_area_beyond_the_image() {
        let mut vp = Viewport {
            zoom: 1.0,
            ..Viewport::default()
        };
        vp.pan_by(10_000.0, 10_000.0, IMAGE, CANVAS);
        assert_eq!((vp.pan_x, vp.pan_y), (0.0, 0.0));
        vp.pan_by(-10_000.0, -10_000.0, IMAGE, CANVAS);
        assert_eq!(vp.pan_x, CANVAS.0 - IMAGE.0);
        assert_eq!(vp.pan_y, CANVAS.1 - IMAGE.1);
    }

    #[test]
    fn visible_rect_stays_inside_image_across_pan_zoom_sequences() {
        let mut vp = Viewport::default();
        let moves: [(f32, f32, f32); 6] = [
            (50.0, -80.0, 1.3),
            (-400.0, 300.0, 2.0),
            (999.0, 999.0, 0.5),
            (-999.0, -999.0, 4.0),
            (3.0, 7.0, 0.25),
            (-1.0, -1.0, 8.0),
        ];
        for (dx, dy, factor) in moves {
            vp.pan_by(dx, dy, IMAGE, CANVAS);
            vp.zoom_at(Point::new(200.0, 150.0), factor, IMAGE, CANVAS);
            assert!(vp.zoom >= MIN_ZOOM && vp.zoom <= MAX_ZOOM);
            // the scaled image always overflows this canvas, so the visible
            // window must sit fully inside the image
            let top_left = vp.screen_to_world(Point::new(0.0, 0.0));
            let bottom_right = vp.screen_to_world(Point::new(CANVAS.0, CANVAS.1));
            assert!(top_left.x >= -1e-3 && top_left.y >= -1e-3);
            assert!(bottom_right.x <= IMAGE.0 + 1e-3 && bottom_right.y <= IMAGE.1 + 1e-3);
        }
    }

    #[test]
    fn zoom_is_clamped_to_documented_range() {
        let mut vp = Viewport::default();
        vp.zoom_at(Point::new(0.0, 0.0), 100.0, IMAGE, CANVAS);
        assert_eq!(vp.zoom, MAX_ZOOM);
        vp.zoom_at(Point::new(0.0, 0.0), 1e-6, IMAGE, CANVAS);
        assert_eq!(vp.zoom, MIN_ZOOM);
    }

    #[test]
    fn zoom_keeps_cursor_point_fixed_when_unclamped() {
        // big canvas so the clamp does not reposition the result
        let canvas = (4_000.0, 3_000.0);
        let mut vp = Viewport {
            pan_x: 100.0,
            pan_y: 50.0,
            zoom: 2.0,
        };
        let cursor = Point::new(500.0, 400.0);
        let before = vp.screen_to_world(cursor);
        vp.zoom_at(cursor, 1.5, IMAGE, canvas);
        let after = vp.screen_to_world(cursor);
        assert!(approx_eq(before.x, after.x) && approx_eq(before.y, after.y));
    }

    #[test]
    fn small_image_stays_inside_canvas() {
        let image = (100.0, 80.0);
        let canvas = (400.0, 300.0);
        let mut vp = Viewport::default();
        vp.pan_by(-500.0, 900.0, image, canvas);
        assert!(vp.pan_x >= 0.0 && vp.pan_x <= canvas.0 - image.0 * vp.zoom);
        assert!(vp.pan_y >= 0.0 && vp.pan_y <= canvas.1 - image.1 * vp.zoom);
    }

    #[test]
    fn fit_centers_the_image() {
        let mut vp = Viewport::default();
        vp.fit((400.0, 300.0), (800.0, 600.0));
        // fit scale would be 2.0, within range, image centered
        assert!(approx_eq(vp.zoom, 2.0));
        assert!(approx_eq(vp.pan_x, 0.0) && approx_eq(vp.pan_y, 0.0));
    }
}
