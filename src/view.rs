//! Camera state of the map and conversions between screen and map coordinates.

use nalgebra::{Point2, Rotation2, Vector2};

/// Total width (and height) of the map plane in map units.
pub const WORLD_SIZE: f64 = 2.0 * 20_037_508.34;

/// Size of a tile on screen, in pixels, at the exact resolution of its zoom
/// level. Used to select the zoom level for a given scale.
pub const TILE_PIXEL_SIZE: f64 = 256.0;

/// Maximum zoom level the tile coverage is computed for.
pub const MAX_ZOOM: u8 = 19;

/// Size of the rendering area in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSize {
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl ScreenSize {
    /// Creates a new size value.
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is not positive.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Axis-aligned rectangle. Used both for map-space extents (map units) and for
/// screen-space overlay boxes (pixels).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Minimum x coordinate.
    pub x_min: f64,
    /// Minimum y coordinate.
    pub y_min: f64,
    /// Maximum x coordinate.
    pub x_max: f64,
    /// Maximum y coordinate.
    pub y_max: f64,
}

impl Rect {
    /// Creates a new rectangle. The corners are not reordered.
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Width of the rectangle.
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    /// Height of the rectangle.
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Returns true if the two rectangles have a non-empty intersection.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x_min < other.x_max
            && other.x_min < self.x_max
            && self.y_min < other.y_max
            && other.y_min < self.y_max
    }

    /// Area of the intersection of the two rectangles, 0.0 if they do not
    /// intersect.
    pub fn intersection_area(&self, other: &Rect) -> f64 {
        let width = self.x_max.min(other.x_max) - self.x_min.max(other.x_min);
        let height = self.y_max.min(other.y_max) - self.y_min.max(other.y_min);
        if width <= 0.0 || height <= 0.0 {
            0.0
        } else {
            width * height
        }
    }

    /// Area of the rectangle.
    pub fn area(&self) -> f64 {
        (self.width() * self.height()).max(0.0)
    }

    /// Extends the rectangle to contain the given point.
    pub fn extend(&mut self, point: Point2<f64>) {
        self.x_min = self.x_min.min(point.x);
        self.y_min = self.y_min.min(point.y);
        self.x_max = self.x_max.max(point.x);
        self.y_max = self.y_max.max(point.y);
    }
}

/// State of the map camera: what part of the map plane is visible and how it
/// is oriented.
///
/// All mutations happen on the render thread; copies of the state are shipped
/// to the tile pipeline inside the requested tiles snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenState {
    position: Point2<f64>,
    scale: f64,
    angle: f64,
    perspective: f64,
    size: ScreenSize,
}

impl Default for ScreenState {
    fn default() -> Self {
        Self {
            position: Point2::new(0.0, 0.0),
            scale: WORLD_SIZE / TILE_PIXEL_SIZE,
            angle: 0.0,
            perspective: 0.0,
            size: ScreenSize::new(0.0, 0.0),
        }
    }
}

impl ScreenState {
    /// Creates a camera centered at `position` with the given scale (map units
    /// per pixel).
    pub fn new(position: Point2<f64>, scale: f64, size: ScreenSize) -> Self {
        Self {
            position,
            scale,
            angle: 0.0,
            perspective: 0.0,
            size,
        }
    }

    /// Center of the visible region in map units.
    pub fn position(&self) -> Point2<f64> {
        self.position
    }

    /// Map units per pixel.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Rotation of the map around the screen center, radians.
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Perspective tilt angle, radians. 0.0 is a top-down view.
    pub fn perspective(&self) -> f64 {
        self.perspective
    }

    /// Size of the rendering surface in pixels.
    pub fn size(&self) -> ScreenSize {
        self.size
    }

    /// Moves the camera center.
    pub fn set_position(&mut self, position: Point2<f64>) {
        self.position = position;
    }

    /// Changes the camera scale. Values are clamped to a sane positive range.
    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale.clamp(1e-3, WORLD_SIZE);
    }

    /// Sets the rotation angle.
    pub fn set_angle(&mut self, angle: f64) {
        self.angle = angle;
    }

    /// Sets the perspective tilt angle, clamped to [0, pi/3].
    pub fn set_perspective(&mut self, perspective: f64) {
        self.perspective = perspective.clamp(0.0, std::f64::consts::FRAC_PI_3);
    }

    /// Updates the rendering surface size.
    pub fn set_size(&mut self, size: ScreenSize) {
        self.size = size;
    }

    /// Converts a screen pixel position to map coordinates.
    pub fn screen_to_map(&self, pixel: Point2<f64>) -> Point2<f64> {
        let rel = Vector2::new(
            (pixel.x - self.size.width / 2.0) * self.scale,
            (self.size.height / 2.0 - pixel.y) * self.scale,
        );
        self.position + Rotation2::new(self.angle) * rel
    }

    /// Converts a map position to screen pixels.
    pub fn map_to_screen(&self, point: Point2<f64>) -> Point2<f64> {
        let rel = Rotation2::new(-self.angle) * (point - self.position);
        Point2::new(
            rel.x / self.scale + self.size.width / 2.0,
            self.size.height / 2.0 - rel.y / self.scale,
        )
    }

    /// Zoom level whose tile resolution is the closest to the current scale.
    pub fn zoom_level(&self) -> u8 {
        let exact = (WORLD_SIZE / (TILE_PIXEL_SIZE * self.scale)).log2();
        exact.round().clamp(0.0, MAX_ZOOM as f64) as u8
    }

    /// Bounding rectangle of the visible region in map units. Rotation is
    /// taken into account by projecting all four screen corners; perspective
    /// tilt magnifies the rectangle since a tilted view shows more of the map
    /// towards the horizon.
    pub fn visible_rect(&self) -> Rect {
        let corners = [
            Point2::new(0.0, 0.0),
            Point2::new(self.size.width, 0.0),
            Point2::new(0.0, self.size.height),
            Point2::new(self.size.width, self.size.height),
        ];

        let first = self.screen_to_map(corners[0]);
        let mut rect = Rect::new(first.x, first.y, first.x, first.y);
        for corner in &corners[1..] {
            rect.extend(self.screen_to_map(*corner));
        }

        if self.perspective > 0.0 {
            let magnify = self.perspective.tan().min(2.0);
            let dx = rect.width() * magnify / 2.0;
            let dy = rect.height() * magnify / 2.0;
            rect = Rect::new(
                rect.x_min - dx,
                rect.y_min - dy,
                rect.x_max + dx,
                rect.y_max + dy,
            );
        }

        rect
    }

    /// Tile coordinates covering the visible region at the given zoom level.
    /// The result is sorted and deduplicated.
    pub fn visible_tiles(&self, zoom: u8) -> Vec<(i32, i32)> {
        if self.size.is_empty() {
            return vec![];
        }

        let rect = self.visible_rect();
        let tile_size = WORLD_SIZE / (1u64 << zoom) as f64;
        let max_index = (1i64 << zoom) - 1;

        let to_index = |v: f64| (((v + WORLD_SIZE / 2.0) / tile_size).floor() as i64).clamp(0, max_index);

        let x_min = to_index(rect.x_min);
        let x_max = to_index(rect.x_max);
        let y_min = to_index(rect.y_min);
        let y_max = to_index(rect.y_max);

        let mut tiles = vec![];
        for x in x_min..=x_max {
            for y in y_min..=y_max {
                tiles.push((x as i32, y as i32));
            }
        }

        tiles
    }
}

/// Map-space rectangle of a tile at the given coordinates and zoom level.
pub fn tile_rect(x: i32, y: i32, zoom: u8) -> Rect {
    let tile_size = WORLD_SIZE / (1u64 << zoom) as f64;
    let x_min = -WORLD_SIZE / 2.0 + x as f64 * tile_size;
    let y_min = -WORLD_SIZE / 2.0 + y as f64 * tile_size;
    Rect::new(x_min, y_min, x_min + tile_size, y_min + tile_size)
}
