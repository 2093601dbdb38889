//! Draw-ready geometry primitives produced by the tile pipeline.

use nalgebra::Point2;

/// Draw layer a geometry bucket belongs to. Layers are submitted strictly in
/// the declared order: flat geometry first, then screen-space overlays, then
/// 3d geometry on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderLayer {
    /// Ground geometry: areas, lines, background.
    Geometry,
    /// Screen-space anchored labels and icons, subject to collision
    /// resolution.
    Overlay,
    /// Extruded 3d geometry (buildings).
    Geometry3d,
}

/// Graphics state of one geometry batch. Groups with equal state can be drawn
/// with a single pipeline switch, so the frame composer sorts by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderState {
    /// Target draw layer.
    pub layer: RenderLayer,
    /// Depth ordering key within the layer, lower values draw first.
    pub depth: i32,
}

impl RenderState {
    /// Creates a render state.
    pub fn new(layer: RenderLayer, depth: i32) -> Self {
        Self { layer, depth }
    }
}

/// One tessellated vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Position in map units.
    pub position: [f32; 2],
    /// Depth within the layer.
    pub depth: f32,
}

/// A batch of tessellated geometry for one (tile, render state) pair, ready
/// for upload.
#[derive(Debug, Clone)]
pub struct GeometryBucket {
    /// Graphics state the batch must be drawn with.
    pub state: RenderState,
    /// Triangle list vertices.
    pub vertices: Vec<Vertex>,
}

impl GeometryBucket {
    /// Creates an empty bucket for the given state.
    pub fn new(state: RenderState) -> Self {
        Self {
            state,
            vertices: Vec::new(),
        }
    }

    /// Returns true if the bucket contains no geometry.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Approximate GPU buffer size of the bucket in bytes.
    pub fn approx_buffer_size(&self) -> usize {
        self.vertices.len() * std::mem::size_of::<Vertex>()
    }
}

/// Shape produced from one feature by the drawing rules. A closed set so that
/// the single dispatch site in the engine context stays exhaustive.
#[derive(Debug, Clone)]
pub enum MapShape {
    /// Filled polygon.
    Area(AreaShape),
    /// Stroked polyline.
    Line(LineShape),
    /// Screen-space anchored symbol, deferred into the overlay accumulator.
    Symbol(SymbolShape),
}

/// Filled polygon shape.
#[derive(Debug, Clone)]
pub struct AreaShape {
    /// Polygon outline in map units.
    pub points: Vec<Point2<f64>>,
    /// Depth within the target layer.
    pub depth: i32,
    /// Whether the polygon is extruded into the 3d layer.
    pub is_3d: bool,
}

/// Stroked polyline shape.
#[derive(Debug, Clone)]
pub struct LineShape {
    /// Line vertices in map units.
    pub points: Vec<Point2<f64>>,
    /// Stroke width in pixels.
    pub width: f32,
    /// Depth within the target layer.
    pub depth: i32,
}

/// Screen-space symbol shape (label or icon).
#[derive(Debug, Clone)]
pub struct SymbolShape {
    /// Stable id of the symbol, derived from its feature id.
    pub id: u64,
    /// Anchor position in map units.
    pub anchor: Point2<f64>,
    /// Half extents of the symbol box in pixels.
    pub half_width: f64,
    /// Half extent of the symbol box in pixels.
    pub half_height: f64,
    /// Placement priority; higher priority wins conflicts.
    pub priority: u16,
}

impl AreaShape {
    /// Render state the shape tessellates into.
    pub fn state(&self) -> RenderState {
        let layer = if self.is_3d {
            RenderLayer::Geometry3d
        } else {
            RenderLayer::Geometry
        };
        RenderState::new(layer, self.depth)
    }

    /// Appends a triangle fan over the outline to the bucket.
    pub fn tessellate(&self, bucket: &mut GeometryBucket) {
        if self.points.len() < 3 {
            return;
        }

        let root = self.points[0];
        for pair in self.points[1..].windows(2) {
            for point in [root, pair[0], pair[1]] {
                bucket.vertices.push(Vertex {
                    position: [point.x as f32, point.y as f32],
                    depth: self.depth as f32,
                });
            }
        }
    }
}

impl LineShape {
    /// Render state the shape tessellates into.
    pub fn state(&self) -> RenderState {
        RenderState::new(RenderLayer::Geometry, self.depth)
    }

    /// Appends a two-triangle quad per segment to the bucket. Joins are left
    /// to the drawing backend.
    pub fn tessellate(&self, bucket: &mut GeometryBucket) {
        let half = (self.width / 2.0) as f64;
        for pair in self.points.windows(2) {
            let dir = pair[1] - pair[0];
            let len = dir.norm();
            if len == 0.0 {
                continue;
            }
            let normal = nalgebra::Vector2::new(-dir.y, dir.x) / len * half;

            let corners = [
                pair[0] + normal,
                pair[0] - normal,
                pair[1] + normal,
                pair[1] - normal,
            ];
            for index in [0, 1, 2, 2, 1, 3] {
                let point = corners[index];
                bucket.vertices.push(Vertex {
                    position: [point.x as f32, point.y as f32],
                    depth: self.depth as f32,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_tessellates_to_a_fan() {
        let shape = AreaShape {
            points: vec![
                Point2::new(0.0, 0.0),
                Point2::new(1.0, 0.0),
                Point2::new(1.0, 1.0),
                Point2::new(0.0, 1.0),
            ],
            depth: 3,
            is_3d: false,
        };

        let mut bucket = GeometryBucket::new(shape.state());
        shape.tessellate(&mut bucket);

        // Quad -> two triangles of the fan.
        assert_eq!(bucket.vertices.len(), 6);
        assert_eq!(bucket.state, RenderState::new(RenderLayer::Geometry, 3));
    }

    #[test]
    fn degenerate_shapes_produce_no_geometry() {
        let area = AreaShape {
            points: vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)],
            depth: 0,
            is_3d: false,
        };
        let line = LineShape {
            points: vec![Point2::new(0.0, 0.0)],
            width: 2.0,
            depth: 0,
        };

        let mut bucket = GeometryBucket::new(area.state());
        area.tessellate(&mut bucket);
        line.tessellate(&mut bucket);

        assert!(bucket.is_empty());
    }

    #[test]
    fn extruded_areas_go_to_the_3d_layer() {
        let shape = AreaShape {
            points: vec![],
            depth: 0,
            is_3d: true,
        };
        assert_eq!(shape.state().layer, RenderLayer::Geometry3d);
    }
}
