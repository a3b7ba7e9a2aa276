use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dims {
    pub width: f64,
    pub height: f64,
}

impl Dims {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// A click-selected point, kept in both the rendered element's space and the
/// source image's native pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub display: Point,
    pub source: Point,
}

impl Hotspot {
    pub fn locate(display: Point, display_dims: Dims, natural_dims: Dims) -> Option<Self> {
        let source = to_source_space(display, display_dims, natural_dims)?;
        Some(Self { display, source })
    }

    /// Source coordinates as whole pixels, the form prompts refer to.
    pub fn source_pixels(&self) -> (u32, u32) {
        (self.source.x as u32, self.source.y as u32)
    }
}

/// Scales a point on the rendered image into the image's native resolution.
///
/// Returns `None` when either dimension set is empty or non-finite. Results
/// are rounded to the nearest pixel and clamped inside the natural bounds.
pub fn to_source_space(display: Point, display_dims: Dims, natural_dims: Dims) -> Option<Point> {
    if !display_dims.is_usable() || !natural_dims.is_usable() {
        return None;
    }
    if !display.x.is_finite() || !display.y.is_finite() {
        return None;
    }
    let scale_x = natural_dims.width / display_dims.width;
    let scale_y = natural_dims.height / display_dims.height;
    let x = (display.x * scale_x)
        .round()
        .clamp(0.0, (natural_dims.width - 1.0).max(0.0));
    let y = (display.y * scale_y)
        .round()
        .clamp(0.0, (natural_dims.height - 1.0).max(0.0));
    Some(Point::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_by_natural_over_rendered_ratio() {
        let source = to_source_space(
            Point::new(100.0, 50.0),
            Dims::new(400.0, 300.0),
            Dims::new(1600.0, 1200.0),
        );
        assert_eq!(source, Some(Point::new(400.0, 200.0)));
    }

    #[test]
    fn rounds_to_nearest_pixel() {
        let source = to_source_space(
            Point::new(10.0, 10.0),
            Dims::new(300.0, 300.0),
            Dims::new(1000.0, 1000.0),
        );
        assert_eq!(source, Some(Point::new(33.0, 33.0)));
    }

    #[test]
    fn clamps_to_natural_bounds() {
        let source = to_source_space(
            Point::new(500.0, -4.0),
            Dims::new(400.0, 300.0),
            Dims::new(800.0, 600.0),
        );
        assert_eq!(source, Some(Point::new(799.0, 0.0)));
    }

    #[test]
    fn rejects_zero_sized_display() {
        assert_eq!(
            to_source_space(
                Point::new(1.0, 1.0),
                Dims::new(0.0, 300.0),
                Dims::new(800.0, 600.0)
            ),
            None
        );
    }

    #[test]
    fn hotspot_keeps_both_spaces() {
        let hotspot = Hotspot::locate(
            Point::new(10.0, 10.0),
            Dims::new(100.0, 100.0),
            Dims::new(200.0, 200.0),
        )
        .unwrap();
        assert_eq!(hotspot.display, Point::new(10.0, 10.0));
        assert_eq!(hotspot.source_pixels(), (20, 20));
    }
}
