use serde::{Deserialize, Serialize};

// --- Detection defaults (no magic numbers) ---
const DEFAULT_SCALE_FACTOR: f64 = 1.3;
const DEFAULT_MIN_NEIGHBORS: u32 = 1;
const FACE_MIN_SIZE: Size = Size::new(100, 100);
const FACE_MAX_SIZE: Size = Size::new(600, 600);
const NOSE_MIN_SIZE: Size = Size::new(50, 50);
const NOSE_MAX_SIZE: Size = Size::new(200, 200);

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Integer pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// Axis-aligned detection region in pixel coordinates.
///
/// Origin may be negative and the extent may run past the frame; use
/// [`Rect::clamp_to`] before reading pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Center point, rounded toward the origin.
    pub fn center(&self) -> Point {
        Point {
            x: self.x.saturating_add(self.width / 2),
            y: self.y.saturating_add(self.height / 2),
        }
    }

    /// Shift the origin by `(dx, dy)`, keeping the size. Saturates at the
    /// `i32` range.
    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    /// Intersect with the `width` × `height` extent anchored at the origin.
    ///
    /// Returns `None` when nothing of the rect lies inside.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = (self.x as i64).max(0);
        let y0 = (self.y as i64).max(0);
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect {
            x: x0 as i32,
            y: y0 as i32,
            width: (x1 - x0) as i32,
            height: (y1 - y0) as i32,
        })
    }
}

/// A filled marker drawn over a detected nose, in full-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub center: Point,
    pub radius: i32,
}

impl Marker {
    /// Marker for a nose region already translated to full-frame coordinates.
    pub fn for_region(region: &Rect) -> Self {
        Self {
            center: region.center(),
            radius: region.width / 2,
        }
    }
}

/// Parameters for one multi-scale classifier pass.
///
/// There is no Canny pruning flag; windows are never skipped for lacking
/// edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    /// Step between pyramid levels; must be greater than 1.0.
    pub scale_factor: f64,
    /// Raw hits a merged region needs beyond the first; 0 disables grouping.
    pub min_neighbors: u32,
    /// Smallest reported region.
    pub min_size: Size,
    /// Largest reported region; `None` means the searched image extent.
    pub max_size: Option<Size>,
}

impl DetectParams {
    /// Face pass defaults: 100×100 to 600×600.
    pub fn face_default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: FACE_MIN_SIZE,
            max_size: Some(FACE_MAX_SIZE),
        }
    }

    /// Nose pass defaults: 50×50 to 200×200.
    pub fn nose_default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: NOSE_MIN_SIZE,
            max_size: Some(NOSE_MAX_SIZE),
        }
    }

    /// Check the values a classifier pass cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(format!(
                "scale_factor must be a finite number greater than 1.0, got {}",
                self.scale_factor
            ));
        }
        if let Some(max) = self.max_size {
            if max.width != 0
                && max.height != 0
                && (max.width < self.min_size.width || max.height < self.min_size.height)
            {
                return Err(format!(
                    "max_size {}x{} is smaller than min_size {}x{}",
                    max.width, max.height, self.min_size.width, self.min_size.height
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_uses_integer_halves() {
        let r = Rect::new(70, 70, 10, 10);
        assert_eq!(r.center(), Point { x: 75, y: 75 });

        let odd = Rect::new(0, 0, 7, 3);
        assert_eq!(odd.center(), Point { x: 3, y: 1 });
    }

    #[test]
    fn test_translate_keeps_size() {
        let r = Rect::new(20, 20, 10, 10).translate(50, 50);
        assert_eq!(r, Rect::new(70, 70, 10, 10));
    }

    #[test]
    fn test_translate_and_center_saturate() {
        let r = Rect::new(i32::MAX - 5, i32::MIN + 5, 100, 100);
        let moved = r.translate(50, -50);
        assert_eq!((moved.x, moved.y), (i32::MAX, i32::MIN));
        assert_eq!(r.center(), Point { x: i32::MAX, y: i32::MIN + 55 });
        assert_eq!(Marker::for_region(&moved).center.x, i32::MAX);
    }

    #[test]
    fn test_clamp_inside_is_identity() {
        let r = Rect::new(10, 10, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(r));
    }

    #[test]
    fn test_clamp_partial_overlap() {
        let r = Rect::new(-20, 90, 50, 50);
        assert_eq!(r.clamp_to(100, 100), Some(Rect::new(0, 90, 30, 10)));
    }

    #[test]
    fn test_clamp_outside_is_none() {
        assert_eq!(Rect::new(100, 0, 10, 10).clamp_to(100, 100), None);
        assert_eq!(Rect::new(-10, -10, 10, 10).clamp_to(100, 100), None);
        assert_eq!(Rect::new(5, 5, 0, 10).clamp_to(100, 100), None);
    }

    #[test]
    fn test_clamp_does_not_overflow() {
        let r = Rect::new(i32::MAX - 1, 0, i32::MAX, 10);
        assert_eq!(r.clamp_to(100, 100), None);
    }

    #[test]
    fn test_marker_radius_is_half_width() {
        let m = Marker::for_region(&Rect::new(70, 70, 10, 10));
        assert_eq!(m.center, Point { x: 75, y: 75 });
        assert_eq!(m.radius, 5);

        let degenerate = Marker::for_region(&Rect::new(3, 3, 0, 0));
        assert_eq!(degenerate.radius, 0);
    }

    #[test]
    fn test_default_params() {
        let face = DetectParams::face_default();
        assert_eq!(face.min_size, Size::new(100, 100));
        assert_eq!(face.max_size, Some(Size::new(600, 600)));
        assert!((face.scale_factor - 1.3).abs() < 1e-12);
        assert_eq!(face.min_neighbors, 1);

        let nose = DetectParams::nose_default();
        assert_eq!(nose.min_size, Size::new(50, 50));
        assert_eq!(nose.max_size, Some(Size::new(200, 200)));
    }

    #[test]
    fn test_validate_rejects_bad_scale() {
        let mut p = DetectParams::face_default();
        p.scale_factor = 1.0;
        assert!(p.validate().is_err());
        p.scale_factor = f64::NAN;
        assert!(p.validate().is_err());
        p.scale_factor = 1.1;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_sizes() {
        let mut p = DetectParams::nose_default();
        p.max_size = Some(Size::new(40, 40));
        assert!(p.validate().is_err());
        p.max_size = None;
        assert!(p.validate().is_ok());
    }
}
