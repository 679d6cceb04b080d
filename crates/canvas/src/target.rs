//! What the runtime needs to know about the surface it draws into.

/// Attribute holding fragment source on a render target.
pub const FRAGMENT_ATTRIBUTE: &str = "data-fragment";
/// Attribute holding vertex source on a render target.
pub const VERTEX_ATTRIBUTE: &str = "data-vertex";

pub trait RenderTarget {
    /// Size in logical units.
    fn client_size(&self) -> (f64, f64);

    fn pixel_ratio(&self) -> f64 {
        1.0
    }

    /// Whether any part of the target is currently on screen.
    fn is_visible(&self) -> bool {
        true
    }

    /// Pointer position in logical units relative to the target's top-left
    /// corner, if known.
    fn pointer(&self) -> Option<(f64, f64)> {
        None
    }

    /// Declarative inputs such as [`FRAGMENT_ATTRIBUTE`].
    fn attribute(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Physical pixel size of the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_vec2(self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }
}

/// `floor(client size * pixel ratio)` for `target`.
pub fn drawable_size<T: RenderTarget + ?Sized>(target: &T) -> SurfaceSize {
    let (width, height) = target.client_size();
    let ratio = target.pixel_ratio();
    SurfaceSize::new(to_pixels(width * ratio), to_pixels(height * ratio))
}

fn to_pixels(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.floor().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

/// Pointer position in surface pixels with a bottom-left origin, or `None`
/// when the pointer is unknown or outside the target.
pub fn pointer_pixels<T: RenderTarget + ?Sized>(target: &T) -> Option<[f32; 2]> {
    let (x, y) = target.pointer()?;
    let (width, height) = target.client_size();
    if x < 0.0 || y < 0.0 || x > width || y > height {
        return None;
    }
    let ratio = target.pixel_ratio();
    let surface_height = drawable_size(target).height as f64;
    Some([(x * ratio) as f32, (surface_height - y * ratio) as f32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessTarget;

    #[test]
    fn drawable_size_applies_ratio_and_floors() {
        let target = HeadlessTarget::new(100.5, 50.0).with_pixel_ratio(1.5);
        assert_eq!(drawable_size(&target), SurfaceSize::new(150, 75));
    }

    #[test]
    fn pointer_is_flipped_to_bottom_left() {
        let mut target = HeadlessTarget::new(200.0, 100.0).with_pixel_ratio(2.0);
        target.set_pointer(Some((10.0, 25.0)));
        assert_eq!(pointer_pixels(&target), Some([20.0, 150.0]));
    }

    #[test]
    fn pointer_outside_is_ignored() {
        let mut target = HeadlessTarget::new(200.0, 100.0);
        target.set_pointer(Some((-1.0, 10.0)));
        assert_eq!(pointer_pixels(&target), None);
        target.set_pointer(Some((50.0, 101.0)));
        assert_eq!(pointer_pixels(&target), None);
    }
}
