use squid_core::{Element, Point};

/// Chooses the screen point that stands for an element.
pub trait CoordinateMapper: Send + Sync {
    fn target(&self, element: &Element) -> Point;
}

/// Centre of the bounding box.
#[derive(Debug, Clone, Copy, Default)]
pub struct CenterPoint;

impl CoordinateMapper for CenterPoint {
    fn target(&self, element: &Element) -> Point {
        element.bbox.center()
    }
}

/// Centre of the bounding box scaled from image pixels to input
/// coordinates, for outputs where the two differ (HiDPI scaling).
#[derive(Debug, Clone, Copy)]
pub struct ScaledCenter {
    pub scale: f64,
}

impl CoordinateMapper for ScaledCenter {
    fn target(&self, element: &Element) -> Point {
        let center = element.bbox.center();
        Point::new(
            (f64::from(center.x) / self.scale).round() as i32,
            (f64::from(center.y) / self.scale).round() as i32,
        )
    }
}
