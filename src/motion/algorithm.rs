// SPDX-License-Identifier: GPL-3.0-only

//! Frame difference analysis

use crate::constants::motion::{
    DEFAULT_AREA_THRESHOLD, DEFAULT_AREA_THRESHOLD_MAX, DEFAULT_MAX_POINTS,
    DEFAULT_PIXEL_THRESHOLD, DEFAULT_POINT_RANGE,
};
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Pixel position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// True when `other` lies within `range` pixels (Euclidean)
    pub fn is_within(&self, other: &Point, range: u32) -> bool {
        let dx = self.x.abs_diff(other.x) as u64;
        let dy = self.y.abs_diff(other.y) as u64;
        let range = range as u64;
        dx * dx + dy * dy <= range * range
    }
}

/// Rectangle in which differences are ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Zone {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && (x - self.x) < self.width
            && (y - self.y) < self.height
    }
}

/// Tunables of the frame difference
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionParams {
    /// A pixel moved when its largest channel delta exceeds this
    pub pixel_threshold: u8,
    /// Lower bound of the motion area, percent
    pub area_threshold: f64,
    /// Upper bound of the motion area, percent
    pub area_threshold_max: f64,
    pub max_points: usize,
    /// Minimum distance between two sampled points
    pub point_range: u32,
    pub do_not_engage: Vec<Zone>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            area_threshold: DEFAULT_AREA_THRESHOLD,
            area_threshold_max: DEFAULT_AREA_THRESHOLD_MAX,
            max_points: DEFAULT_MAX_POINTS,
            point_range: DEFAULT_POINT_RANGE,
            do_not_engage: Vec::new(),
        }
    }
}

impl DetectionParams {
    /// True when `area` falls inside the configured bounds
    pub fn is_motion_area(&self, area: f64) -> bool {
        area >= self.area_threshold && area <= self.area_threshold_max
    }

    fn is_excluded(&self, x: u32, y: u32) -> bool {
        self.do_not_engage.iter().any(|zone| zone.contains(x, y))
    }
}

/// Result of comparing two frames
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Percentage of all pixels that moved
    pub area: f64,
    /// Mean position of moved pixels, image center when nothing moved
    pub cog: Point,
    /// Spread-out sample of moved pixels
    pub points: Vec<Point>,
}

impl Detection {
    /// Nothing moved in a `width` x `height` frame
    pub fn still(width: u32, height: u32) -> Self {
        Self {
            area: 0.0,
            cog: Point::new(width / 2, height / 2),
            points: Vec::new(),
        }
    }
}

/// Largest absolute per-channel difference of the color channels
fn pixel_delta(a: &[u8], b: &[u8]) -> u8 {
    a.iter()
        .zip(b)
        .take(3)
        .map(|(p, q)| p.abs_diff(*q))
        .max()
        .unwrap_or(0)
}

/// Compare two transformed frames of equal size
///
/// Pixels in do-not-engage zones never count as moved, but the area is
/// still relative to the whole frame. Frames of different sizes are
/// treated as still.
pub fn compare(previous: &RgbaImage, current: &RgbaImage, params: &DetectionParams) -> Detection {
    let (width, height) = current.dimensions();
    if previous.dimensions() != (width, height) || width == 0 || height == 0 {
        return Detection::still(width, height);
    }

    let mut moved: u64 = 0;
    let mut sum_x: u64 = 0;
    let mut sum_y: u64 = 0;
    let mut points: Vec<Point> = Vec::new();

    let rows = previous
        .as_raw()
        .chunks_exact(width as usize * 4)
        .zip(current.as_raw().chunks_exact(width as usize * 4));
    for (y, (prev_row, cur_row)) in rows.enumerate() {
        let y = y as u32;
        let pixels = prev_row.chunks_exact(4).zip(cur_row.chunks_exact(4));
        for (x, (p, c)) in pixels.enumerate() {
            let x = x as u32;
            if pixel_delta(p, c) <= params.pixel_threshold || params.is_excluded(x, y) {
                continue;
            }

            moved += 1;
            sum_x += x as u64;
            sum_y += y as u64;

            if points.len() < params.max_points {
                let candidate = Point::new(x, y);
                if !points
                    .iter()
                    .any(|p| p.is_within(&candidate, params.point_range))
                {
                    points.push(candidate);
                }
            }
        }
    }

    if moved == 0 {
        return Detection::still(width, height);
    }

    let total = width as u64 * height as u64;
    Detection {
        area: 100.0 * moved as f64 / total as f64,
        cog: Point::new((sum_x / moved) as u32, (sum_y / moved) as u32),
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn canvas(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
    }

    fn with_rect(mut image: RgbaImage, zone: Zone) -> RgbaImage {
        for y in zone.y..zone.y + zone.height {
            for x in zone.x..zone.x + zone.width {
                image.put_pixel(x, y, Rgba([255, 255, 255, 255]));
            }
        }
        image
    }

    #[test]
    fn test_identical_frames_are_still() {
        let frame = with_rect(canvas(40, 30), Zone::new(5, 5, 10, 10));
        let mut params = DetectionParams::default();
        params.pixel_threshold = 0;
        let detection = compare(&frame, &frame, &params);
        assert_eq!(detection.area, 0.0);
        assert_eq!(detection.cog, Point::new(20, 15));
        assert!(detection.points.is_empty());
    }

    #[test]
    fn test_rectangle_area_and_cog() {
        let before = canvas(100, 50);
        let after = with_rect(canvas(100, 50), Zone::new(10, 20, 20, 10));
        let detection = compare(&before, &after, &DetectionParams::default());
        assert!((detection.area - 100.0 * 200.0 / 5000.0).abs() < 1e-9);
        assert_eq!(detection.cog, Point::new(19, 24));
        assert_eq!(detection.points.first(), Some(&Point::new(10, 20)));
    }

    #[test]
    fn test_do_not_engage_zone_excludes_pixels() {
        let before = canvas(60, 60);
        let after = with_rect(canvas(60, 60), Zone::new(10, 10, 20, 20));
        let mut params = DetectionParams::default();
        params.do_not_engage.push(Zone::new(5, 5, 30, 30));
        assert_eq!(compare(&before, &after, &params).area, 0.0);

        // Half covered: area counts the rest against the whole frame
        params.do_not_engage = vec![Zone::new(10, 10, 10, 20)];
        let detection = compare(&before, &after, &params);
        assert!((detection.area - 100.0 * 200.0 / 3600.0).abs() < 1e-9);
    }

    #[test]
    fn test_points_respect_range_and_max() {
        let before = canvas(200, 200);
        let after = with_rect(canvas(200, 200), Zone::new(0, 0, 200, 200));
        let mut params = DetectionParams::default();
        params.point_range = 50;
        params.max_points = 3;
        let detection = compare(&before, &after, &params);
        assert_eq!(detection.points.len(), 3);
        for (i, a) in detection.points.iter().enumerate() {
            for b in &detection.points[i + 1..] {
                assert!(!a.is_within(b, 50));
            }
        }
        assert_eq!(detection.points[0], Point::new(0, 0));
        assert_eq!(detection.points[1], Point::new(51, 0));
    }

    #[test]
    fn test_small_deltas_below_threshold_ignored() {
        let before = RgbaImage::from_pixel(10, 10, Rgba([100, 100, 100, 255]));
        let after = RgbaImage::from_pixel(10, 10, Rgba([120, 90, 110, 0]));
        assert_eq!(compare(&before, &after, &DetectionParams::default()).area, 0.0);
    }

    #[test]
    fn test_area_bounds_are_inclusive() {
        let params = DetectionParams {
            area_threshold: 1.0,
            area_threshold_max: 5.0,
            ..DetectionParams::default()
        };
        assert!(params.is_motion_area(1.0));
        assert!(params.is_motion_area(5.0));
        assert!(!params.is_motion_area(0.99));
        assert!(!params.is_motion_area(5.01));
    }

    #[test]
    fn test_size_change_is_still() {
        let detection = compare(&canvas(10, 10), &canvas(20, 10), &DetectionParams::default());
        assert_eq!(detection, Detection::still(20, 10));
    }
}
