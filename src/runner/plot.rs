//! PNG charts of the per-cycle curves.
//!
//! Charts are drawn straight into an RGB buffer: a framed plot area with a
//! light grid, an optional shaded spread band and one or more polylines. They
//! carry no text; the file name identifies the cycle.

use std::path::Path;

use image::{ImageError, ImageFormat, Rgb, RgbImage};

const WIDTH: u32 = 1000;
const HEIGHT: u32 = 600;
const MARGIN_LEFT: u32 = 60;
const MARGIN_RIGHT: u32 = 20;
const MARGIN_TOP: u32 = 20;
const MARGIN_BOTTOM: u32 = 40;
const GRID_DIVISIONS: u32 = 10;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const MEAN_LINE: Rgb<u8> = Rgb([31, 119, 180]);
const BAND: Rgb<u8> = Rgb([188, 214, 234]);
const TARGET_LINE: Rgb<u8> = Rgb([44, 160, 44]);
const PANEL_LINE: Rgb<u8> = Rgb([214, 39, 40]);

#[derive(Debug, Clone, Copy)]
struct Range {
    min: f64,
    max: f64,
}

impl Range {
    fn of<'a>(values: impl IntoIterator<Item = &'a f64>) -> Self {
        let (min, max) = values
            .into_iter()
            .copied()
            .filter(|value| value.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), value| {
                (lo.min(value), hi.max(value))
            });
        if !min.is_finite() {
            return Self { min: 0.0, max: 1.0 };
        }
        if (max - min).abs() < f64::EPSILON {
            let pad = if min == 0.0 { 1.0 } else { min.abs() * 0.5 };
            return Self {
                min: min - pad,
                max: max + pad,
            };
        }
        let pad = (max - min) * 0.05;
        Self {
            min: min - pad,
            max: max + pad,
        }
    }

    fn fraction(&self, value: f64) -> f64 {
        (value - self.min) / (self.max - self.min)
    }
}

struct Chart {
    image: RgbImage,
    x: Range,
    y: Range,
}

impl Chart {
    fn new(x: Range, y: Range) -> Self {
        let mut chart = Self {
            image: RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND),
            x,
            y,
        };
        chart.draw_frame();
        chart
    }

    fn left(&self) -> i64 {
        i64::from(MARGIN_LEFT)
    }

    fn right(&self) -> i64 {
        i64::from(WIDTH - MARGIN_RIGHT)
    }

    fn top(&self) -> i64 {
        i64::from(MARGIN_TOP)
    }

    fn bottom(&self) -> i64 {
        i64::from(HEIGHT - MARGIN_BOTTOM)
    }

    fn draw_frame(&mut self) {
        let (left, right, top, bottom) = (self.left(), self.right(), self.top(), self.bottom());
        for step in 1..GRID_DIVISIONS {
            let step = i64::from(step);
            let divisions = i64::from(GRID_DIVISIONS);
            let x = left + (right - left) * step / divisions;
            let y = top + (bottom - top) * step / divisions;
            self.segment((x, top), (x, bottom), GRID, false);
            self.segment((left, y), (right, y), GRID, false);
        }
        self.segment((left, top), (right, top), FRAME, false);
        self.segment((left, bottom), (right, bottom), FRAME, false);
        self.segment((left, top), (left, bottom), FRAME, false);
        self.segment((right, top), (right, bottom), FRAME, false);
    }

    fn to_pixel(&self, x: f64, y: f64) -> Option<(i64, i64)> {
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let px = self.left() as f64 + self.x.fraction(x) * (self.right() - self.left()) as f64;
        let py = self.bottom() as f64 - self.y.fraction(y) * (self.bottom() - self.top()) as f64;
        Some((px.round() as i64, py.round() as i64))
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb<u8>) {
        let inside = x >= self.left() && x <= self.right() && y >= self.top() && y <= self.bottom();
        if inside {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    /// Bresenham line; `dashed` leaves every other run of pixels blank.
    fn segment(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb<u8>, dashed: bool) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        let mut drawn = 0u32;

        loop {
            if !dashed || (drawn / 6) % 2 == 0 {
                self.put(x, y, color);
            }
            drawn += 1;
            if x == to.0 && y == to.1 {
                break;
            }
            let doubled = 2 * err;
            if doubled >= dy {
                err += dy;
                x += sx;
            }
            if doubled <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    fn polyline(&mut self, xs: &[f64], ys: &[f64], color: Rgb<u8>, dashed: bool) {
        let mut previous = None;
        for (x, y) in xs.iter().zip(ys) {
            let current = self.to_pixel(*x, *y);
            if let (Some(from), Some(to)) = (previous, current) {
                self.segment(from, to, color, dashed);
            }
            previous = current;
        }
    }

    fn band(&mut self, xs: &[f64], lower: &[f64], upper: &[f64], color: Rgb<u8>) {
        for ((x, lo), hi) in xs.iter().zip(lower).zip(upper) {
            if let (Some(a), Some(b)) = (self.to_pixel(*x, *lo), self.to_pixel(*x, *hi)) {
                self.segment(a, b, color, false);
            }
        }
    }

    fn save(self, path: &Path) -> Result<(), ImageError> {
        self.image.save_with_format(path, ImageFormat::Png)
    }
}

/// Mean curve over a shaded `mean ± spread` band.
pub fn band_chart(path: &Path, xs: &[f64], mean: &[f64], spread: &[f64]) -> Result<(), ImageError> {
    let lower: Vec<f64> = mean.iter().zip(spread).map(|(m, s)| m - s).collect();
    let upper: Vec<f64> = mean.iter().zip(spread).map(|(m, s)| m + s).collect();

    let mut chart = Chart::new(Range::of(xs), Range::of(lower.iter().chain(&upper)));
    chart.band(xs, &lower, &upper, BAND);
    chart.polyline(xs, mean, MEAN_LINE, false);
    chart.save(path)
}

/// Every individual target curve (solid) and panel curve (dashed).
pub fn overview_chart(
    path: &Path,
    xs: &[f64],
    targets: &[Vec<f64>],
    panels: &[Vec<f64>],
) -> Result<(), ImageError> {
    let y = Range::of(targets.iter().chain(panels).flatten());
    let mut chart = Chart::new(Range::of(xs), y);
    for row in targets {
        chart.polyline(xs, row, TARGET_LINE, false);
    }
    for row in panels {
        chart.polyline(xs, row, PANEL_LINE, true);
    }
    chart.save(path)
}
