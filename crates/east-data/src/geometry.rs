//! Plane geometry on text quadrilaterals.
//!
//! Points are `[x, y]` in image pixels with y growing downwards. Quads list
//! their vertices clockwise on screen: top-left, top-right, bottom-right,
//! bottom-left.

use std::f32::consts::FRAC_PI_2;

pub type Point = [f32; 2];
pub type Quad = [Point; 4];

/// Fraction of the shorter adjacent edge each vertex moves inwards.
pub const SHRINK_RATIO: f32 = 0.3;

pub fn distance(a: Point, b: Point) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

fn dot(a: Point, b: Point) -> f32 {
    a[0] * b[0] + a[1] * b[1]
}

/// Half the shoelace sum `Σ (x2 - x1)(y2 + y1)`. Negative for clockwise
/// quads in image coordinates.
pub fn signed_area(quad: &Quad) -> f32 {
    (0..4)
        .map(|i| {
            let [x1, y1] = quad[i];
            let [x2, y2] = quad[(i + 1) % 4];
            (x2 - x1) * (y2 + y1)
        })
        .sum::<f32>()
        / 2.0
}

/// Normalises the winding to clockwise, or `None` for quads smaller than a pixel.
pub fn oriented(quad: Quad) -> Option<Quad> {
    let area = signed_area(&quad);
    if area.abs() < 1.0 {
        return None;
    }
    if area > 0.0 {
        Some([quad[0], quad[3], quad[2], quad[1]])
    } else {
        Some(quad)
    }
}

/// (height, width) taken as the shorter of each pair of opposite edges.
pub fn side_lengths(quad: &Quad) -> (f32, f32) {
    let height = distance(quad[0], quad[3]).min(distance(quad[1], quad[2]));
    let width = distance(quad[0], quad[1]).min(distance(quad[2], quad[3]));
    (height, width)
}

pub fn scale(quad: &Quad, sx: f32, sy: f32) -> Quad {
    quad.map(|[x, y]| [x * sx, y * sy])
}

pub fn translate(quad: &Quad, dx: f32, dy: f32) -> Quad {
    quad.map(|[x, y]| [x + dx, y + dy])
}

/// Pulls every edge of the quad towards its centre. Each vertex moves by
/// `SHRINK_RATIO` times its shorter adjacent edge, long edges first.
pub fn shrink(quad: &Quad) -> Quad {
    let r: [f32; 4] = std::array::from_fn(|i| {
        distance(quad[i], quad[(i + 1) % 4]).min(distance(quad[i], quad[(i + 3) % 4]))
    });
    let mut q = *quad;

    let horizontal_first = distance(q[0], q[1]) + distance(q[2], q[3])
        > distance(q[0], q[3]) + distance(q[1], q[2]);
    let order: [(usize, usize); 4] = if horizontal_first {
        [(0, 1), (3, 2), (0, 3), (1, 2)]
    } else {
        [(0, 3), (1, 2), (0, 1), (3, 2)]
    };
    for (i, j) in order {
        move_edge(&mut q, i, j, &r);
    }
    q
}

fn move_edge(q: &mut Quad, i: usize, j: usize, r: &[f32; 4]) {
    let len = distance(q[i], q[j]);
    if len < f32::EPSILON {
        return;
    }
    let u = [(q[j][0] - q[i][0]) / len, (q[j][1] - q[i][1]) / len];
    q[i][0] += SHRINK_RATIO * r[i] * u[0];
    q[i][1] += SHRINK_RATIO * r[i] * u[1];
    q[j][0] -= SHRINK_RATIO * r[j] * u[0];
    q[j][1] -= SHRINK_RATIO * r[j] * u[1];
}

/// Even-odd ray casting; points on the boundary may land on either side.
pub fn contains(quad: &Quad, p: Point) -> bool {
    let mut inside = false;
    let mut j = 3;
    for i in 0..4 {
        let [xi, yi] = quad[i];
        let [xj, yj] = quad[j];
        if (yi > p[1]) != (yj > p[1]) && p[0] < (xj - xi) * (p[1] - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Axis-aligned bounds as (x_min, y_min, x_max, y_max).
pub fn bounds(quad: &Quad) -> (f32, f32, f32, f32) {
    quad.iter().fold(
        (f32::MAX, f32::MAX, f32::MIN, f32::MIN),
        |(x0, y0, x1, y1), &[x, y]| (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
    )
}

/// Oriented bounding rectangle of a quad, expressed in the rotated frame
/// `u = (cos θ, sin θ)`, `v = (-sin θ, cos θ)` with θ in [-π/4, π/4].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotatedRect {
    pub angle: f32,
    u: Point,
    v: Point,
    u_range: (f32, f32),
    v_range: (f32, f32),
}

impl RotatedRect {
    /// Smallest rectangle aligned with one of the quad's edges.
    pub fn enclosing(quad: &Quad) -> RotatedRect {
        let mut best: Option<(f32, RotatedRect)> = None;
        for i in 0..4 {
            let a = quad[i];
            let b = quad[(i + 1) % 4];
            if distance(a, b) < f32::EPSILON {
                continue;
            }
            let edge_angle = (b[1] - a[1]).atan2(b[0] - a[0]);
            let rect = RotatedRect::with_angle(quad, edge_angle - FRAC_PI_2 * (edge_angle / FRAC_PI_2).round());
            let area = (rect.u_range.1 - rect.u_range.0) * (rect.v_range.1 - rect.v_range.0);
            if best.map_or(true, |(best_area, _)| area < best_area) {
                best = Some((area, rect));
            }
        }
        best.map(|(_, rect)| rect)
            .unwrap_or_else(|| RotatedRect::with_angle(quad, 0.0))
    }

    fn with_angle(quad: &Quad, angle: f32) -> RotatedRect {
        let (sin, cos) = angle.sin_cos();
        let u = [cos, sin];
        let v = [-sin, cos];
        let span = |axis: Point| {
            quad.iter().fold((f32::MAX, f32::MIN), |(lo, hi), &p| {
                let t = dot(p, axis);
                (lo.min(t), hi.max(t))
            })
        };
        RotatedRect {
            angle,
            u,
            v,
            u_range: span(u),
            v_range: span(v),
        }
    }

    /// Distances from `p` to the top, right, bottom and left edges.
    pub fn distances(&self, p: Point) -> [f32; 4] {
        let a = dot(p, self.u);
        let b = dot(p, self.v);
        [
            (b - self.v_range.0).max(0.0),
            (self.u_range.1 - a).max(0.0),
            (self.v_range.1 - b).max(0.0),
            (a - self.u_range.0).max(0.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOX: Quad = [[0.0, 0.0], [100.0, 0.0], [100.0, 40.0], [0.0, 40.0]];

    #[test]
    fn clockwise_quads_keep_their_order() {
        assert!(signed_area(&BOX) < 0.0);
        assert_eq!(oriented(BOX), Some(BOX));

        let reversed = [BOX[0], BOX[3], BOX[2], BOX[1]];
        assert_eq!(oriented(reversed), Some(BOX));
        assert_eq!(oriented([[0.0, 0.0]; 4]), None);
    }

    #[test]
    fn shrink_moves_each_edge_inwards() {
        let shrunk = shrink(&BOX);
        // r = 40 for every vertex, so every edge moves 12 pixels.
        let (x0, y0, x1, y1) = bounds(&shrunk);
        assert!((x0 - 12.0).abs() < 1e-4);
        assert!((y0 - 12.0).abs() < 1e-4);
        assert!((x1 - 88.0).abs() < 1e-4);
        assert!((y1 - 28.0).abs() < 1e-4);
    }

    #[test]
    fn containment() {
        assert!(contains(&BOX, [50.0, 20.0]));
        assert!(!contains(&BOX, [150.0, 20.0]));
        assert!(!contains(&BOX, [50.0, -1.0]));
    }

    #[test]
    fn axis_aligned_box_distances() {
        let rect = RotatedRect::enclosing(&BOX);
        assert_eq!(rect.angle, 0.0);
        let d = rect.distances([30.0, 20.0]);
        assert_eq!(d, [20.0, 70.0, 20.0, 30.0]);
    }

    #[test]
    fn rotated_box_angle_stays_within_quarter_turn() {
        let (s, c) = 0.3f32.sin_cos();
        let rotate = |[x, y]: Point| [x * c - y * s + 200.0, x * s + y * c + 200.0];
        let tilted = BOX.map(rotate);
        let rect = RotatedRect::enclosing(&tilted);
        assert!((rect.angle - 0.3).abs() < 1e-4);

        let centre = rotate([50.0, 20.0]);
        let d = rect.distances(centre);
        for (got, want) in d.iter().zip([20.0, 50.0, 20.0, 50.0]) {
            assert!((got - want).abs() < 1e-2);
        }
    }
}
