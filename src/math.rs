use std::ops::Mul;

use glam::{Affine2, Mat3, Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Mul for Color {
    type Output = Color;

    fn mul(self, rhs: Color) -> Color {
        Color::new(
            self.r * rhs.r,
            self.g * rhs.g,
            self.b * rhs.b,
            self.a * rhs.a,
        )
    }
}

/// Axis-aligned rectangle in canvas space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect2 {
    pub position: Vec2,
    pub size: Vec2,
}

impl Rect2 {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            position: Vec2::new(x, y),
            size: Vec2::new(width, height),
        }
    }

    pub fn end(&self) -> Vec2 {
        self.position + self.size
    }

    /// Same rectangle with non-negative size.
    pub fn abs(&self) -> Rect2 {
        Rect2 {
            position: self.position + self.size.min(Vec2::ZERO),
            size: self.size.abs(),
        }
    }

    pub fn has_area(&self) -> bool {
        self.size.x > 0.0 && self.size.y > 0.0
    }

    pub fn intersects(&self, other: &Rect2) -> bool {
        self.position.x < other.end().x
            && self.end().x > other.position.x
            && self.position.y < other.end().y
            && self.end().y > other.position.y
    }

    pub fn corners(&self) -> [Vec2; 4] {
        let end = self.end();
        [
            self.position,
            Vec2::new(end.x, self.position.y),
            end,
            Vec2::new(self.position.x, end.y),
        ]
    }

    /// Separating-axis test of this rectangle against `rect` placed by `xform`.
    pub fn intersects_transformed(&self, xform: &Affine2, rect: &Rect2) -> bool {
        let placed = rect.corners().map(|c| xform.transform_point2(c));

        let (min, max) = placed
            .iter()
            .fold((Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)), |(lo, hi), p| {
                (lo.min(*p), hi.max(*p))
            });
        if max.x < self.position.x
            || min.x > self.end().x
            || max.y < self.position.y
            || min.y > self.end().y
        {
            return false;
        }

        let own = self.corners();
        for axis in [xform.matrix2.x_axis, xform.matrix2.y_axis] {
            if axis.length_squared() == 0.0 {
                continue;
            }
            let (a_min, a_max) = project(&placed, axis);
            let (b_min, b_max) = project(&own, axis);
            if a_max < b_min || b_max < a_min {
                return false;
            }
        }
        true
    }
}

fn project(points: &[Vec2; 4], axis: Vec2) -> (f32, f32) {
    points.iter().fold((f32::MAX, f32::MIN), |(lo, hi), p| {
        let d = p.dot(axis);
        (lo.min(d), hi.max(d))
    })
}

/// Column layout `[x_axis, y_axis, origin]`, consumed as a 2x3 matrix by the shaders.
pub fn affine_to_mat2x3(xform: &Affine2) -> [f32; 6] {
    let x = xform.matrix2.x_axis;
    let y = xform.matrix2.y_axis;
    let o = xform.translation;
    [x.x, x.y, y.x, y.y, o.x, o.y]
}

/// Row layout of two vec4s, each row `(x, y, 0, origin)`.
pub fn affine_to_mat2x4(xform: &Affine2) -> [f32; 8] {
    let x = xform.matrix2.x_axis;
    let y = xform.matrix2.y_axis;
    let o = xform.translation;
    [x.x, y.x, 0.0, o.x, x.y, y.y, 0.0, o.y]
}

/// Embeds a 2D transform in a column-major 4x4 matrix with an identity z axis.
pub fn affine_to_mat4(xform: &Affine2) -> [f32; 16] {
    let x = xform.matrix2.x_axis;
    let y = xform.matrix2.y_axis;
    let o = xform.translation;
    Mat4::from_cols(
        x.extend(0.0).extend(0.0),
        y.extend(0.0).extend(0.0),
        glam::Vec4::Z,
        o.extend(0.0).extend(1.0),
    )
    .to_cols_array()
}

/// Maps target pixels to clip space: `scale(2/w, 2/h) * translate(-w/2, -h/2)`.
pub fn screen_transform(width: u32, height: u32) -> Affine2 {
    let size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
    Affine2::from_scale(Vec2::splat(2.0) / size) * Affine2::from_translation(-size * 0.5)
}

/// Basis of `xform` with unit-length axes and no translation.
pub fn normalized_basis(xform: &Affine2) -> Affine2 {
    Affine2::from_cols(
        xform.matrix2.x_axis.normalize_or_zero(),
        xform.matrix2.y_axis.normalize_or_zero(),
        Vec2::ZERO,
    )
}

/// Projection for one of the four quadrant passes that fill a 2D shadow map.
pub fn shadow_quadrant_projection(quadrant: u32, near: f32, far: f32) -> Mat4 {
    let near = near.max(f32::EPSILON);
    let far = far.max(near + f32::EPSILON);
    let projection = Mat4::perspective_rh(90f32.to_radians(), 1.0, near, far);

    let angle = std::f32::consts::TAU * ((quadrant + 3) as f32 / 4.0);
    let target = Mat3::from_rotation_z(angle) * Vec3::Y;
    let view = Mat4::look_at_rh(Vec3::ZERO, target, Vec3::NEG_Z);

    projection * view
}

/// Facing direction of each shadow quadrant pass.
pub const SHADOW_DIRECTIONS: [[f32; 2]; 4] = [[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0], [0.0, -1.0]];

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn rect_abs_normalizes_negative_sizes() {
        let rect = Rect2::new(10.0, 10.0, -4.0, 6.0).abs();
        assert_eq!(rect, Rect2::new(6.0, 10.0, 4.0, 6.0));
    }

    #[test]
    fn transformed_intersection_uses_rotated_bounds() {
        let item = Rect2::new(0.0, 0.0, 10.0, 10.0);
        let light_rect = Rect2::new(-1.0, -1.0, 2.0, 2.0);

        let inside = Affine2::from_translation(Vec2::new(5.0, 5.0));
        assert!(item.intersects_transformed(&inside, &light_rect));

        let outside = Affine2::from_translation(Vec2::new(40.0, 5.0));
        assert!(!item.intersects_transformed(&outside, &light_rect));

        // Rotated 45 degrees: axis-aligned bounds overlap the corner, the diamond does not.
        let diamond = Affine2::from_angle_translation(
            std::f32::consts::FRAC_PI_4,
            Vec2::new(10.9, 10.9),
        );
        assert!(!item.intersects_transformed(&diamond, &light_rect));
    }

    #[test]
    fn mat2x4_packs_rows() {
        let xform = Affine2::from_cols(
            Vec2::new(1.0, 2.0),
            Vec2::new(3.0, 4.0),
            Vec2::new(5.0, 6.0),
        );
        assert_eq!(
            affine_to_mat2x4(&xform),
            [1.0, 3.0, 0.0, 5.0, 2.0, 4.0, 0.0, 6.0]
        );
        assert_eq!(affine_to_mat2x3(&xform), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn mat4_keeps_origin_in_last_column() {
        let m = affine_to_mat4(&Affine2::from_translation(Vec2::new(7.0, -2.0)));
        assert_eq!(&m[12..16], &[7.0, -2.0, 0.0, 1.0]);
        assert_eq!(m[10], 1.0);
    }

    #[test]
    fn screen_transform_maps_corners_to_clip_space() {
        let xform = screen_transform(200, 100);
        let top_left = xform.transform_point2(Vec2::ZERO);
        let bottom_right = xform.transform_point2(Vec2::new(200.0, 100.0));
        assert!(approx(top_left.x, -1.0) && approx(top_left.y, -1.0));
        assert!(approx(bottom_right.x, 1.0) && approx(bottom_right.y, 1.0));
    }

    #[test]
    fn normalized_basis_drops_scale_and_origin() {
        let xform = Affine2::from_scale_angle_translation(
            Vec2::new(3.0, 5.0),
            0.3,
            Vec2::new(10.0, 20.0),
        );
        let basis = normalized_basis(&xform);
        assert!(approx(basis.matrix2.x_axis.length(), 1.0));
        assert!(approx(basis.matrix2.y_axis.length(), 1.0));
        assert_eq!(basis.translation, Vec2::ZERO);
    }

    #[test]
    fn quadrant_projection_centers_facing_direction() {
        for (quadrant, dir) in SHADOW_DIRECTIONS.iter().enumerate() {
            let proj = shadow_quadrant_projection(quadrant as u32, 1.0, 100.0);
            let point = Vec3::new(dir[0] * 10.0, dir[1] * 10.0, 0.0);
            let clip = proj * point.extend(1.0);
            let ndc_x = clip.x / clip.w;
            assert!(ndc_x.abs() < 1e-4, "quadrant {quadrant} off-center: {ndc_x}");
            assert!(clip.w > 0.0);
        }
    }
}
