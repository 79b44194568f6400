//! Column-major 4x4 matrices for the quad transform.

/// Column-major 4x4 matrix, laid out as OpenGL expects it.
pub type Mat4 = [f32; 16];

pub fn identity() -> Mat4 {
    let mut m = [0.0; 16];
    m[0] = 1.0;
    m[5] = 1.0;
    m[10] = 1.0;
    m[15] = 1.0;
    m
}

/// `lhs × rhs`.
pub fn multiply(lhs: &Mat4, rhs: &Mat4) -> Mat4 {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += lhs[k * 4 + row] * rhs[col * 4 + k];
            }
            out[col * 4 + row] = sum;
        }
    }
    out
}

/// Rotation of `angle_deg` degrees around the axis `(x, y, z)`.
pub fn rotation(angle_deg: f32, x: f32, y: f32, z: f32) -> Mat4 {
    let mut m = identity();
    let len = (x * x + y * y + z * z).sqrt();
    if len == 0.0 {
        return m;
    }
    let (x, y, z) = (x / len, y / len, z / len);
    let radians = angle_deg.to_radians();
    let (s, c) = radians.sin_cos();
    let nc = 1.0 - c;

    m[0] = x * x * nc + c;
    m[4] = x * y * nc - z * s;
    m[8] = z * x * nc + y * s;

    m[1] = x * y * nc + z * s;
    m[5] = y * y * nc + c;
    m[9] = y * z * nc - x * s;

    m[2] = z * x * nc - y * s;
    m[6] = y * z * nc + x * s;
    m[10] = z * z * nc + c;
    m
}

pub fn scale(sx: f32, sy: f32, sz: f32) -> Mat4 {
    let mut m = identity();
    m[0] = sx;
    m[5] = sy;
    m[10] = sz;
    m
}

/// Apply a column-major matrix to the point `(x, y, z, 1)`.
pub fn transform_point(m: &Mat4, x: f32, y: f32, z: f32) -> [f32; 3] {
    [
        m[0] * x + m[4] * y + m[8] * z + m[12],
        m[1] * x + m[5] * y + m[9] * z + m[13],
        m[2] * x + m[6] * y + m[10] * z + m[14],
    ]
}

/// Rotation + optional horizontal mirror applied to the drawn quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub rotation_deg: f32,
    pub axis: [f32; 3],
    pub mirror_horizontal: bool,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        rotation_deg: 0.0,
        axis: [0.0, 0.0, 1.0],
        mirror_horizontal: false,
    };

    /// Model-view-projection matrix for this transform.
    pub fn matrix(&self) -> Mat4 {
        let [x, y, z] = self.axis;
        let rotated = multiply(&identity(), &rotation(self.rotation_deg, x, y, z));
        if self.mirror_horizontal {
            multiply(&rotated, &scale(-1.0, 1.0, 1.0))
        } else {
            rotated
        }
    }
}

impl Default for Transform {
    /// Vertical flip: framebuffer contents are stored bottom-up.
    fn default() -> Self {
        Self {
            rotation_deg: 180.0,
            axis: [1.0, 0.0, 0.0],
            mirror_horizontal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identity_leaves_points() {
        let p = transform_point(&identity(), 0.5, -0.25, 0.0);
        assert_abs_diff_eq!(p[0], 0.5);
        assert_abs_diff_eq!(p[1], -0.25);
    }

    #[test]
    fn default_transform_flips_vertically() {
        let m = Transform::default().matrix();
        let p = transform_point(&m, 0.5, 1.0, 0.0);
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn mirror_flips_horizontally() {
        let m = Transform {
            mirror_horizontal: true,
            ..Transform::IDENTITY
        }
        .matrix();
        let p = transform_point(&m, 0.75, 0.5, 0.0);
        assert_abs_diff_eq!(p[0], -0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn quarter_turn_around_z() {
        let m = rotation(90.0, 0.0, 0.0, 1.0);
        let p = transform_point(&m, 1.0, 0.0, 0.0);
        assert_abs_diff_eq!(p[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn multiply_by_identity() {
        let r = rotation(33.0, 0.2, 0.7, 0.1);
        let out = multiply(&r, &identity());
        for (a, b) in out.iter().zip(r.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn zero_axis_is_identity() {
        assert_eq!(rotation(45.0, 0.0, 0.0, 0.0), identity());
    }
}
