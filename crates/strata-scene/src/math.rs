//! Row-major 3x4 affine transforms.
//!
//! A [`Mat34`] is the top three rows of a 4x4 affine matrix, laid out
//! row-major as `[r00 r01 r02 tx  r10 r11 r12 ty  r20 r21 r22 tz]` -- the
//! exact float order the transform columns and the GPU channel use.
//! Inversion picks the cheap rigid path when the 3x3 part is orthonormal
//! within [`ORTHONORMAL_EPS`], else falls back to a Gauss-Jordan inverse of
//! the lifted 4x4 (computed in f64, truncated back).

use crate::SceneError;

/// Tolerance for the orthonormality test selecting the rigid inverse.
pub const ORTHONORMAL_EPS: f32 = 1e-4;

/// Determinant magnitude below which the general inverse fails.
pub const SINGULAR_EPS: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Mat34
// ---------------------------------------------------------------------------

/// A row-major 3x4 rigid-or-affine transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat34(pub [f32; 12]);

impl Mat34 {
    /// The identity transform.
    pub const IDENTITY: Mat34 = Mat34([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0,
    ]);

    /// A pure translation.
    pub fn from_translation(t: [f32; 3]) -> Self {
        let mut m = Self::IDENTITY;
        m.0[3] = t[0];
        m.0[7] = t[1];
        m.0[11] = t[2];
        m
    }

    /// A pure (possibly non-uniform) scale.
    pub fn from_scale(s: [f32; 3]) -> Self {
        Mat34([
            s[0], 0.0, 0.0, 0.0, //
            0.0, s[1], 0.0, 0.0, //
            0.0, 0.0, s[2], 0.0,
        ])
    }

    /// A rotation about the Z axis by `radians`.
    pub fn from_rotation_z(radians: f32) -> Self {
        let (sin, cos) = radians.sin_cos();
        Mat34([
            cos, -sin, 0.0, 0.0, //
            sin, cos, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        ])
    }

    /// The translation column.
    #[inline]
    pub fn translation(&self) -> [f32; 3] {
        [self.0[3], self.0[7], self.0[11]]
    }

    /// Affine composition `self * other` (apply `other` first).
    pub fn mul(&self, other: &Mat34) -> Mat34 {
        let a = &self.0;
        let b = &other.0;
        let mut r = [0.0f32; 12];
        for i in 0..3 {
            for j in 0..3 {
                r[i * 4 + j] =
                    a[i * 4] * b[j] + a[i * 4 + 1] * b[4 + j] + a[i * 4 + 2] * b[8 + j];
            }
            r[i * 4 + 3] = a[i * 4] * b[3]
                + a[i * 4 + 1] * b[7]
                + a[i * 4 + 2] * b[11]
                + a[i * 4 + 3];
        }
        Mat34(r)
    }

    /// Transform a point.
    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let m = &self.0;
        [
            m[0] * p[0] + m[1] * p[1] + m[2] * p[2] + m[3],
            m[4] * p[0] + m[5] * p[1] + m[6] * p[2] + m[7],
            m[8] * p[0] + m[9] * p[1] + m[10] * p[2] + m[11],
        ]
    }

    /// Whether the 3x3 part is orthonormal within `eps`.
    pub fn is_orthonormal(&self, eps: f32) -> bool {
        let m = &self.0;
        let row = |i: usize| [m[i * 4], m[i * 4 + 1], m[i * 4 + 2]];
        let dot = |a: [f32; 3], b: [f32; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        let (r0, r1, r2) = (row(0), row(1), row(2));
        (dot(r0, r0) - 1.0).abs() <= eps
            && (dot(r1, r1) - 1.0).abs() <= eps
            && (dot(r2, r2) - 1.0).abs() <= eps
            && dot(r0, r1).abs() <= eps
            && dot(r0, r2).abs() <= eps
            && dot(r1, r2).abs() <= eps
    }

    /// Inverse of a rigid transform: transposed rotation, rotated-negated
    /// translation. Only valid when the 3x3 part is orthonormal.
    pub fn inverse_rigid(&self) -> Mat34 {
        let m = &self.0;
        let t = self.translation();
        let mut r = [0.0f32; 12];
        for i in 0..3 {
            for j in 0..3 {
                r[i * 4 + j] = m[j * 4 + i];
            }
            r[i * 4 + 3] = -(m[i] * t[0] + m[4 + i] * t[1] + m[8 + i] * t[2]);
        }
        Mat34(r)
    }

    /// General affine inverse: lift to 4x4, Gauss-Jordan with partial
    /// pivoting in f64, truncate the bottom row away.
    ///
    /// # Errors
    ///
    /// [`SceneError::SingularMatrix`] when the determinant magnitude falls
    /// below [`SINGULAR_EPS`].
    pub fn inverse_general(&self) -> Result<Mat34, SceneError> {
        // a = [ self | I ], lifted with the implicit 0 0 0 1 row.
        let mut a = [[0.0f64; 8]; 4];
        for i in 0..3 {
            for j in 0..4 {
                a[i][j] = self.0[i * 4 + j] as f64;
            }
        }
        a[3][3] = 1.0;
        for i in 0..4 {
            a[i][4 + i] = 1.0;
        }

        let mut det = 1.0f64;
        for col in 0..4 {
            // Partial pivot.
            let mut pivot_row = col;
            for row in col + 1..4 {
                if a[row][col].abs() > a[pivot_row][col].abs() {
                    pivot_row = row;
                }
            }
            if pivot_row != col {
                a.swap(col, pivot_row);
                det = -det;
            }
            let pivot = a[col][col];
            det *= pivot;
            if det.abs() < SINGULAR_EPS {
                return Err(SceneError::SingularMatrix { det: det.abs() });
            }
            for j in 0..8 {
                a[col][j] /= pivot;
            }
            for row in 0..4 {
                if row == col {
                    continue;
                }
                let factor = a[row][col];
                if factor != 0.0 {
                    for j in 0..8 {
                        a[row][j] -= factor * a[col][j];
                    }
                }
            }
        }

        let mut r = [0.0f32; 12];
        for i in 0..3 {
            for j in 0..4 {
                r[i * 4 + j] = a[i][4 + j] as f32;
            }
        }
        Ok(Mat34(r))
    }

    /// Inverse with automatic path selection by the ε-orthonormality test.
    pub fn inverse(&self) -> Result<Mat34, SceneError> {
        if self.is_orthonormal(ORTHONORMAL_EPS) {
            Ok(self.inverse_rigid())
        } else {
            self.inverse_general()
        }
    }

    /// Maximum absolute component difference to another matrix.
    pub fn max_abs_diff(&self, other: &Mat34) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max)
    }
}

impl Default for Mat34 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::ops::Mul for Mat34 {
    type Output = Mat34;

    fn mul(self, rhs: Mat34) -> Mat34 {
        Mat34::mul(&self, &rhs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
