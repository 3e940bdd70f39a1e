//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face to the canonical 112×112 ArcFace position using the
//! five InsightFace reference landmarks and a least-squares fit.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [[a, -b], [b, a]] * src + [tx, ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity { a: 1.0, b: 0.0, tx: 0.0, ty: 0.0 };

    /// Least-squares fit mapping `src` landmarks onto `dst`.
    ///
    /// Each point pair contributes two rows to `A * [a, b, tx, ty]^T = B`:
    ///   [sx, -sy, 1, 0] -> dx
    ///   [sy,  sx, 0, 1] -> dy
    /// and the normal equations `AᵀA x = AᵀB` are solved directly.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve4(ata, atb) {
            Some([a, b, tx, ty]) => Similarity { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    /// Map a destination point back into source coordinates.
    fn inverse_apply(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Solve a 4×4 linear system by Gaussian elimination with partial pivoting.
///
/// Returns `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for k in col..4 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one pixel; out-of-bounds neighbours read as black.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let at = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && y >= 0 && x < image.width() as i64 && y < image.height() as i64 {
            let p = image.get_pixel(x as u32, y as u32);
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (at(x0, y0), at(x0 + 1, y0), at(x0, y0 + 1), at(x0 + 1, y0 + 1));
    Rgb(std::array::from_fn(|c| {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        v.round().clamp(0.0, 255.0) as u8
    }))
}

fn warp(image: &RgbImage, transform: &Similarity, out_size: u32) -> RgbImage {
    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        match transform.inverse_apply(ox as f32, oy as f32) {
            Some((sx, sy)) => sample_bilinear(image, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

/// Align a detected face to a canonical 112×112 RGB crop for ArcFace.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112);
    warp(image, &transform, ALIGNED_SIZE)
}
