//! The oriented-image model.
//!
//! Representations are stored with DICOM conventions and functions are
//! included to output in NIfTI conventions. The convention throughout:
//!
//! * `[i j k]` always refers to `[i j normk]`, the theoretical grid-relative
//!   axes, independent of the actual slice order within the volume.
//! * `[x y z]` always refers to DICOM world (LPS) coordinates.
//!
//! If the stacking order is negative (`delta` anti-parallel to `normk`), a
//! flip is immediately recorded on `k`, so the image grid axes become
//! `[i j -k]`; all later updates to the image grid are applied as further
//! transposition/negation of the `axes` permutation. Mapping DICOM `[x y z]`
//! to NIfTI `[X Y Z]` is always `[-x -y z]`; the origin never changes.

use ndarray::{Array3, Axis};
use snafu::Snafu;

/// vector/product values below this are considered to be zero
pub const EPS: f64 = 1e-5;

/// angular error allowed between normk and delta vectors (degrees)
pub const ATOL: f64 = 2.0;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum GeometryError {
    #[snafu(display(
        "interslice vector and normal vector differ by > {:.2} deg (actual angle: {:.2} deg)",
        ATOL,
        angle
    ))]
    SkewedVolume { angle: f64 },

    /// grid conversion requires an untransposed image (axes must start [i, j])
    TransposedGrid,

    /// orientation matrix is singular
    SingularOrientation,
}

pub type Result<T, E = GeometryError> = std::result::Result<T, E>;

/// flip the sign of a single-character axis label
pub fn flip_label(s: &str) -> String {
    match s.strip_prefix('-') {
        Some(rest) => rest.to_string(),
        None => format!("-{}", s),
    }
}

/// Return an axis identifier mapped via an axes permutation list:
/// `i,j,k` are input axes; `I,J,K` are output axes. `"F"` when not found.
///
/// This is used to check how a given axis (e.g. the phase direction) has
/// been changed in the image grid by flips and transpositions. It operates
/// on voxel indices, not world coordinates.
pub fn map_axis(s: &str, axes: &[String; 3]) -> String {
    const OUT: [&str; 3] = ["I", "J", "K"];

    if let Some(n) = axes.iter().position(|a| a == s) {
        return OUT[n].to_string();
    }
    let negated = format!("-{}", s);
    if let Some(n) = axes.iter().position(|a| *a == negated) {
        return format!("-{}", OUT[n]);
    }
    if let Some(bare) = s.strip_prefix('-') {
        if let Some(n) = axes.iter().position(|a| a == bare) {
            return format!("-{}", OUT[n]);
        }
    }
    "F".to_string()
}

/// The anatomical plane closest to an image orientation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Plane {
    Axial,
    Sagittal,
    Coronal,
    Oblique,
    /// multiple merged orientations; geometry is nominal
    Mixed,
}

impl Plane {
    /// The short name used in sub-series suffixes and listings.
    pub fn short(self) -> &'static str {
        match self {
            Plane::Axial => "axi",
            Plane::Sagittal => "sag",
            Plane::Coronal => "cor",
            Plane::Oblique => "obl",
            Plane::Mixed => "mix",
        }
    }

    /// The long name used in listings.
    pub fn long(self) -> &'static str {
        match self {
            Plane::Axial => "Axial",
            Plane::Sagittal => "Sagittal",
            Plane::Coronal => "Coronal",
            Plane::Oblique => "Nonstd",
            Plane::Mixed => "Mixed",
        }
    }
}

/// The spatial state of a voxel grid: voxel sizes, the DICOM `i`/`j` unit
/// vectors, the position of voxel (0,0,0), the inter-slice vector, and the
/// permutation recording how the current storage axes relate to the
/// original DICOM grid axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// mm dimensions of voxel sizes along each grid axis
    pub pixdim: [f64; 3],
    /// DICOM row direction unit vector, in LPS
    pub i: [f64; 3],
    /// DICOM column direction unit vector, in LPS
    pub j: [f64; 3],
    /// corner voxel position of the 0th slice, in LPS
    pub offset: [f64; 3],
    /// vector between corner voxels of the 0th and 1st slice
    pub delta: Option<[f64; 3]>,
    /// storage axes as original grid axes, initially `[i, j, k]`
    pub axes: [String; 3],
    /// true when built from several merged orientations
    pub mixed: bool,
}

impl Geometry {
    /// Build a geometry from per-file DICOM fields. `orient` holds the
    /// distinct orientations of the sub-series; more than one means the
    /// geometry is nominal (`mixed`) and identity vectors are used.
    ///
    /// If the actual stacking direction is anti-parallel to `i × j`, the
    /// third axis is recorded as `-k` from the start.
    pub fn new(
        pixdim: [f64; 3],
        orient: &[[f64; 6]],
        offset: [f64; 3],
        delta: Option<[f64; 3]>,
    ) -> Result<Geometry> {
        let (i, j, mixed) = match orient {
            [o] => ([o[0], o[1], o[2]], [o[3], o[4], o[5]], false),
            _ => ([1.0, 0.0, 0.0], [0.0, 1.0, 0.0], true),
        };

        let mut geom = Geometry {
            pixdim,
            i,
            j,
            offset,
            delta,
            axes: ["i".to_string(), "j".to_string(), "k".to_string()],
            mixed,
        };

        if geom.check_slice_dir()? < 0.0 {
            geom.axes[2] = "-k".to_string();
        }

        Ok(geom)
    }

    /// `k` as the right-handed cross product `i × j`.
    pub fn normk(&self) -> [f64; 3] {
        cross(self.i, self.j)
    }

    /// Recalculate `delta`, assuming the grid is orthogonal.
    pub fn recalc_delta(&mut self) {
        let k = self.normk();
        let s = self.pixdim[2];
        self.delta = Some([k[0] * s, k[1] * s, k[2] * s]);
    }

    /// Replace the slice voxel size with the actual slice gap `|delta|`.
    pub fn use_slice_gap(&mut self) -> f64 {
        match self.delta {
            None => 1.0,
            Some(d) => {
                let magnitude = norm(d);
                self.pixdim[2] = magnitude;
                magnitude
            }
        }
    }

    /// Check whether `normk` really points along the slice direction.
    ///
    /// Returns `1.0` when `delta` is parallel to `normk`, `-1.0` when
    /// anti-parallel, `0.0` when `delta` is shorter than `EPS`, and fails
    /// when the volume is skewed past tolerance. The sign is the NIfTI
    /// `qfac`.
    pub fn check_slice_dir(&self) -> Result<f64> {
        self.check_slice_dir_with(self.normk())
    }

    fn check_slice_dir_with(&self, k: [f64; 3]) -> Result<f64> {
        let delta = match self.delta {
            None => return Ok(1.0),
            Some(d) => d,
        };

        if norm(delta) < EPS {
            return Ok(0.0);
        }

        let mut normdot = dot(k, delta) / (norm(k) * norm(delta));
        if normdot > 1.0 && normdot < 1.0 + EPS {
            normdot = 1.0;
        }
        if normdot < -1.0 && normdot > -1.0 - EPS {
            normdot = -1.0;
        }

        let angle = normdot.acos().to_degrees();
        if angle > 180.0 - ATOL {
            Ok(-1.0)
        } else if angle < ATOL {
            Ok(1.0)
        } else {
            SkewedVolumeSnafu { angle }.fail()
        }
    }

    /// Find a nearby "simple" integer axis-aligned unit vector.
    pub fn simplify(vector: [f64; 3]) -> [i32; 3] {
        let mut largest = 0.0f64;
        let mut which = 0;
        for (n, &v) in vector.iter().enumerate() {
            if v.abs() > largest.abs() {
                largest = v;
                which = n;
            }
        }
        let mut simplified = [0, 0, 0];
        simplified[which] = if largest >= 0.0 { 1 } else { -1 };
        simplified
    }

    /// Classify by the axis-aligned unit vectors closest to `i` and `j`.
    pub fn find_orient(&self) -> Plane {
        if self.mixed {
            return Plane::Mixed;
        }
        let si = Geometry::simplify(self.i);
        let sj = Geometry::simplify(self.j);
        match (si, sj) {
            ([1, 0, 0], [0, 1, 0]) => Plane::Axial,
            ([0, 1, 0], [0, 0, -1]) => Plane::Sagittal,
            ([1, 0, 0], [0, 0, -1]) => Plane::Coronal,
            _ => Plane::Oblique,
        }
    }

    /// Calculate the quaternion representation from the reference NIfTI C
    /// library, in NIfTI coordinates. Returns `[qfac, a, b, c, d]` with
    /// `a >= 0`.
    pub fn quaternion(&self) -> Result<[f64; 5]> {
        // columns of the rotation matrix in NIfTI coordinates: the first
        // two rows are negated going DICOM LPS -> NIfTI RAS
        let r11 = -self.i[0];
        let r21 = -self.i[1];
        let r31 = self.i[2];

        let r12 = -self.j[0];
        let r22 = -self.j[1];
        let r32 = self.j[2];

        let k = self.normk();
        let qfac = self.check_slice_dir_with(k)?;

        let r13 = -k[0];
        let r23 = -k[1];
        let r33 = k[2];

        let mut a = r11 + r22 + r33 + 1.0;
        let (mut b, mut c, mut d);

        if a > 0.5 {
            a = 0.5 * a.sqrt();
            b = 0.25 * (r32 - r23) / a;
            c = 0.25 * (r13 - r31) / a;
            d = 0.25 * (r21 - r12) / a;
        } else {
            let xd = 1.0 + r11 - (r22 + r33);
            let yd = 1.0 + r22 - (r11 + r33);
            let zd = 1.0 + r33 - (r11 + r22);
            if xd > 1.0 {
                b = 0.5 * xd.sqrt();
                c = 0.25 * (r12 + r21) / b;
                d = 0.25 * (r13 + r31) / b;
                a = 0.25 * (r32 - r23) / b;
            } else if yd > 1.0 {
                c = 0.5 * yd.sqrt();
                b = 0.25 * (r12 + r21) / c;
                d = 0.25 * (r23 + r32) / c;
                a = 0.25 * (r13 - r31) / c;
            } else {
                d = 0.5 * zd.sqrt();
                b = 0.25 * (r13 + r31) / d;
                c = 0.25 * (r23 + r32) / d;
                a = 0.25 * (r21 - r12) / d;
            }
        }

        if a < 0.0 {
            a = -a;
            b = -b;
            c = -c;
            d = -d;
        }

        Ok([qfac, a, b, c, d])
    }

    /// The NIfTI qform payload: `(qfac, [b, c, d, qx, qy, qz])` with the
    /// offset mapped LPS -> RAS.
    pub fn qdata(&self) -> Result<(f64, [f64; 6])> {
        let q = self.quaternion()?;
        Ok((
            q[0],
            [
                q[2],
                q[3],
                q[4],
                -self.offset[0],
                -self.offset[1],
                self.offset[2],
            ],
        ))
    }

    /// Convert a vector from DICOM coordinates to the DICOM grid
    /// coordinates `[i j normk]`. The actual stacking direction does not
    /// matter here; only valid on an untransposed image orientation.
    pub fn dcm_to_grid(&self, v: [f64; 3]) -> Result<[f64; 3]> {
        if self.axes[0] != "i" || self.axes[1] != "j" {
            return TransposedGridSnafu.fail();
        }

        let k = self.normk();
        // rows of the inverse of the column matrix [i | j | k]
        let m = [
            [self.i[0], self.j[0], k[0]],
            [self.i[1], self.j[1], k[1]],
            [self.i[2], self.j[2], k[2]],
        ];
        let det = m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0]);
        if det.abs() < EPS {
            return SingularOrientationSnafu.fail();
        }
        let inv = [
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) / det,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) / det,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) / det,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) / det,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) / det,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) / det,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) / det,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) / det,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) / det,
            ],
        ];
        Ok([
            inv[0][0] * v[0] + inv[0][1] * v[1] + inv[0][2] * v[2],
            inv[1][0] * v[0] + inv[1][1] * v[1] + inv[1][2] * v[2],
            inv[2][0] * v[0] + inv[2][1] * v[1] + inv[2][2] * v[2],
        ])
    }

    /// Show where a particular original DICOM axis (`i`, `j`, `k`) has
    /// ended up in the permuted version of this image.
    pub fn map_axis(&self, s: &str) -> String {
        map_axis(s, &self.axes)
    }
}

/// An oriented image: a voxel grid plus its spatial state. Flips and
/// reorientations transform the data and geometry consistently.
#[derive(Debug, Clone)]
pub struct OrientedImage<T> {
    pub geom: Geometry,
    pub data: Array3<T>,
}

impl<T: Clone> OrientedImage<T> {
    /// Flip along the first storage axis (`i`); the unit vectors remain in
    /// DICOM coordinates and the offset moves to the opposite corner.
    pub fn flip_h(&mut self) {
        let infov = (self.data.shape()[0] as f64 - 1.0) * self.geom.pixdim[0];
        for n in 0..3 {
            self.geom.offset[n] += self.geom.i[n] * infov;
        }
        for n in 0..3 {
            self.geom.i[n] = -self.geom.i[n];
        }
        self.data.invert_axis(Axis(0));
        self.geom.axes[0] = flip_label(&self.geom.axes[0]);
    }

    /// Flip along the second storage axis (`j`).
    pub fn flip_v(&mut self) {
        let infov = (self.data.shape()[1] as f64 - 1.0) * self.geom.pixdim[1];
        for n in 0..3 {
            self.geom.offset[n] += self.geom.j[n] * infov;
        }
        for n in 0..3 {
            self.geom.j[n] = -self.geom.j[n];
        }
        self.data.invert_axis(Axis(1));
        self.geom.axes[1] = flip_label(&self.geom.axes[1]);
    }

    /// Re-orient to the given plane by composed transposes and axis flips.
    /// Supported: coronal -> axial and sagittal -> axial. Returns whether
    /// the image is now in the requested plane.
    pub fn reorient(&mut self, new: Plane) -> Result<bool> {
        let old = self.geom.find_orient();
        let qfac = self.geom.check_slice_dir()?;

        if old == new {
            return Ok(true);
        }

        match (old, new) {
            (Plane::Coronal, Plane::Axial) => {
                // transform: i'=i, j'=k, k'=-j
                self.data.swap_axes(1, 2);
                self.geom.j = self.geom.normk();
                self.geom.pixdim =
                    [self.geom.pixdim[0], self.geom.pixdim[2], self.geom.pixdim[1]];
                self.geom.axes.swap(1, 2);

                self.flip_k_axis();

                // flip j' if the k sign was wrong
                if qfac < 0.0 {
                    let infov = (self.data.shape()[1] as f64 - 1.0) * self.geom.pixdim[1];
                    for n in 0..3 {
                        self.geom.offset[n] -= self.geom.j[n] * infov;
                    }
                    self.data.invert_axis(Axis(1));
                    self.geom.axes[1] = flip_label(&self.geom.axes[1]);
                }

                self.geom.recalc_delta();
                Ok(true)
            }
            (Plane::Sagittal, Plane::Axial) => {
                // transform: i'=-k, j'=i, k'=-j
                // permutation (2,0,1) as two axis swaps
                self.data.swap_axes(0, 2);
                self.data.swap_axes(1, 2);
                let k = self.geom.normk();
                self.geom.j = self.geom.i;
                self.geom.i = [-k[0], -k[1], -k[2]];
                self.geom.pixdim =
                    [self.geom.pixdim[2], self.geom.pixdim[0], self.geom.pixdim[1]];
                self.geom.axes = [
                    flip_label(&self.geom.axes[2]),
                    self.geom.axes[0].clone(),
                    self.geom.axes[1].clone(),
                ];

                self.flip_k_axis();

                // flip i' (again) if the k sign was correct
                if qfac > 0.0 {
                    let infov = (self.data.shape()[0] as f64 - 1.0) * self.geom.pixdim[0];
                    for n in 0..3 {
                        self.geom.offset[n] -= self.geom.i[n] * infov;
                    }
                    self.data.invert_axis(Axis(0));
                    self.geom.axes[0] = flip_label(&self.geom.axes[0]);
                }

                self.geom.recalc_delta();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Flip the third storage axis, moving the offset to the far slice.
    fn flip_k_axis(&mut self) {
        let k = self.geom.normk();
        let infov = (self.data.shape()[2] as f64 - 1.0) * self.geom.pixdim[2];
        for n in 0..3 {
            self.geom.offset[n] -= k[n] * infov;
        }
        self.data.invert_axis(Axis(2));
        self.geom.axes[2] = flip_label(&self.geom.axes[2]);
    }
}

fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn norm(a: [f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// Find the angles (degrees) between the `i` columns and the `j` columns
/// of two DICOM orientation 6-vectors.
pub fn orientation_angles(o1: &[f64; 6], o2: &[f64; 6]) -> (f64, f64) {
    let col = |o: &[f64; 6], s: usize| [o[s], o[s + 1], o[s + 2]];

    let angle_of = |a: [f64; 3], b: [f64; 3]| {
        let mut d = dot(a, b) / (norm(a) * norm(b));
        if d > 1.0 && d - 1.0 <= f64::EPSILON * 4.0 {
            d = 1.0;
        }
        if d < -1.0 && -1.0 - d <= f64::EPSILON * 4.0 {
            d = -1.0;
        }
        d.acos().to_degrees()
    };

    (
        angle_of(col(o1, 0), col(o2, 0)),
        angle_of(col(o1, 3), col(o2, 3)),
    )
}

/// Find the consistent lowest of two orientation vectors:
/// the first differing component decides.
pub fn lowest(a: [f64; 6], b: [f64; 6]) -> [f64; 6] {
    for n in 0..6 {
        if a[n] < b[n] {
            return a;
        } else if a[n] > b[n] {
            return b;
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    const AXIAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    const SAGITTAL: [f64; 6] = [0.0, 1.0, 0.0, 0.0, 0.0, -1.0];
    const CORONAL: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 0.0, -1.0];

    fn geom(orient: [f64; 6], delta: Option<[f64; 3]>) -> Geometry {
        Geometry::new([1.0, 1.0, 2.0], &[orient], [0.0, 0.0, 0.0], delta).unwrap()
    }

    fn image(orient: [f64; 6], shape: (usize, usize, usize)) -> OrientedImage<i16> {
        let g = geom(orient, None);
        let n = shape.0 * shape.1 * shape.2;
        let data =
            Array3::from_shape_vec(shape, (0..n as i16).collect()).unwrap();
        OrientedImage { geom: g, data }
    }

    #[test]
    fn normk_is_right_handed() {
        let g = geom(AXIAL, None);
        assert_eq!(g.normk(), [0.0, 0.0, 1.0]);

        let g = geom(SAGITTAL, None);
        assert_eq!(g.normk(), [-1.0, 0.0, 0.0]);
    }

    #[test]
    fn find_orient_table() {
        assert_eq!(geom(AXIAL, None).find_orient(), Plane::Axial);
        assert_eq!(geom(SAGITTAL, None).find_orient(), Plane::Sagittal);
        assert_eq!(geom(CORONAL, None).find_orient(), Plane::Coronal);

        let tilted = [0.996, 0.087, 0.0, -0.087, 0.996, 0.0];
        assert_eq!(geom(tilted, None).find_orient(), Plane::Axial);
        let oblique = [0.7, 0.7, 0.1, -0.7, 0.7, 0.1];
        assert_eq!(geom(oblique, None).find_orient(), Plane::Oblique);
    }

    #[test]
    fn slice_dir_sign() {
        let g = geom(AXIAL, Some([0.0, 0.0, 2.0]));
        assert_eq!(g.check_slice_dir().unwrap(), 1.0);

        let g = geom(AXIAL, Some([0.0, 0.0, -2.0]));
        assert_eq!(g.check_slice_dir().unwrap(), -1.0);

        let g = geom(AXIAL, Some([0.0, 0.0, 1e-7]));
        assert_eq!(g.check_slice_dir().unwrap(), 0.0);

        let g = geom(AXIAL, Some([0.0, 2.0, 2.0]));
        assert!(g.check_slice_dir().is_err());
    }

    #[test]
    fn negative_stacking_flips_k_axis_label() {
        let g = Geometry::new(
            [1.0, 1.0, 2.0],
            &[AXIAL],
            [0.0, 0.0, 0.0],
            Some([0.0, 0.0, -2.0]),
        )
        .unwrap();
        assert_eq!(g.axes, ["i", "j", "-k"]);
    }

    #[test]
    fn quaternion_of_axial_identity() {
        // axial LPS maps to a rotation by pi about z in RAS;
        // quaternion (0, 0, 0, 1) with a forced non-negative scalar
        let g = geom(AXIAL, Some([0.0, 0.0, 2.0]));
        let q = g.quaternion().unwrap();
        assert_eq!(q[0], 1.0);
        assert!(q[1] >= 0.0);
        assert!((q[1] - 0.0).abs() < 1e-9);
        assert!((q[4] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn quaternion_scalar_is_never_negative() {
        for orient in [AXIAL, SAGITTAL, CORONAL] {
            let q = geom(orient, Some([0.0, 0.0, 0.0])).quaternion().unwrap();
            assert!(q[1] >= 0.0, "a < 0 for {:?}", orient);
        }
    }

    #[test]
    fn quaternion_reconstructs_rotation() {
        // rebuild the rotation matrix from (a,b,c,d) and compare with the
        // direct construction, for a mildly oblique orientation
        let c30 = (30.0f64).to_radians().cos();
        let s30 = (30.0f64).to_radians().sin();
        let orient = [c30, s30, 0.0, -s30, c30, 0.0];
        let g = geom(orient, None);
        let q = g.quaternion().unwrap();
        let (a, b, c, d) = (q[1], q[2], q[3], q[4]);

        let r = [
            [
                a * a + b * b - c * c - d * d,
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                a * a + c * c - b * b - d * d,
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                a * a + d * d - c * c - b * b,
            ],
        ];

        let k = g.normk();
        let expected = [
            [-g.i[0], -g.j[0], -k[0]],
            [-g.i[1], -g.j[1], -k[1]],
            [g.i[2], g.j[2], k[2]],
        ];

        for row in 0..3 {
            for colx in 0..3 {
                assert!(
                    (r[row][colx] - expected[row][colx]).abs() < 1e-6,
                    "mismatch at ({},{}): {} vs {}",
                    row,
                    colx,
                    r[row][colx],
                    expected[row][colx]
                );
            }
        }
    }

    #[test]
    fn flip_h_moves_offset_and_tracks_axes() {
        let mut img = image(AXIAL, (4, 3, 2));
        let before = img.data[[0, 1, 1]];
        img.flip_h();
        assert_eq!(img.geom.i, [-1.0, 0.0, 0.0]);
        assert_eq!(img.geom.offset, [3.0, 0.0, 0.0]);
        assert_eq!(img.geom.axes[0], "-i");
        assert_eq!(img.data[[3, 1, 1]], before);

        // flipping back restores everything
        img.flip_h();
        assert_eq!(img.geom.axes[0], "i");
        assert_eq!(img.geom.offset, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn flip_v_only_touches_j_axis() {
        let mut img = image(AXIAL, (4, 3, 2));
        let geom_before = img.geom.clone();
        img.flip_v();
        assert_eq!(img.geom.axes, ["i", "-j", "k"]);
        assert_eq!(img.geom.i, geom_before.i);
        assert_eq!(img.geom.pixdim, geom_before.pixdim);
        assert_eq!(img.geom.offset, [0.0, 2.0, 0.0]);
        assert_eq!(img.geom.j, [0.0, -1.0, 0.0]);
    }

    #[test]
    fn reorient_coronal_to_axial() {
        let mut img = image(CORONAL, (4, 3, 2));
        img.geom.delta = Some([0.0, 2.0, 0.0]);
        // coronal normk is (0,1,0); delta along +y keeps qfac +1
        let ok = img.reorient(Plane::Axial).unwrap();
        assert!(ok);
        assert_eq!(img.geom.find_orient(), Plane::Axial);
        assert_eq!(img.data.shape(), &[4, 2, 3]);
        // delta was recomputed along the new normal
        let d = img.geom.delta.unwrap();
        let k = img.geom.normk();
        assert!(dot_sign(d, k) > 0.0);
    }

    #[test]
    fn reorient_sagittal_to_axial() {
        let mut img = image(SAGITTAL, (4, 3, 2));
        img.geom.delta = Some([-2.0, 0.0, 0.0]);
        let ok = img.reorient(Plane::Axial).unwrap();
        assert!(ok);
        assert_eq!(img.geom.find_orient(), Plane::Axial);
        assert_eq!(img.data.shape(), &[2, 4, 3]);
    }

    #[test]
    fn reorient_unsupported_pair_is_refused() {
        let mut img = image(AXIAL, (2, 2, 2));
        assert!(!img.reorient(Plane::Coronal).unwrap());
        assert_eq!(img.geom.find_orient(), Plane::Axial);
    }

    #[test]
    fn orient_name_stable_under_flips_back_to_axial() {
        let mut img = image(AXIAL, (4, 4, 2));
        img.flip_h();
        img.flip_v();
        img.flip_v();
        img.flip_h();
        assert_eq!(img.geom.find_orient(), Plane::Axial);
        assert_eq!(img.geom.axes, ["i", "j", "k"]);
    }

    #[test]
    fn dcm_to_grid_inverts_orientation() {
        let g = geom(SAGITTAL, None);
        let v = g.dcm_to_grid([0.0, 1.0, 0.0]).unwrap();
        assert!((v[0] - 1.0).abs() < 1e-9);
        assert!(v[1].abs() < 1e-9);
        assert!(v[2].abs() < 1e-9);

        let mut transposed = g;
        transposed.axes[0] = "-i".to_string();
        assert!(transposed.dcm_to_grid([0.0, 1.0, 0.0]).is_err());
    }

    #[test]
    fn map_axis_permutations() {
        let axes = ["i".to_string(), "j".to_string(), "-k".to_string()];
        assert_eq!(map_axis("i", &axes), "I");
        assert_eq!(map_axis("-i", &axes), "-I");
        assert_eq!(map_axis("k", &axes), "-K");
        assert_eq!(map_axis("-k", &axes), "K");
        assert_eq!(map_axis("q", &axes), "F");
    }

    #[test]
    fn angles_between_orientations() {
        let (a1, a2) = orientation_angles(&AXIAL, &AXIAL);
        assert!(a1.abs() < 1e-9 && a2.abs() < 1e-9);

        let five = (5.0f64).to_radians();
        let tilted = [
            five.cos(),
            five.sin(),
            0.0,
            -five.sin(),
            five.cos(),
            0.0,
        ];
        let (a1, a2) = orientation_angles(&AXIAL, &tilted);
        assert!((a1 - 5.0).abs() < 1e-6);
        assert!((a2 - 5.0).abs() < 1e-6);
    }

    #[test]
    fn lowest_prefers_first_differing_component() {
        let a = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let b = [1.0, 0.0, 0.1, 0.0, 0.9, 0.0];
        assert_eq!(lowest(a, b), a);
        assert_eq!(lowest(b, a), a);
        assert_eq!(lowest(a, a), a);
    }

    fn dot_sign(a: [f64; 3], b: [f64; 3]) -> f64 {
        (a[0] * b[0] + a[1] * b[1] + a[2] * b[2]).signum()
    }
}
