//! Rigid superimposition of point sets by least-squares fitting
//!
//! The rotation comes from an SVD of the cross-covariance of the fitted
//! points, with the usual reflection correction. Fits with fewer than three
//! non-collinear valid points are refused; the rotation would be
//! underdetermined.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};

/// Relative eigenvalue floor below which a point cloud counts as collinear
const COLLINEAR_REL_TOL: f64 = 1e-9;

/// Result of superimposing a mobile point set onto a reference
#[derive(Debug, Clone)]
pub struct Superposition {
    /// Mobile coordinates after alignment; masked-out slots are zeroed
    pub aligned: Vec<[f64; 3]>,

    /// Root-mean-square deviation over the fitted points, in ångströms
    pub rmsd: f64,
}

/// Superimpose `mobile` onto `reference`, fitting on the masked-in points.
///
/// The rotation and translation from the fit are applied to every valid
/// mobile point; invalid slots come back as zeros. Returns `None` for
/// degenerate inputs: mismatched lengths, fewer than three valid points, or
/// a collinear reference selection.
pub fn superimpose(
    reference: &[[f64; 3]],
    mobile: &[[f64; 3]],
    mask: &[bool],
) -> Option<Superposition> {
    if reference.len() != mobile.len() || reference.len() != mask.len() {
        return None;
    }

    let selected: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
    if selected.len() < 3 {
        return None;
    }

    let ref_centroid = centroid(reference, &selected);
    let mob_centroid = centroid(mobile, &selected);

    if is_collinear(reference, &selected, &ref_centroid) {
        return None;
    }

    // Cross-covariance of centered mobile against centered reference.
    let mut h = Matrix3::<f64>::zeros();
    for &i in &selected {
        let a = Vector3::from(mobile[i]) - mob_centroid;
        let b = Vector3::from(reference[i]) - ref_centroid;
        h += a * b.transpose();
    }

    let rotation = rotation_from_covariance(h)?;

    let mut aligned = vec![[0.0; 3]; mobile.len()];
    for &i in &selected {
        let p = rotation * (Vector3::from(mobile[i]) - mob_centroid) + ref_centroid;
        aligned[i] = [p.x, p.y, p.z];
    }

    let mut sq_sum = 0.0;
    for &i in &selected {
        let d = Vector3::from(aligned[i]) - Vector3::from(reference[i]);
        sq_sum += d.norm_squared();
    }
    let rmsd = (sq_sum / selected.len() as f64).sqrt();

    Some(Superposition { aligned, rmsd })
}

fn centroid(points: &[[f64; 3]], selected: &[usize]) -> Vector3<f64> {
    let mut sum = Vector3::zeros();
    for &i in selected {
        sum += Vector3::from(points[i]);
    }
    sum / selected.len() as f64
}

/// True when the selected points carry no spread beyond a single axis
fn is_collinear(points: &[[f64; 3]], selected: &[usize], center: &Vector3<f64>) -> bool {
    let mut covariance = Matrix3::<f64>::zeros();
    for &i in selected {
        let c = Vector3::from(points[i]) - center;
        covariance += c * c.transpose();
    }

    let mut eigenvalues: Vec<f64> = SymmetricEigen::new(covariance)
        .eigenvalues
        .iter()
        .copied()
        .collect();
    eigenvalues.sort_by(|a, b| b.total_cmp(a));

    eigenvalues[1] <= eigenvalues[0].max(1.0) * COLLINEAR_REL_TOL
}

/// Optimal rotation for a cross-covariance matrix, reflection-corrected
fn rotation_from_covariance(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = h.svd(true, true);
    let u = svd.u?;
    let mut v = svd.v_t?.transpose();

    if (v * u.transpose()).determinant() < 0.0 {
        v.column_mut(2).scale_mut(-1.0);
    }

    Some(v * u.transpose())
}
