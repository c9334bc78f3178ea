//! Distance-matrix and post-alignment quality scores
//!
//! `drmsd` compares intra-structure distance matrices and needs no
//! alignment. The GDT, GDC and TM scores assume the caller already
//! superimposed the two point sets; they only look at per-point deviations.

/// GDT_TS distance cutoffs in ångströms
pub const GDT_TS_CUTOFFS: [f64; 4] = [1.0, 2.0, 4.0, 8.0];

/// GDT_HA distance cutoffs in ångströms
pub const GDT_HA_CUTOFFS: [f64; 4] = [0.5, 1.0, 2.0, 4.0];

/// Number of half-ångström bins used by the GDC score
const GDC_BIN_COUNT: u32 = 10;

/// Distance-matrix RMSD over the masked-in points.
///
/// With `mask` of `None` every point counts. Returns NaN when fewer than
/// two valid points remain, since no pair exists to compare.
pub fn drmsd(a: &[[f64; 3]], b: &[[f64; 3]], mask: Option<&[bool]>) -> f64 {
    let n = a.len().min(b.len());
    let valid: Vec<usize> = match mask {
        Some(m) => (0..n.min(m.len())).filter(|&i| m[i]).collect(),
        None => (0..n).collect(),
    };

    let count = valid.len();
    if count < 2 {
        return f64::NAN;
    }

    let mut sq_sum = 0.0;
    for (pos, &i) in valid.iter().enumerate() {
        for &j in &valid[pos + 1..] {
            let diff = distance(&a[i], &a[j]) - distance(&b[i], &b[j]);
            sq_sum += diff * diff;
        }
    }

    // Normalized over ordered pairs, counting each unordered pair twice.
    (2.0 * sq_sum / (count as f64 * (count - 1) as f64)).sqrt()
}

/// Mean fraction of masked-in points within each cutoff, post-alignment.
///
/// Returns NaN when the mask leaves nothing to score.
pub fn gdt(predicted: &[[f64; 3]], reference: &[[f64; 3]], mask: &[bool], cutoffs: &[f64]) -> f64 {
    let n = predicted.len().min(reference.len()).min(mask.len());
    let valid: Vec<usize> = (0..n).filter(|&i| mask[i]).collect();
    if valid.is_empty() {
        return f64::NAN;
    }

    let deviations: Vec<f64> = valid
        .iter()
        .map(|&i| distance(&predicted[i], &reference[i]))
        .collect();

    let mut fraction_sum = 0.0;
    for &cutoff in cutoffs {
        let within = deviations.iter().filter(|&&d| d <= cutoff).count();
        fraction_sum += within as f64 / valid.len() as f64;
    }
    fraction_sum / cutoffs.len() as f64
}

/// GDT with the standard total-score cutoffs (1, 2, 4, 8 Å)
pub fn gdt_ts(predicted: &[[f64; 3]], reference: &[[f64; 3]], mask: &[bool]) -> f64 {
    gdt(predicted, reference, mask, &GDT_TS_CUTOFFS)
}

/// GDT with the high-accuracy cutoffs (0.5, 1, 2, 4 Å)
pub fn gdt_ha(predicted: &[[f64; 3]], reference: &[[f64; 3]], mask: &[bool]) -> f64 {
    gdt(predicted, reference, mask, &GDT_HA_CUTOFFS)
}

/// Global distance calculation over ten half-ångström bins.
///
/// Tighter bins get linearly larger weights, so the score rewards
/// high-accuracy placement more than GDT does. Inputs must already be
/// aligned and unpadded. Returns NaN for empty input.
pub fn gdc_all(predicted: &[[f64; 3]], reference: &[[f64; 3]]) -> f64 {
    let n = predicted.len().min(reference.len());
    if n == 0 {
        return f64::NAN;
    }

    let k = GDC_BIN_COUNT;
    let mut weighted_sum = 0.0;
    for bin in 1..=k {
        let cutoff = 0.5 * bin as f64;
        let within = (0..n)
            .filter(|&i| distance(&predicted[i], &reference[i]) <= cutoff)
            .count();
        let weight = (k + 1 - bin) as f64;
        weighted_sum += weight * within as f64 / n as f64;
    }

    2.0 * weighted_sum / (k * (k + 1)) as f64
}

/// Template-modeling score for aligned, unpadded point sets.
///
/// The length-dependent scale `d0` keeps the score comparable across chain
/// lengths; it is floored at 0.5 Å so short chains stay well defined.
/// Returns NaN for empty input.
pub fn tm_score(predicted: &[[f64; 3]], reference: &[[f64; 3]]) -> f64 {
    let n = predicted.len().min(reference.len());
    if n == 0 {
        return f64::NAN;
    }

    let d0 = (1.24 * (n as f64 - 15.0).cbrt() - 1.8).max(0.5);

    let mut sum = 0.0;
    for i in 0..n {
        let ratio = distance(&predicted[i], &reference[i]) / d0;
        sum += 1.0 / (1.0 + ratio * ratio);
    }
    sum / n as f64
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Points whose per-index deviations are 0.4, 1.5, 3.0 and 9.0
    fn displaced_pair() -> (Vec<[f64; 3]>, Vec<[f64; 3]>) {
        let reference = vec![
            [0.0, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 10.0, 0.0],
            [0.0, 0.0, 10.0],
        ];
        let predicted = vec![
            [0.4, 0.0, 0.0],
            [10.0, 1.5, 0.0],
            [0.0, 10.0, 3.0],
            [9.0, 0.0, 10.0],
        ];
        (reference, predicted)
    }

    #[test]
    fn test_drmsd_zero_for_identical() {
        let (reference, _) = displaced_pair();
        let d = drmsd(&reference, &reference, None);
        assert_abs_diff_eq!(d, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_drmsd_known_value() {
        // A 3-4-5 triangle scaled by two: distance errors are 3, 4 and 5.
        let a = vec![[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [0.0, 4.0, 0.0]];
        let b = vec![[0.0, 0.0, 0.0], [6.0, 0.0, 0.0], [0.0, 8.0, 0.0]];
        let expected = (100.0f64 / 6.0).sqrt();
        assert_abs_diff_eq!(drmsd(&a, &b, None), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_drmsd_ignores_masked_points() {
        let a = vec![[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [99.0, 99.0, 99.0]];
        let b = vec![[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [-99.0, 0.0, 99.0]];
        let mask = vec![true, true, false];
        assert_abs_diff_eq!(drmsd(&a, &b, Some(&mask)), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_drmsd_single_point_is_nan() {
        let a = vec![[0.0, 0.0, 0.0], [3.0, 0.0, 0.0]];
        let mask = vec![true, false];
        assert!(drmsd(&a, &a, Some(&mask)).is_nan());
    }

    #[test]
    fn test_gdt_ts_fractions() {
        let (reference, predicted) = displaced_pair();
        let mask = vec![true; 4];
        // Within 1: 1/4. Within 2: 2/4. Within 4: 3/4. Within 8: 3/4.
        let expected = (0.25 + 0.5 + 0.75 + 0.75) / 4.0;
        assert_abs_diff_eq!(gdt_ts(&predicted, &reference, &mask), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_gdt_ha_is_stricter() {
        let (reference, predicted) = displaced_pair();
        let mask = vec![true; 4];
        // Within 0.5: 1/4. Within 1: 1/4. Within 2: 2/4. Within 4: 3/4.
        let expected = (0.25 + 0.25 + 0.5 + 0.75) / 4.0;
        assert_abs_diff_eq!(gdt_ha(&predicted, &reference, &mask), expected, epsilon = 1e-12);
        assert!(
            gdt_ha(&predicted, &reference, &mask) < gdt_ts(&predicted, &reference, &mask)
        );
    }

    #[test]
    fn test_gdt_empty_mask_is_nan() {
        let (reference, predicted) = displaced_pair();
        let mask = vec![false; 4];
        assert!(gdt_ts(&predicted, &reference, &mask).is_nan());
    }

    #[test]
    fn test_gdc_perfect_match_is_one() {
        let (reference, _) = displaced_pair();
        assert_abs_diff_eq!(gdc_all(&reference, &reference), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gdc_weights_favor_tight_bins() {
        let reference = vec![[0.0, 0.0, 0.0]];
        // 0.4 angstroms off: inside every bin from 0.5 up.
        let near = vec![[0.4, 0.0, 0.0]];
        // 2.4 angstroms off: misses the four tightest bins.
        let far = vec![[2.4, 0.0, 0.0]];

        let near_score = gdc_all(&near, &reference);
        let far_score = gdc_all(&far, &reference);
        assert_abs_diff_eq!(near_score, 1.0, epsilon = 1e-12);

        // Bins 5..=10 hit, with weights 6, 5, 4, 3, 2, 1 out of 55.
        assert_abs_diff_eq!(far_score, 21.0 / 55.0, epsilon = 1e-12);
        assert!(far_score < near_score);
    }

    #[test]
    fn test_gdc_empty_is_nan() {
        assert!(gdc_all(&[], &[]).is_nan());
    }

    #[test]
    fn test_tm_score_identity_is_one() {
        let (reference, _) = displaced_pair();
        assert_abs_diff_eq!(tm_score(&reference, &reference), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tm_score_short_chain_uses_floored_scale() {
        // For four points the raw d0 would be negative; the floor keeps it
        // at 0.5, so a uniform 0.5 angstrom error scores exactly 0.5.
        let reference = vec![
            [0.0, 0.0, 0.0],
            [4.0, 0.0, 0.0],
            [0.0, 4.0, 0.0],
            [0.0, 0.0, 4.0],
        ];
        let predicted: Vec<[f64; 3]> = reference
            .iter()
            .map(|p| [p[0], p[1], p[2] + 0.5])
            .collect();
        assert_abs_diff_eq!(tm_score(&predicted, &reference), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_tm_score_decreases_with_error() {
        let (reference, predicted) = displaced_pair();
        let score = tm_score(&predicted, &reference);
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_tm_score_empty_is_nan() {
        assert!(tm_score(&[], &[]).is_nan());
    }
}
