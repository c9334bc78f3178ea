//! Distance-difference scoring without superimposition
//!
//! lDDT asks how well a predicted structure preserves the local distance
//! pattern of the reference. Every reference pair closer than an inclusion
//! radius is scored against four tolerance thresholds; the score is the
//! fraction of threshold checks that pass. No alignment is involved, so the
//! score is invariant to rigid motion of either structure.

/// Tolerance thresholds in ångströms, each contributing equally
pub const LDDT_THRESHOLDS: [f64; 4] = [0.5, 1.0, 2.0, 4.0];

/// Which pairs are excluded from scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairExclusion {
    /// Score every distinct pair
    SelfOnly,

    /// Additionally skip pairs within one residue, for flattened
    /// atom lists laid out residue-major with a fixed atom count
    SameResidue {
        /// Number of atom slots per residue in the flattened list
        atoms_per_residue: usize,
    },
}

impl PairExclusion {
    fn excludes(&self, i: usize, j: usize) -> bool {
        match self {
            PairExclusion::SelfOnly => false,
            PairExclusion::SameResidue { atoms_per_residue } => {
                i / atoms_per_residue == j / atoms_per_residue
            }
        }
    }
}

/// Mean fraction of preserved reference distances over the four thresholds.
///
/// A pair is scored when both endpoints are masked in and the reference
/// distance is strictly below `cutoff`. Returns NaN when no pair qualifies.
pub fn lddt(
    predicted: &[[f64; 3]],
    reference: &[[f64; 3]],
    mask: &[bool],
    cutoff: f64,
    exclusion: PairExclusion,
) -> f64 {
    let n = reference.len().min(predicted.len()).min(mask.len());

    let mut pair_count = 0u64;
    let mut preserved_sum = 0.0;

    for i in 0..n {
        if !mask[i] {
            continue;
        }
        for j in (i + 1)..n {
            if !mask[j] || exclusion.excludes(i, j) {
                continue;
            }

            let d_ref = distance(&reference[i], &reference[j]);
            if d_ref >= cutoff {
                continue;
            }

            let delta = (d_ref - distance(&predicted[i], &predicted[j])).abs();
            let mut preserved = 0.0;
            for threshold in LDDT_THRESHOLDS {
                if delta < threshold {
                    preserved += 1.0 / LDDT_THRESHOLDS.len() as f64;
                }
            }

            preserved_sum += preserved;
            pair_count += 1;
        }
    }

    if pair_count == 0 {
        f64::NAN
    } else {
        preserved_sum / pair_count as f64
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}
