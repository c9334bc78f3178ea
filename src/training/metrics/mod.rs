//! Structural agreement metrics between predicted and reference coordinates
//!
//! The engine consumes coordinate tensors shaped `[batch, residues, atoms, 3]`
//! with a float atom mask and produces a flat report of named scalars. The
//! alpha-carbon family (`lddt_ca`, `drmsd_ca`, and the superimposition-based
//! `rmsd_ca`, `gdtts_ca`, `gdtha_ca`) averages over the batch; the all-atom
//! family is only defined for single-example batches.
//!
//! Degenerate geometry never fails a computation. An empty mask, a single
//! valid point or a collinear fit yields NaN, and a NaN example poisons the
//! batch mean so downstream aggregation can decide how to treat it.

pub mod lddt;
pub mod sinks;
pub mod superimpose;
pub mod validation;

pub use lddt::{lddt, PairExclusion, LDDT_THRESHOLDS};
pub use sinks::{JsonlSink, MetricRecord, MetricsSink, Phase, RecordingSink, TracingSink};
pub use superimpose::{superimpose, Superposition};
pub use validation::{
    drmsd, gdc_all, gdt, gdt_ha, gdt_ts, tm_score, GDT_HA_CUTOFFS, GDT_TS_CUTOFFS,
};

use std::collections::BTreeMap;

use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::error::{Error, Result};
use crate::residues::CA_IDX;

/// Ordered collection of named scalar metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsReport {
    values: BTreeMap<String, f64>,
}

impl MetricsReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a named scalar, replacing any previous value
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Look up a scalar by name
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Whether a name is present
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Copy every entry of `other` into this report
    pub fn extend(&mut self, other: &MetricsReport) {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), *value);
        }
    }

    /// Iterate entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Borrow the underlying map
    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the report holds no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<BTreeMap<String, f64>> for MetricsReport {
    fn from(values: BTreeMap<String, f64>) -> Self {
        Self { values }
    }
}

/// Per-example alpha-carbon slices of a batch
struct CaView {
    predicted: Vec<[f64; 3]>,
    reference: Vec<[f64; 3]>,
    mask: Vec<bool>,
}

/// Computes structural agreement scores for coordinate batches
pub struct StructuralMetricsEngine {
    config: MetricsConfig,
}

impl StructuralMetricsEngine {
    /// Build an engine from its configuration
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Borrow the engine configuration
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Score a batch of predicted coordinates against the reference.
    ///
    /// `predicted` and `reference` are `[batch, residues, atoms, 3]` and
    /// `mask` is `[batch, residues, atoms]`. The alignment-based scores,
    /// all-atom family included, are added only when `superimposition` is
    /// set and the engine is configured for structural metrics; that family
    /// requires a single-example batch.
    ///
    /// The lDDT family reads raw coordinates and relies on the mask alone to
    /// exclude missing atoms, so padded slots may hold arbitrary values.
    pub fn compute(
        &self,
        predicted: &Tensor,
        reference: &Tensor,
        mask: &Tensor,
        superimposition: bool,
    ) -> Result<MetricsReport> {
        let (batch, _residues, atoms) = check_shapes(predicted, reference, mask)?;

        let pred = tensor_to_points(predicted)?;
        let refc = tensor_to_points(reference)?;
        let masks = mask_to_bools(mask, self.config.eps)?;

        let views: Vec<CaView> = (0..batch)
            .map(|e| CaView {
                predicted: ca_slots(&pred[e], atoms),
                reference: ca_slots(&refc[e], atoms),
                mask: ca_mask_slots(&masks[e], atoms),
            })
            .collect();

        let mut report = MetricsReport::new();

        let lddt_vals: Vec<f64> = views
            .iter()
            .map(|v| {
                lddt(
                    &v.predicted,
                    &v.reference,
                    &v.mask,
                    self.config.inclusion_radius,
                    PairExclusion::SelfOnly,
                )
            })
            .collect();
        report.insert("lddt_ca", mean(&lddt_vals));

        let drmsd_vals: Vec<f64> = views
            .iter()
            .map(|v| drmsd(&v.predicted, &v.reference, Some(&v.mask)))
            .collect();
        report.insert("drmsd_ca", mean(&drmsd_vals));

        if superimposition && self.config.add_struct_metrics {
            let fits: Vec<Option<Superposition>> = views
                .iter()
                .map(|v| superimpose(&v.reference, &v.predicted, &v.mask))
                .collect();

            let rmsd_vals: Vec<f64> = fits
                .iter()
                .map(|f| f.as_ref().map_or(f64::NAN, |sp| sp.rmsd))
                .collect();
            report.insert("rmsd_ca", mean(&rmsd_vals));

            let gdtts_vals: Vec<f64> = fits
                .iter()
                .zip(&views)
                .map(|(f, v)| match f {
                    Some(sp) => gdt_ts(&sp.aligned, &v.reference, &v.mask),
                    None => f64::NAN,
                })
                .collect();
            report.insert("gdtts_ca", mean(&gdtts_vals));

            let gdtha_vals: Vec<f64> = fits
                .iter()
                .zip(&views)
                .map(|(f, v)| match f {
                    Some(sp) => gdt_ha(&sp.aligned, &v.reference, &v.mask),
                    None => f64::NAN,
                })
                .collect();
            report.insert("gdtha_ca", mean(&gdtha_vals));

            if batch != 1 {
                return Err(Error::shape(format!(
                    "all-atom structural metrics support batch size 1, got {batch}"
                )));
            }
            let all_atom = self.all_atom_scores(
                &pred[0],
                &refc[0],
                &masks[0],
                atoms,
                fits[0].as_ref(),
                &views[0],
            );
            report.extend(&all_atom);
        }

        Ok(report)
    }

    /// All-atom scores for a single example.
    ///
    /// The CA-restricted TM score reuses the alignment already fitted on the
    /// alpha carbons; everything else aligns or compares over every valid
    /// atom slot.
    fn all_atom_scores(
        &self,
        predicted: &[[f64; 3]],
        reference: &[[f64; 3]],
        mask: &[bool],
        atoms: usize,
        ca_fit: Option<&Superposition>,
        ca_view: &CaView,
    ) -> MetricsReport {
        let mut out = MetricsReport::new();

        let fit = superimpose(reference, predicted, mask);
        out.insert("rmsd_aa", fit.as_ref().map_or(f64::NAN, |sp| sp.rmsd));

        let valid: Vec<usize> = (0..mask.len()).filter(|&i| mask[i]).collect();
        let ref_unpadded: Vec<[f64; 3]> = valid.iter().map(|&i| reference[i]).collect();
        let pred_unpadded: Vec<[f64; 3]> = valid.iter().map(|&i| predicted[i]).collect();

        match &fit {
            Some(sp) => {
                let aligned_unpadded: Vec<[f64; 3]> =
                    valid.iter().map(|&i| sp.aligned[i]).collect();
                out.insert("gdcall_aa", gdc_all(&aligned_unpadded, &ref_unpadded));
                out.insert("tmscore_aa", tm_score(&aligned_unpadded, &ref_unpadded));
            }
            None => {
                out.insert("gdcall_aa", f64::NAN);
                out.insert("tmscore_aa", f64::NAN);
            }
        }

        let tmscore_ca = match ca_fit {
            Some(sp) => {
                let ca_valid: Vec<usize> =
                    (0..ca_view.mask.len()).filter(|&i| ca_view.mask[i]).collect();
                let aligned: Vec<[f64; 3]> = ca_valid.iter().map(|&i| sp.aligned[i]).collect();
                let reference_ca: Vec<[f64; 3]> =
                    ca_valid.iter().map(|&i| ca_view.reference[i]).collect();
                tm_score(&aligned, &reference_ca)
            }
            None => f64::NAN,
        };
        out.insert("tmscore_ca", tmscore_ca);

        out.insert("drmsd_aa", drmsd(&pred_unpadded, &ref_unpadded, None));

        out.insert(
            "lddt_aa",
            lddt(
                predicted,
                reference,
                mask,
                self.config.inclusion_radius,
                PairExclusion::SameResidue {
                    atoms_per_residue: atoms,
                },
            ),
        );

        let all_valid = vec![true; pred_unpadded.len()];
        out.insert(
            "lddtquasi_aa",
            lddt(
                &pred_unpadded,
                &ref_unpadded,
                &all_valid,
                self.config.inclusion_radius,
                PairExclusion::SelfOnly,
            ),
        );

        out
    }
}

/// Validate coordinate and mask shapes, returning `(batch, residues, atoms)`
fn check_shapes(predicted: &Tensor, reference: &Tensor, mask: &Tensor) -> Result<(usize, usize, usize)> {
    if predicted.dims() != reference.dims() {
        return Err(Error::shape(format!(
            "predicted coordinates {:?} and reference {:?} differ in shape",
            predicted.dims(),
            reference.dims()
        )));
    }

    let (batch, residues, atoms, coords) = predicted.dims4().map_err(|_| {
        Error::shape(format!(
            "coordinates must be [batch, residues, atoms, 3], got {:?}",
            predicted.dims()
        ))
    })?;
    if coords != 3 {
        return Err(Error::shape(format!(
            "coordinate vectors must have 3 components, got {coords}"
        )));
    }
    if atoms <= CA_IDX {
        return Err(Error::shape(format!(
            "atom dimension {atoms} has no alpha-carbon slot"
        )));
    }

    let mask_dims = mask.dims3().map_err(|_| {
        Error::shape(format!(
            "mask must be [batch, residues, atoms], got {:?}",
            mask.dims()
        ))
    })?;
    if mask_dims != (batch, residues, atoms) {
        return Err(Error::shape(format!(
            "mask shape {:?} does not match coordinates {:?}",
            mask.dims(),
            predicted.dims()
        )));
    }

    Ok((batch, residues, atoms))
}

/// Flatten a coordinate tensor into per-example point lists, residue-major
fn tensor_to_points(tensor: &Tensor) -> Result<Vec<Vec<[f64; 3]>>> {
    let (batch, residues, atoms, _) = tensor.dims4()?;
    let flat: Vec<f64> = tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1()?;

    let per_example = residues * atoms;
    let mut out = Vec::with_capacity(batch);
    for e in 0..batch {
        let mut points = Vec::with_capacity(per_example);
        for i in 0..per_example {
            let base = (e * per_example + i) * 3;
            points.push([flat[base], flat[base + 1], flat[base + 2]]);
        }
        out.push(points);
    }
    Ok(out)
}

/// Flatten a float mask into per-example boolean lists
fn mask_to_bools(tensor: &Tensor, threshold: f64) -> Result<Vec<Vec<bool>>> {
    let (batch, residues, atoms) = tensor.dims3()?;
    let flat: Vec<f64> = tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1()?;

    let per_example = residues * atoms;
    let mut out = Vec::with_capacity(batch);
    for e in 0..batch {
        let bools = flat[e * per_example..(e + 1) * per_example]
            .iter()
            .map(|&v| v > threshold)
            .collect();
        out.push(bools);
    }
    Ok(out)
}

/// Alpha-carbon coordinates of a residue-major flattened atom list
fn ca_slots(points: &[[f64; 3]], atoms: usize) -> Vec<[f64; 3]> {
    points.iter().skip(CA_IDX).step_by(atoms).copied().collect()
}

/// Alpha-carbon mask entries of a residue-major flattened mask
fn ca_mask_slots(mask: &[bool], atoms: usize) -> Vec<bool> {
    mask.iter().skip(CA_IDX).step_by(atoms).copied().collect()
}

/// Plain mean; NaN entries propagate into the result
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}
