//! Fixed atom-type vocabulary for the 37-slot per-residue atom layout

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Atom-type names in slot order. Every residue reserves one coordinate slot
/// per name; slots absent from a residue type are masked out.
pub const ATOM_TYPES: [&str; 37] = [
    "N", "CA", "C", "CB", "O", "CG", "CG1", "CG2", "OG", "OG1", "SG", "CD", "CD1", "CD2", "ND1",
    "ND2", "OD1", "OD2", "SD", "CE", "CE1", "CE2", "CE3", "NE", "NE1", "NE2", "NH1", "NH2", "NZ",
    "OE1", "OE2", "OH", "SE", "CZ", "CZ2", "CZ3", "OXT",
];

/// Number of atom slots per residue
pub const ATOM_TYPE_COUNT: usize = ATOM_TYPES.len();

/// Slot index of the alpha carbon
pub const CA_IDX: usize = 1;

static ATOM_ORDER: Lazy<HashMap<&'static str, usize>> =
    Lazy::new(|| ATOM_TYPES.iter().enumerate().map(|(i, n)| (*n, i)).collect());

/// Slot index for an atom-type name
pub fn atom_order(name: &str) -> Option<usize> {
    ATOM_ORDER.get(name).copied()
}
