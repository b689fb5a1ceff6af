//! Axis permutations ("layouts") and their enumeration.
//!
//! A layout is a permutation of `[0, r)` describing the on-disk order of a
//! rank-`r` tensor's axes. Size-1 axes are pinned: a permutation used with a
//! shape must map every unit-extent position to itself, so only the non-unit
//! axes move.
//!
//! Layouts also have a canonical textual form used as JSON map keys
//! (`"((0, 1), (1, 0))"`), produced by [`format_layouts`] and read back by
//! the safe parsers in this module.

use serde::{Deserialize, Serialize};

/// A permutation of tensor axes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Layout(pub Vec<usize>);

impl Layout {
    /// The identity layout for the given rank.
    pub fn identity(rank: usize) -> Self {
        Layout((0..rank).collect())
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// True iff this is the identity permutation.
    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, &p)| i == p)
    }

    /// `x`-joined dims, used in cloned-executable names: `(1,0)` → `"1x0"`.
    pub fn signature(&self) -> String {
        self.0
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("x")
    }

    /// Python-tuple repr: `()`, `(0,)`, `(0, 1)`.
    pub fn repr(&self) -> String {
        match self.0.len() {
            0 => "()".to_string(),
            1 => format!("({},)", self.0[0]),
            _ => format!(
                "({})",
                self.0
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

impl std::fmt::Display for Layout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.repr())
    }
}

/// The `x`-and-`_` signature of a full per-arg layout tuple, used to suffix
/// cloned executables: `((1,0),(1,0))` → `"1x0_1x0"`.
pub fn layouts_signature(layouts: &[Layout]) -> String {
    layouts
        .iter()
        .map(Layout::signature)
        .collect::<Vec<_>>()
        .join("_")
}

/// Python-tuple repr of a per-arg layout tuple: `((0, 1), (1, 0))`.
pub fn format_layouts(layouts: &[Layout]) -> String {
    match layouts.len() {
        0 => "()".to_string(),
        1 => format!("({},)", layouts[0].repr()),
        _ => format!(
            "({})",
            layouts
                .iter()
                .map(Layout::repr)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Error produced by the repr-key parsers.
#[derive(Debug, thiserror::Error)]
#[error("malformed layout key `{key}`: {reason}")]
pub struct KeyParseError {
    pub key: String,
    pub reason: String,
}

fn key_error(key: &str, reason: impl Into<String>) -> KeyParseError {
    KeyParseError {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// Parse a single-layout repr (`"(0, 1)"`). Safe, non-evaluating.
pub fn parse_layout(text: &str) -> Result<Layout, KeyParseError> {
    let inner = strip_parens(text).ok_or_else(|| key_error(text, "expected parentheses"))?;
    let mut dims = Vec::new();
    for piece in inner.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let dim: usize = piece
            .parse()
            .map_err(|_| key_error(text, format!("`{piece}` is not an axis index")))?;
        dims.push(dim);
    }
    Ok(Layout(dims))
}

/// Parse a layout-tuple repr (`"((0, 1), (1, 0))"`). Safe, non-evaluating.
pub fn parse_layouts(text: &str) -> Result<Vec<Layout>, KeyParseError> {
    let inner = strip_parens(text).ok_or_else(|| key_error(text, "expected parentheses"))?;
    let mut layouts = Vec::new();
    let mut rest = inner.trim_start();
    while !rest.is_empty() {
        if !rest.starts_with('(') {
            return Err(key_error(text, "expected `(` starting an inner tuple"));
        }
        let close = rest
            .find(')')
            .ok_or_else(|| key_error(text, "unterminated inner tuple"))?;
        layouts.push(parse_layout(&rest[..=close])?);
        rest = rest[close + 1..]
            .trim_start()
            .trim_start_matches(',')
            .trim_start();
    }
    Ok(layouts)
}

fn strip_parens(text: &str) -> Option<&str> {
    let text = text.trim();
    let inner = text.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner)
}

/// Enumerate every permutation of `[0, rank)` that maps each unit-extent
/// position of `shape` to itself. Deterministic order; exactly `free!`
/// layouts where `free` counts the non-unit axes.
pub fn permute_shape(shape: &[u64]) -> impl Iterator<Item = Layout> {
    let rank = shape.len();
    let free: Vec<usize> = (0..rank).filter(|&i| shape[i] != 1).collect();
    let mut results = Vec::new();
    let mut values = free.clone();
    permute_into(&mut values, 0, &free, rank, &mut results);
    results.into_iter()
}

fn permute_into(
    values: &mut Vec<usize>,
    at: usize,
    free: &[usize],
    rank: usize,
    out: &mut Vec<Layout>,
) {
    if at == values.len() {
        let mut perm: Vec<usize> = (0..rank).collect();
        for (slot, &value) in free.iter().zip(values.iter()) {
            perm[*slot] = value;
        }
        out.push(Layout(perm));
        return;
    }
    for pick in at..values.len() {
        values.swap(at, pick);
        permute_into(values, at + 1, free, rank, out);
        values.swap(at, pick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_identity() {
        assert!(Layout::identity(3).is_identity());
        assert!(Layout::identity(0).is_identity());
        assert!(!Layout(vec![1, 0]).is_identity());
    }

    #[test]
    fn permute_shape_full_rank() {
        let layouts: Vec<_> = permute_shape(&[4, 3, 2]).collect();
        assert_eq!(layouts.len(), 6);
        let distinct: std::collections::HashSet<_> = layouts.iter().cloned().collect();
        assert_eq!(distinct.len(), 6);
    }

    #[test]
    fn permute_shape_pins_unit_axes() {
        let layouts: Vec<_> = permute_shape(&[1, 4, 1, 3]).collect();
        assert_eq!(layouts.len(), 2);
        assert!(layouts.contains(&Layout(vec![0, 1, 2, 3])));
        assert!(layouts.contains(&Layout(vec![0, 3, 2, 1])));
    }

    #[test]
    fn permute_shape_degenerate() {
        let layouts: Vec<_> = permute_shape(&[]).collect();
        assert_eq!(layouts, vec![Layout(vec![])]);
        let layouts: Vec<_> = permute_shape(&[1]).collect();
        assert_eq!(layouts, vec![Layout(vec![0])]);
        let layouts: Vec<_> = permute_shape(&[7]).collect();
        assert_eq!(layouts, vec![Layout(vec![0])]);
    }

    #[test]
    fn repr_forms() {
        assert_eq!(Layout(vec![]).repr(), "()");
        assert_eq!(Layout(vec![0]).repr(), "(0,)");
        assert_eq!(Layout(vec![0, 1]).repr(), "(0, 1)");
        assert_eq!(format_layouts(&[]), "()");
        assert_eq!(format_layouts(&[Layout(vec![0, 1])]), "((0, 1),)");
        assert_eq!(
            format_layouts(&[Layout(vec![0, 1]), Layout(vec![1, 0])]),
            "((0, 1), (1, 0))"
        );
    }

    #[test]
    fn repr_round_trip() {
        for layouts in [
            vec![],
            vec![Layout(vec![])],
            vec![Layout(vec![0])],
            vec![Layout(vec![0, 1]), Layout(vec![1, 0]), Layout(vec![2, 0, 1])],
        ] {
            let text = format_layouts(&layouts);
            assert_eq!(parse_layouts(&text).unwrap(), layouts, "key {text}");
        }
    }

    #[test]
    fn parse_rejects_junk() {
        assert!(parse_layouts("((0, 1)").is_err());
        assert!(parse_layouts("((a, b),)").is_err());
        assert!(parse_layout("0, 1").is_err());
    }

    #[test]
    fn signatures() {
        assert_eq!(Layout(vec![1, 0]).signature(), "1x0");
        assert_eq!(
            layouts_signature(&[Layout(vec![1, 0]), Layout(vec![0, 1])]),
            "1x0_0x1"
        );
        assert_eq!(layouts_signature(&[Layout(vec![])]), "");
    }
}
