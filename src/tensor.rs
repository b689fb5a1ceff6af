//! Row-major byte transposition for stored tensors.
//!
//! The generator rewrites a global's raw initial value so the data sits in
//! the order the relabeled kernel expects: the buffer is reinterpreted as an
//! ndarray of the declared shape, transposed by the chosen layout, and
//! packed back to bytes. Boolean tensors are 1-bit packed, LSB first within
//! each byte.

use crate::ir::ElemType;
use crate::layout::Layout;

#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    #[error("initial value holds {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },

    #[error("layout rank {layout} does not match tensor rank {rank}")]
    Rank { layout: usize, rank: usize },
}

/// Transpose a row-major byte buffer of the given shape by `perm`, so that
/// `out[i0, .., ik] = in[j]` with `j[perm[k]] = i[k]` — the axis-permutation
/// semantics of an ndarray transpose.
pub fn transpose_bytes(
    bytes: &[u8],
    shape: &[u64],
    elem: ElemType,
    perm: &Layout,
) -> Result<Vec<u8>, TensorError> {
    if perm.rank() != shape.len() {
        return Err(TensorError::Rank {
            layout: perm.rank(),
            rank: shape.len(),
        });
    }
    let elems: usize = shape.iter().product::<u64>() as usize;
    if elem.is_bit_packed() {
        let expected = (elems + 7) / 8;
        if bytes.len() != expected {
            return Err(TensorError::Length {
                expected,
                actual: bytes.len(),
            });
        }
        let mut out = vec![0u8; expected];
        for (to, from) in index_map(shape, perm) {
            if bytes[from / 8] >> (from % 8) & 1 == 1 {
                out[to / 8] |= 1 << (to % 8);
            }
        }
        Ok(out)
    } else {
        let width = elem.byte_width();
        let expected = elems * width;
        if bytes.len() != expected {
            return Err(TensorError::Length {
                expected,
                actual: bytes.len(),
            });
        }
        let mut out = vec![0u8; expected];
        for (to, from) in index_map(shape, perm) {
            out[to * width..(to + 1) * width].copy_from_slice(&bytes[from * width..(from + 1) * width]);
        }
        Ok(out)
    }
}

/// Iterate `(destination, source)` element indices of the transpose: walk
/// the output in row-major order, mapping each position back through the
/// permuted input strides.
fn index_map(shape: &[u64], perm: &Layout) -> impl Iterator<Item = (usize, usize)> {
    let rank = shape.len();
    let mut in_strides = vec![1usize; rank];
    for axis in (0..rank.saturating_sub(1)).rev() {
        in_strides[axis] = in_strides[axis + 1] * shape[axis + 1] as usize;
    }
    let out_shape: Vec<usize> = perm.as_slice().iter().map(|&p| shape[p] as usize).collect();
    let source_strides: Vec<usize> = perm.as_slice().iter().map(|&p| in_strides[p]).collect();
    let total: usize = out_shape.iter().product();

    let mut index = vec![0usize; rank];
    let mut produced = 0usize;
    std::iter::from_fn(move || {
        if produced == total {
            return None;
        }
        let from: usize = index
            .iter()
            .zip(&source_strides)
            .map(|(i, s)| i * s)
            .sum();
        let item = (produced, from);
        produced += 1;
        for axis in (0..rank).rev() {
            index[axis] += 1;
            if index[axis] < out_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
        item.into()
    })
}
