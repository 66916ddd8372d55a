//! Typed element access into raw blocks, driven by field descriptors.
//!
//! Values cross this boundary as `f64` regardless of storage type: writes
//! narrow to the declared representation, reads widen back.

use crate::error::AccessError;
use crate::layout::{FieldDescriptor, TypeTag};

/// Quiet NaN returned by [`get_by_type`] when the read is invalid.
pub const INVALID_READ: f64 = f64::from_bits(u64::MAX);

/// Validates the raw tag against the field and the element against both the
/// element count and the buffer length. Returns the resolved tag and the
/// element's byte offset.
#[inline(always)]
fn locate(
    buf_len: usize,
    field: &FieldDescriptor,
    index: usize,
    raw_tag: u32,
) -> Result<(TypeTag, usize), AccessError> {
    let tag = TypeTag::from_raw(raw_tag)?;
    if tag != field.tag() {
        return Err(AccessError::UnsupportedType { tag: raw_tag });
    }
    let at = field.element_offset(index)?;
    if at + tag.size() > buf_len {
        return Err(AccessError::OutOfRange {
            index,
            count: field.count(),
        });
    }
    Ok((tag, at))
}

/// Writes `value` into element `index` of `field` inside `buf`.
///
/// `Float64` stores exactly; `Int32` truncates toward zero and saturates at
/// the `i32` bounds (NaN stores 0).
#[inline]
pub fn set_by_type(
    buf: &mut [u8],
    field: &FieldDescriptor,
    index: usize,
    value: f64,
    tag: u32,
) -> Result<(), AccessError> {
    let (tag, at) = locate(buf.len(), field, index, tag)?;
    let dst = &mut buf[at..at + tag.size()];
    match tag {
        TypeTag::Float64 => dst.copy_from_slice(bytemuck::bytes_of(&value)),
        TypeTag::Int32 => dst.copy_from_slice(bytemuck::bytes_of(&(value as i32))),
    }
    Ok(())
}

/// Reads element `index` of `field` from `buf`, widened to `f64`.
#[inline]
pub fn try_get_by_type(
    buf: &[u8],
    field: &FieldDescriptor,
    index: usize,
    tag: u32,
) -> Result<f64, AccessError> {
    let (tag, at) = locate(buf.len(), field, index, tag)?;
    let src = &buf[at..at + tag.size()];
    Ok(match tag {
        TypeTag::Float64 => bytemuck::pod_read_unaligned::<f64>(src),
        TypeTag::Int32 => bytemuck::pod_read_unaligned::<i32>(src) as f64,
    })
}

/// Hot-path read: returns [`INVALID_READ`] instead of an error.
///
/// A stored NaN is indistinguishable from a failed read here; callers that
/// care use [`try_get_by_type`].
#[inline]
pub fn get_by_type(buf: &[u8], field: &FieldDescriptor, index: usize, tag: u32) -> f64 {
    try_get_by_type(buf, field, index, tag).unwrap_or(INVALID_READ)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::layout::{BlockLayout, Dims};

    fn layout() -> BlockLayout {
        BlockLayout::from_descriptors(
            vec![
                FieldDescriptor::new("n", 0, TypeTag::Int32, Dims::SCALAR),
                FieldDescriptor::new("v", 8, TypeTag::Float64, Dims::vector(4)),
            ],
            40,
        )
        .unwrap()
    }

    #[test]
    fn int_and_float_fields() {
        let layout = layout();
        let mut block = Block::for_layout(&layout);
        let n = layout.field("n").unwrap();
        let v = layout.field("v").unwrap();

        set_by_type(block.as_bytes_mut(), n, 0, 7.0, 1).unwrap();
        assert_eq!(get_by_type(block.as_bytes(), n, 0, 1), 7.0);

        set_by_type(block.as_bytes_mut(), v, 2, 3.5, 0).unwrap();
        assert_eq!(get_by_type(block.as_bytes(), v, 2, 0), 3.5);
        assert_eq!(get_by_type(block.as_bytes(), v, 1, 0), 0.0);
    }

    #[test]
    fn int_storage_truncates() {
        let layout = layout();
        let mut block = Block::for_layout(&layout);
        let n = layout.field("n").unwrap();

        block.set(n, 0, -2.9).unwrap();
        assert_eq!(block.get(n, 0), Ok(-2.0));
        block.set(n, 0, 1e12).unwrap();
        assert_eq!(block.get(n, 0), Ok(i32::MAX as f64));
        block.set(n, 0, f64::NAN).unwrap();
        assert_eq!(block.get(n, 0), Ok(0.0));
    }

    #[test]
    fn unknown_tag_reads_nan() {
        let layout = layout();
        let mut block = Block::for_layout(&layout);
        let v = layout.field("v").unwrap();

        assert!(get_by_type(block.as_bytes(), v, 0, 2).is_nan());
        assert_eq!(
            set_by_type(block.as_bytes_mut(), v, 0, 1.0, 9),
            Err(AccessError::UnsupportedType { tag: 9 })
        );
    }

    #[test]
    fn tag_must_match_declaration() {
        let layout = layout();
        let mut block = Block::for_layout(&layout);
        let n = layout.field("n").unwrap();

        assert_eq!(
            set_by_type(block.as_bytes_mut(), n, 0, 1.0, 0),
            Err(AccessError::UnsupportedType { tag: 0 })
        );
        assert!(get_by_type(block.as_bytes(), n, 0, 0).is_nan());
    }

    #[test]
    fn index_past_count_never_touches_neighbours() {
        let layout = layout();
        let mut block = Block::for_layout(&layout);
        let n = layout.field("n").unwrap();
        let v = layout.field("v").unwrap();

        // element 1 of `n` would alias the padding before `v`
        assert_eq!(
            set_by_type(block.as_bytes_mut(), n, 1, 5.0, 1),
            Err(AccessError::OutOfRange { index: 1, count: 1 })
        );
        assert_eq!(
            try_get_by_type(block.as_bytes(), v, 4, 0),
            Err(AccessError::OutOfRange { index: 4, count: 4 })
        );
        assert!(block.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn short_buffer_is_out_of_range() {
        let v = FieldDescriptor::new("v", 8, TypeTag::Float64, Dims::vector(4));
        let mut short = vec![0u8; 24];
        assert_eq!(
            set_by_type(&mut short, &v, 2, 1.0, 0),
            Err(AccessError::OutOfRange { index: 2, count: 4 })
        );
        assert!(set_by_type(&mut short, &v, 1, 1.0, 0).is_ok());
    }

    #[test]
    fn stored_nan_is_distinguishable_out_of_band() {
        let layout = layout();
        let mut block = Block::for_layout(&layout);
        let v = layout.field("v").unwrap();
        block.set(v, 0, f64::NAN).unwrap();
        assert!(get_by_type(block.as_bytes(), v, 0, 0).is_nan());
        assert!(try_get_by_type(block.as_bytes(), v, 0, 0).unwrap().is_nan());
        assert!(try_get_by_type(block.as_bytes(), v, 0, 5).is_err());
    }
}
