use crate::access::{INVALID_READ, set_by_type, try_get_by_type};
use crate::error::AccessError;
use crate::layout::{BlockLayout, FieldDescriptor};
use std::fmt;

/// Fixed-size byte region holding one parameter or signal set.
///
/// Backed by `u64` words so the start is 8-byte aligned, which is what the
/// widest element type needs.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Block {
    words: Box<[u64]>,
    len: usize,
}

impl Block {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)].into_boxed_slice(),
            len,
        }
    }

    /// Zeroed block sized for `layout`.
    pub fn for_layout(layout: &BlockLayout) -> Self {
        Self::zeroed(layout.size())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut block = Self::zeroed(bytes.len());
        block.as_bytes_mut().copy_from_slice(bytes);
        block
    }

    /// Size in bytes.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    #[inline(always)]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// Overwrites this block with `other`; both must have the same size.
    pub fn copy_from(&mut self, other: &Block) -> Result<(), AccessError> {
        if other.len != self.len {
            return Err(AccessError::layout(format!(
                "block of {} bytes cannot be copied into {} bytes",
                other.len, self.len
            )));
        }
        self.words.copy_from_slice(&other.words);
        Ok(())
    }

    /// Reads element `index` of `field` using the field's declared type.
    #[inline]
    pub fn get(&self, field: &FieldDescriptor, index: usize) -> Result<f64, AccessError> {
        try_get_by_type(self.as_bytes(), field, index, field.tag().raw())
    }

    /// Like [`Block::get`] but returns the NaN sentinel on failure.
    #[inline]
    pub fn get_or_nan(&self, field: &FieldDescriptor, index: usize) -> f64 {
        self.get(field, index).unwrap_or(INVALID_READ)
    }

    /// Writes element `index` of `field` using the field's declared type.
    #[inline]
    pub fn set(
        &mut self,
        field: &FieldDescriptor,
        index: usize,
        value: f64,
    ) -> Result<(), AccessError> {
        set_by_type(self.as_bytes_mut(), field, index, value, field.tag().raw())
    }

    /// Writes all elements of `field` from `values` (row-major).
    pub fn set_all(&mut self, field: &FieldDescriptor, values: &[f64]) -> Result<(), AccessError> {
        if values.len() != field.count() {
            return Err(AccessError::OutOfRange {
                index: values.len(),
                count: field.count(),
            });
        }
        for (i, v) in values.iter().enumerate() {
            self.set(field, i, *v)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{Dims, TypeTag};

    #[test]
    fn byte_view_has_exact_length() {
        let mut block = Block::zeroed(12);
        assert_eq!(block.len(), 12);
        assert_eq!(block.as_bytes().len(), 12);
        block.as_bytes_mut()[11] = 0xAB;
        assert_eq!(Block::from_bytes(block.as_bytes()), block);
    }

    #[test]
    fn copy_requires_equal_size() {
        let mut a = Block::zeroed(16);
        let b = Block::zeroed(8);
        assert!(matches!(a.copy_from(&b), Err(AccessError::LayoutMismatch(_))));
    }

    #[test]
    fn set_all_checks_length() {
        let field = FieldDescriptor::new("v", 0, TypeTag::Float64, Dims::vector(3));
        let mut block = Block::zeroed(24);
        block.set_all(&field, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(block.get(&field, 2), Ok(3.0));
        assert!(block.set_all(&field, &[1.0]).is_err());
    }
}
