use crate::error::AccessError;
use crate::layout::TypeTag;

/// Row/column extents of a field. Scalars are `1 x 1`, vectors `n x 1`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Dims {
    pub rows: u32,
    pub cols: u32,
}

impl Dims {
    pub const SCALAR: Dims = Dims { rows: 1, cols: 1 };

    /// Extents are clamped to at least one.
    pub fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows: rows.max(1),
            cols: cols.max(1),
        }
    }

    pub fn vector(len: u32) -> Self {
        Self::new(len, 1)
    }

    #[inline(always)]
    pub fn count(self) -> usize {
        self.rows as usize * self.cols as usize
    }

    #[inline(always)]
    pub fn is_scalar(self) -> bool {
        self.rows == 1 && self.cols == 1
    }
}

impl Default for Dims {
    fn default() -> Self {
        Dims::SCALAR
    }
}

/// Static metadata of one field inside a block: where it lives, what it
/// holds and how many elements it spans.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    name: String,
    offset: usize,
    tag: TypeTag,
    count: usize,
    dims: Dims,
    description: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, offset: usize, tag: TypeTag, dims: Dims) -> Self {
        Self {
            name: name.into(),
            offset,
            tag,
            count: dims.count(),
            dims,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte offset from the start of the owning block.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline(always)]
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[inline(always)]
    pub fn byte_len(&self) -> usize {
        self.count * self.tag.size()
    }

    /// One past the last byte of the field.
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.offset + self.byte_len()
    }

    /// Byte offset of element `index`, checked against the element count.
    #[inline]
    pub fn element_offset(&self, index: usize) -> Result<usize, AccessError> {
        if index >= self.count {
            return Err(AccessError::OutOfRange {
                index,
                count: self.count,
            });
        }
        Ok(self.offset + index * self.tag.size())
    }
}

/// Declaration of a field before offsets are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub category: Option<String>,
    pub name: String,
    pub tag: TypeTag,
    pub dims: Dims,
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, tag: TypeTag, dims: Dims) -> Self {
        Self {
            category: None,
            name: name.into(),
            tag,
            dims,
            description: None,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// `category/name`, or just `name` for uncategorised fields.
    pub fn path(&self) -> String {
        match &self.category {
            Some(cat) => format!("{cat}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_clamp_to_one() {
        assert_eq!(Dims::new(0, 0), Dims::SCALAR);
        assert_eq!(Dims::new(4, 4).count(), 16);
        assert!(Dims::vector(1).is_scalar());
    }

    #[test]
    fn element_offset_is_bounds_checked() {
        let desc = FieldDescriptor::new("vec", 8, TypeTag::Float64, Dims::vector(4));
        assert_eq!(desc.element_offset(0), Ok(8));
        assert_eq!(desc.element_offset(3), Ok(32));
        assert_eq!(desc.end(), 40);
        assert_eq!(
            desc.element_offset(4),
            Err(AccessError::OutOfRange { index: 4, count: 4 })
        );
    }

    #[test]
    fn spec_path_uses_category() {
        let spec = FieldSpec::new("gain", TypeTag::Float64, Dims::SCALAR).in_category("ctl");
        assert_eq!(spec.path(), "ctl/gain");
    }
}
