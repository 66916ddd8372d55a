use crate::error::AccessError;
use crate::layout::{FieldDescriptor, FieldSpec, group_by_category};
use ahash::AHashMap;

#[inline(always)]
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// Ordered descriptor table covering one block (parameters or signals).
///
/// The table is the single source of truth for where each field lives;
/// it is built once at load time and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct BlockLayout {
    prefix: Option<String>,
    fields: Vec<FieldDescriptor>,
    size: usize,
    index: AHashMap<String, usize>,
}

impl BlockLayout {
    /// Assigns C-compatible offsets to `specs`.
    ///
    /// Fields keep declaration order within their category, categories are
    /// laid out in order of first appearance and each category forms a
    /// nested record aligned to its widest member. Descriptor names are
    /// `prefix/category/name` when a prefix is given.
    pub fn from_specs(prefix: Option<&str>, specs: &[FieldSpec]) -> Result<Self, AccessError> {
        let mut fields = Vec::with_capacity(specs.len());
        let mut cursor = 0usize;
        let mut max_align = 1usize;

        for (category, group) in group_by_category(specs) {
            // uncategorised fields sit directly in the outer record
            let group_align = match category {
                None => 1,
                Some(_) => group.iter().map(|s| s.tag.align()).max().unwrap_or(1),
            };
            cursor = align_up(cursor, group_align);
            let base = cursor;
            let mut inner = 0usize;

            for spec in group {
                inner = align_up(base + inner, spec.tag.align()) - base;
                let name = match prefix {
                    Some(p) => format!("{p}/{}", spec.path()),
                    None => spec.path(),
                };
                let mut desc = FieldDescriptor::new(name, base + inner, spec.tag, spec.dims);
                if let Some(d) = &spec.description {
                    desc = desc.with_description(d.clone());
                }
                inner += desc.byte_len();
                max_align = max_align.max(spec.tag.align());
                fields.push(desc);
            }

            cursor = base + align_up(inner, group_align);
        }

        let size = align_up(cursor, max_align);
        Self::build(prefix.map(str::to_owned), fields, size)
    }

    /// Accepts an explicit descriptor table for a block of `size` bytes.
    ///
    /// Every field must be aligned for its type, lie within the block and
    /// not overlap any other field.
    pub fn from_descriptors(
        fields: Vec<FieldDescriptor>,
        size: usize,
    ) -> Result<Self, AccessError> {
        Self::build(None, fields, size)
    }

    fn build(
        prefix: Option<String>,
        fields: Vec<FieldDescriptor>,
        size: usize,
    ) -> Result<Self, AccessError> {
        let mut index = AHashMap::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            if f.offset() % f.tag().align() != 0 {
                return Err(AccessError::layout(format!(
                    "field {} at offset {} is not aligned to {}",
                    f.name(),
                    f.offset(),
                    f.tag().align()
                )));
            }
            if f.end() > size {
                return Err(AccessError::layout(format!(
                    "field {} ends at {} beyond block size {}",
                    f.name(),
                    f.end(),
                    size
                )));
            }
            if index.insert(f.name().to_owned(), i).is_some() {
                return Err(AccessError::layout(format!(
                    "duplicate field name {}",
                    f.name()
                )));
            }
        }

        let mut by_offset: Vec<&FieldDescriptor> = fields.iter().collect();
        by_offset.sort_by_key(|f| f.offset());
        for pair in by_offset.windows(2) {
            if pair[0].end() > pair[1].offset() {
                return Err(AccessError::layout(format!(
                    "fields {} and {} overlap",
                    pair[0].name(),
                    pair[1].name()
                )));
            }
        }

        Ok(Self {
            prefix,
            fields,
            size,
            index,
        })
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Total block size in bytes, including padding.
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[inline(always)]
    pub fn descriptor(&self, index: usize) -> Option<&FieldDescriptor> {
        self.fields.get(index)
    }

    /// Resolves a descriptor index by full name, or by name relative to the
    /// layout prefix.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        if let Some(&i) = self.index.get(name) {
            return Some(i);
        }
        let prefix = self.prefix.as_deref()?;
        self.index.get(&format!("{prefix}/{name}")).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    /// Flattened `(rows, cols)` pairs in descriptor order.
    pub fn dim_list(&self) -> Vec<u32> {
        self.fields
            .iter()
            .flat_map(|f| [f.dims().rows, f.dims().cols])
            .collect()
    }

    /// `(element size, element count, raw type)` rows; the first row is
    /// `(block size, 0, 0)`.
    pub fn size_table(&self) -> Vec<(usize, usize, u32)> {
        let mut rows = Vec::with_capacity(self.fields.len() + 1);
        rows.push((self.size, 0, 0));
        rows.extend(
            self.fields
                .iter()
                .map(|f| (f.tag().size(), f.count(), f.tag().raw())),
        );
        rows
    }
}
