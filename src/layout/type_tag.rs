use crate::error::AccessError;

/// Primitive element types a field may be declared with.
///
/// The discriminants are the raw tags used in descriptor tables.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum TypeTag {
    Float64 = 0,
    Int32 = 1,
}

impl TypeTag {
    pub const ALL: [TypeTag; 2] = [TypeTag::Float64, TypeTag::Int32];

    /// Size of one element in bytes.
    #[inline(always)]
    pub const fn size(self) -> usize {
        match self {
            TypeTag::Float64 => 8,
            TypeTag::Int32 => 4,
        }
    }

    /// Natural alignment of one element in bytes.
    #[inline(always)]
    pub const fn align(self) -> usize {
        self.size()
    }

    #[inline(always)]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn from_raw(raw: u32) -> Result<Self, AccessError> {
        match raw {
            0 => Ok(TypeTag::Float64),
            1 => Ok(TypeTag::Int32),
            tag => Err(AccessError::UnsupportedType { tag }),
        }
    }

    /// Parses the `type` key of a model config entry; `"i32"` selects
    /// [`TypeTag::Int32`], anything else is [`TypeTag::Float64`].
    pub fn from_config(name: Option<&str>) -> Self {
        match name {
            Some("i32") => TypeTag::Int32,
            _ => TypeTag::Float64,
        }
    }
}

impl TryFrom<u32> for TypeTag {
    type Error = AccessError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        TypeTag::from_raw(raw)
    }
}

impl From<TypeTag> for u32 {
    fn from(tag: TypeTag) -> Self {
        tag.raw()
    }
}
