use crate::error::AccessError;
use crate::layout::{Dims, FieldSpec, TypeTag, group_by_category};
use ahash::AHashMap;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Direction {
    In = 0,
    Out = 1,
}

/// One named region of a flat port buffer. Offsets count `f64` elements.
#[derive(Debug, Clone, PartialEq)]
pub struct PortDescriptor {
    name: String,
    direction: Direction,
    dims: Dims,
    offset: usize,
}

impl PortDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline(always)]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.dims.count()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len()
    }
}

/// Partitioning of one flat buffer (all inports or all outports).
#[derive(Debug, Clone, Default)]
pub struct PortSet {
    ports: Vec<PortDescriptor>,
    len: usize,
    index: AHashMap<String, usize>,
}

impl PortSet {
    fn from_specs(direction: Direction, specs: &[FieldSpec]) -> Result<Self, AccessError> {
        let mut ports = Vec::with_capacity(specs.len());
        let mut index = AHashMap::with_capacity(specs.len());
        let mut cursor = 0usize;

        for (_, group) in group_by_category(specs) {
            for spec in group {
                if spec.tag != TypeTag::Float64 {
                    return Err(AccessError::UnsupportedType {
                        tag: spec.tag.raw(),
                    });
                }
                let name = spec.path();
                if index.insert(name.clone(), ports.len()).is_some() {
                    return Err(AccessError::layout(format!("duplicate port name {name}")));
                }
                ports.push(PortDescriptor {
                    name,
                    direction,
                    dims: spec.dims,
                    offset: cursor,
                });
                cursor += spec.dims.count();
            }
        }

        Ok(Self {
            ports,
            len: cursor,
            index,
        })
    }

    /// Number of `f64` elements the flat buffer must hold.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    #[inline(always)]
    pub fn port(&self, index: usize) -> Option<&PortDescriptor> {
        self.ports.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn find(&self, name: &str) -> Option<&PortDescriptor> {
        self.index_of(name).map(|i| &self.ports[i])
    }

    /// Checks a flat buffer length against the declared extents.
    pub fn validate(&self, buf_len: usize) -> Result<(), AccessError> {
        if buf_len != self.len {
            return Err(AccessError::layout(format!(
                "port buffer holds {buf_len} values, layout declares {}",
                self.len
            )));
        }
        Ok(())
    }
}

/// Static inbound/outbound port partitioning of a model.
#[derive(Debug, Clone, Default)]
pub struct PortLayout {
    inbound: PortSet,
    outbound: PortSet,
}

impl PortLayout {
    pub fn from_specs(inports: &[FieldSpec], outports: &[FieldSpec]) -> Result<Self, AccessError> {
        Ok(Self {
            inbound: PortSet::from_specs(Direction::In, inports)?,
            outbound: PortSet::from_specs(Direction::Out, outports)?,
        })
    }

    pub fn inbound(&self) -> &PortSet {
        &self.inbound
    }

    pub fn outbound(&self) -> &PortSet {
        &self.outbound
    }

    /// `(direction, name, rows, cols)` for every port, inports first.
    pub fn port_list(&self) -> Vec<(Direction, String, u32, u32)> {
        self.inbound
            .ports
            .iter()
            .chain(self.outbound.ports.iter())
            .map(|p| (p.direction, p.name.clone(), p.dims.rows, p.dims.cols))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, dims: Dims) -> FieldSpec {
        FieldSpec::new(name, TypeTag::Float64, dims)
    }

    #[test]
    fn ports_are_contiguous() {
        let inports = vec![
            port("scalar_in", Dims::SCALAR),
            port("vector1d_in", Dims::vector(8)).in_category("vectors"),
            port("vector2d_in", Dims::new(2, 12)).in_category("vectors"),
        ];
        let layout = PortLayout::from_specs(&inports, &[]).unwrap();
        let set = layout.inbound();
        assert_eq!(set.len(), 1 + 8 + 24);
        assert_eq!(set.find("vectors/vector1d_in").unwrap().offset(), 1);
        assert_eq!(set.find("vectors/vector2d_in").unwrap().range(), 9..33);
        assert!(layout.outbound().is_empty());
        assert!(set.validate(33).is_ok());
        assert!(matches!(set.validate(32), Err(AccessError::LayoutMismatch(_))));
    }

    #[test]
    fn int_ports_are_rejected() {
        let bad = vec![FieldSpec::new("n", TypeTag::Int32, Dims::SCALAR)];
        assert_eq!(
            PortLayout::from_specs(&bad, &[]).unwrap_err(),
            AccessError::UnsupportedType { tag: 1 }
        );
    }

    #[test]
    fn port_list_orders_inports_first() {
        let layout = PortLayout::from_specs(
            &[port("u", Dims::SCALAR)],
            &[port("y", Dims::new(3, 5))],
        )
        .unwrap();
        assert_eq!(
            layout.port_list(),
            vec![
                (Direction::In, "u".to_string(), 1, 1),
                (Direction::Out, "y".to_string(), 3, 5),
            ]
        );
    }
}
