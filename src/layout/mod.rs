pub use block::*;
pub use descriptor::*;
pub use ports::*;
pub use type_tag::*;

mod block;
mod descriptor;
mod ports;
mod type_tag;

/// Groups specs by category in order of first appearance; uncategorised
/// specs form their own group.
pub(crate) fn group_by_category(specs: &[FieldSpec]) -> Vec<(Option<&str>, Vec<&FieldSpec>)> {
    let mut groups: Vec<(Option<&str>, Vec<&FieldSpec>)> = Vec::new();
    for spec in specs {
        let cat = spec.category.as_deref();
        match groups.iter_mut().find(|(c, _)| *c == cat) {
            Some((_, members)) => members.push(spec),
            None => groups.push((cat, vec![spec])),
        }
    }
    groups
}
