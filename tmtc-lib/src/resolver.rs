//! Structure lookup and group expansion.
use crate::catalog::{CatalogStore, FieldDescriptor, FieldKind, StructureDef, StructureId};
use crate::UnknownStructure;

/// Resolves structure ids to layouts and expands groups once their counters or
/// discriminators are known.
///
/// Layout trees are validated when the catalog is built (see
/// [CatalogLoadError::Cycle](crate::CatalogLoadError::Cycle) and
/// [CatalogLoadError::TooDeep](crate::CatalogLoadError::TooDeep)) so walking them always
/// terminates.
pub struct StructureResolver<'c> {
    catalog: &'c CatalogStore,
}

impl<'c> StructureResolver<'c> {
    #[must_use]
    pub fn new(catalog: &'c CatalogStore) -> Self {
        StructureResolver { catalog }
    }

    /// # Errors
    /// [UnknownStructure] if the catalog has no structure `id`.
    pub fn resolve(&self, id: StructureId) -> Result<&'c StructureDef, UnknownStructure> {
        self.catalog.structure(id).ok_or(UnknownStructure(id))
    }

    /// Child layouts of a repeat group, one per repetition. Anything other than a repeat
    /// group yields nothing.
    pub fn expand_group<'a>(
        &self,
        group: &'a FieldDescriptor,
        repeat_count: u64,
    ) -> impl Iterator<Item = &'a [FieldDescriptor]> + 'a {
        let count = match group.kind {
            FieldKind::RepeatGroup { .. } => repeat_count,
            _ => 0,
        };
        let children = group.children.as_slice();
        (0..count).map(move |_| children)
    }

    /// Child layout of a conditional group if `discriminator_value` selects it.
    #[must_use]
    pub fn resolve_conditional<'a>(
        &self,
        node: &'a FieldDescriptor,
        discriminator_value: i64,
    ) -> Option<&'a [FieldDescriptor]> {
        match node.kind {
            FieldKind::ConditionalGroup { value, .. } if value == discriminator_value => {
                Some(node.children.as_slice())
            }
            _ => None,
        }
    }

    /// Fewest bits one repetition of `group` can occupy. Nested groups may be empty so
    /// they contribute nothing.
    #[must_use]
    pub fn min_repetition_bits(&self, group: &FieldDescriptor) -> u64 {
        group
            .children
            .iter()
            .filter(|f| !f.is_group())
            .map(|f| u64::from(f.bit_width))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> CatalogStore {
        CatalogStore::default()
            .with_structure(StructureDef::new(
                1,
                "GROUPS",
                vec![
                    FieldDescriptor::counter("N", 8),
                    FieldDescriptor::repeat(
                        "G",
                        Some("N"),
                        vec![
                            FieldDescriptor::scalar("A", 4),
                            FieldDescriptor::scalar("B", 12),
                            FieldDescriptor::repeat("INNER", None, vec![]),
                        ],
                    ),
                    FieldDescriptor::conditional(
                        "C",
                        "N",
                        2,
                        vec![FieldDescriptor::scalar("X", 8)],
                    ),
                ],
            ))
            .unwrap()
    }

    #[test]
    fn resolve_known_and_unknown() {
        let catalog = catalog();
        let resolver = StructureResolver::new(&catalog);

        assert_eq!(resolver.resolve(1).unwrap().name, "GROUPS");
        assert_eq!(resolver.resolve(2).unwrap_err(), UnknownStructure(2));
    }

    #[test]
    fn expand_group_repeats_children() {
        let catalog = catalog();
        let resolver = StructureResolver::new(&catalog);
        let def = resolver.resolve(1).unwrap();

        let reps: Vec<&[FieldDescriptor]> = resolver.expand_group(&def.fields[1], 3).collect();
        assert_eq!(reps.len(), 3);
        assert!(reps.iter().all(|r| r.len() == 3 && r[0].name == "A"));

        assert_eq!(resolver.expand_group(&def.fields[1], 0).count(), 0);
        // not a repeat group
        assert_eq!(resolver.expand_group(&def.fields[0], 3).count(), 0);
    }

    #[test]
    fn conditional_branches() {
        let catalog = catalog();
        let resolver = StructureResolver::new(&catalog);
        let def = resolver.resolve(1).unwrap();

        let branch = resolver.resolve_conditional(&def.fields[2], 2).unwrap();
        assert_eq!(branch[0].name, "X");
        assert!(resolver.resolve_conditional(&def.fields[2], 3).is_none());
        assert!(resolver.resolve_conditional(&def.fields[1], 2).is_none());
    }

    #[test]
    fn min_bits_ignores_nested_groups() {
        let catalog = catalog();
        let resolver = StructureResolver::new(&catalog);
        let def = resolver.resolve(1).unwrap();

        assert_eq!(resolver.min_repetition_bits(&def.fields[1]), 16);
    }
}
