//! Ordered set of registered components.

use crate::component::{ComponentId, TransactionalComponent};
use crate::error::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::Arc;

/// The components a coordinator drives, in registration order.
///
/// Prepare and enact visit components in this order; abort visits them in
/// reverse.
#[derive(Default, Clone)]
pub struct ComponentGroup {
    ordered: Vec<Arc<dyn TransactionalComponent>>,
    index: HashMap<ComponentId, usize>,
}

impl ComponentGroup {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a component at the end of the order.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateComponent` if the id is already registered.
    pub fn add(&mut self, component: Arc<dyn TransactionalComponent>) -> CoreResult<()> {
        let id = component.component_id().clone();
        if self.index.contains_key(&id) {
            return Err(CoreError::DuplicateComponent { id: id.to_string() });
        }
        self.index.insert(id, self.ordered.len());
        self.ordered.push(component);
        Ok(())
    }

    /// Removes a component, keeping the order of the rest.
    ///
    /// # Errors
    ///
    /// Returns `ComponentNotFound` if nothing has that id.
    pub fn remove(&mut self, id: &ComponentId) -> CoreResult<Arc<dyn TransactionalComponent>> {
        let position = self
            .index
            .remove(id)
            .ok_or_else(|| CoreError::ComponentNotFound { id: id.to_string() })?;
        let removed = self.ordered.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Ok(removed)
    }

    /// Looks a component up by id.
    #[must_use]
    pub fn find(&self, id: &ComponentId) -> Option<&Arc<dyn TransactionalComponent>> {
        self.index.get(id).map(|&i| &self.ordered[i])
    }

    /// Iterates in registration order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn TransactionalComponent>> {
        self.ordered.iter()
    }

    /// Returns the registered ids in order.
    #[must_use]
    pub fn ids(&self) -> Vec<ComponentId> {
        self.ordered
            .iter()
            .map(|c| c.component_id().clone())
            .collect()
    }

    /// Returns the number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl std::fmt::Debug for ComponentGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentIdAllocator, PreparedEntry, TxnInfo};
    use crate::journal::JournalEntry;

    struct Noop(ComponentId);

    impl TransactionalComponent for Noop {
        fn component_id(&self) -> &ComponentId {
            &self.0
        }
        fn begin(&self, _: &TxnInfo) -> CoreResult<()> {
            Ok(())
        }
        fn commit_prepare(&self, _: &TxnInfo) -> CoreResult<Vec<PreparedEntry>> {
            Ok(Vec::new())
        }
        fn commit_enact(&self, _: &TxnInfo) -> CoreResult<()> {
            Ok(())
        }
        fn abort(&self, _: &TxnInfo) -> CoreResult<()> {
            Ok(())
        }
        fn complete(&self, _: &TxnInfo) {}
        fn start_recovery(&self) -> CoreResult<()> {
            Ok(())
        }
        fn recover(&self, _: &JournalEntry) -> CoreResult<()> {
            Ok(())
        }
        fn finish_recovery(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    fn group_of(n: usize) -> (ComponentGroup, Vec<ComponentId>) {
        let alloc = ComponentIdAllocator::local();
        let mut group = ComponentGroup::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = alloc.alloc_local(format!("c{i}"));
            ids.push(id.clone());
            group.add(Arc::new(Noop(id))).unwrap();
        }
        (group, ids)
    }

    #[test]
    fn keeps_registration_order() {
        let (group, ids) = group_of(4);
        assert_eq!(group.ids(), ids);
        let reversed: Vec<_> = group
            .iter()
            .rev()
            .map(|c| c.component_id().clone())
            .collect();
        assert_eq!(reversed.first(), ids.last());
    }

    #[test]
    fn rejects_duplicates() {
        let (mut group, ids) = group_of(1);
        let again = Arc::new(Noop(ids[0].clone()));
        assert!(matches!(
            group.add(again),
            Err(CoreError::DuplicateComponent { .. })
        ));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn find_by_token() {
        let (group, ids) = group_of(3);
        let from_journal = ComponentId::from_bytes(ids[1].as_bytes()).unwrap();
        let found = group.find(&from_journal).unwrap();
        assert_eq!(found.component_id().label(), "c1");
    }

    #[test]
    fn remove_reindexes() {
        let (mut group, ids) = group_of(3);
        group.remove(&ids[0]).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.find(&ids[2]).unwrap().component_id().label(), "c2");
        assert!(group.find(&ids[0]).is_none());
        assert!(matches!(
            group.remove(&ids[0]),
            Err(CoreError::ComponentNotFound { .. })
        ));
    }
}
