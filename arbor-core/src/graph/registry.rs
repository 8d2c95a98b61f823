//! The live registry of stores in one tree.

use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use smallvec::SmallVec;

use super::node::{AnyNode, Identity, NodeInfo, StoreId};
use crate::store::inner::StoreCore;
use crate::store::Model;

struct NodeEntry {
    node: Weak<dyn AnyNode>,
    model: TypeId,
    model_name: &'static str,
    parent: Option<StoreId>,
    identity: Option<Identity>,
    children: SmallVec<[StoreId; 4]>,
}

/// Every live store reachable from one root, with its parent/child links.
///
/// Entries hold weak references only; a store is owned by its parent's edge
/// (or by the application, for the root). Lookups upgrade a matching entry
/// into a temporary strong reference.
#[derive(Clone, Default)]
pub struct ConnectionGraph {
    nodes: Arc<DashMap<StoreId, NodeEntry>>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        node: &Arc<dyn AnyNode>,
        parent: Option<StoreId>,
        identity: Option<Identity>,
    ) {
        let id = node.id();
        self.nodes.insert(
            id,
            NodeEntry {
                node: Arc::downgrade(node),
                model: node.model_type(),
                model_name: node.model_name(),
                parent,
                identity,
                children: SmallVec::new(),
            },
        );
        if let Some(parent) = parent {
            if let Some(mut entry) = self.nodes.get_mut(&parent) {
                entry.children.push(id);
            }
        }
    }

    /// Remove a store. Returns false if it was not registered.
    pub(crate) fn unregister(&self, id: StoreId) -> bool {
        let Some((_, entry)) = self.nodes.remove(&id) else {
            return false;
        };
        if let Some(parent) = entry.parent {
            if let Some(mut parent) = self.nodes.get_mut(&parent) {
                parent.children.retain(|child| *child != id);
            }
        }
        true
    }

    pub fn contains(&self, id: StoreId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent_of(&self, id: StoreId) -> Option<StoreId> {
        self.nodes.get(&id).and_then(|entry| entry.parent)
    }

    /// Children of `id`, in creation order.
    pub fn children_of(&self, id: StoreId) -> Vec<StoreId> {
        self.nodes
            .get(&id)
            .map(|entry| entry.children.to_vec())
            .unwrap_or_default()
    }

    pub fn identity_of(&self, id: StoreId) -> Option<Identity> {
        self.nodes.get(&id).and_then(|entry| entry.identity.clone())
    }

    /// A snapshot of every node, ordered by ID.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .nodes
            .iter()
            .map(|entry| NodeInfo {
                id: entry.key().raw(),
                model: entry.model_name,
                parent: entry.parent.map(|parent| parent.raw()),
                identity: entry.identity.as_ref().map(Identity::to_string),
                children: entry.children.iter().map(StoreId::raw).collect(),
            })
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }

    /// Upgrade `id`, whatever its model.
    pub(crate) fn node(&self, id: StoreId) -> Option<Arc<dyn AnyNode>> {
        let node = Weak::clone(&self.nodes.get(&id)?.node);
        node.upgrade()
    }

    /// Upgrade `id` if it is a live store of model `C`.
    ///
    /// The map guard is released before upgrading: dropping the upgraded
    /// reference may release the store, which unregisters it.
    fn upgrade<C: Model>(&self, id: StoreId) -> Option<Arc<StoreCore<C>>> {
        let node = {
            let entry = self.nodes.get(&id)?;
            if entry.model != TypeId::of::<C>() {
                return None;
            }
            Weak::clone(&entry.node)
        };
        let node = node.upgrade()?;
        if !node.is_alive() {
            return None;
        }
        node.as_any().downcast::<StoreCore<C>>().ok()
    }

    pub(crate) fn find_ancestor<C: Model>(&self, from: StoreId) -> Option<Arc<StoreCore<C>>> {
        let mut current = self.parent_of(from);
        while let Some(id) = current {
            if let Some(core) = self.upgrade::<C>(id) {
                return Some(core);
            }
            current = self.parent_of(id);
        }
        None
    }

    /// The first direct child of `from` with model `C` (and `identity`, when
    /// given).
    pub(crate) fn find_child<C: Model>(
        &self,
        from: StoreId,
        identity: Option<&Identity>,
    ) -> Option<Arc<StoreCore<C>>> {
        self.children_of(from)
            .into_iter()
            .filter(|child| match identity {
                Some(identity) => self.identity_of(*child).as_ref() == Some(identity),
                None => true,
            })
            .find_map(|child| self.upgrade::<C>(child))
    }

    pub(crate) fn find_sibling<C: Model>(&self, from: StoreId) -> Option<Arc<StoreCore<C>>> {
        let parent = self.parent_of(from)?;
        self.children_of(parent)
            .into_iter()
            .filter(|sibling| *sibling != from)
            .find_map(|sibling| self.upgrade::<C>(sibling))
    }
}

impl fmt::Debug for ConnectionGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionGraph")
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use crate::{Connection, Context, Identity, Model, Store};

    struct Leaf;

    impl Model for Leaf {
        type State = u32;
        type Action = Infallible;
        type Input = Infallible;
        type Output = Infallible;

        fn handle(&self, _ctx: &Context<'_, Self>, action: Infallible) {
            match action {}
        }
    }

    #[test]
    fn detached_child_is_unlinked() {
        let root = Store::new(Leaf, 0);
        let leaves = Connection::fixed("leaf", || Leaf, 1);
        let leaf = root.connect_keyed(&leaves, "a").unwrap();
        let graph = root.graph().clone();

        assert_eq!(graph.children_of(root.id()), vec![leaf.id()]);
        assert_eq!(graph.parent_of(leaf.id()), Some(root.id()));
        assert_eq!(graph.identity_of(leaf.id()), Some(Identity::from("a")));

        assert!(root.with_context(|ctx| ctx.disconnect_keyed("a")).unwrap());

        assert!(graph.children_of(root.id()).is_empty());
        assert!(!graph.contains(leaf.id()));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn lookups_match_model_type() {
        let root = Store::new(Leaf, 0);
        let leaves = Connection::fixed("leaf", || Leaf, 7);
        root.connect(&leaves).unwrap();

        let core = root.graph().find_child::<Leaf>(root.id(), None).unwrap();
        assert_eq!(*core.state.lock(), 7);
        assert!(root.graph().find_ancestor::<Leaf>(root.id()).is_none());
        assert!(root.graph().find_sibling::<Leaf>(core.id).is_none());
    }
}
