use crate::context::ParsingContext;
use crate::object::{ComponentInfo, NodeInfo, ObjectId, ObjectKind, SceneObject};

/// Where a node sits relative to synced prefab instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefabState {
    NotInPrefab,
    /// Content owned by a synced prefab asset.
    InPrefabSubtree,
    /// Root node of a synced prefab instance.
    IsPrefabRoot,
    /// Content explicitly added or edited on one instance.
    IsMountedOverride,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    state: PrefabState,
    scene: bool,
}

/// Decides which nodes and components of synced prefab instances are left
/// out of the output, and which short identifiers survive an export.
///
/// The walker pushes a frame for every node it descends into, so the state of
/// the innermost node is always at the top of the stack.
#[derive(Debug)]
pub struct PrefabPolicy {
    /// Root of the pass. Its content is always kept.
    root: Option<ObjectId>,
    reserve_contents: bool,
    exporting: bool,
    keep_node_uuid: bool,
    stack: Vec<Frame>,
}

impl PrefabPolicy {
    pub fn new(root: Option<ObjectId>, context: &ParsingContext) -> Self {
        Self {
            root,
            reserve_contents: context.reserve_contents_for_all_syncable_prefab,
            exporting: context.exporting,
            keep_node_uuid: context.keep_node_uuid,
            stack: Vec::new(),
        }
    }

    pub fn current(&self) -> PrefabState {
        self.stack
            .last()
            .map_or(PrefabState::NotInPrefab, |frame| frame.state)
    }

    /// State `node` would take if entered under the current top of stack.
    pub fn state_for(&self, id: ObjectId, node: &NodeInfo) -> PrefabState {
        if self.root == Some(id) {
            return PrefabState::NotInPrefab;
        }
        match self.current() {
            PrefabState::IsPrefabRoot | PrefabState::InPrefabSubtree => {
                if node.mounted {
                    PrefabState::IsMountedOverride
                } else {
                    PrefabState::InPrefabSubtree
                }
            }
            PrefabState::NotInPrefab | PrefabState::IsMountedOverride => {
                if node.prefab.is_some_and(|link| link.sync) {
                    PrefabState::IsPrefabRoot
                } else {
                    PrefabState::NotInPrefab
                }
            }
        }
    }

    pub fn is_node_prunable(&self, id: ObjectId, node: &NodeInfo) -> bool {
        !self.reserve_contents && self.state_for(id, node) == PrefabState::InPrefabSubtree
    }

    /// Components belong to the prefab content of their node, including the
    /// components of the instance root.
    pub fn is_component_prunable(&self, component: &ComponentInfo) -> bool {
        !self.reserve_contents
            && !component.mounted
            && matches!(
                self.current(),
                PrefabState::IsPrefabRoot | PrefabState::InPrefabSubtree
            )
    }

    pub fn enter_node(&mut self, id: ObjectId, node: &NodeInfo) -> PrefabState {
        let state = self.state_for(id, node);
        self.stack.push(Frame {
            state,
            scene: node.scene,
        });
        state
    }

    pub fn exit_node(&mut self) {
        self.stack.pop();
    }

    /// Whether the short identifier of `object` is written. Call before
    /// entering the object.
    pub fn keep_id(&self, object: &SceneObject) -> bool {
        if !self.exporting || self.keep_node_uuid {
            return true;
        }
        match &object.kind {
            ObjectKind::Node(node) => {
                node.persistent && self.stack.last().is_some_and(|frame| frame.scene)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SerializeOptions;
    use crate::object::{PrefabLink, Variant};

    fn context(reserve: bool) -> ParsingContext {
        ParsingContext::new(&SerializeOptions {
            reserve_contents_for_syncable_prefab: reserve,
            ..SerializeOptions::default()
        })
        .unwrap()
    }

    fn id() -> ObjectId {
        // Keep the allocation alive for the duration of the test.
        let value = Variant::array(vec![]);
        let id = value.identity().unwrap();
        std::mem::forget(value);
        id
    }

    fn instance_root() -> NodeInfo {
        NodeInfo {
            prefab: Some(PrefabLink { sync: true }),
            ..NodeInfo::default()
        }
    }

    #[test]
    fn test_subtree_of_synced_instance_is_prunable() {
        let mut policy = PrefabPolicy::new(None, &context(false));
        let root_id = id();
        assert!(!policy.is_node_prunable(root_id, &instance_root()));
        assert_eq!(
            policy.enter_node(root_id, &instance_root()),
            PrefabState::IsPrefabRoot
        );
        let child = NodeInfo::default();
        assert!(policy.is_node_prunable(id(), &child));
        assert!(policy.is_component_prunable(&ComponentInfo::default()));
        policy.exit_node();
        assert_eq!(policy.current(), PrefabState::NotInPrefab);
    }

    #[test]
    fn test_mounted_override_is_kept() {
        let mut policy = PrefabPolicy::new(None, &context(false));
        policy.enter_node(id(), &instance_root());
        let mounted = NodeInfo {
            mounted: true,
            ..NodeInfo::default()
        };
        assert!(!policy.is_node_prunable(id(), &mounted));
        assert_eq!(policy.enter_node(id(), &mounted), PrefabState::IsMountedOverride);
        assert!(!policy.is_node_prunable(id(), &NodeInfo::default()));
        assert!(!policy.is_component_prunable(&ComponentInfo::default()));
    }

    #[test]
    fn test_reserve_contents_keeps_everything() {
        let mut policy = PrefabPolicy::new(None, &context(true));
        policy.enter_node(id(), &instance_root());
        assert!(!policy.is_node_prunable(id(), &NodeInfo::default()));
        assert!(!policy.is_component_prunable(&ComponentInfo::default()));
    }

    #[test]
    fn test_pass_root_owns_its_content() {
        let root_id = id();
        let mut policy = PrefabPolicy::new(Some(root_id), &context(false));
        assert_eq!(
            policy.enter_node(root_id, &instance_root()),
            PrefabState::NotInPrefab
        );
        assert!(!policy.is_node_prunable(id(), &NodeInfo::default()));
    }

    #[test]
    fn test_unsynced_instance_is_not_pruned() {
        let mut policy = PrefabPolicy::new(None, &context(false));
        let link = NodeInfo {
            prefab: Some(PrefabLink { sync: false }),
            ..NodeInfo::default()
        };
        assert_eq!(policy.enter_node(id(), &link), PrefabState::NotInPrefab);
        assert!(!policy.is_node_prunable(id(), &NodeInfo::default()));
    }

    #[test]
    fn test_node_ids_on_export() {
        let export = ParsingContext::new(&SerializeOptions {
            exporting: true,
            ..SerializeOptions::default()
        })
        .unwrap();
        let mut policy = PrefabPolicy::new(None, &export);
        let persistent = SceneObject::new(
            "Node",
            ObjectKind::Node(NodeInfo {
                persistent: true,
                ..NodeInfo::default()
            }),
        );
        assert!(!policy.keep_id(&persistent));
        policy.enter_node(
            id(),
            &NodeInfo {
                scene: true,
                ..NodeInfo::default()
            },
        );
        assert!(policy.keep_id(&persistent));
        let plain = SceneObject::new("Node", ObjectKind::Node(NodeInfo::default()));
        assert!(!policy.keep_id(&plain));
        let editing = PrefabPolicy::new(None, &context(false));
        assert!(editing.keep_id(&plain));
    }
}
