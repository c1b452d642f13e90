use crate::object::ObjectId;
use std::collections::{HashMap, HashSet};

/// Opaque handle for a value emitted by an output builder.
/// Only meaningful within the pass that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueInfo(pub(crate) usize);

impl ValueInfo {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Pass-scoped map from object identity to the value it was emitted as.
#[derive(Debug, Default)]
pub struct IdentityCache {
    parsed: HashMap<ObjectId, ValueInfo>,
    value_type_slots: HashSet<ObjectId>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: ObjectId) -> Option<ValueInfo> {
        self.parsed.get(&id).copied()
    }

    pub fn register(&mut self, id: ObjectId, info: ValueInfo) {
        let previous = self.parsed.insert(id, info);
        debug_assert!(previous.is_none(), "object registered twice in one pass");
    }

    /// Claims the inline slot of a value-type object. Returns `true` only for
    /// the first occurrence in the pass; repeats are written out again in
    /// place instead of being back-referenced.
    pub fn claim_value_type_slot(&mut self, id: ObjectId) -> bool {
        self.value_type_slots.insert(id)
    }

    pub fn len(&self) -> usize {
        self.parsed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Variant;

    #[test]
    fn test_register_and_lookup() {
        let value = Variant::array(vec![]);
        let id = value.identity().unwrap();
        let mut cache = IdentityCache::new();
        assert_eq!(cache.lookup(id), None);
        cache.register(id, ValueInfo(3));
        assert_eq!(cache.lookup(id), Some(ValueInfo(3)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_value_type_slot_claimed_once() {
        let value = Variant::dict(Default::default());
        let id = value.identity().unwrap();
        let mut cache = IdentityCache::new();
        assert!(cache.claim_value_type_slot(id));
        assert!(!cache.claim_value_type_slot(id));
        assert!(cache.is_empty());
    }
}
