use core::fmt;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Identifier of a participant on the bus.
///
/// Node ids are assigned outside of this crate; the engine only ever
/// observes them.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct NodeId(pub u16);

/// Fixed port of a subject or service.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PortId(pub u16);

// ---- impl NodeId ----

impl NodeId {
    #[inline]
    pub const fn get(&self) -> u16 {
        self.0
    }
}

impl From<u16> for NodeId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Format a node set the way operators read it: `{42, 50, 51}`.
pub fn fmt_node_set(nodes: &BTreeSet<NodeId>) -> String {
    let ids: Vec<String> = nodes.iter().map(NodeId::to_string).collect();
    format!("{{{}}}", ids.join(", "))
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::{NodeId, fmt_node_set};

    #[test]
    fn node_set_formatting() {
        let set: BTreeSet<NodeId> = [51, 42, 50].into_iter().map(NodeId).collect();
        assert_eq!(fmt_node_set(&set), "{42, 50, 51}");
        assert_eq!(fmt_node_set(&BTreeSet::new()), "{}");
    }
}
