//! Shape lineage trees: one tree per root identity, recording which child
//! identities descend from it and what each one's field layout looks like.

use serde::Serialize;

use std::collections::{BTreeMap, BTreeSet};

use crate::ProfileType;

/// Storage representation observed for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRep {
    #[default]
    None,
    Int,
    Double,
    Tagged,
}

impl FieldRep {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Int => 1,
            Self::Double => 2,
            Self::Tagged => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::None,
            1 => Self::Int,
            2 => Self::Double,
            3 => Self::Tagged,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FieldDesc {
    pub key: String,
    pub rep: FieldRep,
}

impl FieldDesc {
    pub fn new(key: impl Into<String>, rep: FieldRep) -> Self {
        Self {
            key: key.into(),
            rep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutNode {
    pub fields: Vec<FieldDesc>,
    pub children: BTreeSet<ProfileType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeTree {
    pub root: ProfileType,
    pub proto: ProfileType,
    pub nodes: BTreeMap<ProfileType, LayoutNode>,
}

impl ShapeTree {
    fn new(root: ProfileType) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(root, LayoutNode::default());
        Self {
            root,
            proto: ProfileType::None,
            nodes,
        }
    }

    fn node_mut(&mut self, shape: ProfileType, fields: &[FieldDesc]) -> &mut LayoutNode {
        let node = self.nodes.entry(shape).or_default();
        if node.fields.is_empty() && !fields.is_empty() {
            node.fields = fields.to_vec();
        }
        node
    }

    pub fn node(&self, shape: &ProfileType) -> Option<&LayoutNode> {
        self.nodes.get(shape)
    }

    /// Union of both trees. A missing link or layout never overrides a
    /// present one; two present ones that disagree keep the smaller, so the
    /// result does not depend on merge order.
    fn merge(&mut self, other: &ShapeTree) {
        if !other.proto.is_none() && (self.proto.is_none() || other.proto < self.proto) {
            self.proto = other.proto;
        }
        for (shape, node) in &other.nodes {
            let target = self.nodes.entry(*shape).or_default();
            if !node.fields.is_empty() && (target.fields.is_empty() || node.fields < target.fields) {
                target.fields = node.fields.clone();
            }
            target.children.extend(node.children.iter().copied());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShapeLayoutTable {
    trees: BTreeMap<ProfileType, ShapeTree>,
}

impl ShapeLayoutTable {
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn get(&self, root: &ProfileType) -> Option<&ShapeTree> {
        self.trees.get(root)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShapeTree> {
        self.trees.values()
    }

    fn tree_mut(&mut self, root: ProfileType) -> &mut ShapeTree {
        self.trees
            .entry(root)
            .or_insert_with(|| ShapeTree::new(root))
    }

    pub fn add_root_layout(&mut self, root: ProfileType, fields: &[FieldDesc]) {
        if !root.is_root() {
            return;
        }
        self.tree_mut(root).node_mut(root, fields);
    }

    /// Records `shape` (and its layout) inside the tree of `root`.
    pub fn update_layout(&mut self, root: ProfileType, shape: ProfileType, fields: &[FieldDesc]) {
        if !root.is_root() || shape.is_none() {
            return;
        }
        self.tree_mut(root).node_mut(shape, fields);
    }

    /// Records the edge `parent -> child` inside the tree of `root`.
    pub fn update_transition_layout(
        &mut self,
        root: ProfileType,
        parent: (ProfileType, &[FieldDesc]),
        child: (ProfileType, &[FieldDesc]),
    ) {
        if !root.is_root() || parent.0.is_none() || child.0.is_none() {
            return;
        }
        let tree = self.tree_mut(root);
        tree.node_mut(child.0, child.1);
        tree.node_mut(parent.0, parent.1).children.insert(child.0);
    }

    /// Links a root's tree to the root of its prototype lineage.
    pub fn add_root_pt_type(&mut self, root: ProfileType, proto: ProfileType) {
        if !root.is_root() || proto.is_none() {
            return;
        }
        self.tree_mut(root).proto = proto;
    }

    pub fn insert_tree(&mut self, tree: ShapeTree) {
        match self.trees.get_mut(&tree.root) {
            Some(existing) => existing.merge(&tree),
            None => {
                self.trees.insert(tree.root, tree);
            }
        }
    }

    pub fn merge(&mut self, other: &ShapeLayoutTable) {
        for tree in other.trees.values() {
            self.insert_tree(tree.clone());
        }
    }

    pub fn map_types(&mut self, f: &impl Fn(ProfileType) -> ProfileType) {
        let trees = std::mem::take(&mut self.trees);
        for (_, tree) in trees {
            let mut mapped = ShapeTree {
                root: f(tree.root),
                proto: f(tree.proto),
                nodes: BTreeMap::new(),
            };
            for (shape, node) in tree.nodes {
                mapped.nodes.insert(
                    f(shape),
                    LayoutNode {
                        fields: node.fields,
                        children: node.children.into_iter().map(f).collect(),
                    },
                );
            }
            self.insert_tree(mapped);
        }
    }

    pub fn clear(&mut self) {
        self.trees.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProfileTypeKind;

    fn root(id: u32) -> ProfileType {
        ProfileType::root(ProfileTypeKind::Class, 1, id)
    }

    #[test]
    fn transition_edges_accumulate_under_root() {
        let mut table = ShapeLayoutTable::default();
        let r = root(1);
        let a = r.child(10);
        let b = r.child(11);
        let x = [FieldDesc::new("x", FieldRep::Int)];
        table.update_transition_layout(r, (r, &[]), (a, &x));
        table.update_transition_layout(r, (a, &x), (b, &[]));
        let tree = table.get(&r).expect("tree");
        assert_eq!(tree.nodes.len(), 3);
        assert!(tree.node(&r).expect("root").children.contains(&a));
        assert_eq!(tree.node(&a).expect("a").fields, x.to_vec());
    }

    #[test]
    fn non_root_keys_are_ignored() {
        let mut table = ShapeLayoutTable::default();
        table.add_root_layout(root(1).child(3), &[]);
        table.add_root_pt_type(root(1).child(3), root(2));
        assert!(table.is_empty());
    }

    #[test]
    fn merge_keeps_present_links_and_orders_conflicts() {
        let mut with_link = ShapeLayoutTable::default();
        with_link.add_root_pt_type(root(1), root(8));
        let mut without_link = ShapeLayoutTable::default();
        without_link.add_root_layout(root(1), &[]);
        let mut other_link = ShapeLayoutTable::default();
        other_link.add_root_pt_type(root(1), root(7));

        let mut target = with_link.clone();
        target.merge(&without_link);
        assert_eq!(target.get(&root(1)).expect("tree").proto, root(8));

        let mut forward = with_link.clone();
        forward.merge(&other_link);
        let mut backward = other_link.clone();
        backward.merge(&with_link);
        assert_eq!(forward.get(&root(1)).expect("tree").proto, root(7));
        assert_eq!(forward, backward);
    }

    #[test]
    fn merge_fills_missing_layouts_in_either_order() {
        let x = [FieldDesc::new("x", FieldRep::Int)];
        let y = [FieldDesc::new("y", FieldRep::Double)];
        let mut bare = ShapeLayoutTable::default();
        bare.add_root_layout(root(1), &[]);
        let mut with_x = ShapeLayoutTable::default();
        with_x.add_root_layout(root(1), &x);
        let mut with_y = ShapeLayoutTable::default();
        with_y.add_root_layout(root(1), &y);

        let mut a = bare.clone();
        a.merge(&with_y);
        a.merge(&with_x);
        let mut b = with_x.clone();
        b.merge(&bare);
        b.merge(&with_y);
        assert_eq!(a, b);
        assert_eq!(a.get(&root(1)).and_then(|t| t.node(&root(1))).expect("root").fields, x.to_vec());
    }

    #[test]
    fn map_types_rekeys_trees() {
        let mut table = ShapeLayoutTable::default();
        table.update_transition_layout(root(1), (root(1), &[]), (root(1).child(5), &[]));
        table.map_types(&|t: ProfileType| t.map_abc_id(|_| 9));
        let mapped = ProfileType::root(ProfileTypeKind::Class, 9, 1);
        let tree = table.get(&mapped).expect("remapped tree");
        assert!(tree.node(&mapped).expect("root").children.contains(&mapped.child(5)));
    }
}
