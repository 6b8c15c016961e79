//! Market classes partition vehicles into a hierarchy (e.g. `hauling.BEV`) which is the unit of
//! aggregation for shares, costs and CO2 intensity.
use crate::id::define_id_type;
use crate::units::Dimensionless;
use anyhow::{Context, Result, bail, ensure};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};

define_id_type! {MarketClassID}

/// The separator between levels of a market class ID
const SEPARATOR: char = '.';

/// The fuelling class of vehicles in a market class
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, DeserializeLabeledStringEnum, SerializeLabeledStringEnum,
)]
pub enum FuelingClass {
    /// Battery electric vehicle
    #[string = "BEV"]
    BEV,
    /// Internal combustion engine vehicle
    #[string = "ICE"]
    ICE,
}

/// A leaf of the market class hierarchy
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketClass {
    /// Full dotted ID of the market class (e.g. `hauling.BEV`)
    pub id: MarketClassID,
    /// Fuelling class of vehicles in this market class
    pub fueling_class: FuelingClass,
    /// Relative attractiveness of this class to consumers, all else being equal
    pub share_weight: Dimensionless,
    /// Minimum absolute share of a producer's sales when there is no consumer demand signal
    pub min_share: Dimensionless,
    /// Maximum absolute share of a producer's sales when there is no consumer demand signal
    pub max_share: Dimensionless,
}

/// A node in the market class tree.
///
/// Leaf nodes have no children and correspond to a [`MarketClass`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketClassNode {
    /// Full dotted path to this node. Empty for the root.
    pub path: String,
    /// Child nodes, keyed by the last segment of their path
    pub children: IndexMap<String, MarketClassNode>,
}

impl MarketClassNode {
    /// Whether this node is a leaf
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Iterate over the paths of all leaves beneath (or equal to) this node
    pub fn iter_leaf_paths(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        if self.is_leaf() {
            Box::new(std::iter::once(self.path.as_str()))
        } else {
            Box::new(
                self.children
                    .values()
                    .flat_map(MarketClassNode::iter_leaf_paths),
            )
        }
    }
}

/// The market class hierarchy.
///
/// The tree is built once from the list of leaf market classes and is read-only thereafter.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketClassTree {
    root: MarketClassNode,
    leaves: IndexMap<MarketClassID, MarketClass>,
    /// For each leaf, all the leaves which share its parent node (including itself)
    parent_groups: IndexMap<MarketClassID, Vec<MarketClassID>>,
}

/// Get the ID of a market class's parent node (empty for top-level classes)
pub fn parent_path(id: &str) -> &str {
    id.rsplit_once(SEPARATOR).map_or("", |(parent, _)| parent)
}

impl MarketClassTree {
    /// Build the tree from a set of leaf market classes.
    ///
    /// Each ID is split on `.` to give its position in the hierarchy. IDs must be unique, must not
    /// contain empty segments and a leaf cannot also be the parent of another market class.
    pub fn from_market_classes<I>(market_classes: I) -> Result<Self>
    where
        I: IntoIterator<Item = MarketClass>,
    {
        let mut root = MarketClassNode::default();
        let mut leaves = IndexMap::new();
        for market_class in market_classes {
            let id = market_class.id.clone();
            ensure!(
                id.as_str().split(SEPARATOR).all(|s| !s.trim().is_empty()),
                "Invalid market class ID '{id}': empty segment"
            );
            ensure!(
                !leaves.contains_key(&id),
                "Duplicate market class ID '{id}'"
            );
            insert_path(&mut root, id.as_str())?;
            leaves.insert(id, market_class);
        }
        ensure!(!leaves.is_empty(), "No market classes defined");

        let parent_groups = leaves
            .keys()
            .map(|id| {
                let parent = find_node(&root, parent_path(id.as_str()))
                    .with_context(|| format!("Missing parent node for market class '{id}'"))?;
                let group = parent.iter_leaf_paths().map(MarketClassID::from).collect();
                Ok((id.clone(), group))
            })
            .collect::<Result<_>>()?;

        Ok(Self {
            root,
            leaves,
            parent_groups,
        })
    }

    /// The root node of the tree (which has an empty path)
    pub fn root(&self) -> &MarketClassNode {
        &self.root
    }

    /// Iterate over the leaf market classes in input order
    pub fn iter_leaves(&self) -> impl Iterator<Item = &MarketClass> {
        self.leaves.values()
    }

    /// Iterate over the leaf market class IDs in input order
    pub fn iter_ids(&self) -> impl Iterator<Item = &MarketClassID> {
        self.leaves.keys()
    }

    /// The number of leaf market classes
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether there are no leaf market classes (never true for a tree built successfully)
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Look up a leaf market class
    pub fn get(&self, id: &str) -> Option<&MarketClass> {
        self.leaves.get(id)
    }

    /// Resolve a string to the ID of exactly one leaf market class
    pub fn resolve_leaf(&self, id: &str) -> Result<MarketClassID> {
        if let Some((id, _)) = self.leaves.get_key_value(id) {
            return Ok(id.clone());
        }

        if find_node(&self.root, id).is_some() {
            bail!("Market class '{id}' is not a leaf of the market class tree");
        }
        bail!("Unknown market class '{id}'")
    }

    /// The leaves which share a parent node with the given leaf (including the leaf itself)
    pub fn parent_group(&self, id: &MarketClassID) -> &[MarketClassID] {
        self.parent_groups
            .get(id)
            .map_or(&[], std::vec::Vec::as_slice)
    }
}

/// Add the node for `path` and any missing ancestors to the tree
fn insert_path(root: &mut MarketClassNode, path: &str) -> Result<()> {
    let mut node = root;
    let mut segments = path.split(SEPARATOR).peekable();
    while let Some(segment) = segments.next() {
        let is_last = segments.peek().is_none();
        let child_path = if node.path.is_empty() {
            segment.to_string()
        } else {
            format!("{}{SEPARATOR}{segment}", node.path)
        };

        if !is_last && node.children.get(segment).is_some_and(MarketClassNode::is_leaf) {
            bail!("Market class '{child_path}' is a leaf, so cannot be a parent of '{path}'");
        }
        if is_last && node.children.contains_key(segment) {
            bail!("Market class '{path}' cannot be both a leaf and a parent");
        }

        node = node
            .children
            .entry(segment.to_string())
            .or_insert_with(|| MarketClassNode {
                path: child_path,
                children: IndexMap::new(),
            });
    }

    Ok(())
}

/// Find the node with the given path ("" is the root)
fn find_node<'a>(root: &'a MarketClassNode, path: &str) -> Option<&'a MarketClassNode> {
    if path.is_empty() {
        return Some(root);
    }

    path.split(SEPARATOR)
        .try_fold(root, |node, segment| node.children.get(segment))
}

/// Look up market classes in a tree, with context on failure
pub fn get_market_class<'a>(tree: &'a MarketClassTree, id: &str) -> Result<&'a MarketClass> {
    tree.get(id)
        .with_context(|| format!("Unknown market class '{id}'"))
}
