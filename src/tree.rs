use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use polars::prelude::*;
use tracing::warn;

use crate::error::{BenthosError, Result};
use crate::schema::{mapping, twn};

/// Parent→child tree over the TWN reference list.
///
/// Built once per run from the (Name, Parentname) pairs and queried for the
/// full descendant set of configured anchor taxa. The root keeps its null
/// parent; any other row with a null parent is structurally broken and is
/// dropped from the tree.
#[derive(Debug)]
pub struct TwnTree {
    graph: DiGraph<String, ()>,
    /// Map from taxon name → NodeIndex for fast lookup.
    node_map: HashMap<String, NodeIndex>,
}

impl TwnTree {
    /// Build the tree from a TWN frame with Name and Parentname columns.
    ///
    /// A cycle in the parent links makes every traversal unbounded, so it is
    /// rejected here with a hard error rather than defended against later.
    pub fn from_twn(twn_df: &DataFrame) -> Result<Self> {
        let names = twn_df.column(twn::NAME)?.str()?;
        let parents = twn_df.column(twn::PARENTNAME)?.str()?;

        let mut graph = DiGraph::new();
        let mut node_map: HashMap<String, NodeIndex> = HashMap::new();

        let get_or_insert = |map: &mut HashMap<String, NodeIndex>,
                             g: &mut DiGraph<String, ()>,
                             id: &str|
         -> NodeIndex {
            *map.entry(id.to_string())
                .or_insert_with(|| g.add_node(id.to_string()))
        };

        for i in 0..twn_df.height() {
            let Some(name) = names.get(i) else {
                continue;
            };
            match parents.get(i) {
                Some(parent) => {
                    let parent_idx = get_or_insert(&mut node_map, &mut graph, parent);
                    let child_idx = get_or_insert(&mut node_map, &mut graph, name);
                    graph.add_edge(parent_idx, child_idx, ());
                }
                // Only the root may sit in the tree without a parent.
                None if name == twn::ROOT => {
                    get_or_insert(&mut node_map, &mut graph, name);
                }
                None => {}
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(BenthosError::CycleDetected(
                "parent links in the TWN do not form a tree".to_string(),
            ));
        }

        Ok(Self { graph, node_map })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_map.contains_key(name)
    }

    /// Every taxon reachable by repeatedly following parent→child edges from
    /// `name`, excluding `name` itself, without duplicates.
    pub fn descendants(&self, name: &str) -> Vec<String> {
        let Some(&start) = self.node_map.get(name) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(start, Direction::Outgoing)
            .collect();

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            result.push(self.graph[node].clone());
            for neighbor in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if !visited.contains(&neighbor) {
                    stack.push(neighbor);
                }
            }
        }

        result
    }
}

/// Map the descendants of each anchor to an overriding name.
///
/// For a normal build every descendant maps to its anchor; for a contra build
/// every descendant maps to itself (the exception keeps its own name). The
/// anchors themselves are always included in the mapping. Without anchors the
/// single-blank-row sentinel frame is returned, which left-merges as all-null.
pub fn build_taxon_hierarchie(
    anchors: Option<&[String]>,
    tree: &TwnTree,
    contra: bool,
) -> Result<DataFrame> {
    let value_column = if contra {
        mapping::CONTRA_TAXONNAME
    } else {
        mapping::OVERRULE_TAXONNAME
    };

    let Some(anchors) = anchors.filter(|a| !a.is_empty()) else {
        let df = df!(
            twn::NAME => [""],
            value_column => [""],
        )?;
        return Ok(df);
    };

    let mut names: Vec<String> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    for anchor in anchors {
        if !tree.contains(anchor) {
            warn!(anchor = %anchor, "configured anchor taxon is unknown in the TWN");
        }
        names.push(anchor.clone());
        values.push(anchor.clone());
        for descendant in tree.descendants(anchor) {
            values.push(if contra {
                descendant.clone()
            } else {
                anchor.clone()
            });
            names.push(descendant);
        }
    }

    let df = DataFrame::new(vec![
        Column::new(twn::NAME.into(), &names),
        Column::new(value_column.into(), &values),
    ])?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn small_twn() -> DataFrame {
        df!(
            twn::NAME => ["Animalia", "Mollusca", "Bivalvia", "Abra", "Abra alba", "Abra nitida", "Orphan"],
            twn::PARENTNAME => [None, Some("Animalia"), Some("Mollusca"), Some("Bivalvia"), Some("Abra"), Some("Abra"), None],
        )
        .unwrap()
    }

    #[test]
    fn descendants_exclude_self_and_close_over_the_subtree() {
        let tree = TwnTree::from_twn(&small_twn()).unwrap();
        let mut result = tree.descendants("Bivalvia");
        result.sort();
        assert_eq!(result, vec!["Abra", "Abra alba", "Abra nitida"]);
        assert!(tree.descendants("Abra alba").is_empty());
    }

    #[test]
    fn orphan_rows_are_dropped_but_root_is_kept() {
        let tree = TwnTree::from_twn(&small_twn()).unwrap();
        assert!(tree.contains(twn::ROOT));
        assert!(!tree.contains("Orphan"));
    }

    #[test]
    fn cyclic_reference_data_is_rejected() {
        let twn_df = df!(
            twn::NAME => ["A", "B"],
            twn::PARENTNAME => [Some("B"), Some("A")],
        )
        .unwrap();
        let err = TwnTree::from_twn(&twn_df).unwrap_err();
        assert!(matches!(err, BenthosError::CycleDetected(_)));
    }

    #[test]
    fn hierarchie_maps_descendants_to_their_anchor() {
        let tree = TwnTree::from_twn(&small_twn()).unwrap();
        let anchors = vec!["Abra".to_string()];
        let df = build_taxon_hierarchie(Some(&anchors), &tree, false).unwrap();

        let names = df.column(twn::NAME).unwrap().str().unwrap();
        let overrule = df.column(mapping::OVERRULE_TAXONNAME).unwrap().str().unwrap();
        for i in 0..df.height() {
            assert_eq!(overrule.get(i), Some("Abra"));
            assert!(["Abra", "Abra alba", "Abra nitida"].contains(&names.get(i).unwrap()));
        }
        assert_eq!(df.height(), 3);
    }

    #[test]
    fn contra_hierarchie_maps_descendants_to_themselves() {
        let tree = TwnTree::from_twn(&small_twn()).unwrap();
        let anchors = vec!["Abra".to_string()];
        let df = build_taxon_hierarchie(Some(&anchors), &tree, true).unwrap();

        let names = df.column(twn::NAME).unwrap().str().unwrap();
        let contra = df.column(mapping::CONTRA_TAXONNAME).unwrap().str().unwrap();
        for i in 0..df.height() {
            assert_eq!(names.get(i), contra.get(i));
        }
    }

    #[test]
    fn missing_anchors_yield_the_sentinel_frame() {
        let tree = TwnTree::from_twn(&small_twn()).unwrap();
        let df = build_taxon_hierarchie(None, &tree, false).unwrap();
        assert_eq!(df.height(), 1);
        assert_eq!(df.column(twn::NAME).unwrap().str().unwrap().get(0), Some(""));
    }
}
