// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Apply a configuration change, addressed by a location path, to a cached
//! copy of a device configuration.
//!
//! Given a master forest, a fragment forest and a path such as
//! `/system/ntp/server[name='a']`, the handler walks both forests along the
//! path and then either replaces, removes or grafts elements of the master:
//!
//! | master matches full path | fragment has a match | result                           |
//! |--------------------------|----------------------|----------------------------------|
//! | yes                      | yes                  | master element replaced in place |
//! | yes                      | no                   | master element and empty ancestors removed |
//! | no                       | yes                  | fragment subtree appended under the deepest match |
//! | no                       | no                   | unchanged                        |
//!
//! Pruning of empty ancestors stops at the forest roots, a root is only
//! removed when the path addresses it directly. When nothing in the master
//! matches the first step, every fragment root is appended to the master.
//!
//! The walk is greedy: at each step the first candidate, in document order,
//! whose name matches and whose leading children equal the key predicates
//! is taken and the walk never backtracks to try its siblings.

use crate::{
    path::{LocationPath, PathError, Step},
    tree::{Forest, NodeId, Tree},
};
use tracing::{debug, trace};

#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigurationMergeHandler;

impl ConfigurationMergeHandler {
    pub const fn new() -> Self {
        Self
    }

    /// Merge `fragment` into `master` at `path` and return the updated
    /// master. An empty path (or `/`) returns the fragment unchanged.
    pub fn update_configuration(
        &self,
        mut master: Forest,
        fragment: Forest,
        path: &str,
    ) -> Result<Forest, PathError> {
        if path.trim().trim_start_matches('/').is_empty() {
            return Ok(fragment);
        }
        let path: LocationPath = path.parse()?;
        let steps = path.steps();

        let Some(master_match) = find_deepest(&master, steps) else {
            debug!(%path, "no master element matches, appending the whole fragment");
            for root in fragment.iter() {
                let copy = master.tree.import(&fragment.tree, root);
                master.nodes.push(copy);
            }
            return Ok(master);
        };
        let master_depth = depth_in(&master, master_match);
        let full_match = master_depth == steps.len();
        let replacement = find_subfragment(&fragment, steps, master_depth);
        trace!(
            %path,
            master_depth,
            full_match,
            has_replacement = replacement.is_some(),
            "merging configuration fragment"
        );

        match (full_match, replacement) {
            (true, Some(replacement)) => {
                let (parent, position) = remove_from(&mut master, master_match);
                let copy = master.tree.import(&fragment.tree, replacement);
                match parent {
                    Some(parent) => master.tree.insert_child(parent, position, copy),
                    None => master.nodes.insert(position, copy),
                }
            }
            (true, None) => {
                let (mut parent, _) = remove_from(&mut master, master_match);
                // prune ancestors left empty, the forest roots always stay
                while let Some(empty) = parent.filter(|p| {
                    master.tree.children(*p).is_empty() && !master.nodes.contains(*p)
                }) {
                    parent = remove_from(&mut master, empty).0;
                }
            }
            (false, Some(replacement)) => {
                let copy = master.tree.import(&fragment.tree, replacement);
                master.tree.add_child(master_match, copy);
            }
            (false, None) => {}
        }
        Ok(master)
    }
}

/// Name and positional key match: the i-th key predicate must equal the
/// name and value of the i-th child
fn matches_step(tree: &Tree, id: NodeId, step: &Step) -> bool {
    if tree[id].name() != step.name() && step.name() != "*" {
        return false;
    }
    let children = tree.children(id);
    step.keys().enumerate().all(|(index, (name, value))| {
        children
            .get(index)
            .is_some_and(|child| tree[child].name() == name && tree.value(child) == Some(value))
    })
}

/// Deepest element reached by walking the path, `None` when even the first
/// step has no match
fn find_deepest(forest: &Forest, steps: &[Step]) -> Option<NodeId> {
    let mut deepest = None;
    let mut candidates = forest.nodes.clone();
    for step in steps {
        let Some(matched) = candidates
            .iter()
            .find(|candidate| matches_step(&forest.tree, *candidate, step))
        else {
            break;
        };
        deepest = Some(matched);
        candidates = forest.tree.children(matched).clone();
    }
    deepest
}

/// Fragment element to graft, moved up so that it lands right below the
/// deepest master match
fn find_subfragment(fragment: &Forest, steps: &[Step], master_depth: usize) -> Option<NodeId> {
    let mut element = find_deepest(fragment, steps)?;
    let fragment_depth = depth_in(fragment, element);
    for _ in 1..fragment_depth.saturating_sub(master_depth) {
        match fragment.tree.parent(element) {
            Some(parent) => element = parent,
            None => break,
        }
    }
    Some(element)
}

/// Depth counted from the forest roots, a root has depth 1
fn depth_in(forest: &Forest, id: NodeId) -> usize {
    let mut depth = 1;
    let mut current = id;
    while !forest.nodes.contains(current) {
        match forest.tree.parent(current) {
            Some(parent) => {
                depth += 1;
                current = parent;
            }
            None => break,
        }
    }
    depth
}

/// Unlink an element from its parent, or from the forest roots. Returns
/// the former parent and the position the element occupied.
fn remove_from(forest: &mut Forest, id: NodeId) -> (Option<NodeId>, usize) {
    if let Some(position) = forest.nodes.position(id) {
        forest.nodes.remove(id);
        return (None, position);
    }
    let parent = forest.tree.parent(id);
    let position = parent
        .and_then(|p| forest.tree.children(p).position(id))
        .unwrap_or_default();
    forest.tree.detach(id);
    (parent, position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tree::NodeSet, NETCONF_NS};

    const NS: &str = "urn:ietf:params:xml:ns:yang:ietf-system";

    fn forest(roots: &[&str]) -> Forest {
        let mut tree = Tree::new();
        let nodes = roots
            .iter()
            .map(|xml| tree.parse(&format!("<{xml}")).unwrap())
            .collect::<NodeSet>();
        Forest::new(tree, nodes)
    }

    fn names(forest: &Forest, id: NodeId) -> Vec<&str> {
        forest
            .tree
            .children(id)
            .iter()
            .map(|child| forest.tree[child].name())
            .collect()
    }

    fn merge(master: Forest, fragment: Forest, path: &str) -> Forest {
        ConfigurationMergeHandler::new()
            .update_configuration(master, fragment, path)
            .unwrap()
    }

    fn root(forest: &Forest) -> NodeId {
        forest.first().unwrap()
    }

    #[test]
    fn test_add_element_at_root() {
        let result = merge(forest(&[]), forest(&["parent/>"]), "/parent");
        assert_eq!(result.len(), 1);
        assert_eq!(result.tree[root(&result)].name(), "parent");
    }

    #[test]
    fn test_create_elements_in_empty_tree() {
        let result = merge(
            forest(&[]),
            forest(&["parent><childA/></parent>"]),
            "/parent/childA",
        );
        assert_eq!(result.len(), 1);
        assert_eq!(names(&result, root(&result)), vec!["childA"]);
    }

    #[test]
    fn test_add_child_to_existing_element() {
        let result = merge(
            forest(&["parent><childA/></parent>"]),
            forest(&["parent><childB/></parent>"]),
            "/parent/childB",
        );
        assert_eq!(result.len(), 1);
        assert_eq!(names(&result, root(&result)), vec!["childA", "childB"]);
    }

    #[test]
    fn test_add_missing_elements() {
        let result = merge(
            forest(&["parent/>"]),
            forest(&["parent><childA><grandChildA/></childA></parent>"]),
            "/parent/childA/grandChildA",
        );
        let parent = root(&result);
        assert_eq!(names(&result, parent), vec!["childA"]);
        let child = result.tree.child(parent, "childA").unwrap();
        assert_eq!(names(&result, child), vec!["grandChildA"]);
    }

    #[test]
    fn test_delete_element() {
        let result = merge(
            forest(&["parent><childA/><childB/></parent>"]),
            forest(&[]),
            "/parent/childB",
        );
        assert_eq!(names(&result, root(&result)), vec!["childA"]);
    }

    #[test]
    fn test_delete_by_key() {
        let result = merge(
            forest(&[
                "parent><childA><leaf>value1</leaf></childA><childA><leaf>value2</leaf></childA></parent>",
            ]),
            forest(&[]),
            r#"/parent/childA[leaf="value2"]"#,
        );
        let parent = root(&result);
        assert_eq!(names(&result, parent), vec!["childA"]);
        let leaf = result.tree.get_first(parent, "childA/leaf").unwrap().unwrap();
        assert_eq!(result.tree.value(leaf), Some("value1"));
    }

    #[test]
    fn test_delete_empty_parents() {
        let result = merge(
            forest(&["parent><childA><grandChildA/></childA><childB/></parent>"]),
            forest(&[]),
            "/parent/childA/grandChildA",
        );
        assert_eq!(names(&result, root(&result)), vec!["childB"]);

        let result = merge(
            forest(&["parent><childA><grandChildA/></childA></parent>"]),
            forest(&[]),
            "/parent/childA/grandChildA",
        );
        assert_eq!(result.len(), 1);
        assert!(result.tree.children(root(&result)).is_empty());

        let result = merge(forest(&["parent><childA/></parent>"]), forest(&[]), "/parent");
        assert!(result.is_empty());
    }

    #[test]
    fn test_append_new_sibling() {
        let result = merge(
            forest(&["A0><B0><C0/></B0><B1/></A0>"]),
            forest(&["A0><B2/></A0>"]),
            "/A0/B2",
        );
        let a0 = root(&result);
        assert_eq!(names(&result, a0), vec!["B0", "B1", "B2"]);
        let b0 = result.tree.child(a0, "B0").unwrap();
        assert_eq!(names(&result, b0), vec!["C0"]);
    }

    #[test]
    fn test_replace_existing_children_in_place() {
        let result = merge(
            forest(&[
                "parent><childA><grandChildA1/><grandChildA2/></childA><childB><grandChildB/></childB></parent>",
            ]),
            forest(&["parent><childA><grandChildA1/><grandChildA3/></childA></parent>"]),
            "/parent/childA",
        );
        let parent = root(&result);
        assert_eq!(names(&result, parent), vec!["childA", "childB"]);
        let child = result.tree.child(parent, "childA").unwrap();
        assert_eq!(names(&result, child), vec!["grandChildA1", "grandChildA3"]);
    }

    #[test]
    fn test_update_attribute() {
        let result = merge(
            forest(&[r#"parent><childA Attr="Old Value"/></parent>"#]),
            forest(&[r#"parent><childA Attr="New Value"/></parent>"#]),
            "/parent/childA",
        );
        let child = result.tree.child(root(&result), "childA").unwrap();
        assert_eq!(result.tree.attr_value(child, "Attr"), Some("New Value"));
        assert_eq!(result.tree.children(root(&result)).len(), 1);
    }

    #[test]
    fn test_update_top_level_element() {
        let result = merge(
            forest(&["parent><childA/></parent>", "sibling/>"]),
            forest(&["parent><childB/></parent>"]),
            "/parent",
        );
        assert_eq!(result.len(), 2);
        assert_eq!(names(&result, root(&result)), vec!["childB"]);
        assert_eq!(result.tree[result.nodes.get(1).unwrap()].name(), "sibling");
    }

    #[test]
    fn test_empty_path_returns_fragment() {
        for path in ["", "/"] {
            let result = merge(forest(&["parent1/>"]), forest(&["parent2/>"]), path);
            assert_eq!(result.len(), 1);
            assert_eq!(result.tree[root(&result)].name(), "parent2");
        }
    }

    #[test]
    fn test_unmatched_fragment_is_ignored() {
        let result = merge(
            forest(&["parent/>"]),
            forest(&["garbage/>"]),
            "/parent/childX",
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result.tree[root(&result)].name(), "parent");
        assert!(result.tree.children(root(&result)).is_empty());
    }

    #[test]
    fn test_namespaces_survive_import() {
        let master = forest(&[format!(r#"system xmlns="{NS}"><ntp/></system>"#).as_str()]);
        let fragment = forest(&[format!(
            r#"sys:system xmlns:sys="{NS}" xmlns:nc="{NETCONF_NS}"><sys:dns nc:operation="merge"/></sys:system>"#
        )
        .as_str()]);
        let result = merge(master, fragment, "/system/dns");
        let dns = result.tree.child(root(&result), "dns").unwrap();
        assert_eq!(result.tree[dns].namespace(), NS);
        assert_eq!(result.tree.qualified_name(dns), "sys:dns");
        assert_eq!(result.tree.attr_value(dns, "operation"), Some("merge"));
    }

    /// Known limitation: the walk commits to the first sibling that matches a
    /// step and does not backtrack when a later step fails below it.
    #[test]
    fn test_first_match_does_not_backtrack() {
        let result = merge(
            forest(&["a><b><c/></b><b><d/></b></a>"]),
            forest(&[]),
            "/a/b/d",
        );
        let a = root(&result);
        // the second <b> still holds <d>, nothing was removed
        assert_eq!(names(&result, a), vec!["b", "b"]);
        let second = result.tree.children(a).get(1).unwrap();
        assert_eq!(names(&result, second), vec!["d"]);
    }

    #[test]
    fn test_invalid_path() {
        assert!(ConfigurationMergeHandler::new()
            .update_configuration(forest(&[]), forest(&[]), "/a[b='c")
            .is_err());
    }
}
