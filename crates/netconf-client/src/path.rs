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

//! Location paths over the element tree.
//!
//! A path is a `/` separated list of steps. Each step is an optional axis
//! (`child::`, `self::` or `parent::`, with `.` and `..` as shorthands), an
//! optionally prefixed name (`*` matches any name) and zero or more
//! predicates:
//!
//! ```text
//! /hosts/host[name='john'][@nc:operation="merge"]/interfaces
//! ```
//!
//! `[key='value']` requires a child named `key` with that value, and
//! `[@attr='value']` requires an attribute. The same grammar is used to
//! search trees ([LocationPath]), to build element skeletons
//! ([PathCreate]), and by the configuration merge engine.

use crate::{
    prefix::PrefixMap,
    tree::{Attribute, NodeId, NodeSet, Tree},
};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum PathError {
    #[strum(to_string = "empty location path")]
    Empty,

    #[strum(to_string = "invalid location step `{0}`")]
    InvalidStep(String),

    #[strum(to_string = "invalid predicate `{0}`")]
    InvalidPredicate(String),

    #[strum(to_string = "unbalanced quotes or brackets in `{0}`")]
    Unbalanced(String),

    #[strum(to_string = "unknown namespace prefix `{0}`")]
    UnknownPrefix(String),

    #[strum(to_string = "axis `{0}` cannot be used to create elements")]
    UnsupportedAxis(Axis),
}

impl std::error::Error for PathError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, strum_macros::Display)]
pub enum Axis {
    #[default]
    #[strum(to_string = "child")]
    Child,

    #[strum(to_string = "self")]
    SelfNode,

    #[strum(to_string = "parent")]
    Parent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `[name='value']`
    Key { name: Box<str>, value: Box<str> },

    /// `[@name='value']`, the name may be prefixed
    Attribute {
        prefix: Option<Box<str>>,
        name: Box<str>,
        value: Box<str>,
    },
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key { name, value } => write!(f, "[{name}='{value}']"),
            Self::Attribute {
                prefix: Some(prefix),
                name,
                value,
            } => write!(f, "[@{prefix}:{name}='{value}']"),
            Self::Attribute {
                prefix: None,
                name,
                value,
            } => write!(f, "[@{name}='{value}']"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    axis: Axis,
    prefix: Option<Box<str>>,
    name: Box<str>,
    predicates: Vec<Predicate>,
}

impl Step {
    pub const fn axis(&self) -> Axis {
        self.axis
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Key predicates in declaration order
    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.predicates.iter().filter_map(|p| match p {
            Predicate::Key { name, value } => Some((name.as_ref(), value.as_ref())),
            Predicate::Attribute { .. } => None,
        })
    }

    fn is_wildcard(&self) -> bool {
        self.name.as_ref() == "*"
    }

    fn parse(input: &str) -> Result<Self, PathError> {
        let input = input.trim();
        match input {
            "" => return Err(PathError::InvalidStep(input.to_string())),
            "." => {
                return Ok(Self {
                    axis: Axis::SelfNode,
                    prefix: None,
                    name: "*".into(),
                    predicates: vec![],
                })
            }
            ".." => {
                return Ok(Self {
                    axis: Axis::Parent,
                    prefix: None,
                    name: "*".into(),
                    predicates: vec![],
                })
            }
            _ => {}
        }
        let (test, predicates) = match input.find('[') {
            Some(index) => (&input[..index], parse_predicates(&input[index..])?),
            None => (input, vec![]),
        };
        let (axis, test) = match test.split_once("::") {
            Some(("child", rest)) => (Axis::Child, rest),
            Some(("self", rest)) => (Axis::SelfNode, rest),
            Some(("parent", rest)) => (Axis::Parent, rest),
            Some(_) => return Err(PathError::InvalidStep(input.to_string())),
            None => (Axis::Child, test),
        };
        let (prefix, name) = match test.split_once(':') {
            Some((prefix, name)) => (Some(prefix), name),
            None => (None, test),
        };
        if name.is_empty() || !is_valid_name(name) || prefix.is_some_and(|p| !is_valid_name(p)) {
            return Err(PathError::InvalidStep(input.to_string()));
        }
        Ok(Self {
            axis,
            prefix: prefix.map(Into::into),
            name: name.into(),
            predicates,
        })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.axis != Axis::Child {
            write!(f, "{}::", self.axis)?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, "{prefix}:")?;
        }
        write!(f, "{}", self.name)?;
        for predicate in &self.predicates {
            write!(f, "{predicate}")?;
        }
        Ok(())
    }
}

fn is_valid_name(name: &str) -> bool {
    name == "*"
        || name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Strip matching single or double quotes
fn unquote(value: &str) -> Result<&str, PathError> {
    let value = value.trim();
    let mut chars = value.chars();
    match (chars.next(), chars.next_back()) {
        (Some(open @ ('\'' | '"')), Some(close)) if open == close && value.len() >= 2 => {
            Ok(&value[1..value.len() - 1])
        }
        (Some('\'' | '"'), _) => Err(PathError::Unbalanced(value.to_string())),
        _ => Ok(value),
    }
}

fn parse_predicates(input: &str) -> Result<Vec<Predicate>, PathError> {
    let mut predicates = vec![];
    let mut rest = input;
    while !rest.is_empty() {
        let body = rest
            .strip_prefix('[')
            .ok_or_else(|| PathError::InvalidPredicate(rest.to_string()))?;
        let end = find_unquoted(body, ']').ok_or_else(|| PathError::Unbalanced(rest.to_string()))?;
        predicates.push(parse_predicate(&body[..end])?);
        rest = body[end + 1..].trim_start();
    }
    Ok(predicates)
}

fn parse_predicate(body: &str) -> Result<Predicate, PathError> {
    let (name, value) = body
        .split_once('=')
        .ok_or_else(|| PathError::InvalidPredicate(body.to_string()))?;
    let name = name.trim();
    let value: Box<str> = unquote(value)?.into();
    if let Some(attr) = name.strip_prefix('@') {
        let (prefix, name) = match attr.split_once(':') {
            Some((prefix, name)) => (Some(prefix.into()), name),
            None => (None, attr),
        };
        if name.is_empty() || !is_valid_name(name) {
            return Err(PathError::InvalidPredicate(body.to_string()));
        }
        Ok(Predicate::Attribute {
            prefix,
            name: name.into(),
            value,
        })
    } else {
        if name.is_empty() || !is_valid_name(name) {
            return Err(PathError::InvalidPredicate(body.to_string()));
        }
        Ok(Predicate::Key {
            name: name.into(),
            value,
        })
    }
}

/// Byte index of the first `needle` outside of quotes and brackets
fn find_unquoted(input: &str, needle: char) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    for (index, c) in input.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, c) if c == needle && depth == 0 => return Some(index),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

/// Split a path on `/` separators that are outside of predicates
fn split_steps(input: &str) -> Result<Vec<&str>, PathError> {
    let mut steps = vec![];
    let mut rest = input;
    loop {
        match find_unquoted(rest, '/') {
            Some(index) => {
                steps.push(&rest[..index]);
                rest = &rest[index + 1..];
            }
            None => {
                steps.push(rest);
                break;
            }
        }
    }
    let quotes = input.chars().filter(|c| *c == '\'' || *c == '"').count();
    if quotes % 2 != 0 {
        return Err(PathError::Unbalanced(input.to_string()));
    }
    Ok(steps)
}

/// Parsed location path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

impl LocationPath {
    pub const fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Select the nodes reached from `context`. Absolute paths start at the
    /// root of the context node, their first step names the root itself.
    pub fn evaluate(&self, tree: &Tree, context: NodeId) -> NodeSet {
        let mut steps = self.steps.iter();
        let mut current = if self.absolute {
            let root = tree.root(context);
            match steps.next() {
                Some(first) if step_matches(tree, root, first) => NodeSet::from(vec![root]),
                Some(_) => return NodeSet::new(),
                None => NodeSet::from(vec![root]),
            }
        } else {
            NodeSet::from(vec![context])
        };
        for step in steps {
            let mut next = NodeSet::new();
            for node in &current {
                let candidates: Vec<NodeId> = match step.axis {
                    Axis::Child => tree.children(node).iter().collect(),
                    Axis::SelfNode => vec![node],
                    Axis::Parent => tree.parent(node).into_iter().collect(),
                };
                for candidate in candidates {
                    if step_matches(tree, candidate, step) && !next.contains(candidate) {
                        next.push(candidate);
                    }
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

impl FromStr for LocationPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        let (absolute, rest) = match s.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let steps = split_steps(rest)?
            .into_iter()
            .map(Step::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { absolute, steps })
    }
}

impl fmt::Display for LocationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        for (index, step) in self.steps.iter().enumerate() {
            if index > 0 {
                write!(f, "/")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Name test plus predicates of a single step against one node
pub(crate) fn step_matches(tree: &Tree, id: NodeId, step: &Step) -> bool {
    let element = &tree[id];
    if !step.is_wildcard() && element.name() != step.name.as_ref() {
        return false;
    }
    if let Some(prefix) = step.prefix.as_deref() {
        match tree.lookup_context_prefix(id, prefix) {
            Some(namespace) if namespace == element.namespace() => {}
            _ => return false,
        }
    }
    step.predicates.iter().all(|predicate| match predicate {
        Predicate::Key { name, value } => tree.children(id).iter().any(|child| {
            tree[child].name() == name.as_ref() && tree.value(child) == Some(value.as_ref())
        }),
        Predicate::Attribute {
            prefix,
            name,
            value,
        } => {
            let namespace = match prefix.as_deref() {
                Some(prefix) => match tree.lookup_context_prefix(id, prefix) {
                    Some(namespace) => Some(namespace),
                    None => return false,
                },
                None => None,
            };
            element.attrs().iter().any(|attr| {
                attr.name() == name.as_ref()
                    && attr.value() == value.as_ref()
                    && (namespace.is_none() || attr.namespace() == namespace)
            })
        }
    })
}

/// Build a chain of fresh elements from an absolute or relative path.
///
/// Key predicates are kept as metadata of the steps and are not turned into
/// child leaves. Attribute predicates set the attribute on the created
/// element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCreate {
    path: LocationPath,
}

impl PathCreate {
    pub fn new(path: &str) -> Result<Self, PathError> {
        let path: LocationPath = path.parse()?;
        if let Some(step) = path.steps.iter().find(|s| s.axis != Axis::Child) {
            return Err(PathError::UnsupportedAxis(step.axis));
        }
        if let Some(step) = path.steps.iter().find(|s| s.is_wildcard()) {
            return Err(PathError::InvalidStep(step.to_string()));
        }
        Ok(Self { path })
    }

    pub fn steps(&self) -> &[Step] {
        self.path.steps()
    }

    /// Create the elements in `tree` and return the root of the chain.
    ///
    /// Prefixed steps are resolved with `prefixes`. An unprefixed step
    /// inherits the namespace of its parent, the first one uses the default
    /// namespace of `prefixes` or the empty namespace when there is none.
    /// A non-empty `prefixes` is attached to the root element.
    pub fn create(&self, tree: &mut Tree, prefixes: &PrefixMap) -> Result<NodeId, PathError> {
        let mut root: Option<NodeId> = None;
        let mut parent: Option<NodeId> = None;
        for step in &self.path.steps {
            let namespace: Box<str> = match (step.prefix.as_deref(), parent) {
                (Some(prefix), _) => prefixes
                    .prefix_to_ns(prefix)
                    .ok_or_else(|| PathError::UnknownPrefix(prefix.to_string()))?
                    .into(),
                (None, Some(parent)) => tree[parent].namespace().into(),
                (None, None) => prefixes.prefix_to_ns("").unwrap_or_default().into(),
            };
            let id = tree.create(namespace, step.name.clone());
            for predicate in &step.predicates {
                if let Predicate::Attribute {
                    prefix,
                    name,
                    value,
                } = predicate
                {
                    let attr = match prefix.as_deref() {
                        Some(prefix) => Attribute::with_namespace(
                            prefixes
                                .prefix_to_ns(prefix)
                                .ok_or_else(|| PathError::UnknownPrefix(prefix.to_string()))?,
                            name.clone(),
                            value.clone(),
                        ),
                        None => Attribute::new(name.clone(), value.clone()),
                    };
                    tree.set_attr(id, attr);
                }
            }
            match parent {
                Some(parent) => tree.add_child(parent, id),
                None => root = Some(id),
            }
            parent = Some(id);
        }
        let root = root.ok_or(PathError::Empty)?;
        if !prefixes.is_empty() {
            tree.set_prefixes(root, prefixes);
        }
        Ok(root)
    }
}

impl FromStr for PathCreate {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{prefix::Prefix, NETCONF_NS};
    use rstest::rstest;

    fn sample() -> (Tree, NodeId) {
        let xml = r#"<hosts xmlns="urn:example:hosts" xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0">
  <host><name>john</name><ip>10.0.0.1</ip></host>
  <host nc:operation="delete"><name>jane</name><ip>10.0.0.2</ip></host>
</hosts>"#;
        Tree::from_xml(xml).unwrap()
    }

    #[rstest]
    #[case("/hosts/host[name='john']", 2)]
    #[case(r#"hosts/host[name = "jane"]/ip"#, 3)]
    #[case("self::x:a/parent::*/b[@nc:operation='merge']", 3)]
    #[case("../..", 2)]
    #[case("a[k='with/slash']/b", 2)]
    fn test_parse_steps(#[case] path: &str, #[case] count: usize) {
        let parsed: LocationPath = path.parse().unwrap();
        assert_eq!(parsed.steps().len(), count, "{path}");
    }

    #[rstest]
    #[case("")]
    #[case("/a/")]
    #[case("a[k='v'")]
    #[case("a[k='v]")]
    #[case("a[noequals]")]
    #[case("bogus::a")]
    #[case("a b")]
    fn test_parse_errors(#[case] path: &str) {
        assert!(path.parse::<LocationPath>().is_err(), "{path}");
    }

    #[test]
    fn test_step_display() {
        let parsed: LocationPath = "/hosts/host[name='john'][@nc:operation='merge']".parse().unwrap();
        assert_eq!(
            parsed.to_string(),
            "/hosts/host[name='john'][@nc:operation='merge']"
        );
        let keys: Vec<_> = parsed.steps()[1].keys().collect();
        assert_eq!(keys, vec![("name", "john")]);
    }

    #[test]
    fn test_select_with_predicates() {
        let (tree, hosts) = sample();
        let john = tree.select(hosts, "/hosts/host[name='john']").unwrap();
        assert_eq!(john.len(), 1);
        let ip = tree.get_first(hosts, "host[name='jane']/ip").unwrap().unwrap();
        assert_eq!(tree.value(ip), Some("10.0.0.2"));
        assert_eq!(tree.select(hosts, "host").unwrap().len(), 2);
        assert_eq!(tree.select(hosts, "host/*").unwrap().len(), 4);
        assert!(tree.select(hosts, "host[name='nobody']").unwrap().is_empty());
        assert!(tree.select(hosts, "/other").unwrap().is_empty());

        let deleted = tree.select(hosts, "host[@nc:operation='delete']").unwrap();
        assert_eq!(deleted.len(), 1);
        assert!(tree.select(hosts, "host[@nc:operation='create']").unwrap().is_empty());
    }

    #[test]
    fn test_select_axes() {
        let (tree, hosts) = sample();
        let ip = tree.get_first(hosts, "host/ip").unwrap().unwrap();
        assert_eq!(tree.get_first(ip, "..").unwrap(), tree.parent(ip));
        assert_eq!(tree.get_first(ip, "../..").unwrap(), Some(hosts));
        assert_eq!(tree.get_first(hosts, "self::hosts").unwrap(), Some(hosts));
        assert_eq!(tree.get_first(hosts, "self::nc:hosts").unwrap(), None);
        assert_eq!(tree.get_first(ip, "parent::host/name").unwrap().map(|n| tree.value(n)), Some(Some("john")));
    }

    #[test]
    fn test_path_create_does_not_materialize_keys() {
        let mut tree = Tree::new();
        let create = PathCreate::new("/hosts/host[name='john']").unwrap();
        let hosts = create.create(&mut tree, &PrefixMap::new()).unwrap();
        assert_eq!(tree[hosts].name(), "hosts");
        assert_eq!(tree[hosts].namespace(), "");
        assert!(tree[hosts].prefixes().is_none());
        let host = tree.children(hosts).first().unwrap();
        assert_eq!(tree[host].name(), "host");
        assert!(tree.children(host).is_empty());
        assert!(tree[host].attrs().is_empty());
        assert_eq!(create.steps()[1].keys().collect::<Vec<_>>(), vec![("name", "john")]);
    }

    #[test]
    fn test_path_create_namespaces_and_attributes() {
        let prefixes = PrefixMap::from(vec![
            Prefix::new("", "urn:example:hosts"),
            Prefix::new("if", "urn:example:interfaces"),
            Prefix::new("nc", NETCONF_NS),
        ]);
        let mut tree = Tree::new();
        let create = PathCreate::new("/hosts/host[@nc:operation='replace']/if:interface/mtu").unwrap();
        let hosts = create.create(&mut tree, &prefixes).unwrap();
        assert_eq!(tree[hosts].namespace(), "urn:example:hosts");
        assert_eq!(tree[hosts].prefixes(), Some(&prefixes));
        let host = tree.get_first(hosts, "host").unwrap().unwrap();
        assert_eq!(tree.attr_value(host, "operation"), Some("replace"));
        assert_eq!(tree[host].attrs()[0].namespace(), Some(NETCONF_NS));
        let mtu = tree.get_first(hosts, "host/interface/mtu").unwrap().unwrap();
        assert_eq!(tree[mtu].namespace(), "urn:example:interfaces");

        assert_eq!(
            PathCreate::new("/x:hosts").unwrap().create(&mut tree, &prefixes),
            Err(PathError::UnknownPrefix("x".to_string()))
        );
        assert_eq!(
            PathCreate::new("../hosts"),
            Err(PathError::UnsupportedAxis(Axis::Parent))
        );
    }
}
