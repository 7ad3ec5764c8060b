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

//! Namespace aware XML element tree.
//!
//! Elements live in an arena ([Tree]) and are addressed with [NodeId]
//! handles. A node is either a leaf carrying an optional text value or a
//! container carrying ordered children; a node that gains children while
//! parsing loses its text value. Every element may carry its own
//! [PrefixMap] which, together with the maps of its ancestors and the
//! tree-wide defaults, resolves namespaces to prefixes when encoding.
//!
//! Detaching a node only unlinks it, the arena slot stays allocated until
//! the whole [Tree] is dropped.

use crate::{
    capabilities::Capabilities,
    path::{LocationPath, PathError},
    prefix::{Prefix, PrefixMap},
    schema::{RevisionError, RevisionVerdict, SchemaRegistry, Tagpath},
    xml_utils::{ParsingError, XmlParser},
    NETCONF_NS,
};
use chrono::NaiveDate;
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    name::PrefixDeclaration,
    NsReader,
};
use std::{
    fmt, io,
    ops::{Index, IndexMut},
    sync::Arc,
};

/// Name of the `nc:operation` attribute used to mark edit operations
pub const OPERATION_ATTR: &str = "operation";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    Container,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    namespace: Option<Box<str>>,
    name: Box<str>,
    value: Box<str>,
}

impl Attribute {
    pub fn new(name: impl Into<Box<str>>, value: impl Into<Box<str>>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn with_namespace(
        namespace: impl Into<Box<str>>,
        name: impl Into<Box<str>>,
        value: impl Into<Box<str>>,
    ) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Ordered collection of node handles, may hold duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet(Vec<NodeId>);

impl NodeSet {
    pub const fn new() -> Self {
        Self(vec![])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<NodeId> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<NodeId> {
        self.0.last().copied()
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.0.get(index).copied()
    }

    pub fn push(&mut self, id: NodeId) {
        self.0.push(id);
    }

    pub fn insert(&mut self, index: usize, id: NodeId) {
        let index = index.min(self.0.len());
        self.0.insert(index, id);
    }

    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.0.iter().position(|x| *x == id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.0.contains(&id)
    }

    /// Remove the first occurrence of `id`, returns false if absent
    pub fn remove(&mut self, id: NodeId) -> bool {
        match self.position(id) {
            Some(index) => {
                self.0.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.0
    }
}

impl From<Vec<NodeId>> for NodeSet {
    fn from(value: Vec<NodeId>) -> Self {
        Self(value)
    }
}

impl FromIterator<NodeId> for NodeSet {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = NodeId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, NodeId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    namespace: Box<str>,
    name: Box<str>,
    value: Option<Box<str>>,
    attrs: Vec<Attribute>,
    children: NodeSet,
    parent: Option<NodeId>,
    prefixes: Option<PrefixMap>,
}

impl Element {
    fn new(namespace: Box<str>, name: Box<str>) -> Self {
        Self {
            namespace,
            name,
            value: None,
            attrs: vec![],
            children: NodeSet::new(),
            parent: None,
            prefixes: None,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn attrs(&self) -> &[Attribute] {
        &self.attrs
    }

    pub const fn children(&self) -> &NodeSet {
        &self.children
    }

    pub const fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub const fn prefixes(&self) -> Option<&PrefixMap> {
        self.prefixes.as_ref()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn kind(&self) -> NodeKind {
        if self.has_children() {
            NodeKind::Container
        } else {
            NodeKind::Leaf
        }
    }

    /// Same name, same namespace and same value. A node without value only
    /// equals another node without value.
    pub fn shallow_eq(&self, other: &Element) -> bool {
        self.name == other.name && self.namespace == other.namespace && self.value == other.value
    }
}

/// Error raised while encoding a tree
#[derive(Debug, strum_macros::Display)]
pub enum EncodeError {
    #[strum(to_string = "std::io:Error: `{0}`")]
    Io(io::Error),

    #[strum(to_string = "{0}")]
    Revision(RevisionError),

    #[strum(to_string = "encoded XML is not valid UTF-8: `{0}`")]
    Utf8(std::string::FromUtf8Error),
}

impl std::error::Error for EncodeError {}

impl From<io::Error> for EncodeError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<RevisionError> for EncodeError {
    fn from(value: RevisionError) -> Self {
        Self::Revision(value)
    }
}

impl From<std::string::FromUtf8Error> for EncodeError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::Utf8(value)
    }
}

/// What the encoder needs to adapt a tree to an older module revision
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub capabilities: &'a Capabilities,
    pub schema: &'a SchemaRegistry,
}

/// Deep and shallow node copies within the same arena
pub trait CloneNode {
    /// Copy the node and its whole subtree, the copy has no parent
    fn clone_deep(&mut self, id: NodeId) -> NodeId;

    /// Copy the node with its value, attributes and prefixes but without its
    /// children
    fn clone_shallow(&mut self, id: NodeId) -> NodeId;
}

/// Arena of elements sharing the same default prefix table
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Element>,
    default_prefixes: Arc<PrefixMap>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<NodeId> for Tree {
    type Output = Element;

    fn index(&self, index: NodeId) -> &Self::Output {
        &self.nodes[index.0]
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, index: NodeId) -> &mut Self::Output {
        &mut self.nodes[index.0]
    }
}

impl Tree {
    /// Empty tree using [PrefixMap::netconf_defaults] as default prefixes
    pub fn new() -> Self {
        Self::with_default_prefixes(Arc::new(PrefixMap::netconf_defaults()))
    }

    pub fn with_default_prefixes(default_prefixes: Arc<PrefixMap>) -> Self {
        Self {
            nodes: vec![],
            default_prefixes,
        }
    }

    pub const fn default_prefixes(&self) -> &Arc<PrefixMap> {
        &self.default_prefixes
    }

    /// Number of allocated nodes, including detached ones
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&Element> {
        self.nodes.get(id.0)
    }

    fn alloc(&mut self, element: Element) -> NodeId {
        self.nodes.push(element);
        NodeId(self.nodes.len() - 1)
    }

    /// Allocate a new detached element
    pub fn create(&mut self, namespace: impl Into<Box<str>>, name: impl Into<Box<str>>) -> NodeId {
        self.alloc(Element::new(namespace.into(), name.into()))
    }

    pub fn create_leaf(
        &mut self,
        namespace: impl Into<Box<str>>,
        name: impl Into<Box<str>>,
        value: impl Into<Box<str>>,
    ) -> NodeId {
        let id = self.create(namespace, name);
        self[id].value = Some(value.into());
        id
    }

    /// Create and append a child in the namespace of its parent
    pub fn create_child(&mut self, parent: NodeId, name: impl Into<Box<str>>) -> NodeId {
        let namespace = self[parent].namespace.clone();
        let id = self.create(namespace, name);
        self.add_child(parent, id);
        id
    }

    pub fn create_child_leaf(
        &mut self,
        parent: NodeId,
        name: impl Into<Box<str>>,
        value: impl Into<Box<str>>,
    ) -> NodeId {
        let id = self.create_child(parent, name);
        self[id].value = Some(value.into());
        id
    }

    /// Append `child` to `parent`, detaching it from any previous parent
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self[child].parent = Some(parent);
        self[parent].children.push(child);
    }

    /// Insert `child` at `index` among the children of `parent`, an index
    /// past the end appends
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        self[child].parent = Some(parent);
        self[parent].children.insert(index, child);
    }

    /// Unlink the node from its parent, the node keeps its subtree
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self[id].parent.take() {
            self[parent].children.remove(id);
        }
    }

    pub fn children(&self, id: NodeId) -> &NodeSet {
        &self[id].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self[id].parent
    }

    pub fn root(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self[current].parent {
            current = parent;
        }
        current
    }

    /// Number of elements from the root to `id`, the root has depth 1
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 1;
        let mut current = id;
        while let Some(parent) = self[current].parent {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// First child with the given local name
    pub fn child(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self[id]
            .children
            .iter()
            .find(|child| self[*child].name.as_ref() == name)
    }

    pub fn value(&self, id: NodeId) -> Option<&str> {
        self[id].value.as_deref()
    }

    pub fn set_value(&mut self, id: NodeId, value: impl Into<Box<str>>) {
        self[id].value = Some(value.into());
    }

    pub fn clear_value(&mut self, id: NodeId) -> Option<Box<str>> {
        self[id].value.take()
    }

    /// Value of the first attribute with the given local name
    pub fn attr_value(&self, id: NodeId, name: &str) -> Option<&str> {
        self[id]
            .attrs
            .iter()
            .find(|attr| attr.name.as_ref() == name)
            .map(|attr| attr.value.as_ref())
    }

    /// Add or replace an attribute, identified by namespace and local name
    pub fn set_attr(&mut self, id: NodeId, attr: Attribute) {
        let attrs = &mut self[id].attrs;
        match attrs
            .iter_mut()
            .find(|a| a.name == attr.name && a.namespace == attr.namespace)
        {
            Some(existing) => existing.value = attr.value,
            None => attrs.push(attr),
        }
    }

    /// Remove every attribute with the given local name
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> bool {
        let attrs = &mut self[id].attrs;
        let before = attrs.len();
        attrs.retain(|attr| attr.name.as_ref() != name);
        attrs.len() != before
    }

    /// Set the element prefix map, overwriting existing bindings of the
    /// same names
    pub fn set_prefixes(&mut self, id: NodeId, prefixes: &PrefixMap) {
        match &mut self[id].prefixes {
            Some(existing) => existing.set(prefixes),
            None => self[id].prefixes = Some(prefixes.clone()),
        }
    }

    pub fn set_prefix(&mut self, id: NodeId, prefix: Prefix) {
        self[id]
            .prefixes
            .get_or_insert_with(PrefixMap::new)
            .set_prefix(prefix);
    }

    /// Bindings added only when not already declared on the element
    pub fn merge_prefixes(&mut self, id: NodeId, prefixes: &PrefixMap) {
        self[id]
            .prefixes
            .get_or_insert_with(PrefixMap::new)
            .merge(prefixes);
    }

    pub fn remove_prefix(&mut self, id: NodeId, name: &str) -> Option<Prefix> {
        self[id].prefixes.as_mut().and_then(|p| p.remove(name))
    }

    /// Resolve a namespace to a prefix, searching the element, then its
    /// ancestors and finally the default prefix table
    pub fn ns_to_prefix(&self, id: NodeId, namespace: &str) -> Option<&str> {
        self.declared_prefix(id, namespace)
            .or_else(|| self.default_prefixes.ns_to_prefix(namespace))
    }

    /// Prefix bound to the namespace by the element or one of its ancestors
    fn declared_prefix(&self, id: NodeId, namespace: &str) -> Option<&str> {
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(prefix) = self[node]
                .prefixes
                .as_ref()
                .and_then(|p| p.ns_to_prefix(namespace))
            {
                return Some(prefix);
            }
            current = self[node].parent;
        }
        None
    }

    /// Bind on the subtree every namespace it uses that is only known to the
    /// default table, or not known at all, so the subtree can be written out
    /// on its own. Unknown element namespaces become the default namespace
    /// of the element using them.
    pub fn declare_namespaces(&mut self, id: NodeId) {
        let namespace = self[id].namespace.clone();
        if !namespace.is_empty() && self.declared_prefix(id, &namespace).is_none() {
            let name: Box<str> = self
                .default_prefixes
                .ns_to_prefix(&namespace)
                .unwrap_or_default()
                .into();
            self.set_prefix(id, Prefix::new(name, namespace));
        }
        let attr_namespaces: Vec<Box<str>> = self[id]
            .attrs
            .iter()
            .filter_map(|attr| attr.namespace.clone())
            .collect();
        for namespace in attr_namespaces {
            if self.declared_prefix(id, &namespace).is_some() {
                continue;
            }
            // unprefixed attributes have no namespace, so only a named prefix helps
            let name: Option<Box<str>> = self
                .default_prefixes
                .ns_to_prefix(&namespace)
                .filter(|name| !name.is_empty())
                .map(Into::into);
            if let Some(name) = name {
                self.set_prefix(id, Prefix::new(name, namespace));
            }
        }
        let children: Vec<NodeId> = self[id].children.iter().collect();
        for child in children {
            self.declare_namespaces(child);
        }
    }

    /// Resolve a prefix name to a namespace in the context of the element
    pub fn lookup_context_prefix(&self, id: NodeId, name: &str) -> Option<&str> {
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(namespace) = self[node]
                .prefixes
                .as_ref()
                .and_then(|p| p.prefix_to_ns(name))
            {
                return Some(namespace);
            }
            current = self[node].parent;
        }
        self.default_prefixes.prefix_to_ns(name)
    }

    /// All bindings visible at the element, inner declarations win
    pub fn context_prefixes(&self, id: NodeId) -> PrefixMap {
        let mut context = PrefixMap::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if let Some(prefixes) = &self[node].prefixes {
                context.merge(prefixes);
            }
            current = self[node].parent;
        }
        context.merge(&self.default_prefixes);
        context
    }

    /// `prefix:name`, or the bare name when the namespace is the default
    /// one or empty. An unresolvable namespace is written with the `unknown`
    /// prefix.
    pub fn qualified_name(&self, id: NodeId) -> String {
        let element = &self[id];
        if element.namespace.is_empty() {
            return element.name.to_string();
        }
        match self.ns_to_prefix(id, &element.namespace) {
            Some("") => element.name.to_string(),
            Some(prefix) => format!("{prefix}:{}", element.name),
            None => format!("unknown:{}", element.name),
        }
    }

    fn qualified_attr_name(&self, id: NodeId, attr: &Attribute) -> String {
        match attr.namespace.as_deref() {
            None => attr.name.to_string(),
            Some(namespace) => match self.ns_to_prefix(id, namespace) {
                Some("") => attr.name.to_string(),
                Some(prefix) => format!("{prefix}:{}", attr.name),
                None => format!("unknown:{}", attr.name),
            },
        }
    }

    /// Absolute location path of the element. Steps are qualified only
    /// where the namespace changes from the parent.
    pub fn path(&self, id: NodeId) -> String {
        let mut steps = vec![];
        let mut current = Some(id);
        while let Some(node) = current {
            let parent = self[node].parent;
            let same_namespace = parent.is_some_and(|p| self[p].namespace == self[node].namespace);
            if same_namespace {
                steps.push(self[node].name.to_string());
            } else {
                steps.push(self.qualified_name(node));
            }
            current = parent;
        }
        steps.reverse();
        format!("/{}", steps.join("/"))
    }

    pub fn tagpath(&self, id: NodeId) -> Tagpath {
        let mut names = vec![];
        let mut current = Some(id);
        while let Some(node) = current {
            names.push(self[node].name.clone());
            current = self[node].parent;
        }
        names.reverse();
        Tagpath::new(names)
    }

    /// Evaluate a location path with `id` as context node
    pub fn select(&self, id: NodeId, path: &str) -> Result<NodeSet, PathError> {
        let path: LocationPath = path.parse()?;
        Ok(path.evaluate(self, id))
    }

    pub fn get_first(&self, id: NodeId, path: &str) -> Result<Option<NodeId>, PathError> {
        Ok(self.select(id, path)?.first())
    }

    fn mark(&mut self, id: NodeId, operation: &str) {
        self.set_attr(
            id,
            Attribute::with_namespace(NETCONF_NS, OPERATION_ATTR, operation),
        );
    }

    pub fn mark_create(&mut self, id: NodeId) {
        self.mark(id, "create");
    }

    pub fn mark_delete(&mut self, id: NodeId) {
        self.mark(id, "delete");
    }

    pub fn mark_replace(&mut self, id: NodeId) {
        self.mark(id, "replace");
    }

    pub fn mark_merge(&mut self, id: NodeId) {
        self.mark(id, "merge");
    }

    pub fn mark_remove(&mut self, id: NodeId) {
        self.mark(id, "remove");
    }

    /// Drop the `nc:operation` attribute of the element
    pub fn remove_mark(&mut self, id: NodeId) {
        self[id].attrs.retain(|attr| {
            !(attr.name.as_ref() == OPERATION_ATTR && attr.namespace.as_deref() == Some(NETCONF_NS))
        });
    }

    /// Drop the `nc:operation` attribute of the whole subtree
    pub fn remove_marks(&mut self, id: NodeId) {
        self.remove_mark(id);
        let children = self[id].children.clone();
        for child in &children {
            self.remove_marks(child);
        }
    }

    /// Deep structural equality, including attributes and child order
    pub fn structurally_equal(&self, id: NodeId, other: &Tree, other_id: NodeId) -> bool {
        let left = &self[id];
        let right = &other[other_id];
        left.shallow_eq(right)
            && left.attrs == right.attrs
            && left.children.len() == right.children.len()
            && left
                .children
                .iter()
                .zip(right.children.iter())
                .all(|(l, r)| self.structurally_equal(l, other, r))
    }

    /// Deep copy of a subtree of another tree into this one. The root of the
    /// copy also receives the bindings its source ancestors declared.
    pub fn import(&mut self, source: &Tree, id: NodeId) -> NodeId {
        let root = self.import_subtree(source, id);
        let mut inherited = PrefixMap::new();
        let mut current = source[id].parent;
        while let Some(node) = current {
            if let Some(prefixes) = &source[node].prefixes {
                inherited.merge(prefixes);
            }
            current = source[node].parent;
        }
        if !inherited.is_empty() {
            self.merge_prefixes(root, &inherited);
        }
        root
    }

    fn import_subtree(&mut self, source: &Tree, id: NodeId) -> NodeId {
        let element = &source[id];
        let copy = self.alloc(Element {
            namespace: element.namespace.clone(),
            name: element.name.clone(),
            value: element.value.clone(),
            attrs: element.attrs.clone(),
            children: NodeSet::new(),
            parent: None,
            prefixes: element.prefixes.clone(),
        });
        for child in &element.children {
            let child_copy = self.import_subtree(source, child);
            self.add_child(copy, child_copy);
        }
        copy
    }

    /// Parse an XML document and return its root element. Namespace
    /// declarations are kept as the prefix map of the declaring element.
    pub fn parse(&mut self, xml: &str) -> Result<NodeId, ParsingError> {
        let mut reader = NsReader::from_str(xml);
        reader.config_mut().trim_text(false);
        let mut parser = XmlParser::new(reader)?;
        parser.skip_prolog()?;
        let mut stack: Vec<NodeId> = vec![];
        let mut root: Option<NodeId> = None;
        loop {
            let (start, is_empty) = match parser.peek() {
                Event::Start(start) => (Some(start.clone()), false),
                Event::Empty(start) => (Some(start.clone()), true),
                _ => (None, false),
            };
            if let Some(start) = start {
                let id = self.parse_element(&parser, &start)?;
                match stack.last() {
                    Some(parent) => self.add_child(*parent, id),
                    None => root = Some(id),
                }
                parser.next_event()?;
                if !is_empty {
                    stack.push(id);
                } else if stack.is_empty() {
                    break;
                }
                continue;
            }
            match parser.peek() {
                Event::End(_) => {
                    if let Some(id) = stack.pop() {
                        if self[id].has_children() {
                            self[id].value = None;
                        } else if self[id].value.is_none() {
                            // `<a></a>` carries an empty value, `<a/>` none
                            self[id].value = Some("".into());
                        }
                    }
                    parser.next_event()?;
                    if stack.is_empty() {
                        break;
                    }
                }
                Event::Text(_) | Event::CData(_) | Event::GeneralRef(_) => {
                    let text = parser.take_text()?;
                    if let (Some(text), Some(current)) = (text, stack.last()) {
                        let value = match self[*current].value.take() {
                            Some(existing) => format!("{existing}{text}").into(),
                            None => text.into(),
                        };
                        self[*current].value = Some(value);
                    }
                }
                Event::Eof => {
                    return Err(ParsingError::Eof);
                }
                _ => {
                    parser.next_event()?;
                }
            }
        }
        root.ok_or_else(|| ParsingError::MissingElement("document root".to_string()))
    }

    fn parse_element<R: io::BufRead>(
        &mut self,
        parser: &XmlParser<R>,
        start: &BytesStart<'_>,
    ) -> Result<NodeId, ParsingError> {
        let (namespace, name) = parser.resolve_element(start.name())?;
        let mut prefixes = PrefixMap::new();
        let mut attrs = vec![];
        for attr in start.attributes() {
            let attr = attr?;
            let value = parser.attribute_value(&attr)?;
            match attr.key.as_namespace_binding() {
                Some(PrefixDeclaration::Default) => {
                    prefixes.set_prefix(Prefix::new("", value));
                }
                Some(PrefixDeclaration::Named(prefix)) => {
                    prefixes.set_prefix(Prefix::new(std::str::from_utf8(prefix)?, value));
                }
                None => {
                    let (attr_namespace, attr_name) = parser.resolve_attribute(attr.key)?;
                    attrs.push(Attribute {
                        namespace: attr_namespace,
                        name: attr_name,
                        value,
                    });
                }
            }
        }
        let mut element = Element::new(namespace, name);
        element.attrs = attrs;
        if !prefixes.is_empty() {
            element.prefixes = Some(prefixes);
        }
        Ok(self.alloc(element))
    }

    /// Parse an XML document into a fresh tree with NETCONF defaults
    pub fn from_xml(xml: &str) -> Result<(Self, NodeId), ParsingError> {
        let mut tree = Self::new();
        let root = tree.parse(xml)?;
        Ok((tree, root))
    }

    /// Write the subtree rooted at `id`.
    ///
    /// With a context, nodes found in the schema registry are checked against
    /// the module revision the server advertises: nodes added after that
    /// revision are left out, and values or child counts the server cannot
    /// accept fail the encoding.
    pub fn encode<W: io::Write>(
        &self,
        id: NodeId,
        writer: &mut quick_xml::Writer<W>,
        context: Option<&EncodeContext<'_>>,
    ) -> Result<(), EncodeError> {
        if let Some(context) = context {
            if self.revision_verdict(id, context)? == RevisionVerdict::Omit {
                return Ok(());
            }
        }
        let element = &self[id];
        let qualified_name = self.qualified_name(id);
        let mut start = BytesStart::new(qualified_name.as_str());
        if let Some(prefixes) = &element.prefixes {
            for prefix in prefixes {
                start.push_attribute((prefix.xmlns_attribute().as_str(), prefix.namespace()));
            }
        }
        for attr in &element.attrs {
            start.push_attribute((
                self.qualified_attr_name(id, attr).as_str(),
                attr.value.as_ref(),
            ));
        }
        if element.has_children() {
            writer.write_event(Event::Start(start))?;
            for child in &element.children {
                self.encode(child, writer, context)?;
            }
            writer.write_event(Event::End(BytesEnd::new(qualified_name.as_str())))?;
        } else if let Some(value) = &element.value {
            writer.write_event(Event::Start(start))?;
            writer.write_event(Event::Text(BytesText::new(value)))?;
            writer.write_event(Event::End(BytesEnd::new(qualified_name.as_str())))?;
        } else {
            writer.write_event(Event::Empty(start))?;
        }
        Ok(())
    }

    fn revision_verdict(
        &self,
        id: NodeId,
        context: &EncodeContext<'_>,
    ) -> Result<RevisionVerdict, RevisionError> {
        let element = &self[id];
        // leaves are registered under their own module, containers under
        // the module of the tree root
        let namespace = match element.kind() {
            NodeKind::Leaf => element.namespace.as_ref(),
            NodeKind::Container => self[self.root(id)].namespace.as_ref(),
        };
        let Some(node) = context.schema.lookup(namespace, &self.tagpath(id)) else {
            return Ok(RevisionVerdict::Encode);
        };
        let Some(server_revision) = context
            .capabilities
            .revision(namespace)
            .and_then(|rev| NaiveDate::parse_from_str(rev, "%Y-%m-%d").ok())
        else {
            return Ok(RevisionVerdict::Encode);
        };
        node.revision_verdict(server_revision, element.value.as_deref(), element.children.len())
    }

    /// Compact encoding of the subtree rooted at `id`
    pub fn encode_to_string(
        &self,
        id: NodeId,
        context: Option<&EncodeContext<'_>>,
    ) -> Result<String, EncodeError> {
        let mut writer = quick_xml::Writer::new(Vec::new());
        self.encode(id, &mut writer, context)?;
        Ok(String::from_utf8(writer.into_inner())?)
    }

    /// Pretty printed subtree with two space indentation
    pub fn to_xml_string(&self, id: NodeId) -> Result<String, EncodeError> {
        let mut writer = quick_xml::Writer::new_with_indent(Vec::new(), b' ', 2);
        self.encode(id, &mut writer, None)?;
        Ok(String::from_utf8(writer.into_inner())?)
    }

    /// [fmt::Display] adapter printing the subtree rooted at `id`
    pub const fn display(&self, id: NodeId) -> DisplayNode<'_> {
        DisplayNode { tree: self, id }
    }
}

impl CloneNode for Tree {
    fn clone_deep(&mut self, id: NodeId) -> NodeId {
        match self[id].kind() {
            NodeKind::Leaf => self.clone_shallow(id),
            NodeKind::Container => {
                let copy = self.clone_shallow(id);
                let children = self[id].children.clone();
                for child in &children {
                    let child_copy = self.clone_deep(child);
                    self.add_child(copy, child_copy);
                }
                copy
            }
        }
    }

    fn clone_shallow(&mut self, id: NodeId) -> NodeId {
        let source = &self[id];
        let element = Element {
            namespace: source.namespace.clone(),
            name: source.name.clone(),
            value: source.value.clone(),
            attrs: source.attrs.clone(),
            children: NodeSet::new(),
            parent: None,
            prefixes: source.prefixes.clone(),
        };
        self.alloc(element)
    }
}

pub struct DisplayNode<'a> {
    tree: &'a Tree,
    id: NodeId,
}

impl fmt::Display for DisplayNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let xml = self.tree.to_xml_string(self.id).map_err(|_| fmt::Error)?;
        f.write_str(&xml)
    }
}

/// Top level nodes of a tree, for instance the data children of a reply
#[derive(Debug, Clone, Default)]
pub struct Forest {
    pub tree: Tree,
    pub nodes: NodeSet,
}

impl Forest {
    pub const fn new(tree: Tree, nodes: NodeSet) -> Self {
        Self { tree, nodes }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.nodes.iter()
    }

    /// Pretty print every top level node, one after another
    pub fn to_xml_string(&self) -> Result<String, EncodeError> {
        let mut out = String::new();
        for id in &self.nodes {
            out.push_str(&self.tree.to_xml_string(id)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl fmt::Display for Forest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml_string().map_err(|_| fmt::Error)?)
    }
}
