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

//! Schema side table consulted while encoding configuration trees.
//!
//! Every YANG module namespace maps [Tagpath]s to a [SchemaNode] which
//! records how the node evolved between module revisions. When a device
//! advertises an older revision of a module, the encoder uses the
//! [RevisionInfo] entries newer than that revision to drop nodes the device
//! does not know about, or to refuse values it cannot understand.
//!
//! The registry is populated once, for instance with
//! [SchemaRegistry::from_json_str], and then shared read-only between
//! sessions behind an `Arc`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, path::Path, str::FromStr};

/// Sequence of element local names from a schema root to a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tagpath(Vec<Box<str>>);

impl Tagpath {
    pub const fn new(names: Vec<Box<str>>) -> Self {
        Self(names)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[Box<str>] {
        &self.0
    }
}

impl FromStr for Tagpath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.split('/')
                .filter(|name| !name.is_empty())
                .map(Into::into)
                .collect(),
        ))
    }
}

impl TryFrom<String> for Tagpath {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tagpath::from_str(&value)
    }
}

impl From<Tagpath> for String {
    fn from(value: Tagpath) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Tagpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// The kind of change a later module revision applied to a node
#[derive(
    strum_macros::Display,
    strum_macros::EnumString,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RevisionKind {
    EnumAdded,
    BitsAdded,
    RangeExpanded,
    DefaultAdded,
    MandatoryTrueToFalse,
    MinElementsLowered,
    MaxElementsRaised,
    NodeAdded,
    CaseAdded,
    StateToConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RevisionInfo {
    pub kind: RevisionKind,

    /// Literal introduced by the revision, for enum and bits changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<str>>,

    /// Numeric bound before the revision, for min/max elements changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound: Option<u64>,

    /// Revision date of the module that introduced the change
    pub introduced: NaiveDate,
}

impl RevisionInfo {
    pub const fn new(kind: RevisionKind, introduced: NaiveDate) -> Self {
        Self {
            kind,
            data: None,
            bound: None,
            introduced,
        }
    }

    pub fn with_data(mut self, data: impl Into<Box<str>>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub const fn with_bound(mut self, bound: u64) -> Self {
        self.bound = Some(bound);
        self
    }
}

/// Schema metadata for a single node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemaNode {
    pub tagpath: Tagpath,
    pub namespace: Box<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primitive_type: Option<Box<str>>,
    #[serde(default)]
    pub min_occurs: u32,
    /// `None` is unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_occurs: Option<u32>,
    #[serde(default)]
    pub children: Vec<Box<str>>,
    #[serde(default)]
    pub keys: Vec<Box<str>>,
    #[serde(default)]
    pub flags: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Box<str>>,
    #[serde(default)]
    pub revisions: Vec<RevisionInfo>,
}

impl SchemaNode {
    pub fn new(namespace: impl Into<Box<str>>, tagpath: Tagpath) -> Self {
        Self {
            tagpath,
            namespace: namespace.into(),
            primitive_type: None,
            min_occurs: 0,
            max_occurs: None,
            children: vec![],
            keys: vec![],
            flags: 0,
            description: None,
            revisions: vec![],
        }
    }

    pub fn with_revision(mut self, revision: RevisionInfo) -> Self {
        self.revisions.push(revision);
        self
    }

    /// Decide how a node instance is encoded for a server running
    /// `server_revision` of the module.
    ///
    /// Only revision entries introduced after `server_revision` apply.
    /// `value` is the leaf value of the instance and `child_count` its number
    /// of children.
    pub fn revision_verdict(
        &self,
        server_revision: NaiveDate,
        value: Option<&str>,
        child_count: usize,
    ) -> Result<RevisionVerdict, RevisionError> {
        for revision in self
            .revisions
            .iter()
            .filter(|r| r.introduced > server_revision)
        {
            match revision.kind {
                RevisionKind::NodeAdded => return Ok(RevisionVerdict::Omit),
                RevisionKind::EnumAdded | RevisionKind::BitsAdded => {
                    if revision.data.is_some() && revision.data.as_deref() == value {
                        return Err(RevisionError::ValueNotSupported {
                            tagpath: self.tagpath.clone(),
                            value: value.unwrap_or_default().into(),
                            server_revision,
                        });
                    }
                }
                RevisionKind::MaxElementsRaised => {
                    if let Some(bound) = revision.bound {
                        if child_count as u64 > bound {
                            return Err(RevisionError::TooManyChildren {
                                tagpath: self.tagpath.clone(),
                                count: child_count,
                                bound,
                                server_revision,
                            });
                        }
                    }
                }
                RevisionKind::RangeExpanded
                | RevisionKind::DefaultAdded
                | RevisionKind::MandatoryTrueToFalse
                | RevisionKind::MinElementsLowered
                | RevisionKind::CaseAdded
                | RevisionKind::StateToConfig => {}
            }
        }
        Ok(RevisionVerdict::Encode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionVerdict {
    Encode,
    /// The server revision predates the node, leave it out of the message
    Omit,
}

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum RevisionError {
    #[strum(
        to_string = "{tagpath}: value `{value}` is not supported by revision {server_revision}"
    )]
    ValueNotSupported {
        tagpath: Tagpath,
        value: Box<str>,
        server_revision: NaiveDate,
    },

    #[strum(
        to_string = "{tagpath}: {count} children exceed the maximum of {bound} in revision {server_revision}"
    )]
    TooManyChildren {
        tagpath: Tagpath,
        count: usize,
        bound: u64,
        server_revision: NaiveDate,
    },
}

impl std::error::Error for RevisionError {}

#[derive(Debug, strum_macros::Display)]
pub enum SchemaError {
    #[strum(to_string = "std::io:Error: `{0}`")]
    Io(std::io::Error),

    #[strum(to_string = "invalid schema description: `{0}`")]
    Json(serde_json::Error),
}

impl std::error::Error for SchemaError {}

impl From<std::io::Error> for SchemaError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for SchemaError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Namespace -> Tagpath -> [SchemaNode] lookup table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    namespaces: HashMap<Box<str>, HashMap<Tagpath, SchemaNode>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from a JSON array of [SchemaNode] descriptions
    pub fn from_json_str(input: &str) -> Result<Self, SchemaError> {
        let nodes: Vec<SchemaNode> = serde_json::from_str(input)?;
        Ok(Self::from_iter(nodes))
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_json_str(&input)
    }

    pub fn insert(&mut self, node: SchemaNode) -> Option<SchemaNode> {
        self.namespaces
            .entry(node.namespace.clone())
            .or_default()
            .insert(node.tagpath.clone(), node)
    }

    pub fn lookup(&self, namespace: &str, tagpath: &Tagpath) -> Option<&SchemaNode> {
        self.namespaces
            .get(namespace)
            .and_then(|nodes| nodes.get(tagpath))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(|ns| ns.as_ref())
    }

    pub fn len(&self) -> usize {
        self.namespaces.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<SchemaNode> for SchemaRegistry {
    fn from_iter<T: IntoIterator<Item = SchemaNode>>(iter: T) -> Self {
        let mut registry = Self::new();
        for node in iter {
            registry.insert(node);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid date")
    }

    #[test]
    fn test_tagpath_from_str() {
        let tagpath = Tagpath::from_str("/hosts/host/name").unwrap();
        assert_eq!(tagpath.len(), 3);
        assert_eq!(tagpath.to_string(), "hosts/host/name");
        assert_eq!(tagpath, Tagpath::from_str("hosts/host/name").unwrap());
        assert!(Tagpath::from_str("").unwrap().is_empty());
    }

    #[test]
    fn test_load_registry_from_json() {
        let input = r#"[
            {
                "tagpath": "hosts/host/mode",
                "namespace": "urn:example:hosts",
                "primitive-type": "enumeration",
                "min-occurs": 0,
                "max-occurs": 1,
                "revisions": [
                    {"kind": "enum-added", "data": "turbo", "introduced": "2024-03-01"}
                ]
            },
            {
                "tagpath": "hosts/host/location",
                "namespace": "urn:example:hosts",
                "revisions": [{"kind": "node-added", "introduced": "2024-03-01"}]
            }
        ]"#;
        let registry = SchemaRegistry::from_json_str(input).expect("valid registry");
        assert_eq!(registry.len(), 2);
        let node = registry
            .lookup("urn:example:hosts", &Tagpath::from_str("hosts/host/mode").unwrap())
            .expect("node is registered");
        assert_eq!(node.primitive_type.as_deref(), Some("enumeration"));
        assert_eq!(
            node.revisions,
            vec![RevisionInfo::new(RevisionKind::EnumAdded, date("2024-03-01")).with_data("turbo")]
        );
        assert!(registry
            .lookup("urn:example:other", &Tagpath::from_str("hosts").unwrap())
            .is_none());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SchemaRegistry::from_json_str(r#"[{"tagpath": 1}]"#),
            Err(SchemaError::Json(_))
        ));
    }

    #[test]
    fn test_revision_verdict() {
        let node = SchemaNode::new("urn:x", Tagpath::from_str("a/b").unwrap())
            .with_revision(RevisionInfo::new(RevisionKind::EnumAdded, date("2024-01-01")).with_data("new"))
            .with_revision(
                RevisionInfo::new(RevisionKind::MaxElementsRaised, date("2024-01-01")).with_bound(2),
            );

        // server knows the revision already
        assert_eq!(
            node.revision_verdict(date("2024-01-01"), Some("new"), 5),
            Ok(RevisionVerdict::Encode)
        );
        assert_eq!(
            node.revision_verdict(date("2023-01-01"), Some("old"), 1),
            Ok(RevisionVerdict::Encode)
        );
        assert!(matches!(
            node.revision_verdict(date("2023-01-01"), Some("new"), 0),
            Err(RevisionError::ValueNotSupported { .. })
        ));
        assert!(matches!(
            node.revision_verdict(date("2023-01-01"), None, 3),
            Err(RevisionError::TooManyChildren { count: 3, bound: 2, .. })
        ));

        let added = SchemaNode::new("urn:x", Tagpath::from_str("a/c").unwrap())
            .with_revision(RevisionInfo::new(RevisionKind::NodeAdded, date("2024-01-01")));
        assert_eq!(
            added.revision_verdict(date("2023-12-31"), Some("v"), 0),
            Ok(RevisionVerdict::Omit)
        );
    }
}
