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

//! Namespace prefix bindings.
//!
//! A [PrefixMap] is an ordered list of `prefix -> namespace` bindings. The
//! empty prefix is the default (unprefixed) namespace and is always kept in
//! the first position when inserted with [PrefixMap::set].

use crate::{NETCONF_NS, NOTIFICATION_NS, PARTIAL_LOCK_NS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single `xmlns:name="namespace"` binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prefix {
    name: Box<str>,
    namespace: Box<str>,
}

impl Prefix {
    pub fn new(name: impl Into<Box<str>>, namespace: impl Into<Box<str>>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }

    /// Name of the attribute declaring this binding
    pub fn xmlns_attribute(&self) -> String {
        if self.is_default() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", self.name)
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=\"{}\"", self.xmlns_attribute(), self.namespace)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixMap {
    prefixes: Vec<Prefix>,
}

impl PrefixMap {
    pub const fn new() -> Self {
        Self { prefixes: vec![] }
    }

    /// The bindings every NETCONF envelope relies on: `nc` for the base
    /// protocol, `pl` for partial-lock and `ncn` for notifications.
    pub fn netconf_defaults() -> Self {
        Self::from(vec![
            Prefix::new("nc", NETCONF_NS),
            Prefix::new("pl", PARTIAL_LOCK_NS),
            Prefix::new("ncn", NOTIFICATION_NS),
        ])
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Prefix> {
        self.prefixes.iter()
    }

    fn index_of_name(&self, name: &str) -> Option<usize> {
        self.prefixes.iter().position(|p| p.name.as_ref() == name)
    }

    /// Add the binding only when its name is not bound yet
    pub fn merge_prefix(&mut self, prefix: Prefix) {
        if self.index_of_name(&prefix.name).is_none() {
            self.prefixes.push(prefix);
        }
    }

    /// Non-destructive merge, existing names win
    pub fn merge(&mut self, other: &PrefixMap) {
        for prefix in &other.prefixes {
            self.merge_prefix(prefix.clone());
        }
    }

    /// Add or overwrite the binding for the prefix name
    pub fn set_prefix(&mut self, prefix: Prefix) {
        match self.index_of_name(&prefix.name) {
            Some(index) => self.prefixes[index] = prefix,
            None if prefix.is_default() => self.prefixes.insert(0, prefix),
            None => self.prefixes.push(prefix),
        }
    }

    /// Destructive merge, the bindings of `other` win
    pub fn set(&mut self, other: &PrefixMap) {
        for prefix in &other.prefixes {
            self.set_prefix(prefix.clone());
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Prefix> {
        self.index_of_name(name).map(|index| self.prefixes.remove(index))
    }

    pub fn lookup(&self, name: &str) -> Option<&Prefix> {
        self.prefixes.iter().find(|p| p.name.as_ref() == name)
    }

    /// First prefix bound to the namespace, `Some("")` for the default one
    pub fn ns_to_prefix(&self, namespace: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|p| p.namespace.as_ref() == namespace)
            .map(|p| p.name.as_ref())
    }

    pub fn prefix_to_ns(&self, name: &str) -> Option<&str> {
        self.lookup(name).map(|p| p.namespace.as_ref())
    }
}

impl From<Vec<Prefix>> for PrefixMap {
    fn from(prefixes: Vec<Prefix>) -> Self {
        Self { prefixes }
    }
}

impl From<Prefix> for PrefixMap {
    fn from(prefix: Prefix) -> Self {
        Self {
            prefixes: vec![prefix],
        }
    }
}

impl<'a> IntoIterator for &'a PrefixMap {
    type Item = &'a Prefix;
    type IntoIter = std::slice::Iter<'a, Prefix>;

    fn into_iter(self) -> Self::IntoIter {
        self.prefixes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_existing_names() {
        let mut map = PrefixMap::from(Prefix::new("a", "urn:a"));
        map.merge(&PrefixMap::from(vec![
            Prefix::new("a", "urn:other"),
            Prefix::new("b", "urn:b"),
        ]));
        assert_eq!(map.prefix_to_ns("a"), Some("urn:a"));
        assert_eq!(map.prefix_to_ns("b"), Some("urn:b"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_set_overwrites_and_puts_default_first() {
        let mut map = PrefixMap::from(vec![Prefix::new("a", "urn:a"), Prefix::new("b", "urn:b")]);
        map.set(&PrefixMap::from(vec![
            Prefix::new("a", "urn:other"),
            Prefix::new("", "urn:default"),
        ]));
        assert_eq!(map.prefix_to_ns("a"), Some("urn:other"));
        assert_eq!(map.iter().next(), Some(&Prefix::new("", "urn:default")));
        assert_eq!(map.ns_to_prefix("urn:default"), Some(""));
    }

    #[test]
    fn test_remove_and_lookup() {
        let mut map = PrefixMap::netconf_defaults();
        assert_eq!(map.ns_to_prefix(NETCONF_NS), Some("nc"));
        assert_eq!(map.remove("nc"), Some(Prefix::new("nc", NETCONF_NS)));
        assert_eq!(map.remove("nc"), None);
        assert_eq!(map.ns_to_prefix(NETCONF_NS), None);
        assert!(map.lookup("pl").is_some());
    }

    #[test]
    fn test_prefix_display() {
        assert_eq!(Prefix::new("", "urn:x").to_string(), "xmlns=\"urn:x\"");
        assert_eq!(Prefix::new("x", "urn:x").to_string(), "xmlns:x=\"urn:x\"");
    }
}
