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

//! Typed view of the `<rpc-error>` elements of a failed `<rpc-reply>` as
//! defined in [RFC 6241](https://www.rfc-editor.org/rfc/rfc6241.html).

use crate::{
    tree::{NodeId, Tree},
    xml_utils::ParsingError,
    NETCONF_NS,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// ```xml
///  <xs:complexType name="rpcErrorType">
///      <xs:sequence>
///          <xs:element name="error-type" type="ErrorType"/>
///          <xs:element name="error-tag" type="ErrorTag"/>
///          <xs:element name="error-severity" type="ErrorSeverity"/>
///          <xs:element name="error-app-tag" type="xs:string"
///                      minOccurs="0"/>
///          <xs:element name="error-path" type="xs:string" minOccurs="0"/>
///          <xs:element name="error-message" minOccurs="0">
///              <xs:complexType>
///                  <xs:simpleContent>
///                      <xs:extension base="xs:string">
///                          <xs:attribute ref="xml:lang" use="optional"/>
///                      </xs:extension>
///                  </xs:simpleContent>
///              </xs:complexType>
///          </xs:element>
///          <xs:element name="error-info" type="errorInfoType"
///                      minOccurs="0"/>
///      </xs:sequence>
///  </xs:complexType>
/// ```
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RpcError {
    error_type: ErrorType,
    error_tag: ErrorTag,
    error_severity: ErrorSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_app_tag: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_path: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<ErrorMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_info: Option<ErrorInfo>,
}

impl RpcError {
    pub const fn new(
        error_type: ErrorType,
        error_tag: ErrorTag,
        error_severity: ErrorSeverity,
        error_app_tag: Option<Box<str>>,
        error_path: Option<Box<str>>,
        error_message: Option<ErrorMessage>,
        error_info: Option<ErrorInfo>,
    ) -> Self {
        Self {
            error_type,
            error_tag,
            error_severity,
            error_app_tag,
            error_path,
            error_message,
            error_info,
        }
    }

    pub const fn error_type(&self) -> ErrorType {
        self.error_type
    }

    pub const fn error_tag(&self) -> ErrorTag {
        self.error_tag
    }

    pub const fn error_severity(&self) -> ErrorSeverity {
        self.error_severity
    }

    pub fn error_app_tag(&self) -> Option<&str> {
        self.error_app_tag.as_deref()
    }

    pub fn error_path(&self) -> Option<&str> {
        self.error_path.as_deref()
    }

    pub fn error_message(&self) -> Option<&ErrorMessage> {
        self.error_message.as_ref()
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.error_info.as_ref()
    }

    /// Decode an `<rpc-error>` element
    pub fn from_tree(tree: &Tree, id: NodeId) -> Result<Self, ParsingError> {
        expect_netconf_element(tree, id, "rpc-error")?;
        let mut error_type = None;
        let mut error_tag = None;
        let mut error_severity = None;
        let mut rpc_error = RpcError::default();
        for child in tree.children(id) {
            if tree[child].namespace() != NETCONF_NS {
                continue;
            }
            match tree[child].name() {
                "error-type" => error_type = Some(parse_value::<ErrorType>(tree, child)?),
                "error-tag" => error_tag = Some(parse_value::<ErrorTag>(tree, child)?),
                "error-severity" => {
                    error_severity = Some(parse_value::<ErrorSeverity>(tree, child)?)
                }
                "error-app-tag" => rpc_error.error_app_tag = Some(text(tree, child)),
                "error-path" => rpc_error.error_path = Some(text(tree, child).trim().into()),
                "error-message" => {
                    rpc_error.error_message = Some(ErrorMessage::from_tree(tree, child))
                }
                "error-info" => rpc_error.error_info = Some(ErrorInfo::from_tree(tree, child)?),
                _ => {}
            }
        }
        rpc_error.error_type =
            error_type.ok_or_else(|| ParsingError::MissingElement("error-type".to_string()))?;
        rpc_error.error_tag =
            error_tag.ok_or_else(|| ParsingError::MissingElement("error-tag".to_string()))?;
        rpc_error.error_severity = error_severity
            .ok_or_else(|| ParsingError::MissingElement("error-severity".to_string()))?;
        Ok(rpc_error)
    }

    /// Decode every `<rpc-error>` child of an `<rpc-reply>`
    pub fn from_reply(tree: &Tree, reply: NodeId) -> Result<Vec<Self>, ParsingError> {
        tree.children(reply)
            .iter()
            .filter(|child| {
                tree[*child].name() == "rpc-error" && tree[*child].namespace() == NETCONF_NS
            })
            .map(|child| Self::from_tree(tree, child))
            .collect()
    }
}

fn expect_netconf_element(tree: &Tree, id: NodeId, name: &str) -> Result<(), ParsingError> {
    let element = &tree[id];
    if element.name() != name || element.namespace() != NETCONF_NS {
        return Err(ParsingError::InvalidValue(format!(
            "expecting <{name}> but found <{}>",
            element.name()
        )));
    }
    Ok(())
}

fn text(tree: &Tree, id: NodeId) -> Box<str> {
    tree.value(id).unwrap_or_default().into()
}

fn parse_value<T: FromStr>(tree: &Tree, id: NodeId) -> Result<T, ParsingError> {
    let value = tree.value(id).unwrap_or_default().trim();
    T::from_str(value).map_err(|_| {
        ParsingError::InvalidValue(format!("unexpected <{}> '{value}'", tree[id].name()))
    })
}

/// ```xml
/// <xs:element name="error-message" minOccurs="0">
///     <xs:complexType>
///         <xs:simpleContent>
///             <xs:extension base="xs:string">
///                 <xs:attribute ref="xml:lang" use="optional"/>
///             </xs:extension>
///         </xs:simpleContent>
///     </xs:complexType>
/// </xs:element>
/// ```
#[derive(PartialEq, Eq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<Box<str>>,
    pub text: Box<str>,
}

impl ErrorMessage {
    fn from_tree(tree: &Tree, id: NodeId) -> Self {
        let lang = tree[id]
            .attrs()
            .iter()
            .find(|attr| attr.name() == "lang" && attr.namespace() == Some(XML_NS))
            .map(|attr| attr.value().into());
        Self {
            lang,
            text: text(tree, id),
        }
    }
}

/// ```xml
/// <xs:simpleType name="ErrorType">
///     <xs:restriction base="xs:string">
///         <xs:enumeration value="transport"/>
///         <xs:enumeration value="rpc"/>
///         <xs:enumeration value="protocol"/>
///         <xs:enumeration value="application"/>
///     </xs:restriction>
/// </xs:simpleType>
/// ```
#[derive(
    PartialEq,
    Eq,
    Debug,
    Copy,
    Clone,
    Default,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorType {
    #[default]
    Transport,
    Rpc,
    Protocol,
    Application,
}

/// Error tags of RFC 6241 Appendix A
#[derive(
    PartialEq,
    Eq,
    Debug,
    Copy,
    Clone,
    Default,
    Serialize,
    Deserialize,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorTag {
    #[default]
    InUse,
    InvalidValue,
    TooBig,
    MissingAttribute,
    BadAttribute,
    UnknownAttribute,
    MissingElement,
    BadElement,
    UnknownElement,
    UnknownNamespace,
    AccessDenied,
    LockDenied,
    ResourceDenied,
    RollbackFailed,
    DataExists,
    DataMissing,
    OperationNotSupported,
    OperationFailed,
    PartialOperation,
    MalformedMessage,
}

#[derive(
    PartialEq,
    Eq,
    Debug,
    Copy,
    Clone,
    Serialize,
    Deserialize,
    Default,
    strum_macros::EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorSeverity {
    #[default]
    Error,
    Warning,
}

/// Content of `<error-info>`. Elements from other namespaces are kept by
/// their qualified name in `other`.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_attribute: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_element: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_namespace: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok_element: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_element: Option<Box<str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub noop_element: Option<Box<str>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other: Vec<Box<str>>,
}

impl ErrorInfo {
    fn from_tree(tree: &Tree, id: NodeId) -> Result<Self, ParsingError> {
        let mut info = ErrorInfo::default();
        for child in tree.children(id) {
            if tree[child].namespace() != NETCONF_NS {
                info.other.push(tree.qualified_name(child).into());
                continue;
            }
            let value = || -> Option<Box<str>> { Some(text(tree, child).trim().into()) };
            match tree[child].name() {
                "session-id" => {
                    let session_id = tree.value(child).unwrap_or_default().trim();
                    info.session_id = Some(session_id.parse().map_err(|_| {
                        ParsingError::InvalidValue(format!("unexpected <session-id> '{session_id}'"))
                    })?);
                }
                "bad-attribute" => info.bad_attribute = value(),
                "bad-element" => info.bad_element = value(),
                "bad-namespace" => info.bad_namespace = value(),
                "ok-element" => info.ok_element = value(),
                "err-element" => info.err_element = value(),
                "noop-element" => info.noop_element = value(),
                _ => info.other.push(tree.qualified_name(child).into()),
            }
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("in-use", ErrorTag::InUse)]
    #[case("lock-denied", ErrorTag::LockDenied)]
    #[case("operation-not-supported", ErrorTag::OperationNotSupported)]
    #[case("malformed-message", ErrorTag::MalformedMessage)]
    fn test_error_tag(#[case] input: &str, #[case] expected: ErrorTag) {
        assert_eq!(ErrorTag::from_str(input), Ok(expected));
        assert_eq!(expected.to_string(), input);
    }

    #[test]
    fn test_rpc_error_from_reply() {
        let xml = r#"<rpc-reply message-id="101" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" xmlns:t="urn:example:t">
  <rpc-error>
    <error-type>application</error-type>
    <error-tag>invalid-value</error-tag>
    <error-severity>error</error-severity>
    <error-app-tag>too-long</error-app-tag>
    <error-path xmlns:t="http://example.com/schema/1.2/config">
      /t:top/t:interface[t:name="Ethernet0/0"]/t:mtu
    </error-path>
    <error-message xml:lang="en">MTU value 25000 is not within range 256..9192</error-message>
    <error-info>
      <bad-element>mtu</bad-element>
      <t:extra>x</t:extra>
    </error-info>
  </rpc-error>
  <rpc-error>
    <error-type>protocol</error-type>
    <error-tag>lock-denied</error-tag>
    <error-severity>error</error-severity>
    <error-info><session-id>454</session-id></error-info>
  </rpc-error>
</rpc-reply>"#;
        let (tree, reply) = Tree::from_xml(xml).unwrap();
        let errors = RpcError::from_reply(&tree, reply).unwrap();
        assert_eq!(errors.len(), 2);

        let first = &errors[0];
        assert_eq!(first.error_type(), ErrorType::Application);
        assert_eq!(first.error_tag(), ErrorTag::InvalidValue);
        assert_eq!(first.error_severity(), ErrorSeverity::Error);
        assert_eq!(first.error_app_tag(), Some("too-long"));
        assert_eq!(
            first.error_path(),
            Some(r#"/t:top/t:interface[t:name="Ethernet0/0"]/t:mtu"#)
        );
        assert_eq!(
            first.error_message(),
            Some(&ErrorMessage {
                lang: Some("en".into()),
                text: "MTU value 25000 is not within range 256..9192".into(),
            })
        );
        let info = first.error_info().unwrap();
        assert_eq!(info.bad_element.as_deref(), Some("mtu"));
        assert_eq!(info.other, vec![Box::<str>::from("t:extra")]);

        let second = &errors[1];
        assert_eq!(second.error_tag(), ErrorTag::LockDenied);
        assert_eq!(second.error_info().and_then(|i| i.session_id), Some(454));
    }

    #[test]
    fn test_rpc_error_invalid() {
        let missing = r#"<rpc-error xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <error-type>rpc</error-type>
  <error-severity>error</error-severity>
</rpc-error>"#;
        let (tree, id) = Tree::from_xml(missing).unwrap();
        assert_eq!(
            RpcError::from_tree(&tree, id),
            Err(ParsingError::MissingElement("error-tag".to_string()))
        );

        let invalid = r#"<rpc-error xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <error-type>rpc</error-type>
  <error-tag>no-such-tag</error-tag>
  <error-severity>error</error-severity>
</rpc-error>"#;
        let (tree, id) = Tree::from_xml(invalid).unwrap();
        assert!(matches!(
            RpcError::from_tree(&tree, id),
            Err(ParsingError::InvalidValue(_))
        ));
    }
}
