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

//! NETCONF capabilities advertised in a `<hello>` message.
//!
//! [Capability] is the typed form of a single capability URI and
//! [Capabilities] is the registry built once from the server hello, which the
//! session consults to decide which operations are legal.

use crate::ACTIONS_NS;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const CAP_WRITABLE: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
pub const CAP_CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
pub const CAP_CONFIRMED_COMMIT_1_0: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.0";
pub const CAP_CONFIRMED_COMMIT_1_1: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.1";
pub const CAP_ROLLBACK_ON_ERROR: &str = "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
pub const CAP_VALIDATE_1_0: &str = "urn:ietf:params:netconf:capability:validate:1.0";
pub const CAP_VALIDATE_1_1: &str = "urn:ietf:params:netconf:capability:validate:1.1";
pub const CAP_STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
pub const CAP_URL: &str = "urn:ietf:params:netconf:capability:url:1.0";
pub const CAP_XPATH: &str = "urn:ietf:params:netconf:capability:xpath:1.0";
pub const CAP_NOTIFICATION: &str = "urn:ietf:params:netconf:capability:notification:1.0";
pub const CAP_INTERLEAVE: &str = "urn:ietf:params:netconf:capability:interleave:1.0";
pub const CAP_PARTIAL_LOCK: &str = "urn:ietf:params:netconf:capability:partial-lock:1.0";
pub const CAP_BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
pub const CAP_BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";

// Spellings from early drafts that some servers still advertise
const CAP_ALT_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const CAP_ALT_CANDIDATE: &str = "urn:ietf:params:xml:ns:netconf:capability:candidate:1.0";
const CAP_ALT_CONFIRMED_COMMIT: &str =
    "urn:ietf:params:xml:ns:netconf:capability:confirmed-commit:1.0";
const CAP_ALT_VALIDATE: &str = "urn:ietf:params:xml:ns:netconf:capability:validate:1.0";
const CAP_ALT_URL: &str = "urn:ietf:params:xml:ns:netconf:capability:url:1.0";

pub const CAP_TAILF_ACTIONS: &str = ACTIONS_NS;
pub const CAP_TAILF_TRANSACTIONS: &str = "http://tail-f.com/ns/netconf/transactions/1.0";
pub const CAP_TAILF_WITH_DEFAULTS: &str = "http://tail-f.com/ns/netconf/with-defaults/1.0";

/// NETCONF capabilities representation as defined in
/// [RFC 6241](https://www.rfc-editor.org/rfc/rfc6241.html)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum Capability {
    #[strum(serialize = "{0}")]
    NetconfBase(NetconfVersion),

    #[strum(serialize = "{0}")]
    Standard(StandardCapability),

    #[strum(serialize = "{0}")]
    Url(UrlCapability),

    #[strum(serialize = "{0}")]
    Vendor(VendorCapability),

    #[strum(serialize = "{0}")]
    Yang(YangCapability),

    #[strum(serialize = "{0}")]
    Custom(Box<str>),
}

#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
pub enum CapabilityParsingError {
    #[strum(to_string = "URL schema for :url capability is not defined")]
    UrlSchemeIsNotDefined,

    #[strum(to_string = "URN schema `{0}` YANG capability is not recognized")]
    InvalidYangUrnSchema(String),
}

impl std::error::Error for CapabilityParsingError {}

impl FromStr for Capability {
    type Err = CapabilityParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CAP_BASE_1_0 | CAP_ALT_BASE => Ok(Capability::NetconfBase(NetconfVersion::V1_0)),
            CAP_BASE_1_1 => Ok(Capability::NetconfBase(NetconfVersion::V1_1)),
            CAP_WRITABLE => Ok(Capability::Standard(StandardCapability::WritableRunning)),
            CAP_CANDIDATE | CAP_ALT_CANDIDATE => {
                Ok(Capability::Standard(StandardCapability::Candidate))
            }
            CAP_CONFIRMED_COMMIT_1_0 | CAP_ALT_CONFIRMED_COMMIT => Ok(Capability::Standard(
                StandardCapability::ConfirmedCommitV1_0,
            )),
            CAP_CONFIRMED_COMMIT_1_1 => Ok(Capability::Standard(
                StandardCapability::ConfirmedCommitV1_1,
            )),
            CAP_ROLLBACK_ON_ERROR => Ok(Capability::Standard(StandardCapability::RollbackOnError)),
            CAP_VALIDATE_1_0 | CAP_ALT_VALIDATE => {
                Ok(Capability::Standard(StandardCapability::ValidateV1_0))
            }
            CAP_VALIDATE_1_1 => Ok(Capability::Standard(StandardCapability::ValidateV1_1)),
            CAP_STARTUP => Ok(Capability::Standard(StandardCapability::Startup)),
            CAP_XPATH => Ok(Capability::Standard(StandardCapability::Xpath)),
            CAP_NOTIFICATION => Ok(Capability::Standard(StandardCapability::Notification)),
            CAP_INTERLEAVE => Ok(Capability::Standard(StandardCapability::Interleave)),
            CAP_PARTIAL_LOCK => Ok(Capability::Standard(StandardCapability::PartialLock)),
            CAP_TAILF_ACTIONS => Ok(Capability::Vendor(VendorCapability::Actions)),
            CAP_TAILF_TRANSACTIONS => Ok(Capability::Vendor(VendorCapability::Transactions)),
            CAP_TAILF_WITH_DEFAULTS => Ok(Capability::Vendor(VendorCapability::WithDefaults)),
            cap if cap.starts_with(CAP_URL) || cap.starts_with(CAP_ALT_URL) => {
                let schemes = cap
                    .split_once('?')
                    .map(|(_, query)| query)
                    .map(|query| query.strip_prefix("scheme=").unwrap_or(query))
                    .ok_or(CapabilityParsingError::UrlSchemeIsNotDefined)?;
                Ok(Capability::Url(UrlCapability::new(
                    schemes
                        .split(',')
                        .filter(|scheme| !scheme.is_empty())
                        .map(Into::into)
                        .collect(),
                )))
            }
            cap if cap.starts_with("urn")
                || cap.starts_with("http://")
                || cap.starts_with("https://") =>
            {
                let (urn, params) = if let Some((urn, params)) = cap.split_once('?') {
                    (urn, params)
                } else {
                    return Ok(Capability::Custom(s.into()));
                };

                let mut module_name = None;
                let mut revision = None;
                let mut features = Vec::new();
                let mut deviations = Vec::new();

                for param in params.split('&') {
                    if let Some((key, value)) = param.split_once('=') {
                        match key {
                            "module" => module_name = Some(value.into()),
                            "revision" => revision = Some(value.into()),
                            "features" => {
                                features = value.split(',').map(|f| f.into()).collect();
                            }
                            "deviations" => {
                                deviations = value.split(',').map(|d| d.into()).collect();
                            }
                            _ => {
                                return Ok(Capability::Custom(s.into()));
                            }
                        }
                    }
                }

                let module_name: Box<str> = module_name
                    .ok_or_else(|| CapabilityParsingError::InvalidYangUrnSchema(cap.to_string()))?;
                Ok(Capability::Yang(YangCapability::new(
                    urn.into(),
                    module_name,
                    revision,
                    features.into_boxed_slice(),
                    deviations.into_boxed_slice(),
                )))
            }
            _ => Ok(Capability::Custom(s.into())),
        }
    }
}

/// NETCONF protocol version
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum NetconfVersion {
    #[strum(serialize = "urn:ietf:params:netconf:base:1.0")]
    V1_0,
    #[strum(serialize = "urn:ietf:params:netconf:base:1.1")]
    V1_1,
}

/// Standard NETCONF capabilities as defined in
/// [IANA Network Configuration Protocol (NETCONF) Capability URNs](https://www.iana.org/assignments/netconf-capability-urns/netconf-capability-urns.xhtml)
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum StandardCapability {
    #[strum(serialize = "urn:ietf:params:netconf:capability:writable-running:1.0")]
    WritableRunning,

    #[strum(serialize = "urn:ietf:params:netconf:capability:candidate:1.0")]
    Candidate,

    #[strum(serialize = "urn:ietf:params:netconf:capability:confirmed-commit:1.0")]
    ConfirmedCommitV1_0,

    #[strum(serialize = "urn:ietf:params:netconf:capability:confirmed-commit:1.1")]
    ConfirmedCommitV1_1,

    #[strum(serialize = "urn:ietf:params:netconf:capability:rollback-on-error:1.0")]
    RollbackOnError,

    #[strum(serialize = "urn:ietf:params:netconf:capability:validate:1.0")]
    ValidateV1_0,

    #[strum(serialize = "urn:ietf:params:netconf:capability:validate:1.1")]
    ValidateV1_1,

    #[strum(serialize = "urn:ietf:params:netconf:capability:startup:1.0")]
    Startup,

    #[strum(serialize = "urn:ietf:params:netconf:capability:xpath:1.0")]
    Xpath,

    #[strum(serialize = "urn:ietf:params:netconf:capability:notification:1.0")]
    Notification,

    #[strum(serialize = "urn:ietf:params:netconf:capability:interleave:1.0")]
    Interleave,

    #[strum(serialize = "urn:ietf:params:netconf:capability:partial-lock:1.0")]
    PartialLock,
}

/// Tail-f proprietary capabilities
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
pub enum VendorCapability {
    #[strum(serialize = "http://tail-f.com/ns/netconf/actions/1.0")]
    Actions,

    #[strum(serialize = "http://tail-f.com/ns/netconf/transactions/1.0")]
    Transactions,

    #[strum(serialize = "http://tail-f.com/ns/netconf/with-defaults/1.0")]
    WithDefaults,
}

/// The `:url` capability and the URL schemes the server accepts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UrlCapability {
    schemes: Box<[Box<str>]>,
}

impl UrlCapability {
    pub const fn new(schemes: Box<[Box<str>]>) -> Self {
        Self { schemes }
    }

    pub fn schemes(&self) -> &[Box<str>] {
        &self.schemes
    }
}

impl fmt::Display for UrlCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{CAP_URL}?scheme={}", self.schemes.join(","))
    }
}

/// YANG module capability with revision and features
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YangCapability {
    urn: Box<str>,
    module_name: Box<str>,
    revision: Option<Box<str>>,
    features: Box<[Box<str>]>,
    deviations: Box<[Box<str>]>,
}

impl YangCapability {
    pub const fn new(
        urn: Box<str>,
        module_name: Box<str>,
        revision: Option<Box<str>>,
        features: Box<[Box<str>]>,
        deviations: Box<[Box<str>]>,
    ) -> Self {
        Self {
            urn,
            module_name,
            revision,
            features,
            deviations,
        }
    }

    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn features(&self) -> &[Box<str>] {
        &self.features
    }

    pub fn deviations(&self) -> &[Box<str>] {
        &self.deviations
    }
}

impl fmt::Display for YangCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.urn)?;

        let mut params = Vec::with_capacity(self.features.len() + self.deviations.len() + 2);

        params.push(format!("module={}", self.module_name));

        if let Some(ref rev) = self.revision {
            params.push(format!("revision={rev}"));
        }

        if !self.features.is_empty() {
            params.push(format!("features={}", self.features.join(",")));
        }

        if !self.deviations.is_empty() {
            params.push(format!("deviations={}", self.deviations.join(",")));
        }

        write!(f, "?{}", params.join("&"))
    }
}

/// One capability URI as advertised, split into its query-less URI and the
/// optional `revision` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedCapability {
    uri: Box<str>,
    revision: Option<Box<str>>,
}

impl AdvertisedCapability {
    pub fn parse(advertised: &str) -> Self {
        let (uri, query) = match advertised.split_once('?') {
            Some((uri, query)) => (uri, Some(query)),
            None => (advertised, None),
        };
        let revision = query.and_then(|query| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == "revision")
                .map(|(_, value)| value.into())
        });
        Self {
            uri: uri.into(),
            revision,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

/// Snapshot of the capabilities advertised by a NETCONF server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    base_1_0: bool,
    base_1_1: bool,
    writable_running: bool,
    candidate: bool,
    confirmed_commit: bool,
    rollback_on_error: bool,
    validate: bool,
    startup: bool,
    notification: bool,
    interleave: bool,
    url: bool,
    xpath: bool,
    partial_lock: bool,
    actions: bool,
    transactions: bool,
    with_defaults: bool,
    url_schemes: Vec<Box<str>>,
    advertised: Vec<AdvertisedCapability>,
    data: Vec<AdvertisedCapability>,
}

impl Capabilities {
    /// Build the registry from the text of every `<capability>` element.
    /// URIs that are not recognized are kept as data capabilities.
    pub fn from_uris<I, S>(uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut caps = Self::default();
        for raw in uris {
            let raw = raw.as_ref().trim();
            let advertised = AdvertisedCapability::parse(raw);
            caps.advertised.push(advertised.clone());
            match Capability::from_str(raw) {
                Ok(Capability::NetconfBase(NetconfVersion::V1_0)) => caps.base_1_0 = true,
                Ok(Capability::NetconfBase(NetconfVersion::V1_1)) => caps.base_1_1 = true,
                Ok(Capability::Standard(standard)) => match standard {
                    StandardCapability::WritableRunning => caps.writable_running = true,
                    StandardCapability::Candidate => caps.candidate = true,
                    StandardCapability::ConfirmedCommitV1_0
                    | StandardCapability::ConfirmedCommitV1_1 => caps.confirmed_commit = true,
                    StandardCapability::RollbackOnError => caps.rollback_on_error = true,
                    StandardCapability::ValidateV1_0 | StandardCapability::ValidateV1_1 => {
                        caps.validate = true
                    }
                    StandardCapability::Startup => caps.startup = true,
                    StandardCapability::Xpath => caps.xpath = true,
                    StandardCapability::Notification => caps.notification = true,
                    StandardCapability::Interleave => caps.interleave = true,
                    StandardCapability::PartialLock => caps.partial_lock = true,
                },
                Ok(Capability::Url(url)) => {
                    caps.url = true;
                    caps.url_schemes = url.schemes().to_vec();
                }
                Ok(Capability::Vendor(vendor)) => match vendor {
                    VendorCapability::Actions => caps.actions = true,
                    VendorCapability::Transactions => caps.transactions = true,
                    VendorCapability::WithDefaults => caps.with_defaults = true,
                },
                Ok(Capability::Yang(_)) | Ok(Capability::Custom(_)) | Err(_) => {
                    caps.data.push(advertised)
                }
            }
        }
        caps
    }

    /// Linear scan over every advertised URI, the query part is ignored
    pub fn has_capability(&self, uri: &str) -> bool {
        self.advertised.iter().any(|cap| cap.uri() == uri)
    }

    /// Revision advertised for a data (schema) capability
    pub fn revision(&self, uri: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|cap| cap.uri() == uri)
            .and_then(AdvertisedCapability::revision)
    }

    pub fn advertised(&self) -> impl Iterator<Item = &AdvertisedCapability> {
        self.advertised.iter()
    }

    pub fn data_capabilities(&self) -> impl Iterator<Item = &AdvertisedCapability> {
        self.data.iter()
    }

    pub fn url_schemes(&self) -> impl Iterator<Item = &str> {
        self.url_schemes.iter().map(|scheme| scheme.as_ref())
    }

    /// `true` when `url` starts with one of the advertised schemes followed
    /// by a colon
    pub fn is_url_supported(&self, url: &str) -> bool {
        self.url_schemes.iter().any(|scheme| {
            url.strip_prefix(scheme.as_ref())
                .is_some_and(|rest| rest.starts_with(':'))
        })
    }

    pub const fn has_base_1_0(&self) -> bool {
        self.base_1_0
    }

    pub const fn has_base_1_1(&self) -> bool {
        self.base_1_1
    }

    pub const fn has_writable_running(&self) -> bool {
        self.writable_running
    }

    pub const fn has_candidate(&self) -> bool {
        self.candidate
    }

    pub const fn has_confirmed_commit(&self) -> bool {
        self.confirmed_commit
    }

    pub const fn has_rollback_on_error(&self) -> bool {
        self.rollback_on_error
    }

    pub const fn has_validate(&self) -> bool {
        self.validate
    }

    pub const fn has_startup(&self) -> bool {
        self.startup
    }

    pub const fn has_notification(&self) -> bool {
        self.notification
    }

    pub const fn has_interleave(&self) -> bool {
        self.interleave
    }

    pub const fn has_url(&self) -> bool {
        self.url
    }

    pub const fn has_xpath(&self) -> bool {
        self.xpath
    }

    pub const fn has_partial_lock(&self) -> bool {
        self.partial_lock
    }

    pub const fn has_actions(&self) -> bool {
        self.actions
    }

    pub const fn has_transactions(&self) -> bool {
        self.transactions
    }

    pub const fn has_with_defaults(&self) -> bool {
        self.with_defaults
    }
}
