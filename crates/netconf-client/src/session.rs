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

//! NETCONF session engine.
//!
//! A [NetconfSession] is created by [NetconfSession::connect], which performs
//! the `<hello>` exchange over a [Transport]. The server capabilities learnt
//! there are fixed for the lifetime of the session and gate every operation:
//! an operation the server does not support fails with
//! [NetconfError::Session] before anything is written to the transport.
//!
//! Each RPC gets the next message-id when its envelope is built and the
//! reply must echo it, otherwise [NetconfError::MessageIdMismatch] is
//! returned. Operations take `&mut self`, so one session never has two
//! requests in flight; [NetconfSession::send_rpc] and
//! [NetconfSession::read_reply] split a call for callers that need to.
//!
//! ```text
//! <nc:rpc xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" nc:message-id="1">
//!   <nc:get-config>
//!     <nc:source><nc:running/></nc:source>
//!   </nc:get-config>
//! </nc:rpc>
//! ```

use crate::{
    capabilities::{Capabilities, CAP_BASE_1_0, CAP_BASE_1_1},
    framing::Framing,
    prefix::PrefixMap,
    protocol::RpcError,
    schema::{RevisionError, SchemaRegistry},
    subscriber::{TapMode, TracingSubscriber},
    transport::{Transport, TransportError},
    tree::{EncodeContext, EncodeError, Forest, NodeId, NodeSet, Tree},
    xml_utils::{NamespaceBinding, ParsingError, XmlWriter},
    ACTIONS_NS, NETCONF_NS, NOTIFICATION_NS, PARTIAL_LOCK_NS, STREAMS_NS,
};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, trace, warn};

/// Session settings, usually part of a larger application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name used to label logs and I/O traces
    pub device_name: String,

    /// Read timeout in milliseconds, `0` disables it
    pub read_timeout: u64,

    /// Advertise `base:1.1` and switch to chunked framing when the server
    /// supports it too
    pub use_chunked_framing: bool,

    /// Extra capabilities advertised in the client `<hello>`
    pub proprietary_capabilities: Vec<String>,

    /// Adapt encoded payloads to the module revisions the server advertises,
    /// needs a schema registry
    pub older_revision_support: bool,

    /// Log every message sent and received at debug level
    pub io_trace: Option<TapMode>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_name: "netconf".to_string(),
            read_timeout: 0,
            use_chunked_framing: false,
            proprietary_capabilities: vec![],
            older_revision_support: false,
            io_trace: None,
        }
    }
}

impl SessionConfig {
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout)
    }
}

#[derive(Debug, strum_macros::Display)]
pub enum NetconfError {
    #[strum(to_string = "session error: {0}")]
    Session(String),

    #[strum(to_string = "parser error: {0}")]
    Parser(ParsingError),

    #[strum(to_string = "rpc-reply error: {reply}")]
    RpcReply {
        reply: Forest,
        errors: Vec<RpcError>,
    },

    #[strum(
        to_string = "After sending rpc with message-id={expected}, received rpc-reply with message-id={received}"
    )]
    MessageIdMismatch { expected: u32, received: String },

    #[strum(to_string = "expecting a notification but received: {0}")]
    Notification(Forest),

    #[strum(to_string = "transport closed")]
    TransportClosed,

    #[strum(to_string = "revision error: {0}")]
    Revision(RevisionError),

    #[strum(to_string = "transport error: {0}")]
    Transport(TransportError),
}

impl std::error::Error for NetconfError {}

impl From<ParsingError> for NetconfError {
    fn from(value: ParsingError) -> Self {
        Self::Parser(value)
    }
}

impl From<TransportError> for NetconfError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Closed => Self::TransportClosed,
            other => Self::Transport(other),
        }
    }
}

impl From<RevisionError> for NetconfError {
    fn from(value: RevisionError) -> Self {
        Self::Revision(value)
    }
}

impl From<EncodeError> for NetconfError {
    fn from(value: EncodeError) -> Self {
        match value {
            EncodeError::Revision(err) => Self::Revision(err),
            EncodeError::Io(err) => Self::Transport(TransportError::Io(err)),
            EncodeError::Utf8(err) => Self::Session(format!("cannot encode request: {err}")),
        }
    }
}

/// Named configuration datastore
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Datastore {
    Running,
    Candidate,
    Startup,
}

/// Where a configuration is written to
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Target<'a> {
    Datastore(Datastore),
    Url(&'a str),
}

impl From<Datastore> for Target<'_> {
    fn from(value: Datastore) -> Self {
        Self::Datastore(value)
    }
}

/// Where a configuration is read from
#[derive(Debug, Copy, Clone)]
pub enum Source<'a> {
    Datastore(Datastore),
    Url(&'a str),
    /// Inline `<config>` made of the forest top level nodes
    Config(&'a Forest),
}

impl From<Datastore> for Source<'_> {
    fn from(value: Datastore) -> Self {
        Self::Datastore(value)
    }
}

/// Content of an `<edit-config>`
#[derive(Debug, Copy, Clone)]
pub enum EditContent<'a> {
    Config(&'a Forest),
    Url(&'a str),
}

/// Selection of the data returned by `<get>`, `<get-config>` or a
/// subscription
#[derive(Debug, Copy, Clone)]
pub enum Filter<'a> {
    Subtree(&'a Forest),
    XPath(&'a str),
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DefaultOperation {
    Merge,
    Replace,
    None,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum TestOption {
    Set,
    TestThenSet,
    TestOnly,
}

#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ErrorOption {
    StopOnError,
    ContinueOnError,
    RollbackOnError,
}

/// Parameters of `<create-subscription>`,
/// [RFC 5277](https://datatracker.ietf.org/doc/html/rfc5277)
#[derive(Debug, Copy, Clone, Default)]
pub struct Subscription<'a> {
    /// Stream name, the server default stream when not set
    pub stream: Option<&'a str>,
    pub filter: Option<Filter<'a>>,
    /// Replay start as `dateTime`
    pub start_time: Option<&'a str>,
    pub stop_time: Option<&'a str>,
}

/// Builder of one `<rpc>` envelope
struct Request {
    message_id: u32,
    writer: XmlWriter<Vec<u8>>,
    open: Vec<BytesEnd<'static>>,
}

impl Request {
    fn new(message_id: u32, nc_prefix: &str) -> Result<Self, NetconfError> {
        let binding = NamespaceBinding::from([(NETCONF_NS.into(), nc_prefix.into())]);
        let writer = XmlWriter::new(quick_xml::Writer::new(Vec::new()), binding)
            .map_err(|err| NetconfError::Session(err.to_string()))?;
        let mut request = Self {
            message_id,
            writer,
            open: vec![],
        };
        let message_id = message_id.to_string();
        let attr = qualified(nc_prefix, "message-id");
        request.start_with(NETCONF_NS, "rpc", &[(attr.as_str(), message_id.as_str())])?;
        Ok(request)
    }

    fn element(&mut self, ns: &str, name: &str) -> Result<BytesStart<'static>, NetconfError> {
        self.writer
            .create_ns_element(ns, name)
            .map_err(|err| NetconfError::Session(err.to_string()))
    }

    fn start(&mut self, ns: &str, name: &str) -> Result<(), NetconfError> {
        self.start_with(ns, name, &[])
    }

    fn start_with(&mut self, ns: &str, name: &str, attrs: &[(&str, &str)]) -> Result<(), NetconfError> {
        let mut start = self.element(ns, name)?;
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.open.push(start.to_end().into_owned());
        self.writer.write_event(Event::Start(start)).map_err(io_error)
    }

    fn end(&mut self) -> Result<(), NetconfError> {
        if let Some(end) = self.open.pop() {
            self.writer.write_event(Event::End(end)).map_err(io_error)?;
        }
        Ok(())
    }

    fn empty(&mut self, ns: &str, name: &str) -> Result<(), NetconfError> {
        self.empty_with(ns, name, &[])
    }

    fn empty_with(&mut self, ns: &str, name: &str, attrs: &[(&str, &str)]) -> Result<(), NetconfError> {
        let mut start = self.element(ns, name)?;
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.writer.write_event(Event::Empty(start)).map_err(io_error)
    }

    fn leaf(&mut self, ns: &str, name: &str, value: &str) -> Result<(), NetconfError> {
        self.start(ns, name)?;
        self.writer
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(io_error)?;
        self.end()
    }

    /// Payload already encoded as XML
    fn raw(&mut self, xml: &str) -> Result<(), NetconfError> {
        self.writer.write_all(xml.as_bytes()).map_err(io_error)
    }

    /// Open a child element declaring its own namespace
    fn start_ns(&mut self, ns: &str, prefix: &str, name: &str) -> Result<(), NetconfError> {
        self.writer
            .push_namespace_binding(NamespaceBinding::from([(ns.into(), prefix.into())]))
            .map_err(|err| NetconfError::Session(err.to_string()))?;
        self.start(ns, name)
    }

    fn end_ns(&mut self) -> Result<(), NetconfError> {
        self.end()?;
        self.writer.pop_namespace_binding();
        Ok(())
    }

    fn datastore(&mut self, datastore: Datastore) -> Result<(), NetconfError> {
        self.empty(NETCONF_NS, &datastore.to_string())
    }

    fn finish(mut self) -> Result<(u32, String), NetconfError> {
        while !self.open.is_empty() {
            self.end()?;
        }
        let xml = String::from_utf8(self.writer.into_inner())
            .map_err(|err| NetconfError::Session(format!("cannot encode request: {err}")))?;
        Ok((self.message_id, xml))
    }
}

fn io_error(err: std::io::Error) -> NetconfError {
    NetconfError::Transport(TransportError::Io(err))
}

fn qualified(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}:{name}")
    }
}

fn is_netconf(tree: &Tree, id: NodeId, name: &str) -> bool {
    let element = &tree[id];
    element.name() == name && (element.namespace() == NETCONF_NS || element.namespace().is_empty())
}

fn netconf_child(tree: &Tree, id: NodeId, name: &str) -> Option<NodeId> {
    tree.children(id)
        .iter()
        .find(|child| is_netconf(tree, *child, name))
}

/// Client side of a NETCONF session
pub struct NetconfSession<T: Transport> {
    transport: T,
    config: SessionConfig,
    message_id: u32,
    session_id: u32,
    capabilities: Capabilities,
    prefixes: Arc<PrefixMap>,
    schema: Option<Arc<SchemaRegistry>>,
    default_operation: Option<DefaultOperation>,
    test_option: Option<TestOption>,
    error_option: Option<ErrorOption>,
}

impl<T: Transport> NetconfSession<T> {
    /// Exchange `<hello>` messages over a connected transport
    pub async fn connect(mut transport: T, config: SessionConfig) -> Result<Self, NetconfError> {
        if let Some(mode) = config.io_trace {
            transport.add_subscriber(Arc::new(TracingSubscriber::new(
                config.device_name.clone(),
                mode,
            )));
        }
        let mut session = Self {
            transport,
            config,
            message_id: 1,
            session_id: 0,
            capabilities: Capabilities::default(),
            prefixes: Arc::new(PrefixMap::netconf_defaults()),
            schema: None,
            default_operation: None,
            test_option: None,
            error_option: None,
        };
        session.hello().await?;
        Ok(session)
    }

    async fn hello(&mut self) -> Result<(), NetconfError> {
        let xml = self.encode_hello()?;
        self.transport.print(&xml);
        self.transport.flush().await?;

        let (tree, root) = self.read_message().await?;
        let capabilities = if is_netconf(&tree, root, "hello") {
            netconf_child(&tree, root, "capabilities")
        } else {
            None
        };
        let Some(capabilities) = capabilities else {
            return Err(NetconfError::Session(
                "hello contains no capabilities".to_string(),
            ));
        };
        let uris = tree
            .children(capabilities)
            .iter()
            .filter(|cap| is_netconf(&tree, *cap, "capability"))
            .filter_map(|cap| tree.value(cap))
            .map(str::trim);
        self.capabilities = Capabilities::from_uris(uris);
        if !self.capabilities.has_base_1_0() && !self.capabilities.has_base_1_1() {
            return Err(NetconfError::Session(format!(
                "server does not support NETCONF base capability: {CAP_BASE_1_0}"
            )));
        }
        if self.config.use_chunked_framing && self.capabilities.has_base_1_1() {
            self.transport.set_framing(Framing::Chunked);
        }

        let Some(session_id) = netconf_child(&tree, root, "session-id") else {
            return Err(NetconfError::Session(
                "hello contains no session identifier".to_string(),
            ));
        };
        let session_id = tree.value(session_id).unwrap_or_default().trim();
        self.session_id = session_id.parse().map_err(|_| {
            NetconfError::Session(format!("invalid session identifier `{session_id}`"))
        })?;
        debug!(
            device = %self.config.device_name,
            session_id = self.session_id,
            connection = %self.transport.connection_info(),
            "hello exchanged"
        );
        Ok(())
    }

    fn encode_hello(&self) -> Result<String, NetconfError> {
        let binding = NamespaceBinding::from([(NETCONF_NS.into(), "".into())]);
        let mut writer = XmlWriter::new(quick_xml::Writer::new(Vec::new()), binding)
            .map_err(|err| NetconfError::Session(err.to_string()))?;
        let hello = writer
            .create_ns_element(NETCONF_NS, "hello")
            .map_err(|err| NetconfError::Session(err.to_string()))?;
        writer
            .write_event(Event::Start(hello.borrow()))
            .map_err(io_error)?;
        writer
            .write_event(Event::Start(BytesStart::new("capabilities")))
            .map_err(io_error)?;
        let mut capabilities = vec![CAP_BASE_1_0];
        if self.config.use_chunked_framing {
            capabilities.push(CAP_BASE_1_1);
        }
        for cap in &self.config.proprietary_capabilities {
            if !capabilities.contains(&cap.as_str()) {
                capabilities.push(cap);
            }
        }
        for cap in capabilities {
            writer
                .write_event(Event::Start(BytesStart::new("capability")))
                .map_err(io_error)?;
            writer
                .write_event(Event::Text(BytesText::new(cap)))
                .map_err(io_error)?;
            writer
                .write_event(Event::End(BytesEnd::new("capability")))
                .map_err(io_error)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("capabilities")))
            .map_err(io_error)?;
        writer
            .write_event(Event::End(hello.to_end()))
            .map_err(io_error)?;
        String::from_utf8(writer.into_inner())
            .map_err(|err| NetconfError::Session(format!("cannot encode hello: {err}")))
    }

    pub const fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Message-id the next RPC will use
    pub const fn next_message_id(&self) -> u32 {
        self.message_id
    }

    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn has_capability(&self, uri: &str) -> bool {
        self.capabilities.has_capability(uri)
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub const fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Prefix table used by the trees parsed from replies
    pub const fn default_prefixes(&self) -> &Arc<PrefixMap> {
        &self.prefixes
    }

    pub fn set_default_prefixes(&mut self, prefixes: Arc<PrefixMap>) {
        self.prefixes = prefixes;
    }

    /// Schema consulted when `older_revision_support` is enabled
    pub fn set_schema_registry(&mut self, schema: Arc<SchemaRegistry>) {
        self.schema = Some(schema);
    }

    /// `None` leaves the choice to the server
    pub fn set_default_operation(&mut self, operation: Option<DefaultOperation>) {
        self.default_operation = operation;
    }

    pub fn set_test_option(&mut self, option: Option<TestOption>) {
        self.test_option = option;
    }

    pub fn set_error_option(&mut self, option: Option<ErrorOption>) {
        self.error_option = option;
    }

    fn require(&self, supported: bool, capability: &str) -> Result<(), NetconfError> {
        if supported {
            Ok(())
        } else {
            Err(NetconfError::Session(format!(
                "the {capability} capability is not supported by server"
            )))
        }
    }

    fn check_datastore(&self, datastore: Datastore) -> Result<(), NetconfError> {
        match datastore {
            Datastore::Running => Ok(()),
            Datastore::Candidate => self.require(self.capabilities.has_candidate(), ":candidate"),
            Datastore::Startup => self.require(self.capabilities.has_startup(), ":startup"),
        }
    }

    fn check_url(&self, url: &str) -> Result<(), NetconfError> {
        self.require(self.capabilities.has_url(), ":url")?;
        if self.capabilities.is_url_supported(url) {
            Ok(())
        } else {
            Err(NetconfError::Session(format!(
                "the url: \"{url}\" is not a supported :url scheme"
            )))
        }
    }

    fn check_target(&self, target: Target<'_>) -> Result<(), NetconfError> {
        match target {
            Target::Datastore(datastore) => self.check_datastore(datastore),
            Target::Url(url) => self.check_url(url),
        }
    }

    fn check_source(&self, source: Source<'_>) -> Result<(), NetconfError> {
        match source {
            Source::Datastore(datastore) => self.check_datastore(datastore),
            Source::Url(url) => self.check_url(url),
            Source::Config(_) => Ok(()),
        }
    }

    fn check_filter(&self, filter: Option<Filter<'_>>) -> Result<(), NetconfError> {
        match filter {
            Some(Filter::XPath(_)) => self.require(self.capabilities.has_xpath(), ":xpath"),
            _ => Ok(()),
        }
    }

    fn encode_context(&self) -> Option<EncodeContext<'_>> {
        match &self.schema {
            Some(schema) if self.config.older_revision_support => Some(EncodeContext {
                capabilities: &self.capabilities,
                schema: schema.as_ref(),
            }),
            _ => None,
        }
    }

    /// Encode a subtree so it can be embedded in an envelope, the copy
    /// declares every namespace it uses
    fn encode_node(&self, tree: &Tree, id: NodeId) -> Result<String, NetconfError> {
        let mut payload = Tree::with_default_prefixes(tree.default_prefixes().clone());
        let root = payload.import(tree, id);
        payload.declare_namespaces(root);
        Ok(payload.encode_to_string(root, self.encode_context().as_ref())?)
    }

    fn encode_forest(&self, forest: &Forest) -> Result<String, NetconfError> {
        let mut xml = String::new();
        for id in forest.iter() {
            xml.push_str(&self.encode_node(&forest.tree, id)?);
        }
        Ok(xml)
    }

    fn encode_filter(&self, filter: Option<Filter<'_>>) -> Result<Option<String>, NetconfError> {
        match filter {
            Some(Filter::Subtree(forest)) => Ok(Some(self.encode_forest(forest)?)),
            _ => Ok(None),
        }
    }

    fn encode_source(&self, source: Source<'_>) -> Result<Option<String>, NetconfError> {
        match source {
            Source::Config(forest) => Ok(Some(self.encode_forest(forest)?)),
            _ => Ok(None),
        }
    }

    fn nc_prefix(&self) -> &str {
        self.prefixes.ns_to_prefix(NETCONF_NS).unwrap_or("nc")
    }

    fn prefix_or<'a>(&'a self, namespace: &str, fallback: &'a str) -> &'a str {
        self.prefixes
            .ns_to_prefix(namespace)
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(fallback)
    }

    /// Start an envelope with the next message-id. The id is only consumed
    /// once [Self::send] has a complete message to write.
    fn begin(&self) -> Result<Request, NetconfError> {
        Request::new(self.message_id, self.nc_prefix())
    }

    async fn send(&mut self, request: Request) -> Result<u32, NetconfError> {
        let (message_id, xml) = request.finish()?;
        self.message_id = message_id.wrapping_add(1);
        self.transport.print(&xml);
        self.transport.flush().await?;
        Ok(message_id)
    }

    async fn read_message(&mut self) -> Result<(Tree, NodeId), NetconfError> {
        let message = self.transport.read_one().await?;
        if message.trim().is_empty() {
            return Err(NetconfError::Parser(ParsingError::MissingElement(
                "empty input".to_string(),
            )));
        }
        let mut tree = Tree::with_default_prefixes(self.prefixes.clone());
        let root = tree.parse(&message)?;
        Ok((tree, root))
    }

    /// Read a reply and check it echoes `message_id`
    async fn read_rpc_reply(
        &mut self,
        message_id: Option<u32>,
    ) -> Result<(Tree, NodeId, bool), NetconfError> {
        let (tree, root) = self.read_message().await?;
        let is_reply = is_netconf(&tree, root, "rpc-reply");
        if let (true, Some(expected)) = (is_reply, message_id) {
            let received = tree.attr_value(root, "message-id");
            if received != Some(expected.to_string().as_str()) {
                return Err(NetconfError::MessageIdMismatch {
                    expected,
                    received: received.unwrap_or("none").to_string(),
                });
            }
        }
        Ok((tree, root, is_reply))
    }

    fn reply_error(tree: Tree, root: NodeId) -> NetconfError {
        let errors = match RpcError::from_reply(&tree, root) {
            Ok(errors) => errors,
            Err(err) => {
                warn!(error = %err, "cannot decode rpc-error");
                vec![]
            }
        };
        NetconfError::RpcReply {
            reply: Forest::new(tree, NodeSet::from(vec![root])),
            errors,
        }
    }

    /// Reply expected to hold `<ok/>` or `<data>`, returned detached
    async fn read_ok(&mut self, message_id: u32) -> Result<Forest, NetconfError> {
        let (mut tree, root, is_reply) = self.read_rpc_reply(Some(message_id)).await?;
        let found = if is_reply {
            netconf_child(&tree, root, "ok").or_else(|| netconf_child(&tree, root, "data"))
        } else {
            None
        };
        match found {
            Some(id) => {
                let prefixes = Self::envelope_prefixes(&tree, id);
                tree.detach(id);
                if !prefixes.is_empty() {
                    tree.merge_prefixes(id, &prefixes);
                }
                Ok(Forest::new(tree, NodeSet::from(vec![id])))
            }
            None => Err(Self::reply_error(tree, root)),
        }
    }

    /// Reply expected to hold `<data>`, its children are returned detached
    async fn read_data(&mut self, message_id: u32) -> Result<Forest, NetconfError> {
        let (tree, root, is_reply) = self.read_rpc_reply(Some(message_id)).await?;
        let data = if is_reply {
            netconf_child(&tree, root, "data")
        } else {
            None
        };
        match data {
            Some(data) => Ok(Self::detach_children(tree, data)),
            None => Err(Self::reply_error(tree, root)),
        }
    }

    /// Children of `<rpc-reply>`, unless the reply carries `<rpc-error>`
    async fn read_reply_children(&mut self, message_id: u32) -> Result<Forest, NetconfError> {
        let (tree, root, is_reply) = self.read_rpc_reply(Some(message_id)).await?;
        if !is_reply || netconf_child(&tree, root, "rpc-error").is_some() {
            return Err(Self::reply_error(tree, root));
        }
        Ok(Self::detach_children(tree, root))
    }

    /// Bindings a node inherits from the reply envelope, the node's own
    /// declarations are not included
    fn envelope_prefixes(tree: &Tree, id: NodeId) -> PrefixMap {
        let mut prefixes = PrefixMap::new();
        let mut current = tree.parent(id);
        while let Some(node) = current {
            if let Some(declared) = tree[node].prefixes() {
                prefixes.merge(declared);
            }
            current = tree.parent(node);
        }
        prefixes
    }

    fn detach_children(mut tree: Tree, parent: NodeId) -> Forest {
        let mut prefixes = tree[parent].prefixes().cloned().unwrap_or_default();
        prefixes.merge(&Self::envelope_prefixes(&tree, parent));
        let children: Vec<NodeId> = tree.children(parent).iter().collect();
        for child in &children {
            tree.detach(*child);
            if !prefixes.is_empty() {
                tree.merge_prefixes(*child, &prefixes);
            }
        }
        Forest::new(tree, NodeSet::from(children))
    }

    /// Send an already encoded message and parse the reply
    pub async fn rpc(&mut self, request: &str) -> Result<Forest, NetconfError> {
        trace!(device = %self.config.device_name, "rpc");
        self.transport.print(request);
        self.transport.flush().await?;
        self.read_reply().await
    }

    /// Send an element tree as is and parse the reply
    pub async fn rpc_element(&mut self, tree: &Tree, id: NodeId) -> Result<Forest, NetconfError> {
        let request = self.encode_node(tree, id)?;
        self.rpc(&request).await
    }

    /// Send an already encoded message without waiting for the reply.
    ///
    /// Returns the message-id most recently assigned by the session, which is
    /// not checked against the one in `request`.
    pub async fn send_request(&mut self, request: &str) -> Result<u32, NetconfError> {
        self.transport.print(request);
        self.transport.flush().await?;
        Ok(self.message_id.wrapping_sub(1))
    }

    /// Read and parse the next message
    pub async fn read_reply(&mut self) -> Result<Forest, NetconfError> {
        let (tree, root) = self.read_message().await?;
        Ok(Forest::new(tree, NodeSet::from(vec![root])))
    }

    /// Wrap `data` in an `<rpc>` and return the content of the reply
    pub async fn call_rpc(&mut self, tree: &Tree, id: NodeId) -> Result<Forest, NetconfError> {
        let message_id = self.send_rpc(tree, id).await?;
        self.read_reply_children(message_id).await
    }

    /// Wrap `data` in an `<rpc>` and return its message-id without waiting
    /// for the reply
    pub async fn send_rpc(&mut self, tree: &Tree, id: NodeId) -> Result<u32, NetconfError> {
        let payload = self.encode_node(tree, id)?;
        let mut request = self.begin()?;
        request.raw(&payload)?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "rpc");
        self.send(request).await
    }

    pub async fn get_config(
        &mut self,
        source: Datastore,
        filter: Option<Filter<'_>>,
    ) -> Result<Forest, NetconfError> {
        self.check_datastore(source)?;
        self.check_filter(filter)?;
        let subtree = self.encode_filter(filter)?;
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "get-config")?;
        request.start(NETCONF_NS, "source")?;
        request.datastore(source)?;
        request.end()?;
        Self::write_filter(&mut request, filter, subtree.as_deref())?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, %source, "get-config");
        let message_id = self.send(request).await?;
        self.read_data(message_id).await
    }

    pub async fn get(&mut self, filter: Option<Filter<'_>>) -> Result<Forest, NetconfError> {
        self.check_filter(filter)?;
        let subtree = self.encode_filter(filter)?;
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "get")?;
        Self::write_filter(&mut request, filter, subtree.as_deref())?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "get");
        let message_id = self.send(request).await?;
        self.read_data(message_id).await
    }

    fn write_filter(
        request: &mut Request,
        filter: Option<Filter<'_>>,
        subtree: Option<&str>,
    ) -> Result<(), NetconfError> {
        match (filter, subtree) {
            (Some(Filter::XPath(select)), _) if !select.is_empty() => request.empty_with(
                NETCONF_NS,
                "filter",
                &[("type", "xpath"), ("select", select)],
            ),
            (Some(Filter::Subtree(_)), Some(subtree)) => {
                request.start_with(NETCONF_NS, "filter", &[("type", "subtree")])?;
                request.raw(subtree)?;
                request.end()
            }
            _ => Ok(()),
        }
    }

    pub async fn edit_config(
        &mut self,
        target: Datastore,
        content: EditContent<'_>,
    ) -> Result<(), NetconfError> {
        self.check_datastore(target)?;
        if let EditContent::Url(url) = content {
            self.check_url(url)?;
        }
        if self.test_option.is_some() {
            self.require(self.capabilities.has_validate(), ":validate")?;
        }
        if self.error_option == Some(ErrorOption::RollbackOnError) {
            self.require(
                self.capabilities.has_rollback_on_error(),
                ":rollback-on-error",
            )?;
        }
        let config = match content {
            EditContent::Config(forest) => Some(self.encode_forest(forest)?),
            EditContent::Url(_) => None,
        };
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "edit-config")?;
        request.start(NETCONF_NS, "target")?;
        request.datastore(target)?;
        request.end()?;
        if let Some(operation) = self.default_operation {
            request.leaf(NETCONF_NS, "default-operation", &operation.to_string())?;
        }
        if let Some(option) = self.test_option {
            request.leaf(NETCONF_NS, "test-option", &option.to_string())?;
        }
        if let Some(option) = self.error_option {
            request.leaf(NETCONF_NS, "error-option", &option.to_string())?;
        }
        match (content, config) {
            (EditContent::Url(url), _) => request.leaf(NETCONF_NS, "url", url)?,
            (_, config) => {
                request.start(NETCONF_NS, "config")?;
                request.raw(config.as_deref().unwrap_or_default())?;
                request.end()?;
            }
        }
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, %target, "edit-config");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    fn write_target(request: &mut Request, target: Target<'_>) -> Result<(), NetconfError> {
        request.start(NETCONF_NS, "target")?;
        match target {
            Target::Datastore(datastore) => request.datastore(datastore)?,
            Target::Url(url) => request.leaf(NETCONF_NS, "url", url)?,
        }
        request.end()
    }

    fn write_source(
        request: &mut Request,
        source: Source<'_>,
        config: Option<&str>,
    ) -> Result<(), NetconfError> {
        request.start(NETCONF_NS, "source")?;
        match source {
            Source::Datastore(datastore) => request.datastore(datastore)?,
            Source::Url(url) => request.leaf(NETCONF_NS, "url", url)?,
            Source::Config(_) => {
                request.start(NETCONF_NS, "config")?;
                request.raw(config.unwrap_or_default())?;
                request.end()?;
            }
        }
        request.end()
    }

    /// Replace the target configuration with the source one
    pub async fn copy_config(
        &mut self,
        source: Source<'_>,
        target: Target<'_>,
    ) -> Result<(), NetconfError> {
        self.check_source(source)?;
        self.check_target(target)?;
        let config = self.encode_source(source)?;
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "copy-config")?;
        Self::write_target(&mut request, target)?;
        Self::write_source(&mut request, source, config.as_deref())?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "copy-config");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    pub async fn delete_config(&mut self, target: Target<'_>) -> Result<(), NetconfError> {
        self.check_target(target)?;
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "delete-config")?;
        Self::write_target(&mut request, target)?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "delete-config");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    pub async fn lock(&mut self, target: Target<'_>) -> Result<(), NetconfError> {
        self.target_operation("lock", target).await
    }

    pub async fn unlock(&mut self, target: Target<'_>) -> Result<(), NetconfError> {
        self.target_operation("unlock", target).await
    }

    async fn target_operation(&mut self, name: &str, target: Target<'_>) -> Result<(), NetconfError> {
        self.check_target(target)?;
        let mut request = self.begin()?;
        request.start(NETCONF_NS, name)?;
        Self::write_target(&mut request, target)?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "{name}");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    /// Lock the nodes selected by each expression,
    /// [RFC 5717](https://datatracker.ietf.org/doc/html/rfc5717). Returns the
    /// lock-id to pass to [NetconfSession::unlock_partial].
    pub async fn lock_partial(&mut self, selects: &[&str]) -> Result<u32, NetconfError> {
        self.require(self.capabilities.has_partial_lock(), ":partial-lock")?;
        let pl = self.prefix_or(PARTIAL_LOCK_NS, "pl").to_string();
        let mut request = self.begin()?;
        request.start_ns(PARTIAL_LOCK_NS, &pl, "partial-lock")?;
        for select in selects {
            request.leaf(PARTIAL_LOCK_NS, "select", select)?;
        }
        request.end_ns()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "partial-lock");
        let message_id = self.send(request).await?;
        let reply = self.read_reply_children(message_id).await?;
        let lock_id = reply
            .iter()
            .find(|id| reply.tree[*id].name() == "lock-id")
            .and_then(|id| reply.tree.value(id))
            .and_then(|value| value.trim().parse::<u32>().ok());
        match lock_id {
            Some(lock_id) => {
                debug!(device = %self.config.device_name, lock_id, "partial lock acquired");
                Ok(lock_id)
            }
            None => Err(NetconfError::Session(format!(
                "bad lock-id returned from partial-lock: {reply}"
            ))),
        }
    }

    pub async fn unlock_partial(&mut self, lock_id: u32) -> Result<(), NetconfError> {
        self.require(self.capabilities.has_partial_lock(), ":partial-lock")?;
        self.require(self.capabilities.has_xpath(), ":xpath")?;
        let pl = self.prefix_or(PARTIAL_LOCK_NS, "pl").to_string();
        let mut request = self.begin()?;
        request.start_ns(PARTIAL_LOCK_NS, &pl, "partial-unlock")?;
        request.leaf(PARTIAL_LOCK_NS, "lock-id", &lock_id.to_string())?;
        request.end_ns()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, lock_id, "partial-unlock");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    /// Commit the candidate configuration into running
    pub async fn commit(&mut self) -> Result<(), NetconfError> {
        self.require(self.capabilities.has_candidate(), ":candidate")?;
        self.simple_operation("commit").await
    }

    /// Commit that the server reverts unless another [NetconfSession::commit]
    /// arrives within `timeout` seconds. The confirming commit is up to the
    /// caller.
    pub async fn confirmed_commit(&mut self, timeout: u32) -> Result<(), NetconfError> {
        self.require(self.capabilities.has_candidate(), ":candidate")?;
        self.require(self.capabilities.has_confirmed_commit(), ":confirmed-commit")?;
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "commit")?;
        request.empty(NETCONF_NS, "confirmed")?;
        request.leaf(NETCONF_NS, "confirm-timeout", &timeout.to_string())?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, timeout, "confirmed commit");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    /// Revert the candidate configuration to the running one
    pub async fn discard_changes(&mut self) -> Result<(), NetconfError> {
        self.require(self.capabilities.has_candidate(), ":candidate")?;
        self.simple_operation("discard-changes").await
    }

    /// Graceful termination, the server releases the session locks. The
    /// transport is closed once the server acknowledged.
    pub async fn close_session(&mut self) -> Result<(), NetconfError> {
        self.simple_operation("close-session").await?;
        debug!(device = %self.config.device_name, session_id = self.session_id, "session closed");
        self.transport.close().await?;
        Ok(())
    }

    /// Abort another session, killing the own session is refused
    pub async fn kill_session(&mut self, session_id: u32) -> Result<(), NetconfError> {
        if session_id == self.session_id {
            return Err(NetconfError::Session(
                "illegal to use kill-session on own session id".to_string(),
            ));
        }
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "kill-session")?;
        request.leaf(NETCONF_NS, "session-id", &session_id.to_string())?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, session_id, "kill-session");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    async fn simple_operation(&mut self, name: &str) -> Result<(), NetconfError> {
        let mut request = self.begin()?;
        request.empty(NETCONF_NS, name)?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "{name}");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    pub async fn validate(&mut self, source: Source<'_>) -> Result<(), NetconfError> {
        self.require(self.capabilities.has_validate(), ":validate")?;
        self.check_source(source)?;
        let config = self.encode_source(source)?;
        let mut request = self.begin()?;
        request.start(NETCONF_NS, "validate")?;
        Self::write_source(&mut request, source, config.as_deref())?;
        request.end()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "validate");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    /// Start receiving notifications,
    /// [RFC 5277](https://datatracker.ietf.org/doc/html/rfc5277)
    pub async fn create_subscription(
        &mut self,
        subscription: Subscription<'_>,
    ) -> Result<(), NetconfError> {
        self.require(self.capabilities.has_notification(), ":notification")?;
        self.check_filter(subscription.filter)?;
        let subtree = self.encode_filter(subscription.filter)?;
        let ncn = self.prefix_or(NOTIFICATION_NS, "ncn").to_string();
        let mut request = self.begin()?;
        request.start_ns(NOTIFICATION_NS, &ncn, "create-subscription")?;
        if let Some(stream) = subscription.stream {
            request.leaf(NOTIFICATION_NS, "stream", stream)?;
        }
        Self::write_filter(&mut request, subscription.filter, subtree.as_deref())?;
        if let Some(start_time) = subscription.start_time {
            request.leaf(NOTIFICATION_NS, "startTime", start_time)?;
        }
        if let Some(stop_time) = subscription.stop_time {
            request.leaf(NOTIFICATION_NS, "stopTime", stop_time)?;
        }
        request.end_ns()?;
        trace!(
            device = %self.config.device_name,
            message_id = request.message_id,
            stream = subscription.stream.unwrap_or_default(),
            "create-subscription"
        );
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await?;
        Ok(())
    }

    /// Streams the server offers for subscriptions
    pub async fn get_streams(&mut self) -> Result<Forest, NetconfError> {
        self.require(self.capabilities.has_notification(), ":notification")?;
        let mut tree = Tree::with_default_prefixes(self.prefixes.clone());
        let netconf = tree.create(STREAMS_NS, "netconf");
        tree.create_child(netconf, "streams");
        let filter = Forest::new(tree, NodeSet::from(vec![netconf]));
        self.get(Some(Filter::Subtree(&filter))).await
    }

    /// Wait for the next `<notification>`. Anything else is returned as
    /// [NetconfError::Notification].
    pub async fn receive_notification(&mut self) -> Result<Forest, NetconfError> {
        let (tree, root) = self.read_message().await?;
        let forest = Forest::new(tree, NodeSet::from(vec![root]));
        if forest.tree[root].name() == "notification" {
            Ok(forest)
        } else {
            Err(NetconfError::Notification(forest))
        }
    }

    /// Invoke an action. The reply is `<ok/>` when the action returns
    /// nothing, otherwise `<data>` holding its result.
    pub async fn action(&mut self, tree: &Tree, id: NodeId) -> Result<Forest, NetconfError> {
        let payload = self.encode_node(tree, id)?;
        let mut request = self.begin()?;
        request.start_ns(ACTIONS_NS, "", "action")?;
        request.start(ACTIONS_NS, "data")?;
        request.raw(&payload)?;
        request.end()?;
        request.end_ns()?;
        trace!(device = %self.config.device_name, message_id = request.message_id, "action");
        let message_id = self.send(request).await?;
        self.read_ok(message_id).await
    }

    pub async fn close(&mut self) -> Result<(), NetconfError> {
        Ok(self.transport.close().await?)
    }
}
