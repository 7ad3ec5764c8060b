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

//! Client side NETCONF ([RFC 6241](https://datatracker.ietf.org/doc/html/rfc6241))
//! engine.
//!
//! * [session::NetconfSession] performs the `<hello>` exchange, builds RPC
//!   envelopes, correlates replies and exposes the NETCONF operations.
//! * [transport] and [framing] turn a duplex byte stream into messages.
//! * [tree] is the namespace aware element tree used both as RPC payload and
//!   as in-memory configuration, [path] and [merge] locate and splice subtrees
//!   of it.
//! * [capabilities] and [schema] describe what the server supports, which the
//!   session uses to gate operations and to encode for older module
//!   revisions.

pub mod capabilities;
pub mod framing;
pub mod merge;
pub mod path;
pub mod prefix;
pub mod protocol;
pub mod schema;
pub mod session;
pub mod subscriber;
pub mod transport;
pub mod tree;
pub mod xml_utils;

pub const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
pub const PARTIAL_LOCK_NS: &str = "urn:ietf:params:xml:ns:netconf:partial-lock:1.0";
pub const ACTIONS_NS: &str = "http://tail-f.com/ns/netconf/actions/1.0";

/// Namespace of the `<netconf><streams/></netconf>` stream listing
pub const STREAMS_NS: &str = "urn:ietf:params:xml:ns:netmod:notification";

#[cfg(test)]
pub mod test {
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Arc, time::Duration};
    use tokio_test::io::{Builder, Mock};

    use crate::{
        framing::{Framing, END_OF_MESSAGE},
        subscriber::{notify, IoSubscriber},
        transport::{Transport, TransportError},
    };

    /// Wrap [Builder] allowing it to accept NETCONF messages for read and
    /// write mocks, the framing is added by the builder.
    pub struct NetconfIoMockBuilder {
        io_builder: Builder,
    }

    impl NetconfIoMockBuilder {
        pub fn new() -> Self {
            Self {
                io_builder: Builder::new(),
            }
        }

        /// See [Builder::read], the message is end-of-message framed
        pub fn read(&mut self, msg: &str) -> &mut Self {
            self.io_builder
                .read(format!("{msg}{END_OF_MESSAGE}").as_bytes());
            self
        }

        /// See [Builder::read], the message is sent as a single chunk
        pub fn read_chunked(&mut self, msg: &str) -> &mut Self {
            self.io_builder
                .read(format!("\n#{}\n{msg}\n##\n", msg.len()).as_bytes());
            self
        }

        /// See [Builder::write], the message is end-of-message framed
        pub fn write(&mut self, msg: &str) -> &mut Self {
            self.io_builder
                .write(format!("{msg}{END_OF_MESSAGE}").as_bytes());
            self
        }

        /// See [Builder::write], the message is expected as a single chunk
        pub fn write_chunked(&mut self, msg: &str) -> &mut Self {
            self.io_builder
                .write(format!("\n#{}\n{msg}\n##\n", msg.len()).as_bytes());
            self
        }

        /// See [Builder::wait]
        pub fn wait(&mut self, duration: Duration) -> &mut Self {
            self.io_builder.wait(duration);
            self
        }

        /// See [Builder::build]
        pub fn build(&mut self) -> Mock {
            self.io_builder.build()
        }
    }

    /// In-memory [Transport] replaying scripted replies and recording every
    /// flushed message.
    #[derive(Default)]
    pub struct MockTransport {
        replies: VecDeque<String>,
        sent: Vec<String>,
        out: String,
        framing: Framing,
        subscribers: Vec<Arc<dyn IoSubscriber>>,
        closed: bool,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a message to be returned by a later read
        pub fn reply(mut self, msg: impl Into<String>) -> Self {
            self.replies.push_back(msg.into());
            self
        }

        pub fn push_reply(&mut self, msg: impl Into<String>) {
            self.replies.push_back(msg.into());
        }

        /// Every message flushed so far, in order
        pub fn sent(&self) -> &[String] {
            &self.sent
        }

        pub fn framing(&self) -> Framing {
            self.framing
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn ready(&self) -> bool {
            !self.replies.is_empty()
        }

        async fn read_one(&mut self) -> Result<String, TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            let msg = self.replies.pop_front().ok_or(TransportError::Closed)?;
            notify(self.subscribers.iter().map(|s| s.as_ref()), &msg, false);
            Ok(msg)
        }

        fn print(&mut self, text: &str) {
            self.out.push_str(text);
        }

        fn println(&mut self, text: &str) {
            self.out.push_str(text);
            self.out.push('\n');
        }

        async fn flush(&mut self) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            let msg = std::mem::take(&mut self.out);
            notify(self.subscribers.iter().map(|s| s.as_ref()), &msg, true);
            self.sent.push(msg);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed = true;
            Ok(())
        }

        fn set_framing(&mut self, framing: Framing) {
            self.framing = framing;
        }

        fn connection_info(&self) -> &str {
            "mock"
        }

        fn is_closed(&self) -> bool {
            self.closed
        }

        fn add_subscriber(&mut self, subscriber: Arc<dyn IoSubscriber>) {
            self.subscribers.push(subscriber);
        }
    }

    /// Server `<hello>` advertising the given capabilities
    pub fn server_hello(session_id: u32, capabilities: &[&str]) -> String {
        let capabilities: String = capabilities
            .iter()
            .map(|cap| format!("<capability>{cap}</capability>"))
            .collect();
        format!(
            "<hello xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\"><capabilities>{capabilities}</capabilities><session-id>{session_id}</session-id></hello>"
        )
    }

    /// `<rpc-reply>` with the given body
    pub fn rpc_reply(message_id: u32, body: &str) -> String {
        format!(
            "<rpc-reply xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\" message-id=\"{message_id}\">{body}</rpc-reply>"
        )
    }

    pub fn ok_reply(message_id: u32) -> String {
        rpc_reply(message_id, "<ok/>")
    }
}
