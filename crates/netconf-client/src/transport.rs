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

//! Duplex message channel used by a NETCONF session.
//!
//! [Transport] is the contract the session depends on: write text with
//! [Transport::print], end the message with [Transport::flush] and read
//! complete messages back with [Transport::read_one]. [StreamTransport]
//! implements it over any `AsyncRead + AsyncWrite` stream (SSH channel, TCP
//! socket or an in-memory pipe) using [NetconfCodec] for the framing.
//!
//! A [StreamTransport] created with a non-zero read timeout runs a watchdog
//! task: a read that does not complete within the timeout closes the
//! transport, turning a silent hang into [TransportError::Closed]. This holds
//! for every read, including the ones following reads served from the
//! buffer.

use crate::{
    framing::{CodecError, Framing, NetconfCodec},
    session::SessionConfig,
    subscriber::{notify, IoSubscriber},
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::{io, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
};
use tokio_util::{codec::Framed, sync::CancellationToken};
use tracing::{debug, trace, warn};

#[derive(Debug, strum_macros::Display)]
pub enum TransportError {
    #[strum(to_string = "std::io:Error: `{0}`")]
    Io(io::Error),

    #[strum(to_string = "framing error: `{0}`")]
    Codec(CodecError),

    #[strum(to_string = "transport is closed")]
    Closed,
}

impl std::error::Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CodecError> for TransportError {
    fn from(value: CodecError) -> Self {
        match value {
            CodecError::IO(err) => Self::Io(err),
            other => Self::Codec(other),
        }
    }
}

#[async_trait]
pub trait Transport: Send {
    /// `true` when input is already buffered and a read may complete
    /// without waiting on the peer
    fn ready(&self) -> bool;

    /// Wait for one complete message, without its framing
    async fn read_one(&mut self) -> Result<String, TransportError>;

    /// Append text to the message being built
    fn print(&mut self, text: &str);

    /// Append text followed by a line break
    fn println(&mut self, text: &str);

    /// Terminate the message being built and send it
    async fn flush(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    fn set_framing(&mut self, framing: Framing);

    /// `host:port` of the peer or another label describing the channel
    fn connection_info(&self) -> &str;

    fn is_closed(&self) -> bool;

    fn add_subscriber(&mut self, subscriber: Arc<dyn IoSubscriber>);
}

/// Watchdog task closing the transport when a read takes too long.
///
/// Every read hands the task its own `finished` receiver over the unbounded
/// `started` channel, the task races that receiver against the timeout. A
/// read completing before the task gets to it leaves an already resolved
/// receiver behind, so no signal is ever lost. Dropping the watchdog closes
/// `started` which ends the task.
#[derive(Debug)]
struct ReadWatchdog {
    started: async_channel::Sender<oneshot::Receiver<()>>,
}

impl ReadWatchdog {
    fn spawn(timeout: Duration, cancel: CancellationToken, connection_info: String) -> Self {
        let (started, started_rx) = async_channel::unbounded::<oneshot::Receiver<()>>();
        tokio::spawn(async move {
            while let Ok(finished) = started_rx.recv().await {
                tokio::select! {
                    _ = finished => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!(
                            connection = %connection_info,
                            timeout_ms = timeout.as_millis() as u64,
                            "read timeout, closing session"
                        );
                        cancel.cancel();
                        break;
                    }
                }
            }
            trace!(connection = %connection_info, "read watchdog stopped");
        });
        Self { started }
    }

    fn arm(&self) -> ArmedRead {
        let (finished, finished_rx) = oneshot::channel();
        if let Err(err) = self.started.try_send(finished_rx) {
            // Only happens once the task fired and the session is cancelled
            trace!("read watchdog is gone: {err}");
        }
        ArmedRead {
            finished: Some(finished),
        }
    }
}

/// Disarms the watchdog when the read completes or its future is dropped
struct ArmedRead {
    finished: Option<oneshot::Sender<()>>,
}

impl Drop for ArmedRead {
    fn drop(&mut self) {
        if let Some(finished) = self.finished.take() {
            if finished.send(()).is_err() {
                trace!("read finished after the watchdog stopped");
            }
        }
    }
}

/// [Transport] over a framed byte stream
pub struct StreamTransport<T> {
    framed: Framed<T, NetconfCodec>,
    out: String,
    connection_info: String,
    subscribers: Vec<Arc<dyn IoSubscriber>>,
    cancel: CancellationToken,
    watchdog: Option<ReadWatchdog>,
    closed: bool,
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamTransport<T> {
    /// Wrap a connected stream. A zero `read_timeout` disables the read
    /// watchdog, so does calling this outside of a tokio runtime.
    pub fn new(stream: T, connection_info: impl Into<String>, read_timeout: Duration) -> Self {
        let connection_info = connection_info.into();
        let cancel = CancellationToken::new();
        let watchdog = if read_timeout.is_zero() {
            None
        } else if tokio::runtime::Handle::try_current().is_err() {
            warn!(connection = %connection_info, "no tokio runtime, read watchdog disabled");
            None
        } else {
            Some(ReadWatchdog::spawn(
                read_timeout,
                cancel.clone(),
                connection_info.clone(),
            ))
        };
        Self {
            framed: Framed::new(stream, NetconfCodec::default()),
            out: String::new(),
            connection_info,
            subscribers: vec![],
            cancel,
            watchdog,
            closed: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framed.codec().framing()
    }

    pub fn into_inner(self) -> T {
        self.framed.into_inner()
    }

    fn notify(&self, message: &str, outgoing: bool) {
        if !self.subscribers.is_empty() {
            notify(
                self.subscribers.iter().map(|s| s.as_ref()),
                message,
                outgoing,
            );
        }
    }
}

pub type TcpTransport = StreamTransport<TcpStream>;

impl StreamTransport<TcpStream> {
    pub async fn connect(
        host: &str,
        port: u16,
        config: &SessionConfig,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let connection_info = format!("{host}:{port}");
        debug!(connection = %connection_info, "TCP connected");
        Ok(Self::new(stream, connection_info, config.read_timeout()))
    }
}

#[async_trait]
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for StreamTransport<T> {
    fn ready(&self) -> bool {
        !self.framed.read_buffer().is_empty()
    }

    async fn read_one(&mut self) -> Result<String, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let armed = self.watchdog.as_ref().map(ReadWatchdog::arm);
        let msg = tokio::select! {
            _ = self.cancel.cancelled() => None,
            msg = self.framed.next() => msg,
        };
        drop(armed);
        match msg {
            Some(Ok(msg)) => {
                if tracing::enabled!(tracing::Level::TRACE) {
                    trace!(connection = %self.connection_info, "received message: `{msg}`");
                }
                self.notify(&msg, false);
                Ok(msg)
            }
            Some(Err(err)) => Err(err.into()),
            None => {
                debug!(connection = %self.connection_info, "end of stream");
                self.closed = true;
                Err(TransportError::Closed)
            }
        }
    }

    fn print(&mut self, text: &str) {
        self.out.push_str(text);
    }

    fn println(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let msg = std::mem::take(&mut self.out);
        self.notify(&msg, true);
        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(connection = %self.connection_info, "sending message: `{msg}`");
        }
        self.framed.send(msg).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cancel.cancel();
        self.watchdog = None;
        debug!(connection = %self.connection_info, "closing transport");
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }

    fn set_framing(&mut self, framing: Framing) {
        debug!(connection = %self.connection_info, %framing, "switching framing");
        self.framed.codec_mut().set_framing(framing);
    }

    fn connection_info(&self) -> &str {
        &self.connection_info
    }

    fn is_closed(&self) -> bool {
        self.closed || self.cancel.is_cancelled()
    }

    fn add_subscriber(&mut self, subscriber: Arc<dyn IoSubscriber>) {
        self.subscribers.push(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio_test::io::Builder;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl IoSubscriber for Recorder {
        fn input(&self, message: &str) {
            self.seen.lock().unwrap().push(format!("in:{message}"));
        }

        fn output(&self, message: &str) {
            self.seen.lock().unwrap().push(format!("out:{message}"));
        }
    }

    #[tokio::test]
    async fn test_read_one_end_of_message() {
        let io = Builder::new().read(b"<ok/>]]>]]>").build();
        let mut transport = StreamTransport::new(io, "mock", Duration::ZERO);
        assert_eq!(transport.read_one().await.unwrap(), "<ok/>");
        assert!(matches!(
            transport.read_one().await,
            Err(TransportError::Closed)
        ));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_print_and_flush() {
        let io = Builder::new()
            .write(b"<rpc>\n<close-session/></rpc>]]>]]>")
            .build();
        let mut transport = StreamTransport::new(io, "mock", Duration::ZERO);
        let recorder = Arc::new(Recorder::default());
        transport.add_subscriber(recorder.clone());
        transport.println("<rpc>");
        transport.print("<close-session/>");
        transport.print("</rpc>");
        transport.flush().await.unwrap();
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["out:<rpc>\n<close-session/></rpc>"]
        );
    }

    #[tokio::test]
    async fn test_switch_to_chunked() {
        let io = Builder::new()
            .write(b"<a/>]]>]]>")
            .write(b"\n#4\n<b/>\n##\n")
            .read(b"\n#5\n<ok/>\n##\n")
            .build();
        let mut transport = StreamTransport::new(io, "mock", Duration::ZERO);
        transport.print("<a/>");
        transport.flush().await.unwrap();
        transport.set_framing(Framing::Chunked);
        assert_eq!(transport.framing(), Framing::Chunked);
        transport.print("<b/>");
        transport.flush().await.unwrap();
        assert_eq!(transport.read_one().await.unwrap(), "<ok/>");
    }

    #[tokio::test]
    async fn test_framing_error() {
        let io = Builder::new().read(b"\n#x\n").build();
        let mut transport = StreamTransport::new(io, "mock", Duration::ZERO);
        transport.set_framing(Framing::Chunked);
        assert!(matches!(
            transport.read_one().await,
            Err(TransportError::Codec(CodecError::InvalidChunkHeader(_)))
        ));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_watchdog_closes_on_timeout() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client, "pipe", Duration::from_millis(20));
        assert!(matches!(
            transport.read_one().await,
            Err(TransportError::Closed)
        ));
        assert!(transport.is_closed());
        assert!(logs_contain("read timeout, closing session"));
    }

    #[tokio::test]
    async fn test_watchdog_lets_fast_reads_through() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client, "pipe", Duration::from_millis(500));
        server.write_all(b"<ok/>]]>]]>").await.unwrap();
        assert_eq!(transport.read_one().await.unwrap(), "<ok/>");
        server.write_all(b"<ok/>]]>]]>").await.unwrap();
        assert_eq!(transport.read_one().await.unwrap(), "<ok/>");
        assert!(!transport.is_closed());
        assert_eq!(transport.connection_info(), "pipe");

        // The peer goes silent, the watchdog still closes the transport
        let hanging = tokio::time::timeout(Duration::from_secs(2), transport.read_one()).await;
        assert!(matches!(hanging, Ok(Err(TransportError::Closed))));
        assert!(transport.is_closed());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_watchdog_fires_after_buffered_read() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client, "pipe", Duration::from_millis(50));
        // Both messages land in the read buffer together
        server
            .write_all(b"<ok/>]]>]]><data/>]]>]]>")
            .await
            .unwrap();
        assert_eq!(transport.read_one().await.unwrap(), "<ok/>");
        assert!(transport.ready());
        assert_eq!(transport.read_one().await.unwrap(), "<data/>");

        let hanging = tokio::time::timeout(Duration::from_secs(2), transport.read_one()).await;
        assert!(matches!(hanging, Ok(Err(TransportError::Closed))));
        assert!(transport.is_closed());
        assert!(logs_contain("read timeout, closing session"));
        drop(server);
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_io() {
        let (client, _server) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(client, "pipe", Duration::ZERO);
        transport.close().await.unwrap();
        transport.print("<a/>");
        assert!(matches!(
            transport.flush().await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.read_one().await,
            Err(TransportError::Closed)
        ));
    }
}
