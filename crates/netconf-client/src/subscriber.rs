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

//! Observers of the messages a transport sends and receives.
//!
//! Taps only see copies of complete messages, they cannot change what is
//! delivered to the session.

use crate::tree::Tree;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// How a tap wants messages rendered
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
pub enum TapMode {
    /// Text as it appeared on the wire
    #[default]
    Raw,

    /// Each message re-parsed and pretty printed, falls back to the raw
    /// text when the message is not well-formed XML
    Pretty,
}

impl TapMode {
    pub fn render<'a>(&self, message: &'a str) -> Cow<'a, str> {
        match self {
            TapMode::Raw => Cow::Borrowed(message),
            TapMode::Pretty => match Tree::from_xml(message) {
                Ok((tree, root)) => match tree.to_xml_string(root) {
                    Ok(pretty) => Cow::Owned(pretty),
                    Err(_) => Cow::Borrowed(message),
                },
                Err(_) => Cow::Borrowed(message),
            },
        }
    }
}

pub trait IoSubscriber: Send + Sync {
    fn mode(&self) -> TapMode {
        TapMode::Raw
    }

    /// Called with every message read from the peer
    fn input(&self, message: &str);

    /// Called with every message written to the peer
    fn output(&self, message: &str);
}

/// Default tap, emits `debug` records with the device name attached
#[derive(Debug, Clone)]
pub struct TracingSubscriber {
    device_name: String,
    mode: TapMode,
}

impl TracingSubscriber {
    pub fn new(device_name: impl Into<String>, mode: TapMode) -> Self {
        Self {
            device_name: device_name.into(),
            mode,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl IoSubscriber for TracingSubscriber {
    fn mode(&self) -> TapMode {
        self.mode
    }

    fn input(&self, message: &str) {
        tracing::debug!(device = %self.device_name, "RECV {}\n{message}", self.device_name);
    }

    fn output(&self, message: &str) {
        tracing::debug!(device = %self.device_name, "SEND {}\n{message}", self.device_name);
    }
}

/// Fan out one message to a list of taps, rendering once per mode
pub(crate) fn notify<'a>(
    subscribers: impl IntoIterator<Item = &'a dyn IoSubscriber>,
    message: &str,
    outgoing: bool,
) {
    let mut pretty: Option<Cow<'_, str>> = None;
    for subscriber in subscribers {
        let rendered = match subscriber.mode() {
            TapMode::Raw => message,
            TapMode::Pretty => &**pretty.get_or_insert_with(|| TapMode::Pretty.render(message)),
        };
        if outgoing {
            subscriber.output(rendered);
        } else {
            subscriber.input(rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        mode: TapMode,
        seen: Mutex<Vec<String>>,
    }

    impl IoSubscriber for Recorder {
        fn mode(&self) -> TapMode {
            self.mode
        }

        fn input(&self, message: &str) {
            self.seen.lock().unwrap().push(format!("in:{message}"));
        }

        fn output(&self, message: &str) {
            self.seen.lock().unwrap().push(format!("out:{message}"));
        }
    }

    #[test]
    fn test_render_modes() {
        let message = "<a xmlns=\"urn:x\"><b>1</b></a>";
        assert_eq!(TapMode::Raw.render(message), message);
        assert_eq!(
            TapMode::Pretty.render(message),
            "<a xmlns=\"urn:x\">\n  <b>1</b>\n</a>"
        );
        // not XML, kept as is
        assert_eq!(TapMode::Pretty.render("<a><b>"), "<a><b>");
    }

    #[test]
    fn test_notify_taps() {
        let raw = Recorder::default();
        let pretty = Recorder {
            mode: TapMode::Pretty,
            ..Default::default()
        };
        let taps: Vec<&dyn IoSubscriber> = vec![&raw, &pretty];
        notify(taps.iter().copied(), "<ok/>", false);
        notify(taps.iter().copied(), "<rpc/>", true);
        assert_eq!(*raw.seen.lock().unwrap(), vec!["in:<ok/>", "out:<rpc/>"]);
        assert_eq!(*pretty.seen.lock().unwrap(), vec!["in:<ok/>", "out:<rpc/>"]);
    }

    #[test]
    #[traced_test]
    fn test_tracing_subscriber() {
        let tap = TracingSubscriber::new("router-1", TapMode::Raw);
        tap.output("<hello/>");
        tap.input("<ok/>");
        assert!(logs_contain("SEND router-1"));
        assert!(logs_contain("RECV router-1"));
    }
}
