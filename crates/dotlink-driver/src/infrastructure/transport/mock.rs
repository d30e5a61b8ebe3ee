//! Scripted in-memory display for testing.
//!
//! A [`MockDisplay`] plays the device end of a byte stream.  Every packet
//! the host writes is handed to a responder together with the host's
//! current line settings; whatever the responder returns becomes readable
//! by the host.  A responder that returns nothing when the settings do not
//! match models a display listening at a different speed.
//!
//! The display is shared through `Arc<Mutex<..>>`, so a test keeps one
//! handle for inspection while the session owns the channel.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dotlink_core::protocol::humanware::{self, MessageType, ESC};
use dotlink_core::protocol::tsi;

use crate::application::backends::{humanware::LINK_PARAMETERS, tsi::NORMAL_LINK};
use crate::application::channel::{Channel, Connector, LinkParameters, LinkSpec, StreamChannel, TransportError};

type Responder = Box<dyn FnMut(&LinkParameters, &[u8]) -> Vec<u8> + Send>;

struct DisplayState {
    params: LinkParameters,
    inbox: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    reconfigurations: Vec<LinkParameters>,
    responder: Responder,
    write_failure: Option<io::ErrorKind>,
    unplugged: bool,
    closed: bool,
}

/// The device end of a scripted link.
#[derive(Clone)]
pub struct MockDisplay {
    state: Arc<Mutex<DisplayState>>,
}

impl MockDisplay {
    /// Creates a display whose host end starts at `params`.
    pub fn new(
        params: LinkParameters,
        responder: impl FnMut(&LinkParameters, &[u8]) -> Vec<u8> + Send + 'static,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(DisplayState {
                params,
                inbox: VecDeque::new(),
                written: Vec::new(),
                reconfigurations: Vec::new(),
                responder: Box::new(responder),
                write_failure: None,
                unplugged: false,
                closed: false,
            })),
        }
    }

    /// A Brailliant with `cells` cells that answers INIT at 115200 8E1.
    pub fn humanware(cells: u8) -> Self {
        Self::new(LINK_PARAMETERS, move |params, packet| {
            if *params != LINK_PARAMETERS || packet != humanware::identify_request().as_slice() {
                return Vec::new();
            }
            vec![ESC, MessageType::InitResponse as u8, 7, 1, 2, 3, 4, 0, 0x10, cells]
        })
    }

    /// A TSI display with `columns` cells and hardware `version`, listening
    /// at `baud`.  When `follows_baud_change` is false it acknowledges
    /// nothing and keeps its speed, like an emulator.
    pub fn tsi(columns: u8, version: [u8; 4], baud: u32, follows_baud_change: bool) -> Self {
        let mut display_baud = baud;
        Self::new(NORMAL_LINK, move |params, packet| {
            if params.baud != display_baud {
                return Vec::new();
            }
            match packet {
                [0xFF, 0xFF, 0x0A] => {
                    let mut reply = vec![tsi::HEADER, tsi::IDENTITY_KIND, columns, 2];
                    reply.extend_from_slice(&version);
                    reply.extend_from_slice(&[0; 4]);
                    reply
                }
                [0xFF, 0xFF, 0x05, code] if follows_baud_change => {
                    if let Some(baud) = [4800, 9600, 19_200].into_iter().find(|b| tsi::baud_code(*b) == Some(*code)) {
                        display_baud = baud;
                    }
                    Vec::new()
                }
                _ => Vec::new(),
            }
        })
    }

    /// A stream channel connected to this display.
    pub fn channel(&self) -> MockDisplayChannel {
        MockDisplayChannel {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DisplayState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Makes `bytes` readable by the host, as if the display sent them.
    pub fn push_input(&self, bytes: &[u8]) {
        self.lock().inbox.extend(bytes);
    }

    /// Every packet the host has written, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Every line setting the host switched to, in order.
    pub fn reconfigurations(&self) -> Vec<LinkParameters> {
        self.lock().reconfigurations.clone()
    }

    /// The host's current line settings.
    pub fn parameters(&self) -> LinkParameters {
        self.lock().params
    }

    /// Makes subsequent writes fail with `kind`, or succeed again with
    /// `None`.
    pub fn fail_writes(&self, kind: Option<io::ErrorKind>) {
        self.lock().write_failure = kind;
    }

    /// Simulates pulling the cable.
    pub fn unplug(&self) {
        self.lock().unplugged = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Host end of a [`MockDisplay`] link.
pub struct MockDisplayChannel {
    state: Arc<Mutex<DisplayState>>,
}

impl MockDisplayChannel {
    fn lock(&self) -> Result<MutexGuard<'_, DisplayState>, TransportError> {
        let state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(TransportError::Closed);
        }
        if state.unplugged {
            return Err(TransportError::Disconnected);
        }
        Ok(state)
    }
}

impl StreamChannel for MockDisplayChannel {
    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransportError> {
        let mut state = self.lock()?;
        let count = buf.len().min(state.inbox.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbox.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        if let Some(kind) = state.write_failure {
            return Err(io::Error::from(kind).into());
        }
        state.written.push(bytes.to_vec());

        let params = state.params;
        let reply = (state.responder)(&params, bytes);
        state.inbox.extend(reply);
        Ok(())
    }

    fn reconfigure(&mut self, params: &LinkParameters) -> Result<(), TransportError> {
        let mut state = self.lock()?;
        state.params = *params;
        state.reconfigurations.push(*params);
        state.inbox.clear();
        Ok(())
    }

    fn parameters(&self) -> Option<LinkParameters> {
        Some(self.state.lock().expect("lock poisoned").params)
    }

    fn close(&mut self) {
        self.state.lock().expect("lock poisoned").closed = true;
    }
}

/// Hands out channels to [`MockDisplay`]s by link.
#[derive(Default)]
pub struct MockDisplayConnector {
    displays: Vec<(LinkSpec, MockDisplay)>,
}

impl MockDisplayConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `display` to `link`.
    pub fn attach(mut self, link: LinkSpec, display: MockDisplay) -> Self {
        self.displays.push((link, display));
        self
    }
}

impl Connector for MockDisplayConnector {
    fn open(&self, link: &LinkSpec, params: Option<LinkParameters>) -> Result<Channel, TransportError> {
        let display = self
            .displays
            .iter()
            .find(|(attached, _)| attached == link)
            .map(|(_, display)| display)
            .ok_or_else(|| TransportError::Open {
                link: link.to_string(),
                reason: "nothing attached".to_string(),
            })?;

        if let Some(params) = params {
            display.lock().params = params;
        }
        Ok(Channel::Stream(Box::new(display.channel())))
    }
}
