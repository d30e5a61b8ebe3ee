//! The device session: one connected, identified display.
//!
//! # Lifecycle (for beginners)
//!
//! 1. [`DeviceSession::open`] walks the configured candidates in order,
//!    opens each transport and runs [`DeviceSession::establish`] on it.
//! 2. `establish` wraps the channel in the back-end for its protocol family
//!    and negotiates: identify at the initial link parameters, then at each
//!    alternate, then try the model's faster setting if it has one.
//! 3. The ready session is driven from a single tick loop:
//!    [`render`](DeviceSession::render) pushes cells through the
//!    [`CellRenderer`], [`poll_events`](DeviceSession::poll_events) reads
//!    input through the [`KeyNormalizer`] and [`KeyEventQueue`].
//! 4. A fatal transport error marks the session lost; the caller drops it
//!    and opens a new one.  [`disconnect`](DeviceSession::disconnect) is
//!    final and also runs on drop.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use dotlink_core::domain::profile::CapabilityError;
use dotlink_core::keys::KeySet;
use dotlink_core::{
    hex_dump, CellRenderer, DeviceProfile, KeyEvent, KeyEventQueue, KeyGroup, KeyNormalizer, ProtocolError,
    ProtocolFamily, RenderError, RenderOutcome,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backends::{self, BackendError, DisplayBackend, Identity, InputReport};
use super::channel::{Channel, ConnectCandidate, Connector, LinkParameters, TransportError};

/// Timeout of each read issued by [`DeviceSession::poll_events`].
const POLL_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// Upper bound on reads per poll so a chattering display cannot starve the
/// rest of the tick.
const MAX_READS_PER_POLL: usize = 16;

// ── Identifiers and options ───────────────────────────────────────────────────

/// Unique identifier of one session, recorded in its log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tunables for negotiation and the key pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Overrides the back-end's own identification timeout.
    pub identify_timeout: Option<Duration>,
    /// Pause after every link parameter change before the line is used.
    pub settle_delay: Duration,
    /// Allows moving TSI displays to 19200 baud.
    pub allow_high_baud: bool,
    /// Release debounce window; zero disables it.
    pub release_debounce: Duration,
    /// Overrides the profile's forced refresh interval.
    pub refresh_interval: Option<u32>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            identify_timeout: None,
            settle_delay: Duration::from_millis(100),
            allow_high_baud: true,
            release_debounce: Duration::ZERO,
            refresh_interval: None,
        }
    }
}

/// What [`DeviceSession::probe`] reports to the layer above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub model: String,
    pub family: ProtocolFamily,
    pub cell_count: usize,
    pub routing_keys: usize,
    pub firmware: String,
    /// Settled line parameters, for links that have any.
    #[serde(skip)]
    pub link: Option<LinkParameters>,
    /// The display ignored a link speed change, so it is likely an
    /// emulator and gets a full refresh on every render.
    pub emulated: bool,
    /// The reported capabilities were inconsistent and a best-effort
    /// profile is in use.
    pub degraded: bool,
    pub refresh_interval: u32,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    /// No identification reply at any candidate link parameter.
    #[error("display did not answer identification ({attempts} attempts)")]
    Negotiation { attempts: usize },

    /// The display answered before a speed change and at neither speed
    /// afterwards.
    #[error("display lost after switching to {baud} baud")]
    LostAfterLinkChange { baud: u32 },

    #[error("device lost: {0}")]
    DeviceLost(#[from] TransportError),

    /// A write timed out; the session stays usable.
    #[error("write failed: {0}")]
    WriteFailed(#[source] TransportError),

    #[error("cannot encode cells: {0}")]
    Encode(#[source] ProtocolError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("session is no longer active")]
    Closed,

    #[error("cannot open {link}: {source}")]
    Open {
        link: String,
        #[source]
        source: TransportError,
    },

    #[error("no display found on {candidates} candidate link(s)")]
    NoDisplay {
        candidates: usize,
        #[source]
        last: Box<SessionError>,
    },

    #[error("no candidate links configured")]
    NoCandidates,
}

impl SessionError {
    /// Whether the caller should drop the session and open a new one.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::WriteFailed(_) | SessionError::Encode(_) | SessionError::Render(_)
        )
    }
}

fn write_error(err: BackendError) -> SessionError {
    match err {
        BackendError::Encode(err) => SessionError::Encode(err),
        BackendError::Transport(err) if err.is_transient() => SessionError::WriteFailed(err),
        BackendError::Transport(err) => SessionError::DeviceLost(err),
    }
}

// ── Negotiation ───────────────────────────────────────────────────────────────

struct Negotiated {
    identity: Identity,
    emulated: bool,
}

/// Moves the local end of the link and waits for the line to settle.
/// No reads are issued during the delay.
fn switch_link(
    backend: &mut dyn DisplayBackend,
    params: &LinkParameters,
    settle_delay: Duration,
) -> Result<(), TransportError> {
    backend.set_link_parameters(params)?;
    thread::sleep(settle_delay);
    backend.reset_input();
    Ok(())
}

fn negotiate(backend: &mut dyn DisplayBackend, options: &SessionOptions) -> Result<Negotiated, SessionError> {
    let timeout = options.identify_timeout.unwrap_or_else(|| backend.identify_timeout());

    let mut attempts = 1;
    let mut identity = backend.identify(timeout)?;

    if identity.is_none() {
        for params in backend.alternate_parameters() {
            debug!(%params, "no identification reply, trying alternate link parameters");
            switch_link(backend, &params, options.settle_delay)?;
            attempts += 1;
            identity = backend.identify(timeout)?;
            if identity.is_some() {
                break;
            }
        }
    }

    let identity = identity.ok_or(SessionError::Negotiation { attempts })?;
    if let Some(err) = &identity.capability_warning {
        warn!(error = %err, model = %identity.profile.model, "malformed capabilities, continuing degraded");
    }

    let mut emulated = false;
    if let (Some(target), Some(original)) = (backend.upgrade_parameters(&identity.profile), backend.link_parameters()) {
        if backend.request_link_change(&target)? {
            info!(from = %original, to = %target, "switching link speed");
            switch_link(backend, &target, options.settle_delay)?;

            if backend.identify(timeout)?.is_none() {
                switch_link(backend, &original, options.settle_delay)?;
                if backend.identify(timeout)?.is_none() {
                    return Err(SessionError::LostAfterLinkChange { baud: target.baud });
                }
                warn!(%original, "display ignored the speed change, assuming an emulator");
                emulated = true;
            }
        }
    }

    backend.finish_setup()?;
    Ok(Negotiated { identity, emulated })
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Lost,
    Closed,
}

/// A connected and identified display.
pub struct DeviceSession {
    id: SessionId,
    backend: Box<dyn DisplayBackend>,
    profile: DeviceProfile,
    capabilities: Capabilities,
    renderer: CellRenderer,
    normalizer: KeyNormalizer,
    queue: KeyEventQueue,
    state: SessionState,
    quiet_until: Option<Instant>,
    protocol_errors: u64,
    reports: Vec<InputReport>,
}

impl DeviceSession {
    /// Tries each candidate in order and returns the first session that
    /// negotiates successfully.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoCandidates`] for an empty list, otherwise
    /// [`SessionError::NoDisplay`] carrying the last candidate's failure.
    pub fn open(
        connector: &dyn Connector,
        candidates: &[ConnectCandidate],
        options: &SessionOptions,
    ) -> Result<Self, SessionError> {
        let mut last = None;

        for candidate in candidates {
            let params = backends::initial_parameters(candidate.protocol);
            debug!(link = %candidate.link, protocol = %candidate.protocol, "trying candidate");

            let channel = match connector.open(&candidate.link, params) {
                Ok(channel) => channel,
                Err(source) => {
                    debug!(link = %candidate.link, error = %source, "cannot open link");
                    last = Some(SessionError::Open {
                        link: candidate.link.to_string(),
                        source,
                    });
                    continue;
                }
            };

            match Self::establish(channel, candidate.protocol, options) {
                Ok(session) => return Ok(session),
                Err(err) => {
                    warn!(link = %candidate.link, error = %err, "no usable display on link");
                    last = Some(err);
                }
            }
        }

        match last {
            Some(last) => Err(SessionError::NoDisplay {
                candidates: candidates.len(),
                last: Box::new(last),
            }),
            None => Err(SessionError::NoCandidates),
        }
    }

    /// Negotiates with the display behind an already open channel.
    ///
    /// # Errors
    ///
    /// [`SessionError::Negotiation`] when the display never answers,
    /// [`SessionError::LostAfterLinkChange`] when it stops answering after a
    /// speed change, [`SessionError::DeviceLost`] on transport failure.  The
    /// channel is closed on every error path.
    pub fn establish(channel: Channel, protocol: ProtocolFamily, options: &SessionOptions) -> Result<Self, SessionError> {
        let mut backend = backends::open_backend(protocol, channel, options.allow_high_baud)?;

        let Negotiated { identity, emulated } = match negotiate(backend.as_mut(), options) {
            Ok(negotiated) => negotiated,
            Err(err) => {
                backend.close();
                return Err(err);
            }
        };

        let profile = identity.profile;
        let refresh_interval = if emulated {
            1
        } else {
            options.refresh_interval.unwrap_or(profile.refresh_interval)
        };

        let capabilities = Capabilities {
            model: profile.model.clone(),
            family: profile.family,
            cell_count: profile.cell_count,
            routing_keys: profile.routing_keys,
            firmware: identity.firmware,
            link: backend.link_parameters(),
            emulated,
            degraded: identity.capability_warning.is_some(),
            refresh_interval,
        };

        let id = SessionId::new();
        info!(
            session = %id,
            model = %capabilities.model,
            cells = capabilities.cell_count,
            firmware = %capabilities.firmware,
            link = ?capabilities.link.map(|params| params.to_string()),
            "session ready"
        );

        Ok(Self {
            id,
            renderer: CellRenderer::new(profile.cell_count, profile.update_policy, refresh_interval),
            backend,
            profile,
            capabilities,
            normalizer: KeyNormalizer::new(),
            queue: KeyEventQueue::new(options.release_debounce),
            state: SessionState::Active,
            quiet_until: None,
            protocol_errors: 0,
            reports: Vec::new(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Capabilities of the connected display.
    pub fn probe(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Framing and decoding errors seen so far.
    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }

    /// Keys of `group` currently held down.
    pub fn held_keys(&self, group: KeyGroup) -> &KeySet {
        self.normalizer.held(group)
    }

    /// Brings the display in line with `cells`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Render`] if `cells` has the wrong length.
    /// - [`SessionError::WriteFailed`] for a timed out write; the session
    ///   stays usable and the unsent cells go out on a later call.
    /// - [`SessionError::DeviceLost`] for any other transport failure; the
    ///   session is closed.
    /// - [`SessionError::Closed`] once the session is no longer active.
    pub fn render(&mut self, cells: &[u8]) -> Result<RenderOutcome, SessionError> {
        self.ensure_active()?;

        let now = Instant::now();
        if self.quiet_until.is_some_and(|until| now < until) {
            return Ok(RenderOutcome::Deferred);
        }

        let backend = &mut self.backend;
        let result = self
            .renderer
            .render(cells, |offset, span| backend.write_cells(offset, span).map_err(write_error));

        match result {
            Ok(outcome) => {
                if let RenderOutcome::Written { writes, .. } = outcome {
                    let writes = u32::try_from(writes).unwrap_or(u32::MAX);
                    if !self.profile.write_delay.is_zero() {
                        self.quiet_until = Some(now + self.profile.write_delay * writes);
                    }
                }
                Ok(outcome)
            }
            Err(err) => {
                if matches!(err, SessionError::DeviceLost(_)) {
                    self.lose_device(&err);
                }
                Err(err)
            }
        }
    }

    /// Reads whatever input is waiting and returns the key events that are
    /// due, in order.  Never blocks for more than a few milliseconds.
    ///
    /// # Errors
    ///
    /// [`SessionError::DeviceLost`] on a fatal transport failure, or
    /// [`SessionError::Closed`] once the session is no longer active.
    pub fn poll_events(&mut self) -> Result<Vec<KeyEvent>, SessionError> {
        self.ensure_active()?;

        let mut reports = std::mem::take(&mut self.reports);
        for _ in 0..MAX_READS_PER_POLL {
            reports.clear();
            match self.backend.read_input(POLL_READ_TIMEOUT, &mut reports) {
                Ok(count) => {
                    let now = Instant::now();
                    for report in reports.drain(..) {
                        self.handle_report(report, now);
                    }
                    if count == 0 {
                        break;
                    }
                }
                Err(err) if err.is_transient() => break,
                Err(err) => {
                    let err = SessionError::DeviceLost(err);
                    self.lose_device(&err);
                    return Err(err);
                }
            }
        }
        self.reports = reports;

        let events = self.queue.drain(Instant::now());
        for event in &events {
            debug!(session = %self.id, key = %self.profile.describe(event), press = event.press, "key event");
        }
        Ok(events)
    }

    /// Closes the transport and drops all pending input.  No events are
    /// delivered afterwards.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::Active {
            self.backend.reset_input();
            self.backend.close();
        }
        self.queue.clear();
        self.normalizer.reset();
        self.state = SessionState::Closed;
        info!(session = %self.id, "session closed");
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Lost | SessionState::Closed => Err(SessionError::Closed),
        }
    }

    fn lose_device(&mut self, err: &SessionError) {
        warn!(session = %self.id, error = %err, "device lost");
        self.backend.close();
        self.queue.clear();
        self.normalizer.reset();
        self.state = SessionState::Lost;
    }

    fn handle_report(&mut self, report: InputReport, now: Instant) {
        match report {
            InputReport::KeyBitfield {
                group,
                bytes,
                descriptors,
            } => match self.normalizer.apply_bitfield(group, &bytes, descriptors) {
                Ok(events) => events.into_iter().for_each(|event| self.queue.enqueue(event, now)),
                Err(err) => self.protocol_error(&err),
            },
            InputReport::RoutingSensors { declared, sensors } => match &self.profile.routing {
                Some(layout) => match self.normalizer.apply_routing(layout, declared, &sensors) {
                    Ok(events) => events.into_iter().for_each(|event| self.queue.enqueue(event, now)),
                    Err(err) => {
                        warn!(session = %self.id, error = %err, sensors = %hex_dump(&sensors), "routing frame ignored");
                    }
                },
                None => debug!(session = %self.id, error = %CapabilityError::NoRoutingLayout, "routing frame ignored"),
            },
            InputReport::KeyChange { group, key, press } => {
                let event = self.normalizer.apply_change(group, key, press);
                self.queue.enqueue(event, now);
            }
            InputReport::LowBattery => warn!(session = %self.id, "battery low"),
            InputReport::Malformed(err) => self.protocol_error(&err),
        }
    }

    fn protocol_error(&mut self, err: &ProtocolError) {
        self.protocol_errors += 1;
        debug!(session = %self.id, error = %err, total = self.protocol_errors, "protocol error");
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::application::backends::humanware::LINK_PARAMETERS;
    use crate::application::channel::MockStreamChannel;
    use dotlink_core::protocol::humanware::ESC;

    /// A Brailliant 4-cell display that answers INIT and accepts writes
    /// according to `write`.
    fn humanware_channel(
        write: impl FnMut(&[u8]) -> Result<(), TransportError> + Send + 'static,
    ) -> MockStreamChannel {
        let mut channel = MockStreamChannel::new();
        let mut write = write;
        channel.expect_write().returning(move |bytes| {
            if bytes == [ESC, 0x00, 0x00] {
                Ok(())
            } else {
                write(bytes)
            }
        });
        channel.expect_parameters().returning(|| Some(LINK_PARAMETERS));
        channel.expect_close().returning(|| ());
        let mut answered = false;
        channel.expect_read().returning(move |buf, _| {
            if answered {
                return Ok(0);
            }
            answered = true;
            let reply = [ESC, 0x01, 0x07, 1, 0, 1, 0, 0, 0x42, 4];
            buf[..reply.len()].copy_from_slice(&reply);
            Ok(reply.len())
        });
        channel
    }

    fn session(channel: MockStreamChannel) -> DeviceSession {
        DeviceSession::establish(
            Channel::Stream(Box::new(channel)),
            ProtocolFamily::HumanWare,
            &SessionOptions::default(),
        )
        .expect("display answers")
    }

    #[test]
    fn test_probe_reports_identified_capabilities() {
        // Arrange / Act
        let session = session(humanware_channel(|_| Ok(())));

        // Assert
        let caps = session.probe();
        assert_eq!(caps.cell_count, 4);
        assert_eq!(caps.family, ProtocolFamily::HumanWare);
        assert_eq!(caps.link, Some(LINK_PARAMETERS));
        assert!(!caps.emulated);
        assert!(!caps.degraded);
    }

    #[test]
    fn test_timed_out_write_keeps_session_usable() {
        // Arrange
        let mut session = session(humanware_channel(|_| {
            Err(TransportError::Io(io::Error::from(io::ErrorKind::TimedOut)))
        }));

        // Act
        let result = session.render(&[1, 2, 3, 4]);

        // Assert
        assert!(matches!(result, Err(SessionError::WriteFailed(_))));
        assert!(session.is_active());
    }

    #[test]
    fn test_broken_pipe_loses_device_and_closes_session() {
        // Arrange
        let mut session = session(humanware_channel(|_| {
            Err(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)))
        }));

        // Act
        let first = session.render(&[1, 2, 3, 4]);
        let second = session.render(&[1, 2, 3, 4]);

        // Assert
        assert!(matches!(first, Err(SessionError::DeviceLost(_))));
        assert!(matches!(second, Err(SessionError::Closed)));
        assert!(matches!(session.poll_events(), Err(SessionError::Closed)));
    }

    #[test]
    fn test_wrong_buffer_length_is_rejected_without_writing() {
        // Arrange
        let mut session = session(humanware_channel(|_| panic!("nothing should be written")));

        // Act
        let result = session.render(&[1, 2]);

        // Assert
        assert!(matches!(
            result,
            Err(SessionError::Render(RenderError::CellCount { expected: 4, actual: 2 }))
        ));
    }

    #[test]
    fn test_disconnect_is_final() {
        // Arrange
        let mut session = session(humanware_channel(|_| Ok(())));

        // Act
        session.disconnect();

        // Assert
        assert!(!session.is_active());
        assert!(matches!(session.render(&[0; 4]), Err(SessionError::Closed)));
        assert!(matches!(session.poll_events(), Err(SessionError::Closed)));
    }

    #[test]
    fn test_only_write_timeouts_and_encoding_errors_are_recoverable() {
        let timeout = write_error(BackendError::Transport(TransportError::Io(io::Error::from(
            io::ErrorKind::TimedOut,
        ))));
        let gone = write_error(BackendError::Transport(TransportError::Disconnected));

        assert!(!timeout.is_fatal());
        assert!(gone.is_fatal());
        assert!(SessionError::Negotiation { attempts: 2 }.is_fatal());
    }
}
