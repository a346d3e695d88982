//! The connection lifecycle state machine.
//!
//! [`ConnectivityManager`] owns the link, the secure transport and the broker
//! session, and moves them through [`ConnectionState`] one step at a time.
//! Nothing in here waits: every call does a bounded amount of work and
//! returns, and the caller decides when to call again.
//!
//! The secure transport is opened on the way into `SessionHandshaking`, so a
//! rejected TLS handshake and a refused CONNACK both leave from that state.
//!
//! ```text
//! Disconnected -> LinkAcquiring -> LinkUp -> SessionHandshaking -> SessionActive
//!       ^               |                            |                   |
//!       |               +-- timeout (backoff) -------+---- Faulted <-----+
//!       +---------------------- cooldown -------------------+
//! ```

use super::config::{AgentConfig, ConfigError, Topics};
use super::retry::RetryPolicy;
use super::state::ConnectionState;
use super::status::{Failure, HandshakeCause, PublishError, StatusEvent, StatusSink};
use crate::network::application::mqtt::{Event, QoS, Session};
use crate::network::error::Error;
use crate::network::transport::{Credentials, Fingerprints, SecureTransport};
use crate::network::{Link, LinkStatus};
use crate::telemetry::CommandDispatcher;
use crate::telemetry::codec::{self, DecodeError};

/// Drives the link, the secure transport and the broker session towards
/// [`ConnectionState::SessionActive`] and keeps them there.
pub struct ConnectivityManager<'a, L: Link, T: SecureTransport> {
    config: AgentConfig<'a>,
    credentials: Credentials<'a>,
    fingerprints: Fingerprints,
    topics: Topics,
    link: L,
    transport: T,
    session: Option<Session<T::Connection>>,
    state: ConnectionState,
    retry: RetryPolicy,
    entered_at_ms: u64,
    retry_at_ms: u64,
    last_failure: Option<Failure>,
    credential_failures: u32,
    escalated: bool,
    subscription: Option<u16>,
}

impl<L: Link, T: SecureTransport> core::fmt::Debug for ConnectivityManager<'_, L, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectivityManager")
            .field("state", &self.state)
            .field("retry", &self.retry)
            .field("last_failure", &self.last_failure)
            .field("session", &self.session)
            .finish()
    }
}

impl<'a, L: Link, T: SecureTransport> ConnectivityManager<'a, L, T> {
    /// Validate the configuration and credential material and start out
    /// [`Disconnected`](ConnectionState::Disconnected).
    ///
    /// This is the only place where the agent gives up: a bad configuration
    /// is reported here and nothing is retried.
    pub fn new(
        config: AgentConfig<'a>,
        credentials: Credentials<'a>,
        link: L,
        transport: T,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let topics = Topics::for_device(config.device_id)?;
        let fingerprints = credentials
            .validate()
            .map_err(|(kind, e)| ConfigError::Credential(kind, e))?;
        info!(
            "credentials ok, anchor {=u32:#x} identity {=u32:#x}",
            fingerprints.trust_anchor,
            fingerprints.identity
        );

        Ok(Self {
            retry: RetryPolicy::from_config(&config.backoff),
            config,
            credentials,
            fingerprints,
            topics,
            link,
            transport,
            session: None,
            state: ConnectionState::Disconnected,
            entered_at_ms: 0,
            retry_at_ms: 0,
            last_failure: None,
            credential_failures: 0,
            escalated: false,
            subscription: None,
        })
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether publishing is allowed.
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::SessionActive
    }

    /// The retry policy, for inspection.
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The failure that caused the most recent retry.
    pub fn last_failure(&self) -> Option<Failure> {
        self.last_failure
    }

    /// Fingerprints of the configured certificates.
    pub fn fingerprints(&self) -> Fingerprints {
        self.fingerprints
    }

    /// Topics derived from the device identifier.
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &AgentConfig<'a> {
        &self.config
    }

    /// Earliest time the next attempt will be made after a failure.
    pub fn retry_at_ms(&self) -> u64 {
        self.retry_at_ms
    }

    /// Advance the state machine by at most one step.
    ///
    /// Does nothing while the session is active. In every other state it
    /// resumes where the last call left off: a link that is still up is
    /// reused, but a session that was torn down is always renegotiated.
    pub fn attempt_connect<S: StatusSink>(&mut self, now_ms: u64, status: &mut S) {
        match self.state {
            ConnectionState::SessionActive => {}
            ConnectionState::Disconnected => {
                if now_ms < self.retry_at_ms {
                    return;
                }
                if self.link.poll() != LinkStatus::Up {
                    if let Err(_e) = self.link.begin() {
                        warn!("link begin failed");
                        self.link_failed(now_ms, status);
                        return;
                    }
                }
                self.transition(ConnectionState::LinkAcquiring, now_ms, status);
            }
            ConnectionState::LinkAcquiring => match self.link.poll() {
                LinkStatus::Up => self.transition(ConnectionState::LinkUp, now_ms, status),
                LinkStatus::Failed => self.link_failed(now_ms, status),
                LinkStatus::Down | LinkStatus::Pending => {
                    let waited = now_ms.saturating_sub(self.entered_at_ms);
                    if waited >= u64::from(self.config.link_timeout_ms) {
                        warn!("link acquisition timed out after {=u64} ms", waited);
                        self.link_failed(now_ms, status);
                    }
                }
            },
            ConnectionState::LinkUp => {
                if self.link.poll() != LinkStatus::Up {
                    self.link_failed(now_ms, status);
                    return;
                }
                self.transition(ConnectionState::SessionHandshaking, now_ms, status);
                self.open_session(now_ms, status);
            }
            ConnectionState::SessionHandshaking => match self.await_connack(now_ms) {
                Ok(true) => self.established(now_ms, status),
                Ok(false) => {}
                Err(cause) => self.fault(Failure::Handshake(cause), now_ms, status),
            },
            ConnectionState::Faulted => {
                if now_ms >= self.retry_at_ms {
                    self.transition(ConnectionState::Disconnected, now_ms, status);
                }
            }
        }
    }

    /// Service the active session.
    ///
    /// Safe to call every tick in any state; it only acts while the session
    /// is active. Performs exactly one read and one keep-alive check, then
    /// hands every command already buffered to `dispatcher`.
    pub fn pump<D: CommandDispatcher, S: StatusSink>(
        &mut self,
        now_ms: u64,
        dispatcher: &mut D,
        status: &mut S,
    ) {
        if self.state != ConnectionState::SessionActive {
            return;
        }
        if let Err(e) = self.service(now_ms, dispatcher, status) {
            self.fault(Failure::Transport(e), now_ms, status);
        }
    }

    /// Publish a telemetry payload on the device's data topic.
    ///
    /// Fails immediately with [`PublishError::NotConnected`] outside
    /// `SessionActive`. A payload too large for the session buffers is
    /// rejected without touching the connection; any other failure faults
    /// the session.
    pub fn publish<S: StatusSink>(
        &mut self,
        payload: &[u8],
        now_ms: u64,
        status: &mut S,
    ) -> Result<(), PublishError> {
        if self.state != ConnectionState::SessionActive {
            return Err(PublishError::NotConnected);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(PublishError::NotConnected);
        };
        match session.publish(self.topics.publish.as_str(), payload, QoS::AtMostOnce, now_ms) {
            Ok(_) => Ok(()),
            Err(Error::BufferOverflow) => Err(PublishError::TooLarge),
            Err(e) => {
                self.fault(Failure::Transport(e), now_ms, status);
                Err(PublishError::Transport(e))
            }
        }
    }

    /// Close the session cleanly and go to `Disconnected`.
    pub fn shutdown<S: StatusSink>(&mut self, now_ms: u64, status: &mut S) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.disconnect(now_ms) {
                warn!("disconnect failed: {}", e);
            }
        }
        self.subscription = None;
        self.transition(ConnectionState::Disconnected, now_ms, status);
    }

    fn open_session<S: StatusSink>(&mut self, now_ms: u64, status: &mut S) {
        let connection = match self
            .transport
            .connect(&self.config.endpoint, &self.credentials)
        {
            Ok(connection) => connection,
            Err(e) => {
                self.fault(Failure::Handshake(HandshakeCause::Transport(e)), now_ms, status);
                return;
            }
        };
        match Session::open(connection, &self.config.session_options(), now_ms) {
            Ok(session) => self.session = Some(session),
            Err(e) => self.fault(Failure::Handshake(HandshakeCause::Io(e)), now_ms, status),
        }
    }

    fn await_connack(&mut self, now_ms: u64) -> Result<bool, HandshakeCause> {
        let session = self
            .session
            .as_mut()
            .ok_or(HandshakeCause::Io(Error::NotOpen))?;
        session.poll().map_err(HandshakeCause::Io)?;
        while let Some(event) = session.next_event(now_ms).map_err(HandshakeCause::Io)? {
            match event {
                Event::Connected { session_present } => {
                    debug!("CONNACK, session present {=bool}", session_present);
                    return Ok(true);
                }
                Event::Refused(code) => return Err(HandshakeCause::Refused(code)),
                _ => {}
            }
        }
        let waited = now_ms.saturating_sub(self.entered_at_ms);
        if waited >= u64::from(self.config.handshake_timeout_ms) {
            return Err(HandshakeCause::Timeout);
        }
        Ok(false)
    }

    fn established<S: StatusSink>(&mut self, now_ms: u64, status: &mut S) {
        self.retry.reset();
        self.credential_failures = 0;
        self.escalated = false;
        self.transition(ConnectionState::SessionActive, now_ms, status);

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let subscribed = session.subscribe(
            self.topics.subscribe.as_str(),
            self.config.command_qos,
            now_ms,
        );
        match subscribed {
            Ok(packet_id) => self.subscription = Some(packet_id),
            Err(e) => self.fault(Failure::Transport(e), now_ms, status),
        }
    }

    fn service<D: CommandDispatcher, S: StatusSink>(
        &mut self,
        now_ms: u64,
        dispatcher: &mut D,
        status: &mut S,
    ) -> Result<(), Error> {
        let session = self.session.as_mut().ok_or(Error::NotOpen)?;
        session.poll()?;
        while let Some(event) = session.next_event(now_ms)? {
            match event {
                Event::Message(message) => {
                    if message.topic != self.topics.subscribe {
                        debug!("message on unexpected topic {=str}", message.topic.as_str());
                        continue;
                    }
                    match codec::decode_command(&message.payload) {
                        Ok(command) => dispatcher.dispatch(command),
                        Err(e) => {
                            warn!("rejected command: {}", e);
                            status.report(StatusEvent::CommandRejected(e));
                        }
                    }
                }
                Event::Discarded { topic, len } => {
                    if topic == self.topics.subscribe {
                        warn!("dropped {=usize} byte command", len);
                        status.report(StatusEvent::CommandRejected(DecodeError::TooLarge));
                    }
                }
                Event::Subscribed { packet_id, granted } => {
                    if self.subscription != Some(packet_id) {
                        continue;
                    }
                    match granted {
                        Some(qos) => info!("command subscription granted at {}", qos),
                        None => {
                            warn!("command subscription refused");
                            status.report(StatusEvent::SubscriptionRejected);
                        }
                    }
                }
                Event::Connected { .. } | Event::Refused(_) => return Err(Error::ProtocolError),
                Event::Acknowledged { .. } | Event::Pong => {}
            }
        }
        session.service_keepalive(now_ms)
    }

    fn link_failed<S: StatusSink>(&mut self, now_ms: u64, status: &mut S) {
        self.retry.record_failure();
        self.retry_at_ms = now_ms.saturating_add(u64::from(self.retry.delay_ms()));
        self.last_failure = Some(Failure::Link);
        status.report(StatusEvent::Fault(Failure::Link));
        self.transition(ConnectionState::Disconnected, now_ms, status);
    }

    fn fault<S: StatusSink>(&mut self, failure: Failure, now_ms: u64, status: &mut S) {
        if let Some(session) = self.session.take() {
            session.abort();
        }
        self.subscription = None;
        self.retry.record_failure();
        self.retry_at_ms = now_ms.saturating_add(u64::from(self.retry.delay_ms()));
        self.last_failure = Some(failure);
        warn!(
            "{} failed: {}, retry {=u32} in {=u32} ms",
            self.state,
            failure,
            self.retry.attempts(),
            self.retry.delay_ms()
        );
        status.report(StatusEvent::Fault(failure));

        if let Failure::Handshake(cause) = failure {
            if cause.is_credential_related() {
                self.credential_failures = self.credential_failures.saturating_add(1);
                if !self.escalated
                    && self.credential_failures >= u32::from(self.config.escalate_after)
                {
                    self.escalated = true;
                    error!(
                        "{=u32} consecutive credential failures, check device identity",
                        self.credential_failures
                    );
                    status.report(StatusEvent::Escalated {
                        failures: self.credential_failures,
                    });
                }
            }
        }

        self.transition(ConnectionState::Faulted, now_ms, status);
    }

    fn transition<S: StatusSink>(&mut self, to: ConnectionState, now_ms: u64, status: &mut S) {
        let from = self.state;
        if from == to {
            return;
        }
        info!("{} -> {}", from, to);
        self.state = to;
        self.entered_at_ms = now_ms;
        status.report(StatusEvent::StateChanged { from, to });
    }
}
