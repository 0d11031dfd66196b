//! EtherNet/IP session.
//!
//! A [`Session`] owns one byte stream to a target. A background task reads
//! frames off the stream and completes the request waiting for each reply;
//! writes go through an async mutex. Every request carries a fresh ticket in
//! the encapsulation sender context, which the target echoes in its reply,
//! so any number of requests may be in flight at once.
//!
//! ```text
//! Disconnected -> TcpConnecting -> SessionRegistering -> Established
//!       ^                                                     |
//!       +------------------ unregister / close ---------------+
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::cip::message_router::{self, MessageRouterReply};
use crate::cip::unconnected_send::UNCONNECTED_SEND;
use crate::encapsulation::{self, header, Command, EncapsulatedFrame, ItemId, EIP_PORT};
use crate::error::{EnipError, Result};
use crate::transport::{self, AsyncStream};

/// Default wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// General status of a Multiple Service Packet whose sub-services failed.
pub const EMBEDDED_SERVICE_ERROR: u8 = 0x1E;

const EVENT_CAPACITY: usize = 32;
const READ_CHUNK: usize = 4096;

/// Session timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Wait for the RegisterSession reply.
    pub register_timeout: Duration,
    /// Default wait for any other reply.
    pub request_timeout: Duration,
    /// Timeout field of SendRRData requests, in seconds.
    pub rr_data_timeout_s: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: transport::DEFAULT_CONNECT_TIMEOUT,
            register_timeout: DEFAULT_REQUEST_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            rr_data_timeout_s: 10,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with 10 second timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the registration timeout.
    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    /// Sets the default reply timeout.
    ///
    /// # Example
    ///
    /// ```
    /// use enip_cip::session::SessionConfig;
    /// use std::time::Duration;
    ///
    /// let config = SessionConfig::new().with_request_timeout(Duration::from_secs(2));
    /// assert_eq!(config.request_timeout, Duration::from_secs(2));
    /// ```
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport.
    Disconnected,
    /// TCP connect in progress.
    TcpConnecting,
    /// RegisterSession sent, no reply yet.
    SessionRegistering,
    /// Session handle assigned.
    Established,
}

/// Operation a pending request performs, used to label timeouts and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correlation {
    /// RegisterSession reply.
    RegisterSession,
    /// ListIdentity reply.
    ListIdentity,
    /// ListServices reply.
    ListServices,
    /// CIP reply to the given request service.
    Service(u8),
}

impl std::fmt::Display for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Correlation::RegisterSession => f.write_str("RegisterSession"),
            Correlation::ListIdentity => f.write_str("ListIdentity"),
            Correlation::ListServices => f.write_str("ListServices"),
            Correlation::Service(code) => write!(
                f,
                "{} (0x{code:02X})",
                message_router::services::name(*code)
            ),
        }
    }
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The target assigned a session handle.
    Registered {
        /// Assigned handle.
        session_handle: u32,
    },
    /// The target rejected RegisterSession.
    RegistrationFailed {
        /// Encapsulation status.
        status: u32,
    },
    /// The target unregistered the session.
    Unregistered,
    /// A frame with a command the session does not handle arrived.
    Unhandled {
        /// Raw command code.
        command_code: u16,
    },
    /// The transport closed.
    Closed,
}

/// Class 3 connection opened by Forward Open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection id for requests (chosen by the target).
    pub o_t_connection_id: u32,
    /// Connection id for replies.
    pub t_o_connection_id: u32,
    /// Connection serial number.
    pub connection_serial: u16,
}

/// Sub-replies of a Multiple Service Packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReply {
    /// One reply per embedded request, in request order.
    pub replies: Vec<MessageRouterReply>,
}

impl BatchReply {
    /// Error of the first failed sub-reply.
    pub fn first_error(&self) -> Option<EnipError> {
        self.replies
            .iter()
            .find(|r| !r.is_success())
            .map(MessageRouterReply::to_error)
    }

    /// Splits a Multiple Service Packet reply.
    ///
    /// A failing outer status other than [`EMBEDDED_SERVICE_ERROR`] is
    /// returned as the error.
    pub fn from_reply(outer: &MessageRouterReply) -> Result<Self> {
        if !outer.is_success() && outer.general_status != EMBEDDED_SERVICE_ERROR {
            return Err(outer.to_error());
        }
        Ok(Self {
            replies: message_router::parse_multiple_service_reply(&outer.data)?,
        })
    }
}

type Delivery = Result<Vec<u8>>;

struct Waiter {
    operation: Correlation,
    tx: oneshot::Sender<Delivery>,
}

struct Inner {
    state: SessionState,
    session_handle: u32,
    last_error: Option<u32>,
    connection: Option<ConnectionInfo>,
    sequence: u16,
    attached: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    pending: Mutex<HashMap<u64, Waiter>>,
    next_ticket: Mutex<u64>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Waiter>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: SessionState) {
        let mut inner = self.inner();
        if inner.state != state {
            debug!(from = ?inner.state, to = ?state, "session state");
            inner.state = state;
        }
    }

    fn register(self: &Arc<Self>, operation: Correlation) -> PendingReply {
        let ticket = {
            let mut next = self.next_ticket.lock().unwrap_or_else(|e| e.into_inner());
            *next = next.wrapping_add(1).max(1);
            *next
        };
        let (tx, rx) = oneshot::channel();
        self.pending().insert(ticket, Waiter { operation, tx });
        PendingReply {
            shared: self.clone(),
            operation,
            ticket,
            rx: Some(rx),
        }
    }

    /// Completes the request whose ticket the target echoed.
    ///
    /// A zero context comes from a target that does not echo it; the reply
    /// then goes to the request in flight if there is exactly one.
    fn fulfil(&self, context: u64, delivery: Delivery) {
        let mut pending = self.pending();
        let ticket = match context {
            0 if pending.len() == 1 => pending.keys().next().copied(),
            0 => None,
            ticket => Some(ticket),
        };
        match ticket.and_then(|t| pending.remove(&t)) {
            Some(waiter) => {
                trace!(operation = %waiter.operation, context, "reply delivered");
                let _ = waiter.tx.send(delivery);
            }
            None => warn!(context, outstanding = pending.len(), "reply without a waiting request"),
        }
    }

    fn dispatch(&self, bytes: &[u8]) {
        let frame = match header::parse(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                return;
            }
        };
        trace!(command = frame.command_code, len = frame.length, "frame received");

        match frame.command() {
            Some(Command::RegisterSession) => self.on_register(&frame),
            Some(Command::UnregisterSession) => {
                {
                    let mut inner = self.inner();
                    inner.state = SessionState::Disconnected;
                    inner.session_handle = 0;
                    inner.connection = None;
                }
                info!("session unregistered");
                self.emit(SessionEvent::Unregistered);
            }
            Some(Command::SendRRData) | Some(Command::SendUnitData) => self.on_data(&frame),
            Some(Command::ListIdentity) | Some(Command::ListServices) => self.fulfil(
                frame.context(),
                frame.check_status().map(|()| frame.payload.clone()),
            ),
            _ => {
                debug!(command = frame.command_code, "unhandled encapsulation command");
                self.emit(SessionEvent::Unhandled {
                    command_code: frame.command_code,
                });
            }
        }
    }

    fn on_register(&self, frame: &EncapsulatedFrame) {
        if frame.is_success() {
            {
                let mut inner = self.inner();
                inner.session_handle = frame.session_handle;
                inner.state = SessionState::Established;
                inner.last_error = None;
            }
            info!(session_handle = frame.session_handle, "session registered");
            self.emit(SessionEvent::Registered {
                session_handle: frame.session_handle,
            });
            self.fulfil(frame.context(), Ok(Vec::new()));
        } else {
            {
                let mut inner = self.inner();
                inner.last_error = Some(frame.status);
                inner.state = SessionState::Disconnected;
            }
            warn!(status = frame.status, message = %frame.status_message(), "session registration failed");
            self.emit(SessionEvent::RegistrationFailed {
                status: frame.status,
            });
            self.fulfil(
                frame.context(),
                Err(EnipError::encapsulation(frame.status)),
            );
        }
    }

    fn on_data(&self, frame: &EncapsulatedFrame) {
        let connected = frame.command() == Some(Command::SendUnitData);
        if let Err(err) = frame.check_status() {
            self.fulfil(frame.context(), Err(err));
            return;
        }
        let message = encapsulation::parse_data_payload(&frame.payload).and_then(|items| {
            let (id, skip) = if connected {
                (ItemId::ConnectedTransportPacket, 2)
            } else {
                (ItemId::Ucmm, 0)
            };
            encapsulation::cpf::find(&items, id)
                .and_then(|data| data.get(skip..))
                .map(<[u8]>::to_vec)
                .ok_or_else(|| EnipError::framing(format!("reply carries no {id:?} item")))
        });
        let message = message.and_then(|data| {
            if data.is_empty() {
                Err(EnipError::framing("empty CIP reply"))
            } else {
                Ok(data)
            }
        });
        if let Err(err) = &message {
            warn!(error = %err, "undecodable data reply");
        }
        self.fulfil(frame.context(), message);
    }

    fn close(&self) {
        let was_attached = {
            let mut inner = self.inner();
            let was = inner.attached;
            inner.attached = false;
            inner.state = SessionState::Disconnected;
            inner.session_handle = 0;
            inner.connection = None;
            was
        };
        for (ticket, waiter) in self.pending().drain() {
            debug!(operation = %waiter.operation, ticket, "failing request on close");
            let _ = waiter.tx.send(Err(EnipError::SessionClosed));
        }
        if was_attached {
            info!("session closed");
            self.emit(SessionEvent::Closed);
        }
    }
}

/// Waiting slot in the correlation registry; removes itself when dropped.
struct PendingReply {
    shared: Arc<Shared>,
    operation: Correlation,
    ticket: u64,
    rx: Option<oneshot::Receiver<Delivery>>,
}

impl PendingReply {
    async fn wait(mut self, timeout: Duration) -> Result<Vec<u8>> {
        let rx = self.rx.take().ok_or(EnipError::SessionClosed)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(delivery)) => delivery,
            Ok(Err(_)) => Err(EnipError::SessionClosed),
            Err(_) => {
                warn!(operation = %self.operation, ticket = self.ticket, ?timeout, "reply timed out");
                Err(EnipError::timeout(self.operation.to_string()))
            }
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.ticket);
    }
}

/// Service a request performs.
///
/// For an Unconnected Send to the Connection Manager this is the embedded
/// request.
fn expected_service(data: &[u8], connected: bool) -> Result<u8> {
    let service = *data
        .first()
        .ok_or_else(|| EnipError::invalid_parameter("data", "CIP request is empty"))?;
    if connected || service != UNCONNECTED_SEND || data.get(2..6) != Some(&[0x20, 0x06, 0x24, 0x01]) {
        return Ok(service);
    }
    let words = usize::from(data.get(1).copied().unwrap_or(0));
    Ok(data.get(2 + words * 2 + 4).copied().unwrap_or(service))
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        loop {
            match header::frame_length(&buf) {
                Some(len) if buf.len() >= len => {
                    let frame: Vec<u8> = buf.drain(..len).collect();
                    shared.dispatch(&frame);
                }
                _ => break,
            }
        }
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) => {
                warn!(error = %err, "transport read failed");
                break;
            }
        }
    }
    shared.close();
}

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// EtherNet/IP session on one byte stream.
pub struct Session {
    config: SessionConfig,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<Writer>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("session_handle", &self.session_handle())
            .field("connection", &self.connection())
            .finish()
    }
}

impl Session {
    /// Creates a disconnected session.
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: SessionState::Disconnected,
                    session_handle: 0,
                    last_error: None,
                    connection: None,
                    sequence: 0,
                    attached: false,
                }),
                pending: Mutex::new(HashMap::new()),
                next_ticket: Mutex::new(0),
                events,
            }),
            writer: tokio::sync::Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    /// Attaches `stream` and registers a session on it.
    ///
    /// # Errors
    ///
    /// See [`Session::register`].
    pub async fn from_stream<S: AsyncStream>(stream: S, config: SessionConfig) -> Result<Self> {
        let session = Self::new(config);
        session.attach(stream).await;
        session.register().await?;
        Ok(session)
    }

    /// Connects to `host:port` over TCP and registers a session.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::Timeout` when the connect or the registration
    /// deadline passes and `EnipError::Encapsulation` when the target refuses
    /// the registration.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        self.shared.set_state(SessionState::TcpConnecting);
        let stream = match transport::connect_tcp(host, port, self.config.connect_timeout).await {
            Ok(stream) => stream,
            Err(err) => {
                self.shared.set_state(SessionState::Disconnected);
                return Err(err);
            }
        };
        self.attach(stream).await;
        self.register().await
    }

    /// Connects to `host` on the default port.
    pub async fn connect_default(&self, host: &str) -> Result<()> {
        self.connect(host, EIP_PORT).await
    }

    /// Takes ownership of `stream` and starts reading from it.
    ///
    /// A previously attached stream is dropped.
    pub async fn attach<S: AsyncStream>(&self, stream: S) {
        let (read_half, write_half) = tokio::io::split(stream);
        if let Some(old) = self.reader_handle().take() {
            old.abort();
        }
        *self.writer.lock().await = Some(Box::new(write_half));
        self.shared.inner().attached = true;
        let handle = tokio::spawn(read_loop(read_half, self.shared.clone()));
        *self.reader_handle() = Some(handle);
    }

    fn reader_handle(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sends RegisterSession and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::Encapsulation` with the target's status when the
    /// registration is refused, `EnipError::Timeout` when no reply arrives.
    pub async fn register(&self) -> Result<()> {
        self.shared.set_state(SessionState::SessionRegistering);
        let outcome = async {
            let mut frame = encapsulation::register_session()?;
            let pending = self.shared.register(Correlation::RegisterSession);
            header::set_sender_context(&mut frame, pending.ticket)?;
            self.send(&frame).await?;
            pending.wait(self.config.register_timeout).await
        }
        .await;
        if outcome.is_err() && self.state() == SessionState::SessionRegistering {
            self.shared.set_state(SessionState::Disconnected);
        }
        outcome.map(|_| ())
    }

    async fn send(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| EnipError::not_connected("no transport attached"))?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.inner().state
    }

    /// Returns whether a session handle is assigned.
    pub fn is_established(&self) -> bool {
        self.state() == SessionState::Established
    }

    /// Session handle, 0 when not registered.
    pub fn session_handle(&self) -> u32 {
        self.shared.inner().session_handle
    }

    /// Encapsulation status of the last failed registration.
    pub fn last_error(&self) -> Option<u32> {
        self.shared.inner().last_error
    }

    /// Class 3 connection, if one is open.
    pub fn connection(&self) -> Option<ConnectionInfo> {
        self.shared.inner().connection
    }

    /// Records the Class 3 connection used by connected requests.
    pub fn set_connection(&self, connection: Option<ConnectionInfo>) {
        let mut inner = self.shared.inner();
        inner.connection = connection;
        inner.sequence = 0;
    }

    /// Subscribes to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Default reply timeout.
    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    async fn exchange(
        &self,
        data: &[u8],
        connected: bool,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let mut frame = {
            let mut inner = self.shared.inner();
            if inner.state != SessionState::Established {
                return Err(EnipError::not_connected("session is not registered"));
            }
            if connected {
                let connection = inner
                    .connection
                    .ok_or_else(|| EnipError::not_connected("no Class 3 connection is open"))?;
                inner.sequence = inner.sequence.wrapping_add(1);
                encapsulation::send_unit_data(
                    inner.session_handle,
                    data,
                    connection.o_t_connection_id,
                    inner.sequence,
                )?
            } else {
                encapsulation::send_rr_data(inner.session_handle, data, self.config.rr_data_timeout_s)?
            }
        };

        let operation = Correlation::Service(expected_service(data, connected)?);
        let pending = self.shared.register(operation);
        header::set_sender_context(&mut frame, pending.ticket)?;
        trace!(%operation, ticket = pending.ticket, connected, len = data.len(), "sending CIP request");
        self.send(&frame).await?;
        pending
            .wait(timeout.unwrap_or(self.config.request_timeout))
            .await
    }

    /// Sends a CIP request and returns the Message Router reply.
    ///
    /// The reply status is not checked.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::NotConnected` when the session is not registered
    /// or `connected` is set without a Class 3 connection, and
    /// `EnipError::Timeout` when no reply arrives in time.
    pub async fn write_cip(
        &self,
        data: &[u8],
        connected: bool,
        timeout: Option<Duration>,
    ) -> Result<MessageRouterReply> {
        let bytes = self.exchange(data, connected, timeout).await?;
        message_router::parse(&bytes)
    }

    /// Sends a Multiple Service Packet request and splits the reply.
    ///
    /// # Errors
    ///
    /// As [`Session::write_cip`], plus the outer status of the reply when it
    /// is not [`EMBEDDED_SERVICE_ERROR`].
    pub async fn write_multiple(
        &self,
        data: &[u8],
        connected: bool,
        timeout: Option<Duration>,
    ) -> Result<BatchReply> {
        let outer = self.write_cip(data, connected, timeout).await?;
        BatchReply::from_reply(&outer)
    }

    async fn list(&self, operation: Correlation, mut request: Vec<u8>) -> Result<Vec<u8>> {
        let pending = self.shared.register(operation);
        header::set_sender_context(&mut request, pending.ticket)?;
        self.send(&request).await?;
        pending.wait(self.config.request_timeout).await
    }

    /// Sends ListIdentity and returns the reply payload.
    pub async fn list_identity(&self) -> Result<Vec<u8>> {
        self.list(Correlation::ListIdentity, encapsulation::list_identity()?)
            .await
    }

    /// Sends ListServices and returns the reply payload.
    pub async fn list_services(&self) -> Result<Vec<u8>> {
        self.list(Correlation::ListServices, encapsulation::list_services()?)
            .await
    }

    /// Unregisters the session and closes the transport.
    pub async fn disconnect(&self) -> Result<()> {
        let handle = self.session_handle();
        if self.is_established() {
            let sent = match encapsulation::unregister_session(handle) {
                Ok(frame) => self.send(&frame).await,
                Err(err) => Err(err),
            };
            if let Err(err) = sent {
                debug!(error = %err, "unregister failed");
            }
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(reader) = self.reader_handle().take() {
            reader.abort();
        }
        self.shared.close();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader_handle().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip::epath;
    use crate::cip::message_router::services;
    use crate::cip::unconnected_send;

    fn reply(service: u8, status: u8, data: Vec<u8>) -> MessageRouterReply {
        MessageRouterReply {
            service: service | message_router::REPLY_MASK,
            general_status: status,
            extended_status: Vec::new(),
            data,
        }
    }

    #[test]
    fn test_expected_service_unwraps_unconnected_send() {
        let read = [services::READ_TAG, 0x02, 0x91, 0x01, b'a', 0x00, 0x01, 0x00];
        assert_eq!(expected_service(&read, false).unwrap(), services::READ_TAG);

        let route = epath::port(1, &0u8.into()).unwrap();
        let wrapped = unconnected_send::build(&read, &route, 2000).unwrap();
        assert_eq!(wrapped[0], UNCONNECTED_SEND);
        assert_eq!(expected_service(&wrapped, false).unwrap(), services::READ_TAG);
        assert_eq!(expected_service(&wrapped, true).unwrap(), UNCONNECTED_SEND);

        let fragmented = [services::READ_TAG_FRAGMENTED, 0x02, 0x91, 0x01, b'a', 0x00];
        assert_eq!(
            expected_service(&fragmented, false).unwrap(),
            services::READ_TAG_FRAGMENTED
        );
        assert!(expected_service(&[], false).is_err());
    }

    #[test]
    fn test_batch_reply_reports_first_sub_error() {
        let body = message_router::build_multiple_service_packet(&[
            vec![0xCC, 0x00, 0x00, 0x00, 0xC4, 0x00, 1, 0, 0, 0],
            vec![0xCC, 0x00, 0x04, 0x00],
        ]);
        let outer = reply(services::MULTIPLE_SERVICE_PACKET, EMBEDDED_SERVICE_ERROR, body);
        let batch = BatchReply::from_reply(&outer).unwrap();
        assert_eq!(batch.replies.len(), 2);
        assert!(batch.replies[0].is_success());
        assert_eq!(batch.first_error().and_then(|e| e.cip_status()), Some(0x04));
    }

    #[test]
    fn test_batch_reply_outer_error_propagates() {
        let outer = reply(services::MULTIPLE_SERVICE_PACKET, 0x08, Vec::new());
        let err = BatchReply::from_reply(&outer).unwrap_err();
        assert_eq!(err.cip_status(), Some(0x08));
    }

    #[tokio::test]
    async fn test_each_request_gets_its_own_ticket() {
        let session = Session::new(SessionConfig::default());
        let first = session.shared.register(Correlation::Service(0x4C));
        let second = session.shared.register(Correlation::Service(0x4C));
        assert_ne!(first.ticket, second.ticket);
        assert_eq!(session.shared.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_wait_frees_its_ticket() {
        let session = Session::new(SessionConfig::default());
        let kept = session.shared.register(Correlation::ListIdentity);
        drop(session.shared.register(Correlation::ListIdentity));
        let pending = session.shared.pending();
        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&kept.ticket));
    }

    #[tokio::test]
    async fn test_write_requires_registration() {
        let session = Session::new(SessionConfig::default());
        let err = session.write_cip(&[0x4C, 0x00], false, None).await.unwrap_err();
        assert!(matches!(err, EnipError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_reply_goes_to_echoed_ticket() {
        let session = Session::new(SessionConfig::default());
        let read = session.shared.register(Correlation::Service(0x4C));
        let write = session.shared.register(Correlation::Service(0x4D));

        session.shared.fulfil(write.ticket, Err(EnipError::cip(0x52, 0x01, Vec::new())));
        session.shared.fulfil(read.ticket, Ok(vec![0xCC, 0x00, 0x00, 0x00]));

        let timeout = Duration::from_millis(50);
        assert_eq!(write.wait(timeout).await.unwrap_err().cip_status(), Some(0x01));
        assert_eq!(read.wait(timeout).await.unwrap(), vec![0xCC, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_zero_context_needs_a_single_waiter() {
        let session = Session::new(SessionConfig::default());
        let only = session.shared.register(Correlation::ListIdentity);
        session.shared.fulfil(0, Ok(vec![1]));
        assert_eq!(only.wait(Duration::from_millis(50)).await.unwrap(), vec![1]);

        let a = session.shared.register(Correlation::Service(0x4C));
        let _b = session.shared.register(Correlation::Service(0x4C));
        session.shared.fulfil(0, Ok(vec![2]));
        assert!(matches!(
            a.wait(Duration::from_millis(20)).await,
            Err(EnipError::Timeout { .. })
        ));
    }
}
