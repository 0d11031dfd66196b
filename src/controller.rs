//! Logix controller client.
//!
//! [`Controller`] is the primary interface of the crate. It owns a
//! [`Session`], routes requests to the CPU in a backplane slot and
//! arbitrates between callers with one [`TaskQueue`] per purpose:
//!
//! - reads and writes of single tags run at priority 1
//! - group reads and writes share the group queue, the scan loop uses
//!   priority 10 there
//! - identity, wall clock, Forward Open/Close and discovery run on the
//!   command queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use enip_cip::{Controller, ControllerConfig, Tag};
//!
//! # #[tokio::main]
//! # async fn main() -> enip_cip::Result<()> {
//! let plc = Controller::new(ControllerConfig::new().with_slot(0));
//! plc.connect("192.168.1.10").await?;
//! println!("{}", plc.properties().identity.product_name);
//!
//! let tag = Arc::new(Tag::new("counter")?);
//! plc.read_tag(&tag, None).await?;
//! println!("counter = {:?}", tag.controller_value());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cip::connection_manager::{
    self, ForwardCloseParams, ForwardOpenParams, ForwardOpenReply, DEFAULT_ORIGINATOR_SERIAL,
    DEFAULT_VENDOR_ID,
};
use crate::cip::message_router::{self, services, MessageRouterReply};
use crate::cip::{unconnected_send, EPath};
use crate::codec::{Reader, WriteExt};
use crate::encapsulation::{self, header, Command, EIP_PORT};
use crate::error::{EnipError, Result};
use crate::identity::{ControllerProperties, DeviceIdentity, ServiceInfo, IDENTITY_CLASS};
use crate::queue::{TaskQueue, DEFAULT_CAPACITY};
use crate::session::{BatchReply, ConnectionInfo, Session, SessionConfig};
use crate::tag::{read_type_header_len, Tag};
use crate::tag_group::TagGroup;
use crate::template::{Template, TemplateDefinition, TemplateRegistry, TypeRef};
use crate::transport::{self, AsyncStream, MAX_PACKET_SIZE};
use crate::value::TagValue;

/// Priority of single-tag reads and writes.
pub const TAG_PRIORITY: u8 = 1;

/// Priority of the scan loop on the group queue.
pub const SCAN_PRIORITY: u8 = 10;

/// Default delay between scan cycles.
pub const DEFAULT_SCAN_RATE: Duration = Duration::from_millis(200);

/// Wall clock object class.
pub const WALL_CLOCK_CLASS: u32 = 0x8B;

const WALL_CLOCK_READ_ATTRIBUTE: u32 = 0x05;
const WALL_CLOCK_WRITE_ATTRIBUTE: u32 = 0x06;
const PARTIAL_TRANSFER: u8 = 0x06;
const BACKPLANE_PORT: u16 = 1;

/// Configuration for a [`Controller`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerConfig {
    /// TCP port of the EtherNet/IP module.
    pub port: u16,
    /// Backplane slot of the CPU.
    pub slot: u8,
    /// Wait for each reply.
    pub request_timeout: Duration,
    /// TCP connect and registration timeout.
    pub connect_timeout: Duration,
    /// Open a Class 3 connection after registering.
    pub connected_messaging: bool,
    /// Delay between scan cycles.
    pub scan_rate: Duration,
    /// Skip the write half of each scan cycle.
    pub scan_read_only: bool,
    /// Pending task limit of each queue.
    pub queue_capacity: usize,
    /// Timeout encoded in Unconnected Send and Forward Open requests, in ms.
    pub unconnected_send_timeout_ms: u32,
    /// Originator vendor id used by Forward Open.
    pub vendor_id: u16,
    /// Originator serial number used by Forward Open.
    pub originator_serial: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: EIP_PORT,
            slot: 0,
            request_timeout: Duration::from_secs(10),
            connect_timeout: transport::DEFAULT_CONNECT_TIMEOUT,
            connected_messaging: false,
            scan_rate: DEFAULT_SCAN_RATE,
            scan_read_only: false,
            queue_capacity: DEFAULT_CAPACITY,
            unconnected_send_timeout_ms: unconnected_send::DEFAULT_TIMEOUT_MS,
            vendor_id: DEFAULT_VENDOR_ID,
            originator_serial: DEFAULT_ORIGINATOR_SERIAL,
        }
    }
}

impl ControllerConfig {
    /// Creates a configuration for slot 0 on port 44818.
    ///
    /// # Example
    ///
    /// ```
    /// use enip_cip::ControllerConfig;
    /// use std::time::Duration;
    ///
    /// let config = ControllerConfig::new()
    ///     .with_slot(2)
    ///     .with_scan_rate(Duration::from_millis(50))
    ///     .with_connected_messaging(true);
    /// assert_eq!(config.slot, 2);
    /// assert_eq!(config.port, 44818);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TCP port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the CPU slot.
    pub fn with_slot(mut self, slot: u8) -> Self {
        self.slot = slot;
        self
    }

    /// Sets the reply timeout (default 10 seconds).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the connect timeout (default 10 seconds).
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables connected (Class 3) messaging.
    pub fn with_connected_messaging(mut self, enabled: bool) -> Self {
        self.connected_messaging = enabled;
        self
    }

    /// Sets the scan rate (default 200 ms).
    pub fn with_scan_rate(mut self, rate: Duration) -> Self {
        self.scan_rate = rate;
        self
    }

    /// Makes the scan loop read only.
    pub fn with_scan_read_only(mut self, read_only: bool) -> Self {
        self.scan_read_only = read_only;
        self
    }

    /// Sets the pending task limit of each queue.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the Unconnected Send timeout in milliseconds.
    pub fn with_unconnected_send_timeout(mut self, timeout_ms: u32) -> Self {
        self.unconnected_send_timeout_ms = timeout_ms;
        self
    }

    /// Sets the originator vendor id.
    pub fn with_vendor_id(mut self, vendor_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self
    }

    /// Sets the originator serial number.
    pub fn with_originator_serial(mut self, serial: u32) -> Self {
        self.originator_serial = serial;
        self
    }

    /// Session timeouts derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_connect_timeout(self.connect_timeout)
            .with_register_timeout(self.connect_timeout)
            .with_request_timeout(self.request_timeout)
    }
}

struct Queues {
    read: TaskQueue,
    write: TaskQueue,
    group: TaskQueue,
    command: TaskQueue,
}

struct Inner {
    config: ControllerConfig,
    session: Session,
    registry: RwLock<TemplateRegistry>,
    properties: Mutex<ControllerProperties>,
    subscriptions: Mutex<TagGroup>,
    queues: Queues,
    scanning: AtomicBool,
}

/// Client for one Logix controller.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.inner.config)
            .field("session", &self.inner.session)
            .finish()
    }
}

impl Controller {
    /// Creates a disconnected controller.
    pub fn new(config: ControllerConfig) -> Self {
        let capacity = config.queue_capacity;
        let properties = ControllerProperties {
            slot: config.slot,
            ..ControllerProperties::default()
        };
        Self {
            inner: Arc::new(Inner {
                session: Session::new(config.session_config()),
                registry: RwLock::new(TemplateRegistry::new()),
                properties: Mutex::new(properties),
                subscriptions: Mutex::new(TagGroup::new()),
                queues: Queues {
                    read: TaskQueue::new("read", capacity),
                    write: TaskQueue::new("write", capacity),
                    group: TaskQueue::new("group", capacity),
                    command: TaskQueue::new("command", capacity),
                },
                scanning: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Underlying session.
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Connects to `host`, reads the controller identity and, when
    /// configured, opens a Class 3 connection.
    ///
    /// # Errors
    ///
    /// Returns the first error of the connect, registration, identity read
    /// or Forward Open.
    pub async fn connect(&self, host: &str) -> Result<()> {
        self.inner
            .session
            .connect(host, self.inner.config.port)
            .await?;
        self.after_register().await
    }

    /// As [`Controller::connect`], over an already open byte stream.
    pub async fn connect_stream<S: AsyncStream>(&self, stream: S) -> Result<()> {
        self.inner.session.attach(stream).await;
        self.inner.session.register().await?;
        self.after_register().await
    }

    async fn after_register(&self) -> Result<()> {
        self.read_controller_props().await?;
        if self.inner.config.connected_messaging {
            self.forward_open().await?;
        }
        Ok(())
    }

    /// Unregisters the session and closes the transport.
    ///
    /// The scan loop is paused and an open Class 3 connection is closed
    /// first.
    pub async fn disconnect(&self) -> Result<()> {
        self.pause_scan();
        if self.inner.session.connection().is_some() {
            if let Err(err) = self.forward_close().await {
                warn!(error = %err, "forward close failed");
            }
        }
        self.inner.session.disconnect().await
    }

    /// Snapshot of the controller identity and state.
    pub fn properties(&self) -> ControllerProperties {
        self.inner.properties().clone()
    }

    /// Controller wall clock as of the last read.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        self.inner.properties().time
    }

    /// Lays out and registers a structure template.
    pub fn register_template(&self, definition: TemplateDefinition) -> Result<Arc<Template>> {
        self.inner.registry_mut().register(definition)
    }

    /// Registers templates that may reference each other.
    pub fn register_templates(
        &self,
        definitions: impl IntoIterator<Item = TemplateDefinition>,
    ) -> Result<()> {
        self.inner.registry_mut().register_all(definitions)
    }

    /// Registered template for a type.
    pub fn template(&self, type_ref: &TypeRef) -> Option<Arc<Template>> {
        self.inner.with_registry(|r| r.get(type_ref))
    }

    /// Reads the Identity object and updates [`Controller::properties`].
    pub async fn read_controller_props(&self) -> Result<ControllerProperties> {
        let inner = self.inner.clone();
        self.inner
            .queues
            .command
            .schedule(1, async move {
                let path = EPath::new().class(IDENTITY_CLASS).instance(0x01);
                let request =
                    message_router::build(services::GET_ATTRIBUTE_ALL, path.as_bytes(), &[]);
                let reply = inner.send(&request).await?;
                reply.check_status()?;
                let mut props = ControllerProperties::parse(&reply.data, inner.config.slot)?;
                {
                    let mut current = inner.properties();
                    props.time = current.time;
                    *current = props.clone();
                }
                info!(
                    name = %props.identity.product_name,
                    serial = format_args!("{:08X}", props.identity.serial_number),
                    version = %props.identity.version(),
                    faulted = props.faults.faulted,
                    "controller identity"
                );
                Ok(props)
            })?
            .await
    }

    /// Reads the controller wall clock.
    pub async fn read_wall_clock(&self) -> Result<DateTime<Utc>> {
        let inner = self.inner.clone();
        self.inner
            .queues
            .command
            .schedule(1, async move {
                let request = message_router::build(
                    services::GET_ATTRIBUTE_SINGLE,
                    wall_clock_path(WALL_CLOCK_READ_ATTRIBUTE).as_bytes(),
                    &[],
                );
                let reply = inner.send(&request).await?;
                reply.check_status()?;
                let time = decode_wall_clock(&reply.data)?;
                inner.properties().time = Some(time);
                Ok(time)
            })?
            .await
    }

    /// Sets the controller wall clock.
    pub async fn write_wall_clock(&self, time: DateTime<Utc>) -> Result<()> {
        let inner = self.inner.clone();
        self.inner
            .queues
            .command
            .schedule(1, async move {
                let request = message_router::build(
                    services::SET_ATTRIBUTE_SINGLE,
                    wall_clock_path(WALL_CLOCK_WRITE_ATTRIBUTE).as_bytes(),
                    &encode_wall_clock(&time),
                );
                inner.send(&request).await?.check_status()?;
                inner.properties().time = Some(time);
                Ok(())
            })?
            .await
    }

    /// Reads `tag`, with `size` elements when given.
    ///
    /// Replies too large for one packet are fetched with Read Tag Fragmented
    /// requests. Failures are also recorded on the tag.
    pub async fn read_tag(&self, tag: &Arc<Tag>, size: Option<u16>) -> Result<()> {
        let inner = self.inner.clone();
        let tag = tag.clone();
        self.inner
            .queues
            .read
            .schedule(TAG_PRIORITY, async move { inner.read_tag(&tag, size).await })?
            .await
    }

    /// Writes `value` (or the staged value) to `tag`.
    ///
    /// A tag whose type is unknown is read first. Payloads larger than
    /// [`MAX_UNFRAGMENTED_WRITE`](crate::tag::MAX_UNFRAGMENTED_WRITE) bytes are
    /// written in fragments.
    pub async fn write_tag(
        &self,
        tag: &Arc<Tag>,
        value: Option<TagValue>,
        size: Option<u16>,
    ) -> Result<()> {
        let inner = self.inner.clone();
        let tag = tag.clone();
        self.inner
            .queues
            .write
            .schedule(TAG_PRIORITY, async move {
                inner.write_tag(&tag, value, size).await
            })?
            .await
    }

    /// Reads every tag of `group`.
    pub async fn read_tag_group(&self, group: &TagGroup) -> Result<()> {
        self.group_task(TAG_PRIORITY, group.clone(), GroupOp::Read)
            .await
    }

    /// Writes every tag of `group` whose staged value changed.
    pub async fn write_tag_group(&self, group: &TagGroup) -> Result<()> {
        self.group_task(TAG_PRIORITY, group.clone(), GroupOp::Write)
            .await
    }

    async fn group_task(&self, priority: u8, group: TagGroup, op: GroupOp) -> Result<()> {
        let inner = self.inner.clone();
        self.inner
            .queues
            .group
            .schedule(priority, async move {
                match op {
                    GroupOp::Read => inner.read_group(&group).await,
                    GroupOp::Write => inner.write_group(&group).await,
                }
            })?
            .await
    }

    /// Adds `tag` to the scan list; returns `false` if already present.
    pub fn subscribe(&self, tag: Arc<Tag>) -> bool {
        self.inner.subscriptions().add(tag)
    }

    /// Removes a tag from the scan list.
    pub fn unsubscribe(&self, instance_id: &str) -> Option<Arc<Tag>> {
        self.inner.subscriptions().remove(instance_id)
    }

    /// Snapshot of the scan list.
    pub fn subscriptions(&self) -> TagGroup {
        self.inner.subscriptions().clone()
    }

    /// Runs the scan loop until [`Controller::pause_scan`] is called.
    ///
    /// Each cycle reads the scan list, writes its changed tags unless
    /// `scan_read_only` is set, then sleeps for `scan_rate`. Tag errors are
    /// logged and the loop continues.
    ///
    /// # Errors
    ///
    /// Returns when the session is lost.
    pub async fn scan(&self) -> Result<()> {
        self.inner.scanning.store(true, Ordering::SeqCst);
        info!(rate = ?self.inner.config.scan_rate, "scan started");
        while self.inner.scanning.load(Ordering::SeqCst) {
            let group = self.subscriptions();
            if !group.is_empty() {
                let mut outcome = self
                    .group_task(SCAN_PRIORITY, group.clone(), GroupOp::Read)
                    .await;
                if outcome.is_ok() && !self.inner.config.scan_read_only {
                    outcome = self.group_task(SCAN_PRIORITY, group, GroupOp::Write).await;
                }
                match outcome {
                    Err(err @ (EnipError::SessionClosed | EnipError::NotConnected { .. })) => {
                        self.inner.scanning.store(false, Ordering::SeqCst);
                        warn!(error = %err, "scan stopped");
                        return Err(err);
                    }
                    Err(err) => warn!(error = %err, "scan cycle failed"),
                    Ok(()) => {}
                }
            }
            tokio::time::sleep(self.inner.config.scan_rate).await;
        }
        info!("scan paused");
        Ok(())
    }

    /// Stops the scan loop at the start of its next cycle.
    pub fn pause_scan(&self) {
        self.inner.scanning.store(false, Ordering::SeqCst);
    }

    /// Returns whether the scan loop is running.
    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Opens a Class 3 connection to the CPU; later requests use it.
    pub async fn forward_open(&self) -> Result<ConnectionInfo> {
        let inner = self.inner.clone();
        self.inner
            .queues
            .command
            .schedule(1, async move {
                let params = ForwardOpenParams {
                    timeout_ms: inner.config.unconnected_send_timeout_ms,
                    vendor_id: inner.config.vendor_id,
                    originator_serial: inner.config.originator_serial,
                    ..ForwardOpenParams::default()
                };
                let request =
                    connection_manager::forward_open_request(&params, &inner.connection_path()?)?;
                let reply = inner.session.write_cip(&request, false, None).await?;
                reply.check_status()?;
                let opened = ForwardOpenReply::parse(&reply.data)?;
                let connection = ConnectionInfo {
                    o_t_connection_id: opened.o_t_connection_id,
                    t_o_connection_id: opened.t_o_connection_id,
                    connection_serial: opened.connection_serial,
                };
                inner.session.set_connection(Some(connection));
                info!(
                    o_t = format_args!("{:08X}", connection.o_t_connection_id),
                    t_o = format_args!("{:08X}", connection.t_o_connection_id),
                    "class 3 connection open"
                );
                Ok(connection)
            })?
            .await
    }

    /// Closes the Class 3 connection.
    pub async fn forward_close(&self) -> Result<()> {
        let inner = self.inner.clone();
        self.inner
            .queues
            .command
            .schedule(1, async move {
                let params = ForwardCloseParams {
                    timeout_ms: inner.config.unconnected_send_timeout_ms,
                    vendor_id: inner.config.vendor_id,
                    originator_serial: inner.config.originator_serial,
                };
                let request =
                    connection_manager::forward_close_request(&params, &inner.connection_path()?)?;
                let reply = inner.session.write_cip(&request, false, None).await;
                inner.session.set_connection(None);
                reply?.check_status()?;
                info!("class 3 connection closed");
                Ok(())
            })?
            .await
    }

    /// Asks `host` for its identity over a separate TCP connection.
    pub async fn list_identity(&self, host: &str) -> Result<DeviceIdentity> {
        let payload = self.list_command(host, Command::ListIdentity).await?;
        DeviceIdentity::parse(&payload)
    }

    /// Asks `host` for its services over a separate TCP connection.
    pub async fn list_services(&self, host: &str) -> Result<ServiceInfo> {
        let payload = self.list_command(host, Command::ListServices).await?;
        ServiceInfo::parse(&payload)
    }

    async fn list_command(&self, host: &str, command: Command) -> Result<Vec<u8>> {
        let config = self.inner.config.clone();
        let host = host.to_string();
        self.inner
            .queues
            .command
            .schedule(1, async move {
                let stream =
                    transport::connect_tcp(&host, config.port, config.connect_timeout).await?;
                let session = Session::new(config.session_config());
                session.attach(stream).await;
                let payload = if command == Command::ListIdentity {
                    session.list_identity().await
                } else {
                    session.list_services().await
                };
                session.disconnect().await?;
                payload
            })?
            .await
    }

    /// Broadcasts ListIdentity and collects the devices answering within
    /// `timeout`.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<DeviceIdentity>> {
        let port = self.inner.config.port;
        self.inner
            .queues
            .command
            .schedule(1, async move { discover(port, timeout).await })?
            .await
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupOp {
    Read,
    Write,
}

impl Inner {
    fn properties(&self) -> MutexGuard<'_, ControllerProperties> {
        self.properties.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscriptions(&self) -> MutexGuard<'_, TagGroup> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_registry<R>(&self, f: impl FnOnce(&TemplateRegistry) -> R) -> R {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        f(&registry)
    }

    fn registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, TemplateRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    fn route(&self) -> Result<EPath> {
        EPath::new().port(BACKPLANE_PORT, self.config.slot)
    }

    fn connection_path(&self) -> Result<Vec<u8>> {
        Ok(self.route()?.class(0x02).instance(0x01).into_bytes())
    }

    /// Sends a request over the Class 3 connection, or routed to the CPU
    /// slot in an Unconnected Send.
    async fn send(&self, request: &[u8]) -> Result<MessageRouterReply> {
        if self.session.connection().is_some() {
            return self.session.write_cip(request, true, None).await;
        }
        let wrapped = unconnected_send::build(
            request,
            self.route()?.as_bytes(),
            self.config.unconnected_send_timeout_ms,
        )?;
        self.session.write_cip(&wrapped, false, None).await
    }

    async fn send_multiple(&self, request: &[u8]) -> Result<BatchReply> {
        BatchReply::from_reply(&self.send(request).await?)
    }

    async fn read_tag(&self, tag: &Tag, size: Option<u16>) -> Result<()> {
        let outcome = self.read_tag_unrecorded(tag, size).await;
        if let Err(err) = &outcome {
            tag.record_error(err);
        }
        outcome
    }

    async fn read_tag_unrecorded(&self, tag: &Tag, size: Option<u16>) -> Result<()> {
        let reply = self.send(&tag.generate_read_message_request(size)).await?;
        let data = if reply.general_status == PARTIAL_TRANSFER {
            self.read_remaining_fragments(tag, reply.data).await?
        } else {
            reply.check_status()?;
            reply.data
        };
        self.with_registry(|registry| tag.parse_read_message_response(&data, registry))
    }

    /// Completes a partial read; returns the type header followed by the
    /// whole value.
    async fn read_remaining_fragments(&self, tag: &Tag, first: Vec<u8>) -> Result<Vec<u8>> {
        let header_len = read_type_header_len(&first)?;
        let mut assembled = first;
        loop {
            let offset = (assembled.len() - header_len) as u32;
            debug!(tag = %tag.name(), offset, "reading next fragment");
            let reply = self
                .send(&tag.generate_read_fragmented_request(offset, None))
                .await?;
            if reply.general_status != PARTIAL_TRANSFER {
                reply.check_status()?;
            }
            let body = reply.data.get(header_len..).ok_or_else(|| {
                EnipError::framing("fragment shorter than its type header")
            })?;
            if body.is_empty() && reply.general_status == PARTIAL_TRANSFER {
                return Err(EnipError::framing("fragmented read made no progress"));
            }
            assembled.extend_from_slice(body);
            if reply.general_status != PARTIAL_TRANSFER {
                return Ok(assembled);
            }
        }
    }

    async fn write_tag(&self, tag: &Tag, value: Option<TagValue>, size: Option<u16>) -> Result<()> {
        let outcome = self.write_tag_unrecorded(tag, value, size).await;
        if let Err(err) = &outcome {
            tag.record_error(err);
        }
        outcome
    }

    async fn write_tag_unrecorded(
        &self,
        tag: &Tag,
        value: Option<TagValue>,
        size: Option<u16>,
    ) -> Result<()> {
        if let Some(value) = value {
            tag.set_value(value);
        }
        if tag.datatype().is_none() && tag.template().is_none() {
            let staged = tag.value();
            self.read_tag_unrecorded(tag, size).await?;
            if let Some(staged) = staged {
                tag.set_value(staged);
            }
        }
        let size = size.unwrap_or_else(|| tag.read_size());
        for request in tag.generate_write_requests(size)? {
            self.send(&request).await?.check_status()?;
        }
        tag.unstage_write_request();
        Ok(())
    }

    async fn read_group(&self, group: &TagGroup) -> Result<()> {
        let mut first_error = None;
        for request in group.generate_read_message_requests() {
            let outcome = match self.send_multiple(&request.data).await {
                Ok(batch) => self.with_registry(|registry| {
                    group.parse_read_message_responses(&batch.replies, &request.tag_ids, registry)
                }),
                Err(err) => Err(err),
            };
            if let Err(err) = outcome {
                if matches!(err, EnipError::SessionClosed | EnipError::NotConnected { .. }) {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn write_group(&self, group: &TagGroup) -> Result<()> {
        let mut first_error = None;
        for request in group.generate_write_message_requests()? {
            let batch = self.send_multiple(&request.data).await?;
            group.parse_write_message_requests(&batch.replies, &request.tag_ids);
            if let Some(err) = batch.first_error() {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn wall_clock_path(attribute: u32) -> EPath {
    EPath::new()
        .class(WALL_CLOCK_CLASS)
        .instance(0x01)
        .attribute(attribute)
}

/// Seven DINTs: year, month, day, hour, minute, second, microseconds.
fn decode_wall_clock(data: &[u8]) -> Result<DateTime<Utc>> {
    let mut r = Reader::new(data);
    let mut fields = [0u32; 7];
    for field in &mut fields {
        *field = u32::try_from(r.i32()?)
            .map_err(|_| EnipError::framing("negative wall clock field"))?;
    }
    let [year, month, day, hour, minute, second, micros] = fields;
    let year = i32::try_from(year).map_err(|_| EnipError::framing("wall clock year out of range"))?;
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micros))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| {
            EnipError::framing(format!(
                "invalid wall clock {year}-{month}-{day} {hour}:{minute}:{second}.{micros}"
            ))
        })
}

fn encode_wall_clock(time: &DateTime<Utc>) -> Vec<u8> {
    let fields = [
        time.year(),
        time.month() as i32,
        time.day() as i32,
        time.hour() as i32,
        time.minute() as i32,
        time.second() as i32,
        time.timestamp_subsec_micros().min(999_999) as i32,
    ];
    let mut out = Vec::with_capacity(28);
    for field in fields {
        out.put_i32_le(field);
    }
    out
}

async fn discover(port: u16, timeout: Duration) -> Result<Vec<DeviceIdentity>> {
    let socket = transport::broadcast_socket().await?;
    socket
        .send_to(&encapsulation::list_identity()?, transport::broadcast_addr(port))
        .await?;

    let deadline = Instant::now() + timeout;
    let mut devices: Vec<DeviceIdentity> = Vec::new();
    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => break,
        };
        let parsed = header::parse(&buf[..len]).and_then(|frame| {
            frame.check_status()?;
            DeviceIdentity::parse(&frame.payload)
        });
        match parsed {
            Ok(device) => {
                debug!(%from, name = %device.identity.product_name, "device answered");
                if !devices.iter().any(|d| d.socket_address == device.socket_address) {
                    devices.push(device);
                }
            }
            Err(err) => debug!(%from, error = %err, "ignoring discovery reply"),
        }
    }
    info!(count = devices.len(), "discovery finished");
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ControllerConfig::new();
        assert_eq!(config.port, 44818);
        assert_eq!(config.slot, 0);
        assert_eq!(config.scan_rate, Duration::from_millis(200));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(!config.connected_messaging);
        assert!(!config.scan_read_only);
    }

    #[test]
    fn test_config_builders() {
        let config = ControllerConfig::new()
            .with_port(2222)
            .with_slot(3)
            .with_queue_capacity(4)
            .with_vendor_id(0x1234)
            .with_originator_serial(99)
            .with_unconnected_send_timeout(5000);
        assert_eq!(config.port, 2222);
        assert_eq!(config.slot, 3);
        assert_eq!(config.queue_capacity, 4);
        assert_eq!(config.vendor_id, 0x1234);
        assert_eq!(config.originator_serial, 99);
        assert_eq!(config.unconnected_send_timeout_ms, 5000);
        assert_eq!(config.session_config().request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_wall_clock_codec() {
        let time = Utc.with_ymd_and_hms(2024, 2, 29, 13, 45, 7).unwrap()
            + chrono::Duration::microseconds(250);
        let bytes = encode_wall_clock(&time);
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[..8], &[0xE8, 0x07, 0, 0, 2, 0, 0, 0]);
        assert_eq!(decode_wall_clock(&bytes).unwrap(), time);
    }

    #[test]
    fn test_wall_clock_rejects_invalid_date() {
        let mut bytes = Vec::new();
        for field in [2023, 2, 30, 0, 0, 0, 0] {
            bytes.put_i32_le(field);
        }
        assert!(decode_wall_clock(&bytes).is_err());
        assert!(decode_wall_clock(&bytes[..12]).is_err());
    }

    #[test]
    fn test_route_follows_slot() {
        let plc = Controller::new(ControllerConfig::new().with_slot(4));
        assert_eq!(plc.inner.route().unwrap().as_bytes(), &[0x01, 0x04]);
        assert_eq!(
            plc.inner.connection_path().unwrap(),
            vec![0x01, 0x04, 0x20, 0x02, 0x24, 0x01]
        );
        assert_eq!(plc.properties().slot, 4);
    }

    #[tokio::test]
    async fn test_requests_fail_before_connect() {
        let plc = Controller::new(ControllerConfig::new());
        let tag = Arc::new(Tag::new("counter").unwrap());
        let err = plc.read_tag(&tag, None).await.unwrap_err();
        assert!(matches!(err, EnipError::NotConnected { .. }));
        assert!(tag.error().is_some());
    }

    #[test]
    fn test_subscriptions_are_idempotent() {
        let plc = Controller::new(ControllerConfig::new());
        let tag = Arc::new(Tag::new("counter").unwrap());
        assert!(plc.subscribe(tag.clone()));
        assert!(!plc.subscribe(tag.clone()));
        assert_eq!(plc.subscriptions().len(), 1);
        assert!(plc.unsubscribe(tag.instance_id()).is_some());
        assert!(plc.subscriptions().is_empty());
    }
}
