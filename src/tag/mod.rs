//! Controller tags.
//!
//! A [`Tag`] holds the compiled request path of a symbolic tag name, the
//! last value read from the controller and a locally staged value waiting to
//! be written. Subscribers receive a [`TagEvent`] whenever a read changes the
//! controller value.
//!
//! # Example
//!
//! ```
//! use enip_cip::cip::DataType;
//! use enip_cip::Tag;
//!
//! let tag = Tag::builder("Program:Main.counter")
//!     .datatype(DataType::DINT)
//!     .build()
//!     .unwrap();
//! assert_eq!(tag.name(), "Program:Main.counter");
//! assert_eq!(tag.instance_id().len(), 32);
//!
//! let request = tag.generate_read_message_request(None);
//! assert_eq!(request[0], 0x4C);
//! ```

mod name;

pub use name::{is_valid_tag_name, validate_tag_name, MAX_BIT_INDEX, MAX_SEGMENT_LEN};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::trace;

use crate::cip::message_router::{self, services};
use crate::cip::DataType;
use crate::codec::{Reader, WriteExt};
use crate::error::{EnipError, Result};
use crate::template::{Atomic, Template, TemplateRegistry};
use crate::utils::{get_bit, modify_masks};
use crate::value::TagValue;

/// Payload size above which writes are split into fragments.
pub const MAX_UNFRAGMENTED_WRITE: usize = 450;

/// Bytes per fragment of a fragmented write.
pub const WRITE_FRAGMENT_SIZE: usize = 448;

const EVENT_CAPACITY: usize = 16;

/// Notification emitted when a read updates a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum TagEvent {
    /// First value read from the controller.
    Initialized {
        /// Tag name.
        name: String,
        /// Value read.
        value: TagValue,
    },
    /// The controller value differs from the previous read.
    Changed {
        /// Tag name.
        name: String,
        /// New value.
        value: TagValue,
        /// Value before the change.
        previous: TagValue,
    },
    /// The value is unchanged but the keep-alive interval elapsed.
    KeepAlive {
        /// Tag name.
        name: String,
        /// Current value.
        value: TagValue,
    },
}

/// Last error reported for a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagError {
    /// CIP general status, when the controller rejected the request.
    pub status: Option<u8>,
    /// Error text.
    pub message: String,
}

#[derive(Debug)]
struct TagState {
    datatype: Option<DataType>,
    template: Option<Arc<Template>>,
    structure_handle: u16,
    value: Option<TagValue>,
    controller_value: Option<TagValue>,
    read_size: u16,
    write_staged: bool,
    timestamp: DateTime<Utc>,
    last_update: Instant,
    error: Option<TagError>,
}

/// Builder for [`Tag`].
#[derive(Debug, Clone)]
pub struct TagBuilder {
    name: String,
    program: Option<String>,
    datatype: Option<DataType>,
    template: Option<Arc<Template>>,
    keep_alive: Option<Duration>,
}

impl TagBuilder {
    /// Scopes the tag to a program.
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Declares the tag's type before the first read.
    pub fn datatype(mut self, datatype: DataType) -> Self {
        self.datatype = Some(datatype);
        self
    }

    /// Declares the tag's structure template.
    pub fn template(mut self, template: Arc<Template>) -> Self {
        self.datatype = Some(match template.atomic_kind() {
            Some(atomic) => atomic.data_type(),
            None => DataType::STRUCT,
        });
        self.template = Some(template);
        self
    }

    /// Emits [`TagEvent::KeepAlive`] when a read finds the value unchanged
    /// for at least `interval`.
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    /// Validates the name and compiles the request path.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::InvalidTagName` for a name (or program) outside
    /// the grammar, or a `BIT_STRING` tag with a bit suffix.
    pub fn build(self) -> Result<Tag> {
        validate_tag_name(&self.name)?;
        if let Some(program) = &self.program {
            let plain = !program.contains(|c| matches!(c, '.' | ':' | '['));
            if !plain || !is_valid_tag_name(program) {
                return Err(EnipError::invalid_tag_name(
                    program.clone(),
                    "program name must be a plain identifier",
                ));
            }
        }

        let bit_string = self.datatype == Some(DataType::BIT_STRING);
        let compiled = name::compile_path(&self.name, self.program.as_deref(), bit_string)?;
        let instance_id = name::instance_id(&compiled.path, compiled.bit_index);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Tag {
            name: self.name,
            program: self.program,
            path: compiled.path,
            bit_index: compiled.bit_index,
            instance_id,
            keep_alive: self.keep_alive,
            events,
            state: Mutex::new(TagState {
                datatype: self.datatype,
                template: self.template,
                structure_handle: 0,
                value: None,
                controller_value: None,
                read_size: 1,
                write_staged: false,
                timestamp: Utc::now(),
                last_update: Instant::now(),
                error: None,
            }),
        })
    }
}

/// A symbolic controller tag.
#[derive(Debug)]
pub struct Tag {
    name: String,
    program: Option<String>,
    path: Vec<u8>,
    bit_index: Option<u8>,
    instance_id: String,
    keep_alive: Option<Duration>,
    events: broadcast::Sender<TagEvent>,
    state: Mutex<TagState>,
}

impl Tag {
    /// Starts building a tag.
    pub fn builder(name: impl Into<String>) -> TagBuilder {
        TagBuilder {
            name: name.into(),
            program: None,
            datatype: None,
            template: None,
            keep_alive: None,
        }
    }

    /// Controller-scoped tag of unknown type.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::builder(name).build()
    }

    fn state(&self) -> MutexGuard<'_, TagState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tag name as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program scope, if any.
    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    /// Encoded request path.
    pub fn path(&self) -> &[u8] {
        &self.path
    }

    /// Bit addressed by the tag, if any.
    pub fn bit_index(&self) -> Option<u8> {
        self.bit_index
    }

    /// Stable identity derived from the path and bit index.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Type declared or learned from the last read.
    pub fn datatype(&self) -> Option<DataType> {
        self.state().datatype
    }

    /// Structure template declared or learned from the last read.
    pub fn template(&self) -> Option<Arc<Template>> {
        self.state().template.clone()
    }

    /// Structure handle the controller reported on the last read.
    pub fn structure_handle(&self) -> u16 {
        self.state().structure_handle
    }

    /// Local value: the last read, or a staged write.
    pub fn value(&self) -> Option<TagValue> {
        self.state().value.clone()
    }

    /// Value last read from the controller.
    pub fn controller_value(&self) -> Option<TagValue> {
        self.state().controller_value.clone()
    }

    /// Stages `value` for the next write.
    pub fn set_value(&self, value: impl Into<TagValue>) {
        let mut state = self.state();
        state.value = Some(value.into());
        state.write_staged = true;
    }

    /// Returns whether a staged write is waiting.
    pub fn is_write_staged(&self) -> bool {
        self.state().write_staged
    }

    /// Returns whether the staged value differs from the controller value.
    pub fn needs_write(&self) -> bool {
        let state = self.state();
        state.write_staged && state.value.is_some() && state.value != state.controller_value
    }

    /// Element count used by read and write requests.
    pub fn read_size(&self) -> u16 {
        self.state().read_size
    }

    /// Sets the element count used by read and write requests.
    pub fn set_read_size(&self, size: u16) {
        self.state().read_size = size.max(1);
    }

    /// Time of the last value change.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.state().timestamp
    }

    /// Last error recorded for this tag.
    pub fn error(&self) -> Option<TagError> {
        self.state().error.clone()
    }

    /// Subscribes to value notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<TagEvent> {
        self.events.subscribe()
    }

    pub(crate) fn record_error(&self, err: &EnipError) {
        self.state().error = Some(TagError {
            status: err.cip_status(),
            message: err.to_string(),
        });
    }

    /// Read Tag request. `size` also updates [`read_size`](Self::read_size).
    pub fn generate_read_message_request(&self, size: Option<u16>) -> Vec<u8> {
        if let Some(size) = size {
            self.set_read_size(size);
        }
        let mut data = Vec::with_capacity(2);
        data.put_u16_le(self.read_size());
        message_router::build(services::READ_TAG, &self.path, &data)
    }

    /// Read Tag Fragmented request starting at byte `offset`.
    pub fn generate_read_fragmented_request(&self, offset: u32, size: Option<u16>) -> Vec<u8> {
        if let Some(size) = size {
            self.set_read_size(size);
        }
        let mut data = Vec::with_capacity(6);
        data.put_u16_le(self.read_size());
        data.put_u32_le(offset);
        message_router::build(services::READ_TAG_FRAGMENTED, &self.path, &data)
    }

    /// Decodes a successful Read Tag reply and updates the controller value.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::Framing` for an unknown type code or short data,
    /// and `EnipError::UnresolvedType` for a structure whose handle is not
    /// registered.
    pub fn parse_read_message_response(
        &self,
        data: &[u8],
        registry: &TemplateRegistry,
    ) -> Result<()> {
        let value = self.decode_read_data(data, registry)?;
        self.set_controller_value(value);
        Ok(())
    }

    fn decode_read_data(&self, data: &[u8], registry: &TemplateRegistry) -> Result<TagValue> {
        let mut r = Reader::new(data);
        let code = r.u16()?;
        let datatype = DataType::from_code(code)
            .ok_or_else(|| EnipError::framing(format!("unknown type code 0x{code:04X}")))?;

        let template = if datatype == DataType::STRUCT {
            let handle = r.u16()?;
            let template = self
                .template()
                .filter(|t| t.atomic_kind().is_none())
                .or_else(|| registry.get_by_handle(handle))
                .ok_or_else(|| EnipError::UnresolvedType {
                    template: self.name.clone(),
                    reference: format!("structure handle 0x{handle:04X}"),
                })?;
            self.state().structure_handle = handle;
            template
        } else {
            let atomic = Atomic::from_data_type(datatype).ok_or_else(|| {
                EnipError::framing(format!("{datatype} cannot be read as a tag value"))
            })?;
            Arc::new(Template::atomic(atomic))
        };

        {
            let mut state = self.state();
            state.datatype = Some(datatype);
            if datatype == DataType::STRUCT {
                state.template = Some(template.clone());
            }
        }

        let body = r.rest();
        let count = usize::from(self.read_size());
        let element = template.size_bytes();
        if body.len() < element * count {
            return Err(EnipError::framing(format!(
                "{} reply holds {} bytes, expected {}",
                self.name,
                body.len(),
                element * count
            )));
        }

        let decode = |i: usize| -> Result<TagValue> {
            let start = i * element;
            match template.atomic_kind() {
                Some(Atomic::Bool) => Ok(TagValue::Bool(body[start] != 0)),
                _ => template.deserialize(&body[start..start + element], 0),
            }
        };

        let value = if count > 1 {
            TagValue::Array((0..count).map(decode).collect::<Result<Vec<_>>>()?)
        } else {
            decode(0)?
        };

        match self.bit_index {
            Some(bit) => {
                self.bit_host_width(datatype, bit)?;
                let raw = value.as_i64().ok_or_else(|| {
                    EnipError::framing(format!("{datatype} value cannot carry bit {bit}"))
                })?;
                Ok(TagValue::Bool(get_bit(raw as u32, bit)))
            }
            None => Ok(value),
        }
    }

    /// Byte width of `datatype` when `bit` lies inside it.
    fn bit_host_width(&self, datatype: DataType, bit: u8) -> Result<usize> {
        let width = datatype.bit_host_width().ok_or_else(|| {
            EnipError::invalid_parameter(
                self.name.clone(),
                format!("{datatype} does not support bit access"),
            )
        })?;
        if usize::from(bit) >= width * 8 {
            return Err(EnipError::invalid_parameter(
                self.name.clone(),
                format!("bit {bit} is outside the {}-bit {datatype}", width * 8),
            ));
        }
        Ok(width)
    }

    /// Stores a value read from the controller and notifies subscribers.
    ///
    /// A staged write keeps its local value.
    pub(crate) fn set_controller_value(&self, new: TagValue) {
        let now = Instant::now();
        let event = {
            let mut state = self.state();
            state.error = None;
            let previous = state.controller_value.clone();
            if previous.as_ref() != Some(&new) {
                state.controller_value = Some(new.clone());
                if !state.write_staged {
                    state.value = Some(new.clone());
                }
                state.timestamp = Utc::now();
                state.last_update = now;
                Some(match previous {
                    None => TagEvent::Initialized {
                        name: self.name.clone(),
                        value: new,
                    },
                    Some(previous) => TagEvent::Changed {
                        name: self.name.clone(),
                        value: new,
                        previous,
                    },
                })
            } else if self
                .keep_alive
                .is_some_and(|interval| now.duration_since(state.last_update) >= interval)
            {
                state.last_update = now;
                Some(TagEvent::KeepAlive {
                    name: self.name.clone(),
                    value: new,
                })
            } else {
                None
            }
        };

        if let Some(event) = event {
            trace!(tag = %self.name, ?event, "tag event");
            let _ = self.events.send(event);
        }
    }

    /// Accepts the staged value as written: the controller value becomes the
    /// local value and the write is no longer staged.
    pub fn unstage_write_request(&self) {
        let mut state = self.state();
        state.controller_value = state.value.clone();
        state.write_staged = false;
    }

    fn write_template(&self) -> Result<(DataType, Arc<Template>)> {
        let state = self.state();
        let datatype = state.datatype.ok_or_else(|| {
            EnipError::invalid_parameter(
                self.name.clone(),
                "type unknown; read the tag first or declare its datatype",
            )
        })?;
        let template = match (datatype, &state.template) {
            (DataType::STRUCT, Some(template)) => template.clone(),
            (DataType::STRUCT, None) => {
                return Err(EnipError::invalid_parameter(
                    self.name.clone(),
                    "structure template unknown; read the tag first",
                ))
            }
            (other, _) => {
                let atomic = Atomic::from_data_type(other).ok_or_else(|| {
                    EnipError::invalid_parameter(
                        self.name.clone(),
                        format!("{other} cannot be written"),
                    )
                })?;
                Arc::new(Template::atomic(atomic))
            }
        };
        Ok((datatype, template))
    }

    /// Type header of a write: the type code, plus the structure handle for
    /// structures.
    fn write_type_header(&self, datatype: DataType, template: &Template) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(4);
        out.put_u16_le(datatype.code());
        if datatype == DataType::STRUCT {
            let handle = match template.structure_handle() {
                0 => self.structure_handle(),
                handle => handle,
            };
            if handle == 0 {
                return Err(EnipError::invalid_parameter(
                    self.name.clone(),
                    "structure handle unknown; read the tag first",
                ));
            }
            out.put_u16_le(handle);
        }
        Ok(out)
    }

    fn encode_value(&self, template: &Template, value: &TagValue, count: usize) -> Result<Vec<u8>> {
        let encode_one = |v: &TagValue| template.serialize_to_vec(v);
        if count <= 1 {
            return encode_one(value);
        }
        let items = value.as_array().ok_or_else(|| {
            EnipError::invalid_parameter(
                self.name.clone(),
                format!("writing {count} elements requires an array value"),
            )
        })?;
        if items.len() != count {
            return Err(EnipError::invalid_parameter(
                self.name.clone(),
                format!("array holds {} elements, expected {count}", items.len()),
            ));
        }
        let mut out = Vec::with_capacity(count * template.size_bytes());
        for item in items {
            out.extend(encode_one(item)?);
        }
        Ok(out)
    }

    fn staged_value(&self, value: Option<TagValue>) -> Result<TagValue> {
        if let Some(value) = value {
            let mut state = self.state();
            state.value = Some(value);
            state.write_staged = true;
        }
        self.value().ok_or_else(|| {
            EnipError::invalid_parameter(self.name.clone(), "no value staged for writing")
        })
    }

    /// Encoded value bytes of a write of `size` elements.
    pub fn write_payload(&self, size: u16) -> Result<Vec<u8>> {
        let value = self.staged_value(None)?;
        let (_, template) = self.write_template()?;
        self.encode_value(&template, &value, usize::from(size))
    }

    /// Write request for the staged value (or `value`, which is staged first).
    ///
    /// A tag addressing a single bit produces a Read-Modify-Write request.
    ///
    /// # Errors
    ///
    /// Returns `EnipError::InvalidParameter` when the type is unknown or the
    /// value does not match it.
    pub fn generate_write_message_request(
        &self,
        value: Option<TagValue>,
        size: u16,
    ) -> Result<Vec<u8>> {
        let value = self.staged_value(value)?;
        if let Some(bit) = self.bit_index {
            return self.generate_bit_write(bit, &value);
        }

        let (datatype, template) = self.write_template()?;
        let mut data = self.write_type_header(datatype, &template)?;
        data.put_u16_le(size);
        data.extend(self.encode_value(&template, &value, usize::from(size))?);
        Ok(message_router::build(services::WRITE_TAG, &self.path, &data))
    }

    fn generate_bit_write(&self, bit: u8, value: &TagValue) -> Result<Vec<u8>> {
        let datatype = self.datatype().ok_or_else(|| {
            EnipError::invalid_parameter(
                self.name.clone(),
                "type unknown; read the tag first or declare its datatype",
            )
        })?;
        let width = self.bit_host_width(datatype, bit)?;
        let state = value.as_bool().ok_or_else(|| {
            EnipError::invalid_parameter(self.name.clone(), "bit writes take a boolean")
        })?;

        let (or_mask, and_mask) = modify_masks(bit, width, state).ok_or_else(|| {
            EnipError::invalid_parameter(self.name.clone(), format!("no mask for bit {bit}"))
        })?;
        let mut data = Vec::with_capacity(2 + 2 * width);
        data.put_u16_le(width as u16);
        data.extend_from_slice(&or_mask.to_le_bytes()[..width]);
        data.extend_from_slice(&and_mask.to_le_bytes()[..width]);
        Ok(message_router::build(
            services::READ_MODIFY_WRITE_TAG,
            &self.path,
            &data,
        ))
    }

    /// Write Tag Fragmented requests covering the staged value.
    pub fn generate_write_fragmented_requests(&self, size: u16) -> Result<Vec<Vec<u8>>> {
        let value = self.staged_value(None)?;
        let (datatype, template) = self.write_template()?;
        let payload = self.encode_value(&template, &value, usize::from(size))?;
        let header = self.write_type_header(datatype, &template)?;

        payload
            .chunks(WRITE_FRAGMENT_SIZE)
            .enumerate()
            .map(|(i, chunk)| {
                let mut data = header.clone();
                data.put_u16_le(size);
                data.put_u32_le((i * WRITE_FRAGMENT_SIZE) as u32);
                data.extend_from_slice(chunk);
                Ok(message_router::build(
                    services::WRITE_TAG_FRAGMENTED,
                    &self.path,
                    &data,
                ))
            })
            .collect()
    }

    /// Requests needed to write the staged value: one Write Tag request, or
    /// fragments when the payload exceeds [`MAX_UNFRAGMENTED_WRITE`].
    pub fn generate_write_requests(&self, size: u16) -> Result<Vec<Vec<u8>>> {
        if self.bit_index.is_none() && self.write_payload(size)?.len() > MAX_UNFRAGMENTED_WRITE {
            self.generate_write_fragmented_requests(size)
        } else {
            Ok(vec![self.generate_write_message_request(None, size)?])
        }
    }
}

/// Length of the type header opening a Read Tag reply.
pub(crate) fn read_type_header_len(data: &[u8]) -> Result<usize> {
    let code = Reader::new(data).u16()?;
    Ok(if code == DataType::STRUCT.code() { 4 } else { 2 })
}
