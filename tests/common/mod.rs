//! In-memory EtherNet/IP target for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use enip_cip::codec::WriteExt;
use enip_cip::encapsulation::cpf::{self, CpfItem, ItemId};
use enip_cip::encapsulation::{self, header, Command};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Session handle assigned by the mock.
pub const SESSION_HANDLE: u32 = 0x1A2B;

/// Connection id the mock assigns by Forward Open.
pub const O_T_ID: u32 = 0x0BAD_F00D;

/// Maps an embedded CIP request to its reply, or `None` to stay silent.
pub type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Options of the mock target.
#[derive(Clone)]
pub struct MockPlc {
    /// Encapsulation status returned to RegisterSession.
    pub register_status: u32,
    /// Payload returned to ListIdentity.
    pub list_identity: Vec<u8>,
    /// CIP requests seen, unwrapped from Unconnected Send.
    pub requests: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Commands of every frame received.
    pub commands: Arc<Mutex<Vec<u16>>>,
    responder: Responder,
}

impl MockPlc {
    pub fn new(responder: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static) -> Self {
        Self {
            register_status: 0,
            list_identity: Vec::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    /// Starts serving and returns the client end of the pipe.
    pub fn spawn(self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(self.serve(server));
        client
    }

    async fn serve(self, mut stream: DuplexStream) {
        let mut buf = Vec::new();
        let mut chunk = vec![0u8; 4096];
        loop {
            while let Some(len) = header::frame_length(&buf).filter(|&len| buf.len() >= len) {
                let bytes: Vec<u8> = buf.drain(..len).collect();
                let frame = header::parse(&bytes).unwrap();
                self.commands.lock().unwrap().push(frame.command_code);
                let context = frame.context();
                let reply = match frame.command() {
                    Some(Command::RegisterSession) => {
                        let mut out = header::build_with_context(
                            Command::RegisterSession,
                            SESSION_HANDLE,
                            context,
                            &frame.payload,
                        )
                        .unwrap();
                        out[8..12].copy_from_slice(&self.register_status.to_le_bytes());
                        Some(out)
                    }
                    Some(Command::UnregisterSession) => return,
                    Some(Command::ListIdentity) => Some(
                        header::build_with_context(Command::ListIdentity, 0, context, &self.list_identity)
                            .unwrap(),
                    ),
                    Some(Command::SendRRData) => self.on_rr_data(&frame.payload, context),
                    Some(Command::SendUnitData) => self.on_unit_data(&frame.payload, context),
                    _ => None,
                };
                if let Some(reply) = reply {
                    // split every reply to exercise frame reassembly
                    let (head, tail) = reply.split_at(reply.len().min(10));
                    if stream.write_all(head).await.is_err() {
                        return;
                    }
                    let _ = stream.flush().await;
                    tokio::task::yield_now().await;
                    if stream.write_all(tail).await.is_err() {
                        return;
                    }
                }
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn respond(&self, request: &[u8]) -> Option<Vec<u8>> {
        self.requests.lock().unwrap().push(request.to_vec());
        (self.responder)(request)
    }

    fn on_rr_data(&self, payload: &[u8], context: u64) -> Option<Vec<u8>> {
        let items = encapsulation::parse_data_payload(payload).unwrap();
        let cip = cpf::find(&items, ItemId::Ucmm).unwrap().to_vec();
        let reply = self.respond(&unwrap_unconnected_send(&cip))?;

        let mut data = vec![0u8; 6];
        data.extend(
            cpf::build(&[
                CpfItem::new(ItemId::Null, Vec::new()),
                CpfItem::new(ItemId::Ucmm, reply),
            ])
            .unwrap(),
        );
        Some(header::build_with_context(Command::SendRRData, SESSION_HANDLE, context, &data).unwrap())
    }

    fn on_unit_data(&self, payload: &[u8], context: u64) -> Option<Vec<u8>> {
        let items = encapsulation::parse_data_payload(payload).unwrap();
        let packet = cpf::find(&items, ItemId::ConnectedTransportPacket).unwrap();
        let (sequence, cip) = packet.split_at(2);
        let reply = self.respond(cip)?;

        let mut connected = sequence.to_vec();
        connected.extend(reply);
        let mut data = vec![0u8; 6];
        data.extend(
            cpf::build(&[
                CpfItem::new(ItemId::ConnectionBased, 0x2222_2222u32.to_le_bytes().to_vec()),
                CpfItem::new(ItemId::ConnectedTransportPacket, connected),
            ])
            .unwrap(),
        );
        Some(header::build_with_context(Command::SendUnitData, SESSION_HANDLE, context, &data).unwrap())
    }
}

/// Embedded request of an Unconnected Send, or the request itself.
pub fn unwrap_unconnected_send(cip: &[u8]) -> Vec<u8> {
    if cip[0] != 0x52 || cip.get(2..6) != Some(&[0x20, 0x06, 0x24, 0x01]) {
        return cip.to_vec();
    }
    let start = 2 + usize::from(cip[1]) * 2;
    let len = usize::from(u16::from_le_bytes([cip[start + 2], cip[start + 3]]));
    cip[start + 4..start + 4 + len].to_vec()
}

/// Request data following the service code and path.
pub fn request_data(request: &[u8]) -> &[u8] {
    &request[2 + usize::from(request[1]) * 2..]
}

/// Message Router reply bytes.
pub fn cip_reply(service: u8, status: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![service | 0x80, 0x00, status, 0x00];
    out.extend_from_slice(data);
    out
}

/// Read Tag reply data for DINT values.
pub fn dint_data(values: &[i32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16_le(0x00C4);
    for v in values {
        out.put_i32_le(*v);
    }
    out
}

/// Get Attribute All reply data of the Identity object.
pub fn identity_data(status: u16, name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16_le(0x0001);
    out.put_u16_le(0x000E);
    out.put_u16_le(0x0036);
    out.put_u8(33);
    out.put_u8(11);
    out.put_u16_le(status);
    out.put_u32_le(0x00C0_FFEE);
    out.put_u8(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out
}

/// Installs a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
