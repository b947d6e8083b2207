//! Transport seam: ISO-on-TCP connection with an optional TLS layer.
//!
//! The session engine talks to a [`Transport`] in plaintext S7CommPlus
//! bytes. [`IsoTransport`] implements it over any async byte stream using
//! [`IsoCodec`] framing; once [`Transport::start_tls`] has run, all traffic
//! passes through a caller-supplied [`TlsEngine`].

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::error::{Result, S7Error};
use crate::iso::{tpdu_size, ConnectionParams, IsoCodec, Tpdu};

/// Byte transport used by the session engine.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Establish the ISO connection.
    async fn connect(&mut self) -> Result<()>;

    /// Run the TLS handshake; subsequent traffic is encrypted.
    async fn start_tls(&mut self) -> Result<()>;

    /// Send plaintext bytes.
    async fn send(&mut self, data: Bytes) -> Result<()>;

    /// Receive the next chunk of plaintext bytes.
    async fn recv(&mut self) -> Result<Bytes>;

    /// Keying material exported from the TLS session.
    fn export_keying_material(&self, label: &str, len: usize) -> Result<Vec<u8>>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// A push/pull TLS transformer.
///
/// Ciphertext from the peer goes in through [`push_ciphertext`], which
/// returns any decrypted application data. Application data goes in through
/// [`push_plaintext`]; records ready for the wire come out of
/// [`pull_ciphertext`]. Certificate policy is up to the implementation.
///
/// [`push_ciphertext`]: TlsEngine::push_ciphertext
/// [`push_plaintext`]: TlsEngine::push_plaintext
/// [`pull_ciphertext`]: TlsEngine::pull_ciphertext
pub trait TlsEngine: Send {
    /// Begin the client handshake.
    fn start_handshake(&mut self) -> Result<()>;

    /// Whether the handshake is still in progress.
    fn is_handshaking(&self) -> bool;

    /// Feed received ciphertext, returning decrypted application data.
    fn push_ciphertext(&mut self, data: &[u8]) -> Result<Bytes>;

    /// Queue application data for encryption.
    fn push_plaintext(&mut self, data: &[u8]) -> Result<()>;

    /// Next ciphertext record to send, if any.
    fn pull_ciphertext(&mut self) -> Option<Bytes>;

    /// RFC 5705 keying material export.
    fn export_keying_material(&self, label: &str, len: usize) -> Result<Vec<u8>>;
}

/// FIFO of byte buffers that can be drained partially.
#[derive(Debug, Clone, Default)]
pub struct BufferQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl BufferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a buffer. Empty buffers are ignored.
    pub fn push(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.len += data.len();
            self.chunks.push_back(data);
        }
    }

    /// Take up to `max` bytes of the head buffer; any remainder stays at the
    /// head of the queue.
    pub fn pop(&mut self, max: usize) -> Option<Bytes> {
        let mut head = self.chunks.pop_front()?;
        if max > 0 && head.len() > max {
            let rest = head.split_off(max);
            self.chunks.push_front(rest);
        }
        self.len -= head.len();
        Some(head)
    }

    /// Total queued bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}

/// TLS state of a connection: engine plus pending write/read queues.
pub struct TlsChannel {
    engine: Box<dyn TlsEngine>,
    pending_write: BufferQueue,
    pending_read: BufferQueue,
}

impl std::fmt::Debug for TlsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsChannel")
            .field("handshaking", &self.engine.is_handshaking())
            .field("pending_write", &self.pending_write.len())
            .field("pending_read", &self.pending_read.len())
            .finish()
    }
}

impl TlsChannel {
    pub fn new(engine: Box<dyn TlsEngine>) -> Self {
        Self {
            engine,
            pending_write: BufferQueue::new(),
            pending_read: BufferQueue::new(),
        }
    }

    /// Start the handshake and queue the first flight.
    pub fn start(&mut self) -> Result<()> {
        self.engine.start_handshake()?;
        self.collect_ciphertext();
        Ok(())
    }

    #[inline]
    pub fn is_handshaking(&self) -> bool {
        self.engine.is_handshaking()
    }

    /// Process ciphertext received from the peer.
    pub fn on_ciphertext(&mut self, data: &[u8]) -> Result<()> {
        let plaintext = self.engine.push_ciphertext(data)?;
        self.pending_read.push(plaintext);
        self.collect_ciphertext();
        Ok(())
    }

    /// Encrypt application data.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<()> {
        self.engine.push_plaintext(data)?;
        self.collect_ciphertext();
        Ok(())
    }

    /// Next ciphertext chunk of at most `max` bytes.
    pub fn next_outgoing(&mut self, max: usize) -> Option<Bytes> {
        self.pending_write.pop(max)
    }

    /// Whether ciphertext is waiting to be sent.
    pub fn has_outgoing(&self) -> bool {
        !self.pending_write.is_empty()
    }

    /// Next decrypted chunk of at most `max` bytes (0 = whole head buffer).
    pub fn read_plaintext(&mut self, max: usize) -> Option<Bytes> {
        self.pending_read.pop(max)
    }

    pub fn export_keying_material(&self, label: &str, len: usize) -> Result<Vec<u8>> {
        self.engine.export_keying_material(label, len)
    }

    fn collect_ciphertext(&mut self) {
        while let Some(record) = self.engine.pull_ciphertext() {
            self.pending_write.push(record);
        }
    }
}

/// ISO-on-TCP transport over an async byte stream.
pub struct IsoTransport<S> {
    framed: Framed<S, IsoCodec>,
    params: ConnectionParams,
    engine: Option<Box<dyn TlsEngine>>,
    tls: Option<TlsChannel>,
    // Data TPDUs of the message being received
    reassembly: BytesMut,
    max_payload: usize,
    connected: bool,
}

impl<S> std::fmt::Debug for IsoTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsoTransport")
            .field("params", &self.params)
            .field("tls", &self.tls)
            .field("max_payload", &self.max_payload)
            .field("connected", &self.connected)
            .finish()
    }
}

impl IsoTransport<TcpStream> {
    /// Open a TCP connection to `addr` (usually port 102).
    pub async fn connect_tcp(
        addr: &str,
        remote_tsap: impl Into<Bytes>,
        engine: Option<Box<dyn TlsEngine>>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| S7Error::Connection(format!("{addr}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, remote_tsap, engine))
    }
}

impl<S> IsoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream. `engine` is required for [`Transport::start_tls`].
    pub fn new(
        stream: S,
        remote_tsap: impl Into<Bytes>,
        engine: Option<Box<dyn TlsEngine>>,
    ) -> Self {
        let params = ConnectionParams::new(remote_tsap);
        let max_payload = tpdu_size(params.tpdu_size) - 3;
        Self {
            framed: Framed::new(stream, IsoCodec::new()),
            params,
            engine,
            tls: None,
            reassembly: BytesMut::new(),
            max_payload,
            connected: false,
        }
    }

    /// Whether the TLS layer is active.
    pub fn is_tls_active(&self) -> bool {
        self.tls.is_some()
    }

    async fn next_tpdu(&mut self) -> Result<Tpdu> {
        match self.framed.next().await {
            Some(tpdu) => tpdu,
            None => Err(S7Error::ConnectionClosed),
        }
    }

    /// Receive data TPDUs up to and including the one flagged EOT.
    ///
    /// Cancel-safe: TPDUs already received stay in the reassembly buffer.
    async fn recv_message(&mut self) -> Result<Bytes> {
        loop {
            match self.next_tpdu().await? {
                Tpdu::Data { eot, payload } => {
                    self.reassembly.extend_from_slice(&payload);
                    if eot {
                        let message = self.reassembly.split().freeze();
                        trace!(len = message.len(), "ISO message received");
                        return Ok(message);
                    }
                }
                other => {
                    return Err(S7Error::protocol(format!(
                        "unexpected TPDU while connected: {other:?}"
                    )));
                }
            }
        }
    }

    /// Send `data` as data TPDUs, flagging the last one EOT.
    async fn send_message(&mut self, data: Bytes) -> Result<()> {
        let mut queue = BufferQueue::new();
        queue.push(data);
        while let Some(chunk) = queue.pop(self.max_payload) {
            let eot = queue.is_empty();
            self.framed.send(Tpdu::Data { eot, payload: chunk }).await?;
        }
        Ok(())
    }

    /// Send all pending ciphertext, one ISO message per record.
    async fn flush_tls(&mut self) -> Result<()> {
        while let Some(record) = self.tls.as_mut().and_then(|tls| tls.next_outgoing(0)) {
            self.send_message(record).await?;
        }
        Ok(())
    }

    fn tls_mut(&mut self) -> Result<&mut TlsChannel> {
        self.tls
            .as_mut()
            .ok_or_else(|| S7Error::Tls("TLS not started".into()))
    }
}

impl<S> Transport for IsoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn connect(&mut self) -> Result<()> {
        self.framed
            .send(Tpdu::ConnectionRequest(self.params.clone()))
            .await?;
        match self.next_tpdu().await? {
            Tpdu::ConnectionConfirm(confirm) => {
                self.max_payload = tpdu_size(confirm.tpdu_size).saturating_sub(3).max(1);
                self.connected = true;
                debug!(max_payload = self.max_payload, "ISO connection established");
                Ok(())
            }
            other => Err(S7Error::Connection(format!(
                "expected connection confirm, got {other:?}"
            ))),
        }
    }

    async fn start_tls(&mut self) -> Result<()> {
        if !self.connected {
            return Err(S7Error::NotConnected);
        }
        let engine = self
            .engine
            .take()
            .ok_or_else(|| S7Error::Tls("no TLS engine configured".into()))?;
        let mut channel = TlsChannel::new(engine);
        channel.start()?;
        self.tls = Some(channel);
        self.flush_tls().await?;

        while self.tls_mut()?.is_handshaking() {
            let record = self.recv_message().await?;
            self.tls_mut()?.on_ciphertext(&record)?;
            self.flush_tls().await?;
        }
        debug!("TLS handshake complete");
        Ok(())
    }

    async fn send(&mut self, data: Bytes) -> Result<()> {
        if !self.connected {
            return Err(S7Error::NotConnected);
        }
        match self.tls.as_mut() {
            Some(tls) => {
                tls.write_plaintext(&data)?;
                self.flush_tls().await
            }
            None => self.send_message(data).await,
        }
    }

    async fn recv(&mut self) -> Result<Bytes> {
        if !self.connected {
            return Err(S7Error::NotConnected);
        }
        if self.tls.is_none() {
            return self.recv_message().await;
        }
        loop {
            if let Some(plaintext) = self.tls_mut()?.read_plaintext(0) {
                return Ok(plaintext);
            }
            let record = self.recv_message().await?;
            self.tls_mut()?.on_ciphertext(&record)?;
            // Engines may answer post-handshake messages
            self.flush_tls().await?;
        }
    }

    fn export_keying_material(&self, label: &str, len: usize) -> Result<Vec<u8>> {
        match &self.tls {
            Some(tls) => tls.export_keying_material(label, len),
            None => Err(S7Error::Tls("TLS not started".into())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.tls = None;
        self.reassembly.clear();
        SinkExt::<Tpdu>::close(&mut self.framed).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted in-memory device for session tests.

    use std::collections::VecDeque;

    use bytes::{Bytes, BytesMut};
    use tokio_util::codec::{Decoder, Encoder};

    use super::Transport;
    use crate::client::{ClientConfig, S7Client};
    use crate::codec::{Frame, S7CommPlusCodec};
    use crate::error::{Result, S7Error};
    use crate::pdu::{
        encode_response, CreateObjectResponse, DeleteObjectResponse, FunctionCode,
        GetVarSubstreamedResponse, InitSslResponse, ProtocolVersion, RequestHeader, Response,
        SetMultiVariablesResponse, TRANSPORT_FLAGS,
    };
    use crate::types::{ids, vlq, Object, Value, ValueStruct};

    /// Session id assigned by [`MockDevice`].
    pub(crate) const SESSION_ID: u32 = 0x7000_0001;

    /// A request as seen by the mock device.
    #[derive(Debug, Clone)]
    pub(crate) struct MockRequest {
        pub version: ProtocolVersion,
        pub header: RequestHeader,
        /// Whole PDU including the header.
        pub data: Bytes,
        /// Integrity id the device expects the response to carry.
        pub integrity: Option<u32>,
    }

    impl MockRequest {
        /// Response frame echoing sequence number and integrity id.
        pub fn reply<R: Response>(&self, response: &R) -> Frame {
            Frame::new(
                self.version,
                encode_response(
                    response,
                    self.header.sequence_number,
                    TRANSPORT_FLAGS,
                    self.integrity,
                ),
            )
        }

        /// Request body after the header.
        pub fn body(&self) -> Bytes {
            self.data.slice(RequestHeader::SIZE..)
        }

        /// Leading object id of the body.
        pub fn in_object_id(&self) -> u32 {
            let body = self.body();
            u32::from_be_bytes([body[0], body[1], body[2], body[3]])
        }

        /// Attribute address of a GetVarSubstreamed or SetVariable request.
        pub fn variable_address(&self) -> Option<u32> {
            let mut body = self.body().slice(4..);
            match self.header.function_code {
                FunctionCode::GetVarSubStreamed => match Value::decode(&mut body).ok()? {
                    Value::AddressArray(addresses) => addresses.first().copied(),
                    _ => None,
                },
                FunctionCode::SetVariable => {
                    vlq::decode_u32(&mut body).ok()?;
                    vlq::decode_u32(&mut body).ok()
                }
                _ => None,
            }
        }

        /// Value carried by a SetVariable request.
        pub fn written_value(&self) -> Option<Value> {
            if self.header.function_code != FunctionCode::SetVariable {
                return None;
            }
            let mut body = self.body().slice(4..);
            vlq::decode_u32(&mut body).ok()?;
            vlq::decode_u32(&mut body).ok()?;
            Value::decode(&mut body).ok()
        }
    }

    /// Device side of session setup and legitimation.
    #[derive(Debug, Clone)]
    pub(crate) struct MockDevice {
        pub version_string: String,
        pub protection_level: u32,
        pub challenge: Vec<u8>,
    }

    impl Default for MockDevice {
        fn default() -> Self {
            Self {
                version_string: "1;6ES7 515-2AM01-0AB0 ;V2.9".into(),
                protection_level: 1,
                challenge: (0u8..20).collect(),
            }
        }
    }

    impl MockDevice {
        pub fn session_created(&self) -> CreateObjectResponse {
            let version = Value::Struct(ValueStruct::new(ids::SERVER_SESSION_VERSION_STRUCT).with(
                ids::LID_SESSION_VERSION_SYSTEM_PAOM_STRING,
                Value::WString(self.version_string.clone()),
            ));
            CreateObjectResponse {
                return_value: 0,
                object_ids: vec![SESSION_ID],
                objects: vec![Object::new(SESSION_ID, ids::CLASS_SERVER_SESSION, 0)
                    .with_attribute(ids::SERVER_SESSION_VERSION, version)],
            }
        }

        /// Reply to session management requests; `None` for anything else.
        pub fn reply(&self, request: &MockRequest) -> Option<Frame> {
            let header = &request.header;
            match header.function_code {
                FunctionCode::InitSsl => Some(request.reply(&InitSslResponse { return_value: 0 })),
                FunctionCode::CreateObject
                    if header.session_id == ids::OBJECT_NULL_SERVER_SESSION =>
                {
                    Some(request.reply(&self.session_created()))
                }
                FunctionCode::SetMultiVariables if request.in_object_id() == SESSION_ID => {
                    Some(request.reply(&SetMultiVariablesResponse::default()))
                }
                FunctionCode::GetVarSubStreamed if request.in_object_id() == SESSION_ID => {
                    let value = match request.variable_address()? {
                        ids::EFFECTIVE_PROTECTION_LEVEL => Value::UDInt(self.protection_level),
                        ids::SERVER_SESSION_REQUEST => Value::usint_array(&self.challenge),
                        _ => return None,
                    };
                    Some(request.reply(&GetVarSubstreamedResponse {
                        return_value: 0,
                        value,
                    }))
                }
                FunctionCode::DeleteObject if request.in_object_id() == SESSION_ID => {
                    Some(request.reply(&DeleteObjectResponse {
                        return_value: 0,
                        object_id: SESSION_ID,
                    }))
                }
                _ => None,
            }
        }
    }

    /// Transport answering session setup through `device` and everything
    /// else through `handler`.
    pub(crate) fn device_transport(
        device: MockDevice,
        mut handler: impl FnMut(&MockRequest) -> Vec<Frame> + Send + 'static,
    ) -> MockTransport {
        MockTransport::new(move |request| match device.reply(request) {
            Some(frame) => vec![frame],
            None => handler(request),
        })
    }

    /// A client that completed the connect sequence against a full-access device.
    pub(crate) async fn connected_client(
        handler: impl FnMut(&MockRequest) -> Vec<Frame> + Send + 'static,
    ) -> S7Client<MockTransport> {
        connected_client_with(ClientConfig::new("mock:102"), handler).await
    }

    pub(crate) async fn connected_client_with(
        config: ClientConfig,
        handler: impl FnMut(&MockRequest) -> Vec<Frame> + Send + 'static,
    ) -> S7Client<MockTransport> {
        let mut client = S7Client::new(config, device_transport(MockDevice::default(), handler));
        client.connect().await.unwrap();
        client
    }

    type Handler = Box<dyn FnMut(&MockRequest) -> Vec<Frame> + Send>;

    pub(crate) struct MockTransport {
        handler: Handler,
        codec: S7CommPlusCodec,
        outbound: BytesMut,
        inbound: VecDeque<Bytes>,
        pub requests: Vec<MockRequest>,
        pub keying_material: Vec<u8>,
        read_integrity: u32,
        write_integrity: u32,
        pub connected: bool,
        pub tls_started: bool,
        pub closed: bool,
        pub fail_tls: bool,
    }

    impl MockTransport {
        pub fn new(handler: impl FnMut(&MockRequest) -> Vec<Frame> + Send + 'static) -> Self {
            Self {
                handler: Box::new(handler),
                codec: S7CommPlusCodec::new(),
                outbound: BytesMut::new(),
                inbound: VecDeque::new(),
                requests: Vec::new(),
                keying_material: (0u8..32).collect(),
                read_integrity: 0,
                write_integrity: 0,
                connected: false,
                tls_started: false,
                closed: false,
                fail_tls: false,
            }
        }

        /// Queue a frame for delivery regardless of requests.
        pub fn push_frame(&mut self, frame: Frame) {
            let mut buf = BytesMut::new();
            let _ = S7CommPlusCodec::new().encode(frame, &mut buf);
            self.inbound.push_back(buf.freeze());
        }

        /// Number of requests sent with the given function code.
        pub fn count(&self, function_code: FunctionCode) -> usize {
            self.requests
                .iter()
                .filter(|r| r.header.function_code == function_code)
                .count()
        }

        pub fn replace_handler(
            &mut self,
            handler: impl FnMut(&MockRequest) -> Vec<Frame> + Send + 'static,
        ) {
            self.handler = Box::new(handler);
        }
    }

    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        async fn start_tls(&mut self) -> Result<()> {
            if self.fail_tls {
                return Err(S7Error::Tls("handshake failed".into()));
            }
            self.tls_started = true;
            Ok(())
        }

        async fn send(&mut self, data: Bytes) -> Result<()> {
            self.outbound.extend_from_slice(&data);
            while let Some(frame) = self.codec.decode(&mut self.outbound)? {
                let header = RequestHeader::decode(&mut frame.data.clone())?;
                let integrity = if frame.version.has_integrity() {
                    let counter = if header.function_code.is_write() {
                        &mut self.write_integrity
                    } else {
                        &mut self.read_integrity
                    };
                    *counter = counter.wrapping_add(1);
                    Some(*counter)
                } else {
                    None
                };
                let request = MockRequest {
                    version: frame.version,
                    header,
                    data: frame.data.clone(),
                    integrity,
                };
                for reply in (self.handler)(&request) {
                    self.push_frame(reply);
                }
                self.requests.push(request);
            }
            Ok(())
        }

        async fn recv(&mut self) -> Result<Bytes> {
            match self.inbound.pop_front() {
                Some(data) => Ok(data),
                None => std::future::pending().await,
            }
        }

        fn export_keying_material(&self, _label: &str, len: usize) -> Result<Vec<u8>> {
            if !self.tls_started {
                return Err(S7Error::Tls("TLS not started".into()));
            }
            Ok(self.keying_material.iter().copied().cycle().take(len).collect())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            self.connected = false;
            Ok(())
        }
    }
}
