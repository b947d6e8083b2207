//! S7CommPlus client implementation.
//!
//! The client owns one session and keeps a single request in flight. Every
//! request is matched to its response by sequence number; notifications that
//! arrive in between are queued and handed out by
//! [`S7Client::poll_notification`]. There is no background task: the caller
//! drives the receive loop.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::codec::{Frame, S7CommPlusCodec};
use crate::error::{Result, S7Error};
use crate::iso::DEFAULT_REMOTE_TSAP;
use crate::legitimation;
use crate::pdu::{
    encode_request, CreateObjectRequest, CreateObjectResponse, DeleteObjectRequest,
    ErrorResponse, ExploreRequest, ExploreResponse, FunctionCode, GetMultiVariablesRequest,
    GetVarSubstreamedRequest, InboundPdu, InitSslRequest, Notification, ProtocolVersion,
    Request, Response, ResponseHeader, SetMultiVariablesRequest, SetVariableRequest,
    FLAG_NO_RESPONSE, TRANSPORT_FLAGS,
};
use crate::tag::{PlcTag, TagStatus};
use crate::transport::{IsoTransport, TlsEngine, Transport};
use crate::types::{ids, vlq, Object, Value};

/// Default S7CommPlus port.
pub const DEFAULT_PORT: u16 = 102;

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Default response timeout in seconds.
pub const DEFAULT_READ_TIMEOUT: u64 = 5;

/// Default number of items per GetMultiVariables/SetMultiVariables request.
pub const DEFAULT_MAX_ITEMS_PER_REQUEST: usize = 20;

/// Default subscription credit limit.
pub const DEFAULT_CREDIT_LIMIT: i16 = 10;

/// Default step by which a subscription credit limit is raised.
pub const DEFAULT_CREDIT_STEP: i16 = 10;

// Fire-and-forget sequence numbers kept for filtering stray responses
const MAX_UNANSWERED: usize = 32;

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Device address (host:port)
    pub address: String,
    /// Timeout for the whole connect sequence
    pub connect_timeout: Duration,
    /// Time to wait for the response to a request
    pub read_timeout: Duration,
    /// Called TSAP of the ISO connection
    pub remote_tsap: Bytes,
    /// User name for legitimation (modern firmware only)
    pub username: Option<String>,
    /// Password for legitimation
    pub password: Option<String>,
    /// Items per multi-variable request
    pub max_items_per_request: usize,
    /// Initial credit limit of new subscriptions (-1 = unlimited)
    pub credit_limit: i16,
    /// Credit limit increment
    pub credit_step: i16,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("remote_tsap", &self.remote_tsap)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("max_items_per_request", &self.max_items_per_request)
            .field("credit_limit", &self.credit_limit)
            .field("credit_step", &self.credit_step)
            .finish()
    }
}

impl ClientConfig {
    /// Create a new configuration with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT),
            remote_tsap: Bytes::from_static(DEFAULT_REMOTE_TSAP),
            username: None,
            password: None,
            max_items_per_request: DEFAULT_MAX_ITEMS_PER_REQUEST,
            credit_limit: DEFAULT_CREDIT_LIMIT,
            credit_step: DEFAULT_CREDIT_STEP,
        }
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set response timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the called TSAP.
    pub fn remote_tsap(mut self, tsap: impl Into<Bytes>) -> Self {
        self.remote_tsap = tsap.into();
        self
    }

    /// Set the legitimation password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the legitimation user name.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the number of items per multi-variable request.
    pub fn max_items_per_request(mut self, items: usize) -> Self {
        self.max_items_per_request = items.max(1);
        self
    }

    /// Set the initial subscription credit limit.
    ///
    /// Checked against `-1..=254` when a subscription is created.
    pub fn credit_limit(mut self, limit: i16) -> Self {
        self.credit_limit = limit;
        self
    }

    /// Set the credit limit increment, `1..=254`.
    pub fn credit_step(mut self, step: i16) -> Self {
        self.credit_step = step;
        self
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// ISO connection established
    TransportConnected,
    /// TLS handshake complete
    TlsReady,
    /// Server session created
    SessionOpen,
    /// Legitimation in progress
    Legitimating,
    /// Session usable
    Ready,
    /// Session torn down after a protocol or transport error
    Faulted,
}

impl ConnectionState {
    /// Whether session requests may be sent.
    #[inline]
    pub const fn has_session(&self) -> bool {
        matches!(self, Self::SessionOpen | Self::Legitimating | Self::Ready)
    }
}

/// Per-session protocol state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    session_id: u32,
    version: ProtocolVersion,
    sequence_number: u16,
    read_integrity: u32,
    write_integrity: u32,
    server_session_version: Option<Value>,
    pub(crate) protection_level: Option<u32>,
    pub(crate) legitimated: bool,
    notifications: VecDeque<Notification>,
    unanswered: VecDeque<u16>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            session_id: ids::OBJECT_NULL_SERVER_SESSION,
            version: ProtocolVersion::V1,
            sequence_number: 0,
            read_integrity: 0,
            write_integrity: 0,
            server_session_version: None,
            protection_level: None,
            legitimated: false,
            notifications: VecDeque::new(),
            unanswered: VecDeque::new(),
        }
    }

    /// Session id assigned by the device.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Protocol version used for requests.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// ServerSessionVersion attribute reported at session creation.
    pub fn server_session_version(&self) -> Option<&Value> {
        self.server_session_version.as_ref()
    }

    /// Version string identifying device family and firmware.
    pub fn version_string(&self) -> Option<&str> {
        match self.server_session_version.as_ref()? {
            Value::WString(text) => Some(text),
            Value::Struct(version) => version
                .get(ids::LID_SESSION_VERSION_SYSTEM_PAOM_STRING)
                .and_then(Value::as_str),
            _ => None,
        }
    }

    /// Effective protection level read during connect.
    pub fn protection_level(&self) -> Option<u32> {
        self.protection_level
    }

    /// Whether legitimation succeeded.
    pub fn is_legitimated(&self) -> bool {
        self.legitimated
    }

    /// Next sequence number; wraps and skips 0.
    pub(crate) fn next_sequence(&mut self) -> u16 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        if self.sequence_number == 0 {
            self.sequence_number = 1;
        }
        self.sequence_number
    }

    /// Integrity id for the next request of `function`, if the protocol
    /// version uses one.
    pub(crate) fn next_integrity(&mut self, function: FunctionCode) -> Option<u32> {
        if !self.version.has_integrity() {
            return None;
        }
        let counter = if function.is_write() {
            &mut self.write_integrity
        } else {
            &mut self.read_integrity
        };
        *counter = counter.wrapping_add(1);
        Some(*counter)
    }

    fn remember_unanswered(&mut self, sequence_number: u16) {
        if self.unanswered.len() == MAX_UNANSWERED {
            self.unanswered.pop_front();
        }
        self.unanswered.push_back(sequence_number);
    }

    fn take_unanswered(&mut self, sequence_number: u16) -> bool {
        match self.unanswered.iter().position(|&s| s == sequence_number) {
            Some(index) => {
                self.unanswered.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Fail with [`S7Error::Device`] on a non-zero return value.
pub(crate) fn check_return<R: Response>(response: &R) -> Result<()> {
    match response.return_value() {
        0 => Ok(()),
        return_value => Err(S7Error::Device {
            function: R::FUNCTION_CODE.as_u16(),
            return_value,
        }),
    }
}

fn decode_response<R: Response>(
    header: ResponseHeader,
    mut body: Bytes,
    integrity: Option<u32>,
) -> Result<R> {
    if header.function_code.is_error() {
        let error = ErrorResponse::decode_body(&mut body)?;
        return Err(S7Error::Device {
            function: R::FUNCTION_CODE.as_u16(),
            return_value: error.return_value,
        });
    }
    if header.function_code != R::FUNCTION_CODE {
        return Err(S7Error::UnexpectedFunction {
            expected: R::FUNCTION_CODE.as_u16(),
            actual: header.function_code.as_u16(),
        });
    }
    let response = R::decode_body(&mut body)?;
    if let Some(expected) = integrity {
        let actual = vlq::decode_u32(&mut body)?;
        if actual != expected {
            return Err(S7Error::IntegrityMismatch { expected, actual });
        }
    }
    Ok(response)
}

/// Tag addressed by a 1-based item number.
fn item_tag(tags: &mut [PlcTag], item: u32) -> Option<&mut PlcTag> {
    let index = usize::try_from(item.checked_sub(1)?).ok()?;
    tags.get_mut(index)
}

/// ServerSession object created at connect.
fn server_session_object() -> Object {
    Object::new(ids::GET_NEW_RID_ON_SERVER, ids::CLASS_SERVER_SESSION, 0)
        .with_attribute(ids::SERVER_SESSION_CLIENT_RID, Value::Rid(ids::CLIENT_RID_SEED))
        .with_object(Object::new(ids::GET_NEW_RID_ON_SERVER, ids::CLASS_SUBSCRIPTIONS, 0))
}

/// S7CommPlus client.
pub struct S7Client<T> {
    config: ClientConfig,
    transport: T,
    codec: S7CommPlusCodec,
    // Plaintext received but not yet decoded into frames
    inbound: BytesMut,
    state: ConnectionState,
    session: SessionContext,
}

impl<T> std::fmt::Debug for S7Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S7Client")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("session", &self.session)
            .finish()
    }
}

impl S7Client<IsoTransport<TcpStream>> {
    /// Open a TCP connection to the configured address and run the connect
    /// sequence, using `engine` for TLS.
    pub async fn connect_tcp(config: ClientConfig, engine: Box<dyn TlsEngine>) -> Result<Self> {
        let transport = timeout(
            config.connect_timeout,
            IsoTransport::connect_tcp(&config.address, config.remote_tsap.clone(), Some(engine)),
        )
        .await
        .map_err(|_| S7Error::ConnectionTimeout)??;

        let mut client = Self::new(config, transport);
        client.connect().await?;
        Ok(client)
    }
}

impl<T: Transport> S7Client<T> {
    /// Create a client over an unconnected transport.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            codec: S7CommPlusCodec::new(),
            inbound: BytesMut::new(),
            state: ConnectionState::Disconnected,
            session: SessionContext::new(),
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub(crate) fn session_mut(&mut self) -> &mut SessionContext {
        &mut self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the connect sequence: ISO connection, InitSsl, TLS, server
    /// session, version write-back and legitimation.
    ///
    /// On failure the transport is closed and the client is left
    /// [`Faulted`](ConnectionState::Faulted).
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(S7Error::InvalidState("connect requires a disconnected client"));
        }
        self.session = SessionContext::new();
        self.codec.reset();
        self.inbound.clear();

        let result = match timeout(self.config.connect_timeout, self.establish()).await {
            Ok(result) => result,
            Err(_) => Err(S7Error::ConnectionTimeout),
        };
        if let Err(e) = result {
            warn!(error = %e, state = ?self.state, "connect failed");
            self.teardown(ConnectionState::Faulted).await;
            return Err(e);
        }
        Ok(())
    }

    async fn establish(&mut self) -> Result<()> {
        self.transport.connect().await?;
        self.set_state(ConnectionState::TransportConnected);

        let response = self.exchange(&InitSslRequest).await?;
        check_return(&response)?;
        self.transport.start_tls().await?;
        self.set_state(ConnectionState::TlsReady);

        let request =
            CreateObjectRequest::new(ids::OBJECT_SERVER_SESSION_CONTAINER, server_session_object());
        let response = self.exchange(&request).await?;
        check_return(&response)?;
        let session_id = *response
            .object_ids
            .first()
            .ok_or_else(|| S7Error::protocol("server session response without object id"))?;
        let version = response
            .object()
            .and_then(|session| session.attribute(ids::SERVER_SESSION_VERSION))
            .cloned()
            .ok_or_else(|| S7Error::protocol("server session response without version"))?;

        self.session.session_id = session_id;
        self.session.version = ProtocolVersion::V3;
        self.session.server_session_version = Some(version.clone());
        self.set_state(ConnectionState::SessionOpen);

        let attributes = vec![(ids::SERVER_SESSION_VERSION, version)];
        let write_back = SetMultiVariablesRequest::attributes(session_id, attributes);
        let response = self.exchange(&write_back).await?;
        check_return(&response)?;
        if let Some((_, code)) = response.errors.first() {
            return Err(S7Error::Device {
                function: FunctionCode::SetMultiVariables.as_u16(),
                return_value: *code,
            });
        }

        self.set_state(ConnectionState::Legitimating);
        legitimation::legitimate(self).await?;
        self.set_state(ConnectionState::Ready);
        Ok(())
    }

    /// Delete the server session and close the transport.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        if self.state.has_session() {
            let request = DeleteObjectRequest {
                object_id: self.session.session_id,
            };
            if let Err(e) = self.exchange(&request).await {
                debug!(error = %e, "server session delete failed");
            }
        }
        self.teardown(ConnectionState::Disconnected).await;
        Ok(())
    }

    /// Send a request and wait for its response.
    ///
    /// Protocol and transport errors fault the session; a read timeout or a
    /// device error leaves it usable. The response's return value is not
    /// checked.
    pub async fn request<R: Request>(&mut self, request: &R) -> Result<R::Response> {
        self.ensure_session()?;
        let result = self.exchange(request).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                self.fault(e).await;
            }
        }
        result
    }

    /// Send a request flagged as not expecting a response.
    pub async fn send_no_response<R: Request>(&mut self, request: &R) -> Result<()> {
        self.ensure_session()?;
        let sequence_number = self.session.next_sequence();
        let integrity = self.session.next_integrity(R::FUNCTION_CODE);
        let pdu = encode_request(
            request,
            sequence_number,
            self.session.session_id,
            TRANSPORT_FLAGS | FLAG_NO_RESPONSE,
            integrity,
        );
        self.session.remember_unanswered(sequence_number);
        trace!(function = %R::FUNCTION_CODE, sequence_number, "sending request without response");
        if let Err(e) = self.send_pdu(pdu).await {
            self.fault(&e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Read one attribute of an object.
    pub async fn get_var_substreamed(&mut self, object_id: u32, address: u32) -> Result<Value> {
        let request = GetVarSubstreamedRequest {
            in_object_id: object_id,
            address,
        };
        let response = self.request(&request).await?;
        check_return(&response)?;
        Ok(response.value)
    }

    /// Write one attribute of an object.
    pub async fn set_variable(&mut self, object_id: u32, address: u32, value: Value) -> Result<()> {
        let response = self
            .request(&SetVariableRequest::new(object_id, address, value))
            .await?;
        check_return(&response)
    }

    /// Write one attribute of an object without waiting for the response.
    pub async fn set_variable_no_response(
        &mut self,
        object_id: u32,
        address: u32,
        value: Value,
    ) -> Result<()> {
        self.send_no_response(&SetVariableRequest::new(object_id, address, value))
            .await
    }

    /// Browse the object tree.
    pub async fn explore(&mut self, request: &ExploreRequest) -> Result<ExploreResponse> {
        let response = self.request(request).await?;
        check_return(&response)?;
        Ok(response)
    }

    /// Create `object` below `request_id`.
    pub async fn create_object(
        &mut self,
        request_id: u32,
        object: Object,
    ) -> Result<CreateObjectResponse> {
        let response = self
            .request(&CreateObjectRequest::new(request_id, object))
            .await?;
        check_return(&response)?;
        Ok(response)
    }

    /// Create `object` below the session and return its device id.
    ///
    /// A failed creation leaves unknown state on the device, so any error
    /// faults the session.
    pub(crate) async fn create_session_child(&mut self, object: Object) -> Result<u32> {
        let session_id = self.session.session_id;
        let result = match self.create_object(session_id, object).await {
            Ok(response) => response
                .object_ids
                .first()
                .copied()
                .ok_or_else(|| S7Error::protocol("create response without object id")),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if self.state.has_session() {
                self.fault(e).await;
            }
        }
        result
    }

    /// Delete an object by id.
    pub async fn delete_object(&mut self, object_id: u32) -> Result<()> {
        let response = self.request(&DeleteObjectRequest { object_id }).await?;
        check_return(&response)
    }

    /// Read tags, updating their values and status.
    ///
    /// Requests carry at most `max_items_per_request` items. Items the
    /// device rejects get [`TagStatus::DeviceError`], values of the wrong
    /// type [`TagStatus::TypeMismatch`].
    pub async fn read_tags(&mut self, tags: &mut [PlcTag]) -> Result<()> {
        let chunk_size = self.config.max_items_per_request.max(1);
        for chunk in tags.chunks_mut(chunk_size) {
            let addresses = chunk.iter().map(|tag| tag.address.clone()).collect();
            let response = self
                .request(&GetMultiVariablesRequest::new(addresses))
                .await?;
            check_return(&response)?;

            for (item, value) in &response.values {
                match item_tag(chunk, *item) {
                    Some(tag) => {
                        if let Err(e) = tag.apply_wire(value) {
                            warn!(tag = %tag.name, error = %e, "read value rejected");
                        }
                    }
                    None => warn!(item, "read response for unknown item"),
                }
            }
            for (item, code) in &response.errors {
                match item_tag(chunk, *item) {
                    Some(tag) => tag.set_error(*code),
                    None => warn!(item, "read error for unknown item"),
                }
            }
        }
        Ok(())
    }

    /// Write tag values.
    ///
    /// Every tag must carry a value; this is checked before anything is
    /// sent.
    pub async fn write_tags(&mut self, tags: &mut [PlcTag]) -> Result<()> {
        for tag in tags.iter() {
            tag.wire_value()?;
        }
        let chunk_size = self.config.max_items_per_request.max(1);
        for chunk in tags.chunks_mut(chunk_size) {
            let items = chunk
                .iter()
                .map(|tag| Ok((tag.address.clone(), tag.wire_value()?)))
                .collect::<Result<Vec<_>>>()?;
            let response = self
                .request(&SetMultiVariablesRequest::variables(items))
                .await?;
            check_return(&response)?;

            for tag in chunk.iter_mut() {
                tag.status = TagStatus::Good;
            }
            for (item, code) in &response.errors {
                match item_tag(chunk, *item) {
                    Some(tag) => tag.set_error(*code),
                    None => warn!(item, "write error for unknown item"),
                }
            }
        }
        Ok(())
    }

    /// Next notification, waiting at most `wait`.
    ///
    /// Returns `Ok(None)` when nothing arrives in time.
    pub async fn poll_notification(&mut self, wait: Duration) -> Result<Option<Notification>> {
        if let Some(notification) = self.session.notifications.pop_front() {
            return Ok(Some(notification));
        }
        self.ensure_session()?;

        match timeout(wait, self.wait_notification()).await {
            Ok(Ok(notification)) => Ok(Some(notification)),
            Ok(Err(e)) => {
                if e.is_fatal() {
                    self.fault(&e).await;
                }
                Err(e)
            }
            Err(_) => Ok(None),
        }
    }

    // Internal methods

    fn set_state(&mut self, state: ConnectionState) {
        debug!(from = ?self.state, to = ?state, "connection state");
        self.state = state;
    }

    fn ensure_session(&self) -> Result<()> {
        match self.state {
            state if state.has_session() => Ok(()),
            ConnectionState::Faulted => Err(S7Error::InvalidState("session faulted")),
            _ => Err(S7Error::NotConnected),
        }
    }

    async fn fault(&mut self, error: &S7Error) {
        warn!(error = %error, "session faulted");
        self.teardown(ConnectionState::Faulted).await;
    }

    async fn teardown(&mut self, state: ConnectionState) {
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "transport close failed");
        }
        self.codec.reset();
        self.inbound.clear();
        self.set_state(state);
    }

    async fn send_pdu(&mut self, pdu: Bytes) -> Result<()> {
        let mut buf = BytesMut::with_capacity(pdu.len() + 16);
        self.codec
            .encode(Frame::new(self.session.version, pdu), &mut buf)?;
        self.transport.send(buf.freeze()).await
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.inbound)? {
                return Ok(frame);
            }
            let data = self.transport.recv().await?;
            self.inbound.extend_from_slice(&data);
        }
    }

    async fn exchange<R: Request>(&mut self, request: &R) -> Result<R::Response> {
        let sequence_number = self.session.next_sequence();
        let integrity = self.session.next_integrity(R::FUNCTION_CODE);
        let pdu = encode_request(
            request,
            sequence_number,
            self.session.session_id,
            TRANSPORT_FLAGS,
            integrity,
        );
        trace!(function = %R::FUNCTION_CODE, sequence_number, "sending request");
        self.send_pdu(pdu).await?;

        let wait = timeout(self.config.read_timeout, self.wait_response(sequence_number));
        let (header, body) = match wait.await {
            Ok(result) => result?,
            Err(_) => {
                // Drop the late reply when it arrives
                self.session.remember_unanswered(sequence_number);
                return Err(S7Error::ReadTimeout);
            }
        };
        decode_response(header, body, integrity)
    }

    async fn wait_response(&mut self, sequence_number: u16) -> Result<(ResponseHeader, Bytes)> {
        loop {
            let frame = self.next_frame().await?;
            match InboundPdu::parse(frame.version, frame.data)? {
                InboundPdu::Response(header, body) => {
                    if header.sequence_number == sequence_number {
                        return Ok((header, body));
                    }
                    if self.session.take_unanswered(header.sequence_number) {
                        trace!(
                            sequence_number = header.sequence_number,
                            "dropping unrequested response"
                        );
                        continue;
                    }
                    return Err(S7Error::SequenceMismatch {
                        expected: sequence_number,
                        actual: header.sequence_number,
                    });
                }
                InboundPdu::Notification(notification) => {
                    trace!(
                        subscription = notification.subscription_object_id,
                        "queueing notification"
                    );
                    self.session.notifications.push_back(notification);
                }
                InboundPdu::MalformedNotification(reason) => {
                    warn!(%reason, "notification dropped");
                }
                InboundPdu::SystemEvent(data) => {
                    debug!(len = data.len(), "system event skipped");
                }
            }
        }
    }

    async fn wait_notification(&mut self) -> Result<Notification> {
        loop {
            let frame = self.next_frame().await?;
            match InboundPdu::parse(frame.version, frame.data)? {
                InboundPdu::Notification(notification) => return Ok(notification),
                InboundPdu::Response(header, _) => {
                    if !self.session.take_unanswered(header.sequence_number) {
                        warn!(sequence_number = header.sequence_number, "unexpected response");
                    }
                }
                InboundPdu::MalformedNotification(reason) => {
                    warn!(%reason, "notification dropped");
                }
                InboundPdu::SystemEvent(data) => {
                    debug!(len = data.len(), "system event skipped");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{
        encode_response, GetMultiVariablesResponse, GetVarSubstreamedResponse,
        SetMultiVariablesResponse, SetVariableResponse,
    };
    use crate::transport::mock::{
        connected_client, connected_client_with, device_transport, MockDevice, MockRequest,
        MockTransport,
        SESSION_ID,
    };
    use crate::types::{ItemAddress, PlcValue, Softdatatype};

    const ATTRIBUTE: u32 = 0x0100;

    fn notification_frame() -> Frame {
        let notification = Notification {
            subscription_object_id: 0x7000_0010,
            credit_tick: 1,
            ..Default::default()
        };
        Frame::new(ProtocolVersion::V3, notification.encode())
    }

    #[test]
    fn test_client_config() {
        let config = ClientConfig::new("192.168.0.1:102")
            .connect_timeout(Duration::from_secs(3))
            .read_timeout(Duration::from_millis(500))
            .max_items_per_request(0)
            .password("secret");

        assert_eq!(config.address, "192.168.0.1:102");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.read_timeout, Duration::from_millis(500));
        assert_eq!(config.max_items_per_request, 1);
        assert_eq!(config.credit_limit, DEFAULT_CREDIT_LIMIT);
        assert_eq!(&config.remote_tsap[..], b"SIMATIC-ROOT-HMI");
        assert!(!format!("{config:?}").contains("secret"));
    }

    #[test]
    fn test_client_initial_state() {
        let transport = MockTransport::new(|_| vec![]);
        let client = S7Client::new(ClientConfig::new("localhost:102"), transport);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.session().session_id(), ids::OBJECT_NULL_SERVER_SESSION);
    }

    #[test]
    fn test_sequence_number_skips_zero() {
        let mut session = SessionContext::new();
        assert_eq!(session.next_sequence(), 1);
        session.sequence_number = u16::MAX;
        assert_eq!(session.next_sequence(), 1);
    }

    #[test]
    fn test_integrity_counters() {
        let mut session = SessionContext::new();
        assert_eq!(session.next_integrity(FunctionCode::GetMultiVariables), None);

        session.version = ProtocolVersion::V3;
        assert_eq!(session.next_integrity(FunctionCode::GetMultiVariables), Some(1));
        assert_eq!(session.next_integrity(FunctionCode::SetVariable), Some(1));
        assert_eq!(session.next_integrity(FunctionCode::Explore), Some(2));
        assert_eq!(session.next_integrity(FunctionCode::DeleteObject), Some(2));
    }

    #[tokio::test]
    async fn test_connect_sequence() {
        let client = connected_client(|_| vec![]).await;
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(client.session().session_id(), SESSION_ID);
        assert_eq!(client.session().protocol_version(), ProtocolVersion::V3);
        assert_eq!(client.session().version_string(), Some("1;6ES7 515-2AM01-0AB0 ;V2.9"));
        assert_eq!(client.session().protection_level(), Some(1));
        assert!(!client.session().is_legitimated());

        let transport = client.transport();
        assert!(transport.connected);
        assert!(transport.tls_started);
        let functions: Vec<_> = transport.requests.iter().map(|r| r.header.function_code).collect();
        assert_eq!(
            functions,
            vec![
                FunctionCode::InitSsl,
                FunctionCode::CreateObject,
                FunctionCode::SetMultiVariables,
                FunctionCode::GetVarSubStreamed,
            ]
        );
        assert_eq!(transport.requests[0].version, ProtocolVersion::V1);
        assert_eq!(transport.requests[0].header.session_id, ids::OBJECT_NULL_SERVER_SESSION);
        assert_eq!(transport.requests[0].header.sequence_number, 1);
        assert_eq!(transport.requests[2].version, ProtocolVersion::V3);
        assert_eq!(transport.requests[2].header.session_id, SESSION_ID);
    }

    #[tokio::test]
    async fn test_connect_failure_closes_transport() {
        let transport = MockTransport::new(|request| match request.header.function_code {
            FunctionCode::InitSsl => {
                vec![request.reply(&crate::pdu::InitSslResponse { return_value: 0 })]
            }
            _ => vec![request.reply(&CreateObjectResponse {
                return_value: 0x8001,
                ..Default::default()
            })],
        });
        let mut client = S7Client::new(ClientConfig::new("mock:102"), transport);

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, S7Error::Device { return_value: 0x8001, .. }));
        assert_eq!(client.state(), ConnectionState::Faulted);
        assert!(client.transport().closed);
        assert!(matches!(client.connect().await, Err(S7Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_tls_failure_closes_transport() {
        let mut transport = device_transport(MockDevice::default(), |_| vec![]);
        transport.fail_tls = true;
        let mut client = S7Client::new(ClientConfig::new("mock:102"), transport);

        assert!(matches!(client.connect().await, Err(S7Error::Tls(_))));
        assert!(client.transport().closed);
        assert_eq!(client.transport().count(FunctionCode::CreateObject), 0);
    }

    #[tokio::test]
    async fn test_read_tags() {
        let mut client = connected_client(|request| match request.header.function_code {
            FunctionCode::GetMultiVariables => vec![request.reply(&GetMultiVariablesResponse {
                return_value: 0,
                values: vec![(1, Value::Int(7)), (3, Value::Real(1.5))],
                errors: vec![(2, 0x8104_0001)],
            })],
            _ => vec![],
        })
        .await;

        let mut tags = vec![
            PlcTag::new("a", ItemAddress::data_block(1, &[0xA]), Softdatatype::Int),
            PlcTag::new("b", ItemAddress::data_block(1, &[0xB]), Softdatatype::Int),
            PlcTag::new("c", ItemAddress::data_block(1, &[0xC]), Softdatatype::Real),
        ];
        client.read_tags(&mut tags).await.unwrap();

        assert_eq!(tags[0].value, Some(PlcValue::Int(7)));
        assert_eq!(tags[1].status, TagStatus::DeviceError(0x8104_0001));
        assert_eq!(tags[2].value, Some(PlcValue::Real(1.5)));
    }

    #[tokio::test]
    async fn test_read_tags_type_mismatch_is_per_tag() {
        let config = ClientConfig::new("mock:102").max_items_per_request(2);
        let mut client = connected_client_with(config, |request| {
            vec![request.reply(&GetMultiVariablesResponse {
                return_value: 0,
                values: vec![(1, Value::Real(2.5)), (2, Value::Int(3))],
                errors: vec![],
            })]
        })
        .await;

        let mut tags: Vec<_> = (0..3)
            .map(|i| {
                let address = ItemAddress::data_block(3, &[i + 1]);
                PlcTag::new(format!("t{i}"), address, Softdatatype::Int)
            })
            .collect();
        client.read_tags(&mut tags).await.unwrap();

        assert_eq!(client.transport().count(FunctionCode::GetMultiVariables), 2);
        assert_eq!(tags[0].status, TagStatus::TypeMismatch);
        assert_eq!(tags[0].value, None);
        assert_eq!(tags[1].value, Some(PlcValue::Int(3)));
        // Second chunk: item 1 is the Real again
        assert_eq!(tags[2].status, TagStatus::TypeMismatch);
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_read_tags_chunked() {
        let config = ClientConfig::new("mock:102").max_items_per_request(2);
        let mut client = connected_client_with(config, |request| {
            vec![request.reply(&GetMultiVariablesResponse {
                return_value: 0,
                values: vec![(1, Value::Bool(true))],
                errors: vec![],
            })]
        })
        .await;

        let mut tags: Vec<_> = (0..3)
            .map(|i| {
                let address = ItemAddress::data_block(2, &[i + 1]);
                PlcTag::new(format!("t{i}"), address, Softdatatype::Bool)
            })
            .collect();
        client.read_tags(&mut tags).await.unwrap();

        assert_eq!(client.transport().count(FunctionCode::GetMultiVariables), 2);
        assert_eq!(tags[0].value, Some(PlcValue::Bool(true)));
        assert_eq!(tags[1].status, TagStatus::Unknown);
        assert_eq!(tags[2].value, Some(PlcValue::Bool(true)));
    }

    #[tokio::test]
    async fn test_write_tags() {
        let mut client = connected_client(|request| {
            vec![request.reply(&SetMultiVariablesResponse {
                return_value: 0,
                errors: vec![(2, 0x13)],
            })]
        })
        .await;

        let mut tags = vec![
            PlcTag::new("a", ItemAddress::data_block(1, &[0xA]), Softdatatype::Int)
                .with_value(PlcValue::Int(1))
                .unwrap(),
            PlcTag::new("b", ItemAddress::data_block(1, &[0xB]), Softdatatype::Int)
                .with_value(PlcValue::Int(2))
                .unwrap(),
        ];
        client.write_tags(&mut tags).await.unwrap();
        assert_eq!(tags[0].status, TagStatus::Good);
        assert_eq!(tags[1].status, TagStatus::DeviceError(0x13));

        // A tag without value is rejected before anything is sent
        let before = client.transport().requests.len();
        let address = ItemAddress::data_block(1, &[0xC]);
        let mut tags = vec![PlcTag::new("c", address, Softdatatype::Int)];
        assert!(client.write_tags(&mut tags).await.is_err());
        assert_eq!(client.transport().requests.len(), before);
    }

    #[tokio::test]
    async fn test_sequence_mismatch_faults_session() {
        let mut client = connected_client(|request| {
            let response = GetVarSubstreamedResponse {
                return_value: 0,
                value: Value::UDInt(1),
            };
            let pdu = encode_response(
                &response,
                request.header.sequence_number.wrapping_add(3),
                TRANSPORT_FLAGS,
                request.integrity,
            );
            vec![Frame::new(request.version, pdu)]
        })
        .await;

        let err = client.get_var_substreamed(1, ATTRIBUTE).await.unwrap_err();
        assert!(matches!(err, S7Error::SequenceMismatch { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
        assert_eq!(client.state(), ConnectionState::Faulted);
        assert!(client.transport().closed);
        assert!(matches!(
            client.get_var_substreamed(1, ATTRIBUTE).await,
            Err(S7Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_integrity_mismatch() {
        let mut client = connected_client(|request| {
            let pdu = encode_response(
                &SetVariableResponse { return_value: 0 },
                request.header.sequence_number,
                TRANSPORT_FLAGS,
                request.integrity.map(|id| id + 1),
            );
            vec![Frame::new(request.version, pdu)]
        })
        .await;

        let err = client.set_variable(1, ATTRIBUTE, Value::Int(1)).await.unwrap_err();
        assert!(matches!(err, S7Error::IntegrityMismatch { .. }));
        assert_eq!(client.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn test_error_pdu_is_device_error() {
        let mut client = connected_client(|request| {
            vec![request.reply(&ErrorResponse { return_value: 0x11 })]
        })
        .await;

        let err = client.get_var_substreamed(1, ATTRIBUTE).await.unwrap_err();
        assert!(matches!(
            err,
            S7Error::Device {
                function: 0x0586,
                return_value: 0x11
            }
        ));
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_unexpected_function() {
        let mut client = connected_client(|request| {
            vec![request.reply(&SetVariableResponse { return_value: 0 })]
        })
        .await;

        assert!(matches!(
            client.get_var_substreamed(1, ATTRIBUTE).await,
            Err(S7Error::UnexpectedFunction {
                expected: 0x0586,
                actual: 0x04f2
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_keeps_session() {
        let mut client = connected_client(|_| vec![]).await;

        let err = client.get_var_substreamed(1, ATTRIBUTE).await.unwrap_err();
        assert!(matches!(err, S7Error::ReadTimeout));
        assert!(err.is_retryable());
        assert_eq!(client.state(), ConnectionState::Ready);
        assert!(!client.transport().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_after_timeout_is_dropped() {
        let mut unanswered: Option<MockRequest> = None;
        let mut client = connected_client(move |request| match unanswered.take() {
            // Stay silent on the first request
            None => {
                unanswered = Some(request.clone());
                vec![]
            }
            Some(first) => vec![
                first.reply(&GetVarSubstreamedResponse {
                    return_value: 0,
                    value: Value::UInt(1),
                }),
                request.reply(&GetVarSubstreamedResponse {
                    return_value: 0,
                    value: Value::UInt(7),
                }),
            ],
        })
        .await;

        let err = client.get_var_substreamed(1, ATTRIBUTE).await.unwrap_err();
        assert!(matches!(err, S7Error::ReadTimeout));

        let value = client.get_var_substreamed(1, ATTRIBUTE).await.unwrap();
        assert_eq!(value, Value::UInt(7));
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_notification_during_request() {
        let mut client = connected_client(|request| {
            // Value entry with an unsupported Variant datatype
            let notification = vec![
                0x33, 0x70, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01,
                0x00, 0x01, 0x92, 0x00, 0x16,
            ];
            vec![
                Frame::new(ProtocolVersion::V3, notification),
                request.reply(&GetVarSubstreamedResponse {
                    return_value: 0,
                    value: Value::UInt(7),
                }),
            ]
        })
        .await;

        let value = client.get_var_substreamed(1, ATTRIBUTE).await.unwrap();
        assert_eq!(value, Value::UInt(7));
        assert_eq!(client.state(), ConnectionState::Ready);
        assert!(client
            .poll_notification(Duration::from_millis(100))
            .await
            .unwrap()
            .is_none());

        // The session keeps working
        assert_eq!(client.get_var_substreamed(1, ATTRIBUTE).await.unwrap(), Value::UInt(7));
    }

    #[tokio::test]
    async fn test_notification_during_request_is_queued() {
        let mut client = connected_client(|request| {
            vec![
                notification_frame(),
                Frame::new(ProtocolVersion::SystemEvent, vec![0x01, 0x02]),
                request.reply(&SetVariableResponse { return_value: 0 }),
            ]
        })
        .await;

        client.set_variable(1, ATTRIBUTE, Value::Bool(true)).await.unwrap();
        let notification = client.poll_notification(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(notification.subscription_object_id, 0x7000_0010);
        assert_eq!(notification.credit_tick, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_notification_timeout() {
        let mut client = connected_client(|_| vec![]).await;
        assert!(client
            .poll_notification(Duration::from_millis(100))
            .await
            .unwrap()
            .is_none());

        client.transport.push_frame(notification_frame());
        assert!(client
            .poll_notification(Duration::from_millis(100))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_fire_and_forget_response_is_dropped() {
        let mut client = connected_client(|request| match request.header.function_code {
            FunctionCode::SetVariable => {
                vec![request.reply(&SetVariableResponse { return_value: 0 })]
            }
            _ => vec![request.reply(&GetVarSubstreamedResponse {
                return_value: 0,
                value: Value::UInt(5),
            })],
        })
        .await;

        client
            .set_variable_no_response(1, ATTRIBUTE, Value::Int(20))
            .await
            .unwrap();
        let sent = client.transport().requests.last().unwrap();
        assert!(sent.header.no_response());

        assert_eq!(client.get_var_substreamed(1, ATTRIBUTE).await.unwrap(), Value::UInt(5));
    }

    #[tokio::test]
    async fn test_disconnect_deletes_session() {
        let mut client = connected_client(|_| vec![]).await;
        client.disconnect().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.transport().count(FunctionCode::DeleteObject), 1);
        assert!(client.transport().closed);
        assert!(matches!(
            client.get_var_substreamed(1, ATTRIBUTE).await,
            Err(S7Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_requests_need_session() {
        let transport = MockTransport::new(|_| vec![]);
        let mut client = S7Client::new(ClientConfig::new("mock:102"), transport);
        assert!(matches!(
            client.delete_object(1).await,
            Err(S7Error::NotConnected)
        ));
        assert!(matches!(
            client.poll_notification(Duration::ZERO).await,
            Err(S7Error::NotConnected)
        ));
    }
}
