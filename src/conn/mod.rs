// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Connection lifecycle engine.
//!
//! [`Conn`] owns exactly one server connection: the framed transport, the
//! negotiated capabilities and session state, the statement caches and the
//! pending-result marker. Methods taking `&mut self` run one exchange each;
//! [`SharedConn`] serializes overlapping submissions through the request
//! queue.

use bytes::Bytes;
use chrono::FixedOffset;

use std::sync::Arc;

use crate::collation;
use crate::constants::{CapabilityFlags, Command, CursorType, StatusFlags};
use crate::error::{DriverError, Error, Result};
use crate::opts::{CompressionAlgorithm, Opts, TimeZonePolicy};
use crate::packets::{
    parse_handshake_packet, AuthPlugin, ComChangeUser, ComStmtClose, ComStmtSendLongData,
    ComStmtExecuteRequestBuilder, HandshakeResponse, OkPacket, ServerMessage, SessionStateChange,
    SslRequest,
};
use crate::params::Params;
use crate::proto::codec::Compression;
use crate::proto::{Binary, DecodeContext, Text};
use crate::queries::{ParsedQuery, QueryCache};
use crate::row::convert::{from_row_opt, FromRow};
use crate::row::Row;
use crate::value::Value;

pub mod auth;
pub mod queue;
pub mod result;
pub mod stmt;
pub(crate) mod stream;
pub(crate) mod tls;

use self::queue::RequestQueue;
use self::result::{err_packet_to_error, PendingResult, QueryResult};
use self::stmt::{Statement, StmtCache};
use self::stream::NetStream;

/// At most this many deferred COM_STMT_CLOSE messages go out per exchange
/// boundary.
const STMT_CLOSE_FLUSH_LIMIT: usize = 512;

/// Single MySql connection.
pub struct Conn {
    stream: Option<NetStream>,
    opts: Opts,
    id: u32,
    version: (u16, u16, u16),
    is_mariadb: bool,
    capabilities: CapabilityFlags,
    status: StatusFlags,
    collation: u16,
    auth_plugin: AuthPlugin<'static>,
    nonce: Vec<u8>,
    compression: Option<Compression>,
    affected_rows: u64,
    last_insert_id: Option<u64>,
    warnings: u16,
    schema: Option<String>,
    time_zone_offset: Option<FixedOffset>,
    pub(crate) pending_result: Option<PendingResult>,
    active_cursor: Option<u32>,
    stmt_cache: StmtCache,
    query_cache: QueryCache,
    pending_stmt_close: Vec<u32>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("connection id", &self.id)
            .field("server version", &self.version)
            .field("mariadb", &self.is_mariadb)
            .field("status", &self.status)
            .field("pending result", &self.pending_result.is_some())
            .finish()
    }
}

impl Conn {
    /// Connects and authenticates per `opts`, runs session init and returns
    /// a connection in the READY state.
    pub async fn new(opts: Opts) -> Result<Conn> {
        let stream = NetStream::connect(&opts).await?;
        let stmt_cache = StmtCache::new(opts.prepare_cache_size());
        let query_cache = QueryCache::new(opts.query_cache_size());
        let mut conn = Conn {
            stream: Some(stream),
            opts,
            id: 0,
            version: (0, 0, 0),
            is_mariadb: false,
            capabilities: CapabilityFlags::empty(),
            status: StatusFlags::empty(),
            collation: crate::constants::UTF8MB4_GENERAL_CI,
            auth_plugin: AuthPlugin::MysqlNativePassword,
            nonce: Vec::new(),
            compression: None,
            affected_rows: 0,
            last_insert_id: None,
            warnings: 0,
            schema: None,
            time_zone_offset: None,
            pending_result: None,
            active_cursor: None,
            stmt_cache,
            query_cache,
            pending_stmt_close: Vec::new(),
        };

        match conn.setup_connection().await {
            Ok(()) => Ok(conn),
            Err(err) => {
                // terminal failure state: force-close
                if let Some(mut stream) = conn.stream.take() {
                    let _ = stream.shutdown().await;
                }
                Err(err)
            }
        }
    }

    /// Connects using an URL (see [`Opts::from_url`]).
    pub async fn from_url(url: &str) -> Result<Conn> {
        Conn::new(Opts::from_url(url)?).await
    }

    async fn setup_connection(&mut self) -> Result<()> {
        self.handle_handshake().await?;
        self.switch_to_ssl_if_needed().await?;
        self.do_handshake_response().await?;
        self.continue_auth().await?;
        self.switch_to_compression();
        self.stream_mut()?.reset_seq_id();
        self.run_session_init().await?;
        let version = format!(
            "{}.{}.{}",
            self.version.0, self.version.1, self.version.2
        );
        tracing::debug!(
            id = self.id,
            version = %version,
            mariadb = self.is_mariadb,
            secure = self.stream.as_ref().map(NetStream::is_secure).unwrap_or(false),
            compressed = self.compression.is_some(),
            "connection ready"
        );
        Ok(())
    }

    async fn handle_handshake(&mut self) -> Result<()> {
        let payload = self.read_packet().await?;
        match payload.first() {
            // e.g. too many connections, host blocked
            Some(&0xFF) => {
                let err = crate::packets::parse_err_packet(&payload, CapabilityFlags::empty())?;
                return Err(err_packet_to_error(err));
            }
            Some(&0x0a) => (),
            other => {
                return Err(DriverError::ProtocolVersion {
                    version: other.copied().unwrap_or(0),
                }
                .into())
            }
        }
        let handshake = parse_handshake_packet(&payload)?;

        self.id = handshake.connection_id();
        self.version = handshake
            .maria_db_server_version_parsed()
            .or_else(|| handshake.server_version_parsed())
            .unwrap_or((0, 0, 0));
        self.is_mariadb = handshake.maria_db_server_version_parsed().is_some()
            || handshake
                .server_version_str()
                .to_ascii_lowercase()
                .contains("mariadb");
        self.status = handshake.status_flags();
        self.nonce = handshake.nonce();
        self.auth_plugin = handshake
            .auth_plugin()
            .map(|plugin| plugin.clone().into_owned())
            .unwrap_or(AuthPlugin::MysqlNativePassword);

        let server_caps = handshake.capabilities();
        if !server_caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
            return Err(DriverError::ProtocolVersion { version: 9 }.into());
        }

        let mut caps = desired_capabilities(&self.opts) & server_caps;
        caps.insert(CapabilityFlags::CLIENT_PROTOCOL_41);

        // compression is negotiated against what the server offers
        if let Some((flag, algorithm)) = pick_compression(&self.opts, server_caps) {
            caps.insert(flag);
            self.compression = Some(algorithm);
        }

        // TLS requirements
        if self.opts.ssl_mode().use_ssl() {
            if server_caps.contains(CapabilityFlags::CLIENT_SSL) {
                caps.insert(CapabilityFlags::CLIENT_SSL);
            } else if !self.opts.ssl_mode().is_optional() {
                return Err(DriverError::NoServerSslSupport.into());
            }
        }

        self.capabilities = caps;
        self.collation = collation::client_collation_for_version(
            (
                self.version.0.min(255) as u8,
                self.version.1.min(255) as u8,
                self.version.2.min(255) as u8,
            ),
            self.is_mariadb,
        );

        Ok(())
    }

    async fn switch_to_ssl_if_needed(&mut self) -> Result<()> {
        if !self.capabilities.contains(CapabilityFlags::CLIENT_SSL) {
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or(DriverError::ConnectionClosed {
            expected: false,
        })?;
        if stream.is_secure() {
            return Ok(());
        }

        let request = SslRequest::new(self.capabilities, self.collation);
        stream.write_packet(request.into()).await?;

        let connector = tls::build_connector(self.opts.ssl_mode(), self.opts.ssl_opts())?;
        let name = tls::server_name(self.opts.ip_or_hostname())?;
        let stream = self
            .stream
            .take()
            .ok_or(DriverError::ConnectionClosed { expected: false })?;
        match stream.make_secure(&connector, name).await {
            Ok(secure) => {
                tracing::debug!("transport upgraded to TLS");
                self.stream = Some(secure);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn do_handshake_response(&mut self) -> Result<()> {
        let trusted = self
            .stream
            .as_ref()
            .map(NetStream::is_trusted)
            .unwrap_or(false);
        let auth_data = auth::first_auth_data(
            &self.auth_plugin,
            self.opts.pass(),
            &self.nonce,
            trusted,
        )?;

        let response = HandshakeResponse::new(
            auth_data.as_deref(),
            self.collation,
            self.opts.user(),
            self.opts.db_name(),
            &self.auth_plugin,
            self.capabilities,
            self.opts.connect_attrs(),
            Some(self.opts.zstd_compression_level()),
        );
        self.write_packet(response.into()).await
    }

    /// Authentication loop: handles AUTH_MORE_DATA continuations and
    /// CHANGE_AUTH_PLUGIN switches until the server's terminal OK.
    async fn continue_auth(&mut self) -> Result<()> {
        loop {
            let payload = self.read_packet().await?;
            let message =
                ServerMessage::parse(DecodeContext::Login, &payload, self.capabilities)?;
            match message {
                ServerMessage::Ok(ok, _) => {
                    let ok = ok.into_owned();
                    self.handle_ok(&ok);
                    return Ok(());
                }
                ServerMessage::Error(err) => return Err(err_packet_to_error(err)),
                ServerMessage::AuthSwitch(switch) => {
                    tracing::debug!(
                        plugin = %String::from_utf8_lossy(switch.auth_plugin().as_bytes()),
                        "switching authentication plugin"
                    );
                    self.auth_plugin = switch.auth_plugin().clone().into_owned();
                    self.nonce = switch.plugin_data().to_vec();
                    let trusted = self
                        .stream
                        .as_ref()
                        .map(NetStream::is_trusted)
                        .unwrap_or(false);
                    let data = auth::first_auth_data(
                        &self.auth_plugin,
                        self.opts.pass(),
                        &self.nonce,
                        trusted,
                    )?
                    .unwrap_or_default();
                    self.write_packet(data).await?;
                }
                ServerMessage::AuthMoreData(more) => {
                    let trusted = self
                        .stream
                        .as_ref()
                        .map(NetStream::is_trusted)
                        .unwrap_or(false);
                    let plugin = self.auth_plugin.clone();
                    let step = auth::auth_more_data_step(
                        &plugin,
                        more.data(),
                        self.opts.pass(),
                        &self.nonce,
                        trusted,
                    )?;
                    match step {
                        auth::AuthStep::Continue => continue,
                        auth::AuthStep::Respond(data) => self.write_packet(data).await?,
                    }
                }
                _ => {
                    return Err(DriverError::UnexpectedPacket {
                        context: "authentication phase",
                    }
                    .into())
                }
            }
        }
    }

    fn switch_to_compression(&mut self) {
        if let Some(algorithm) = self.compression {
            tracing::debug!(?algorithm, "compression enabled");
            if let Some(stream) = self.stream.as_mut() {
                stream.compress(algorithm);
            }
        }
    }

    /// Deferred session setup after a successful login.
    async fn run_session_init(&mut self) -> Result<()> {
        // the codec limit follows the server's setting
        if let Some((max,)) = self
            .query_first::<(u64,)>("SELECT @@max_allowed_packet")
            .await?
        {
            if let Some(stream) = self.stream.as_mut() {
                stream.codec_mut().max_allowed_packet = max as usize;
            }
        }

        if self.opts.create_database_if_not_exist() {
            if let Some(db_name) = self.opts.db_name().map(str::to_owned) {
                let quoted = quote_identifier(&db_name);
                self.query_drop(&format!("CREATE DATABASE IF NOT EXISTS {}", quoted))
                    .await?;
                self.query_drop(&format!("USE {}", quoted)).await?;
                self.schema = Some(db_name);
            }
        }

        self.resolve_time_zone().await?;

        let variables = self.session_init_variables();
        if !variables.is_empty() {
            self.query_drop(&format!("SET {}", variables.join(", ")))
                .await?;
        }

        Ok(())
    }

    /// Session variables applied at init: user-supplied ones, timeouts and
    /// the forced session time zone.
    fn session_init_variables(&self) -> Vec<String> {
        let mut variables: Vec<String> = self.opts.session_variables().to_vec();

        if let Some(timeout) = self.opts.statement_timeout() {
            if self.is_mariadb {
                variables.push(format!(
                    "max_statement_time={}",
                    timeout.as_secs_f64()
                ));
            } else if self.version >= (5, 7, 8) {
                variables.push(format!("max_execution_time={}", timeout.as_millis()));
            }
        }

        if let Some(timeout) = self.opts.lock_wait_timeout() {
            variables.push(format!(
                "innodb_lock_wait_timeout={}",
                timeout.as_secs()
            ));
        }

        if self.opts.force_time_zone_to_session() {
            if let Some(offset) = self.time_zone_offset {
                variables.push(format!("time_zone='{}'", format_offset(offset)));
            }
        }

        variables
    }

    async fn resolve_time_zone(&mut self) -> Result<()> {
        let policy = self.opts.time_zone().clone();
        self.time_zone_offset = match policy {
            TimeZonePolicy::Local => {
                use chrono::Offset;
                Some(chrono::Local::now().offset().fix())
            }
            TimeZonePolicy::Offset(offset) => Some(offset),
            TimeZonePolicy::Named(name) => {
                tracing::warn!(zone = %name, "named connection time zones resolve to UTC");
                None
            }
            TimeZonePolicy::Server => {
                let zones = self
                    .query_first::<(String, String)>("SELECT @@time_zone, @@system_time_zone")
                    .await?;
                match zones {
                    Some((tz, system)) => {
                        let spelled = if tz.eq_ignore_ascii_case("SYSTEM") {
                            system
                        } else {
                            tz
                        };
                        let offset = crate::opts::parse_fixed_offset(&spelled);
                        if offset.is_none() {
                            tracing::warn!(zone = %spelled, "server time zone is not a fixed offset");
                        }
                        offset
                    }
                    None => None,
                }
            }
        };
        Ok(())
    }

    // ===== context accessors =====

    /// Connection id assigned by the server.
    pub fn connection_id(&self) -> u32 {
        self.id
    }

    /// Parsed server version.
    pub fn server_version(&self) -> (u16, u16, u16) {
        self.version
    }

    /// Whether the peer identified itself as MariaDB.
    pub fn is_mariadb(&self) -> bool {
        self.is_mariadb
    }

    /// Negotiated capabilities (immutable after the handshake).
    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    /// Server status bits of the most recent OK/EOF.
    pub fn status(&self) -> StatusFlags {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: StatusFlags) {
        self.status = status;
    }

    /// Affected rows of the last statement.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Last insert id of the last statement (raw u64; reinterpret as
    /// unsigned for out-of-range `BIGINT UNSIGNED` columns).
    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    /// Warning count of the last statement.
    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Schema tracked through session-state changes.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Negotiated client collation id.
    pub fn collation(&self) -> u16 {
        self.collation
    }

    /// The connection's fixed-offset time zone, when known.
    pub fn time_zone_offset(&self) -> Option<FixedOffset> {
        self.time_zone_offset
    }

    pub(crate) fn opts(&self) -> &Opts {
        &self.opts
    }

    pub(crate) fn has_deprecate_eof(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    pub(crate) fn active_cursor_stmt(&self) -> Option<u32> {
        self.active_cursor
    }

    // ===== transport =====

    fn stream_mut(&mut self) -> Result<&mut NetStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| DriverError::ConnectionClosed { expected: false }.into())
    }

    fn register_if_fatal<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            if err.is_fatal() {
                self.stream = None;
                self.pending_result = None;
            }
        }
        result
    }

    pub(crate) async fn read_packet(&mut self) -> Result<Bytes> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.read_packet().await,
            None => Err(DriverError::ConnectionClosed { expected: false }.into()),
        };
        self.register_if_fatal(result)
    }

    pub(crate) async fn write_packet(&mut self, payload: Vec<u8>) -> Result<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => stream.write_packet(payload).await,
            None => Err(DriverError::ConnectionClosed { expected: false }.into()),
        };
        self.register_if_fatal(result)
    }

    /// Writes a command payload; every command starts a fresh envelope
    /// sequence.
    pub(crate) async fn write_command(&mut self, body: Vec<u8>) -> Result<()> {
        let result = match self.stream.as_mut() {
            Some(stream) => {
                stream.reset_seq_id();
                stream.write_packet(body).await
            }
            None => Err(DriverError::ConnectionClosed { expected: false }.into()),
        };
        self.register_if_fatal(result)
    }

    /// Applies an OK/EOF to the connection context. Status bits strictly
    /// replace the previous value.
    pub(crate) fn handle_ok(&mut self, ok: &OkPacket<'static>) {
        self.status = ok.status_flags();
        self.affected_rows = ok.affected_rows();
        self.last_insert_id = ok.last_insert_id();
        self.warnings = ok.warnings();

        if let Some(info) = ok.session_state_info() {
            if let Ok(change) = info.decode() {
                match change {
                    SessionStateChange::Schema(schema) => {
                        self.schema = Some(String::from_utf8_lossy(&schema).into_owned());
                    }
                    SessionStateChange::SystemVariable(name, value) => {
                        tracing::trace!(
                            name = %String::from_utf8_lossy(&name),
                            value = %String::from_utf8_lossy(&value),
                            "session variable changed"
                        );
                        if name.as_ref() == b"time_zone" {
                            let spelled = String::from_utf8_lossy(&value);
                            if let Some(offset) = crate::opts::parse_fixed_offset(&spelled) {
                                self.time_zone_offset = Some(offset);
                            }
                        }
                    }
                    SessionStateChange::IsTracked(_)
                    | SessionStateChange::UnknownLayout(_) => (),
                }
            }
        }
    }

    /// Starts a fresh exchange: drains whatever the previous one left on
    /// the wire, then flushes deferred statement closes.
    async fn start_exchange(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Err(DriverError::ConnectionClosed { expected: false }.into());
        }
        self.drain_pending().await?;
        self.flush_pending_stmt_close().await?;
        Ok(())
    }

    /// COM_STMT_CLOSE for evicted statement ids. The message has no
    /// response, so closes ride the exchange boundary.
    async fn flush_pending_stmt_close(&mut self) -> Result<()> {
        let batch_len = self.pending_stmt_close.len().min(STMT_CLOSE_FLUSH_LIMIT);
        if batch_len == 0 {
            return Ok(());
        }
        let batch: Vec<u32> = self.pending_stmt_close.drain(..batch_len).collect();
        for stmt_id in batch {
            tracing::debug!(stmt_id, "closing evicted prepared statement");
            self.write_command(ComStmtClose::new(stmt_id).into()).await?;
        }
        Ok(())
    }

    // ===== text protocol =====

    /// Runs a text-protocol statement and streams its result.
    pub async fn query_iter(&mut self, sql: &str) -> Result<QueryResult<'_, Text>> {
        self.start_exchange().await?;

        let mut body = Vec::with_capacity(1 + sql.len());
        body.push(Command::COM_QUERY as u8);
        body.extend_from_slice(sql.as_bytes());

        self.pending_result = Some(PendingResult::Head {
            is_binary: false,
            cursor_requested: false,
        });
        self.active_cursor = None;
        self.write_command(body).await?;

        let head = self
            .read_result_set_head(false, false, false)
            .await
            .map_err(|err| err.with_sql(sql))?;
        Ok(QueryResult::new(self, Arc::from(sql), head, 0))
    }

    /// Runs a text-protocol statement, discarding any results.
    pub async fn query_drop(&mut self, sql: &str) -> Result<()> {
        self.query_iter(sql).await?.drop_result().await
    }

    /// Runs a text-protocol statement and collects the first result set.
    pub async fn query<T: FromRow>(&mut self, sql: &str) -> Result<Vec<T>> {
        let mut result = self.query_iter(sql).await?;
        let rows = result.collect::<T>().await?;
        result.drop_result().await?;
        Ok(rows)
    }

    /// Runs a text-protocol statement and returns its first row, if any.
    pub async fn query_first<T: FromRow>(&mut self, sql: &str) -> Result<Option<T>> {
        let mut result = self.query_iter(sql).await?;
        let row = result.next().await?;
        result.drop_result().await?;
        match row {
            Some(row) => Ok(Some(from_row_opt(row)?)),
            None => Ok(None),
        }
    }

    // ===== server-prepared protocol =====

    /// Prepares `sql` (or reuses the cached statement).
    pub async fn prep(&mut self, sql: &str) -> Result<Arc<Statement>> {
        let (stmt, _, _) = self.get_or_prep(sql).await?;
        Ok(stmt)
    }

    async fn get_or_prep(
        &mut self,
        sql: &str,
    ) -> Result<(Arc<Statement>, bool, Arc<ParsedQuery>)> {
        let parsed = self.query_cache.parse(sql)?;

        if let Some(stmt) = self.stmt_cache.get_if_present(parsed.sql()) {
            return Ok((stmt, true, parsed));
        }

        let rewritten = parsed.sql().to_owned();
        let stmt = Arc::new(self.prepare_statement(&rewritten).await?);

        let mut evicted = Vec::new();
        let stored =
            self.stmt_cache
                .put_if_absent(parsed.sql(), stmt.clone(), |old| evicted.push(old.id()));
        self.pending_stmt_close.extend(evicted);

        Ok((stmt, stored, parsed))
    }

    /// COM_STMT_PREPARE exchange: PREPARED_OK plus parameter and column
    /// definition streams.
    async fn prepare_statement(&mut self, sql: &str) -> Result<Statement> {
        self.start_exchange().await?;

        let mut body = Vec::with_capacity(1 + sql.len());
        body.push(Command::COM_STMT_PREPARE as u8);
        body.extend_from_slice(sql.as_bytes());
        self.write_command(body).await?;

        let payload = self.read_packet().await?;
        let message =
            ServerMessage::parse(DecodeContext::PrepareQuery, &payload, self.capabilities)?;
        let packet = match message {
            ServerMessage::PreparedOk(packet) => packet,
            ServerMessage::Error(err) => {
                return Err(err_packet_to_error(err).with_sql(sql));
            }
            _ => {
                return Err(DriverError::UnexpectedPacket {
                    context: "prepare response",
                }
                .into())
            }
        };

        let params = if packet.num_params() > 0 {
            Some(
                self.read_metadata_bundle(
                    packet.num_params() as usize,
                    DecodeContext::PreparedMetadata,
                )
                .await?,
            )
        } else {
            None
        };
        let columns = if packet.num_columns() > 0 {
            Some(
                self.read_metadata_bundle(
                    packet.num_columns() as usize,
                    DecodeContext::PreparedMetadata,
                )
                .await?,
            )
        } else {
            None
        };

        Ok(Statement::new(
            packet.statement_id(),
            packet.num_params(),
            packet.num_columns(),
            params,
            columns,
        ))
    }

    /// Executes a server-prepared statement and streams its binary result.
    ///
    /// A configured fetch size opens a read-only cursor for statements that
    /// return rows; rows are then pulled with COM_STMT_FETCH.
    pub async fn exec_iter<P: Into<Params>>(
        &mut self,
        sql: &str,
        params: P,
    ) -> Result<QueryResult<'_, Binary>> {
        let params = params.into();
        let (stmt, cached, parsed) = self.get_or_prep(sql).await?;

        let params = parsed.positionalize(params)?;
        let values: Vec<Value> = match params {
            Params::Empty => Vec::new(),
            Params::Positional(values) => values.into_vec(),
            Params::Named(_) => unreachable!("positionalize resolves named params"),
        };

        if values.len() != stmt.num_params() as usize {
            return Err(DriverError::StmtParamsMismatch {
                required: stmt.num_params(),
                supplied: values.len(),
            }
            .into());
        }

        self.start_exchange().await?;

        let cursor_requested = self.opts.fetch_size() > 0 && stmt.num_columns() > 0;
        let builder = if cursor_requested {
            ComStmtExecuteRequestBuilder::with_cursor(
                stmt.id(),
                CursorType::CURSOR_TYPE_READ_ONLY,
            )
        } else {
            ComStmtExecuteRequestBuilder::new(stmt.id())
        };
        let (body, as_long_data) = builder.build(&values);

        if as_long_data {
            for (index, value) in values.iter().enumerate() {
                if let Value::Bytes(data) = value {
                    let message = ComStmtSendLongData::new(stmt.id(), index, data);
                    self.write_command(message.into()).await?;
                }
            }
        }

        self.pending_result = Some(PendingResult::Head {
            is_binary: true,
            cursor_requested,
        });
        self.active_cursor = cursor_requested.then(|| stmt.id());
        self.write_command(body).await?;

        if !cached {
            // not cached: close once this execute's response is consumed
            self.pending_stmt_close.push(stmt.id());
        }

        let fetch_size = self.opts.fetch_size();
        let head = self
            .read_result_set_head(true, cursor_requested, false)
            .await
            .map_err(|err| err.with_sql(sql))?;
        Ok(QueryResult::new(self, Arc::from(sql), head, fetch_size))
    }

    /// Executes a server-prepared statement, discarding any results.
    pub async fn exec_drop<P: Into<Params>>(&mut self, sql: &str, params: P) -> Result<()> {
        self.exec_iter(sql, params).await?.drop_result().await
    }

    /// Executes a server-prepared statement and collects the first result
    /// set.
    pub async fn exec<T: FromRow, P: Into<Params>>(
        &mut self,
        sql: &str,
        params: P,
    ) -> Result<Vec<T>> {
        let mut result = self.exec_iter(sql, params).await?;
        let rows = result.collect::<T>().await?;
        result.drop_result().await?;
        Ok(rows)
    }

    /// Executes a server-prepared statement and returns its first row.
    pub async fn exec_first<T: FromRow, P: Into<Params>>(
        &mut self,
        sql: &str,
        params: P,
    ) -> Result<Option<T>> {
        let mut result = self.exec_iter(sql, params).await?;
        let row = result.next().await?;
        result.drop_result().await?;
        match row {
            Some(row) => Ok(Some(from_row_opt(row)?)),
            None => Ok(None),
        }
    }

    /// Runs an INSERT and synthesizes the generated-keys row: one unsigned
    /// 64-bit column named `key_name` carrying the terminal OK's last
    /// insert id.
    pub async fn exec_insert<P: Into<Params>>(
        &mut self,
        sql: &str,
        params: P,
        key_name: &str,
    ) -> Result<Row> {
        self.exec_drop(sql, params).await?;
        let id = self.last_insert_id.unwrap_or(0);
        Ok(result::generated_keys_row(key_name, id))
    }

    /// Explicitly closes a prepared statement on the server.
    pub async fn close_stmt(&mut self, stmt: &Statement) -> Result<()> {
        self.start_exchange().await?;
        self.write_command(ComStmtClose::new(stmt.id()).into()).await
    }

    // ===== configured statement dispatch =====

    /// Runs a statement the way the configuration prescribes: through the
    /// server-prepared pipeline, or client-prepared (parameters inlined
    /// into the text protocol under the session escape rules).
    pub async fn run_drop<P: Into<Params>>(&mut self, sql: &str, params: P) -> Result<()> {
        if self.opts.use_server_prepare_statement() {
            self.exec_drop(sql, params).await
        } else {
            let interpolated = self.interpolate(sql, params.into())?;
            self.query_drop(&interpolated).await
        }
    }

    /// Like [`Conn::run_drop`], collecting the first result set.
    pub async fn run<T: FromRow, P: Into<Params>>(
        &mut self,
        sql: &str,
        params: P,
    ) -> Result<Vec<T>> {
        if self.opts.use_server_prepare_statement() {
            self.exec(sql, params).await
        } else {
            let interpolated = self.interpolate(sql, params.into())?;
            self.query(&interpolated).await
        }
    }

    /// Like [`Conn::run_drop`], returning the first row.
    pub async fn run_first<T: FromRow, P: Into<Params>>(
        &mut self,
        sql: &str,
        params: P,
    ) -> Result<Option<T>> {
        if self.opts.use_server_prepare_statement() {
            self.exec_first(sql, params).await
        } else {
            let interpolated = self.interpolate(sql, params.into())?;
            self.query_first(&interpolated).await
        }
    }

    fn interpolate(&mut self, sql: &str, params: Params) -> Result<String> {
        let parsed = self.query_cache.parse(sql)?;
        let params = parsed.positionalize(params)?;
        let values: Vec<Value> = match params {
            Params::Empty => Vec::new(),
            Params::Positional(values) => values.into_vec(),
            Params::Named(_) => unreachable!("positionalize resolves named params"),
        };

        if values.len() != parsed.param_count() {
            return Err(DriverError::StmtParamsMismatch {
                required: parsed.param_count() as u16,
                supplied: values.len(),
            }
            .into());
        }

        let no_backslash = self
            .status
            .contains(StatusFlags::SERVER_STATUS_NO_BACKSLASH_ESCAPES);
        Ok(parsed.interpolate(&values, no_backslash))
    }

    // ===== maintenance =====

    /// COM_PING round trip.
    pub async fn ping(&mut self) -> Result<()> {
        self.start_exchange().await?;
        self.write_command(vec![Command::COM_PING as u8]).await?;
        self.read_ok_response().await?;
        Ok(())
    }

    /// Resets the session: COM_RESET_CONNECTION where the server supports
    /// it, a change-user round trip otherwise. Server-side prepared
    /// statements do not survive either, so the cache is dropped.
    pub async fn reset(&mut self) -> Result<()> {
        let has_reset_command = if self.is_mariadb {
            self.version >= (10, 2, 4)
        } else {
            self.version >= (5, 7, 3)
        };

        if has_reset_command {
            self.start_exchange().await?;
            self.write_command(vec![Command::COM_RESET_CONNECTION as u8])
                .await?;
            self.read_ok_response().await?;
            self.forget_server_statements();
            Ok(())
        } else {
            self.change_user().await
        }
    }

    /// COM_CHANGE_USER re-authentication with the configured credentials.
    pub async fn change_user(&mut self) -> Result<()> {
        self.start_exchange().await?;

        let auth_data = self.auth_plugin.gen_data(self.opts.pass(), &self.nonce);
        let message = ComChangeUser::new(
            self.opts.user(),
            self.opts.db_name(),
            auth_data.as_deref(),
            self.collation,
            &self.auth_plugin,
            self.capabilities,
        );
        self.write_command(message.into()).await?;
        self.continue_auth().await?;
        self.forget_server_statements();
        Ok(())
    }

    fn forget_server_statements(&mut self) {
        // ids died with the session; nothing to close
        let _ = self.stmt_cache.clear();
        self.pending_stmt_close.clear();
        self.active_cursor = None;
    }

    async fn read_ok_response(&mut self) -> Result<OkPacket<'static>> {
        let payload = self.read_packet().await?;
        let message =
            ServerMessage::parse(DecodeContext::Command, &payload, self.capabilities)?;
        match message {
            ServerMessage::Ok(ok, _) => {
                let ok = ok.into_owned();
                self.handle_ok(&ok);
                Ok(ok)
            }
            ServerMessage::Error(err) => Err(err_packet_to_error(err)),
            _ => Err(DriverError::UnexpectedPacket {
                context: "OK response",
            }
            .into()),
        }
    }

    /// Graceful shutdown: drains, emits QUIT and closes the transport.
    pub async fn disconnect(mut self) -> Result<()> {
        let _ = self.drain_pending().await;
        let _ = self.flush_pending_stmt_close().await;
        if let Some(mut stream) = self.stream.take() {
            stream.reset_seq_id();
            let _ = stream.write_packet(vec![Command::COM_QUIT as u8]).await;
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

/// Capabilities this client asks for before intersecting with the server's.
fn desired_capabilities(opts: &Opts) -> CapabilityFlags {
    let mut flags = CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_MULTI_STATEMENTS
        | CapabilityFlags::CLIENT_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
        | CapabilityFlags::CLIENT_DEPRECATE_EOF
        | CapabilityFlags::CLIENT_SESSION_TRACK
        | CapabilityFlags::CLIENT_CONNECT_ATTRS
        | CapabilityFlags::CLIENT_PROGRESS_OBSOLETE
        | CapabilityFlags::MARIADB_CLIENT_PROGRESS;

    if opts.db_name().is_some() && !opts.create_database_if_not_exist() {
        flags.insert(CapabilityFlags::CLIENT_CONNECT_WITH_DB);
    }
    if opts.local_infile_path().is_some() {
        flags.insert(CapabilityFlags::CLIENT_LOCAL_FILES);
    }

    flags
}

/// Picks the compression algorithm: the client's preference list is walked
/// in order against what the server offers.
fn pick_compression(
    opts: &Opts,
    server_caps: CapabilityFlags,
) -> Option<(CapabilityFlags, Compression)> {
    for algorithm in opts.compression_algorithms() {
        match algorithm {
            CompressionAlgorithm::Zstd
                if server_caps
                    .contains(CapabilityFlags::CLIENT_ZSTD_COMPRESSION_ALGORITHM) =>
            {
                return Some((
                    CapabilityFlags::CLIENT_ZSTD_COMPRESSION_ALGORITHM,
                    Compression::Zstd {
                        level: opts.zstd_compression_level(),
                    },
                ));
            }
            CompressionAlgorithm::Zlib
                if server_caps.contains(CapabilityFlags::CLIENT_COMPRESS) =>
            {
                return Some((CapabilityFlags::CLIENT_COMPRESS, Compression::Zlib));
            }
            CompressionAlgorithm::Uncompressed => return None,
            _ => continue,
        }
    }
    None
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn format_offset(offset: FixedOffset) -> String {
    let total = offset.local_minus_utc();
    let sign = if total < 0 { '-' } else { '+' };
    let total = total.abs();
    format!("{}{:02}:{:02}", sign, total / 3600, (total % 3600) / 60)
}

/// A connection shared between tasks.
///
/// Submissions are totally ordered by enqueue time; one exchange runs at a
/// time and a cancelled submission never stalls the ones behind it. Fatal
/// errors dispose the queue, failing queued and future submissions with
/// "connection closed".
#[derive(Debug, Clone)]
pub struct SharedConn {
    queue: RequestQueue<Conn>,
}

impl SharedConn {
    /// Wraps an established connection.
    pub fn new(conn: Conn) -> SharedConn {
        SharedConn {
            queue: RequestQueue::new(conn),
        }
    }

    /// Connects and wraps the connection.
    pub async fn connect(opts: Opts) -> Result<SharedConn> {
        Ok(SharedConn::new(Conn::new(opts).await?))
    }

    fn finish<T>(guard: queue::Exchange<Conn>, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            if err.is_fatal() {
                drop(guard.dispose());
                return result;
            }
        }
        drop(guard);
        result
    }

    pub async fn ping(&self) -> Result<()> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.ping().await;
        Self::finish(guard, result)
    }

    pub async fn query_drop(&self, sql: &str) -> Result<()> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.query_drop(sql).await;
        Self::finish(guard, result)
    }

    pub async fn query<T: FromRow>(&self, sql: &str) -> Result<Vec<T>> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.query(sql).await;
        Self::finish(guard, result)
    }

    pub async fn query_first<T: FromRow>(&self, sql: &str) -> Result<Option<T>> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.query_first(sql).await;
        Self::finish(guard, result)
    }

    pub async fn exec_drop<P: Into<Params>>(&self, sql: &str, params: P) -> Result<()> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.exec_drop(sql, params).await;
        Self::finish(guard, result)
    }

    pub async fn exec<T: FromRow, P: Into<Params>>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<T>> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.exec(sql, params).await;
        Self::finish(guard, result)
    }

    pub async fn exec_first<T: FromRow, P: Into<Params>>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Option<T>> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.exec_first(sql, params).await;
        Self::finish(guard, result)
    }

    pub async fn exec_insert<P: Into<Params>>(
        &self,
        sql: &str,
        params: P,
        key_name: &str,
    ) -> Result<Row> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.exec_insert(sql, params, key_name).await;
        Self::finish(guard, result)
    }

    pub async fn run_drop<P: Into<Params>>(&self, sql: &str, params: P) -> Result<()> {
        let mut guard = self.queue.acquire().await?;
        let result = guard.run_drop(sql, params).await;
        Self::finish(guard, result)
    }

    /// Orderly shutdown: waits for its turn, emits QUIT, fails queued and
    /// future submissions with an expected close.
    pub async fn close(&self) -> Result<()> {
        let guard = self.queue.acquire().await?;
        let conn = guard.dispose();
        conn.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opts::OptsBuilder;

    #[test]
    fn desired_capabilities_should_follow_opts() {
        let opts = OptsBuilder::new()
            .db_name(Some("test"))
            .into_opts();
        let flags = desired_capabilities(&opts);
        assert!(flags.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert!(!flags.contains(CapabilityFlags::CLIENT_LOCAL_FILES));

        let opts = OptsBuilder::new()
            .db_name(Some("test"))
            .create_database_if_not_exist(true)
            .local_infile_path(Some("/data/imports".into()))
            .into_opts();
        let flags = desired_capabilities(&opts);
        // the database is created and selected after login instead
        assert!(!flags.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert!(flags.contains(CapabilityFlags::CLIENT_LOCAL_FILES));
    }

    #[test]
    fn compression_should_follow_preference_order() {
        let server = CapabilityFlags::CLIENT_COMPRESS
            | CapabilityFlags::CLIENT_ZSTD_COMPRESSION_ALGORITHM;

        let opts = OptsBuilder::new()
            .compression_algorithms(vec![
                CompressionAlgorithm::Zstd,
                CompressionAlgorithm::Zlib,
            ])
            .zstd_compression_level(7)
            .into_opts();
        assert_eq!(
            pick_compression(&opts, server),
            Some((
                CapabilityFlags::CLIENT_ZSTD_COMPRESSION_ALGORITHM,
                Compression::Zstd { level: 7 }
            ))
        );

        // server without zstd falls through to zlib
        assert_eq!(
            pick_compression(&opts, CapabilityFlags::CLIENT_COMPRESS),
            Some((CapabilityFlags::CLIENT_COMPRESS, Compression::Zlib))
        );

        // default is uncompressed
        let opts = OptsBuilder::new().into_opts();
        assert_eq!(pick_compression(&opts, server), None);
    }

    #[test]
    fn identifiers_should_be_quoted() {
        assert_eq!(quote_identifier("app"), "`app`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn offsets_should_format_as_session_time_zone() {
        assert_eq!(
            format_offset(FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap()),
            "+05:30"
        );
        assert_eq!(
            format_offset(FixedOffset::west_opt(8 * 3600).unwrap()),
            "-08:00"
        );
    }
}
