// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Result streaming.
//!
//! A statement's response is read lazily through [`QueryResult`]. An
//! abandoned result leaves a pending marker on the connection, and the next
//! exchange first drains the remaining frames of the previous one, so a
//! cancelled statement can never corrupt the stream or stall the queue.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::constants::{ColumnFlags, ColumnType, StatusFlags};
use crate::conn::Conn;
use crate::error::{DriverError, Error, Result, ServerError};
use crate::local_infile::LocalInfile;
use crate::opts::ZeroDateBehavior;
use crate::packets::{Column, ComStmtFetch, ErrPacket, OkPacket, ServerMessage};
use crate::proto::{Binary, DecodeContext, Text};
use crate::row::{new_row, Row};
use crate::value::convert::FromValueError;
use crate::value::{read_bin_values, read_text_values, ServerSide, Value};

const DRAIN_FETCH_SIZE: u32 = 256;

/// Response state the connection still has on the wire.
///
/// Set before a command is written, refined as the response is consumed, and
/// cleared when the terminal frame of the exchange is observed. Whatever is
/// left here when a result is dropped gets drained before the next exchange.
#[derive(Debug, Clone)]
pub(crate) enum PendingResult {
    /// Command written; the response head was not read yet.
    Head {
        is_binary: bool,
        cursor_requested: bool,
    },
    /// Inside a row stream.
    Stream {
        columns: Arc<[Column]>,
        is_binary: bool,
    },
    /// A read-only cursor is open; rows are pulled with COM_STMT_FETCH.
    Cursor {
        stmt_id: u32,
        columns: Arc<[Column]>,
    },
}

/// Outcome of reading a response head.
#[derive(Debug)]
pub(crate) enum ResultSetHead {
    /// No result set.
    Done(OkPacket<'static>),
    /// A result set with the given metadata bundle; `true` when a cursor
    /// was opened instead of a row stream.
    Columns(Arc<[Column]>, bool),
}

enum RowOrTerminal {
    Row(Vec<Value>),
    Terminal(OkPacket<'static>),
}

fn server_error(code: u16, state: [u8; 5], message: &[u8]) -> Error {
    Error::Server(ServerError {
        code,
        state: String::from_utf8_lossy(&state).into_owned(),
        message: String::from_utf8_lossy(message).into_owned(),
        sql: None,
    })
}

pub(crate) fn err_packet_to_error(err: ErrPacket<'_>) -> Error {
    match err {
        ErrPacket::Error(code, state, message) => server_error(code, state, message.as_ref()),
        ErrPacket::Progress(report) => Error::Server(ServerError {
            code: 0xFFFF,
            state: "HY000".into(),
            message: report.to_string(),
            sql: None,
        }),
    }
}

impl Conn {
    /// Reads the head of a statement response: OK, LOCAL INFILE request, or
    /// a column metadata bundle.
    ///
    /// With `drain` set, LOCAL INFILE requests are refused with an empty
    /// data stream (the file policy belongs to the abandoned exchange).
    pub(crate) async fn read_result_set_head(
        &mut self,
        is_binary: bool,
        cursor_requested: bool,
        drain: bool,
    ) -> Result<ResultSetHead> {
        loop {
            let payload = self.read_packet().await?;
            let message =
                ServerMessage::parse(DecodeContext::Command, &payload, self.capabilities())?;

            match message {
                ServerMessage::Ok(ok, _) => {
                    let ok = ok.into_owned();
                    self.handle_ok(&ok);
                    self.pending_result = if ok
                        .status_flags()
                        .contains(StatusFlags::SERVER_MORE_RESULTS_EXISTS)
                    {
                        Some(PendingResult::Head {
                            is_binary,
                            cursor_requested: false,
                        })
                    } else {
                        None
                    };
                    return Ok(ResultSetHead::Done(ok));
                }
                ServerMessage::Error(err) => {
                    if err.is_progress_report() {
                        tracing::debug!(report = %err.progress_report(), "progress");
                        continue;
                    }
                    self.pending_result = None;
                    return Err(err_packet_to_error(err));
                }
                ServerMessage::LocalInfile(request) => {
                    let file_name = request.file_name_str().into_owned();
                    let outcome = self.handle_local_infile(&file_name, drain).await?;
                    self.pending_result = None;
                    return match outcome {
                        Ok(ok) => Ok(ResultSetHead::Done(ok)),
                        Err(statement_err) => Err(statement_err),
                    };
                }
                ServerMessage::ColumnCount(count) => {
                    let columns = self
                        .read_metadata_bundle(count as usize, DecodeContext::ResultMetadata)
                        .await?;
                    let cursor_open = if cursor_requested {
                        self.cursor_was_opened().await?
                    } else {
                        false
                    };
                    return Ok(ResultSetHead::Columns(columns, cursor_open));
                }
                _ => {
                    self.pending_result = None;
                    return Err(DriverError::UnexpectedPacket {
                        context: "statement response head",
                    }
                    .into());
                }
            }
        }
    }

    /// Reads `count` column definitions and the metadata terminator when the
    /// protocol still has one, emitting the bundle.
    ///
    /// `ctx` distinguishes result-set metadata from prepared-statement
    /// parameter/column definition streams.
    pub(crate) async fn read_metadata_bundle(
        &mut self,
        count: usize,
        ctx: DecodeContext,
    ) -> Result<Arc<[Column]>> {
        let mut columns = Vec::with_capacity(count.min(1024));
        while columns.len() < count {
            let payload = self.read_packet().await?;
            let message = ServerMessage::parse(ctx, &payload, self.capabilities())?;
            match message {
                ServerMessage::Column(column) => columns.push(column),
                ServerMessage::Error(err) => return Err(err_packet_to_error(err)),
                _ => {
                    return Err(DriverError::UnexpectedPacket {
                        context: "column metadata stream",
                    }
                    .into())
                }
            }
        }

        // Without deprecate-EOF the bundle is terminated explicitly.
        if !self.has_deprecate_eof() {
            let payload = self.read_packet().await?;
            let message = ServerMessage::parse(ctx, &payload, self.capabilities())?;
            match message {
                ServerMessage::Ok(eof, _) => {
                    self.set_status(eof.status_flags());
                }
                ServerMessage::Error(err) => return Err(err_packet_to_error(err)),
                _ => {
                    return Err(DriverError::UnexpectedPacket {
                        context: "metadata terminator",
                    }
                    .into())
                }
            }
        }

        Ok(columns.into())
    }

    /// After a cursor-requesting execute, the server answers the metadata
    /// with a status-only terminal instead of rows when it opened the
    /// cursor.
    async fn cursor_was_opened(&mut self) -> Result<bool> {
        if !self.has_deprecate_eof() {
            // the metadata EOF already carried the status
            return Ok(self
                .status()
                .contains(StatusFlags::SERVER_STATUS_CURSOR_EXISTS));
        }

        let payload = self.read_packet().await?;
        let message = ServerMessage::parse(DecodeContext::Result, &payload, self.capabilities())?;
        match message {
            ServerMessage::Ok(ok, _) => {
                let ok = ok.into_owned();
                self.handle_ok(&ok);
                Ok(ok
                    .status_flags()
                    .contains(StatusFlags::SERVER_STATUS_CURSOR_EXISTS))
            }
            ServerMessage::Error(err) => Err(err_packet_to_error(err)),
            _ => Err(DriverError::UnexpectedPacket {
                context: "cursor open status",
            }
            .into()),
        }
    }

    /// Streams the requested file (or an empty refusal) and reads the final
    /// response of the upload.
    ///
    /// The data stream always ends with a zero-length payload. Returns the
    /// statement-level outcome: `Ok(ok)` on success, `Err(..)` when the path
    /// was refused (the exchange itself still completed, so the connection
    /// remains usable).
    async fn handle_local_infile(
        &mut self,
        file_name: &str,
        drain: bool,
    ) -> Result<std::result::Result<OkPacket<'static>, Error>> {
        let statement_error: Option<Error> = if drain {
            Some(
                DriverError::LocalInfileDenied {
                    path: file_name.into(),
                }
                .into(),
            )
        } else {
            let root = self.opts().local_infile_path().cloned();
            let buffer_size = self.opts().local_infile_buffer_size();
            match LocalInfile::open(root.as_deref(), file_name, buffer_size).await {
                Ok(mut infile) => {
                    let mut failure = None;
                    loop {
                        match infile.next_chunk().await {
                            Ok(Some(chunk)) => {
                                let chunk = chunk.to_vec();
                                self.write_packet(chunk).await?;
                            }
                            Ok(None) => break,
                            Err(err) => {
                                // abort the upload; the terminator below
                                // still completes the exchange
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                    failure
                }
                Err(err) => {
                    tracing::warn!(path = file_name, "refused LOCAL INFILE request");
                    Some(err)
                }
            }
        };

        // terminating empty payload
        self.write_packet(Vec::new()).await?;

        let payload = self.read_packet().await?;
        let message = ServerMessage::parse(DecodeContext::Command, &payload, self.capabilities())?;
        let server_outcome = match message {
            ServerMessage::Ok(ok, _) => {
                let ok = ok.into_owned();
                self.handle_ok(&ok);
                Ok(ok)
            }
            ServerMessage::Error(err) => Err(err_packet_to_error(err)),
            _ => {
                return Err(DriverError::UnexpectedPacket {
                    context: "LOCAL INFILE response",
                }
                .into())
            }
        };

        match statement_error {
            // the driver-side refusal wins over whatever the server said
            Some(err) => Ok(Err(err)),
            None => Ok(server_outcome),
        }
    }

    /// Reads one row frame (or the terminal) of the active result set.
    /// MariaDB progress reports inside the stream are logged and skipped.
    async fn read_row_frame(
        &mut self,
        columns: &Arc<[Column]>,
        is_binary: bool,
        fetching: bool,
    ) -> Result<RowOrTerminal> {
        let ctx = if fetching {
            DecodeContext::Fetch
        } else {
            DecodeContext::Result
        };
        loop {
            let payload = self.read_packet().await?;
            let message = ServerMessage::parse(ctx, &payload, self.capabilities())?;
            match message {
                ServerMessage::Row(row_payload) => {
                    let mut values = if is_binary {
                        read_bin_values::<ServerSide>(row_payload, columns)?
                    } else {
                        read_text_values(row_payload, columns.len())?
                    };
                    self.apply_column_policies(&mut values, columns)?;
                    return Ok(RowOrTerminal::Row(values));
                }
                ServerMessage::Ok(ok, _) => {
                    let ok = ok.into_owned();
                    self.handle_ok(&ok);
                    return Ok(RowOrTerminal::Terminal(ok));
                }
                ServerMessage::Error(err) => {
                    if err.is_progress_report() {
                        tracing::debug!(report = %err.progress_report(), "progress");
                        continue;
                    }
                    return Err(err_packet_to_error(err));
                }
                _ => {
                    return Err(DriverError::UnexpectedPacket {
                        context: "row stream",
                    }
                    .into())
                }
            }
        }
    }

    /// Zero-date policy, TINYINT(1) and instant handling for decoded values.
    fn apply_column_policies(&self, values: &mut [Value], columns: &[Column]) -> Result<()> {
        let zero_date = self.opts().zero_date();
        let tiny1_is_bit = self.opts().tiny_int1_is_bit();
        let rebase_offset = if self.opts().preserve_instants() {
            self.time_zone_offset()
        } else {
            None
        };

        for (value, column) in values.iter_mut().zip(columns.iter()) {
            if value.is_zero_date() {
                match zero_date {
                    ZeroDateBehavior::UseNull => *value = Value::NULL,
                    ZeroDateBehavior::UseRound => {
                        let round = match *value {
                            Value::Date(_, _, _, h, i, s, u) => Value::Date(1, 1, 1, h, i, s, u),
                            _ => Value::round_date(),
                        };
                        *value = round;
                    }
                    ZeroDateBehavior::Exception => {
                        return Err(FromValueError(value.clone()).into());
                    }
                }
            }

            if tiny1_is_bit
                && column.column_type() == ColumnType::MYSQL_TYPE_TINY
                && column.column_length() == 1
                && !column.flags().contains(ColumnFlags::ZEROFILL_FLAG)
            {
                match *value {
                    Value::Int(x) => *value = Value::Int(i64::from(x != 0)),
                    Value::Bytes(ref bytes) => {
                        let truthy = bytes != b"0";
                        *value = Value::Int(i64::from(truthy));
                    }
                    _ => (),
                }
            }

            // TIMESTAMP columns carry instants expressed in the connection
            // zone; rebase them to UTC when instants must be preserved.
            if column.column_type() == ColumnType::MYSQL_TYPE_TIMESTAMP {
                if let Some(offset) = rebase_offset {
                    if let Value::Date(y, m, d, h, i, s, u) = *value {
                        if let Some(rebased) = rebase_to_utc(y, m, d, h, i, s, u, offset) {
                            *value = rebased;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Pulls the remaining frames of an abandoned exchange, releasing the
    /// payloads, until its terminal frame is observed. Only then may the
    /// next exchange start reading.
    pub(crate) async fn drain_pending(&mut self) -> Result<()> {
        while let Some(pending) = self.pending_result.take() {
            match pending {
                PendingResult::Head {
                    is_binary,
                    cursor_requested,
                } => {
                    match self
                        .read_result_set_head(is_binary, cursor_requested, true)
                        .await
                    {
                        Ok(ResultSetHead::Done(_)) => (),
                        Ok(ResultSetHead::Columns(columns, cursor_open)) => {
                            self.pending_result = Some(if cursor_open {
                                PendingResult::Cursor {
                                    stmt_id: self.active_cursor_stmt().unwrap_or(0),
                                    columns,
                                }
                            } else {
                                PendingResult::Stream { columns, is_binary }
                            });
                        }
                        // a server error terminates the abandoned exchange
                        Err(Error::Server(_)) | Err(Error::Driver(DriverError::LocalInfileDenied { .. })) => (),
                        Err(err) => return Err(err),
                    }
                }
                PendingResult::Stream { columns, is_binary } => loop {
                    match self.read_row_frame(&columns, is_binary, false).await {
                        Ok(RowOrTerminal::Row(_)) => continue,
                        Ok(RowOrTerminal::Terminal(ok)) => {
                            if ok
                                .status_flags()
                                .contains(StatusFlags::SERVER_MORE_RESULTS_EXISTS)
                            {
                                self.pending_result = Some(PendingResult::Head {
                                    is_binary,
                                    cursor_requested: false,
                                });
                            }
                            break;
                        }
                        Err(Error::Server(_)) => break,
                        Err(err) => return Err(err),
                    }
                },
                PendingResult::Cursor { stmt_id, columns } => {
                    while !self
                        .status()
                        .contains(StatusFlags::SERVER_STATUS_LAST_ROW_SENT)
                    {
                        self.write_command(ComStmtFetch::new(stmt_id, DRAIN_FETCH_SIZE).into())
                            .await?;
                        loop {
                            match self.read_row_frame(&columns, true, true).await {
                                Ok(RowOrTerminal::Row(_)) => continue,
                                Ok(RowOrTerminal::Terminal(_)) => break,
                                Err(Error::Server(_)) => {
                                    // the cursor is gone; nothing left to pull
                                    self.set_status(
                                        self.status() | StatusFlags::SERVER_STATUS_LAST_ROW_SENT,
                                    );
                                    break;
                                }
                                Err(err) => return Err(err),
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// State of the active result set inside a [`QueryResult`].
#[derive(Debug)]
enum SetState {
    /// Rows are streamed inline.
    Stream,
    /// Rows are pulled through a read-only cursor.
    Cursor { stmt_id: u32, in_batch: bool },
    /// The current set is fully read.
    Done,
}

fn apply_head<P: Protocol>(
    conn: &mut Conn,
    head: ResultSetHead,
) -> (Option<Arc<[Column]>>, SetState, Option<OkPacket<'static>>) {
    match head {
        ResultSetHead::Done(ok) => (None, SetState::Done, Some(ok)),
        ResultSetHead::Columns(columns, cursor_open) => {
            let state = if cursor_open {
                let stmt_id = conn.active_cursor_stmt().unwrap_or(0);
                conn.pending_result = Some(PendingResult::Cursor {
                    stmt_id,
                    columns: columns.clone(),
                });
                SetState::Cursor {
                    stmt_id,
                    in_batch: false,
                }
            } else {
                conn.pending_result = Some(PendingResult::Stream {
                    columns: columns.clone(),
                    is_binary: P::IS_BINARY,
                });
                SetState::Stream
            };
            (Some(columns), state, None)
        }
    }
}

/// Streamed result of a statement.
///
/// `P` is the protocol marker ([`Text`] or [`Binary`]) and decides the row
/// encoding. Rows are pulled with [`QueryResult::next`]; dropping the value
/// early leaves the remaining frames to be drained before the next exchange.
#[derive(Debug)]
#[must_use = "QueryResult must be consumed or dropped to release the connection"]
pub struct QueryResult<'a, P> {
    conn: &'a mut Conn,
    sql: Arc<str>,
    columns: Option<Arc<[Column]>>,
    state: SetState,
    ok: Option<OkPacket<'static>>,
    fetch_size: u32,
    marker: PhantomData<P>,
}

impl<'a, P: Protocol> QueryResult<'a, P> {
    pub(crate) fn new(
        conn: &'a mut Conn,
        sql: Arc<str>,
        head: ResultSetHead,
        fetch_size: u32,
    ) -> QueryResult<'a, P> {
        let (columns, state, ok) = apply_head::<P>(conn, head);
        QueryResult {
            conn,
            sql,
            columns,
            state,
            ok,
            fetch_size,
            marker: PhantomData,
        }
    }

    /// Columns of the current result set; `None` when the current set has
    /// no rows (e.g. an `INSERT`).
    pub fn columns(&self) -> Option<Arc<[Column]>> {
        self.columns.clone()
    }

    /// Affected rows reported by the terminal OK of the current set.
    pub fn affected_rows(&self) -> u64 {
        self.ok.as_ref().map(OkPacket::affected_rows).unwrap_or(0)
    }

    /// Last insert id reported by the terminal OK of the current set.
    ///
    /// The raw u64 is preserved; out-of-range `BIGINT UNSIGNED` ids must be
    /// reinterpreted as unsigned by the caller.
    pub fn last_insert_id(&self) -> Option<u64> {
        self.ok.as_ref().and_then(OkPacket::last_insert_id)
    }

    /// Warning count of the current set.
    pub fn warnings(&self) -> u16 {
        self.ok.as_ref().map(OkPacket::warnings).unwrap_or(0)
    }

    /// Whether the server announced another result set after this one.
    pub fn more_results_exists(&self) -> bool {
        self.conn
            .status()
            .contains(StatusFlags::SERVER_MORE_RESULTS_EXISTS)
            || matches!(self.conn.pending_result, Some(PendingResult::Head { .. }))
    }

    /// Next row of the current result set.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            match self.state {
                SetState::Done => return Ok(None),
                SetState::Stream => {
                    let columns = self.columns.clone().expect("stream state has columns");
                    match self
                        .conn
                        .read_row_frame(&columns, P::IS_BINARY, false)
                        .await
                    {
                        Ok(RowOrTerminal::Row(values)) => {
                            return Ok(Some(new_row(values, columns)))
                        }
                        Ok(RowOrTerminal::Terminal(ok)) => {
                            self.finish_set(ok);
                            return Ok(None);
                        }
                        Err(err) => {
                            self.state = SetState::Done;
                            self.conn.pending_result = None;
                            return Err(err.with_sql(&self.sql));
                        }
                    }
                }
                SetState::Cursor { stmt_id, in_batch } => {
                    if !in_batch {
                        if self
                            .conn
                            .status()
                            .contains(StatusFlags::SERVER_STATUS_LAST_ROW_SENT)
                        {
                            self.finish_set(empty_ok());
                            return Ok(None);
                        }
                        let fetch = ComStmtFetch::new(stmt_id, self.fetch_size.max(1));
                        if let Err(err) = self.conn.write_command(fetch.into()).await {
                            self.state = SetState::Done;
                            return Err(err.with_sql(&self.sql));
                        }
                        self.state = SetState::Cursor {
                            stmt_id,
                            in_batch: true,
                        };
                        continue;
                    }

                    let columns = self.columns.clone().expect("cursor state has columns");
                    match self.conn.read_row_frame(&columns, true, true).await {
                        Ok(RowOrTerminal::Row(values)) => {
                            return Ok(Some(new_row(values, columns)))
                        }
                        Ok(RowOrTerminal::Terminal(ok)) => {
                            if ok
                                .status_flags()
                                .contains(StatusFlags::SERVER_STATUS_LAST_ROW_SENT)
                            {
                                self.finish_set(ok);
                                return Ok(None);
                            }
                            // batch exhausted; the next call fetches more
                            self.state = SetState::Cursor {
                                stmt_id,
                                in_batch: false,
                            };
                            continue;
                        }
                        Err(err) => {
                            self.state = SetState::Done;
                            self.conn.pending_result = None;
                            return Err(err.with_sql(&self.sql));
                        }
                    }
                }
            }
        }
    }

    fn finish_set(&mut self, ok: OkPacket<'static>) {
        let more = ok
            .status_flags()
            .contains(StatusFlags::SERVER_MORE_RESULTS_EXISTS);
        self.ok = Some(ok);
        self.state = SetState::Done;
        self.conn.pending_result = if more {
            Some(PendingResult::Head {
                is_binary: P::IS_BINARY,
                cursor_requested: false,
            })
        } else {
            None
        };
    }

    /// Advances to the next result set of a multi-statement response.
    ///
    /// Returns `false` when there is none. The current set is drained first.
    pub async fn next_set(&mut self) -> Result<bool> {
        // exhaust the current set
        while self.next().await?.is_some() {}

        if !matches!(self.conn.pending_result, Some(PendingResult::Head { .. })) {
            return Ok(false);
        }

        self.conn.pending_result = None;
        match self
            .conn
            .read_result_set_head(P::IS_BINARY, false, false)
            .await
        {
            Ok(head) => {
                let (columns, state, ok) = apply_head::<P>(self.conn, head);
                self.columns = columns;
                self.state = state;
                self.ok = ok;
                Ok(true)
            }
            Err(err) => Err(err.with_sql(&self.sql)),
        }
    }

    /// Collects the rows of the current set.
    pub async fn collect<T>(&mut self) -> Result<Vec<T>>
    where
        T: crate::row::convert::FromRow,
    {
        let mut acc = Vec::new();
        while let Some(row) = self.next().await? {
            acc.push(crate::row::convert::from_row_opt(row)?);
        }
        Ok(acc)
    }

    /// Applies `f` to every row of the current set.
    pub async fn for_each<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Row),
    {
        while let Some(row) = self.next().await? {
            f(row);
        }
        Ok(())
    }

    /// Drains every remaining set of this result.
    pub async fn drop_result(mut self) -> Result<()> {
        loop {
            while self.next().await?.is_some() {}
            if !self.next_set().await? {
                return Ok(());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn rebase_to_utc(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
    micros: u32,
    offset: chrono::FixedOffset,
) -> Option<Value> {
    use chrono::{Datelike, NaiveDate, Timelike};

    let local = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))?
        .and_hms_micro_opt(
            u32::from(hour),
            u32::from(minute),
            u32::from(second),
            micros,
        )?;
    let utc = local - chrono::Duration::seconds(i64::from(offset.local_minus_utc()));
    let year = u16::try_from(utc.year()).ok()?;
    Some(Value::Date(
        year,
        utc.month() as u8,
        utc.day() as u8,
        utc.hour() as u8,
        utc.minute() as u8,
        utc.second() as u8,
        utc.and_utc().timestamp_subsec_micros(),
    ))
}

fn empty_ok() -> OkPacket<'static> {
    crate::packets::parse_ok_packet(
        b"\x00\x00\x00\x00\x00\x00\x00",
        crate::constants::CapabilityFlags::CLIENT_PROTOCOL_41,
        crate::packets::OkPacketKind::Other,
    )
    .expect("static OK payload is valid")
    .into_owned()
}

/// Protocol marker glue for result decoding.
pub trait Protocol: Send + Sync + 'static {
    const IS_BINARY: bool;
}

impl Protocol for Text {
    const IS_BINARY: bool = false;
}

impl Protocol for Binary {
    const IS_BINARY: bool = true;
}

/// Builds the synthetic single-row result that carries a generated key.
pub(crate) fn generated_keys_row(key_name: &str, last_insert_id: u64) -> Row {
    let column = Column::synthesize(
        key_name,
        ColumnType::MYSQL_TYPE_LONGLONG,
        ColumnFlags::UNSIGNED_FLAG | ColumnFlags::NOT_NULL_FLAG,
    );
    let columns: Arc<[Column]> = vec![column].into();
    new_row(vec![Value::UInt(last_insert_id)], columns)
}
