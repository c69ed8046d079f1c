// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Parsers and serializers for the MySql protocol messages.
//!
//! Server messages borrow from the assembled payload (`Cow` fields) and can
//! be detached with `into_owned`. Interpretation of a payload depends on the
//! exchange phase, so [`ServerMessage::parse`] dispatches on an explicit
//! [`DecodeContext`].

use byteorder::{ByteOrder, LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use lexical::parse;
use regex::bytes::Regex;

use std::borrow::Cow;
use std::cmp::max;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::io;
use std::marker::PhantomData;

use crate::constants::{
    CapabilityFlags, ColumnFlags, ColumnType, Command, CursorType, SessionStateType, StatusFlags,
    MAX_PAYLOAD_LEN,
};
use crate::io::{ReadMysqlExt, WriteMysqlExt};
use crate::misc::lenenc_str_len;
use crate::proto::DecodeContext;
use crate::value::{ClientSide, SerializationSide, Value};

macro_rules! get_offset_and_len {
    ($buffer:expr, $slice:expr) => {{
        let val = $slice;
        (val.as_ptr() as usize - $buffer.as_ptr() as usize, val.len())
    }};
}

lazy_static::lazy_static! {
    static ref MARIADB_VERSION_RE: Regex =
        Regex::new(r"^5.5.5-(\d{1,2})\.(\d{1,2})\.(\d{1,3})-MariaDB").unwrap();
    static ref VERSION_RE: Regex = Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{1,3})(.*)").unwrap();
}

/// Represents MySql Column (column packet).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Column {
    payload: Vec<u8>,
    schema: (usize, usize),
    table: (usize, usize),
    org_table: (usize, usize),
    name: (usize, usize),
    org_name: (usize, usize),
    column_length: u32,
    character_set: u16,
    flags: ColumnFlags,
    column_type: ColumnType,
    decimals: u8,
}

/// Converts column-packet payload to an instance of `Column` structure.
pub fn column_from_payload(payload: Vec<u8>) -> io::Result<Column> {
    Column::from_payload(payload)
}

impl Column {
    /// Converts column-packet payload to an instance of `Column` structure.
    fn from_payload(payload: Vec<u8>) -> io::Result<Column> {
        let schema;
        let table;
        let org_table;
        let name;
        let org_name;
        let character_set;
        let column_length;
        let column_type;
        let flags;
        let decimals;

        {
            // Skip "def"
            let mut reader = payload
                .get(4..)
                .ok_or_else(crate::misc::unexpected_buf_eof)?;
            schema = get_offset_and_len!(payload, read_lenenc_str!(&mut reader)?);
            table = get_offset_and_len!(payload, read_lenenc_str!(&mut reader)?);
            org_table = get_offset_and_len!(payload, read_lenenc_str!(&mut reader)?);
            name = get_offset_and_len!(payload, read_lenenc_str!(&mut reader)?);
            org_name = get_offset_and_len!(payload, read_lenenc_str!(&mut reader)?);
            reader = reader
                .get(1..)
                .ok_or_else(crate::misc::unexpected_buf_eof)?;
            character_set = reader.read_u16::<LE>()?;
            column_length = reader.read_u32::<LE>()?;
            column_type = reader.read_u8()?;
            flags = reader.read_u16::<LE>()?;
            decimals = reader.read_u8()?;
        }

        Ok(Column {
            schema,
            table,
            org_table,
            name,
            org_name,
            payload,
            column_length,
            character_set,
            flags: ColumnFlags::from_bits_truncate(flags),
            column_type: ColumnType::try_from(column_type)?,
            decimals,
        })
    }

    /// Builds a column definition that never was on the wire.
    ///
    /// Used for synthetic results such as the generated-keys row.
    pub fn synthesize(name: &str, column_type: ColumnType, flags: ColumnFlags) -> Column {
        let mut payload = vec![0x03];
        payload.extend_from_slice(b"def");
        // schema, table, org_table
        payload.write_lenenc_str(b"").expect("out of memory");
        payload.write_lenenc_str(b"").expect("out of memory");
        payload.write_lenenc_str(b"").expect("out of memory");
        // name, org_name
        payload.write_lenenc_str(name.as_bytes()).expect("out of memory");
        payload.write_lenenc_str(name.as_bytes()).expect("out of memory");
        // length of the fixed-size block
        payload.push(0x0c);
        payload
            .write_u16::<LE>(crate::constants::BINARY)
            .expect("out of memory");
        payload.write_u32::<LE>(21).expect("out of memory");
        payload.push(column_type as u8);
        payload.write_u16::<LE>(flags.bits()).expect("out of memory");
        payload.push(0);
        payload.extend_from_slice(&[0, 0]);

        Column::from_payload(payload).expect("synthesized payload is valid")
    }

    /// Returns value of the column_length field of a column packet.
    pub fn column_length(&self) -> u32 {
        self.column_length
    }

    /// Returns value of the column_type field of a column packet.
    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    /// Returns value of the character_set field of a column packet.
    pub fn character_set(&self) -> u16 {
        self.character_set
    }

    /// Returns value of the flags field of a column packet.
    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    /// Returns value of the decimals field of a column packet.
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Returns value of the schema field of a column packet as a byte slice.
    pub fn schema_ref(&self) -> &[u8] {
        &self.payload[self.schema.0..self.schema.0 + self.schema.1]
    }

    /// Returns value of the schema field of a column packet as a string (lossy converted).
    pub fn schema_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.schema_ref())
    }

    /// Returns value of the table field of a column packet as a byte slice.
    pub fn table_ref(&self) -> &[u8] {
        &self.payload[self.table.0..self.table.0 + self.table.1]
    }

    /// Returns value of the table field of a column packet as a string (lossy converted).
    pub fn table_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.table_ref())
    }

    /// Returns value of the org_table field of a column packet as a byte slice.
    ///
    /// "org_table" is for original table name.
    pub fn org_table_ref(&self) -> &[u8] {
        &self.payload[self.org_table.0..self.org_table.0 + self.org_table.1]
    }

    /// Returns value of the org_table field of a column packet as a string (lossy converted).
    pub fn org_table_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.org_table_ref())
    }

    /// Returns value of the name field of a column packet as a byte slice.
    pub fn name_ref(&self) -> &[u8] {
        &self.payload[self.name.0..self.name.0 + self.name.1]
    }

    /// Returns value of the name field of a column packet as a string (lossy converted).
    pub fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_ref())
    }

    /// Returns value of the org_name field of a column packet as a byte slice.
    ///
    /// "org_name" is for original column name.
    pub fn org_name_ref(&self) -> &[u8] {
        &self.payload[self.org_name.0..self.org_name.0 + self.org_name.1]
    }

    /// Returns value of the org_name field of a column packet as a string (lossy converted).
    pub fn org_name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.org_name_ref())
    }
}

/// Represents parsed change in session state (part of MySql's Ok packet).
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum SessionStateChange<'a> {
    IsTracked(bool),
    Schema(Cow<'a, [u8]>),
    SystemVariable(Cow<'a, [u8]>, Cow<'a, [u8]>),
    UnknownLayout(Cow<'a, [u8]>),
}

impl<'a> SessionStateChange<'a> {
    pub fn into_owned(self) -> SessionStateChange<'static> {
        match self {
            SessionStateChange::SystemVariable(name, value) => SessionStateChange::SystemVariable(
                name.into_owned().into(),
                value.into_owned().into(),
            ),
            SessionStateChange::Schema(schema) => {
                SessionStateChange::Schema(schema.into_owned().into())
            }
            SessionStateChange::IsTracked(x) => SessionStateChange::IsTracked(x),
            SessionStateChange::UnknownLayout(data) => {
                SessionStateChange::UnknownLayout(data.into_owned().into())
            }
        }
    }
}

/// Represents change in session state (part of MySql's Ok packet).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SessionStateInfo<'a> {
    data_type: SessionStateType,
    data: Cow<'a, [u8]>,
}

impl<'a> SessionStateInfo<'a> {
    pub fn parse(mut payload: &[u8]) -> io::Result<SessionStateInfo<'_>> {
        let data_type = payload.read_u8()?;
        Ok(SessionStateInfo {
            data_type: data_type.into(),
            data: read_lenenc_str!(&mut payload)?.into(),
        })
    }

    pub fn into_owned(self) -> SessionStateInfo<'static> {
        let SessionStateInfo { data_type, data } = self;
        SessionStateInfo {
            data_type,
            data: data.into_owned().into(),
        }
    }

    pub fn data_type(&self) -> SessionStateType {
        self.data_type
    }

    pub fn decode(&self) -> io::Result<SessionStateChange<'_>> {
        let mut reader = self.data.as_ref();
        match self.data_type {
            SessionStateType::SESSION_TRACK_SYSTEM_VARIABLES => {
                let name = read_lenenc_str!(&mut reader)?;
                let value = read_lenenc_str!(&mut reader)?;
                Ok(SessionStateChange::SystemVariable(
                    name.into(),
                    value.into(),
                ))
            }
            SessionStateType::SESSION_TRACK_SCHEMA => {
                let schema = read_lenenc_str!(&mut reader)?;
                Ok(SessionStateChange::Schema(schema.into()))
            }
            SessionStateType::SESSION_TRACK_STATE_CHANGE => {
                let is_tracked = read_lenenc_str!(&mut reader)?;
                Ok(SessionStateChange::IsTracked(is_tracked == b"1"))
            }
            // Layout not specified in documentation
            SessionStateType::SESSION_TRACK_GTIDS
            | SessionStateType::SESSION_TRACK_TRANSACTION_CHARACTERISTICS
            | SessionStateType::SESSION_TRACK_TRANSACTION_STATE
            | SessionStateType::SESSION_TRACK_UNKNOWN => {
                Ok(SessionStateChange::UnknownLayout(self.data.clone()))
            }
        }
    }
}

/// OK packet kind.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum OkPacketKind {
    /// Ok packet that is not a result set terminator (header `0x00`).
    Other,
    /// Terminates a result set under `CLIENT_DEPRECATE_EOF` (header `0xFE`,
    /// full OK body).
    ResultSetTerminator,
    /// Legacy EOF packet (header `0xFE`, body shorter than 8 bytes).
    OldEof,
}

/// Represents MySql's Ok packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OkPacket<'a> {
    affected_rows: u64,
    last_insert_id: Option<u64>,
    status_flags: StatusFlags,
    warnings: u16,
    info: Option<Cow<'a, [u8]>>,
    session_state_info: Option<SessionStateInfo<'a>>,
}

/// Parses Ok packet from `payload` assuming passed client-server `capabilities`.
pub fn parse_ok_packet(
    payload: &[u8],
    capabilities: CapabilityFlags,
    kind: OkPacketKind,
) -> io::Result<OkPacket<'_>> {
    OkPacket::parse(payload, capabilities, kind)
}

impl<'a> OkPacket<'a> {
    /// Parses Ok packet from `payload` assuming passed client-server `capabilities`.
    fn parse(
        mut payload: &[u8],
        capabilities: CapabilityFlags,
        kind: OkPacketKind,
    ) -> io::Result<OkPacket<'_>> {
        let header = payload.read_u8()?;
        let (affected_rows, last_insert_id, status_flags, warnings, info, session_state_info) =
            if kind == OkPacketKind::OldEof && header == 0xFE && payload.len() < 8 {
                // We assume that CLIENT_PROTOCOL_41 was set
                let warnings = payload.read_u16::<LE>()?;
                let status_flags = StatusFlags::from_bits_truncate(payload.read_u16::<LE>()?);
                (0, 0, status_flags, warnings, &[][..], &[][..])
            } else if (kind == OkPacketKind::Other && header == 0x00)
                || (kind == OkPacketKind::ResultSetTerminator && header == 0xFE)
            {
                let affected_rows = payload.read_lenenc_int()?;
                let last_insert_id = payload.read_lenenc_int()?;
                // We assume that CLIENT_PROTOCOL_41 was set
                let status_flags = StatusFlags::from_bits_truncate(payload.read_u16::<LE>()?);
                let warnings = payload.read_u16::<LE>()?;

                let (info, session_state_info) =
                    if capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK)
                        && !payload.is_empty()
                    {
                        let info = read_lenenc_str!(&mut payload)?;
                        let session_state_info =
                            if status_flags.contains(StatusFlags::SERVER_SESSION_STATE_CHANGED) {
                                read_lenenc_str!(&mut payload)?
                            } else {
                                &[][..]
                            };
                        (info, session_state_info)
                    } else {
                        (payload, &[][..])
                    };
                (
                    affected_rows,
                    last_insert_id,
                    status_flags,
                    warnings,
                    info,
                    session_state_info,
                )
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Invalid OK_Packet header or length",
                ));
            };

        Ok(OkPacket {
            affected_rows,
            last_insert_id: if last_insert_id == 0 {
                None
            } else {
                Some(last_insert_id)
            },
            status_flags,
            warnings,
            info: if !info.is_empty() {
                Some(info.into())
            } else {
                None
            },
            session_state_info: if !session_state_info.is_empty() {
                Some(SessionStateInfo::parse(session_state_info)?)
            } else {
                None
            },
        })
    }

    pub fn into_owned(self) -> OkPacket<'static> {
        let OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
            session_state_info,
        } = self;
        OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info: info.map(|x| x.into_owned().into()),
            session_state_info: session_state_info.map(SessionStateInfo::into_owned),
        }
    }

    /// Value of the affected_rows field of an Ok packet.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Value of the last_insert_id field of an Ok packet.
    ///
    /// Note that the raw u64 is preserved: out-of-range `BIGINT UNSIGNED`
    /// ids are reinterpreted as unsigned by wide-type conversions.
    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    /// Value of the status_flags field of an Ok packet.
    pub fn status_flags(&self) -> StatusFlags {
        self.status_flags
    }

    /// Value of the warnings field of an Ok packet.
    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    /// Value of the info field of an Ok packet as a byte slice.
    pub fn info_ref(&self) -> Option<&[u8]> {
        self.info.as_ref().map(|x| x.as_ref())
    }

    /// Value of the info field of an Ok packet as a string (lossy converted).
    pub fn info_str(&self) -> Option<Cow<'_, str>> {
        self.info
            .as_ref()
            .map(|x| String::from_utf8_lossy(x.as_ref()))
    }

    pub fn session_state_info(&self) -> Option<&SessionStateInfo<'_>> {
        self.session_state_info.as_ref()
    }
}

/// Progress report information (may be in an error packet of MariaDB server).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProgressReport<'a> {
    stage: u8,
    max_stage: u8,
    progress: u32,
    stage_info: Cow<'a, [u8]>,
}

impl<'a> ProgressReport<'a> {
    fn new(stage: u8, max_stage: u8, progress: u32, stage_info: &[u8]) -> ProgressReport<'_> {
        ProgressReport {
            stage,
            max_stage,
            progress,
            stage_info: stage_info.into(),
        }
    }

    /// 1 to max_stage
    pub fn stage(&self) -> u8 {
        self.stage
    }

    pub fn max_stage(&self) -> u8 {
        self.max_stage
    }

    /// Progress as '% * 1000'
    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// Status or state name as a byte slice.
    pub fn stage_info_ref(&self) -> &[u8] {
        self.stage_info.as_ref()
    }

    /// Status or state name as a string (lossy converted).
    pub fn stage_info_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.stage_info.as_ref())
    }

    pub fn into_owned(self) -> ProgressReport<'static> {
        let ProgressReport {
            stage,
            max_stage,
            progress,
            stage_info,
        } = self;
        ProgressReport {
            stage,
            max_stage,
            progress,
            stage_info: stage_info.into_owned().into(),
        }
    }
}

impl<'a> fmt::Display for ProgressReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stage: {} of {} '{}'  {:.2}% of stage done",
            self.stage(),
            self.max_stage(),
            self.progress(),
            self.stage_info_str()
        )
    }
}

/// MySql error packet.
///
/// May hold an error or a progress report.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrPacket<'a> {
    /// (<error code>, <sql state>, <error message>)
    Error(u16, [u8; 5], Cow<'a, [u8]>),
    Progress(ProgressReport<'a>),
}

/// Parses error packet from `payload` assuming passed client-server `capabilities`.
pub fn parse_err_packet(
    payload: &[u8],
    capabilities: CapabilityFlags,
) -> io::Result<ErrPacket<'_>> {
    ErrPacket::parse(payload, capabilities)
}

impl<'a> ErrPacket<'a> {
    /// Parses error packet from `payload` assuming passed client-server `capabilities`.
    fn parse(mut payload: &[u8], capabilities: CapabilityFlags) -> io::Result<ErrPacket<'_>> {
        if payload.read_u8()? != 0xFF {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid ERR_Packet header",
            ));
        }

        let code = payload.read_u16::<LE>()?;
        // We assume that CLIENT_PROTOCOL_41 was set
        if code == 0xFFFF && capabilities.contains(CapabilityFlags::CLIENT_PROGRESS_OBSOLETE) {
            payload.read_u8()?; // Ignore number of strings.
            let stage = payload.read_u8()?;
            let max_stage = payload.read_u8()?;
            let progress = payload.read_uint::<LE>(3)?;
            let progress_info = read_lenenc_str!(&mut payload)?;
            Ok(ErrPacket::Progress(ProgressReport::new(
                stage,
                max_stage,
                progress as u32,
                progress_info,
            )))
        } else {
            match payload.first() {
                Some(b'#') => {
                    let (state, msg) =
                        split_at_or_err!(payload, 6, "EOF while reading error state")?;
                    let mut sql_state = [0_u8; 5];
                    sql_state.copy_from_slice(&state[1..]);
                    Ok(ErrPacket::Error(code, sql_state, msg.into()))
                }
                _ => Ok(ErrPacket::Error(
                    code,
                    [b'H', b'Y', b'0', b'0', b'0'],
                    payload.into(),
                )),
            }
        }
    }

    /// Returns false if this error packet contains progress report.
    pub fn is_error(&self) -> bool {
        matches!(self, ErrPacket::Error(..))
    }

    /// Returns true if this error packet contains progress report.
    pub fn is_progress_report(&self) -> bool {
        !self.is_error()
    }

    /// Will panic if ErrPacket does not contains progress report
    pub fn progress_report(&self) -> &ProgressReport<'_> {
        match *self {
            ErrPacket::Progress(ref progress_report) => progress_report,
            _ => panic!("This ErrPacket does not contains progress report"),
        }
    }

    /// Will panic if ErrPacket contains progress report
    pub fn error_code(&self) -> u16 {
        match *self {
            ErrPacket::Error(code, ..) => code,
            _ => panic!("This ErrPacket contains progress report"),
        }
    }

    /// Will panic if ErrPacket contains progress report
    pub fn sql_state_ref(&self) -> &[u8; 5] {
        match *self {
            ErrPacket::Error(_, ref state, _) => state,
            _ => panic!("This ErrPacket contains progress report"),
        }
    }

    /// Will panic if ErrPacket contains progress report
    pub fn sql_state_str(&self) -> Cow<'_, str> {
        match *self {
            ErrPacket::Error(_, ref state, _) => String::from_utf8_lossy(&state[..]),
            _ => panic!("This ErrPacket contains progress report"),
        }
    }

    /// Will panic if ErrPacket contains progress report
    pub fn message_ref(&self) -> &[u8] {
        match *self {
            ErrPacket::Error(_, _, ref message) => message.as_ref(),
            _ => panic!("This ErrPacket contains progress report"),
        }
    }

    /// Will panic if ErrPacket contains progress report
    pub fn message_str(&self) -> Cow<'_, str> {
        match *self {
            ErrPacket::Error(_, _, ref message) => String::from_utf8_lossy(message.as_ref()),
            _ => panic!("This ErrPacket contains progress report"),
        }
    }

    pub fn into_owned(self) -> ErrPacket<'static> {
        match self {
            ErrPacket::Error(code, state, message) => {
                ErrPacket::Error(code, state, message.into_owned().into())
            }
            ErrPacket::Progress(progress_report) => {
                ErrPacket::Progress(progress_report.into_owned())
            }
        }
    }
}

impl<'a> fmt::Display for ErrPacket<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ErrPacket::Error(..) => write!(
                f,
                "ERROR {} ({}): {}",
                self.error_code(),
                self.sql_state_str(),
                self.message_str()
            ),
            ErrPacket::Progress(ref progress_report) => write!(f, "{}", progress_report),
        }
    }
}

/// Represents MySql's local infile packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalInfilePacket<'a> {
    file_name: Cow<'a, [u8]>,
}

/// Will parse payload as a local infile packet.
pub fn parse_local_infile_packet(payload: &[u8]) -> io::Result<LocalInfilePacket<'_>> {
    LocalInfilePacket::parse(payload)
}

impl<'a> LocalInfilePacket<'a> {
    /// Will parse payload as a local infile packet.
    fn parse(mut payload: &[u8]) -> io::Result<LocalInfilePacket<'_>> {
        if payload.read_u8()? != 0xfb {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid LOCAL_INFILE packet header",
            ));
        }

        Ok(LocalInfilePacket {
            file_name: payload.into(),
        })
    }

    /// Value of the file_name field of a local infile packet as a byte slice.
    pub fn file_name_ref(&self) -> &[u8] {
        self.file_name.as_ref()
    }

    /// Value of the file_name field of a local infile packet as a string (lossy converted).
    pub fn file_name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.file_name.as_ref())
    }

    pub fn into_owned(self) -> LocalInfilePacket<'static> {
        LocalInfilePacket {
            file_name: self.file_name.into_owned().into(),
        }
    }
}

const MYSQL_NATIVE_PASSWORD_PLUGIN_NAME: &[u8] = b"mysql_native_password";
const CACHING_SHA2_PASSWORD_PLUGIN_NAME: &[u8] = b"caching_sha2_password";
const SHA256_PASSWORD_PLUGIN_NAME: &[u8] = b"sha256_password";
const CLEAR_PASSWORD_PLUGIN_NAME: &[u8] = b"mysql_clear_password";
const OLD_PASSWORD_PLUGIN_NAME: &[u8] = b"mysql_old_password";

/// Authentication plugin
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum AuthPlugin<'a> {
    /// Legacy authentication plugin
    MysqlNativePassword,
    /// Default since MySql v8.0.4
    CachingSha2Password,
    /// RSA/TLS based SHA-256 authentication
    Sha256Password,
    /// Sends the password in clear text (requires a secure transport)
    MysqlClearPassword,
    /// Pre-4.1 scramble (length-limited legacy)
    MysqlOldPassword,
    Other(Cow<'a, [u8]>),
}

impl<'a> AuthPlugin<'a> {
    pub fn from_bytes(name: &'a [u8]) -> AuthPlugin<'a> {
        match name {
            CACHING_SHA2_PASSWORD_PLUGIN_NAME => AuthPlugin::CachingSha2Password,
            MYSQL_NATIVE_PASSWORD_PLUGIN_NAME => AuthPlugin::MysqlNativePassword,
            SHA256_PASSWORD_PLUGIN_NAME => AuthPlugin::Sha256Password,
            CLEAR_PASSWORD_PLUGIN_NAME => AuthPlugin::MysqlClearPassword,
            OLD_PASSWORD_PLUGIN_NAME => AuthPlugin::MysqlOldPassword,
            name => AuthPlugin::Other(name.into()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            AuthPlugin::MysqlNativePassword => MYSQL_NATIVE_PASSWORD_PLUGIN_NAME,
            AuthPlugin::CachingSha2Password => CACHING_SHA2_PASSWORD_PLUGIN_NAME,
            AuthPlugin::Sha256Password => SHA256_PASSWORD_PLUGIN_NAME,
            AuthPlugin::MysqlClearPassword => CLEAR_PASSWORD_PLUGIN_NAME,
            AuthPlugin::MysqlOldPassword => OLD_PASSWORD_PLUGIN_NAME,
            AuthPlugin::Other(name) => name,
        }
    }

    pub fn into_owned(self) -> AuthPlugin<'static> {
        match self {
            AuthPlugin::CachingSha2Password => AuthPlugin::CachingSha2Password,
            AuthPlugin::MysqlNativePassword => AuthPlugin::MysqlNativePassword,
            AuthPlugin::Sha256Password => AuthPlugin::Sha256Password,
            AuthPlugin::MysqlClearPassword => AuthPlugin::MysqlClearPassword,
            AuthPlugin::MysqlOldPassword => AuthPlugin::MysqlOldPassword,
            AuthPlugin::Other(name) => AuthPlugin::Other(name.into_owned().into()),
        }
    }

    /// Whether this plugin may only run over a secure transport.
    pub fn requires_secure_transport(&self) -> bool {
        matches!(self, AuthPlugin::MysqlClearPassword)
    }

    /// Generates the first-pass auth plugin data for this plugin.
    ///
    /// It'll generate `None` if password is `None` or empty, and for plugins
    /// whose first pass depends on continuation (see `conn::auth`).
    pub fn gen_data(&self, pass: Option<&str>, nonce: &[u8]) -> Option<Vec<u8>> {
        use crate::scramble::{scramble_323, scramble_native, scramble_sha256};

        match pass {
            Some(pass) if !pass.is_empty() => match self {
                AuthPlugin::CachingSha2Password => {
                    scramble_sha256(nonce, pass.as_bytes()).map(|x| Vec::from(&x[..]))
                }
                AuthPlugin::MysqlNativePassword => {
                    scramble_native(nonce, pass.as_bytes()).map(|x| Vec::from(&x[..]))
                }
                AuthPlugin::MysqlOldPassword => {
                    scramble_323(nonce, pass.as_bytes()).map(|x| {
                        let mut out = Vec::from(&x[..]);
                        out.push(0);
                        out
                    })
                }
                AuthPlugin::MysqlClearPassword => {
                    let mut out = Vec::from(pass.as_bytes());
                    out.push(0);
                    Some(out)
                }
                // sha256_password sends a placeholder and continues with the
                // public-key exchange.
                AuthPlugin::Sha256Password => Some(vec![0x01]),
                AuthPlugin::Other(_) => None,
            },
            _ => None,
        }
    }
}

/// Extra auth-data beyond the initial challenge.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AuthMoreData<'a> {
    data: Cow<'a, [u8]>,
}

impl<'a> AuthMoreData<'a> {
    fn parse(mut payload: &'a [u8]) -> io::Result<Self> {
        match payload.read_u8()? {
            0x01 => Ok(AuthMoreData {
                data: payload.into(),
            }),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid AuthMoreData header",
            )),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_owned(self) -> AuthMoreData<'static> {
        AuthMoreData {
            data: self.data.into_owned().into(),
        }
    }
}

/// Parses payload as an auth more data packet.
pub fn parse_auth_more_data(payload: &[u8]) -> io::Result<AuthMoreData<'_>> {
    AuthMoreData::parse(payload)
}

/// Authentication Method Switch Request Packet.
///
/// If both server and client support `CLIENT_PLUGIN_AUTH` capability, server can send this packet
/// to ask client to use another authentication method.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AuthSwitchRequest<'a> {
    auth_plugin: AuthPlugin<'a>,
    plugin_data: Cow<'a, [u8]>,
}

impl<'a> AuthSwitchRequest<'a> {
    fn parse(mut payload: &'a [u8]) -> io::Result<Self> {
        match payload.read_u8()? {
            0xfe => {
                // A bare `0xfe` asks for the pre-4.1 old-password scramble.
                if payload.is_empty() {
                    return Ok(Self {
                        auth_plugin: AuthPlugin::MysqlOldPassword,
                        plugin_data: Cow::Borrowed(&[]),
                    });
                }

                let mut null_offset = 0;
                for byte in payload.iter() {
                    if *byte == 0x00 {
                        break;
                    }
                    null_offset += 1;
                }
                let (auth_plugin, mut payload) =
                    split_at_or_err!(payload, null_offset, "Invalid AuthSwitchRequest packet")?;
                payload.read_u8()?;
                let plugin_data = if payload.last() == Some(&0) {
                    &payload[..payload.len() - 1]
                } else {
                    payload
                };
                Ok(Self {
                    auth_plugin: AuthPlugin::from_bytes(auth_plugin),
                    plugin_data: plugin_data.into(),
                })
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid AuthSwitchRequest header",
            )),
        }
    }

    pub fn auth_plugin(&self) -> &AuthPlugin<'_> {
        &self.auth_plugin
    }

    pub fn plugin_data(&self) -> &[u8] {
        &self.plugin_data
    }

    pub fn into_owned(self) -> AuthSwitchRequest<'static> {
        AuthSwitchRequest {
            auth_plugin: self.auth_plugin.into_owned(),
            plugin_data: self.plugin_data.into_owned().into(),
        }
    }
}

/// Parses payload as an auth switch request packet.
pub fn parse_auth_switch_request(payload: &[u8]) -> io::Result<AuthSwitchRequest<'_>> {
    AuthSwitchRequest::parse(payload)
}

/// Represents MySql's initial handshake packet.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakePacket<'a> {
    protocol_version: u8,
    server_version: Cow<'a, [u8]>,
    connection_id: u32,
    scramble_1: Cow<'a, [u8]>,
    scramble_2: Option<Cow<'a, [u8]>>,
    capabilities: CapabilityFlags,
    default_collation: u8,
    status_flags: StatusFlags,
    auth_plugin: Option<AuthPlugin<'a>>,
}

/// Parses payload as an initial handshake packet.
pub fn parse_handshake_packet(payload: &[u8]) -> io::Result<HandshakePacket<'_>> {
    HandshakePacket::parse(payload)
}

impl<'a> HandshakePacket<'a> {
    /// Parses payload as an initial handshake packet.
    fn parse(mut payload: &[u8]) -> io::Result<HandshakePacket<'_>> {
        let protocol_version = payload.read_u8()?;
        if protocol_version != 0x0a {
            // Protocol v9 (and anything else) is recognized and rejected;
            // it cannot carry modern authentication.
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("Unsupported protocol version {}", protocol_version),
            ));
        }

        let mut nul_byte_pos = 0;
        for (i, byte) in payload.iter().enumerate() {
            if *byte == 0x00 {
                nul_byte_pos = i;
                break;
            }
        }
        let (server_version, mut payload) =
            split_at_or_err!(payload, nul_byte_pos, "Invalid handshake packet")?;
        payload.read_u8()?;
        let connection_id = payload.read_u32::<LE>()?;
        let (scramble_1, mut payload) = split_at_or_err!(payload, 8, "Invalid handshake packet")?;
        payload.read_u8()?;
        let capabilities_1 = payload.read_u16::<LE>()?;
        let default_collation = payload.read_u8()?;
        let status_flags = payload.read_u16::<LE>()?;
        let capabilities_2 = payload.read_u16::<LE>()?;
        let scramble_len = payload.read_u8()?;
        let (reserved, payload) = split_at_or_err!(payload, 10, "Invalid handshake packet")?;

        // MariaDB servers put their extended capabilities into the tail of
        // the reserved block; MySql servers keep it zeroed.
        let mariadb_ext_capabilities = LE::read_u32(&reserved[6..]);

        let capabilities = CapabilityFlags::from_bits_truncate(
            u64::from(capabilities_1)
                | (u64::from(capabilities_2) << 16)
                | (u64::from(mariadb_ext_capabilities) << 32),
        );

        let (scramble_2, payload) =
            if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
                let (scramble_2, mut payload) = split_at_or_err!(
                    payload,
                    max(12, scramble_len as i8 - 9) as usize,
                    "Invalid handshake packet"
                )?;
                payload.read_u8()?;
                (Some(scramble_2), payload)
            } else {
                (None, payload)
            };
        let auth_plugin_name = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            if let Some(pos) = payload.iter().position(|&x| x == 0x00) {
                Some(&payload[..pos])
            } else {
                Some(payload)
            }
        } else {
            None
        };
        Ok(HandshakePacket {
            protocol_version,
            server_version: server_version.into(),
            connection_id,
            scramble_1: scramble_1.into(),
            scramble_2: scramble_2.map(Into::into),
            capabilities,
            default_collation,
            status_flags: StatusFlags::from_bits_truncate(status_flags),
            auth_plugin: auth_plugin_name.map(AuthPlugin::from_bytes),
        })
    }

    pub fn into_owned(self) -> HandshakePacket<'static> {
        HandshakePacket {
            protocol_version: self.protocol_version,
            server_version: self.server_version.into_owned().into(),
            connection_id: self.connection_id,
            scramble_1: self.scramble_1.into_owned().into(),
            scramble_2: self.scramble_2.map(Cow::into_owned).map(Into::into),
            capabilities: self.capabilities,
            default_collation: self.default_collation,
            status_flags: self.status_flags,
            auth_plugin: self.auth_plugin.map(AuthPlugin::into_owned),
        }
    }

    /// Value of the protocol_version field of an initial handshake packet.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Value of the server_version field of an initial handshake packet as a byte slice.
    pub fn server_version_ref(&self) -> &[u8] {
        self.server_version.as_ref()
    }

    /// Value of the server_version field of an initial handshake packet as a string
    /// (lossy converted).
    pub fn server_version_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.server_version_ref())
    }

    /// Parsed server version.
    ///
    /// Will parse first \d+.\d+.\d+ of a server version string (if any).
    pub fn server_version_parsed(&self) -> Option<(u16, u16, u16)> {
        VERSION_RE
            .captures(self.server_version_ref())
            .map(|captures| {
                // Should not panic because validated with regex
                (
                    parse::<u16, _>(captures.get(1).unwrap().as_bytes()).unwrap(),
                    parse::<u16, _>(captures.get(2).unwrap().as_bytes()).unwrap(),
                    parse::<u16, _>(captures.get(3).unwrap().as_bytes()).unwrap(),
                )
            })
    }

    /// Parsed mariadb server version.
    pub fn maria_db_server_version_parsed(&self) -> Option<(u16, u16, u16)> {
        MARIADB_VERSION_RE
            .captures(self.server_version_ref())
            .map(|captures| {
                // Should not panic because validated with regex
                (
                    parse::<u16, _>(captures.get(1).unwrap().as_bytes()).unwrap(),
                    parse::<u16, _>(captures.get(2).unwrap().as_bytes()).unwrap(),
                    parse::<u16, _>(captures.get(3).unwrap().as_bytes()).unwrap(),
                )
            })
    }

    /// Value of the connection_id field of an initial handshake packet.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Value of the scramble_1 field of an initial handshake packet as a byte slice.
    pub fn scramble_1_ref(&self) -> &[u8] {
        self.scramble_1.as_ref()
    }

    /// Value of the scramble_2 field of an initial handshake packet as a byte slice.
    pub fn scramble_2_ref(&self) -> Option<&[u8]> {
        self.scramble_2.as_ref().map(Cow::as_ref)
    }

    /// Returns concatenated auth plugin nonce.
    pub fn nonce(&self) -> Vec<u8> {
        let mut out = Vec::from(self.scramble_1_ref());
        out.extend_from_slice(self.scramble_2_ref().unwrap_or(&[][..]));
        out
    }

    /// Value of a server capabilities.
    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    /// Value of the default_collation field of an initial handshake packet.
    pub fn default_collation(&self) -> u8 {
        self.default_collation
    }

    /// Value of a status flags.
    pub fn status_flags(&self) -> StatusFlags {
        self.status_flags
    }

    /// Value of the auth_plugin_name field of an initial handshake packet as a byte slice.
    pub fn auth_plugin_name_ref(&self) -> Option<&[u8]> {
        self.auth_plugin.as_ref().map(AuthPlugin::as_bytes)
    }

    /// Value of the auth_plugin_name field of an initial handshake packet as a string
    /// (lossy converted).
    pub fn auth_plugin_name_str(&self) -> Option<Cow<'_, str>> {
        self.auth_plugin
            .as_ref()
            .map(AuthPlugin::as_bytes)
            .map(String::from_utf8_lossy)
    }

    /// Auth plugin of a handshake packet
    pub fn auth_plugin(&self) -> Option<&AuthPlugin<'_>> {
        self.auth_plugin.as_ref()
    }
}

/// Client's response to the initial handshake.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandshakeResponse {
    data: Vec<u8>,
}

impl HandshakeResponse {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scramble_buf: Option<&[u8]>,
        collation: u16,
        user: Option<&str>,
        db_name: Option<&str>,
        auth_plugin: &AuthPlugin<'_>,
        client_flags: CapabilityFlags,
        connect_attributes: &HashMap<String, String>,
        zstd_compression_level: Option<i32>,
    ) -> HandshakeResponse {
        let scramble = scramble_buf.unwrap_or(&[]);

        let mut data = Vec::with_capacity(1024);
        data.write_u32::<LE>(client_flags.bits() as u32).unwrap();
        data.write_u32::<LE>(MAX_PAYLOAD_LEN as u32).unwrap();
        data.push(collation as u8);
        data.resize(data.len() + 23, 0);
        data.extend_from_slice(user.unwrap_or("").as_bytes());
        data.push(0);
        if client_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            data.write_lenenc_str(scramble).expect("out of memory");
        } else {
            data.push(scramble.len() as u8);
            data.extend_from_slice(scramble);
        }
        if client_flags.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) {
            data.extend_from_slice(db_name.unwrap_or("").as_bytes());
            data.push(0);
        }
        if client_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            data.extend_from_slice(auth_plugin.as_bytes());
            data.push(0);
        }
        if client_flags.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) {
            let len = connect_attributes
                .iter()
                .map(|(k, v)| lenenc_str_len(k.as_bytes()) + lenenc_str_len(v.as_bytes()))
                .sum::<usize>();
            data.write_lenenc_int(len as u64).expect("out of memory");

            for (name, value) in connect_attributes {
                data.write_lenenc_str(name.as_bytes())
                    .expect("out of memory");
                data.write_lenenc_str(value.as_bytes())
                    .expect("out of memory");
            }
        }
        if client_flags.contains(CapabilityFlags::CLIENT_ZSTD_COMPRESSION_ALGORITHM) {
            data.push(zstd_compression_level.unwrap_or(3) as u8);
        }

        HandshakeResponse { data }
    }
}

impl AsRef<[u8]> for HandshakeResponse {
    fn as_ref(&self) -> &[u8] {
        &self.data[..]
    }
}

impl From<HandshakeResponse> for Vec<u8> {
    fn from(x: HandshakeResponse) -> Vec<u8> {
        x.data
    }
}

/// Short handshake response asking for a TLS upgrade.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SslRequest {
    data: Vec<u8>,
}

impl SslRequest {
    pub fn new(capabilities: CapabilityFlags, collation: u16) -> SslRequest {
        let mut data = vec![0u8; 4 + 4 + 1 + 23];
        LE::write_u32(&mut data[0..], capabilities.bits() as u32);
        LE::write_u32(&mut data[4..], MAX_PAYLOAD_LEN as u32);
        data[8] = collation as u8;
        SslRequest { data }
    }
}

impl AsRef<[u8]> for SslRequest {
    fn as_ref(&self) -> &[u8] {
        &self.data[..]
    }
}

impl From<SslRequest> for Vec<u8> {
    fn from(x: SslRequest) -> Vec<u8> {
        x.data
    }
}

/// Represents MySql's statement packet (response to COM_STMT_PREPARE).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct StmtPacket {
    statement_id: u32,
    num_columns: u16,
    num_params: u16,
    warning_count: u16,
}

/// Parses payload as a statement packet.
pub fn parse_stmt_packet(payload: &[u8]) -> io::Result<StmtPacket> {
    StmtPacket::parse(payload)
}

impl StmtPacket {
    /// Parses payload as a statement packet.
    fn parse(mut payload: &[u8]) -> io::Result<StmtPacket> {
        if payload.read_u8()? != 0x00 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Invalid statement packet status",
            ));
        }

        let statement_id = payload.read_u32::<LE>()?;
        let num_columns = payload.read_u16::<LE>()?;
        let num_params = payload.read_u16::<LE>()?;
        payload.read_u8()?;
        let warning_count = payload.read_u16::<LE>()?;

        Ok(StmtPacket {
            statement_id,
            num_columns,
            num_params,
            warning_count,
        })
    }

    /// Value of the statement_id field of a statement packet.
    pub fn statement_id(&self) -> u32 {
        self.statement_id
    }

    /// Value of the num_columns field of a statement packet.
    pub fn num_columns(&self) -> u16 {
        self.num_columns
    }

    /// Value of the num_params field of a statement packet.
    pub fn num_params(&self) -> u16 {
        self.num_params
    }

    /// Value of the warning_count field of a statement packet.
    pub fn warning_count(&self) -> u16 {
        self.warning_count
    }
}

/// Null-bitmap.
///
/// http://dev.mysql.com/doc/internals/en/null-bitmap.html
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NullBitmap<T, U: AsRef<[u8]> = Vec<u8>>(U, PhantomData<T>);

impl<T: SerializationSide> NullBitmap<T, Vec<u8>> {
    /// Creates new null-bitmap for a given number of columns.
    pub fn new(num_columns: usize) -> Self {
        Self::from_bytes(vec![0; Self::bitmap_len(num_columns)])
    }

    /// Will read null-bitmap for a given number of columns from `input`.
    pub fn read(input: &mut &[u8], num_columns: usize) -> Self {
        let bitmap_len = Self::bitmap_len(num_columns);
        assert!(input.len() >= bitmap_len);

        let bitmap = Self::from_bytes(input[..bitmap_len].to_vec());
        *input = &input[bitmap_len..];

        bitmap
    }
}

impl<T: SerializationSide, U: AsRef<[u8]>> NullBitmap<T, U> {
    pub fn bitmap_len(num_columns: usize) -> usize {
        (num_columns + 7 + T::BIT_OFFSET) / 8
    }

    fn byte_and_bit(&self, column_index: usize) -> (usize, u8) {
        let offset = column_index + T::BIT_OFFSET;
        let byte = offset / 8;
        let bit = 1 << (offset % 8) as u8;

        assert!(byte < self.0.as_ref().len());

        (byte, bit)
    }

    /// Creates new null-bitmap from given bytes.
    pub fn from_bytes(bytes: U) -> Self {
        Self(bytes, PhantomData)
    }

    /// Returns `true` if given column is `NULL` in this `NullBitmap`.
    pub fn is_null(&self, column_index: usize) -> bool {
        let (byte, bit) = self.byte_and_bit(column_index);
        self.0.as_ref()[byte] & bit > 0
    }
}

impl<T: SerializationSide, U: AsRef<[u8]> + AsMut<[u8]>> NullBitmap<T, U> {
    /// Sets flag value for given column.
    pub fn set(&mut self, column_index: usize, is_null: bool) {
        let (byte, bit) = self.byte_and_bit(column_index);
        if is_null {
            self.0.as_mut()[byte] |= bit
        } else {
            self.0.as_mut()[byte] &= !bit
        }
    }
}

impl<T, U: AsRef<[u8]>> AsRef<[u8]> for NullBitmap<T, U> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Builder of a COM_STMT_EXECUTE message.
///
/// Layout: header byte, statement id, cursor flag, iteration count (always
/// 1), null-bitmap, "new parameters bound" flag (always 1), parameter type
/// codes, binary parameter payloads.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ComStmtExecuteRequestBuilder {
    body: Vec<u8>,
    bitmap_len: usize,
    params_added: u16,
}

impl ComStmtExecuteRequestBuilder {
    pub const NULL_BITMAP_OFFSET: usize = 10;

    pub fn new(stmt_id: u32) -> Self {
        Self::with_cursor(stmt_id, CursorType::CURSOR_TYPE_NO_CURSOR)
    }

    /// A read-only cursor makes the server hold the rows for COM_STMT_FETCH.
    pub fn with_cursor(stmt_id: u32, cursor: CursorType) -> Self {
        let mut body = Vec::with_capacity(1024);
        body.resize(10, 0);
        // command
        body[0] = Command::COM_STMT_EXECUTE as u8;
        // stmt-id
        LE::write_u32(&mut body[1..5], stmt_id);
        // cursor flags
        body[5] = cursor.bits();
        // iteration-count
        body[6] = 1;

        Self {
            body,
            bitmap_len: 0,
            params_added: 0,
        }
    }

    pub fn build(mut self, params: &[Value]) -> (Vec<u8>, bool) {
        if !params.is_empty() {
            self.bitmap_len = NullBitmap::<ClientSide>::bitmap_len(params.len());
            let meta_len = params.len() * 2;
            let data_len: usize = params.iter().map(Value::bin_len).sum();

            let total_len = self.body.len() + self.bitmap_len + 1 + meta_len + data_len;
            let as_long_data = total_len > MAX_PAYLOAD_LEN;

            self.body
                .resize(self.body.len() + self.bitmap_len + 1 + meta_len, 0);
            self.body[Self::NULL_BITMAP_OFFSET + self.bitmap_len] = 1;

            for value in params {
                self.add_param(value, as_long_data);
            }

            (self.body, as_long_data)
        } else {
            (self.body, false)
        }
    }

    fn add_param(&mut self, value: &Value, as_long_data: bool) {
        let param_index = self.params_added as usize;
        self.params_added += 1;

        match value {
            Value::NULL => {
                self.set_null_flag(param_index);
                self.set_type(param_index, ColumnType::MYSQL_TYPE_NULL);
            }
            Value::Bytes(data) => {
                self.set_type(param_index, ColumnType::MYSQL_TYPE_VAR_STRING);
                if !as_long_data {
                    self.body.write_lenenc_str(data).expect("out of memory");
                }
            }
            Value::Int(x) => {
                // 32-bit values go out as MYSQL_TYPE_LONG, wider ones as
                // MYSQL_TYPE_LONGLONG.
                if let Ok(x) = i32::try_from(*x) {
                    self.set_type(param_index, ColumnType::MYSQL_TYPE_LONG);
                    self.body.write_i32::<LE>(x).expect("out of memory");
                } else {
                    self.set_type(param_index, ColumnType::MYSQL_TYPE_LONGLONG);
                    self.body.write_i64::<LE>(*x).expect("out of memory");
                }
            }
            Value::UInt(x) => {
                self.set_type(param_index, ColumnType::MYSQL_TYPE_LONGLONG);
                self.set_unsigned(param_index);
                self.body.write_u64::<LE>(*x).expect("out of memory");
            }
            Value::Float(_) => {
                self.set_type(param_index, ColumnType::MYSQL_TYPE_FLOAT);
                self.body.write_bin_value(value).expect("out of memory");
            }
            Value::Double(_) => {
                self.set_type(param_index, ColumnType::MYSQL_TYPE_DOUBLE);
                self.body.write_bin_value(value).expect("out of memory");
            }
            Value::Date(..) => {
                self.set_type(param_index, ColumnType::MYSQL_TYPE_DATETIME);
                self.body.write_bin_value(value).expect("out of memory");
            }
            Value::Time(..) => {
                self.set_type(param_index, ColumnType::MYSQL_TYPE_TIME);
                self.body.write_bin_value(value).expect("out of memory");
            }
        }
    }

    fn set_type(&mut self, param_index: usize, param_type: ColumnType) {
        let param_meta_offset = self.param_meta_index_offset(param_index);
        self.body[param_meta_offset] = param_type as u8;
    }

    fn set_unsigned(&mut self, param_index: usize) {
        let param_meta_offset = self.param_meta_index_offset(param_index);
        self.body[param_meta_offset + 1] = 0x80;
    }

    fn set_null_flag(&mut self, param_index: usize) {
        let end = Self::NULL_BITMAP_OFFSET + self.bitmap_len;
        let bitmap_bytes = &mut self.body[Self::NULL_BITMAP_OFFSET..end];

        NullBitmap::<ClientSide, _>::from_bytes(bitmap_bytes).set(param_index, true);
    }

    fn param_meta_index_offset(&self, param_index: usize) -> usize {
        Self::NULL_BITMAP_OFFSET + self.bitmap_len + 1 + 2 * param_index
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ComStmtSendLongData {
    body: Vec<u8>,
}

impl ComStmtSendLongData {
    pub fn new(stmt_id: u32, param_index: usize, data: &[u8]) -> Self {
        let mut body = Vec::with_capacity(1 + 4 + 2 + data.len());

        body.push(Command::COM_STMT_SEND_LONG_DATA as u8);
        body.write_u32::<LE>(stmt_id).expect("unreachable");
        body.write_u16::<LE>(param_index as u16)
            .expect("unreachable");
        body.extend_from_slice(data);

        Self { body }
    }
}

impl AsRef<[u8]> for ComStmtSendLongData {
    fn as_ref(&self) -> &[u8] {
        &self.body
    }
}

impl From<ComStmtSendLongData> for Vec<u8> {
    fn from(x: ComStmtSendLongData) -> Vec<u8> {
        x.body
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ComStmtClose {
    body: Vec<u8>,
}

impl ComStmtClose {
    pub fn new(stmt_id: u32) -> Self {
        let mut body = Vec::with_capacity(1 + 4);
        body.push(Command::COM_STMT_CLOSE as u8);
        body.write_u32::<LE>(stmt_id).expect("unreachable");
        Self { body }
    }

    pub fn set_id(&mut self, stmt_id: u32) {
        LE::write_u32(&mut self.body[1..], stmt_id);
    }
}

impl AsRef<[u8]> for ComStmtClose {
    fn as_ref(&self) -> &[u8] {
        &self.body
    }
}

impl From<ComStmtClose> for Vec<u8> {
    fn from(x: ComStmtClose) -> Vec<u8> {
        x.body
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ComStmtReset {
    body: Vec<u8>,
}

impl ComStmtReset {
    pub fn new(stmt_id: u32) -> Self {
        let mut body = Vec::with_capacity(1 + 4);
        body.push(Command::COM_STMT_RESET as u8);
        body.write_u32::<LE>(stmt_id).expect("unreachable");
        Self { body }
    }
}

impl AsRef<[u8]> for ComStmtReset {
    fn as_ref(&self) -> &[u8] {
        &self.body
    }
}

impl From<ComStmtReset> for Vec<u8> {
    fn from(x: ComStmtReset) -> Vec<u8> {
        x.body
    }
}

/// Pulls rows of an open read-only cursor.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ComStmtFetch {
    body: Vec<u8>,
}

impl ComStmtFetch {
    pub fn new(stmt_id: u32, num_rows: u32) -> Self {
        let mut body = Vec::with_capacity(1 + 4 + 4);
        body.push(Command::COM_STMT_FETCH as u8);
        body.write_u32::<LE>(stmt_id).expect("unreachable");
        body.write_u32::<LE>(num_rows).expect("unreachable");
        Self { body }
    }
}

impl AsRef<[u8]> for ComStmtFetch {
    fn as_ref(&self) -> &[u8] {
        &self.body
    }
}

impl From<ComStmtFetch> for Vec<u8> {
    fn from(x: ComStmtFetch) -> Vec<u8> {
        x.body
    }
}

/// Re-authenticates the connection as another user and resets the session
/// state.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ComChangeUser {
    body: Vec<u8>,
}

impl ComChangeUser {
    pub fn new(
        user: Option<&str>,
        db_name: Option<&str>,
        auth_data: Option<&[u8]>,
        collation: u16,
        auth_plugin: &AuthPlugin<'_>,
        client_flags: CapabilityFlags,
    ) -> Self {
        let mut body = Vec::with_capacity(1024);

        body.push(Command::COM_CHANGE_USER as u8);
        body.extend_from_slice(user.unwrap_or("").as_bytes());
        body.push(0);

        let auth_data = auth_data.unwrap_or(&[]);
        if client_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            body.push(auth_data.len() as u8);
            body.extend_from_slice(auth_data);
        } else {
            body.extend_from_slice(auth_data);
            body.push(0);
        }

        body.extend_from_slice(db_name.unwrap_or("").as_bytes());
        body.push(0);

        body.write_u16::<LE>(collation).expect("unreachable");

        if client_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            body.extend_from_slice(auth_plugin.as_bytes());
            body.push(0);
        }

        Self { body }
    }
}

impl AsRef<[u8]> for ComChangeUser {
    fn as_ref(&self) -> &[u8] {
        &self.body
    }
}

impl From<ComChangeUser> for Vec<u8> {
    fn from(x: ComChangeUser) -> Vec<u8> {
        x.body
    }
}

/// Parses the column-count payload that precedes a column definition stream.
pub fn parse_column_count(mut payload: &[u8]) -> io::Result<u64> {
    payload.read_lenenc_int()
}

/// Typed server message, dispatched on the exchange phase.
#[derive(Debug)]
pub enum ServerMessage<'a> {
    Handshake(HandshakePacket<'a>),
    Ok(OkPacket<'a>, OkPacketKind),
    Error(ErrPacket<'a>),
    AuthMoreData(AuthMoreData<'a>),
    AuthSwitch(AuthSwitchRequest<'a>),
    LocalInfile(LocalInfilePacket<'a>),
    ColumnCount(u64),
    Column(Column),
    /// A row payload; the encoding (text or binary) follows the statement
    /// kind, so the raw payload is handed to the row parser as is.
    Row(&'a [u8]),
    PreparedOk(StmtPacket),
}

impl<'a> ServerMessage<'a> {
    /// Context-sensitive decode of an assembled payload.
    pub fn parse(
        ctx: DecodeContext,
        payload: &'a [u8],
        capabilities: CapabilityFlags,
    ) -> io::Result<ServerMessage<'a>> {
        let first = *payload
            .first()
            .ok_or_else(crate::misc::unexpected_buf_eof)?;

        if first == 0xFF {
            return Ok(ServerMessage::Error(ErrPacket::parse(
                payload,
                capabilities,
            )?));
        }

        match ctx {
            DecodeContext::Login => match first {
                0x0A | 0x09 => Ok(ServerMessage::Handshake(HandshakePacket::parse(payload)?)),
                0x00 if payload.len() >= 7 => Ok(ServerMessage::Ok(
                    OkPacket::parse(payload, capabilities, OkPacketKind::Other)?,
                    OkPacketKind::Other,
                )),
                0x01 => Ok(ServerMessage::AuthMoreData(AuthMoreData::parse(payload)?)),
                0xFE => Ok(ServerMessage::AuthSwitch(AuthSwitchRequest::parse(
                    payload,
                )?)),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Unexpected login-phase packet",
                )),
            },
            DecodeContext::Command => match first {
                0x00 if payload.len() >= 7 => Ok(ServerMessage::Ok(
                    OkPacket::parse(payload, capabilities, OkPacketKind::Other)?,
                    OkPacketKind::Other,
                )),
                // A column count of zero is impossible here, so 0x00 with a
                // short payload cannot reach this arm.
                0xFB if payload.len() > 1 => Ok(ServerMessage::LocalInfile(
                    LocalInfilePacket::parse(payload)?,
                )),
                _ => Ok(ServerMessage::ColumnCount(parse_column_count(payload)?)),
            },
            DecodeContext::PrepareQuery => {
                Ok(ServerMessage::PreparedOk(StmtPacket::parse(payload)?))
            }
            DecodeContext::PreparedMetadata | DecodeContext::ResultMetadata => {
                if first == 0xFE && payload.len() < 9 {
                    Ok(ServerMessage::Ok(
                        OkPacket::parse(payload, capabilities, OkPacketKind::OldEof)?,
                        OkPacketKind::OldEof,
                    ))
                } else {
                    Ok(ServerMessage::Column(Column::from_payload(
                        payload.to_vec(),
                    )?))
                }
            }
            DecodeContext::Result | DecodeContext::Fetch => {
                let deprecate_eof = capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF);
                // A row whose first field's length prefix starts with 0xFE
                // occupies at least 2^24 - 1 bytes, so short 0xFE payloads
                // are unambiguously terminal.
                if first == 0xFE && deprecate_eof && payload.len() < MAX_PAYLOAD_LEN {
                    Ok(ServerMessage::Ok(
                        OkPacket::parse(payload, capabilities, OkPacketKind::ResultSetTerminator)?,
                        OkPacketKind::ResultSetTerminator,
                    ))
                } else if first == 0xFE && !deprecate_eof && payload.len() < 9 {
                    Ok(ServerMessage::Ok(
                        OkPacket::parse(payload, capabilities, OkPacketKind::OldEof)?,
                        OkPacketKind::OldEof,
                    ))
                } else {
                    Ok(ServerMessage::Row(payload))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::UTF8_GENERAL_CI;

    const HANDSHAKE_V10: &[u8] = b"\x0a5.5.2-m2\x00\x0b\x00\x00\x00Bv8@h&%8\x00\xff\xf7\x08\x02\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00*4d|cZwk4^]:\x00";

    #[test]
    fn should_parse_handshake_packet() {
        let packet = parse_handshake_packet(HANDSHAKE_V10).unwrap();
        assert_eq!(packet.protocol_version(), 10);
        assert_eq!(packet.server_version_str(), "5.5.2-m2");
        assert_eq!(packet.server_version_parsed(), Some((5, 5, 2)));
        assert_eq!(packet.maria_db_server_version_parsed(), None);
        assert_eq!(packet.connection_id(), 11);
        assert_eq!(packet.scramble_1_ref(), b"Bv8@h&%8");
        assert_eq!(packet.scramble_2_ref(), Some(&b"*4d|cZwk4^]:"[..]));
        assert_eq!(packet.nonce().len(), 20);
        assert_eq!(packet.default_collation(), 8);
        assert!(packet
            .status_flags()
            .contains(StatusFlags::SERVER_STATUS_AUTOCOMMIT));
        assert!(packet
            .capabilities()
            .contains(CapabilityFlags::CLIENT_SECURE_CONNECTION));
        assert!(!packet
            .capabilities()
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH));
        assert_eq!(packet.auth_plugin(), None);
    }

    #[test]
    fn should_reject_handshake_v9() {
        let payload = b"\x093.20.0\x00";
        assert!(parse_handshake_packet(payload).is_err());
    }

    #[test]
    fn should_parse_ok_packet_and_replace_status() {
        let payload = b"\x00\x01\x00\x02\x00\x00\x00";
        let ok = parse_ok_packet(
            payload,
            CapabilityFlags::CLIENT_PROTOCOL_41,
            OkPacketKind::Other,
        )
        .unwrap();
        assert_eq!(ok.affected_rows(), 1);
        assert_eq!(ok.last_insert_id(), None);
        assert_eq!(
            ok.status_flags(),
            StatusFlags::SERVER_STATUS_AUTOCOMMIT
        );
        assert_eq!(ok.warnings(), 0);
        assert_eq!(ok.info_ref(), None);

        // repeated decode yields the same status (idempotent)
        let again = parse_ok_packet(
            payload,
            CapabilityFlags::CLIENT_PROTOCOL_41,
            OkPacketKind::Other,
        )
        .unwrap();
        assert_eq!(again.status_flags(), ok.status_flags());
    }

    #[test]
    fn should_parse_ok_packet_with_session_state() {
        // schema change to "test"
        let payload = b"\x00\x00\x00\x02\x40\x00\x00\x00\x07\x01\x05\x04test";
        let ok = parse_ok_packet(
            payload,
            CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SESSION_TRACK,
            OkPacketKind::Other,
        )
        .unwrap();
        assert!(ok
            .status_flags()
            .contains(StatusFlags::SERVER_SESSION_STATE_CHANGED));
        let info = ok.session_state_info().unwrap();
        assert_eq!(info.data_type(), SessionStateType::SESSION_TRACK_SCHEMA);
        match info.decode().unwrap() {
            SessionStateChange::Schema(schema) => assert_eq!(schema.as_ref(), b"test"),
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn should_parse_eof_packet() {
        let payload = b"\xfe\x00\x00\x02\x00";
        let ok = parse_ok_packet(
            payload,
            CapabilityFlags::CLIENT_PROTOCOL_41,
            OkPacketKind::OldEof,
        )
        .unwrap();
        assert_eq!(ok.affected_rows(), 0);
        assert_eq!(
            ok.status_flags(),
            StatusFlags::SERVER_STATUS_AUTOCOMMIT
        );
    }

    #[test]
    fn should_parse_err_packet() {
        let payload = b"\xff\x48\x04\x23HY000No tables used";
        let err = parse_err_packet(payload, CapabilityFlags::CLIENT_PROTOCOL_41).unwrap();
        assert!(err.is_error());
        assert_eq!(err.error_code(), 1096);
        assert_eq!(err.sql_state_str(), "HY000");
        assert_eq!(err.message_str(), "No tables used");
    }

    #[test]
    fn should_parse_err_packet_without_sql_state() {
        let payload = b"\xff\x10\x04Too many connections";
        let err = parse_err_packet(payload, CapabilityFlags::empty()).unwrap();
        assert_eq!(err.error_code(), 1040);
        assert_eq!(err.sql_state_str(), "HY000");
        assert_eq!(err.message_str(), "Too many connections");
    }

    #[test]
    fn should_parse_progress_report() {
        // stage 1 of 2, 50.0%
        let payload = b"\xff\xff\xff\x01\x01\x02\xf4\x01\x00\x05stage";
        let err = parse_err_packet(
            payload,
            CapabilityFlags::CLIENT_PROGRESS_OBSOLETE,
        )
        .unwrap();
        assert!(err.is_progress_report());
        let report = err.progress_report();
        assert_eq!(report.stage(), 1);
        assert_eq!(report.max_stage(), 2);
        assert_eq!(report.progress(), 500);
        assert_eq!(report.stage_info_str(), "stage");
    }

    #[test]
    fn should_parse_local_infile_packet() {
        let payload = b"\xfb/tmp/data.csv";
        let packet = parse_local_infile_packet(payload).unwrap();
        assert_eq!(packet.file_name_str(), "/tmp/data.csv");
    }

    #[test]
    fn should_parse_stmt_packet() {
        let payload = b"\x00\x01\x00\x00\x00\x01\x00\x02\x00\x00\x00\x00";
        let packet = parse_stmt_packet(payload).unwrap();
        assert_eq!(packet.statement_id(), 1);
        assert_eq!(packet.num_columns(), 1);
        assert_eq!(packet.num_params(), 2);
        assert_eq!(packet.warning_count(), 0);
    }

    #[test]
    fn should_parse_auth_switch_request() {
        let mut payload = vec![0xfe];
        payload.extend_from_slice(b"mysql_native_password\x00");
        payload.extend_from_slice(&[0x01; 20]);
        payload.push(0);
        let req = parse_auth_switch_request(&payload).unwrap();
        assert_eq!(*req.auth_plugin(), AuthPlugin::MysqlNativePassword);
        assert_eq!(req.plugin_data(), &[0x01; 20][..]);
    }

    #[test]
    fn bare_fe_should_switch_to_old_password() {
        let req = parse_auth_switch_request(&[0xfe]).unwrap();
        assert_eq!(*req.auth_plugin(), AuthPlugin::MysqlOldPassword);
        assert!(req.plugin_data().is_empty());
    }

    #[test]
    fn null_bitmap_should_have_correct_length_and_bits() {
        for k in 0..40 {
            assert_eq!(
                NullBitmap::<ClientSide>::bitmap_len(k),
                (k + 7) / 8,
                "k={}",
                k
            );
        }

        let mut bitmap = NullBitmap::<ClientSide>::new(10);
        bitmap.set(0, true);
        bitmap.set(9, true);
        assert!(bitmap.is_null(0));
        assert!(!bitmap.is_null(1));
        assert!(bitmap.is_null(9));
        assert_eq!(bitmap.as_ref().len(), 2);

        // server side bitmap is offset by two bits
        assert_eq!(crate::packets::NullBitmap::<crate::value::ServerSide>::bitmap_len(7), 2);
    }

    #[test]
    fn stmt_execute_request_should_match_wire_layout() {
        let (body, as_long_data) = ComStmtExecuteRequestBuilder::new(1)
            .build(&[Value::Int(42), Value::Bytes(b"hi".to_vec())]);
        assert!(!as_long_data);

        let expected: Vec<u8> = vec![
            0x17, // COM_STMT_EXECUTE
            0x01, 0x00, 0x00, 0x00, // stmt id
            0x00, // no cursor
            0x01, 0x00, 0x00, 0x00, // iteration count
            0x00, // null bitmap
            0x01, // new parameters bound
            0x03, 0x00, // MYSQL_TYPE_LONG
            0xfd, 0x00, // MYSQL_TYPE_VAR_STRING
            0x2a, 0x00, 0x00, 0x00, // 42 as LE i32
            0x02, 0x68, 0x69, // "hi"
        ];
        assert_eq!(body, expected);
    }

    #[test]
    fn stmt_execute_request_should_set_null_bits_and_unsigned() {
        let (body, _) = ComStmtExecuteRequestBuilder::new(7)
            .build(&[Value::NULL, Value::UInt(u64::MAX)]);
        // null bitmap has bit 0 set
        assert_eq!(body[ComStmtExecuteRequestBuilder::NULL_BITMAP_OFFSET], 0x01);
        // unsigned flag of the second param
        let type_offset = ComStmtExecuteRequestBuilder::NULL_BITMAP_OFFSET + 1 + 1;
        assert_eq!(body[type_offset], ColumnType::MYSQL_TYPE_NULL as u8);
        assert_eq!(body[type_offset + 2], ColumnType::MYSQL_TYPE_LONGLONG as u8);
        assert_eq!(body[type_offset + 3], 0x80);
    }

    #[test]
    fn cursor_flag_should_be_encoded() {
        let (body, _) = ComStmtExecuteRequestBuilder::with_cursor(
            1,
            CursorType::CURSOR_TYPE_READ_ONLY,
        )
        .build(&[]);
        assert_eq!(body[5], 1);
    }

    #[test]
    fn handshake_response_should_contain_plugin_and_db() {
        let attrs = HashMap::new();
        let flags = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        let response = HandshakeResponse::new(
            Some(&[0_u8; 20][..]),
            UTF8_GENERAL_CI,
            Some("root"),
            Some("test"),
            &AuthPlugin::MysqlNativePassword,
            flags,
            &attrs,
            None,
        );
        let data = response.as_ref();
        assert_eq!(LE::read_u32(&data[..4]) as u64, flags.bits());
        assert_eq!(LE::read_u32(&data[4..8]) as usize, MAX_PAYLOAD_LEN);
        assert_eq!(data[8], UTF8_GENERAL_CI as u8);
        assert!(data[9..32].iter().all(|b| *b == 0));
        let tail = &data[32..];
        assert!(tail.starts_with(b"root\x00\x14"));
        let after_scramble = &tail[4 + 1 + 1 + 20..];
        assert!(after_scramble.starts_with(b"test\x00mysql_native_password\x00"));
    }

    #[test]
    fn ssl_request_should_be_fixed_size() {
        let req = SslRequest::new(
            CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_SSL,
            UTF8_GENERAL_CI,
        );
        assert_eq!(req.as_ref().len(), 32);
        assert_eq!(req.as_ref()[8], UTF8_GENERAL_CI as u8);
    }

    #[test]
    fn server_message_dispatch_should_be_context_sensitive() {
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41 | CapabilityFlags::CLIENT_DEPRECATE_EOF;

        // 0x00 leading byte: OK in command context
        let ok = b"\x00\x01\x00\x02\x00\x00\x00";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::Command, ok, caps).unwrap(),
            ServerMessage::Ok(_, OkPacketKind::Other)
        ));

        // 0x00 leading byte: prepared-ok in prepare context
        let stmt = b"\x00\x01\x00\x00\x00\x01\x00\x02\x00\x00\x00\x00";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::PrepareQuery, stmt, caps).unwrap(),
            ServerMessage::PreparedOk(_)
        ));

        // 0xFB: local infile in command context, row in result context
        let infile = b"\xfb/tmp/x";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::Command, infile, caps).unwrap(),
            ServerMessage::LocalInfile(_)
        ));
        let null_row = b"\xfb\x011";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::Result, null_row, caps).unwrap(),
            ServerMessage::Row(_)
        ));

        // 0xFE in result context: terminal OK under deprecate-EOF
        let term = b"\xfe\x00\x00\x02\x00\x00\x00";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::Result, term, caps).unwrap(),
            ServerMessage::Ok(_, OkPacketKind::ResultSetTerminator)
        ));

        // 0xFE in result context without deprecate-EOF: legacy EOF
        let caps_old = CapabilityFlags::CLIENT_PROTOCOL_41;
        let eof = b"\xfe\x00\x00\x02\x00";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::Result, eof, caps_old).unwrap(),
            ServerMessage::Ok(_, OkPacketKind::OldEof)
        ));

        // other leading byte in command context: column count
        let count = b"\x02";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::Command, count, caps).unwrap(),
            ServerMessage::ColumnCount(2)
        ));

        // 0xFF anywhere: error
        let err = b"\xff\x48\x04\x23HY000No tables used";
        assert!(matches!(
            ServerMessage::parse(DecodeContext::Result, err, caps).unwrap(),
            ServerMessage::Error(_)
        ));
    }

    #[test]
    fn synthesized_column_should_carry_requested_name_and_type() {
        let column = Column::synthesize(
            "GENERATED_ID",
            ColumnType::MYSQL_TYPE_LONGLONG,
            ColumnFlags::UNSIGNED_FLAG | ColumnFlags::NOT_NULL_FLAG,
        );
        assert_eq!(column.name_str(), "GENERATED_ID");
        assert_eq!(column.column_type(), ColumnType::MYSQL_TYPE_LONGLONG);
        assert!(column.flags().contains(ColumnFlags::UNSIGNED_FLAG));
    }

    #[test]
    fn change_user_should_follow_wire_layout() {
        let packet = ComChangeUser::new(
            Some("root"),
            None,
            Some(&[1, 2, 3]),
            UTF8_GENERAL_CI,
            &AuthPlugin::MysqlNativePassword,
            CapabilityFlags::CLIENT_SECURE_CONNECTION | CapabilityFlags::CLIENT_PLUGIN_AUTH,
        );
        let data = packet.as_ref();
        assert_eq!(data[0], Command::COM_CHANGE_USER as u8);
        assert!(data[1..].starts_with(b"root\x00\x03\x01\x02\x03\x00"));
        assert!(data.ends_with(b"mysql_native_password\x00"));
    }
}
