// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! MySql protocol constants: capability, status and column flags, command and
//! column-type codes, protocol limits.

use std::{convert::TryFrom, io};

/// Maximum payload length of a single protocol envelope (2^24 - 1 bytes).
pub const MAX_PAYLOAD_LEN: usize = 16_777_215;

/// Default `max_allowed_packet` value assumed until the real one is known.
pub const DEFAULT_MAX_ALLOWED_PACKET: usize = 4 * 1024 * 1024;

/// Payloads shorter than this are never compressed (compression would only
/// inflate them).
pub const MIN_COMPRESS_LENGTH: usize = 50;

/// `utf8_general_ci` collation id.
pub const UTF8_GENERAL_CI: u16 = 33;

/// `utf8mb4_general_ci` collation id.
pub const UTF8MB4_GENERAL_CI: u16 = 45;

/// `binary` collation id.
pub const BINARY: u16 = 63;

/// `utf8mb4_0900_ai_ci` collation id (default since MySql 8.0).
pub const UTF8MB4_0900_AI_CI: u16 = 255;

my_bitflags! {
    CapabilityFlags,
    #[error("Unknown flags in the raw value of CapabilityFlags (raw={0:b})")]
    UnknownCapabilityFlags,
    u64,

    /// Client capability flags.
    ///
    /// The low 32 bits follow the MySql numbering; bits 32.. are the MariaDB
    /// extended capabilities.
    pub struct CapabilityFlags: u64 {
        /// Use the improved version of Old Password Authentication.
        const CLIENT_LONG_PASSWORD                  = 0x0000_0001;

        /// Send found rows instead of affected rows in EOF_Packet.
        const CLIENT_FOUND_ROWS                     = 0x0000_0002;

        /// Get all column flags.
        const CLIENT_LONG_FLAG                      = 0x0000_0004;

        /// Database (schema) name can be specified on connect in Handshake Response Packet.
        const CLIENT_CONNECT_WITH_DB                = 0x0000_0008;

        /// Don't allow database.table.column.
        const CLIENT_NO_SCHEMA                      = 0x0000_0010;

        /// Compression protocol supported.
        const CLIENT_COMPRESS                       = 0x0000_0020;

        /// Special handling of ODBC behavior.
        const CLIENT_ODBC                           = 0x0000_0040;

        /// Can use LOAD DATA LOCAL.
        const CLIENT_LOCAL_FILES                    = 0x0000_0080;

        /// Ignore spaces before '('.
        const CLIENT_IGNORE_SPACE                   = 0x0000_0100;

        /// New 4.1 protocol.
        const CLIENT_PROTOCOL_41                    = 0x0000_0200;

        /// This is an interactive client.
        const CLIENT_INTERACTIVE                    = 0x0000_0400;

        /// Use SSL encryption for the session.
        const CLIENT_SSL                            = 0x0000_0800;

        /// Client only flag.
        const CLIENT_IGNORE_SIGPIPE                 = 0x0000_1000;

        /// Client knows about transactions.
        const CLIENT_TRANSACTIONS                   = 0x0000_2000;

        /// DEPRECATED: Old flag for 4.1 protocol.
        const CLIENT_RESERVED                       = 0x0000_4000;

        /// DEPRECATED: Old flag for 4.1 authentication.
        const CLIENT_SECURE_CONNECTION              = 0x0000_8000;

        /// Enable/disable multi-stmt support.
        const CLIENT_MULTI_STATEMENTS               = 0x0001_0000;

        /// Enable/disable multi-results.
        const CLIENT_MULTI_RESULTS                  = 0x0002_0000;

        /// Multi-results and OUT parameters in PS-protocol.
        const CLIENT_PS_MULTI_RESULTS               = 0x0004_0000;

        /// Client supports plugin authentication.
        const CLIENT_PLUGIN_AUTH                    = 0x0008_0000;

        /// Client supports connection attributes.
        const CLIENT_CONNECT_ATTRS                  = 0x0010_0000;

        /// Enable authentication response packet to be larger than 255 bytes.
        const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA = 0x0020_0000;

        /// Don't close the connection for a user account with expired password.
        const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS   = 0x0040_0000;

        /// Capable of handling server state change information.
        const CLIENT_SESSION_TRACK                  = 0x0080_0000;

        /// Client no longer needs EOF_Packet and will use OK_Packet instead.
        const CLIENT_DEPRECATE_EOF                  = 0x0100_0000;

        /// The client can handle optional metadata information in the resultset.
        const CLIENT_OPTIONAL_RESULTSET_METADATA    = 0x0200_0000;

        /// Compression protocol extended to support zstd compression method.
        const CLIENT_ZSTD_COMPRESSION_ALGORITHM     = 0x0400_0000;

        /// Support optional extension for query parameters.
        const CLIENT_QUERY_ATTRIBUTES               = 0x0800_0000;

        /// Client or server supports progress reports within error packet.
        const CLIENT_PROGRESS_OBSOLETE              = 0x2000_0000;

        /// Verify server certificate.
        const CLIENT_SSL_VERIFY_SERVER_CERT         = 0x4000_0000;

        /// Don't reset the options after an unsuccessful connect.
        const CLIENT_REMEMBER_OPTIONS               = 0x8000_0000;

        /// Client support progress indicator (MariaDB).
        const MARIADB_CLIENT_PROGRESS               = 0x0001_0000_0000;

        /// Support of array binding (MariaDB).
        const MARIADB_CLIENT_STMT_BULK_OPERATIONS   = 0x0004_0000_0000;

        /// Support of extended metadata info (MariaDB).
        const MARIADB_CLIENT_EXTENDED_TYPE_INFO     = 0x0008_0000_0000;

        /// Permit skipping metadata (MariaDB).
        const MARIADB_CLIENT_CACHE_METADATA         = 0x0010_0000_0000;
    }
}

my_bitflags! {
    StatusFlags,
    #[error("Unknown flags in the raw value of StatusFlags (raw={0:b})")]
    UnknownStatusFlags,
    u16,

    /// MySql server status flags.
    pub struct StatusFlags: u16 {
        /// Is raised when a multi-statement transaction has been started, either explicitly,
        /// by means of BEGIN or COMMIT AND CHAIN, or implicitly, by the first transactional
        /// statement, when autocommit=off.
        const SERVER_STATUS_IN_TRANS             = 0x0001;

        /// Server in auto_commit mode.
        const SERVER_STATUS_AUTOCOMMIT           = 0x0002;

        /// Multi query - next query exists.
        const SERVER_MORE_RESULTS_EXISTS         = 0x0008;

        const SERVER_QUERY_NO_GOOD_INDEX_USED    = 0x0010;

        const SERVER_QUERY_NO_INDEX_USED         = 0x0020;

        /// The server was able to fulfill the clients request and opened a read-only
        /// non-scrollable cursor for a query.
        const SERVER_STATUS_CURSOR_EXISTS        = 0x0040;

        /// This flag is sent when a read-only cursor is exhausted, in reply to
        /// COM_STMT_FETCH command.
        const SERVER_STATUS_LAST_ROW_SENT        = 0x0080;

        /// A database was dropped.
        const SERVER_STATUS_DB_DROPPED           = 0x0100;

        const SERVER_STATUS_NO_BACKSLASH_ESCAPES = 0x0200;

        /// Sent to the client if after a prepared statement reprepare we discovered
        /// that the new statement returns a different number of result set columns.
        const SERVER_STATUS_METADATA_CHANGED     = 0x0400;

        const SERVER_QUERY_WAS_SLOW              = 0x0800;

        /// To mark ResultSet containing output parameter values.
        const SERVER_PS_OUT_PARAMS               = 0x1000;

        /// Set at the same time as SERVER_STATUS_IN_TRANS if the started multi-statement
        /// transaction is a read-only transaction.
        const SERVER_STATUS_IN_TRANS_READONLY    = 0x2000;

        /// This status flag, when on, implies that one of the state information has changed
        /// on the server because of the execution of the last statement.
        const SERVER_SESSION_STATE_CHANGED       = 0x4000;
    }
}

my_bitflags! {
    ColumnFlags,
    #[error("Unknown flags in the raw value of ColumnFlags (raw={0:b})")]
    UnknownColumnFlags,
    u16,

    /// MySql column flags.
    pub struct ColumnFlags: u16 {
        /// Field can't be NULL.
        const NOT_NULL_FLAG         = 1;

        /// Field is part of a primary key.
        const PRI_KEY_FLAG          = 2;

        /// Field is part of a unique key.
        const UNIQUE_KEY_FLAG       = 4;

        /// Field is part of a key.
        const MULTIPLE_KEY_FLAG     = 8;

        /// Field is a blob.
        const BLOB_FLAG             = 16;

        /// Field is unsigned.
        const UNSIGNED_FLAG         = 32;

        /// Field is zerofill.
        const ZEROFILL_FLAG         = 64;

        /// Field is binary.
        const BINARY_FLAG           = 128;

        /// Field is an enum.
        const ENUM_FLAG             = 256;

        /// Field is a autoincrement field.
        const AUTO_INCREMENT_FLAG   = 512;

        /// Field is a timestamp.
        const TIMESTAMP_FLAG        = 1024;

        /// Field is a set.
        const SET_FLAG              = 2048;

        /// Field doesn't have default value.
        const NO_DEFAULT_VALUE_FLAG = 4096;

        /// Field is set to NOW on UPDATE.
        const ON_UPDATE_NOW_FLAG    = 8192;

        /// Intern; Part of some key.
        const PART_KEY_FLAG         = 16384;

        /// Field is num (for clients).
        const NUM_FLAG              = 32768;
    }
}

my_bitflags! {
    CursorType,
    #[error("Unknown flags in the raw value of CursorType (raw={0:b})")]
    UnknownCursorType,
    u8,

    /// Cursor flags of a COM_STMT_EXECUTE message.
    pub struct CursorType: u8 {
        const CURSOR_TYPE_NO_CURSOR  = 0_u8;
        const CURSOR_TYPE_READ_ONLY  = 1_u8;
        const CURSOR_TYPE_FOR_UPDATE = 2_u8;
        const CURSOR_TYPE_SCROLLABLE = 4_u8;
    }
}

/// MySql command.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Command {
    COM_SLEEP = 0x00,
    COM_QUIT,
    COM_INIT_DB,
    COM_QUERY,
    COM_FIELD_LIST,
    COM_CREATE_DB,
    COM_DROP_DB,
    COM_REFRESH,
    COM_SHUTDOWN,
    COM_STATISTICS,
    COM_PROCESS_INFO,
    COM_CONNECT,
    COM_PROCESS_KILL,
    COM_DEBUG,
    COM_PING,
    COM_TIME,
    COM_DELAYED_INSERT,
    COM_CHANGE_USER,
    COM_BINLOG_DUMP,
    COM_TABLE_DUMP,
    COM_CONNECT_OUT,
    COM_REGISTER_SLAVE,
    COM_STMT_PREPARE,
    COM_STMT_EXECUTE,
    COM_STMT_SEND_LONG_DATA,
    COM_STMT_CLOSE,
    COM_STMT_RESET,
    COM_SET_OPTION,
    COM_STMT_FETCH,
    COM_DAEMON,
    COM_BINLOG_DUMP_GTID,
    COM_RESET_CONNECTION,
}

/// Type of a MySql column field.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ColumnType {
    MYSQL_TYPE_DECIMAL = 0,
    MYSQL_TYPE_TINY,
    MYSQL_TYPE_SHORT,
    MYSQL_TYPE_LONG,
    MYSQL_TYPE_FLOAT,
    MYSQL_TYPE_DOUBLE,
    MYSQL_TYPE_NULL,
    MYSQL_TYPE_TIMESTAMP,
    MYSQL_TYPE_LONGLONG,
    MYSQL_TYPE_INT24,
    MYSQL_TYPE_DATE,
    MYSQL_TYPE_TIME,
    MYSQL_TYPE_DATETIME,
    MYSQL_TYPE_YEAR,
    MYSQL_TYPE_NEWDATE,
    MYSQL_TYPE_VARCHAR,
    MYSQL_TYPE_BIT,
    MYSQL_TYPE_TIMESTAMP2,
    MYSQL_TYPE_DATETIME2,
    MYSQL_TYPE_TIME2,
    MYSQL_TYPE_TYPED_ARRAY,
    MYSQL_TYPE_JSON = 245,
    MYSQL_TYPE_NEWDECIMAL,
    MYSQL_TYPE_ENUM,
    MYSQL_TYPE_SET,
    MYSQL_TYPE_TINY_BLOB,
    MYSQL_TYPE_MEDIUM_BLOB,
    MYSQL_TYPE_LONG_BLOB,
    MYSQL_TYPE_BLOB,
    MYSQL_TYPE_VAR_STRING,
    MYSQL_TYPE_STRING,
    MYSQL_TYPE_GEOMETRY,
}

impl ColumnType {
    /// Returns `true` for numeric column types.
    pub fn is_numeric_type(&self) -> bool {
        use ColumnType::*;
        matches!(
            self,
            MYSQL_TYPE_TINY
                | MYSQL_TYPE_SHORT
                | MYSQL_TYPE_LONG
                | MYSQL_TYPE_FLOAT
                | MYSQL_TYPE_DOUBLE
                | MYSQL_TYPE_LONGLONG
                | MYSQL_TYPE_INT24
                | MYSQL_TYPE_YEAR
                | MYSQL_TYPE_DECIMAL
                | MYSQL_TYPE_NEWDECIMAL
        )
    }

    /// Returns `true` for temporal column types.
    pub fn is_temporal_type(&self) -> bool {
        use ColumnType::*;
        matches!(
            self,
            MYSQL_TYPE_TIMESTAMP
                | MYSQL_TYPE_DATE
                | MYSQL_TYPE_TIME
                | MYSQL_TYPE_DATETIME
                | MYSQL_TYPE_NEWDATE
                | MYSQL_TYPE_TIMESTAMP2
                | MYSQL_TYPE_DATETIME2
                | MYSQL_TYPE_TIME2
        )
    }
}

impl TryFrom<u8> for ColumnType {
    type Error = io::Error;

    fn try_from(value: u8) -> io::Result<Self> {
        use ColumnType::*;
        match value {
            0 => Ok(MYSQL_TYPE_DECIMAL),
            1 => Ok(MYSQL_TYPE_TINY),
            2 => Ok(MYSQL_TYPE_SHORT),
            3 => Ok(MYSQL_TYPE_LONG),
            4 => Ok(MYSQL_TYPE_FLOAT),
            5 => Ok(MYSQL_TYPE_DOUBLE),
            6 => Ok(MYSQL_TYPE_NULL),
            7 => Ok(MYSQL_TYPE_TIMESTAMP),
            8 => Ok(MYSQL_TYPE_LONGLONG),
            9 => Ok(MYSQL_TYPE_INT24),
            10 => Ok(MYSQL_TYPE_DATE),
            11 => Ok(MYSQL_TYPE_TIME),
            12 => Ok(MYSQL_TYPE_DATETIME),
            13 => Ok(MYSQL_TYPE_YEAR),
            14 => Ok(MYSQL_TYPE_NEWDATE),
            15 => Ok(MYSQL_TYPE_VARCHAR),
            16 => Ok(MYSQL_TYPE_BIT),
            17 => Ok(MYSQL_TYPE_TIMESTAMP2),
            18 => Ok(MYSQL_TYPE_DATETIME2),
            19 => Ok(MYSQL_TYPE_TIME2),
            20 => Ok(MYSQL_TYPE_TYPED_ARRAY),
            245 => Ok(MYSQL_TYPE_JSON),
            246 => Ok(MYSQL_TYPE_NEWDECIMAL),
            247 => Ok(MYSQL_TYPE_ENUM),
            248 => Ok(MYSQL_TYPE_SET),
            249 => Ok(MYSQL_TYPE_TINY_BLOB),
            250 => Ok(MYSQL_TYPE_MEDIUM_BLOB),
            251 => Ok(MYSQL_TYPE_LONG_BLOB),
            252 => Ok(MYSQL_TYPE_BLOB),
            253 => Ok(MYSQL_TYPE_VAR_STRING),
            254 => Ok(MYSQL_TYPE_STRING),
            255 => Ok(MYSQL_TYPE_GEOMETRY),
            x => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Unknown column type {}", x),
            )),
        }
    }
}

/// Type of a session state change (part of MySql's Ok packet).
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum SessionStateType {
    /// Session system variables.
    SESSION_TRACK_SYSTEM_VARIABLES = 0x00,
    /// Current schema.
    SESSION_TRACK_SCHEMA,
    /// Track session state changes.
    SESSION_TRACK_STATE_CHANGE,
    /// See also: session_track_gtids.
    SESSION_TRACK_GTIDS,
    /// Transaction characteristics.
    SESSION_TRACK_TRANSACTION_CHARACTERISTICS,
    /// Transaction state.
    SESSION_TRACK_TRANSACTION_STATE,
    /// Unrecognized tracker type (layout is opaque to this client).
    SESSION_TRACK_UNKNOWN = 0xFF,
}

impl From<u8> for SessionStateType {
    fn from(value: u8) -> Self {
        use SessionStateType::*;
        match value {
            0 => SESSION_TRACK_SYSTEM_VARIABLES,
            1 => SESSION_TRACK_SCHEMA,
            2 => SESSION_TRACK_STATE_CHANGE,
            3 => SESSION_TRACK_GTIDS,
            4 => SESSION_TRACK_TRANSACTION_CHARACTERISTICS,
            5 => SESSION_TRACK_TRANSACTION_STATE,
            _ => SESSION_TRACK_UNKNOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_known_column_types() {
        assert_eq!(
            ColumnType::try_from(3).unwrap(),
            ColumnType::MYSQL_TYPE_LONG
        );
        assert_eq!(
            ColumnType::try_from(253).unwrap(),
            ColumnType::MYSQL_TYPE_VAR_STRING
        );
        assert!(ColumnType::try_from(100).is_err());
    }

    #[test]
    fn capability_flags_should_round_trip_mariadb_bits() {
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::MARIADB_CLIENT_PROGRESS
            | CapabilityFlags::MARIADB_CLIENT_CACHE_METADATA;
        let raw: u64 = caps.into();
        assert_eq!(CapabilityFlags::from_bits_truncate(raw), caps);
        assert!(raw > u64::from(u32::MAX));
    }
}
