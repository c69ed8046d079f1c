// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Error taxonomy of the driver.
//!
//! Server-reported errors complete only the current statement exchange;
//! driver/protocol and transport errors are fatal and close the connection.

use std::{fmt, io};

use crate::proto::codec::error::PacketCodecError;
use crate::row::convert::FromRowError;
use crate::value::convert::FromValueError;

pub type Result<T> = std::result::Result<T, Error>;

/// Classification of server-reported and driver errors.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Authentication, privilege or change-user failures.
    PermissionDenied,
    /// Syntax errors, unknown tables or columns.
    BadGrammar,
    /// Duplicate keys, not-null and foreign-key violations.
    DataIntegrityViolation,
    /// Serialization failures that rolled the transaction back.
    Rollback,
    /// Lock-wait or statement-execution timeouts.
    Timeout,
    /// Interrupted reads/writes and deadlocks. Retry may help.
    TransientResource,
    /// Everything else, including protocol errors and connection closure.
    NonTransientResource,
}

/// Classifies a server error by MySql error code first, then SQL-state prefix.
pub fn classify(code: u16, sql_state: &str) -> ErrorKind {
    match code {
        1044 | 1045 | 1095 | 1142 | 1143 | 1227 | 1370 | 1698 | 1873 => {
            return ErrorKind::PermissionDenied
        }
        1050 | 1051 | 1054 | 1064 | 1146 | 1247 | 1304 | 1305 | 1630 => {
            return ErrorKind::BadGrammar
        }
        1022 | 1048 | 1062 | 1169 | 1215 | 1216 | 1217 | 1364 | 1451 | 1452 | 1557 | 1859 => {
            return ErrorKind::DataIntegrityViolation
        }
        1613 => return ErrorKind::Rollback,
        1205 | 1907 | 3024 | 1969 | 1968 => return ErrorKind::Timeout,
        1159 | 1161 | 1213 | 1317 => return ErrorKind::TransientResource,
        _ => (),
    }

    match sql_state.get(..2) {
        Some("42") => ErrorKind::BadGrammar,
        Some("23") => ErrorKind::DataIntegrityViolation,
        Some("40") => ErrorKind::Rollback,
        _ => ErrorKind::NonTransientResource,
    }
}

/// Error reported by the server in an ERR packet.
///
/// The offending SQL is attached at the statement-execution boundary; the
/// protocol layer has no such context.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub struct ServerError {
    pub code: u16,
    /// 5 ASCII chars when protocol-41 was negotiated, `HY000` otherwise.
    pub state: String,
    pub message: String,
    /// SQL of the statement this error completed, if known.
    pub sql: Option<String>,
}

impl ServerError {
    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        classify(self.code, &self.state)
    }

    /// Attaches the offending SQL (statement boundary only).
    pub fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.into());
        self
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {} ({}): {}", self.code, self.state, self.message)?;
        if let Some(ref sql) = self.sql {
            write!(f, " [SQL: {}]", sql)?;
        }
        Ok(())
    }
}

/// Driver-level errors. All of these are fatal to the connection except
/// where explicitly noted.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Connection to the server is closed (expected={})", expected)]
    ConnectionClosed { expected: bool },

    #[error("Packets out of sync")]
    PacketOutOfSync,

    #[error("Packet too large")]
    PacketTooLarge,

    #[error("Unexpected packet: {}", context)]
    UnexpectedPacket { context: &'static str },

    #[error("Unsupported protocol version {}", version)]
    ProtocolVersion { version: u8 },

    #[error("Server does not support the {} authentication plugin", name)]
    UnsupportedAuthPlugin { name: String },

    #[error("The {} plugin requires a secure transport", plugin)]
    AuthPluginRequiresSecureTransport { plugin: &'static str },

    #[error("SSL is required but the server does not support it")]
    NoServerSslSupport,

    #[error("LOCAL INFILE path `{}` is outside of the allowed root", path)]
    LocalInfileDenied { path: String },

    #[error("LOCAL INFILE is not enabled for this connection")]
    LocalInfileDisabled,

    #[error("Statement takes {} parameters but {} were supplied", required, supplied)]
    StmtParamsMismatch { required: u16, supplied: usize },

    #[error("Named parameters are mixed with positional ones")]
    MixedParams,

    #[error("Missing named parameter `{}`", name)]
    MissingNamedParameter { name: String },

    #[error("Named parameters were supplied for a positional query")]
    NamedParamsForPositionalQuery,

    #[error("Connect timeout")]
    ConnectTimeout,

    /// Completes the current statement only; the connection stays usable.
    #[error(transparent)]
    FromValue(#[from] FromValueError),

    /// Completes the current statement only; the connection stays usable.
    #[error(transparent)]
    FromRow(#[from] FromRowError),
}

impl DriverError {
    /// Whether this error forces the connection closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DriverError::StmtParamsMismatch { .. }
                | DriverError::MixedParams
                | DriverError::MissingNamedParameter { .. }
                | DriverError::NamedParamsForPositionalQuery
                | DriverError::LocalInfileDenied { .. }
                | DriverError::LocalInfileDisabled
                | DriverError::FromValue(_)
                | DriverError::FromRow(_)
        )
    }

    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::LocalInfileDenied { .. } | DriverError::LocalInfileDisabled => {
                ErrorKind::PermissionDenied
            }
            DriverError::ConnectTimeout => ErrorKind::Timeout,
            _ => ErrorKind::NonTransientResource,
        }
    }
}

/// TLS bridge errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Invalid DNS name: {}", name)]
    InvalidDnsName { name: String },

    #[error("Can't read PEM material: {0}")]
    Pem(io::Error),

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Connection URL errors.
#[derive(Debug, thiserror::Error)]
pub enum UrlError {
    #[error("Invalid connection URL: {}", url)]
    Invalid { url: String },

    #[error("Unsupported URL scheme `{}`", scheme)]
    UnsupportedScheme { scheme: String },

    #[error("Invalid value `{}` for the `{}` URL parameter", value, name)]
    InvalidParamValue { name: String, value: String },

    #[error("Unknown URL parameter `{}`", name)]
    UnknownParameter { name: String },
}

/// Union of everything that can fail within the driver.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Input/output error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Url(#[from] UrlError),
}

impl Error {
    /// Whether this error forces the connection closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Driver(err) => err.is_fatal(),
            Error::Server(_) => false,
            Error::Io(_) => true,
            Error::Tls(_) => true,
            Error::Url(_) => false,
        }
    }

    /// Taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Driver(err) => err.kind(),
            Error::Server(err) => err.kind(),
            Error::Io(err) if err.kind() == io::ErrorKind::Interrupted => {
                ErrorKind::TransientResource
            }
            _ => ErrorKind::NonTransientResource,
        }
    }

    /// Attaches the offending SQL if this is a server error.
    pub fn with_sql(self, sql: &str) -> Self {
        match self {
            Error::Server(err) => Error::Server(err.with_sql(sql)),
            other => other,
        }
    }
}

impl From<PacketCodecError> for Error {
    fn from(err: PacketCodecError) -> Self {
        match err {
            PacketCodecError::Io(io_err) => Error::Io(io_err),
            PacketCodecError::PacketTooLarge => Error::Driver(DriverError::PacketTooLarge),
            PacketCodecError::PacketsOutOfSync => Error::Driver(DriverError::PacketOutOfSync),
            PacketCodecError::BadCompressedPacketHeader => {
                Error::Driver(DriverError::UnexpectedPacket {
                    context: "bad compressed packet header",
                })
            }
            PacketCodecError::Compression(io_err) => Error::Io(io_err),
        }
    }
}

impl From<FromValueError> for Error {
    fn from(err: FromValueError) -> Self {
        Error::Driver(DriverError::FromValue(err))
    }
}

impl From<FromRowError> for Error {
    fn from(err: FromRowError) -> Self {
        Error::Driver(DriverError::FromRow(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_classify_by_code_first() {
        assert_eq!(classify(1045, "28000"), ErrorKind::PermissionDenied);
        assert_eq!(classify(1064, "42000"), ErrorKind::BadGrammar);
        assert_eq!(classify(1062, "23000"), ErrorKind::DataIntegrityViolation);
        assert_eq!(classify(1613, "XA106"), ErrorKind::Rollback);
        assert_eq!(classify(1205, "HY000"), ErrorKind::Timeout);
        assert_eq!(classify(1213, "40001"), ErrorKind::TransientResource);
    }

    #[test]
    fn should_fall_back_to_sql_state_prefix() {
        assert_eq!(classify(9999, "42S02"), ErrorKind::BadGrammar);
        assert_eq!(classify(9999, "23505"), ErrorKind::DataIntegrityViolation);
        assert_eq!(classify(9999, "40002"), ErrorKind::Rollback);
        assert_eq!(classify(9999, "HY000"), ErrorKind::NonTransientResource);
    }

    #[test]
    fn server_errors_are_not_fatal() {
        let err = Error::Server(ServerError {
            code: 1062,
            state: "23000".into(),
            message: "Duplicate entry".into(),
            sql: None,
        });
        assert!(!err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::DataIntegrityViolation);
    }

    #[test]
    fn sql_is_attached_at_statement_boundary() {
        let err = Error::Server(ServerError {
            code: 1064,
            state: "42000".into(),
            message: "You have an error in your SQL syntax".into(),
            sql: None,
        });
        match err.with_sql("SELEC 1") {
            Error::Server(e) => assert_eq!(e.sql.as_deref(), Some("SELEC 1")),
            _ => unreachable!(),
        }
    }
}
