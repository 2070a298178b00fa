/*
 * Created on Tue Feb 20 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

use core::fmt;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/*
    wire error codes

    The range 100..=199 is reserved for the protocol itself. Codes above 0xFFFF
    belong to the application and are passed through unchanged.
*/

pub mod ecode {
    pub const NO_ERROR: u32 = 0;
    pub const RPC_FIRST: u32 = 100;
    /// catch-all failure
    pub const RPC_GENERAL_ERROR: u32 = 100;
    /// the method exists but has no implementation on this endpoint
    pub const RPC_NOT_IMPLEMENTED: u32 = 101;
    /// the caller gave up on the invocation
    pub const RPC_ABORT: u32 = 102;
    /// the invocation did not complete within its deadline
    pub const RPC_TIMEOUT: u32 = 103;
    /// the connection went away while the invocation was in flight
    pub const RPC_CONNECTION: u32 = 104;
    /// the request packet could not be decoded
    pub const RPC_BAD_REQUEST: u32 = 105;
    /// no method is registered under the requested name
    pub const RPC_NO_SUCH_METHOD: u32 = 106;
    /// the parameter types do not match the method signature
    pub const RPC_WRONG_PARAMS: u32 = 107;
    /// the server shed this request
    pub const RPC_OVERLOAD: u32 = 108;
    /// the return value types do not match the method signature
    pub const RPC_WRONG_RETURN: u32 = 109;
    /// the reply packet could not be decoded
    pub const RPC_BAD_REPLY: u32 = 110;
    /// the method itself reported a failure
    pub const RPC_METHOD_FAILED: u32 = 111;
    /// the access filter rejected the request
    pub const RPC_PERMISSION_DENIED: u32 = 112;
    pub const RPC_LAST: u32 = 199;
    /// everything above this is an application level error code
    pub const APPLICATION_FIRST: u32 = 0x1_0000;
}

/// Symbolic name for a wire error code. Used by log lines and status dumps
pub fn error_code_name(code: u32) -> &'static str {
    if code == ecode::NO_ERROR {
        return "NO_ERROR";
    }
    if code >= ecode::APPLICATION_FIRST {
        return "[APPLICATION ERROR]";
    }
    match code {
        ecode::RPC_GENERAL_ERROR => "RPC_GENERAL_ERROR",
        ecode::RPC_NOT_IMPLEMENTED => "RPC_NOT_IMPLEMENTED",
        ecode::RPC_ABORT => "RPC_ABORT",
        ecode::RPC_TIMEOUT => "RPC_TIMEOUT",
        ecode::RPC_CONNECTION => "RPC_CONNECTION",
        ecode::RPC_BAD_REQUEST => "RPC_BAD_REQUEST",
        ecode::RPC_NO_SUCH_METHOD => "RPC_NO_SUCH_METHOD",
        ecode::RPC_WRONG_PARAMS => "RPC_WRONG_PARAMS",
        ecode::RPC_OVERLOAD => "RPC_OVERLOAD",
        ecode::RPC_WRONG_RETURN => "RPC_WRONG_RETURN",
        ecode::RPC_BAD_REPLY => "RPC_BAD_REPLY",
        ecode::RPC_METHOD_FAILED => "RPC_METHOD_FAILED",
        ecode::RPC_PERMISSION_DENIED => "RPC_PERMISSION_DENIED",
        ecode::RPC_FIRST..=ecode::RPC_LAST => "[UNKNOWN RPC ERROR]",
        _ => "[UNKNOWN ERROR]",
    }
}

/// The message placed on a request when an error code is set without one
pub fn default_error_message(code: u32) -> &'static str {
    if code == ecode::NO_ERROR {
        return "No error";
    }
    if code >= ecode::APPLICATION_FIRST {
        return "[APPLICATION ERROR]";
    }
    match code {
        ecode::RPC_GENERAL_ERROR => "(RPC) General error",
        ecode::RPC_NOT_IMPLEMENTED => "(RPC) Not implemented",
        ecode::RPC_ABORT => "(RPC) Invocation aborted",
        ecode::RPC_TIMEOUT => "(RPC) Invocation timed out",
        ecode::RPC_CONNECTION => "(RPC) Connection error",
        ecode::RPC_BAD_REQUEST => "(RPC) Bad request packet",
        ecode::RPC_NO_SUCH_METHOD => "(RPC) No such method",
        ecode::RPC_WRONG_PARAMS => "(RPC) Illegal parameters",
        ecode::RPC_OVERLOAD => "(RPC) Request dropped due to server overload",
        ecode::RPC_WRONG_RETURN => "(RPC) Illegal return values",
        ecode::RPC_BAD_REPLY => "(RPC) Bad reply packet",
        ecode::RPC_METHOD_FAILED => "(RPC) Method failed",
        ecode::RPC_PERMISSION_DENIED => "(RPC) Permission denied",
        ecode::RPC_FIRST..=ecode::RPC_LAST => "[UNKNOWN RPC ERROR]",
        _ => "[UNKNOWN ERROR]",
    }
}

/*
    runtime errors

    These never travel on the wire. They cover local failures: binding a
    listener, connecting a target, reading a configuration file. Wire level
    failures always travel as (code, message) pairs on the request itself.
*/

#[derive(Debug)]
pub enum ErrorKind {
    /// an I/O failure from the transport layer
    Io(std::io::Error),
    /// a configuration file could not be parsed
    Config(serde_yaml::Error),
    /// anything else that went wrong at runtime
    Other(&'static str),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

#[derive(Debug)]
/// A local runtime error with an optional diagnostic message for context
pub struct RuntimeError {
    kind: ErrorKind,
    dmsg: Option<Box<str>>,
}

impl RuntimeError {
    pub fn with_kind(kind: ErrorKind) -> Self {
        Self { kind, dmsg: None }
    }
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
    fn add_dmsg(mut self, dmsg: impl Into<Box<str>>) -> Self {
        self.dmsg = Some(dmsg.into());
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dmsg.as_ref() {
            Some(dmsg) => write!(f, "{dmsg}; {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        Self::with_kind(ErrorKind::Io(e))
    }
}

impl From<serde_yaml::Error> for RuntimeError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::with_kind(ErrorKind::Config(e))
    }
}

impl From<&'static str> for RuntimeError {
    fn from(msg: &'static str) -> Self {
        Self::with_kind(ErrorKind::Other(msg))
    }
}

/// Attach a diagnostic message to the error branch of a result
pub trait ErrorContext<T> {
    fn set_dmsg(self, dmsg: impl Into<Box<str>>) -> RuntimeResult<T>;
}

impl<T, E: Into<RuntimeError>> ErrorContext<T> for Result<T, E> {
    fn set_dmsg(self, dmsg: impl Into<Box<str>>) -> RuntimeResult<T> {
        self.map_err(|e| e.into().add_dmsg(dmsg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_names_and_messages() {
        assert_eq!(error_code_name(0), "NO_ERROR");
        assert_eq!(error_code_name(ecode::RPC_TIMEOUT), "RPC_TIMEOUT");
        assert_eq!(error_code_name(150), "[UNKNOWN RPC ERROR]");
        assert_eq!(error_code_name(0x1_0001), "[APPLICATION ERROR]");
        assert_eq!(
            default_error_message(ecode::RPC_NO_SUCH_METHOD),
            "(RPC) No such method"
        );
        assert_eq!(
            default_error_message(ecode::RPC_PERMISSION_DENIED),
            "(RPC) Permission denied"
        );
    }

    #[test]
    fn dmsg_context() {
        let r: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let e = r.set_dmsg("failed to bind listener").unwrap_err();
        assert!(e.to_string().starts_with("failed to bind listener"));
    }
}
