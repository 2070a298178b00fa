/*
 * Created on Mon Mar 11 2024
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

use {
    crate::{
        error::{default_error_message, ecode},
        net::{Connection, ServerChannel},
        packet::{self, RpcPacket, Shape},
        trace::Trace,
        value::Values,
    },
    core::sync::atomic::{AtomicU32, AtomicU8, Ordering},
    parking_lot::{Mutex, MutexGuard},
    std::sync::Arc,
};

/// Installed by the client side adapter so that user code can give up on an
/// in-flight invocation
pub trait AbortHandler: Send + Sync {
    /// Returns true if the abort won the completion race
    fn handle_abort(&self) -> bool;
}

/// Installed by the server side invoker so that a detached handler can resume
/// completion later
pub trait ReturnHandler: Send + Sync {
    fn handle_return(&self);
    /// The connection the request is associated with, if any
    fn connection(&self) -> Option<Arc<Connection>>;
}

/*
    detach flag states
*/

const DETACH_OFF: u8 = 0;
const DETACH_ARMED: u8 = 1;
const DETACH_SET: u8 = 2;

#[derive(Default)]
struct ErrorState {
    code: u32,
    message: String,
}

#[derive(Default)]
/// A reference counted unit of RPC work. The request owns its parameters,
/// return values, error state and trace; every completion path (reply,
/// timeout, abort, connection loss) must take the completion token before
/// touching the waiter, so exactly one of them wins
pub struct RpcRequest {
    method_name: Mutex<String>,
    params: Mutex<Values>,
    returns: Mutex<Values>,
    err: Mutex<ErrorState>,
    completed: AtomicU32,
    detached: AtomicU8,
    context: Mutex<Option<ServerChannel>>,
    trace: Mutex<Trace>,
    abort_handler: Mutex<Option<Arc<dyn AbortHandler>>>,
    return_handler: Mutex<Option<Arc<dyn ReturnHandler>>>,
}

impl RpcRequest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /*
        values
    */

    /// The parameter container. Do not hold this guard across a call that
    /// locks the same request again
    pub fn params(&self) -> MutexGuard<'_, Values> {
        self.params.lock()
    }
    /// The return value container. Same locking rule as [`RpcRequest::params`]
    pub fn returns(&self) -> MutexGuard<'_, Values> {
        self.returns.lock()
    }
    /// The parameter type spec (one ASCII tag per parameter)
    pub fn param_spec(&self) -> String {
        String::from_utf8_lossy(self.params.lock().type_string()).into_owned()
    }
    /// The return value type spec
    pub fn return_spec(&self) -> String {
        String::from_utf8_lossy(self.returns.lock().type_string()).into_owned()
    }

    /*
        method name
    */

    pub fn set_method_name(&self, name: &str) {
        *self.method_name.lock() = name.to_owned();
    }
    pub fn method_name(&self) -> String {
        self.method_name.lock().clone()
    }

    /*
        error state
    */

    /// Set an error with the default message for the code
    pub fn set_error(&self, code: u32) {
        self.set_error_msg(code, default_error_message(code));
    }
    /// Set an error with an explicit message. A later call overwrites an
    /// earlier one; the state persists until reset
    pub fn set_error_msg(&self, code: u32, message: &str) {
        let mut err = self.err.lock();
        err.code = code;
        err.message.clear();
        err.message.push_str(message);
    }
    pub fn is_error(&self) -> bool {
        self.err.lock().code != ecode::NO_ERROR
    }
    pub fn error_code(&self) -> u32 {
        self.err.lock().code
    }
    pub fn error_message(&self) -> String {
        self.err.lock().message.clone()
    }
    /// Verify the actual return types against a spec. Returns false if the
    /// request is already errored or on a mismatch (which sets WRONG_RETURN)
    pub fn check_return_types(&self, spec: &str) -> bool {
        if self.is_error() {
            return false;
        }
        let matches = self.returns.lock().type_string() == spec.as_bytes();
        if !matches {
            self.set_error(ecode::RPC_WRONG_RETURN);
            return false;
        }
        true
    }

    /*
        completion and detach
    */

    /// Atomically claim the right to complete this request. Only the first
    /// caller gets true; everyone else lost the race and must back off
    pub fn completion_token(&self) -> bool {
        self.completed.fetch_add(1, Ordering::AcqRel) == 0
    }
    /// Invoker side: allow the handler about to run to detach
    pub(crate) fn arm_detach(&self) {
        self.detached.store(DETACH_ARMED, Ordering::Release);
    }
    /// Handler side: declare that the reply will be produced later. Returns
    /// the request itself so the handler can stash it
    pub fn detach(self: &Arc<Self>) -> Arc<Self> {
        let prev = self.detached.swap(DETACH_SET, Ordering::AcqRel);
        if prev == DETACH_OFF {
            warn!(
                "detach called outside an active invocation of '{}'",
                self.method_name()
            );
        }
        self.clone()
    }
    /// Invoker side: read and disarm the detach flag after the handler ran
    pub(crate) fn take_detached(&self) -> bool {
        self.detached.swap(DETACH_OFF, Ordering::AcqRel) == DETACH_SET
    }

    /*
        handlers
    */

    pub fn set_abort_handler(&self, handler: Option<Arc<dyn AbortHandler>>) {
        *self.abort_handler.lock() = handler;
    }
    pub fn set_return_handler(&self, handler: Option<Arc<dyn ReturnHandler>>) {
        *self.return_handler.lock() = handler;
    }
    /// Forward to the abort handler, if one is registered
    pub fn abort(&self) -> bool {
        let handler = self.abort_handler.lock().clone();
        match handler {
            Some(h) => h.handle_abort(),
            None => false,
        }
    }
    /// Forward to the return handler. Used by detached handlers once their
    /// reply is ready
    pub fn return_request(&self) {
        let handler = self.return_handler.lock().clone();
        match handler {
            Some(h) => h.handle_return(),
            None => warn!(
                "return called on request '{}' with no return handler",
                self.method_name()
            ),
        }
    }
    /// The connection this request is associated with, through its return
    /// handler
    pub fn connection(&self) -> Option<Arc<Connection>> {
        let handler = self.return_handler.lock().clone();
        handler.and_then(|h| h.connection())
    }

    /*
        transport context
    */

    pub(crate) fn set_channel(&self, ch: Option<ServerChannel>) {
        *self.context.lock() = ch;
    }
    pub(crate) fn channel(&self) -> Option<ServerChannel> {
        self.context.lock().clone()
    }

    /*
        trace
    */

    pub fn trace(&self) -> MutexGuard<'_, Trace> {
        self.trace.lock()
    }

    /*
        packets
    */

    /// Produce a request packet carrying the method name and parameters. With
    /// `want_reply` false the NOREPLY flag is set and no reply is expected
    pub fn create_request_packet(self: &Arc<Self>, want_reply: bool) -> RpcPacket {
        let mut flags = packet::host_flags();
        if !want_reply {
            flags |= packet::FLAG_NOREPLY;
        }
        RpcPacket::new(Shape::Request, flags, self.clone())
    }
    /// Produce the packet answering this request: a reply if no error is set,
    /// otherwise an error packet carrying code and message
    pub fn create_reply_packet(self: &Arc<Self>) -> RpcPacket {
        let shape = if self.is_error() {
            Shape::Error
        } else {
            Shape::Reply
        };
        RpcPacket::new(shape, packet::host_flags(), self.clone())
    }

    /*
        lifecycle
    */

    /// Clear every piece of per-call state, releasing all owned storage and
    /// blob references
    pub fn reset(&self) {
        self.method_name.lock().clear();
        self.params.lock().reset();
        self.returns.lock().reset();
        {
            let mut err = self.err.lock();
            err.code = ecode::NO_ERROR;
            err.message.clear();
        }
        self.completed.store(0, Ordering::Release);
        self.detached.store(DETACH_OFF, Ordering::Release);
        *self.context.lock() = None;
        self.trace.lock().clear();
        *self.abort_handler.lock() = None;
        *self.return_handler.lock() = None;
    }
    /// Try to revive this request for reuse. Only possible while exactly one
    /// reference is outstanding and no error is set
    pub fn recycle(self: &Arc<Self>) -> bool {
        if Arc::strong_count(self) > 1 || self.is_error() {
            return false;
        }
        self.reset();
        true
    }

    /// Render an indented, human readable form for status reporting
    pub fn dump(&self) -> String {
        let name = self.method_name();
        let (code, message) = {
            let err = self.err.lock();
            (err.code, err.message.clone())
        };
        let mut out = String::new();
        out.push_str("RpcRequest {\n");
        out.push_str(&format!(
            "  method: {}\n",
            if name.is_empty() { "(N/A)" } else { &name }
        ));
        out.push_str(&format!("  error({code}): {message}\n"));
        out.push_str("  params:\n");
        out.push_str(&self.params.lock().dump(4));
        out.push_str("  return:\n");
        out.push_str(&self.returns.lock().dump(4));
        out.push_str("}\n");
        out
    }
}
