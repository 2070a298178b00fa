/*
 * Created on Tue Apr 02 2024
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

//! The two halves of an invocation. Server side, [`RpcInvoker`] validates an
//! incoming request against its method record, runs the access filter,
//! dispatches to the handler and produces the reply (immediately, or later if
//! the handler detached). Client side, [`RpcAdapter`] tracks one outstanding
//! call: reply delivery, the timeout task, user aborts and connection loss all
//! race for the request's completion token, and whichever wins hands the
//! request to the waiter.

use {
    crate::{
        error::{ecode, error_code_name},
        net::{ClientChannel, Connection, Scheduler},
        reflection::{Method, MethodPt},
        request::{AbortHandler, ReturnHandler, RpcRequest},
        supervisor::Supervisor,
        value::Values,
    },
    parking_lot::{Condvar, Mutex},
    std::{sync::Arc, time::Duration},
    tokio::task::JoinHandle,
};

/// Receives a completed request: success with typed returns, or an error code
/// with a message. May be called from any runtime thread
pub trait RequestWait: Send + Sync {
    fn request_done(&self, req: Arc<RpcRequest>);
}

/// Blocks one caller thread until a single request completes
pub struct SingleReqWait {
    lock: Mutex<bool>,
    cond: Condvar,
}

impl SingleReqWait {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: Mutex::new(false),
            cond: Condvar::new(),
        })
    }
    /// Block the calling thread until the request is handed over. Must not be
    /// called from a transport thread
    pub fn wait_req(&self) {
        let mut done = self.lock.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

impl RequestWait for SingleReqWait {
    fn request_done(&self, _req: Arc<RpcRequest>) {
        let mut done = self.lock.lock();
        *done = true;
        self.cond.notify_one();
    }
}

/*
    server side
*/

/// Drives one incoming request through validation, dispatch and reply. Also
/// acts as the request's return handler so a detached handler can resume
/// completion through [`RpcRequest::return_request`]
pub struct RpcInvoker {
    req: Arc<RpcRequest>,
    method: Option<Arc<Method>>,
    no_reply: bool,
}

impl RpcInvoker {
    /// Resolve the method and run the pre-dispatch checks, in order: method
    /// existence, parameter types, access filter. The first failure errors the
    /// request; later checks are skipped
    pub fn new(supervisor: &Supervisor, req: Arc<RpcRequest>, no_reply: bool) -> Arc<Self> {
        debug!("invoke(server) init: '{}'", req.method_name());
        let method = supervisor.reflection().lookup_method(&req.method_name());
        let invoker = Arc::new(Self {
            req: req.clone(),
            method,
            no_reply,
        });
        // the request -> connection link runs through the return handler; it
        // must be in place before the access filter gets to inspect the request
        req.set_return_handler(Some(invoker.clone()));
        match &invoker.method {
            None => {
                if !req.is_error() {
                    // may already carry BAD_REQUEST
                    req.set_error(ecode::RPC_NO_SUCH_METHOD);
                }
            }
            Some(method) => {
                let params_ok = {
                    let params = req.params();
                    Values::check_types(method.param_spec().as_bytes(), params.type_string())
                };
                if !params_ok {
                    req.set_error(ecode::RPC_WRONG_PARAMS);
                } else if let Some(filter) = method.access_filter() {
                    if !filter.allow(&req) {
                        req.set_error(ecode::RPC_PERMISSION_DENIED);
                    }
                }
            }
        }
        invoker
    }
    pub fn request(&self) -> &Arc<RpcRequest> {
        &self.req
    }
    /// Dispatch to the handler slot. Returns false iff the handler detached,
    /// in which case the invoker stays alive (as the return handler) until the
    /// handler calls back in
    pub fn invoke(self: &Arc<Self>) -> bool {
        let Some(method) = &self.method else {
            // pre-dispatch checks failed; the caller routes through handle_done
            self.handle_done();
            return true;
        };
        self.req.arm_detach();
        match method.pt() {
            MethodPt::Borrow(f) => f(&self.req),
            MethodPt::Handover(f) => f(self.req.clone()),
        }
        if self.req.take_detached() {
            return false;
        }
        self.handle_done();
        true
    }
    /// Verify the returns, then answer the caller (or drop the request when no
    /// reply is wanted or the request packet itself was bad)
    pub fn handle_done(&self) {
        if !self.req.is_error() {
            if let Some(method) = &self.method {
                let returns_ok = {
                    let returns = self.req.returns();
                    Values::check_types(method.return_spec().as_bytes(), returns.type_string())
                };
                if !returns_ok {
                    self.req.set_error(ecode::RPC_WRONG_RETURN);
                }
            }
        }
        debug!(
            "invoke(server) done: '{}': '{}'",
            self.req.method_name(),
            error_code_name(self.req.error_code())
        );
        if !(self.no_reply || self.req.error_code() == ecode::RPC_BAD_REQUEST) {
            if let Some(channel) = self.req.channel() {
                channel.send(self.req.create_reply_packet());
            }
        }
        // completion is delivered; break the request -> invoker link
        self.req.set_return_handler(None);
    }
}

impl ReturnHandler for RpcInvoker {
    fn handle_return(&self) {
        self.handle_done();
    }
    fn connection(&self) -> Option<Arc<Connection>> {
        self.req.channel().map(|ch| ch.conn().clone())
    }
}

/*
    client side
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What the transport delivered for an outstanding call
pub enum PacketEvent {
    /// a reply or error packet was decoded into the request
    Regular,
    /// the connection went away
    ChannelLost,
    /// the packet could not be decoded
    Bad,
}

/// Tracks one outstanding client call from send to completion. Whichever of
/// reply, timeout and abort takes the completion token first delivers the
/// request to the waiter; the losers back off silently
pub struct RpcAdapter {
    req: Arc<RpcRequest>,
    waiter: Mutex<Option<Arc<dyn RequestWait>>>,
    channel: Mutex<Option<ClientChannel>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RpcAdapter {
    pub fn new(req: Arc<RpcRequest>, waiter: Arc<dyn RequestWait>) -> Arc<Self> {
        debug!("invoke(client) init: '{}'", req.method_name());
        let adapter = Arc::new(Self {
            req: req.clone(),
            waiter: Mutex::new(Some(waiter)),
            channel: Mutex::new(None),
            timer: Mutex::new(None),
        });
        req.set_abort_handler(Some(adapter.clone()));
        adapter
    }
    pub fn request(&self) -> &Arc<RpcRequest> {
        &self.req
    }
    pub(crate) fn set_channel(&self, channel: ClientChannel) {
        *self.channel.lock() = Some(channel);
    }
    /// Arm the timeout task on the scheduler of the connection's transport
    pub(crate) fn schedule(self: &Arc<Self>, scheduler: &Scheduler, after: Duration) {
        let adapter = self.clone();
        *self.timer.lock() = Some(scheduler.schedule(after, move || adapter.perform_task()));
    }
    fn kill_timer(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
    fn close_channel(&self) {
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
        }
    }
    /// Hand the request to the waiter. Runs exactly once, on whichever path
    /// won the completion token
    fn handle_done(&self) {
        debug!(
            "invoke(client) done: '{}': '{}'",
            self.req.method_name(),
            error_code_name(self.req.error_code())
        );
        // no more aborting once completion is delivered
        self.req.set_abort_handler(None);
        if let Some(waiter) = self.waiter.lock().take() {
            waiter.request_done(self.req.clone());
        }
    }
    /// Transport delivery path
    pub(crate) fn handle_packet(&self, event: PacketEvent) {
        if !self.req.completion_token() {
            // too late; the packet was already consumed by the decoder
            return;
        }
        self.kill_timer();
        match event {
            PacketEvent::Regular => (),
            PacketEvent::ChannelLost => self.req.set_error(ecode::RPC_CONNECTION),
            PacketEvent::Bad => self.req.set_error(ecode::RPC_BAD_REPLY),
        }
        self.channel.lock().take();
        self.handle_done();
    }
    /// Timeout path; also used to deliver an immediate failure set on the
    /// request before scheduling (the existing error is kept)
    pub(crate) fn perform_task(&self) {
        if !self.req.completion_token() {
            return;
        }
        self.close_channel();
        self.kill_timer();
        if !self.req.is_error() {
            self.req.set_error(ecode::RPC_TIMEOUT);
        }
        self.handle_done();
    }
}

impl AbortHandler for RpcAdapter {
    fn handle_abort(&self) -> bool {
        if !self.req.completion_token() {
            // too late
            return false;
        }
        self.close_channel();
        self.kill_timer();
        self.req.set_error(ecode::RPC_ABORT);
        self.handle_done();
        true
    }
}
