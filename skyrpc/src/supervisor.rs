/*
 * Created on Fri Apr 12 2024
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

//! One supervisor per local endpoint: it owns the method registry, installs
//! the built-in `frt.rpc.*` introspection methods, allocates and recycles
//! requests, opens the server connector and resolves outbound targets. For
//! embedders that do not already run a tokio runtime, [`StandaloneRpc`] packs
//! a runtime and a supervisor together.

use {
    crate::{
        auth::CapabilitySet,
        config::RpcConfig,
        error::{ecode, ErrorContext, RuntimeError, RuntimeResult},
        invoke::RpcInvoker,
        mem::Scanner,
        net::{self, Connection, Scheduler, ServerChannel, Target},
        packet::{self, DecodedPacket},
        reflection::{MethodPt, ReflectionBuilder, ReflectionManager},
        request::RpcRequest,
        value::Wire,
    },
    bytes::BytesMut,
    parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
    std::sync::{Arc, Weak},
    tokio::{
        net::{TcpListener, TcpStream},
        runtime::{Handle, Runtime},
        task::JoinHandle,
    },
};

struct ListenerState {
    port: u16,
    task: JoinHandle<()>,
}

/// The factory for everything at one endpoint: requests, targets and the
/// server connector. Construction installs the built-in introspection methods;
/// user methods are registered through a [`ReflectionBuilder`] before the
/// endpoint goes live, and the registry is read-only from then on
pub struct Supervisor {
    cfg: RpcConfig,
    handle: Handle,
    reflection: RwLock<ReflectionManager>,
    listener: Mutex<Option<ListenerState>>,
}

impl Supervisor {
    /// A supervisor driving its I/O and timers through the given runtime
    pub fn new(handle: Handle) -> Arc<Self> {
        Self::with_config(handle, RpcConfig::default())
    }
    pub fn with_config(handle: Handle, cfg: RpcConfig) -> Arc<Self> {
        let supervisor = Arc::new(Self {
            cfg,
            handle,
            reflection: RwLock::new(ReflectionManager::new()),
            listener: Mutex::new(None),
        });
        supervisor.init_rpc_hooks();
        supervisor
    }
    pub fn config(&self) -> &RpcConfig {
        &self.cfg
    }
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.handle.clone())
    }
    pub fn reflection(&self) -> RwLockReadGuard<'_, ReflectionManager> {
        self.reflection.read()
    }
    pub(crate) fn reflection_mut(&self) -> RwLockWriteGuard<'_, ReflectionManager> {
        self.reflection.write()
    }

    /// Obtain a fresh request, recycling the tradein when possible. The
    /// tradein is consumed either way: do not use the passed-in reference
    /// afterwards
    pub fn alloc_rpc_request(&self, tradein: Option<Arc<RpcRequest>>) -> Arc<RpcRequest> {
        if let Some(req) = tradein {
            if req.recycle() {
                return req;
            }
        }
        RpcRequest::new()
    }

    /*
        server
    */

    /// Open the server connector on an address spec (`tcp/port` or
    /// `tcp/host:port`; port 0 binds an ephemeral port). Returns the bound
    /// port. Fails if this supervisor is already listening
    pub fn listen(self: &Arc<Self>, spec: &str) -> RuntimeResult<u16> {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return Err(RuntimeError::from("supervisor is already listening"));
        }
        let (host, port) = net::parse_spec(spec)?;
        let auth_caps = self.default_caps()?;
        let socket = self
            .handle
            .block_on(TcpListener::bind((host.as_str(), port)))
            .set_dmsg(format!("failed to bind to `{spec}`"))?;
        let bound = socket.local_addr()?.port();
        let task = self.handle.spawn(net::listen_loop(
            socket,
            Arc::downgrade(self),
            self.cfg.clone(),
            self.scheduler(),
            auth_caps,
        ));
        *listener = Some(ListenerState { port: bound, task });
        info!("listening for RPC connections on port {bound}");
        Ok(bound)
    }
    /// The port of the server connector, if one is open
    pub fn listen_port(&self) -> Option<u16> {
        self.listener.lock().as_ref().map(|l| l.port)
    }
    /// The capability set attributed to accepted connections. The transport
    /// authenticates; plain TCP peers get the configured set, or everything
    fn default_caps(&self) -> RuntimeResult<CapabilitySet> {
        match &self.cfg.auth_capabilities {
            Some(names) => CapabilitySet::from_names(names)
                .ok_or_else(|| RuntimeError::from("unknown capability name in configuration")),
            None => Ok(CapabilitySet::all()),
        }
    }

    /*
        client
    */

    /// Resolve an outbound target. Must not be called from a transport thread
    pub fn get_target(self: &Arc<Self>, spec: &str) -> RuntimeResult<Arc<Target>> {
        self.make_target(spec, false)
    }
    /// Resolve an outbound target that also exposes this supervisor's methods
    /// to the callee over the same connection
    pub fn get_2way_target(self: &Arc<Self>, spec: &str) -> RuntimeResult<Arc<Target>> {
        self.make_target(spec, true)
    }
    fn make_target(self: &Arc<Self>, spec: &str, two_way: bool) -> RuntimeResult<Arc<Target>> {
        let (host, port) = net::parse_spec(spec)?;
        let stream = self
            .handle
            .block_on(TcpStream::connect((host.as_str(), port)))
            .set_dmsg(format!("failed to connect to `{spec}`"))?;
        let supervisor = if two_way {
            Arc::downgrade(self)
        } else {
            Weak::new()
        };
        let conn = Connection::spawn(
            stream,
            supervisor,
            CapabilitySet::all(),
            self.scheduler(),
            &self.cfg,
            None,
        );
        Ok(Target::new(conn, self.scheduler()))
    }

    /*
        dispatch
    */

    /// Entry point for an incoming server side packet: materialize it into a
    /// fresh request and run an invoker over it. A packet that is not a
    /// well-formed request is dropped without a reply
    pub(crate) fn handle_packet(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        chid: u32,
        pcode: u32,
        body: &[u8],
    ) {
        let req = self.alloc_rpc_request(None);
        req.set_channel(Some(ServerChannel::new(conn.clone(), chid)));
        let mut no_reply = false;
        match packet::decode_into(&req, pcode, body) {
            Some(DecodedPacket::Request { no_reply: nr }) => no_reply = nr,
            _ => req.set_error(ecode::RPC_BAD_REQUEST),
        }
        let invoker = RpcInvoker::new(self, req.clone(), no_reply);
        if req.is_error() {
            invoker.handle_done();
        } else {
            invoker.invoke();
        }
    }

    /*
        built-in methods
    */

    fn init_rpc_hooks(self: &Arc<Self>) {
        let mut rb = ReflectionBuilder::new(self);
        //---------------------------------------------------------------------
        rb.define_method("frt.rpc.ping", "", "", MethodPt::borrowing(|_| ()));
        rb.method_desc("Method that may be used to check if the server is online");
        //---------------------------------------------------------------------
        rb.define_method(
            "frt.rpc.echo",
            "*",
            "*",
            MethodPt::borrowing(|req| {
                let mut buf = BytesMut::new();
                req.params().encode(Wire::Copy, &mut buf);
                let len = buf.len();
                req.returns().decode(Wire::Copy, &mut Scanner::new(&buf), len);
            }),
        );
        rb.method_desc("Echo the parameters as return values");
        rb.param_desc("params", "Any set of parameters");
        rb.return_desc("return", "The parameter values");
        //---------------------------------------------------------------------
        let this = Arc::downgrade(self);
        rb.define_method(
            "frt.rpc.getMethodList",
            "",
            "SSS",
            MethodPt::borrowing(move |req| {
                if let Some(supervisor) = this.upgrade() {
                    supervisor
                        .reflection()
                        .dump_method_list(&mut req.returns());
                }
            }),
        );
        rb.method_desc("Obtain a list of all available methods");
        rb.return_desc("names", "Method names");
        rb.return_desc("params", "Method parameter types");
        rb.return_desc("return", "Method return types");
        //---------------------------------------------------------------------
        let this = Arc::downgrade(self);
        rb.define_method(
            "frt.rpc.getMethodInfo",
            "s",
            "sssSSSS",
            MethodPt::borrowing(move |req| {
                let Some(supervisor) = this.upgrade() else {
                    return;
                };
                // the parameter spec guarantees a single string
                let name = req.params()[0].as_str().unwrap_or_default().to_owned();
                let method = supervisor.reflection().lookup_method(&name);
                match method {
                    Some(method) if method.get_documentation(&mut req.returns()) => (),
                    _ => req.set_error_msg(ecode::RPC_METHOD_FAILED, "No such method"),
                }
            }),
        );
        rb.method_desc("Obtain detailed information about a single method");
        rb.param_desc("methodName", "The method we want information about");
        rb.return_desc("desc", "Description of what the method does");
        rb.return_desc("params", "Method parameter types");
        rb.return_desc("return", "Method return types");
        rb.return_desc("paramNames", "Method parameter names");
        rb.return_desc("paramDesc", "Method parameter descriptions");
        rb.return_desc("returnNames", "Method return value names");
        rb.return_desc("returnDesc", "Method return value descriptions");
        //---------------------------------------------------------------------
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.task.abort();
        }
    }
}

/// A tokio runtime plus a supervisor riding on it, for embedders and tests
/// that do not bring their own runtime. Dropping it stops the endpoint
pub struct StandaloneRpc {
    supervisor: Arc<Supervisor>,
    // kept alive for as long as the endpoint runs
    _runtime: Runtime,
}

impl StandaloneRpc {
    pub fn new() -> RuntimeResult<Self> {
        Self::with_config(RpcConfig::default())
    }
    pub fn with_config(cfg: RpcConfig) -> RuntimeResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(cfg.worker_threads)
            .thread_name("rpc")
            .enable_all()
            .build()
            .set_dmsg("failed to start the RPC runtime")?;
        let supervisor = Supervisor::with_config(runtime.handle().clone(), cfg);
        Ok(Self {
            supervisor,
            _runtime: runtime,
        })
    }
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }
}
