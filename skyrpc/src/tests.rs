/*
 * Created on Mon Apr 29 2024
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

//! End to end coverage: a server endpoint and a client endpoint in the same
//! process, talking over loopback TCP.

use {
    crate::{
        auth::AccessFilter,
        error::ecode,
        invoke::RequestWait,
        net::Target,
        reflection::{MethodPt, ReflectionBuilder},
        request::RpcRequest,
        supervisor::{StandaloneRpc, Supervisor},
    },
    parking_lot::Mutex,
    std::{
        sync::{
            atomic::{AtomicBool, AtomicU32, Ordering},
            Arc,
        },
        time::{Duration, Instant},
    },
};

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/*
    harness
*/

#[derive(Default)]
struct CountingWait {
    hits: AtomicU32,
    code: AtomicU32,
}

impl RequestWait for CountingWait {
    fn request_done(&self, req: Arc<RpcRequest>) {
        self.code.store(req.error_code(), Ordering::Release);
        self.hits.fetch_add(1, Ordering::AcqRel);
    }
}

struct DenyAll;
impl AccessFilter for DenyAll {
    fn allow(&self, _req: &RpcRequest) -> bool {
        false
    }
}

struct RecordingFilter {
    consulted: Arc<AtomicBool>,
}
impl AccessFilter for RecordingFilter {
    fn allow(&self, _req: &RpcRequest) -> bool {
        self.consulted.store(true, Ordering::Release);
        true
    }
}

#[derive(Default, Clone)]
struct ServerProbes {
    detach_stash: Arc<Mutex<Option<Arc<RpcRequest>>>>,
    void_calls: Arc<AtomicU32>,
    handler_ran: Arc<AtomicBool>,
    filter_consulted: Arc<AtomicBool>,
}

struct Endpoints {
    probes: ServerProbes,
    target: Arc<Target>,
    // owning order matters for shutdown: client first, then server
    _client: StandaloneRpc,
    _server: StandaloneRpc,
}

fn register_test_methods(supervisor: &Arc<Supervisor>, probes: &ServerProbes) {
    let mut rb = ReflectionBuilder::new(supervisor);
    //---------------------------------------------------------------------
    rb.define_method(
        "test.add",
        "ii",
        "i",
        MethodPt::borrowing(|req| {
            let (a, b) = {
                let params = req.params();
                (
                    params[0].as_u32().unwrap_or_default(),
                    params[1].as_u32().unwrap_or_default(),
                )
            };
            req.returns().add_u32(a.wrapping_add(b));
        }),
    );
    rb.method_desc("adds");
    rb.param_desc("a", "left operand");
    rb.param_desc("b", "right operand");
    rb.return_desc("sum", "the sum");
    //---------------------------------------------------------------------
    rb.define_method(
        "test.m",
        "is",
        "d",
        MethodPt::borrowing(|req| {
            req.returns().add_f64(0.0);
        }),
    );
    rb.method_desc("adds");
    rb.param_desc("n", "a number");
    rb.param_desc("s", "a string");
    rb.return_desc("r", "a double");
    //---------------------------------------------------------------------
    // partially documented on purpose: the doc must be padded
    rb.define_method("test.partial", "ii", "s", MethodPt::borrowing(|_| ()));
    rb.param_desc("only_one", "the only documented parameter");
    //---------------------------------------------------------------------
    let stash = probes.detach_stash.clone();
    rb.define_method(
        "test.detach",
        "",
        "",
        MethodPt::handover(move |req| {
            *stash.lock() = Some(req.detach());
        }),
    );
    //---------------------------------------------------------------------
    let void_calls = probes.void_calls.clone();
    rb.define_method(
        "test.void",
        "i",
        "",
        MethodPt::borrowing(move |_| {
            void_calls.fetch_add(1, Ordering::AcqRel);
        }),
    );
    //---------------------------------------------------------------------
    rb.define_method(
        "test.fail",
        "",
        "",
        MethodPt::borrowing(|req| {
            req.set_error_msg(0x1_0001, "application said no");
        }),
    );
    //---------------------------------------------------------------------
    rb.define_method("test.deny", "", "", MethodPt::borrowing(|_| ()));
    rb.request_access_filter(Some(Box::new(DenyAll)));
    //---------------------------------------------------------------------
    let handler_ran = probes.handler_ran.clone();
    rb.define_method(
        "test.filtered",
        "i",
        "",
        MethodPt::borrowing(move |_| {
            handler_ran.store(true, Ordering::Release);
        }),
    );
    rb.request_access_filter(Some(Box::new(RecordingFilter {
        consulted: probes.filter_consulted.clone(),
    })));
}

fn setup() -> Endpoints {
    let _ = env_logger::builder().is_test(true).try_init();
    let server = StandaloneRpc::new().unwrap();
    let probes = ServerProbes::default();
    register_test_methods(server.supervisor(), &probes);
    let port = server.supervisor().listen("tcp/127.0.0.1:0").unwrap();
    let client = StandaloneRpc::new().unwrap();
    let target = client
        .supervisor()
        .get_target(&format!("tcp/127.0.0.1:{port}"))
        .unwrap();
    Endpoints {
        probes,
        target,
        _client: client,
        _server: server,
    }
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < SYNC_TIMEOUT, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/*
    scenarios
*/

#[test]
fn echo_round_trip() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("frt.rpc.echo");
    req.params().add_u32(42);
    req.params().add_str("hi");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error(), "{}", req.error_message());
    let returns = req.returns();
    assert_eq!(returns.type_string(), b"is");
    assert_eq!(returns[0].as_u32(), Some(42));
    assert_eq!(returns[1].as_str(), Some("hi"));
}

#[test]
fn registered_method_round_trip() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.add");
    req.params().add_u32(40);
    req.params().add_u32(2);
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error());
    assert_eq!(req.returns()[0].as_u32(), Some(42));
}

#[test]
fn unknown_method() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("no.such.thing");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert_eq!(req.error_code(), ecode::RPC_NO_SUCH_METHOD);
    assert_eq!(req.error_message(), "(RPC) No such method");
}

#[test]
fn wrong_parameter_types() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.add");
    req.params().add_str("oops");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert_eq!(req.error_code(), ecode::RPC_WRONG_PARAMS);
}

#[test]
fn application_error_codes_pass_through() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.fail");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert_eq!(req.error_code(), 0x1_0001);
    assert_eq!(req.error_message(), "application said no");
}

#[test]
fn timeout_on_detached_handler() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.detach");
    let waiter = Arc::new(CountingWait::default());
    let start = Instant::now();
    env.target
        .invoke_async(req.clone(), Duration::from_millis(250), waiter.clone());
    wait_until("timeout delivery", || {
        waiter.hits.load(Ordering::Acquire) == 1
    });
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(waiter.code.load(Ordering::Acquire), ecode::RPC_TIMEOUT);

    // the handler is still parked server side; let it answer now and make
    // sure nothing reaches the waiter a second time
    let server_req = env.probes.detach_stash.lock().take().unwrap();
    server_req.return_request();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(waiter.hits.load(Ordering::Acquire), 1);
}

#[test]
fn abort_on_detached_handler() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.detach");
    let waiter = Arc::new(CountingWait::default());
    env.target
        .invoke_async(req.clone(), Duration::from_secs(30), waiter.clone());
    // wait for the handler to actually detach before pulling the plug
    wait_until("server side detach", || {
        env.probes.detach_stash.lock().is_some()
    });
    assert!(req.abort());
    assert_eq!(waiter.hits.load(Ordering::Acquire), 1);
    assert_eq!(waiter.code.load(Ordering::Acquire), ecode::RPC_ABORT);

    // the late reply is discarded
    let server_req = env.probes.detach_stash.lock().take().unwrap();
    server_req.return_request();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(waiter.hits.load(Ordering::Acquire), 1);
}

#[test]
fn noreply_invocation_runs_without_answering() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.void");
    req.params().add_u32(7);
    env.target.invoke_void(req);
    wait_until("void handler", || {
        env.probes.void_calls.load(Ordering::Acquire) == 1
    });
    // the connection stays healthy and serves the next call
    let req = RpcRequest::new();
    req.set_method_name("frt.rpc.ping");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error());
    assert_eq!(env.probes.void_calls.load(Ordering::Acquire), 1);
}

#[test]
fn permission_denied() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.deny");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert_eq!(req.error_code(), ecode::RPC_PERMISSION_DENIED);
}

#[test]
fn type_mismatch_wins_over_access_filter() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("test.filtered");
    req.params().add_str("not an int");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert_eq!(req.error_code(), ecode::RPC_WRONG_PARAMS);
    // neither the filter nor the handler ever ran
    assert!(!env.probes.filter_consulted.load(Ordering::Acquire));
    assert!(!env.probes.handler_ran.load(Ordering::Acquire));

    // with matching params the filter is consulted and the handler runs
    let req = RpcRequest::new();
    req.set_method_name("test.filtered");
    req.params().add_u32(1);
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error());
    assert!(env.probes.filter_consulted.load(Ordering::Acquire));
    assert!(env.probes.handler_ran.load(Ordering::Acquire));
}

#[test]
fn method_list_contains_builtins_and_registrations() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("frt.rpc.getMethodList");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error());
    let returns = req.returns();
    assert_eq!(returns.type_string(), b"SSS");
    let names = returns[0].as_str_array().unwrap();
    let specs = returns[1].as_str_array().unwrap();
    assert_eq!(names.len(), specs.len());
    let find = |name: &str| names.iter().position(|n| &**n == name);
    assert!(find("frt.rpc.ping").is_some());
    assert!(find("frt.rpc.echo").is_some());
    let add = find("test.add").unwrap();
    assert_eq!(&*specs[add], "ii");
}

#[test]
fn method_info_metadata() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("frt.rpc.getMethodInfo");
    req.params().add_str("test.m");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error(), "{}", req.error_message());
    let returns = req.returns();
    assert_eq!(returns.type_string(), b"sssSSSS");
    assert_eq!(returns[0].as_str(), Some("adds"));
    assert_eq!(returns[1].as_str(), Some("is"));
    assert_eq!(returns[2].as_str(), Some("d"));
    let param_names = returns[3].as_str_array().unwrap();
    assert_eq!(param_names.len(), 2);
    assert_eq!(&*param_names[0], "n");
    assert_eq!(&*param_names[1], "s");
    let return_names = returns[5].as_str_array().unwrap();
    assert_eq!(return_names.len(), 1);
    assert_eq!(&*return_names[0], "r");
}

#[test]
fn method_info_padding_for_partial_docs() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("frt.rpc.getMethodInfo");
    req.params().add_str("test.partial");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error());
    let returns = req.returns();
    // two params registered, one documented: the doc still declares two
    let param_names = returns[3].as_str_array().unwrap();
    assert_eq!(param_names.len(), 2);
    assert_eq!(&*param_names[0], "only_one");
    assert_eq!(&*param_names[1], "?");
    let param_descs = returns[4].as_str_array().unwrap();
    assert_eq!(&*param_descs[1], "???");
    // undocumented method description defaults
    assert_eq!(returns[0].as_str(), Some("???"));
    // one return value, zero documented
    let return_names = returns[5].as_str_array().unwrap();
    assert_eq!(return_names.len(), 1);
    assert_eq!(&*return_names[0], "?");
}

#[test]
fn method_info_for_unknown_method_fails() {
    let env = setup();
    let req = RpcRequest::new();
    req.set_method_name("frt.rpc.getMethodInfo");
    req.params().add_str("no.such.thing");
    env.target.invoke_sync(&req, SYNC_TIMEOUT);
    assert_eq!(req.error_code(), ecode::RPC_METHOD_FAILED);
    assert_eq!(req.error_message(), "No such method");
}

#[test]
fn two_way_target_serves_calls() {
    // a two-way target exposes the caller's methods to the callee; plain
    // calls keep working over it
    let server = StandaloneRpc::new().unwrap();
    let probes = ServerProbes::default();
    register_test_methods(server.supervisor(), &probes);
    let port = server.supervisor().listen("tcp/127.0.0.1:0").unwrap();
    let client = StandaloneRpc::new().unwrap();
    let target = client
        .supervisor()
        .get_2way_target(&format!("tcp/127.0.0.1:{port}"))
        .unwrap();
    let req = RpcRequest::new();
    req.set_method_name("frt.rpc.ping");
    target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error());
}

#[test]
fn connection_loss_fails_outstanding_calls() {
    let server = StandaloneRpc::new().unwrap();
    let probes = ServerProbes::default();
    register_test_methods(server.supervisor(), &probes);
    let port = server.supervisor().listen("tcp/127.0.0.1:0").unwrap();
    let client = StandaloneRpc::new().unwrap();
    let target = client
        .supervisor()
        .get_target(&format!("tcp/127.0.0.1:{port}"))
        .unwrap();

    // park a call server side, then kill the server
    let req = RpcRequest::new();
    req.set_method_name("test.detach");
    let waiter = Arc::new(CountingWait::default());
    target.invoke_async(req.clone(), Duration::from_secs(30), waiter.clone());
    wait_until("server side detach", || probes.detach_stash.lock().is_some());
    probes.detach_stash.lock().take();
    drop(server);
    wait_until("channel loss delivery", || {
        waiter.hits.load(Ordering::Acquire) == 1
    });
    assert_eq!(waiter.code.load(Ordering::Acquire), ecode::RPC_CONNECTION);
}

#[test]
fn connect_to_dead_port_fails() {
    let client = StandaloneRpc::new().unwrap();
    // a freshly bound-and-dropped port is about as dead as it gets
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);
    assert!(client
        .supervisor()
        .get_target(&format!("tcp/127.0.0.1:{port}"))
        .is_err());
}

#[test]
fn capability_filter_enforces_connection_caps() {
    use crate::{
        auth::{Capability, RequireCapabilities},
        config::RpcConfig,
    };
    // accepted connections only authenticate the `search` capability
    let cfg = RpcConfig {
        auth_capabilities: Some(vec!["search".to_owned()]),
        ..RpcConfig::default()
    };
    let server = StandaloneRpc::with_config(cfg).unwrap();
    {
        let mut rb = ReflectionBuilder::new(server.supervisor());
        rb.define_method("test.admin", "", "", MethodPt::borrowing(|_| ()));
        rb.request_access_filter(Some(RequireCapabilities::of(Capability::Admin)));
        rb.define_method("test.search", "", "", MethodPt::borrowing(|_| ()));
        rb.request_access_filter(Some(RequireCapabilities::of(Capability::Search)));
    }
    let port = server.supervisor().listen("tcp/127.0.0.1:0").unwrap();
    let client = StandaloneRpc::new().unwrap();
    let target = client
        .supervisor()
        .get_target(&format!("tcp/127.0.0.1:{port}"))
        .unwrap();

    let req = RpcRequest::new();
    req.set_method_name("test.admin");
    target.invoke_sync(&req, SYNC_TIMEOUT);
    assert_eq!(req.error_code(), ecode::RPC_PERMISSION_DENIED);
    assert_eq!(req.error_message(), "(RPC) Permission denied");

    let req = RpcRequest::new();
    req.set_method_name("test.search");
    target.invoke_sync(&req, SYNC_TIMEOUT);
    assert!(!req.is_error());
}

/*
    supervisor behavior
*/

#[test]
fn listen_twice_fails() {
    let server = StandaloneRpc::new().unwrap();
    let port = server.supervisor().listen("tcp/127.0.0.1:0").unwrap();
    assert_eq!(server.supervisor().listen_port(), Some(port));
    assert!(server.supervisor().listen("tcp/127.0.0.1:0").is_err());
}

#[test]
fn request_allocation_recycles_tradeins() {
    let server = StandaloneRpc::new().unwrap();
    let supervisor = server.supervisor();

    let req = supervisor.alloc_rpc_request(None);
    req.set_method_name("reusable");
    req.params().add_u32(1);
    // the tradein is consumed: keep only the raw identity for the assert
    let identity = Arc::as_ptr(&req);
    let recycled = supervisor.alloc_rpc_request(Some(req));
    assert!(std::ptr::eq(identity, Arc::as_ptr(&recycled)));
    assert!(recycled.params().is_empty());
    assert_eq!(recycled.method_name(), "");

    // an errored tradein is replaced by a fresh request
    recycled.set_error(ecode::RPC_GENERAL_ERROR);
    let identity = Arc::as_ptr(&recycled);
    let fresh = supervisor.alloc_rpc_request(Some(recycled));
    assert!(!std::ptr::eq(identity, Arc::as_ptr(&fresh)));
    assert!(!fresh.is_error());
}
