/*
 * Created on Wed Apr 03 2024
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

//! The framed TCP transport. Each frame is `<plen:u32><pcode:u32><chid:u32>`
//! in network byte order followed by `plen` body bytes; the packet code's low
//! 16 bits pick the shape, the high 16 bits carry the flags. A connection runs
//! one reader task and one writer task; replies posted from any thread are
//! written in post order. Channels are plain ids: a client call registers its
//! adapter under a fresh id, and a server reply echoes the id of the request
//! frame it answers.

use {
    crate::{
        auth::CapabilitySet,
        config::RpcConfig,
        error::{ecode, RuntimeResult},
        invoke::{PacketEvent, RequestWait, RpcAdapter, SingleReqWait},
        packet::{self, DecodedPacket, RpcPacket},
        request::RpcRequest,
        supervisor::Supervisor,
    },
    bytes::{BufMut, BytesMut},
    parking_lot::Mutex,
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{
            atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering},
            Arc, Weak,
        },
        time::Duration,
    },
    tokio::{
        io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
        net::{
            tcp::{OwnedReadHalf, OwnedWriteHalf},
            TcpListener, TcpStream,
        },
        runtime::Handle,
        sync::{
            mpsc::{self, UnboundedReceiver, UnboundedSender},
            OwnedSemaphorePermit, Semaphore,
        },
        task::JoinHandle,
        time::sleep,
    },
};

pub(crate) const FRAME_HEADER: usize = 12;
/// Timeouts at or above one year are treated as "no timeout"
pub const ONE_YEAR: Duration = Duration::from_secs(3600 * 24 * 365);

/// Parse an address spec: `tcp/port` or `tcp/host:port`
pub fn parse_spec(spec: &str) -> RuntimeResult<(String, u16)> {
    let rest = spec
        .strip_prefix("tcp/")
        .ok_or("address spec must start with `tcp/`")?;
    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| "invalid port in address spec")?;
            Ok((host.to_owned(), port))
        }
        None => {
            let port = rest.parse().map_err(|_| "invalid port in address spec")?;
            Ok(("0.0.0.0".to_owned(), port))
        }
    }
}

/*
    scheduler
*/

#[derive(Clone)]
/// Hands delayed work to the runtime that drives a connection's I/O. Only the
/// scheduling contract is used here; the runtime owns the clock
pub struct Scheduler {
    handle: Handle,
}

impl Scheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
    /// Run `task` after `after`. Dropping or aborting the returned handle
    /// cancels the task
    pub fn schedule(&self, after: Duration, task: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
        self.handle.spawn(async move {
            sleep(after).await;
            task();
        })
    }
}

/*
    frames
*/

pub(crate) fn encode_frame(packet: &RpcPacket, chid: u32) -> BytesMut {
    let len = packet.wire_len();
    let mut buf = BytesMut::with_capacity(FRAME_HEADER + len);
    buf.put_u32(len as u32);
    buf.put_u32(packet.pcode());
    buf.put_u32(chid);
    packet.encode(&mut buf);
    buf
}

enum WriteOp {
    Frame(BytesMut),
    Shutdown,
}

/*
    connection
*/

/// One framed TCP connection. Outbound calls register their adapters in the
/// pending map under the channel id they were sent with; the reader routes
/// request frames to the local supervisor (if any) and everything else to the
/// pending adapter for its channel
pub struct Connection {
    tx: UnboundedSender<WriteOp>,
    pending: Mutex<HashMap<u32, Arc<RpcAdapter>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_chid: AtomicU32,
    closed: AtomicBool,
    auth_caps: CapabilitySet,
    peer: Box<str>,
    supervisor: Weak<Supervisor>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    /// Take ownership of a stream and start its reader and writer tasks
    pub(crate) fn spawn(
        stream: TcpStream,
        supervisor: Weak<Supervisor>,
        auth_caps: CapabilitySet,
        scheduler: Scheduler,
        cfg: &RpcConfig,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Arc<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "(unknown)".to_owned());
        if let Err(e) = stream.set_nodelay(cfg.tcp_nodelay) {
            warn!("failed to set nodelay on connection to {peer}: `{e}`");
        }
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            tx,
            pending: Mutex::new(HashMap::new()),
            reader: Mutex::new(None),
            next_chid: AtomicU32::new(1),
            closed: AtomicBool::new(false),
            auth_caps,
            peer: peer.into(),
            supervisor,
            _permit: permit,
        });
        let reader = scheduler.handle().spawn(reader_task(
            conn.clone(),
            read_half,
            cfg.buf_read_cap,
            cfg.max_packet_size,
        ));
        *conn.reader.lock() = Some(reader);
        scheduler
            .handle()
            .spawn(writer_task(conn.clone(), write_half, rx, cfg.buf_write_cap));
        conn
    }
    pub fn peer(&self) -> &str {
        &self.peer
    }
    /// The capability set the peer authenticated for
    pub fn auth_caps(&self) -> CapabilitySet {
        self.auth_caps
    }
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
    fn alloc_chid(&self) -> u32 {
        self.next_chid.fetch_add(1, Ordering::Relaxed)
    }
    /// Register an adapter under a fresh channel id. Fails once the connection
    /// is closed
    pub(crate) fn open_channel(&self, adapter: Arc<RpcAdapter>) -> Option<u32> {
        let mut pending = self.pending.lock();
        if self.is_closed() {
            return None;
        }
        let chid = self.alloc_chid();
        pending.insert(chid, adapter);
        Some(chid)
    }
    pub(crate) fn unregister(&self, chid: u32) -> bool {
        self.pending.lock().remove(&chid).is_some()
    }
    /// Queue a frame for the writer task. Frames from one thread go out in
    /// post order
    pub(crate) fn post(&self, frame: BytesMut) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(WriteOp::Frame(frame)).is_ok()
    }
    /// Shut the connection down: stop both tasks and fail every outstanding
    /// call with a channel loss. Idempotent
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.tx.send(WriteOp::Shutdown);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.drain_pending();
    }
    fn drain_pending(&self) {
        let adapters: Vec<Arc<RpcAdapter>> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, adapter)| adapter).collect()
        };
        for adapter in adapters {
            adapter.handle_packet(PacketEvent::ChannelLost);
        }
    }
}

async fn reader_task(
    conn: Arc<Connection>,
    read_half: OwnedReadHalf,
    buf_cap: usize,
    max_packet_size: u32,
) {
    let mut reader = BufReader::with_capacity(buf_cap, read_half);
    loop {
        let mut header = [0u8; FRAME_HEADER];
        if reader.read_exact(&mut header).await.is_err() {
            break;
        }
        let plen = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let pcode = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let chid = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);
        if plen > max_packet_size {
            warn!(
                "dropping connection to {}: frame of {plen}B exceeds the packet size limit",
                conn.peer()
            );
            break;
        }
        let mut body = vec![0u8; plen as usize];
        if reader.read_exact(&mut body).await.is_err() {
            break;
        }
        let code = pcode & 0xFFFF;
        // only the RPC packet code range is accepted on a channel
        if !(packet::PCODE_RPC_FIRST..=packet::PCODE_RPC_LAST).contains(&code) {
            warn!(
                "dropping connection to {}: unsupported packet code {code}",
                conn.peer()
            );
            break;
        }
        if code == packet::PCODE_RPC_REQUEST {
            match conn.supervisor.upgrade() {
                Some(supervisor) => supervisor.handle_packet(&conn, chid, pcode, &body),
                None => warn!(
                    "request packet from {} on a connection with no local supervisor; dropped",
                    conn.peer()
                ),
            }
        } else {
            let adapter = conn.pending.lock().remove(&chid);
            match adapter {
                Some(adapter) => {
                    let event = match packet::decode_into(adapter.request(), pcode, &body) {
                        Some(DecodedPacket::Reply) | Some(DecodedPacket::Error) => {
                            PacketEvent::Regular
                        }
                        // a request shape or a framing error on a reply channel
                        _ => PacketEvent::Bad,
                    };
                    adapter.handle_packet(event);
                }
                None => debug!("dropped packet for completed channel {chid}"),
            }
        }
    }
    conn.close();
}

async fn writer_task(
    conn: Arc<Connection>,
    write_half: OwnedWriteHalf,
    mut rx: UnboundedReceiver<WriteOp>,
    buf_cap: usize,
) {
    let mut writer = BufWriter::with_capacity(buf_cap, write_half);
    'run: loop {
        match rx.recv().await {
            Some(WriteOp::Frame(frame)) => {
                if writer.write_all(&frame).await.is_err() {
                    break;
                }
                // drain whatever else is already queued, then flush once
                while let Ok(op) = rx.try_recv() {
                    match op {
                        WriteOp::Frame(frame) => {
                            if writer.write_all(&frame).await.is_err() {
                                break 'run;
                            }
                        }
                        WriteOp::Shutdown => break 'run,
                    }
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            Some(WriteOp::Shutdown) | None => break,
        }
    }
    let _ = writer.shutdown().await;
    conn.close();
}

/*
    channels
*/

#[derive(Clone)]
/// The server side handle to the conversation a request arrived on: replies go
/// out on the same connection under the same channel id
pub struct ServerChannel {
    conn: Arc<Connection>,
    chid: u32,
}

impl ServerChannel {
    pub(crate) fn new(conn: Arc<Connection>, chid: u32) -> Self {
        Self { conn, chid }
    }
    pub fn conn(&self) -> &Arc<Connection> {
        &self.conn
    }
    pub(crate) fn send(&self, packet: RpcPacket) -> bool {
        self.conn.post(encode_frame(&packet, self.chid))
    }
}

/// The client side handle to one in-flight conversation
pub(crate) struct ClientChannel {
    conn: Arc<Connection>,
    chid: u32,
}

impl ClientChannel {
    pub(crate) fn close(&self) {
        self.conn.unregister(self.chid);
    }
}

/*
    target
*/

/// A client side reference to a remote endpoint: a connection plus the
/// scheduler of its transport. Dropping the last reference closes the
/// connection
pub struct Target {
    conn: Arc<Connection>,
    scheduler: Scheduler,
}

impl Target {
    pub(crate) fn new(conn: Arc<Connection>, scheduler: Scheduler) -> Arc<Self> {
        Arc::new(Self { conn, scheduler })
    }
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
    pub fn is_valid(&self) -> bool {
        !self.conn.is_closed()
    }
    /// Send `req` and return immediately; the waiter is invoked on completion.
    /// A timeout task is scheduled for 0 < `timeout` < one year
    pub fn invoke_async(
        &self,
        req: Arc<RpcRequest>,
        timeout: Duration,
        waiter: Arc<dyn RequestWait>,
    ) {
        let adapter = RpcAdapter::new(req.clone(), waiter);
        let packet = req.create_request_packet(true);
        match self.conn.open_channel(adapter.clone()) {
            Some(chid) => {
                adapter.set_channel(ClientChannel {
                    conn: self.conn.clone(),
                    chid,
                });
                if timeout > Duration::ZERO && timeout < ONE_YEAR {
                    adapter.schedule(&self.scheduler, timeout);
                }
                // if the connection raced shut here, the pending drain fails
                // the call with a channel loss
                self.conn.post(encode_frame(&packet, chid));
            }
            None => {
                req.set_error(ecode::RPC_CONNECTION);
                adapter.perform_task();
            }
        }
    }
    /// Send `req` and block the calling thread until it completes. Must not be
    /// called from a transport thread
    pub fn invoke_sync(&self, req: &Arc<RpcRequest>, timeout: Duration) {
        let waiter = SingleReqWait::new();
        self.invoke_async(req.clone(), timeout, waiter.clone());
        waiter.wait_req();
    }
    /// Send `req` with NOREPLY and forget it: no timeout, no waiter, and no
    /// reply or error packet on any path
    pub fn invoke_void(&self, req: Arc<RpcRequest>) {
        let packet = req.create_request_packet(false);
        let chid = self.conn.alloc_chid();
        self.conn.post(encode_frame(&packet, chid));
    }
}

impl Drop for Target {
    fn drop(&mut self) {
        self.conn.close();
    }
}

/*
    listener
*/

/// Exponential backoff for a flapping accept loop
struct NetBackoff {
    at: AtomicU8,
}

impl NetBackoff {
    const BACKOFF_MAX: u8 = 64;
    fn new() -> Self {
        Self {
            at: AtomicU8::new(1),
        }
    }
    async fn spin(&self) {
        let current = self.at.load(Ordering::Relaxed);
        self.at.store(current << 1, Ordering::Relaxed);
        sleep(Duration::from_secs(current as _)).await
    }
    fn should_disconnect(&self) -> bool {
        self.at.load(Ordering::Relaxed) >= Self::BACKOFF_MAX
    }
}

async fn accept(listener: &TcpListener) -> std::io::Result<(TcpStream, SocketAddr)> {
    let backoff = NetBackoff::new();
    loop {
        match listener.accept().await {
            Ok(s) => return Ok(s),
            Err(e) => {
                if backoff.should_disconnect() {
                    // that's enough of your crappy network dear sir
                    return Err(e);
                }
            }
        }
        backoff.spin().await;
    }
}

/// The accept loop behind [`Supervisor::listen`]. Each accepted stream becomes
/// a server role connection holding one slot of the connection limit
pub(crate) async fn listen_loop(
    listener: TcpListener,
    supervisor: Weak<Supervisor>,
    cfg: RpcConfig,
    scheduler: Scheduler,
    auth_caps: CapabilitySet,
) {
    let climit = Arc::new(Semaphore::new(cfg.client_limit));
    loop {
        let permit = match climit.clone().acquire_owned().await {
            Ok(permit) => permit,
            // the semaphore is never closed
            Err(_) => return,
        };
        let (stream, _) = match accept(&listener).await {
            Ok(s) => s,
            Err(e) => {
                error!("failed to accept connection on RPC socket: `{e}`");
                return;
            }
        };
        Connection::spawn(
            stream,
            supervisor.clone(),
            auth_caps,
            scheduler.clone(),
            &cfg,
            Some(permit),
        );
    }
}
