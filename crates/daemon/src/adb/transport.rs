//! Device transport served to one bridge client
//!
//! The bridge client (`adb connect host:port`) speaks the packet transport
//! as if the bridge were the device. The handshake is answered locally;
//! every stream the client opens is forwarded to the device as a service
//! through the adb server.
//!
//! Flow control follows the transport rules: each stream has at most one
//! unacknowledged WRTE in each direction. Client writes are acknowledged
//! only after they reach the service socket.

use super::client::AdbClient;
use bytes::Bytes;
use common::{BridgeAuth, Error, Result};
use protocol::packet::{
    A_VERSION, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN, AUTH_TOKEN_SIZE, Command,
    DEFAULT_MAX_PAYLOAD, Packet,
};
use protocol::{read_packet, write_packet};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

/// Feature never advertised to bridge clients; its ack accounting is not implemented
const DELAYED_ACK: &str = "delayed_ack";

/// Smallest payload size we honour from a client's CNXN
const MIN_PAYLOAD: usize = 4096;

/// Per-bridge state shared by its connections
pub struct BridgeContext {
    pub serial: String,
    pub client: AdbClient,
    pub auth: BridgeAuth,
}

struct StreamEntry {
    to_service: mpsc::Sender<Bytes>,
    acks: Arc<Semaphore>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for StreamEntry {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

type StreamMap = Arc<Mutex<HashMap<u32, StreamEntry>>>;

fn lock(streams: &StreamMap) -> MutexGuard<'_, HashMap<u32, StreamEntry>> {
    streams.lock().unwrap_or_else(|e| e.into_inner())
}

/// Serve one bridge client until it disconnects
pub async fn serve_connection(socket: TcpStream, ctx: Arc<BridgeContext>) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, writer) = socket.into_split();
    let (out_tx, out_rx) = mpsc::channel(64);
    let writer_task = tokio::spawn(write_loop(writer, out_rx));

    let mut connection = Connection::new(ctx, out_tx);
    let result = match connection.handshake(&mut reader).await {
        Ok(()) => connection.run(&mut reader).await,
        Err(e) => Err(e),
    };

    drop(connection);
    writer_task.abort();

    match result {
        Err(e) if e.is_connection_closed() => Ok(()),
        other => other,
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<Packet>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = rx.recv().await {
        trace!("-> {:?} {} {}", packet.command, packet.arg0, packet.arg1);
        if let Err(e) = write_packet(&mut writer, &packet).await {
            debug!("Bridge client write failed: {}", e);
            break;
        }
    }
}

struct Connection {
    ctx: Arc<BridgeContext>,
    out: mpsc::Sender<Packet>,
    streams: StreamMap,
    opening: JoinSet<()>,
    next_id: u32,
    max_payload: usize,
}

impl Connection {
    fn new(ctx: Arc<BridgeContext>, out: mpsc::Sender<Packet>) -> Self {
        Self {
            ctx,
            out,
            streams: Arc::new(Mutex::new(HashMap::new())),
            opening: JoinSet::new(),
            next_id: 0,
            max_payload: DEFAULT_MAX_PAYLOAD as usize,
        }
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        self.out
            .send(packet)
            .await
            .map_err(|_| Error::ConnectionClosed("bridge client writer stopped".to_string()))
    }

    /// Answer CNXN, running the AUTH exchange first when keys are verified
    async fn handshake<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut connect_seen = false;
        loop {
            let packet = read_packet(reader).await?;
            match packet.command {
                Command::Cnxn => {
                    connect_seen = true;
                    self.accept_connect(&packet);
                    match &self.ctx.auth {
                        BridgeAuth::AutoApprove => return self.send_connect().await,
                        BridgeAuth::Verify(_) => self.send_token().await?,
                    }
                }
                Command::Auth if connect_seen => match packet.arg0 {
                    // Signatures cannot be checked without the key; ask for the key instead
                    AUTH_SIGNATURE => self.send_token().await?,
                    AUTH_RSAPUBLICKEY => {
                        let approved = match &self.ctx.auth {
                            BridgeAuth::Verify(callback) => callback(&packet.payload[..]),
                            BridgeAuth::AutoApprove => true,
                        };
                        if !approved {
                            return Err(Error::Bridge(format!(
                                "client key rejected for {}",
                                self.ctx.serial
                            )));
                        }
                        info!("Approved client key for {}", self.ctx.serial);
                        return self.send_connect().await;
                    }
                    other => debug!("Ignoring AUTH type {} during handshake", other),
                },
                other => debug!("Ignoring {:?} before connection is established", other),
            }
        }
    }

    fn accept_connect(&mut self, packet: &Packet) {
        let requested = packet.arg1 as usize;
        self.max_payload = requested.clamp(MIN_PAYLOAD, DEFAULT_MAX_PAYLOAD as usize);
        debug!(
            "Bridge client for {} connected: version {:#x}, max payload {}",
            self.ctx.serial, packet.arg0, self.max_payload
        );
    }

    async fn send_token(&self) -> Result<()> {
        let mut token = [0u8; AUTH_TOKEN_SIZE];
        rand::rng().fill_bytes(&mut token);
        self.send(Packet::auth(AUTH_TOKEN, token.to_vec())).await
    }

    async fn send_connect(&self) -> Result<()> {
        let banner = match self.ctx.client.features(&self.ctx.serial).await {
            Ok(features) => {
                let features: Vec<String> = features
                    .into_iter()
                    .filter(|f| f != DELAYED_ACK)
                    .collect();
                format!("device::features={}", features.join(","))
            }
            Err(e) => {
                warn!("Cannot read features of {}: {}", self.ctx.serial, e);
                "device::".to_string()
            }
        };
        self.send(Packet::connect(A_VERSION, self.max_payload as u32, &banner))
            .await
    }

    async fn run<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let packet = read_packet(reader).await?;
            trace!("<- {:?} {} {}", packet.command, packet.arg0, packet.arg1);
            match packet.command {
                Command::Open => self.open_stream(packet),
                Command::Wrte => self.forward_write(packet).await?,
                Command::Okay => self.ack(&packet),
                Command::Clse => {
                    if lock(&self.streams).remove(&packet.arg1).is_some() {
                        debug!("Client closed stream {}", packet.arg1);
                    }
                }
                Command::Cnxn => {
                    // Client restarted its side; every stream is gone
                    lock(&self.streams).clear();
                    self.accept_connect(&packet);
                    self.send_connect().await?;
                }
                other => debug!("Ignoring {:?}", other),
            }
        }
    }

    fn allocate_id(&mut self) -> u32 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.next_id
    }

    fn open_stream(&mut self, packet: Packet) {
        let remote_id = packet.arg0;
        let service = match packet.payload_str() {
            Ok(service) => service.to_string(),
            Err(_) => {
                warn!("OPEN with a non-UTF-8 destination");
                let out = self.out.clone();
                self.opening.spawn(async move {
                    let _ = out.send(Packet::close(0, remote_id)).await;
                });
                return;
            }
        };

        let local_id = self.allocate_id();
        let ctx = self.ctx.clone();
        let out = self.out.clone();
        let streams = self.streams.clone();
        let max_payload = self.max_payload;

        self.opening.spawn(async move {
            let service_stream = match ctx.client.open_service(&ctx.serial, &service).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot open '{}' on {}: {}", service, ctx.serial, e);
                    let _ = out.send(Packet::close(0, remote_id)).await;
                    return;
                }
            };
            debug!("Stream {} -> '{}' on {}", local_id, service, ctx.serial);

            let (service_read, service_write) = service_stream.into_split();
            let (to_service, rx) = mpsc::channel(16);
            let acks = Arc::new(Semaphore::new(1));

            let writer = tokio::spawn(client_to_service(
                local_id,
                remote_id,
                service_write,
                rx,
                out.clone(),
            ));
            lock(&streams).insert(
                local_id,
                StreamEntry {
                    to_service,
                    acks: acks.clone(),
                    tasks: vec![writer],
                },
            );

            if out.send(Packet::okay(local_id, remote_id)).await.is_err() {
                return;
            }

            let pump = tokio::spawn(service_to_client(
                local_id,
                remote_id,
                service_read,
                out,
                acks,
                max_payload,
                streams.clone(),
            ));
            match lock(&streams).get_mut(&local_id) {
                Some(entry) => entry.tasks.push(pump),
                None => pump.abort(),
            }
        });
    }

    async fn forward_write(&self, packet: Packet) -> Result<()> {
        let local_id = packet.arg1;
        let to_service = lock(&self.streams)
            .get(&local_id)
            .map(|entry| entry.to_service.clone());

        match to_service {
            Some(tx) => {
                if tx.send(packet.payload).await.is_err() {
                    debug!("Service side of stream {} already gone", local_id);
                }
                Ok(())
            }
            None => {
                debug!("WRTE for unknown stream {}", local_id);
                self.send(Packet::close(0, packet.arg0)).await
            }
        }
    }

    fn ack(&self, packet: &Packet) {
        if let Some(entry) = lock(&self.streams).get(&packet.arg1) {
            // Never more than one write in flight
            if entry.acks.available_permits() == 0 {
                entry.acks.add_permits(1);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.opening.abort_all();
        lock(&self.streams).clear();
    }
}

async fn client_to_service<W>(
    local_id: u32,
    remote_id: u32,
    mut service: W,
    mut rx: mpsc::Receiver<Bytes>,
    out: mpsc::Sender<Packet>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(data) = rx.recv().await {
        if let Err(e) = service.write_all(&data).await {
            debug!("Service write on stream {} failed: {}", local_id, e);
            break;
        }
        if out.send(Packet::okay(local_id, remote_id)).await.is_err() {
            break;
        }
    }
    let _ = service.shutdown().await;
}

async fn service_to_client<R>(
    local_id: u32,
    remote_id: u32,
    mut service: R,
    out: mpsc::Sender<Packet>,
    acks: Arc<Semaphore>,
    max_payload: usize,
    streams: StreamMap,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max_payload];
    loop {
        let n = match service.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Service read on stream {} failed: {}", local_id, e);
                break;
            }
        };

        match acks.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return,
        }
        let data = Bytes::copy_from_slice(&buf[..n]);
        if out
            .send(Packet::write(local_id, remote_id, data))
            .await
            .is_err()
        {
            return;
        }
    }

    let _ = out.send(Packet::close(local_id, remote_id)).await;
    // Removing the entry aborts this task; nothing awaits after it
    lock(&streams).remove(&local_id);
}
