//! VMC tracking receiver
//!
//! Owns a UDP socket and a receive task. Bone updates accumulate in a
//! private working buffer; after each datagram is fully applied a deep copy
//! is published through a watch channel, so readers always observe either
//! the previous complete snapshot or the next complete one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use marionette_core::tracking::{BoneAliases, BoneTransform, TrackingSnapshot, TrackingSource};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Listener is already running")]
    AlreadyRunning,
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Receiver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ListenerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
}

impl ListenerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Starting,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Receiver health counters for diagnostics display
#[derive(Debug, Clone)]
pub struct ListenerDiagnostics {
    pub state: ListenerState,
    pub total_packets: u64,
    pub bone_packets: u64,
    pub last_packet_age: Option<Duration>,
    pub active_bones: usize,
}

struct Inner {
    state: AtomicU8,
    total_packets: AtomicU64,
    bone_packets: AtomicU64,
    last_packet: Mutex<Option<Instant>>,
    snapshot_tx: watch::Sender<Arc<TrackingSnapshot>>,
    aliases: BoneAliases,
}

impl Inner {
    fn set_state(&self, state: ListenerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::SeqCst))
    }
}

/// VMC/OSC tracking receiver publishing atomic pose snapshots.
pub struct VmcListener {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl VmcListener {
    pub fn new(aliases: BoneAliases) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(TrackingSnapshot::default()));
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ListenerState::Stopped as u8),
                total_packets: AtomicU64::new(0),
                bone_packets: AtomicU64::new(0),
                last_packet: Mutex::new(None),
                snapshot_tx,
                aliases,
            }),
            task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Bind the socket and spawn the receive loop.
    ///
    /// Starting an already-running listener is a configuration mistake and
    /// returns an error rather than silently doing nothing.
    pub async fn start(&self, bind: &str, port: u16) -> Result<(), ListenerError> {
        if self.inner.state() != ListenerState::Stopped {
            return Err(ListenerError::AlreadyRunning);
        }
        self.inner.set_state(ListenerState::Starting);

        let addr = format!("{bind}:{port}");
        let socket = match UdpSocket::bind(&addr).await {
            Ok(s) => s,
            Err(source) => {
                self.inner.set_state(ListenerState::Stopped);
                return Err(ListenerError::Bind { addr, source });
            }
        };
        *self.local_addr.lock().unwrap() = socket.local_addr().ok();

        self.inner.total_packets.store(0, Ordering::SeqCst);
        self.inner.bone_packets.store(0, Ordering::SeqCst);
        *self.inner.last_packet.lock().unwrap() = None;
        self.inner
            .snapshot_tx
            .send_replace(Arc::new(TrackingSnapshot::default()));

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            receive_loop(socket, inner).await;
        });
        *self.task.lock().unwrap() = Some(handle);

        self.inner.set_state(ListenerState::Running);
        info!(addr = %addr, "VMC listener started");
        Ok(())
    }

    /// Stop the receive loop, drop the socket and clear published state.
    pub fn stop(&self) {
        if self.inner.state() == ListenerState::Stopped {
            return;
        }
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        *self.local_addr.lock().unwrap() = None;
        self.inner
            .snapshot_tx
            .send_replace(Arc::new(TrackingSnapshot::default()));
        self.inner.set_state(ListenerState::Stopped);
        info!("VMC listener stopped");
    }

    pub fn state(&self) -> ListenerState {
        self.inner.state()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state() == ListenerState::Running
    }

    /// Actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Watch handle for consumers that want to await new snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<TrackingSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn diagnostics(&self) -> ListenerDiagnostics {
        ListenerDiagnostics {
            state: self.inner.state(),
            total_packets: self.inner.total_packets.load(Ordering::SeqCst),
            bone_packets: self.inner.bone_packets.load(Ordering::SeqCst),
            last_packet_age: self.inner.last_packet.lock().unwrap().map(|t| t.elapsed()),
            active_bones: self.inner.snapshot_tx.borrow().len(),
        }
    }
}

impl TrackingSource for VmcListener {
    fn latest(&self) -> Arc<TrackingSnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }
}

impl Drop for VmcListener {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn receive_loop(socket: UdpSocket, inner: Arc<Inner>) {
    let mut buf = vec![0u8; 65536];
    let mut working: HashMap<String, BoneTransform> = HashMap::new();

    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                // Socket failure stops the receiver; snapshot readers keep
                // seeing the last published frame.
                warn!(error = %e, "VMC socket error, receiver stopping");
                inner.set_state(ListenerState::Stopped);
                return;
            }
        };

        inner.total_packets.fetch_add(1, Ordering::Relaxed);
        *inner.last_packet.lock().unwrap() = Some(Instant::now());

        let mut dirty = false;
        for msg in crate::osc::decode_packet(&buf[..len]) {
            if !msg.address.starts_with(crate::osc::VMC_PREFIX) {
                continue;
            }
            inner.bone_packets.fetch_add(1, Ordering::Relaxed);

            let Some(pose) = crate::osc::parse_bone_pose(&msg) else {
                continue;
            };
            let Some(bone) = inner.aliases.normalize(&pose.name) else {
                debug!(bone = %pose.name, "Dropping unrecognized bone");
                continue;
            };

            let rotation = if pose.rotation.length_squared() > 1e-8 {
                pose.rotation.normalize()
            } else {
                glam::Quat::IDENTITY
            };
            working.insert(
                bone.to_string(),
                BoneTransform { position: pose.position, rotation },
            );
            dirty = true;
        }

        // Publish only whole frames: the working buffer is copied after the
        // datagram has been fully applied.
        if dirty {
            inner
                .snapshot_tx
                .send_replace(Arc::new(TrackingSnapshot::new(working.clone())));
        }
    }
}
