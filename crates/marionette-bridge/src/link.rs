//! Outbound control link
//!
//! Maintains the connection to the remote actuation endpoint: coalesces the
//! latest commanded value per motor index, flushes at a fixed rate through a
//! batched request with per-joint fallback, and tracks connection health so
//! a restored endpoint self-heals without manual intervention.
//!
//! All network calls run on spawned tasks; the flush scheduler never blocks
//! the retargeting tick, and an in-flight guard prevents overlapping
//! transmissions when the endpoint is slow.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use marionette_retarget::JointFrame;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mapping::{plan_frame, JointTable, NUM_MOTORS};

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Flush loop rate in Hz
    pub flush_hz: u64,
    /// Consecutive failures before the link reports disconnected
    pub max_failures: u32,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    /// Bounded outbound queue for explicit set_joint commands
    pub queue_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            flush_hz: 50,
            max_failures: 10,
            request_timeout: Duration::from_millis(200),
            probe_timeout: Duration::from_millis(400),
            queue_capacity: 256,
        }
    }
}

/// Transmission counters
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub delta_skipped: u64,
    pub queue_full: u64,
}

/// Read-only connection state exposed to other components
#[derive(Debug, Clone)]
pub struct BridgeStatus {
    pub address: String,
    pub connected: bool,
    pub consecutive_failures: u32,
    pub stats: BridgeStats,
}

struct LinkState {
    base_url: String,
    queue: VecDeque<(usize, f32)>,
    /// Filter cache for the set_joint path, written at enqueue time
    last_queued: [Option<f32>; NUM_MOTORS],
    /// Filter cache for the frame path, written after successful sends
    last_frame: [Option<f32>; NUM_MOTORS],
    pending: Option<[Option<f32>; NUM_MOTORS]>,
    stats: BridgeStats,
    unknown_warned: HashMap<String, u32>,
}

struct Shared {
    client: reqwest::Client,
    table: JointTable,
    config: BridgeConfig,
    state: Mutex<LinkState>,
    connected: AtomicBool,
    failures: AtomicU32,
    in_flight: AtomicBool,
}

impl Shared {
    /// Sending is suppressed only after the failure streak passes the
    /// threshold; below it, attempts continue so a recovering endpoint is
    /// detected without manual reconnect.
    fn gave_up(&self) -> bool {
        !self.connected.load(Ordering::SeqCst)
            && self.failures.load(Ordering::SeqCst) > self.config.max_failures
    }

    fn record_success(&self, sent: u64) {
        let mut state = self.state.lock().unwrap();
        state.stats.sent += sent;
        drop(state);
        self.failures.store(0, Ordering::SeqCst);
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("Actuation endpoint reachable");
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock().unwrap();
        state.stats.failed += 1;
        drop(state);
        let streak = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.config.max_failures && self.connected.swap(false, Ordering::SeqCst) {
            warn!(failures = streak, "Actuation endpoint marked disconnected");
        }
    }
}

/// Bridge to the remote actuation endpoint.
pub struct ControlLink {
    shared: Arc<Shared>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl ControlLink {
    pub fn new(config: BridgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(400))
            .build()
            .expect("reqwest client");
        let base_url = format!("http://{}:{}", config.host, config.port);
        Self {
            shared: Arc::new(Shared {
                client,
                table: JointTable::default(),
                config,
                state: Mutex::new(LinkState {
                    base_url,
                    queue: VecDeque::new(),
                    last_queued: [None; NUM_MOTORS],
                    last_frame: [None; NUM_MOTORS],
                    pending: None,
                    stats: BridgeStats::default(),
                    unknown_warned: HashMap::new(),
                }),
                connected: AtomicBool::new(false),
                failures: AtomicU32::new(0),
                in_flight: AtomicBool::new(false),
            }),
            flush_task: Mutex::new(None),
        }
    }

    /// Spawn the fixed-rate flush loop and probe the endpoint.
    pub fn start(&self) {
        let mut task = self.flush_task.lock().unwrap();
        if task.is_some() {
            return;
        }

        let shared = self.shared.clone();
        tokio::spawn(async move { probe(&shared).await });

        let shared = self.shared.clone();
        let period = Duration::from_millis(1000 / self.shared.config.flush_hz.max(1));
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                flush_once(&shared);
            }
        }));
        info!(
            address = %self.shared.state.lock().unwrap().base_url,
            hz = self.shared.config.flush_hz,
            "Control link started"
        );
    }

    /// Cancel the flush loop. In-flight sends are dropped, not retried.
    pub fn shutdown(&self) {
        if let Some(task) = self.flush_task.lock().unwrap().take() {
            task.abort();
        }
        info!("Control link stopped");
    }

    /// Queue one explicit joint command. Low-rate API; the value is
    /// delta-filtered at enqueue time and merged into the next flush,
    /// yielding to a realtime frame that lands in the same tick.
    pub fn set_joint(&self, name: &str, value: f32) {
        let Some((canonical, mapping)) = self.shared.table.lookup(name) else {
            self.warn_unknown(name, "set_joint");
            return;
        };
        let mapping = *mapping;
        let v = JointTable::convert(&mapping, value);

        let mut state = self.shared.state.lock().unwrap();
        if let Some(prev) = state.last_queued[mapping.index] {
            if (v - prev).abs() < JointTable::delta_threshold(mapping.index) {
                state.stats.delta_skipped += 1;
                return;
            }
        }
        if state.queue.len() >= self.shared.config.queue_capacity {
            state.stats.queue_full += 1;
            return;
        }
        state.queue.push_back((mapping.index, v));
        state.last_queued[mapping.index] = Some(v);
        state.stats.queued += 1;
        debug!(joint = canonical, value = v, "Queued joint command");
    }

    /// Replace the pending realtime frame with the latest engine output.
    /// High-rate API; overwrites any frame still waiting from a previous
    /// tick.
    pub fn send_frame(&self, frame: &JointFrame) {
        if frame.is_empty() || self.shared.gave_up() {
            return;
        }
        let mut state = self.shared.state.lock().unwrap();
        let planned = plan_frame(&self.shared.table, frame, &state.last_frame);
        if planned.iter().any(|v| v.is_some()) {
            state.pending = Some(planned);
        }
    }

    /// Point the link at a new endpoint. Clears all cached last-sent
    /// values, the queue and the failure streak; safe to call while a
    /// flush is in progress.
    pub fn reconnect(&self, host: &str, port: u16) {
        info!(host = host, port = port, "Reconnecting control link");
        {
            let mut state = self.shared.state.lock().unwrap();
            state.base_url = format!("http://{host}:{port}");
            state.queue.clear();
            state.last_queued = [None; NUM_MOTORS];
            state.last_frame = [None; NUM_MOTORS];
            state.pending = None;
        }
        self.shared.failures.store(0, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);

        let shared = self.shared.clone();
        tokio::spawn(async move { probe(&shared).await });
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> BridgeStatus {
        let state = self.shared.state.lock().unwrap();
        BridgeStatus {
            address: state.base_url.clone(),
            connected: self.shared.connected.load(Ordering::SeqCst),
            consecutive_failures: self.shared.failures.load(Ordering::SeqCst),
            stats: state.stats.clone(),
        }
    }

    /// Fetch the endpoint's diagnostics payload.
    pub async fn fetch_stats(&self) -> Result<String> {
        let url = {
            let state = self.shared.state.lock().unwrap();
            format!("{}/?command=get_stats", state.base_url)
        };
        let response = self
            .shared
            .client
            .get(&url)
            .timeout(self.shared.config.request_timeout)
            .send()
            .await
            .context("get_stats request failed")?;
        response.text().await.context("get_stats body unreadable")
    }

    fn warn_unknown(&self, name: &str, origin: &str) {
        let mut state = self.shared.state.lock().unwrap();
        let count = state.unknown_warned.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count <= 3 {
            warn!(joint = name, origin = origin, "Unknown joint name");
        }
    }

    #[cfg(test)]
    fn test_shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for ControlLink {
    fn drop(&mut self) {
        if let Some(task) = self.flush_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// One flush cycle: merge pending frame and queued commands, then hand the
/// result to a send task if anything actually changed.
fn flush_once(shared: &Arc<Shared>) {
    if shared.in_flight.load(Ordering::SeqCst) {
        return;
    }

    let merged = {
        let mut state = shared.state.lock().unwrap();
        let pending = state.pending.take();
        let queued: Vec<(usize, f32)> = state.queue.drain(..).collect();
        merge_sources(pending, &queued)
    };
    if merged.iter().all(|v| v.is_none()) {
        return;
    }

    shared.in_flight.store(true, Ordering::SeqCst);
    let shared = shared.clone();
    tokio::spawn(async move {
        let ok = send_batch_or_fallback(&shared, &merged).await;
        if ok {
            let mut state = shared.state.lock().unwrap();
            for (slot, v) in state.last_frame.iter_mut().zip(merged.iter()) {
                if v.is_some() {
                    *slot = *v;
                }
            }
        }
        shared.in_flight.store(false, Ordering::SeqCst);
    });
}

/// Merge drained queue commands with the latest full-frame snapshot. The
/// frame wins for overlapping indices: it is the fresher source when both
/// arrive in the same tick.
fn merge_sources(
    pending: Option<[Option<f32>; NUM_MOTORS]>,
    queued: &[(usize, f32)],
) -> [Option<f32>; NUM_MOTORS] {
    let mut merged = [None; NUM_MOTORS];
    for &(index, value) in queued {
        if index < NUM_MOTORS {
            merged[index] = Some(value);
        }
    }
    if let Some(frame) = pending {
        for (slot, value) in merged.iter_mut().zip(frame.iter()) {
            if value.is_some() {
                *slot = *value;
            }
        }
    }
    merged
}

/// Batched transmission of all motor indices; untouched indices carry the
/// `nan` sentinel. Falls back to independent per-joint requests when the
/// batch fails.
async fn send_batch_or_fallback(shared: &Arc<Shared>, values: &[Option<f32>; NUM_MOTORS]) -> bool {
    if shared.gave_up() {
        return false;
    }

    let url = {
        let state = shared.state.lock().unwrap();
        format!(
            "{}/?command=set_joints&v={}",
            state.base_url,
            batch_values_param(values)
        )
    };

    match shared
        .client
        .get(&url)
        .timeout(shared.config.request_timeout)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            shared.record_success(NUM_MOTORS as u64);
            true
        }
        Ok(response) => {
            debug!(status = %response.status(), "Batch request rejected");
            shared.record_failure();
            fallback_per_joint(shared, values).await
        }
        Err(e) => {
            debug!(error = %e, "Batch request failed");
            shared.record_failure();
            fallback_per_joint(shared, values).await
        }
    }
}

async fn fallback_per_joint(shared: &Arc<Shared>, values: &[Option<f32>; NUM_MOTORS]) -> bool {
    let mut any_ok = false;
    for (index, value) in values.iter().enumerate() {
        let Some(v) = value else { continue };
        if send_single(shared, index, *v).await {
            any_ok = true;
        }
    }
    any_ok
}

async fn send_single(shared: &Arc<Shared>, index: usize, value: f32) -> bool {
    if shared.gave_up() {
        return false;
    }
    let url = {
        let state = shared.state.lock().unwrap();
        format!(
            "{}/?command=set_joint&index={}&value={:.4}",
            state.base_url, index, value
        )
    };
    match shared
        .client
        .get(&url)
        .timeout(shared.config.request_timeout)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            shared.record_success(1);
            true
        }
        _ => {
            shared.record_failure();
            false
        }
    }
}

/// Comma-separated value list for the batch query, `nan` for untouched
/// indices.
fn batch_values_param(values: &[Option<f32>; NUM_MOTORS]) -> String {
    let mut out = String::with_capacity(NUM_MOTORS * 9);
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match value {
            Some(v) => out.push_str(&format!("{v:.5}")),
            None => out.push_str("nan"),
        }
    }
    out
}

/// Connection probe via the read-only stats query.
async fn probe(shared: &Arc<Shared>) {
    let url = {
        let state = shared.state.lock().unwrap();
        format!("{}/?command=get_stats", state.base_url)
    };
    match shared
        .client
        .get(&url)
        .timeout(shared.config.probe_timeout)
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => {
            shared.failures.store(0, Ordering::SeqCst);
            shared.connected.store(true, Ordering::SeqCst);
            info!(url = %url, "Connected to actuation endpoint");
        }
        Ok(response) => {
            shared.connected.store(false, Ordering::SeqCst);
            warn!(status = %response.status(), "Endpoint probe rejected");
        }
        Err(e) => {
            shared.connected.store(false, Ordering::SeqCst);
            warn!(error = %e, "Endpoint probe failed");
        }
    }
}
