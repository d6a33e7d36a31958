//! gpsd sampler implementation

use async_trait::async_trait;
use carga_api::TrackingSample;
use carga_geo_api::{
    LocationSampler, PositionOptions, SamplerError, SamplerResult, Watch, WatchBackend,
    WatchEvent, WatchHandle,
};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::protocol::{Report, WATCH_COMMAND, parse_report};

/// Pause between reconnect attempts after gpsd goes away
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
struct CachedFix {
    sample: TrackingSample,
    at: Instant,
}

/// Location sampler backed by a gpsd daemon
pub struct GpsdSampler {
    address: String,
    next_id: AtomicU64,
    cache: Arc<Mutex<Option<CachedFix>>>,
    /// Outcome of the latest connection attempt
    reachable: Arc<AtomicBool>,
    watches: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl GpsdSampler {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            next_id: AtomicU64::new(1),
            cache: Arc::new(Mutex::new(None)),
            reachable: Arc::new(AtomicBool::new(false)),
            watches: Mutex::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect once and drop the connection, recording whether gpsd answered
    pub async fn check_connection(&self) -> bool {
        match self.open().await {
            Ok(_) => true,
            Err(e) => {
                debug!(address = %self.address, error = %e, "gpsd connection check failed");
                false
            }
        }
    }

    async fn open(&self) -> SamplerResult<Connection> {
        let result = connect(&self.address).await;
        self.reachable.store(result.is_ok(), Ordering::SeqCst);
        result
    }

    fn cached(&self, maximum_age: Duration) -> Option<TrackingSample> {
        cached_fix(&self.cache, maximum_age)
    }
}

fn cached_fix(cache: &Mutex<Option<CachedFix>>, maximum_age: Duration) -> Option<TrackingSample> {
    if maximum_age.is_zero() {
        return None;
    }

    let fix = *cache.lock().unwrap();
    fix.filter(|cached| cached.at.elapsed() <= maximum_age)
        .map(|cached| cached.sample)
}

fn store_fix(cache: &Mutex<Option<CachedFix>>, sample: TrackingSample) {
    *cache.lock().unwrap() = Some(CachedFix {
        sample,
        at: Instant::now(),
    });
}

/// A gpsd connection in JSON watch mode
struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    // gpsd drops the watch when our side shuts down
    _writer: OwnedWriteHalf,
}

/// Open a connection and enable JSON watch mode
async fn connect(address: &str) -> SamplerResult<Connection> {
    let stream = TcpStream::connect(address).await.map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => SamplerError::PermissionDenied,
        _ => SamplerError::UnsupportedEnvironment(format!("gpsd at {}: {}", address, e)),
    })?;

    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(WATCH_COMMAND.as_bytes())
        .await
        .map_err(|e| SamplerError::PositionUnavailable(format!("gpsd write failed: {}", e)))?;

    Ok(Connection {
        lines: BufReader::new(read_half).lines(),
        _writer: write_half,
    })
}

/// Read lines until a fix arrives.
///
/// Returns `Ok(None)` when gpsd closes the connection.
async fn next_fix(conn: &mut Connection) -> io::Result<Option<TrackingSample>> {
    while let Some(line) = conn.lines.next_line().await? {
        match parse_report(&line) {
            Ok(Report::Fix(sample)) => return Ok(Some(sample)),
            Ok(Report::NoFix) => debug!("gpsd reports no fix"),
            Ok(Report::Other) => {}
            Err(e) => debug!(error = %e, "Ignoring unparseable gpsd line"),
        }
    }
    Ok(None)
}

#[async_trait]
impl LocationSampler for GpsdSampler {
    fn name(&self) -> &'static str {
        "gpsd"
    }

    async fn current_location(&self, options: PositionOptions) -> SamplerResult<TrackingSample> {
        if let Some(sample) = self.cached(options.maximum_age) {
            debug!("Returning cached gpsd fix");
            return Ok(sample);
        }

        let read = async {
            let mut conn = self.open().await?;
            match next_fix(&mut conn).await {
                Ok(Some(sample)) => Ok(sample),
                Ok(None) => Err(SamplerError::PositionUnavailable(
                    "gpsd closed the connection".into(),
                )),
                Err(e) => Err(SamplerError::PositionUnavailable(e.to_string())),
            }
        };

        let sample = tokio::time::timeout(options.timeout, read)
            .await
            .map_err(|_| SamplerError::Timeout)??;

        store_fix(&self.cache, sample);
        Ok(sample)
    }

    async fn watch(&self, options: PositionOptions) -> SamplerResult<Watch> {
        let conn = self.open().await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(sample) = self.cached(options.maximum_age) {
            let _ = tx.send(WatchEvent::Sample(sample));
        }

        let task = tokio::spawn(run_watch(
            id,
            self.address.clone(),
            conn,
            options,
            self.cache.clone(),
            self.reachable.clone(),
            tx,
        ));
        self.watches.lock().unwrap().insert(id, task);

        info!(watch_id = id, address = %self.address, "gpsd watch started");

        Ok(Watch {
            handle: WatchHandle::new(id, WatchBackend::Gpsd),
            events: rx,
        })
    }

    fn unwatch(&self, handle: &WatchHandle) {
        if handle.backend() != WatchBackend::Gpsd {
            warn!(handle = %handle, "Ignoring foreign watch handle");
            return;
        }

        if let Some(task) = self.watches.lock().unwrap().remove(&handle.id()) {
            task.abort();
            info!(watch_id = handle.id(), "gpsd watch released");
        }
    }

    /// gpsd answered the last connection attempt and no watch task has died
    fn is_healthy(&self) -> bool {
        if !self.reachable.load(Ordering::SeqCst) {
            return false;
        }
        let watches = self.watches.lock().unwrap();
        watches.values().all(|task| !task.is_finished())
    }
}

impl Drop for GpsdSampler {
    fn drop(&mut self) {
        for (_, task) in self.watches.lock().unwrap().drain() {
            task.abort();
        }
    }
}

/// Drain one gpsd connection into a watch channel, reconnecting on loss
async fn run_watch(
    id: u64,
    address: String,
    mut conn: Connection,
    options: PositionOptions,
    cache: Arc<Mutex<Option<CachedFix>>>,
    reachable: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<WatchEvent>,
) {
    loop {
        match tokio::time::timeout(options.timeout, next_fix(&mut conn)).await {
            Ok(Ok(Some(sample))) => {
                store_fix(&cache, sample);
                if tx.send(WatchEvent::Sample(sample)).is_err() {
                    return;
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) => {
                warn!(watch_id = id, "Lost connection to gpsd, reconnecting");
                reachable.store(false, Ordering::SeqCst);
                let lost = SamplerError::PositionUnavailable("lost connection to gpsd".into());
                if tx.send(WatchEvent::Error(lost)).is_err() {
                    return;
                }

                match reconnect(&address, &tx).await {
                    Some(fresh) => {
                        reachable.store(true, Ordering::SeqCst);
                        conn = fresh;
                    }
                    None => return,
                }
            }
            Err(_) => {
                if tx.send(WatchEvent::Error(SamplerError::Timeout)).is_err() {
                    return;
                }
            }
        }
    }
}

/// Retry until gpsd accepts a connection or the watch is dropped
async fn reconnect(address: &str, tx: &mpsc::UnboundedSender<WatchEvent>) -> Option<Connection> {
    loop {
        tokio::time::sleep(RECONNECT_DELAY).await;

        if tx.is_closed() {
            return None;
        }

        match connect(address).await {
            Ok(conn) => {
                info!(address = %address, "Reconnected to gpsd");
                return Some(conn);
            }
            Err(e) => debug!(error = %e, "gpsd still unavailable"),
        }
    }
}
