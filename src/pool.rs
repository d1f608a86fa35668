//! # Connection pool
//!
//! A fixed-capacity set of target connections, created lazily and handed
//! out as RAII leases. All bookkeeping lives behind one mutex; waiters park
//! on a condition variable until a slot frees up or their deadline passes.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::statement::Statement;
use crate::store::{ConnectionFactory, StoreError, TargetConnection};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no connection became available within {0:?}")]
    Exhausted(Duration),
    #[error("failed to open connection: {0}")]
    Connect(#[source] StoreError),
    #[error("connection pool is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub size: usize,
    pub acquire_timeout: Duration,
    /// Recycle a connection after this many executions; zero disables.
    pub max_uses: u64,
    /// Idle connections are health-checked on acquire when their last check is
    /// older than this.
    pub health_check_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: 8,
            acquire_timeout: Duration::from_secs(30),
            max_uses: 0,
            health_check_interval: Duration::ZERO,
        }
    }
}

/// A live connection owned by the pool.
pub struct PooledConnection {
    id: u64,
    conn: Box<dyn TargetConnection>,
    uses: u64,
    last_health_check: Instant,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub fn last_health_check(&self) -> Instant {
        self.last_health_check
    }

    fn execute(&mut self, batch: &[Statement], timeout: Duration) -> Result<u64, StoreError> {
        self.uses += 1;
        self.conn.execute(batch, timeout)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    pub peak_in_use: usize,
    pub created: u64,
    pub recycled: u64,
    pub discarded: u64,
}

struct PoolState {
    idle: Vec<PooledConnection>,
    // Connections that exist or are being created, idle or leased.
    open: usize,
    in_use: usize,
    closed: bool,
    next_id: u64,
}

struct Shared {
    factory: Arc<dyn ConnectionFactory>,
    opts: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
    created: AtomicU64,
    recycled: AtomicU64,
    discarded: AtomicU64,
    peak_in_use: AtomicUsize,
}

enum Slot {
    Idle(PooledConnection),
    Create(u64),
}

#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>, opts: PoolOptions) -> Self {
        let opts = PoolOptions {
            size: opts.size.max(1),
            ..opts
        };
        Self {
            shared: Arc::new(Shared {
                factory,
                opts,
                state: Mutex::new(PoolState {
                    idle: Vec::with_capacity(opts.size),
                    open: 0,
                    in_use: 0,
                    closed: false,
                    next_id: 0,
                }),
                available: Condvar::new(),
                created: AtomicU64::new(0),
                recycled: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                peak_in_use: AtomicUsize::new(0),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.shared.opts.size
    }

    pub fn factory(&self) -> &Arc<dyn ConnectionFactory> {
        &self.shared.factory
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Check out a connection, waiting up to the acquire timeout.
    ///
    /// Idle connections due for a check are health-checked first; one that
    /// fails is discarded and the caller is served another.
    pub fn acquire(&self) -> Result<Lease, PoolError> {
        let deadline = Instant::now() + self.shared.opts.acquire_timeout;
        loop {
            match self.reserve(deadline)? {
                Slot::Idle(mut conn) => {
                    if conn.last_health_check.elapsed() >= self.shared.opts.health_check_interval {
                        if !conn.conn.health_check() {
                            warn!("connection {} failed health check; discarding", conn.id);
                            self.discard(conn);
                            continue;
                        }
                        conn.last_health_check = Instant::now();
                    }
                    return Ok(self.lease(conn));
                }
                Slot::Create(id) => {
                    let conn = match self.shared.factory.connect() {
                        Ok(conn) => conn,
                        Err(err) => {
                            self.forget_slot();
                            return Err(PoolError::Connect(err));
                        }
                    };
                    self.shared.created.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "opened connection {id} to {}",
                        self.shared.factory.describe()
                    );
                    return Ok(self.lease(PooledConnection {
                        id,
                        conn,
                        uses: 0,
                        last_health_check: Instant::now(),
                    }));
                }
            }
        }
    }

    fn reserve(&self, deadline: Instant) -> Result<Slot, PoolError> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(conn) = state.idle.pop() {
                state.in_use += 1;
                self.note_in_use(state.in_use);
                return Ok(Slot::Idle(conn));
            }
            if state.open < self.shared.opts.size {
                state.open += 1;
                state.in_use += 1;
                let id = state.next_id;
                state.next_id += 1;
                self.note_in_use(state.in_use);
                return Ok(Slot::Create(id));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Exhausted(self.shared.opts.acquire_timeout));
            }
            let (guard, _) = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    fn note_in_use(&self, in_use: usize) {
        self.shared.peak_in_use.fetch_max(in_use, Ordering::Relaxed);
    }

    fn lease(&self, conn: PooledConnection) -> Lease {
        Lease {
            pool: self.clone(),
            conn: Some(conn),
        }
    }

    /// Return a connection for reuse.
    pub fn release(&self, lease: Lease) {
        lease.release();
    }

    /// Drop a connection observed to be broken; its slot is refilled lazily.
    pub fn invalidate(&self, lease: Lease) {
        lease.invalidate();
    }

    fn put_back(&self, mut conn: PooledConnection) {
        let max_uses = self.shared.opts.max_uses;
        let recycle = max_uses > 0 && conn.uses >= max_uses;
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if state.closed || recycle {
            state.open = state.open.saturating_sub(1);
            drop(state);
            self.shared.available.notify_one();
            if recycle {
                self.shared.recycled.fetch_add(1, Ordering::Relaxed);
                debug!("recycling connection {} after {} uses", conn.id, conn.uses);
            }
            conn.conn.close();
            return;
        }
        state.idle.push(conn);
        drop(state);
        self.shared.available.notify_one();
    }

    fn discard(&self, mut conn: PooledConnection) {
        self.forget_slot();
        self.shared.discarded.fetch_add(1, Ordering::Relaxed);
        conn.conn.close();
    }

    fn forget_slot(&self) {
        let mut state = self.lock();
        state.in_use = state.in_use.saturating_sub(1);
        state.open = state.open.saturating_sub(1);
        drop(state);
        self.shared.available.notify_one();
    }

    /// Close idle connections and refuse further acquires. Leased
    /// connections are closed as they come back.
    pub fn close_all(&self) {
        let idle = {
            let mut state = self.lock();
            state.closed = true;
            state.open = state.open.saturating_sub(state.idle.len());
            std::mem::take(&mut state.idle)
        };
        self.shared.available.notify_all();
        for mut conn in idle {
            conn.conn.close();
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
            in_use: state.in_use,
            peak_in_use: self.shared.peak_in_use.load(Ordering::Relaxed),
            created: self.shared.created.load(Ordering::Relaxed),
            recycled: self.shared.recycled.load(Ordering::Relaxed),
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Exclusive use of one pooled connection. Dropping the lease releases it.
pub struct Lease {
    pool: ConnectionPool,
    conn: Option<PooledConnection>,
}

impl Lease {
    pub fn id(&self) -> Option<u64> {
        self.conn.as_ref().map(PooledConnection::id)
    }

    pub fn execute(&mut self, batch: &[Statement], timeout: Duration) -> Result<u64, StoreError> {
        match self.conn.as_mut() {
            Some(conn) => conn.execute(batch, timeout),
            None => Err(StoreError::Connection("lease already returned".into())),
        }
    }

    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }

    pub fn invalidate(mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("invalidating connection {}", conn.id);
            self.pool.discard(conn);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn);
        }
    }
}
