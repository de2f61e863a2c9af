//! Pool state machine and the RAII connection guard

use super::config::PoolConfig;
use super::metrics::{PoolCounters, PoolMetricsSnapshot};
use super::Connector;
use crate::error::{GatewayError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::ops::Deref;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Checking,
}

struct Entry<T> {
    id: u64,
    conn: Arc<T>,
    state: ConnectionState,
    last_used_at: Instant,
    last_health_check_at: Option<Instant>,
}

struct PoolState<T> {
    entries: Vec<Entry<T>>,
    /// Slots reserved by dials in flight
    dialing: usize,
    closed: bool,
    counters: PoolCounters,
}

impl<T> PoolState<T> {
    fn position(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn reserved(&self) -> usize {
        self.entries.len() + self.dialing
    }

    fn count(&self, state: ConnectionState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }
}

/// Bounded pool of connections produced by a [`Connector`]
pub struct ConnectionPool<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<PoolState<C::Connection>>,
    shutdown: CancellationToken,
}

impl<C: Connector> ConnectionPool<C> {
    /// Validate `config`, open `min_connections` and start the maintenance tasks.
    ///
    /// Failures while opening the initial connections are logged and skipped;
    /// the eviction sweep keeps trying to reach the minimum.
    pub async fn new(connector: C, config: PoolConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = Arc::new(Self {
            connector,
            config,
            state: Mutex::new(PoolState {
                entries: Vec::new(),
                dialing: 0,
                closed: false,
                counters: PoolCounters::default(),
            }),
            shutdown: CancellationToken::new(),
        });

        pool.replenish().await;

        info!(
            "Connection pool ready for {}: {} connections open (min {}, max {})",
            pool.connector.describe(),
            pool.state.lock().entries.len(),
            pool.config.min_connections,
            pool.config.max_connections
        );

        Self::spawn_periodic(&pool, pool.config.health_check_interval, |pool| async move {
            pool.run_health_check().await
        });
        Self::spawn_periodic(&pool, pool.config.eviction_interval, |pool| async move {
            pool.run_eviction().await
        });

        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Borrow a connection, dialing a new one if none is idle and capacity remains.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>> {
        let slot = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(GatewayError::PoolClosed);
            }
            state.counters.total_requests += 1;

            let available = state
                .entries
                .iter()
                .position(|e| e.state == ConnectionState::Idle)
                .or_else(|| {
                    state
                        .entries
                        .iter()
                        .position(|e| e.state == ConnectionState::Checking)
                });
            if let Some(pos) = available {
                let entry = &mut state.entries[pos];
                entry.state = ConnectionState::InUse;
                entry.last_used_at = Instant::now();
                debug!("Reusing pooled connection {}", entry.id);
                return Ok(PooledConnection::new(
                    Arc::clone(self),
                    entry.id,
                    Arc::clone(&entry.conn),
                ));
            }

            if state.reserved() >= self.config.max_connections {
                state.counters.pool_exhausted += 1;
                return Err(GatewayError::PoolExhausted {
                    max: self.config.max_connections,
                });
            }

            state.dialing += 1;
            DialSlot::new(self)
        };

        let dialed = self.dial().await;

        let mut state = self.state.lock();
        slot.complete(&mut state);
        let conn = match dialed {
            Ok(conn) => conn,
            Err(err) => {
                state.counters.failed_connections += 1;
                return Err(err);
            }
        };

        if state.closed {
            drop(state);
            self.connector.close(&conn);
            return Err(GatewayError::PoolClosed);
        }

        let (id, conn) = insert(&mut state, conn, ConnectionState::InUse);
        debug!("Opened pooled connection {} to {}", id, self.connector.describe());
        Ok(PooledConnection::new(Arc::clone(self), id, conn))
    }

    /// Run `f` with a borrowed connection; the connection is returned on every exit path.
    ///
    /// A `ConnectionFailed` error from `f` retires the connection instead of
    /// returning it to the idle set.
    pub async fn with_connection<F, Fut, R>(self: &Arc<Self>, f: F) -> Result<R>
    where
        F: FnOnce(Arc<C::Connection>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let mut conn = self.acquire().await?;
        let result = f(conn.handle()).await;
        if matches!(result, Err(GatewayError::ConnectionFailed(_))) {
            conn.mark_broken();
        }
        result
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let state = self.state.lock();
        PoolMetricsSnapshot {
            total_connections: state.counters.total_connections,
            active_connections: state.count(ConnectionState::InUse),
            idle_connections: state.count(ConnectionState::Idle),
            pool_size: state.entries.len(),
            failed_connections: state.counters.failed_connections,
            total_requests: state.counters.total_requests,
            pool_exhausted: state.counters.pool_exhausted,
            health_check_failures: state.counters.health_check_failures,
            evicted_connections: state.counters.evicted_connections,
            max_connections: self.config.max_connections,
            min_connections: self.config.min_connections,
            closed: state.closed,
        }
    }

    /// Close the pool. Idle connections are closed now, lent ones when they come back.
    ///
    /// Calling `close` more than once has no further effect.
    pub fn close(&self) {
        let idle: Vec<Arc<C::Connection>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let (idle, kept): (Vec<_>, Vec<_>) = state
                .entries
                .drain(..)
                .partition(|e| e.state == ConnectionState::Idle);
            state.entries = kept;
            idle.into_iter().map(|e| e.conn).collect()
        };

        self.shutdown.cancel();
        for conn in &idle {
            self.connector.close(conn);
        }
        info!(
            "Connection pool for {} closed ({} idle connections released)",
            self.connector.describe(),
            idle.len()
        );
    }

    /// Ping every idle connection and drop the ones that fail.
    ///
    /// Connections are checked one at a time so the rest of the idle set stays
    /// available, and a connection under check can still be lent out by
    /// `acquire` when nothing else is idle. A lent connection keeps its slot
    /// whatever its ping returns.
    pub async fn run_health_check(&self) {
        let ids: Vec<u64> = {
            let state = self.state.lock();
            if state.closed {
                return;
            }
            state
                .entries
                .iter()
                .filter(|e| e.state == ConnectionState::Idle)
                .map(|e| e.id)
                .collect()
        };

        for id in ids {
            let conn = {
                let mut state = self.state.lock();
                if state.closed {
                    return;
                }
                let Some(pos) = state.position(id) else {
                    continue;
                };
                let entry = &mut state.entries[pos];
                if entry.state != ConnectionState::Idle {
                    continue;
                }
                entry.state = ConnectionState::Checking;
                Arc::clone(&entry.conn)
            };

            let healthy = match timeout(HEALTH_CHECK_TIMEOUT, self.connector.ping(&conn)).await {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    warn!("Health check failed for connection {}: {}", id, err);
                    false
                }
                Err(_) => {
                    warn!("Health check timed out for connection {}", id);
                    false
                }
            };

            let retired = {
                let mut state = self.state.lock();
                let Some(pos) = state.position(id) else {
                    continue;
                };
                if state.entries[pos].state != ConnectionState::Checking {
                    debug!("Connection {} was lent out during its health check", id);
                    continue;
                }
                if healthy && !state.closed {
                    let entry = &mut state.entries[pos];
                    entry.state = ConnectionState::Idle;
                    entry.last_health_check_at = Some(Instant::now());
                    None
                } else {
                    let entry = state.entries.remove(pos);
                    if !healthy {
                        state.counters.health_check_failures += 1;
                        if let Some(last_ok) = entry.last_health_check_at {
                            debug!(
                                "Connection {} last passed a health check {:?} ago",
                                id,
                                last_ok.elapsed()
                            );
                        }
                    }
                    Some(entry.conn)
                }
            };

            if let Some(conn) = retired {
                self.connector.close(&conn);
            }
        }
    }

    /// Close connections idle for longer than `max_idle_time`, keeping at
    /// least `min_connections`, then top the pool back up to the minimum.
    pub async fn run_eviction(&self) {
        let evicted: Vec<Arc<C::Connection>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }

            let now = Instant::now();
            let mut expired: Vec<(u64, Instant)> = state
                .entries
                .iter()
                .filter(|e| {
                    e.state == ConnectionState::Idle
                        && now.duration_since(e.last_used_at) > self.config.max_idle_time
                })
                .map(|e| (e.id, e.last_used_at))
                .collect();
            expired.sort_by_key(|(_, last_used)| *last_used);

            let removable = state.entries.len().saturating_sub(self.config.min_connections);
            let doomed: Vec<u64> = expired.into_iter().take(removable).map(|(id, _)| id).collect();

            let mut evicted = Vec::with_capacity(doomed.len());
            for id in doomed {
                if let Some(pos) = state.position(id) {
                    evicted.push(state.entries.remove(pos).conn);
                }
            }
            state.counters.evicted_connections += evicted.len() as u64;
            evicted
        };

        if !evicted.is_empty() {
            debug!(
                "Evicted {} idle connections from {}",
                evicted.len(),
                self.connector.describe()
            );
        }
        for conn in &evicted {
            self.connector.close(conn);
        }

        self.replenish().await;
    }

    /// Dial idle connections until the pool holds `min_connections`.
    async fn replenish(&self) {
        let deficit = {
            let state = self.state.lock();
            self.config.min_connections.saturating_sub(state.reserved())
        };

        for _ in 0..deficit {
            let slot = {
                let mut state = self.state.lock();
                if state.closed || state.reserved() >= self.config.min_connections {
                    return;
                }
                state.dialing += 1;
                DialSlot::new(self)
            };

            let dialed = self.dial().await;

            let mut state = self.state.lock();
            slot.complete(&mut state);
            match dialed {
                Ok(conn) if !state.closed => {
                    insert(&mut state, conn, ConnectionState::Idle);
                }
                Ok(conn) => {
                    drop(state);
                    self.connector.close(&conn);
                    return;
                }
                Err(_) => {
                    state.counters.failed_connections += 1;
                }
            }
        }
    }

    async fn dial(&self) -> Result<C::Connection> {
        match timeout(self.config.connection_timeout, self.connector.connect()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(err)) => {
                warn!("Failed to connect to {}: {}", self.connector.describe(), err);
                Err(match err {
                    GatewayError::ConnectionFailed(_) => err,
                    other => GatewayError::ConnectionFailed(other.to_string()),
                })
            }
            Err(_) => {
                warn!(
                    "Connecting to {} timed out after {:?}",
                    self.connector.describe(),
                    self.config.connection_timeout
                );
                Err(GatewayError::ConnectionFailed(format!(
                    "connection to {} timed out after {:?}",
                    self.connector.describe(),
                    self.config.connection_timeout
                )))
            }
        }
    }

    fn release(&self, id: u64, broken: bool) {
        let retired = {
            let mut state = self.state.lock();
            let Some(pos) = state.position(id) else {
                return;
            };
            if state.closed || broken {
                Some(state.entries.remove(pos).conn)
            } else {
                let entry = &mut state.entries[pos];
                entry.state = ConnectionState::Idle;
                entry.last_used_at = Instant::now();
                None
            }
        };

        if let Some(conn) = retired {
            debug!("Retiring connection {}", id);
            self.connector.close(&conn);
        }
    }

    fn spawn_periodic<F, Fut>(pool: &Arc<Self>, period: Duration, task: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(pool);
        let shutdown = pool.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(pool) = weak.upgrade() else { break };
                        task(pool).await;
                    }
                }
            }
        });
    }
}

impl<C: Connector> Drop for ConnectionPool<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn insert<T>(state: &mut PoolState<T>, conn: T, initial: ConnectionState) -> (u64, Arc<T>) {
    state.counters.total_connections += 1;
    let id = state.counters.total_connections;
    let conn = Arc::new(conn);
    state.entries.push(Entry {
        id,
        conn: Arc::clone(&conn),
        state: initial,
        last_used_at: Instant::now(),
        last_health_check_at: None,
    });
    (id, conn)
}

/// Capacity reserved for a dial in flight; given back if the dial is abandoned.
struct DialSlot<'a, C: Connector> {
    pool: &'a ConnectionPool<C>,
    armed: bool,
}

impl<'a, C: Connector> DialSlot<'a, C> {
    fn new(pool: &'a ConnectionPool<C>) -> Self {
        Self { pool, armed: true }
    }

    fn complete(mut self, state: &mut PoolState<C::Connection>) {
        state.dialing -= 1;
        self.armed = false;
    }
}

impl<C: Connector> Drop for DialSlot<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.state.lock().dialing -= 1;
        }
    }
}

/// A connection lent by the pool, returned when dropped
pub struct PooledConnection<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    id: u64,
    conn: Arc<C::Connection>,
    broken: bool,
}

impl<C: Connector> PooledConnection<C> {
    fn new(pool: Arc<ConnectionPool<C>>, id: u64, conn: Arc<C::Connection>) -> Self {
        Self {
            pool,
            id,
            conn,
            broken: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shared handle to the underlying connection
    pub fn handle(&self) -> Arc<C::Connection> {
        Arc::clone(&self.conn)
    }

    /// Close the connection on release instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.pool.release(self.id, self.broken);
    }
}
