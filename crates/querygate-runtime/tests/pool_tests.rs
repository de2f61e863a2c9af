//! Connection pool properties

mod common;

use common::{CountingConnector, TestConnector};
use querygate_runtime::error::GatewayError;
use querygate_runtime::pool::{ConnectionPool, PoolConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn config(min: usize, max: usize) -> PoolConfig {
    PoolConfig {
        max_connections: max,
        min_connections: min,
        max_idle_time: Duration::from_secs(30),
        connection_timeout: Duration::from_secs(1),
        health_check_interval: Duration::from_secs(3600),
        eviction_interval: Duration::from_secs(3600),
    }
}

fn connector() -> (Arc<CountingConnector>, TestConnector) {
    let counting = Arc::new(CountingConnector::default());
    (Arc::clone(&counting), TestConnector(counting))
}

#[tokio::test]
async fn test_live_connections_never_exceed_max() {
    let (_, conn) = connector();
    let pool = ConnectionPool::new(conn, config(1, 3)).await.unwrap();

    for round in 0..5 {
        let mut held = Vec::new();
        for _ in 0..(round + 2) {
            if let Ok(c) = pool.acquire().await {
                held.push(c);
            }
            let metrics = pool.metrics();
            assert!(metrics.pool_size <= metrics.max_connections);
            assert!(metrics.active_connections <= 3);
        }
        drop(held);
        pool.run_eviction().await;
        assert!(pool.metrics().pool_size <= 3);
    }
}

#[tokio::test]
async fn test_concurrent_acquire_fails_fast_at_capacity() {
    let (_, conn) = connector();
    let pool = ConnectionPool::new(conn, config(0, 4)).await.unwrap();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let pool = Arc::clone(&pool);
        tasks.spawn(async move {
            match pool.acquire().await {
                Ok(conn) => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    drop(conn);
                    Ok(())
                }
                Err(err) => Err(err),
            }
        });
    }

    let mut exhausted = 0;
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined.unwrap() {
            assert!(matches!(err, GatewayError::PoolExhausted { max: 4 }));
            exhausted += 1;
        }
    }

    let metrics = pool.metrics();
    assert!(exhausted >= 12);
    assert_eq!(metrics.pool_exhausted as usize, exhausted);
    assert!(metrics.total_connections <= 4);
    assert_eq!(metrics.active_connections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_eviction_restores_minimum() {
    let (counting, conn) = connector();
    let pool = ConnectionPool::new(conn, config(2, 5)).await.unwrap();

    let held: Vec<_> = acquire_all(&pool, 5).await;
    drop(held);
    assert_eq!(pool.metrics().idle_connections, 5);

    tokio::time::advance(Duration::from_secs(31)).await;
    pool.run_eviction().await;

    let metrics = pool.metrics();
    assert_eq!(metrics.pool_size, 2);
    assert_eq!(metrics.evicted_connections, 3);
    assert_eq!(counting.closes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_eviction_redials_up_to_minimum() {
    let (counting, conn) = connector();
    counting.refuse.store(true, Ordering::SeqCst);
    let pool = ConnectionPool::new(conn, config(2, 4)).await.unwrap();
    assert_eq!(pool.metrics().pool_size, 0);

    counting.refuse.store(false, Ordering::SeqCst);
    pool.run_eviction().await;

    let metrics = pool.metrics();
    assert_eq!(metrics.pool_size, 2);
    assert_eq!(metrics.failed_connections, 2);
}

#[tokio::test]
async fn test_closed_pool_rejects_and_stops_refilling() {
    let (counting, conn) = connector();
    let pool = ConnectionPool::new(conn, config(1, 2)).await.unwrap();

    pool.close();
    pool.run_eviction().await;

    assert!(matches!(pool.acquire().await, Err(GatewayError::PoolClosed)));
    assert_eq!(pool.metrics().pool_size, 0);
    assert_eq!(counting.dials.load(Ordering::SeqCst), 1);
}

async fn acquire_all(
    pool: &Arc<ConnectionPool<TestConnector>>,
    n: usize,
) -> Vec<querygate_runtime::pool::PooledConnection<TestConnector>> {
    let mut held = Vec::with_capacity(n);
    for _ in 0..n {
        held.push(pool.acquire().await.unwrap());
    }
    held
}

#[tokio::test(start_paused = true)]
async fn test_acquire_succeeds_while_health_check_runs() {
    let (counting, conn) = connector();
    counting.ping_delay_ms.store(500, Ordering::SeqCst);
    let pool = ConnectionPool::new(conn, config(2, 2)).await.unwrap();

    let checker = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run_health_check().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let first = pool.acquire().await.expect("idle connection during check");
    let second = pool
        .acquire()
        .await
        .expect("connection under check is lendable");
    assert_eq!(pool.metrics().pool_exhausted, 0);

    drop((first, second));
    checker.await.unwrap();

    let metrics = pool.metrics();
    assert_eq!(metrics.pool_size, 2);
    assert_eq!(metrics.idle_connections, 2);
    assert_eq!(metrics.health_check_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_holds_one_connection_at_a_time() {
    let (counting, conn) = connector();
    counting.ping_delay_ms.store(500, Ordering::SeqCst);
    let pool = ConnectionPool::new(conn, config(3, 3)).await.unwrap();

    let checker = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.run_health_check().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(pool.metrics().idle_connections, 2);
    checker.await.unwrap();
    assert_eq!(pool.metrics().idle_connections, 3);
}
