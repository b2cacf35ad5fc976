use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Advisory lock key shared by every fleet manager replica ("FLEETMGR" in hex)
pub const LEADER_LOCK_ID: i64 = 0x464C_4545_544D_4752_i64;

/// Background task for leader election.
///
/// Only the leader runs the reconcilers. PostgreSQL advisory locks are session-based, so a dedicated connection is
/// held for as long as this replica leads; losing the connection releases the lock and leadership with it.
#[instrument(skip(pool, is_leader, shutdown, on_gain_leadership, on_lose_leadership))]
pub async fn leader_election_task<F1, F2, Fut1, Fut2>(
    pool: PgPool,
    is_leader: Arc<AtomicBool>,
    lock_id: i64,
    interval: Duration,
    shutdown: CancellationToken,
    on_gain_leadership: F1,
    on_lose_leadership: F2,
) where
    F1: Fn() -> Fut1 + Send + 'static,
    F2: Fn() -> Fut2 + Send + 'static,
    Fut1: Future<Output = anyhow::Result<()>> + Send + 'static,
    Fut2: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    let mut leader_conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if leader_conn.take().is_some() {
                    is_leader.store(false, Ordering::Relaxed);
                    if let Err(e) = on_lose_leadership().await {
                        error!("Failed to execute on_lose_leadership callback: {}", e);
                    }
                }
                info!("Leader election stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        if !is_leader.load(Ordering::Relaxed) {
            let mut conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to acquire connection for leader election: {}", e);
                    continue;
                }
            };

            match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
                .bind(lock_id)
                .fetch_one(&mut *conn)
                .await
            {
                Ok(true) => {
                    info!("Gained leadership");
                    is_leader.store(true, Ordering::Relaxed);
                    leader_conn = Some(conn);

                    if let Err(e) = on_gain_leadership().await {
                        error!("Failed to execute on_gain_leadership callback: {}", e);
                    }
                }
                Ok(false) => debug!("Following - will retry"),
                Err(e) => error!("Failed to check leader lock: {}", e),
            }
        } else if let Some(conn) = leader_conn.as_mut() {
            match sqlx::query("SELECT 1").execute(&mut **conn).await {
                Ok(_) => debug!("Leadership renewed (connection alive)"),
                Err(e) => {
                    warn!("Lost leadership (connection died): {}", e);
                    is_leader.store(false, Ordering::Relaxed);
                    leader_conn = None;

                    if let Err(e) = on_lose_leadership().await {
                        error!("Failed to execute on_lose_leadership callback: {}", e);
                    }
                }
            }
        } else {
            error!("Inconsistent state: is_leader=true but no connection");
            is_leader.store(false, Ordering::Relaxed);
        }
    }
}
