//! In-memory connection source.
//!
//! [`MemorySource`] behaves like a fixed-capacity pool of physical
//! connections that record every statement they run instead of talking to a
//! database. It exists to observe the guard from the outside: the ordered
//! [`MemoryEvent`] log shows exactly which statements each physical
//! connection saw, and when it went back to the idle set or was thrown away.
//!
//! ```rust
//! use std::sync::Arc;
//! use rowguard_core::memory::MemorySource;
//! use rowguard_core::{PostgresDialect, TenantId, TenantPool};
//!
//! # tokio_test::block_on(async {
//! let pool = TenantPool::new(MemorySource::new(1), Arc::new(PostgresDialect::default()));
//! let conn = pool.acquire_for(TenantId::from(7_i64)).await.unwrap();
//! conn.release().await.unwrap();
//!
//! assert_eq!(
//!     pool.source().statements(1),
//!     vec!["SET app.tenant_id = '7'", "RESET app.tenant_id"]
//! );
//! # });
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::error::{RowGuardError, RowGuardResult};
use crate::guard::{ConnectionSource, SessionConnection};

/// Something that happened to a physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEvent {
    /// A new physical connection was opened.
    Opened {
        /// Connection number.
        conn: u64,
    },
    /// A statement ran (or was attempted) on a connection.
    Statement {
        /// Connection number.
        conn: u64,
        /// Statement text.
        sql: String,
        /// Whether the statement succeeded.
        ok: bool,
    },
    /// The connection went back to the idle set.
    Recycled {
        /// Connection number.
        conn: u64,
    },
    /// The connection was removed from the pool.
    Discarded {
        /// Connection number.
        conn: u64,
    },
}

#[derive(Debug, Default)]
struct FailurePlan {
    /// Statement prefix and how many more matches should fail.
    rules: Vec<(String, usize)>,
}

impl FailurePlan {
    fn should_fail(&mut self, sql: &str) -> bool {
        for (prefix, remaining) in self.rules.iter_mut() {
            if *remaining > 0 && sql.starts_with(prefix.as_str()) {
                *remaining -= 1;
                return true;
            }
        }
        false
    }
}

/// State shared between the source and every connection it opened.
///
/// Connections hold this rather than [`Shared`] so idle connections do not
/// keep the source alive through a reference cycle.
#[derive(Debug)]
struct EventLog {
    events: Mutex<Vec<MemoryEvent>>,
    failures: Mutex<FailurePlan>,
    statement_delay: Option<Duration>,
}

impl EventLog {
    fn log(&self, event: MemoryEvent) {
        trace!(event = ?event, "Memory source event");
        self.events.lock().push(event);
    }
}

#[derive(Debug)]
struct Shared {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<MemoryConnection>>,
    log: Arc<EventLog>,
    next_conn: AtomicU64,
    acquire_timeout: Option<Duration>,
}

/// A fixed-capacity, statement-recording connection pool.
#[derive(Debug, Clone)]
pub struct MemorySource {
    shared: Arc<Shared>,
}

impl MemorySource {
    /// Create a source that lends out at most `capacity` connections at once.
    pub fn new(capacity: usize) -> Self {
        Self::builder().capacity(capacity).build()
    }

    /// Create a builder.
    pub fn builder() -> MemorySourceBuilder {
        MemorySourceBuilder::default()
    }

    /// Make the next `times` statements starting with `prefix` fail.
    pub fn fail_next(&self, prefix: impl Into<String>, times: usize) {
        self.shared.log.failures.lock().rules.push((prefix.into(), times));
    }

    /// All events, in order.
    pub fn events(&self) -> Vec<MemoryEvent> {
        self.shared.log.events.lock().clone()
    }

    /// Statements run on connection `conn`, in order.
    pub fn statements(&self, conn: u64) -> Vec<String> {
        self.shared
            .log
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MemoryEvent::Statement { conn: c, sql, .. } if *c == conn => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Numbers of the connections that were discarded.
    pub fn discarded(&self) -> Vec<u64> {
        self.shared
            .log
            .events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MemoryEvent::Discarded { conn } => Some(*conn),
                _ => None,
            })
            .collect()
    }

    /// Numbers of the connections currently idle.
    pub fn idle_ids(&self) -> Vec<u64> {
        self.shared.idle.lock().iter().map(|c| c.id).collect()
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Number of physical connections opened so far.
    pub fn opened(&self) -> u64 {
        self.shared.next_conn.load(Ordering::Relaxed) - 1
    }

    /// Number of connections that could be lent out right now.
    pub fn available(&self) -> usize {
        self.shared.permits.available_permits()
    }
}

#[async_trait]
impl ConnectionSource for MemorySource {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> RowGuardResult<MemoryConnection> {
        let permits = Arc::clone(&self.shared.permits);
        let permit = match self.shared.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, permits.acquire_owned())
                .await
                .map_err(|_| {
                    RowGuardError::pool(format!(
                        "timed out after {}ms waiting for a connection",
                        timeout.as_millis()
                    ))
                })?,
            None => permits.acquire_owned().await,
        }
        .map_err(|_| RowGuardError::pool("pool closed"))?;

        let reused = self.shared.idle.lock().pop();
        let mut conn = match reused {
            Some(conn) => conn,
            None => {
                let id = self.shared.next_conn.fetch_add(1, Ordering::Relaxed);
                self.shared.log.log(MemoryEvent::Opened { conn: id });
                MemoryConnection {
                    id,
                    permit: None,
                    log: Arc::clone(&self.shared.log),
                    in_transaction: false,
                }
            }
        };
        conn.permit = Some(permit);
        Ok(conn)
    }

    fn recycle(&self, mut conn: MemoryConnection) {
        self.shared.log.log(MemoryEvent::Recycled { conn: conn.id });
        // Push before giving the permit back so a waiter finds it idle.
        let permit = conn.permit.take();
        self.shared.idle.lock().push(conn);
        drop(permit);
    }

    fn discard(&self, conn: MemoryConnection) {
        self.shared.log.log(MemoryEvent::Discarded { conn: conn.id });
        drop(conn);
    }
}

/// A simulated physical connection.
///
/// Tracks `BEGIN`, `COMMIT` and `ROLLBACK` so an unfinished transaction
/// survives recycling the way it would on a real session.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    permit: Option<OwnedSemaphorePermit>,
    log: Arc<EventLog>,
    in_transaction: bool,
}

impl MemoryConnection {
    /// The physical connection number.
    pub fn connection_id(&self) -> u64 {
        self.id
    }

    /// Whether a transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Run an ordinary statement.
    pub async fn execute(&mut self, sql: &str) -> RowGuardResult<()> {
        if let Some(delay) = self.log.statement_delay {
            tokio::time::sleep(delay).await;
        }
        let failed = self.log.failures.lock().should_fail(sql);
        self.log.log(MemoryEvent::Statement {
            conn: self.id,
            sql: sql.to_string(),
            ok: !failed,
        });
        if failed {
            return Err(RowGuardError::database(format!("injected failure: {}", sql)));
        }
        match sql.trim().to_ascii_uppercase().as_str() {
            "BEGIN" | "START TRANSACTION" => self.in_transaction = true,
            "COMMIT" | "END" | "ROLLBACK" => self.in_transaction = false,
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl SessionConnection for MemoryConnection {
    async fn run_statement(&mut self, sql: &str) -> RowGuardResult<()> {
        self.execute(sql).await
    }

    async fn rollback_open_transaction(&mut self) -> RowGuardResult<()> {
        if self.in_transaction {
            self.execute("ROLLBACK").await?;
        }
        Ok(())
    }
}

/// Builder for [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemorySourceBuilder {
    capacity: usize,
    acquire_timeout: Option<Duration>,
    statement_delay: Option<Duration>,
}

impl Default for MemorySourceBuilder {
    fn default() -> Self {
        Self {
            capacity: 10,
            acquire_timeout: None,
            statement_delay: None,
        }
    }
}

impl MemorySourceBuilder {
    /// Set the maximum number of connections lent out at once.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Fail acquisitions that wait longer than `timeout`.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Delay every statement, to widen interleaving windows in tests.
    pub fn statement_delay(mut self, delay: Duration) -> Self {
        self.statement_delay = Some(delay);
        self
    }

    /// Build the source.
    pub fn build(self) -> MemorySource {
        MemorySource {
            shared: Arc::new(Shared {
                permits: Arc::new(Semaphore::new(self.capacity)),
                idle: Mutex::new(Vec::new()),
                log: Arc::new(EventLog {
                    events: Mutex::new(Vec::new()),
                    failures: Mutex::new(FailurePlan::default()),
                    statement_delay: self.statement_delay,
                }),
                next_conn: AtomicU64::new(1),
                acquire_timeout: self.acquire_timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reuses_idle_connection() {
        let source = MemorySource::new(1);
        let conn = source.acquire().await.unwrap();
        assert_eq!(conn.connection_id(), 1);
        source.recycle(conn);

        let conn = source.acquire().await.unwrap();
        assert_eq!(conn.connection_id(), 1);
        assert_eq!(source.opened(), 1);
        source.discard(conn);

        let conn = source.acquire().await.unwrap();
        assert_eq!(conn.connection_id(), 2);
    }

    #[tokio::test]
    async fn test_capacity_and_timeout() {
        let source = MemorySource::builder()
            .capacity(1)
            .acquire_timeout(Duration::from_millis(10))
            .build();
        let held = source.acquire().await.unwrap();
        assert_eq!(source.available(), 0);

        let err = source.acquire().await.unwrap_err();
        assert!(matches!(err, RowGuardError::Pool(_)));

        source.recycle(held);
        assert_eq!(source.available(), 1);
        assert!(source.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_transaction_survives_recycle() {
        let source = MemorySource::new(1);
        let mut conn = source.acquire().await.unwrap();
        conn.execute("begin").await.unwrap();
        source.recycle(conn);

        let mut conn = source.acquire().await.unwrap();
        assert!(conn.in_transaction());
        conn.rollback_open_transaction().await.unwrap();
        assert!(!conn.in_transaction());

        // Nothing to roll back: no statement.
        conn.rollback_open_transaction().await.unwrap();
        assert_eq!(source.statements(1), vec!["begin", "ROLLBACK"]);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let source = MemorySource::new(1);
        source.fail_next("RESET", 1);
        let mut conn = source.acquire().await.unwrap();

        assert!(conn.execute("SELECT 1").await.is_ok());
        assert!(conn.run_statement("RESET app.tenant_id").await.is_err());
        assert!(conn.run_statement("RESET app.tenant_id").await.is_ok());

        let events = source.events();
        assert_eq!(
            events[2],
            MemoryEvent::Statement {
                conn: 1,
                sql: "RESET app.tenant_id".to_string(),
                ok: false
            }
        );
    }
}
