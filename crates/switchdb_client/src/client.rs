//! The high-level client: handshake, monitor glue, and reconnection.
//!
//! `connect` dials the endpoints in order, verifies the database is
//! served, fetches and validates the schema, starts a monitor, and primes
//! the cache from the monitor reply. A session task then feeds monitor
//! notifications into the cache, answers lock notifications, probes the
//! server when the connection goes idle, and reconnects (with backoff)
//! when the probe or the stream fails.

use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{ClientError, ClientResult};
use crate::options::{MonitorDialect, Options};
use crate::transport;
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use switchdb_core::{Api, Cache, CoreError, DatabaseModel, EventHandler, EventProcessor, Registry};
use switchdb_protocol::{
    check_operation_results, expand_named_uuids, methods, Condition, MonitorRequest, Operation,
    OperationResult, Request, UpdateBatch,
};
use switchdb_schema::{ConditionFunction, DatabaseSchema, UUID_COLUMN};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// The service database carrying per-database raft status.
const SERVER_DB: &str = "_Server";

/// The outcome of an accepted transaction.
#[derive(Debug)]
pub struct TransactOutcome {
    /// Per-operation results, in submission order.
    pub results: Vec<OperationResult>,
    /// Named-uuid placeholder bindings allocated before dispatch.
    pub bindings: HashMap<String, Uuid>,
}

/// A connected client session.
///
/// Cheap to clone; all clones share one connection, cache, and event
/// processor.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    options: Options,
    endpoints: Vec<Endpoint>,
    model: DatabaseModel,
    cache: Cache,
    events: EventProcessor,
    conn: RwLock<Option<Arc<Connection>>>,
    locks: Mutex<HashMap<String, bool>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("database", &self.inner.options.database)
            .finish_non_exhaustive()
    }
}

/// Everything a successful handshake produces.
struct Handshake {
    conn: Arc<Connection>,
    notes: mpsc::Receiver<Request>,
    model: DatabaseModel,
    initial: UpdateBatch,
}

impl Client {
    /// Connects to the first reachable endpoint and starts the session.
    pub async fn connect(
        endpoints: Vec<Endpoint>,
        registry: Registry,
        options: Options,
    ) -> ClientResult<Client> {
        if endpoints.is_empty() {
            return Err(ClientError::BadEndpoint {
                spec: String::new(),
                reason: "no endpoints given".to_string(),
            });
        }
        let mut attempts = 0;
        for attempt in 0..options.backoff.max_attempts {
            let delay = options.backoff.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for endpoint in &endpoints {
                attempts += 1;
                match establish(endpoint, &registry, &options).await {
                    Ok(handshake) => return finish(endpoints, options, handshake),
                    Err(error) => {
                        warn!(%endpoint, %error, "connection attempt failed");
                    }
                }
            }
        }
        Err(ClientError::ReconnectFailed { attempts })
    }

    /// The monitor-fed cache.
    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    /// A query/operation builder over the cache.
    pub fn api(&self) -> Api<'_> {
        Api::new(&self.inner.cache)
    }

    /// The schema-validated model the session runs against.
    pub fn database_model(&self) -> &DatabaseModel {
        &self.inner.model
    }

    /// Registers a cache event handler.
    pub fn add_event_handler(&self, handler: Box<dyn EventHandler>) {
        self.inner.events.add_handler(handler);
    }

    /// Events dropped so far because the event queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.inner.events.dropped()
    }

    /// Whether a live connection exists right now.
    pub async fn is_connected(&self) -> bool {
        self.inner.connection().await.is_ok()
    }

    /// Expands named-uuid placeholders, submits the transaction, and
    /// checks every per-operation result.
    pub async fn transact(&self, mut operations: Vec<Operation>) -> ClientResult<TransactOutcome> {
        let bindings = expand_named_uuids(&mut operations)?;
        let conn = self.inner.connection().await?;
        let mut params = Vec::with_capacity(operations.len() + 1);
        params.push(json!(self.inner.options.database));
        for op in &operations {
            params.push(serde_json::to_value(op)?);
        }
        let reply = conn
            .call(methods::TRANSACT, params, self.inner.options.request_timeout)
            .await?;
        let results: Vec<OperationResult> = serde_json::from_value(reply)?;
        check_operation_results(&results, &operations)?;
        Ok(TransactOutcome { results, bindings })
    }

    /// Round-trips an echo probe.
    pub async fn echo(&self) -> ClientResult<()> {
        let conn = self.inner.connection().await?;
        conn.call(methods::ECHO, vec![], self.inner.options.request_timeout)
            .await?;
        Ok(())
    }

    /// Databases served by the peer.
    pub async fn list_dbs(&self) -> ClientResult<Vec<String>> {
        let conn = self.inner.connection().await?;
        let reply = conn
            .call(methods::LIST_DBS, vec![], self.inner.options.request_timeout)
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Requests the advisory lock `name`. Returns whether it was granted
    /// immediately; a later grant arrives as a `locked` notification and
    /// is visible through [`Client::owns_lock`].
    pub async fn lock(&self, name: &str) -> ClientResult<bool> {
        self.lock_call(methods::LOCK, name).await
    }

    /// Takes the advisory lock `name` away from its current owner.
    pub async fn steal(&self, name: &str) -> ClientResult<bool> {
        self.lock_call(methods::STEAL, name).await
    }

    /// Releases the advisory lock `name`.
    pub async fn unlock(&self, name: &str) -> ClientResult<()> {
        let conn = self.inner.connection().await?;
        conn.call(
            methods::UNLOCK,
            vec![json!(name)],
            self.inner.options.request_timeout,
        )
        .await?;
        self.inner.locks.lock().remove(name);
        Ok(())
    }

    /// Whether this session currently owns the advisory lock `name`.
    pub fn owns_lock(&self, name: &str) -> bool {
        self.inner.locks.lock().get(name).copied().unwrap_or(false)
    }

    /// Shuts the session down. Pending calls resolve
    /// [`ClientError::Cancelled`].
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        *self.inner.conn.write().await = None;
    }

    async fn lock_call(&self, method: &str, name: &str) -> ClientResult<bool> {
        let conn = self.inner.connection().await?;
        let reply = conn
            .call(
                method,
                vec![json!(name)],
                self.inner.options.request_timeout,
            )
            .await?;
        let locked = reply
            .get("locked")
            .and_then(Json::as_bool)
            .unwrap_or(false);
        self.inner.locks.lock().insert(name.to_string(), locked);
        Ok(locked)
    }
}

impl ClientInner {
    async fn connection(&self) -> ClientResult<Arc<Connection>> {
        let guard = self.conn.read().await;
        match guard.as_ref() {
            Some(conn) if conn.is_alive() => Ok(Arc::clone(conn)),
            _ => Err(ClientError::NotConnected),
        }
    }

    async fn handle_notification(&self, request: Request) {
        match request.method.as_str() {
            methods::UPDATE | methods::UPDATE2 => {
                let dialect = if request.method == methods::UPDATE {
                    MonitorDialect::Classic
                } else {
                    MonitorDialect::Differential
                };
                let mut params = request.params.into_iter();
                let monitor_id = params.next().unwrap_or(Json::Null);
                let Some(tables) = params.next() else {
                    warn!("update notification without a table payload");
                    return;
                };
                if monitor_id != json!(self.options.database) {
                    trace!(%monitor_id, "update for a foreign monitor");
                    return;
                }
                let batch = match decode_batch(dialect, tables) {
                    Ok(batch) => batch,
                    Err(error) => {
                        warn!(%error, "undecodable update notification");
                        return;
                    }
                };
                if let Err(error) = self.cache.apply_updates(&batch) {
                    warn!(%error, "cache diverged from the monitor, resynchronizing");
                    if let Err(error) = self.resync().await {
                        warn!(%error, "resynchronization failed");
                    }
                }
            }
            methods::LOCKED => self.set_lock(&request.params, true),
            methods::STOLEN => self.set_lock(&request.params, false),
            other => debug!(method = other, "ignoring unknown notification"),
        }
    }

    fn set_lock(&self, params: &[Json], owned: bool) {
        if let Some(name) = params.first().and_then(Json::as_str) {
            self.locks.lock().insert(name.to_string(), owned);
        }
    }

    /// Tears the monitor down and rebuilds the cache from a fresh reply.
    /// The cache is cleared first so no partial state is ever visible.
    async fn resync(&self) -> ClientResult<()> {
        let conn = self.connection().await?;
        if let Err(error) = conn
            .call(
                methods::MONITOR_CANCEL,
                vec![json!(self.options.database)],
                self.options.request_timeout,
            )
            .await
        {
            debug!(%error, "monitor_cancel failed, continuing with resync");
        }
        self.cache.clear();
        let initial = start_monitor(&conn, &self.model, &self.options).await?;
        self.cache.apply_updates(&initial)?;
        Ok(())
    }

    /// Re-dials and re-primes after a lost connection. The schema is not
    /// re-validated; the cache stays bound to the model built at connect.
    async fn recover(&self, notes: &mut mpsc::Receiver<Request>) -> ClientResult<()> {
        *self.conn.write().await = None;
        if !self.options.reconnect {
            return Err(ClientError::NotConnected);
        }
        let mut attempts = 0;
        for attempt in 0..self.options.backoff.max_attempts {
            let delay = self.options.backoff.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for endpoint in &self.endpoints {
                attempts += 1;
                match self.redial(endpoint).await {
                    Ok((conn, new_notes, initial)) => {
                        self.cache.clear();
                        self.cache.apply_updates(&initial)?;
                        *self.conn.write().await = Some(conn);
                        *notes = new_notes;
                        info!(%endpoint, "reconnected");
                        return Ok(());
                    }
                    Err(error) => {
                        warn!(%endpoint, %error, "reconnect attempt failed");
                    }
                }
            }
        }
        Err(ClientError::ReconnectFailed { attempts })
    }

    async fn redial(
        &self,
        endpoint: &Endpoint,
    ) -> ClientResult<(Arc<Connection>, mpsc::Receiver<Request>, UpdateBatch)> {
        let stream = transport::dial(endpoint, self.options.tls.as_ref()).await?;
        let (conn, notes) = Connection::start(stream);
        let conn = Arc::new(conn);
        check_presence(&conn, &self.options).await?;
        let initial = start_monitor(&conn, &self.model, &self.options).await?;
        Ok((conn, notes, initial))
    }
}

/// Performs the full handshake against one endpoint.
async fn establish(
    endpoint: &Endpoint,
    registry: &Registry,
    options: &Options,
) -> ClientResult<Handshake> {
    let stream = transport::dial(endpoint, options.tls.as_ref()).await?;
    let (conn, notes) = Connection::start(stream);
    let conn = Arc::new(conn);

    check_presence(&conn, options).await?;

    let schema_value = conn
        .call(
            methods::GET_SCHEMA,
            vec![json!(options.database)],
            options.request_timeout,
        )
        .await?;
    let schema = DatabaseSchema::from_value(schema_value).map_err(CoreError::from)?;
    let model = DatabaseModel::new(schema, registry.clone())?;

    let initial = start_monitor(&conn, &model, options).await?;
    info!(
        %endpoint,
        database = %options.database,
        tables = model.registry().tables().count(),
        "session established"
    );
    Ok(Handshake {
        conn,
        notes,
        model,
        initial,
    })
}

/// Verifies the database is served and, when asked, that the server leads
/// it.
async fn check_presence(conn: &Connection, options: &Options) -> ClientResult<()> {
    let reply = conn
        .call(methods::LIST_DBS, vec![], options.request_timeout)
        .await?;
    let dbs: Vec<String> = serde_json::from_value(reply)?;
    if !dbs.iter().any(|db| db == &options.database) {
        return Err(ClientError::DatabaseMissing {
            database: options.database.clone(),
        });
    }
    if options.leader_only {
        if dbs.iter().any(|db| db == SERVER_DB) {
            check_leader(conn, options).await?;
        } else {
            debug!("server has no {SERVER_DB} database, skipping leader check");
        }
    }
    Ok(())
}

/// Reads the database's raft role from the `_Server` database.
async fn check_leader(conn: &Connection, options: &Options) -> ClientResult<()> {
    let select = Operation::Select {
        table: "Database".to_string(),
        clauses: vec![Condition::new(
            "name",
            ConditionFunction::Equal,
            json!(options.database),
        )],
        columns: Some(vec!["leader".to_string()]),
    };
    let reply = conn
        .call(
            methods::TRANSACT,
            vec![json!(SERVER_DB), serde_json::to_value(&select)?],
            options.request_timeout,
        )
        .await?;
    let results: Vec<OperationResult> = serde_json::from_value(reply)?;
    let leader = results
        .first()
        .and_then(|result| result.rows.as_ref())
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("leader"))
        .and_then(Json::as_bool)
        .unwrap_or(false);
    if leader {
        Ok(())
    } else {
        Err(ClientError::NotLeader {
            database: options.database.clone(),
        })
    }
}

/// Sends the monitor request for every registered table and returns the
/// initial contents. The database name doubles as the monitor id.
async fn start_monitor(
    conn: &Connection,
    model: &DatabaseModel,
    options: &Options,
) -> ClientResult<UpdateBatch> {
    let mut tables = serde_json::Map::new();
    for table in model.registry().tables() {
        let Some(entry) = model.registry().entry(table) else {
            continue;
        };
        let columns = entry
            .columns
            .iter()
            .map(|field| field.column.to_string())
            .filter(|column| column != UUID_COLUMN)
            .collect();
        tables.insert(
            table.to_string(),
            serde_json::to_value(MonitorRequest::columns(columns))?,
        );
    }
    let params = vec![
        json!(options.database),
        json!(options.database),
        Json::Object(tables),
    ];
    let reply = conn
        .call(methods::MONITOR, params, options.request_timeout)
        .await?;
    decode_batch(options.dialect, reply)
}

fn decode_batch(dialect: MonitorDialect, value: Json) -> ClientResult<UpdateBatch> {
    Ok(match dialect {
        MonitorDialect::Classic => UpdateBatch::Classic(serde_json::from_value(value)?),
        MonitorDialect::Differential => UpdateBatch::Differential(serde_json::from_value(value)?),
    })
}

/// Builds the shared state and starts the session task.
fn finish(endpoints: Vec<Endpoint>, options: Options, handshake: Handshake) -> ClientResult<Client> {
    let events = EventProcessor::new(options.event_queue);
    let cache = Cache::new(handshake.model.clone(), events.sink())?;
    cache.apply_updates(&handshake.initial)?;
    let inner = Arc::new(ClientInner {
        options,
        endpoints,
        model: handshake.model,
        cache,
        events,
        conn: RwLock::new(Some(handshake.conn)),
        locks: Mutex::new(HashMap::new()),
        shutdown: CancellationToken::new(),
    });
    tokio::spawn(session(Arc::downgrade(&inner), handshake.notes));
    Ok(Client { inner })
}

/// The session loop: notifications in, liveness probes out.
///
/// Holds only a weak reference so dropping the last [`Client`] ends the
/// session.
async fn session(inner: Weak<ClientInner>, mut notes: mpsc::Receiver<Request>) {
    loop {
        let Some(client) = inner.upgrade() else {
            return;
        };

        enum Step {
            Note(Option<Request>),
            Idle,
            Quit,
        }
        let step = tokio::select! {
            _ = client.shutdown.cancelled() => Step::Quit,
            note = notes.recv() => Step::Note(note),
            _ = tokio::time::sleep(client.options.inactivity_probe) => Step::Idle,
        };

        match step {
            Step::Quit => {
                *client.conn.write().await = None;
                return;
            }
            Step::Note(Some(request)) => client.handle_notification(request).await,
            Step::Note(None) => {
                debug!("connection lost");
                if let Err(error) = client.recover(&mut notes).await {
                    warn!(%error, "giving up on the session");
                    return;
                }
            }
            Step::Idle => {
                let alive = match client.connection().await {
                    Ok(conn) => conn
                        .call(methods::ECHO, vec![], client.options.request_timeout)
                        .await
                        .is_ok(),
                    Err(_) => false,
                };
                if !alive {
                    debug!("echo probe failed");
                    if let Err(error) = client.recover(&mut notes).await {
                        warn!(%error, "giving up on the session");
                        return;
                    }
                }
            }
        }
    }
}
