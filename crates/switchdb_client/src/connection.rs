//! One framed JSON-RPC connection.
//!
//! A background task owns the stream. Callers submit requests over a
//! channel and wait on a oneshot for the correlated reply; inbound server
//! requests (monitor updates, lock notifications) are forwarded to the
//! session. Server echo pings are answered in place so liveness never
//! depends on the session keeping up.
//!
//! Dropping the [`Connection`] closes the submission channel, which ends
//! the task; pending calls resolve [`ClientError::Cancelled`] when their
//! reply senders are dropped with it.

use crate::codec::JsonCodec;
use crate::error::{ClientError, ClientResult};
use crate::transport::BoxedTransport;
use futures::{SinkExt, StreamExt};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use switchdb_protocol::{methods, Incoming, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

enum Outbound {
    Call {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
}

/// Handle to a live connection.
pub(crate) struct Connection {
    tx: mpsc::Sender<Outbound>,
    next_id: AtomicU64,
}

impl Connection {
    /// Starts the I/O task over `stream`. Inbound server requests land on
    /// the returned receiver.
    pub(crate) fn start(stream: BoxedTransport) -> (Self, mpsc::Receiver<Request>) {
        let framed = Framed::new(stream, JsonCodec::new());
        let (tx, rx) = mpsc::channel(64);
        let (notify_tx, notify_rx) = mpsc::channel(256);
        tokio::spawn(run(framed, rx, notify_tx));
        (
            Self {
                tx,
                next_id: AtomicU64::new(1),
            },
            notify_rx,
        )
    }

    /// Whether the I/O task is still running.
    pub(crate) fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Sends `method` and waits for the correlated reply.
    pub(crate) async fn call(
        &self,
        method: &str,
        params: Vec<Json>,
        deadline: Duration,
    ) -> ClientResult<Json> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = Request::call(method, params, id);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Outbound::Call {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ClientError::NotConnected)?;

        let response = match tokio::time::timeout(deadline, reply_rx).await {
            Err(_) => {
                return Err(ClientError::TimedOut {
                    method: method.to_string(),
                })
            }
            Ok(Err(_)) => return Err(ClientError::Cancelled),
            Ok(Ok(response)) => response,
        };
        if response.is_error() {
            return Err(ClientError::Rpc {
                method: method.to_string(),
                message: response.error.to_string(),
            });
        }
        Ok(response.result)
    }
}

async fn run(
    mut framed: Framed<BoxedTransport, JsonCodec>,
    mut rx: mpsc::Receiver<Outbound>,
    notify: mpsc::Sender<Request>,
) {
    let mut pending: HashMap<u64, oneshot::Sender<Response>> = HashMap::new();
    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Call { request, reply }) => {
                    let id = request.id.as_u64().unwrap_or_default();
                    trace!(method = %request.method, id, "sending request");
                    let value = match serde_json::to_value(&request) {
                        Ok(value) => value,
                        Err(error) => {
                            warn!(%error, "request did not serialize");
                            continue;
                        }
                    };
                    pending.insert(id, reply);
                    if let Err(error) = framed.send(value).await {
                        warn!(%error, "write failed, closing connection");
                        break;
                    }
                }
                // Every handle dropped: shut down.
                None => break,
            },
            inbound = framed.next() => match inbound {
                Some(Ok(value)) => match Incoming::classify(value) {
                    Ok(Incoming::Response(response)) => {
                        let id = response.id.as_u64();
                        match id.and_then(|id| pending.remove(&id)) {
                            Some(reply) => {
                                reply.send(response).ok();
                            }
                            None => trace!(?id, "orphan reply"),
                        }
                    }
                    Ok(Incoming::Request(request))
                        if request.method == methods::ECHO && !request.id.is_null() =>
                    {
                        let pong = Response {
                            result: Json::Array(request.params),
                            error: Json::Null,
                            id: request.id,
                        };
                        let value = match serde_json::to_value(&pong) {
                            Ok(value) => value,
                            Err(_) => continue,
                        };
                        if framed.send(value).await.is_err() {
                            break;
                        }
                    }
                    Ok(Incoming::Request(request)) => {
                        if notify.send(request).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "unclassifiable message, dropping it");
                    }
                },
                Some(Err(error)) => {
                    warn!(%error, "read failed, closing connection");
                    break;
                }
                None => {
                    debug!("peer closed the connection");
                    break;
                }
            }
        }
    }
    // Dropping `pending` cancels every waiting caller.
}
