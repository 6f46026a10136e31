//! Change-feed subscription primitive.
//!
//! The backend exposes one long-lived NDJSON stream per table: each line is
//! a row-level `{event_type, new, old}` tuple, emitted in the order the
//! backend applied the changes. A subscription spawns a reader task that
//! parses lines and forwards events over an in-process channel; consumers
//! never see the transport.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::BearerToken;
use crate::models::ChangeEvent;

/// A live change-feed connection. Dropping the handle (or calling
/// [`FeedHandle::shutdown`]) tears the connection down.
pub struct FeedHandle<T> {
    events: Option<mpsc::Receiver<ChangeEvent<T>>>,
    reader: JoinHandle<()>,
}

impl<T> FeedHandle<T> {
    /// Receive the next event. Returns `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent<T>> {
        self.events.as_mut()?.recv().await
    }

    /// Detach the event receiver so it can be consumed from another task;
    /// the handle keeps ownership of the connection itself.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<ChangeEvent<T>>> {
        self.events.take()
    }

    pub fn shutdown(&self) {
        self.reader.abort();
    }
}

impl<T> Drop for FeedHandle<T> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

pub(crate) fn open<T>(
    client: reqwest::Client,
    url: String,
    service_key: String,
    bearer: Arc<BearerToken>,
    table: &'static str,
) -> FeedHandle<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let reader = tokio::spawn(async move {
        run(client, url, service_key, bearer, tx, table).await;
    });
    FeedHandle {
        events: Some(rx),
        reader,
    }
}

async fn run<T>(
    client: reqwest::Client,
    url: String,
    service_key: String,
    bearer: Arc<BearerToken>,
    tx: mpsc::Sender<ChangeEvent<T>>,
    table: &'static str,
) where
    T: DeserializeOwned + Send + 'static,
{
    let mut request = client.get(&url).header("apikey", &service_key);
    if let Some(token) = bearer.get() {
        request = request.bearer_auth(token);
    }

    let resp = match request.send().await {
        Ok(resp) => resp,
        Err(err) => {
            warn!(table, error = %err, "Change feed connection failed");
            return;
        }
    };
    if !resp.status().is_success() {
        warn!(table, status = %resp.status(), "Change feed rejected");
        return;
    }

    debug!(table, "Change feed connected");
    let mut stream = resp.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(table, error = %err, "Change feed transport error");
                break;
            }
        };
        buf.extend_from_slice(&bytes);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            // Blank lines are keep-alives.
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<ChangeEvent<T>>(line) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        // Receiver gone; nobody is listening anymore.
                        return;
                    }
                }
                Err(err) => {
                    warn!(table, error = %err, "Skipping malformed feed line");
                }
            }
        }
    }

    debug!(table, "Change feed closed");
}
