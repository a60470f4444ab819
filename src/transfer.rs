//! Single-transfer execution
//!
//! Runs exactly one upload or download under a hard wall-clock deadline
//! with cooperative cancellation, and maps the outcome onto the crate's
//! error variants. Server error envelopes are decoded but never
//! interpreted here; auth policy belongs to the callers.

use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;

/// Body of a non-2xx response: `{error: <machine code>, message?: <text>}`
#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    pub error: Option<String>,
    pub message: Option<String>,
}

/// A successful (2xx) response with its body fully read
#[derive(Debug)]
pub struct TransferPayload {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Cooperative cancellation signal for one transfer.
///
/// Cloneable; cancelling before the transfer starts waiting still takes
/// effect.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.flag.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// Executes one timed, cancellable network transfer
#[derive(Clone, Default)]
pub struct TransferController {
    client: Client,
}

impl TransferController {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// The underlying client, for callers that build their own requests
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Run one request to completion under `deadline`.
    ///
    /// The deadline covers the whole exchange including reading the body.
    /// When it expires the in-flight future is dropped, which aborts the
    /// request and releases the connection; cancellation behaves the same
    /// way. Non-2xx responses come back as [`Error::Http`] with the server
    /// envelope code passed through untouched.
    pub async fn run(
        &self,
        request: RequestBuilder,
        deadline: Duration,
        cancel: Option<&CancelHandle>,
    ) -> Result<TransferPayload> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?.to_vec();

            if status.is_success() {
                Ok(TransferPayload {
                    status: status.as_u16(),
                    body,
                })
            } else {
                let envelope: ErrorEnvelope = serde_json::from_slice(&body).unwrap_or_default();
                Err(Error::Http {
                    status: status.as_u16(),
                    code: envelope.error,
                    message: envelope.message,
                })
            }
        };

        match cancel {
            Some(cancel) => {
                tokio::pin!(exchange);
                tokio::select! {
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    _ = time::sleep(deadline) => Err(Error::Timeout),
                    result = &mut exchange => result,
                }
            }
            None => match time::timeout(deadline, exchange).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            },
        }
    }
}
