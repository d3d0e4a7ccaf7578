//! Responder trait and the async task that drives one.
//!
//! A responder consumes request transactions in arrival order and produces
//! at most one response per request. Status codes reported by the responder
//! travel in the response header; `ResponderError` is reserved for inputs
//! the responder cannot interpret at all.

use tokio::sync::{broadcast, mpsc};
use umi_core::wire::{CmdClass, CmdType, CommandHeader, ResponseStatus, WireError};
use umi_core::Transaction;

/// Something that services protocol requests.
pub trait Responder: Send {
    /// Service one request. `Ok(None)` for posted writes and error messages.
    fn handle(&mut self, req: &Transaction) -> Result<Option<Transaction>, ResponderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponderError {
    #[error("opcode 0x{0:02x} is not a request")]
    NotARequest(u8),

    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Build the response to `req`: addresses swapped, `size`/`len` and host id
/// carried over, `status` in the user field.
pub fn response_to(
    req: &Transaction,
    opcode: CmdType,
    status: ResponseStatus,
    len: u8,
    payload: impl Into<bytes::Bytes>,
) -> Result<Transaction, ResponderError> {
    let cmd = CommandHeader::builder(opcode)
        .size(req.cmd.size() as u64)
        .len(len as u64)
        .eom(req.cmd.eom())
        .hostid(req.cmd.hostid() as u64)
        .status(status)
        .build()?;
    let resp =
        Transaction::with_addr_width(cmd, req.srcaddr, req.dstaddr, payload, req.addr_width())?;
    Ok(resp)
}

/// Reject anything that is not a request opcode.
pub fn check_request(req: &Transaction) -> Result<(), ResponderError> {
    match req.cmd.class() {
        CmdClass::Request => Ok(()),
        CmdClass::Response => Err(ResponderError::NotARequest(req.cmd.opcode())),
        CmdClass::Invalid => Err(WireError::UnknownCommand(req.cmd.opcode()).into()),
    }
}

/// Acknowledge a request the responder does not implement with `SLVERR`.
///
/// Error messages and other unacknowledged requests are dropped.
pub fn reject(req: &Transaction) -> Result<Option<Transaction>, ResponderError> {
    let Some(resp_type) = req.cmd.response_type() else {
        tracing::warn!(opcode = req.cmd.opcode(), dstaddr = req.dstaddr, "unacknowledged request dropped");
        return Ok(None);
    };
    tracing::warn!(opcode = req.cmd.opcode(), "unsupported request");
    let payload = if resp_type == CmdType::RespRead {
        vec![0u8; req.cmd.beat_bytes()]
    } else {
        Vec::new()
    };
    let len = if resp_type == CmdType::RespRead { 0 } else { req.cmd.len() };
    Ok(Some(response_to(req, resp_type, ResponseStatus::SlvErr, len, payload)?))
}

// ── Task ─────────────────────────────────────────────────────────────────────

/// Drives a [`Responder`] between two bounded channels.
///
/// The request channel's capacity is the responder's ready signal; a full
/// response channel stalls the loop, which in turn stops draining requests.
pub struct ResponderTask<R> {
    responder: R,
    requests: mpsc::Receiver<Transaction>,
    responses: mpsc::Sender<Transaction>,
    shutdown: broadcast::Receiver<()>,
}

impl<R: Responder> ResponderTask<R> {
    pub fn new(
        responder: R,
        requests: mpsc::Receiver<Transaction>,
        responses: mpsc::Sender<Transaction>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            responder,
            requests,
            responses,
            shutdown,
        }
    }

    /// Run until shutdown or until the request channel closes.
    ///
    /// Returns the responder so callers can inspect its final state. A
    /// request the responder cannot interpret is fatal.
    pub async fn run(mut self) -> anyhow::Result<R> {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("responder shutting down");
                    return Ok(self.responder);
                }

                req = self.requests.recv() => {
                    let Some(req) = req else {
                        tracing::debug!("request channel closed");
                        return Ok(self.responder);
                    };
                    let resp = self.responder.handle(&req).map_err(|e| {
                        anyhow::anyhow!("responder rejected {}: {e}", hex::encode(req.header_bytes()))
                    })?;
                    if let Some(resp) = resp {
                        self.responses
                            .send(resp)
                            .await
                            .map_err(|_| anyhow::anyhow!("response channel closed"))?;
                    }
                }
            }
        }
    }
}
