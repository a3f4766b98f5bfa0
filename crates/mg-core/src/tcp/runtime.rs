//! TCP runtime: per-entrypoint handlers and claim/handle dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use super::context::TcpContext;
use crate::conn::{PeekableStream, TcpConn};
use crate::error::{Error, Result};
use crate::rule::Rule;

/// A compiled TCP handler: a claim rule plus the dispatch that serves the
/// connection once the runtime owns it.
#[async_trait]
pub trait TcpHandler: Send + Sync {
    /// Rule the runtime consults when claiming a connection.
    fn rule(&self) -> &Rule;
    /// Serve the promoted connection. The handler owns it; returning (or
    /// dropping on cancellation) closes the stream.
    async fn serve(&self, conn: TcpConn);
}

/// Handlers indexed by entrypoint id.
#[derive(Default)]
pub struct TcpRuntime {
    handlers: RwLock<HashMap<String, Arc<dyn TcpHandler>>>,
}

impl TcpRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, entrypoint: impl Into<String>, handler: Arc<dyn TcpHandler>) {
        self.handlers.write().insert(entrypoint.into(), handler);
    }

    pub fn deregister_handler(&self, entrypoint: &str) {
        self.handlers.write().remove(entrypoint);
    }

    pub fn is_handler_registered(&self, entrypoint: &str) -> bool {
        self.handlers.read().contains_key(entrypoint)
    }

    /// True when the compiled handler for this entrypoint has a rule
    /// matching the context.
    pub async fn claim(&self, entrypoint: &str, ctx: &TcpContext) -> bool {
        let handler = match self.handlers.read().get(entrypoint) {
            Some(h) => h.clone(),
            None => return false,
        };
        handler.rule().matches_tcp(ctx).await
    }

    /// Promote the buffered connection and run the handler in a detached
    /// task. Returns when the handler completes or the cancellation handle
    /// fires, whichever comes first; on cancellation the connection is
    /// closed.
    pub async fn handle(
        &self,
        entrypoint: &str,
        stream: PeekableStream<TcpStream>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let handler = self
            .handlers
            .read()
            .get(entrypoint)
            .cloned()
            .ok_or_else(|| Error::NoHandler(entrypoint.to_string()))?;

        let conn = TcpConn::new(stream).map_err(Error::Peek)?;
        let peer = conn.peer_addr();

        let task_cancel = cancel.clone();
        let mut task = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!(peer = %peer, "TCP handler cancelled, closing connection");
                }
                _ = handler.serve(conn) => {}
            }
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = &mut task => Ok(()),
        }
    }
}
