//! Line-delimited JSON-RPC server
//!
//! Requests are read one per line and each runs on its own task, bounded by
//! `server.max_in_flight`. Responses go through a single writer task so lines
//! never interleave.

mod handlers;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::protocol::Response;
use tollgate_core::{TollgateError, TollgateResult};

pub struct Server {
    app: Arc<App>,
}

impl Server {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Serve until `reader` hits EOF or `shutdown` fires.
    ///
    /// On EOF, in-flight requests get `server.shutdown_timeout` to finish
    /// before they are cancelled. On `shutdown`, they are cancelled at once
    /// and given the same time to report back.
    pub async fn run<R, W>(
        &self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> TollgateResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let settings = &self.app.config().server;
        let root = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let permits = Arc::new(Semaphore::new(settings.max_in_flight));
        let mut tasks = JoinSet::new();
        let mut lines = BufReader::new(reader).lines();

        tracing::info!(server = %settings.name, "serving on stdio");
        let interrupted = loop {
            while let Some(finished) = tasks.try_join_next() {
                log_task_result(finished);
            }

            let line = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break true,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::debug!("input closed");
                    break false;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read request");
                    break false;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break true,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break false,
                },
            };

            let app = self.app.clone();
            let tx = tx.clone();
            let cancel = root.child_token();
            tasks.spawn(async move {
                let _permit = permit;
                if let Some(response) = handlers::handle_line(&app, &line, &cancel).await {
                    deliver(&tx, response);
                }
            });
        };

        if interrupted {
            tracing::info!(in_flight = tasks.len(), "shutting down, cancelling in-flight requests");
            root.cancel();
        }
        let drained = tokio::time::timeout(settings.shutdown_timeout, async {
            while let Some(finished) = tasks.join_next().await {
                log_task_result(finished);
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = tasks.len(),
                "in-flight requests did not finish in time, aborting"
            );
            root.cancel();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        drop(tx);
        let written = writer_task
            .await
            .map_err(|e| TollgateError::other(format!("response writer failed: {}", e)))?;
        self.app.shutdown();
        written?;
        tracing::info!("server stopped");
        Ok(())
    }
}

/// Hand a response to the writer task. Returns false if the writer is gone.
fn deliver(tx: &mpsc::UnboundedSender<Response>, response: Response) -> bool {
    match tx.send(response) {
        Ok(()) => true,
        Err(mpsc::error::SendError(response)) => {
            tracing::warn!(id = ?response.id, "response writer has stopped, dropping response");
            false
        }
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(error = %e, "request handler panicked");
        }
    }
}

async fn write_responses<W>(writer: W, mut rx: mpsc::UnboundedReceiver<Response>) -> TollgateResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);
    while let Some(response) = rx.recv().await {
        let mut line = match serde_json::to_vec(&response) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize response");
                continue;
            }
        };
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}
