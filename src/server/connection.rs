//! Per-connection pipeline.
//!
//! Bytes from the socket flow through [`CommandCodec`] into the
//! [`Dispatcher`], whose outputs are written back to the same socket.
//! Requests are handled strictly one at a time, so responses come back in
//! request order.
//!
//! Any stage failure (framing, unknown command, unbound handler, socket
//! error) takes the abort path: one best-effort `ERROR: <message>` line,
//! then the connection is closed. Other connections are unaffected.

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::command::Dispatcher;
use crate::protocol::codec::CommandCodec;
use crate::protocol::Output;
use crate::{AppError, Result};

/// Serve one connection until the peer disconnects, a fatal error occurs,
/// or `cancel` fires.
///
/// Cancellation drops the connection without writing anything further; a
/// handler already running keeps running and its result is discarded.
pub(crate) async fn serve<S>(
    stream: S,
    connection_id: u64,
    peer: String,
    dispatcher: Dispatcher,
    max_line_bytes: usize,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    let span = info_span!("cmd_conn", connection_id, peer = %peer);
    async move {
        debug!("connection accepted");
        let (reader, writer) = tokio::io::split(stream);
        let mut requests = FramedRead::new(reader, CommandCodec::with_max_length(max_line_bytes));
        let mut responses = FramedWrite::new(writer, CommandCodec::with_max_length(max_line_bytes));

        let result = tokio::select! {
            () = cancel.cancelled() => {
                info!("connection destroyed by server shutdown");
                return;
            }
            result = pipeline(&mut requests, &mut responses, &dispatcher) => result,
        };

        match result {
            Ok(()) => {
                if let Err(err) = responses.close().await {
                    debug!(%err, "failed to close connection cleanly");
                }
            }
            Err(err) => abort(&mut responses, &err).await,
        }

        info!("connection closed");
    }
    .instrument(span)
    .await;
}

/// Decode, dispatch, and answer requests until EOF.
async fn pipeline<R, W>(
    requests: &mut FramedRead<R, CommandCodec>,
    responses: &mut FramedWrite<W, CommandCodec>,
    dispatcher: &Dispatcher,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(tokens) = requests.next().await {
        let tokens = tokens?;
        let output = dispatcher.dispatch(tokens).await?;
        responses.send(output).await?;
    }
    debug!("peer closed the connection");
    Ok(())
}

/// Report `err` to the peer if possible, then close the write side.
async fn abort<W>(responses: &mut FramedWrite<W, CommandCodec>, err: &AppError)
where
    W: AsyncWrite + Unpin,
{
    warn!(%err, "aborting connection");
    if let Err(write_err) = responses.send(Output::error_line(err)).await {
        debug!(err = %write_err, "could not deliver error line");
    }
    if let Err(close_err) = responses.close().await {
        debug!(err = %close_err, "failed to close connection after error");
    }
}
