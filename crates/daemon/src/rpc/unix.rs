// JSON-RPC 2.0 over Unix domain sockets.
//
// Framing is newline-delimited JSON: each request line yields one
// response line on the same connection.

use anyhow::{Context, Result};
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tracing::warn;

use crate::rpc::methods::{handle_raw_request, RpcServerState};

/// Serve connections until the listener fails.
pub async fn serve_unix(listener: UnixListener, state: RpcServerState) -> Result<()> {
    loop {
        let (stream, _) =
            listener.accept().await.context("failed to accept unix rpc connection")?;
        let connection_state = state.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_connection(stream, connection_state).await {
                warn!(?error, "unix rpc connection failed");
            }
        });
    }
}

/// Serve connections until a shutdown signal arrives.
pub async fn serve_unix_until_shutdown(
    listener: UnixListener,
    state: RpcServerState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("failed to accept unix rpc connection")?;
                let connection_state = state.clone();
                tokio::spawn(async move {
                    if let Err(error) = serve_connection(stream, connection_state).await {
                        warn!(?error, "unix rpc connection failed");
                    }
                });
            }
        }
    }
}

/// Handle a single RPC stream. Each request line yields one response line.
pub async fn serve_connection<IO>(stream: IO, state: RpcServerState) -> Result<()>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = io::split(stream);
    let mut reader = BufReader::new(read_half);

    loop {
        let mut request_line = Vec::new();
        let bytes_read = reader
            .read_until(b'\n', &mut request_line)
            .await
            .context("failed to read json-rpc request")?;

        if bytes_read == 0 {
            return Ok(());
        }

        trim_line_endings(&mut request_line);
        if request_line.iter().all(|byte| byte.is_ascii_whitespace()) {
            continue;
        }

        let response = handle_raw_request(&request_line, &state).await;
        let mut encoded =
            serde_json::to_vec(&response).context("failed to serialize json-rpc response")?;
        encoded.push(b'\n');

        write_half.write_all(&encoded).await.context("failed to write json-rpc response")?;
        write_half.flush().await.context("failed to flush json-rpc response")?;
    }
}

fn trim_line_endings(line: &mut Vec<u8>) {
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
}
