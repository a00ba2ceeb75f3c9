//! Line-oriented transports.
//!
//! Both front ends speak newline-delimited JSON: one request per line in, one
//! response per line out. Every line is dispatched on its own task, so a slow
//! handler never holds up the requests behind it and responses may leave in a
//! different order than requests arrived. A single writer task per stream
//! keeps response lines whole.

pub mod socket;
pub mod stdio;

use std::io;
use std::sync::Arc;

use backchannel_json_rpc_server::{JsonRpcDispatcher, JsonRpcError, JsonRpcMessage};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub use socket::SocketListener;
pub use stdio::serve_stdio;

/// Longest request line accepted, newline excluded
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Serve JSON-RPC over a reader/writer pair until the reader reaches EOF.
///
/// Requests still running at EOF are awaited so their responses are written.
pub async fn serve_lines<R, W>(dispatcher: Arc<JsonRpcDispatcher>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    serve_lines_with_limit(dispatcher, reader, writer, MAX_LINE_BYTES).await
}

/// [`serve_lines`] with a custom cap on line length. A longer line is
/// discarded up to its newline and answered with a parse error.
pub async fn serve_lines_with_limit<R, W>(
    dispatcher: Arc<JsonRpcDispatcher>,
    reader: R,
    writer: W,
    max_line: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_responses(writer, rx));
    let mut in_flight = JoinSet::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    // A read error stops intake but not the requests already accepted.
    let read_result = loop {
        let frame = match read_frame(&mut reader, &mut buf, max_line).await {
            Ok(frame) => frame,
            Err(e) => break Err(e),
        };
        match frame {
            Frame::Eof => break Ok(()),
            Frame::TooLong => {
                warn!(max_line, "discarding oversized request line");
                let error = JsonRpcError::parse_error(Some(Value::String(format!(
                    "request line exceeds {max_line} bytes"
                ))));
                let _ = tx.send(JsonRpcMessage::from(error).to_json_string());
            }
            Frame::Line => {
                let line = buf.trim_ascii();
                if line.is_empty() {
                    continue;
                }

                let dispatcher = dispatcher.clone();
                let tx = tx.clone();
                let line = line.to_vec();
                in_flight.spawn(async move {
                    if let Some(message) = dispatcher.handle_bytes(&line).await {
                        // Receiver only goes away if the writer failed; it logs that.
                        let _ = tx.send(message.to_json_string());
                    }
                });
            }
        }

        while let Some(finished) = in_flight.try_join_next() {
            log_join_failure(finished);
        }
    };

    debug!(pending = in_flight.len(), "input closed, draining requests");
    while let Some(finished) = in_flight.join_next().await {
        log_join_failure(finished);
    }
    drop(tx);

    let written = writer_task.await.map_err(io::Error::other)?;
    read_result.and(written)
}

enum Frame {
    /// `buf` holds one line, possibly without its trailing newline at EOF
    Line,
    /// The line was longer than the cap and has been skipped
    TooLong,
    Eof,
}

async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max_line: usize) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let cap = max_line as u64 + 1;
    let read = (&mut *reader).take(cap).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= max_line {
        return Ok(Frame::Line);
    }

    buf.clear();
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            match available.iter().position(|b| *b == b'\n') {
                _ if available.is_empty() => (0, true),
                Some(newline) => (newline + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(consumed);
        if done {
            return Ok(Frame::TooLong);
        }
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "failed to write response");
            return Err(e);
        }
        writer.flush().await?;
    }
    Ok(())
}

fn log_join_failure(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "request task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backchannel_json_rpc_server::{FunctionHandler, RequestParams};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn dispatcher() -> Arc<JsonRpcDispatcher> {
        let dispatcher = JsonRpcDispatcher::new();
        dispatcher.register_method(
            "sleep",
            FunctionHandler::new(|params: Option<RequestParams>| async move {
                let ms = params
                    .as_ref()
                    .and_then(|p| p.get("ms"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!(ms))
            }),
        );
        Arc::new(dispatcher)
    }

    fn dispatcher_with_panic() -> Arc<JsonRpcDispatcher> {
        let dispatcher = dispatcher();
        dispatcher.register_method(
            "boom",
            FunctionHandler::new(|_params: Option<RequestParams>| async move {
                let empty: Vec<Value> = Vec::new();
                Ok(empty[3].clone())
            }),
        );
        dispatcher
    }

    async fn run_with(dispatcher: Arc<JsonRpcDispatcher>, input: &[u8], max_line: usize) -> Vec<Value> {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let serving = tokio::spawn(serve_lines_with_limit(dispatcher, server_read, server_write, max_line));

        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();
        serving.await.unwrap().unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    async fn run(input: &str) -> Vec<Value> {
        run_with(dispatcher(), input.as_bytes(), MAX_LINE_BYTES).await
    }

    fn by_id(mut responses: Vec<Value>) -> Vec<Value> {
        responses.sort_by_key(|r| r["id"].to_string());
        responses
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_request_does_not_block_fast_one() {
        let responses = run(concat!(
            r#"{"jsonrpc":"2.0","method":"sleep","params":{"ms":100},"id":"slow"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"sleep","params":{"ms":1},"id":"fast"}"#,
            "\n",
        ))
        .await;
        let ids: Vec<&Value> = responses.iter().map(|r| &r["id"]).collect();
        assert_eq!(ids, vec![&json!("fast"), &json!("slow")]);
    }

    #[tokio::test]
    async fn test_blank_lines_and_notifications_produce_nothing() {
        let responses = run(concat!(
            "\n",
            "   \n",
            r#"{"jsonrpc":"2.0","method":"sleep"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"sleep","id":3}"#,
            "\n",
        ))
        .await;
        assert_eq!(responses, vec![json!({"jsonrpc": "2.0", "result": 0, "id": 3})]);
    }

    #[tokio::test]
    async fn test_malformed_line_gets_parse_error() {
        let responses = run("not json\n").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[0]["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_last_line_without_newline_is_served() {
        let responses = run(r#"{"jsonrpc":"2.0","method":"sleep","id":9}"#).await;
        assert_eq!(responses[0]["id"], 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_utf8_line_gets_parse_error_and_serving_continues() {
        let mut input = Vec::new();
        input.extend_from_slice(br#"{"jsonrpc":"2.0","method":"sleep","params":{"ms":50},"id":1}"#);
        input.extend_from_slice(b"\n\xff\xfe garbage\n");
        input.extend_from_slice(br#"{"jsonrpc":"2.0","method":"sleep","id":2}"#);
        input.push(b'\n');

        let responses = by_id(run_with(dispatcher(), &input, MAX_LINE_BYTES).await);
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"], 50);
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[2]["id"], Value::Null);
        assert_eq!(responses[2]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_panicking_handler_still_answers() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"boom","id":7}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"sleep","id":8}"#,
            "\n",
        );
        let responses = by_id(run_with(dispatcher_with_panic(), input.as_bytes(), MAX_LINE_BYTES).await);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 7);
        assert_eq!(responses[0]["error"]["code"], -32603);
        assert_eq!(responses[1], json!({"jsonrpc": "2.0", "result": 0, "id": 8}));
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped_with_parse_error() {
        let long = format!(r#"{{"jsonrpc":"2.0","method":"sleep","params":{{"pad":"{}"}},"id":1}}"#, "x".repeat(200));
        let input = format!("{long}\n{}\n", r#"{"jsonrpc":"2.0","method":"sleep","id":2}"#);

        let responses = run_with(dispatcher(), input.as_bytes(), 64).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let line = r#"{"jsonrpc":"2.0","method":"sleep","id":5}"#;
        let input = format!("{line}\n");
        let responses = run_with(dispatcher(), input.as_bytes(), line.len()).await;
        assert_eq!(responses, vec![json!({"jsonrpc": "2.0", "result": 0, "id": 5})]);
    }

    #[tokio::test]
    async fn test_oversized_final_line_without_newline() {
        let input = format!(r#"{{"jsonrpc":"2.0","method":"sleep","id":"{}"}}"#, "y".repeat(100));
        let responses = run_with(dispatcher(), input.as_bytes(), 32).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], -32700);
    }
}
