//! HTTP adapter.
//!
//! A thin request -> inquiry -> Arrow-stream mapping over the engine:
//!
//! - `POST /inquiry` dispatches an [`InquiryRequest`] and streams the
//!   combined result as Arrow IPC (`application/vnd.apache.arrow.stream`)
//!   in batches of at most 8192 rows.
//! - `GET /schema` returns the per-source schema listing as JSON.

use std::sync::Arc;

use arrow::ipc::writer::StreamWriter;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::connections::ArrowTable;
use crate::engine::Engine;
use crate::error::{MimirError, MimirResult};
use crate::planner::InquiryRequest;

/// Media type of the streamed inquiry response.
pub const ARROW_STREAM_CONTENT_TYPE: &str = "application/vnd.apache.arrow.stream";

/// Largest record batch emitted on the stream.
const STREAM_BATCH_ROWS: usize = 8192;

/// Build the router with all routes.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/inquiry", post(post_inquiry))
        .route("/schema", get(get_schema))
        .layer(cors)
        .with_state(engine)
}

/// Bind and serve until the process is stopped.
pub async fn serve(engine: Arc<Engine>, port: u16) -> MimirResult<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "mimir API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn error_response(err: MimirError) -> Response {
    let status = match err {
        MimirError::Config(_)
        | MimirError::Query(_)
        | MimirError::NotImplemented(_)
        | MimirError::SqlParse(_) => StatusCode::BAD_REQUEST,
        MimirError::Connection(_) => StatusCode::BAD_GATEWAY,
        MimirError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

async fn get_schema(State(engine): State<Arc<Engine>>) -> Response {
    match engine.schema() {
        Ok(schema) => Json(schema).into_response(),
        Err(err) => error_response(err),
    }
}

async fn post_inquiry(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<InquiryRequest>,
) -> Response {
    let inquiry = match engine.inquiry(&request) {
        Ok(inquiry) => inquiry,
        Err(err) => return error_response(err),
    };
    let table = match inquiry.dispatch().await {
        Ok(table) => table,
        Err(err) => return error_response(err),
    };

    let body = Body::from_stream(ipc_stream(table));
    match Response::builder()
        .header(header::CONTENT_TYPE, ARROW_STREAM_CONTENT_TYPE)
        .body(body)
    {
        Ok(response) => response,
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("response build failed: {err}"),
        )
            .into_response(),
    }
}

/// Serialize a table as an Arrow IPC stream, chunked to small batches, on a
/// blocking task feeding a channel so the response streams while encoding.
fn ipc_stream(table: ArrowTable) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(8);

    tokio::task::spawn_blocking(move || {
        let writer = ChannelWriter { tx: tx.clone() };
        let result = write_ipc(writer, &table);
        if let Err(err) = result {
            error!(%err, "failed to encode Arrow stream");
            let _ = tx.blocking_send(Err(std::io::Error::other(err.to_string())));
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

fn write_ipc(writer: ChannelWriter, table: &ArrowTable) -> Result<(), arrow::error::ArrowError> {
    let mut stream_writer = StreamWriter::try_new(writer, table.schema.as_ref())?;
    for batch in &table.batches {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let length = STREAM_BATCH_ROWS.min(batch.num_rows() - offset);
            stream_writer.write(&batch.slice(offset, length))?;
            offset += length;
        }
    }
    stream_writer.finish()
}

/// `std::io::Write` over an mpsc channel of byte chunks.
struct ChannelWriter {
    tx: tokio::sync::mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| std::io::Error::other("response stream closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
