use std::sync::Arc;

use collect_block::CollectService;
use collect_shared::AppState;
use lambda_http::{run_with_streaming_response, service_fn, Error, Request};

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    collect_shared::logging::init();

    let state = AppState::from_env().await;
    tracing::info!(
        "Starting collect API (table={}, bucket={}, module={})",
        state.config.table_name,
        state.config.bucket_name,
        state.config.module
    );
    let service = Arc::new(CollectService::from_state(&state));

    // Streaming keeps exports under the buffered response limit.
    run_with_streaming_response(service_fn(move |event: Request| {
        let service = service.clone();
        async move { http_handler::function_handler(event, service).await }
    }))
    .await
}
