use std::sync::Arc;

use collect_block::http::{self as collect, empty_body, full_body, ResponseBody};
use collect_block::types::{ExportFilters, SubmissionFilters};
use collect_block::CollectService;
use lambda_http::http::header::HeaderValue;
use lambda_http::{
    http::{Method, StatusCode},
    Error, Request, RequestExt, Response,
};

fn with_cors_headers<B>(mut resp: Response<B>) -> Response<B> {
    let headers = resp.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,PUT,PATCH,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization,X-User-Id,X-File-Name"),
    );
    resp
}

fn finalize_response(resp: Result<Response<ResponseBody>, Error>) -> Result<Response<ResponseBody>, Error> {
    resp.map(with_cors_headers)
}

fn header<'r>(event: &'r Request, name: &str) -> Option<&'r str> {
    event.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Routes `/collect/...` (staff console) and `/portal/collect/...` (students).
pub(crate) async fn function_handler(
    event: Request,
    service: Arc<CollectService>,
) -> Result<Response<ResponseBody>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body: &[u8] = event.body();
    tracing::info!("Collect API invoked - Method: {} Path: {}", method, path);

    if method == Method::OPTIONS {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(empty_body())
            .map_err(Box::new)?;
        return Ok(with_cors_headers(resp));
    }

    // An upstream authorizer sets the caller's id.
    let actor_id = match header(&event, "X-User-Id").map(str::trim).filter(|v| !v.is_empty()) {
        Some(id) => id.to_string(),
        None => {
            tracing::warn!("Rejecting {} {} without X-User-Id", method, path);
            let resp = Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .header("Content-Type", "application/json")
                .body(full_body(
                    serde_json::json!({"error": "UNAUTHORIZED", "message": "Missing X-User-Id"}).to_string(),
                ))
                .map_err(Box::new)?;
            return Ok(with_cors_headers(resp));
        }
    };
    let actor = actor_id.as_str();
    let service = service.as_ref();

    let query = event.query_string_parameters_ref();
    let lookup = |name: &str| query.and_then(|params| params.first(name));
    let upload = || {
        collect::uploaded_file(
            header(&event, "X-File-Name"),
            header(&event, "Content-Type"),
            body,
        )
    };

    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let resp = match (method, parts.as_slice()) {
        // --- CONSOLE: TASKS ---
        (&Method::POST, ["collect", "tasks"]) => collect::create_task(service, actor, body).await,
        (&Method::GET, ["collect", "tasks"]) => collect::list_console_tasks(service, actor).await,
        (&Method::GET, ["collect", "tasks", task_id]) => {
            collect::get_console_task(service, actor, task_id).await
        }
        (&Method::PUT, ["collect", "tasks", task_id]) => {
            collect::update_task(service, actor, task_id, body).await
        }
        (&Method::DELETE, ["collect", "tasks", task_id]) => {
            collect::delete_task(service, actor, task_id).await
        }
        (&Method::PATCH, ["collect", "tasks", task_id, "due-at"]) => {
            collect::update_due_at(service, actor, task_id, body).await
        }
        (&Method::POST, ["collect", "tasks", task_id, action @ ("publish" | "close" | "archive")]) => {
            collect::transition_task(service, actor, task_id, action).await
        }
        (&Method::PUT, ["collect", "tasks", task_id, "items", item_id, "template"]) => {
            collect::upload_item_template(service, actor, task_id, item_id, upload()).await
        }

        // --- CONSOLE: REVIEW & EXPORT ---
        (&Method::GET, ["collect", "tasks", task_id, "submissions"]) => {
            let filters = SubmissionFilters::from_query(lookup);
            collect::list_submissions(service, actor, task_id, filters).await
        }
        (&Method::POST, ["collect", "tasks", task_id, "submissions", "batch"]) => {
            collect::batch_process(service, actor, task_id, body).await
        }
        (&Method::GET, ["collect", "tasks", task_id, "submissions", submission_id]) => {
            collect::get_submission_detail(service, actor, task_id, submission_id).await
        }
        (&Method::GET, ["collect", "tasks", task_id, "files", file_id, "download"]) => {
            collect::file_download_url(service, actor, task_id, file_id).await
        }
        (&Method::GET, ["collect", "tasks", task_id, "export"]) => {
            let filters = ExportFilters::from_query(lookup);
            collect::export_task(service, actor, task_id, filters).await
        }

        // --- PORTAL ---
        (&Method::GET, ["portal", "collect", "tasks"]) => collect::list_portal_tasks(service, actor).await,
        (&Method::GET, ["portal", "collect", "tasks", task_id]) => {
            collect::get_portal_task(service, actor, task_id).await
        }
        (&Method::POST, ["portal", "collect", "tasks", task_id, "items", item_id, "files"]) => {
            collect::upload_file(service, actor, task_id, item_id, upload()).await
        }
        (&Method::DELETE, ["portal", "collect", "tasks", task_id, "files", file_id]) => {
            collect::delete_file(service, actor, task_id, file_id).await
        }
        (&Method::POST, ["portal", "collect", "tasks", task_id, action @ ("submit" | "withdraw")]) => {
            collect::submission_action(service, actor, task_id, action).await
        }
        (&Method::GET, ["portal", "collect", "tasks", task_id, "files", file_id, "download"]) => {
            collect::my_file_download_url(service, actor, task_id, file_id).await
        }
        (&Method::GET, ["portal", "collect", "tasks", task_id, "items", item_id, "template"]) => {
            collect::item_template_download_url(service, actor, task_id, item_id).await
        }

        _ => not_found(),
    };

    finalize_response(resp)
}

fn not_found() -> Result<Response<ResponseBody>, Error> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(full_body(
            serde_json::json!({"error": "NOT_FOUND", "message": "Not found"}).to_string(),
        ))
        .map_err(Box::new)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_json_with_cors() {
        let resp = finalize_response(not_found()).unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers()["Access-Control-Allow-Origin"], "*");
        assert!(resp.headers()["Access-Control-Allow-Headers"]
            .to_str()
            .unwrap()
            .contains("X-File-Name"));
    }
}
