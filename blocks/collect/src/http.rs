//! HTTP handlers: one function per operation, each answering with a JSON
//! response (or the streamed archive for exports).

use bytes::Bytes;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use lambda_http::{http::StatusCode, Error, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::context::CollectService;
use crate::error::{CollectError, CollectResult};
use crate::export::ChannelSink;
use crate::types::{BatchRequest, DueAtBody, ExportFilters, SubmissionFilters, TaskBody, UploadedFile};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Archive chunks buffered between the ZIP writer and the response.
const EXPORT_CHANNEL_DEPTH: usize = 2;

/// Response body shared by every route: a single buffer or a chunk stream.
pub type ResponseBody = UnsyncBoxBody<Bytes, Error>;

pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed_unsync()
}

pub fn empty_body() -> ResponseBody {
    full_body(Bytes::new())
}

/// Body that yields chunks as they arrive and ends when every sender is gone.
pub fn channel_body(rx: mpsc::Receiver<Bytes>) -> ResponseBody {
    let frames = ReceiverStream::new(rx).map(|chunk| Ok::<_, Error>(Frame::data(chunk)));
    StreamBody::new(frames).boxed_unsync()
}

pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Result<Response<ResponseBody>, Error> {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(serde_json::to_string(value)?))
        .map_err(Box::new)?)
}

pub fn error_response(err: &CollectError) -> Result<Response<ResponseBody>, Error> {
    let mut body = json!({
        "error": err.code(),
        "message": err.to_string(),
    });
    if let CollectError::MissingRequired { item_ids, titles } = err {
        body["missingItemIds"] = json!(item_ids);
        body["missingItemTitles"] = json!(titles);
    }
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::error!("Collect request failed: {}", err);
    }
    json_response(status, &body)
}

fn respond<T: Serialize>(status: StatusCode, result: CollectResult<T>) -> Result<Response<ResponseBody>, Error> {
    match result {
        Ok(value) => json_response(status, &value),
        Err(err) => error_response(&err),
    }
}

fn no_content(result: CollectResult<impl Sized>) -> Result<Response<ResponseBody>, Error> {
    match result {
        Ok(_) => Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("Access-Control-Allow-Origin", "*")
            .body(empty_body())
            .map_err(Box::new)?),
        Err(err) => error_response(&err),
    }
}

pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> CollectResult<T> {
    serde_json::from_slice(body).map_err(|e| CollectError::BadRequest(format!("Invalid request body: {}", e)))
}

/// Raw-body upload. The name arrives percent-encoded in a header.
pub fn uploaded_file(
    file_name: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
) -> CollectResult<UploadedFile> {
    let raw = file_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CollectError::BadRequest("Missing X-File-Name header".to_string()))?;
    let file_name = urlencoding::decode(raw)
        .map_err(|_| CollectError::BadRequest("X-File-Name is not valid UTF-8".to_string()))?
        .into_owned();
    let content_type = content_type
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    Ok(UploadedFile {
        file_name,
        content_type,
        bytes: Bytes::copy_from_slice(body),
    })
}

// ---------- console ----------

pub async fn create_task(service: &CollectService, actor_id: &str, body: &[u8]) -> Result<Response<ResponseBody>, Error> {
    let result = match parse_json::<TaskBody>(body) {
        Ok(payload) => service.create_task(actor_id, &payload).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::CREATED, result)
}

pub async fn list_console_tasks(service: &CollectService, actor_id: &str) -> Result<Response<ResponseBody>, Error> {
    respond(StatusCode::OK, service.list_console_tasks(actor_id).await)
}

pub async fn get_console_task(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
) -> Result<Response<ResponseBody>, Error> {
    respond(StatusCode::OK, service.get_console_task(actor_id, task_id).await)
}

pub async fn update_task(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    body: &[u8],
) -> Result<Response<ResponseBody>, Error> {
    let result = match parse_json::<TaskBody>(body) {
        Ok(payload) => service.update_task(actor_id, task_id, &payload).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::OK, result)
}

pub async fn update_due_at(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    body: &[u8],
) -> Result<Response<ResponseBody>, Error> {
    let result = match parse_json::<DueAtBody>(body) {
        Ok(payload) => service.update_due_at_only(actor_id, task_id, payload.due_at).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::OK, result)
}

pub async fn delete_task(service: &CollectService, actor_id: &str, task_id: &str) -> Result<Response<ResponseBody>, Error> {
    no_content(service.delete_task(actor_id, task_id).await)
}

/// `publish`, `close` or `archive`.
pub async fn transition_task(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    action: &str,
) -> Result<Response<ResponseBody>, Error> {
    let result = match action {
        "publish" => service.publish_task(actor_id, task_id).await,
        "close" => service.close_task(actor_id, task_id).await,
        "archive" => service.archive_task(actor_id, task_id).await,
        other => Err(CollectError::NotFound(format!("Unknown action {}", other))),
    };
    respond(StatusCode::OK, result)
}

pub async fn upload_item_template(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    item_id: &str,
    file: CollectResult<UploadedFile>,
) -> Result<Response<ResponseBody>, Error> {
    let result = match file {
        Ok(file) => service.upload_item_template(actor_id, task_id, item_id, file).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::OK, result)
}

pub async fn list_submissions(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    filters: CollectResult<SubmissionFilters>,
) -> Result<Response<ResponseBody>, Error> {
    let result = match filters {
        Ok(filters) => service.list_submissions(actor_id, task_id, &filters).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::OK, result)
}

pub async fn get_submission_detail(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    submission_id: &str,
) -> Result<Response<ResponseBody>, Error> {
    respond(
        StatusCode::OK,
        service.get_submission_detail(actor_id, task_id, submission_id).await,
    )
}

pub async fn batch_process(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    body: &[u8],
) -> Result<Response<ResponseBody>, Error> {
    let result = match parse_json::<BatchRequest>(body) {
        Ok(request) => service.batch_process(actor_id, task_id, &request).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::OK, result)
}

pub async fn file_download_url(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    file_id: &str,
) -> Result<Response<ResponseBody>, Error> {
    respond(StatusCode::OK, service.file_download_url(actor_id, task_id, file_id).await)
}

/// Plans, then streams the archive into the response body while it is being
/// built. Plan failures are answered as JSON before any byte is sent. Files
/// that cannot be fetched are listed in `skipped.txt` inside the archive.
pub async fn export_task(
    service: &CollectService,
    actor_id: &str,
    task_id: &str,
    filters: CollectResult<ExportFilters>,
) -> Result<Response<ResponseBody>, Error> {
    let plan = match filters {
        Ok(filters) => service.export_zip(actor_id, task_id, &filters).await,
        Err(e) => Err(e),
    };
    let plan = match plan {
        Ok(plan) => plan,
        Err(err) => return error_response(&err),
    };

    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&plan.archive_name)
    );
    let planned_files = plan.entries.len();
    let planned_bytes = plan.total_bytes;

    let (mut sink, rx) = ChannelSink::channel(EXPORT_CHANNEL_DEPTH);
    let worker = service.clone();
    tokio::spawn(async move {
        match worker.stream_zip(&plan, &mut sink).await {
            Ok(report) if report.cancelled => {
                tracing::warn!("Export of task {} stopped: client went away", plan.task_id)
            }
            Ok(_) => {}
            Err(err) => tracing::error!("Export of task {} failed mid-stream: {}", plan.task_id, err),
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/zip")
        .header("Content-Disposition", disposition)
        .header("X-Export-Files", planned_files.to_string())
        .header("X-Export-Bytes", planned_bytes.to_string())
        .header(
            "Access-Control-Expose-Headers",
            "Content-Disposition,X-Export-Files,X-Export-Bytes",
        )
        .header("Access-Control-Allow-Origin", "*")
        .body(channel_body(rx))
        .map_err(Box::new)?)
}

// ---------- portal ----------

pub async fn list_portal_tasks(service: &CollectService, user_id: &str) -> Result<Response<ResponseBody>, Error> {
    respond(StatusCode::OK, service.list_portal_tasks(user_id).await)
}

pub async fn get_portal_task(service: &CollectService, user_id: &str, task_id: &str) -> Result<Response<ResponseBody>, Error> {
    respond(StatusCode::OK, service.get_portal_task(user_id, task_id).await)
}

pub async fn upload_file(
    service: &CollectService,
    user_id: &str,
    task_id: &str,
    item_id: &str,
    file: CollectResult<UploadedFile>,
) -> Result<Response<ResponseBody>, Error> {
    let result = match file {
        Ok(file) => service.upload_file(user_id, task_id, item_id, file).await,
        Err(e) => Err(e),
    };
    respond(StatusCode::CREATED, result)
}

pub async fn delete_file(
    service: &CollectService,
    user_id: &str,
    task_id: &str,
    file_id: &str,
) -> Result<Response<ResponseBody>, Error> {
    no_content(service.delete_file(user_id, task_id, file_id).await)
}

/// `submit` or `withdraw`.
pub async fn submission_action(
    service: &CollectService,
    user_id: &str,
    task_id: &str,
    action: &str,
) -> Result<Response<ResponseBody>, Error> {
    let result = match action {
        "submit" => service.submit(user_id, task_id).await,
        "withdraw" => service.withdraw(user_id, task_id).await,
        other => Err(CollectError::NotFound(format!("Unknown action {}", other))),
    };
    respond(StatusCode::OK, result)
}

pub async fn my_file_download_url(
    service: &CollectService,
    user_id: &str,
    task_id: &str,
    file_id: &str,
) -> Result<Response<ResponseBody>, Error> {
    respond(StatusCode::OK, service.my_file_download_url(user_id, task_id, file_id).await)
}

pub async fn item_template_download_url(
    service: &CollectService,
    user_id: &str,
    task_id: &str,
    item_id: &str,
) -> Result<Response<ResponseBody>, Error> {
    respond(
        StatusCode::OK,
        service.item_template_download_url(user_id, task_id, item_id).await,
    )
}
