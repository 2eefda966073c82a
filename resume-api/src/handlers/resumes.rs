use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use resume_common::job::Job;

use super::app::AppState;

/// Hard cap on the uploaded document itself.
pub const MAX_DOCUMENT_SIZE: usize = 5 * 1024 * 1024;

const RESUME_FIELD: &str = "resume";
const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Serialize)]
pub struct UploadResponse {
    #[serde(rename = "jobId")]
    job_id: Uuid,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
}

type ErrorReply = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: &str) -> ErrorReply {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_owned(),
        }),
    )
}

fn internal_error<E>(err: E) -> ErrorReply
where
    E: std::error::Error,
{
    error!("internal error: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// Accept a resume upload: store the bytes, create the job row in `queued`,
/// then enqueue the identifier. The job only becomes reachable by workers
/// once all three succeeded.
pub async fn post(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ErrorReply> {
    let mut document = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request("could not parse multipart body"))?
    {
        if field.name() != Some(RESUME_FIELD) {
            continue;
        }

        if field.content_type() != Some(PDF_CONTENT_TYPE) {
            return Err(bad_request("resume must be uploaded as application/pdf"));
        }

        let data = field
            .bytes()
            .await
            .map_err(|_| bad_request("could not read the resume field"))?;
        document = Some(data);
        break;
    }

    let Some(data) = document else {
        return Err(bad_request("missing multipart field: resume"));
    };

    if data.len() > MAX_DOCUMENT_SIZE {
        return Err(bad_request("resume exceeds the 5 MiB limit"));
    }
    if !data.starts_with(b"%PDF-") {
        return Err(bad_request("uploaded file is not a PDF document"));
    }

    let id = Uuid::now_v7();
    let file_key = format!("{id}-pdf");
    debug!("accepting resume upload as job {}", id);

    state
        .blobs
        .put(&file_key, data.to_vec(), PDF_CONTENT_TYPE)
        .await
        .map_err(internal_error)?;

    let job = Job::new(id, file_key);
    state.store.create(&job).await.map_err(internal_error)?;

    state
        .queue
        .enqueue(&id.to_string())
        .await
        .map_err(internal_error)?;

    metrics::counter!("resume_uploads_accepted").increment(1);

    Ok(Json(UploadResponse { job_id: id }))
}

/// Look up a job record by id.
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ErrorReply> {
    let id = Uuid::parse_str(&id).map_err(|_| bad_request("malformed job id"))?;

    match state.store.get(id).await.map_err(internal_error)? {
        Some(job) => Ok(Json(job)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "no job with that id".to_owned(),
            }),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{self, Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt; // for `collect`
    use resume_common::blob::{BlobStore, MockBlobStore};
    use resume_common::job::JobStatus;
    use resume_common::queue::MockJobQueue;
    use resume_common::store::MockJobStore;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use super::super::app::{add_routes, AppState};
    use super::*;

    struct Fixture {
        store: MockJobStore,
        queue: Arc<MockJobQueue>,
        blobs: MockBlobStore,
        app: Router,
    }

    fn fixture() -> Fixture {
        let store = MockJobStore::new();
        let queue = Arc::new(MockJobQueue::new());
        let blobs = MockBlobStore::new();
        let app = add_routes(
            Router::new(),
            AppState {
                store: Arc::new(store.clone()),
                queue: queue.clone(),
                blobs: Arc::new(blobs.clone()),
            },
        );
        Fixture {
            store,
            queue,
            blobs,
            app,
        }
    }

    const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

    fn multipart_upload(field: &str, content_type: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; \
                 name=\"{field}\"; filename=\"resume.pdf\"\r\n\
                 Content-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(http::Method::POST)
            .uri("/resumes")
            .header(
                http::header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn upload_accepts_a_pdf_and_queues_a_job() {
        let f = fixture();

        let response = f
            .app
            .oneshot(multipart_upload(
                "resume",
                "application/pdf",
                b"%PDF-1.5 some pdf bytes",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id: Uuid = reply["jobId"].as_str().unwrap().parse().unwrap();

        let job = f.store.job(id).expect("job row missing");
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.file_key, format!("{id}-pdf"));
        assert_eq!(f.queue.pending(), vec![id.to_string()]);
        let stored = f
            .blobs
            .get(&job.file_key)
            .await
            .expect("blob missing after upload");
        assert_eq!(stored, b"%PDF-1.5 some pdf bytes".to_vec());
    }

    #[tokio::test]
    async fn upload_rejects_wrong_content_type() {
        let f = fixture();

        let response = f
            .app
            .oneshot(multipart_upload("resume", "text/plain", b"hello"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_rejects_non_pdf_bytes() {
        let f = fixture();

        let response = f
            .app
            .oneshot(multipart_upload(
                "resume",
                "application/pdf",
                b"plain text pretending",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_rejects_oversized_documents() {
        let f = fixture();
        let mut data = b"%PDF-1.5 ".to_vec();
        data.resize(MAX_DOCUMENT_SIZE + 1, b'a');

        let response = f
            .app
            .oneshot(multipart_upload("resume", "application/pdf", &data))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_rejects_a_missing_resume_field() {
        let f = fixture();

        let response = f
            .app
            .oneshot(multipart_upload(
                "avatar",
                "application/pdf",
                b"%PDF-1.5 bytes",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_lookup_returns_the_record() {
        let f = fixture();
        let mut job = Job::new(Uuid::now_v7(), "some-key-pdf");
        job.status = JobStatus::Completed;
        job.content = Some("extracted".to_owned());
        let id = job.id;
        f.store.insert(job);

        let response = f
            .app
            .oneshot(
                Request::builder()
                    .uri(format!("/resumes/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply["status"], "completed");
        assert_eq!(reply["content"], "extracted");
        assert!(reply.get("errorMessage").is_none());
    }

    #[tokio::test]
    async fn status_lookup_unknown_id_is_not_found() {
        let f = fixture();

        let response = f
            .app
            .oneshot(
                Request::builder()
                    .uri(format!("/resumes/{}", Uuid::now_v7()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_lookup_malformed_id_is_bad_request() {
        let f = fixture();

        let response = f
            .app
            .oneshot(
                Request::builder()
                    .uri("/resumes/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
