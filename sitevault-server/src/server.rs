use crate::config::Config;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitevault_core::{
    CommittedFile, DisabledLedger, DurableRef, JsonRpcLedgerClient, LedgerBackend, LedgerWarning,
    Result, SiteFile, SiteMetadata, SiteState, SiteStore, SqliteMirror, UploadFilesOperation,
    UploadFilesOperationRequest, UploadPolicy, UploadResult, UploadSiteOperation,
    UploadSiteOperationRequest, VaultError, validate_site_id,
};
use std::sync::Arc;
use std::time::Duration;
use tower::util::MapRequest;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub store: Arc<SiteStore>,
    pub upload_site: UploadSiteOperation,
    pub upload_files: UploadFilesOperation,
    pub path_prefix: String,
}

impl ServerState {
    pub fn new(store: Arc<SiteStore>, config: &Config) -> Self {
        let policy = Arc::new(UploadPolicy::from_config(&config.upload));
        Self {
            upload_site: UploadSiteOperation::new(store.clone(), policy.clone()),
            upload_files: UploadFilesOperation::new(store.clone(), policy),
            store,
            path_prefix: config.server.normalized_path_prefix(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    upload_id: String,
    site_id: String,
    committed: Vec<CommittedFile>,
    warnings: Vec<LedgerWarning>,
    metadata: Option<SiteMetadata>,
}

#[derive(Debug, Serialize)]
struct SiteResponse {
    metadata: SiteMetadata,
    files: Vec<FileResponse>,
}

#[derive(Debug, Serialize)]
struct FileResponse {
    path: String,
    size: u64,
    content_type: String,
    expires_at: DateTime<Utc>,
    ledger_ref: Option<DurableRef>,
}

#[derive(Debug, Deserialize)]
struct ExtendRequest {
    secs: u64,
}

pub async fn run_server(config: Config) -> Result<()> {
    let store = build_store(&config)?;

    let reclaim_store = store.clone();
    let reclaim_interval = config.server.reclaim_interval();
    tokio::spawn(async move {
        reclaim_loop(reclaim_store, reclaim_interval).await;
    });

    let state = Arc::new(ServerState::new(store, &config));
    let app = with_tenant_hosts(
        router(state.clone(), body_limit(&config)),
        config.server.base_domain.clone(),
        state.path_prefix.clone(),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(
        bind_addr = %config.server.bind_addr,
        path_prefix = %state.path_prefix,
        base_domain = ?config.server.base_domain,
        "Server listening"
    );

    axum::serve(
        listener,
        axum::ServiceExt::<Request>::into_make_service(app),
    )
    .await?;

    Ok(())
}

pub fn build_store(config: &Config) -> Result<Arc<SiteStore>> {
    let mirror = SqliteMirror::open(config.mirror.db_path())?;
    tracing::info!(db_path = %mirror.db_path().display(), "mirror opened");

    let ledger: Arc<dyn LedgerBackend> = if config.ledger.enabled {
        let client = JsonRpcLedgerClient::new(config.ledger.clone())?;
        tracing::info!(
            address = %client.address(),
            rpc_url = %config.ledger.rpc_url,
            "ledger writes enabled"
        );
        Arc::new(client)
    } else {
        tracing::warn!("ledger disabled, entries are kept in the mirror only");
        Arc::new(DisabledLedger)
    };

    let store = SiteStore::new(ledger, Arc::new(mirror), config.upload.ttl())
        .with_ledger_concurrency(config.upload.upload_concurrency);
    Ok(Arc::new(store))
}

fn body_limit(config: &Config) -> usize {
    let limit = config.upload.max_site_size.saturating_add(1024 * 1024);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

pub fn router(state: Arc<ServerState>, body_limit: usize) -> Router {
    let prefix = state.path_prefix.clone();

    Router::new()
        .route("/health", get(health_handler))
        .route("/sites/:site_id", get(get_site).post(create_site))
        .route("/sites/:site_id/files", put(add_files))
        .route("/sites/:site_id/extend", post(extend_site))
        .route(&format!("{}/:site_id", prefix), get(serve_site_root))
        .route(&format!("{}/:site_id/*path", prefix), get(serve_site_path))
        .fallback(fallback_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Maps `{label}.{base_domain}/{path}` onto `{prefix}/{label}/{path}` before
/// routing, so both tenancy styles share the same handlers.
pub fn with_tenant_hosts(
    router: Router,
    base_domain: Option<String>,
    prefix: String,
) -> MapRequest<Router, impl FnMut(Request) -> Request + Clone + Send + 'static> {
    let base_domain = base_domain.map(|domain| domain.trim_matches('.').to_ascii_lowercase());
    MapRequest::new(router, move |request: Request| match &base_domain {
        Some(domain) => rewrite_tenant_host(request, domain, &prefix),
        None => request,
    })
}

fn rewrite_tenant_host(mut request: Request, base_domain: &str, prefix: &str) -> Request {
    let Some(label) = tenant_label(request.headers(), base_domain) else {
        return request;
    };

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    let rewritten = format!("{}/{}{}", prefix, label, path_and_query);

    match rewritten.parse::<Uri>() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(e) => tracing::debug!(host = %label, error = %e, "tenant rewrite skipped"),
    }
    request
}

fn tenant_label(headers: &HeaderMap, base_domain: &str) -> Option<String> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let host = host.split(':').next()?.to_ascii_lowercase();
    let label = host.strip_suffix(base_domain)?.strip_suffix('.')?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(label.to_string())
}

async fn reclaim_loop(store: Arc<SiteStore>, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        if let Err(e) = store.reclaim_expired().await {
            tracing::warn!(error = %e, "Failed to reclaim expired entries");
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn create_site(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    multipart: Multipart,
) -> Response {
    let files = match read_files(multipart).await {
        Ok(files) => files,
        Err(response) => return response,
    };

    match state
        .upload_site
        .run(UploadSiteOperationRequest { site_id, files })
        .await
    {
        Ok(result) => upload_response(StatusCode::CREATED, result),
        Err(e) => error_response(&e),
    }
}

async fn add_files(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    multipart: Multipart,
) -> Response {
    let files = match read_files(multipart).await {
        Ok(files) => files,
        Err(response) => return response,
    };

    match state
        .upload_files
        .run(UploadFilesOperationRequest { site_id, files })
        .await
    {
        Ok(result) => upload_response(StatusCode::OK, result),
        Err(e) => error_response(&e),
    }
}

async fn get_site(State(state): State<Arc<ServerState>>, Path(site_id): Path<String>) -> Response {
    if let Err(e) = validate_site_id(&site_id) {
        return error_response(&e);
    }

    let metadata = match state.store.site_state(&site_id).await {
        Ok(SiteState::Live(metadata)) => metadata,
        Ok(SiteState::Expired(_)) => return error_response(&VaultError::SiteExpired(site_id)),
        Ok(SiteState::Absent) => return error_response(&VaultError::SiteNotFound(site_id)),
        Err(e) => return error_response(&e),
    };

    let files = match state.store.list_site_files(&site_id).await {
        Ok(entries) => entries
            .into_iter()
            .map(|entry| FileResponse {
                path: entry.path,
                size: entry.size,
                content_type: entry.content_type,
                expires_at: entry.expires_at,
                ledger_ref: entry.ledger_ref,
            })
            .collect(),
        Err(e) => return error_response(&e),
    };

    success_response(StatusCode::OK, SiteResponse { metadata, files })
}

async fn extend_site(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
    Json(request): Json<ExtendRequest>,
) -> Response {
    if let Err(e) = validate_site_id(&site_id) {
        return error_response(&e);
    }

    match state
        .store
        .extend_site(&site_id, Duration::from_secs(request.secs))
        .await
    {
        Ok(metadata) => success_response(StatusCode::OK, metadata),
        Err(e) => error_response(&e),
    }
}

async fn serve_site_root(
    State(state): State<Arc<ServerState>>,
    Path(site_id): Path<String>,
) -> Response {
    serve_file(&state, &site_id, "").await
}

async fn serve_site_path(
    State(state): State<Arc<ServerState>>,
    Path((site_id, path)): Path<(String, String)>,
) -> Response {
    serve_file(&state, &site_id, &path).await
}

/// Catches `{prefix}/{site_id}/`, which the wildcard route does not match.
async fn fallback_handler(State(state): State<Arc<ServerState>>, uri: Uri) -> Response {
    let site_root = uri
        .path()
        .strip_prefix(state.path_prefix.as_str())
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|site_id| !site_id.is_empty() && !site_id.contains('/'));

    match site_root {
        Some(site_id) => serve_file(&state, site_id, "").await,
        None => message_response(StatusCode::NOT_FOUND, "not found".to_string()),
    }
}

async fn serve_file(state: &ServerState, site_id: &str, path: &str) -> Response {
    if validate_site_id(site_id).is_err() {
        return message_response(StatusCode::NOT_FOUND, "not found".to_string());
    }

    match state.store.resolve_file(site_id, path).await {
        Ok(Some(entry)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, entry.content_type)],
            entry.value,
        )
            .into_response(),
        Ok(None) => message_response(StatusCode::NOT_FOUND, "not found".to_string()),
        Err(e) => error_response(&e),
    }
}

/// Each multipart field is one file; the field name is its site path.
async fn read_files(mut multipart: Multipart) -> std::result::Result<Vec<SiteFile>, Response> {
    let mut files = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(message_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid multipart body: {}", e),
                ));
            }
        };

        let path = field
            .name()
            .filter(|name| !name.is_empty())
            .or_else(|| field.file_name())
            .map(str::to_string);
        let Some(path) = path else {
            return Err(message_response(
                StatusCode::BAD_REQUEST,
                "multipart field without a name".to_string(),
            ));
        };

        let content = field.bytes().await.map_err(|e| {
            message_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read {}: {}", path, e),
            )
        })?;
        files.push(SiteFile::new(path, content));
    }

    Ok(files)
}

fn upload_response(status: StatusCode, result: UploadResult) -> Response {
    let UploadResult {
        upload_id,
        site_id,
        committed,
        warnings,
        metadata,
        fatal,
    } = result;

    let body = UploadResponse {
        upload_id,
        site_id,
        committed,
        warnings,
        metadata,
    };

    match fatal {
        None => success_response(status, body),
        Some(e) => {
            let resp = ApiResponse {
                success: false,
                data: Some(body),
                error: Some(e.to_string()),
            };
            (status_for(&e), Json(resp)).into_response()
        }
    }
}

fn success_response<T: Serialize>(status: StatusCode, data: T) -> Response {
    let resp = ApiResponse {
        success: true,
        data: Some(data),
        error: None,
    };
    (status, Json(resp)).into_response()
}

fn error_response(error: &VaultError) -> Response {
    let status = status_for(error);
    if status.is_server_error() {
        tracing::error!(error = %error, "request failed");
    }
    message_response(status, error.to_string())
}

fn message_response(status: StatusCode, message: String) -> Response {
    let resp = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some(message),
    };
    (status, Json(resp)).into_response()
}

fn status_for(error: &VaultError) -> StatusCode {
    match error {
        VaultError::FileTooLarge { .. } | VaultError::SiteTooLarge { .. } => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        VaultError::ForbiddenFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        VaultError::SiteAlreadyExists(_) => StatusCode::CONFLICT,
        VaultError::SiteNotFound(_) => StatusCode::NOT_FOUND,
        VaultError::SiteExpired(_) => StatusCode::GONE,
        e if e.is_fatal() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
