use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
};

use anyhow::Result;
use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use parley_core::{
    ChatError, ChatResult, CreateMessage, DeleteMessage, EditMessage, EventBus, FetchPage,
    Identity, MessageService, RequestContext,
};
use parley_proto::{Profile, Scope};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    auth,
    config::Config,
    directory,
    manage::{self, CHANNEL_NOT_FOUND, MEMBER_NOT_FOUND, SERVER_NOT_FOUND},
    store::SqliteStore,
    ws,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub service: MessageService,
    pub bus: EventBus,
    pub config: Config,
}

impl AppState {
    /// Open the database under the configured data dir, seeding it on first
    /// run when a bootstrap section is present.
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let store = Arc::new(SqliteStore::open(config.database_path())?);
        if let Some(bootstrap) = &config.bootstrap {
            let conn = store.conn()?;
            if let Some((profile, server)) = directory::seed(&conn, bootstrap)? {
                info!(
                    profile_id = %profile.id,
                    server_id = %server.id,
                    channel_id = %server.general_channel,
                    "seeded empty database"
                );
            }
        }
        let bus = EventBus::new();
        let service = MessageService::new(store.clone(), store.clone(), Arc::new(bus.clone()));
        Ok(Self {
            store,
            service,
            bus,
            config,
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .nest("/api/messages", scoped(Scope::Channel))
        .nest("/api/direct-messages", scoped(Scope::Conversation))
        .route("/api/servers", post(create_server))
        .route(
            "/api/servers/:server_id",
            get(get_server).patch(update_server).delete(delete_server),
        )
        .route("/api/servers/:server_id/invite-code", patch(rotate_invite))
        .route("/api/servers/:server_id/leave", patch(leave_server))
        .route("/api/invites/:invite_code", post(join_server))
        .route("/api/members/:member_id", patch(change_role).delete(kick_member))
        .route("/api/channels", post(create_channel))
        .route(
            "/api/channels/:channel_id",
            patch(update_channel).delete(delete_channel),
        )
        .route("/api/conversations", post(open_conversation))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), identify))
        .with_state(state)
}

/// Message routes for one container scope.
fn scoped(scope: Scope) -> Router<AppState> {
    Router::new()
        .route("/", post(create_message).get(fetch_page))
        .route("/:message_id", patch(edit_message).delete(delete_message))
        .layer(Extension(scope))
}

async fn health() -> &'static str {
    "ok"
}

/// Attach a [`RequestContext`] to every request. Requests without a valid
/// bearer token get an anonymous context; handlers decide what that means.
async fn identify<B>(State(state): State<AppState>, mut req: Request<B>, next: Next<B>) -> Response {
    let ctx = request_context(&state, req.headers());
    req.extensions_mut().insert(ctx);
    next.run(req).await
}

fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    let Some(token) = auth::bearer_token(headers) else {
        return RequestContext::anonymous();
    };
    match auth::verify_jwt(state.config.jwt_secret.as_bytes(), token) {
        Ok(claims) => RequestContext::for_subject(claims.sub),
        Err(e) => {
            debug!(error = %e, "rejected bearer token");
            RequestContext::anonymous()
        }
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

/// HTTP rendering of a [`ChatError`].
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResp {
                error: self.0.public_message(),
            }),
        )
            .into_response()
    }
}

/// Run a blocking service call off the async workers. Internal failures are
/// logged here with the operation tag before the response hides them.
pub(crate) async fn run<T, F>(op: &'static str, f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    let res = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::Internal(e.into()))
        .and_then(|r| r);
    res.map_err(|e| {
        if e.is_internal() {
            error!(op, error = ?e, "request failed");
        }
        ApiError(e)
    })
}

#[derive(Deserialize, Default)]
struct ContainerQuery {
    channel_id: Option<String>,
    conversation_id: Option<String>,
    cursor: Option<String>,
}

impl ContainerQuery {
    fn container_id(&self, scope: Scope) -> Option<String> {
        match scope {
            Scope::Channel => self.channel_id.clone(),
            Scope::Conversation => self.conversation_id.clone(),
        }
    }
}

#[derive(Deserialize, Default)]
struct MessageBody {
    content: Option<String>,
    file_url: Option<String>,
}

async fn create_message(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ContainerQuery>,
    body: Option<Json<MessageBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = json_or_default(body);
    let req = CreateMessage {
        container_id: query.container_id(scope),
        content: body.content,
        file_url: body.file_url,
    };
    let service = state.service.clone();
    let message = run("create_message", move || service.create(&ctx, scope, req)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn fetch_page(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ContainerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let req = FetchPage {
        container_id: query.container_id(scope),
        cursor: query.cursor,
    };
    let service = state.service.clone();
    let page = run("fetch_page", move || service.fetch_page(&ctx, scope, req)).await?;
    Ok(Json(page))
}

async fn edit_message(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Extension(ctx): Extension<RequestContext>,
    Path(message_id): Path<String>,
    Query(query): Query<ContainerQuery>,
    body: Option<Json<MessageBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = EditMessage {
        message_id: Some(message_id),
        container_id: query.container_id(scope),
        content: json_or_default(body).content,
    };
    let service = state.service.clone();
    let message = run("edit_message", move || service.edit(&ctx, scope, req)).await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Extension(scope): Extension<Scope>,
    Extension(ctx): Extension<RequestContext>,
    Path(message_id): Path<String>,
    Query(query): Query<ContainerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let req = DeleteMessage {
        message_id: Some(message_id),
        container_id: query.container_id(scope),
    };
    let service = state.service.clone();
    let message = run("delete_message", move || service.delete(&ctx, scope, req)).await?;
    Ok(Json(message))
}

/// Run a management operation for the resolved caller on a pooled
/// connection.
async fn as_caller<T, F>(state: &AppState, ctx: RequestContext, op: &'static str, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Connection, &Profile) -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    let store = state.store.clone();
    run(op, move || {
        let caller = store
            .resolve_caller(&ctx)?
            .ok_or(ChatError::Unauthenticated)?;
        let conn = store.conn()?;
        f(&conn, &caller)
    })
    .await
}

#[derive(Deserialize, Default)]
struct ServerQuery {
    server_id: Option<String>,
}

impl ServerQuery {
    fn server_id(&self) -> ChatResult<Uuid> {
        manage::parse_id(self.server_id.as_deref(), "Server id missing", SERVER_NOT_FOUND)
    }
}

#[derive(Deserialize, Default)]
struct ServerBody {
    name: Option<String>,
    image_url: Option<String>,
}

#[derive(Deserialize, Default)]
struct RoleBody {
    role: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChannelBody {
    name: Option<String>,
    #[serde(alias = "type")]
    kind: Option<String>,
}

#[derive(Deserialize, Default)]
struct ConversationBody {
    member_id: Option<String>,
}

fn json_or_default<T: Default>(body: Option<Json<T>>) -> T {
    body.map(|Json(b)| b).unwrap_or_default()
}

fn path_id(raw: &str, unknown: &'static str) -> Result<Uuid, ApiError> {
    Ok(manage::parse_id(Some(raw), unknown, unknown)?)
}

async fn create_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    req: Option<Json<ServerBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = json_or_default(req);
    let server = as_caller(&state, ctx, "create_server", move |conn, caller| {
        manage::create_server(conn, caller, req.name.as_deref(), req.image_url.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn get_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = path_id(&server_id, SERVER_NOT_FOUND)?;
    let server = as_caller(&state, ctx, "get_server", move |conn, caller| {
        manage::get_server(conn, caller, &server_id)
    })
    .await?;
    Ok(Json(server))
}

async fn update_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(server_id): Path<String>,
    req: Option<Json<ServerBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = path_id(&server_id, SERVER_NOT_FOUND)?;
    let req = json_or_default(req);
    let server = as_caller(&state, ctx, "update_server", move |conn, caller| {
        manage::update_server(
            conn,
            caller,
            &server_id,
            req.name.as_deref(),
            req.image_url.as_deref(),
        )
    })
    .await?;
    Ok(Json(server))
}

async fn delete_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = path_id(&server_id, SERVER_NOT_FOUND)?;
    let server = as_caller(&state, ctx, "delete_server", move |conn, caller| {
        manage::delete_server(conn, caller, &server_id)
    })
    .await?;
    Ok(Json(server))
}

async fn rotate_invite(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = path_id(&server_id, SERVER_NOT_FOUND)?;
    let server = as_caller(&state, ctx, "rotate_invite", move |conn, caller| {
        manage::rotate_invite(conn, caller, &server_id)
    })
    .await?;
    Ok(Json(server))
}

async fn leave_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = path_id(&server_id, SERVER_NOT_FOUND)?;
    let server = as_caller(&state, ctx, "leave_server", move |conn, caller| {
        manage::leave(conn, caller, &server_id)
    })
    .await?;
    Ok(Json(server))
}

async fn join_server(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(invite_code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let server = as_caller(&state, ctx, "join_server", move |conn, caller| {
        manage::join(conn, caller, &invite_code)
    })
    .await?;
    Ok(Json(server))
}

async fn change_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(member_id): Path<String>,
    Query(query): Query<ServerQuery>,
    req: Option<Json<RoleBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = query.server_id()?;
    let member_id = path_id(&member_id, MEMBER_NOT_FOUND)?;
    let req = json_or_default(req);
    let server = as_caller(&state, ctx, "change_role", move |conn, caller| {
        manage::change_role(conn, caller, &server_id, &member_id, req.role.as_deref())
    })
    .await?;
    Ok(Json(server))
}

async fn kick_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(member_id): Path<String>,
    Query(query): Query<ServerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = query.server_id()?;
    let member_id = path_id(&member_id, MEMBER_NOT_FOUND)?;
    let server = as_caller(&state, ctx, "kick_member", move |conn, caller| {
        manage::kick(conn, caller, &server_id, &member_id)
    })
    .await?;
    Ok(Json(server))
}

async fn create_channel(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ServerQuery>,
    req: Option<Json<ChannelBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = query.server_id()?;
    let req = json_or_default(req);
    let server = as_caller(&state, ctx, "create_channel", move |conn, caller| {
        manage::create_channel(conn, caller, &server_id, req.name.as_deref(), req.kind.as_deref())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn update_channel(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(channel_id): Path<String>,
    Query(query): Query<ServerQuery>,
    req: Option<Json<ChannelBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = query.server_id()?;
    let channel_id = path_id(&channel_id, CHANNEL_NOT_FOUND)?;
    let req = json_or_default(req);
    let server = as_caller(&state, ctx, "update_channel", move |conn, caller| {
        manage::update_channel(
            conn,
            caller,
            &server_id,
            &channel_id,
            req.name.as_deref(),
            req.kind.as_deref(),
        )
    })
    .await?;
    Ok(Json(server))
}

async fn delete_channel(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(channel_id): Path<String>,
    Query(query): Query<ServerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = query.server_id()?;
    let channel_id = path_id(&channel_id, CHANNEL_NOT_FOUND)?;
    let server = as_caller(&state, ctx, "delete_channel", move |conn, caller| {
        manage::delete_channel(conn, caller, &server_id, &channel_id)
    })
    .await?;
    Ok(Json(server))
}

async fn open_conversation(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ServerQuery>,
    req: Option<Json<ConversationBody>>,
) -> Result<impl IntoResponse, ApiError> {
    let server_id = query.server_id()?;
    let member_id = manage::parse_id(
        json_or_default(req).member_id.as_deref(),
        "Member id missing",
        MEMBER_NOT_FOUND,
    )?;
    let conversation = as_caller(&state, ctx, "open_conversation", move |conn, caller| {
        manage::open_conversation(conn, caller, &server_id, &member_id)
    })
    .await?;
    Ok(Json(conversation))
}

/// Serve the application on an already bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    listener.set_nonblocking(true)?;
    axum::Server::from_tcp(listener)?
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}

/// Run the HTTP server bound to the configured address.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse()?;
    let state = AppState::new(config).await?;
    let listener = TcpListener::bind(addr)?;
    info!(%addr, "listening");
    serve(listener, state).await
}
