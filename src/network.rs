use crate::config::ServerConfig;
use crate::matchmaker::{JoinOutcome, MatchTicket};
use crate::message::{
    ErrorBody, ExchangeRequest, GameMessage, LeaveResponse, MoveRequest, MoveResponse,
    PlayerQuery, QueueRequest,
};
use crate::service::SessionService;
use crate::session::{GameSession, PlayerId, SessionView};
use crate::{Error, Result, TurnError};
use axum::{
    Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};

/// HTTP 接口返回的错误
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Turn(TurnError::NotAParticipant) => StatusCode::FORBIDDEN,
        Error::Turn(_) | Error::Conflict(_) => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Config(_) | Error::Storage(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("请求处理失败: {}", self.0);
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// HTTP + WebSocket 服务
pub struct HttpServer {
    service: Arc<SessionService>,
    allowed_origins: Vec<String>,
}

impl HttpServer {
    pub fn new(service: Arc<SessionService>, config: &ServerConfig) -> Self {
        HttpServer {
            service,
            allowed_origins: config.allowed_origins.clone(),
        }
    }

    fn cors(&self) -> CorsLayer {
        if self.allowed_origins.is_empty() {
            debug!("CORS配置: 允许所有来源");
            return CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
        }

        let origins = self
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse::<HeaderValue>().ok())
            .collect::<Vec<_>>();
        debug!("CORS允许的来源: {:?}", origins);
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::IF_NONE_MATCH])
            .expose_headers([header::ETAG])
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/queue/join", post(join_queue))
            .route("/queue/leave", post(leave_queue))
            .route("/queue/ticket", get(get_ticket))
            .route("/sessions/:id", get(get_session_state))
            .route("/sessions/:id/moves", post(submit_move))
            .route("/sessions/:id/pass", post(pass_turn))
            .route("/sessions/:id/exchange", post(exchange_tiles))
            .route("/sessions/:id/resign", post(resign))
            .route("/sessions/:id/ws", get(session_socket))
            .layer(self.cors())
            .with_state(self.service.clone())
    }

    pub async fn serve(&self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("绑定地址失败: {} - {}", addr, e);
            Error::Internal(anyhow::anyhow!(e))
        })?;
        info!("HTTP服务器启动在 {}", addr);

        axum::serve(listener, self.router()).await.map_err(|e| {
            error!("HTTP服务器运行错误: {}", e);
            Error::Internal(anyhow::anyhow!(e))
        })
    }
}

async fn join_queue(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<QueueRequest>,
) -> ApiResult<Json<JoinOutcome>> {
    let outcome = service
        .join_queue(&request.player_id, request.duration_class)
        .await?;
    Ok(Json(outcome))
}

async fn leave_queue(
    State(service): State<Arc<SessionService>>,
    Json(request): Json<QueueRequest>,
) -> ApiResult<Json<LeaveResponse>> {
    let removed = service
        .leave_queue(&request.player_id, request.duration_class)
        .await?;
    Ok(Json(LeaveResponse { removed }))
}

async fn get_ticket(
    State(service): State<Arc<SessionService>>,
    Query(query): Query<PlayerQuery>,
) -> ApiResult<Json<Option<MatchTicket>>> {
    Ok(Json(service.ticket(&query.player_id).await?))
}

/// 返回玩家视角的对局状态；`If-None-Match` 命中时返回 304
async fn get_session_state(
    State(service): State<Arc<SessionService>>,
    Path(id): Path<String>,
    Query(query): Query<PlayerQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let snapshot = service.get_session_state(&id, &query.player_id).await?;
    let etag = format!("\"{}\"", snapshot.digest);

    let unchanged = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);
    if unchanged {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }
    Ok(([(header::ETAG, etag)], Json(snapshot.view)).into_response())
}

async fn submit_move(
    State(service): State<Arc<SessionService>>,
    Path(id): Path<String>,
    Json(request): Json<MoveRequest>,
) -> ApiResult<Json<MoveResponse>> {
    let record = service
        .submit_move(&id, &request.player_id, &request.placements)
        .await?;
    Ok(Json(MoveResponse { record }))
}

async fn pass_turn(
    State(service): State<Arc<SessionService>>,
    Path(id): Path<String>,
    Json(request): Json<PlayerQuery>,
) -> ApiResult<Json<MoveResponse>> {
    let record = service.pass(&id, &request.player_id).await?;
    Ok(Json(MoveResponse { record }))
}

async fn exchange_tiles(
    State(service): State<Arc<SessionService>>,
    Path(id): Path<String>,
    Json(request): Json<ExchangeRequest>,
) -> ApiResult<Json<MoveResponse>> {
    let record = service
        .exchange(&id, &request.player_id, &request.rack_indices)
        .await?;
    Ok(Json(MoveResponse { record }))
}

async fn resign(
    State(service): State<Arc<SessionService>>,
    Path(id): Path<String>,
    Json(request): Json<PlayerQuery>,
) -> ApiResult<Json<SessionView>> {
    let session = service.resign(&id, &request.player_id).await?;
    let view = session
        .view_for(&request.player_id)
        .ok_or(Error::Turn(TurnError::NotAParticipant))?;
    Ok(Json(view))
}

async fn session_socket(
    ws: WebSocketUpgrade,
    State(service): State<Arc<SessionService>>,
    Path(id): Path<String>,
    Query(query): Query<PlayerQuery>,
) -> Response {
    debug!("WebSocket连接请求 - 对局: {}, 玩家: {}", id, query.player_id);
    ws.on_upgrade(move |socket| handle_session_socket(socket, service, id, query.player_id))
}

fn state_message(session: &GameSession, player: &PlayerId) -> Option<String> {
    let view = session.view_for(player)?;
    serde_json::to_string(&GameMessage::state(&view, &session.digest())).ok()
}

/// 推送对局的每次变化；客户端的操作走 HTTP 接口
async fn handle_session_socket(
    socket: WebSocket,
    service: Arc<SessionService>,
    session_id: String,
    player: PlayerId,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut updates = service.subscribe(&session_id);

    let (initial, keep_open) = match service.get_session(&session_id).await {
        Ok(session) if session.is_participant(&player) => {
            (state_message(&session, &player), !session.is_finished())
        }
        Ok(_) => {
            let error = Error::Turn(TurnError::NotAParticipant);
            (serde_json::to_string(&GameMessage::error(&error)).ok(), false)
        }
        Err(e) => (serde_json::to_string(&GameMessage::error(&e)).ok(), false),
    };
    let Some(text) = initial else {
        return;
    };
    if ws_sender.send(Message::Text(text)).await.is_err() || !keep_open {
        let _ = ws_sender.send(Message::Close(None)).await;
        return;
    }

    let forward_service = service.clone();
    let forward_id = session_id.clone();
    let forward_player = player.clone();
    let mut forward = tokio::spawn(async move {
        loop {
            let session = match updates.recv().await {
                Ok(versioned) => match versioned.decode::<GameSession>() {
                    Ok(session) => session,
                    Err(e) => {
                        error!("对局文档解析失败: {}", e);
                        continue;
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "推送落后，重新读取对局");
                    match forward_service.get_session(&forward_id).await {
                        Ok(session) => session,
                        Err(_) => break,
                    }
                }
                Err(RecvError::Closed) => break,
            };

            let finished = session.is_finished();
            if let Some(text) = state_message(&session, &forward_player) {
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    debug!("发送消息到WebSocket失败: {}", e);
                    break;
                }
            }
            if finished {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut forward => break,
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("收到关闭消息");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket读取错误: {}", e);
                    break;
                }
            },
        }
    }
    forward.abort();
    debug!(session_id = %session_id, player_id = %player, "WebSocket连接处理完成");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;

    #[test]
    fn errors_map_to_http_status() {
        assert_eq!(
            status_for(&Error::from(ValidationError::OccupiedCell)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::from(TurnError::NotYourTurn)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::from(TurnError::NotAParticipant)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&Error::NotFound("x".to_string())),
            StatusCode::NOT_FOUND
        );
    }
}
