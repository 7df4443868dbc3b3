//! WebSocket 接入
//!
//! 升级前完成认证，之后把 axum 的 socket 拆成读写两半，
//! 转换成 `ClientSession` 需要的 Stream / Sink 交给会话运行。

use application::{ClientSession, InboundFrame, TransportError};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use domain::UserId;
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// 浏览器无法给 WebSocket 设置请求头，token 放在查询参数里
    token: Option<String>,
}

pub async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user_id = match query.token.as_deref() {
        Some(token) => state.jwt_service.user_from_token(token)?,
        None => state.jwt_service.extract_user_from_headers(&headers)?,
    };

    if state.registry.is_shutting_down() {
        return Err(ApiError::service_unavailable("server is shutting down"));
    }

    tracing::debug!(user_id = %user_id, "WebSocket 升级");
    Ok(ws.on_upgrade(move |socket| run_connection(socket, state, user_id)))
}

fn inbound_frame(
    message: Result<WsMessage, axum::Error>,
) -> Option<Result<InboundFrame, TransportError>> {
    match message {
        Ok(WsMessage::Text(text)) => Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
        // 二进制帧按 UTF-8 文本处理，非法字节整帧拒绝
        Ok(WsMessage::Binary(bytes)) => Some(Ok(match String::from_utf8(bytes.to_vec()) {
            Ok(text) => InboundFrame::Text(text),
            Err(err) => InboundFrame::Malformed(err.to_string()),
        })),
        Ok(WsMessage::Close(_)) => Some(Ok(InboundFrame::Close)),
        // ping 由 axum 自动应答
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => None,
        Err(err) => Some(Err(TransportError::new(err))),
    }
}

async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let (sink, stream) = socket.split();
    let inbound = stream.filter_map(|message| future::ready(inbound_frame(message)));
    let outbound = sink.with(|text: String| {
        future::ready(Ok::<_, axum::Error>(WsMessage::Text(text.into())))
    });

    let session = ClientSession::new(
        user_id,
        state.registry.clone(),
        state.dispatcher.clone(),
        state.session.outbound_capacity,
    );
    let session_id = session.id();

    if let Err(err) = session.run(inbound, outbound).await {
        tracing::warn!(user_id = %user_id, session_id = %session_id, error = %err, "会话未能启动");
    }
}
