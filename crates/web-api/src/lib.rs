//! Web API 层。
//!
//! 提供 Axum 路由：HTTP 接口直接调用聊天领域服务，
//! WebSocket 连接在认证后交给应用层的 `ClientSession`。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{AuthUser, Claims, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
