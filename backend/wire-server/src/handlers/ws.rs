//! WebSocket upgrade endpoint
//!
//! Browsers cannot set headers on upgrade requests, so the bearer rides
//! the query string. The token is verified and the ban check passed
//! before the connection is registered and the session actor started.

use crate::state::AppState;
use crate::websocket::WsSession;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// GET /api/ws?token=
pub async fn upgrade(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let claims = state.auth.verify_token(&query.token)?;
    state.auth.check_ban(&claims.sub).await?;

    let (connection_id, rx) = state.connections.register(&claims.sub);
    let session = WsSession::new(
        claims.sub.clone(),
        connection_id.clone(),
        state.connections.clone(),
    );

    let (addr, response) = ws::WsResponseBuilder::new(session, &req, stream).start_with_addr()?;
    WsSession::spawn_forwarder(addr, rx);

    debug!(user_id = %claims.sub, connection_id = %connection_id, "websocket upgraded");
    Ok(response)
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/ws", web::get().to(upgrade));
}
