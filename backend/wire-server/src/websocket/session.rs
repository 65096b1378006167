//! WebSocket session actor
//!
//! One actor per upgraded connection. Outbound frames arrive from the
//! connection registry through a forwarded channel; inbound text frames
//! carry application-level pings. Protocol-level ping/pong is answered as
//! well for clients that use it.

use super::manager::{ConnectionManager, Outbound, OutboundReceiver};
use super::messages::ClientMessage;
use actix::{Actor, ActorContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web_actors::ws;
use tracing::{debug, warn};

/// Frame forwarded from the registry to this session.
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct ForwardFrame(pub String);

/// Registry-initiated close (stale heartbeat sweep).
#[derive(ActixMessage)]
#[rtype(result = "()")]
pub struct CloseConnection;

pub struct WsSession {
    user_id: String,
    connection_id: String,
    manager: ConnectionManager,
}

impl WsSession {
    pub fn new(user_id: String, connection_id: String, manager: ConnectionManager) -> Self {
        Self {
            user_id,
            connection_id,
            manager,
        }
    }

    /// Bridge the registry's outbound channel into the actor mailbox.
    pub fn spawn_forwarder(addr: actix::Addr<WsSession>, mut rx: OutboundReceiver) {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    Outbound::Frame(frame) => {
                        if addr.try_send(ForwardFrame(frame)).is_err() {
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = addr.try_send(CloseConnection);
                        break;
                    }
                }
            }
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, _ctx: &mut Self::Context) {
        debug!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "websocket session started"
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.manager.unregister(&self.user_id, &self.connection_id);
        debug!(
            user_id = %self.user_id,
            connection_id = %self.connection_id,
            "websocket session stopped"
        );
    }
}

impl Handler<ForwardFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: ForwardFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl Handler<CloseConnection> for WsSession {
    type Result = ();

    fn handle(&mut self, _msg: CloseConnection, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Away,
            description: Some("heartbeat timeout".to_string()),
        }));
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    if let Some(pong) = self.manager.touch(&self.user_id, &self.connection_id) {
                        if let Ok(frame) = pong.to_json() {
                            ctx.text(frame);
                        }
                    }
                }
                Err(e) => {
                    warn!(user_id = %self.user_id, "unparseable websocket frame: {}", e);
                }
            },
            Ok(ws::Message::Ping(payload)) => {
                self.manager.touch(&self.user_id, &self.connection_id);
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.manager.touch(&self.user_id, &self.connection_id);
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(user_id = %self.user_id, "websocket close received: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Binary(_)) => {
                warn!(user_id = %self.user_id, "binary websocket frames not supported");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(user_id = %self.user_id, "websocket protocol error: {}", e);
                ctx.stop();
            }
        }
    }
}
