use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_http::ws::Item;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::{AppError, AppResult};
use crate::models::{NewPost, Upload};
use crate::services::MutationPipeline;
use crate::state::AppState;
use crate::websocket::message_types::{InlineImage, WsInboundEvent, WsOutboundEvent};
use crate::websocket::{FeedFrame, SubscriberId};

/// Room left in a text message for the JSON envelope and the text fields
const ENVELOPE_ALLOWANCE: usize = 132 * 1024;

/// Largest text message a session accepts: a base64 image of
/// `max_upload_bytes` plus the surrounding `new_post` event.
pub fn max_message_bytes(max_upload_bytes: usize) -> usize {
    max_upload_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(ENVELOPE_ALLOWANCE)
}

// Direct reply to this session only (acks and errors)
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct TextMessage(String);

// Text message split over continuation frames
enum Fragments {
    Idle,
    Text(Vec<u8>),
    Discarding,
}

// WebSocket Actor
struct WsSession {
    subscriber_id: Option<SubscriberId>,
    pipeline: Arc<MutationPipeline>,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    max_upload_bytes: usize,
    max_message_bytes: usize,
    fragments: Fragments,
    hb: Instant,
}

impl WsSession {
    fn new(state: &AppState) -> Self {
        Self {
            subscriber_id: None,
            pipeline: state.pipeline.clone(),
            heartbeat_interval: state.config.websocket.heartbeat_interval,
            client_timeout: state.config.websocket.client_timeout,
            max_upload_bytes: state.config.storage.max_upload_bytes,
            max_message_bytes: max_message_bytes(state.config.storage.max_upload_bytes),
            fragments: Fragments::Idle,
            hb: Instant::now(),
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!("WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_error(ctx: &mut ws::WebsocketContext<Self>, err: &AppError) {
        match (WsOutboundEvent::Error {
            message: err.public_message(),
        })
        .to_json()
        {
            Ok(json) => ctx.text(json),
            Err(e) => tracing::error!(error = %e, "failed to encode error event"),
        }
    }

    fn handle_text(&self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::from_str::<WsInboundEvent>(text) {
            Ok(event) => self.handle_event(event, ctx),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse WS message");
                let err = AppError::Validation(format!("unrecognized event: {e}"));
                Self::send_error(ctx, &err);
            }
        }
    }

    fn handle_continuation(&mut self, item: Item, ctx: &mut ws::WebsocketContext<Self>) {
        let (chunk, last) = match item {
            Item::FirstText(data) => {
                self.fragments = Fragments::Text(Vec::with_capacity(data.len()));
                (data, false)
            }
            Item::FirstBinary(_) => {
                tracing::warn!("Binary WebSocket messages not supported");
                self.fragments = Fragments::Discarding;
                return;
            }
            Item::Continue(data) => (data, false),
            Item::Last(data) => (data, true),
        };

        let buffered = match self.fragments {
            Fragments::Text(ref buf) => buf.len(),
            Fragments::Discarding => {
                if last {
                    self.fragments = Fragments::Idle;
                }
                return;
            }
            Fragments::Idle => {
                tracing::warn!("continuation frame without a first fragment");
                return;
            }
        };

        if buffered + chunk.len() > self.max_message_bytes {
            self.fragments = if last {
                Fragments::Idle
            } else {
                Fragments::Discarding
            };
            let err = AppError::Validation(format!(
                "message exceeds the {} byte limit",
                self.max_message_bytes
            ));
            Self::send_error(ctx, &err);
            return;
        }
        if let Fragments::Text(buf) = &mut self.fragments {
            buf.extend_from_slice(&chunk);
        }

        if last {
            if let Fragments::Text(buf) = std::mem::replace(&mut self.fragments, Fragments::Idle) {
                match String::from_utf8(buf) {
                    Ok(text) => self.handle_text(&text, ctx),
                    Err(_) => Self::send_error(
                        ctx,
                        &AppError::Validation("message is not valid UTF-8".into()),
                    ),
                }
            }
        }
    }

    fn handle_event(&self, event: WsInboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            WsInboundEvent::NewPost {
                author,
                message,
                image,
            } => {
                let pipeline = self.pipeline.clone();
                let max_upload_bytes = self.max_upload_bytes;
                let addr = ctx.address();

                actix::spawn(async move {
                    // The feed itself reaches this client through the hub.
                    let reply =
                        submit_new_post(&pipeline, author, message, image, max_upload_bytes)
                            .await;

                    match reply {
                        Ok(json) => addr.do_send(TextMessage(json)),
                        Err(e) => tracing::error!(error = %e, "failed to encode reply"),
                    }
                });
            }
        }
    }
}

/// Run a socket submission through the pipeline and build the reply for the
/// client that sent it: `post_created` on success, `error` otherwise.
async fn submit_new_post(
    pipeline: &MutationPipeline,
    author: Option<String>,
    message: Option<String>,
    image: Option<InlineImage>,
    max_upload_bytes: usize,
) -> Result<String, serde_json::Error> {
    let outcome = match image
        .map(|img| decode_inline_image(img, max_upload_bytes))
        .transpose()
    {
        Ok(image) => {
            pipeline
                .create(NewPost {
                    author,
                    message,
                    image,
                })
                .await
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(post) => WsOutboundEvent::PostCreated { post: &post }.to_json(),
        Err(e) => WsOutboundEvent::Error {
            message: e.public_message(),
        }
        .to_json(),
    }
}

fn decode_inline_image(image: InlineImage, max_bytes: usize) -> AppResult<Upload> {
    let bytes = STANDARD
        .decode(image.data.as_bytes())
        .map_err(|_| AppError::Validation("image data is not valid base64".into()))?;

    if bytes.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "image exceeds the {max_bytes} byte limit"
        )));
    }

    Ok(Upload {
        bytes,
        original_name: image.filename,
    })
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let (subscriber_id, rx) = self.pipeline.hub().subscribe();
        self.subscriber_id = Some(subscriber_id);
        ctx.add_stream(UnboundedReceiverStream::new(rx));

        tracing::info!(?subscriber_id, "WebSocket session started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(subscriber_id) = self.subscriber_id.take() {
            self.pipeline.hub().unsubscribe(subscriber_id);
            tracing::info!(?subscriber_id, "WebSocket session stopped");
        }
    }
}

// Feed snapshots forwarded from the hub
impl StreamHandler<FeedFrame> for WsSession {
    fn handle(&mut self, frame: FeedFrame, ctx: &mut Self::Context) {
        ctx.text(&*frame.payload);
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        tracing::debug!("hub channel closed, stopping session");
        ctx.stop();
    }
}

impl Handler<TextMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: TextMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => self.handle_text(&text, ctx),
            Ok(ws::Message::Continuation(item)) => self.handle_continuation(item, ctx),
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!(?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Nop) => {}
            Err(ws::ProtocolError::Overflow) => {
                tracing::warn!(limit = self.max_message_bytes, "WebSocket frame too large");
                let err = AppError::Validation(format!(
                    "message exceeds the {} byte limit",
                    self.max_message_bytes
                ));
                Self::send_error(ctx, &err);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(&state);
    let frame_size = session.max_message_bytes;

    ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(frame_size)
        .start()
}
