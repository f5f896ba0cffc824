pub mod state;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use self::state::{UiState, WebCommand};
use crate::device::remote::{DeviceReply, PendingReplies};
use crate::finetune::params::ParamId;
use crate::finetune::{Direction, FinetuneMode, Target};
use crate::input::{ButtonState, InputFrame, Stick, StickSample};

/// Shared state for the web server.
pub struct WebState {
    pub ui_state: Arc<UiState>,
    pub cmd_tx: mpsc::Sender<WebCommand>,
    pub events: broadcast::Sender<String>,
    pub pending: PendingReplies,
}

/// Start the web server on the given port.
pub async fn start_server(
    port: u16,
    ui_state: Arc<UiState>,
    cmd_tx: mpsc::Sender<WebCommand>,
    events: broadcast::Sender<String>,
    pending: PendingReplies,
) -> anyhow::Result<()> {
    let shared = Arc::new(WebState {
        ui_state,
        cmd_tx,
        events,
        pending,
    });

    let app = Router::new()
        .route("/api/state", get(api_state))
        .route("/ws", get(ws_handler))
        .with_state(shared);

    let addr = format!("0.0.0.0:{port}");
    info!("[WEB] Server starting on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /api/state
async fn api_state(State(state): State<Arc<WebState>>) -> Json<Value> {
    Json(state.ui_state.snapshot_json())
}

/// WebSocket handler for state updates, events and commands.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WebState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: Arc<WebState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before sending init so nothing falls in between.
    let mut events = BroadcastStream::new(state.events.subscribe());

    let init_msg = serde_json::json!({
        "type": "init",
        "state": state.ui_state.snapshot_json(),
    });
    if let Err(e) = sender.send(Message::Text(init_msg.to_string())).await {
        debug!("[WEB] Failed to send init: {e}");
        return;
    }

    // Forward broadcasts to the WebSocket; a slow client skips what it missed.
    let send_task = tokio::spawn(async move {
        while let Some(item) = events.next().await {
            let msg = match item {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("[WEB] Client {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                Ok(val) => route_message(&state, &val).await,
                Err(e) => {
                    warn!("[WEB] Invalid JSON from WebSocket: {e}");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("[WEB] WebSocket error: {e}");
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    debug!("[WEB] WebSocket connection closed");
}

/// Device replies bypass the controller: it is blocked awaiting them.
async fn route_message(state: &WebState, val: &Value) {
    if val.get("cmd").and_then(Value::as_str) == Some("DEVICE_REPLY") {
        match val.get("data").cloned().map(serde_json::from_value::<DeviceReply>) {
            Some(Ok(reply)) => {
                state.pending.resolve(reply);
            }
            _ => warn!("[WEB] Malformed DEVICE_REPLY"),
        }
        return;
    }

    if let Some(cmd) = parse_web_command(val) {
        if let Err(e) = state.cmd_tx.send(cmd).await {
            error!("[WEB] Failed to send command: {e}");
        }
    }
}

#[derive(Deserialize)]
struct InputMessage {
    timestamp: f64,
    left: StickSample,
    right: StickSample,
    #[serde(default)]
    buttons: Vec<String>,
}

impl From<InputMessage> for InputFrame {
    fn from(msg: InputMessage) -> Self {
        InputFrame {
            timestamp: msg.timestamp,
            left: msg.left,
            right: msg.right,
            buttons: ButtonState::from_names(msg.buttons.iter().map(String::as_str)),
        }
    }
}

fn stick_arg(data: &Value) -> Option<Stick> {
    let name = data.get("stick").or(Some(data))?.as_str()?;
    match name.parse::<Stick>() {
        Ok(stick) => Some(stick),
        Err(e) => {
            warn!("[WEB] {e}");
            None
        }
    }
}

fn parse_web_command(val: &Value) -> Option<WebCommand> {
    let cmd = val.get("cmd")?.as_str()?;
    let data = val.get("data").unwrap_or(&Value::Null);
    match cmd {
        "INPUT" => match InputMessage::deserialize(data) {
            Ok(msg) => Some(WebCommand::Input(msg.into())),
            Err(e) => {
                warn!("[WEB] Bad INPUT: {e}");
                None
            }
        },
        "RANGE_OPEN" => Some(WebCommand::RangeOpen),
        "RANGE_CLOSE" => Some(WebCommand::RangeClose),
        "CENTER_OPEN" => Some(WebCommand::CenterOpen),
        "CENTER_NEXT" => Some(WebCommand::CenterNext),
        "CENTER_CANCEL" => Some(WebCommand::CenterCancel),
        "CENTER_AUTO" => Some(WebCommand::CenterAuto),
        "FINETUNE_OPEN" => Some(WebCommand::FinetuneOpen),
        "FINETUNE_MODE" => match data.as_str()?.parse::<FinetuneMode>() {
            Ok(mode) => Some(WebCommand::FinetuneMode(mode)),
            Err(e) => {
                warn!("[WEB] {e}");
                None
            }
        },
        "FINETUNE_STICK" => {
            if data.is_null() {
                Some(WebCommand::FinetuneStick(None))
            } else {
                Some(WebCommand::FinetuneStick(Some(stick_arg(data)?)))
            }
        }
        "FINETUNE_STEP_SIZE" => {
            let size = data.as_u64()?;
            Some(WebCommand::FinetuneStepSize(u32::try_from(size).ok()?))
        }
        "FINETUNE_STEP" => {
            let stick = stick_arg(data)?;
            let target = match data.get("target")?.as_str()?.parse::<Target>() {
                Ok(target) => target,
                Err(e) => {
                    warn!("[WEB] {e}");
                    return None;
                }
            };
            let direction = Direction::from_sign(data.get("direction")?.as_i64()?)?;
            Some(WebCommand::FinetuneStep {
                stick,
                target,
                direction,
            })
        }
        "FINETUNE_SET" => {
            let index = data.get("index")?.as_u64()?;
            let param = ParamId::from_index(usize::try_from(index).ok()?)?;
            let value = data.get("value")?.as_i64()?;
            Some(WebCommand::FinetuneSet { param, value })
        }
        "SLACK_START" => Some(WebCommand::SlackStart(stick_arg(data)?)),
        "SLACK" => {
            let stick = stick_arg(data)?;
            let position = data.get("position")?.as_f64()?;
            Some(WebCommand::Slack { stick, position })
        }
        "SLACK_RELEASE" => Some(WebCommand::SlackRelease(stick_arg(data)?)),
        "SLACK_RESET" => Some(WebCommand::SlackReset(stick_arg(data)?)),
        "FINETUNE_QUICK_CENTER" => Some(WebCommand::FinetuneQuickCenter),
        "FINETUNE_QUICK_RANGE" => Some(WebCommand::FinetuneQuickRange),
        "FINETUNE_SAVE" => Some(WebCommand::FinetuneSave),
        "FINETUNE_CANCEL" => Some(WebCommand::FinetuneCancel),
        "ANALYSIS_START" => Some(WebCommand::AnalysisStart),
        "ANALYSIS_STOP" => Some(WebCommand::AnalysisStop),
        "CLEAR_HISTOGRAMS" => Some(WebCommand::ClearHistograms),
        _ => {
            warn!("[WEB] Unknown command: {cmd}");
            None
        }
    }
}
