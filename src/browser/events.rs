//! Debugger event collection.
//!
//! One reader task per event stream buffers everything the browser emits
//! while a page loads; the buffers are drained once at the end of the fetch.
//! Loading-finished events immediately fetch the response body over the
//! debugger so the bytes exist before the tab closes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, Headers, Response,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, StackTrace,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::Page as Tab;
use futures::StreamExt;
use log::debug;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{
    CallFrame, ConsoleMessage, ResponseBody, SecurityDetails, WireRequest, WireResponse,
};

/// A request-will-be-sent event reduced to what correlation needs.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request_id: String,
    pub loader_id: String,
    /// Wall-clock seconds since epoch at request start.
    pub wall_time: f64,
    pub request: WireRequest,
    pub initiator_kind: String,
    pub initiator_stack: Option<CallFrame>,
    /// Present when this event reports a redirect hop; belongs to the
    /// action identified by `loader_id`.
    pub redirect_response: Option<WireResponse>,
}

#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub request_id: String,
    pub response: WireResponse,
}

#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub request_id: String,
    pub error_text: String,
}

#[derive(Debug, Clone)]
pub struct BodyEvent {
    pub request_id: String,
    pub body: ResponseBody,
}

/// Everything collected from the four network streams during one fetch.
#[derive(Debug, Default)]
pub struct BrowserEvents {
    pub requests: Vec<RequestEvent>,
    pub responses: Vec<ResponseEvent>,
    pub failures: Vec<FailureEvent>,
    pub bodies: Vec<BodyEvent>,
}

fn headers_to_map(headers: &Headers) -> BTreeMap<String, String> {
    let Ok(value) = serde_json::to_value(headers) else {
        return BTreeMap::new();
    };
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn convert_response(response: &Response) -> WireResponse {
    WireResponse {
        status: response.status,
        protocol: response.protocol.clone(),
        mime_type: response.mime_type.clone(),
        headers: headers_to_map(&response.headers),
        security_details: response.security_details.as_ref().map(|d| SecurityDetails {
            protocol: d.protocol.clone(),
            key_exchange: d.key_exchange.clone(),
            cipher: d.cipher.clone(),
            issuer: d.issuer.clone(),
            subject_name: d.subject_name.clone(),
            san_list: d.san_list.clone(),
            valid_from: *d.valid_from.inner() as i64,
            valid_to: *d.valid_to.inner() as i64,
        }),
    }
}

fn top_frame(stack: &StackTrace) -> Option<CallFrame> {
    stack.call_frames.first().map(|frame| CallFrame {
        function: (!frame.function_name.is_empty()).then(|| frame.function_name.clone()),
        url: frame.url.clone(),
        line: frame.line_number,
        column: frame.column_number,
    })
}

fn convert_request(event: &EventRequestWillBeSent) -> RequestEvent {
    use chromiumoxide::cdp::browser_protocol::network::InitiatorType;

    let initiator_kind = match event.initiator.r#type {
        InitiatorType::Parser => "parser",
        InitiatorType::Script => "script",
        InitiatorType::Preload => "preload",
        _ => "other",
    };

    RequestEvent {
        request_id: event.request_id.inner().to_string(),
        loader_id: event.loader_id.inner().to_string(),
        wall_time: *event.wall_time.inner(),
        request: WireRequest {
            url: event.request.url.clone(),
            method: event.request.method.clone(),
            headers: headers_to_map(&event.request.headers),
            post_data: event.request.post_data.clone(),
        },
        initiator_kind: initiator_kind.to_string(),
        initiator_stack: event.initiator.stack.as_ref().and_then(top_frame),
        redirect_response: event.redirect_response.as_ref().map(convert_response),
    }
}

fn convert_console(event: &EventConsoleApiCalled) -> ConsoleMessage {
    let msg = event
        .args
        .iter()
        .map(|arg| match &arg.value {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => arg
                .description
                .clone()
                .unwrap_or_else(|| "undefined".to_string()),
        })
        .collect::<Vec<_>>()
        .join(" ");

    ConsoleMessage {
        msg,
        frame: event.stack_trace.as_ref().and_then(top_frame),
    }
}

/// Reader tasks attached to one tab's event streams.
pub(crate) struct EventCollector {
    events: Arc<Mutex<BrowserEvents>>,
    console: Arc<Mutex<Vec<ConsoleMessage>>>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl EventCollector {
    /// Subscribes to the request, response, failure, body, and console
    /// streams. Must run before the domains are enabled so no event is lost.
    pub(crate) async fn attach(tab: &Tab) -> Result<Self, CdpError> {
        let events = Arc::new(Mutex::new(BrowserEvents::default()));
        let console = Arc::new(Mutex::new(Vec::new()));
        let token = CancellationToken::new();
        let mut tasks = Vec::new();

        let mut requests = tab.event_listener::<EventRequestWillBeSent>().await?;
        {
            let events = Arc::clone(&events);
            let token = token.child_token();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = requests.next() => {
                            let Some(event) = event else { break };
                            let converted = convert_request(&event);
                            events.lock().expect("event buffer poisoned").requests.push(converted);
                        }
                    }
                }
            }));
        }

        let mut responses = tab.event_listener::<EventResponseReceived>().await?;
        {
            let events = Arc::clone(&events);
            let token = token.child_token();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = responses.next() => {
                            let Some(event) = event else { break };
                            let converted = ResponseEvent {
                                request_id: event.request_id.inner().to_string(),
                                response: convert_response(&event.response),
                            };
                            events.lock().expect("event buffer poisoned").responses.push(converted);
                        }
                    }
                }
            }));
        }

        let mut failures = tab.event_listener::<EventLoadingFailed>().await?;
        {
            let events = Arc::clone(&events);
            let token = token.child_token();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = failures.next() => {
                            let Some(event) = event else { break };
                            let converted = FailureEvent {
                                request_id: event.request_id.inner().to_string(),
                                error_text: event.error_text.clone(),
                            };
                            events.lock().expect("event buffer poisoned").failures.push(converted);
                        }
                    }
                }
            }));
        }

        let mut finished = tab.event_listener::<EventLoadingFinished>().await?;
        {
            let events = Arc::clone(&events);
            let token = token.child_token();
            let tab = tab.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = finished.next() => {
                            let Some(event) = event else { break };
                            let request_id = event.request_id.clone();
                            let reply = match tab
                                .execute(GetResponseBodyParams {
                                    request_id: request_id.clone(),
                                })
                                .await
                            {
                                Ok(reply) => reply,
                                Err(e) => {
                                    debug!("no body for request {}: {e}", request_id.inner());
                                    continue;
                                }
                            };

                            let bytes = if reply.result.base64_encoded {
                                BASE64
                                    .decode(reply.result.body.as_bytes())
                                    .unwrap_or_else(|_| reply.result.body.clone().into_bytes())
                            } else {
                                reply.result.body.clone().into_bytes()
                            };

                            let converted = BodyEvent {
                                request_id: request_id.inner().to_string(),
                                body: ResponseBody {
                                    sha256: format!("{:x}", Sha256::digest(&bytes)),
                                    bytes,
                                },
                            };
                            events.lock().expect("event buffer poisoned").bodies.push(converted);
                        }
                    }
                }
            }));
        }

        let mut console_events = tab.event_listener::<EventConsoleApiCalled>().await?;
        {
            let console = Arc::clone(&console);
            let token = token.child_token();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = console_events.next() => {
                            let Some(event) = event else { break };
                            if event.r#type != ConsoleApiCalledType::Log {
                                continue;
                            }
                            let converted = convert_console(&event);
                            console.lock().expect("console buffer poisoned").push(converted);
                        }
                    }
                }
            }));
        }

        Ok(Self {
            events,
            console,
            token,
            tasks,
        })
    }

    /// Stops the readers and hands back everything collected so far.
    pub(crate) async fn finish(self) -> (BrowserEvents, Vec<ConsoleMessage>) {
        self.token.cancel();
        for task in self.tasks {
            let _ = task.await;
        }

        let events = std::mem::take(&mut *self.events.lock().expect("event buffer poisoned"));
        let console = std::mem::take(&mut *self.console.lock().expect("console buffer poisoned"));
        (events, console)
    }
}
