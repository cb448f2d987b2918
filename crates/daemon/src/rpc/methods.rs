// RPC method dispatch.
//
// Thin parameter parsing around the core operations. Every handler
// resolves the server timestamp once (`Utc::now()`) and maps the core
// error taxonomy onto JSON-RPC error codes; the duplicate-vote case
// stays a success result (`{ok, already}`), matching the ledger.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use plenum_common::error::PollError;
use plenum_common::protocol::jsonrpc::{
    Request, RequestId, Response, RpcError, CODE_INACTIVE, EXHAUSTED_RETRIES, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, LEASE_CONFLICT, METHOD_NOT_FOUND, MISSING_ROUND, NOT_FOUND,
    NOT_SIGNED_IN, PARSE_ERROR, PERMISSION_DENIED,
};
use plenum_common::protocol::rpc_methods as methods;
use plenum_common::types::{AnswerMode, LiveStatus};

use crate::auth::AuthProvider;
use crate::directory;
use crate::identity::ClientIdentity;
use crate::lease;
use crate::session::{self, StartOptions};
use crate::store::{DocPath, DocStore};
use crate::votes;

/// Shared state behind every RPC connection.
#[derive(Clone)]
pub struct RpcServerState {
    store: Arc<DocStore>,
    auth: Arc<dyn AuthProvider>,
    identity: ClientIdentity,
    shutdown_notifier: Option<broadcast::Sender<()>>,
}

impl RpcServerState {
    pub fn new(
        store: Arc<DocStore>,
        auth: Arc<dyn AuthProvider>,
        identity: ClientIdentity,
    ) -> Self {
        Self { store, auth, identity, shutdown_notifier: None }
    }

    pub fn with_shutdown_notifier(mut self, notifier: broadcast::Sender<()>) -> Self {
        self.shutdown_notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<DocStore> {
        &self.store
    }
}

pub async fn handle_raw_request(raw: &[u8], state: &RpcServerState) -> Response {
    let request = match serde_json::from_slice::<Request>(raw) {
        Ok(request) => request,
        Err(error) => {
            return Response::error(
                RequestId::Null,
                RpcError {
                    code: PARSE_ERROR,
                    message: "Parse error".to_string(),
                    data: Some(json!({ "reason": error.to_string() })),
                },
            );
        }
    };

    if request.jsonrpc != "2.0" {
        return Response::error(
            request.id,
            RpcError { code: INVALID_REQUEST, message: "Invalid Request".to_string(), data: None },
        );
    }

    dispatch_request(request, state).await
}

pub async fn dispatch_request(request: Request, state: &RpcServerState) -> Response {
    match request.method.as_str() {
        methods::RPC_PING => Response::success(request.id, json!({ "ok": true })),
        methods::DAEMON_SHUTDOWN => {
            if let Some(notifier) = &state.shutdown_notifier {
                let _ = notifier.send(());
            }
            Response::success(request.id, json!({ "ok": true }))
        }
        methods::JOIN_RESOLVE => handle_join_resolve(request, state),
        methods::SESSION_START => handle_session_start(request, state),
        methods::SESSION_END => handle_session_end(request, state),
        methods::SESSION_INFO => handle_session_info(request, state),
        methods::LIVE_SET_STATUS => handle_live_set_status(request, state),
        methods::LIVE_SET_QUESTION => handle_live_set_question(request, state),
        methods::LIVE_START_QUESTION => handle_live_start_question(request, state),
        methods::LIVE_RESET_ROUND => handle_live_reset_round(request, state),
        methods::LIVE_READ => handle_live_read(request, state),
        methods::VOTE_SUBMIT => handle_vote_submit(request, state),
        methods::AGG_READ => handle_agg_read(request, state),
        _ => Response::error(
            request.id,
            RpcError {
                code: METHOD_NOT_FOUND,
                message: "Method not found".to_string(),
                data: None,
            },
        ),
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct JoinResolveParams {
    code: String,
}

fn handle_join_resolve(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<JoinResolveParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match directory::resolve_join_code(&state.store, &params.code) {
        Ok(route) => Response::success(id, json!(route)),
        Err(error) => error_response(id, &error),
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SessionStartParams {
    save_results: Option<bool>,
    program_id: Option<String>,
}

fn handle_session_start(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_optional_params::<SessionStartParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    let options = StartOptions {
        save_results: params.save_results.unwrap_or(true),
        program_id: params.program_id,
    };
    let result = session::start_or_replace_session(
        &state.store,
        state.auth.as_ref(),
        &state.identity,
        options,
        &mut rand::thread_rng(),
        Utc::now(),
    );
    match result {
        Ok(info) => Response::success(id, json!(info)),
        Err(error) => error_response(id, &error),
    }
}

#[derive(Deserialize)]
struct SessionEndParams {
    session_id: String,
}

fn handle_session_end(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<SessionEndParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match session::end_session(&state.store, state.auth.as_ref(), &params.session_id, Utc::now()) {
        Ok(()) => Response::success(id, json!({ "ok": true })),
        Err(error) => error_response(id, &error),
    }
}

fn handle_session_info(request: Request, state: &RpcServerState) -> Response {
    let id = request.id;
    let Some(owner_id) = state.auth.current_owner() else {
        return error_response(id, &PollError::NotSignedIn);
    };

    match directory::get_active_session_info(&state.store, &owner_id) {
        Ok(info) => Response::success(id, json!(info)),
        Err(error) => error_response(id, &error),
    }
}

#[derive(Deserialize)]
struct LiveSetStatusParams {
    session_id: String,
    status: String,
}

fn handle_live_set_status(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<LiveSetStatusParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let Some(status) = LiveStatus::parse(&params.status) else {
        return invalid_params_response(
            id,
            format!("invalid status `{}`: expected idle/collect/results/paused", params.status),
        );
    };

    let result = lease::set_status(
        &state.store,
        &params.session_id,
        &state.identity.client_id,
        status,
        Utc::now(),
    );
    match result {
        Ok(status) => Response::success(id, json!({ "status": status })),
        Err(error) => error_response(id, &error),
    }
}

#[derive(Deserialize)]
struct LiveQuestionParams {
    session_id: String,
    mode: String,
    #[serde(default)]
    question: Option<Value>,
}

fn handle_live_set_question(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<LiveQuestionParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let Some(mode) = AnswerMode::parse(&params.mode) else {
        return error_response(id, &PollError::InvalidMode(params.mode));
    };

    let result = lease::set_question(
        &state.store,
        &params.session_id,
        &state.identity.client_id,
        mode,
        params.question.as_ref(),
        Utc::now(),
    );
    match result {
        Ok(mode) => Response::success(id, json!({ "mode": mode })),
        Err(error) => error_response(id, &error),
    }
}

fn handle_live_start_question(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<LiveQuestionParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };
    let Some(mode) = AnswerMode::parse(&params.mode) else {
        return error_response(id, &PollError::InvalidMode(params.mode));
    };

    let result = lease::start_question(
        &state.store,
        &params.session_id,
        &state.identity.client_id,
        mode,
        params.question.as_ref(),
        Utc::now(),
    );
    match result {
        Ok(round_id) => Response::success(id, json!({ "round_id": round_id })),
        Err(error) => error_response(id, &error),
    }
}

#[derive(Deserialize)]
struct LiveSessionParams {
    session_id: String,
}

fn handle_live_reset_round(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<LiveSessionParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    let result = lease::reset_round(
        &state.store,
        &params.session_id,
        &state.identity.client_id,
        Utc::now(),
    );
    match result {
        Ok(round_id) => Response::success(id, json!({ "round_id": round_id })),
        Err(error) => error_response(id, &error),
    }
}

fn handle_live_read(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<LiveSessionParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match state.store.get(&DocPath::live_state(&params.session_id)) {
        Ok(body) => Response::success(id, json!(body)),
        Err(error) => error_response(id, &error),
    }
}

#[derive(Deserialize)]
struct VoteSubmitParams {
    session_id: String,
    #[serde(default)]
    round_id: Option<String>,
    mode: String,
    value: Value,
    client_id: String,
}

fn handle_vote_submit(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<VoteSubmitParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    let result = votes::submit_vote_once(
        &state.store,
        &params.session_id,
        params.round_id.as_deref(),
        &params.mode,
        params.value,
        &params.client_id,
        Utc::now(),
    );
    match result {
        Ok(receipt) => Response::success(id, json!(receipt)),
        Err(error) => error_response(id, &error),
    }
}

#[derive(Deserialize)]
struct AggReadParams {
    session_id: String,
    round_id: String,
}

fn handle_agg_read(request: Request, state: &RpcServerState) -> Response {
    let (id, params) = match parse_params::<AggReadParams>(request) {
        Ok(parsed) => parsed,
        Err(response) => return response,
    };

    match state.store.get(&DocPath::aggregate(&params.session_id, &params.round_id)) {
        Ok(body) => Response::success(id, json!(body)),
        Err(error) => error_response(id, &error),
    }
}

// ── Plumbing ─────────────────────────────────────────────────────────

fn parse_params<T: DeserializeOwned>(request: Request) -> Result<(RequestId, T), Response> {
    let Request { id, method, params, .. } = request;
    let Some(params) = params else {
        return Err(invalid_params_response(id, format!("{method} requires params")));
    };
    match serde_json::from_value::<T>(params) {
        Ok(parsed) => Ok((id, parsed)),
        Err(error) => Err(invalid_params_response(
            id,
            format!("failed to decode {method} params: {error}"),
        )),
    }
}

fn parse_optional_params<T: DeserializeOwned + Default>(
    request: Request,
) -> Result<(RequestId, T), Response> {
    let Request { id, method, params, .. } = request;
    match params {
        None => Ok((id, T::default())),
        Some(Value::Null) => Ok((id, T::default())),
        Some(params) => match serde_json::from_value::<T>(params) {
            Ok(parsed) => Ok((id, parsed)),
            Err(error) => Err(invalid_params_response(
                id,
                format!("failed to decode {method} params: {error}"),
            )),
        },
    }
}

fn invalid_params_response(id: RequestId, message: String) -> Response {
    Response::error(id, RpcError { code: INVALID_PARAMS, message, data: None })
}

fn error_response(id: RequestId, error: &PollError) -> Response {
    let code = match error {
        PollError::InvalidInput(_) | PollError::Malformed(_) | PollError::InvalidMode(_) => {
            INVALID_PARAMS
        }
        PollError::NotFound(_) => NOT_FOUND,
        PollError::Inactive => CODE_INACTIVE,
        PollError::LeaseConflict { .. } => LEASE_CONFLICT,
        PollError::MissingRound => MISSING_ROUND,
        PollError::ExhaustedRetries(_) => EXHAUSTED_RETRIES,
        PollError::NotSignedIn => NOT_SIGNED_IN,
        PollError::PermissionDenied(_) => PERMISSION_DENIED,
        PollError::Store(_) => INTERNAL_ERROR,
    };
    Response::error(id, RpcError { code, message: error.to_string(), data: None })
}
