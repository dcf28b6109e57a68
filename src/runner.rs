use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::checker::{CheckRequest, Checker, MultiTurnChecker};
use crate::engine::{BackendEngine, ExecutionBatch, ExecutionEngine};
use crate::protocol::{parse_line, ExecuteRequest, Request, ResetRequest, Response, ResponseBody};
use crate::registry::Registry;
use crate::session::SessionStore;
use crate::RunnerError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub requests: u64,
    pub errors: u64,
    pub sessions_created: u64,
    pub sessions_reset: u64,
}

/// Line-oriented request loop. Owns the session cache; requests are handled
/// strictly one at a time in arrival order.
pub struct SessionRunner {
    engine: Arc<dyn ExecutionEngine>,
    checker: Arc<dyn Checker>,
    sessions: SessionStore,
    stats: RunnerStats,
}

impl SessionRunner {
    pub fn new(engine: Arc<dyn ExecutionEngine>, checker: Arc<dyn Checker>) -> Self {
        Self {
            engine,
            checker,
            sessions: SessionStore::new(),
            stats: RunnerStats::default(),
        }
    }

    /// Runner over the bundled backends, checking with [`MultiTurnChecker`].
    pub fn with_builtin_backends(registry: Arc<Registry>) -> Self {
        let engine: Arc<dyn ExecutionEngine> = Arc::new(BackendEngine::with_builtin_backends(registry));
        let checker = Arc::new(MultiTurnChecker::new(Arc::clone(&engine)));
        Self::new(engine, checker)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats
    }

    /// Handles one input line. Blank lines produce no response.
    pub async fn handle_line(&mut self, line: &str) -> Option<Response> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let started = Instant::now();
        let (id, request) = parse_line(line);
        let action = request.as_ref().ok().map(Request::action);
        let outcome = match request {
            Ok(request) => self.dispatch(request).await,
            Err(error) => Err(error),
        };

        self.stats.requests += 1;
        let response = match outcome {
            Ok(body) => {
                tracing::debug!(
                    id = %id,
                    action = ?action,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "request handled"
                );
                Response::new(id, body)
            }
            Err(error) => {
                self.stats.errors += 1;
                tracing::warn!(
                    id = %id,
                    action = ?action,
                    kind = ?error.kind(),
                    %error,
                    "request failed"
                );
                Response::error(id, &error)
            }
        };
        Some(response)
    }

    pub async fn dispatch(&mut self, request: Request) -> Result<ResponseBody, RunnerError> {
        match request {
            Request::Execute(execute) => self.execute(execute).await,
            Request::Check(check) => self.check(check).await,
            Request::Reset(reset) => Ok(self.reset(reset)),
        }
    }

    async fn execute(&mut self, request: ExecuteRequest) -> Result<ResponseBody, RunnerError> {
        let key = request.session_key();
        let phase = request.phase();
        let (session, created) = self.sessions.get_or_create(&key);

        let batch = ExecutionBatch {
            calls: &request.func_call_list,
            initial_config: &request.initial_config,
            involved_classes: &request.involved_classes,
            session: &key,
            phase,
            long_context: request.long_context,
        };
        let outcome = self.engine.execute(batch, session.phase_mut(phase)).await;
        let empty = session.is_empty();

        if created {
            if empty {
                self.sessions.remove(&key);
            } else {
                self.stats.sessions_created += 1;
                tracing::debug!(
                    session = %key,
                    %phase,
                    cached_sessions = self.sessions.len(),
                    "session created"
                );
            }
        }

        let results = outcome?;
        Ok(ResponseBody::Executed { results })
    }

    async fn check(&self, request: CheckRequest) -> Result<ResponseBody, RunnerError> {
        let verdict = self.checker.check(&request).await?;
        tracing::debug!(
            test_entry = %request.test_entry.id,
            valid = verdict.valid,
            error_type = verdict.error_type.as_deref().unwrap_or(""),
            "check finished"
        );
        Ok(ResponseBody::Checked { result: verdict })
    }

    fn reset(&mut self, request: ResetRequest) -> ResponseBody {
        if let Some(key) = request.session_key() {
            if let Some(session) = self.sessions.remove(&key) {
                self.stats.sessions_reset += 1;
                tracing::debug!(
                    session = %key,
                    created_at = %session.created_at,
                    last_used = %session.last_used,
                    "session reset"
                );
            }
        }
        ResponseBody::Reset { reset: true }
    }

    /// Serves requests until `reader` reaches end of input. Only I/O errors
    /// end the loop early.
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> Result<RunnerStats, RunnerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer).await? == 0 {
                break;
            }

            let response = match std::str::from_utf8(&buffer) {
                Ok(line) => self.handle_line(line).await,
                Err(e) => {
                    let error = RunnerError::Parse(format!("request is not valid UTF-8: {e}"));
                    self.stats.requests += 1;
                    self.stats.errors += 1;
                    tracing::warn!(%error, "request failed");
                    Some(Response::error(Value::Null, &error))
                }
            };

            if let Some(response) = response {
                writer.write_all(response.to_line()?.as_bytes()).await?;
                writer.flush().await?;
            }
        }

        tracing::info!(
            requests = self.stats.requests,
            errors = self.stats.errors,
            sessions_created = self.stats.sessions_created,
            sessions_reset = self.stats.sessions_reset,
            cached_sessions = self.sessions.len(),
            "input closed"
        );
        Ok(self.stats)
    }
}
