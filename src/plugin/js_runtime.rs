//! JavaScript Runtime Instance
//!
//! One V8 isolate per plugin, owned by a dedicated worker thread because
//! `JsRuntime` is `!Send`. The [`NovelJsRuntime`] handle is `Send + Sync` and
//! forwards evaluations to the worker over a channel.
//!
//! Construction evaluates, in order: the runtime config prelude, the bootstrap
//! (job queue, Promise, module system, web globals), the result normalizer and
//! every guest module definition.
//!
//! The worker never runs inside an async executor: bridge ops block on I/O.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use deno_core::{v8, JsRuntime, RuntimeOptions};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::bridge::{bridge_extension, BridgeState, NativeApi, NETWORK_FAILURE};
use super::dom::DomStore;
use super::modules::ModuleRegistry;
use crate::core::config::RuntimeConfig;
use crate::core::error::{NovelError, Result};

const BOOTSTRAP_JS: &str = include_str!("js/bootstrap.js");
const NORMALIZER_JS: &str = include_str!("js/normalizer.js");

const UNSETTLED_MARKERS: [&str; 2] = ["UnsettledAsyncError", "Async result not supported"];
const MODULE_NOT_FOUND: &str = "Module not found: ";

/// Completion value of one evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Any other value, in its `toString()` form
    Other(String),
}

impl JsValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JsValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, JsValue::Undefined | JsValue::Null)
    }
}

/// Lifecycle of a runtime instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RuntimeState {
    Uninitialized = 0,
    Bootstrapped = 1,
    Evaluating = 2,
    /// Terminal
    Closed = 3,
}

impl RuntimeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RuntimeState::Uninitialized,
            1 => RuntimeState::Bootstrapped,
            2 => RuntimeState::Evaluating,
            _ => RuntimeState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(RuntimeState::Uninitialized as u8)))
    }

    fn get(&self) -> RuntimeState {
        RuntimeState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: RuntimeState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: RuntimeState, to: RuntimeState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

enum Outcome {
    Value(JsValue),
    Failed(anyhow::Error),
    Closed,
}

enum Command {
    Evaluate {
        script: String,
        label: &'static str,
        resp: oneshot::Sender<Outcome>,
    },
    Close {
        resp: Option<oneshot::Sender<()>>,
    },
}

/// Handle to one plugin's engine instance
pub struct NovelJsRuntime {
    plugin_id: String,
    tx: mpsc::UnboundedSender<Command>,
    state: SharedState,
}

impl NovelJsRuntime {
    /// Spawn the worker thread and wait until the bootstrap has run
    pub async fn start(plugin_id: &str, api: Arc<dyn NativeApi>, config: &RuntimeConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<Command>();
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();
        let state = SharedState::new();

        let prelude = format!(
            "globalThis.__runtimeConfig = {{ resolveBudget: {}, drainBatch: {} }};",
            config.resolve_budget, config.drain_batch
        );

        let worker = Worker {
            plugin_id: plugin_id.to_string(),
            api,
            prelude,
            state: state.clone(),
        };

        thread::Builder::new()
            .name(format!("novel-js-{}", plugin_id))
            .spawn(move || worker.run(rx, ready_tx))
            .map_err(|e| NovelError::Bootstrap {
                plugin_id: plugin_id.to_string(),
                message: format!("Failed to spawn worker thread: {}", e),
                source: Some(e.into()),
            })?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                plugin_id: plugin_id.to_string(),
                tx,
                state,
            }),
            Ok(Err(e)) => Err(NovelError::Bootstrap {
                plugin_id: plugin_id.to_string(),
                message: e.to_string(),
                source: Some(e.into()),
            }),
            Err(_) => Err(NovelError::Bootstrap {
                plugin_id: plugin_id.to_string(),
                message: "Worker thread exited during startup".to_string(),
                source: None,
            }),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn state(&self) -> RuntimeState {
        self.state.get()
    }

    /// Run `script` and return its completion value
    ///
    /// `label` names the script in stack traces and in the returned error.
    pub async fn evaluate(&self, script: String, label: &'static str) -> Result<JsValue> {
        if self.state.get() == RuntimeState::Closed {
            return Err(NovelError::RuntimeClosed(self.plugin_id.clone()));
        }

        let (resp, rx) = oneshot::channel();
        self.tx
            .send(Command::Evaluate { script, label, resp })
            .map_err(|_| NovelError::RuntimeClosed(self.plugin_id.clone()))?;

        match rx.await {
            Ok(Outcome::Value(value)) => Ok(value),
            Ok(Outcome::Failed(err)) => Err(classify_error(&self.plugin_id, label, err)),
            Ok(Outcome::Closed) | Err(_) => Err(NovelError::RuntimeClosed(self.plugin_id.clone())),
        }
    }

    /// Release the engine. Safe to call more than once.
    pub async fn close(&self) {
        if self.state.get() == RuntimeState::Closed {
            return;
        }
        self.state.set(RuntimeState::Closed);

        let (resp, rx) = oneshot::channel();
        if self.tx.send(Command::Close { resp: Some(resp) }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl Drop for NovelJsRuntime {
    fn drop(&mut self) {
        self.state.set(RuntimeState::Closed);
        let _ = self.tx.send(Command::Close { resp: None });
    }
}

/// Map an evaluation failure onto the error taxonomy
pub(crate) fn classify_error(plugin_id: &str, function: &str, err: anyhow::Error) -> NovelError {
    let message = format!("{:#}", err);

    if UNSETTLED_MARKERS.iter().any(|marker| message.contains(marker)) {
        return NovelError::UnsettledAsync {
            plugin_id: plugin_id.to_string(),
            function: function.to_string(),
        };
    }

    if let Some(start) = message.find(MODULE_NOT_FOUND) {
        let name = message[start + MODULE_NOT_FOUND.len()..]
            .split_whitespace()
            .next()
            .unwrap_or_default();
        return NovelError::ModuleNotFound(name.to_string());
    }

    if let Some(start) = message.find(NETWORK_FAILURE) {
        let detail = message[start + NETWORK_FAILURE.len()..].lines().next().unwrap_or_default();
        return NovelError::NetworkError(format!("{function} on {plugin_id}: {}", detail.trim()));
    }

    NovelError::Call {
        plugin_id: plugin_id.to_string(),
        function: function.to_string(),
        message,
        source: Some(err.into()),
    }
}

struct Worker {
    plugin_id: String,
    api: Arc<dyn NativeApi>,
    prelude: String,
    state: SharedState,
}

impl Worker {
    fn run(self, mut rx: mpsc::UnboundedReceiver<Command>, ready: oneshot::Sender<anyhow::Result<()>>) {
        let mut runtime = match self.bootstrap() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(plugin = %self.plugin_id, error = %format!("{:#}", e), "Runtime bootstrap failed");
                self.state.set(RuntimeState::Closed);
                let _ = ready.send(Err(e));
                return;
            }
        };

        self.state.transition(RuntimeState::Uninitialized, RuntimeState::Bootstrapped);
        if ready.send(Ok(())).is_err() {
            self.state.set(RuntimeState::Closed);
            return;
        }

        info!(plugin = %self.plugin_id, "JS runtime ready");

        let mut close_ack = None;
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                Command::Evaluate { script, label, resp } => {
                    if !self.state.transition(RuntimeState::Bootstrapped, RuntimeState::Evaluating) {
                        let _ = resp.send(Outcome::Closed);
                        continue;
                    }

                    debug!(plugin = %self.plugin_id, label, "Evaluating script");
                    let outcome = match evaluate(&mut runtime, label, script) {
                        Ok(value) => Outcome::Value(value),
                        Err(e) => Outcome::Failed(e),
                    };

                    release_documents(&mut runtime);
                    self.state.transition(RuntimeState::Evaluating, RuntimeState::Bootstrapped);
                    let _ = resp.send(outcome);
                }
                Command::Close { resp } => {
                    close_ack = resp;
                    break;
                }
            }
        }

        self.state.set(RuntimeState::Closed);
        drop(runtime);
        info!(plugin = %self.plugin_id, "JS runtime closed");

        if let Some(ack) = close_ack {
            let _ = ack.send(());
        }
    }

    fn bootstrap(&self) -> anyhow::Result<JsRuntime> {
        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![bridge_extension()],
            ..Default::default()
        });

        {
            let op_state = runtime.op_state();
            let mut op_state = op_state.borrow_mut();
            op_state.put(BridgeState {
                plugin_id: self.plugin_id.clone(),
                api: self.api.clone(),
            });
            op_state.put(DomStore::new());
        }

        runtime
            .execute_script("novel:prelude", self.prelude.clone().into())
            .context("Failed to install runtime config")?;
        runtime
            .execute_script("novel:bootstrap.js", deno_core::FastString::from_static(BOOTSTRAP_JS))
            .context("Failed to evaluate bootstrap")?;
        runtime
            .execute_script("novel:normalizer.js", deno_core::FastString::from_static(NORMALIZER_JS))
            .context("Failed to evaluate result normalizer")?;
        ModuleRegistry::builtin().register(&mut runtime)?;

        Ok(runtime)
    }
}

// Parsed documents only live for one host call.
fn release_documents(runtime: &mut JsRuntime) {
    let op_state = runtime.op_state();
    let mut op_state = op_state.borrow_mut();
    if let Some(store) = op_state.try_borrow_mut::<DomStore>() {
        store.release_all();
    }
}

fn evaluate(runtime: &mut JsRuntime, label: &'static str, script: String) -> anyhow::Result<JsValue> {
    let global = runtime.execute_script(label, script.into())?;

    let scope = &mut runtime.handle_scope();
    let value = v8::Local::new(scope, global);

    Ok(if value.is_undefined() {
        JsValue::Undefined
    } else if value.is_null() {
        JsValue::Null
    } else if value.is_boolean() {
        JsValue::Bool(value.is_true())
    } else if value.is_number() {
        JsValue::Number(value.number_value(scope).unwrap_or(f64::NAN))
    } else {
        let text = value
            .to_string(scope)
            .map(|s| s.to_rust_string_lossy(scope))
            .unwrap_or_default();
        if value.is_string() {
            JsValue::String(text)
        } else {
            JsValue::Other(text)
        }
    })
}
