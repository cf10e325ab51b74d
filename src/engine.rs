//! Transformation engine.
//!
//! Executes one versioned script against one message payload under a hard wall-clock
//! budget. Scripts run on a fresh sandboxed [`rhai::Engine`] per execution, on a blocking
//! task so evaluation never stalls the async runtime. A progress watchdog force-terminates
//! the evaluation once the deadline passes; any script-level fault is converted into a
//! typed error rather than propagated as a host fault.

use std::str::FromStr;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Scope};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Extra wall-clock grace granted to the outer watchdog beyond the script budget, to
/// give the in-engine interrupt a chance to fire first.
const EXECUTION_GRACE: Duration = Duration::from_millis(250);

/// The shape in which a script receives its input payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Raw,
    Csv,
    Json,
}

impl FromStr for InputType {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "raw" => Ok(Self::Raw),
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(AppError::config(format!("script input type : {} not supported", other))),
        }
    }
}

/// The scripting runtime a profile targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptRuntime {
    #[default]
    Rhai,
}

impl FromStr for ScriptRuntime {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "rhai" => Ok(Self::Rhai),
            other => Err(AppError::config(format!("script runtime : {} not supported", other))),
        }
    }
}

/// A versioned transformation script.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// The name of the entry function to invoke.
    pub main: String,
    #[serde(default)]
    pub runtime: ScriptRuntime,
    pub input: InputType,
    pub contents: String,
}

/// Errors produced by script execution. Never retried by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The script did not complete within the configured wall-clock budget.
    #[error("script timed out")]
    TimedOut,
    /// The script (or its input preparation) faulted.
    #[error("script execution failed: {0}")]
    Execution(String),
}

/// The transformation engine. One instance per processing loop.
pub struct Engine {
    timeout: Duration,
}

impl Engine {
    /// Create a new engine with the given per-execution wall-clock budget.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Execute the given script against one raw payload.
    ///
    /// On success the script's return value is converted into an engine-agnostic
    /// structured value for the caller to merge into a message.
    pub async fn execute(&self, script: &Script, payload: &[u8]) -> Result<serde_json::Value, EngineError> {
        let args = prepare_input(script.input, payload)?;
        let (contents, main, timeout) = (script.contents.clone(), script.main.clone(), self.timeout);
        let handle = tokio::task::spawn_blocking(move || run_script(&contents, &main, args, timeout));
        match tokio::time::timeout(timeout + EXECUTION_GRACE, handle).await {
            // The in-engine interrupt failed to land in time; the evaluation is abandoned.
            Err(_elapsed) => Err(EngineError::TimedOut),
            // A panic on the blocking task is contained here, never propagated to the host.
            Ok(Err(join_err)) => Err(EngineError::Execution(format!("script host task failed: {}", join_err))),
            Ok(Ok(result)) => result,
        }
    }
}

/// Build the argument list handed to the script's entry function for the given input mode.
fn prepare_input(input: InputType, payload: &[u8]) -> Result<Vec<Dynamic>, EngineError> {
    match input {
        InputType::Raw => Ok(vec![Dynamic::from_blob(payload.to_vec())]),
        InputType::Json => {
            let value: serde_json::Value =
                serde_json::from_slice(payload).map_err(|err| EngineError::Execution(format!("invalid json payload: {}", err)))?;
            let dynamic = rhai::serde::to_dynamic(value).map_err(|err| EngineError::Execution(err.to_string()))?;
            Ok(vec![dynamic])
        }
        InputType::Csv => prepare_csv(payload),
    }
}

/// Parse a csv payload into a header row and the remaining rows, passed to the script
/// as two separate arguments. Malformed csv fails before script execution.
fn prepare_csv(payload: &[u8]) -> Result<Vec<Dynamic>, EngineError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(payload);
    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| EngineError::Execution(format!("invalid csv payload: {}", err)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    if rows.is_empty() {
        return Err(EngineError::Execution("invalid csv payload: no header row".to_string()));
    }
    let header = rows.remove(0);
    let header = rhai::serde::to_dynamic(header).map_err(|err| EngineError::Execution(err.to_string()))?;
    let lines = rhai::serde::to_dynamic(rows).map_err(|err| EngineError::Execution(err.to_string()))?;
    Ok(vec![header, lines])
}

/// Evaluate the script on the current (blocking) thread with a progress watchdog armed.
fn run_script(contents: &str, main: &str, args: Vec<Dynamic>, timeout: Duration) -> Result<serde_json::Value, EngineError> {
    let mut engine = rhai::Engine::new();
    // Sandbox ceilings; a runaway script fails inside the engine instead of the host.
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(64);
    engine.set_max_string_size(1_000_000);
    engine.set_max_array_size(100_000);
    engine.set_max_map_size(100_000);

    let started = Instant::now();
    engine.on_progress(move |_ops| {
        if started.elapsed() > timeout {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    let ast = engine.compile(contents).map_err(|err| EngineError::Execution(err.to_string()))?;
    let mut scope = Scope::new();
    let value = match engine.call_fn::<Dynamic>(&mut scope, &ast, main, args) {
        Ok(value) => value,
        Err(err) => {
            return Err(match *err {
                rhai::EvalAltResult::ErrorTerminated(..) => EngineError::TimedOut,
                other => EngineError::Execution(other.to_string()),
            })
        }
    };
    rhai::serde::from_dynamic::<serde_json::Value>(&value).map_err(|err| EngineError::Execution(err.to_string()))
}
