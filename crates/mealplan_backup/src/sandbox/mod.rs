//! Administrative script sandbox.
//!
//! Scripts are written in a JavaScript dialect close to what database shells
//! accept and run on an embedded tree-walking interpreter. The global scope
//! contains only the `db` proxy and the shell helpers (`print`, `printjson`,
//! `console`, `ObjectId`, `ISODate`, `NumberInt`, `NumberLong`, `show`, ...);
//! there is no path to the filesystem, network or host process.
//!
//! ## Execution
//!
//! Every run starts by recording an initiation marker, so the captured
//! output is never empty. The script is then parsed (a failure is reported
//! as [`ErrorKind::SyntaxError`]) and evaluated to completion. An uncaught
//! error ends the run with [`ErrorKind::RuntimeError`] and keeps the output
//! captured so far.
//!
//! Store calls made through `db` complete synchronously, so `await` simply
//! yields the value and the result is final once [`ScriptSandbox::execute`]
//! returns.
//!
//! ## Resource guards
//!
//! - A call-depth limit raises a catchable `RangeError`.
//! - An optional step budget aborts the run; it cannot be caught by the script.
//! - Array lengths above 2^24 and strings above 2^27 bytes throw a
//!   `RangeError` instead of allocating.
//!
//! ## Unsupported syntax
//!
//! Labelled statements (`outer: for (...)`, `break outer`) are rejected as
//! syntax errors. Classes, generators, getters/setters and regular
//! expression literals are not part of the dialect either.

mod ast;
mod builtins;
mod db;
mod interp;
mod lexer;
mod methods;
mod parser;
mod value;

use crate::error::{BackupError, BackupResult};
use chrono::{SecondsFormat, Utc};
use interp::Interp;
use mealplan_store::DocumentStore;
use serde::Serialize;
use serde_json::Value as Json;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Default maximum nesting of script function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Stack reserved for the evaluation thread.
const STACK_SIZE: usize = 256 * 1024 * 1024;

/// Why an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The script could not be parsed.
    SyntaxError,
    /// The script raised an uncaught error while running.
    RuntimeError,
}

/// Outcome of one script execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptExecutionResult {
    /// Whether the script ran to completion.
    pub success: bool,
    /// Captured output lines, initiation marker first.
    pub output: Vec<String>,
    /// Message of the error that ended the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ScriptExecutionResult {
    fn succeeded(output: Vec<String>) -> Self {
        Self {
            success: true,
            output,
            error: None,
            error_kind: None,
        }
    }

    fn failed(kind: ErrorKind, error: String, output: Vec<String>) -> Self {
        Self {
            success: false,
            output,
            error: Some(error),
            error_kind: Some(kind),
        }
    }
}

/// Resource guards applied to each execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Maximum nesting of function calls.
    pub max_call_depth: usize,
    /// Maximum number of evaluation steps; `None` for no limit.
    pub step_limit: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            step_limit: None,
        }
    }
}

impl SandboxConfig {
    /// Sets the maximum call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Sets the evaluation step budget.
    #[must_use]
    pub fn with_step_limit(mut self, limit: Option<u64>) -> Self {
        self.step_limit = limit;
        self
    }
}

/// Runs administrator scripts against a document store.
pub struct ScriptSandbox {
    store: Arc<dyn DocumentStore>,
    config: SandboxConfig,
}

impl ScriptSandbox {
    /// Creates a sandbox over `store` with default guards.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            config: SandboxConfig::default(),
        }
    }

    /// Replaces the resource guards.
    #[must_use]
    pub fn with_config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the resource guards.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Executes a script taken from a request body.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::InvalidScript`] when `script` is not a JSON
    /// string; nothing is executed in that case.
    pub fn execute_json(&self, script: &Json) -> BackupResult<ScriptExecutionResult> {
        match script {
            Json::String(source) => Ok(self.execute(source)),
            _ => Err(BackupError::InvalidScript),
        }
    }

    /// Executes a script to completion.
    pub fn execute(&self, script: &str) -> ScriptExecutionResult {
        let store = self.store.as_ref();
        let config = self.config;
        let joined = thread::scope(|scope| {
            thread::Builder::new()
                .name("script-sandbox".into())
                .stack_size(STACK_SIZE)
                .spawn_scoped(scope, || run(store, config, script))
                .map(|handle| handle.join())
        });
        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                warn!("script evaluation thread panicked");
                ScriptExecutionResult::failed(
                    ErrorKind::RuntimeError,
                    "Script evaluation aborted".to_string(),
                    vec![initiation_marker()],
                )
            }
            Err(e) => {
                warn!(error = %e, "cannot spawn evaluation thread, running inline");
                run(store, config, script)
            }
        }
    }
}

fn initiation_marker() -> String {
    format!(
        "Script execution initiated at {}",
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

fn run(store: &dyn DocumentStore, config: SandboxConfig, script: &str) -> ScriptExecutionResult {
    let marker = vec![initiation_marker()];
    let program = match parser::parse_program(script) {
        Ok(program) => program,
        Err(e) => {
            debug!(error = %e, "script rejected by parser");
            return ScriptExecutionResult::failed(ErrorKind::SyntaxError, e.to_string(), marker);
        }
    };

    let mut interp = Interp::new(store, &config, marker);
    let outcome = interp.run(&program);
    let output = interp.take_output();
    drop(interp);

    debug!(lines = output.len(), ok = outcome.is_ok(), "script finished");
    match outcome {
        Ok(()) => ScriptExecutionResult::succeeded(output),
        Err(message) => ScriptExecutionResult::failed(ErrorKind::RuntimeError, message, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mealplan_store::{Filter, MemoryStore};
    use mealplan_testkit::fixtures::seeded_store;
    use serde_json::json;

    fn sandbox() -> ScriptSandbox {
        ScriptSandbox::new(Arc::new(MemoryStore::new()))
    }

    /// Output without the initiation marker.
    fn lines(result: &ScriptExecutionResult) -> Vec<&str> {
        result.output.iter().skip(1).map(String::as_str).collect()
    }

    #[test]
    fn console_lines_in_order() {
        let result = sandbox().execute("console.log('x'); console.log('y')");
        assert!(result.success);
        assert!(result.output.len() >= 3);
        assert!(result.output[0].starts_with("Script execution initiated"));
        assert_eq!(lines(&result), ["x", "y"]);
        assert_eq!(result.error, None);
    }

    #[test]
    fn print_formats_numbers() {
        let result = sandbox().execute(
            "print(NaN); print(Infinity); print(2**53); print(1e21);\n\
             print(12345678901234567890); print(Math.max()); print([NaN, 2**60, 0.5]);\n\
             console.log({total: 2**53, ratio: -Infinity});",
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            lines(&result),
            [
                "NaN",
                "Infinity",
                "9007199254740992",
                "1e+21",
                "12345678901234567000",
                "-Infinity",
                "[NaN, 1152921504606847000, 0.5]",
                r#"{"total": 9007199254740992, "ratio": -Infinity}"#,
            ]
        );
    }

    #[test]
    fn syntax_error() {
        let result = sandbox().execute("not valid syntax !!!");
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SyntaxError));
        assert!(!result.error.unwrap().is_empty());
        assert_eq!(result.output.len(), 1);
    }

    #[test]
    fn runtime_error_keeps_output() {
        let result = sandbox().execute("print('before');\nthrow new Error('boom')");
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
        assert!(result.error.as_deref().unwrap().contains("boom"));
        assert!(result.output[0].starts_with("Script execution initiated"));
        assert_eq!(lines(&result), ["before"]);
    }

    #[test]
    fn thrown_strings_and_reference_errors() {
        let result = sandbox().execute("throw 'plain'");
        assert_eq!(result.error.as_deref(), Some("plain"));

        let result = sandbox().execute("require('fs')");
        assert_eq!(result.error.as_deref(), Some("require is not defined"));

        let result = sandbox().execute("process.exit(1)");
        assert_eq!(result.error.as_deref(), Some("process is not defined"));
    }

    #[test]
    fn object_ids_are_distinct() {
        let result = sandbox().execute(
            "const a = new ObjectId();\nconst b = ObjectId();\nprint(a.toString());\nprint(b.toHexString());",
        );
        assert!(result.success, "{:?}", result.error);
        let ids = lines(&result);
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.len() == 24));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn crud_through_db_proxy() {
        let store = Arc::new(MemoryStore::new());
        let sandbox = ScriptSandbox::new(store.clone());
        let result = sandbox.execute(
            r#"
            db.meals.insertOne({name: 'Soup', kcal: 120});
            db.meals.insertMany([{name: 'Salad', kcal: 80}, {name: 'Stew', kcal: 300}]);
            print(db.meals.countDocuments({kcal: {$gt: 100}}));
            const names = db.meals.find({}, {name: 1, _id: 0}).sort({kcal: 1}).toArray().map(m => m.name);
            print(names.join(','));
            db.meals.updateMany({kcal: {$lt: 200}}, {$set: {light: true}});
            print(db.meals.countDocuments({light: true}));
            print(db.meals.deleteOne({name: 'Stew'}).deletedCount);
            print(db.getCollectionNames().includes('meals'));
            "#,
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(lines(&result), ["2", "Salad,Soup,Stew", "2", "1", "true"]);
        assert_eq!(store.count("meals", &Filter::All).unwrap(), 2);
    }

    #[test]
    fn insert_assigns_id_on_the_argument() {
        let result = sandbox().execute(
            "const doc = {name: 'Tea'};\nconst res = db.drinks.insertOne(doc);\nprint(doc._id.equals(res.insertedId));",
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(lines(&result), ["true"]);
    }

    #[test]
    fn awaited_operations_complete() {
        let result = sandbox().execute(
            r#"
            async function main() {
                await db.logs.insertOne({at: new Date()});
                const n = await db.logs.countDocuments({});
                print(`logged ${n}`);
            }
            await main();
            "#,
        );
        assert!(result.success, "{:?}", result.error);
        assert_eq!(lines(&result), ["logged 1"]);
    }

    #[test]
    fn bounded_busy_loop_succeeds() {
        let result = sandbox().execute(
            "const start = Date.now();\nwhile (Date.now() - start < 20) {}\nprint('done')",
        );
        assert!(result.success);
        assert_eq!(lines(&result), ["done"]);
    }

    #[test]
    fn call_depth_limit_is_catchable() {
        let result = sandbox().execute("function f(n) { return f(n + 1); }\nf(0)");
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Maximum call stack size exceeded")
        );

        let result = sandbox().execute(
            "try { (function r() { r(); })(); } catch (e) { print(e.name); }",
        );
        assert!(result.success);
        assert_eq!(lines(&result), ["RangeError"]);
    }

    #[test]
    fn step_limit_cannot_be_caught() {
        let sandbox = sandbox().with_config(SandboxConfig::default().with_step_limit(Some(1_000)));
        let result = sandbox.execute("try { while (true) {} } catch (e) { print('caught'); }");
        assert!(!result.success);
        assert!(result.error.unwrap().contains("1000 evaluation steps"));
        assert_eq!(result.output.len(), 1);
    }

    #[test]
    fn printjson_and_show() {
        let result = ScriptSandbox::new(seeded_store())
            .execute("printjson({name: 'Soup', tags: ['hot']});\nshow('collections');");
        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.output[1],
            crate::shell::to_shell_pretty(&json!({"name": "Soup", "tags": ["hot"]}))
        );
        assert!(result.output.iter().any(|line| line == "meals"));
    }

    #[test]
    fn store_errors_surface_as_runtime_errors() {
        let result = ScriptSandbox::new(seeded_store()).execute(
            "db.users.insertOne({email: 'ana@example.com'});\ndb.users.insertOne({email: 'ana@example.com'});",
        );
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::RuntimeError));
        assert!(result.error.unwrap().contains("duplicate key"));
    }

    #[test]
    fn non_string_script_is_rejected() {
        let err = sandbox().execute_json(&json!(42)).unwrap_err();
        assert!(matches!(err, BackupError::InvalidScript));
        assert!(err.to_string().contains("Script must be a string"));

        let ok = sandbox().execute_json(&json!("print(1)")).unwrap();
        assert!(ok.success);
    }

    #[test]
    fn result_serialization() {
        let result = sandbox().execute("throw new TypeError('bad')");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], json!(false));
        assert_eq!(json["errorKind"], json!("RuntimeError"));
        assert_eq!(json["error"], json!("bad"));
        assert!(json["output"].is_array());

        let ok = serde_json::to_value(sandbox().execute("1")).unwrap();
        assert!(ok.get("error").is_none());
        assert!(ok.get("errorKind").is_none());
    }
}
