//! Function-calling tools exposed to the chat model.
//!
//! Tools are trait objects behind a registry. The registry renders OpenAI
//! function specs for the completion request and dispatches invocations by
//! name. Dispatch never raises: unknown tools, malformed arguments, and tool
//! failures all come back as structured error text the model can read and
//! react to.
//!
//! Built-ins:
//! - `search_documents` — semantic retrieval over ingested passages.
//! - `sql_query` — read-only SELECT against the transcript database.
//! - `run_script` — Lua snippets in a restricted VM.

use anyhow::{bail, Result};
use async_trait::async_trait;
use mlua::prelude::*;
use mlua::{HookTriggers, VmState};
use serde_json::{json, Value};
use sqlx::{Column, Row, SqlitePool};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::config::{Config, RetrievalConfig};
use crate::retrieval::RetrievalService;

/// A tool the chat model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"sql_query"`).
    fn name(&self) -> &str;

    /// One-line description the model uses to decide whether to call.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Execute with parsed arguments; the returned text is fed back to the
    /// model verbatim.
    async fn execute(&self, params: Value) -> Result<String>;
}

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Names of all registered tools, registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// OpenAI function specs for the completion request.
    pub fn specs(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    /// Invoke a tool by name with JSON-encoded arguments.
    ///
    /// Always returns text. Failures become an `{"error": ...}` payload so
    /// the model sees what went wrong instead of the turn aborting.
    pub async fn dispatch(&self, name: &str, arguments: &str) -> String {
        let Some(tool) = self.find(name) else {
            return json!({ "error": format!("unknown tool: {name}") }).to_string();
        };

        let params: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => {
                    return json!({ "error": format!("invalid tool arguments: {e}") }).to_string()
                }
            }
        };

        match tool.execute(params).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the registry of built-in tools, filtered by the config allow-list.
pub fn builtin_registry(
    config: &Config,
    retrieval: Arc<RetrievalService>,
    pool: SqlitePool,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    for name in &config.tools.allow {
        match name.as_str() {
            "search_documents" => registry.register(Box::new(SearchDocumentsTool::new(
                retrieval.clone(),
                config.retrieval.clone(),
            ))),
            "sql_query" => registry.register(Box::new(SqlQueryTool::new(pool.clone()))),
            "run_script" => registry.register(Box::new(RunScriptTool)),
            other => warn!("Unknown tool in tools.allow, ignoring: {}", other),
        }
    }

    registry
}

// ═══════════════════════════════════════════════════════════════════════
// search_documents
// ═══════════════════════════════════════════════════════════════════════

pub struct SearchDocumentsTool {
    retrieval: Arc<RetrievalService>,
    config: RetrievalConfig,
}

impl SearchDocumentsTool {
    pub fn new(retrieval: Arc<RetrievalService>, config: RetrievalConfig) -> Self {
        Self { retrieval, config }
    }
}

#[async_trait]
impl Tool for SearchDocumentsTool {
    fn name(&self) -> &str {
        "search_documents"
    }

    fn description(&self) -> &str {
        "Search the ingested document collection for passages relevant to a query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query text" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }

        let matches = self
            .retrieval
            .query(query, self.config.top_k, self.config.score_threshold)
            .await?;

        if matches.is_empty() {
            return Ok(json!({ "results": [], "note": "no passages matched" }).to_string());
        }
        Ok(json!({ "results": matches }).to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// sql_query
// ═══════════════════════════════════════════════════════════════════════

const MAX_SQL_ROWS: usize = 100;

pub struct SqlQueryTool {
    pool: SqlitePool,
}

impl SqlQueryTool {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        "sql_query"
    }

    fn description(&self) -> &str {
        "Run a read-only SELECT query against the chat database \
         (tables: chat_messages, ingested_files)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "A single SELECT statement" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let sql = params["query"].as_str().unwrap_or("");
        validate_select(sql)?;

        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Ok("(no rows)".to_string());
        }

        let mut out = String::new();
        let header: Vec<&str> = rows[0].columns().iter().map(|c| c.name()).collect();
        out.push_str(&header.join("\t"));
        out.push('\n');

        for row in rows.iter().take(MAX_SQL_ROWS) {
            let cells: Vec<String> = (0..row.columns().len())
                .map(|i| format_cell(row, i))
                .collect();
            out.push_str(&cells.join("\t"));
            out.push('\n');
        }

        if rows.len() > MAX_SQL_ROWS {
            out.push_str(&format!("... ({} more rows)\n", rows.len() - MAX_SQL_ROWS));
        }
        Ok(out)
    }
}

/// Reject anything that is not a single SELECT statement.
fn validate_select(sql: &str) -> Result<()> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        bail!("query must not be empty");
    }
    if !trimmed.to_ascii_lowercase().starts_with("select") {
        bail!("only SELECT queries are allowed");
    }
    // A trailing semicolon is fine; an interior one means a second statement.
    let body = trimmed.trim_end_matches(';');
    if body.contains(';') {
        bail!("only a single statement is allowed");
    }
    Ok(())
}

fn format_cell(row: &sqlx::sqlite::SqliteRow, index: usize) -> String {
    if let Ok(v) = row.try_get::<String, _>(index) {
        return v;
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return v.to_string();
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return v.to_string();
    }
    "NULL".to_string()
}

// ═══════════════════════════════════════════════════════════════════════
// run_script
// ═══════════════════════════════════════════════════════════════════════

const SCRIPT_MEMORY_LIMIT: usize = 4 * 1024 * 1024;
const SCRIPT_INSTRUCTION_LIMIT: u32 = 10_000;
const SCRIPT_HOOK_GRANULARITY: u32 = 1_000;

pub struct RunScriptTool;

#[async_trait]
impl Tool for RunScriptTool {
    fn name(&self) -> &str {
        "run_script"
    }

    fn description(&self) -> &str {
        "Evaluate a short Lua 5.4 snippet for calculations and text processing. \
         No filesystem, OS, or network access."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Lua source to evaluate" }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let code = params["code"].as_str().unwrap_or("").to_string();
        if code.trim().is_empty() {
            bail!("code must not be empty");
        }

        // The VM is synchronous; run it off the async runtime.
        tokio::task::spawn_blocking(move || run_lua(&code)).await?
    }
}

/// Evaluate Lua in a fresh restricted VM and render the outcome.
///
/// Output is captured `print` lines followed by `=> value` when the script
/// returns something.
fn run_lua(code: &str) -> Result<String> {
    let lua = Lua::new();
    sandbox_globals(&lua)?;
    lua.set_memory_limit(SCRIPT_MEMORY_LIMIT)?;

    let printed = Arc::new(Mutex::new(String::new()));
    let sink = printed.clone();
    lua.globals().set(
        "print",
        lua.create_function(move |_lua, args: LuaMultiValue| {
            let line: Vec<String> = args.iter().map(format_lua_value).collect();
            let mut buf = sink.lock().unwrap();
            buf.push_str(&line.join("\t"));
            buf.push('\n');
            Ok(())
        })?,
    )?;

    // Instruction budget: the hook errors out once the count is exhausted,
    // which aborts eval with a Lua error.
    let remaining = Arc::new(Mutex::new(SCRIPT_INSTRUCTION_LIMIT));
    let counter = remaining.clone();
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(SCRIPT_HOOK_GRANULARITY),
        move |_lua, _debug| {
            let mut left = counter.lock().unwrap();
            if *left < SCRIPT_HOOK_GRANULARITY {
                return Err(mlua::Error::external(anyhow::anyhow!(
                    "script exceeded instruction limit"
                )));
            }
            *left -= SCRIPT_HOOK_GRANULARITY;
            Ok(VmState::Continue)
        },
    );

    let result = lua.load(code).eval::<LuaMultiValue>();
    lua.remove_hook();

    let mut out = printed.lock().unwrap().clone();
    match result {
        Ok(values) => {
            let rendered: Vec<String> = values
                .iter()
                .filter(|v| !v.is_nil())
                .map(format_lua_value)
                .collect();
            if !rendered.is_empty() {
                out.push_str(&format!("=> {}", rendered.join(", ")));
            }
            if out.is_empty() {
                out.push_str("(no output)");
            }
            Ok(out)
        }
        Err(e) => bail!("script error: {e}"),
    }
}

/// Remove stdlib access the snippet must not have.
fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    globals.set("os", LuaValue::Nil)?;
    globals.set("io", LuaValue::Nil)?;
    globals.set("debug", LuaValue::Nil)?;
    globals.set("loadfile", LuaValue::Nil)?;
    globals.set("dofile", LuaValue::Nil)?;
    globals.set("require", LuaValue::Nil)?;
    Ok(())
}

fn format_lua_value(value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        other => format!("<{}>", other.type_name()),
    }
}
