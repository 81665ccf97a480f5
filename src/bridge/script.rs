//! Sandboxed evaluation of inline agent code
//!
//! Agent code is JavaScript that defines `query(data)`. Each call gets a fresh
//! boa [`Context`] on a blocking thread with these globals:
//!
//! - `vars`: the bound connection secrets
//! - `user`: `{ id, email }`
//! - `sessionId`, `instruction`
//! - `data`: `{ question }`
//! - `fetch(url, options)`: host-side HTTP, subject to the host allowlist
//! - `console`: forwarded to tracing
//!
//! There is no filesystem, process, or module access.

use async_trait::async_trait;
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsResult, JsString, JsValue, NativeFunction,
    Source,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::error::{BridgeError, BridgeResult};
use crate::access::VariableMap;

/// Resource limits applied to every evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptLimits {
    #[serde(default = "default_loop_iteration_limit")]
    pub loop_iteration_limit: u64,
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_loop_iteration_limit() -> u64 {
    1_000_000
}

fn default_recursion_limit() -> usize {
    512
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            loop_iteration_limit: default_loop_iteration_limit(),
            recursion_limit: default_recursion_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// The identity exposed to scripts as `user`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScriptUser {
    pub id: String,
    pub email: Option<String>,
}

/// Everything a script can see
#[derive(Debug, Clone, Default)]
pub struct ScriptInput {
    pub code: String,
    pub vars: VariableMap,
    pub user: ScriptUser,
    pub session_id: String,
    pub instruction: String,
    pub question: String,
}

/// Runs agent code and returns the value `query` resolved to
#[async_trait]
pub trait ScriptRuntime: Send + Sync {
    async fn run(&self, input: ScriptInput) -> BridgeResult<Value>;
}

/// Options accepted by the script `fetch`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Host side of the script `fetch`
///
/// Called synchronously from the evaluation thread.
pub trait HttpCapability: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BridgeResult<FetchResponse>;
}

/// [`HttpCapability`] backed by reqwest and an optional host allowlist
pub struct ReqwestCapability {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
}

impl ReqwestCapability {
    pub fn new(timeout_secs: u64, allowed_hosts: Vec<String>) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BridgeError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            allowed_hosts,
        })
    }

    /// Check scheme and host against the allowlist
    pub fn authorize(&self, url: &str) -> BridgeResult<reqwest::Url> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| BridgeError::CapabilityDenied(format!("invalid URL '{}': {}", url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BridgeError::CapabilityDenied(format!(
                "scheme '{}' is not allowed",
                parsed.scheme()
            )));
        }

        if self.allowed_hosts.is_empty() {
            return Ok(parsed);
        }

        let host = parsed.host_str().unwrap_or_default();
        let allowed = self.allowed_hosts.iter().any(|entry| match entry.strip_prefix("*.") {
            Some(domain) => host == domain || host.ends_with(&format!(".{}", domain)),
            None => host == entry,
        });

        if allowed {
            Ok(parsed)
        } else {
            Err(BridgeError::CapabilityDenied(format!("host '{}' is not allowed", host)))
        }
    }

    async fn send(&self, url: reqwest::Url, request: FetchRequest) -> BridgeResult<FetchResponse> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| BridgeError::CapabilityDenied(format!("invalid method '{}'", request.method)))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(FetchResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpCapability for ReqwestCapability {
    fn fetch(&self, request: FetchRequest) -> BridgeResult<FetchResponse> {
        let url = self.authorize(&request.url)?;
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| BridgeError::Configuration("fetch requires a tokio runtime".to_string()))?;

        debug!(method = %request.method, url = %url, "Script fetch");
        handle.block_on(self.send(url, request))
    }
}

/// boa implementation of [`ScriptRuntime`]
pub struct BoaScriptRuntime {
    limits: ScriptLimits,
    http: Arc<dyn HttpCapability>,
    metrics: Option<Arc<crate::adapters::metrics_handler::MetricsCollector>>,
}

impl BoaScriptRuntime {
    pub fn new(limits: ScriptLimits, http: Arc<dyn HttpCapability>) -> Self {
        Self {
            limits,
            http,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<crate::adapters::metrics_handler::MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl ScriptRuntime for BoaScriptRuntime {
    async fn run(&self, input: ScriptInput) -> BridgeResult<Value> {
        let limits = self.limits.clone();
        let http = self.http.clone();
        let timeout = Duration::from_secs(limits.timeout_secs);
        let started = Instant::now();

        let task = tokio::task::spawn_blocking(move || evaluate(&input, &limits, http));

        let result = match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(BridgeError::Script(format!("script worker failed: {}", e))),
            Err(_) => Err(BridgeError::Script(format!(
                "script did not finish within {}s",
                timeout.as_secs()
            ))),
        };

        if let Some(metrics) = &self.metrics {
            metrics.script_duration.observe(started.elapsed().as_secs_f64());
        }

        result
    }
}

thread_local! {
    static CAPABILITY: RefCell<Option<Arc<dyn HttpCapability>>> = RefCell::new(None);
}

/// Installs the HTTP capability for the current thread until dropped
struct CapabilityGuard;

impl CapabilityGuard {
    fn install(http: Arc<dyn HttpCapability>) -> Self {
        CAPABILITY.with(|slot| *slot.borrow_mut() = Some(http));
        CapabilityGuard
    }
}

impl Drop for CapabilityGuard {
    fn drop(&mut self) {
        CAPABILITY.with(|slot| slot.borrow_mut().take());
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
enum Outcome {
    Fulfilled {
        #[serde(default)]
        value: Value,
    },
    Rejected {
        error: String,
    },
}

fn evaluate(input: &ScriptInput, limits: &ScriptLimits, http: Arc<dyn HttpCapability>) -> BridgeResult<Value> {
    let _guard = CapabilityGuard::install(http);

    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    context
        .register_global_callable(js_string!("__host_fetch"), 2, NativeFunction::from_fn_ptr(host_fetch))
        .map_err(script_error)?;
    context
        .register_global_callable(js_string!("__host_log"), 2, NativeFunction::from_fn_ptr(host_log))
        .map_err(script_error)?;

    let prelude = prelude(input)?;
    context
        .eval(Source::from_bytes(prelude.as_bytes()))
        .map_err(script_error)?;

    let wrapped = wrap(&input.code);
    context
        .eval(Source::from_bytes(wrapped.as_bytes()))
        .map_err(script_error)?;

    context.run_jobs();

    let outcome = context
        .eval(Source::from_bytes("String(globalThis.__agentdesk_outcome ?? '')".as_bytes()))
        .and_then(|value| value.to_string(&mut context))
        .map_err(script_error)?
        .to_std_string_escaped();

    if outcome.is_empty() {
        return Err(BridgeError::Script(
            "query(data) did not settle; only promise jobs are supported".to_string(),
        ));
    }

    match serde_json::from_str::<Outcome>(&outcome)? {
        Outcome::Fulfilled { value } => Ok(value),
        Outcome::Rejected { error } => Err(BridgeError::Script(error)),
    }
}

fn script_error(err: JsError) -> BridgeError {
    BridgeError::Script(err.to_string())
}

fn arg_string(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    let value = args.get(index).cloned().unwrap_or(JsValue::undefined());
    Ok(value.to_string(context)?.to_std_string_escaped())
}

fn host_fetch(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let url = arg_string(args, 0, context)?;
    let options = arg_string(args, 1, context)?;

    let mut request: FetchRequest = serde_json::from_str(&options)
        .map_err(|e| JsNativeError::typ().with_message(format!("invalid fetch options: {}", e)))?;
    request.url = url;

    let capability = CAPABILITY
        .with(|slot| slot.borrow().clone())
        .ok_or_else(|| JsNativeError::error().with_message("fetch is not available".to_string()))?;

    let response = capability
        .fetch(request)
        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;

    let encoded = serde_json::to_string(&response)
        .map_err(|e| JsNativeError::error().with_message(e.to_string()))?;
    Ok(JsValue::from(JsString::from(encoded.as_str())))
}

fn host_log(_this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let level = arg_string(args, 0, context)?;
    let message = arg_string(args, 1, context)?;

    match level.as_str() {
        "error" | "warn" => warn!(target: "agentdesk::script", "{}", message),
        _ => info!(target: "agentdesk::script", "{}", message),
    }
    Ok(JsValue::undefined())
}

const RUNTIME_PRELUDE: &str = r#"
function __agentdesk_format(value) {
  if (typeof value === "string") return value;
  try { return JSON.stringify(value); } catch (e) { return String(value); }
}

const console = Object.freeze({
  log: (...args) => __host_log("info", args.map(__agentdesk_format).join(" ")),
  info: (...args) => __host_log("info", args.map(__agentdesk_format).join(" ")),
  warn: (...args) => __host_log("warn", args.map(__agentdesk_format).join(" ")),
  error: (...args) => __host_log("error", args.map(__agentdesk_format).join(" ")),
});

async function fetch(url, options) {
  const opts = Object.assign({}, options || {});
  if (opts.body !== undefined && opts.body !== null && typeof opts.body !== "string") {
    opts.body = JSON.stringify(opts.body);
  }
  const res = JSON.parse(__host_fetch(String(url), JSON.stringify(opts)));
  return {
    status: res.status,
    ok: res.status >= 200 && res.status < 300,
    headers: res.headers,
    text: async () => res.body,
    json: async () => JSON.parse(res.body),
  };
}

function __agentdesk_settle(state, payload) {
  try {
    if (state === "fulfilled") {
      return JSON.stringify({ state, value: payload === undefined ? null : payload });
    }
    const message = payload !== null && typeof payload === "object" && payload.message !== undefined
      ? String(payload.message)
      : String(payload);
    return JSON.stringify({ state, error: message });
  } catch (e) {
    return JSON.stringify({ state: "rejected", error: "result is not serializable: " + String(e) });
  }
}
"#;

fn prelude(input: &ScriptInput) -> BridgeResult<String> {
    let vars = serde_json::to_string(&input.vars)?;
    let user = serde_json::to_string(&input.user)?;
    let session_id = serde_json::to_string(&input.session_id)?;
    let instruction = serde_json::to_string(&input.instruction)?;
    let data = serde_json::to_string(&json!({ "question": input.question }))?;

    Ok(format!(
        "const vars = Object.freeze({});\nconst user = Object.freeze({});\nconst sessionId = {};\nconst instruction = {};\nconst data = {};\n{}",
        vars, user, session_id, instruction, data, RUNTIME_PRELUDE
    ))
}

fn wrap(code: &str) -> String {
    format!(
        "globalThis.__agentdesk_outcome = undefined;\n\
         (async () => {{\n{}\n;return await query(data);\n}})().then(\n  \
         (value) => {{ globalThis.__agentdesk_outcome = __agentdesk_settle(\"fulfilled\", value); }},\n  \
         (error) => {{ globalThis.__agentdesk_outcome = __agentdesk_settle(\"rejected\", error); }}\n);\n",
        code
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records requests and answers with a canned body
    struct FakeHttp {
        seen: Mutex<Vec<FetchRequest>>,
        body: String,
    }

    impl FakeHttp {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                body: body.to_string(),
            })
        }
    }

    impl HttpCapability for FakeHttp {
        fn fetch(&self, request: FetchRequest) -> BridgeResult<FetchResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(FetchResponse {
                status: 200,
                headers: BTreeMap::new(),
                body: self.body.clone(),
            })
        }
    }

    fn runtime(http: Arc<dyn HttpCapability>) -> BoaScriptRuntime {
        BoaScriptRuntime::new(
            ScriptLimits {
                loop_iteration_limit: 10_000,
                recursion_limit: 64,
                timeout_secs: 10,
            },
            http,
        )
    }

    fn input(code: &str) -> ScriptInput {
        ScriptInput {
            code: code.to_string(),
            vars: [("api_key".to_string(), "sk-1".to_string())].into_iter().collect(),
            user: ScriptUser {
                id: "u1".to_string(),
                email: Some("u1@example.com".to_string()),
            },
            session_id: "chat-7".to_string(),
            instruction: "be brief".to_string(),
            question: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn test_query_sees_globals() {
        let rt = runtime(FakeHttp::new("{}"));
        let value = rt
            .run(input(
                "async function query(data) { return { text: data.question + ' ' + vars.api_key + ' ' + user.id + ' ' + sessionId + ' ' + instruction }; }",
            ))
            .await
            .unwrap();
        assert_eq!(value["text"], "hello sk-1 u1 chat-7 be brief");
    }

    #[tokio::test]
    async fn test_sync_query_and_undefined_result() {
        let rt = runtime(FakeHttp::new("{}"));
        let value = rt.run(input("function query(d) { return 'plain'; }")).await.unwrap();
        assert_eq!(value, json!("plain"));

        let value = rt.run(input("function query(d) {}")).await.unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn test_throw_becomes_script_error() {
        let rt = runtime(FakeHttp::new("{}"));
        let err = rt
            .run(input("function query(d) { throw new Error('boom'); }"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Script(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_syntax_error_and_missing_query() {
        let rt = runtime(FakeHttp::new("{}"));
        assert!(matches!(
            rt.run(input("function query( {")).await,
            Err(BridgeError::Script(_))
        ));

        let err = rt.run(input("const x = 1;")).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn test_loop_limit_stops_runaway_code() {
        let rt = runtime(FakeHttp::new("{}"));
        let result = rt
            .run(input("function query(d) { while (true) {} }"))
            .await;
        assert!(matches!(result, Err(BridgeError::Script(_))));
    }

    #[tokio::test]
    async fn test_fetch_goes_through_capability() {
        let http = FakeHttp::new(r#"{"message":"from api"}"#);
        let rt = runtime(http.clone());
        let value = rt
            .run(input(
                r#"async function query(data) {
                    const res = await fetch("https://api.example.com/v1", {
                        method: "POST",
                        headers: { Authorization: "Bearer " + vars.api_key },
                        body: { q: data.question },
                    });
                    const body = await res.json();
                    return { text: body.message, ok: res.ok };
                }"#,
            ))
            .await
            .unwrap();

        assert_eq!(value, json!({"text": "from api", "ok": true}));

        let seen = http.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "https://api.example.com/v1");
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].headers["Authorization"], "Bearer sk-1");
        assert_eq!(seen[0].body.as_deref(), Some(r#"{"q":"hello"}"#));
    }

    #[test]
    fn test_allowlist() {
        let open = ReqwestCapability::new(5, vec![]).unwrap();
        assert!(open.authorize("https://anything.test/x").is_ok());
        assert!(open.authorize("file:///etc/passwd").is_err());

        let strict = ReqwestCapability::new(
            5,
            vec!["api.example.com".to_string(), "*.trusted.io".to_string()],
        )
        .unwrap();
        assert!(strict.authorize("https://api.example.com/v1").is_ok());
        assert!(strict.authorize("https://eu.trusted.io/").is_ok());
        assert!(strict.authorize("https://trusted.io/").is_ok());
        assert!(matches!(
            strict.authorize("https://evil.example.com/"),
            Err(BridgeError::CapabilityDenied(_))
        ));
    }
}
