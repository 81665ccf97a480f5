//! Agent invocation bridge
//!
//! Turns "ask this agent this question" into an ordered stream of text
//! tokens. Inline code agents run in the boa sandbox and produce a single
//! token; chatflow agents stream from the prediction service.

pub mod error;
pub mod prediction;
pub mod response;
pub mod script;
pub mod stream;
pub mod template;

pub use error::{BridgeError, BridgeResult};
pub use prediction::{HttpPredictionClient, PredictionClient, PredictionEvent, PredictionRequest, SseParser};
pub use response::normalize;
pub use script::{
    BoaScriptRuntime, FetchRequest, FetchResponse, HttpCapability, ReqwestCapability, ScriptInput,
    ScriptLimits, ScriptRuntime, ScriptUser,
};
pub use stream::{BridgeChunk, BridgeStream, BridgeStreamSender};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::access::VariableMap;
use crate::adapters::metrics_handler::MetricsCollector;
use crate::domain::{Agent, AgentSource};

/// Invocation settings, the `[bridge]` table of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the prediction service; chatflow agents fail without it
    #[serde(default)]
    pub prediction_url: Option<String>,
    #[serde(default)]
    pub prediction_api_key: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Hosts reachable through script `fetch`; empty allows any
    #[serde(default)]
    pub fetch_allowed_hosts: Vec<String>,
    #[serde(default)]
    pub script: ScriptLimits,
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_fallback_text() -> String {
    response::DEFAULT_FALLBACK.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            prediction_url: None,
            prediction_api_key: None,
            http_timeout_secs: default_http_timeout_secs(),
            fetch_allowed_hosts: Vec::new(),
            script: ScriptLimits::default(),
            fallback_text: default_fallback_text(),
        }
    }
}

/// Who is asking, and in which conversation
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub user: ScriptUser,
    pub session_id: String,
    pub instruction: String,
}

pub struct InvocationBridge {
    scripts: Arc<dyn ScriptRuntime>,
    predictions: Option<Arc<dyn PredictionClient>>,
    fallback_text: String,
}

impl InvocationBridge {
    pub fn new(
        scripts: Arc<dyn ScriptRuntime>,
        predictions: Option<Arc<dyn PredictionClient>>,
        fallback_text: impl Into<String>,
    ) -> Self {
        Self {
            scripts,
            predictions,
            fallback_text: fallback_text.into(),
        }
    }

    /// Build the production bridge from configuration
    pub fn from_config(config: &BridgeConfig, metrics: Option<Arc<MetricsCollector>>) -> BridgeResult<Self> {
        let http = ReqwestCapability::new(config.http_timeout_secs, config.fetch_allowed_hosts.clone())?;
        let mut runtime = BoaScriptRuntime::new(config.script.clone(), Arc::new(http));
        if let Some(metrics) = metrics {
            runtime = runtime.with_metrics(metrics);
        }

        let predictions = match &config.prediction_url {
            Some(url) if !url.is_empty() => Some(Arc::new(HttpPredictionClient::new(
                url.clone(),
                config.prediction_api_key.clone(),
                config.http_timeout_secs,
            )?) as Arc<dyn PredictionClient>),
            _ => None,
        };

        Ok(Self::new(Arc::new(runtime), predictions, config.fallback_text.clone()))
    }

    /// Invoke `agent` with `message`
    ///
    /// Configuration problems are returned before anything runs; failures
    /// during execution arrive as the stream's error item.
    pub fn invoke(
        &self,
        agent: &Agent,
        message: &str,
        vars: &VariableMap,
        ctx: &InvocationContext,
    ) -> BridgeResult<BridgeStream> {
        match &agent.source {
            AgentSource::Code { code } => Ok(self.invoke_code(agent, code, message, vars, ctx)),
            AgentSource::Chatflow { chatflow_id } => {
                self.invoke_chatflow(agent, chatflow_id, message, vars, ctx)
            }
        }
    }

    fn invoke_code(
        &self,
        agent: &Agent,
        code: &str,
        message: &str,
        vars: &VariableMap,
        ctx: &InvocationContext,
    ) -> BridgeStream {
        let (sender, stream) = BridgeStream::channel(4);

        let runtime = self.scripts.clone();
        let adapter = agent.response_adapter.clone();
        let fallback = self.fallback_text.clone();
        let agent_id = agent.id;
        let input = ScriptInput {
            code: code.to_string(),
            vars: vars.clone(),
            user: ctx.user.clone(),
            session_id: ctx.session_id.clone(),
            instruction: ctx.instruction.clone(),
            question: message.to_string(),
        };

        tokio::spawn(async move {
            let result = match runtime.run(input).await {
                Ok(value) => {
                    let text = normalize(&value, &adapter, &fallback);
                    sender.send_token(text).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(agent_id, error = %e, "Agent script failed");
                sender.send_error(e).await;
            }
        });

        stream
    }

    fn invoke_chatflow(
        &self,
        agent: &Agent,
        chatflow_id: &str,
        message: &str,
        vars: &VariableMap,
        ctx: &InvocationContext,
    ) -> BridgeResult<BridgeStream> {
        let override_config = template::parse_override_config(agent.override_config.as_ref())?
            .map(|config| template::render_override_config(&config, vars));

        let client = self.predictions.as_ref().ok_or_else(|| {
            BridgeError::Configuration("prediction service URL is not configured".to_string())
        })?;

        debug!(agent_id = agent.id, chatflow_id, "Starting prediction");

        let request = PredictionRequest {
            question: message.to_string(),
            streaming: true,
            override_config,
            chat_id: Some(ctx.session_id.clone()).filter(|id| !id.is_empty()),
        };
        Ok(client.predict(chatflow_id, request))
    }
}
