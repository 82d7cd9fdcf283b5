use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub mod catalog;
pub mod credentials;
pub mod normalize;
pub mod upstream;

use credentials::CredentialContext;
use upstream::{UpstreamClient, UpstreamFailure};

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "stackintel-mcp";
pub const DEFAULT_API_HOST: &str = "api.stackintel.com";

/// Immutable gateway configuration, fixed at startup and shared by both
/// transports.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Hostname of the upstream technology-intelligence API.
    pub api_host: String,
    /// Process-wide fallback API key. The only credential stdio sessions
    /// ever use; HTTP requests may override it per request.
    pub fallback_key: Option<String>,
}

impl GatewayConfig {
    pub fn new(api_host: impl Into<String>, fallback_key: Option<String>) -> Self {
        Self {
            api_host: api_host.into(),
            fallback_key,
        }
    }
}

/// One MCP session over either transport.
///
/// The stdio transport keeps a single server for the process lifetime; the
/// HTTP transport constructs a fresh one per inbound request so that each
/// request's credential context is structurally isolated from its siblings.
pub struct McpServer {
    upstream: UpstreamClient,
    credentials: CredentialContext,
}

impl McpServer {
    /// Process-wide session: credential is the configured fallback only.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            upstream: UpstreamClient::new(config.api_host),
            credentials: CredentialContext::process_wide(config.fallback_key),
        }
    }

    /// Per-request session carrying the request's extracted bearer token.
    pub fn for_request(config: GatewayConfig, request_key: Option<String>) -> Self {
        Self {
            upstream: UpstreamClient::new(config.api_host),
            credentials: CredentialContext::for_request(request_key, config.fallback_key),
        }
    }

    /// Persistent-session transport: Content-Length framed JSON-RPC over
    /// stdin/stdout until EOF.
    pub async fn serve_stdio(&self) -> Result<(), String> {
        tracing::info!(
            server = MCP_SERVER_NAME,
            upstream = self.upstream.host(),
            "MCP stdio session started"
        );

        let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();

        loop {
            let incoming = read_framed_json(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(incoming) = incoming else {
                break;
            };

            let responses = self.handle_incoming_message(incoming).await;
            for response in responses {
                write_framed_json(&mut stdout, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        tracing::info!("MCP stdio session ended");
        Ok(())
    }

    /// Entry point shared by both transports: accepts a single request or a
    /// JSON-RPC batch and returns every response due back to the caller.
    pub async fn handle_incoming_message(&self, incoming: Value) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(request) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = request.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = request.get("method").and_then(Value::as_str) else {
            // Most likely a client-side response; this server issues no
            // outbound requests, so there is nothing to route it to.
            return None;
        };

        let params = request.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = request.get("id").cloned() {
            Some(match self.handle_request(method, params).await {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            self.handle_notification(method).await;
            None
        }
    }

    async fn handle_notification(&self, method: &str) {
        if !matches!(
            method,
            "notifications/initialized" | "notifications/cancelled"
        ) {
            tracing::debug!(method, "ignoring unknown notification");
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            "prompts/list" => Ok(prompts_list_payload()),
            "prompts/get" => self.handle_prompts_get(params),
            "resources/list" => Ok(json!({ "resources": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "prompts": { "listChanged": false }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Tools proxy the StackIntel technology-intelligence API. \
                Every tool result is a JSON payload; a payload with an 'error' field \
                describes an upstream, auth or input failure and should be narrated to \
                the user rather than retried blindly. Start with domain-lookup for a \
                domain's stack, lists/trends for technology-level questions."
        })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let (name, arguments) = parse_call_params(params, "tools/call")?;

        let envelope = match self.dispatch_tool(&name, &arguments).await {
            Ok(payload) => tool_result_envelope(payload, false),
            Err(failure) => {
                tracing::debug!(tool = %name, error = failure.kind.code(), "tool dispatch failed");
                tool_result_envelope(failure.to_value(), true)
            }
        };
        Ok(envelope)
    }

    /// Core dispatch: registry lookup, validation, parameter mapping, the
    /// single upstream call, then the tool's normalizer.
    pub async fn dispatch_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Value, UpstreamFailure> {
        let Some(tool) = catalog::find_tool(name) else {
            return Err(UpstreamFailure::unknown_tool(name));
        };
        catalog::validate_input(tool.params, arguments)?;
        let query = tool.map_params(arguments);
        let payload = self
            .upstream
            .call(&self.credentials, tool.path, &query)
            .await?;
        Ok(tool.normalizer.apply(payload))
    }

    fn handle_prompts_get(&self, params: Value) -> Result<Value, RpcError> {
        let (name, arguments) = parse_call_params(params, "prompts/get")?;

        let Some(prompt) = catalog::find_prompt(&name) else {
            return Ok(UpstreamFailure::unknown_prompt(&name).to_value());
        };
        if let Err(failure) = catalog::validate_input(prompt.params, &arguments) {
            return Ok(failure.to_value());
        }

        let messages: Vec<Value> = (prompt.render)(&arguments)
            .into_iter()
            .map(|message| {
                json!({
                    "role": message.role,
                    "content": { "type": "text", "text": message.text }
                })
            })
            .collect();

        Ok(json!({
            "description": prompt.description,
            "messages": messages
        }))
    }
}

/// Serve one HTTP request's JSON-RPC payload under a fresh per-request
/// credential scope.
pub async fn handle_http_jsonrpc(
    config: GatewayConfig,
    request_key: Option<String>,
    incoming: Value,
) -> Vec<Value> {
    let server = McpServer::for_request(config, request_key);
    server.handle_incoming_message(incoming).await
}

fn parse_call_params(
    params: Value,
    method: &str,
) -> Result<(String, Map<String, Value>), RpcError> {
    let params = params
        .as_object()
        .ok_or_else(|| RpcError::invalid_params(format!("{method} params must be an object")))?;

    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params(format!("{method} requires string field 'name'")))?
        .to_string();

    let arguments = match params.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => {
            return Err(RpcError::invalid_params(format!(
                "{method} 'arguments' must be an object"
            )));
        }
    };

    Ok((name, arguments))
}

fn tools_list_payload() -> Value {
    let tools: Vec<Value> = catalog::tools()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "inputSchema": catalog::render_input_schema(tool.params),
            })
        })
        .collect();
    json!({ "tools": tools })
}

fn prompts_list_payload() -> Value {
    let prompts: Vec<Value> = catalog::prompts()
        .iter()
        .map(|prompt| {
            let arguments: Vec<Value> = prompt
                .params
                .iter()
                .map(|spec| {
                    json!({
                        "name": spec.name,
                        "description": spec.description,
                        "required": spec.required,
                    })
                })
                .collect();
            json!({
                "name": prompt.name,
                "description": prompt.description,
                "arguments": arguments,
            })
        })
        .collect();
    json!({ "prompts": prompts })
}

/// Discovery document served by the HTTP transport on a plain GET: enough
/// for a client to decide how to authenticate and what it can call.
pub fn discovery_payload() -> Value {
    json!({
        "name": MCP_SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "description": "MCP gateway exposing the StackIntel technology-intelligence API as tools and prompts.",
        "authentication": "Send 'Authorization: Bearer <StackIntel API key>' with each request, or configure STACKINTEL_API_KEY on the server as a fallback.",
        "tools": tools_list_payload()["tools"],
        "prompts": prompts_list_payload()["prompts"],
    })
}

/// Tool results are always protocol-level successes; failures travel inside
/// the payload, flagged with `isError` for clients that surface it.
fn tool_result_envelope(payload: Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string());
    let mut result = json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": payload
    });
    if is_error {
        result["isError"] = json!(true);
    }
    result
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

/// Read one Content-Length framed JSON message. `Ok(None)` is a clean EOF
/// between messages; EOF inside a frame is an error.
async fn read_framed_json<R>(reader: &mut R) -> Result<Option<Value>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            if content_length.is_none() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "EOF while reading MCP frame headers",
            ));
        }

        if line == "\r\n" || line == "\n" {
            break;
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if let Some((key, value)) = header.split_once(':') {
            if key.eq_ignore_ascii_case("content-length") {
                let parsed = value.trim().parse::<usize>().map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "Invalid Content-Length header",
                    )
                })?;
                content_length = Some(parsed);
            }
        }
    }

    let content_length = content_length.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "Missing Content-Length header",
        )
    })?;

    let mut payload = vec![0_u8; content_length];
    reader.read_exact(&mut payload).await?;

    let json: Value = serde_json::from_slice(&payload).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Invalid JSON payload: {e}"),
        )
    })?;
    Ok(Some(json))
}

async fn write_framed_json<W>(writer: &mut W, value: &Value) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Failed to serialize JSON: {e}"),
        )
    })?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
