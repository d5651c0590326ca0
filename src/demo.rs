//! Built-in demonstration registry.
//!
//! A small catalogue of tools, resources, prompts, and models used by the
//! launcher binary and the end-to-end tests. Everything here goes through
//! the public [`ServerRegistry`] builder; embedding applications replace it
//! wholesale with their own registrations.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::mcp::registry::{
    HandlerError, HandlerResult, ModelEntry, PromptArgument, PromptEntry, ResourceEntry,
    ServerRegistry, ToolDefinition, ToolRegistration,
};
use crate::mcp::server::ServerTransport;

const INSTRUCTIONS: &str =
    "Demonstration MCP server bundled with mcp-conduit. Explore tools, resources, and prompts \
     over stdio, WebSocket, or HTTP.";

const RESOURCE_URI_PREFIX: &str = "mcp://demo/resources/";

/// Maximum artificial delay `echo_text` will honour, in milliseconds.
const MAX_ECHO_DELAY_MS: i64 = 2000;

/// Builds the demonstration registry.
///
/// `transports` is echoed back from the `capabilities` resource so clients
/// can discover how the server was launched. With `include_default_tools`
/// false the tool list is empty but resources, prompts, models, and
/// metadata remain.
#[must_use]
pub fn demo_registry(transports: &[ServerTransport], include_default_tools: bool) -> ServerRegistry {
    let transports: Vec<ServerTransport> = transports.to_vec();
    let tool_names: Vec<&str> = if include_default_tools {
        vec!["sum_numbers", "echo_text", "current_time"]
    } else {
        Vec::new()
    };

    let resources = demo_resources();
    let prompts = demo_prompts();
    let models = demo_models();

    let resource_ids: Vec<String> = resources.iter().map(|r| r.id.clone()).collect();
    let prompt_names: Vec<String> = prompts.iter().map(|p| p.name.clone()).collect();
    let capabilities_resource = json!({
        "transports": transports,
        "tools": tool_names,
        "prompts": prompt_names,
        "resources": resource_ids,
    });

    // Session-independent "active model" reported through metadata, the way
    // a real embedding application would track a mutable default
    let active_model = Arc::new(RwLock::new(models.first().map(|m| m.name.clone())));

    let mut registry = ServerRegistry::new()
        .with_resources(resources)
        .with_resource_reader(move |key| {
            let capabilities = capabilities_resource.clone();
            async move { read_demo_resource(&key, capabilities) }
        })
        .with_prompts(prompts)
        .with_prompt_getter(|name, args| async move { get_demo_prompt(&name, args.as_ref()) })
        .with_models(models)
        .with_model_selector({
            let active_model = Arc::clone(&active_model);
            move |name| {
                let active_model = Arc::clone(&active_model);
                async move {
                    *active_model.write().await = Some(name);
                    Ok(())
                }
            }
        })
        .with_metadata(base_metadata())
        .with_metadata_getter(move || {
            let active_model = Arc::clone(&active_model);
            async move {
                let mut metadata = base_metadata();
                if let Some(model) = active_model.read().await.clone() {
                    metadata.insert("activeModel".to_string(), json!(model));
                }
                Ok(metadata)
            }
        })
        .with_instructions(json!(INSTRUCTIONS));

    if include_default_tools {
        registry = registry
            .with_tool(sum_numbers_tool())
            .with_tool(echo_text_tool())
            .with_tool(current_time_tool());
    }

    registry
}

fn base_metadata() -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("package".to_string(), json!(env!("CARGO_PKG_NAME")));
    metadata.insert("version".to_string(), json!(env!("CARGO_PKG_VERSION")));
    metadata.insert(
        "description".to_string(),
        json!(env!("CARGO_PKG_DESCRIPTION")),
    );
    metadata
}

fn demo_resources() -> Vec<ResourceEntry> {
    vec![
        ResourceEntry {
            id: "welcome".to_string(),
            name: Some("Welcome".to_string()),
            uri: Some(format!("{RESOURCE_URI_PREFIX}welcome")),
            kind: Some("text/plain".to_string()),
            description: Some("High level introduction to the demonstration server".to_string()),
        },
        ResourceEntry {
            id: "capabilities".to_string(),
            name: Some("Capabilities".to_string()),
            uri: Some(format!("{RESOURCE_URI_PREFIX}capabilities")),
            kind: Some("application/json".to_string()),
            description: Some("Supported transports, tools, and prompts".to_string()),
        },
    ]
}

fn demo_prompts() -> Vec<PromptEntry> {
    vec![
        PromptEntry {
            name: "greet".to_string(),
            description: Some("Generate a friendly greeting".to_string()),
            arguments: vec![
                PromptArgument {
                    name: "name".to_string(),
                    description: Some("Name to greet".to_string()),
                    required: Some(false),
                },
                PromptArgument {
                    name: "tone".to_string(),
                    description: Some("Optional tone such as cheerful or formal".to_string()),
                    required: Some(false),
                },
            ],
        },
        PromptEntry {
            name: "summarize".to_string(),
            description: Some("Summarize a topic in a single paragraph".to_string()),
            arguments: vec![PromptArgument {
                name: "topic".to_string(),
                description: Some("Topic to summarize".to_string()),
                required: Some(true),
            }],
        },
    ]
}

fn demo_models() -> Vec<ModelEntry> {
    vec![
        ModelEntry {
            name: "mock-gpt".to_string(),
            label: Some("Mock GPT".to_string()),
            description: Some("Demonstration text-only model".to_string()),
            provider: Some("mock".to_string()),
        },
        ModelEntry {
            name: "mock-vision".to_string(),
            label: Some("Mock Vision".to_string()),
            description: Some("Demonstration multimodal model".to_string()),
            provider: Some("mock".to_string()),
        },
    ]
}

fn read_demo_resource(id_or_uri: &str, capabilities: Value) -> HandlerResult {
    let key = id_or_uri
        .trim()
        .strip_prefix(RESOURCE_URI_PREFIX)
        .unwrap_or_else(|| id_or_uri.trim());

    match key {
        "welcome" => Ok(json!(
            "Welcome! This demonstration server is backed by mcp-conduit."
        )),
        "capabilities" => Ok(capabilities),
        _ => Err(HandlerError::new(format!("Unknown resource: {id_or_uri}"))),
    }
}

fn get_demo_prompt(name: &str, args: Option<&Value>) -> HandlerResult {
    match name {
        "greet" => {
            let target = args
                .and_then(|a| a.get("name"))
                .map_or_else(|| "there".to_string(), stringify);
            let tone = args
                .and_then(|a| a.get("tone"))
                .map(|t| format!(" ({})", stringify(t)))
                .unwrap_or_default();
            Ok(json!({ "text": format!("Hello {target}!{tone}") }))
        }
        "summarize" => {
            let topic = args
                .and_then(|a| a.get("topic"))
                .map_or_else(|| "the provided subject".to_string(), stringify);
            Ok(json!({
                "text": format!(
                    "Provide a concise paragraph summarizing {topic}. Focus on the most \
                     important details and keep the tone informative."
                ),
            }))
        }
        _ => Err(HandlerError::new(format!("Unknown prompt: {name}"))),
    }
}

fn sum_numbers_tool() -> ToolRegistration {
    ToolRegistration::new(
        ToolDefinition {
            name: "sum_numbers".to_string(),
            description: Some("Sum an array of numbers and return the total.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "values": {
                        "type": "array",
                        "items": { "type": "number" },
                        "minItems": 1,
                        "description": "Array of numeric values to sum",
                    },
                },
                "required": ["values"],
                "additionalProperties": false,
            }),
        },
        |args| async move {
            let numbers: Vec<f64> = args
                .get("values")
                .and_then(Value::as_array)
                .map(|values| {
                    values
                        .iter()
                        .filter_map(Value::as_f64)
                        .filter(|n| n.is_finite())
                        .collect()
                })
                .unwrap_or_default();
            let sum: f64 = numbers.iter().sum();

            let expression = if numbers.is_empty() {
                format!("Sum: {}", format_number(sum))
            } else {
                let terms: Vec<String> = numbers.iter().copied().map(format_number).collect();
                format!("{} = {}", terms.join(" + "), format_number(sum))
            };

            let terms: Vec<Value> = numbers.iter().copied().map(number_value).collect();
            Ok(text_payload(
                &expression,
                json!({ "sum": number_value(sum), "terms": terms }),
            ))
        },
    )
}

fn echo_text_tool() -> ToolRegistration {
    ToolRegistration::new(
        ToolDefinition {
            name: "echo_text".to_string(),
            description: Some("Echo text back to the caller with optional formatting.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "Text to echo back to the caller",
                    },
                    "uppercase": {
                        "type": "boolean",
                        "description": "Return the message in uppercase",
                        "default": false,
                    },
                    "repeat": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 5,
                        "description": "How many times to repeat the message",
                        "default": 1,
                    },
                    "delayMs": {
                        "type": "integer",
                        "minimum": 0,
                        "maximum": MAX_ECHO_DELAY_MS,
                        "description": "Optional artificial delay before responding (milliseconds)",
                        "default": 0,
                    },
                },
                "required": ["message"],
                "additionalProperties": false,
            }),
        },
        |args| async move {
            let message = args.get("message").map_or_else(String::new, stringify);
            let uppercase = args
                .get("uppercase")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let repeat = integer_argument(args.get("repeat"), 1).clamp(1, 5);
            let delay = integer_argument(args.get("delayMs"), 0).clamp(0, MAX_ECHO_DELAY_MS);

            if delay > 0 {
                sleep(Duration::from_millis(u64::try_from(delay).unwrap_or(0))).await;
            }

            let decorated = if uppercase {
                message.to_uppercase()
            } else {
                message
            };
            let rendered = vec![decorated; usize::try_from(repeat).unwrap_or(1)].join(" ");

            Ok(text_payload(&rendered, json!({ "message": rendered })))
        },
    )
}

fn current_time_tool() -> ToolRegistration {
    ToolRegistration::new(
        ToolDefinition {
            name: "current_time".to_string(),
            description: Some("Return the current ISO 8601 timestamp.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
            }),
        },
        |_args| async move {
            let iso_timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            Ok(text_payload(
                &format!("Current time: {iso_timestamp}"),
                json!({ "isoTimestamp": iso_timestamp }),
            ))
        },
    )
}

/// Merges `extras` with a `content` array holding one text segment, the
/// result shape clients expect from demonstration tools.
fn text_payload(text: &str, extras: Value) -> Value {
    let mut payload = match extras {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert(
        "content".to_string(),
        json!([{ "type": "text", "text": text }]),
    );
    Value::Object(payload)
}

/// Renders a number the way dynamic-language peers print it: integral
/// values without a fractional part.
fn format_number(n: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    if n.fract() == 0.0 && n.abs() < 9e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Emits integral floats as JSON integers so `{"sum": 10}` round-trips
/// without a trailing `.0`.
fn number_value(n: f64) -> Value {
    #[allow(clippy::cast_possible_truncation)]
    if n.fract() == 0.0 && n.abs() < 9e15 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn integer_argument(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.parse().unwrap_or(default),
        _ => default,
    }
}
