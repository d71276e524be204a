//! Vendor tool-schema conversion.
//!
//! Turns the structural `ToolDefinition` into each vendor's tool block. Names
//! passed in are expected to be safe names already.

use serde_json::{json, Value};

use crate::types::ToolDefinition;

fn parameters(tool: &ToolDefinition) -> Value {
    serde_json::to_value(&tool.input_schema).unwrap_or_else(|_| json!({"type": "object"}))
}

/// Anthropic messages API: `{name, description, input_schema}`.
pub fn to_anthropic_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": parameters(tool),
    })
}

/// OpenAI chat completions and compatible vendors (DeepSeek, GLM, Ollama).
pub fn to_openai_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters(tool),
        }
    })
}

/// Keys Gemini's OpenAPI-subset schema accepts.
const GEMINI_SCHEMA_KEYS: &[&str] = &[
    "type",
    "format",
    "description",
    "nullable",
    "enum",
    "properties",
    "required",
    "items",
    "minItems",
    "maxItems",
    "minimum",
    "maximum",
];

/// Strip JSON-Schema keywords Gemini rejects (`default`, `additionalProperties`,
/// `$schema`, ...), recursing into properties and items.
pub fn to_gemini_schema(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, value) in obj {
        if !GEMINI_SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let converted = match key.as_str() {
            "properties" => match value.as_object() {
                Some(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), to_gemini_schema(prop)))
                        .collect(),
                ),
                None => continue,
            },
            "items" => to_gemini_schema(value),
            _ => value.clone(),
        };
        out.insert(key.clone(), converted);
    }

    // Gemini rejects an object schema with an empty `properties` map.
    if out
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| p.is_empty())
    {
        out.remove("properties");
        out.remove("required");
    }
    Value::Object(out)
}

/// Gemini `tools` entry: one object holding all `functionDeclarations`.
pub fn to_gemini_tools(tools: &[ToolDefinition]) -> Value {
    let declarations: Vec<Value> = tools
        .iter()
        .map(|tool| {
            let mut decl = json!({
                "name": tool.name,
                "description": tool.description,
            });
            let params = to_gemini_schema(&parameters(tool));
            if params.get("properties").is_some() {
                decl["parameters"] = params;
            }
            decl
        })
        .collect();
    json!([{ "functionDeclarations": declarations }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParameterSchema;
    use std::collections::HashMap;

    fn weather_tool() -> ToolDefinition {
        let mut properties = HashMap::new();
        let mut city = ParameterSchema::string(Some("City name"));
        city.default = Some(json!("Paris"));
        properties.insert("city".to_string(), city);
        ToolDefinition {
            name: "getWeather".to_string(),
            description: "Current weather".to_string(),
            input_schema: ParameterSchema::object(None, properties, vec!["city".to_string()]),
        }
    }

    #[test]
    fn test_anthropic_tool() {
        let tool = to_anthropic_tool(&weather_tool());
        assert_eq!(tool["name"], "getWeather");
        assert_eq!(tool["input_schema"]["type"], "object");
        assert_eq!(tool["input_schema"]["required"][0], "city");
    }

    #[test]
    fn test_openai_tool() {
        let tool = to_openai_tool(&weather_tool());
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["function"]["name"], "getWeather");
        assert_eq!(
            tool["function"]["parameters"]["properties"]["city"]["type"],
            "string"
        );
    }

    #[test]
    fn test_gemini_schema_strips_unsupported_keys() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "tags": {
                    "type": "array",
                    "items": { "type": "string", "default": "x", "examples": ["a"] }
                }
            },
            "required": ["tags"]
        });
        let converted = to_gemini_schema(&schema);
        assert!(converted.get("$schema").is_none());
        assert!(converted.get("additionalProperties").is_none());
        assert_eq!(converted["required"][0], "tags");
        let items = &converted["properties"]["tags"]["items"];
        assert_eq!(items, &json!({"type": "string"}));
    }

    #[test]
    fn test_gemini_tools_wraps_declarations() {
        let tools = to_gemini_tools(&[weather_tool()]);
        let decl = &tools[0]["functionDeclarations"][0];
        assert_eq!(decl["name"], "getWeather");
        assert!(decl["parameters"]["properties"]["city"].get("default").is_none());
    }

    #[test]
    fn test_gemini_omits_empty_parameters() {
        let tool = ToolDefinition {
            name: "ping".to_string(),
            description: "Ping".to_string(),
            input_schema: ParameterSchema::object(None, HashMap::new(), vec![]),
        };
        let tools = to_gemini_tools(&[tool]);
        assert!(tools[0]["functionDeclarations"][0].get("parameters").is_none());
    }
}
