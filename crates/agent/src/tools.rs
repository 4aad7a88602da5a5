use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::llm::{ToolCall, ToolDefinition};
use crate::lookup::{QuoteSource, VehicleLookup};

pub const VALIDATE_VIN: &str = "validate_vin";
pub const VALIDATE_VEHICLE_INFO: &str = "validate_vehicle_info";
pub const INSPIRATIONAL_QUOTE: &str = "get_inspirational_quote";

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, input: Value) -> Result<Value>;
}

/// A tool call together with the arguments it was made with and its result.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolExecution {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub result: Value,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().to_string(), Box::new(tool));
    }

    /// The three intake tools over the given lookup backends.
    pub fn intake(lookup: Arc<dyn VehicleLookup>, quotes: Arc<dyn QuoteSource>) -> Self {
        let mut registry = Self::default();
        registry.register(ValidateVinTool { lookup: lookup.clone() });
        registry.register(ValidateVehicleInfoTool { lookup });
        registry.register(InspirationalQuoteTool { quotes });
        registry
    }

    pub fn definitions(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Runs one call. Bad arguments, unknown tools and tool errors become a
    /// `{valid: false, error}` result instead of an error.
    pub async fn invoke(&self, call: &ToolCall) -> ToolExecution {
        let name = call.function.name.clone();
        let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(arguments) => arguments,
            Err(error) => {
                return ToolExecution {
                    call_id: call.id.clone(),
                    name,
                    arguments: Value::Null,
                    result: failure(format!("Invalid tool arguments: {error}")),
                };
            }
        };

        let result = match self.tools.get(&name) {
            Some(tool) => tool
                .execute(arguments.clone())
                .await
                .unwrap_or_else(|error| failure(error.to_string())),
            None => failure(format!("Unknown tool: {name}")),
        };
        info!(event_name = "agent.tool_executed", tool = %name, "tool executed");

        ToolExecution { call_id: call.id.clone(), name, arguments, result }
    }
}

pub fn failure(error: impl Into<String>) -> Value {
    json!({ "valid": false, "error": error.into() })
}

pub struct ValidateVinTool {
    lookup: Arc<dyn VehicleLookup>,
}

#[async_trait]
impl Tool for ValidateVinTool {
    fn name(&self) -> &'static str {
        VALIDATE_VIN
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: VALIDATE_VIN,
            description: "Validates a Vehicle Identification Number (VIN) against the NHTSA \
                database. Use this when the user provides a VIN to check it before accepting it.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "vin": {
                        "type": "string",
                        "description": "The 17-character Vehicle Identification Number to validate"
                    }
                },
                "required": ["vin"]
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let Some(vin) = input.get("vin").and_then(Value::as_str).filter(|vin| !vin.is_empty())
        else {
            return Ok(failure("VIN is required."));
        };
        Ok(serde_json::to_value(self.lookup.validate_vin(vin).await)?)
    }
}

pub struct ValidateVehicleInfoTool {
    lookup: Arc<dyn VehicleLookup>,
}

#[async_trait]
impl Tool for ValidateVehicleInfoTool {
    fn name(&self) -> &'static str {
        VALIDATE_VEHICLE_INFO
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: VALIDATE_VEHICLE_INFO,
            description: "Validates vehicle information (year, make, body type) against the NHTSA \
                database. Use this when the user provides Year, Make and Body Type, e.g. \
                '2019 Ford Sedan'.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "year": {"type": "integer", "description": "The vehicle year (e.g., 2019)"},
                    "make": {"type": "string", "description": "The vehicle make (e.g., 'Ford')"},
                    "body_type": {
                        "type": "string",
                        "description": "The vehicle body type (required, e.g., 'Sedan', 'SUV')"
                    }
                },
                "required": ["year", "make", "body_type"]
            }),
        }
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let make = input.get("make").and_then(Value::as_str).filter(|make| !make.trim().is_empty());
        let (Some(year), Some(make)) = (argument_year(&input), make) else {
            return Ok(failure("Year and make are required."));
        };
        let body_type = input.get("body_type").and_then(Value::as_str).unwrap_or_default();
        if body_type.trim().is_empty() {
            return Ok(failure(
                "Body type is required. Please provide the vehicle body type \
                 (e.g., Sedan, SUV, Truck, Coupe).",
            ));
        }
        Ok(serde_json::to_value(self.lookup.validate_vehicle_info(year, make, body_type).await)?)
    }
}

/// Models send the year as a number or as a string.
pub(crate) fn argument_year(input: &Value) -> Option<i32> {
    let year = input.get("year")?;
    year.as_i64()
        .and_then(|year| i32::try_from(year).ok())
        .or_else(|| year.as_str().and_then(|year| year.trim().parse::<i32>().ok()))
        .filter(|year| *year > 0)
}

pub struct InspirationalQuoteTool {
    quotes: Arc<dyn QuoteSource>,
}

#[async_trait]
impl Tool for InspirationalQuoteTool {
    fn name(&self) -> &'static str {
        INSPIRATIONAL_QUOTE
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: INSPIRATIONAL_QUOTE,
            description: "Fetches an inspirational quote. ONLY use this when the user explicitly \
                asks for a human or agent, explicitly expresses strong frustration, or explicitly \
                asks to stop. Never use it for normal answers.",
            parameters: json!({ "type": "object", "properties": {}, "required": [] }),
        }
    }

    async fn execute(&self, _input: Value) -> Result<Value> {
        serde_json::to_value(self.quotes.fetch_quote().await).map_err(|error| anyhow!(error))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{
        argument_year, ToolRegistry, INSPIRATIONAL_QUOTE, VALIDATE_VEHICLE_INFO, VALIDATE_VIN,
    };
    use crate::llm::{FunctionCall, ToolCall};
    use crate::lookup::{Quote, QuoteSource, VehicleCheck, VehicleLookup};

    struct StaticLookup;

    #[async_trait]
    impl VehicleLookup for StaticLookup {
        async fn validate_vin(&self, _vin: &str) -> VehicleCheck {
            VehicleCheck {
                valid: true,
                make: Some("HONDA".to_string()),
                body_type: Some("Sedan".to_string()),
                year: Some("2003".to_string()),
                error: None,
            }
        }

        async fn validate_vehicle_info(&self, _: i32, _: &str, _: &str) -> VehicleCheck {
            VehicleCheck::rejected("unused")
        }
    }

    struct DownQuotes;

    #[async_trait]
    impl QuoteSource for DownQuotes {
        async fn fetch_quote(&self) -> Quote {
            Quote::fallback("API error, fallback quote used")
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::intake(Arc::new(StaticLookup), Arc::new(DownQuotes))
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: FunctionCall { name: name.to_string(), arguments: arguments.to_string() },
        }
    }

    #[tokio::test]
    async fn intake_registry_exposes_three_tools() {
        let registry = registry();
        let all = [VALIDATE_VIN, VALIDATE_VEHICLE_INFO, INSPIRATIONAL_QUOTE];
        assert_eq!(registry.definitions(&all).len(), 3);
        assert_eq!(registry.definitions(&[VALIDATE_VIN, "missing"]).len(), 1);
    }

    #[tokio::test]
    async fn malformed_arguments_become_structured_failure() {
        let execution = registry().invoke(&call(VALIDATE_VIN, "{not json")).await;
        assert_eq!(execution.result["valid"], json!(false));
        assert!(execution.result["error"].as_str().unwrap_or_default().contains("Invalid tool"));
    }

    #[tokio::test]
    async fn missing_vin_is_reported() {
        let execution = registry().invoke(&call(VALIDATE_VIN, "{}")).await;
        assert_eq!(execution.result, json!({"valid": false, "error": "VIN is required."}));
    }

    #[tokio::test]
    async fn vin_lookup_result_is_passed_through() {
        let execution =
            registry().invoke(&call(VALIDATE_VIN, r#"{"vin":"1HGCM82633A004352"}"#)).await;
        assert_eq!(execution.result["valid"], json!(true));
        assert_eq!(execution.result["make"], json!("HONDA"));
    }

    #[tokio::test]
    async fn quote_tool_degrades_to_fallback() {
        let execution = registry().invoke(&call(INSPIRATIONAL_QUOTE, "{}")).await;
        assert_eq!(execution.result["author"], json!("Elbert Hubbard"));
        assert_eq!(execution.result["success"], json!(false));
    }

    #[test]
    fn year_argument_accepts_number_or_string() {
        assert_eq!(argument_year(&json!({"year": 2019})), Some(2019));
        assert_eq!(argument_year(&json!({"year": " 2020 "})), Some(2020));
        assert_eq!(argument_year(&json!({"year": "soon"})), None);
        assert_eq!(argument_year(&json!({})), None);
    }
}
