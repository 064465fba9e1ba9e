//! Weather tool — stub that returns mock forecast data.
//!
//! In production this would call a real weather API. The stub derives
//! plausible conditions from a hash of the city name and requested date,
//! so repeated calls agree with each other.

use async_trait::async_trait;
use prism_core::{Tool, ToolError, ToolResult};

pub struct WeatherTool;

#[async_trait]
impl Tool for WeatherTool {
    fn id(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Look up the weather forecast for a city. Returns temperature, conditions, humidity, and rain probability."
    }

    fn category(&self) -> &str {
        "information"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "The city to look up the forecast for"
                },
                "date": {
                    "type": "string",
                    "description": "Which day: 'today' or 'tomorrow' (default: today)",
                    "default": "today"
                }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, parameters: serde_json::Value) -> Result<ToolResult, ToolError> {
        let city = parameters["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParameters {
                tool: "weather".into(),
                reason: "missing 'city' argument".into(),
            })?;
        let date = parameters["date"].as_str().unwrap_or("today");

        let forecast = mock_forecast(city, date);
        let output = format!(
            "{}: {} in {}, {}°C, humidity {}%, rain probability {}%",
            date, forecast.conditions, city, forecast.temperature_c, forecast.humidity,
            forecast.rain_probability
        );

        Ok(ToolResult::ok(
            output,
            Some(serde_json::to_value(&forecast).map_err(|e| ToolError::ExecutionFailed {
                tool: "weather".into(),
                reason: e.to_string(),
            })?),
        ))
    }
}

#[derive(serde::Serialize)]
struct Forecast {
    city: String,
    date: String,
    temperature_c: i32,
    conditions: String,
    humidity: u32,
    rain_probability: u32,
}

/// Deterministic mock forecast from a hash of city + date.
fn mock_forecast(city: &str, date: &str) -> Forecast {
    let hash: u32 = format!("{city}/{date}")
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let conditions = [
        "Clear skies",
        "Partly cloudy",
        "Overcast",
        "Light rain",
        "Heavy rain",
        "Thunderstorms",
    ];

    Forecast {
        city: city.to_string(),
        date: date.to_string(),
        temperature_c: 18 + (hash % 18) as i32,
        conditions: conditions[(hash as usize / 5) % conditions.len()].to_string(),
        humidity: 40 + (hash % 55),
        rain_probability: hash.rotate_left(7) % 100,
    }
}
