//! Great-circle distance between two coordinates

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{BoxError, ToolOutput, ToolTrait};

/// Mean Earth radius in kilometres
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
struct DistanceArgs {
    point1: Point,
    point2: Point,
    #[serde(default = "default_precision")]
    precision: u32,
}

fn default_precision() -> u32 {
    2
}

/// Haversine distance in kilometres
pub fn haversine_km(a: Point, b: Point) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lon - a.lon).to_radians();

    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision.min(10) as i32);
    (value * factor).round() / factor
}

/// Distance tool
pub struct DistanceTool;

#[async_trait]
impl ToolTrait for DistanceTool {
    fn name(&self) -> &str {
        "distance"
    }

    fn description(&self) -> &str {
        "Calculates the distance between two geographical points in kilometers."
    }

    fn parameters(&self) -> Value {
        let point = |which: &str, example: (f64, f64)| {
            json!({
                "type": "object",
                "properties": {
                    "lat": {
                        "type": "number",
                        "description": format!("Latitude of the {} point as a number. (e.g. {})", which, example.0)
                    },
                    "lon": {
                        "type": "number",
                        "description": format!("Longitude of the {} point as a number. (e.g. {})", which, example.1)
                    }
                },
                "required": ["lat", "lon"]
            })
        };

        json!({
            "type": "object",
            "properties": {
                "point1": point("first", (52.52, 13.405)),
                "point2": point("second", (48.8566, 2.3522)),
                "precision": {
                    "type": "integer",
                    "description": "Number of decimal places to round the distance to. Default is 2."
                }
            },
            "required": ["point1", "point2"]
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutput, BoxError> {
        let args: DistanceArgs = serde_json::from_value(Value::Object(args))?;
        let km = round_to(haversine_km(args.point1, args.point2), args.precision);
        Ok(ToolOutput::text(km.to_string()))
    }
}
