use std::collections::BTreeMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use crate::error::{AppError, Result};

/// Size presets accepted by every model's `image_size` parameter.
pub const IMAGE_SIZE_PRESETS: &[&str] = &[
    "square_hd",
    "square",
    "portrait_4_3",
    "portrait_16_9",
    "landscape_4_3",
    "landscape_16_9",
];

/// Type-specific schema of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Integer {
        min: Option<i64>,
        max: Option<i64>,
        /// Applied upstream when omitted; never injected here.
        default: Option<i64>,
    },
    Float {
        min: Option<f64>,
        max: Option<f64>,
        default: Option<f64>,
    },
    String {
        options: &'static [&'static str],
        default: Option<&'static str>,
    },
    /// A JSON object. With presets it is a dimensions parameter: one of the
    /// preset strings or `{width, height}`.
    Object {
        presets: &'static [&'static str],
        default: Option<&'static str>,
    },
}

/// Schema of one model parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    #[serde(flatten)]
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
}

impl ParameterSpec {
    fn optional(kind: ParamKind, description: &'static str) -> Self {
        Self {
            kind,
            description,
            required: false,
        }
    }

    /// Checks one value against this schema and returns its normalized form.
    pub fn validate(&self, key: &str, value: &Value) -> Result<Value> {
        match &self.kind {
            ParamKind::Integer { min, max, .. } => {
                let n = as_integer(key, value)?;
                check_range(key, n as f64, min.map(|m| m as f64), max.map(|m| m as f64))?;
                Ok(Value::Number(Number::from(n)))
            }
            ParamKind::Float { min, max, .. } => {
                let f = value
                    .as_f64()
                    .ok_or_else(|| invalid(format!("{} must be a number", key)))?;
                check_range(key, f, *min, *max)?;
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| invalid(format!("{} must be a finite number", key)))
            }
            ParamKind::String { options, .. } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("{} must be a string", key)))?;
                if !options.is_empty() && !options.contains(&s) {
                    return Err(invalid(format!("{} must be one of: {}", key, options.join(", "))));
                }
                Ok(value.clone())
            }
            ParamKind::Object { presets, .. } if !presets.is_empty() => {
                validate_dimensions(key, presets, value)
            }
            ParamKind::Object { .. } => {
                if !value.is_object() {
                    return Err(invalid(format!("{} must be an object", key)));
                }
                Ok(value.clone())
            }
        }
    }
}

fn check_range(key: &str, n: f64, min: Option<f64>, max: Option<f64>) -> Result<()> {
    if let Some(min) = min {
        if n < min {
            return Err(invalid(format!("{} must be at least {}", key, min)));
        }
    }
    if let Some(max) = max {
        if n > max {
            return Err(invalid(format!("{} must be at most {}", key, max)));
        }
    }
    Ok(())
}

fn validate_dimensions(key: &str, presets: &[&str], value: &Value) -> Result<Value> {
    match value {
        Value::String(preset) => {
            if !presets.contains(&preset.as_str()) {
                return Err(invalid(format!(
                    "{} must be one of: {} or an object with width and height",
                    key,
                    presets.join(", ")
                )));
            }
            Ok(value.clone())
        }
        Value::Object(fields) => {
            let (Some(width), Some(height)) = (fields.get("width"), fields.get("height")) else {
                return Err(invalid(format!(
                    "{} object must have both 'width' and 'height' properties",
                    key
                )));
            };

            let mut normalized = fields.clone();
            normalized.insert(
                "width".to_string(),
                Value::from(as_integer(&format!("{}.width", key), width)?),
            );
            normalized.insert(
                "height".to_string(),
                Value::from(as_integer(&format!("{}.height", key), height)?),
            );
            Ok(Value::Object(normalized))
        }
        _ => Err(invalid(format!(
            "{} must be either a string (preset) or an object with width and height",
            key
        ))),
    }
}

/// Accepts a JSON integer, or a float with no fractional part.
fn as_integer(key: &str, value: &Value) -> Result<i64> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => Ok(f as i64),
        _ => Err(invalid(format!("{} must be an integer", key))),
    }
}

fn invalid(message: String) -> AppError {
    AppError::Validation(message)
}

/// A supported generation model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    /// Registry name, without vendor prefix (`flux/schnell`).
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    /// Price of one produced artifact.
    pub cost_per_unit: f64,
    pub parameters: BTreeMap<&'static str, ParameterSpec>,
}

impl ModelSpec {
    /// Validates `params` and returns a normalized copy.
    ///
    /// Keys the schema does not know are passed through untouched.
    pub fn validate(&self, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        for (name, spec) in &self.parameters {
            if spec.required && !params.contains_key(*name) {
                return Err(invalid(format!("{} is required", name)));
            }
        }

        let mut normalized = Map::with_capacity(params.len());
        for (key, value) in params {
            let value = match self.parameters.get(key.as_str()) {
                Some(spec) => spec.validate(key, value)?,
                None => value.clone(),
            };
            normalized.insert(key.clone(), value);
        }

        Ok(normalized)
    }

    /// Cost of `artifacts` produced outputs.
    pub fn cost_for(&self, artifacts: usize) -> f64 {
        self.cost_per_unit * artifacts as f64
    }
}

fn common_parameters(
    guidance_max: f64,
    steps_min: i64,
    steps_max: i64,
    steps_default: i64,
) -> BTreeMap<&'static str, ParameterSpec> {
    BTreeMap::from([
        (
            "image_size",
            ParameterSpec::optional(
                ParamKind::Object {
                    presets: IMAGE_SIZE_PRESETS,
                    default: Some("square_hd"),
                },
                "Image size as preset or custom dimensions object {width: int, height: int}",
            ),
        ),
        (
            "num_images",
            ParameterSpec::optional(
                ParamKind::Integer {
                    min: Some(1),
                    max: Some(4),
                    default: Some(1),
                },
                "Number of images to generate",
            ),
        ),
        (
            "guidance_scale",
            ParameterSpec::optional(
                ParamKind::Float {
                    min: Some(1.0),
                    max: Some(guidance_max),
                    default: Some(7.5),
                },
                "How closely to follow the prompt",
            ),
        ),
        (
            "num_inference_steps",
            ParameterSpec::optional(
                ParamKind::Integer {
                    min: Some(steps_min),
                    max: Some(steps_max),
                    default: Some(steps_default),
                },
                "Number of denoising steps",
            ),
        ),
        (
            "seed",
            ParameterSpec::optional(
                ParamKind::Integer {
                    min: None,
                    max: None,
                    default: None,
                },
                "Random seed for reproducible results",
            ),
        ),
    ])
}

static MODELS: Lazy<BTreeMap<&'static str, ModelSpec>> = Lazy::new(|| {
    [
        ModelSpec {
            name: "flux/schnell",
            display_name: "Flux Schnell",
            description: "Fast, high-quality image generation with Flux model",
            cost_per_unit: 0.003,
            parameters: common_parameters(20.0, 1, 50, 4),
        },
        ModelSpec {
            name: "hidream/hidream-i1-dev",
            display_name: "HiDream I1 Dev",
            description: "High-quality image generation with HiDream model (development version)",
            cost_per_unit: 0.004,
            parameters: common_parameters(20.0, 10, 100, 20),
        },
        ModelSpec {
            name: "hidream/hidream-i1-fast",
            display_name: "HiDream I1 Fast",
            description: "Fast image generation with HiDream model",
            cost_per_unit: 0.003,
            parameters: common_parameters(15.0, 4, 20, 8),
        },
    ]
    .into_iter()
    .map(|model| (model.name, model))
    .collect()
});

/// Looks up a model by registry name.
pub fn get_model(name: &str) -> Option<&'static ModelSpec> {
    MODELS.get(name)
}

/// Looks up a model, failing with a validation error when it is unknown.
pub fn require_model(name: &str) -> Result<&'static ModelSpec> {
    get_model(name).ok_or_else(|| invalid(format!("unsupported model: {}", name)))
}

/// All supported models, sorted by name.
pub fn list_models() -> Vec<&'static ModelSpec> {
    MODELS.values().collect()
}
