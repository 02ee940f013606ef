//! Vector overlay scene
//!
//! A scene is a JSON document produced by the canvas client:
//!
//! ```json
//! { "version": "1", "objects": [ { "type": "rect", "left": 10, ... } ], "background": "#fff" }
//! ```
//!
//! Objects of a known kind are parsed into [`SceneObject`]. Anything else is
//! kept verbatim as [`SceneItem::Opaque`] so newer clients can round-trip
//! object kinds this engine does not understand. Coordinates may be negative
//! (objects can hang off the canvas edge); sizes, stroke widths and font sizes
//! may not.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Format version written into new scenes
pub const SCENE_FORMAT_VERSION: &str = "1";

/// Object kinds with a typed representation
pub const KNOWN_KINDS: [&str; 6] = ["path", "text", "rect", "circle", "line", "triangle"];

/// Opaque-object keys scaled along the x axis on resize
const OPAQUE_X_KEYS: [&str; 5] = ["left", "width", "x1", "x2", "rx"];
/// Opaque-object keys scaled along the y axis on resize
const OPAQUE_Y_KEYS: [&str; 5] = ["top", "height", "y1", "y2", "ry"];
/// Opaque-object keys scaled by the smaller of the two factors
const OPAQUE_UNIFORM_KEYS: [&str; 2] = ["strokeWidth", "fontSize"];

/// Structural problems with a scene payload
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("scene is not a valid document: {0}")]
    Malformed(String),

    #[error("scene object {index} is invalid: {reason}")]
    InvalidObject { index: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Presentation attributes shared by every object kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    /// Client attributes this engine does not interpret (angle, scaleX, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A vector object of a known kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SceneObject {
    Path {
        points: Vec<Point>,
        #[serde(flatten)]
        style: Style,
    },
    Text {
        left: f64,
        top: f64,
        text: String,
        #[serde(rename = "fontSize")]
        font_size: f64,
        #[serde(flatten)]
        style: Style,
    },
    Rect {
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        #[serde(flatten)]
        style: Style,
    },
    Circle {
        left: f64,
        top: f64,
        radius: f64,
        #[serde(flatten)]
        style: Style,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[serde(flatten)]
        style: Style,
    },
    Triangle {
        left: f64,
        top: f64,
        width: f64,
        height: f64,
        #[serde(flatten)]
        style: Style,
    },
}

impl SceneObject {
    pub fn kind(&self) -> &'static str {
        match self {
            SceneObject::Path { .. } => "path",
            SceneObject::Text { .. } => "text",
            SceneObject::Rect { .. } => "rect",
            SceneObject::Circle { .. } => "circle",
            SceneObject::Line { .. } => "line",
            SceneObject::Triangle { .. } => "triangle",
        }
    }

    pub fn style(&self) -> &Style {
        match self {
            SceneObject::Path { style, .. }
            | SceneObject::Text { style, .. }
            | SceneObject::Rect { style, .. }
            | SceneObject::Circle { style, .. }
            | SceneObject::Line { style, .. }
            | SceneObject::Triangle { style, .. } => style,
        }
    }

    fn style_mut(&mut self) -> &mut Style {
        match self {
            SceneObject::Path { style, .. }
            | SceneObject::Text { style, .. }
            | SceneObject::Rect { style, .. }
            | SceneObject::Circle { style, .. }
            | SceneObject::Line { style, .. }
            | SceneObject::Triangle { style, .. } => style,
        }
    }

    fn validate(&self) -> Result<(), String> {
        let coords: Vec<(&str, f64)> = match self {
            SceneObject::Path { points, .. } => points
                .iter()
                .flat_map(|p| [("x", p.x), ("y", p.y)])
                .collect(),
            SceneObject::Text { left, top, .. }
            | SceneObject::Rect { left, top, .. }
            | SceneObject::Circle { left, top, .. }
            | SceneObject::Triangle { left, top, .. } => vec![("left", *left), ("top", *top)],
            SceneObject::Line { x1, y1, x2, y2, .. } => {
                vec![("x1", *x1), ("y1", *y1), ("x2", *x2), ("y2", *y2)]
            }
        };
        for (name, value) in coords {
            if !value.is_finite() {
                return Err(format!("{} {} is not a finite number", self.kind(), name));
            }
        }

        let sizes: Vec<(&str, f64)> = match self {
            SceneObject::Text { font_size, .. } => vec![("fontSize", *font_size)],
            SceneObject::Rect { width, height, .. } | SceneObject::Triangle { width, height, .. } => {
                vec![("width", *width), ("height", *height)]
            }
            SceneObject::Circle { radius, .. } => vec![("radius", *radius)],
            SceneObject::Path { .. } | SceneObject::Line { .. } => Vec::new(),
        };
        for (name, value) in sizes {
            check_size(self.kind(), name, value)?;
        }

        let style = self.style();
        if let Some(width) = style.stroke_width {
            check_size(self.kind(), "strokeWidth", width)?;
        }
        if let Some(opacity) = style.opacity {
            if !(0.0..=1.0).contains(&opacity) {
                return Err(format!("{} opacity {} is outside 0..=1", self.kind(), opacity));
            }
        }
        Ok(())
    }

    /// Copy with x-axis geometry multiplied by `sx`, y-axis by `sy`, and
    /// stroke width, font size and radius by the smaller factor
    pub fn scaled(&self, sx: f64, sy: f64) -> SceneObject {
        let uniform = sx.min(sy);
        let mut scaled = match self.clone() {
            SceneObject::Path { points, style } => SceneObject::Path {
                points: points
                    .into_iter()
                    .map(|p| Point { x: p.x * sx, y: p.y * sy })
                    .collect(),
                style,
            },
            SceneObject::Text { left, top, text, font_size, style } => SceneObject::Text {
                left: left * sx,
                top: top * sy,
                text,
                font_size: font_size * uniform,
                style,
            },
            SceneObject::Rect { left, top, width, height, style } => SceneObject::Rect {
                left: left * sx,
                top: top * sy,
                width: width * sx,
                height: height * sy,
                style,
            },
            SceneObject::Circle { left, top, radius, style } => SceneObject::Circle {
                left: left * sx,
                top: top * sy,
                radius: radius * uniform,
                style,
            },
            SceneObject::Line { x1, y1, x2, y2, style } => SceneObject::Line {
                x1: x1 * sx,
                y1: y1 * sy,
                x2: x2 * sx,
                y2: y2 * sy,
                style,
            },
            SceneObject::Triangle { left, top, width, height, style } => SceneObject::Triangle {
                left: left * sx,
                top: top * sy,
                width: width * sx,
                height: height * sy,
                style,
            },
        };
        let style = scaled.style_mut();
        style.stroke_width = style.stroke_width.map(|w| w * uniform);
        scaled
    }
}

fn check_size(kind: &str, name: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() {
        Err(format!("{} {} is not a finite number", kind, name))
    } else if value < 0.0 {
        Err(format!("{} {} must not be negative (got {})", kind, name, value))
    } else {
        Ok(())
    }
}

/// One entry of `Scene::objects`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SceneItem {
    Known(SceneObject),
    /// Object of a kind this engine does not model, preserved verbatim
    Opaque(Value),
}

impl SceneItem {
    fn validate(&self) -> Result<(), String> {
        match self {
            SceneItem::Known(object) => object.validate(),
            SceneItem::Opaque(value) => {
                let Some(map) = value.as_object() else {
                    return Err("object must be a JSON object".to_string());
                };
                match map.get("type").and_then(Value::as_str) {
                    Some(kind) if KNOWN_KINDS.contains(&kind) => {
                        Err(format!("malformed {} object", kind))
                    }
                    Some(_) => Ok(()),
                    None => Err("object has no string \"type\"".to_string()),
                }
            }
        }
    }

    fn scaled(&self, sx: f64, sy: f64) -> SceneItem {
        match self {
            SceneItem::Known(object) => SceneItem::Known(object.scaled(sx, sy)),
            SceneItem::Opaque(value) => {
                let mut value = value.clone();
                if let Some(map) = value.as_object_mut() {
                    scale_keys(map, &OPAQUE_X_KEYS, sx);
                    scale_keys(map, &OPAQUE_Y_KEYS, sy);
                    scale_keys(map, &OPAQUE_UNIFORM_KEYS, sx.min(sy));
                }
                SceneItem::Opaque(value)
            }
        }
    }
}

fn scale_keys(map: &mut Map<String, Value>, keys: &[&str], factor: f64) {
    for key in keys {
        if let Some(n) = map.get(*key).and_then(Value::as_f64) {
            if let Some(scaled) = serde_json::Number::from_f64(n * factor) {
                map.insert((*key).to_string(), Value::Number(scaled));
            }
        }
    }
}

fn default_scene_version() -> String {
    SCENE_FORMAT_VERSION.to_string()
}

/// Ordered set of overlay objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default = "default_scene_version")]
    pub version: String,
    #[serde(default)]
    pub objects: Vec<SceneItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::empty()
    }
}

impl Scene {
    pub fn empty() -> Self {
        Self {
            version: default_scene_version(),
            objects: Vec::new(),
            background: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Parse and validate a stored or submitted scene
    pub fn from_json(json: &str) -> Result<Scene, SceneError> {
        let scene: Scene =
            serde_json::from_str(json).map_err(|e| SceneError::Malformed(e.to_string()))?;
        scene.validate()?;
        Ok(scene)
    }

    /// Parse and validate a scene already decoded into JSON values
    pub fn from_value(value: Value) -> Result<Scene, SceneError> {
        let scene: Scene =
            serde_json::from_value(value).map_err(|e| SceneError::Malformed(e.to_string()))?;
        scene.validate()?;
        Ok(scene)
    }

    pub fn to_json(&self) -> Result<String, SceneError> {
        serde_json::to_string(self).map_err(|e| SceneError::Malformed(e.to_string()))
    }

    /// Check every object; the first offending object fails the whole scene
    pub fn validate(&self) -> Result<(), SceneError> {
        for (index, item) in self.objects.iter().enumerate() {
            item.validate()
                .map_err(|reason| SceneError::InvalidObject { index, reason })?;
        }
        Ok(())
    }

    /// Rescale every object for a raster resized by (`sx`, `sy`)
    pub fn scaled(&self, sx: f64, sy: f64) -> Scene {
        Scene {
            version: self.version.clone(),
            objects: self.objects.iter().map(|item| item.scaled(sx, sy)).collect(),
            background: self.background.clone(),
        }
    }
}
