//! Objects placed on a project's canvas.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{EntityId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasObjectType {
    Image,
    Text,
    Shape,
}

impl CanvasObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Text => "text",
            Self::Shape => "shape",
        }
    }
}

impl FromStr for CanvasObjectType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "text" => Ok(Self::Text),
            "shape" => Ok(Self::Shape),
            other => Err(CoreError::UnknownObjectType(other.to_string())),
        }
    }
}

impl fmt::Display for CanvasObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A positioned object on a canvas.
///
/// Every object belongs to exactly one project. Position and size
/// reported by the server after a successful write are authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasObject {
    pub id: EntityId,
    pub project_id: EntityId,
    #[serde(rename = "type")]
    pub kind: CanvasObjectType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees.
    pub rotation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// Free-form rendering properties (fill, font, text, ...).
    #[serde(default)]
    pub props: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
}

impl CanvasObject {
    /// Create an object with a client-generated id at the given bounds.
    pub fn new(
        project_id: EntityId,
        kind: CanvasObjectType,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            project_id,
            kind,
            x,
            y,
            width,
            height,
            rotation: 0.0,
            src: None,
            props: serde_json::Map::new(),
            updated_at: None,
        }
    }

    pub fn image(project_id: EntityId, src: impl Into<String>, width: f64, height: f64) -> Self {
        let mut obj = Self::new(project_id, CanvasObjectType::Image, 0.0, 0.0, width, height);
        obj.src = Some(src.into());
        obj
    }

    pub fn text(project_id: EntityId, text: impl Into<String>, x: f64, y: f64) -> Self {
        let mut obj = Self::new(project_id, CanvasObjectType::Text, x, y, 200.0, 40.0);
        obj.props
            .insert("text".into(), serde_json::Value::String(text.into()));
        obj
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.x = x;
        self.y = y;
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.width = width;
        self.height = height;
    }

    /// Reject geometry the canvas cannot render.
    pub fn validate(&self) -> Result<(), CoreError> {
        let coords = [self.x, self.y, self.width, self.height, self.rotation];
        if coords.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Validation(format!(
                "canvas object {} has non-finite geometry",
                self.id
            )));
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(CoreError::Validation(format!(
                "canvas object {} has negative size {}x{}",
                self.id, self.width, self.height
            )));
        }
        if self.kind == CanvasObjectType::Image && self.src.is_none() {
            return Err(CoreError::Validation(format!(
                "image object {} has no src",
                self.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> EntityId {
        uuid::Uuid::new_v4()
    }

    #[test]
    fn image_requires_src() {
        let mut obj = CanvasObject::image(project(), "https://cdn.example/a.png", 512.0, 512.0);
        assert!(obj.validate().is_ok());
        obj.src = None;
        assert!(matches!(obj.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn negative_size_is_rejected() {
        let mut obj = CanvasObject::text(project(), "Summer sale", 10.0, 10.0);
        obj.resize(-1.0, 40.0);
        assert!(obj.validate().is_err());
    }

    #[test]
    fn nan_position_is_rejected() {
        let mut obj = CanvasObject::text(project(), "Headline", 0.0, 0.0);
        obj.move_to(f64::NAN, 3.0);
        assert!(obj.validate().is_err());
    }

    #[test]
    fn text_objects_carry_text_prop() {
        let obj = CanvasObject::text(project(), "Buy now", 1.0, 2.0);
        assert_eq!(obj.props["text"], "Buy now");
        assert_eq!(obj.kind, CanvasObjectType::Text);
    }

    #[test]
    fn object_type_round_trips_wire_names() {
        for kind in [
            CanvasObjectType::Image,
            CanvasObjectType::Text,
            CanvasObjectType::Shape,
        ] {
            assert_eq!(kind.as_str().parse::<CanvasObjectType>().unwrap(), kind);
        }
        assert!("video".parse::<CanvasObjectType>().is_err());
    }
}
