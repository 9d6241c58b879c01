//! The `Pose` record and the names that come with it.
//!
//! These mirror the IDL-generated contract the subscriber is built against:
//! the type, its topic name and the QoS library/profile that configure it.

use crate::types::{FieldKind, FieldValue, TopicType, TypeSchema};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic carrying `Pose` samples.
pub const POSE_TOPIC_NAME: &str = "Example acme::Pose";

/// QoS library holding the subscriber profile.
pub const QOS_LIBRARY: &str = "MyQosLibrary";

/// Profile used for every entity of the subscriber.
pub const QOS_PROFILE: &str = "MyQosProfile";

/// Default location of the profile document.
pub const QOS_PROFILES_URI: &str = "file://MY_QOS_PROFILES.json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            w: 1.0,
        }
    }
}

/// Position and orientation of a tracked object, keyed by `object_id`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub object_id: String,
    pub position: Point,
    pub orientation: Quaternion,
}

impl Pose {
    pub fn at(object_id: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            object_id: object_id.into(),
            position: Point { x, y, z },
            orientation: Quaternion::default(),
        }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[object_id: {}, position: ({}, {}, {}), orientation: ({}, {}, {}, {})]",
            self.object_id,
            self.position.x,
            self.position.y,
            self.position.z,
            self.orientation.x,
            self.orientation.y,
            self.orientation.z,
            self.orientation.w
        )
    }
}

impl TopicType for Pose {
    const TYPE_NAME: &'static str = "acme::Pose";

    fn schema() -> TypeSchema {
        TypeSchema::new()
            .field("object_id", FieldKind::Text)
            .field("position.x", FieldKind::Numeric)
            .field("position.y", FieldKind::Numeric)
            .field("position.z", FieldKind::Numeric)
            .field("orientation.x", FieldKind::Numeric)
            .field("orientation.y", FieldKind::Numeric)
            .field("orientation.z", FieldKind::Numeric)
            .field("orientation.w", FieldKind::Numeric)
    }

    fn field(&self, path: &str) -> Option<FieldValue> {
        let value = match path {
            "object_id" => return Some(FieldValue::Text(self.object_id.clone())),
            "position.x" => self.position.x,
            "position.y" => self.position.y,
            "position.z" => self.position.z,
            "orientation.x" => self.orientation.x,
            "orientation.y" => self.orientation.y,
            "orientation.z" => self.orientation.z,
            "orientation.w" => self.orientation.w,
            _ => return None,
        };
        Some(FieldValue::Numeric(value))
    }

    fn key(&self) -> Vec<u8> {
        self.object_id.as_bytes().to_vec()
    }
}
