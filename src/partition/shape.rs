// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Selection shapes and the in-scope test for chunks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Shape of a generation selection.
///
/// Unrecognized names are kept verbatim (the engine may understand them) but
/// are treated as a square when deciding which chunks are in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Shape {
    #[default]
    Square,
    Rectangle,
    Circle,
    Ellipse,
    Diamond,
    Other(String),
}

impl Shape {
    /// Name as used on the wire and by the engine.
    pub fn as_str(&self) -> &str {
        match self {
            Shape::Square => "square",
            Shape::Rectangle => "rectangle",
            Shape::Circle => "circle",
            Shape::Ellipse => "ellipse",
            Shape::Diamond => "diamond",
            Shape::Other(name) => name,
        }
    }

    /// Whether the offset `(dx, dz)` from the center chunk lies inside the
    /// shape with the given chunk radius.
    pub fn contains(&self, dx: i64, dz: i64, radius: i64) -> bool {
        match self {
            Shape::Circle | Shape::Ellipse => {
                let distance = ((dx * dx + dz * dz) as f64).sqrt();
                distance <= radius as f64
            }
            Shape::Diamond => dx.abs() + dz.abs() <= radius,
            Shape::Square | Shape::Rectangle | Shape::Other(_) => {
                dx.abs() <= radius && dz.abs() <= radius
            }
        }
    }
}

impl From<&str> for Shape {
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "square" => Shape::Square,
            "rectangle" => Shape::Rectangle,
            "circle" => Shape::Circle,
            "ellipse" => Shape::Ellipse,
            "diamond" => Shape::Diamond,
            _ => Shape::Other(name.to_string()),
        }
    }
}

impl From<String> for Shape {
    fn from(name: String) -> Self {
        Shape::from(name.as_str())
    }
}

impl From<Shape> for String {
    fn from(shape: Shape) -> Self {
        shape.as_str().to_string()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(Shape::from("Circle"), Shape::Circle);
        assert_eq!(Shape::from("DIAMOND"), Shape::Diamond);
        assert_eq!(Shape::from("star"), Shape::Other("star".to_string()));
    }

    #[test]
    fn test_square_contains_corners() {
        assert!(Shape::Square.contains(4, -4, 4));
        assert!(!Shape::Square.contains(5, 0, 4));
    }

    #[test]
    fn test_circle_excludes_corners() {
        assert!(Shape::Circle.contains(4, 0, 4));
        assert!(!Shape::Circle.contains(4, 4, 4));
        assert!(Shape::Circle.contains(2, 3, 4));
    }

    #[test]
    fn test_diamond_uses_manhattan_distance() {
        assert!(Shape::Diamond.contains(2, -2, 4));
        assert!(!Shape::Diamond.contains(3, 2, 4));
    }

    #[test]
    fn test_unknown_shape_behaves_as_square() {
        let star = Shape::from("star");
        assert!(star.contains(4, 4, 4));
        assert!(!star.contains(5, 4, 4));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Shape::Diamond).unwrap();
        assert_eq!(json, "\"diamond\"");
        let shape: Shape = serde_json::from_str("\"pentagon\"").unwrap();
        assert_eq!(shape.as_str(), "pentagon");
    }
}
