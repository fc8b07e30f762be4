//! GeoJSON shapes exchanged with the engine and handed to map renderers.

use crate::{LandUse, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Meters per degree of latitude, used to size synthesized cell squares.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

// ============================================================================
// PROJECT BOUNDARY
// ============================================================================

/// Project boundary as supplied by the caller (GeoJSON).
///
/// Accepted shapes: a `Polygon`/`MultiPolygon` geometry, a `Feature` wrapping
/// one, or a `FeatureCollection` with at least one polygonal feature. The
/// value is forwarded to the engine untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Boundary(Value);

impl Boundary {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Compact JSON string for command-line transport.
    pub fn to_json_string(&self) -> String {
        self.0.to_string()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_geojson(&self.0, "boundary")
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn validate_geojson(value: &Value, field: &str) -> Result<(), ValidationError> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(field, "GeoJSON object without a 'type'"))?;

    match kind {
        "Polygon" => validate_polygon_rings(value.get("coordinates"), field),
        "MultiPolygon" => {
            let polygons = value
                .get("coordinates")
                .and_then(Value::as_array)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| invalid(field, "MultiPolygon has no polygons"))?;
            polygons
                .iter()
                .try_for_each(|rings| validate_polygon_rings(Some(rings), field))
        }
        "Feature" => {
            let geometry = value
                .get("geometry")
                .filter(|g| !g.is_null())
                .ok_or_else(|| invalid(field, "Feature has no geometry"))?;
            validate_geojson(geometry, field)
        }
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| invalid(field, "FeatureCollection has no features"))?;
            features
                .iter()
                .try_for_each(|feature| validate_geojson(feature, field))
        }
        other => Err(invalid(
            field,
            format!("expected a polygonal GeoJSON object, got '{}'", other),
        )),
    }
}

fn validate_polygon_rings(coordinates: Option<&Value>, field: &str) -> Result<(), ValidationError> {
    let rings = coordinates
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| invalid(field, "Polygon has no rings"))?;

    for ring in rings {
        let positions = ring
            .as_array()
            .ok_or_else(|| invalid(field, "Polygon ring is not an array"))?;
        if positions.len() < 4 {
            return Err(invalid(
                field,
                format!("Polygon ring needs at least 4 positions, got {}", positions.len()),
            ));
        }
        let numeric = positions.iter().all(|p| {
            p.as_array()
                .map(|xy| xy.len() >= 2 && xy.iter().take(2).all(Value::is_number))
                .unwrap_or(false)
        });
        if !numeric {
            return Err(invalid(field, "Polygon ring contains a non-numeric position"));
        }
    }
    Ok(())
}

// ============================================================================
// ZONING POLYGONS
// ============================================================================

/// Closed polygon ring(s) in lon/lat order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl PolygonGeometry {
    /// Axis-aligned square around a center point, closed (first == last).
    pub fn square(lon: f64, lat: f64, half_width_deg: f64) -> Self {
        let (w, e) = (lon - half_width_deg, lon + half_width_deg);
        let (s, n) = (lat - half_width_deg, lat + half_width_deg);
        Self {
            kind: "Polygon".to_string(),
            coordinates: vec![vec![[w, s], [e, s], [e, n], [w, n], [w, s]]],
        }
    }
}

/// Properties attached to a single synthesized zone cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneProperties {
    pub cell_id: String,
    pub land_use: LandUse,
    pub suitability: f64,
    pub slope: f64,
    pub color: String,
    pub area_m2: f64,
    pub area_ha: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoningFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PolygonGeometry,
    pub properties: ZoneProperties,
}

impl ZoningFeature {
    pub fn new(geometry: PolygonGeometry, properties: ZoneProperties) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry,
            properties,
        }
    }
}

/// Map-ready collection of per-cell zone polygons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoningPolygons {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<ZoningFeature>,
}

impl ZoningPolygons {
    pub fn new(features: Vec<ZoningFeature>) -> Self {
        Self {
            kind: "FeatureCollection".to_string(),
            features,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

impl Default for ZoningPolygons {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square_polygon() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
        })
    }

    #[test]
    fn test_boundary_accepts_polygon_feature_and_collection() {
        assert!(Boundary::new(square_polygon()).validate().is_ok());

        let feature = json!({"type": "Feature", "properties": {}, "geometry": square_polygon()});
        assert!(Boundary::new(feature.clone()).validate().is_ok());

        let collection = json!({"type": "FeatureCollection", "features": [feature]});
        assert!(Boundary::new(collection).validate().is_ok());

        let multi = json!({
            "type": "MultiPolygon",
            "coordinates": [square_polygon()["coordinates"].clone()]
        });
        assert!(Boundary::new(multi).validate().is_ok());
    }

    #[test]
    fn test_boundary_rejects_points_and_degenerate_rings() {
        let point = json!({"type": "Point", "coordinates": [0.0, 0.0]});
        assert!(Boundary::new(point).validate().is_err());

        let open = json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0]]]});
        assert!(Boundary::new(open).validate().is_err());

        let empty = json!({"type": "FeatureCollection", "features": []});
        assert!(Boundary::new(empty).validate().is_err());

        assert!(Boundary::new(json!("not geojson")).validate().is_err());
    }

    #[test]
    fn test_square_is_closed_and_centered() {
        let square = PolygonGeometry::square(10.0, 20.0, 0.5);
        let ring = &square.coordinates[0];
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        assert_eq!(ring[0], [9.5, 19.5]);
        assert_eq!(ring[2], [10.5, 20.5]);
    }

    #[test]
    fn test_zoning_polygons_serialize_as_feature_collection() {
        let feature = ZoningFeature::new(
            PolygonGeometry::square(0.0, 0.0, 0.001),
            ZoneProperties {
                cell_id: "7".to_string(),
                land_use: LandUse::GreenSpace,
                suitability: 0.9,
                slope: 2.5,
                color: "#4CAF50".to_string(),
                area_m2: 10_000.0,
                area_ha: 1.0,
            },
        );
        let json = serde_json::to_value(ZoningPolygons::new(vec![feature])).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["features"][0]["type"], "Feature");
        assert_eq!(json["features"][0]["geometry"]["type"], "Polygon");
        assert_eq!(json["features"][0]["properties"]["landUse"], "green_space");
        assert_eq!(json["features"][0]["properties"]["areaHa"], 1.0);
    }
}
