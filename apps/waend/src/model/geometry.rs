use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeometryError {
    #[error("geometry must be a JSON object")]
    NotAnObject,
    #[error("geometry is missing its type")]
    MissingType,
    #[error("geometry of type {0} has no coordinates")]
    MissingCoordinates(String),
}

/// A GeoJSON geometry document, kept as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    value: Value,
}

impl Geometry {
    /// Accepts a bare geometry or a GeoJSON `Feature` wrapping one.
    pub fn from_value(value: Value) -> Result<Self, GeometryError> {
        let object = value.as_object().ok_or(GeometryError::NotAnObject)?;
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(GeometryError::MissingType)?;
        if kind == "Feature" {
            let inner = object
                .get("geometry")
                .cloned()
                .ok_or(GeometryError::MissingType)?;
            return Self::from_value(inner);
        }
        let has_payload = match kind {
            "GeometryCollection" => object.get("geometries").is_some_and(Value::is_array),
            _ => object.get("coordinates").is_some_and(Value::is_array),
        };
        if !has_payload {
            return Err(GeometryError::MissingCoordinates(kind.to_string()));
        }
        Ok(Self { value })
    }

    pub fn geometry_type(&self) -> &str {
        self.value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn to_geojson(&self) -> Value {
        self.value.clone()
    }

    pub fn extent(&self) -> Option<Extent> {
        let mut extent: Option<Extent> = None;
        collect_positions(&self.value, &mut extent);
        extent
    }
}

fn collect_positions(geometry: &Value, extent: &mut Option<Extent>) {
    if let Some(children) = geometry.get("geometries").and_then(Value::as_array) {
        for child in children {
            collect_positions(child, extent);
        }
        return;
    }
    if let Some(coordinates) = geometry.get("coordinates") {
        walk_coordinates(coordinates, extent);
    }
}

fn walk_coordinates(node: &Value, extent: &mut Option<Extent>) {
    let Some(items) = node.as_array() else {
        return;
    };
    let first = items.first().and_then(Value::as_f64);
    let second = items.get(1).and_then(Value::as_f64);
    let position = match (first, second) {
        (Some(x), Some(y)) => Some((x, y)),
        _ => None,
    };
    match position {
        Some((x, y)) => match extent {
            Some(current) => current.add_point(x, y),
            None => *extent = Some(Extent::new(x, y, x, y)),
        },
        None => {
            for item in items {
                walk_coordinates(item, extent);
            }
        }
    }
}

/// Bounding box as `[min_x, min_y, max_x, max_y]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
        .normalize()
    }

    /// Reads a `[minx, miny, maxx, maxy]` JSON array.
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() != 4 {
            return None;
        }
        let mut nums = [0.0; 4];
        for (slot, item) in nums.iter_mut().zip(items) {
            *slot = item.as_f64()?;
        }
        Some(Self::new(nums[0], nums[1], nums[2], nums[3]))
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn normalize(self) -> Self {
        Self {
            min_x: self.min_x.min(self.max_x),
            min_y: self.min_y.min(self.max_y),
            max_x: self.min_x.max(self.max_x),
            max_y: self.min_y.max(self.max_y),
        }
    }

    pub fn add_point(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }
}
