use crate::switch_linking::error::TransformError;
use crate::switch_linking::model::{LAYOUT_SRID, Srid, WGS_84_SRID};
use geo::{Coord, coord};
use serde::{Deserialize, Serialize};

/// Converts points between coordinate reference systems.
pub trait CoordinateTransform {
    fn transform(&self, point: Coord<f64>, from: Srid, to: Srid) -> Result<Coord<f64>, TransformError>;
}

/// Equirectangular local tangent plane standing in for the layout projection around a
/// chosen origin. Accurate to a few centimetres over the extent of a station yard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TangentPlaneTransform {
    origin_lon: f64,
    origin_lat: f64,
    /// Layout coordinate of the origin
    origin_easting: f64,
    origin_northing: f64,
}

impl TangentPlaneTransform {
    const EARTH_RADIUS: f64 = 6_371_007.2;

    pub fn new(origin_lon: f64, origin_lat: f64, origin_easting: f64, origin_northing: f64) -> Self {
        Self {
            origin_lon,
            origin_lat,
            origin_easting,
            origin_northing,
        }
    }

    fn cos_lat0(&self) -> f64 {
        self.origin_lat.to_radians().cos()
    }

    fn project(&self, lon: f64, lat: f64) -> Coord<f64> {
        let dlon = (lon - self.origin_lon).to_radians();
        let dlat = (lat - self.origin_lat).to_radians();
        coord! {
            x: self.origin_easting + Self::EARTH_RADIUS * self.cos_lat0() * dlon,
            y: self.origin_northing + Self::EARTH_RADIUS * dlat,
        }
    }

    fn unproject(&self, x: f64, y: f64) -> Coord<f64> {
        let dlon = (x - self.origin_easting) / (Self::EARTH_RADIUS * self.cos_lat0());
        let dlat = (y - self.origin_northing) / Self::EARTH_RADIUS;
        coord! {
            x: self.origin_lon + dlon.to_degrees(),
            y: self.origin_lat + dlat.to_degrees(),
        }
    }
}

impl Default for TangentPlaneTransform {
    /// Helsinki central station at its TM35FIN position
    fn default() -> Self {
        Self::new(24.941, 60.171, 385_820.0, 6_672_300.0)
    }
}

impl CoordinateTransform for TangentPlaneTransform {
    fn transform(&self, point: Coord<f64>, from: Srid, to: Srid) -> Result<Coord<f64>, TransformError> {
        if from == to {
            return Ok(point);
        }
        match (from, to) {
            (WGS_84_SRID, LAYOUT_SRID) => {
                if !(-180.0..=180.0).contains(&point.x) || !(-90.0..=90.0).contains(&point.y) {
                    return Err(TransformError::OutOfBounds {
                        x: point.x,
                        y: point.y,
                        srid: from,
                    });
                }
                Ok(self.project(point.x, point.y))
            }
            (LAYOUT_SRID, WGS_84_SRID) => Ok(self.unproject(point.x, point.y)),
            _ => Err(TransformError::Unsupported { from, to }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_maps_to_false_origin() {
        let t = TangentPlaneTransform::default();
        let p = t
            .transform(coord! { x: 24.941, y: 60.171 }, WGS_84_SRID, LAYOUT_SRID)
            .expect("transform");
        assert!((p.x - 385_820.0).abs() < 1e-6);
        assert!((p.y - 6_672_300.0).abs() < 1e-6);
    }

    #[test]
    fn test_projection_round_trips() {
        let t = TangentPlaneTransform::default();
        let wgs = coord! { x: 24.95, y: 60.18 };
        let layout = t.transform(wgs, WGS_84_SRID, LAYOUT_SRID).expect("forward");
        let back = t.transform(layout, LAYOUT_SRID, WGS_84_SRID).expect("back");
        assert!((back.x - wgs.x).abs() < 1e-9);
        assert!((back.y - wgs.y).abs() < 1e-9);
        // a thousandth of a degree of latitude is about 111 m
        let north = t
            .transform(coord! { x: 24.941, y: 60.172 }, WGS_84_SRID, LAYOUT_SRID)
            .expect("north");
        assert!((north.y - 6_672_300.0 - 111.2).abs() < 0.1);
    }

    #[test]
    fn test_unsupported_and_out_of_bounds() {
        let t = TangentPlaneTransform::default();
        assert!(matches!(
            t.transform(coord! { x: 0.0, y: 0.0 }, Srid(2393), LAYOUT_SRID),
            Err(TransformError::Unsupported { .. })
        ));
        assert!(matches!(
            t.transform(coord! { x: 24.0, y: 95.0 }, WGS_84_SRID, LAYOUT_SRID),
            Err(TransformError::OutOfBounds { .. })
        ));
        let same = t
            .transform(coord! { x: 1.0, y: 2.0 }, Srid(2393), Srid(2393))
            .expect("identity");
        assert_eq!(same, coord! { x: 1.0, y: 2.0 });
    }
}
