//! Opaque handles over the projection engine.
//!
//! Projection math is delegated to `proj4rs`, a pure-Rust port of PROJ. EPSG
//! definitions are embedded at compile time (the `crs-definitions` feature), so no
//! process-wide resource directory has to be configured before the first transform.

use std::sync::Arc;

use proj4rs::proj::Proj;

use crate::errors::Error;

/// A coordinate reference system identified by an EPSG code, e.g. `"epsg:3857"`.
#[derive(Clone)]
pub struct Crs {
    name: String,
    code: u16,
    proj: Arc<Proj>,
    is_latlong: bool,
}

impl std::fmt::Debug for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Crs").field(&self.name).finish()
    }
}

impl Crs {
    /// Parses identifiers of the form `"epsg:NNNN"` (case-insensitive) or a bare
    /// numeric EPSG code.
    pub fn new(name: &str) -> Result<Crs, Error> {
        let trimmed = name.trim();
        let digits = match trimmed.to_ascii_lowercase().strip_prefix("epsg:") {
            Some(rest) => rest.to_string(),
            None => trimmed.to_string(),
        };
        let code: u16 = digits
            .parse()
            .map_err(|_| Error::Crs(format!("not an EPSG identifier: {:?}", name)))?;
        let proj = Proj::from_epsg_code(code)
            .map_err(|e| Error::Crs(format!("epsg:{}: {}", code, e)))?;
        let is_latlong = proj.is_latlong();
        Ok(Crs {
            name: format!("epsg:{}", code),
            code,
            proj: Arc::new(proj),
            is_latlong,
        })
    }

    pub fn epsg4326() -> Result<Crs, Error> {
        Crs::new("epsg:4326")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Whether coordinates in this CRS are geographic (degrees) rather than projected.
    pub fn is_geographic(&self) -> bool {
        self.is_latlong
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

/// A reusable transformation from one CRS to another.
///
/// Geographic coordinates cross this boundary as (longitude, latitude) in degrees;
/// the radian convention of the projection engine is internal.
#[derive(Clone, Debug)]
pub struct Transformer {
    src: Crs,
    dst: Crs,
}

impl Transformer {
    pub fn new(src: &Crs, dst: &Crs) -> Transformer {
        Transformer {
            src: src.clone(),
            dst: dst.clone(),
        }
    }

    pub fn apply(&self, point: (f64, f64)) -> Result<(f64, f64), Error> {
        let mut p = (point.0, point.1, 0.0);
        if self.src.is_latlong {
            p.0 = p.0.to_radians();
            p.1 = p.1.to_radians();
        }
        proj4rs::transform::transform(&self.src.proj, &self.dst.proj, &mut p).map_err(|e| {
            Error::Crs(format!(
                "{} -> {} at ({}, {}): {}",
                self.src.name, self.dst.name, point.0, point.1, e
            ))
        })?;
        if self.dst.is_latlong {
            p.0 = p.0.to_degrees();
            p.1 = p.1.to_degrees();
        }
        if !p.0.is_finite() || !p.1.is_finite() {
            return Err(Error::Crs(format!(
                "{} -> {} produced a non-finite coordinate for ({}, {})",
                self.src.name, self.dst.name, point.0, point.1
            )));
        }
        Ok((p.0, p.1))
    }
}

#[cfg(test)]
mod tests {
    use testutils::assert_float_eq;

    use super::*;

    /// Not meant to retest the projection engine, only to sanity check the
    /// degree/radian and axis-order conventions at this boundary.
    ///
    /// Reference values from https://epsg.io/transform

    fn assert_point_eq(p1: (f64, f64), p2: (f64, f64), epsilon: f64) {
        assert_float_eq(p1.0, p2.0, epsilon);
        assert_float_eq(p1.1, p2.1, epsilon);
    }

    #[test]
    fn test_parse() {
        assert_eq!(Crs::new("EPSG:3857").unwrap().name(), "epsg:3857");
        assert_eq!(Crs::new("25832").unwrap().code(), 25832);
        assert!(Crs::new("utm32").is_err());
        assert!(Crs::new("epsg:4326").unwrap().is_geographic());
        assert!(!Crs::new("epsg:3857").unwrap().is_geographic());
    }

    #[test]
    fn test_transform_4326_3857() {
        let t = Transformer::new(&Crs::epsg4326().unwrap(), &Crs::new("epsg:3857").unwrap());
        // https://epsg.io/transform#s_srs=4326&t_srs=3857&x=42.0000000&y=-43.0000000
        let projected = t.apply((42.0, -43.0)).unwrap();
        assert_point_eq(projected, (4675418.613317491, -5311971.846945472), 1e-5);

        let back = Transformer::new(&Crs::new("epsg:3857").unwrap(), &Crs::epsg4326().unwrap());
        assert_point_eq(back.apply(projected).unwrap(), (42.0, -43.0), 1e-9);
    }

    #[test]
    fn test_transform_4326_25832() {
        // The UTM zone 32N central meridian maps to easting 500000
        let t = Transformer::new(&Crs::epsg4326().unwrap(), &Crs::new("epsg:25832").unwrap());
        let projected = t.apply((9.0, 0.0)).unwrap();
        assert_point_eq(projected, (500000.0, 0.0), 1e-3);
    }

    #[test]
    fn test_out_of_domain_coordinate_is_an_error() {
        let t = Transformer::new(&Crs::epsg4326().unwrap(), &Crs::new("epsg:3857").unwrap());
        assert!(t.apply((0.0, 91.0)).is_err());
    }
}
