//! The bidirectional mapping between geographic coordinates, projected CRS
//! coordinates, tile indices and pixel coordinates at a given zoom.
//!
//! Tile and pixel coordinates live in the tile-axis frame: they increase in the
//! directions given by `tile_axes`, starting from `origin_crs` (the corner of tile
//! (0, 0) that corresponds to pixel (0, 0)). Fractional tile/pixel coordinates are
//! used for all intermediate math; `Vec2f::floor_to_i64` gives the containing tile.

use crate::crs::{Crs, Transformer};
use crate::errors::Error;
use crate::geo::{self, CompassAxes, CompassAxis, LatLon};
use crate::math::{vec2f, Vec2f, Vec2i};

/// Half the projected extent of epsg:3857, i.e. pi * equator radius.
const WEB_MERCATOR_HALF_EXTENT: f64 = 20037508.342789244;

pub(crate) const DEFAULT_MAX_ZOOM: u32 = 30;

#[derive(Debug, Clone)]
pub struct Layout {
    pub crs: Crs,
    pub tile_axes: CompassAxes,
    pub tile_shape_px: Vec2i,
    /// CRS units per tile along each tile axis, at zoom 0.
    pub tile_shape_crs: Vec2f,
    /// CRS coordinate of the corner of tile (0, 0) that maps to pixel (0, 0).
    pub origin_crs: Vec2f,
    /// Extent of the layout in CRS units, for bounded layouts.
    pub size_crs: Option<Vec2f>,
    pub min_zoom: u32,
    pub max_zoom: u32,
    to_wgs84: Transformer,
    from_wgs84: Transformer,
}

impl Layout {
    pub fn new(
        crs: Crs,
        tile_axes: CompassAxes,
        tile_shape_px: (i64, i64),
        tile_shape_crs: (f64, f64),
    ) -> Result<Layout, Error> {
        if tile_shape_px.0 <= 0 || tile_shape_px.1 <= 0 {
            return Err(Error::InvalidArgument(format!(
                "tile_shape_px must be positive, got {:?}",
                tile_shape_px
            )));
        }
        if tile_shape_crs.0 <= 0.0 || tile_shape_crs.1 <= 0.0 {
            return Err(Error::InvalidArgument(format!(
                "tile_shape_crs must be positive, got {:?}",
                tile_shape_crs
            )));
        }
        let wgs84 = Crs::epsg4326()?;
        let to_wgs84 = Transformer::new(&crs, &wgs84);
        let from_wgs84 = Transformer::new(&wgs84, &crs);
        Ok(Layout {
            crs,
            tile_axes,
            tile_shape_px: tile_shape_px.into(),
            tile_shape_crs: tile_shape_crs.into(),
            origin_crs: vec2f(0.0, 0.0),
            size_crs: None,
            min_zoom: 0,
            max_zoom: DEFAULT_MAX_ZOOM,
            to_wgs84,
            from_wgs84,
        })
    }

    /// The web-mercator slippy-map convention: one tile covers the projected world
    /// at zoom 0, x grows east, y grows south.
    pub fn xyz(tile_shape_px: (i64, i64)) -> Result<Layout, Error> {
        let extent = 2.0 * WEB_MERCATOR_HALF_EXTENT;
        Ok(Layout::new(
            Crs::new("epsg:3857")?,
            CompassAxes::new(CompassAxis::East, CompassAxis::South)?,
            tile_shape_px,
            (extent, extent),
        )?
        .with_origin_crs((-WEB_MERCATOR_HALF_EXTENT, WEB_MERCATOR_HALF_EXTENT))
        .with_size_crs((extent, extent)))
    }

    pub fn with_origin_crs(mut self, origin_crs: (f64, f64)) -> Layout {
        self.origin_crs = origin_crs.into();
        self
    }

    pub fn with_size_crs(mut self, size_crs: (f64, f64)) -> Layout {
        self.size_crs = Some(size_crs.into());
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u32, max_zoom: u32) -> Result<Layout, Error> {
        if min_zoom > max_zoom {
            return Err(Error::InvalidArgument(format!(
                "min_zoom {} > max_zoom {}",
                min_zoom, max_zoom
            )));
        }
        self.min_zoom = min_zoom;
        self.max_zoom = max_zoom;
        Ok(self)
    }

    pub fn check_zoom(&self, zoom: u32) -> Result<(), Error> {
        if zoom < self.min_zoom || zoom > self.max_zoom {
            return Err(Error::InvalidZoom {
                zoom,
                min_zoom: self.min_zoom,
                max_zoom: self.max_zoom,
            });
        }
        Ok(())
    }

    /// CRS units per tile at the given zoom: the zoom-0 extent halves per level.
    pub fn tile_shape_crs_at(&self, zoom: u32) -> Result<Vec2f, Error> {
        self.check_zoom(zoom)?;
        let scale = (zoom as f64).exp2();
        Ok(self.tile_shape_crs / scale)
    }

    /// Number of tiles along each axis at `zoom`, if the layout is bounded.
    pub fn tile_count(&self, zoom: u32) -> Result<Option<Vec2i>, Error> {
        let shape = self.tile_shape_crs_at(zoom)?;
        Ok(self.size_crs.map(|size| Vec2i {
            x: (size.x / shape.x).round() as i64,
            y: (size.y / shape.y).round() as i64,
        }))
    }

    /// For bounded layouts, rejects tile indices outside the layout's extent.
    pub fn check_tile(&self, x: i64, y: i64, zoom: u32) -> Result<(), Error> {
        if let Some(count) = self.tile_count(zoom)? {
            if x < 0 || y < 0 || x >= count.x || y >= count.y {
                return Err(Error::InvalidArgument(format!(
                    "tile ({}, {}) outside the {}x{} layout extent at zoom {}",
                    x, y, count.x, count.y, zoom
                )));
            }
        }
        Ok(())
    }

    pub fn latlon_to_crs(&self, latlon: LatLon) -> Result<Vec2f, Error> {
        let (x, y) = self.from_wgs84.apply((latlon.lon, latlon.lat))?;
        Ok(vec2f(x, y))
    }

    pub fn crs_to_latlon(&self, p: Vec2f) -> Result<LatLon, Error> {
        let (lon, lat) = self.to_wgs84.apply((p.x, p.y))?;
        Ok(LatLon { lat, lon })
    }

    /// Fractional tile index of a CRS coordinate, in the tile-axis frame.
    pub fn crs_to_tile(&self, p: Vec2f, zoom: u32) -> Result<Vec2f, Error> {
        let shape = self.tile_shape_crs_at(zoom)?;
        let d = p - self.origin_crs;
        Ok(vec2f(
            self.tile_axes.x.component(d) / shape.x,
            self.tile_axes.y.component(d) / shape.y,
        ))
    }

    pub fn tile_to_crs(&self, tile: Vec2f, zoom: u32) -> Result<Vec2f, Error> {
        let shape = self.tile_shape_crs_at(zoom)?;
        let along_x = self.tile_axes.x.unit() * (tile.x * shape.x);
        let along_y = self.tile_axes.y.unit() * (tile.y * shape.y);
        Ok(self.origin_crs + along_x + along_y)
    }

    /// Pixel coordinate of a fractional tile index in the full-layout pixel grid.
    /// Pixel axes coincide with tile axes; the scaling is zoom-independent.
    pub fn tile_to_pixel(&self, tile: Vec2f, zoom: u32) -> Result<Vec2f, Error> {
        self.check_zoom(zoom)?;
        Ok(vec2f(
            tile.x * self.tile_shape_px.x as f64,
            tile.y * self.tile_shape_px.y as f64,
        ))
    }

    pub fn pixel_to_tile(&self, pixel: Vec2f, zoom: u32) -> Result<Vec2f, Error> {
        self.check_zoom(zoom)?;
        Ok(vec2f(
            pixel.x / self.tile_shape_px.x as f64,
            pixel.y / self.tile_shape_px.y as f64,
        ))
    }

    pub fn epsg4326_to_tile(&self, latlon: LatLon, zoom: u32) -> Result<Vec2f, Error> {
        self.crs_to_tile(self.latlon_to_crs(latlon)?, zoom)
    }

    pub fn tile_to_epsg4326(&self, tile: Vec2f, zoom: u32) -> Result<LatLon, Error> {
        self.crs_to_latlon(self.tile_to_crs(tile, zoom)?)
    }

    pub fn epsg4326_to_pixel(&self, latlon: LatLon, zoom: u32) -> Result<Vec2f, Error> {
        self.tile_to_pixel(self.epsg4326_to_tile(latlon, zoom)?, zoom)
    }

    pub fn pixel_to_epsg4326(&self, pixel: Vec2f, zoom: u32) -> Result<LatLon, Error> {
        self.tile_to_epsg4326(self.pixel_to_tile(pixel, zoom)?, zoom)
    }

    /// Local scale of the pixel grid at `latlon`, in pixels per meter along each
    /// pixel axis. Estimated by differencing the geographic corners of the
    /// containing tile and scaling by the local meters-per-degree.
    pub fn pixels_per_meter(&self, latlon: LatLon, zoom: u32) -> Result<Vec2f, Error> {
        let tile = self.epsg4326_to_tile(latlon, zoom)?.floor();
        let c0 = self.tile_to_epsg4326(tile, zoom)?;
        let c1 = self.tile_to_epsg4326(tile + vec2f(1.0, 1.0), zoom)?;
        let dlat = (c1.lat - c0.lat).abs();
        let dlon = (c1.lon - c0.lon).abs();
        let (per_lat, per_lon) = geo::meters_per_deg(latlon);

        let meters_along = |axis: CompassAxis| match axis {
            CompassAxis::East | CompassAxis::West => dlon * per_lon,
            CompassAxis::North | CompassAxis::South => dlat * per_lat,
        };
        Ok(vec2f(
            self.tile_shape_px.x as f64 / meters_along(self.tile_axes.x),
            self.tile_shape_px.y as f64 / meters_along(self.tile_axes.y),
        ))
    }
}

#[cfg(test)]
mod tests {
    use testutils::assert_float_eq;

    use super::*;

    fn assert_vec2f_eq(v1: Vec2f, v2: Vec2f, epsilon: f64) {
        assert_float_eq(v1.x, v2.x, epsilon);
        assert_float_eq(v1.y, v2.y, epsilon);
    }

    /// Independent slippy-map formula, for cross-checking the projected path.
    fn slippy_tile(latlon: LatLon, zoom: u32) -> Vec2f {
        let n = (zoom as f64).exp2();
        let x = (latlon.lon + 180.0) / 360.0 * n;
        let lat = latlon.lat.to_radians();
        let y = (1.0 - lat.tan().asinh() / std::f64::consts::PI) / 2.0 * n;
        vec2f(x, y)
    }

    #[test]
    fn test_xyz_null_island() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let tile = layout
            .epsg4326_to_tile(LatLon::new(0.0, 0.0), 1)
            .unwrap();
        assert_vec2f_eq(tile, vec2f(1.0, 1.0), 1e-9);
    }

    #[test]
    fn test_xyz_matches_slippy_formula() {
        let layout = Layout::xyz((256, 256)).unwrap();
        for (lat, lon) in [
            (43.49111200344394, -1.4730902418166352),
            (40.0, -100.0),
            (-33.8688, 151.2093),
            (60.17, 24.94),
        ] {
            let latlon = LatLon::new(lat, lon);
            for zoom in [2, 12, 20] {
                let tile = layout.epsg4326_to_tile(latlon, zoom).unwrap();
                let expected = slippy_tile(latlon, zoom);
                assert_vec2f_eq(tile, expected, 1e-4);
            }
        }
    }

    #[test]
    fn test_tile_roundtrip() {
        let layout = Layout::xyz((256, 256)).unwrap();
        for (tx, ty) in [(0.0, 0.0), (3.25, 1.75), (14.0, 9.5)] {
            let tile = vec2f(tx, ty);
            let crs = layout.tile_to_crs(tile, 4).unwrap();
            assert_vec2f_eq(layout.crs_to_tile(crs, 4).unwrap(), tile, 1e-6);
        }
    }

    #[test]
    fn test_pixel_roundtrip() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let pixel = vec2f(12345.5, 6789.25);
        let tile = layout.pixel_to_tile(pixel, 6).unwrap();
        assert_vec2f_eq(layout.tile_to_pixel(tile, 6).unwrap(), pixel, 1e-9);
        assert_vec2f_eq(
            layout.tile_to_pixel(vec2f(3.0, 2.0), 6).unwrap(),
            vec2f(768.0, 512.0),
            1e-9,
        );
    }

    #[test]
    fn test_latlon_pixel_roundtrip() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let latlon = LatLon::new(48.85837, 2.294481);
        let pixel = layout.epsg4326_to_pixel(latlon, 16).unwrap();
        let back = layout.pixel_to_epsg4326(pixel, 16).unwrap();
        assert_float_eq(back.lat, latlon.lat, 1e-9);
        assert_float_eq(back.lon, latlon.lon, 1e-9);
    }

    #[test]
    fn test_metric_layout_with_north_axis() {
        // A 1 km / 10000 px grid in UTM zone 32N with y growing north
        let layout = Layout::new(
            Crs::new("epsg:25832").unwrap(),
            CompassAxes::new(CompassAxis::East, CompassAxis::North).unwrap(),
            (10000, 10000),
            (1000.0, 1000.0),
        )
        .unwrap();
        let tile = layout.crs_to_tile(vec2f(2500.0, 1500.0), 0).unwrap();
        assert_vec2f_eq(tile, vec2f(2.5, 1.5), 1e-9);
        let back = layout.tile_to_crs(tile, 0).unwrap();
        assert_vec2f_eq(back, vec2f(2500.0, 1500.0), 1e-6);
    }

    #[test]
    fn test_invalid_zoom() {
        let layout = Layout::xyz((256, 256))
            .unwrap()
            .with_zoom_range(0, 19)
            .unwrap();
        assert!(matches!(
            layout.crs_to_tile(vec2f(0.0, 0.0), 20),
            Err(Error::InvalidZoom { .. })
        ));
    }

    #[test]
    fn test_tile_count() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let count = layout.tile_count(3).unwrap().unwrap();
        assert_eq!((count.x, count.y), (8, 8));
    }

    #[test]
    fn test_pixels_per_meter_at_equator() {
        let layout = Layout::xyz((256, 256)).unwrap();
        let ppm = layout
            .pixels_per_meter(LatLon::new(0.001, 0.001), 12)
            .unwrap();
        // One z12 tile covers 40075016.69 / 4096 = 9784.9 m at the equator
        let expected = 256.0 / (2.0 * WEB_MERCATOR_HALF_EXTENT / 4096.0);
        assert_float_eq(ppm.x, expected, expected * 1e-3);
        assert_float_eq(ppm.y, expected, expected * 1e-2);
    }
}
