//! Write-through disk caching: every upstream hit is stored as a tile file and
//! served from disk from then on.
//!
//! With `load_zoom_up = k`, upstream requests are coarsened to the parent tile `k`
//! levels up; the parent raster is split into its `2^k x 2^k` children at the
//! requested zoom and all of them are written in one go. Useful against backends
//! that serve large tiles cheaper than many small ones.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::errors::Error;
use crate::image::ImageBuffer;
use crate::layout::Layout;
use crate::loader::{DiskLoader, Flight, TileLoader};
use crate::math::vec2i;

pub struct DiskCached {
    upstream: Box<TileLoader>,
    disk: DiskLoader,
    load_zoom_up: u32,
    inflight: Mutex<HashMap<(i64, i64, u32), Arc<Flight<()>>>>,
}

impl DiskCached {
    pub fn new(
        upstream: TileLoader,
        root: impl Into<PathBuf>,
        load_zoom_up: u32,
    ) -> Result<DiskCached, Error> {
        let mut layout = upstream.layout().clone();
        if load_zoom_up > 0 {
            // A parent tile k levels up carries 2^k times the pixels of its children,
            // so the on-disk tile shape shrinks accordingly when that divides evenly
            let n = 1i64 << load_zoom_up;
            if layout.tile_shape_px.x % n == 0 && layout.tile_shape_px.y % n == 0 {
                layout.tile_shape_px = vec2i(layout.tile_shape_px.x / n, layout.tile_shape_px.y / n);
            }
        }
        Ok(DiskCached {
            upstream: Box::new(upstream),
            disk: DiskLoader::new(root, layout),
            load_zoom_up,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_path_template(mut self, template: &str) -> DiskCached {
        self.disk = self.disk.with_path_template(template);
        self
    }

    pub fn layout(&self) -> &Layout {
        self.disk.layout()
    }

    pub(crate) fn upstream(&self) -> &TileLoader {
        &self.upstream
    }

    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        self.layout().check_zoom(zoom)?;
        self.layout().check_tile(x, y, zoom)?;
        if self.disk.contains(x, y, zoom) {
            return self.disk.load(x, y, zoom);
        }

        let k = self
            .load_zoom_up
            .min(zoom.saturating_sub(self.upstream.min_zoom()));
        let n = 1i64 << k;
        let parent = (x.div_euclid(n), y.div_euclid(n), zoom - k);

        enum Role {
            Wait(Arc<Flight<()>>),
            Compute(Arc<Flight<()>>),
        }
        let role = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&parent) {
                Some(flight) => Role::Wait(flight.clone()),
                None => {
                    let flight = Arc::new(Flight::new());
                    inflight.insert(parent, flight.clone());
                    Role::Compute(flight)
                }
            }
        };

        match role {
            Role::Wait(flight) => {
                flight.wait()?;
                self.disk.load(x, y, zoom)
            }
            Role::Compute(flight) => {
                let result = self.fill_from_upstream(x, y, zoom, parent, k);
                self.inflight.lock().unwrap().remove(&parent);
                flight.publish(result.as_ref().map(|_| ()).map_err(|e| e.clone()));
                result
            }
        }
    }

    /// Fetches the parent tile, writes every child it covers, and returns the
    /// requested one.
    fn fill_from_upstream(
        &self,
        x: i64,
        y: i64,
        zoom: u32,
        parent: (i64, i64, u32),
        k: u32,
    ) -> Result<ImageBuffer, Error> {
        let img = self.upstream.load(parent.0, parent.1, parent.2)?;
        if k == 0 {
            self.disk.store(x, y, zoom, &img)?;
            return Ok(img);
        }

        let n = 1i64 << k;
        if img.width % n as usize != 0 || img.height % n as usize != 0 {
            return Err(Error::Corruption(format!(
                "upstream tile of ({}, {}) px cannot be split {}-ways",
                img.width, img.height, n * n
            )));
        }
        let sub_w = img.width / n as usize;
        let sub_h = img.height / n as usize;
        let child_w = self.layout().tile_shape_px.x as usize;
        let child_h = self.layout().tile_shape_px.y as usize;

        let mut requested = None;
        for j in 0..n {
            for i in 0..n {
                let crop = img.crop(i as usize * sub_w, j as usize * sub_h, sub_w, sub_h)?;
                let child = if (sub_w, sub_h) != (child_w, child_h) {
                    crop.resize(child_w, child_h)?
                } else {
                    crop
                };
                let (child_x, child_y) = (parent.0 * n + i, parent.1 * n + j);
                self.disk.store(child_x, child_y, zoom, &child)?;
                if (child_x, child_y) == (x, y) {
                    requested = Some(child);
                }
            }
        }
        requested.ok_or_else(|| Error::not_found(x, y, zoom))
    }
}

impl std::fmt::Debug for DiskCached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCached")
            .field("root", &self.disk.root())
            .field("load_zoom_up", &self.load_zoom_up)
            .finish()
    }
}
