//! Substitutes a solid color for missing coverage.

use crate::errors::Error;
use crate::image::ImageBuffer;
use crate::layout::Layout;
use crate::loader::TileLoader;

#[derive(Debug)]
pub struct WithDefault {
    inner: Option<Box<TileLoader>>,
    color: [u8; 3],
    layout: Layout,
}

impl WithDefault {
    /// Serves the inner loader's tiles, turning `NotFound` into a solid tile.
    pub fn new(inner: TileLoader, color: [u8; 3]) -> WithDefault {
        let layout = inner.layout().clone();
        WithDefault {
            inner: Some(Box::new(inner)),
            color,
            layout,
        }
    }

    /// A loader with no upstream at all: every tile is the solid color.
    pub fn empty(layout: Layout, color: [u8; 3]) -> WithDefault {
        WithDefault {
            inner: None,
            color,
            layout,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn color(&self) -> [u8; 3] {
        self.color
    }

    fn solid_tile(&self) -> ImageBuffer {
        ImageBuffer::filled(
            self.layout.tile_shape_px.x as usize,
            self.layout.tile_shape_px.y as usize,
            self.color,
        )
    }

    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        self.layout.check_zoom(zoom)?;
        match &self.inner {
            None => Ok(self.solid_tile()),
            Some(inner) => match inner.load(x, y, zoom) {
                Err(Error::NotFound { .. }) => Ok(self.solid_tile()),
                result => result,
            },
        }
    }
}
