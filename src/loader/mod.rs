//! The tile loader hierarchy: backends (HTTP, disk, binary pack, in-memory) and the
//! wrappers that add caching and defaulting. All of them are one `TileLoader` value,
//! wrappers owning their inner loader, so stacks compose by construction:
//!
//! `WithDefault(LruCached(DiskCached(Http)))`

use std::collections::HashMap;
use std::fmt;
use std::sync::{Condvar, Mutex};

mod bin;
mod disk;
mod disk_cached;
mod http;
mod lru;
mod with_default;

pub use bin::{pack_directory, BinLoader};
pub use disk::{DiskLoader, DEFAULT_PATH_TEMPLATE};
pub use disk_cached::DiskCached;
pub use http::HttpLoader;
pub use lru::LruCached;
pub use with_default::WithDefault;

use crate::errors::Error;
use crate::image::ImageBuffer;
use crate::layout::Layout;
use crate::stitch::{self, ViewSpec};

pub enum TileLoader {
    Http(HttpLoader),
    Disk(DiskLoader),
    Bin(BinLoader),
    Memory(MemoryLoader),
    LruCached(LruCached),
    DiskCached(DiskCached),
    WithDefault(WithDefault),
}

impl fmt::Debug for TileLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(_) => f.debug_tuple("Http").finish(),
            Self::Disk(_) => f.debug_tuple("Disk").finish(),
            Self::Bin(_) => f.debug_tuple("Bin").finish(),
            Self::Memory(_) => f.debug_tuple("Memory").finish(),
            Self::LruCached(_) => f.debug_tuple("LruCached").finish(),
            Self::DiskCached(_) => f.debug_tuple("DiskCached").finish(),
            Self::WithDefault(_) => f.debug_tuple("WithDefault").finish(),
        }
    }
}

impl TileLoader {
    /// Loads one tile as an RGB raster of the layout's `tile_shape_px`.
    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        match self {
            TileLoader::Http(l) => l.load(x, y, zoom),
            TileLoader::Disk(l) => l.load(x, y, zoom),
            TileLoader::Bin(l) => l.load(x, y, zoom),
            TileLoader::Memory(l) => l.load(x, y, zoom),
            TileLoader::LruCached(l) => l.load(x, y, zoom),
            TileLoader::DiskCached(l) => l.load(x, y, zoom),
            TileLoader::WithDefault(l) => l.load(x, y, zoom),
        }
    }

    /// The loader's native layout.
    pub fn layout(&self) -> &Layout {
        match self {
            TileLoader::Http(l) => l.layout(),
            TileLoader::Disk(l) => l.layout(),
            TileLoader::Bin(l) => l.layout(),
            TileLoader::Memory(l) => l.layout(),
            TileLoader::LruCached(l) => l.layout(),
            TileLoader::DiskCached(l) => l.layout(),
            TileLoader::WithDefault(l) => l.layout(),
        }
    }

    pub fn min_zoom(&self) -> u32 {
        self.layout().min_zoom
    }

    pub fn max_zoom(&self) -> u32 {
        self.layout().max_zoom
    }

    /// Renders an arbitrary geographic view by stitching tiles from this loader.
    pub fn load_view(&self, view: &ViewSpec) -> Result<ImageBuffer, Error> {
        stitch::load_view(self, view)
    }

    /// The color substituted for missing coverage, if the stack defines one.
    pub(crate) fn default_color(&self) -> Option<[u8; 3]> {
        match self {
            TileLoader::WithDefault(l) => Some(l.color()),
            TileLoader::LruCached(l) => l.inner().default_color(),
            TileLoader::DiskCached(l) => l.upstream().default_color(),
            _ => None,
        }
    }
}

impl From<HttpLoader> for TileLoader {
    fn from(value: HttpLoader) -> Self {
        TileLoader::Http(value)
    }
}

impl From<DiskLoader> for TileLoader {
    fn from(value: DiskLoader) -> Self {
        TileLoader::Disk(value)
    }
}

impl From<BinLoader> for TileLoader {
    fn from(value: BinLoader) -> Self {
        TileLoader::Bin(value)
    }
}

impl From<MemoryLoader> for TileLoader {
    fn from(value: MemoryLoader) -> Self {
        TileLoader::Memory(value)
    }
}

impl From<LruCached> for TileLoader {
    fn from(value: LruCached) -> Self {
        TileLoader::LruCached(value)
    }
}

impl From<DiskCached> for TileLoader {
    fn from(value: DiskCached) -> Self {
        TileLoader::DiskCached(value)
    }
}

impl From<WithDefault> for TileLoader {
    fn from(value: WithDefault) -> Self {
        TileLoader::WithDefault(value)
    }
}

/// Serves tiles from a closure. This is the backend for synthesized imagery and for
/// exercising loader stacks in tests without touching the network or the disk.
pub struct MemoryLoader {
    layout: Layout,
    tiles: Box<dyn Fn(i64, i64, u32) -> Result<ImageBuffer, Error> + Send + Sync>,
}

impl MemoryLoader {
    pub fn new<F>(layout: Layout, tiles: F) -> MemoryLoader
    where
        F: Fn(i64, i64, u32) -> Result<ImageBuffer, Error> + Send + Sync + 'static,
    {
        MemoryLoader {
            layout,
            tiles: Box::new(tiles),
        }
    }

    /// A loader over a fixed set of tiles; anything else is `NotFound`.
    pub fn from_tiles(
        layout: Layout,
        tiles: HashMap<(i64, i64, u32), ImageBuffer>,
    ) -> MemoryLoader {
        MemoryLoader::new(layout, move |x, y, zoom| {
            tiles
                .get(&(x, y, zoom))
                .cloned()
                .ok_or_else(|| Error::not_found(x, y, zoom))
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        self.layout.check_zoom(zoom)?;
        self.layout.check_tile(x, y, zoom)?;
        let img = (self.tiles)(x, y, zoom)?;
        check_tile_shape(&self.layout, &img)?;
        Ok(img)
    }
}

impl fmt::Debug for MemoryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLoader")
            .field("layout", &self.layout)
            .finish()
    }
}

/// Validates that a loaded raster matches the layout's tile shape.
pub(crate) fn check_tile_shape(layout: &Layout, img: &ImageBuffer) -> Result<(), Error> {
    if img.width as i64 != layout.tile_shape_px.x || img.height as i64 != layout.tile_shape_px.y {
        return Err(Error::Corruption(format!(
            "tile raster is ({}, {}), layout expects ({}, {})",
            img.width, img.height, layout.tile_shape_px.x, layout.tile_shape_px.y
        )));
    }
    Ok(())
}

/// A completion token for single-flight loads: the first caller for a key does the
/// work and publishes the outcome, every other caller waits on the token and shares
/// it. Never held across the owner map's mutex.
pub(crate) struct Flight<T> {
    result: Mutex<Option<Result<T, Error>>>,
    done: Condvar,
}

impl<T: Clone> Flight<T> {
    pub(crate) fn new() -> Flight<T> {
        Flight {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    pub(crate) fn publish(&self, result: Result<T, Error>) {
        let mut slot = self.result.lock().unwrap();
        *slot = Some(result);
        self.done.notify_all();
    }

    pub(crate) fn wait(&self) -> Result<T, Error> {
        let mut slot = self.result.lock().unwrap();
        while slot.is_none() {
            slot = self.done.wait(slot).unwrap();
        }
        slot.as_ref().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Layout;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_loaders_are_shareable() {
        assert_send_sync::<TileLoader>();
    }

    #[test]
    fn test_memory_loader_checks_shape_and_bounds() {
        let layout = Layout::xyz((4, 4)).unwrap();
        let good = MemoryLoader::new(layout.clone(), |_, _, _| Ok(ImageBuffer::new(4, 4)));
        assert!(good.load(0, 0, 0).is_ok());
        assert!(matches!(
            good.load(1, 0, 0),
            Err(Error::InvalidArgument(_))
        ));

        let bad = MemoryLoader::new(layout, |_, _, _| Ok(ImageBuffer::new(3, 4)));
        assert!(matches!(bad.load(0, 0, 0), Err(Error::Corruption(_))));
    }
}
