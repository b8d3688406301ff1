//! Tiles stored as individual image files under a directory tree.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::errors::Error;
use crate::image::ImageBuffer;
use crate::layout::Layout;
use crate::loader::check_tile_shape;

pub const DEFAULT_PATH_TEMPLATE: &str = "{zoom}/{x}/{y}.jpg";

#[derive(Debug, Clone)]
pub struct DiskLoader {
    root: PathBuf,
    path_template: String,
    layout: Layout,
    wait_after_last_modified: Option<Duration>,
}

impl DiskLoader {
    pub fn new(root: impl Into<PathBuf>, layout: Layout) -> DiskLoader {
        DiskLoader {
            root: root.into(),
            path_template: DEFAULT_PATH_TEMPLATE.to_string(),
            layout,
            wait_after_last_modified: None,
        }
    }

    /// Opens a tile tree described by the `layout.yaml` at its root.
    pub fn from_directory(root: impl Into<PathBuf>) -> Result<DiskLoader, Error> {
        let root = root.into();
        let file = crate::config::read_layout_file(&root.join("layout.yaml"))?;
        let layout = file.to_layout()?;
        let mut loader = DiskLoader::new(root, layout);
        if let Some(template) = &file.path {
            loader = loader.with_path_template(template);
        }
        Ok(loader)
    }

    pub fn with_path_template(mut self, template: &str) -> DiskLoader {
        self.path_template = template.to_string();
        self
    }

    /// Delays reads of freshly written files, guarding against producers that write
    /// tiles in place rather than atomically.
    pub fn with_wait_after_last_modified(mut self, wait: Duration) -> DiskLoader {
        self.wait_after_last_modified = Some(wait);
        self
    }

    pub fn with_zoom_range(mut self, min_zoom: u32, max_zoom: u32) -> Result<DiskLoader, Error> {
        self.layout = self.layout.with_zoom_range(min_zoom, max_zoom)?;
        Ok(self)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file extension tiles are stored with, from the path template.
    pub fn extension(&self) -> &str {
        self.path_template
            .rsplit('.')
            .next()
            .filter(|ext| !ext.contains('}'))
            .unwrap_or("jpg")
    }

    pub fn tile_path(&self, x: i64, y: i64, zoom: u32) -> PathBuf {
        let relative = self
            .path_template
            .replace("{zoom}", &zoom.to_string())
            .replace("{x}", &x.to_string())
            .replace("{y}", &y.to_string());
        self.root.join(relative)
    }

    pub fn contains(&self, x: i64, y: i64, zoom: u32) -> bool {
        self.tile_path(x, y, zoom).is_file()
    }

    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        self.layout.check_zoom(zoom)?;
        self.layout.check_tile(x, y, zoom)?;
        let path = self.tile_path(x, y, zoom);
        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(x, y, zoom))
            }
            Err(e) => return Err(e.into()),
        };

        if let (Some(wait), Ok(modified)) = (self.wait_after_last_modified, metadata.modified()) {
            let settled_at = modified + wait;
            if let Ok(remaining) = settled_at.duration_since(SystemTime::now()) {
                log::debug!(
                    "{} modified {:?} ago, waiting {:?} for the writer to settle",
                    path.display(),
                    wait,
                    remaining
                );
                std::thread::sleep(remaining);
            }
        }

        let bytes = std::fs::read(&path)?;
        let img = ImageBuffer::decode(&bytes)
            .map_err(|e| Error::Corruption(format!("{}: {}", path.display(), e)))?;
        check_tile_shape(&self.layout, &img)
            .map_err(|e| Error::Corruption(format!("{}: {}", path.display(), e)))?;
        Ok(img)
    }

    /// Atomically writes a tile: encode, write to `<file>.part`, fsync, rename.
    pub fn store(&self, x: i64, y: i64, zoom: u32, img: &ImageBuffer) -> Result<(), Error> {
        self.layout.check_zoom(zoom)?;
        check_tile_shape(&self.layout, img)?;
        let encoded = img.encode(self.extension())?;

        let path = self.tile_path(x, y, zoom);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut part = path.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&part)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        std::fs::rename(&part, &path)?;
        Ok(())
    }
}
