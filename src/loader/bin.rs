//! Tiles packed into a single memory-mapped blob.
//!
//! A pack directory holds `layout.yaml`, `images.dat` (the concatenated encoded tile
//! bytes in ascending `(zoom, x, y)` order) and `images-meta.npz` (parallel int64
//! arrays `zoom`, `x`, `y`, `offset`). Lookup is a binary search over the sorted
//! arrays; tile bytes are sliced straight out of the mapping.

use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::errors::Error;
use crate::image::ImageBuffer;
use crate::layout::Layout;
use crate::loader::check_tile_shape;
use crate::npz;

const DATA_FILE: &str = "images.dat";
const META_FILE: &str = "images-meta.npz";
const LAYOUT_FILE: &str = "layout.yaml";

pub struct BinLoader {
    layout: Layout,
    map: Mmap,
    keys: Vec<[i64; 3]>,
    offsets: Vec<i64>,
}

impl BinLoader {
    pub fn open(dir: impl Into<PathBuf>) -> Result<BinLoader, Error> {
        let dir = dir.into();
        let layout = crate::config::read_layout_file(&dir.join(LAYOUT_FILE))?.to_layout()?;

        let data_path = dir.join(DATA_FILE);
        let file = std::fs::File::open(&data_path)?;
        // Safety: the mapping is read-only and pack files are not mutated once built
        let map = unsafe { Mmap::map(&file)? };

        let meta_path = dir.join(META_FILE);
        let mut arrays = npz::read_int64_arrays(&meta_path)?;
        let mut take = |name: &str| {
            arrays.remove(name).ok_or_else(|| {
                Error::Corruption(format!("{}: missing array {:?}", meta_path.display(), name))
            })
        };
        let zoom = take("zoom")?;
        let x = take("x")?;
        let y = take("y")?;
        let offsets = take("offset")?;

        if zoom.len() != x.len() || zoom.len() != y.len() {
            return Err(Error::Corruption(format!(
                "{}: index arrays disagree on length ({}, {}, {})",
                meta_path.display(),
                zoom.len(),
                x.len(),
                y.len()
            )));
        }
        if offsets.len() != zoom.len() && offsets.len() != zoom.len() + 1 {
            return Err(Error::Corruption(format!(
                "{}: {} offsets for {} tiles",
                meta_path.display(),
                offsets.len(),
                zoom.len()
            )));
        }

        let keys: Vec<[i64; 3]> = zoom
            .iter()
            .zip(x.iter())
            .zip(y.iter())
            .map(|((z, x), y)| [*z, *x, *y])
            .collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Corruption(format!(
                "{}: tile index is not sorted by (zoom, x, y)",
                meta_path.display()
            )));
        }
        if offsets.windows(2).any(|w| w[0] > w[1])
            || offsets.first().is_some_and(|o| *o < 0)
            || offsets.last().is_some_and(|o| *o > map.len() as i64)
        {
            return Err(Error::Corruption(format!(
                "{}: offsets do not fit the {} byte data file",
                meta_path.display(),
                map.len()
            )));
        }

        log::debug!(
            "opened pack {} with {} tiles, {} bytes",
            dir.display(),
            keys.len(),
            map.len()
        );
        Ok(BinLoader {
            layout,
            map,
            keys,
            offsets,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, x: i64, y: i64, zoom: u32) -> bool {
        self.keys.binary_search(&[zoom as i64, x, y]).is_ok()
    }

    pub fn load(&self, x: i64, y: i64, zoom: u32) -> Result<ImageBuffer, Error> {
        self.layout.check_zoom(zoom)?;
        self.layout.check_tile(x, y, zoom)?;
        let i = self
            .keys
            .binary_search(&[zoom as i64, x, y])
            .map_err(|_| Error::not_found(x, y, zoom))?;
        let start = self.offsets[i] as usize;
        let end = if i + 1 < self.offsets.len() {
            self.offsets[i + 1] as usize
        } else {
            self.map.len()
        };
        let bytes = &self.map[start..end];
        let img = ImageBuffer::decode(bytes).map_err(|e| {
            Error::Corruption(format!("tile ({}, {}) at zoom {}: {}", x, y, zoom, e))
        })?;
        check_tile_shape(&self.layout, &img)?;
        Ok(img)
    }
}

impl std::fmt::Debug for BinLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinLoader")
            .field("tiles", &self.keys.len())
            .field("bytes", &self.map.len())
            .finish()
    }
}

/// Builds a pack directory from a `{zoom}/{x}/{y}.<ext>` tile tree. The tree's
/// `layout.yaml` is copied along; tile bytes are concatenated as-is.
pub fn pack_directory(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<(), Error> {
    let input = input.as_ref();
    let output = output.as_ref();

    let layout_src = input.join(LAYOUT_FILE);
    if !layout_src.is_file() {
        return Err(Error::InvalidArgument(format!(
            "{} has no {}",
            input.display(),
            LAYOUT_FILE
        )));
    }

    let mut tiles: Vec<(i64, i64, i64, PathBuf)> = Vec::new();
    for zoom_entry in std::fs::read_dir(input)? {
        let zoom_entry = zoom_entry?;
        let Some(zoom) = numeric_name(&zoom_entry.path()) else {
            continue;
        };
        for x_entry in std::fs::read_dir(zoom_entry.path())? {
            let x_entry = x_entry?;
            let Some(x) = numeric_name(&x_entry.path()) else {
                continue;
            };
            for y_entry in std::fs::read_dir(x_entry.path())? {
                let y_entry = y_entry?;
                let path = y_entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(y) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.parse::<i64>().ok())
                else {
                    continue;
                };
                tiles.push((zoom, x, y, path));
            }
        }
    }
    tiles.sort_by_key(|t| (t.0, t.1, t.2));
    if tiles.windows(2).any(|w| (w[0].0, w[0].1, w[0].2) == (w[1].0, w[1].1, w[1].2)) {
        return Err(Error::InvalidArgument(format!(
            "{} contains the same tile with two extensions",
            input.display()
        )));
    }

    std::fs::create_dir_all(output)?;
    std::fs::copy(&layout_src, output.join(LAYOUT_FILE))?;

    let mut offsets = Vec::with_capacity(tiles.len() + 1);
    let mut offset = 0i64;
    {
        use std::io::Write;
        let mut data = std::io::BufWriter::new(std::fs::File::create(output.join(DATA_FILE))?);
        for (_, _, _, path) in &tiles {
            offsets.push(offset);
            let bytes = std::fs::read(path)?;
            data.write_all(&bytes)?;
            offset += bytes.len() as i64;
        }
        data.flush()?;
    }
    offsets.push(offset);

    let zoom: Vec<i64> = tiles.iter().map(|t| t.0).collect();
    let x: Vec<i64> = tiles.iter().map(|t| t.1).collect();
    let y: Vec<i64> = tiles.iter().map(|t| t.2).collect();
    npz::write_int64_arrays(
        &output.join(META_FILE),
        &[("zoom", &zoom), ("x", &x), ("y", &y), ("offset", &offsets)],
    )?;
    log::debug!(
        "packed {} tiles ({} bytes) into {}",
        tiles.len(),
        offset,
        output.display()
    );
    Ok(())
}

fn numeric_name(path: &Path) -> Option<i64> {
    if !path.is_dir() {
        return None;
    }
    path.file_name()?.to_str()?.parse().ok()
}
