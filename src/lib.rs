mod config;
mod crs;
mod errors;
pub mod geo;
pub mod image;
mod layout;
mod loader;
mod math;
mod npz;
mod ratelimit;
mod stitch;
pub mod presets;

pub use config::{
    from_config, from_config_str, from_yaml, from_yaml_with_wait, layout_from_yaml,
    layout_from_yaml_str, RegistryEntry,
};
pub use crs::{Crs, Transformer};
pub use errors::Error;
pub use geo::{CompassAxes, CompassAxis, LatLon};
pub use image::ImageBuffer;
pub use layout::Layout;
pub use loader::{
    pack_directory, BinLoader, DiskCached, DiskLoader, HttpLoader, LruCached, MemoryLoader,
    TileLoader, WithDefault,
};
pub use math::{vec2f, vec2i, Vec2, Vec2f, Vec2i};
pub use ratelimit::Ratelimit;
pub use stitch::ViewSpec;
