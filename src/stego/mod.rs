//! Image carrier for authentication payloads.
//!
//! - [`codec`]: bit-exact, length-prefixed LSB embed/extract over raw pixels.
//! - [`carrier`]: canvas allocation plus PNG render / raster decode.

pub mod carrier;
pub mod codec;

pub use carrier::{CarrierError, CarrierSpec};
pub use codec::{CodecError, PixelBuffer};
