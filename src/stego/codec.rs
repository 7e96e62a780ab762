//! Length-prefixed LSB codec.
//!
//! Bit layout (bit-exact, shared by issuer and verifier):
//! - Channel bytes are visited row-major over pixels, then channel index
//!   ascending within a pixel (R, G, B[, A]).
//! - Each visited byte carries one bit in its least-significant bit.
//! - The first 32 bits are the payload length in bytes, big-endian, MSB first.
//! - The next `8 × len` bits are the payload bytes, each MSB first.
//!
//! Bytes past the last written bit are left untouched.

/// Width of the big-endian length header, in bits.
pub const HEADER_BITS: u64 = 32;

/// Codec failures. Each one is scoped to a single embed/extract call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("payload needs {required} bits but the carrier holds {available}")]
    CapacityExceeded { required: u64, available: u64 },
    #[error("carrier holds {available} bits, fewer than the 32-bit length header")]
    TruncatedHeader { available: u64 },
    #[error("header declares {declared} bytes but only {available} payload bits remain")]
    TruncatedPayload { declared: u32, available: u64 },
}

/// An interleaved 8-bit pixel buffer: `width × height` pixels of `channels`
/// bytes each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a buffer with every channel byte set to `fill`.
    ///
    /// # Panics
    ///
    /// When `width × height × channels` does not fit in `usize`. Configured
    /// carriers are bounded by `Config::validate`.
    pub fn filled(width: u32, height: u32, channels: u8, fill: u8) -> Self {
        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .unwrap_or_else(|| panic!("{width}x{height}x{channels} pixel buffer overflows usize"));
        Self {
            width,
            height,
            channels,
            data: vec![fill; len],
        }
    }

    /// Wrap raw interleaved bytes. Returns `None` when the length does not
    /// match `width × height × channels` or `channels` is zero.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Option<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(channels as usize)?;
        if channels == 0 || data.len() != expected {
            return None;
        }
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// One payload bit per channel byte.
    pub fn usable_bits(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Largest payload, in bytes, that fits in `image` alongside the header.
pub fn capacity_bytes(image: &PixelBuffer) -> u64 {
    image.usable_bits().saturating_sub(HEADER_BITS) / 8
}

/// Bits needed to embed a payload of `len` bytes.
pub fn required_bits(len: usize) -> u64 {
    HEADER_BITS + 8 * len as u64
}

/// Embed `payload` into a copy of `image`.
pub fn embed(image: &PixelBuffer, payload: &[u8]) -> Result<PixelBuffer, CodecError> {
    let available = image.usable_bits();
    let required = required_bits(payload.len());
    let declared = u32::try_from(payload.len()).map_err(|_| CodecError::CapacityExceeded {
        required,
        available,
    })?;
    if required > available {
        return Err(CodecError::CapacityExceeded {
            required,
            available,
        });
    }

    let mut out = image.clone();
    let bits = declared
        .to_be_bytes()
        .into_iter()
        .chain(payload.iter().copied())
        .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1));

    for (slot, bit) in out.data.iter_mut().zip(bits) {
        *slot = (*slot & !1) | bit;
    }

    Ok(out)
}

/// Recover the payload previously written by [`embed`].
pub fn extract(image: &PixelBuffer) -> Result<Vec<u8>, CodecError> {
    let available = image.usable_bits();
    if available < HEADER_BITS {
        return Err(CodecError::TruncatedHeader { available });
    }

    let header = pack_bytes(&image.data[..HEADER_BITS as usize]);
    let declared = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);

    let remaining = available - HEADER_BITS;
    if 8 * u64::from(declared) > remaining {
        return Err(CodecError::TruncatedPayload {
            declared,
            available: remaining,
        });
    }

    let start = HEADER_BITS as usize;
    let end = start + 8 * declared as usize;
    Ok(pack_bytes(&image.data[start..end]))
}

/// Pack the LSBs of `slots` into bytes, MSB first. `slots.len()` is a
/// multiple of 8.
fn pack_bytes(slots: &[u8]) -> Vec<u8> {
    slots
        .chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, slot| (acc << 1) | (slot & 1)))
        .collect()
}
