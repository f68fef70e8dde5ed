//! The barcode decode engine seam and its `rqrr` implementation.
//!
//! One decode pass:
//! ```text
//! begin() → fill grayscale image → end() → symbol_count() → extract(i) → decode(symbol)
//! ```

use bytes::Bytes;
use qraken_core::{DecodeError, Resolution};
use tracing::trace;

/// Grayscale working image handed out by [`DecodeEngine::begin`].
pub struct DecodeImage<'a> {
    pub pixels: &'a mut [u8],
    pub width: u32,
    pub height: u32,
}

impl DecodeImage<'_> {
    pub fn size(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

pub trait DecodeEngine {
    /// A detected candidate, not yet decoded.
    type Symbol;

    /// Start a pass; the caller fills the returned image.
    fn begin(&mut self) -> DecodeImage<'_>;

    /// Finish the pass and run detection on the filled image.
    fn end(&mut self);

    /// Candidates found by the last [`end`](Self::end).
    fn symbol_count(&self) -> usize;

    fn extract(&self, index: usize) -> Result<Self::Symbol, DecodeError>;

    /// Decode a candidate into its payload bytes.
    fn decode(&self, symbol: &Self::Symbol) -> Result<Bytes, DecodeError>;
}

// ── rqrr ──────────────────────────────────────────────────────────────────────

/// QR decoding with `rqrr`.
///
/// `rqrr` grids borrow the prepared image, so every candidate is decoded in
/// [`end`](DecodeEngine::end) and the outcomes are kept until the next pass.
pub struct RqrrEngine {
    size: Resolution,
    image: Vec<u8>,
    symbols: Vec<Result<Bytes, String>>,
}

/// Index of a candidate found by [`RqrrEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RqrrSymbol(usize);

impl RqrrEngine {
    pub fn new(size: Resolution) -> Self {
        Self { size, image: vec![0; size.total_pixels()], symbols: Vec::new() }
    }

    pub fn size(&self) -> Resolution {
        self.size
    }
}

impl DecodeEngine for RqrrEngine {
    type Symbol = RqrrSymbol;

    fn begin(&mut self) -> DecodeImage<'_> {
        self.symbols.clear();
        DecodeImage { pixels: &mut self.image, width: self.size.width, height: self.size.height }
    }

    fn end(&mut self) {
        let width = self.size.width as usize;
        let image = &self.image;
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            width,
            self.size.height as usize,
            |x, y| image[y * width + x],
        );
        self.symbols = prepared
            .detect_grids()
            .iter()
            .map(|grid| {
                let mut payload = Vec::new();
                grid.decode_to(&mut payload)
                    .map(|_| Bytes::from(payload))
                    .map_err(|e| format!("{e:?}"))
            })
            .collect();
        if !self.symbols.is_empty() {
            trace!("rqrr: {} candidate(s)", self.symbols.len());
        }
    }

    fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    fn extract(&self, index: usize) -> Result<RqrrSymbol, DecodeError> {
        if index < self.symbols.len() {
            Ok(RqrrSymbol(index))
        } else {
            Err(DecodeError::NoSymbol(index))
        }
    }

    fn decode(&self, symbol: &RqrrSymbol) -> Result<Bytes, DecodeError> {
        match self.symbols.get(symbol.0) {
            Some(Ok(payload)) => Ok(payload.clone()),
            Some(Err(reason)) => Err(DecodeError::DecodeFailed { reason: reason.clone() }),
            None => Err(DecodeError::NoSymbol(symbol.0)),
        }
    }
}
