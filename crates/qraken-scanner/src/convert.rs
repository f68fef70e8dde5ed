//! RGB565 → 8-bit luminance.

use qraken_core::Resolution;

/// Unweighted channel average of one RGB565 pixel.
///
/// Each channel is widened to 8 bits by shifting (no low-bit replication), so
/// full-scale red is 248, full-scale green 252. The sum is truncated by `/ 3`.
#[inline]
pub fn rgb565_to_luma(px: u16) -> u8 {
    let r = ((px >> 11) & 0x1F) << 3;
    let g = ((px >> 5) & 0x3F) << 2;
    let b = (px & 0x1F) << 3;
    ((r + g + b) / 3) as u8
}

/// Convert the top-left `dst_size` rectangle of a little-endian RGB565 frame
/// of width `src_width` into `dst` (row-major, `dst_size.width` stride).
///
/// Rows or columns past the end of `src` are left untouched in `dst`.
pub fn rgb565_frame_to_luma(src: &[u8], src_width: u32, dst: &mut [u8], dst_size: Resolution) {
    let src_width = src_width as usize;
    let (w, h) = (dst_size.width as usize, dst_size.height as usize);
    let cols = w.min(src_width);

    for y in 0..h {
        let src_row = y * src_width * 2;
        let Some(row) = src.get(src_row..src_row + cols * 2) else {
            break;
        };
        let out = &mut dst[y * w..y * w + cols];
        for (pixel, luma) in row.chunks_exact(2).zip(out.iter_mut()) {
            *luma = rgb565_to_luma(u16::from_le_bytes([pixel[0], pixel[1]]));
        }
    }
}
