//! Value comparison over locally materialized chunks of remote memory.
//!
//! Every kind has a scalar implementation, which is the reference: any
//! accelerated path must report the same addresses in the same order.
//! Vector instructions are confined to this module.

use crate::value::{ScanValue, ValueKind};

pub(crate) const PAGE_SIZE: usize = 4096;

/// Elements per expected hit when reserving output space.
const EXPECTED_HIT_RATIO: usize = 32;

mod sealed {
    pub trait Sealed {}
}

/// A plain numeric type that can be materialized from remote bytes and
/// searched for.
///
/// Sealed: every implementor is valid for any bit pattern, which the scanner
/// relies on when filling buffers of `Self` straight from remote memory.
pub trait Scannable: sealed::Sealed + Copy + PartialEq + Default + Send + Sync + 'static {
    const KIND: ValueKind;

    /// Whether a stored element counts as equal to `target`.
    fn matches(stored: Self, target: Self, epsilon: f64) -> bool;

    /// Appends to `out` the address of every element of `buf` matching
    /// `target`, where `buf[0]` was read from `base`.
    fn filter_into(buf: &[Self], base: usize, target: Self, epsilon: f64, out: &mut Vec<usize>) {
        filter_scalar(buf, base, target, epsilon, out);
    }

    fn into_scan_value(self) -> ScanValue;

    fn from_scan_value(value: ScanValue) -> Option<Self>;
}

/// Reference implementation shared by every kind.
pub fn filter_scalar<T: Scannable>(buf: &[T], base: usize, target: T, epsilon: f64, out: &mut Vec<usize>) {
    let width = std::mem::size_of::<T>();
    for (i, &stored) in buf.iter().enumerate() {
        if T::matches(stored, target, epsilon) {
            out.push(base + i * width);
        }
    }
}

/// Output space worth reserving before filtering `count` elements.
pub(crate) fn expected_hits(count: usize) -> usize {
    count / EXPECTED_HIT_RATIO
}

/// Views a buffer of scannable elements as raw bytes so it can be filled by
/// a cross-process read.
pub(crate) fn as_bytes_mut<T: Scannable>(buf: &mut [T]) -> &mut [u8] {
    // SAFETY: `Scannable` is sealed to primitive numbers, which have no
    // padding and accept any bit pattern.
    unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut u8, std::mem::size_of_val(buf)) }
}

pub(crate) fn as_bytes<T: Scannable>(buf: &[T]) -> &[u8] {
    // SAFETY: as above; primitive numbers have no padding bytes.
    unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, std::mem::size_of_val(buf)) }
}

/// Filters `buf`, reserving output space for a low hit rate up front.
pub fn filter<T: Scannable>(buf: &[T], base: usize, target: T, epsilon: f64) -> Vec<usize> {
    let mut out = Vec::with_capacity(expected_hits(buf.len()));
    T::filter_into(buf, base, target, epsilon, &mut out);
    out
}

/// Whether 4-byte integer filtering runs on vector instructions on this host.
#[cfg(target_arch = "x86_64")]
pub fn accelerated() -> bool {
    is_x86_feature_detected!("avx2")
}

#[cfg(not(target_arch = "x86_64"))]
pub fn accelerated() -> bool {
    false
}

fn filter_dwords(buf: &[u32], base: usize, target: u32, out: &mut Vec<usize>) {
    #[allow(unused_mut)]
    let mut done = 0;

    #[cfg(target_arch = "x86_64")]
    {
        if accelerated() {
            // SAFETY: avx2 support was just checked.
            done = unsafe { avx2::filter_u32(buf, base, target, out) };
        }
    }

    for (i, &stored) in buf.iter().enumerate().skip(done) {
        if stored == target {
            out.push(base + i * 4);
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod avx2 {
    use std::arch::x86_64::*;

    use super::PAGE_SIZE;

    const LANES: usize = 8;
    const PAGE_ELEMENTS: usize = PAGE_SIZE / 4;

    /// Handles the whole vectors of `buf` and returns how many elements were
    /// consumed; the caller finishes the tail.
    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn filter_u32(buf: &[u32], base: usize, target: u32, out: &mut Vec<usize>) -> usize {
        let aligned_end = buf.len() / LANES * LANES;
        let needle = _mm256_set1_epi32(target as i32);
        let ptr = buf.as_ptr();

        let mut i = 0;
        while i < aligned_end {
            if i % PAGE_ELEMENTS == 0 {
                // Prefetch never faults, so running past the buffer is harmless.
                _mm_prefetch::<_MM_HINT_NTA>(ptr.wrapping_add(i + PAGE_ELEMENTS) as *const i8);
            }

            let chunk = _mm256_loadu_si256(ptr.add(i) as *const __m256i);
            let cmp = _mm256_cmpeq_epi32(chunk, needle);
            let mut mask = _mm256_movemask_ps(_mm256_castsi256_ps(cmp)) as u32;
            while mask != 0 {
                let lane = mask.trailing_zeros() as usize;
                out.push(base + (i + lane) * 4);
                mask &= mask - 1;
            }

            i += LANES;
        }

        aligned_end
    }
}

macro_rules! impl_scannable_int {
    ($($type:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $type {}

            impl Scannable for $type {
                const KIND: ValueKind = ValueKind::$kind;

                #[inline]
                fn matches(stored: Self, target: Self, _epsilon: f64) -> bool {
                    stored == target
                }

                fn into_scan_value(self) -> ScanValue {
                    ScanValue::$kind(self)
                }

                fn from_scan_value(value: ScanValue) -> Option<Self> {
                    match value {
                        ScanValue::$kind(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_scannable_int!(u8 => U8, u16 => U16, u64 => U64);

impl sealed::Sealed for u32 {}

impl Scannable for u32 {
    const KIND: ValueKind = ValueKind::U32;

    #[inline]
    fn matches(stored: Self, target: Self, _epsilon: f64) -> bool {
        stored == target
    }

    fn filter_into(buf: &[Self], base: usize, target: Self, _epsilon: f64, out: &mut Vec<usize>) {
        filter_dwords(buf, base, target, out);
    }

    fn into_scan_value(self) -> ScanValue {
        ScanValue::U32(self)
    }

    fn from_scan_value(value: ScanValue) -> Option<Self> {
        match value {
            ScanValue::U32(v) => Some(v),
            _ => None,
        }
    }
}

impl sealed::Sealed for i32 {}

impl Scannable for i32 {
    const KIND: ValueKind = ValueKind::I32;

    #[inline]
    fn matches(stored: Self, target: Self, _epsilon: f64) -> bool {
        stored == target
    }

    fn filter_into(buf: &[Self], base: usize, target: Self, _epsilon: f64, out: &mut Vec<usize>) {
        // SAFETY: i32 and u32 share size and alignment, and equality of
        // two's complement values is equality of their bits.
        let dwords = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u32, buf.len()) };
        filter_dwords(dwords, base, target as u32, out);
    }

    fn into_scan_value(self) -> ScanValue {
        ScanValue::I32(self)
    }

    fn from_scan_value(value: ScanValue) -> Option<Self> {
        match value {
            ScanValue::I32(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_scannable_float {
    ($($type:ty => $kind:ident),* $(,)?) => {
        $(
            impl sealed::Sealed for $type {}

            impl Scannable for $type {
                const KIND: ValueKind = ValueKind::$kind;

                // Stored floats rarely round-trip exactly, so compare within epsilon.
                #[inline]
                fn matches(stored: Self, target: Self, epsilon: f64) -> bool {
                    ((stored as f64) - (target as f64)).abs() < epsilon
                }

                fn into_scan_value(self) -> ScanValue {
                    ScanValue::$kind(self)
                }

                fn from_scan_value(value: ScanValue) -> Option<Self> {
                    match value {
                        ScanValue::$kind(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_scannable_float!(f32 => F32, f64 => F64);

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x7f00_0000_0000;

    #[test]
    fn finds_vector_and_tail_matches_in_order() {
        let mut buf = vec![0u32; 8 * 3 + 5];
        for i in [0, 7, 8, 15, 20, 24, 28] {
            buf[i] = 0x1234;
        }

        let found = filter(&buf, BASE, 0x1234, 0.0);
        let expected: Vec<usize> = [0, 7, 8, 15, 20, 24, 28].iter().map(|i| BASE + i * 4).collect();

        assert_eq!(found, expected);
    }

    #[test]
    fn accelerated_matches_scalar_across_pages() {
        let mut buf: Vec<u32> = (0..(PAGE_SIZE * 3 / 4 + 3) as u32).map(|i| i % 97).collect();
        buf[PAGE_SIZE / 4 - 1] = 5;
        buf[PAGE_SIZE / 4] = 5;

        let mut scalar = Vec::new();
        filter_scalar(&buf, BASE, 5, 0.0, &mut scalar);

        assert_eq!(filter(&buf, BASE, 5, 0.0), scalar);
    }

    #[test]
    fn signed_dwords_compare_bitwise() {
        let buf = [-1i32, 0, i32::MIN, -1, 5, 6, 7, 8, -1];
        let found = filter(&buf, BASE, -1, 0.0);

        assert_eq!(found, vec![BASE, BASE + 12, BASE + 32]);
    }

    #[test]
    fn floats_use_epsilon() {
        let buf = [1.0f32, 1.000_000_1, 1.5, 0.999_999_9, f32::NAN];

        assert_eq!(filter(&buf, BASE, 1.0, 1e-3), vec![BASE, BASE + 4, BASE + 12]);
        assert_eq!(filter(&buf, BASE, 1.0, 1e-12), vec![BASE]);
    }

    #[test]
    fn doubles_use_epsilon() {
        let buf = [100.25f64, 100.250_000_000_1, -100.25];

        assert_eq!(filter(&buf, BASE, 100.25, 1e-9), vec![BASE, BASE + 8]);
    }

    #[test]
    fn narrow_integers_use_element_width() {
        let bytes = [3u8, 1, 3, 3];
        assert_eq!(filter(&bytes, BASE, 3, 0.0), vec![BASE, BASE + 2, BASE + 3]);

        let words = [9u16, 1, 9];
        assert_eq!(filter(&words, BASE, 9, 0.0), vec![BASE, BASE + 4]);

        let quads = [u64::MAX, 0, u64::MAX];
        assert_eq!(filter(&quads, BASE, u64::MAX, 0.0), vec![BASE, BASE + 16]);
    }

    #[test]
    fn scan_values_round_trip_through_kinds() {
        assert_eq!(u16::from_scan_value(ScanValue::U16(4)), Some(4));
        assert_eq!(u16::from_scan_value(ScanValue::U32(4)), None);
        assert_eq!(7i32.into_scan_value(), ScanValue::I32(7));
        assert_eq!(<f64 as Scannable>::KIND, ValueKind::F64);
    }
}
