//! Small helpers with no obvious better home, mirroring `utility.c`.

/// Copies as much of `src` as fits into `dst`, returning the number of
/// bytes copied.
///
/// Unlike the original `CopyString`, there is no null terminator to
/// reserve space for: callers working with `&str`/`&[u8]` already carry
/// their own length, so truncation simply means "as many bytes as fit".
pub fn copy_bounded(dst: &mut [u8], src: &[u8]) -> usize {
    let len = src.len().min(dst.len());
    dst[..len].copy_from_slice(&src[..len]);
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_whole_source_when_it_fits() {
        let mut dst = [0u8; 8];
        let n = copy_bounded(&mut dst, b"hello");
        assert_eq!(n, 5);
        assert_eq!(&dst[..5], b"hello");
    }

    #[test]
    fn truncates_when_destination_is_smaller() {
        let mut dst = [0u8; 3];
        let n = copy_bounded(&mut dst, b"hello");
        assert_eq!(n, 3);
        assert_eq!(&dst, b"hel");
    }
}
