use crate::result::*;

/// A checked cast from u64 to usize
///
/// We could use the `cast` crate,
/// (https://docs.rs/cast/0.2.3/cast/)
/// but these are the only ones we really need.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    if cfg!(target_pointer_width = "64") {
        Ok(i as usize)
    } else if i > usize::MAX as u64 {
        Err(ZipError::InsufficientAddressSpace)
    } else {
        Ok(i as usize)
    }
}

/// Narrows a size or offset into a 32-bit header field.
///
/// Without Zip64 records, anything past 4 GiB can't be described.
pub fn u32<I: TryInto<u32>>(i: I, what: &'static str) -> ZipResult<u32> {
    i.try_into().map_err(|_| ZipError::TooLarge(what))
}

/// Narrows a length into a 16-bit header field (names, comments, counts).
pub fn u16<I: TryInto<u16>>(i: I, what: &'static str) -> ZipResult<u16> {
    i.try_into().map_err(|_| ZipError::TooLarge(what))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn narrowing() {
        assert_eq!(u32(12u64, "size").unwrap(), 12);
        assert!(matches!(
            u32(u64::from(u32::MAX) + 1, "size"),
            Err(ZipError::TooLarge("size"))
        ));
        assert_eq!(u16(300usize, "name").unwrap(), 300);
        assert!(u16(70_000usize, "name").is_err());
        assert_eq!(usize(7u32).unwrap(), 7);
    }
}
