//! Length-prefixed binary encoding shared by [`crate::op`] and [`crate::log`].
//!
//! The spec's reference implementation uses `FlatBuffers`; any byte-identical
//! encoder is acceptable. This is a from-scratch writer/reader instead of a
//! codegen toolchain: every string and byte vector is `u32`-length-prefixed
//! (little-endian), every list is `u32`-count-prefixed, and fixed-width
//! integers are written little-endian. Field order is fixed by the caller,
//! not self-describing — this is a wire format, not a container format.

use std::io::{self, Read, Write};

/// Write a `u32` length-prefixed byte string.
///
/// # Errors
/// Returns an error if the underlying writer fails.
pub fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::other("field exceeds u32::MAX bytes"))?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(bytes)
}

/// Write a `u32` length-prefixed UTF-8 string.
///
/// # Errors
/// Returns an error if the underlying writer fails.
pub fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

/// Write a `u32` count-prefixed list of strings.
///
/// # Errors
/// Returns an error if the underlying writer fails.
pub fn write_str_list<W: Write>(w: &mut W, items: &[String]) -> io::Result<()> {
    let count = u32::try_from(items.len())
        .map_err(|_| io::Error::other("list exceeds u32::MAX elements"))?;
    w.write_all(&count.to_le_bytes())?;
    for item in items {
        write_str(w, item)?;
    }
    Ok(())
}

/// Write a single byte.
///
/// # Errors
/// Returns an error if the underlying writer fails.
pub fn write_u8<W: Write>(w: &mut W, b: u8) -> io::Result<()> {
    w.write_all(&[b])
}

/// Write a little-endian `i64`.
///
/// # Errors
/// Returns an error if the underlying writer fails.
pub fn write_i64<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Write a little-endian `u32`.
///
/// # Errors
/// Returns an error if the underlying writer fails.
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Read a `u32` length-prefixed byte string.
///
/// # Errors
/// Returns an error if the reader is exhausted or truncated mid-field.
pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a `u32` length-prefixed UTF-8 string.
///
/// # Errors
/// Returns an error if the reader is exhausted, truncated, or the bytes are
/// not valid UTF-8.
pub fn read_str<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Read a `u32` count-prefixed list of strings.
///
/// # Errors
/// Returns an error if the reader is exhausted or truncated mid-list.
pub fn read_str_list<R: Read>(r: &mut R) -> io::Result<Vec<String>> {
    let count = read_u32(r)?;
    (0..count).map(|_| read_str(r)).collect()
}

/// Read a single byte.
///
/// # Errors
/// Returns an error if the reader is exhausted.
pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Read a little-endian `i64`.
///
/// # Errors
/// Returns an error if the reader is exhausted.
pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Read a little-endian `u32`.
///
/// # Errors
/// Returns an error if the reader is exhausted.
pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_round_trip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "hello world").unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(read_str(&mut cur).unwrap(), "hello world");
    }

    #[test]
    fn empty_str_round_trip() {
        let mut buf = Vec::new();
        write_str(&mut buf, "").unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(read_str(&mut cur).unwrap(), "");
    }

    #[test]
    fn str_list_round_trip() {
        let items = vec!["a".to_owned(), "bb".to_owned(), "ccc".to_owned()];
        let mut buf = Vec::new();
        write_str_list(&mut buf, &items).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(read_str_list(&mut cur).unwrap(), items);
    }

    #[test]
    fn empty_str_list_round_trip() {
        let mut buf = Vec::new();
        write_str_list(&mut buf, &[]).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(read_str_list(&mut cur).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn i64_round_trip_negative() {
        let mut buf = Vec::new();
        write_i64(&mut buf, -42).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(read_i64(&mut cur).unwrap(), -42);
    }

    #[test]
    fn u8_round_trip() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 0x03).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert_eq!(read_u8(&mut cur).unwrap(), 0x03);
    }

    #[test]
    fn truncated_input_errors() {
        let buf = vec![5, 0, 0, 0, b'h', b'i']; // claims 5 bytes, has 2
        let mut cur = io::Cursor::new(buf);
        assert!(read_str(&mut cur).is_err());
    }

    #[test]
    fn non_utf8_errors() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &[0xff, 0xfe]).unwrap();
        let mut cur = io::Cursor::new(buf);
        assert!(read_str(&mut cur).is_err());
    }
}
