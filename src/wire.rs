//! Fixed-width big-endian primitives shared by the binary session codecs.

use crate::error::{io_error, SessionError, SessionResult};
use std::io::{Read, Write};

pub(crate) fn write_u8<W: Write>(w: &mut W, value: u8, field: &str) -> SessionResult<()> {
    w.write_all(&[value])
        .map_err(|err| io_error(&format!("writing {field}"), err))
}

pub(crate) fn write_i32<W: Write>(w: &mut W, value: i32, field: &str) -> SessionResult<()> {
    w.write_all(&value.to_be_bytes())
        .map_err(|err| io_error(&format!("writing {field}"), err))
}

pub(crate) fn write_i64<W: Write>(w: &mut W, value: i64, field: &str) -> SessionResult<()> {
    w.write_all(&value.to_be_bytes())
        .map_err(|err| io_error(&format!("writing {field}"), err))
}

pub(crate) fn write_len<W: Write>(w: &mut W, len: usize, field: &str) -> SessionResult<()> {
    let len = i32::try_from(len)
        .map_err(|_| SessionError::serialization(format!("{field} is too large to encode")))?;
    write_i32(w, len, field)
}

/// `i32` length followed by the raw bytes.
pub(crate) fn write_bytes<W: Write>(w: &mut W, bytes: &[u8], field: &str) -> SessionResult<()> {
    write_len(w, bytes.len(), field)?;
    w.write_all(bytes)
        .map_err(|err| io_error(&format!("writing {field}"), err))
}

pub(crate) fn write_string<W: Write>(w: &mut W, value: &str, field: &str) -> SessionResult<()> {
    write_bytes(w, value.as_bytes(), field)
}

pub(crate) fn read_u8<R: Read>(r: &mut R, field: &str) -> SessionResult<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)
        .map_err(|err| io_error(&format!("reading {field}"), err))?;
    Ok(buf[0])
}

pub(crate) fn read_i32<R: Read>(r: &mut R, field: &str) -> SessionResult<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)
        .map_err(|err| io_error(&format!("reading {field}"), err))?;
    Ok(i32::from_be_bytes(buf))
}

pub(crate) fn read_i64<R: Read>(r: &mut R, field: &str) -> SessionResult<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)
        .map_err(|err| io_error(&format!("reading {field}"), err))?;
    Ok(i64::from_be_bytes(buf))
}

pub(crate) fn read_len<R: Read>(r: &mut R, field: &str) -> SessionResult<usize> {
    let len = read_i32(r, field)?;
    usize::try_from(len)
        .map_err(|_| SessionError::serialization(format!("negative length {len} for {field}")))
}

/// Reads exactly `len` bytes without trusting `len` for the allocation up front.
pub(crate) fn read_exact_vec<R: Read>(
    r: &mut R,
    len: usize,
    field: &str,
) -> SessionResult<Vec<u8>> {
    let mut buf = Vec::new();
    let read = r
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|err| io_error(&format!("reading {field}"), err))?;
    if read != len {
        return Err(io_error(
            &format!("reading {field}"),
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {len} bytes, found {read}"),
            ),
        ));
    }
    Ok(buf)
}

pub(crate) fn read_bytes<R: Read>(r: &mut R, field: &str) -> SessionResult<Vec<u8>> {
    let len = read_len(r, field)?;
    read_exact_vec(r, len, field)
}

pub(crate) fn utf8(bytes: Vec<u8>, field: &str) -> SessionResult<String> {
    String::from_utf8(bytes).map_err(|err| {
        SessionError::serialization_caused_by(format!("{field} is not valid UTF-8"), err)
    })
}

pub(crate) fn read_string<R: Read>(r: &mut R, field: &str) -> SessionResult<String> {
    utf8(read_bytes(r, field)?, field)
}
