use std::io::{Read, Write};

use crate::{Error, Result};

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// crc32c rotated right by 15 bits and offset, the checksum variant the
/// record framing stores on disk.
pub(crate) fn masked_crc(bytes: &[u8]) -> u32 {
    let crc = crc32c::crc32c(bytes);
    ((crc >> 15) | (crc << 17)).wrapping_add(CRC_MASK_DELTA)
}

/// Append one framed record: little endian length, masked length checksum,
/// payload, masked payload checksum.
pub(crate) fn write_record<W: Write>(writer: &mut W, data: &[u8]) -> Result {
    let header = (data.len() as u64).to_le_bytes();
    writer.write_all(&header)?;
    writer.write_all(&masked_crc(&header).to_le_bytes())?;
    writer.write_all(data)?;
    writer.write_all(&masked_crc(data).to_le_bytes())?;
    Ok(())
}

/// Read the next framed record, `None` on a clean end of stream.
///
/// The length checksum is verified before the payload buffer gets allocated,
/// so a corrupted length cannot trigger a huge allocation.
pub(crate) fn read_record<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 8];
    if !read_exact_or_eof(reader, &mut header)? {
        return Ok(None);
    }

    let mut checksum = [0u8; 4];
    reader.read_exact(&mut checksum).map_err(truncated)?;
    if u32::from_le_bytes(checksum) != masked_crc(&header) {
        return Err(Error::ChecksumMismatch { part: "length" });
    }

    let length = u64::from_le_bytes(header);
    let mut data = vec![0u8; length as usize];
    reader.read_exact(&mut data).map_err(truncated)?;

    reader.read_exact(&mut checksum).map_err(truncated)?;
    if u32::from_le_bytes(checksum) != masked_crc(&data) {
        return Err(Error::ChecksumMismatch { part: "data" });
    }

    Ok(Some(data))
}

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::TruncatedRecord
    } else {
        Error::IOError(err)
    }
}

/// Fill `buf` completely, `false` when the stream ends exactly at a record
/// boundary, [`Error::TruncatedRecord`] when it ends inside the buffer.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(Error::TruncatedRecord),
            Ok(count) => filled += count,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => (),
            Err(err) => return Err(Error::IOError(err)),
        }
    }

    Ok(true)
}
