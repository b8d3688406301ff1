//! Minimal codec for `.npz` archives holding one-dimensional int64 arrays, which is
//! all the binary pack metadata needs. An `.npz` is a zip archive of `.npy` members;
//! numpy writes them uncompressed by default but deflated members are accepted too.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::errors::Error;

const LOCAL_HEADER_SIG: u32 = 0x04034b50;
const CENTRAL_DIR_SIG: u32 = 0x02014b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054b50;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

fn read_u16(buf: &[u8], at: usize) -> Result<u16, Error> {
    let bytes: [u8; 2] = buf
        .get(at..at + 2)
        .ok_or_else(|| Error::Corruption("truncated archive".to_string()))?
        .try_into()
        .unwrap();
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, Error> {
    let bytes: [u8; 4] = buf
        .get(at..at + 4)
        .ok_or_else(|| Error::Corruption("truncated archive".to_string()))?
        .try_into()
        .unwrap();
    Ok(u32::from_le_bytes(bytes))
}

/// Reads every `<name>.npy` member of the archive as a `Vec<i64>`.
pub(crate) fn read_int64_arrays(path: &Path) -> Result<HashMap<String, Vec<i64>>, Error> {
    let buf = std::fs::read(path)?;
    let mut arrays = HashMap::new();
    let mut at = 0usize;
    loop {
        match read_u32(&buf, at) {
            Ok(LOCAL_HEADER_SIG) => {}
            Ok(CENTRAL_DIR_SIG) | Ok(END_OF_CENTRAL_DIR_SIG) | Err(_) => break,
            Ok(sig) => {
                return Err(Error::Corruption(format!(
                    "{}: unexpected zip signature {:#010x}",
                    path.display(),
                    sig
                )))
            }
        }
        let flags = read_u16(&buf, at + 6)?;
        if flags & 0x0008 != 0 {
            return Err(Error::Corruption(format!(
                "{}: zip data descriptors are not supported",
                path.display()
            )));
        }
        let method = read_u16(&buf, at + 8)?;
        let compressed_size = read_u32(&buf, at + 18)? as usize;
        let name_len = read_u16(&buf, at + 26)? as usize;
        let extra_len = read_u16(&buf, at + 28)? as usize;
        let name_start = at + 30;
        let data_start = name_start + name_len + extra_len;
        let name = String::from_utf8_lossy(
            buf.get(name_start..name_start + name_len)
                .ok_or_else(|| Error::Corruption("truncated archive".to_string()))?,
        )
        .to_string();
        let data = buf
            .get(data_start..data_start + compressed_size)
            .ok_or_else(|| Error::Corruption("truncated archive".to_string()))?;

        let npy = match method {
            METHOD_STORED => data.to_vec(),
            METHOD_DEFLATED => {
                let mut decoded = Vec::new();
                flate2::read::DeflateDecoder::new(data)
                    .read_to_end(&mut decoded)
                    .map_err(|e| {
                        Error::Corruption(format!("{}: deflate: {}", path.display(), e))
                    })?;
                decoded
            }
            other => {
                return Err(Error::Corruption(format!(
                    "{}: unsupported zip compression method {}",
                    path.display(),
                    other
                )))
            }
        };

        let key = name.strip_suffix(".npy").unwrap_or(&name).to_string();
        arrays.insert(key, parse_npy_int64(&npy)?);
        at = data_start + compressed_size;
    }
    Ok(arrays)
}

fn parse_npy_int64(bytes: &[u8]) -> Result<Vec<i64>, Error> {
    let magic = [0x93u8, b'N', b'U', b'M', b'P', b'Y'];
    if bytes.len() < 10 || bytes[..6] != magic {
        return Err(Error::Corruption("not an npy array".to_string()));
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (read_u16(bytes, 8)? as usize, 10),
        2 | 3 => (read_u32(bytes, 8)? as usize, 12),
        v => {
            return Err(Error::Corruption(format!(
                "unsupported npy format version {}",
                v
            )))
        }
    };
    let header = String::from_utf8_lossy(
        bytes
            .get(header_start..header_start + header_len)
            .ok_or_else(|| Error::Corruption("truncated npy header".to_string()))?,
    )
    .to_string();
    if !header.contains("<i8") {
        return Err(Error::Corruption(format!(
            "expected little-endian int64 npy data, header: {}",
            header.trim()
        )));
    }
    if header.contains("True") {
        return Err(Error::Corruption(
            "fortran-ordered npy data is not supported".to_string(),
        ));
    }

    let data = &bytes[header_start + header_len..];
    if data.len() % 8 != 0 {
        return Err(Error::Corruption(format!(
            "npy payload of {} bytes is not a whole number of int64s",
            data.len()
        )));
    }
    let values: Vec<i64> = data
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
        .collect();

    // Cross-check against the declared shape when it parses cleanly
    if let Some(count) = declared_count(&header) {
        if count != values.len() {
            return Err(Error::Corruption(format!(
                "npy declares {} elements but carries {}",
                count,
                values.len()
            )));
        }
    }
    Ok(values)
}

fn declared_count(header: &str) -> Option<usize> {
    let open = header.find('(')?;
    let close = header[open..].find(')')? + open;
    let digits: String = header[open + 1..close]
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn npy_bytes(values: &[i64]) -> Vec<u8> {
    let dict = format!(
        "{{'descr': '<i8', 'fortran_order': False, 'shape': ({},), }}",
        values.len()
    );
    let magic = [0x93u8, b'N', b'U', b'M', b'P', b'Y', 0x01, 0x00];
    // Pad with spaces plus a closing newline so the payload starts 64-aligned
    let unpadded = magic.len() + 2 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let header_len = (dict.len() + padding + 1) as u16;

    let mut out = Vec::with_capacity(unpadded + padding + values.len() * 8);
    out.extend_from_slice(&magic);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(0x20u8).take(padding));
    out.push(b'\n');
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Writes named int64 arrays as an uncompressed `.npz` archive, the way
/// `numpy.savez` does.
pub(crate) fn write_int64_arrays(path: &Path, arrays: &[(&str, &[i64])]) -> Result<(), Error> {
    let mut out: Vec<u8> = Vec::new();
    let mut central: Vec<u8> = Vec::new();

    for (name, values) in arrays {
        let member_name = format!("{}.npy", name);
        let payload = npy_bytes(values);
        let mut crc = flate2::Crc::new();
        crc.update(&payload);
        let offset = out.len() as u32;

        out.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&METHOD_STORED.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&crc.sum().to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&(member_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(member_name.as_bytes());
        out.extend_from_slice(&payload);

        central.extend_from_slice(&CENTRAL_DIR_SIG.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&METHOD_STORED.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // mod time
        central.extend_from_slice(&0u16.to_le_bytes()); // mod date
        central.extend_from_slice(&crc.sum().to_le_bytes());
        central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        central.extend_from_slice(&(member_name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra len
        central.extend_from_slice(&0u16.to_le_bytes()); // comment len
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(member_name.as_bytes());
    }

    let central_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // this disk
    out.extend_from_slice(&0u16.to_le_bytes()); // central dir disk
    out.extend_from_slice(&(arrays.len() as u16).to_le_bytes());
    out.extend_from_slice(&(arrays.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&central_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment len

    std::fs::write(path, out)?;
    Ok(())
}
