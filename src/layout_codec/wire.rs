//! Low-level big-endian integer and length-prefixed string primitives
//! shared by both body forms (spec §6: "all integers ... are big-endian,
//! fixed-width. Strings are `u16 length` + UTF-8 bytes").

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::LayoutCodecError;

pub fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

pub fn read_string(r: &mut impl Read) -> Result<String, LayoutCodecError> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| LayoutCodecError::MalformedString)
}

pub fn write_permission_status(w: &mut impl Write, p: &super::tree::PermissionStatus) -> io::Result<()> {
    write_string(w, &p.user)?;
    write_string(w, &p.group)?;
    w.write_i16::<BigEndian>(p.mode)
}

pub fn read_permission_status(
    r: &mut impl Read,
) -> Result<super::tree::PermissionStatus, LayoutCodecError> {
    let user = read_string(r)?;
    let group = read_string(r)?;
    let mode = r.read_i16::<BigEndian>()?;
    Ok(super::tree::PermissionStatus { user, group, mode })
}

pub use byteorder::BigEndian as Be;
pub use byteorder::{ReadBytesExt as ReadExt, WriteBytesExt as WriteExt};
