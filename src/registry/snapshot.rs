//! Binary snapshot of the registry maps
//!
//! ```text
//! "EVDF" | version u16 | forward_count u32 | forward entries
//!        | reverse_count u32 | reverse entries | crc32 u32
//!
//! entry = id u32 | source u8 | host str | key str | group str
//! str   = len u32 | utf-8 bytes
//! ```
//!
//! All integers are little endian. The trailing CRC32 covers every byte
//! before it. Both maps are written so a damaged reverse map is detected
//! instead of silently rebuilt from the forward map.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::{EventDescriptor, EventId};
use crate::error::SnapshotError;
use crate::source::SourceKind;

/// File magic
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"EVDF";

/// Current format version
pub const SNAPSHOT_VERSION: u16 = 1;

const CHECKSUM_SIZE: usize = 4;

type Maps = (
    BTreeMap<EventId, EventDescriptor>,
    HashMap<EventDescriptor, EventId>,
);

pub(super) fn encode(
    forward: &BTreeMap<EventId, EventDescriptor>,
    reverse: &HashMap<EventDescriptor, EventId>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 * (forward.len() + 1));
    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());

    buf.extend_from_slice(&(forward.len() as u32).to_le_bytes());
    for (id, descriptor) in forward {
        write_entry(&mut buf, *id, descriptor);
    }

    // Reverse entries sorted by id so identical registries give identical bytes
    let mut reverse_entries: Vec<_> = reverse.iter().map(|(d, id)| (*id, d)).collect();
    reverse_entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
    buf.extend_from_slice(&(reverse_entries.len() as u32).to_le_bytes());
    for (id, descriptor) in reverse_entries {
        write_entry(&mut buf, id, descriptor);
    }

    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn write_entry(buf: &mut Vec<u8>, id: EventId, descriptor: &EventDescriptor) {
    buf.extend_from_slice(&id.to_le_bytes());
    buf.push(descriptor.source.tag());
    write_str(buf, &descriptor.host);
    write_str(buf, &descriptor.key);
    write_str(buf, &descriptor.group);
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

pub(super) fn decode(data: &[u8]) -> Result<Maps, SnapshotError> {
    let min_len = SNAPSHOT_MAGIC.len() + 2 + CHECKSUM_SIZE;
    if data.len() < min_len {
        return Err(SnapshotError::Truncated { offset: data.len() });
    }
    if &data[..4] != SNAPSHOT_MAGIC {
        return Err(SnapshotError::InvalidHeader(format!(
            "expected magic {:?}, found {:?}",
            SNAPSHOT_MAGIC,
            &data[..4]
        )));
    }

    // Checksum before parsing the body so a damaged length field is never trusted
    let body_len = data.len() - CHECKSUM_SIZE;
    let mut stored = [0u8; CHECKSUM_SIZE];
    stored.copy_from_slice(&data[body_len..]);
    let expected = u32::from_le_bytes(stored);
    let actual = crc32fast::hash(&data[..body_len]);
    if expected != actual {
        return Err(SnapshotError::ChecksumMismatch { expected, actual });
    }

    let mut reader = Reader {
        data: &data[..body_len],
        offset: 4,
    };

    let version = reader.u16()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let forward_count = reader.u32()?;
    let mut forward = BTreeMap::new();
    for _ in 0..forward_count {
        let (id, descriptor) = reader.entry()?;
        if forward.insert(id, descriptor).is_some() {
            return Err(SnapshotError::CorruptedData(format!(
                "duplicate id {} in forward map",
                id
            )));
        }
    }

    let reverse_count = reader.u32()?;
    let mut reverse = HashMap::new();
    for _ in 0..reverse_count {
        let (id, descriptor) = reader.entry()?;
        if let Some(previous) = reverse.insert(descriptor, id) {
            return Err(SnapshotError::CorruptedData(format!(
                "descriptor listed twice in reverse map (ids {} and {})",
                previous, id
            )));
        }
    }

    if reader.offset != reader.data.len() {
        return Err(SnapshotError::CorruptedData(format!(
            "{} trailing bytes after reverse map",
            reader.data.len() - reader.offset
        )));
    }

    Ok((forward, reverse))
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(SnapshotError::Truncated {
                offset: self.offset,
            })?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self) -> Result<String, SnapshotError> {
        let at = self.offset;
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            SnapshotError::CorruptedData(format!("invalid utf-8 string at byte {}: {}", at, e))
        })
    }

    fn entry(&mut self) -> Result<(EventId, EventDescriptor), SnapshotError> {
        let id = self.u32()?;
        let tag_offset = self.offset;
        let tag = self.u8()?;
        let source = SourceKind::from_tag(tag).ok_or_else(|| {
            SnapshotError::CorruptedData(format!(
                "unknown source tag {} at byte {}",
                tag, tag_offset
            ))
        })?;
        let host = self.string()?;
        let key = self.string()?;
        let group = self.string()?;
        Ok((id, EventDescriptor::new(source, host, key, group)))
    }
}

/// Write `bytes` to a unique temp file beside `path`, then rename over it
pub(super) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    let temp_name = format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        rand::random::<u32>()
    );
    let temp_path = path
        .parent()
        .map_or_else(|| PathBuf::from(&temp_name), |p| p.join(&temp_name));

    fs::write(&temp_path, bytes)?;

    let rename_result = fs::rename(&temp_path, path);
    if rename_result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    rename_result
}
