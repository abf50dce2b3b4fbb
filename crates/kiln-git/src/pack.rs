//! Git pack file format implementation.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format
//!
//! Packs we build hold whole objects only. Packs we parse may contain
//! offset and reference deltas, which are resolved against earlier
//! entries or the object store.

use crate::delta::apply_delta;
use crate::{GitError, Result};
use bytes::Bytes;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use kiln_storage::{GitObject, ObjectId, ObjectStore, ObjectType};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::Write;

/// Magic bytes at the start of a pack file.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
pub const PACK_VERSION: u32 = 2;

const HEADER_LEN: usize = 12;
const TRAILER_LEN: usize = 20;
const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;
const MAX_PREALLOC: usize = 1 << 20;

/// How the parser reacts to a bad object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Abort on the first bad object or a checksum mismatch.
    FailFast,
    /// Keep every object that decodes and report the rest.
    #[default]
    BestEffort,
}

/// Why one pack entry was not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
    /// Position of the entry in the pack.
    pub index: usize,
    /// Byte offset of the entry header.
    pub offset: usize,
    /// Human-readable reason.
    pub reason: String,
}

impl std::fmt::Display for EntryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "entry {} at offset {}: {}",
            self.index, self.offset, self.reason
        )
    }
}

/// Outcome of parsing a pack.
#[derive(Debug, Clone, Default)]
pub struct UnpackReport {
    /// One result per declared entry, in pack order.
    pub entries: Vec<std::result::Result<ObjectId, EntryError>>,
    /// Whether the trailer matched the pack body.
    pub checksum_ok: bool,
}

impl UnpackReport {
    /// IDs of every stored object, in pack order.
    pub fn stored(&self) -> Vec<ObjectId> {
        self.entries
            .iter()
            .filter_map(|entry| entry.as_ref().ok().copied())
            .collect()
    }

    /// Entries that failed.
    pub fn errors(&self) -> Vec<&EntryError> {
        self.entries
            .iter()
            .filter_map(|entry| entry.as_ref().err())
            .collect()
    }

    /// True when every entry was stored and the checksum matched.
    pub fn is_clean(&self) -> bool {
        self.checksum_ok && self.entries.iter().all(|entry| entry.is_ok())
    }
}

/// Encodes a pack entry header: type in bits 4-6 of the first byte, size
/// in little-endian 7-bit groups starting with 4 bits in the first byte.
pub fn encode_entry_header(out: &mut Vec<u8>, type_code: u8, size: usize) {
    let mut first_byte = ((type_code & 0x07) << 4) | ((size & 0x0F) as u8);
    let mut remaining_size = size >> 4;
    if remaining_size > 0 {
        first_byte |= 0x80;
    }
    out.push(first_byte);

    while remaining_size > 0 {
        let mut byte = (remaining_size & 0x7F) as u8;
        remaining_size >>= 7;
        if remaining_size > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Decodes a pack entry header at `*pos`, returning `(type code, size)`.
pub fn decode_entry_header(data: &[u8], pos: &mut usize) -> Result<(u8, usize)> {
    let first_byte = *data
        .get(*pos)
        .ok_or_else(|| GitError::InvalidPack("unexpected end of pack".to_string()))?;
    *pos += 1;

    let type_code = (first_byte >> 4) & 0x07;
    let mut size = (first_byte & 0x0F) as usize;
    let mut shift = 4u32;
    let mut more = first_byte & 0x80 != 0;
    while more {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| GitError::InvalidPack("unexpected end in size".to_string()))?;
        *pos += 1;
        if shift >= usize::BITS {
            return Err(GitError::InvalidPack("entry size overflows".to_string()));
        }
        size |= ((byte & 0x7F) as usize) << shift;
        shift += 7;
        more = byte & 0x80 != 0;
    }
    Ok((type_code, size))
}

fn decode_ofs_distance(data: &[u8], pos: &mut usize) -> Result<usize> {
    let mut next = || -> Result<u8> {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| GitError::InvalidPack("truncated delta offset".to_string()))?;
        *pos += 1;
        Ok(byte)
    };
    let mut byte = next()?;
    let mut distance = (byte & 0x7F) as usize;
    while byte & 0x80 != 0 {
        byte = next()?;
        distance = distance
            .checked_add(1)
            .and_then(|d| d.checked_mul(128))
            .map(|d| d | (byte & 0x7F) as usize)
            .ok_or_else(|| GitError::InvalidPack("delta offset overflows".to_string()))?;
    }
    Ok(distance)
}

/// Inflates one zlib stream from the start of `input`.
///
/// Returns the data and the number of compressed bytes consumed. The output
/// must be exactly `expected` bytes long.
fn inflate(input: &[u8], expected: usize) -> Result<(Vec<u8>, usize)> {
    let mut decompress = Decompress::new(true);
    let mut out = Vec::with_capacity(expected.min(MAX_PREALLOC));
    loop {
        if out.len() == out.capacity() {
            out.reserve(expected.saturating_sub(out.len()).clamp(64, MAX_PREALLOC));
        }
        let consumed = decompress.total_in() as usize;
        let produced = decompress.total_out();
        let status = decompress
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| GitError::InvalidPack(format!("decompression failed: {}", e)))?;
        if out.len() > expected {
            return Err(GitError::InvalidPack(format!(
                "entry inflates past its declared {} bytes",
                expected
            )));
        }
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let stalled = decompress.total_in() as usize == consumed
                    && decompress.total_out() == produced
                    && out.len() < out.capacity();
                if stalled {
                    return Err(GitError::InvalidPack(
                        "truncated compressed data".to_string(),
                    ));
                }
            }
        }
    }
    if out.len() != expected {
        return Err(GitError::InvalidPack(format!(
            "entry declares {} bytes but inflates to {}",
            expected,
            out.len()
        )));
    }
    Ok((out, decompress.total_in() as usize))
}

/// Builds a pack file from a set of objects.
#[derive(Debug, Default)]
pub struct PackBuilder {
    objects: Vec<GitObject>,
}

impl PackBuilder {
    /// Creates a new pack builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an object to the pack.
    pub fn add(&mut self, object: GitObject) {
        self.objects.push(object);
    }

    /// Adds an object from the store by ID.
    pub fn add_from_store(&mut self, store: &ObjectStore, id: &ObjectId) -> Result<()> {
        self.objects.push(store.get(id)?);
        Ok(())
    }

    /// Number of objects added so far.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if no objects were added.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Builds the pack file.
    pub fn build(self) -> Result<Vec<u8>> {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        let count = u32::try_from(self.objects.len())
            .map_err(|_| GitError::InvalidPack("too many objects for one pack".to_string()))?;
        pack.extend_from_slice(&count.to_be_bytes());

        for object in &self.objects {
            encode_entry_header(&mut pack, object.object_type.pack_type(), object.data.len());
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&object.data)?;
            pack.extend_from_slice(&encoder.finish()?);
        }

        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);
        tracing::debug!(objects = self.objects.len(), bytes = pack.len(), "Built pack");
        Ok(pack)
    }
}

enum DeltaBase {
    Offset(usize),
    Id(ObjectId),
}

struct PendingDelta {
    index: usize,
    offset: usize,
    base: DeltaBase,
    delta: Vec<u8>,
}

/// Parses a pack file and stores its objects.
pub struct PackParser<'a> {
    data: &'a [u8],
    mode: DecodeMode,
}

impl<'a> PackParser<'a> {
    /// Creates a best-effort pack parser.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            mode: DecodeMode::default(),
        }
    }

    /// Sets the decode mode.
    pub fn with_mode(mut self, mode: DecodeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Parses the pack and stores every object that decodes.
    ///
    /// Header problems are always errors. In fail-fast mode a checksum
    /// mismatch is detected before anything is written; a bad entry aborts
    /// the parse, though entries stored before it remain (they are
    /// unreferenced and harmless). In best-effort mode bad entries are
    /// recorded in the report. A corrupt zlib stream cannot be skipped, so
    /// it ends the parse and every remaining entry is reported as failed.
    pub fn parse(&self, store: &ObjectStore) -> Result<UnpackReport> {
        let data = self.data;
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(GitError::InvalidPack("pack too small".to_string()));
        }
        if &data[0..4] != PACK_SIGNATURE {
            return Err(GitError::InvalidPack("invalid signature".to_string()));
        }
        let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        if version != PACK_VERSION {
            return Err(GitError::InvalidPack(format!(
                "unsupported version: {}",
                version
            )));
        }
        let count = u32::from_be_bytes([data[8], data[9], data[10], data[11]]) as usize;

        let body_end = data.len() - TRAILER_LEN;
        let computed = Sha1::digest(&data[..body_end]);
        let checksum_ok = computed.as_slice() == &data[body_end..];
        if !checksum_ok {
            let expected = hex::encode(&data[body_end..]);
            let actual = hex::encode(computed);
            if self.mode == DecodeMode::FailFast {
                return Err(GitError::ChecksumMismatch { expected, actual });
            }
            tracing::warn!(%expected, %actual, "Pack checksum mismatch, continuing best-effort");
        }

        let body = &data[..body_end];
        let mut report = UnpackReport {
            entries: Vec::with_capacity(count.min(MAX_PREALLOC)),
            checksum_ok,
        };
        let mut by_offset: HashMap<usize, (ObjectType, Bytes)> = HashMap::new();
        let mut by_id: HashMap<ObjectId, (ObjectType, Bytes)> = HashMap::new();
        let mut pending = Vec::new();
        let mut pos = HEADER_LEN;

        for index in 0..count {
            let offset = pos;
            let entry = Self::read_entry(body, &mut pos, offset);
            let (type_code, payload, base) = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // The stream cannot be resynchronized past this point.
                    if self.mode == DecodeMode::FailFast {
                        return Err(e);
                    }
                    tracing::warn!(index, offset, error = %e, "Unreadable pack entry, stopping");
                    for rest in index..count {
                        report.entries.push(Err(EntryError {
                            index: rest,
                            offset,
                            reason: if rest == index {
                                e.to_string()
                            } else {
                                "not reached".to_string()
                            },
                        }));
                    }
                    break;
                }
            };

            if let Some(base) = base {
                report.entries.push(Err(EntryError {
                    index,
                    offset,
                    reason: "unresolved delta".to_string(),
                }));
                pending.push(PendingDelta {
                    index,
                    offset,
                    base,
                    delta: payload,
                });
                continue;
            }

            let result = match ObjectType::from_pack_type(type_code) {
                Ok(object_type) => {
                    let object = GitObject::new(object_type, payload);
                    let id = store.put(object.clone())?;
                    by_offset.insert(offset, (object_type, object.data.clone()));
                    by_id.insert(id, (object_type, object.data));
                    Ok(id)
                }
                Err(e) => Err(self.entry_failure(index, offset, e.to_string())?),
            };
            report.entries.push(result);
        }

        self.resolve_deltas(store, pending, &mut by_offset, &mut by_id, &mut report)?;

        if pos != body.len() && report.entries.iter().all(|e| e.is_ok()) {
            tracing::debug!(trailing = body.len() - pos, "Ignoring bytes after last pack entry");
        }
        let failed = report.errors().len();
        if failed > 0 {
            tracing::warn!(failed, stored = report.entries.len() - failed, "Pack decoded with failures");
        } else {
            tracing::debug!(objects = report.entries.len(), "Pack decoded");
        }
        Ok(report)
    }

    /// Reads one entry header and its inflated payload.
    fn read_entry(
        body: &[u8],
        pos: &mut usize,
        offset: usize,
    ) -> Result<(u8, Vec<u8>, Option<DeltaBase>)> {
        let (type_code, size) = decode_entry_header(body, pos)?;
        let base = match type_code {
            OFS_DELTA => {
                let distance = decode_ofs_distance(body, pos)?;
                if distance == 0 || distance > offset {
                    return Err(GitError::InvalidPack(format!(
                        "delta base distance {} out of range",
                        distance
                    )));
                }
                Some(DeltaBase::Offset(offset - distance))
            }
            REF_DELTA => {
                let raw = body
                    .get(*pos..*pos + 20)
                    .ok_or_else(|| GitError::InvalidPack("truncated delta base id".to_string()))?;
                *pos += 20;
                Some(DeltaBase::Id(ObjectId::from_slice(raw)?))
            }
            _ => None,
        };
        let (payload, consumed) = inflate(&body[*pos..], size)?;
        *pos += consumed;
        Ok((type_code, payload, base))
    }

    fn entry_failure(&self, index: usize, offset: usize, reason: String) -> Result<EntryError> {
        if self.mode == DecodeMode::FailFast {
            return Err(GitError::InvalidPack(format!(
                "entry {} at offset {}: {}",
                index, offset, reason
            )));
        }
        tracing::warn!(index, offset, %reason, "Skipping pack entry");
        Ok(EntryError {
            index,
            offset,
            reason,
        })
    }

    /// Applies deltas until no more bases become available.
    fn resolve_deltas(
        &self,
        store: &ObjectStore,
        mut pending: Vec<PendingDelta>,
        by_offset: &mut HashMap<usize, (ObjectType, Bytes)>,
        by_id: &mut HashMap<ObjectId, (ObjectType, Bytes)>,
        report: &mut UnpackReport,
    ) -> Result<()> {
        loop {
            let before = pending.len();
            let mut waiting = Vec::new();
            for item in pending {
                let base = match &item.base {
                    DeltaBase::Offset(base_offset) => by_offset.get(base_offset).cloned(),
                    DeltaBase::Id(id) => match by_id.get(id) {
                        Some(base) => Some(base.clone()),
                        None => store.try_get(id)?.map(|o| (o.object_type, o.data)),
                    },
                };
                let Some((object_type, base_data)) = base else {
                    waiting.push(item);
                    continue;
                };

                let result = match apply_delta(&base_data, &item.delta) {
                    Ok(data) => {
                        let object = GitObject::new(object_type, data);
                        let id = store.put(object.clone())?;
                        by_offset.insert(item.offset, (object_type, object.data.clone()));
                        by_id.insert(id, (object_type, object.data));
                        Ok(id)
                    }
                    Err(e) => Err(self.entry_failure(item.index, item.offset, e.to_string())?),
                };
                report.entries[item.index] = result;
            }
            if waiting.is_empty() || waiting.len() == before {
                for item in waiting {
                    let reason = match item.base {
                        DeltaBase::Offset(base_offset) => {
                            format!("delta base at offset {} unavailable", base_offset)
                        }
                        DeltaBase::Id(id) => format!("delta base {} not found", id),
                    };
                    report.entries[item.index] =
                        Err(self.entry_failure(item.index, item.offset, reason)?);
                }
                return Ok(());
            }
            pending = waiting;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::tests::prefix_delta;
    use kiln_storage::MemoryAdapter;
    use std::sync::Arc;

    fn store() -> ObjectStore {
        ObjectStore::new(Arc::new(MemoryAdapter::new()))
    }

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Assembles a pack from raw entries, fixing up the count and trailer.
    fn raw_pack(entries: &[Vec<u8>]) -> Vec<u8> {
        let mut pack = Vec::new();
        pack.extend_from_slice(PACK_SIGNATURE);
        pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
        pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        for entry in entries {
            pack.extend_from_slice(entry);
        }
        let checksum = Sha1::digest(&pack);
        pack.extend_from_slice(&checksum);
        pack
    }

    fn whole_entry(object: &GitObject) -> Vec<u8> {
        let mut entry = Vec::new();
        encode_entry_header(&mut entry, object.object_type.pack_type(), object.data.len());
        entry.extend_from_slice(&compress(&object.data));
        entry
    }

    fn ofs_entry(distance: usize, delta: &[u8]) -> Vec<u8> {
        let mut entry = Vec::new();
        encode_entry_header(&mut entry, OFS_DELTA, delta.len());
        // Offset encoding with the +1 bias per continuation byte.
        let mut bytes = vec![(distance & 0x7f) as u8];
        let mut rest = distance >> 7;
        while rest > 0 {
            rest -= 1;
            bytes.push(0x80 | (rest & 0x7f) as u8);
            rest >>= 7;
        }
        bytes.reverse();
        entry.extend_from_slice(&bytes);
        entry.extend_from_slice(&compress(delta));
        entry
    }

    fn ref_entry(base: &ObjectId, delta: &[u8]) -> Vec<u8> {
        let mut entry = Vec::new();
        encode_entry_header(&mut entry, REF_DELTA, delta.len());
        entry.extend_from_slice(base.as_bytes());
        entry.extend_from_slice(&compress(delta));
        entry
    }

    #[test]
    fn test_pack_roundtrip() {
        let blob1 = GitObject::blob(b"Hello, World!".to_vec());
        let blob2 = GitObject::blob(b"Goodbye, World!".to_vec());
        let (id1, id2) = (blob1.id, blob2.id);

        let mut builder = PackBuilder::new();
        builder.add(blob1);
        builder.add(blob2);
        assert_eq!(builder.len(), 2);
        let pack = builder.build().unwrap();

        let target = store();
        let report = PackParser::new(&pack).parse(&target).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.stored(), vec![id1, id2]);
        assert_eq!(target.get(&id1).unwrap().data.as_ref(), b"Hello, World!");
    }

    #[test]
    fn test_pack_empty() {
        let pack = PackBuilder::new().build().unwrap();
        assert_eq!(pack.len(), 32);
        let report = PackParser::new(&pack).parse(&store()).unwrap();
        assert!(report.entries.is_empty());
        assert!(report.is_clean());
    }

    #[test]
    fn test_pack_all_object_types_and_empty_blob() {
        let objects = vec![
            GitObject::blob(Vec::new()),
            GitObject::new(ObjectType::Tree, b"tree content".to_vec()),
            GitObject::new(ObjectType::Commit, b"commit content".to_vec()),
            GitObject::new(ObjectType::Tag, b"tag content".to_vec()),
        ];
        let ids: Vec<_> = objects.iter().map(|o| o.id).collect();

        let mut builder = PackBuilder::new();
        for object in objects {
            builder.add(object);
        }
        let pack = builder.build().unwrap();
        let target = store();
        let report = PackParser::new(&pack)
            .with_mode(DecodeMode::FailFast)
            .parse(&target)
            .unwrap();
        assert_eq!(report.stored(), ids);
        assert_eq!(target.get(&ids[3]).unwrap().object_type, ObjectType::Tag);
    }

    #[test]
    fn test_entry_header_sizes() {
        for size in [0usize, 15, 16, 127, 128, 2047, 2048, 1 << 20, usize::MAX >> 8] {
            let mut buf = Vec::new();
            encode_entry_header(&mut buf, 3, size);
            let mut pos = 0;
            assert_eq!(decode_entry_header(&buf, &mut pos).unwrap(), (3, size));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_known_entry_header_bytes() {
        // blob (3) of 300 bytes: 0b1_011_1100, 0b0001_0010
        let mut buf = Vec::new();
        encode_entry_header(&mut buf, 3, 300);
        assert_eq!(buf, vec![0xbc, 0x12]);
    }

    #[test]
    fn test_pack_header_errors() {
        let s = store();
        assert!(PackParser::new(b"PACK").parse(&s).is_err());

        let mut bad_sig = PackBuilder::new().build().unwrap();
        bad_sig[0] = b'X';
        assert!(PackParser::new(&bad_sig).parse(&s).is_err());

        let mut bad_version = PackBuilder::new().build().unwrap();
        bad_version[7] = 3;
        assert!(PackParser::new(&bad_version).parse(&s).is_err());
    }

    #[test]
    fn test_checksum_mismatch_by_mode() {
        let blob = GitObject::blob(b"payload".to_vec());
        let mut builder = PackBuilder::new();
        builder.add(blob.clone());
        let mut pack = builder.build().unwrap();
        let last = pack.len() - 1;
        pack[last] ^= 0xff;

        let strict = store();
        assert!(matches!(
            PackParser::new(&pack)
                .with_mode(DecodeMode::FailFast)
                .parse(&strict),
            Err(GitError::ChecksumMismatch { .. })
        ));
        assert!(!strict.contains(&blob.id).unwrap());

        let lenient = store();
        let report = PackParser::new(&pack).parse(&lenient).unwrap();
        assert!(!report.checksum_ok);
        assert!(!report.is_clean());
        assert_eq!(report.stored(), vec![blob.id]);
    }

    #[test]
    fn test_bad_object_type_by_mode() {
        let good = GitObject::blob(b"good".to_vec());
        let mut bad = Vec::new();
        encode_entry_header(&mut bad, 5, 3);
        bad.extend_from_slice(&compress(b"bad"));
        let pack = raw_pack(&[bad, whole_entry(&good)]);

        assert!(PackParser::new(&pack)
            .with_mode(DecodeMode::FailFast)
            .parse(&store())
            .is_err());

        let report = PackParser::new(&pack).parse(&store()).unwrap();
        assert_eq!(report.stored(), vec![good.id]);
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].index, 0);
    }

    #[test]
    fn test_corrupt_stream_stops_best_effort() {
        let first = GitObject::blob(b"first".to_vec());
        let mut broken = Vec::new();
        encode_entry_header(&mut broken, 3, 10);
        broken.extend_from_slice(b"not zlib at all");
        let third = GitObject::blob(b"third".to_vec());
        let pack = raw_pack(&[whole_entry(&first), broken, whole_entry(&third)]);

        let report = PackParser::new(&pack).parse(&store()).unwrap();
        assert_eq!(report.stored(), vec![first.id]);
        assert_eq!(report.errors().len(), 2);
        assert!(report.checksum_ok);
    }

    #[test]
    fn test_size_mismatch_is_rejected() {
        let mut entry = Vec::new();
        encode_entry_header(&mut entry, 3, 4);
        entry.extend_from_slice(&compress(b"longer than four"));
        let pack = raw_pack(&[entry]);
        let report = PackParser::new(&pack).parse(&store()).unwrap();
        assert!(report.stored().is_empty());
    }

    #[test]
    fn test_ofs_delta_resolution() {
        let base = GitObject::blob(b"fn main() { println!(\"hi\"); }\n".to_vec());
        let delta = prefix_delta(&base.data, 11, b"}\n");
        let base_entry = whole_entry(&base);
        let distance = base_entry.len();
        let pack = raw_pack(&[base_entry, ofs_entry(distance, &delta)]);

        let target = store();
        let report = PackParser::new(&pack)
            .with_mode(DecodeMode::FailFast)
            .parse(&target)
            .unwrap();
        let expected = GitObject::blob(b"fn main() {}\n".to_vec());
        assert_eq!(report.stored(), vec![base.id, expected.id]);
        assert_eq!(target.get(&expected.id).unwrap().data.as_ref(), b"fn main() {}\n");
    }

    #[test]
    fn test_ref_delta_against_store_and_later_entry() {
        let target = store();
        let existing = GitObject::blob(b"already on the server\n".to_vec());
        target.put(existing.clone()).unwrap();

        let later = GitObject::blob(b"arrives after its delta\n".to_vec());
        let from_store = prefix_delta(&existing.data, 7, b"here\n");
        let from_later = prefix_delta(&later.data, 8, b"!\n");
        let pack = raw_pack(&[
            ref_entry(&existing.id, &from_store),
            ref_entry(&later.id, &from_later),
            whole_entry(&later),
        ]);

        let report = PackParser::new(&pack)
            .with_mode(DecodeMode::FailFast)
            .parse(&target)
            .unwrap();
        assert!(report.is_clean());
        let a = GitObject::blob(b"alreadyhere\n".to_vec());
        let b = GitObject::blob(b"arrives !\n".to_vec());
        assert_eq!(report.stored(), vec![a.id, b.id, later.id]);
        assert!(target.contains(&b.id).unwrap());
    }

    #[test]
    fn test_missing_delta_base() {
        let ghost = ObjectId::from_bytes([3u8; 20]);
        let delta = prefix_delta(b"ghost", 5, b"");
        let pack = raw_pack(&[ref_entry(&ghost, &delta)]);

        assert!(PackParser::new(&pack)
            .with_mode(DecodeMode::FailFast)
            .parse(&store())
            .is_err());
        let report = PackParser::new(&pack).parse(&store()).unwrap();
        assert!(report.errors()[0].reason.contains("not found"));
    }

    #[test]
    fn test_pack_large_object() {
        let large: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
        let blob = GitObject::blob(large.clone());
        let mut builder = PackBuilder::new();
        builder.add(blob.clone());
        let pack = builder.build().unwrap();

        let target = store();
        PackParser::new(&pack).parse(&target).unwrap();
        assert_eq!(target.get(&blob.id).unwrap().data.as_ref(), large.as_slice());
    }
}
