use crate::error::{Result, VectorStoreError};
use crate::projection::hamming_distance;
use std::collections::BinaryHeap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: [u8; 8] = *b"CIDXBIN1";
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 8 + 4 + 4 + 8;
const COUNT_OFFSET: u64 = 16;

/// Fixed-width binary coarse index: a header followed by
/// `(id_hash: u64, code: [u8; width])` records. Appends are O(1); deletes
/// set a bit in a sidecar tombstone bitmap; search streams the file keeping
/// a bounded heap of the closest codes by Hamming distance.
///
/// The header count is authoritative: a trailing truncated record left by
/// a crash mid-append is ignored and the count corrected on next open.
#[derive(Debug)]
pub struct BinaryIndex {
    path: PathBuf,
    tomb_path: PathBuf,
    code_width: usize,
    count: u64,
    tombstones: Vec<u8>,
    tombstone_count: u64,
}

/// A live record seen while streaming the index.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub position: u64,
    pub id_hash: u64,
    pub code: Vec<u8>,
}

impl BinaryIndex {
    pub fn create(path: &Path, tomb_path: &Path, code_width: usize) -> Result<Self> {
        if code_width == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "code width must be positive".to_string(),
            ));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        write_header(&mut file, code_width, 0)?;
        file.sync_all()?;
        std::fs::write(tomb_path, [0u8; 0])?;
        Ok(Self {
            path: path.to_path_buf(),
            tomb_path: tomb_path.to_path_buf(),
            code_width,
            count: 0,
            tombstones: Vec::new(),
            tombstone_count: 0,
        })
    }

    pub fn open(path: &Path, tomb_path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_LEN {
            return Err(corrupt(path, "file shorter than header"));
        }

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header)?;
        if header[0..8] != MAGIC {
            return Err(corrupt(path, "bad magic"));
        }
        let version = u32::from_le_bytes(header[8..12].try_into().unwrap());
        if version != VERSION {
            return Err(corrupt(path, &format!("unsupported version {version}")));
        }
        let code_width = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
        if code_width == 0 {
            return Err(corrupt(path, "zero code width"));
        }
        let mut count = u64::from_le_bytes(header[16..24].try_into().unwrap());

        let record_len = record_len(code_width);
        let whole_records = (file_len - HEADER_LEN) / record_len;
        if count > whole_records {
            log::warn!(
                "Binary index {} header claims {count} records but only {whole_records} fit; \
                 correcting header",
                path.display()
            );
            count = whole_records;
            drop(file);
            let mut rw = OpenOptions::new().write(true).open(path)?;
            rw.seek(SeekFrom::Start(COUNT_OFFSET))?;
            rw.write_all(&count.to_le_bytes())?;
            rw.sync_all()?;
        }

        let mut index = Self {
            path: path.to_path_buf(),
            tomb_path: tomb_path.to_path_buf(),
            code_width,
            count,
            tombstones: Vec::new(),
            tombstone_count: 0,
        };
        index.load_tombstones()?;
        Ok(index)
    }

    #[must_use]
    pub const fn code_width(&self) -> usize {
        self.code_width
    }

    /// Total records in the counted region, tombstoned included.
    #[must_use]
    pub const fn record_count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub const fn live_count(&self) -> u64 {
        self.count - self.tombstone_count
    }

    /// Append records and publish them by advancing the header count.
    pub fn append_batch(&mut self, records: &[(u64, Vec<u8>)]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for (_, code) in records {
            if code.len() != self.code_width {
                return Err(VectorStoreError::InvalidConfig(format!(
                    "code width {} does not match index width {}",
                    code.len(),
                    self.code_width
                )));
            }
        }

        let record_len = record_len(self.code_width);
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(HEADER_LEN + self.count * record_len))?;
        let mut buf = Vec::with_capacity(records.len() * record_len as usize);
        for (id_hash, code) in records {
            buf.extend_from_slice(&id_hash.to_le_bytes());
            buf.extend_from_slice(code);
        }
        file.write_all(&buf)?;
        file.sync_all()?;

        // Records become visible only once the count lands.
        let new_count = self.count + records.len() as u64;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&new_count.to_le_bytes())?;
        file.sync_all()?;
        self.count = new_count;
        Ok(())
    }

    pub fn append(&mut self, id_hash: u64, code: Vec<u8>) -> Result<()> {
        self.append_batch(&[(id_hash, code)])
    }

    /// Stream the counted region and keep the `k_prefilter` closest live
    /// records by Hamming distance, ascending.
    pub fn search(&self, query_code: &[u8], k_prefilter: usize) -> Result<Vec<IndexRecord>> {
        if query_code.len() != self.code_width {
            return Err(VectorStoreError::InvalidConfig(format!(
                "query code width {} does not match index width {}",
                query_code.len(),
                self.code_width
            )));
        }
        if k_prefilter == 0 || self.count == 0 {
            return Ok(Vec::new());
        }

        // Snapshot the published count so concurrent appends are invisible.
        let snapshot = self.count;
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_LEN))?;

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k_prefilter + 1);
        let mut record = vec![0u8; record_len(self.code_width) as usize];
        for position in 0..snapshot {
            reader.read_exact(&mut record)?;
            if self.is_tombstoned(position) {
                continue;
            }
            let id_hash = u64::from_le_bytes(record[0..8].try_into().unwrap());
            let distance = hamming_distance(query_code, &record[8..]);
            heap.push(HeapEntry {
                distance,
                position,
                id_hash,
                code: record[8..].to_vec(),
            });
            if heap.len() > k_prefilter {
                heap.pop();
            }
        }

        let mut out: Vec<HeapEntry> = heap.into_vec();
        out.sort_by_key(|entry| (entry.distance, entry.position));
        Ok(out
            .into_iter()
            .map(|entry| IndexRecord {
                position: entry.position,
                id_hash: entry.id_hash,
                code: entry.code,
            })
            .collect())
    }

    /// All live records, in file order.
    pub fn live_records(&self) -> Result<Vec<IndexRecord>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_LEN))?;
        let mut record = vec![0u8; record_len(self.code_width) as usize];
        let mut out = Vec::new();
        for position in 0..self.count {
            reader.read_exact(&mut record)?;
            if self.is_tombstoned(position) {
                continue;
            }
            out.push(IndexRecord {
                position,
                id_hash: u64::from_le_bytes(record[0..8].try_into().unwrap()),
                code: record[8..].to_vec(),
            });
        }
        Ok(out)
    }

    /// Tombstone every live record whose id hash is in `hashes`. Returns the
    /// number of records newly tombstoned.
    pub fn tombstone_hashes(&mut self, hashes: &std::collections::HashSet<u64>) -> Result<u64> {
        if hashes.is_empty() {
            return Ok(0);
        }
        let mut newly = 0u64;
        for record in self.live_records()? {
            if hashes.contains(&record.id_hash) {
                self.set_tombstone(record.position);
                newly += 1;
            }
        }
        if newly > 0 {
            self.tombstone_count += newly;
            self.persist_tombstones()?;
        }
        Ok(newly)
    }

    /// Rewrite the file without tombstoned records.
    pub fn compact(&mut self) -> Result<()> {
        let live = self.live_records()?;
        let tmp = self.path.with_extension("bin.tmp");
        {
            let mut file = File::create(&tmp)?;
            write_header(&mut file, self.code_width, live.len() as u64)?;
            for record in &live {
                file.write_all(&record.id_hash.to_le_bytes())?;
                file.write_all(&record.code)?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        self.count = live.len() as u64;
        self.tombstones.clear();
        self.tombstone_count = 0;
        self.persist_tombstones()?;
        Ok(())
    }

    fn is_tombstoned(&self, position: u64) -> bool {
        let byte = (position / 8) as usize;
        let bit = (position % 8) as u8;
        self.tombstones
            .get(byte)
            .is_some_and(|b| b & (1 << bit) != 0)
    }

    fn set_tombstone(&mut self, position: u64) {
        let byte = (position / 8) as usize;
        let bit = (position % 8) as u8;
        if self.tombstones.len() <= byte {
            self.tombstones.resize(byte + 1, 0);
        }
        self.tombstones[byte] |= 1 << bit;
    }

    fn load_tombstones(&mut self) -> Result<()> {
        self.tombstones = match std::fs::read(&self.tomb_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        self.tombstone_count = 0;
        for position in 0..self.count {
            if self.is_tombstoned(position) {
                self.tombstone_count += 1;
            }
        }
        Ok(())
    }

    fn persist_tombstones(&self) -> Result<()> {
        let tmp = self.tomb_path.with_extension("tomb.tmp");
        std::fs::write(&tmp, &self.tombstones)?;
        std::fs::rename(&tmp, &self.tomb_path)?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct HeapEntry {
    distance: u32,
    position: u64,
    id_hash: u64,
    code: Vec<u8>,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then(self.position.cmp(&other.position))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Map a hex point id to the u64 stored in index records: the first 16 hex
/// digits when present, FNV-1a over the raw bytes otherwise.
#[must_use]
pub fn id_hash(id: &str) -> u64 {
    if id.len() >= 16 {
        if let Ok(parsed) = u64::from_str_radix(&id[0..16], 16) {
            return parsed;
        }
    }
    const OFFSET: u64 = 14_695_981_039_346_656_037;
    const PRIME: u64 = 1_099_511_628_211;
    let mut hash = OFFSET;
    for byte in id.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

const fn record_len(code_width: usize) -> u64 {
    8 + code_width as u64
}

fn write_header(file: &mut File, code_width: usize, count: u64) -> Result<()> {
    file.write_all(&MAGIC)?;
    file.write_all(&VERSION.to_le_bytes())?;
    file.write_all(&(code_width as u32).to_le_bytes())?;
    file.write_all(&count.to_le_bytes())?;
    Ok(())
}

fn corrupt(path: &Path, detail: &str) -> VectorStoreError {
    VectorStoreError::CorruptArtifact {
        path: path.display().to_string(),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn paths(tmp: &TempDir) -> (PathBuf, PathBuf) {
        (
            tmp.path().join("vector_index.bin"),
            tmp.path().join("vector_index.tomb"),
        )
    }

    #[test]
    fn append_and_reopen_preserves_records() {
        let tmp = TempDir::new().unwrap();
        let (bin, tomb) = paths(&tmp);
        let mut index = BinaryIndex::create(&bin, &tomb, 8).unwrap();
        index.append(1, vec![0xFF; 8]).unwrap();
        index.append(2, vec![0x00; 8]).unwrap();
        drop(index);

        let index = BinaryIndex::open(&bin, &tomb).unwrap();
        assert_eq!(index.record_count(), 2);
        assert_eq!(index.live_count(), 2);
        let records = index.live_records().unwrap();
        assert_eq!(records[0].id_hash, 1);
        assert_eq!(records[1].id_hash, 2);
    }

    #[test]
    fn search_returns_closest_by_hamming() {
        let tmp = TempDir::new().unwrap();
        let (bin, tomb) = paths(&tmp);
        let mut index = BinaryIndex::create(&bin, &tomb, 1).unwrap();
        index.append(10, vec![0b0000_0000]).unwrap();
        index.append(11, vec![0b0000_0001]).unwrap();
        index.append(12, vec![0b1111_1111]).unwrap();

        let hits = index.search(&[0b0000_0000], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id_hash, 10);
        assert_eq!(hits[1].id_hash, 11);
    }

    #[test]
    fn tombstoned_records_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let (bin, tomb) = paths(&tmp);
        let mut index = BinaryIndex::create(&bin, &tomb, 1).unwrap();
        index.append(10, vec![0x00]).unwrap();
        index.append(11, vec![0x01]).unwrap();

        let removed = index
            .tombstone_hashes(&HashSet::from([10u64]))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.live_count(), 1);

        let hits = index.search(&[0x00], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id_hash, 11);

        // Tombstones survive a reopen via the sidecar bitmap.
        drop(index);
        let index = BinaryIndex::open(&bin, &tomb).unwrap();
        assert_eq!(index.live_count(), 1);
    }

    #[test]
    fn truncated_trailing_record_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let (bin, tomb) = paths(&tmp);
        let mut index = BinaryIndex::create(&bin, &tomb, 4).unwrap();
        index.append(1, vec![0xAA; 4]).unwrap();
        drop(index);

        // Simulate a crash mid-append: header counted one extra record that
        // was only partially written.
        let mut file = OpenOptions::new().write(true).read(true).open(&bin).unwrap();
        file.seek(SeekFrom::End(0)).unwrap();
        file.write_all(&[0x01, 0x02, 0x03]).unwrap();
        file.seek(SeekFrom::Start(COUNT_OFFSET)).unwrap();
        file.write_all(&2u64.to_le_bytes()).unwrap();
        drop(file);

        let index = BinaryIndex::open(&bin, &tomb).unwrap();
        assert_eq!(index.record_count(), 1);
        assert_eq!(index.live_records().unwrap().len(), 1);
    }

    #[test]
    fn compact_drops_tombstones() {
        let tmp = TempDir::new().unwrap();
        let (bin, tomb) = paths(&tmp);
        let mut index = BinaryIndex::create(&bin, &tomb, 2).unwrap();
        for i in 0..10u64 {
            index.append(i, vec![i as u8, 0]).unwrap();
        }
        index
            .tombstone_hashes(&(0..5u64).collect::<HashSet<_>>())
            .unwrap();
        index.compact().unwrap();

        assert_eq!(index.record_count(), 5);
        assert_eq!(index.live_count(), 5);
        let ids: Vec<u64> = index
            .live_records()
            .unwrap()
            .iter()
            .map(|r| r.id_hash)
            .collect();
        assert_eq!(ids, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn id_hash_uses_hex_prefix() {
        assert_eq!(id_hash("00000000000000ff-rest"), 0xFF);
        // Non-hex ids fall back to FNV, still deterministic.
        assert_eq!(id_hash("not-hex!"), id_hash("not-hex!"));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let (bin, tomb) = paths(&tmp);
        std::fs::write(&bin, b"NOTMAGIC________________________").unwrap();
        assert!(matches!(
            BinaryIndex::open(&bin, &tomb),
            Err(VectorStoreError::CorruptArtifact { .. })
        ));
    }
}
