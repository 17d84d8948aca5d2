use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::StoreEvent;

const MAGIC: &[u8; 6] = b"LWJRNL";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 8;
/// crc32 then payload length, both little-endian u32.
const RECORD_PREFIX_LEN: usize = 8;

fn header() -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[..MAGIC.len()].copy_from_slice(MAGIC);
    h[MAGIC.len()..].copy_from_slice(&VERSION.to_le_bytes());
    h
}

fn check_header(bytes: &[u8]) -> io::Result<()> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a lockwarden journal"));
    }
    let version = u16::from_le_bytes([bytes[6], bytes[7]]);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported journal version {version}"),
        ));
    }
    Ok(())
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn encode_record(out: &mut Vec<u8>, event: &StoreEvent) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

/// Decode records from the front of `body`, stopping at the first one that is
/// short or fails its checksum. Returns the events and the bytes they span.
fn decode_records(body: &[u8]) -> (Vec<StoreEvent>, usize) {
    let mut events = Vec::new();
    let mut intact = 0;
    loop {
        let rest = &body[intact..];
        if rest.len() < RECORD_PREFIX_LEN {
            break;
        }
        let crc = le_u32(&rest[..4]);
        let len = le_u32(&rest[4..8]) as usize;
        let Some(payload) = rest.get(RECORD_PREFIX_LEN..RECORD_PREFIX_LEN + len) else { break };
        if crc32fast::hash(payload) != crc {
            break;
        }
        let Ok(event) = bincode::deserialize::<StoreEvent>(payload) else { break };
        events.push(event);
        intact += RECORD_PREFIX_LEN + len;
    }
    (events, intact)
}

/// What opening a journal found on disk.
#[derive(Debug)]
pub struct Recovered {
    pub events: Vec<StoreEvent>,
    /// Bytes after the last intact record. They are cut off on open.
    pub discarded_bytes: u64,
}

/// The store's history on disk: an 8 byte header (magic and version) followed
/// by one `[crc32][len][bincode StoreEvent]` record per mutation.
///
/// A crash mid-write leaves a torn record at the end. Opening the journal
/// truncates it so later records stay readable.
pub struct Journal {
    file: File,
    path: PathBuf,
    records_since_rewrite: u64,
}

impl Journal {
    /// Open the journal at `path`, creating it if missing, and return the
    /// events it holds.
    pub fn open(path: &Path) -> io::Result<(Self, Recovered)> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let recovered = if bytes.is_empty() {
            file.write_all(&header())?;
            file.sync_all()?;
            Recovered {
                events: Vec::new(),
                discarded_bytes: 0,
            }
        } else {
            check_header(&bytes)?;
            let body = &bytes[HEADER_LEN..];
            let (events, intact) = decode_records(body);
            let discarded_bytes = (body.len() - intact) as u64;
            if discarded_bytes > 0 {
                warn!(path = %path.display(), discarded_bytes, "journal ends in a torn record, truncating");
                file.set_len((HEADER_LEN + intact) as u64)?;
                file.sync_all()?;
            }
            Recovered {
                events,
                discarded_bytes,
            }
        };

        let journal = Self {
            file,
            path: path.to_path_buf(),
            records_since_rewrite: recovered.events.len() as u64,
        };
        Ok((journal, recovered))
    }

    /// Write `events` with a single sync.
    pub fn append(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for event in events {
            encode_record(&mut buf, event)?;
        }
        self.file.write_all(&buf)?;
        self.file.sync_data()?;
        self.records_since_rewrite += events.len() as u64;
        Ok(())
    }

    /// Replace the whole journal with `events`. The new file is synced before
    /// it is renamed over the old one, so a crash leaves one of them intact.
    pub fn rewrite(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let mut buf = header().to_vec();
        for event in events {
            encode_record(&mut buf, event)?;
        }
        let staged = self.path.with_extension("journal.new");
        {
            let mut file = File::create(&staged)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&staged, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.records_since_rewrite = 0;
        Ok(())
    }

    pub fn records_since_rewrite(&self) -> u64 {
        self.records_since_rewrite
    }
}
