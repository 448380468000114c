use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger length prefixes can only come from a corrupt file.
const MAX_RECORD_LEN: usize = 64 * 1024 * 1024;

/// Encode a single event to `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Record {
    Event(Event),
    /// Clean end of file.
    End,
    /// Truncated or corrupt entry; everything from here on is discarded.
    Torn(&'static str),
}

/// Fill `buf`, distinguishing a clean EOF before the first byte from a torn read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<()>> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(Some(())),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_record(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    if read_full(reader, &mut len_buf)?.is_none() {
        return Ok(Record::End);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
        return Ok(Record::Torn("oversized record"));
    }

    let mut payload = vec![0u8; len];
    if read_full(reader, &mut payload)?.is_none() {
        return Ok(Record::Torn("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if read_full(reader, &mut crc_buf)?.is_none() {
        return Ok(Record::Torn("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Torn("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event)),
        Err(_) => Ok(Record::Torn("undecodable payload")),
    }
}

/// Append-only write-ahead log of engine events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn tail (crash mid-write) is discarded on replay via the length
///   prefix and CRC.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync a single event. Production code goes through
    /// `append_buffered` + `flush_sync` for group commit.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing. Follow with `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write compacted events to a temp file and fsync. Slow phase.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the WAL and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Replay the WAL, returning all valid events in order. A missing file is
    /// an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        loop {
            match read_record(&mut reader)? {
                Record::Event(event) => events.push(event),
                Record::End => break,
                Record::Torn(why) => {
                    tracing::warn!(
                        "WAL {}: discarding tail after {} event(s): {why}",
                        path.display(),
                        events.len()
                    );
                    break;
                }
            }
        }
        Ok(events)
    }
}
