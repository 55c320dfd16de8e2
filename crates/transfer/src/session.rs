use crate::codec::{self, chunk_frame};
use crate::{CHUNK_SIZE, TransferError};

/// Largest file a session accepts.
///
/// Bounded by the 16-bit chunk sequence: 65536 chunks of [`CHUNK_SIZE`]
/// (1 GiB), which also fits the 32-bit header size field.
pub const MAX_FILE_SIZE: usize = (u16::MAX as usize + 1) * CHUNK_SIZE;

/// Number of chunks needed for `total_size` bytes.
pub fn total_chunks(total_size: usize) -> usize {
    total_size.div_ceil(CHUNK_SIZE)
}

struct PreparedFile {
    data: Vec<u8>,
    name: String,
    total_chunks: usize,
}

/// An in-progress file transfer: owns the file bytes and hands out the
/// header frame followed by chunk frames in sequence order.
///
/// The chunk sequence is forward-only. Once every chunk has been emitted,
/// [`next_chunk`](Self::next_chunk) keeps returning `None`.
#[derive(Default)]
pub struct TransferSession {
    file: Option<PreparedFile>,
    next_sequence: usize,
}

impl TransferSession {
    /// Creates an idle session with no file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a file and resets the chunk counter.
    ///
    /// Fails with [`TransferError::SessionBusy`] while a previously
    /// prepared file still has chunks left; call [`release`](Self::release)
    /// to abandon it first.
    pub fn prepare(&mut self, data: Vec<u8>, name: impl Into<String>) -> Result<(), TransferError> {
        if self.is_active() {
            return Err(TransferError::SessionBusy);
        }

        let name = name.into();
        if data.is_empty() {
            return Err(TransferError::InvalidInput("file is empty".into()));
        }
        if name.is_empty() {
            return Err(TransferError::InvalidInput("file name is empty".into()));
        }
        if name.len() > codec::MAX_NAME_LEN {
            return Err(TransferError::InvalidInput(format!(
                "file name too long: {} bytes (max {})",
                name.len(),
                codec::MAX_NAME_LEN
            )));
        }
        if data.len() > MAX_FILE_SIZE {
            return Err(TransferError::InvalidInput(format!(
                "file too large: {} bytes (max {MAX_FILE_SIZE})",
                data.len()
            )));
        }

        let chunks = total_chunks(data.len());
        tracing::info!(
            file = %name,
            bytes = data.len(),
            chunks,
            "prepared file for transfer"
        );

        self.file = Some(PreparedFile {
            data,
            name,
            total_chunks: chunks,
        });
        self.next_sequence = 0;
        Ok(())
    }

    /// Returns the header frame for the prepared file.
    pub fn header(&self) -> Result<Vec<u8>, TransferError> {
        let file = self.file.as_ref().ok_or(TransferError::NotReady)?;
        // prepare() bounds the size well below u32::MAX.
        codec::encode_header(file.data.len() as u32, &file.name)
    }

    /// Returns the next chunk frame and its sequence number, or `None`
    /// once the file is exhausted (or nothing is prepared).
    pub fn next_chunk(&mut self) -> Option<(Vec<u8>, u16)> {
        let file = self.file.as_ref()?;
        if self.next_sequence >= file.total_chunks {
            return None;
        }

        let sequence = self.next_sequence;
        let start = sequence * CHUNK_SIZE;
        let end = std::cmp::min(start + CHUNK_SIZE, file.data.len());
        // MAX_FILE_SIZE keeps every sequence within u16.
        let frame = chunk_frame(sequence as u16, &file.data[start..end]);
        self.next_sequence += 1;
        Some((frame, sequence as u16))
    }

    /// Drops the prepared file, returning the session to idle.
    pub fn release(&mut self) {
        self.file = None;
        self.next_sequence = 0;
    }

    /// `true` while a file is prepared and chunks remain.
    pub fn is_active(&self) -> bool {
        self.file
            .as_ref()
            .is_some_and(|f| self.next_sequence < f.total_chunks)
    }

    /// `true` once every chunk of the prepared file has been emitted.
    pub fn is_exhausted(&self) -> bool {
        self.file
            .as_ref()
            .is_some_and(|f| self.next_sequence >= f.total_chunks)
    }

    pub fn name(&self) -> Option<&str> {
        self.file.as_ref().map(|f| f.name.as_str())
    }

    pub fn total_size(&self) -> usize {
        self.file.as_ref().map_or(0, |f| f.data.len())
    }

    pub fn total_chunks(&self) -> usize {
        self.file.as_ref().map_or(0, |f| f.total_chunks)
    }

    /// Sequence number the next emitted chunk will carry.
    pub fn next_sequence(&self) -> usize {
        self.next_sequence
    }

    pub fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_chunk, decode_header, validate_chunk};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn total_chunks_rounds_up() {
        assert_eq!(total_chunks(0), 0);
        assert_eq!(total_chunks(1), 1);
        assert_eq!(total_chunks(CHUNK_SIZE), 1);
        assert_eq!(total_chunks(CHUNK_SIZE + 1), 2);
        assert_eq!(total_chunks(40000), 3);
    }

    #[test]
    fn forty_thousand_bytes_split_into_three_chunks() {
        let mut session = TransferSession::new();
        session.prepare(pattern(40000), "fw.bin").unwrap();
        assert_eq!(session.total_chunks(), 3);

        let mut lengths = Vec::new();
        while let Some((frame, _)) = session.next_chunk() {
            lengths.push(decode_chunk(&frame).unwrap().payload.len());
        }
        assert_eq!(lengths, vec![16384, 16384, 7232]);
    }

    #[test]
    fn sequences_are_contiguous_and_stop_idempotently() {
        let mut session = TransferSession::new();
        session.prepare(pattern(CHUNK_SIZE * 4 + 10), "a.bin").unwrap();

        let mut sequences = Vec::new();
        while let Some((frame, sequence)) = session.next_chunk() {
            assert!(validate_chunk(&frame));
            assert_eq!(decode_chunk(&frame).unwrap().sequence, sequence);
            sequences.push(sequence);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

        assert!(session.is_exhausted());
        assert!(session.next_chunk().is_none());
        assert!(session.next_chunk().is_none());
        assert_eq!(session.next_sequence(), 5);
    }

    #[test]
    fn chunks_reassemble_to_original() {
        let original = pattern(50_000);
        let mut session = TransferSession::new();
        session.prepare(original.clone(), "blob").unwrap();

        let mut rebuilt = Vec::new();
        while let Some((frame, _)) = session.next_chunk() {
            rebuilt.extend_from_slice(decode_chunk(&frame).unwrap().payload);
        }
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn header_reflects_prepared_file() {
        let mut session = TransferSession::new();
        session.prepare(pattern(1234), "config.json").unwrap();
        let header = decode_header(&session.header().unwrap()).unwrap();
        assert_eq!(header.total_size, 1234);
        assert_eq!(header.name, "config.json");
    }

    #[test]
    fn header_without_file_is_not_ready() {
        let session = TransferSession::new();
        assert!(matches!(session.header(), Err(TransferError::NotReady)));
    }

    #[test]
    fn next_chunk_without_file_is_none() {
        let mut session = TransferSession::new();
        assert!(session.next_chunk().is_none());
    }

    #[test]
    fn prepare_rejects_empty_file_and_name() {
        let mut session = TransferSession::new();
        assert!(matches!(
            session.prepare(Vec::new(), "a"),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(matches!(
            session.prepare(vec![1], ""),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(matches!(
            session.prepare(vec![1], "n".repeat(256)),
            Err(TransferError::InvalidInput(_))
        ));
        assert!(!session.is_active());
    }

    #[test]
    fn prepare_while_active_is_busy() {
        let mut session = TransferSession::new();
        session.prepare(pattern(CHUNK_SIZE * 2), "first").unwrap();
        session.next_chunk().unwrap();

        assert!(matches!(
            session.prepare(pattern(10), "second"),
            Err(TransferError::SessionBusy)
        ));
        // The first file is untouched.
        assert_eq!(session.name(), Some("first"));
        assert_eq!(session.next_sequence(), 1);
    }

    #[test]
    fn prepare_after_exhaustion_resets_counters() {
        let mut session = TransferSession::new();
        session.prepare(pattern(10), "first").unwrap();
        while session.next_chunk().is_some() {}

        session.prepare(pattern(CHUNK_SIZE + 1), "second").unwrap();
        assert_eq!(session.next_sequence(), 0);
        assert_eq!(session.total_chunks(), 2);
        assert_eq!(session.next_chunk().unwrap().1, 0);
    }

    #[test]
    fn release_returns_to_idle() {
        let mut session = TransferSession::new();
        session.prepare(pattern(CHUNK_SIZE * 3), "a").unwrap();
        session.next_chunk().unwrap();
        session.release();

        assert!(!session.is_active());
        assert!(session.name().is_none());
        assert!(matches!(session.header(), Err(TransferError::NotReady)));
        session.prepare(pattern(5), "b").unwrap();
    }
}
