//! Byte buffer with a hard in-memory cap
//!
//! Bytes accumulate in memory until a write would push the buffer past its
//! cap. At that point everything buffered so far moves to an anonymous
//! temporary file and every later write goes straight to the file. The move
//! is one-way. The file has no name on disk and disappears when the buffer
//! is dropped.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

#[derive(Debug)]
pub struct BoundedBuffer {
    max_in_memory: usize,
    memory: Vec<u8>,
    spill: Option<File>,
    len: usize,
}

impl BoundedBuffer {
    pub fn new(max_in_memory: usize) -> Self {
        Self {
            max_in_memory,
            memory: Vec::new(),
            spill: None,
            len: 0,
        }
    }

    /// Append a chunk
    pub fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }

        if self.spill.is_none() && self.memory.len() + chunk.len() > self.max_in_memory {
            self.spill_to_disk()?;
        }

        match self.spill.as_mut() {
            Some(file) => file.write_all(chunk)?,
            None => self.memory.extend_from_slice(chunk),
        }
        self.len += chunk.len();
        Ok(())
    }

    fn spill_to_disk(&mut self) -> io::Result<()> {
        let mut file = tempfile::tempfile()?;
        file.write_all(&self.memory)?;
        tracing::debug!(
            buffered_bytes = self.memory.len(),
            cap_bytes = self.max_in_memory,
            "Buffer exceeded in-memory cap, spilled to temporary file"
        );
        self.memory = Vec::new();
        self.spill = Some(file);
        Ok(())
    }

    /// Full contents in write order
    pub fn content(&mut self) -> io::Result<Vec<u8>> {
        match self.spill.as_mut() {
            None => Ok(self.memory.clone()),
            Some(file) => {
                file.flush()?;
                file.seek(SeekFrom::Start(0))?;
                let mut bytes = Vec::with_capacity(self.len);
                file.read_to_end(&mut bytes)?;
                file.seek(SeekFrom::End(0))?;
                Ok(bytes)
            }
        }
    }

    /// Total bytes written
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        self.spill.is_some()
    }

    /// Bytes currently held in memory (0 once spilled)
    pub fn in_memory_len(&self) -> usize {
        self.memory.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_in_memory_up_to_cap() {
        let mut buffer = BoundedBuffer::new(8);
        buffer.write(b"abcd").unwrap();
        buffer.write(b"efgh").unwrap();

        assert!(!buffer.is_spilled());
        assert_eq!(buffer.in_memory_len(), 8);
        assert_eq!(buffer.content().unwrap(), b"abcdefgh");
    }

    #[test]
    fn test_spills_on_first_overflowing_write() {
        let mut buffer = BoundedBuffer::new(8);
        buffer.write(b"abcdef").unwrap();
        buffer.write(b"ghij").unwrap();

        assert!(buffer.is_spilled());
        assert_eq!(buffer.in_memory_len(), 0);
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.content().unwrap(), b"abcdefghij");
    }

    #[test]
    fn test_spill_is_one_way_and_appends_continue() {
        let mut buffer = BoundedBuffer::new(4);
        buffer.write(b"12345").unwrap();
        let first = buffer.content().unwrap();
        buffer.write(b"6").unwrap();

        assert!(buffer.is_spilled());
        assert_eq!(buffer.in_memory_len(), 0);
        assert_eq!(first, b"12345");
        assert_eq!(buffer.content().unwrap(), b"123456");
    }

    #[test]
    fn test_large_chunked_write_matches_input() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut buffer = BoundedBuffer::new(32 * 1024);
        for chunk in data.chunks(4096) {
            buffer.write(chunk).unwrap();
            assert!(buffer.in_memory_len() <= 32 * 1024);
        }

        assert!(buffer.is_spilled());
        assert_eq!(buffer.content().unwrap(), data);
    }

    #[test]
    fn test_empty_write_is_noop() {
        let mut buffer = BoundedBuffer::new(0);
        buffer.write(b"").unwrap();
        assert!(buffer.is_empty());
        assert!(!buffer.is_spilled());
    }
}
