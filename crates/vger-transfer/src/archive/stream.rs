//! The item stream: items serialized as named msgpack maps, concatenated,
//! and cut into chunks at item boundaries only.

use std::io::Cursor;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::repo::Repository;
use vger_types::chunk_id::ChunkId;
use vger_types::error::Result;

/// Lazy decoder over an archive's item stream. Fetches one chunk at a time
/// and yields items in order. Stops after the first error.
pub struct ItemIter<'a, T> {
    repo: &'a Repository,
    ptrs: std::slice::Iter<'a, ChunkId>,
    buf: Vec<u8>,
    pos: usize,
    failed: bool,
    _item: PhantomData<T>,
}

impl<'a, T> ItemIter<'a, T> {
    pub fn new(repo: &'a Repository, ptrs: &'a [ChunkId]) -> Self {
        Self {
            repo,
            ptrs: ptrs.iter(),
            buf: Vec::new(),
            pos: 0,
            failed: false,
            _item: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> Iterator for ItemIter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.pos >= self.buf.len() {
            let id = self.ptrs.next()?;
            match self.repo.read_chunk(id) {
                Ok(buf) => {
                    self.buf = buf;
                    self.pos = 0;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }

        let mut cursor = Cursor::new(&self.buf[self.pos..]);
        let decoded = T::deserialize(&mut rmp_serde::Deserializer::new(&mut cursor));
        let consumed = cursor.position() as usize;
        match decoded {
            Ok(item) => {
                self.pos += consumed;
                Some(Ok(item))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Serializes items and cuts the stream into chunks of about `target` bytes.
/// An item is never split across two chunks.
pub struct ItemStreamWriter {
    target: usize,
    buf: Vec<u8>,
    chunks: Vec<Vec<u8>>,
}

impl ItemStreamWriter {
    pub fn new(target: usize) -> Self {
        Self {
            target: target.max(1),
            buf: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn push<T: Serialize>(&mut self, item: &T) -> Result<()> {
        rmp_serde::encode::write_named(&mut self.buf, item)?;
        if self.buf.len() >= self.target {
            self.chunks.push(std::mem::take(&mut self.buf));
        }
        Ok(())
    }

    /// Serialized chunks, in stream order.
    pub fn finish(mut self) -> Vec<Vec<u8>> {
        if !self.buf.is_empty() {
            self.chunks.push(self.buf);
        }
        self.chunks
    }
}
