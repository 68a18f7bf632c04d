//! Lazy, cache-as-you-go sequence of attachments.

use crate::error::Result;
use crate::model::part::Part;
use crate::parser::deserializer::PartReader;

/// Attachments of one message, pulled from the reader only when asked for.
///
/// Produced parts are kept, so indexing and iteration can restart from the
/// beginning without touching the stream again. The list only grows.
pub struct LazyParts {
    reader: PartReader,
    produced: Vec<Part>,
    exhausted: bool,
}

impl LazyParts {
    /// Wrap an initialized reader.
    pub fn new(reader: PartReader) -> Self {
        let exhausted = reader.is_done();
        Self {
            reader,
            produced: Vec::new(),
            exhausted,
        }
    }

    /// Pull one more part; `false` once the reader has nothing left.
    fn pull(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        // A failed reader repeats its error, so errors don't mark exhaustion.
        match self.reader.next_part()? {
            Some(part) => {
                self.produced.push(part);
                Ok(true)
            }
            None => {
                self.exhausted = true;
                Ok(false)
            }
        }
    }

    /// Attachment at `index`, reading ahead as far as needed.
    pub fn get(&mut self, index: usize) -> Result<Option<&Part>> {
        while self.produced.len() <= index && self.pull()? {}
        Ok(self.produced.get(index))
    }

    /// Iterate from the first attachment, producing new ones on demand.
    pub fn iter(&mut self) -> Iter<'_> {
        Iter {
            parts: self,
            index: 0,
            failed: false,
        }
    }

    /// Attachments produced so far.
    pub fn produced(&self) -> &[Part] {
        &self.produced
    }

    /// `true` once the last attachment has been produced.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Produce every remaining attachment and return the total count.
    pub fn load_all(&mut self) -> Result<usize> {
        while self.pull()? {}
        Ok(self.produced.len())
    }

    /// Attachment with the given id, reading ahead until it shows up.
    pub fn find(&mut self, id: &str) -> Result<Option<&Part>> {
        let mut index = self.produced.iter().position(|p| p.id() == id);
        while index.is_none() && self.pull()? {
            if self.produced.last().is_some_and(|p| p.id() == id) {
                index = Some(self.produced.len() - 1);
            }
        }
        Ok(index.and_then(|i| self.produced.get(i)))
    }

    /// Give back the underlying reader.
    pub fn into_reader(self) -> PartReader {
        self.reader
    }
}

/// Iterator over [`LazyParts`]; stops after the first error.
pub struct Iter<'a> {
    parts: &'a mut LazyParts,
    index: usize,
    failed: bool,
}

impl Iterator for Iter<'_> {
    type Item = Result<Part>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.parts.get(self.index) {
            Ok(Some(part)) => {
                self.index += 1;
                Some(Ok(part.clone()))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Iter<'_> {}

impl std::fmt::Debug for LazyParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyParts")
            .field("produced", &self.produced)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
