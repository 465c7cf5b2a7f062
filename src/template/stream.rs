// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{Result, TemplateError};
use std::fmt;
use std::io::Write;

/// Pull-based output of a render with optional chunk buffering.
///
/// Unbuffered, every chunk of the render is passed through. With buffering
/// enabled, chunks are joined until `size` non-empty chunks are collected or
/// the render ends. Mode changes apply from the next pull.
pub struct TemplateStream {
    chunks: Box<dyn Iterator<Item = Result<String>>>,
    buffer: Option<usize>,
}

impl TemplateStream {
    pub fn new(chunks: impl Iterator<Item = Result<String>> + 'static) -> Self {
        Self {
            chunks: Box::new(chunks),
            buffer: None,
        }
    }

    /// Group output into chunks of `size` non-empty pieces
    pub fn enable_buffering(&mut self, size: usize) -> Result<()> {
        if size <= 1 {
            return Err(TemplateError::invalid_argument(format!(
                "buffer size must be greater than one, got {size}"
            )));
        }
        self.buffer = Some(size);
        Ok(())
    }

    pub fn disable_buffering(&mut self) {
        self.buffer = None;
    }

    /// Current buffer size, `None` when unbuffered
    pub fn buffer_size(&self) -> Option<usize> {
        self.buffer
    }

    /// Write the remaining output to `writer`
    pub fn dump<W: Write>(self, mut writer: W) -> Result<()> {
        for chunk in self {
            writer
                .write_all(chunk?.as_bytes())
                .map_err(|e| TemplateError::io("<stream>", &e))?;
        }
        writer
            .flush()
            .map_err(|e| TemplateError::io("<stream>", &e))
    }

    fn next_group(&mut self, size: usize) -> Option<Result<String>> {
        let mut group = String::new();
        let mut filled = 0;
        while filled < size {
            match self.chunks.next() {
                Some(Ok(chunk)) => {
                    if !chunk.is_empty() {
                        filled += 1;
                    }
                    group.push_str(&chunk);
                }
                Some(Err(err)) => return Some(Err(err)),
                None => break,
            }
        }
        (filled > 0).then_some(Ok(group))
    }
}

impl Iterator for TemplateStream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.buffer {
            None => self.chunks.next(),
            Some(size) => self.next_group(size),
        }
    }
}

impl fmt::Debug for TemplateStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateStream")
            .field("buffer", &self.buffer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn letters(n: u8) -> TemplateStream {
        TemplateStream::new((0..n).map(|i| Ok(char::from(b'a' + i).to_string())))
    }

    #[test]
    fn test_unbuffered_passes_chunks_through() {
        let chunks: Vec<String> = letters(3).map(|c| c.unwrap()).collect();
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_buffering_groups_ten_chunks_into_two() {
        let mut stream = letters(10);
        stream.enable_buffering(5).unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect();
        assert_eq!(chunks, vec!["abcde", "fghij"]);
    }

    #[test]
    fn test_partial_final_group() {
        let mut stream = letters(7);
        stream.enable_buffering(3).unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect();
        assert_eq!(chunks, vec!["abc", "def", "g"]);
    }

    #[test]
    fn test_empty_chunks_do_not_count() {
        let pieces = ["a", "", "b", "", ""];
        let mut stream = TemplateStream::new(pieces.into_iter().map(|p| Ok(p.to_string())));
        stream.enable_buffering(2).unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), "ab");
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_mode_switch_applies_to_next_pull() {
        let mut stream = letters(6);
        assert_eq!(stream.next().unwrap().unwrap(), "a");
        stream.enable_buffering(2).unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), "bc");
        stream.disable_buffering();
        assert_eq!(stream.next().unwrap().unwrap(), "d");
    }

    #[test]
    fn test_invalid_buffer_size() {
        let mut stream = letters(1);
        for size in [0, 1] {
            assert!(matches!(
                stream.enable_buffering(size),
                Err(TemplateError::InvalidArgument { .. })
            ));
        }
        assert_eq!(stream.buffer_size(), None);
    }

    #[test]
    fn test_dump_writes_everything() {
        let mut out = Vec::new();
        letters(4).dump(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "abcd");
    }
}
