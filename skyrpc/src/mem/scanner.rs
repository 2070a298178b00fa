/*
 * Created on Wed Feb 21 2024
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2024, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

#[derive(Debug, PartialEq)]
/// A bounds checked scanner over a byte buffer. Every read validates the
/// remaining length first; a failed read leaves the cursor untouched
pub struct Scanner<'a> {
    d: &'a [u8],
    cursor: usize,
}

impl<'a> Scanner<'a> {
    /// Create a new scanner, starting at position 0
    pub const fn new(d: &'a [u8]) -> Self {
        Self { d, cursor: 0 }
    }
    /// Returns the remaining number of bytes
    pub const fn remaining(&self) -> usize {
        self.d.len() - self.cursor
    }
    /// Returns true if the scanner has reached eof
    pub const fn eof(&self) -> bool {
        self.remaining() == 0
    }
    /// Returns true if the scanner has atleast `sizeof` bytes remaining
    pub const fn has_left(&self, sizeof: usize) -> bool {
        self.remaining() >= sizeof
    }
    /// Attempt to read the next byte
    pub fn try_next_byte(&mut self) -> Option<u8> {
        let ret = self.d.get(self.cursor).copied();
        self.cursor += ret.is_some() as usize;
        ret
    }
    /// Attempt to read the next block of `len` bytes
    pub fn try_next_block(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.has_left(len) {
            let block = &self.d[self.cursor..self.cursor + len];
            self.cursor += len;
            Some(block)
        } else {
            None
        }
    }
    /// Attempt to read a fixed size chunk
    pub fn try_next_chunk<const N: usize>(&mut self) -> Option<[u8; N]> {
        let mut chunk = [0u8; N];
        chunk.copy_from_slice(self.try_next_block(N)?);
        Some(chunk)
    }
    /// Consume everything that is left
    pub fn skip_remaining(&mut self) {
        self.cursor = self.d.len();
    }
}
