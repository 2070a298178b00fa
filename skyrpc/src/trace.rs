/*
 * Created on Sun Mar 10 2024
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

use {
    chrono::{DateTime, Utc},
    core::fmt,
    std::fmt::Write,
};

#[derive(Debug, Clone, PartialEq)]
struct TraceEntry {
    at: DateTime<Utc>,
    depth: u32,
    note: Box<str>,
}

#[derive(Debug, Clone, PartialEq, Default)]
/// A tree of timestamped annotations carried by a request. Sub-operations keep
/// their own independent traces; the primary request absorbs them on
/// completion, nested one level down
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }
    /// Record an annotation at the current level, stamped with the wall clock
    pub fn note(&mut self, note: impl Into<Box<str>>) {
        self.entries.push(TraceEntry {
            at: Utc::now(),
            depth: 0,
            note: note.into(),
        });
    }
    /// Absorb the trace of a completed sub-operation, nesting its entries one
    /// level below this trace
    pub fn merge(&mut self, child: Trace) {
        self.entries
            .extend(child.entries.into_iter().map(|mut e| {
                e.depth += 1;
                e
            }));
    }
    /// Take the whole trace out, leaving this one empty
    pub fn take(&mut self) -> Trace {
        core::mem::take(self)
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for e in &self.entries {
            let pad = " ".repeat((e.depth * 2) as usize);
            let _ = writeln!(out, "{pad}[{}] {}", e.at.format("%H:%M:%S%.6f"), e.note);
        }
        f.write_str(&out)
    }
}
