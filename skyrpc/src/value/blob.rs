/*
 * Created on Thu Feb 29 2024
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

use std::sync::Arc;

/// Data payloads above this size are carried as shared blobs instead of being
/// copied into the owning container
pub const SHARED_LIMIT: usize = 1024;

/// A reference counted large-payload carrier. The bytes stay valid for as long
/// as at least one reference is held; `Arc` supplies the atomic refcounting
pub trait SharedBlob: Send + Sync {
    fn len(&self) -> usize;
    fn bytes(&self) -> &[u8];
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A process local blob backed by owned heap storage
pub struct LocalBlob {
    data: Box<[u8]>,
}

impl LocalBlob {
    pub fn copy_of(data: &[u8]) -> Self {
        Self { data: data.into() }
    }
    pub fn shared(data: &[u8]) -> Arc<dyn SharedBlob> {
        Arc::new(Self::copy_of(data))
    }
}

impl From<Box<[u8]>> for LocalBlob {
    fn from(data: Box<[u8]>) -> Self {
        Self { data }
    }
}

impl SharedBlob for LocalBlob {
    fn len(&self) -> usize {
        self.data.len()
    }
    fn bytes(&self) -> &[u8] {
        &self.data
    }
}
