/*
 * Created on Thu Mar 14 2024
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

//! The three packet shapes of the protocol. All of them share a 32-bit code
//! whose low 16 bits name the shape and whose high 16 bits carry the flags;
//! the endian flag selects the transcoder for the body, NOREPLY marks a
//! request that expects no answer. Any other flag bit in a decoded packet is a
//! framing error.

use {
    crate::{
        mem::Scanner,
        request::RpcRequest,
        value::{
            codec::{rd_u32, wr_u32},
            Wire,
        },
    },
    bytes::{BufMut, BytesMut},
    core::fmt,
    std::sync::Arc,
};

/*
    packet codes and flags (codes 100..=199 are reserved for this protocol)
*/

pub const PCODE_RPC_FIRST: u32 = 100;
pub const PCODE_RPC_REQUEST: u32 = 100;
pub const PCODE_RPC_REPLY: u32 = 101;
pub const PCODE_RPC_ERROR: u32 = 102;
pub const PCODE_RPC_LAST: u32 = 199;

pub const FLAG_LITTLE_ENDIAN: u32 = 0x0001;
pub const FLAG_NOREPLY: u32 = 0x0002;
pub const FLAG_SUPPORTED_MASK: u32 = 0x0003;

const SIZE_U32: usize = core::mem::size_of::<u32>();

/// The flag bits a packet produced on this host carries
pub const fn host_flags() -> u32 {
    if cfg!(target_endian = "little") {
        FLAG_LITTLE_ENDIAN
    } else {
        0
    }
}

/// Pick the transcoder for a packet body: matching endianness between packet
/// and host uses the bulk copy path, otherwise the field-wise one
pub const fn wire_for(flags: u32) -> Wire {
    let packet_little = flags & FLAG_LITTLE_ENDIAN != 0;
    let host_little = cfg!(target_endian = "little");
    if packet_little == host_little {
        Wire::Copy
    } else if packet_little {
        Wire::Little
    } else {
        Wire::Big
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Request,
    Reply,
    Error,
}

impl Shape {
    pub const fn code(&self) -> u32 {
        match self {
            Self::Request => PCODE_RPC_REQUEST,
            Self::Reply => PCODE_RPC_REPLY,
            Self::Error => PCODE_RPC_ERROR,
        }
    }
}

/// An outgoing packet bound to the request whose data it carries. Holding the
/// packet keeps the request alive
pub struct RpcPacket {
    shape: Shape,
    flags: u32,
    req: Arc<RpcRequest>,
}

impl RpcPacket {
    pub fn new(shape: Shape, flags: u32, req: Arc<RpcRequest>) -> Self {
        Self { shape, flags, req }
    }
    /// The full 32-bit packet code: flags in the high half, shape in the low
    pub fn pcode(&self) -> u32 {
        (self.flags << 16) | self.shape.code()
    }
    pub const fn shape(&self) -> Shape {
        self.shape
    }
    pub const fn no_reply(&self) -> bool {
        self.flags & FLAG_NOREPLY != 0
    }
    pub const fn little_endian(&self) -> bool {
        self.flags & FLAG_LITTLE_ENDIAN != 0
    }
    pub fn request(&self) -> &Arc<RpcRequest> {
        &self.req
    }
    /// The number of body bytes an encoding of this packet occupies
    pub fn wire_len(&self) -> usize {
        match self.shape {
            Shape::Request => {
                SIZE_U32 + self.req.method_name().len() + self.req.params().wire_len()
            }
            Shape::Reply => self.req.returns().wire_len(),
            Shape::Error => SIZE_U32 * 2 + self.req.error_message().len(),
        }
    }
    /// Encode the packet body into `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        let wire = wire_for(self.flags);
        match self.shape {
            Shape::Request => {
                let name = self.req.method_name();
                wr_u32(wire, dst, name.len() as u32);
                dst.put_slice(name.as_bytes());
                self.req.params().encode(wire, dst);
            }
            Shape::Reply => {
                self.req.returns().encode(wire, dst);
            }
            Shape::Error => {
                let message = self.req.error_message();
                wr_u32(wire, dst, self.req.error_code());
                wr_u32(wire, dst, message.len() as u32);
                dst.put_slice(message.as_bytes());
            }
        }
    }
}

impl fmt::Display for RpcPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape {
            Shape::Request => {
                writeln!(f, "RequestPacket {{ method: {} }}", self.req.method_name())?;
                f.write_str(&self.req.params().dump(2))
            }
            Shape::Reply => {
                writeln!(f, "ReplyPacket")?;
                f.write_str(&self.req.returns().dump(2))
            }
            Shape::Error => write!(
                f,
                "ErrorPacket {{ code: {}, message: {} }}",
                self.req.error_code(),
                self.req.error_message()
            ),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
/// What an incoming packet turned out to be once materialized into a request
pub enum DecodedPacket {
    Request { no_reply: bool },
    Reply,
    Error,
}

/// The packet factory for the receive path: materialize a packet of the shape
/// named by `pcode` into the request supplied as context. Returns `None` on
/// any framing error: an unsupported flag bit, a code without a shape, or a
/// body that does not decode cleanly
pub fn decode_into(req: &RpcRequest, pcode: u32, body: &[u8]) -> Option<DecodedPacket> {
    let flags = pcode >> 16;
    let code = pcode & 0xFFFF;
    if flags & !FLAG_SUPPORTED_MASK != 0 {
        return None;
    }
    let wire = wire_for(flags);
    let mut src = Scanner::new(body);
    match code {
        PCODE_RPC_REQUEST => {
            let nlen = rd_u32(wire, &mut src)? as usize;
            let name = src.try_next_block(nlen)?;
            req.set_method_name(core::str::from_utf8(name).ok()?);
            let rem = src.remaining();
            if !req.params().decode(wire, &mut src, rem) {
                return None;
            }
            Some(DecodedPacket::Request {
                no_reply: flags & FLAG_NOREPLY != 0,
            })
        }
        PCODE_RPC_REPLY => {
            let rem = src.remaining();
            if !req.returns().decode(wire, &mut src, rem) {
                return None;
            }
            Some(DecodedPacket::Reply)
        }
        PCODE_RPC_ERROR => {
            let err_code = rd_u32(wire, &mut src)?;
            let mlen = rd_u32(wire, &mut src)? as usize;
            let message = core::str::from_utf8(src.try_next_block(mlen)?).ok()?;
            if !src.eof() {
                return None;
            }
            req.set_error_msg(err_code, message);
            Some(DecodedPacket::Error)
        }
        _ => None,
    }
}
