/*
 * Created on Tue Feb 20 2024
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

//! # Skyrpc
//!
//! `skyrpc` is the binary RPC runtime that the cluster components use to talk to
//! each other. It provides a typed, self-describing on-wire value system, the
//! three packet shapes (request, reply, error) that make up the protocol, a
//! server side invoker with method reflection and capability based access
//! control, and a client side adapter that handles timeouts, aborts and
//! connection loss. The transport is plain framed TCP driven by a tokio
//! runtime; everything above the frame layer lives in this crate.
//!
//! The entry point for both roles is the [`supervisor::Supervisor`]: register
//! methods through a [`reflection::ReflectionBuilder`], call [`supervisor::Supervisor::listen`]
//! to serve, and [`supervisor::Supervisor::get_target`] to obtain a handle for
//! outbound calls.

#[macro_use]
extern crate log;

pub mod auth;
pub mod config;
pub mod error;
pub mod invoke;
mod mem;
pub mod net;
pub mod packet;
pub mod reflection;
pub mod request;
pub mod supervisor;
pub mod trace;
pub mod value;

#[cfg(test)]
mod tests;

// commonly used items
pub use self::{
    error::RuntimeResult,
    invoke::SingleReqWait,
    request::RpcRequest,
    supervisor::{StandaloneRpc, Supervisor},
    value::{Value, Values},
};
