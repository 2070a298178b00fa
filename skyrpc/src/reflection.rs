/*
 * Created on Wed Mar 27 2024
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

//! Method reflection: the registry mapping method names to their records, and
//! the builder used to register methods with their documentation and optional
//! access filter. The registry is built once while an endpoint is brought up
//! and is read-only afterwards.

use {
    crate::{
        auth::AccessFilter,
        mem::Scanner,
        request::RpcRequest,
        supervisor::Supervisor,
        value::{Values, Wire},
    },
    bytes::BytesMut,
    std::sync::Arc,
};

/// The invocation slot of a method: either the handler borrows the request for
/// the duration of the call, or it takes the shared reference over for
/// handover-style (usually detached) completion
pub enum MethodPt {
    Borrow(Box<dyn Fn(&Arc<RpcRequest>) + Send + Sync>),
    Handover(Box<dyn Fn(Arc<RpcRequest>) + Send + Sync>),
}

impl MethodPt {
    pub fn borrowing(f: impl Fn(&Arc<RpcRequest>) + Send + Sync + 'static) -> Self {
        Self::Borrow(Box::new(f))
    }
    pub fn handover(f: impl Fn(Arc<RpcRequest>) + Send + Sync + 'static) -> Self {
        Self::Handover(Box::new(f))
    }
}

/// One registered method. Immutable once it enters the registry
pub struct Method {
    name: Box<str>,
    param_spec: Box<str>,
    return_spec: Box<str>,
    pt: MethodPt,
    doc: Vec<u8>,
    access_filter: Option<Box<dyn AccessFilter>>,
}

impl Method {
    pub fn new(
        name: &str,
        param_spec: &str,
        return_spec: &str,
        pt: MethodPt,
        doc: Vec<u8>,
        access_filter: Option<Box<dyn AccessFilter>>,
    ) -> Self {
        Self {
            name: name.into(),
            param_spec: param_spec.into(),
            return_spec: return_spec.into(),
            pt,
            doc,
            access_filter,
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn param_spec(&self) -> &str {
        &self.param_spec
    }
    pub fn return_spec(&self) -> &str {
        &self.return_spec
    }
    pub fn pt(&self) -> &MethodPt {
        &self.pt
    }
    pub fn access_filter(&self) -> Option<&dyn AccessFilter> {
        self.access_filter.as_deref()
    }
    /// Decode the serialized documentation blob into `target`
    pub fn get_documentation(&self, target: &mut Values) -> bool {
        let mut src = Scanner::new(&self.doc);
        target.decode(Wire::Copy, &mut src, self.doc.len())
    }
}

/*
    registry
*/

const METHOD_HASH_SIZE: usize = 4096;
const NIL: u32 = u32::MAX;

/// shift-add string hash over the method name
fn hash_str(key: &str) -> usize {
    let mut res: u32 = 0;
    for &b in key.as_bytes() {
        res = res
            .wrapping_shl(7)
            .wrapping_add(b as u32)
            .wrapping_add(res >> 25);
    }
    res as usize % METHOD_HASH_SIZE
}

/// The name → method map: a fixed-size chained hash table that also retains
/// insertion order so documentation listings stay stable
pub struct ReflectionManager {
    methods: Vec<Arc<Method>>,
    chain: Vec<u32>,
    buckets: Box<[u32]>,
}

impl Default for ReflectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReflectionManager {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            chain: Vec::new(),
            buckets: vec![NIL; METHOD_HASH_SIZE].into_boxed_slice(),
        }
    }
    pub fn num_methods(&self) -> usize {
        self.methods.len()
    }
    pub fn reset(&mut self) {
        self.methods.clear();
        self.chain.clear();
        self.buckets.fill(NIL);
    }
    /// Register a method. A later method with the same name shadows an earlier
    /// one on lookup
    pub fn add_method(&mut self, method: Arc<Method>) {
        let bucket = hash_str(method.name());
        let idx = self.methods.len() as u32;
        self.chain.push(self.buckets[bucket]);
        self.buckets[bucket] = idx;
        self.methods.push(method);
    }
    /// Constant-time lookup in the common case
    pub fn lookup_method(&self, name: &str) -> Option<Arc<Method>> {
        let mut at = self.buckets[hash_str(name)];
        while at != NIL {
            let method = &self.methods[at as usize];
            if method.name() == name {
                return Some(method.clone());
            }
            at = self.chain[at as usize];
        }
        None
    }
    /// Append three parallel string arrays to `target`: method names, param
    /// specs and return specs, in registration order
    pub fn dump_method_list(&self, target: &mut Values) {
        let names: Vec<&str> = self.methods.iter().map(|m| m.name()).collect();
        let params: Vec<&str> = self.methods.iter().map(|m| m.param_spec()).collect();
        let returns: Vec<&str> = self.methods.iter().map(|m| m.return_spec()).collect();
        target.add_str_array(&names);
        target.add_str_array(&params);
        target.add_str_array(&returns);
    }
}

/*
    builder
*/

const UNNAMED: &str = "?";
const UNDOCUMENTED: &str = "???";

/// Registers methods on a supervisor. Documentation calls apply to the most
/// recently defined method and are flushed into the registry when the next
/// method is defined or the builder is dropped
pub struct ReflectionBuilder<'a> {
    supervisor: &'a Arc<Supervisor>,
    pending: Option<PendingMethod>,
}

struct PendingMethod {
    name: String,
    param_spec: String,
    return_spec: String,
    pt: MethodPt,
    desc: String,
    arg_names: Vec<String>,
    arg_descs: Vec<String>,
    ret_names: Vec<String>,
    ret_descs: Vec<String>,
    access_filter: Option<Box<dyn AccessFilter>>,
}

impl<'a> ReflectionBuilder<'a> {
    pub fn new(supervisor: &'a Arc<Supervisor>) -> Self {
        Self {
            supervisor,
            pending: None,
        }
    }
    /// Define a new method, flushing the previous one into the registry
    pub fn define_method(&mut self, name: &str, param_spec: &str, return_spec: &str, pt: MethodPt) {
        self.flush();
        self.pending = Some(PendingMethod {
            name: name.to_owned(),
            param_spec: param_spec.to_owned(),
            return_spec: return_spec.to_owned(),
            pt,
            desc: UNDOCUMENTED.to_owned(),
            arg_names: Vec::new(),
            arg_descs: Vec::new(),
            ret_names: Vec::new(),
            ret_descs: Vec::new(),
            access_filter: None,
        });
    }
    /// Describe the current method
    pub fn method_desc(&mut self, desc: &str) {
        if let Some(p) = self.pending.as_mut() {
            p.desc = desc.to_owned();
        }
    }
    /// Name and describe the next parameter of the current method. Calls
    /// beyond the parameter count are ignored
    pub fn param_desc(&mut self, name: &str, desc: &str) {
        if let Some(p) = self.pending.as_mut() {
            if p.arg_names.len() < p.param_spec.len() {
                p.arg_names.push(name.to_owned());
                p.arg_descs.push(desc.to_owned());
            }
        }
    }
    /// Name and describe the next return value of the current method
    pub fn return_desc(&mut self, name: &str, desc: &str) {
        if let Some(p) = self.pending.as_mut() {
            if p.ret_names.len() < p.return_spec.len() {
                p.ret_names.push(name.to_owned());
                p.ret_descs.push(desc.to_owned());
            }
        }
    }
    /// Install an access filter on the current method; `None` clears it
    pub fn request_access_filter(&mut self, filter: Option<Box<dyn AccessFilter>>) {
        if let Some(p) = self.pending.as_mut() {
            p.access_filter = filter;
        }
    }
    fn flush(&mut self) {
        let Some(mut p) = self.pending.take() else {
            return;
        };
        // the documentation always declares exactly one entry per spec byte
        pad(&mut p.arg_names, &mut p.arg_descs, p.param_spec.len());
        pad(&mut p.ret_names, &mut p.ret_descs, p.return_spec.len());
        let mut doc = Values::new();
        doc.add_str(&p.desc);
        doc.add_str(&p.param_spec);
        doc.add_str(&p.return_spec);
        doc.add_str_array(&p.arg_names);
        doc.add_str_array(&p.arg_descs);
        doc.add_str_array(&p.ret_names);
        doc.add_str_array(&p.ret_descs);
        let mut blob = BytesMut::with_capacity(doc.wire_len());
        doc.encode(Wire::Copy, &mut blob);
        let method = Method::new(
            &p.name,
            &p.param_spec,
            &p.return_spec,
            p.pt,
            blob.to_vec(),
            p.access_filter,
        );
        self.supervisor
            .reflection_mut()
            .add_method(Arc::new(method));
    }
}

impl Drop for ReflectionBuilder<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

fn pad(names: &mut Vec<String>, descs: &mut Vec<String>, want: usize) {
    while names.len() < want {
        names.push(UNNAMED.to_owned());
        descs.push(UNDOCUMENTED.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use {
        super::{hash_str, Method, MethodPt, ReflectionManager},
        std::sync::Arc,
    };

    fn method(name: &str, param_spec: &str, return_spec: &str) -> Arc<Method> {
        Arc::new(Method::new(
            name,
            param_spec,
            return_spec,
            MethodPt::borrowing(|_| ()),
            Vec::new(),
            None,
        ))
    }

    #[test]
    fn lookup_is_deterministic() {
        let mut mgr = ReflectionManager::new();
        let names: Vec<String> = (0..64).map(|i| format!("svc.method.{i}")).collect();
        for name in &names {
            mgr.add_method(method(name, "i", "s"));
        }
        for name in &names {
            assert_eq!(mgr.lookup_method(name).unwrap().name(), name);
        }
        assert!(mgr.lookup_method("no.such.thing").is_none());
        assert_eq!(mgr.num_methods(), 64);
    }

    #[test]
    fn later_registration_shadows() {
        let mut mgr = ReflectionManager::new();
        mgr.add_method(method("dup", "i", ""));
        mgr.add_method(method("dup", "s", ""));
        assert_eq!(mgr.lookup_method("dup").unwrap().param_spec(), "s");
    }

    #[test]
    fn method_list_in_registration_order() {
        let mut mgr = ReflectionManager::new();
        mgr.add_method(method("first", "i", "s"));
        mgr.add_method(method("second", "*", "*"));
        let mut out = crate::value::Values::new();
        mgr.dump_method_list(&mut out);
        assert_eq!(out.type_string(), b"SSS");
        let names = out[0].as_str_array().unwrap();
        assert_eq!(&*names[0], "first");
        assert_eq!(&*names[1], "second");
        assert_eq!(&*out[1].as_str_array().unwrap()[1], "*");
        assert_eq!(&*out[2].as_str_array().unwrap()[0], "s");
    }

    #[test]
    fn reset_empties_the_registry() {
        let mut mgr = ReflectionManager::new();
        mgr.add_method(method("gone", "", ""));
        mgr.reset();
        assert!(mgr.lookup_method("gone").is_none());
        assert_eq!(mgr.num_methods(), 0);
    }

    #[test]
    fn hash_stays_in_range() {
        for name in ["", "a", "frt.rpc.ping", "a.very.long.method.name.indeed"] {
            assert!(hash_str(name) < super::METHOD_HASH_SIZE);
        }
    }
}
