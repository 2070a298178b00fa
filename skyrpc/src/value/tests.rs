/*
 * Created on Sat Mar 23 2024
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
    super::{codec::Wire, LocalBlob, Values, SHARED_LIMIT},
    crate::mem::Scanner,
    bytes::{BufMut, BytesMut},
    rand::Rng,
    std::sync::Arc,
};

const ALL_WIRES: [Wire; 3] = [Wire::Copy, Wire::Big, Wire::Little];

fn sample_values() -> Values {
    let mut v = Values::new();
    v.add_u8(0xAB);
    v.add_u8_array(&[1, 2, 3, 4, 5]);
    v.add_u16(0xCAFE);
    v.add_u16_array(&[0, 1, 0xFFFF]);
    v.add_u32(0xDEAD_BEEF);
    v.add_u32_array(&[42, 0, u32::MAX]);
    v.add_u64(0x1122_3344_5566_7788);
    v.add_u64_array(&[u64::MAX, 7]);
    v.add_f32(1.5);
    v.add_f32_array(&[0.0, -2.25]);
    v.add_f64(core::f64::consts::PI);
    v.add_f64_array(&[1e300, -0.5]);
    v.add_str("hello rpc");
    v.add_str_array(&["a", "", "goat"]);
    v.add_data(b"blob");
    v.add_data_array(&[&b"x"[..], &b""[..], &b"yz"[..]]);
    v
}

fn roundtrip(v: &Values, wire: Wire) -> Values {
    let mut buf = BytesMut::new();
    v.encode(wire, &mut buf);
    assert_eq!(buf.len(), v.wire_len(), "encoded length vs wire_len");
    let mut decoded = Values::new();
    let mut scanner = Scanner::new(&buf);
    assert!(decoded.decode(wire, &mut scanner, buf.len()));
    assert!(scanner.eof());
    decoded
}

/*
    tag and type string consistency
*/

#[test]
fn type_string_tracks_variants() {
    let v = sample_values();
    assert_eq!(v.type_string(), b"bBhHiIlLfFdDsSxX");
    assert_eq!(v.type_string().len(), v.len());
    for i in 0..v.len() {
        assert_eq!(v.type_string()[i], v[i].tag());
    }
}

#[test]
fn type_string_tracks_variants_across_growth() {
    let mut v = Values::new();
    for i in 0..100u32 {
        match i % 3 {
            0 => v.add_u32(i),
            1 => v.add_str(&i.to_string()),
            _ => v.add_u64(i as u64),
        }
        assert_eq!(v.type_string().len(), v.len());
        for j in 0..v.len() {
            assert_eq!(v.type_string()[j], v[j].tag());
        }
    }
    // earlier values survive arbitrary growth
    assert_eq!(v[0].as_u32(), Some(0));
    assert_eq!(v[1].as_str(), Some("1"));
    assert_eq!(v[2].as_u64(), Some(2));
}

#[test]
fn reset_clears_everything() {
    let mut v = sample_values();
    v.reset();
    assert!(v.is_empty());
    assert!(v.type_string().is_empty());
    assert_eq!(v.wire_len(), 4);
}

/*
    round trips
*/

#[test]
fn roundtrip_all_wires() {
    let v = sample_values();
    for wire in ALL_WIRES {
        let decoded = roundtrip(&v, wire);
        assert_eq!(decoded, v, "{wire:?}");
    }
}

#[test]
fn roundtrip_empty() {
    let v = Values::new();
    for wire in ALL_WIRES {
        assert_eq!(roundtrip(&v, wire), v);
    }
}

#[test]
fn roundtrip_random() {
    let mut rng = rand::thread_rng();
    for _ in 0..64 {
        let mut v = Values::new();
        for _ in 0..rng.gen_range(0..24) {
            match rng.gen_range(0..8) {
                0 => v.add_u8(rng.gen()),
                1 => v.add_u32(rng.gen()),
                2 => v.add_u64(rng.gen()),
                3 => v.add_f64(rng.gen()),
                4 => {
                    let arr: Vec<u32> = (0..rng.gen_range(0..32)).map(|_| rng.gen()).collect();
                    v.add_u32_array(&arr);
                }
                5 => {
                    let s: String = (0..rng.gen_range(0..16))
                        .map(|_| rng.gen_range(b'a'..=b'z') as char)
                        .collect();
                    v.add_string(s);
                }
                6 => {
                    let data: Vec<u8> = (0..rng.gen_range(0..64)).map(|_| rng.gen()).collect();
                    v.add_data(&data);
                }
                _ => {
                    let arr: Vec<u16> = (0..rng.gen_range(0..16)).map(|_| rng.gen()).collect();
                    v.add_u16_array(&arr);
                }
            }
        }
        for wire in ALL_WIRES {
            assert_eq!(roundtrip(&v, wire), v);
        }
    }
}

#[test]
fn f32_bit_pattern_on_wire() {
    let mut v = Values::new();
    v.add_f32(1.5);
    let mut buf = BytesMut::new();
    v.encode(Wire::Big, &mut buf);
    // count=1, type string "f", then the IEEE bits of 1.5 in network order
    assert_eq!(&buf[..], &[0, 0, 0, 1, b'f', 0x3F, 0xC0, 0, 0]);
}

#[test]
fn big_and_little_disagree_on_scalars() {
    let mut v = Values::new();
    v.add_u32(0x0102_0304);
    let (mut big, mut little) = (BytesMut::new(), BytesMut::new());
    v.encode(Wire::Big, &mut big);
    v.encode(Wire::Little, &mut little);
    assert_eq!(&big[5..], &[1, 2, 3, 4]);
    assert_eq!(&little[5..], &[4, 3, 2, 1]);
    // ...but each decodes back to the same container
    let mut a = Values::new();
    assert!(a.decode(Wire::Big, &mut Scanner::new(&big), big.len()));
    let mut b = Values::new();
    assert!(b.decode(Wire::Little, &mut Scanner::new(&little), little.len()));
    assert_eq!(a, b);
    assert_eq!(a, v);
}

/*
    decode failures
*/

#[test]
fn decode_underrun_fails_and_consumes() {
    let mut v = Values::new();
    v.add_u64(7);
    let mut buf = BytesMut::new();
    v.encode(Wire::Big, &mut buf);
    // truncate the payload
    let cut = &buf[..buf.len() - 1];
    let mut decoded = Values::new();
    let mut scanner = Scanner::new(cut);
    assert!(!decoded.decode(Wire::Big, &mut scanner, buf.len()));
    // the stream stays framed: everything is consumed
    assert!(scanner.eof());
}

#[test]
fn decode_residual_bytes_fail() {
    let mut v = Values::new();
    v.add_u32(1);
    let mut buf = BytesMut::new();
    v.encode(Wire::Big, &mut buf);
    buf.put_u8(0xFF); // trailing garbage inside the declared region
    let mut decoded = Values::new();
    let mut scanner = Scanner::new(&buf);
    assert!(!decoded.decode(Wire::Big, &mut scanner, buf.len()));
    assert!(scanner.eof());
}

#[test]
fn decode_unknown_tag_fails() {
    let mut buf = BytesMut::new();
    buf.put_u32(1);
    buf.put_u8(b'?');
    buf.put_u32(0);
    let mut decoded = Values::new();
    let mut scanner = Scanner::new(&buf);
    assert!(!decoded.decode(Wire::Big, &mut scanner, buf.len()));
    assert!(scanner.eof());
}

#[test]
fn decode_invalid_utf8_string_fails() {
    let mut buf = BytesMut::new();
    buf.put_u32(1);
    buf.put_u8(b's');
    buf.put_u32(2);
    buf.put_slice(&[0xFF, 0xFE]);
    let mut decoded = Values::new();
    let mut scanner = Scanner::new(&buf);
    assert!(!decoded.decode(Wire::Big, &mut scanner, buf.len()));
}

#[test]
fn decode_oversized_array_len_fails() {
    let mut buf = BytesMut::new();
    buf.put_u32(1);
    buf.put_u8(b'I');
    buf.put_u32(u32::MAX); // claims ~4G elements
    let mut decoded = Values::new();
    let mut scanner = Scanner::new(&buf);
    assert!(!decoded.decode(Wire::Big, &mut scanner, buf.len()));
    assert!(scanner.eof());
}

/*
    equality and type specs
*/

#[test]
fn equality_is_structural() {
    let a = sample_values();
    let b = sample_values();
    assert_eq!(a, b);
    let mut c = sample_values();
    c.add_u8(1);
    assert_ne!(a, c); // shape mismatch
    let mut d = Values::new();
    d.add_u32(1);
    let mut e = Values::new();
    e.add_u32(2);
    assert_ne!(d, e); // content mismatch
}

#[test]
fn type_spec_wildcard() {
    assert!(Values::check_types(b"*", b""));
    assert!(Values::check_types(b"*", b"iis"));
    assert!(Values::check_types(b"iis", b"iis"));
    assert!(Values::check_types(b"", b""));
    assert!(!Values::check_types(b"iis", b"iih"));
    assert!(!Values::check_types(b"i", b"ii"));
    assert!(!Values::check_types(b"i*", b"is"));
}

/*
    blob threshold
*/

#[test]
fn data_threshold_inlines_small_payloads() {
    let mut v = Values::new();
    v.add_data(&[0u8; SHARED_LIMIT]);
    assert!(!v[0].as_data().unwrap().is_shared());
}

#[test]
fn data_threshold_shares_large_payloads() {
    let mut v = Values::new();
    v.add_data(&[0u8; SHARED_LIMIT + 1]);
    assert!(v[0].as_data().unwrap().is_shared());
}

#[test]
fn shared_blob_not_copied() {
    let blob = Arc::new(LocalBlob::copy_of(b"external payload"));
    let mut v = Values::new();
    v.add_shared_data(blob.clone());
    assert_eq!(Arc::strong_count(&blob), 2);
    assert_eq!(v[0].as_data().unwrap().bytes(), b"external payload");
    v.reset();
    assert_eq!(Arc::strong_count(&blob), 1);
}

#[test]
fn data_array_elements_follow_threshold() {
    let large = vec![1u8; SHARED_LIMIT + 10];
    let mut v = Values::new();
    v.add_data_array(&[&b"small"[..], &large]);
    let arr = v[0].as_data_array().unwrap();
    assert!(!arr[0].is_shared());
    assert!(arr[1].is_shared());
}

/*
    slot mutation
*/

#[test]
fn string_slot_mutation() {
    let mut v = Values::new();
    v.add_str_array(&["?", "?", "?"]);
    assert!(v.set_str_elem(0, 1, "named"));
    assert!(!v.set_str_elem(0, 3, "oob"));
    assert!(!v.set_str_elem(1, 0, "no such value"));
    assert_eq!(&*v[0].as_str_array().unwrap()[1], "named");
    assert_eq!(&*v[0].as_str_array().unwrap()[0], "?");
}

#[test]
fn data_slot_mutation_applies_threshold() {
    let mut v = Values::new();
    v.add_data_array(&[&b"a"[..], &b"b"[..]]);
    let large = vec![0u8; SHARED_LIMIT + 1];
    assert!(v.set_data_elem(0, 1, &large));
    let arr = v[0].as_data_array().unwrap();
    assert!(!arr[0].is_shared());
    assert!(arr[1].is_shared());
}
