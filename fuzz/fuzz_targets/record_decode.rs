//! Record framing must never panic, and whatever it accepts must re-encode
//! to the bytes it consumed.

#![no_main]

use atgw_proto::Record;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    let mut offset = 0;
    while let Ok(Some(record)) = Record::split_from(&mut buf) {
        let encoded = record.to_bytes();
        assert_eq!(&encoded[..], &data[offset..offset + encoded.len()]);
        offset += encoded.len();
    }
});
