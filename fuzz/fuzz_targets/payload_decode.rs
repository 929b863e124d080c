//! Control bodies are attacker-controlled CBOR; decoding must fail cleanly.

#![no_main]

use atgw_proto::{Payload, RecordKind};
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&kind, body)) = data.split_first() else {
        return;
    };
    let Ok(kind) = RecordKind::try_from(kind) else {
        return;
    };
    if let Ok(payload) = Payload::decode_body(kind, Bytes::copy_from_slice(body)) {
        assert_eq!(payload.kind(), kind);
        let _ = payload.encode_body();
    }
});
