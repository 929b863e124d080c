//! Arbitrary gateway bytes fed through alloc/commit must only ever produce
//! errors or events, never a panic, whatever the read segmentation.

#![no_main]

use std::sync::Arc;

use atgw_core::{Error, Session, SessionConfig, SessionHandler, SystemEnv, WriteCompletion};
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

struct Discard;

impl SessionHandler for Discard {
    fn on_write_start(&mut self, _: &mut Session, _: Bytes) -> Result<WriteCompletion, Error> {
        Ok(WriteCompletion::Done)
    }

    fn on_init_new_session(&mut self, _: &mut Session) -> Result<u64, Error> {
        Ok(0)
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&chunk, stream)) = data.split_first() else {
        return;
    };
    let Ok(mut session) =
        Session::new(SessionConfig::default(), Arc::new(SystemEnv), Box::new(Discard))
    else {
        return;
    };
    if session.start_session("none").is_err() {
        return;
    }

    for piece in stream.chunks(usize::from(chunk).max(1)) {
        if session.read_from(piece).is_err() {
            break;
        }
    }
    let _ = session.information();
});
