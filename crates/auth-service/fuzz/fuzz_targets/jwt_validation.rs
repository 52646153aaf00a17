#![no_main]

use auth_service::crypto::{extract_jwt_kid, peek_expiry, verify_jwt};
use auth_service::keys::ManagedKey;
use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

// RSA generation is far too slow to repeat per input
static KEY: OnceLock<ManagedKey> = OnceLock::new();

fuzz_target!(|data: &[u8]| {
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };
    let key = KEY.get_or_init(|| ManagedKey::generate("fuzz").expect("key generation"));

    // None of these may panic, whatever the input
    let _ = extract_jwt_kid(token);
    let _ = peek_expiry(token);
    let _ = verify_jwt(token, key.decoding_key(), "toolmin");
});
