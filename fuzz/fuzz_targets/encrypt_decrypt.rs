#![no_main]

use libfuzzer_sys::fuzz_target;
use outpost_cipher::{AesGcmCipher, Cipher};

fuzz_target!(|data: &[u8]| {
    let cipher = AesGcmCipher::new("fuzz-passphrase", b"fuzz-deployment-salt");

    if let Ok(ciphertext) = cipher.encrypt(data) {
        let decrypted = cipher.decrypt(&ciphertext).expect("roundtrip must decrypt what we just encrypted");
        assert_eq!(data.to_vec(), decrypted);
    }

    // Arbitrary bytes fed straight into decrypt must never panic, only
    // ever produce an `Err` (truncated/non-base64/auth-tag-mismatch).
    let _ = cipher.decrypt(data);
});
