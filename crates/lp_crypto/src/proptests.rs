//! Property-based tests for the envelope engine.
//!
//! - Roundtrip: both envelopes open to the original plaintext
//! - Non-transmission: no envelope byte field contains a private key

use proptest::prelude::*;

use crate::{decrypt, encrypt_for_send, KeyPair};

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn both_envelopes_round_trip(plaintext in ".{0,600}") {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();
        let sealed = encrypt_for_send(&plaintext, Some(&sender), Some(&recipient.public)).unwrap();
        prop_assert_eq!(decrypt(&sealed.recipient, &recipient).unwrap(), plaintext.clone());
        prop_assert_eq!(decrypt(&sealed.sender, &sender).unwrap(), plaintext);
    }

    #[test]
    fn envelopes_never_carry_private_keys(plaintext in ".{0,64}") {
        let sender = KeyPair::generate().unwrap();
        let recipient = KeyPair::generate().unwrap();
        let sealed = encrypt_for_send(&plaintext, Some(&sender), Some(&recipient.public)).unwrap();
        for env in [&sealed.recipient, &sealed.sender] {
            for field in [&env.ephemeral_public, &env.nonce, &env.ciphertext] {
                prop_assert!(!contains(field, sender.secret_bytes()));
                prop_assert!(!contains(field, recipient.secret_bytes()));
            }
        }
    }
}
