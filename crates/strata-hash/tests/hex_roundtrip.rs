use proptest::prelude::*;
use strata_hash::{hex, ObjectId};

proptest! {
    #[test]
    fn encode_decode_identity(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let encoded = hex::encode(&bytes);
        let mut decoded = vec![0u8; bytes.len()];
        hex::decode_into(&encoded, &mut decoded).unwrap();
        prop_assert_eq!(decoded, bytes);
    }

    #[test]
    fn oid_hex_identity(digest in proptest::collection::vec(any::<u8>(), 20..=20)) {
        let id = ObjectId::from_digest(&digest).unwrap();
        let reparsed = ObjectId::from_hex(&id.to_hex()).unwrap();
        prop_assert_eq!(reparsed, id);
    }

    #[test]
    fn hex_is_lowercase(digest in proptest::collection::vec(any::<u8>(), 20..=20)) {
        let id = ObjectId::from_digest(&digest).unwrap();
        let hex = id.to_hex();
        prop_assert_eq!(hex.len(), 40);
        prop_assert!(hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }
}
