//! End-to-end behaviour of the wire format: literal sizes, tamper and
//! truncation detection, and key sensitivity.

use std::collections::HashSet;
use std::io::{self, Cursor};

use dbcrypt_crypto::{
    decrypt_stream, encrypt_stream, open, CryptError, NonceSequence, Stage, StreamKey,
    CHUNK_SIZE, LENGTH_SIZE, NONCE_SIZE, TAG_SIZE,
};
use proptest::prelude::*;

fn key(byte: u8) -> StreamKey {
    StreamKey::from_bytes([byte; 32])
}

fn encrypt(plaintext: &[u8], key: &StreamKey) -> Vec<u8> {
    let mut out = Vec::new();
    encrypt_stream(key, Cursor::new(plaintext), &mut out).expect("encrypt");
    out
}

fn decrypt(ciphertext: &[u8], key: &StreamKey) -> Result<Vec<u8>, CryptError> {
    let mut out = Vec::new();
    decrypt_stream(key, Cursor::new(ciphertext), &mut out).map(|_| out)
}

/// Offsets at which each frame's length prefix starts.
fn frame_offsets(ciphertext: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut pos = NONCE_SIZE;
    while pos < ciphertext.len() {
        offsets.push(pos);
        let len = u32::from_be_bytes(ciphertext[pos..pos + LENGTH_SIZE].try_into().unwrap());
        pos += LENGTH_SIZE + len as usize;
    }
    assert_eq!(pos, ciphertext.len());
    offsets
}

#[test]
fn empty_plaintext_is_just_the_nonce() {
    let k = key(0x00);
    let ct = encrypt(b"", &k);

    assert_eq!(ct.len(), 12);
    assert_eq!(decrypt(&ct, &k).unwrap(), b"");
}

#[test]
fn hello_is_one_small_frame() {
    let k = key(0x01);
    let ct = encrypt(b"hello", &k);

    assert_eq!(ct.len(), 12 + 4 + 5 + 16);
    assert_eq!(&ct[12..16], &21u32.to_be_bytes());
    assert_eq!(decrypt(&ct, &k).unwrap(), b"hello");
}

#[test]
fn full_chunk_is_one_frame() {
    let k = key(0x02);
    let plaintext = vec![0x41u8; 65_536];
    let ct = encrypt(&plaintext, &k);

    assert_eq!(ct.len(), 65_568);
    assert_eq!(frame_offsets(&ct).len(), 1);
    assert_eq!(decrypt(&ct, &k).unwrap(), plaintext);
}

#[test]
fn one_byte_over_a_chunk_is_two_frames() {
    let k = key(0x02);
    let plaintext = vec![0x41u8; 65_537];
    let ct = encrypt(&plaintext, &k);

    assert_eq!(ct.len(), 12 + 4 + 65_552 + 4 + 17);
    let offsets = frame_offsets(&ct);
    assert_eq!(offsets, vec![12, 12 + 4 + 65_552]);
    assert_eq!(&ct[offsets[1]..offsets[1] + 4], &17u32.to_be_bytes());
    assert_eq!(decrypt(&ct, &k).unwrap(), plaintext);
}

#[test]
fn flipped_byte_fails_authentication_without_output() {
    let k = key(0x01);
    let mut ct = encrypt(b"hello", &k);
    ct[20] ^= 0x01;

    let mut out = Vec::new();
    let err = decrypt_stream(&k, Cursor::new(&ct), &mut out).unwrap_err();
    assert!(err.is_authentication(), "got {err}");
    assert!(out.is_empty(), "no plaintext may be emitted");
}

#[test]
fn wrong_key_fails_authentication() {
    let ct = encrypt(b"hello", &key(0x01));
    let err = decrypt(&ct, &key(0x02)).unwrap_err();
    assert!(matches!(err, CryptError::Authentication { frame: 0 }));
}

#[test]
fn failure_in_later_frame_keeps_earlier_frames() {
    let k = key(0x07);
    let plaintext = vec![0x61u8; CHUNK_SIZE + 100];
    let mut ct = encrypt(&plaintext, &k);
    let last = ct.len() - 1;
    ct[last] ^= 0xFF;

    let mut out = Vec::new();
    let err = decrypt_stream(&k, Cursor::new(&ct), &mut out).unwrap_err();
    assert!(matches!(err, CryptError::Authentication { frame: 1 }));
    assert_eq!(out.len(), CHUNK_SIZE, "only the authenticated first frame was delivered");
}

#[test]
fn reordered_frames_are_rejected() {
    let k = key(0x08);
    let plaintext: Vec<u8> = (0..CHUNK_SIZE * 2).map(|i| (i / CHUNK_SIZE) as u8).collect();
    let ct = encrypt(&plaintext, &k);
    let offsets = frame_offsets(&ct);

    let mut swapped = ct[..NONCE_SIZE].to_vec();
    swapped.extend_from_slice(&ct[offsets[1]..]);
    swapped.extend_from_slice(&ct[offsets[0]..offsets[1]]);

    assert!(decrypt(&swapped, &k).unwrap_err().is_authentication());
}

#[test]
fn truncation_inside_a_frame_is_detected() {
    let k = key(0x03);
    let plaintext = vec![0x5Au8; CHUNK_SIZE + 40];
    let ct = encrypt(&plaintext, &k);
    let offsets = frame_offsets(&ct);

    let cuts = [
        1,
        NONCE_SIZE - 1,
        NONCE_SIZE + 1,
        NONCE_SIZE + 3,
        NONCE_SIZE + LENGTH_SIZE,
        offsets[1] - 1,
        offsets[1] + 2,
        offsets[1] + LENGTH_SIZE + 10,
        ct.len() - 1,
    ];
    for cut in cuts {
        let err = decrypt(&ct[..cut], &k).unwrap_err();
        assert!(err.is_framing(), "cut at {cut}: expected framing error, got {err}");
    }
}

#[test]
fn truncation_at_a_frame_boundary_ends_cleanly() {
    // no end marker in the wire format: dropping whole trailing frames is
    // indistinguishable from a shorter stream
    let k = key(0x03);
    let plaintext = vec![0x5Au8; CHUNK_SIZE + 40];
    let ct = encrypt(&plaintext, &k);
    let offsets = frame_offsets(&ct);

    assert_eq!(decrypt(&ct[..offsets[1]], &k).unwrap(), &plaintext[..CHUNK_SIZE]);
    assert_eq!(decrypt(&ct[..NONCE_SIZE], &k).unwrap(), b"");
}

#[test]
fn zero_length_ciphertext_is_truncated() {
    let err = decrypt(b"", &key(0)).unwrap_err();
    assert!(matches!(
        err,
        CryptError::Truncated {
            stage: Stage::ReadNonce
        }
    ));
}

#[test]
fn frames_use_distinct_counter_nonces() {
    let k = key(0x04);
    let plaintext = vec![0u8; CHUNK_SIZE * 4 + 1];
    let ct = encrypt(&plaintext, &k);

    let start: [u8; NONCE_SIZE] = ct[..NONCE_SIZE].try_into().unwrap();
    let mut seq = NonceSequence::new(start);
    let mut seen = HashSet::new();

    for offset in frame_offsets(&ct) {
        let len = u32::from_be_bytes(ct[offset..offset + LENGTH_SIZE].try_into().unwrap()) as usize;
        let sealed = &ct[offset + LENGTH_SIZE..offset + LENGTH_SIZE + len];
        let nonce = *seq.current().unwrap();

        assert!(seen.insert(nonce), "nonce reused");
        open(&k, &nonce, sealed).expect("frame opens under start + index");
        seq.advance().unwrap();
    }
    assert_eq!(seen.len(), 5);
}

#[test]
fn starting_nonces_differ_between_streams() {
    let k = key(0x05);
    let a = encrypt(b"same", &k);
    let b = encrypt(b"same", &k);
    assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
    assert_ne!(a, b);
}

#[test]
fn large_stream_roundtrip() {
    let k = key(0x06);
    let len = 32 * CHUNK_SIZE as u64 + 999;

    let mut ct = Vec::new();
    let stats = encrypt_stream(&k, io::Read::take(io::repeat(0xC3), len), &mut ct).unwrap();
    assert_eq!(stats.frames, 33);
    assert_eq!(stats.plaintext_bytes, len);
    assert_eq!(stats.ciphertext_bytes, ct.len() as u64);

    let mut out = Vec::new();
    let dstats = decrypt_stream(&k, Cursor::new(&ct), &mut out).unwrap();
    assert_eq!(dstats, stats);
    assert!(out.iter().all(|&b| b == 0xC3));
    assert_eq!(out.len() as u64, len);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn roundtrip(data in prop::collection::vec(any::<u8>(), 0..(3 * CHUNK_SIZE)), k in any::<[u8; 32]>()) {
        let k = StreamKey::from_bytes(k);
        let ct = encrypt(&data, &k);

        let frames = data.len().div_ceil(CHUNK_SIZE);
        prop_assert_eq!(ct.len(), NONCE_SIZE + data.len() + frames * (LENGTH_SIZE + TAG_SIZE));
        prop_assert_eq!(decrypt(&ct, &k).unwrap(), data);
    }

    #[test]
    fn any_bit_flip_is_rejected(data in prop::collection::vec(any::<u8>(), 1..2048), pos in any::<prop::sample::Index>(), bit in 0u8..8) {
        let k = key(0x11);
        let mut ct = encrypt(&data, &k);
        let i = pos.index(ct.len());
        ct[i] ^= 1 << bit;

        let err = decrypt(&ct, &k).unwrap_err();
        let in_length_prefix = (NONCE_SIZE..NONCE_SIZE + LENGTH_SIZE).contains(&i);
        if in_length_prefix {
            prop_assert!(err.is_framing() || err.is_authentication(), "got {}", err);
        } else {
            prop_assert!(err.is_authentication(), "flip at {} gave {}", i, err);
        }
    }

    #[test]
    fn distinct_keys_do_not_decrypt(data in prop::collection::vec(any::<u8>(), 1..512), a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
        prop_assume!(a != b);
        let ct = encrypt(&data, &StreamKey::from_bytes(a));
        prop_assert!(decrypt(&ct, &StreamKey::from_bytes(b)).unwrap_err().is_authentication());
    }
}
