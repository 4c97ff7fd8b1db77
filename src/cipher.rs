//! ChaCha20 keystream and header authentication for the encrypted
//! file-backed container.
//!
//! The keystream is addressed the same way the disk addresses file offsets:
//! [`Cipher::seek`] jumps to an arbitrary byte position so a random-access
//! read or write only ever burns the keystream bytes it actually needs,
//! rather than replaying from the start of the file.

use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use log::warn;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;

use crate::error::{DiskError, DiskResult};

/// Width of a ChaCha20 keystream block, in bytes.
pub const CHACHA20_BLOCK_SIZE: u64 = 64;

/// Length in bytes of the random nonce stored in an encrypted image's
/// header.
pub const NONCE_LEN: usize = 12;

/// Length in bytes of the authentication tag stored alongside the nonce.
pub const TAG_LEN: usize = 32;

/// Domain-separation string mixed into the HKDF `info` parameter, so a key
/// derived for header authentication can never be confused with a key
/// derived for some other purpose.
const HKDF_INFO: &[u8] = b"InFileChaCha20EncryptedDisk";

/// A seekable ChaCha20 keystream, used to XOR-encrypt or XOR-decrypt bytes
/// at an arbitrary offset into the encrypted region.
///
/// Encryption and decryption are the same operation on a stream cipher — one
/// type covers both directions; callers distinguish by which buffer they
/// feed in.
pub struct Cipher {
	inner: ChaCha20,
}

impl Cipher {
	/// Derives the stream key as `SHA-256(password)` and constructs a
	/// cipher instance bound to `nonce`.
	pub fn new(password: &[u8], nonce: &[u8; NONCE_LEN]) -> Self {
		use sha2::Digest;
		let key = Sha256::digest(password);
		let inner = ChaCha20::new(&key, nonce.into());
		Self { inner }
	}

	/// Seeks the keystream to `offset` bytes from the start of the
	/// encrypted region.
	///
	/// Internally this is `block_counter = offset / 64`, `block_offset =
	/// offset % 64`: the cipher resets to the block containing `offset`
	/// and burns `block_offset` bytes of keystream to land exactly on it.
	pub fn seek(&mut self, offset: u64) {
		self.inner.seek(offset);
	}

	/// XORs `buf` in place with the keystream at the cipher's current
	/// position, advancing the position by `buf.len()`.
	pub fn apply(&mut self, buf: &mut [u8]) {
		self.inner.apply_keystream(buf);
	}
}

/// Generates a fresh random nonce for a newly created encrypted image.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
	let mut nonce = [0u8; NONCE_LEN];
	OsRng.fill_bytes(&mut nonce);
	nonce
}

/// HKDF-SHA256 + HMAC-SHA256 authentication of an encrypted image's header.
///
/// The header stores `nonce` in the clear plus a tag produced by
/// [`HkdfHmac::make`]; on open, [`HkdfHmac::verify`] recomputes the tag from
/// the supplied password and the stored nonce and rejects the image if it
/// doesn't match, which is the only signal distinguishing a wrong password
/// from a corrupted header.
pub struct HkdfHmac;

impl HkdfHmac {
	fn auth_key(password: &[u8], nonce: &[u8; NONCE_LEN]) -> [u8; TAG_LEN] {
		let mut salt = Vec::with_capacity(b"HkdfHmac:nonce:".len() + NONCE_LEN);
		salt.extend_from_slice(b"HkdfHmac:nonce:");
		salt.extend_from_slice(nonce);

		let hk = Hkdf::<Sha256>::new(Some(&salt), password);
		let mut auth_key = [0u8; TAG_LEN];
		hk.expand(HKDF_INFO, &mut auth_key)
			.expect("TAG_LEN is a valid HKDF-SHA256 output length");
		auth_key
	}

	/// Derives the authentication tag for `nonce` under `password`.
	pub fn make(password: &[u8], nonce: &[u8; NONCE_LEN]) -> [u8; TAG_LEN] {
		let auth_key = Self::auth_key(password, nonce);
		let mut mac = Hmac::<Sha256>::new_from_slice(&auth_key)
			.expect("HMAC-SHA256 accepts any key length");
		mac.update(nonce);
		mac.finalize().into_bytes().into()
	}

	/// Verifies `stored_tag` against `password` and `nonce` in constant
	/// time.
	pub fn verify(
		password: &[u8],
		nonce: &[u8; NONCE_LEN],
		stored_tag: &[u8; TAG_LEN],
	) -> DiskResult<()> {
		let auth_key = Self::auth_key(password, nonce);
		let mut mac = Hmac::<Sha256>::new_from_slice(&auth_key)
			.expect("HMAC-SHA256 accepts any key length");
		mac.update(nonce);
		mac.verify_slice(stored_tag).map_err(|_| {
			warn!("encrypted image header failed authentication (wrong password or corrupted header)");
			DiskError::AuthenticationFailed
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encrypt_then_decrypt_round_trips() {
		let nonce = [7u8; NONCE_LEN];
		let mut enc = Cipher::new(b"hunter2", &nonce);
		let mut dec = Cipher::new(b"hunter2", &nonce);

		let mut data = b"the quick brown fox jumps over the lazy dog".to_vec();
		let plaintext = data.clone();
		enc.apply(&mut data);
		assert_ne!(data, plaintext);
		dec.apply(&mut data);
		assert_eq!(data, plaintext);
	}

	#[test]
	fn seek_lands_on_same_keystream_as_sequential_application() {
		let nonce = [3u8; NONCE_LEN];
		let mut sequential = Cipher::new(b"pw", &nonce);
		let mut seeked = Cipher::new(b"pw", &nonce);

		let mut whole = vec![0u8; 200];
		sequential.apply(&mut whole);

		seeked.seek(150);
		let mut tail = vec![0u8; 50];
		seeked.apply(&mut tail);

		assert_eq!(&tail[..], &whole[150..200]);
	}

	#[test]
	fn seek_mid_block_burns_partial_keystream_correctly() {
		let nonce = [1u8; NONCE_LEN];
		let mut sequential = Cipher::new(b"pw", &nonce);
		let mut seeked = Cipher::new(b"pw", &nonce);

		let mut whole = vec![0u8; 300];
		sequential.apply(&mut whole);

		// 137 is neither block-aligned nor block-size-multiple away from 0.
		seeked.seek(137);
		let mut tail = vec![0u8; 40];
		seeked.apply(&mut tail);

		assert_eq!(&tail[..], &whole[137..177]);
	}

	#[test]
	fn hkdf_hmac_round_trips_and_rejects_wrong_password() {
		let nonce = generate_nonce();
		let tag = HkdfHmac::make(b"correct horse", &nonce);
		assert!(HkdfHmac::verify(b"correct horse", &nonce, &tag).is_ok());
		assert!(HkdfHmac::verify(b"wrong password", &nonce, &tag).is_err());
	}

	#[test]
	fn hkdf_hmac_rejects_tampered_nonce() {
		let nonce = generate_nonce();
		let tag = HkdfHmac::make(b"pw", &nonce);
		let mut other_nonce = nonce;
		other_nonce[0] ^= 0xFF;
		assert!(HkdfHmac::verify(b"pw", &other_nonce, &tag).is_err());
	}
}
