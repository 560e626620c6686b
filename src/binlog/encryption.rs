use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::binlog::{BinlogError, DbKey};
use crate::wire::{Reader, Writer};

pub(crate) const MIN_SALT_SIZE: usize = 16;
pub(crate) const DEFAULT_SALT_SIZE: usize = 32;
pub(crate) const KEY_SIZE: usize = 32;
pub(crate) const IV_SIZE: usize = 16;
pub(crate) const HASH_SIZE: usize = 32;

const KDF_ITERATION_COUNT: u32 = 60002;
const KDF_FAST_ITERATION_COUNT: u32 = 2;
const KEY_HASH_LABEL: &[u8] = b"cucumbers everywhere";

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Payload of the `AesCtrEncryption` service record: everything needed to
/// re-derive the working key from the database key and to prove the key
/// right without storing it.
pub(crate) struct EncryptionRecord {
    pub key_salt: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub key_hash: [u8; HASH_SIZE],
}

impl EncryptionRecord {
    pub fn generate(key_salt: Option<Vec<u8>>) -> EncryptionRecord {
        let key_salt = key_salt.unwrap_or_else(|| {
            let mut salt = vec![0u8; DEFAULT_SALT_SIZE];
            OsRng.fill_bytes(&mut salt);
            salt
        });
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        EncryptionRecord {
            key_salt,
            iv,
            key_hash: [0u8; HASH_SIZE],
        }
    }

    pub fn store(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u32(0); // flags, reserved
        writer.write_bytes(&self.key_salt);
        writer.write_bytes(&self.iv);
        writer.write_bytes(&self.key_hash);
        writer.into_inner()
    }

    pub fn parse(data: &[u8]) -> Result<EncryptionRecord, BinlogError> {
        let corrupt = |what: &str| BinlogError::Corruption(format!("encryption record: {}", what));

        let mut reader = Reader::new(data);
        let _flags = reader.read_u32().map_err(|_| corrupt("missing flags"))?;
        let key_salt = reader
            .read_bytes()
            .map_err(|_| corrupt("missing key salt"))?
            .to_vec();
        let iv_bytes = reader.read_bytes().map_err(|_| corrupt("missing iv"))?;
        let hash_bytes = reader.read_bytes().map_err(|_| corrupt("missing key hash"))?;

        if key_salt.len() < MIN_SALT_SIZE {
            return Err(corrupt("salt too short"));
        }
        let iv: [u8; IV_SIZE] = iv_bytes.try_into().map_err(|_| corrupt("bad iv size"))?;
        let key_hash: [u8; HASH_SIZE] = hash_bytes
            .try_into()
            .map_err(|_| corrupt("bad hash size"))?;

        Ok(EncryptionRecord {
            key_salt,
            iv,
            key_hash,
        })
    }

    pub fn generate_key(&self, db_key: &DbKey) -> [u8; KEY_SIZE] {
        generate_key(db_key, &self.key_salt)
    }
}

/// PBKDF2-HMAC-SHA-256. Raw 32-byte keys get the fast iteration count:
/// they carry full entropy already, stretching buys nothing.
pub(crate) fn generate_key(db_key: &DbKey, salt: &[u8]) -> [u8; KEY_SIZE] {
    let iterations = if db_key.is_raw_key() {
        KDF_FAST_ITERATION_COUNT
    } else {
        KDF_ITERATION_COUNT
    };
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(db_key.data(), salt, iterations, &mut key);
    key
}

/// Key fingerprint stored in the encryption record.
pub(crate) fn generate_hash(key: &[u8]) -> [u8; HASH_SIZE] {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("hmac takes keys of any length"));
    mac.update(KEY_HASH_LABEL);
    mac.finalize().into_bytes().into()
}

/// Incremental AES-CTR transform over the log byte stream. Encryption and
/// decryption are the same operation; the keystream position advances with
/// every `apply` and can be repositioned to an absolute ciphertext offset.
pub(crate) struct AesCtrState {
    cipher: Aes256Ctr,
}

impl std::fmt::Debug for AesCtrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCtrState").finish_non_exhaustive()
    }
}

impl AesCtrState {
    pub fn new(key: &[u8; KEY_SIZE], iv: &[u8; IV_SIZE]) -> AesCtrState {
        AesCtrState {
            cipher: Aes256Ctr::new(key.into(), iv.into()),
        }
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }

    pub fn seek(&mut self, pos: u64) {
        self.cipher.seek(pos);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_round_trip() {
        let mut record = EncryptionRecord::generate(None);
        record.key_hash = generate_hash(b"some key");

        let stored = record.store();
        assert_eq!(stored.len() % 4, 0);

        let parsed = EncryptionRecord::parse(&stored).unwrap();
        assert_eq!(parsed.key_salt, record.key_salt);
        assert_eq!(parsed.iv, record.iv);
        assert_eq!(parsed.key_hash, record.key_hash);
    }

    #[test]
    fn key_derivation_depends_on_salt() {
        let db_key = DbKey::password("secret");
        let a = generate_key(&db_key, b"salt-salt-salt-salt-one-");
        let b = generate_key(&db_key, b"salt-salt-salt-salt-two-");
        assert_ne!(a, b);
        assert_eq!(a, generate_key(&db_key, b"salt-salt-salt-salt-one-"));
    }

    #[test]
    fn raw_key_uses_fast_path() {
        let raw = DbKey::raw_key([7u8; 32]);
        let derived = generate_key(&raw, b"0123456789abcdef");
        assert_ne!(derived, [7u8; 32]);
    }

    #[test]
    fn ctr_stream_is_seekable() {
        let key = [1u8; KEY_SIZE];
        let iv = [2u8; IV_SIZE];

        let plaintext = b"a longer sample of plaintext data";
        let mut data = plaintext.to_vec();
        let mut full = AesCtrState::new(&key, &iv);
        full.apply(&mut data);

        // decrypting the second half alone must match once the stream is
        // positioned there
        let mut tail = data[16..].to_vec();
        let mut seeked = AesCtrState::new(&key, &iv);
        seeked.seek(16);
        seeked.apply(&mut tail);
        assert_eq!(tail, plaintext[16..]);
    }
}
