//! # SRP-like Logon Exchange
//!
//! Challenge/response logon math for the multi-round account logon: neither
//! party transmits the password; each side derives and verifies a proof
//! value from the shared verifier.
//!
//! The exchange runs over a fixed 256-bit modulus with generator 47 and
//! little-endian field encoding (this service predates the RFC framing of
//! SRP; `k = 1`, and the scrambling parameter `u` is taken big-endian from
//! the leading bytes of `SHA-1(B)`).
//!
//! Values on the wire: 32-byte salt, 32-byte public values `A`/`B`,
//! 20-byte proofs `M1`/`M2`.

use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;
use sha1::{Digest, Sha1};
use zeroize::Zeroize;

use crate::error::{HandshakeFailure, ProtocolError, Result};

/// Wire width of salts and public values.
pub const FIELD_LEN: usize = 32;

/// Wire width of proofs.
pub const PROOF_LEN: usize = 20;

/// Modulus of the exchange (hex, most significant digit first).
const MODULUS_HEX: &[u8] = b"F8FF1A8B619918032186B68CA092B5557E976C78C73212D91216F6658523C787";

/// Generator.
const GENERATOR: u8 = 47;

fn modulus() -> BigUint {
    // The constant is well-formed hex; parse cannot fail.
    BigUint::parse_bytes(MODULUS_HEX, 16).unwrap_or_else(BigUint::zero)
}

fn generator() -> BigUint {
    BigUint::from(GENERATOR)
}

fn sha1_parts(parts: &[&[u8]]) -> [u8; PROOF_LEN] {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Little-endian, zero-padded 32-byte image of a field element.
fn to_field_bytes(value: &BigUint) -> [u8; FIELD_LEN] {
    let mut out = [0u8; FIELD_LEN];
    let raw = value.to_bytes_le();
    let n = raw.len().min(FIELD_LEN);
    out[..n].copy_from_slice(&raw[..n]);
    out
}

/// `SHA-1(USERNAME:PASSWORD)`, both halves uppercased: the long-lived
/// credential secret everything else derives from.
fn credential_hash(username: &str, password: &str) -> [u8; PROOF_LEN] {
    let identity = format!(
        "{}:{}",
        username.to_uppercase(),
        password.to_uppercase()
    );
    sha1_parts(&[identity.as_bytes()])
}

/// Private exponent `x` for a given salt: `SHA-1(salt ‖ credential_hash)`,
/// interpreted little-endian.
fn private_exponent(salt: &[u8; FIELD_LEN], credential: &[u8; PROOF_LEN]) -> BigUint {
    BigUint::from_bytes_le(&sha1_parts(&[salt, credential]))
}

/// Fixed session constant `I = SHA-1(N) xor SHA-1(g)`.
fn exchange_constant() -> [u8; PROOF_LEN] {
    let n_hash = sha1_parts(&[&to_field_bytes(&modulus())]);
    let g_hash = sha1_parts(&[&[GENERATOR]]);
    let mut out = [0u8; PROOF_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = n_hash[i] ^ g_hash[i];
    }
    out
}

/// 40-byte session key: the even and odd halves of `S` hashed separately
/// and re-interleaved.
fn interleaved_key(shared: &[u8; FIELD_LEN]) -> [u8; 40] {
    let mut even = [0u8; FIELD_LEN / 2];
    let mut odd = [0u8; FIELD_LEN / 2];
    for i in 0..FIELD_LEN / 2 {
        even[i] = shared[2 * i];
        odd[i] = shared[2 * i + 1];
    }
    let even_hash = sha1_parts(&[&even]);
    let odd_hash = sha1_parts(&[&odd]);

    let mut key = [0u8; 40];
    for i in 0..PROOF_LEN {
        key[2 * i] = even_hash[i];
        key[2 * i + 1] = odd_hash[i];
    }
    key
}

/// Scrambling parameter `u`: the leading 4 bytes of `SHA-1(B)`, big-endian.
fn scramble(server_public: &[u8; FIELD_LEN]) -> BigUint {
    let hash = sha1_parts(&[server_public]);
    BigUint::from(u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]))
}

/// Both proofs of one completed exchange.
#[derive(Debug, Clone, Copy)]
pub struct SrpProof {
    /// `M1`, sent to the server.
    pub client_proof: [u8; PROOF_LEN],
    /// The `M2` the server must answer with.
    pub expected_server_proof: [u8; PROOF_LEN],
}

/// Client side of the exchange. One instance per logon attempt; the
/// credential secret is zeroed on drop.
pub struct SrpClient {
    username_upper: String,
    credential: [u8; PROOF_LEN],
    ephemeral: BigUint,
    public: [u8; FIELD_LEN],
}

impl SrpClient {
    /// Start an exchange with a fresh random ephemeral.
    pub fn new(username: &str, password: &str) -> Self {
        let mut raw = [0u8; FIELD_LEN];
        rand::rng().fill_bytes(&mut raw);
        Self::with_ephemeral(username, password, &raw)
    }

    /// Start an exchange with a caller-supplied ephemeral (tests).
    pub fn with_ephemeral(username: &str, password: &str, ephemeral: &[u8; FIELD_LEN]) -> Self {
        let n = modulus();
        let a = BigUint::from_bytes_le(ephemeral) % &n;
        let public = to_field_bytes(&generator().modpow(&a, &n));
        Self {
            username_upper: username.to_uppercase(),
            credential: credential_hash(username, password),
            ephemeral: a,
            public,
        }
    }

    /// `A`, the client public value sent in logon round 1.
    pub fn public_value(&self) -> [u8; FIELD_LEN] {
        self.public
    }

    /// Derive `M1` and the expected `M2` from the server's salt and public
    /// value.
    ///
    /// # Errors
    /// A server public value of zero (mod N) would collapse the shared
    /// secret and is rejected as a protocol violation.
    pub fn session_proof(
        &self,
        salt: &[u8; FIELD_LEN],
        server_public: &[u8; FIELD_LEN],
    ) -> Result<SrpProof> {
        let n = modulus();
        let b = BigUint::from_bytes_le(server_public);
        if (&b % &n).is_zero() {
            return Err(ProtocolError::Handshake(HandshakeFailure::OutOfSequence(
                "zero server public value",
            )));
        }

        let x = private_exponent(salt, &self.credential);
        let v = generator().modpow(&x, &n);
        let u = scramble(server_public);

        // S = (B - v) ^ (a + u*x) mod N, with k = 1.
        let base = (&b + &n - (&v % &n)) % &n;
        let exponent = &self.ephemeral + &u * &x;
        let shared = to_field_bytes(&base.modpow(&exponent, &n));
        let key = interleaved_key(&shared);

        let username_hash = sha1_parts(&[self.username_upper.as_bytes()]);
        let client_proof = sha1_parts(&[
            &exchange_constant(),
            &username_hash,
            salt,
            &self.public,
            server_public,
            &key,
        ]);
        let expected_server_proof = sha1_parts(&[&self.public, &client_proof, &key]);

        Ok(SrpProof {
            client_proof,
            expected_server_proof,
        })
    }

    /// Salt and verifier for the account-creation sub-exchange: a fresh
    /// random salt and `v = g^x mod N` derived from it.
    pub fn account_create_values(&self) -> ([u8; FIELD_LEN], [u8; FIELD_LEN]) {
        let mut salt = [0u8; FIELD_LEN];
        rand::rng().fill_bytes(&mut salt);
        let x = private_exponent(&salt, &self.credential);
        let verifier = to_field_bytes(&generator().modpow(&x, &modulus()));
        (salt, verifier)
    }
}

impl Drop for SrpClient {
    fn drop(&mut self) {
        self.credential.zeroize();
    }
}

impl std::fmt::Debug for SrpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the credential hash.
        f.debug_struct("SrpClient")
            .field("username", &self.username_upper)
            .finish_non_exhaustive()
    }
}
