//! # SRP6 Login Proof
//!
//! Zero-knowledge password proof over the RFC 5054 1024-bit group (g = 2)
//! with SHA-256.
//!
//! Byte discipline (fixed by the client binary):
//! - every big integer is serialized little-endian and zero-padded to a
//!   multiple of 4 bytes before it enters a hash
//! - hash outputs are read back as little-endian integers
//! - public values travel as 128-byte little-endian fields
//!
//! The server side is [`HandshakeSession`]: one per login attempt, consumed
//! by [`HandshakeSession::verify`]. [`SrpClient`] is the mirror image used by
//! the reference client and in tests.

use std::fmt;
use std::sync::OnceLock;

use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{constants, ProtocolError, Result};

pub const SALT_LEN: usize = 16;
/// Size of public values (A, B) on the wire.
pub const PUBLIC_LEN: usize = 128;
pub const PRIVATE_LEN: usize = 32;
pub const SESSION_KEY_LEN: usize = 64;
pub const PROOF_LEN: usize = 32;

pub const GENERATOR: u32 = 2;

/// RFC 5054 1024-bit safe prime, big-endian.
const PRIME_BE: [u8; PUBLIC_LEN] = [
    0xEE, 0xAF, 0x0A, 0xB9, 0xAD, 0xB3, 0x8D, 0xD6, 0x9C, 0x33, 0xF8, 0x0A,
    0xFA, 0x8F, 0xC5, 0xE8, 0x60, 0x72, 0x61, 0x87, 0x75, 0xFF, 0x3C, 0x0B,
    0x9E, 0xA2, 0x31, 0x4C, 0x9C, 0x25, 0x65, 0x76, 0xD6, 0x74, 0xDF, 0x74,
    0x96, 0xEA, 0x81, 0xD3, 0x38, 0x3B, 0x48, 0x13, 0xD6, 0x92, 0xC6, 0xE0,
    0xE0, 0xD5, 0xD8, 0xE2, 0x50, 0xB9, 0x8B, 0xE4, 0x8E, 0x49, 0x5C, 0x1D,
    0x60, 0x89, 0xDA, 0xD1, 0x5D, 0xC7, 0xD7, 0xB4, 0x61, 0x54, 0xD6, 0xB6,
    0xCE, 0x8E, 0xF4, 0xAD, 0x69, 0xB1, 0x5D, 0x49, 0x82, 0x55, 0x9B, 0x29,
    0x7B, 0xCF, 0x18, 0x85, 0xC5, 0x29, 0xF5, 0x66, 0x66, 0x0E, 0x57, 0xEC,
    0x68, 0xED, 0xBC, 0x3C, 0x05, 0x72, 0x6C, 0xC0, 0x2F, 0xD4, 0xCB, 0xF4,
    0x97, 0x6E, 0xAA, 0x9A, 0xFD, 0x51, 0x38, 0xFE, 0x83, 0x76, 0x43, 0x5B,
    0x9F, 0xC6, 0x1D, 0x2F, 0xC0, 0xEB, 0x06, 0xE3,
];

/// Group parameters, computed once.
struct Group {
    n: BigUint,
    g: BigUint,
    k: BigUint,
    /// H(N) xor H(g)
    ng_xor: [u8; PROOF_LEN],
}

fn group() -> &'static Group {
    static GROUP: OnceLock<Group> = OnceLock::new();
    GROUP.get_or_init(|| {
        let n = BigUint::from_bytes_be(&PRIME_BE);
        let g = BigUint::from(GENERATOR);
        let k = Transcript::new().int(&n).int(&g).finish_int();

        let hn = Transcript::new().int(&n).finish();
        let hg = Transcript::new().int(&g).finish();
        let mut ng_xor = [0u8; PROOF_LEN];
        for (out, (a, b)) in ng_xor.iter_mut().zip(hn.iter().zip(hg.iter())) {
            *out = a ^ b;
        }

        Group { n, g, k, ng_xor }
    })
}

/// Little-endian bytes padded to a 4-byte boundary.
pub fn padded_le(value: &BigUint) -> Vec<u8> {
    let mut bytes = value.to_bytes_le();
    let padded = bytes.len().div_ceil(4) * 4;
    bytes.resize(padded.max(4), 0);
    bytes
}

fn to_wire(value: &BigUint) -> [u8; PUBLIC_LEN] {
    let mut out = [0u8; PUBLIC_LEN];
    let bytes = value.to_bytes_le();
    let len = bytes.len().min(PUBLIC_LEN);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

fn random_bytes<const N: usize>() -> Zeroizing<[u8; N]> {
    let mut bytes = Zeroizing::new([0u8; N]);
    rand::rng().fill_bytes(&mut bytes[..]);
    bytes
}

/// Multi-value SHA-256 with the padding discipline applied to integers.
struct Transcript(Sha256);

impl Transcript {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn int(mut self, value: &BigUint) -> Self {
        self.0.update(padded_le(value));
        self
    }

    fn bytes(mut self, value: &[u8]) -> Self {
        self.0.update(value);
        self
    }

    fn finish(self) -> [u8; PROOF_LEN] {
        self.0.finalize().into()
    }

    fn finish_int(self) -> BigUint {
        BigUint::from_bytes_le(&self.finish())
    }
}

/// Identities are case-insensitive: every hash binds the lowercased form.
pub fn canonical_identity(identity: &str) -> String {
    identity.to_lowercase()
}

/// x = H(s, H(identity ":" password))
fn private_key(identity: &str, password: &str, salt: &[u8; SALT_LEN]) -> BigUint {
    let credentials = Zeroizing::new(format!("{}:{password}", canonical_identity(identity)));
    let inner: [u8; PROOF_LEN] = Sha256::digest(credentials.as_bytes()).into();
    Transcript::new().bytes(salt).bytes(&inner).finish_int()
}

/// Password verifier v = g^x mod N, little-endian.
pub fn compute_verifier(identity: &str, password: &str, salt: &[u8; SALT_LEN]) -> Vec<u8> {
    let group = group();
    let x = private_key(identity, password, salt);
    group.g.modpow(&x, &group.n).to_bytes_le()
}

/// Fresh random salt and the matching verifier.
pub fn generate_account(identity: &str, password: &str) -> ([u8; SALT_LEN], Vec<u8>) {
    let salt = *random_bytes::<SALT_LEN>();
    let verifier = compute_verifier(identity, password, &salt);
    (salt, verifier)
}

/// Session key: even and odd bytes of S hashed separately, then interleaved.
fn interleave_hash(secret: &BigUint) -> Zeroizing<[u8; SESSION_KEY_LEN]> {
    let bytes = Zeroizing::new(padded_le(secret));
    let even: Zeroizing<Vec<u8>> = Zeroizing::new(bytes.iter().step_by(2).copied().collect());
    let odd: Zeroizing<Vec<u8>> =
        Zeroizing::new(bytes.iter().skip(1).step_by(2).copied().collect());

    let even_hash: [u8; PROOF_LEN] = Sha256::digest(even.as_slice()).into();
    let odd_hash: [u8; PROOF_LEN] = Sha256::digest(odd.as_slice()).into();

    let mut key = Zeroizing::new([0u8; SESSION_KEY_LEN]);
    for i in 0..PROOF_LEN {
        key[2 * i] = even_hash[i];
        key[2 * i + 1] = odd_hash[i];
    }
    key
}

/// M1 = H(H(N) xor H(g), H(identity), s, A, B, K)
fn client_evidence(
    identity: &str,
    salt: &[u8; SALT_LEN],
    client_public: &BigUint,
    server_public: &BigUint,
    session_key: &[u8; SESSION_KEY_LEN],
) -> [u8; PROOF_LEN] {
    let identity_hash: [u8; PROOF_LEN] =
        Sha256::digest(canonical_identity(identity).as_bytes()).into();
    Transcript::new()
        .bytes(&group().ng_xor)
        .bytes(&identity_hash)
        .bytes(salt)
        .int(client_public)
        .int(server_public)
        .bytes(session_key)
        .finish()
}

/// M2 = H(A, M1, K), each 4-byte block byte-reversed.
fn server_evidence(
    client_public: &BigUint,
    client_proof: &[u8; PROOF_LEN],
    session_key: &[u8; SESSION_KEY_LEN],
) -> [u8; PROOF_LEN] {
    let mut proof = Transcript::new()
        .int(client_public)
        .bytes(client_proof)
        .bytes(session_key)
        .finish();
    for block in proof.chunks_exact_mut(4) {
        block.reverse();
    }
    proof
}

fn proofs_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Server-side state for one login attempt.
pub struct HandshakeSession {
    identity: String,
    salt: [u8; SALT_LEN],
    verifier: BigUint,
    ephemeral_private: Zeroizing<[u8; PRIVATE_LEN]>,
    ephemeral_public: BigUint,
}

impl fmt::Debug for HandshakeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeSession")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Result of a verified login proof.
pub struct HandshakeOutcome {
    pub identity: String,
    pub session_key: Zeroizing<[u8; SESSION_KEY_LEN]>,
    pub server_evidence: [u8; PROOF_LEN],
}

impl HandshakeSession {
    /// Start a login attempt with a random private ephemeral.
    pub fn begin(identity: &str, salt: [u8; SALT_LEN], verifier: &[u8]) -> Self {
        Self::with_private(identity, salt, verifier, *random_bytes::<PRIVATE_LEN>())
    }

    /// Start a login attempt with a caller-chosen private ephemeral.
    pub fn with_private(
        identity: &str,
        salt: [u8; SALT_LEN],
        verifier: &[u8],
        private: [u8; PRIVATE_LEN],
    ) -> Self {
        let group = group();
        let verifier = BigUint::from_bytes_le(verifier);
        let b = BigUint::from_bytes_le(&private);
        // B = (k·v + g^b) mod N
        let ephemeral_public = (&group.k * &verifier + group.g.modpow(&b, &group.n)) % &group.n;

        Self {
            identity: identity.to_string(),
            salt,
            verifier,
            ephemeral_private: Zeroizing::new(private),
            ephemeral_public,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    /// B as sent on the wire.
    pub fn server_public(&self) -> [u8; PUBLIC_LEN] {
        to_wire(&self.ephemeral_public)
    }

    /// Check the client's A and M1.
    ///
    /// Consumes the session so a proof can never be checked twice against the
    /// same ephemeral.
    ///
    /// # Errors
    /// `InvalidPublicKey` if A ≡ 0 (mod N) or the scrambler is zero,
    /// `InvalidProof` on any evidence mismatch.
    pub fn verify(
        self,
        client_public: &[u8],
        client_proof: &[u8; PROOF_LEN],
    ) -> Result<HandshakeOutcome> {
        let group = group();
        let a = BigUint::from_bytes_le(client_public);
        if (&a % &group.n).is_zero() {
            return Err(ProtocolError::InvalidPublicKey);
        }

        let u = Transcript::new().int(&a).int(&self.ephemeral_public).finish_int();
        if u.is_zero() {
            return Err(ProtocolError::InvalidPublicKey);
        }

        let b = BigUint::from_bytes_le(&self.ephemeral_private[..]);
        // S = (A·v^u)^b mod N
        let base = (&a * self.verifier.modpow(&u, &group.n)) % &group.n;
        let secret = base.modpow(&b, &group.n);
        let session_key = interleave_hash(&secret);

        let expected = client_evidence(
            &self.identity,
            &self.salt,
            &a,
            &self.ephemeral_public,
            &session_key,
        );
        if !proofs_match(&expected, client_proof) {
            return Err(ProtocolError::InvalidProof);
        }

        let server_evidence = server_evidence(&a, &expected, &session_key);
        Ok(HandshakeOutcome {
            identity: self.identity.clone(),
            session_key,
            server_evidence,
        })
    }
}

/// Client-side counterpart of [`HandshakeSession`].
pub struct SrpClient {
    identity: String,
    password: Zeroizing<String>,
    ephemeral_private: Zeroizing<[u8; PRIVATE_LEN]>,
}

/// Everything the client derives from the server challenge.
pub struct ClientProof {
    pub public: [u8; PUBLIC_LEN],
    pub evidence: [u8; PROOF_LEN],
    pub session_key: Zeroizing<[u8; SESSION_KEY_LEN]>,
    expected_server_evidence: [u8; PROOF_LEN],
}

impl ClientProof {
    /// Check M2 from the server.
    pub fn verify_server(&self, server_evidence: &[u8; PROOF_LEN]) -> Result<()> {
        if proofs_match(&self.expected_server_evidence, server_evidence) {
            Ok(())
        } else {
            Err(ProtocolError::HandshakeError(constants::ERR_SERVER_PROOF.into()))
        }
    }
}

impl SrpClient {
    pub fn new(identity: &str, password: &str) -> Self {
        Self::with_private(identity, password, *random_bytes::<PRIVATE_LEN>())
    }

    pub fn with_private(identity: &str, password: &str, private: [u8; PRIVATE_LEN]) -> Self {
        Self {
            identity: identity.to_string(),
            password: Zeroizing::new(password.to_string()),
            ephemeral_private: Zeroizing::new(private),
        }
    }

    /// A = g^a mod N
    pub fn public(&self) -> [u8; PUBLIC_LEN] {
        let group = group();
        let a = BigUint::from_bytes_le(&self.ephemeral_private[..]);
        to_wire(&group.g.modpow(&a, &group.n))
    }

    /// Answer a server challenge (salt, B).
    ///
    /// # Errors
    /// `InvalidPublicKey` if B ≡ 0 (mod N).
    pub fn respond(&self, salt: &[u8; SALT_LEN], server_public: &[u8]) -> Result<ClientProof> {
        let group = group();
        let b_pub = BigUint::from_bytes_le(server_public);
        if (&b_pub % &group.n).is_zero() {
            return Err(ProtocolError::InvalidPublicKey);
        }

        let a = BigUint::from_bytes_le(&self.ephemeral_private[..]);
        let a_pub = group.g.modpow(&a, &group.n);
        let u = Transcript::new().int(&a_pub).int(&b_pub).finish_int();
        let x = private_key(&self.identity, &self.password, salt);

        // S = (B - k·g^x)^(a + u·x) mod N
        let kgx = (&group.k * group.g.modpow(&x, &group.n)) % &group.n;
        let base = (&b_pub % &group.n + &group.n - kgx) % &group.n;
        let secret = base.modpow(&(&a + &u * &x), &group.n);
        let session_key = interleave_hash(&secret);

        let evidence = client_evidence(&self.identity, salt, &a_pub, &b_pub, &session_key);
        let expected_server_evidence = server_evidence(&a_pub, &evidence, &session_key);

        Ok(ClientProof {
            public: to_wire(&a_pub),
            evidence,
            session_key,
            expected_server_evidence,
        })
    }
}
