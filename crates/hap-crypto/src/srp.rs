//! SRP-6a for HomeKit pair-setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512. The accessory runs
//! [`SrpServer`]; [`SrpClient`] implements the controller side and is used to
//! exercise the server end to end.

use crate::keys::SharedSecret;
use hap_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// Size of the per-pairing salt.
pub const SALT_BYTES: usize = 16;

/// Username HAP uses for every pair-setup exchange.
pub const PAIR_SETUP_USERNAME: &[u8] = b"Pair-Setup";

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// SRP-6a parameters (3072-bit, RFC 5054).
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 5).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16)
            .expect("Invalid RFC 5054 prime constant");
        let g = BigUint::from(5u32);
        Self { n, g }
    }
}

/// Accessory-side SRP exchange.
///
/// Operations must run in order: [`set_salt`](Self::set_salt),
/// [`set_username_and_password`](Self::set_username_and_password),
/// [`compute_key`](Self::compute_key), [`try_respond`](Self::try_respond).
/// One instance serves exactly one pairing attempt.
pub struct SrpServer {
    params: SrpParams,
    salt: Option<Vec<u8>>,
    username: Vec<u8>,
    verifier: Option<BigUint>,
    private_key: Option<Zeroizing<Vec<u8>>>,
    public_key: Option<BigUint>,
    client_public_key: Option<BigUint>,
    shared_secret: Option<SharedSecret>,
}

impl SrpServer {
    /// Create an empty exchange.
    pub fn new() -> Self {
        Self {
            params: SrpParams::default(),
            salt: None,
            username: Vec::new(),
            verifier: None,
            private_key: None,
            public_key: None,
            client_public_key: None,
            shared_secret: None,
        }
    }

    /// Store the per-user salt.
    pub fn set_salt(&mut self, salt: &[u8]) {
        self.salt = Some(salt.to_vec());
    }

    /// Derive the verifier and generate the server ephemeral key pair.
    ///
    /// # Panics
    ///
    /// Panics if [`set_salt`](Self::set_salt) has not been called.
    pub fn set_username_and_password(&mut self, username: &[u8], password: &[u8]) {
        let b = OsRng.gen_biguint(256);
        self.install_credentials(username, password, b);
    }

    /// Same as [`set_username_and_password`](Self::set_username_and_password)
    /// with a caller-chosen ephemeral secret.
    pub fn set_username_and_password_with_private_key(
        &mut self,
        username: &[u8],
        password: &[u8],
        private_key: &[u8],
    ) {
        self.install_credentials(username, password, BigUint::from_bytes_be(private_key));
    }

    fn install_credentials(&mut self, username: &[u8], password: &[u8], b: BigUint) {
        let salt = require(&self.salt, "set_salt");

        // v = g^x mod N
        let x = compute_x(salt, username, password);
        let verifier = self.params.g.modpow(&x, &self.params.n);

        // B = (k*v + g^b) mod N
        let k = compute_k(&self.params);
        let g_b = self.params.g.modpow(&b, &self.params.n);
        let public_key = (&k * &verifier + &g_b) % &self.params.n;

        self.username = username.to_vec();
        self.verifier = Some(verifier);
        self.private_key = Some(Zeroizing::new(b.to_bytes_be()));
        self.public_key = Some(public_key);
    }

    /// Salt in use.
    ///
    /// # Panics
    ///
    /// Panics if [`set_salt`](Self::set_salt) has not been called.
    pub fn salt(&self) -> &[u8] {
        require(&self.salt, "set_salt").as_slice()
    }

    /// Server public key B, padded to 384 bytes.
    ///
    /// # Panics
    ///
    /// Panics if the credentials have not been set.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(require(&self.public_key, "set_username_and_password"))
    }

    /// Compute the shared secret from the controller's public key A.
    ///
    /// Returns an error for an A that is zero modulo N.
    ///
    /// # Panics
    ///
    /// Panics if the credentials have not been set.
    pub fn compute_key(&mut self, client_public_key: &[u8]) -> Result<(), CryptoError> {
        let verifier = require(&self.verifier, "set_username_and_password");
        let b_public = require(&self.public_key, "set_username_and_password");
        let b_private = require(&self.private_key, "set_username_and_password");

        let a = BigUint::from_bytes_be(client_public_key);
        if &a % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey(
                "SRP client public key A mod N = 0".to_string(),
            ));
        }

        // u = H(PAD(A) || PAD(B))
        let u = compute_u(&a, b_public);

        // S = (A * v^u)^b mod N
        let v_u = verifier.modpow(&u, &self.params.n);
        let base = (&a * &v_u) % &self.params.n;
        let s = base.modpow(&BigUint::from_bytes_be(b_private), &self.params.n);

        self.shared_secret = Some(hash_premaster(&s));
        self.client_public_key = Some(a);
        Ok(())
    }

    /// Check the controller proof and produce the server proof.
    ///
    /// Returns `None` when the proof does not match.
    ///
    /// # Panics
    ///
    /// Panics if [`compute_key`](Self::compute_key) has not succeeded.
    pub fn try_respond(&self, client_proof: &[u8]) -> Option<Vec<u8>> {
        let shared_secret = require(&self.shared_secret, "compute_key");
        let a = require(&self.client_public_key, "compute_key");
        let b = require(&self.public_key, "set_username_and_password");
        let salt = require(&self.salt, "set_salt");

        let expected = compute_m1(
            &self.params,
            &self.username,
            salt,
            a,
            b,
            shared_secret.as_bytes(),
        );
        if !bool::from(expected.ct_eq(client_proof)) {
            return None;
        }

        Some(compute_m2(a, client_proof, shared_secret.as_bytes()))
    }

    /// Shared secret K.
    ///
    /// # Panics
    ///
    /// Panics if [`compute_key`](Self::compute_key) has not succeeded.
    pub fn shared_secret(&self) -> &SharedSecret {
        require(&self.shared_secret, "compute_key")
    }
}

impl Default for SrpServer {
    fn default() -> Self {
        Self::new()
    }
}

fn require<'a, T>(value: &'a Option<T>, step: &str) -> &'a T {
    match value {
        Some(value) => value,
        None => panic!("SRP exchange out of order: {} has not run", step),
    }
}

/// Controller-side SRP exchange.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Server challenge containing salt and public key.
pub struct SrpChallenge {
    pub salt: [u8; SALT_BYTES],
    pub server_public_key: Vec<u8>,
}

/// Result of processing a challenge.
pub struct SrpProof {
    pub client_proof: Vec<u8>,
    pub shared_secret: Vec<u8>,
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    pub fn new(identity: &[u8], password: &[u8]) -> Self {
        let a = OsRng.gen_biguint(256);
        Self::with_private_key(identity, password, &a.to_bytes_be())
    }

    /// Create SRP client with a specific private key.
    pub fn with_private_key(identity: &[u8], password: &[u8], private_key: &[u8]) -> Self {
        let params = SrpParams::default();
        let a = BigUint::from_bytes_be(private_key);
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: private_key.to_vec(),
            public_key,
        }
    }

    /// Get client public key A (384 bytes for 3072-bit).
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process server's challenge and generate proof.
    pub fn process_challenge(&self, challenge: &SrpChallenge) -> Result<SrpProof, CryptoError> {
        let b = BigUint::from_bytes_be(&challenge.server_public_key);
        if &b % &self.params.n == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey(
                "SRP server public key B mod N = 0".to_string(),
            ));
        }

        let a = BigUint::from_bytes_be(&self.private_key);
        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey("SRP u = 0".to_string()));
        }

        let x = compute_x(&challenge.salt, &self.identity, &self.password);
        let k = compute_k(&self.params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &self.params.n
        } else {
            (&b + &self.params.n - &k_gx) % &self.params.n
        };
        let exponent = &a + &u * &x;
        let s = base.modpow(&exponent, &self.params.n);

        let shared_secret = hash_premaster(&s).as_bytes().to_vec();
        let client_proof = compute_m1(
            &self.params,
            &self.identity,
            &challenge.salt,
            &self.public_key,
            &b,
            &shared_secret,
        );
        let expected_server_proof = compute_m2(&self.public_key, &client_proof, &shared_secret);

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Verify server's proof M2.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proof.ct_eq(expected).into()
    }
}

/// K = H(PAD(S))
fn hash_premaster(s: &BigUint) -> SharedSecret {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(s));
    SharedSecret::new(hasher.finalize().to_vec())
}

/// Compute M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));

    // H(g) is over the raw generator byte, unlike k which pads g.
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; 64];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Compute M2 = H(PAD(A) || M1 || K)
fn compute_m2(a: &BigUint, client_proof: &[u8], k: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(client_proof);
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// Compute k = SHA512(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// Compute x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}
