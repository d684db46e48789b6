//! Witness hashing for `BASELINE` messages
//!
//! The witness carries two values derived from the raw payload bytes:
//! `Document.Preimage` (a single MiMC digest of the payload) and
//! `Document.Hash` (a MiMC digest of the preimage bytes). Both are emitted
//! as decimal big-integer strings.
//!
//! The hash is MiMC with exponent 7 over the BN256 scalar field. Round
//! constants are derived deterministically from the seed string `"seed"`:
//! constant `i` is SHA-256 of the seed concatenated with the big-endian
//! round index, reduced into the field. Inputs are absorbed in 31-byte
//! chunks so each chunk is guaranteed to be a canonical field element.

use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Seed for the round-constant schedule
const MIMC_SEED: &str = "seed";

/// Number of MiMC rounds
const MIMC_ROUNDS: usize = 91;

/// Bytes absorbed per sponge block; 31 bytes always fit a 254-bit field
const BLOCK_BYTES: usize = 31;

/// BN256 scalar field modulus
fn modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(
            b"21888242871839275222246405745257275088548364400416034343698204186575808495617",
            10,
        )
        .expect("BN256 modulus is a valid decimal literal")
    })
}

/// Round constants derived from the seed
fn round_constants() -> &'static Vec<BigUint> {
    static CONSTANTS: OnceLock<Vec<BigUint>> = OnceLock::new();
    CONSTANTS.get_or_init(|| {
        (0..MIMC_ROUNDS)
            .map(|round| {
                let mut hasher = Sha256::new();
                hasher.update(MIMC_SEED.as_bytes());
                hasher.update((round as u64).to_be_bytes());
                BigUint::from_bytes_be(&hasher.finalize()) % modulus()
            })
            .collect()
    })
}

/// The keyed MiMC permutation: x ← (x + k + c_i)^7 mod p per round,
/// finalized with one key addition.
fn permute(x: &BigUint, key: &BigUint) -> BigUint {
    let p = modulus();
    let exponent = BigUint::from(7u32);

    let mut state = x % p;
    for constant in round_constants() {
        state = ((&state + key + constant) % p).modpow(&exponent, p);
    }
    (state + key) % p
}

/// Digest arbitrary bytes into a field element via a Miyaguchi-Preneel
/// style absorption of 31-byte blocks.
fn digest(bytes: &[u8]) -> BigUint {
    let p = modulus();
    let mut state = BigUint::zero();

    for block in bytes.chunks(BLOCK_BYTES) {
        let element = BigUint::from_bytes_be(block);
        state = (permute(&element, &state) + &state + element) % p;
    }

    state
}

/// The two witness values attached to every outbound `BASELINE` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentWitness {
    /// Decimal MiMC digest of the payload bytes
    pub preimage: String,

    /// Decimal MiMC digest of the preimage
    pub hash: String,
}

impl DocumentWitness {
    /// Compute the witness for the given payload bytes
    pub fn compute(payload: &[u8]) -> DocumentWitness {
        let preimage = digest(payload);
        let hash = digest(&preimage.to_bytes_be());

        DocumentWitness {
            preimage: preimage.to_str_radix(10),
            hash: hash.to_str_radix(10),
        }
    }

    /// Render as the wire witness object
    pub fn to_value(&self) -> Value {
        json!({
            "Document.Hash": self.hash,
            "Document.Preimage": self.preimage,
        })
    }
}
