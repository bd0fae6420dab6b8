use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

use crate::document::Document;

const HASH_SIZE: usize = 32;

type Hash = [u8; HASH_SIZE];

fn sha256(data: &[u8]) -> Hash {
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(Sha256::digest(data).as_slice());
    hash
}

// Last byte first, each byte read as signed. Services written against signed
// byte arrays order hashes this way, and `dot` must agree with them.
fn signed_reverse_cmp(x: &Hash, y: &Hash) -> Ordering {
    let signed = |h: &Hash| h.iter().rev().map(|b| *b as i8).collect::<Vec<_>>();
    signed(x).cmp(&signed(y))
}

/// Combines two hashes: the sha256 of both, smaller first. Commutative.
fn dot(x: &Hash, y: &Hash) -> Hash {
    let (first, second) = match signed_reverse_cmp(x, y) {
        Ordering::Less => (x, y),
        _ => (y, x),
    };
    let mut hasher = Sha256::new();
    hasher.update(first);
    hasher.update(second);

    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(hasher.finalize().as_slice());
    hash
}

/// The running digest of a transaction: seeded with the transaction id, with
/// every executed statement folded in. The driver sends it on commit and the
/// service, which computes the same value from what it received, rejects the
/// commit if they differ.
///
/// A statement contributes `H(statement) . H(param_1) . H(param_2) ...`
/// where `.` is a commutative combinator. Chaining statements onto the
/// running value is not order independent, so a dropped, duplicated or
/// reordered statement changes the digest.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitDigest {
    current: Hash,
}

impl CommitDigest {
    pub fn new(transaction_id: &str) -> CommitDigest {
        CommitDigest {
            current: sha256(transaction_id.as_bytes()),
        }
    }

    pub fn fold_statement(&mut self, statement: &str, parameters: &[Document]) {
        let statement_hash = parameters
            .iter()
            .fold(sha256(statement.as_bytes()), |acc, p| {
                dot(&acc, &sha256(p.as_bytes()))
            });
        self.current = dot(&self.current, &statement_hash);
    }

    pub fn bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.current)
    }
}
