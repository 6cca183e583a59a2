use ccx_consensus::Hash256;
use sha2::{Digest, Sha256};

pub const NULL_HASH: Hash256 = [0u8; 32];

/// Content hash used for transaction ids, block ids and tree nodes.
pub fn fast_hash(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn hash_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Largest power of two strictly below `count` (count >= 3).
fn tree_hash_count(count: usize) -> usize {
    let mut pow = 2usize;
    while pow < count {
        pow <<= 1;
    }
    pow >> 1
}

/// Root of the CryptoNote hash tree: leaves beyond the largest power of two
/// are folded pairwise first, then the remaining layer is halved down to
/// one root.
pub fn tree_hash(hashes: &[Hash256]) -> Hash256 {
    match hashes.len() {
        0 => NULL_HASH,
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        count => {
            let mut cnt = tree_hash_count(count);
            let untouched = 2 * cnt - count;
            let mut layer: Vec<Hash256> = Vec::with_capacity(cnt);
            layer.extend_from_slice(&hashes[..untouched]);
            for pair in hashes[untouched..].chunks_exact(2) {
                layer.push(hash_pair(&pair[0], &pair[1]));
            }
            while cnt > 2 {
                cnt >>= 1;
                for j in 0..cnt {
                    layer[j] = hash_pair(&layer[2 * j], &layer[2 * j + 1]);
                }
            }
            hash_pair(&layer[0], &layer[1])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Hash256 {
        [byte; 32]
    }

    #[test]
    fn fast_hash_is_sha256() {
        let digest = fast_hash(b"abc");
        assert_eq!(digest[0], 0xba);
        assert_eq!(digest[31], 0xad);
    }

    #[test]
    fn small_trees() {
        assert_eq!(tree_hash(&[]), NULL_HASH);
        assert_eq!(tree_hash(&[leaf(1)]), leaf(1));
        assert_eq!(tree_hash(&[leaf(1), leaf(2)]), hash_pair(&leaf(1), &leaf(2)));
    }

    #[test]
    fn three_leaves_fold_the_tail_first() {
        let expected = hash_pair(&leaf(1), &hash_pair(&leaf(2), &leaf(3)));
        assert_eq!(tree_hash(&[leaf(1), leaf(2), leaf(3)]), expected);
    }

    #[test]
    fn five_leaves() {
        let l: Vec<Hash256> = (1..=5).map(leaf).collect();
        let h45 = hash_pair(&l[3], &l[4]);
        let left = hash_pair(&l[0], &l[1]);
        let right = hash_pair(&l[2], &h45);
        assert_eq!(tree_hash(&l), hash_pair(&left, &right));
    }

    #[test]
    fn power_of_two_is_balanced() {
        let l: Vec<Hash256> = (1..=4).map(leaf).collect();
        let expected = hash_pair(&hash_pair(&l[0], &l[1]), &hash_pair(&l[2], &l[3]));
        assert_eq!(tree_hash(&l), expected);
        assert_eq!(tree_hash_count(4), 2);
        assert_eq!(tree_hash_count(5), 4);
        assert_eq!(tree_hash_count(8), 4);
    }
}
