/// [Szudzik pairing function][szudzik-pairing].
///
/// ```text
/// (a, b) -> if (a<b) then (b^2 + a) else (a^2 + a + b)
/// ```
///
/// [szudzik-pairing]: http://szudzik.com/ElegantPairing.pdf
pub fn pairing_szudzik(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

/// [Pairing function][pairing] for two `u64` values.
///
/// [pairing]: https://en.wikipedia.org/wiki/Pairing_function
pub fn pairing2(a: u64, b: u64) -> u64 {
    pairing_szudzik(a, b)
}

/// Pairing function for three `u64` values.
pub fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Mix `value` into `seed`, boost-style.
///
/// Used for hashing sequences (state tuples, signatures), where pairing
/// functions overflow after a couple of elements.
pub fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// Fold a sequence of values into one hash.
pub fn hash_sequence<I>(values: I) -> u64
where
    I: IntoIterator<Item = u64>,
{
    values.into_iter().fold(0, hash_combine)
}

/// Calls `f` with every tuple of indices `t` such that `t[i] < lens[i]`.
///
/// Tuples are produced in lexicographic order. An empty `lens` yields the
/// empty tuple once; a zero length anywhere yields nothing.
pub fn for_each_product<F>(lens: &[usize], mut f: F)
where
    F: FnMut(&[usize]),
{
    if lens.contains(&0) {
        return;
    }
    let mut tuple = vec![0; lens.len()];
    loop {
        f(&tuple);
        let mut i = lens.len();
        loop {
            if i == 0 {
                return;
            }
            i -= 1;
            tuple[i] += 1;
            if tuple[i] < lens[i] {
                break;
            }
            tuple[i] = 0;
        }
    }
}

pub trait MyHash {
    /// Hash used for bucket selection in interning tables.
    ///
    /// Collisions are allowed: tables always compare full values.
    fn hash(&self) -> u64;
}

impl MyHash for u64 {
    fn hash(&self) -> u64 {
        *self
    }
}

impl MyHash for (u64, u64) {
    fn hash(&self) -> u64 {
        pairing2(self.0, self.1)
    }
}

impl MyHash for (u64, u64, u64) {
    fn hash(&self) -> u64 {
        pairing3(self.0, self.1, self.2)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_szudzik() {
        assert_eq!(pairing_szudzik(0, 0), 0);
        assert_eq!(pairing_szudzik(0, 1), 1);
        assert_eq!(pairing_szudzik(1, 0), 2);
        assert_eq!(pairing_szudzik(1, 1), 3);
        assert_eq!(pairing_szudzik(2, 1), 7);
        assert_eq!(pairing_szudzik(4, 4), 24);
    }

    #[test]
    fn test_pairing_wraps_on_large_values() {
        // Leaf states carry the most significant bit; hashing them must not panic.
        let leaf = 1u64 << 63;
        let _ = pairing2(leaf, leaf | 5);
        let _ = pairing3(u64::MAX, u64::MAX, leaf);
    }

    #[test]
    fn test_for_each_product() {
        let mut seen = Vec::new();
        for_each_product(&[2, 3], |t| seen.push(t.to_vec()));
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec![0, 0]);
        assert_eq!(seen[5], vec![1, 2]);

        let mut count = 0;
        for_each_product(&[], |_| count += 1);
        assert_eq!(count, 1);
        for_each_product(&[3, 0], |_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_hash_sequence_is_order_sensitive() {
        assert_ne!(hash_sequence([1, 2, 3]), hash_sequence([3, 2, 1]));
        assert_eq!(hash_sequence([1, 2, 3]), hash_sequence(vec![1, 2, 3]));
        assert_eq!(hash_sequence([]), 0);
    }
}
