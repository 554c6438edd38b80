/// Set or clear bit `n` of `x`.
pub fn bit(n: u64, x: u64, v: bool) -> u64 {
    if v {
        x | (1 << n)
    } else {
        x & !(1 << n)
    }
}

/// Test bit `n` of `x`.
pub fn test_bit(n: u64, x: u64) -> bool {
    (x >> n) & 1 == 1
}

#[cfg(test)]
mod tests {
    use super::{bit, test_bit};

    #[test]
    fn set_then_test() {
        let x = bit(3, 0, true);
        assert_eq!(x, 0b1000);
        assert!(test_bit(3, x));
        assert!(!test_bit(2, x));
    }

    #[test]
    fn clear_bit() {
        let x = bit(0, 0b1011, false);
        assert_eq!(x, 0b1010);
        assert!(!test_bit(0, x));
    }
}
