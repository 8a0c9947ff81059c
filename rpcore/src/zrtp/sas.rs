/// Base32 alphabet from RFC 6189 section 5.1.6, chosen for clarity when read aloud.
const B32_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Renders the leftmost 20 bits of the SAS hash as four B32 characters.
pub fn calculate_sas(sas_hash: &[u8]) -> String {
    if sas_hash.len() < 3 {
        return String::new();
    }

    let bits = u32::from_be_bytes([sas_hash[0], sas_hash[1], sas_hash[2], 0]) >> 12;
    (0..4)
        .rev()
        .map(|i| B32_ALPHABET[((bits >> (i * 5)) & 0x1f) as usize] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_renderings() {
        assert_eq!(calculate_sas(&[0u8; 32]), "yyyy");
        assert_eq!(calculate_sas(&[0xff; 32]), "9999");
        // 00001 00010 00011 00100 ...
        assert_eq!(calculate_sas(&[0x08, 0x86, 0x40, 0xff]), "bndr");
    }

    #[test]
    fn test_only_first_twenty_bits_matter() {
        let mut a = [0x5au8; 32];
        let b = a;
        a[2] ^= 0x0f;
        a[10] ^= 0xff;
        assert_eq!(calculate_sas(&a), calculate_sas(&b));

        a[2] ^= 0x10;
        assert_ne!(calculate_sas(&a), calculate_sas(&b));
    }
}
