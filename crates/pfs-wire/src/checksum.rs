//! Internet checksum (RFC 1071)

/// Running ones-complement sum over 16-bit big-endian words.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum {
    sum: u64,
}

impl Checksum {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes; an odd trailing byte is padded with zero.
    #[inline]
    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        let mut chunks = data.chunks_exact(2);
        for c in &mut chunks {
            self.sum += u16::from_be_bytes([c[0], c[1]]) as u64;
        }
        if let [last] = chunks.remainder() {
            self.sum += (*last as u64) << 8;
        }
        self.fold();
        self
    }

    /// Add a single 16-bit word
    #[inline]
    pub fn add_u16(&mut self, word: u16) -> &mut Self {
        self.sum += word as u64;
        self.fold();
        self
    }

    #[inline(always)]
    fn fold(&mut self) {
        while self.sum > 0xffff {
            self.sum = (self.sum & 0xffff) + (self.sum >> 16);
        }
    }

    /// Ones-complement of the folded sum
    #[inline]
    pub fn finish(&self) -> u16 {
        !(self.sum as u16)
    }
}

/// Checksum of a contiguous buffer. Re-running it over data that already
/// contains a correct checksum yields zero.
#[inline]
pub fn internet_checksum(data: &[u8]) -> u16 {
    Checksum::new().add_bytes(data).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // RFC 1071 section 3 sample words
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2u16);
    }

    #[test]
    fn test_known_ipv4_header() {
        // Classic example header with checksum 0xb861
        let mut hdr = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        let c = internet_checksum(&hdr);
        assert_eq!(c, 0xb861);
        hdr[10..12].copy_from_slice(&c.to_be_bytes());
        assert_eq!(internet_checksum(&hdr), 0);
    }

    #[test]
    fn test_odd_length() {
        assert_eq!(internet_checksum(&[0x01]), !0x0100u16);
    }

    #[test]
    fn test_large_buffer_folds() {
        let ones = vec![0xffu8; 1 << 18];
        assert_eq!(internet_checksum(&ones), 0);

        let words: Vec<u8> = [0x00, 0x01].repeat(1 << 17);
        assert_eq!(internet_checksum(&words), !0x0002u16);
    }
}
