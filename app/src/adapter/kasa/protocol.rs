const INITIAL_KEY: u8 = 171;

/// Largest response we accept from a plug.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// XOR autokey cipher, each ciphertext byte is the key for the next one.
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|b| {
            key ^= b;
            key
        })
        .collect()
}

pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|c| {
            let plain = key ^ c;
            key = *c;
            plain
        })
        .collect()
}

/// Encrypted payload prefixed with its big-endian length, as sent over TCP.
pub fn encode_frame(plain: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(plain.len() + 4);
    frame.extend_from_slice(&(plain.len() as u32).to_be_bytes());
    frame.extend(encrypt(plain));
    frame
}
