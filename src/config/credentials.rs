use rand::Rng;

/// ss 协议可选的加密方法
pub const SS_CIPHERS: [&str; 3] = ["aes-128-gcm", "aes-256-gcm", "chacha20-ietf-poly1305"];

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

/// 按模板生成随机字符串
pub fn generate_from_pattern(pattern: &str) -> String {
    let mut rng = rand::rng();
    pattern
        .chars()
        .map(|c| {
            let charset = match c {
                'L' | 'l' => LOWERCASE,
                'U' => UPPERCASE,
                '#' => DIGITS,
                other => return other,
            };
            charset[rng.random_range(0..charset.len())] as char
        })
        .collect()
}

pub fn random_cipher() -> &'static str {
    let mut rng = rand::rng();
    SS_CIPHERS[rng.random_range(0..SS_CIPHERS.len())]
}
