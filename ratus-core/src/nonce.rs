//! Random alphanumeric strings of fixed length.

use rand::Rng;

/// 62 alphanumeric characters (A-Z, a-z and 0-9, case-sensitive) in the
/// POSIX/C locale, ordered by the Base 64 alphabet as defined in RFC 4648
/// instead of their ASCII character values.
const ALPHANUMERICALS: &[u8; 62] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a random alphanumeric string of the given length.
///
/// Safe for concurrent use: each thread draws from its own OS-seeded
/// generator, so no locking or process-wide seeding is involved.
pub fn generate(n: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut s = String::with_capacity(n);
    for _ in 0..n {
        s.push(ALPHANUMERICALS[rng.gen_range(0..ALPHANUMERICALS.len())] as char);
    }
    s
}
