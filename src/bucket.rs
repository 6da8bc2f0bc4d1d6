use sha2::{Digest, Sha256};

/// Number of buckets subjects are distributed over. Percentage thresholds are compared
/// against a bucket in `[0, BUCKET_COUNT)`.
pub const BUCKET_COUNT: u32 = 100;

const BUCKET_HEX_PREFIX_LEN: usize = 8;

/// Map a subject and flag key to a stable bucket in `[0, 100)`.
///
/// The bucket is derived from the SHA-256 digest of `"{subject_id}:{flag_key}"`: the first
/// eight lowercase hex characters are read as a `u32` and reduced mod 100. The same pair
/// always lands in the same bucket, and a subject's bucket for one flag says nothing about
/// its bucket for another.
pub fn bucket(subject_id: &str, flag_key: &str) -> u8 {
    let mut hash = Sha256::new();
    hash.update(subject_id.as_bytes());
    hash.update(b":");
    hash.update(flag_key.as_bytes());

    let digest = hash.finalize();
    let hexhash = base16ct::lower::encode_string(&digest);

    // 8 hex chars always fit in a u32, so the parse cannot fail
    let numhash = u32::from_str_radix(&hexhash[..BUCKET_HEX_PREFIX_LEN], 16).unwrap_or(0);

    (numhash % BUCKET_COUNT) as u8
}
