use blake3;
use std::hash::{Hash, Hasher};

pub trait DigestHasher {
    fn input<I: Hash>(&mut self, input: I);
}

impl DigestHasher for blake3::Hasher {
    fn input<I: Hash>(&mut self, input: I) {
        struct StdHasher<'a>(&'a mut blake3::Hasher);

        impl<'a> Hasher for StdHasher<'a> {
            fn finish(&self) -> u64 {
                panic!("StdHasher only feeds a blake3 digest");
            }

            fn write(&mut self, bytes: &[u8]) {
                self.0.update(bytes);
            }
        }

        input.hash(&mut StdHasher(self))
    }
}

/// Hex digest of a sequence of canonical directive strings.
pub fn sequence_digest<S: AsRef<str>>(sequence: &[S]) -> String {
    let mut hasher = blake3::Hasher::new();
    for item in sequence {
        hasher.input(item.as_ref());
    }
    hasher.finalize().to_hex().to_string()
}
