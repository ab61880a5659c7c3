//! Composite key generation and handling.

/// A key that uniquely identifies one rate limited entity.
///
/// The key is composed of the bucket (the kind of protected action) and the
/// caller-supplied identifier. Both parts take part in equality and hashing
/// as separate fields, so no choice of separator can make two keys collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// The bucket this key belongs to
    pub bucket: String,
    /// Opaque identifier of the subject being limited
    pub identifier: String,
}

impl RateLimitKey {
    /// Create a new key from a bucket and identifier.
    pub fn new(bucket: &str, identifier: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// Convert the key to a string representation.
    ///
    /// This is only meant for logging and debugging.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.bucket, self.identifier)
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
