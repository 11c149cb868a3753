//! Opaque fencing token wrapper that redacts its value from logs.

// self
use crate::_prelude::*;

/// Store-assigned fencing handle that proves current ownership of a lease.
///
/// The token is opaque to the coordinator: it is never parsed, only compared
/// for equality by [`LeaseStore`](crate::store::LeaseStore) implementations
/// during renew/release/update. Debug/Display redact the value the same way
/// a leaked credential would be redacted, since possessing the token is
/// equivalent to possessing the lease.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FencingToken(String);
impl FencingToken {
	/// Wraps a new backend-assigned token value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for FencingToken {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for FencingToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("FencingToken").field(&"<redacted>").finish()
	}
}
impl Display for FencingToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}
