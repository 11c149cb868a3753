//! Lease lifecycle record: ownership, fencing token, epoch, and expiry.

// self
use crate::{
	_prelude::*,
	ids::HostName,
	lease::{key::LeaseKey, token::FencingToken},
};

/// Lifecycle status of a lease at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseStatus {
	/// No host currently holds the lease.
	Unowned,
	/// A host holds the lease and its TTL has not elapsed.
	Owned,
	/// A host's TTL has elapsed; the lease is stealable by anyone.
	Expired,
}

/// Ownership record for a single partition, tracked per (event hub, consumer group).
///
/// `token` and `epoch` are bumped only by [`LeaseStore::acquire`](crate::store::LeaseStore::acquire);
/// `epoch` is strictly increasing across acquisitions of the same lease (invariant L2), and
/// at most one non-expired `token` is valid at any instant (invariant L1), both enforced by
/// the store's compare-and-set on `token`.
#[derive(Serialize, Deserialize, Clone)]
pub struct Lease {
	/// Identity of the partition this lease governs.
	pub key: LeaseKey,
	/// Current owner, if any.
	pub owner: Option<HostName>,
	/// Fencing token issued by the store on the current owner's acquire.
	pub token: Option<FencingToken>,
	/// Monotonically increasing acquisition counter.
	pub epoch: u64,
	/// Wall-clock instant after which the lease is stealable.
	pub expires_at: OffsetDateTime,
}
impl Lease {
	/// Creates a fresh, unowned lease for the given key with no TTL elapsed yet.
	pub fn unowned(key: LeaseKey) -> Self {
		Self { key, owner: None, token: None, epoch: 0, expires_at: OffsetDateTime::UNIX_EPOCH }
	}

	/// Computes the lease status at the provided instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> LeaseStatus {
		if self.owner.is_none() {
			return LeaseStatus::Unowned;
		}
		if instant > self.expires_at {
			return LeaseStatus::Expired;
		}

		LeaseStatus::Owned
	}

	/// Convenience helper that checks status using the current UTC instant.
	pub fn status(&self) -> LeaseStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if the lease has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), LeaseStatus::Expired)
	}

	/// Returns `true` if the lease is currently expired (and therefore stealable).
	pub fn is_expired(&self) -> bool {
		matches!(self.status(), LeaseStatus::Expired)
	}

	/// Returns `true` if `host` holds this lease and it has not expired at `instant`.
	pub fn is_owned_by_at(&self, host: &HostName, instant: OffsetDateTime) -> bool {
		self.owner.as_ref() == Some(host) && !self.is_expired_at(instant)
	}

	/// Returns `true` if `host` holds this lease and it has not expired.
	pub fn is_owned_by(&self, host: &HostName) -> bool {
		self.is_owned_by_at(host, OffsetDateTime::now_utc())
	}

	/// Records a successful acquisition: assigns `owner`, bumps `epoch`, and sets
	/// a fresh `token` and `expires_at`.
	pub fn record_acquire(
		&mut self,
		owner: HostName,
		token: FencingToken,
		ttl: Duration,
		now: OffsetDateTime,
	) {
		self.owner = Some(owner);
		self.token = Some(token);
		self.epoch += 1;
		self.expires_at = now + ttl;
	}

	/// Extends `expires_at` without touching ownership, token, or epoch.
	pub fn record_renew(&mut self, ttl: Duration, now: OffsetDateTime) {
		self.expires_at = now + ttl;
	}

	/// Clears ownership and invalidates the token, leaving epoch untouched.
	pub fn record_release(&mut self) {
		self.owner = None;
		self.token = None;
	}
}
impl Debug for Lease {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Lease")
			.field("key", &self.key)
			.field("owner", &self.owner)
			.field("token", &self.token.as_ref().map(|_| "<redacted>"))
			.field("epoch", &self.epoch)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::ids::{ConsumerGroupId, EventHubId, PartitionId};

	fn make_key() -> LeaseKey {
		LeaseKey::new(
			EventHubId::new("hub-1").expect("Event hub fixture should be valid."),
			ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
			PartitionId::new("0").expect("Partition fixture should be valid."),
		)
	}

	#[test]
	fn fresh_lease_is_unowned() {
		let lease = Lease::unowned(make_key());

		assert_eq!(lease.status(), LeaseStatus::Unowned);
		assert!(lease.owner.is_none());
		assert_eq!(lease.epoch, 0);
	}

	#[test]
	fn acquire_bumps_epoch_and_sets_expiry() {
		let mut lease = Lease::unowned(make_key());
		let host_a = HostName::new("host-a").expect("Host fixture should be valid.");
		let now = macros::datetime!(2026-01-01 00:00 UTC);

		lease.record_acquire(host_a.clone(), FencingToken::new("t1"), Duration::seconds(30), now);

		assert_eq!(lease.epoch, 1);
		assert_eq!(lease.status_at(now), LeaseStatus::Owned);
		assert!(lease.is_owned_by_at(&host_a, now));
		assert_eq!(lease.status_at(now + Duration::seconds(31)), LeaseStatus::Expired);

		let host_b = HostName::new("host-b").expect("Host fixture should be valid.");

		lease.record_acquire(
			host_b.clone(),
			FencingToken::new("t2"),
			Duration::seconds(30),
			now + Duration::seconds(31),
		);

		assert_eq!(lease.epoch, 2, "epoch must strictly increase across acquisitions");
		assert!(lease.is_owned_by_at(&host_b, now + Duration::seconds(31)));
		assert!(!lease.is_owned_by_at(&host_a, now + Duration::seconds(31)));
	}

	#[test]
	fn renew_extends_expiry_without_changing_epoch() {
		let mut lease = Lease::unowned(make_key());
		let host = HostName::new("host-a").expect("Host fixture should be valid.");
		let now = macros::datetime!(2026-01-01 00:00 UTC);

		lease.record_acquire(host, FencingToken::new("t1"), Duration::seconds(30), now);
		lease.record_renew(Duration::seconds(30), now + Duration::seconds(25));

		assert_eq!(lease.epoch, 1);
		assert_eq!(lease.expires_at, now + Duration::seconds(55));
	}

	#[test]
	fn release_clears_owner_and_token_but_keeps_epoch() {
		let mut lease = Lease::unowned(make_key());
		let host = HostName::new("host-a").expect("Host fixture should be valid.");
		let now = macros::datetime!(2026-01-01 00:00 UTC);

		lease.record_acquire(host, FencingToken::new("t1"), Duration::seconds(30), now);
		lease.record_release();

		assert!(lease.owner.is_none());
		assert!(lease.token.is_none());
		assert_eq!(lease.epoch, 1);
		assert_eq!(lease.status(), LeaseStatus::Unowned);
	}

	#[test]
	fn debug_redacts_token() {
		let mut lease = Lease::unowned(make_key());
		let host = HostName::new("host-a").expect("Host fixture should be valid.");

		lease.record_acquire(
			host,
			FencingToken::new("super-secret"),
			Duration::seconds(30),
			OffsetDateTime::now_utc(),
		);

		let rendered = format!("{lease:?}");

		assert!(!rendered.contains("super-secret"));
		assert!(rendered.contains("<redacted>"));
	}
}
