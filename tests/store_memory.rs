// crates.io
use time::Duration;
// self
use partition_coordinator::{
	checkpoint::Checkpoint,
	ids::{ConsumerGroupId, EventHubId, HostName, PartitionId},
	lease::{key::LeaseKey, record::LeaseStatus, token::FencingToken},
	store::{CheckpointStore, LeaseStore, StoreError, memory::InMemoryLeaseStore},
};

fn make_key(partition: &str) -> LeaseKey {
	LeaseKey::new(
		EventHubId::new("hub-1").expect("Event hub fixture should be valid."),
		ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
		PartitionId::new(partition).expect("Partition fixture should be valid."),
	)
}

#[tokio::test]
async fn acquire_bumps_epoch_monotonically_across_owners() {
	let store = InMemoryLeaseStore::new();
	let key = make_key("0");
	let host_a = HostName::new("host-a").expect("Host fixture should be valid.");
	let host_b = HostName::new("host-b").expect("Host fixture should be valid.");

	let first = store
		.acquire(&key, &host_a, Duration::seconds(30))
		.await
		.expect("First acquire should succeed against an unowned lease.");

	assert_eq!(first.epoch, 1);

	let token = first.token.clone().expect("Acquired lease should carry a fencing token.");

	store.release(&key, &host_a, &token).await.expect("Release should succeed.");

	let second = store
		.acquire(&key, &host_b, Duration::seconds(30))
		.await
		.expect("Second acquire should succeed after release.");

	assert_eq!(second.epoch, 2, "epoch must be strictly increasing across acquisitions (L2)");
	assert_ne!(
		first.token.as_ref().map(FencingToken::expose),
		second.token.as_ref().map(FencingToken::expose),
		"a fresh acquire must mint a new fencing token"
	);
}

#[tokio::test]
async fn expired_lease_is_stealable_by_a_different_host() {
	let store = InMemoryLeaseStore::new();
	let key = make_key("0");
	let host_a = HostName::new("host-a").expect("Host fixture should be valid.");
	let host_b = HostName::new("host-b").expect("Host fixture should be valid.");

	store
		.acquire(&key, &host_a, Duration::milliseconds(1))
		.await
		.expect("Acquire with a short TTL should succeed.");

	tokio::time::sleep(std::time::Duration::from_millis(20)).await;

	let lease = store.get(&key).await.expect("get should succeed").expect("lease should exist");

	assert_eq!(lease.status(), LeaseStatus::Expired);

	let stolen = store
		.acquire(&key, &host_b, Duration::seconds(30))
		.await
		.expect("Acquire against an expired lease should succeed for any host.");

	assert_eq!(stolen.owner, Some(host_b));
	assert_eq!(stolen.epoch, 2);
}

#[tokio::test]
async fn stale_fencing_token_cannot_write_a_checkpoint() {
	let store = InMemoryLeaseStore::new();
	let key = make_key("0");
	let host_a = HostName::new("host-a").expect("Host fixture should be valid.");
	let host_b = HostName::new("host-b").expect("Host fixture should be valid.");

	let first = store
		.acquire(&key, &host_a, Duration::milliseconds(1))
		.await
		.expect("Acquire should succeed.");
	let stale_token = first.token.expect("Acquire should carry a fencing token.");

	tokio::time::sleep(std::time::Duration::from_millis(20)).await;

	store.acquire(&key, &host_b, Duration::seconds(30)).await.expect("Steal should succeed.");

	let checkpoint = Checkpoint::new(key, "100", 1);
	let result = CheckpointStore::update(&store, &host_a, &stale_token, checkpoint).await;

	assert!(
		matches!(result, Err(StoreError::Conflict)),
		"a checkpoint fenced by a stolen lease's old token must be rejected (C1)"
	);
}

#[tokio::test]
async fn get_all_scopes_by_event_hub_and_consumer_group() {
	let store = InMemoryLeaseStore::new();
	let other_hub_key = LeaseKey::new(
		EventHubId::new("hub-2").expect("Event hub fixture should be valid."),
		ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
		PartitionId::new("0").expect("Partition fixture should be valid."),
	);

	store.ensure(make_key("0")).await.expect("ensure should succeed.");
	store.ensure(make_key("1")).await.expect("ensure should succeed.");
	store.ensure(other_hub_key).await.expect("ensure should succeed.");

	let leases = store
		.get_all(
			&EventHubId::new("hub-1").expect("Event hub fixture should be valid."),
			&ConsumerGroupId::new("cg-1").expect("Consumer group fixture should be valid."),
		)
		.await
		.expect("get_all should succeed.");

	assert_eq!(leases.len(), 2);
}
