//! Behaviour every slot store backend must share.

use jiff::{SignedDuration, Timestamp};
use raindrop_storage::{SlotStore, StorageError, TimeUnit};

pub async fn provisioning_creates_table_once(store: &impl SlotStore) {
    assert!(!store.table_exists().await.unwrap());

    store.provision_slots(10, 15).await.unwrap();
    assert!(store.table_exists().await.unwrap());

    // a second provisioner finds the rows already there
    store.provision_slots(10, 15).await.unwrap();

    let free = store.find_free_slots(Timestamp::now()).await.unwrap();
    let ids: Vec<i64> = free.iter().map(|slot| slot.id).collect();
    assert_eq!(ids, vec![10, 11, 12, 13, 14, 15]);
    assert!(free.iter().all(|slot| slot.version == 1));
    assert!(free.iter().all(|slot| slot.owner_code.is_empty()));
}

pub async fn inverted_range_is_rejected(store: &impl SlotStore) {
    let err = store.provision_slots(3, 1).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidRange { begin: 3, end: 1 }));
}

pub async fn activation_wins_only_with_current_version(store: &impl SlotStore) {
    store.provision_slots(1, 3).await.unwrap();

    let slot = store
        .activate_slot(2, "10.0.0.1#8080#2#aa:bb", TimeUnit::Second, 1)
        .await
        .unwrap()
        .expect("activation with current version");
    assert_eq!(slot.id, 2);
    assert_eq!(slot.version, 2);
    assert_eq!(slot.time_unit, TimeUnit::Second);
    assert!(slot.heartbeat_time > Timestamp::now() - SignedDuration::from_secs(60));

    let stale = store
        .activate_slot(2, "10.0.0.2#8080#2#cc:dd", TimeUnit::Second, 1)
        .await
        .unwrap();
    assert!(stale.is_none());

    let owned = store
        .find_slot_by_owner("10.0.0.1#8080#2#aa:bb")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owned, slot);
    assert!(store.find_slot_by_owner("nobody").await.unwrap().is_none());
}

pub async fn fresh_heartbeats_are_not_free(store: &impl SlotStore) {
    store.provision_slots(1, 3).await.unwrap();
    store
        .activate_slot(1, "owner-a", TimeUnit::Millisecond, 1)
        .await
        .unwrap()
        .unwrap();

    let cutoff = Timestamp::now() - SignedDuration::from_secs(20);
    let ids: Vec<i64> = store
        .find_free_slots(cutoff)
        .await
        .unwrap()
        .iter()
        .map(|slot| slot.id)
        .collect();
    assert_eq!(ids, vec![2, 3]);
}

pub async fn renewal_bumps_version_and_heartbeat(store: &impl SlotStore) {
    store.provision_slots(5, 5).await.unwrap();
    let slot = store
        .activate_slot(5, "owner-a", TimeUnit::Minute, 1)
        .await
        .unwrap()
        .unwrap();

    let renewed = store
        .renew_slot(5, slot.version)
        .await
        .unwrap()
        .expect("renewal with current version");
    assert_eq!(renewed.version, slot.version + 1);
    assert!(renewed.heartbeat_time >= slot.heartbeat_time);
    assert_eq!(renewed.owner_code, "owner-a");
    assert_eq!(renewed.time_unit, TimeUnit::Minute);

    assert!(store.renew_slot(5, slot.version).await.unwrap().is_none());
    assert!(store.renew_slot(99, 1).await.unwrap().is_none());
    assert!(store.get_slot(99).await.unwrap().is_none());
}

pub async fn store_clock_is_close_to_local(store: &impl SlotStore) {
    let gap = store.now().await.unwrap().duration_since(Timestamp::now());
    assert!(gap.abs() < SignedDuration::from_secs(30), "gap was {gap}");
}
