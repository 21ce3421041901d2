use std::time::Duration;

use chrono::Utc;
use journey_core::domain::flow::{
    Channel, ContactId, FlowDefinition, FlowId, FlowStatus, StepDefinition, StepId, StepKind,
};
use journey_core::domain::repository::{FlowStore, RunStore, WakeQueue};
use journey_core::domain::run::{RunId, RunInstance, ScheduledWake, WakeReason};
use journey_core::error::EngineError;

use crate::{InMemoryFlowStore, InMemoryRunStore, InMemoryWakeQueue};

fn definition(flow: &str, version: u32) -> FlowDefinition {
    FlowDefinition {
        id: FlowId(flow.to_string()),
        version,
        name: flow.to_string(),
        channel: Channel::Sms,
        status: FlowStatus::Published,
        steps: vec![StepDefinition {
            id: StepId("m1".to_string()),
            name: "hello".to_string(),
            kind: StepKind::Message {
                template: "Hi".to_string(),
                next: None,
            },
        }],
    }
}

fn new_run(contact: &str) -> RunInstance {
    let mut run = RunInstance::new(&definition("welcome", 1), ContactId(contact.to_string()));
    run.take_events();
    run
}

#[tokio::test]
async fn test_flow_store_latest_published() {
    let store = InMemoryFlowStore::new();
    store.save(&definition("welcome", 1)).await.unwrap();
    store.save(&definition("welcome", 3)).await.unwrap();
    store.save(&definition("welcome", 2)).await.unwrap();
    store.save(&definition("other", 9)).await.unwrap();

    let latest = store
        .latest_published(&FlowId("welcome".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.version, 3);
}

#[tokio::test]
async fn test_run_save_is_compare_and_swap() {
    let store = InMemoryRunStore::new();
    let mut run = new_run("c-1");

    store.save(&mut run).await.unwrap();
    assert_eq!(run.revision, 1);

    // A stale copy loses
    let mut stale = run.clone();
    store.save(&mut run).await.unwrap();
    let result = store.save(&mut stale).await;
    assert!(matches!(result, Err(EngineError::RevisionConflict(_))));
}

#[tokio::test]
async fn test_one_active_run_per_contact_and_flow() {
    let store = InMemoryRunStore::new();
    let mut first = new_run("c-1");
    store.save(&mut first).await.unwrap();

    let mut second = new_run("c-1");
    let result = store.save(&mut second).await;
    assert!(matches!(result, Err(EngineError::DuplicateActiveRun(_))));

    // A different contact is fine
    let mut other = new_run("c-2");
    store.save(&mut other).await.unwrap();

    // Once the first run is terminal, re-enrollment is allowed
    first.start().unwrap();
    first.complete().unwrap();
    first.take_events();
    store.save(&mut first).await.unwrap();

    let mut again = new_run("c-1");
    store.save(&mut again).await.unwrap();
}

#[tokio::test]
async fn test_find_active_for_contact() {
    let store = InMemoryRunStore::new();
    let mut run = new_run("c-1");
    store.save(&mut run).await.unwrap();

    let found = store
        .find_active_for_contact(&ContactId("c-1".to_string()), &FlowId("welcome".to_string()))
        .await
        .unwrap();
    assert_eq!(found.map(|r| r.id), Some(run.id.clone()));

    let missing = store
        .find_active_for_contact(&ContactId("c-1".to_string()), &FlowId("other".to_string()))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_list_versions_and_runs() {
    let flows = InMemoryFlowStore::new();
    flows.save(&definition("welcome", 1)).await.unwrap();
    flows.save(&definition("other", 1)).await.unwrap();
    assert_eq!(flows.list_versions().await.unwrap().len(), 2);

    let found = flows
        .find_version(&definition("welcome", 1).version_id())
        .await
        .unwrap();
    assert!(found.is_some());

    let runs = InMemoryRunStore::new();
    let mut active = new_run("c-1");
    runs.save(&mut active).await.unwrap();

    let mut done = new_run("c-2");
    done.start().unwrap();
    done.complete().unwrap();
    done.take_events();
    runs.save(&mut done).await.unwrap();

    use journey_core::domain::repository::RunFilter;
    use journey_core::domain::run::RunStatus;

    let all = runs.list(&RunFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);

    let pending = runs
        .list(&RunFilter {
            flow_id: Some(FlowId("welcome".to_string())),
            status: Some(RunStatus::Pending),
        })
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].contact_id, ContactId("c-1".to_string()));
}

#[tokio::test]
async fn test_find_waiting_by_correlation() {
    use journey_core::domain::run::{CorrelationKey, WakeId};

    let runs = InMemoryRunStore::new();
    let mut run = new_run("c-1");
    run.start().unwrap();
    let key = CorrelationKey {
        contact: ContactId("c-1".to_string()),
        channel: Channel::Sms,
    };
    run.suspend_for_event(WakeId("w-1".to_string()), key.clone())
        .unwrap();
    run.take_events();
    runs.save(&mut run).await.unwrap();

    let found = runs.find_waiting_by_correlation(&key).await.unwrap();
    assert_eq!(found.map(|r| r.id), Some(run.id.clone()));

    let other_key = CorrelationKey {
        contact: ContactId("c-2".to_string()),
        channel: Channel::Sms,
    };
    assert!(runs
        .find_waiting_by_correlation(&other_key)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_lease_conflict_and_expiry() {
    let store = InMemoryRunStore::new();
    let run_id = RunId("r-1".to_string());

    store
        .acquire_lease(&run_id, "worker-a", Duration::from_secs(30))
        .await
        .unwrap();

    // Re-acquiring one's own lease extends it
    store
        .acquire_lease(&run_id, "worker-a", Duration::from_secs(30))
        .await
        .unwrap();

    let conflict = store
        .acquire_lease(&run_id, "worker-b", Duration::from_secs(30))
        .await;
    assert!(matches!(conflict, Err(EngineError::LeaseConflict(_))));

    // A released lease is up for grabs
    store.release_lease(&run_id, "worker-a").await.unwrap();
    store
        .acquire_lease(&run_id, "worker-b", Duration::from_secs(30))
        .await
        .unwrap();

    // Releasing someone else's lease is a no-op
    store.release_lease(&run_id, "worker-a").await.unwrap();
    let still_held = store
        .acquire_lease(&run_id, "worker-c", Duration::from_secs(30))
        .await;
    assert!(matches!(still_held, Err(EngineError::LeaseConflict(_))));
}

#[tokio::test]
async fn test_expired_lease_is_reclaimable() {
    let store = InMemoryRunStore::new();
    let run_id = RunId("r-1".to_string());

    store
        .acquire_lease(&run_id, "worker-a", Duration::from_millis(0))
        .await
        .unwrap();

    // TTL of zero lapses immediately
    store
        .acquire_lease(&run_id, "worker-b", Duration::from_secs(30))
        .await
        .unwrap();
}

fn wake(run: &str, due_in_secs: i64) -> ScheduledWake {
    ScheduledWake::new(
        RunId(run.to_string()),
        StepId("d1".to_string()),
        Utc::now() + chrono::Duration::seconds(due_in_secs),
        WakeReason::Delay,
    )
}

#[tokio::test]
async fn test_wake_claim_is_exclusive_until_lapse() {
    let queue = InMemoryWakeQueue::new();
    queue.schedule(wake("r-1", -1)).await.unwrap();

    let now = Utc::now();
    let first = queue
        .claim_due(now, "worker-a", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(first.len(), 1);

    // Claimed wake is invisible to a second worker
    let second = queue
        .claim_due(now, "worker-b", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(second.is_empty());

    // After the claim lapses it is reclaimable
    let later = now + chrono::Duration::seconds(60);
    let reclaimed = queue
        .claim_due(later, "worker-b", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
}

#[tokio::test]
async fn test_wake_not_due_is_not_claimed() {
    let queue = InMemoryWakeQueue::new();
    queue.schedule(wake("r-1", 3_600)).await.unwrap();

    let claimed = queue
        .claim_due(Utc::now(), "worker-a", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(claimed.is_empty());
}

#[tokio::test]
async fn test_wake_complete_consumes_exactly_once() {
    let queue = InMemoryWakeQueue::new();
    let scheduled = wake("r-1", -1);
    let id = queue.schedule(scheduled).await.unwrap();

    let claimed = queue
        .claim_due(Utc::now(), "worker-a", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);

    queue.complete(&id).await.unwrap();
    assert!(queue.outstanding().await.unwrap().is_empty());

    // Even after the claim window, nothing comes back
    let later = Utc::now() + chrono::Duration::seconds(120);
    let reclaimed = queue
        .claim_due(later, "worker-b", Duration::from_secs(30))
        .await
        .unwrap();
    assert!(reclaimed.is_empty());
}

#[tokio::test]
async fn test_wake_cancel_is_idempotent() {
    let queue = InMemoryWakeQueue::new();
    let id = queue.schedule(wake("r-1", -1)).await.unwrap();

    queue.cancel(&id).await.unwrap();
    queue.cancel(&id).await.unwrap();
    assert!(queue.outstanding().await.unwrap().is_empty());
}
