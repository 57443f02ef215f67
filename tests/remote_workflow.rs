use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use steward::authority::{AutoAnswer, PeerRole};
use steward::document::{DocumentStore, Fields, InstanceId, OwnershipLevel, PeerId, SubjectId};
use steward::engine::{DismissOutcome, RevertOutcome};
use steward::protocol::LocalNetwork;
use steward::{
    EventKind, Instance, MemoryStore, MutateOptions, MutationCallbacks, MutationError,
    MutationOutcome, Node, PeerRoster, Shorthand, Subject, WorkflowSettings,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn object(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

/// A player owning every Subject and a second regular peer asking for changes.
struct Table {
    store: Arc<MemoryStore>,
    owner: Node,
    guest: Node,
    owner_ui: Arc<AutoAnswer>,
    scene: Uuid,
}

impl Table {
    fn new(owner_ui: AutoAnswer, settings: WorkflowSettings) -> Self {
        init_logging();
        let network = LocalNetwork::new();
        let owner_id = Uuid::new_v4();
        let guest_id = Uuid::new_v4();
        let roster = PeerRoster::new()
            .with_peer(owner_id, "alice", PeerRole::Regular)
            .with_peer(guest_id, "bob", PeerRole::Regular);

        let store = Arc::new(MemoryStore::new());
        let owner_ui = Arc::new(owner_ui);
        let owner = Node::builder(Arc::new(network.attach(owner_id)), store.clone())
            .with_roster(roster.clone())
            .with_confirmation(owner_ui.clone())
            .with_settings(settings.clone())
            .build();
        let guest = Node::builder(Arc::new(network.attach(guest_id)), store.clone())
            .with_roster(roster)
            .with_settings(settings)
            .build();
        owner.start();
        guest.start();

        Self {
            store,
            owner,
            guest,
            owner_ui,
            scene: Uuid::new_v4(),
        }
    }

    fn goblin(&self, owner: PeerId) -> (InstanceId, SubjectId) {
        let subject = Subject::new("Goblin")
            .with_field("hp", 10)
            .with_item("items", object(json!({ "name": "Potion", "type": "consumable" })))
            .with_owner(owner, OwnershipLevel::Owner);
        let instance = Instance::new(self.scene, subject.id);
        let ids = (instance.id, subject.id);
        self.store.insert_subject(subject).unwrap();
        self.store.insert_instance(instance).unwrap();
        ids
    }

    async fn hp(&self, subject: SubjectId) -> Value {
        self.store.subject(subject).await.unwrap().fields["hp"].clone()
    }
}

#[tokio::test]
async fn test_guest_mutation_is_committed_by_owner() {
    let table = Table::new(AutoAnswer::accept(), WorkflowSettings::default());
    let (instance, subject) = table.goblin(table.owner.peer_id());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let guest_seen = seen.clone();
    table.guest.bus().watch(EventKind::Mutate, move |event| {
        let seen = guest_seen.clone();
        async move {
            seen.lock().unwrap().push((event.user_id, event.mutation));
            Ok(())
        }
    });

    let outcome = table
        .guest
        .engine()
        .mutate_copy(instance, &Shorthand::new().set("hp", 15), MutationCallbacks::new(), MutateOptions::named("heal"))
        .await
        .unwrap();

    let response = match &outcome {
        MutationOutcome::Remote(response) => response,
        other => panic!("expected a remote outcome, got {other:?}"),
    };
    assert!(response.accepted);
    assert_eq!(response.responder, table.owner.peer_id());
    let entry = response.entry.as_ref().unwrap();
    assert_eq!(entry.user_id, table.guest.peer_id());
    assert_eq!(entry.name, "heal");

    assert_eq!(table.hp(subject).await, json!(15));
    assert_eq!(table.owner_ui.prompts(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(table.guest.peer_id(), Some("heal".to_string()))]
    );
}

#[tokio::test]
async fn test_guest_revert_is_routed_to_owner() {
    let table = Table::new(AutoAnswer::accept(), WorkflowSettings::default());
    let (instance, subject) = table.goblin(table.owner.peer_id());

    table
        .owner
        .engine()
        .mutate_copy(instance, &Shorthand::new().set("hp", 15), MutationCallbacks::new(), MutateOptions::named("heal"))
        .await
        .unwrap();

    let reverted = table.guest.engine().revert(instance, None).await.unwrap();
    assert!(matches!(&reverted, RevertOutcome::Remote(response) if response.accepted));
    assert_eq!(table.hp(subject).await, json!(10));
    assert!(table.guest.engine().stack(instance).await.unwrap().is_empty());

    let nothing = table.guest.engine().revert(instance, None).await.unwrap();
    assert_eq!(nothing, RevertOutcome::NothingToRevert);
}

#[tokio::test]
async fn test_rejected_request_writes_nothing() {
    let table = Table::new(AutoAnswer::reject(), WorkflowSettings::default());
    let (instance, subject) = table.goblin(table.owner.peer_id());

    let outcome = table
        .guest
        .engine()
        .mutate_copy(instance, &Shorthand::new().set("hp", 1), MutationCallbacks::new(), MutateOptions::default())
        .await
        .unwrap();
    assert!(!outcome.accepted());
    assert_eq!(table.hp(subject).await, json!(10));
    assert!(table.owner.engine().stack(instance).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_stops_after_first_rejection() {
    let table = Table::new(AutoAnswer::reject(), WorkflowSettings::default());
    let owner = table.owner.peer_id();
    let goblins: Vec<_> = (0..3).map(|_| table.goblin(owner)).collect();
    let instances: Vec<_> = goblins.iter().map(|(instance, _)| *instance).collect();

    let outcome = table
        .guest
        .engine()
        .batch_mutate(&instances, &Shorthand::new().set("hp", 99), MutateOptions::default())
        .await;

    assert_eq!(outcome.results.len(), 3);
    assert_eq!(outcome.accepted_count(), 0);
    assert_eq!(table.owner_ui.prompts(), 1);
    for (_, subject) in goblins {
        assert_eq!(table.hp(subject).await, json!(10));
    }
}

#[tokio::test]
async fn test_batch_after_first_acceptance_skips_prompts() {
    let table = Table::new(AutoAnswer::accept(), WorkflowSettings::default());
    let owner = table.owner.peer_id();
    let goblins: Vec<_> = (0..3).map(|_| table.goblin(owner)).collect();
    let instances: Vec<_> = goblins.iter().map(|(instance, _)| *instance).collect();

    let outcome = table
        .guest
        .engine()
        .batch_mutate(&instances, &Shorthand::new().set("hp", 99), MutateOptions::named("rage"))
        .await;

    assert!(outcome.all_accepted());
    assert_eq!(table.owner_ui.prompts(), 1);
    // Forced requests also suppress the notice
    assert_eq!(table.owner_ui.notices(), 0);
    for (_, subject) in &goblins {
        assert_eq!(table.hp(*subject).await, json!(99));
    }

    let reverted = table.guest.engine().batch_revert(&instances, "rage").await;
    assert_eq!(reverted.accepted_count(), 3);
    for (_, subject) in &goblins {
        assert_eq!(table.hp(*subject).await, json!(10));
    }
}

#[tokio::test]
async fn test_disconnected_owner_fails_immediately() {
    let table = Table::new(AutoAnswer::accept(), WorkflowSettings::default());
    let owner = table.owner.peer_id();
    let (instance, _) = table.goblin(owner);
    table.guest.roster().write().unwrap().disconnect(&owner);

    let result = table
        .guest
        .engine()
        .mutate_copy(instance, &Shorthand::new().set("hp", 1), MutationCallbacks::new(), MutateOptions::default())
        .await;
    assert!(matches!(result, Err(MutationError::OwnerUnavailable(id)) if id == instance));
}

#[tokio::test(start_paused = true)]
async fn test_silent_owner_leaves_request_pending() {
    let table = Table::new(AutoAnswer::accept(), WorkflowSettings::default());
    let (instance, subject) = table.goblin(table.owner.peer_id());
    table.owner.stop();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let pending = tokio::time::timeout(
        Duration::from_secs(30),
        table.guest.engine().mutate_copy(
            instance,
            &Shorthand::new().set("hp", 1),
            MutationCallbacks::new(),
            MutateOptions::default(),
        ),
    )
    .await;
    assert!(pending.is_err());
    assert_eq!(table.hp(subject).await, json!(10));
}

#[tokio::test(start_paused = true)]
async fn test_configured_timeout_gives_up() {
    let settings = WorkflowSettings {
        response_timeout_ms: Some(2_000),
        ..Default::default()
    };
    let table = Table::new(AutoAnswer::accept(), settings);
    let (instance, _) = table.goblin(table.owner.peer_id());
    table.owner.stop();
    tokio::time::sleep(Duration::from_millis(1)).await;

    let result = table
        .guest
        .engine()
        .mutate_copy(instance, &Shorthand::new().set("hp", 1), MutationCallbacks::new(), MutateOptions::named("late"))
        .await;
    assert!(matches!(
        result,
        Err(MutationError::ResponseTimeout { ref name, .. }) if name == "late"
    ));
}

#[tokio::test]
async fn test_guest_dismiss_removes_placement() {
    let table = Table::new(AutoAnswer::accept(), WorkflowSettings::default());
    let (instance, _) = table.goblin(table.owner.peer_id());

    let dismissed = Arc::new(Mutex::new(false));
    let flag = dismissed.clone();
    table.guest.bus().watch(EventKind::Dismiss, move |_| {
        let flag = flag.clone();
        async move {
            *flag.lock().unwrap() = true;
            Ok(())
        }
    });

    let outcome = table.guest.engine().dismiss(instance).await.unwrap();
    assert_eq!(outcome, DismissOutcome::Forwarded(table.owner.peer_id()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(table.store.instance(instance).await.is_err());
    assert!(*dismissed.lock().unwrap());
}

#[tokio::test]
async fn test_owner_dismisses_directly() {
    let table = Table::new(AutoAnswer::accept(), WorkflowSettings::default());
    let (instance, _) = table.goblin(table.owner.peer_id());

    let outcome = table.owner.engine().dismiss(instance).await.unwrap();
    assert_eq!(outcome, DismissOutcome::Dismissed);
    assert!(table.store.instance(instance).await.is_err());
}
