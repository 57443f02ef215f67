//! Two peers sharing one Subject over an in-process network.
//!
//! The GM edits a goblin owned by a player; the request is routed to the
//! player's node, applied there and then reverted by name.
//!
//! Usage: steward_demo [config.json]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use uuid::Uuid;

use steward::authority::{AutoAnswer, PeerRole};
use steward::document::{DocumentStore, Fields, OwnershipLevel};
use steward::protocol::LocalNetwork;
use steward::{
    EventKind, FieldPatch, Instance, MemoryStore, MutateOptions, MutationCallbacks, Node,
    PeerRoster, Shorthand, StewardConfig, Subject,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("steward.json"));
    let config = StewardConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let gm = Uuid::new_v4();
    let player = Uuid::new_v4();
    let roster = PeerRoster::new()
        .with_peer(gm, "gm", PeerRole::Privileged)
        .with_peer(player, "player", PeerRole::Regular);

    let store = Arc::new(MemoryStore::new());
    let mut potion = Fields::new();
    potion.insert("name".into(), json!("Potion"));
    potion.insert("type".into(), json!("consumable"));
    let goblin = Subject::new("Goblin")
        .with_field("hp", 10)
        .with_item("items", potion)
        .with_owner(player, OwnershipLevel::Owner);
    let scene = Uuid::new_v4();
    let instance = Instance::new(scene, goblin.id).with_field("x", 0);
    let (goblin_id, instance_id) = (goblin.id, instance.id);
    store.insert_subject(goblin)?;
    store.insert_instance(instance)?;

    let network = LocalNetwork::new();
    let gm_node = Node::builder(Arc::new(network.attach(gm)), store.clone())
        .with_roster(roster.clone())
        .with_settings(config.settings.clone())
        .build();
    let player_node = Node::builder(Arc::new(network.attach(player)), store.clone())
        .with_roster(roster)
        .with_settings(config.settings)
        .with_confirmation(Arc::new(AutoAnswer::accept()))
        .build();
    gm_node.start();
    player_node.start();

    gm_node.bus().watch(EventKind::Mutate, |event| async move {
        log::info!("Saw {:?} {:?}", event.kind, event.mutation);
        Ok(())
    });

    let shorthand = Shorthand::new()
        .set("hp", 15)
        .place("x", 3)
        .update("items", "Potion", FieldPatch::new().set("charges", 2));
    let outcome = gm_node
        .engine()
        .mutate_copy(
            instance_id,
            &shorthand,
            MutationCallbacks::new(),
            MutateOptions::named("bless").with_description("Blessing of the GM"),
        )
        .await?;
    log::info!("Mutation accepted: {}", outcome.accepted());
    log::info!("Goblin now: {}", serde_json::to_string(&store.subject(goblin_id).await?.fields)?);

    let reverted = gm_node.engine().revert(instance_id, Some("bless")).await?;
    log::info!("Revert accepted: {}", reverted.accepted());
    log::info!("Goblin now: {}", serde_json::to_string(&store.subject(goblin_id).await?.fields)?);

    gm_node.notice(scene, "The blessing fades").await?;
    gm_node.queue().flush_all().await?;
    player_node.queue().flush_all().await?;

    gm_node.stop();
    player_node.stop();
    Ok(())
}
