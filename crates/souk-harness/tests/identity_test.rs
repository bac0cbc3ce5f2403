//! Identity lifecycle through the session coordinator: login, switch,
//! logout, credential refresh and superseded switches.

use std::time::Duration;

use souk_client::{KeyValueStore, ScreenTracker, ServiceEvent};
use souk_core::{ConnectionState, SyncConfig, UserId};
use souk_harness::{InvariantRegistry, SimWorld, session, wire};
use tokio::{sync::watch, time::sleep};

#[tokio::test(start_paused = true)]
async fn first_login_connects_without_settling() {
    let world = SimWorld::new(1);
    let mut coordinator = world.coordinator(SyncConfig::default()).unwrap();

    coordinator.apply(Some(session("a", "tok-a").unwrap())).await.unwrap();

    assert_eq!(world.env.elapsed(), Duration::ZERO);
    assert_eq!(coordinator.service().state(), ConnectionState::Connected);
    assert_eq!(coordinator.service().cache().owner(), Some(&UserId::new("a")));
    assert_eq!(world.transport.last_credential().as_deref(), Some("tok-a"));
}

#[tokio::test(start_paused = true)]
async fn switch_tears_down_then_settles_before_connecting() {
    let world = SimWorld::new(2);
    let invariants = InvariantRegistry::standard();
    let mut coordinator = world.coordinator(SyncConfig::default()).unwrap();
    coordinator.apply(Some(session("a", "tok-a").unwrap())).await.unwrap();

    let at = world.env.epoch();
    world.transport.emit("ReceiveMessage", vec![wire::message(1, "seller-7", "a", "for a", at)]);
    world.transport.emit("UserStatusChanged", vec![wire::status("seller-7", true)]);
    world.transport.emit("UserStartedTyping", vec![wire::user("seller-7")]);
    let notice = wire::notice(Some(2), "seller-7", "Sam", "still there?", None);
    world.transport.emit("NewMessageNotification", vec![notice]);
    coordinator.service_mut().process_pending().await;
    coordinator.service().set_active_conversation(Some("listing-9_seller-7".to_string()));
    assert!(!coordinator.service().cache().is_empty());
    assert!(!coordinator.service().typing().is_empty());
    assert!(coordinator.service().dedup_entries() > 0);
    coordinator.service_mut().take_events();

    coordinator.apply(Some(session("b", "tok-b").unwrap())).await.unwrap();

    let service = coordinator.service_mut();
    assert!(world.env.elapsed() >= Duration::from_secs(2));
    assert_eq!(world.transport.close_count(), 1);
    assert_eq!(world.transport.connect_count(), 2);
    assert_eq!(world.transport.last_credential().as_deref(), Some("tok-b"));
    assert_eq!(service.cache().owner(), Some(&UserId::new("b")));
    assert!(service.cache().is_empty());
    assert!(service.presence().is_empty());
    assert!(service.typing().is_empty());
    assert_eq!(service.dedup_entries(), 0);
    assert!(service.visible_notification().is_none());
    assert!(world.screen.active_conversation().is_none());
    let cleared = ServiceEvent::IdentityCleared { identity: UserId::new("a") };
    assert!(service.take_events().contains(&cleared));
    invariants.assert_all(&world.snapshot(coordinator.service()), "after switch");
}

#[tokio::test(start_paused = true)]
async fn begin_session_with_another_identity_starts_clean() {
    let world = SimWorld::new(8);
    let mut service = world.connected_service("buyer-1").await.unwrap();
    let at = world.env.epoch();
    world.transport.emit("ReceiveMessage", vec![wire::message(1, "seller-9", "buyer-1", "hi", at)]);
    world.transport.emit("UserStatusChanged", vec![wire::status("seller-9", true)]);
    world.transport.emit("UserStartedTyping", vec![wire::user("seller-9")]);
    let notice = wire::notice(Some(2), "seller-9", "Sam", "hello", None);
    world.transport.emit("NewMessageNotification", vec![notice]);
    service.process_pending().await;
    assert!(service.visible_notification().is_some());
    service.set_active_conversation(Some("listing-3_seller-9".to_string()));

    service.begin_session(session("buyer-2", "tok-buyer-2").unwrap()).await.unwrap();

    assert_eq!(service.identity(), Some(&UserId::new("buyer-2")));
    assert_eq!(service.state(), ConnectionState::Connected);
    assert!(service.cache().is_empty());
    assert!(service.presence().is_empty());
    assert!(service.typing().is_empty());
    assert_eq!(service.dedup_entries(), 0);
    assert!(service.visible_notification().is_none());
    assert!(world.screen.active_conversation().is_none());
    assert_eq!(world.transport.close_count(), 1);
    assert_eq!(world.transport.connect_count(), 2);
    assert_eq!(world.transport.last_credential().as_deref(), Some("tok-buyer-2"));
    let cleared = ServiceEvent::IdentityCleared { identity: UserId::new("buyer-1") };
    assert!(service.take_events().contains(&cleared));
    InvariantRegistry::standard().assert_all(&world.snapshot(&service), "after direct switch");

    // The screen cleared on the switch, so buyer-2 sees notices from seller-9
    let notice = wire::notice(Some(3), "seller-9", "Sam", "hello again", None);
    world.transport.emit("NewMessageNotification", vec![notice]);
    service.process_pending().await;
    assert!(service.visible_notification().is_some());
}

#[tokio::test(start_paused = true)]
async fn logout_clears_state_and_persisted_keys() {
    let world = SimWorld::new(3);
    let mut coordinator = world.coordinator(SyncConfig::default()).unwrap();
    world.store.seed("souk.chat.a.draft.seller-7", "half a sentence");
    world.store.seed("souk.chat.active_conversation", "listing-9_seller-7");
    world.store.seed("souk.chat.ab.draft.seller-7", "other account");
    world.store.seed("settings.theme", "dark");

    coordinator.apply(Some(session("a", "tok-a").unwrap())).await.unwrap();
    coordinator.service().set_active_conversation(Some("listing-9_seller-7".to_string()));
    coordinator.apply(None).await.unwrap();

    let service = coordinator.service();
    assert_eq!(service.state(), ConnectionState::Disconnected);
    assert!(service.identity().is_none());
    assert!(service.cache().owner().is_none());
    assert_eq!(world.store.keys(), ["settings.theme", "souk.chat.ab.draft.seller-7"]);
    assert!(world.store.get("souk.chat.active_conversation").await.unwrap().is_none());
    assert_eq!(world.transport.handler_count(), 0);
    InvariantRegistry::standard().assert_all(&world.snapshot(service), "after logout");

    // A second logout has nothing left to do
    coordinator.apply(None).await.unwrap();
    assert_eq!(world.transport.close_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn credential_refresh_keeps_the_connection() {
    let world = SimWorld::new(4);
    let mut coordinator = world.coordinator(SyncConfig::default()).unwrap();
    coordinator.apply(Some(session("a", "tok-a").unwrap())).await.unwrap();

    coordinator.apply(Some(session("a", "tok-a2").unwrap())).await.unwrap();
    assert_eq!(world.transport.connect_count(), 1);
    assert_eq!(world.transport.close_count(), 0);
    assert_eq!(coordinator.service().state(), ConnectionState::Connected);

    coordinator.service_mut().reconnect().await.unwrap();
    assert_eq!(world.transport.last_credential().as_deref(), Some("tok-a2"));
}

#[tokio::test(start_paused = true)]
async fn same_session_twice_is_a_no_op() {
    let world = SimWorld::new(5);
    let mut coordinator = world.coordinator(SyncConfig::default()).unwrap();

    coordinator.apply(Some(session("a", "tok-a").unwrap())).await.unwrap();
    coordinator.apply(Some(session("a", "tok-a").unwrap())).await.unwrap();

    assert_eq!(world.transport.connect_count(), 1);
    assert_eq!(world.transport.close_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_abandons_a_switch_superseded_during_settle() {
    let world = SimWorld::new(6);
    let mut coordinator = world.coordinator(SyncConfig::default()).unwrap();
    let (tx, mut rx) = watch::channel(Some(session("a", "tok-a").unwrap()));

    let transport = world.transport.clone();
    let provider = async move {
        sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.last_credential().as_deref(), Some("tok-a"));

        tx.send_replace(Some(session("b", "tok-b").unwrap()));
        sleep(Duration::from_millis(500)).await;
        tx.send_replace(Some(session("c", "tok-c").unwrap()));

        // c arrived at 600ms: its own settle ends at 2.6s
        sleep(Duration::from_millis(1_900)).await;
        assert_eq!(transport.connect_count(), 1);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(transport.last_credential().as_deref(), Some("tok-c"));

        sleep(Duration::from_secs(5)).await;
    };

    tokio::join!(coordinator.run(&mut rx), provider);

    assert!(coordinator.service().identity().is_none());
    assert_eq!(coordinator.service().state(), ConnectionState::Disconnected);
    assert_eq!(world.transport.handler_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn run_delivers_events_between_session_changes() {
    let world = SimWorld::new(7);
    let mut coordinator = world.coordinator(SyncConfig::default()).unwrap();
    let (tx, mut rx) = watch::channel(Some(session("a", "tok-a").unwrap()));

    let transport = world.transport.clone();
    let at = world.env.epoch();
    let provider = async move {
        sleep(Duration::from_millis(10)).await;
        transport.emit("ReceiveMessage", vec![wire::message(1, "seller-7", "a", "hi", at)]);

        // Two heartbeat intervals
        sleep(Duration::from_secs(51)).await;
        assert_eq!(transport.invocations_of("Heartbeat").len(), 2);
        drop(tx);
    };

    tokio::join!(coordinator.run(&mut rx), provider);

    let events = coordinator.service_mut().take_events();
    let partner = UserId::new("seller-7");
    assert!(events.contains(&ServiceEvent::ConversationUpdated { partner }));
    assert!(events.contains(&ServiceEvent::IdentityCleared { identity: UserId::new("a") }));
}
