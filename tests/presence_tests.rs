//! Presence broadcaster integration tests: online/offline edges and
//! typing-timer behavior, driven with a paused clock.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;

use chat_relay::application::events::{Route, ServerEvent};

use common::*;

async fn settle() {
    // Let any expired timer task run before inspecting the channel.
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn only_the_first_session_broadcasts_online() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.session_opened(1, true);
    assert_eq!(presence_broadcasts(&h.drain()), vec![(1, true)]);

    // Second device: no new broadcast.
    h.presence.session_opened(1, false);
    assert!(presence_broadcasts(&h.drain()).is_empty());
}

#[tokio::test]
async fn only_the_last_disconnect_broadcasts_offline() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.session_closed(1, false).await;
    assert!(presence_broadcasts(&h.drain()).is_empty());

    h.presence.session_closed(1, true).await;
    let events = h.drain();
    assert_eq!(presence_broadcasts(&events), vec![(1, false)]);

    // The offline broadcast carries a last-seen stamp, and the identity
    // row was touched.
    let payload = events
        .iter()
        .find_map(|o| match &o.event {
            ServerEvent::PresenceUpdate(p) if !p.online => Some(p.clone()),
            _ => None,
        })
        .expect("offline presence payload");
    assert!(payload.last_seen.is_some());
    assert_eq!(h.identities.last_seen_calls(), vec![1]);
}

#[tokio::test]
async fn presence_states_alternate_without_duplicates() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.session_opened(1, true);
    h.presence.session_closed(1, true).await;
    h.presence.session_opened(1, true);

    assert_eq!(
        presence_broadcasts(&h.drain()),
        vec![(1, true), (1, false), (1, true)]
    );
}

#[tokio::test(start_paused = true)]
async fn typing_auto_clears_after_the_ttl() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.typing(1, 10, vec![2], true);
    assert_eq!(typing_indicators_to(&h.drain(), 2), vec![(1, 10, true)]);

    tokio::time::sleep(Duration::from_secs(4)).await;
    settle().await;

    assert_eq!(typing_indicators_to(&h.drain(), 2), vec![(1, 10, false)]);
}

#[tokio::test(start_paused = true)]
async fn a_newer_typing_event_resets_the_timer() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.typing(1, 10, vec![2], true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    h.presence.typing(1, 10, vec![2], true);
    h.drain();

    // 2.5s after the reset: the original deadline has passed, but the
    // reset timer has not expired.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    settle().await;
    assert!(typing_indicators_to(&h.drain(), 2).is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert_eq!(typing_indicators_to(&h.drain(), 2), vec![(1, 10, false)]);
}

#[tokio::test(start_paused = true)]
async fn an_explicit_stop_cancels_the_timer() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.typing(1, 10, vec![2], true);
    h.presence.typing(1, 10, vec![2], false);

    assert_eq!(
        typing_indicators_to(&h.drain(), 2),
        vec![(1, 10, true), (1, 10, false)]
    );

    // The cancelled timer never fires a second stop.
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert!(typing_indicators_to(&h.drain(), 2).is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_every_typing_timer_for_the_identity() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.typing(1, 10, vec![2], true);
    h.presence.typing(1, 20, vec![3], true);
    h.drain();

    h.presence.session_closed(1, true).await;

    let events = h.drain();
    assert_eq!(typing_indicators_to(&events, 2), vec![(1, 10, false)]);
    assert_eq!(typing_indicators_to(&events, 3), vec![(1, 20, false)]);
    assert_eq!(presence_broadcasts(&events), vec![(1, false)]);

    // No orphaned timer fires after the disconnect.
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert!(h.drain().is_empty());
}

#[tokio::test]
async fn typing_reaches_only_conversation_participants() {
    let mut h = TestHarness::new();
    h.identities.seed(1, "alice");

    h.presence.typing(1, 10, vec![2, 3], true);

    let events = h.drain();
    assert_eq!(typing_indicators_to(&events, 2), vec![(1, 10, true)]);
    assert_eq!(typing_indicators_to(&events, 3), vec![(1, 10, true)]);
    // Never a roster-wide broadcast.
    assert!(events.iter().all(|o| o.route != Route::All));
}
