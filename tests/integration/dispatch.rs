use crate::*;

use caplink_services::{Change, CapsChange, PeerState};

#[tokio::test(start_paused = true)]
async fn test_events_for_one_peer_keep_arrival_order() -> Result<()> {
    let mut node = Node::new()?;
    node.connect("alice@example.org/phone", &[]).await?;

    let phone = full("alice@example.org/phone");
    let sequences: [&[&str]; 3] = [
        &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO],
        &[JINGLE],
        &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO, JINGLE_RTP_VIDEO],
    ];
    for features in sequences {
        let change = node
            .discovery
            .record(phone.clone(), features.iter().copied().collect())
            .context("features changed")?;
        node.dispatcher.on_caps_changed(change);
        // Resolve before the next update lands in the cache.
        let event = node.next_event().await?;
        let voice = event.snapshot.supports(&CapabilityKind::VoiceCall);
        assert_eq!(voice, features.contains(&JINGLE_RTP_AUDIO));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_peers_settle_independently() -> Result<()> {
    let mut node = Node::new()?;
    node.connect("alice@example.org/phone", &[]).await?;
    node.connect("bob@example.org/desk", &[]).await?;

    node.dispatcher
        .on_presence(full("alice@example.org/phone"), Reachability::Offline, 0);
    tokio::time::sleep(SETTLE / 2).await;
    node.dispatcher
        .on_presence(full("bob@example.org/desk"), Reachability::Offline, 0);

    let first = node.next_event().await?;
    let second = node.next_event().await?;
    assert_eq!(first.peer, bare("alice@example.org"));
    assert_eq!(second.peer, bare("bob@example.org"));
    assert_eq!(node.dispatcher.state(&bare("alice@example.org")), PeerState::Offline);
    assert_eq!(node.dispatcher.state(&bare("bob@example.org")), PeerState::Offline);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_flapping_peer_never_emits_stale_offline() -> Result<()> {
    let mut node = Node::new()?;
    node.connect("alice@example.org/phone", &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO])
        .await?;
    let phone = full("alice@example.org/phone");

    for _ in 0..5 {
        node.dispatcher
            .on_presence(phone.clone(), Reachability::Offline, 0);
        tokio::time::sleep(SETTLE / 4).await;
        node.dispatcher.on_presence(phone.clone(), Reachability::Online, 0);
        let event = node.next_event().await?;
        assert_eq!(event.snapshot.reachability, Reachability::Online);
    }

    assert!(node.quiet_for(SETTLE * 3).await);
    assert_eq!(node.dispatcher.state(&bare("alice@example.org")), PeerState::Online);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_caps_removed_while_offline_is_ignored() -> Result<()> {
    let mut node = Node::new()?;
    node.connect("alice@example.org/phone", &[JINGLE]).await?;
    let phone = full("alice@example.org/phone");

    node.dispatcher.on_presence(phone.clone(), Reachability::Offline, 0);
    node.next_event().await?;

    node.dispatcher.on_caps_changed(CapsChange {
        session: phone,
        change: Change::Removed,
    });
    assert!(node.quiet_for(Duration::from_secs(1)).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_sink_receives_nothing() -> Result<()> {
    let mut node = Node::new()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = node.dispatcher.subscribe(Arc::new(tx));

    node.connect("alice@example.org/phone", &[]).await?;
    assert!(rx.recv().await.is_some());

    assert!(node.dispatcher.unsubscribe(handle));
    node.dispatcher.refresh(&bare("alice@example.org"));
    node.next_event().await?;
    // The sender was dropped with the subscription.
    assert!(rx.recv().await.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_query_does_not_publish() -> Result<()> {
    let mut node = Node::new()?;
    node.connect("alice@example.org/phone", &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO])
        .await?;

    let snapshot = node
        .dispatcher
        .query(&bare("alice@example.org"))
        .context("alice is tracked")?;
    assert!(snapshot.supports(&CapabilityKind::VoiceCall));
    assert!(node.quiet_for(Duration::from_secs(1)).await);
    assert!(node.dispatcher.query(&bare("nobody@example.org")).is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shared_caps_node_serves_many_sessions() -> Result<()> {
    let mut node = Node::new()?;
    let features = [JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO];
    for peer in ["a@example.org/x", "b@example.org/x", "c@example.org/x"] {
        let event = node.connect(peer, &features).await?;
        assert!(event.snapshot.supports(&CapabilityKind::VoiceCall));
    }
    assert_eq!(node.discovery.node_count(), 1);
    Ok(())
}

/// Several host threads flap sessions of one peer while another churns its
/// caps. `last_online` keeps one session up at the end.
async fn flap_concurrently(last_online: bool) -> Result<Node> {
    let mut node = Node::new()?;
    let alice = bare("alice@example.org");
    node.directory.add(alice.clone());
    let sessions: Vec<FullAddress> = (0..4)
        .map(|i| full(&format!("alice@example.org/r{i}")))
        .collect();
    for session in &sessions {
        node.discovery
            .record(session.clone(), [JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO].into_iter().collect());
    }

    let mut workers = Vec::new();
    for (i, session) in sessions.iter().cloned().enumerate() {
        let dispatcher = node.dispatcher.clone();
        workers.push(tokio::task::spawn_blocking(move || {
            for round in 0..50 {
                let reachability = if round % 2 == 0 {
                    Reachability::Online
                } else {
                    Reachability::Offline
                };
                dispatcher.on_presence(session.clone(), reachability, i as i32);
            }
            if last_online && i == 0 {
                dispatcher.on_presence(session, Reachability::Online, 0);
            }
        }));
    }
    let dispatcher = node.dispatcher.clone();
    let discovery = node.discovery.clone();
    let extra = full("alice@example.org/extra");
    workers.push(tokio::task::spawn_blocking(move || {
        for round in 0..50 {
            let change = if round % 2 == 0 {
                discovery.record(extra.clone(), [JINGLE].into_iter().collect())
            } else {
                discovery.forget(&extra)
            };
            if let Some(change) = change {
                dispatcher.on_caps_changed(change);
            }
        }
    }));
    for worker in workers {
        worker.await.context("worker panicked")?;
    }
    Ok(node)
}

/// Drain events until the dispatcher has been quiet for a few settle
/// periods; returns the last one.
async fn last_event(node: &mut Node) -> Result<CapabilitiesChanged> {
    let mut last = None;
    while let Ok(Some(event)) = tokio::time::timeout(SETTLE * 3, node.events.recv()).await {
        last = Some(event);
    }
    last.context("no event published")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_notifications_end_offline() -> Result<()> {
    let mut node = flap_concurrently(false).await?;
    let alice = bare("alice@example.org");

    let event = last_event(&mut node).await?;
    assert_eq!(node.directory.reachability(&alice), Some(Reachability::Offline));
    assert_eq!(event.snapshot.reachability, Reachability::Offline);
    assert_eq!(node.dispatcher.state(&alice), PeerState::Offline);
    assert_eq!(
        node.dispatcher.current(&alice).map(|s| s.reachability),
        Some(Reachability::Offline)
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_notifications_end_online() -> Result<()> {
    let mut node = flap_concurrently(true).await?;
    let alice = bare("alice@example.org");

    let event = last_event(&mut node).await?;
    assert_eq!(node.directory.reachability(&alice), Some(Reachability::Online));
    assert_eq!(event.snapshot.reachability, Reachability::Online);
    assert_eq!(event.snapshot.session, Some(full("alice@example.org/r0")));
    assert!(event.snapshot.supports(&CapabilityKind::VoiceCall));
    assert_eq!(node.dispatcher.state(&alice), PeerState::Online);
    Ok(())
}
