use crate::*;

use caplink_core::CapabilitySnapshot;

fn resolve(node: &Node, reachability: Reachability, features: &[&str]) -> CapabilitySnapshot {
    let resolver = CapabilityResolver::new(node.registry.clone(), CapabilityKind::BUILTIN);
    let discovered: FeatureSet = features.iter().copied().collect();
    resolver.resolve(&bare("alice@example.org"), None, reachability, &discovered)
}

#[tokio::test]
async fn test_full_bundle_grants_voice_and_video() -> Result<()> {
    let node = Node::new()?;
    let snapshot = resolve(
        &node,
        Reachability::Online,
        &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO, JINGLE_RTP_VIDEO],
    );
    assert!(snapshot.supports(&CapabilityKind::VoiceCall));
    assert!(snapshot.supports(&CapabilityKind::VideoCall));

    let audio_only = resolve(&node, Reachability::Online, &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO]);
    assert!(audio_only.supports(&CapabilityKind::VoiceCall));
    assert!(!audio_only.supports(&CapabilityKind::VideoCall));
    Ok(())
}

#[tokio::test]
async fn test_partial_bundle_denies_voice() -> Result<()> {
    let node = Node::new()?;
    let snapshot = resolve(&node, Reachability::Online, &[JINGLE]);
    assert!(!snapshot.supports(&CapabilityKind::VoiceCall));
    assert!(!snapshot.supports(&CapabilityKind::VideoCall));
    Ok(())
}

#[tokio::test]
async fn test_offline_snapshots_stay_within_allow_list() -> Result<()> {
    let node = Node::new()?;
    let inputs: [&[&str]; 4] = [
        &[],
        &[JINGLE],
        &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO, JINGLE_RTP_VIDEO, CHAT_STATES],
        &["unrelated"],
    ];
    for features in inputs {
        let snapshot = resolve(&node, Reachability::Offline, features);
        assert!(snapshot
            .granted
            .iter()
            .all(|k| node.registry.offline_allowed(k)));
        assert_eq!(snapshot.granted.len(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_unknown_kinds_default_to_granted() -> Result<()> {
    let node = Node::new()?;
    // ContactInfo, DesktopShare and MessageCorrection have no requirement.
    for features in [&[][..], &[JINGLE][..], &["anything"][..]] {
        let snapshot = resolve(&node, Reachability::Online, features);
        assert!(snapshot.supports(&CapabilityKind::ContactInfo));
        assert!(snapshot.supports(&CapabilityKind::DesktopShare));
        assert!(snapshot.supports(&CapabilityKind::MessageCorrection));
    }
    Ok(())
}

#[tokio::test]
async fn test_disabled_kinds_are_never_granted() -> Result<()> {
    let node = Node::new()?;
    node.registry
        .set_requirement(CapabilityKind::VoiceCall, Requirement::Disabled);
    node.registry
        .set_requirement(CapabilityKind::BasicMessaging, Requirement::Disabled);

    let all = [JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO, JINGLE_RTP_VIDEO];
    for reachability in [Reachability::Online, Reachability::Offline] {
        let snapshot = resolve(&node, reachability, &all);
        assert!(!snapshot.supports(&CapabilityKind::VoiceCall));
        assert!(!snapshot.supports(&CapabilityKind::BasicMessaging));
    }
    Ok(())
}

#[tokio::test]
async fn test_resolution_is_a_pure_function() -> Result<()> {
    let node = Node::new()?;
    let features = [JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO, CHAT_STATES];
    for reachability in [Reachability::Online, Reachability::Offline] {
        let a = resolve(&node, reachability, &features);
        let b = resolve(&node, reachability, &features);
        assert_eq!(a, b);
    }
    Ok(())
}

/// Online → offline: nothing before the settle delay, exactly one event
/// after it, granting exactly the allow-list.
#[tokio::test(start_paused = true)]
async fn test_offline_transition_emits_once_after_settle() -> Result<()> {
    let mut node = Node::new()?;
    let online = node
        .connect("alice@example.org/phone", &[JINGLE, JINGLE_RTP, JINGLE_RTP_AUDIO])
        .await?;
    assert_eq!(
        online.snapshot.granted,
        [
            CapabilityKind::BasicMessaging,
            CapabilityKind::VoiceCall,
            CapabilityKind::DesktopShare,
            CapabilityKind::MessageCorrection,
            CapabilityKind::ContactInfo,
        ]
        .into_iter()
        .collect()
    );

    let start = tokio::time::Instant::now();
    node.dispatcher
        .on_presence(full("alice@example.org/phone"), Reachability::Offline, 0);

    assert!(node.quiet_for(SETTLE - Duration::from_millis(1)).await);

    let offline = node.next_event().await?;
    assert!(start.elapsed() >= SETTLE);
    assert_eq!(
        offline.snapshot.granted,
        [CapabilityKind::BasicMessaging].into_iter().collect()
    );
    assert!(node.quiet_for(SETTLE * 5).await);
    Ok(())
}

/// Disabling typing notifications affects the next resolution of each peer;
/// peers that are not re-resolved keep their previous snapshot.
#[tokio::test(start_paused = true)]
async fn test_typing_toggle_is_lazy_per_peer() -> Result<()> {
    let mut node = Node::new()?;
    let alice = node.connect("alice@example.org/phone", &[CHAT_STATES]).await?;
    let bob = node.connect("bob@example.org/desk", &[CHAT_STATES]).await?;
    assert!(alice.snapshot.supports(&CapabilityKind::TypingNotification));
    assert!(bob.snapshot.supports(&CapabilityKind::TypingNotification));

    node.registry
        .set_requirement(CapabilityKind::TypingNotification, Requirement::Disabled);

    // No forced global re-resolution.
    assert!(node.quiet_for(Duration::from_secs(1)).await);

    node.dispatcher.refresh(&bare("alice@example.org"));
    let event = node.next_event().await?;
    assert_eq!(event.peer, bare("alice@example.org"));
    assert!(!event.snapshot.supports(&CapabilityKind::TypingNotification));

    let stale = node
        .dispatcher
        .current(&bare("bob@example.org"))
        .context("bob has a snapshot")?;
    assert!(stale.supports(&CapabilityKind::TypingNotification));
    Ok(())
}
