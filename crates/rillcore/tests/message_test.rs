use rillcore::{MessageKind, NodeMessage, NodeProgress};

#[test]
fn merge_of_none_and_none_is_none() {
    assert_eq!(NodeMessage::NONE.merge(&NodeMessage::NONE), NodeMessage::NONE);
}

#[test]
fn merge_takes_max_severity_and_joins_text() {
    let merged = NodeMessage::warning("a").merge(&NodeMessage::error("b"));
    assert_eq!(merged.kind, MessageKind::Error);
    assert_eq!(merged.text, "a\nb");
}

#[test]
fn merge_skips_separator_for_empty_text() {
    let merged = NodeMessage::NONE.merge(&NodeMessage::error("boom"));
    assert_eq!(merged.kind, MessageKind::Error);
    assert_eq!(merged.text, "boom");

    let merged = NodeMessage::warning("careful").merge(&NodeMessage::NONE);
    assert_eq!(merged.kind, MessageKind::Warning);
    assert_eq!(merged.text, "careful");
}

#[test]
fn merge_of_equal_messages_returns_either() {
    let message = NodeMessage::warning("same");
    assert_eq!(message.merge(&message), message);
}

#[test]
fn severity_ordering() {
    assert!(MessageKind::Reset < MessageKind::Warning);
    assert!(MessageKind::Warning < MessageKind::Error);
}

#[test]
fn progress_fields_update_independently() {
    let mut progress = NodeProgress::new()
        .with_fraction(0.25)
        .with_message("loading");

    // an absent fraction leaves the displayed fraction unchanged
    progress.apply(&NodeProgress::new().with_message("still loading"));
    assert_eq!(progress.fraction, Some(0.25));
    assert_eq!(progress.message.as_deref(), Some("still loading"));

    // an absent message leaves the text unchanged
    progress.apply(&NodeProgress::new().with_fraction(0.75));
    assert_eq!(progress.fraction, Some(0.75));
    assert_eq!(progress.message.as_deref(), Some("still loading"));
}

#[test]
fn progress_fraction_is_clamped() {
    let progress = NodeProgress::new().with_fraction(1.5);
    assert_eq!(progress.fraction, Some(1.0));

    let mut progress = NodeProgress::new();
    progress.apply(&NodeProgress {
        fraction: Some(-0.5),
        message: None,
    });
    assert_eq!(progress.fraction, Some(0.0));
}
