//! The sample configuration and payloads shipped with the repository stay
//! loadable.

use std::path::PathBuf;

use herald::Herald;
use herald_queue::{MessageKind, Payload};

fn workspace_file(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join(name)
}

#[test]
fn test_sample_config_loads() {
    let herald = Herald::load(&workspace_file("herald.config.ron")).unwrap();

    assert_eq!(herald.queue.path, PathBuf::from("./queue.json"));
    assert_eq!(herald.processor.interval_ms, 5000);
    assert_eq!(herald.smtp.timeouts.data_secs, 120);
    assert_eq!(herald.logging.level.as_deref(), Some("info"));
}

#[test]
fn test_sample_payloads_are_valid() {
    for (file, kind) in [
        ("demos/chat.json", MessageKind::Chat),
        ("demos/email.json", MessageKind::Email),
    ] {
        let content = std::fs::read_to_string(workspace_file(file)).unwrap();
        let payload: Payload = serde_json::from_str(&content).unwrap();

        assert_eq!(payload.kind(), kind, "{file}");
        payload.validate().unwrap();
    }
}

#[test]
fn test_email_sample_attachment_is_decoded() {
    let content = std::fs::read_to_string(workspace_file("demos/email.json")).unwrap();
    let Payload::Email(email) = serde_json::from_str(&content).unwrap() else {
        panic!("expected an email payload");
    };

    assert_eq!(email.attachments[0].content, b"All systems nominal.\n");
}
