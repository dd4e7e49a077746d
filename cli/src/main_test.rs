use super::*;
use envelopes::{ChatMessage, PresenceUpdate};

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["partner-chat", "--token", "t", "--user-id", "u1"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn send_accepts_repeated_attachments_and_support_keys() {
    let cli = parse(&["send", "support:c9", "hello", "--attach", "a.png", "--attach", "b.pdf"]);
    let Command::Send(args) = cli.command else {
        panic!("expected send");
    };
    assert_eq!(args.conversation, ConversationKey::Support("c9".to_owned()));
    assert_eq!(args.text, "hello");
    assert_eq!(args.attachments, vec![PathBuf::from("a.png"), PathBuf::from("b.pdf")]);
}

#[test]
fn send_text_defaults_to_empty_for_attachment_only_messages() {
    let cli = parse(&["send", "42", "--attach", "a.png"]);
    let Command::Send(args) = cli.command else {
        panic!("expected send");
    };
    assert_eq!(args.conversation, ConversationKey::Direct("42".to_owned()));
    assert!(args.text.is_empty());
}

#[test]
fn role_defaults_to_partner() {
    let cli = parse(&["unread"]);
    assert_eq!(cli.role.parse::<UserRole>().unwrap(), UserRole::Partner);
}

#[test]
fn describe_renders_type_and_payload() {
    let message = ChatMessage { id: "5".to_owned(), content: "hi".to_owned(), ..ChatMessage::default() };
    let line = describe(&ServerEvent::Message(message));
    assert_eq!(line["type"], "message");
    assert_eq!(line["data"]["id"], "5");

    let presence = describe(&ServerEvent::Presence(PresenceUpdate {
        user_id: "7".to_owned(),
        is_online: None,
        status: Some("online".to_owned()),
    }));
    assert_eq!(presence["type"], "presence");
    assert_eq!(presence["data"]["online"], true);
}

#[test]
fn missing_attachment_reports_path() {
    let err = load_attachment(Path::new("/definitely/not/here.bin")).unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.bin"));
}
