use super::*;

fn direct(id: &str, sender: &str, target: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_owned(),
        content: "x".to_owned(),
        sender_id: Some(sender.to_owned()),
        target_id: Some(target.to_owned()),
        ..ChatMessage::default()
    }
}

#[test]
fn parses_direct_and_support_keys() {
    assert_eq!("17".parse::<ConversationKey>().unwrap(), ConversationKey::Direct("17".to_owned()));
    assert_eq!("support:c-3".parse::<ConversationKey>().unwrap(), ConversationKey::Support("c-3".to_owned()));
    assert!("support:".parse::<ConversationKey>().is_err());
    assert!("  ".parse::<ConversationKey>().is_err());
}

#[test]
fn display_matches_parse_form() {
    assert_eq!(ConversationKey::Support("9".to_owned()).to_string(), "support:9");
    assert_eq!(ConversationKey::Direct("9".to_owned()).to_string(), "9");
}

#[test]
fn direct_membership_matches_either_end() {
    let key = ConversationKey::Direct("B".to_owned());
    assert!(key.contains_direct(&direct("1", "A", "B")));
    assert!(key.contains_direct(&direct("2", "B", "A")));
    assert!(!key.contains_direct(&direct("3", "A", "C")));
    assert!(!key.contains_support(&direct("1", "A", "B")));
}

#[test]
fn support_membership_matches_chat_id_only() {
    let key = ConversationKey::Support("c1".to_owned());
    let mut msg = direct("1", "g", "admin");
    assert!(!key.contains_support(&msg));
    msg.chat_id = Some("c1".to_owned());
    assert!(key.contains_support(&msg));
    assert!(!key.contains_direct(&msg));
}

#[test]
fn key_for_synthetic_support_participant_is_support() {
    let chat = envelopes::SupportChat { id: "c5".to_owned(), guest_id: "g".to_owned(), ..Default::default() };
    assert_eq!(ConversationKey::for_participant(&chat.to_participant()), ConversationKey::Support("c5".to_owned()));

    let partner = Participant { id: "u1".to_owned(), ..Participant::default() };
    assert_eq!(ConversationKey::for_participant(&partner), ConversationKey::Direct("u1".to_owned()));
}
