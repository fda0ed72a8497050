//! Display-name resolution (§4.3) and the reflective-probe redesign (§9):
//! a typed `ConversationDisplayName` trait with one impl per conversation
//! variant the protocol crates expose, instead of a runtime reflection probe
//! over *DisplayName*/*Name* fields.

/// A contact's known names, in the precedence order §4.3 specifies for user
/// JIDs: full name, then push name, then business name.
#[derive(Debug, Clone, Default)]
pub struct ContactNames {
    pub full_name: Option<String>,
    pub push_name: Option<String>,
    pub business_name: Option<String>,
}

impl ContactNames {
    /// Resolve to a single display name, falling back to `sender` and then
    /// to the bare jid user part if no contact name is known at all.
    pub fn resolve(&self, sender_fallback: &str, jid_user_fallback: &str) -> String {
        self.full_name
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.push_name.clone().filter(|s| !s.is_empty()))
            .or_else(|| self.business_name.clone().filter(|s| !s.is_empty()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                if !sender_fallback.is_empty() {
                    sender_fallback.to_string()
                } else {
                    jid_user_fallback.to_string()
                }
            })
    }
}

/// Typed accessor for a history-sync conversation's server-supplied name,
/// replacing the source's reflective field probe over *DisplayName*/*Name*.
/// Each conversation-proto variant the protocol crates expose gets its own
/// impl; callers never reach into the proto with reflection.
pub trait ConversationDisplayName {
    /// The server-supplied display name for this conversation, if any.
    fn conversation_display_name(&self) -> Option<String>;
}

/// Minimal shape of a history-sync conversation, abstracted away from the
/// exact `waproto` message type so the resolution logic below is testable
/// without constructing a full protobuf value.
#[derive(Debug, Clone, Default)]
pub struct ConversationNameFields {
    pub display_name: Option<String>,
    pub name: Option<String>,
}

impl ConversationDisplayName for ConversationNameFields {
    fn conversation_display_name(&self) -> Option<String> {
        self.display_name
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.name.clone().filter(|s| !s.is_empty()))
    }
}

/// Resolve a chat's display name per §4.3:
/// 1. keep an existing non-empty stored name,
/// 2. for groups, prefer the server-supplied conversation name, else a
///    caller-supplied group-info lookup, else the synthetic fallback,
/// 3. for users, prefer the contact's names via [`ContactNames::resolve`].
pub fn resolve_chat_name(
    existing_name: Option<&str>,
    is_group: bool,
    jid_user: &str,
    conversation_name: Option<&str>,
    group_info_name: Option<&str>,
    contact: Option<&ContactNames>,
    sender_fallback: &str,
) -> String {
    if let Some(existing) = existing_name {
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    if is_group {
        if let Some(name) = conversation_name.filter(|s| !s.is_empty()) {
            return name.to_string();
        }
        if let Some(name) = group_info_name.filter(|s| !s.is_empty()) {
            return name.to_string();
        }
        return format!("Group {jid_user}");
    }

    match contact {
        Some(c) => c.resolve(sender_fallback, jid_user),
        None if !sender_fallback.is_empty() => sender_fallback.to_string(),
        None => jid_user.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_precedence_full_name_wins() {
        let c = ContactNames {
            full_name: Some("A".into()),
            push_name: Some("B".into()),
            business_name: Some("C".into()),
        };
        assert_eq!(c.resolve("fallback", "jid"), "A");
    }

    #[test]
    fn contact_precedence_push_name_when_no_full_name() {
        let c = ContactNames {
            full_name: None,
            push_name: Some("B".into()),
            business_name: Some("C".into()),
        };
        assert_eq!(c.resolve("fallback", "jid"), "B");
    }

    #[test]
    fn contact_precedence_business_name_last() {
        let c = ContactNames {
            full_name: None,
            push_name: None,
            business_name: Some("C".into()),
        };
        assert_eq!(c.resolve("fallback", "jid"), "C");
    }

    #[test]
    fn contact_precedence_falls_back_to_jid_user() {
        let c = ContactNames::default();
        assert_eq!(c.resolve("", "27821234567"), "27821234567");
    }

    #[test]
    fn existing_name_is_kept() {
        let name = resolve_chat_name(
            Some("Already Named"),
            false,
            "jid",
            None,
            None,
            None,
            "sender",
        );
        assert_eq!(name, "Already Named");
    }

    #[test]
    fn group_prefers_conversation_name_then_group_info_then_synthetic() {
        assert_eq!(
            resolve_chat_name(None, true, "120363", Some("Family"), Some("Other"), None, ""),
            "Family"
        );
        assert_eq!(
            resolve_chat_name(None, true, "120363", None, Some("Other"), None, ""),
            "Other"
        );
        assert_eq!(
            resolve_chat_name(None, true, "120363", None, None, None, ""),
            "Group 120363"
        );
    }

    #[test]
    fn conversation_display_name_prefers_display_name_field() {
        let c = ConversationNameFields {
            display_name: Some("DN".into()),
            name: Some("N".into()),
        };
        assert_eq!(c.conversation_display_name().as_deref(), Some("DN"));
    }

    #[test]
    fn conversation_display_name_falls_back_to_name_field() {
        let c = ConversationNameFields {
            display_name: None,
            name: Some("N".into()),
        };
        assert_eq!(c.conversation_display_name().as_deref(), Some("N"));
    }
}
