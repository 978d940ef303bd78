// ── Notification → bus messages ──
//
// Subject layout: `<stream>.<target>[.<prefix>].<path>`. Leaves whose
// path maps to an empty subject, or to one carrying a wildcard token,
// are not published.

use statebus_api::{Notification, Path};
use statebus_api::subject::{has_wildcard, path_to_subject};

use crate::model::{BusMessage, TargetId};

/// Translate one notification into bus messages, updates first.
pub fn notification_to_messages(
    stream: &str,
    target: &TargetId,
    notification: &Notification,
) -> Vec<BusMessage> {
    let mut base = format!("{stream}.{target}");
    if let Some(prefix) = &notification.prefix {
        let prefix = path_to_subject(prefix);
        if !prefix.is_empty() {
            base.push('.');
            base.push_str(&prefix);
        }
    }

    let subject_for = |path: &Path| {
        let leaf = path_to_subject(path);
        if leaf.is_empty() {
            return None;
        }
        let subject = format!("{base}.{leaf}");
        if has_wildcard(&subject) {
            tracing::debug!(%subject, "skipping wildcard subject");
            return None;
        }
        Some(subject)
    };

    let updates = notification.update.iter().filter_map(|update| {
        subject_for(&update.path).map(|subject| {
            BusMessage::update(subject, notification.timestamp, update.val.encode())
                .with_tag("target", target.as_str())
        })
    });
    let deletes = notification.delete.iter().filter_map(|path| {
        subject_for(path).map(|subject| {
            BusMessage::delete(subject, notification.timestamp).with_tag("target", target.as_str())
        })
    });
    updates.chain(deletes).collect()
}
