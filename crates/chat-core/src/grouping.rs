use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use crate::types::{
    ConversationView, DayGroup, Message, MessageView, PENDING_CLOCK_LABEL, UNKNOWN_AUTHOR_LABEL,
};

/// Sort messages into display order: `created_at_ms` ascending, ties broken
/// by `id` ascending, pending echoes last.
///
/// The store contract already delivers an ordered set; this pass is the
/// engine-side safety net that makes the published order deterministic even
/// for a misbehaving delivery.
pub fn sort_for_display(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}

/// Day section label for a viewer-local calendar date.
pub fn day_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_owned()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_owned()
    } else {
        date.format("%-d %B %Y").to_string()
    }
}

/// Build the published conversation view from one snapshot.
///
/// Pure function of its inputs: the same `(messages, viewer_id, zone, today)`
/// always yields the same view. A single linear pass over the ordered list
/// opens a new [`DayGroup`] whenever the viewer-local date label changes.
pub fn build_view(
    mut messages: Vec<Message>,
    viewer_id: &str,
    zone: FixedOffset,
    today: NaiveDate,
) -> ConversationView {
    if messages.is_empty() {
        return ConversationView::Empty;
    }

    sort_for_display(&mut messages);

    let mut groups: Vec<DayGroup> = Vec::new();
    for message in &messages {
        let (label, clock) = match local_stamp(message.created_at_ms, zone) {
            Some(stamp) => (
                day_label(stamp.date_naive(), today),
                stamp.format("%H:%M").to_string(),
            ),
            // An unconfirmed echo is treated as newest: it lands in today's
            // group with a placeholder clock until the store assigns a time.
            None => (day_label(today, today), PENDING_CLOCK_LABEL.to_owned()),
        };

        let view = message_view(message, viewer_id, clock);
        match groups.last_mut() {
            Some(group) if group.label == label => group.messages.push(view),
            _ => groups.push(DayGroup {
                label,
                messages: vec![view],
            }),
        }
    }

    ConversationView::Ready { groups }
}

fn local_stamp(created_at_ms: Option<i64>, zone: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let millis = created_at_ms?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|stamp| stamp.with_timezone(&zone))
}

fn message_view(message: &Message, viewer_id: &str, sent_at_local: String) -> MessageView {
    let author_display_name = message
        .author_display_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_AUTHOR_LABEL.to_owned());

    MessageView {
        id: message.id.clone(),
        author_id: message.author_id.clone(),
        author_display_name,
        body: message.body.clone(),
        sent_at_local,
        is_own_message: message.author_id == viewer_id,
    }
}
