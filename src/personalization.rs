//! Viewer-relative flags and reaction counts.
//!
//! Everything here is pure: callers fetch the joined records first and pass
//! them in.

use std::collections::HashMap;

use crate::id::EntityId;
use crate::store::likes::LikeRecord;

/// Reaction totals for one target plus the viewer's own reaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reactions {
    pub likes: u64,
    pub dislikes: u64,
    pub viewer_liked: bool,
    pub viewer_disliked: bool,
}

/// Collapses like records to one per liker (the latest wins) and counts them.
pub fn derive(likes: &[LikeRecord], viewer: Option<&EntityId>) -> Reactions {
    let mut latest: HashMap<&EntityId, &LikeRecord> = HashMap::with_capacity(likes.len());
    for record in likes {
        latest
            .entry(&record.liked_by)
            .and_modify(|current| {
                if record.created_at >= current.created_at {
                    *current = record;
                }
            })
            .or_insert(record);
    }

    let mut reactions = Reactions::default();
    for record in latest.values() {
        if record.liked {
            reactions.likes += 1;
        } else {
            reactions.dislikes += 1;
        }
    }

    if let Some(record) = viewer.and_then(|viewer| latest.get(viewer)) {
        reactions.viewer_liked = record.liked;
        reactions.viewer_disliked = !record.liked;
    }
    reactions
}

/// Whether `user`'s effective reaction is a like.
pub fn reacted_positively(likes: &[LikeRecord], user: &EntityId) -> bool {
    derive(likes, Some(user)).viewer_liked
}

pub fn is_owner(owner: &EntityId, viewer: Option<&EntityId>) -> bool {
    viewer.is_some_and(|viewer| viewer == owner)
}

pub fn is_subscribed<'a>(
    subscribers: impl IntoIterator<Item = &'a EntityId>,
    viewer: Option<&EntityId>,
) -> bool {
    let Some(viewer) = viewer else {
        return false;
    };
    subscribers.into_iter().any(|subscriber| subscriber == viewer)
}
