//! Story listing: owner resolution, skipped-story expansion and filtering.

use std::collections::HashMap;

use serde::Serialize;

use crate::{domain::PeerId, ports::TelegramClient};

pub const MEDIA_PHOTO: &str = "MessageMediaPhoto";
pub const MEDIA_DOCUMENT: &str = "MessageMediaDocument";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: i32,
    pub date: i64,
    pub expire_date: i64,
    pub caption: Option<String>,
    pub media_class: Option<String>,
    pub pinned: bool,
}

/// A story as delivered by the server. Summaries only carry `Skipped` entries
/// for stories the client has not loaded yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoryItem {
    Full(Story),
    Skipped { id: i32, date: i64, expire_date: i64 },
    Deleted { id: i32 },
}

impl StoryItem {
    pub fn id(&self) -> i32 {
        match self {
            StoryItem::Full(s) => s.id,
            StoryItem::Skipped { id, .. } | StoryItem::Deleted { id } => *id,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StoryItem::Skipped { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerStories {
    pub peer: PeerId,
    pub stories: Vec<StoryItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryChat {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
    pub class_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryUser {
    pub id: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// Summary of every peer with active stories, plus the entities it references.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AllStories {
    pub peer_stories: Vec<PeerStories>,
    pub chats: Vec<StoryChat>,
    pub users: Vec<StoryUser>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    Channel,
    User,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryOwner {
    pub id: String,
    pub username: Option<String>,
    pub title: Option<String>,
    pub class_name: Option<String>,
    pub kind: OwnerKind,
}

/// Flattened story row returned by `/stories`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRow {
    pub peer: StoryOwner,
    pub id: i32,
    pub date: Option<i64>,
    pub expire_date: Option<i64>,
    pub caption: Option<String>,
    pub media_class: Option<String>,
    pub is_photo: bool,
    pub is_video: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryListing {
    pub total: usize,
    pub items: Vec<StoryRow>,
    pub expanded: bool,
}

/// Replace skipped stories with full ones fetched by id, peer by peer.
///
/// Fetch failures (privacy, limits) leave that peer's skipped entries as-is.
pub async fn expand_skipped(client: &dyn TelegramClient, all: &mut AllStories) {
    for ps in &mut all.peer_stories {
        let skipped: Vec<i32> = ps
            .stories
            .iter()
            .filter(|s| s.is_skipped())
            .map(StoryItem::id)
            .collect();
        if skipped.is_empty() {
            continue;
        }

        match client.stories_by_id(ps.peer, &skipped).await {
            Ok(full) => {
                let by_id: HashMap<i32, StoryItem> =
                    full.into_iter().map(|s| (s.id(), s)).collect();
                for story in &mut ps.stories {
                    if story.is_skipped() {
                        if let Some(replacement) = by_id.get(&story.id()) {
                            *story = replacement.clone();
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(peer = ?ps.peer, "skipped story expansion failed: {e}");
            }
        }
    }
}

/// Flatten per-peer stories into rows with resolved owners.
pub fn normalize(all: &AllStories, expanded: bool) -> StoryListing {
    let chats: HashMap<i64, &StoryChat> = all.chats.iter().map(|c| (c.id, c)).collect();
    let users: HashMap<i64, &StoryUser> = all.users.iter().map(|u| (u.id, u)).collect();

    let total = all.peer_stories.iter().map(|ps| ps.stories.len()).sum();

    let mut items = Vec::with_capacity(total);
    for ps in &all.peer_stories {
        let owner = resolve_owner(ps.peer, &chats, &users);
        for story in &ps.stories {
            items.push(story_row(owner.clone(), story));
        }
    }

    StoryListing {
        total,
        items,
        expanded,
    }
}

fn resolve_owner(
    peer: PeerId,
    chats: &HashMap<i64, &StoryChat>,
    users: &HashMap<i64, &StoryUser>,
) -> StoryOwner {
    let id = peer.raw_id();
    let (chat, user) = match peer {
        PeerId::User(_) => (None, users.get(&id)),
        PeerId::Chat(_) | PeerId::Channel(_) => (chats.get(&id), None),
    };
    if let Some(c) = chat {
        return StoryOwner {
            id: id.to_string(),
            username: c.username.clone(),
            title: c.title.clone(),
            class_name: Some(c.class_name.clone().unwrap_or_else(|| "Channel".to_string())),
            kind: OwnerKind::Channel,
        };
    }
    if let Some(u) = user {
        let title = [u.first_name.as_deref(), u.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        return StoryOwner {
            id: id.to_string(),
            username: u.username.clone(),
            title: (!title.is_empty()).then_some(title),
            class_name: Some("User".to_string()),
            kind: OwnerKind::User,
        };
    }
    StoryOwner {
        id: id.to_string(),
        username: None,
        title: None,
        class_name: None,
        kind: OwnerKind::Unknown,
    }
}

fn story_row(peer: StoryOwner, story: &StoryItem) -> StoryRow {
    match story {
        StoryItem::Full(s) => {
            let media_class = s.media_class.clone();
            StoryRow {
                peer,
                id: s.id,
                date: Some(s.date),
                expire_date: Some(s.expire_date),
                caption: s.caption.clone().filter(|c| !c.is_empty()),
                is_photo: media_class.as_deref() == Some(MEDIA_PHOTO),
                is_video: media_class.as_deref() == Some(MEDIA_DOCUMENT),
                media_class,
            }
        }
        StoryItem::Skipped {
            id,
            date,
            expire_date,
        } => StoryRow {
            peer,
            id: *id,
            date: Some(*date),
            expire_date: Some(*expire_date),
            caption: None,
            media_class: None,
            is_photo: false,
            is_video: false,
        },
        StoryItem::Deleted { id } => StoryRow {
            peer,
            id: *id,
            date: None,
            expire_date: None,
            caption: None,
            media_class: None,
            is_photo: false,
            is_video: false,
        },
    }
}

/// Id-range and count filter used by `/stories/of`. Zero bounds mean "no bound".
pub fn filter_by_id(stories: Vec<StoryItem>, min_id: i32, max_id: i32, limit: usize) -> Vec<StoryItem> {
    let filtered = stories.into_iter().filter(|s| {
        let id = s.id();
        !(min_id != 0 && id < min_id) && !(max_id != 0 && id > max_id)
    });
    if limit == 0 {
        filtered.collect()
    } else {
        filtered.take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(id: i32, media: Option<&str>) -> StoryItem {
        StoryItem::Full(Story {
            id,
            date: 100 + id as i64,
            expire_date: 200 + id as i64,
            caption: Some(format!("story {id}")),
            media_class: media.map(str::to_string),
            pinned: false,
        })
    }

    fn skipped(id: i32) -> StoryItem {
        StoryItem::Skipped {
            id,
            date: 1,
            expire_date: 2,
        }
    }

    fn sample() -> AllStories {
        AllStories {
            peer_stories: vec![
                PeerStories {
                    peer: PeerId::Channel(10),
                    stories: vec![full(1, Some(MEDIA_PHOTO)), skipped(2)],
                },
                PeerStories {
                    peer: PeerId::User(20),
                    stories: vec![full(3, Some(MEDIA_DOCUMENT))],
                },
                PeerStories {
                    peer: PeerId::User(30),
                    stories: vec![StoryItem::Deleted { id: 4 }],
                },
            ],
            chats: vec![StoryChat {
                id: 10,
                title: Some("News".to_string()),
                username: Some("news".to_string()),
                class_name: None,
            }],
            users: vec![StoryUser {
                id: 20,
                first_name: Some("Ann".to_string()),
                last_name: Some("Lee".to_string()),
                username: None,
            }],
        }
    }

    #[test]
    fn normalize_resolves_owners_and_counts_all_stories() {
        let listing = normalize(&sample(), false);
        assert_eq!(listing.total, 4);
        assert_eq!(listing.items.len(), 4);

        let first = &listing.items[0];
        assert_eq!(first.peer.kind, OwnerKind::Channel);
        assert_eq!(first.peer.title.as_deref(), Some("News"));
        assert_eq!(first.peer.class_name.as_deref(), Some("Channel"));
        assert!(first.is_photo);
        assert!(!first.is_video);

        let user_story = &listing.items[2];
        assert_eq!(user_story.peer.kind, OwnerKind::User);
        assert_eq!(user_story.peer.title.as_deref(), Some("Ann Lee"));
        assert!(user_story.is_video);

        assert_eq!(listing.items[3].peer.kind, OwnerKind::Unknown);
        assert_eq!(listing.items[3].date, None);
    }

    #[test]
    fn owner_lookup_respects_peer_kind() {
        let mut all = sample();
        all.users.push(StoryUser {
            id: 10,
            first_name: Some("Bob".to_string()),
            last_name: None,
            username: Some("bob".to_string()),
        });
        all.peer_stories.push(PeerStories {
            peer: PeerId::User(10),
            stories: vec![full(5, None)],
        });

        let listing = normalize(&all, false);
        let channel = &listing.items[0].peer;
        assert_eq!(channel.kind, OwnerKind::Channel);
        assert_eq!(channel.title.as_deref(), Some("News"));

        let user = &listing.items.last().unwrap().peer;
        assert_eq!(user.kind, OwnerKind::User);
        assert_eq!(user.id, "10");
        assert_eq!(user.title.as_deref(), Some("Bob"));
        assert_eq!(user.username.as_deref(), Some("bob"));
    }

    #[test]
    fn filter_applies_bounds_then_limit() {
        let items = vec![full(1, None), full(5, None), full(7, None), full(9, None)];
        let ids = |v: Vec<StoryItem>| v.iter().map(StoryItem::id).collect::<Vec<_>>();

        assert_eq!(ids(filter_by_id(items.clone(), 0, 0, 0)), vec![1, 5, 7, 9]);
        assert_eq!(ids(filter_by_id(items.clone(), 5, 0, 0)), vec![5, 7, 9]);
        assert_eq!(ids(filter_by_id(items.clone(), 0, 7, 0)), vec![1, 5, 7]);
        assert_eq!(ids(filter_by_id(items, 2, 9, 2)), vec![5, 7]);
    }

    #[test]
    fn row_serializes_camel_case() {
        let listing = normalize(&sample(), true);
        let v = serde_json::to_value(&listing).unwrap();
        assert_eq!(v["expanded"], true);
        assert_eq!(v["items"][0]["mediaClass"], MEDIA_PHOTO);
        assert_eq!(v["items"][0]["peer"]["kind"], "channel");
        assert!(v["items"][0]["expireDate"].is_number());
    }
}
