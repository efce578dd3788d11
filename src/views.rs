//! Response view models and the assemblers that build them.
//!
//! Every assembler follows the same shape: run the root query, batch-load
//! related rows (owners, likes, subscriber edges), join them with
//! [`join_one`]/[`join_many`], derive viewer-relative fields and project into
//! one of the structs below. Nothing here writes to the store.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::id::EntityId;
use crate::personalization::{Reactions, derive, is_owner, is_subscribed, reacted_positively};
use crate::pipeline::{Page, PageInfo, VideoFilter, VideoPipeline, join_many, join_one};
use crate::store::Store;
use crate::store::comments::CommentRecord;
use crate::store::likes::{LikeRecord, TargetKind};
use crate::store::tweets::TweetRecord;
use crate::store::users::{PublicProfile, UserRecord};
use crate::store::videos::VideoRecord;

/// Reaction fields shared by videos, comments and tweets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub total_likes: u64,
    pub total_dislikes: u64,
    pub is_liked: bool,
    pub is_disliked: bool,
}

impl From<Reactions> for ReactionSummary {
    fn from(reactions: Reactions) -> Self {
        Self {
            total_likes: reactions.likes,
            total_dislikes: reactions.dislikes,
            is_liked: reactions.viewer_liked,
            is_disliked: reactions.viewer_disliked,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCard {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub duration: f64,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub owner: PublicProfile,
    #[serde(flatten)]
    pub reactions: ReactionSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoList {
    pub videos: Vec<VideoCard>,
    #[serde(flatten)]
    pub page: PageInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOwner {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub username: String,
    pub full_name: String,
    pub avatar: String,
    pub subscribers_count: u64,
    pub is_subscribed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetail {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: ChannelOwner,
    #[serde(flatten)]
    pub reactions: ReactionSummary,
}

/// Video joined to its owner, without reactions.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub created_at: DateTime<Utc>,
    pub owner: PublicProfile,
}

impl VideoSummary {
    fn project(video: VideoRecord, owner: PublicProfile) -> Self {
        Self {
            id: video.id,
            video_file: video.video_file,
            thumbnail: video.thumbnail,
            title: video.title,
            description: video.description,
            duration: video.duration,
            views: video.views,
            created_at: video.created_at,
            owner,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: PublicProfile,
    #[serde(flatten)]
    pub reactions: ReactionSummary,
    pub is_liked_by_video_owner: bool,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentList {
    pub comments: Vec<CommentView>,
    #[serde(flatten)]
    pub page: PageInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetView {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: PublicProfile,
    #[serde(flatten)]
    pub reactions: ReactionSummary,
    pub is_owner: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProfile {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub username: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: String,
    pub email: String,
    pub subscribers_count: u64,
    pub channels_subscribed_to_count: u64,
    pub is_subscribed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberEntry {
    pub subscriber: PublicProfile,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribersView {
    pub subscribers: Vec<SubscriberEntry>,
    pub subscribers_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedChannelEntry {
    pub channel: PublicProfile,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedChannelsView {
    pub channels: Vec<SubscribedChannelEntry>,
    pub channels_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistDetail {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner: PublicProfile,
    pub videos: Vec<VideoSummary>,
    pub total_videos: usize,
    pub total_views: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistCard {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_videos: usize,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistMembership {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub name: String,
    pub is_video_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatsView {
    pub owner_name: String,
    pub total_views: i64,
    pub total_videos: i64,
    pub total_subscribers: i64,
    pub total_likes: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardVideo {
    #[serde(rename = "_id")]
    pub id: EntityId,
    pub video_file: String,
    pub thumbnail: String,
    pub title: String,
    pub description: String,
    pub duration: f64,
    pub views: i64,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_likes: u64,
    pub total_dislikes: u64,
    pub total_comments: i64,
}

fn owner_ids<'a, T: 'a>(rows: impl IntoIterator<Item = &'a T>, owner: impl Fn(&T) -> &EntityId) -> Vec<EntityId> {
    rows.into_iter().map(|row| owner(row).clone()).collect()
}

fn reactions_for(
    likes: &HashMap<EntityId, Vec<LikeRecord>>,
    target: &EntityId,
    viewer: Option<&EntityId>,
) -> Reactions {
    likes
        .get(target)
        .map(|records| derive(records, viewer))
        .unwrap_or_default()
}

/// Owner and reaction join for a page of videos.
async fn video_cards(
    store: &Store,
    videos: Vec<VideoRecord>,
    viewer: Option<&EntityId>,
) -> Result<Vec<VideoCard>> {
    let owners = store
        .public_profiles(&owner_ids(&videos, |video| &video.owner))
        .await?;
    let ids: Vec<EntityId> = videos.iter().map(|video| video.id.clone()).collect();
    let likes = store.likes_for(TargetKind::Video, &ids).await?;

    let joined = join_one(videos, &owners, |video| &video.owner);
    let joined = join_many(joined, &likes, |(video, _)| &video.id);
    Ok(joined
        .into_iter()
        .map(|((video, owner), likes)| VideoCard {
            reactions: derive(&likes, viewer).into(),
            id: video.id,
            video_file: video.video_file,
            thumbnail: video.thumbnail,
            title: video.title,
            duration: video.duration,
            views: video.views,
            created_at: video.created_at,
            owner,
        })
        .collect())
}

/// Paged list of published videos shaped by `pipeline`.
pub async fn list_videos(
    store: &Store,
    pipeline: VideoPipeline,
    viewer: Option<&EntityId>,
) -> Result<VideoList> {
    let page = pipeline.requested_page().unwrap_or_default();
    let pipeline = pipeline
        .filter(VideoFilter::Published(true))
        .filter(VideoFilter::OwnerExists)
        .page(page);
    let (videos, total) = store.query_videos(&pipeline).await?;
    Ok(VideoList {
        videos: video_cards(store, videos, viewer).await?,
        page: PageInfo::new(page, total),
    })
}

/// A single published video with channel block. `None` covers unknown ids,
/// unpublished videos and videos whose owner no longer exists.
pub async fn video_detail(
    store: &Store,
    id: &EntityId,
    viewer: Option<&EntityId>,
) -> Result<Option<VideoDetail>> {
    let pipeline = VideoPipeline::new()
        .filter(VideoFilter::Id(id.clone()))
        .filter(VideoFilter::Published(true));
    let (mut videos, _) = store.query_videos(&pipeline).await?;
    let Some(video) = videos.pop() else {
        return Ok(None);
    };
    let Some(owner) = store.public_profiles(std::slice::from_ref(&video.owner)).await?.remove(&video.owner) else {
        return Ok(None);
    };

    let likes = store.likes_for(TargetKind::Video, std::slice::from_ref(&video.id)).await?;
    let subscribers = store.subscribers_of(&video.owner).await?;
    let subscriber_ids = subscribers.iter().map(|edge| &edge.subscriber);

    Ok(Some(VideoDetail {
        reactions: reactions_for(&likes, &video.id, viewer).into(),
        owner: ChannelOwner {
            is_subscribed: is_subscribed(subscriber_ids, viewer),
            subscribers_count: subscribers.len() as u64,
            id: owner.id,
            username: owner.username,
            full_name: owner.full_name,
            avatar: owner.avatar,
        },
        id: video.id,
        video_file: video.video_file,
        thumbnail: video.thumbnail,
        title: video.title,
        description: video.description,
        duration: video.duration,
        views: video.views,
        is_published: video.is_published,
        created_at: video.created_at,
        updated_at: video.updated_at,
    }))
}

fn comment_views(
    comments: Vec<CommentRecord>,
    owners: &HashMap<EntityId, PublicProfile>,
    likes: &HashMap<EntityId, Vec<LikeRecord>>,
    video_owner: &EntityId,
    viewer: Option<&EntityId>,
) -> Vec<CommentView> {
    let joined = join_one(comments, owners, |comment| &comment.owner);
    join_many(joined, likes, |(comment, _)| &comment.id)
        .into_iter()
        .map(|((comment, owner), likes)| CommentView {
            reactions: derive(&likes, viewer).into(),
            is_liked_by_video_owner: reacted_positively(&likes, video_owner),
            is_owner: is_owner(&comment.owner, viewer),
            id: comment.id,
            content: comment.content,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            owner,
        })
        .collect()
}

/// Comments on a video, newest first. `None` when the video does not exist.
pub async fn video_comments(
    store: &Store,
    video: &EntityId,
    page: Page,
    viewer: Option<&EntityId>,
) -> Result<Option<CommentList>> {
    let Some(video) = store.video_by_id(video).await? else {
        return Ok(None);
    };
    let (comments, total) = store.comments_for_video(&video.id, page).await?;
    let owners = store
        .public_profiles(&owner_ids(&comments, |comment| &comment.owner))
        .await?;
    let ids: Vec<EntityId> = comments.iter().map(|comment| comment.id.clone()).collect();
    let likes = store.likes_for(TargetKind::Comment, &ids).await?;

    Ok(Some(CommentList {
        comments: comment_views(comments, &owners, &likes, &video.owner, viewer),
        page: PageInfo::new(page, total),
    }))
}

/// Single comment projection, used after create and update.
pub async fn comment_view(
    store: &Store,
    comment: CommentRecord,
    viewer: Option<&EntityId>,
) -> Result<Option<CommentView>> {
    let video_owner = store
        .video_by_id(&comment.video)
        .await?
        .map(|video| video.owner)
        .unwrap_or_else(|| comment.owner.clone());
    let owners = store
        .public_profiles(std::slice::from_ref(&comment.owner))
        .await?;
    let likes = store
        .likes_for(TargetKind::Comment, std::slice::from_ref(&comment.id))
        .await?;
    Ok(comment_views(vec![comment], &owners, &likes, &video_owner, viewer).pop())
}

fn tweet_views(
    tweets: Vec<TweetRecord>,
    owners: &HashMap<EntityId, PublicProfile>,
    likes: &HashMap<EntityId, Vec<LikeRecord>>,
    viewer: Option<&EntityId>,
) -> Vec<TweetView> {
    let joined = join_one(tweets, owners, |tweet| &tweet.owner);
    join_many(joined, likes, |(tweet, _)| &tweet.id)
        .into_iter()
        .map(|((tweet, owner), likes)| TweetView {
            reactions: derive(&likes, viewer).into(),
            is_owner: is_owner(&tweet.owner, viewer),
            id: tweet.id,
            content: tweet.content,
            created_at: tweet.created_at,
            updated_at: tweet.updated_at,
            owner,
        })
        .collect()
}

/// A user's tweets, newest first. Unknown users yield an empty list.
pub async fn user_tweets(
    store: &Store,
    user: &EntityId,
    viewer: Option<&EntityId>,
) -> Result<Vec<TweetView>> {
    let tweets = store.tweets_by_owner(user).await?;
    if tweets.is_empty() {
        return Ok(Vec::new());
    }
    let owners = store.public_profiles(std::slice::from_ref(user)).await?;
    let ids: Vec<EntityId> = tweets.iter().map(|tweet| tweet.id.clone()).collect();
    let likes = store.likes_for(TargetKind::Tweet, &ids).await?;
    Ok(tweet_views(tweets, &owners, &likes, viewer))
}

pub async fn tweet_view(
    store: &Store,
    tweet: TweetRecord,
    viewer: Option<&EntityId>,
) -> Result<Option<TweetView>> {
    let owners = store
        .public_profiles(std::slice::from_ref(&tweet.owner))
        .await?;
    let likes = store
        .likes_for(TargetKind::Tweet, std::slice::from_ref(&tweet.id))
        .await?;
    Ok(tweet_views(vec![tweet], &owners, &likes, viewer).pop())
}

/// Public channel page looked up by handle (case-insensitive).
pub async fn channel_profile(
    store: &Store,
    username: &str,
    viewer: Option<&EntityId>,
) -> Result<Option<ChannelProfile>> {
    let Some(user) = store.user_by_username(username).await? else {
        return Ok(None);
    };
    let subscribers = store.subscribers_of(&user.id).await?;
    let subscribed_to = store.subscribed_count(&user.id).await?;
    Ok(Some(ChannelProfile {
        is_subscribed: is_subscribed(subscribers.iter().map(|edge| &edge.subscriber), viewer),
        subscribers_count: subscribers.len() as u64,
        channels_subscribed_to_count: subscribed_to.max(0) as u64,
        id: user.id,
        username: user.username,
        full_name: user.full_name,
        avatar: user.avatar,
        cover_image: user.cover_image,
        email: user.email,
    }))
}

/// Joins an ordered list of video ids to videos and owners, skipping
/// dangling references (and unpublished videos when `published_only`).
async fn ordered_summaries(
    store: &Store,
    ids: &[EntityId],
    published_only: bool,
) -> Result<Vec<VideoSummary>> {
    let videos = store.videos_by_ids(ids).await?;
    let resolved: Vec<VideoRecord> = ids
        .iter()
        .filter_map(|id| videos.get(id).cloned())
        .filter(|video| !published_only || video.is_published)
        .collect();

    let owners = store
        .public_profiles(&owner_ids(&resolved, |video| &video.owner))
        .await?;
    Ok(join_one(resolved, &owners, |video| &video.owner)
        .into_iter()
        .map(|(video, owner)| VideoSummary::project(video, owner))
        .collect())
}

pub async fn watch_history(store: &Store, user: &EntityId) -> Result<Vec<VideoSummary>> {
    let ids = store.watch_history(user).await?;
    ordered_summaries(store, &ids, false).await
}

/// Published videos the user liked, most recent like first.
pub async fn liked_videos(store: &Store, user: &EntityId) -> Result<Vec<VideoSummary>> {
    let ids = store.liked_video_ids(user).await?;
    ordered_summaries(store, &ids, true).await
}

pub async fn channel_subscribers(store: &Store, channel: &EntityId) -> Result<SubscribersView> {
    let edges = store.subscribers_of(channel).await?;
    let profiles = store
        .public_profiles(&owner_ids(&edges, |edge| &edge.subscriber))
        .await?;
    let subscribers: Vec<SubscriberEntry> = join_one(edges, &profiles, |edge| &edge.subscriber)
        .into_iter()
        .map(|(edge, subscriber)| SubscriberEntry {
            subscriber,
            subscribed_at: edge.created_at,
        })
        .collect();
    Ok(SubscribersView {
        subscribers_count: subscribers.len(),
        subscribers,
    })
}

pub async fn subscribed_channels(
    store: &Store,
    subscriber: &EntityId,
) -> Result<SubscribedChannelsView> {
    let edges = store.subscriptions_of(subscriber).await?;
    let profiles = store
        .public_profiles(&owner_ids(&edges, |edge| &edge.channel))
        .await?;
    let channels: Vec<SubscribedChannelEntry> = join_one(edges, &profiles, |edge| &edge.channel)
        .into_iter()
        .map(|(edge, channel)| SubscribedChannelEntry {
            channel,
            subscribed_at: edge.created_at,
        })
        .collect();
    Ok(SubscribedChannelsView {
        channels_count: channels.len(),
        channels,
    })
}

pub async fn playlist_detail(store: &Store, playlist: &EntityId) -> Result<Option<PlaylistDetail>> {
    let Some(playlist) = store.playlist_by_id(playlist).await? else {
        return Ok(None);
    };
    let Some(owner) = store
        .public_profiles(std::slice::from_ref(&playlist.owner))
        .await?
        .remove(&playlist.owner)
    else {
        return Ok(None);
    };
    let ids = store.playlist_video_ids(&playlist.id).await?;
    let videos = ordered_summaries(store, &ids, true).await?;
    Ok(Some(PlaylistDetail {
        total_videos: videos.len(),
        total_views: videos.iter().map(|video| video.views).sum(),
        id: playlist.id,
        name: playlist.name,
        description: playlist.description,
        created_at: playlist.created_at,
        updated_at: playlist.updated_at,
        owner,
        videos,
    }))
}

/// A user's playlists with the count of published videos and the first
/// video's thumbnail.
pub async fn user_playlists(store: &Store, user: &EntityId) -> Result<Vec<PlaylistCard>> {
    let playlists = store.playlists_by_owner(user).await?;
    let ids: Vec<EntityId> = playlists.iter().map(|playlist| playlist.id.clone()).collect();
    let members = store.playlist_video_ids_for(&ids).await?;
    let all_videos: Vec<EntityId> = members.values().flatten().cloned().collect();
    let videos = store.videos_by_ids(&all_videos).await?;

    Ok(join_many(playlists, &members, |playlist| &playlist.id)
        .into_iter()
        .map(|(playlist, video_ids)| {
            let published: Vec<&VideoRecord> = video_ids
                .iter()
                .filter_map(|id| videos.get(id))
                .filter(|video| video.is_published)
                .collect();
            PlaylistCard {
                total_videos: published.len(),
                thumbnail: published.first().map(|video| video.thumbnail.clone()),
                id: playlist.id,
                name: playlist.name,
                description: playlist.description,
                created_at: playlist.created_at,
                updated_at: playlist.updated_at,
            }
        })
        .collect())
}

/// The caller's playlists, each flagged with whether `video` is in it.
pub async fn playlists_for_video(
    store: &Store,
    user: &EntityId,
    video: &EntityId,
) -> Result<Vec<PlaylistMembership>> {
    let playlists = store.playlists_by_owner(user).await?;
    let ids: Vec<EntityId> = playlists.iter().map(|playlist| playlist.id.clone()).collect();
    let members = store.playlist_video_ids_for(&ids).await?;
    Ok(join_many(playlists, &members, |playlist| &playlist.id)
        .into_iter()
        .map(|(playlist, video_ids)| PlaylistMembership {
            is_video_present: video_ids.contains(video),
            id: playlist.id,
            name: playlist.name,
        })
        .collect())
}

pub async fn channel_stats(store: &Store, user: &UserRecord) -> Result<ChannelStatsView> {
    let stats = store.channel_stats(&user.id).await?;
    Ok(ChannelStatsView {
        owner_name: user.full_name.clone(),
        total_views: stats.total_views,
        total_videos: stats.total_videos,
        total_subscribers: stats.total_subscribers,
        total_likes: stats.total_likes,
    })
}

/// Every video of the caller, unpublished included, newest first.
pub async fn channel_videos(store: &Store, owner: &EntityId) -> Result<Vec<DashboardVideo>> {
    let videos = store.channel_videos(owner).await?;
    let ids: Vec<EntityId> = videos.iter().map(|video| video.id.clone()).collect();
    let likes = store.likes_for(TargetKind::Video, &ids).await?;
    let comments = store.comment_counts(&ids).await?;

    Ok(join_many(videos, &likes, |video| &video.id)
        .into_iter()
        .map(|(video, likes)| {
            let reactions = derive(&likes, None);
            DashboardVideo {
                total_comments: comments.get(&video.id).copied().unwrap_or(0),
                total_likes: reactions.likes,
                total_dislikes: reactions.dislikes,
                id: video.id,
                video_file: video.video_file,
                thumbnail: video.thumbnail,
                title: video.title,
                description: video.description,
                duration: video.duration,
                views: video.views,
                is_published: video.is_published,
                created_at: video.created_at,
                updated_at: video.updated_at,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SearchTerms;
    use crate::store::test_support::temp_store;
    use crate::store::users::fixtures::seed_user;
    use crate::store::videos::fixtures::seed_video;
    use anyhow::Context;

    #[tokio::test]
    async fn like_toggle_scenario_is_visible_in_detail() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let alice = seed_user(&store, "alice").await?;
        let bob = seed_user(&store, "bob").await?;
        let video = seed_video(&store, &alice.id, "Alice's video").await?;

        store
            .toggle_reaction(&bob.id, TargetKind::Video, &video.id, true)
            .await?;
        let detail = video_detail(&store, &video.id, Some(&bob.id))
            .await?
            .context("detail")?;
        assert!(detail.reactions.is_liked);
        assert!(!detail.reactions.is_disliked);
        assert_eq!(detail.reactions.total_likes, 1);

        store
            .toggle_reaction(&bob.id, TargetKind::Video, &video.id, true)
            .await?;
        let detail = video_detail(&store, &video.id, Some(&bob.id))
            .await?
            .context("detail")?;
        assert!(!detail.reactions.is_liked);
        assert_eq!(detail.reactions.total_likes, 0);
        Ok(())
    }

    #[tokio::test]
    async fn detail_hides_unpublished_and_carries_channel_block() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let alice = seed_user(&store, "alice").await?;
        let bob = seed_user(&store, "bob").await?;
        let video = seed_video(&store, &alice.id, "Channel").await?;
        store.toggle_subscription(&bob.id, &alice.id).await?;

        let detail = video_detail(&store, &video.id, Some(&bob.id))
            .await?
            .context("detail")?;
        assert_eq!(detail.owner.subscribers_count, 1);
        assert!(detail.owner.is_subscribed);
        let anonymous = video_detail(&store, &video.id, None)
            .await?
            .context("detail")?;
        assert!(!anonymous.owner.is_subscribed);

        let json = serde_json::to_value(&detail)?;
        assert_eq!(json["_id"], video.id.as_str());
        assert_eq!(json["owner"]["username"], "alice");
        assert_eq!(json["totalLikes"], 0);
        assert!(json["owner"].get("email").is_none());

        store.toggle_published(&video.id).await?;
        assert!(video_detail(&store, &video.id, None).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_drops_videos_with_missing_owner_and_pages() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let alice = seed_user(&store, "alice").await?;
        seed_video(&store, &alice.id, "kept one").await?;
        seed_video(&store, &alice.id, "kept two").await?;
        seed_video(&store, &EntityId::generate(), "orphan").await?;

        let list = list_videos(&store, VideoPipeline::new().page(Page::default()), None).await?;
        assert_eq!(list.videos.len(), 2);
        assert!(list.videos.iter().all(|card| card.owner.id == alice.id));
        assert_eq!(list.videos[0].title, "kept two");
        assert_eq!(list.page.total_docs, 2);
        assert_eq!(list.page.total_pages, 1);

        let json = serde_json::to_value(&list)?;
        assert!(json["videos"].is_array());
        assert_eq!(json["page"], 1);
        assert_eq!(json["limit"], 10);

        let searched = list_videos(
            &store,
            VideoPipeline::new().search(SearchTerms::parse("one")),
            None,
        )
        .await?;
        assert_eq!(searched.videos.len(), 1);
        assert_eq!(searched.page.total_docs, 1);
        Ok(())
    }

    #[tokio::test]
    async fn comment_views_flag_owner_and_creator_likes() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let creator = seed_user(&store, "creator").await?;
        let fan = seed_user(&store, "fan").await?;
        let video = seed_video(&store, &creator.id, "Talk").await?;
        let comment = store.insert_comment(&video.id, &fan.id, "great").await?;
        store
            .toggle_reaction(&creator.id, TargetKind::Comment, &comment.id, true)
            .await?;

        let list = video_comments(&store, &video.id, Page::default(), Some(&fan.id))
            .await?
            .context("comments")?;
        assert_eq!(list.comments.len(), 1);
        let view = &list.comments[0];
        assert!(view.is_liked_by_video_owner);
        assert!(view.is_owner);
        assert!(!view.reactions.is_liked);
        assert_eq!(view.reactions.total_likes, 1);

        assert!(
            video_comments(&store, &EntityId::generate(), Page::default(), None)
                .await?
                .is_none()
        );
        Ok(())
    }

    #[tokio::test]
    async fn subscription_round_trip_restores_profile() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let viewer = seed_user(&store, "viewer").await?;
        let creator = seed_user(&store, "creator").await?;
        let before = channel_profile(&store, "Creator", Some(&viewer.id))
            .await?
            .context("profile")?;

        store.toggle_subscription(&viewer.id, &creator.id).await?;
        let during = channel_profile(&store, "creator", Some(&viewer.id))
            .await?
            .context("profile")?;
        assert!(during.is_subscribed);
        assert_eq!(during.subscribers_count, before.subscribers_count + 1);

        store.toggle_subscription(&viewer.id, &creator.id).await?;
        let after = channel_profile(&store, "creator", Some(&viewer.id))
            .await?
            .context("profile")?;
        assert!(!after.is_subscribed);
        assert_eq!(after.subscribers_count, before.subscribers_count);

        let viewer_profile = channel_profile(&store, "viewer", None)
            .await?
            .context("profile")?;
        assert_eq!(viewer_profile.channels_subscribed_to_count, 0);
        assert!(channel_profile(&store, "ghost", None).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn history_and_liked_videos_skip_dangling_refs() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let viewer = seed_user(&store, "viewer").await?;
        let first = seed_video(&store, &owner.id, "first").await?;
        let second = seed_video(&store, &owner.id, "second").await?;
        store.record_watch(&viewer.id, &second.id).await?;
        store.record_watch(&viewer.id, &EntityId::generate()).await?;
        store.record_watch(&viewer.id, &first.id).await?;

        let history = watch_history(&store, &viewer.id).await?;
        let titles: Vec<_> = history.iter().map(|video| video.title.as_str()).collect();
        assert_eq!(titles, vec!["second", "first"]);
        assert_eq!(history[0].owner.username, "owner");

        store
            .toggle_reaction(&viewer.id, TargetKind::Video, &first.id, true)
            .await?;
        store
            .toggle_reaction(&viewer.id, TargetKind::Video, &second.id, true)
            .await?;
        store.toggle_published(&first.id).await?;
        let liked = liked_videos(&store, &viewer.id).await?;
        assert_eq!(liked.len(), 1);
        assert_eq!(liked[0].id, second.id);
        Ok(())
    }

    #[tokio::test]
    async fn playlist_views_count_published_videos() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let shown = seed_video(&store, &owner.id, "shown").await?;
        let hidden = seed_video(&store, &owner.id, "hidden").await?;
        store.toggle_published(&hidden.id).await?;
        store.increment_views(&shown.id).await?;
        let playlist = store.create_playlist(&owner.id, "Mix", "").await?;
        let empty = store.create_playlist(&owner.id, "Empty", "").await?;
        store.add_video_to_playlist(&playlist.id, &shown.id).await?;
        store.add_video_to_playlist(&playlist.id, &hidden.id).await?;

        let detail = playlist_detail(&store, &playlist.id)
            .await?
            .context("playlist")?;
        assert_eq!(detail.total_videos, 1);
        assert_eq!(detail.total_views, 1);
        assert_eq!(detail.owner.id, owner.id);

        let cards = user_playlists(&store, &owner.id).await?;
        assert_eq!(cards.len(), 2);
        let mix = cards.iter().find(|card| card.id == playlist.id).context("mix")?;
        assert_eq!(mix.thumbnail.as_deref(), Some(shown.thumbnail.as_str()));
        let blank = cards.iter().find(|card| card.id == empty.id).context("empty")?;
        assert_eq!(blank.total_videos, 0);
        assert!(blank.thumbnail.is_none());

        let membership = playlists_for_video(&store, &owner.id, &shown.id).await?;
        assert_eq!(
            membership
                .iter()
                .filter(|entry| entry.is_video_present)
                .count(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn dashboard_views() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let owner = seed_user(&store, "owner").await?;
        let fan = seed_user(&store, "fan").await?;

        let empty = channel_stats(&store, &owner).await?;
        assert_eq!(empty.total_views, 0);
        assert_eq!(empty.total_videos, 0);
        assert_eq!(empty.total_subscribers, 0);
        assert_eq!(empty.total_likes, 0);
        assert_eq!(empty.owner_name, owner.full_name);

        let video = seed_video(&store, &owner.id, "dash").await?;
        store.toggle_published(&video.id).await?;
        store.insert_comment(&video.id, &fan.id, "hi").await?;
        store
            .toggle_reaction(&fan.id, TargetKind::Video, &video.id, false)
            .await?;

        let videos = channel_videos(&store, &owner.id).await?;
        assert_eq!(videos.len(), 1);
        assert!(!videos[0].is_published);
        assert_eq!(videos[0].total_comments, 1);
        assert_eq!(videos[0].total_dislikes, 1);
        assert_eq!(videos[0].total_likes, 0);
        Ok(())
    }

    #[tokio::test]
    async fn subscriber_lists_join_profiles() -> Result<()> {
        let (_dir, store) = temp_store().await?;
        let creator = seed_user(&store, "creator").await?;
        let fan = seed_user(&store, "fan").await?;
        store.toggle_subscription(&fan.id, &creator.id).await?;
        store
            .toggle_subscription(&EntityId::generate(), &creator.id)
            .await?;

        let subscribers = channel_subscribers(&store, &creator.id).await?;
        assert_eq!(subscribers.subscribers_count, 1);
        assert_eq!(subscribers.subscribers[0].subscriber.username, "fan");

        let channels = subscribed_channels(&store, &fan.id).await?;
        assert_eq!(channels.channels_count, 1);
        assert_eq!(channels.channels[0].channel.id, creator.id);
        Ok(())
    }
}
