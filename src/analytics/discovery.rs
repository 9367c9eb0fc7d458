use crate::analytics::api::{ChannelSummary, VideoDirectory};
use crate::analytics::models::VideoRef;
use crate::analytics::queue::WorkQueue;

/// Largest page the playlist items endpoint will return.
pub(crate) const MAX_PAGE_SIZE: u32 = 50;

/// Videos found across the account's channels.
#[derive(Debug)]
pub(crate) struct Discovery {
    pub(crate) queue: WorkQueue,
    pub(crate) channels: usize,
    /// Channels whose enumeration stopped early because of an error.
    pub(crate) incomplete_channels: Vec<String>,
}

/// Walks every owned channel's uploads playlist and queues each video found.
///
/// A failing channel stops that channel's enumeration only; videos already found
/// for it stay queued and the remaining channels are still listed. A failure to
/// list the channels themselves yields an empty queue.
pub(crate) fn discover_videos<D>(directory: &D, page_size: u32) -> Discovery
where
    D: VideoDirectory + ?Sized,
{
    let queue = WorkQueue::new();
    let mut incomplete_channels = Vec::new();

    let channels = match directory.list_owned_channels() {
        Ok(channels) => channels,
        Err(e) => {
            error!("Unable to list the account's channels: {}", e);
            return Discovery {
                queue,
                channels: 0,
                incomplete_channels,
            };
        }
    };

    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    for channel in &channels {
        if !enqueue_channel_uploads(directory, channel, page_size, &queue) {
            incomplete_channels.push(channel.id.clone());
        }
    }

    info!(
        "Discovered {} videos in {} channels",
        queue.len(),
        channels.len()
    );

    Discovery {
        queue,
        channels: channels.len(),
        incomplete_channels,
    }
}

/// Returns `false` if the channel could not be fully enumerated.
fn enqueue_channel_uploads<D>(
    directory: &D,
    channel: &ChannelSummary,
    page_size: u32,
    queue: &WorkQueue,
) -> bool
where
    D: VideoDirectory + ?Sized,
{
    info!("Getting videos in channel id {}...", channel.id);
    let Some(uploads) = channel.uploads_playlist_id.as_deref() else {
        warn!("Channel {} has no uploads playlist, skipping it", channel.id);
        return true;
    };

    let mut page_token: Option<String> = None;
    loop {
        debug!(
            "Fetching {} with page token {}...",
            uploads,
            page_token.as_deref().unwrap_or("")
        );
        let page = match directory.list_playlist_items(uploads, page_token.as_deref(), page_size) {
            Ok(page) => page,
            Err(e) => {
                error!(
                    "Listing uploads of channel {} failed, skipping the rest of it: {}",
                    channel.id, e
                );
                return false;
            }
        };

        for video_id in page.video_ids {
            debug!("Found {} in channel {}", video_id, channel.id);
            queue.push(VideoRef::new(channel.id.clone(), video_id));
        }

        match page.next_page_token {
            Some(token) if !token.is_empty() => page_token = Some(token),
            _ => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use parking_lot::Mutex;

    use crate::analytics::api::{ApiError, PlaylistPage};

    /// Serves playlists as pre-split pages keyed by "<playlist>:<token>".
    #[derive(Default)]
    struct FakeDirectory {
        channels: Option<Vec<ChannelSummary>>,
        pages: HashMap<String, Result<PlaylistPage, ApiError>>,
        requests: Mutex<Vec<(String, Option<String>, u32)>>,
    }

    impl FakeDirectory {
        fn channel(mut self, id: &str, uploads: Option<&str>) -> Self {
            self.channels.get_or_insert_with(Vec::new).push(ChannelSummary {
                id: id.to_string(),
                uploads_playlist_id: uploads.map(str::to_string),
            });
            self
        }

        fn page(mut self, playlist: &str, token: &str, ids: &[&str], next: Option<&str>) -> Self {
            self.pages.insert(
                format!("{playlist}:{token}"),
                Ok(PlaylistPage {
                    video_ids: ids.iter().map(|id| id.to_string()).collect(),
                    next_page_token: next.map(str::to_string),
                }),
            );
            self
        }

        fn failing_page(mut self, playlist: &str, token: &str) -> Self {
            self.pages.insert(
                format!("{playlist}:{token}"),
                Err(ApiError::Transport("connection reset".to_string())),
            );
            self
        }
    }

    impl VideoDirectory for FakeDirectory {
        fn list_owned_channels(&self) -> Result<Vec<ChannelSummary>, ApiError> {
            self.channels
                .clone()
                .ok_or_else(|| ApiError::Transport("channels unavailable".to_string()))
        }

        fn list_playlist_items(
            &self,
            playlist_id: &str,
            page_token: Option<&str>,
            max_results: u32,
        ) -> Result<PlaylistPage, ApiError> {
            self.requests.lock().push((
                playlist_id.to_string(),
                page_token.map(str::to_string),
                max_results,
            ));
            let key = format!("{playlist_id}:{}", page_token.unwrap_or(""));
            self.pages
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Ok(PlaylistPage::default()))
        }
    }

    fn queued(discovery: &Discovery) -> HashSet<(String, String)> {
        discovery
            .queue
            .drain()
            .into_iter()
            .map(|v| (v.channel_id().to_string(), v.video_id().to_string()))
            .collect()
    }

    fn pair(channel: &str, video: &str) -> (String, String) {
        (channel.to_string(), video.to_string())
    }

    #[test]
    fn follows_page_tokens_until_exhausted() {
        let directory = FakeDirectory::default()
            .channel("c1", Some("UU1"))
            .page("UU1", "", &["a", "b"], Some("p2"))
            .page("UU1", "p2", &["c"], None);

        let discovery = discover_videos(&directory, 50);

        assert_eq!(discovery.channels, 1);
        assert!(discovery.incomplete_channels.is_empty());
        assert_eq!(
            queued(&discovery),
            HashSet::from([pair("c1", "a"), pair("c1", "b"), pair("c1", "c")])
        );
        let requests = directory.requests.lock();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], ("UU1".to_string(), Some("p2".to_string()), 50));
    }

    #[test]
    fn failing_channel_keeps_partial_results_and_other_channels() {
        let directory = FakeDirectory::default()
            .channel("c1", Some("UU1"))
            .channel("c2", Some("UU2"))
            .page("UU1", "", &["a"], Some("p2"))
            .failing_page("UU1", "p2")
            .page("UU2", "", &["x"], None);

        let discovery = discover_videos(&directory, 50);

        assert_eq!(discovery.incomplete_channels, vec!["c1".to_string()]);
        assert_eq!(
            queued(&discovery),
            HashSet::from([pair("c1", "a"), pair("c2", "x")])
        );
    }

    #[test]
    fn no_channels_gives_an_empty_queue() {
        let directory = FakeDirectory {
            channels: Some(Vec::new()),
            ..Default::default()
        };
        let discovery = discover_videos(&directory, 50);
        assert_eq!(discovery.channels, 0);
        assert!(discovery.queue.is_empty());
    }

    #[test]
    fn channel_listing_failure_is_not_fatal() {
        let directory = FakeDirectory::default();
        let discovery = discover_videos(&directory, 50);
        assert!(discovery.queue.is_empty());
        assert!(directory.requests.lock().is_empty());
    }

    #[test]
    fn channels_without_uploads_are_skipped() {
        let directory = FakeDirectory::default()
            .channel("c1", None)
            .channel("c2", Some("UU2"))
            .page("UU2", "", &["x"], Some(""));

        let discovery = discover_videos(&directory, 50);

        assert_eq!(queued(&discovery), HashSet::from([pair("c2", "x")]));
        assert!(discovery.incomplete_channels.is_empty());
    }

    #[test]
    fn page_size_is_clamped_to_the_api_maximum() {
        let directory = FakeDirectory::default().channel("c1", Some("UU1"));
        discover_videos(&directory, 500);
        assert_eq!(directory.requests.lock()[0].2, MAX_PAGE_SIZE);
    }
}
