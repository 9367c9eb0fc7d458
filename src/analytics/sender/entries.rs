//! Response bodies of the YouTube Data, YouTube Analytics and OAuth token endpoints.

use serde::Deserialize;
use serde_json::Value;

use crate::analytics::api::{ChannelSummary, PlaylistPage};
use crate::analytics::models::{Metric, MetricSet};

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelListEntry {
    #[serde(default)]
    pub(crate) items: Vec<ChannelEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelEntry {
    pub(crate) id: String,
    #[serde(rename = "contentDetails")]
    pub(crate) content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    pub(crate) related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RelatedPlaylists {
    pub(crate) uploads: Option<String>,
}

impl From<ChannelEntry> for ChannelSummary {
    fn from(entry: ChannelEntry) -> Self {
        ChannelSummary {
            uploads_playlist_id: entry
                .content_details
                .and_then(|details| details.related_playlists)
                .and_then(|playlists| playlists.uploads),
            id: entry.id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistItemListEntry {
    #[serde(default)]
    pub(crate) items: Vec<PlaylistItemEntry>,
    #[serde(rename = "nextPageToken")]
    pub(crate) next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistItemEntry {
    pub(crate) snippet: Option<PlaylistItemSnippet>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlaylistItemSnippet {
    #[serde(rename = "resourceId")]
    pub(crate) resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceId {
    #[serde(rename = "videoId")]
    pub(crate) video_id: Option<String>,
}

impl From<PlaylistItemListEntry> for PlaylistPage {
    fn from(entry: PlaylistItemListEntry) -> Self {
        // Items that are not videos (deleted, private placeholders) carry no video id.
        let video_ids = entry
            .items
            .into_iter()
            .filter_map(|item| item.snippet?.resource_id?.video_id)
            .collect();
        PlaylistPage {
            video_ids,
            next_page_token: entry.next_page_token.filter(|token| !token.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReportEntry {
    #[serde(rename = "columnHeaders", default)]
    pub(crate) column_headers: Vec<ColumnHeader>,
    #[serde(default)]
    pub(crate) rows: Option<Vec<Vec<Value>>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ColumnHeader {
    pub(crate) name: String,
}

impl ReportEntry {
    /// Maps the first row onto a [`MetricSet`] by column name.
    ///
    /// A report without rows means no activity that day and yields zeros.
    /// Columns that are not known metrics are ignored.
    pub(crate) fn metric_set(&self) -> Result<MetricSet, String> {
        let mut metrics = MetricSet::default();
        let Some(row) = self.rows.as_ref().and_then(|rows| rows.first()) else {
            return Ok(metrics);
        };

        if row.len() != self.column_headers.len() {
            return Err(format!(
                "report row has {} values for {} columns",
                row.len(),
                self.column_headers.len()
            ));
        }

        for (header, value) in self.column_headers.iter().zip(row) {
            let Some(metric) = Metric::from_name(&header.name) else {
                continue;
            };
            let number = value
                .as_f64()
                .ok_or_else(|| format!("metric {} is not a number: {}", header.name, value))?;
            metrics.set(metric, number);
        }
        Ok(metrics)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenEntry {
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) expires_in: Option<u64>,
}
