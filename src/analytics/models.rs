use std::fmt;

use chrono::NaiveDate;

/// Number of metrics reported per video.
pub(crate) const METRIC_COUNT: usize = 7;

/// Metric names in the order they are requested and stored.
pub(crate) const METRICS: [&str; METRIC_COUNT] = [
    "views",
    "comments",
    "favoritesAdded",
    "favoritesRemoved",
    "likes",
    "dislikes",
    "shares",
];

/// A single reported metric. The discriminant is the metric's column position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Metric {
    Views = 0,
    Comments = 1,
    FavoritesAdded = 2,
    FavoritesRemoved = 3,
    Likes = 4,
    Dislikes = 5,
    Shares = 6,
}

impl Metric {
    pub(crate) const ALL: [Metric; METRIC_COUNT] = [
        Metric::Views,
        Metric::Comments,
        Metric::FavoritesAdded,
        Metric::FavoritesRemoved,
        Metric::Likes,
        Metric::Dislikes,
        Metric::Shares,
    ];

    /// The API and column name of the metric.
    pub(crate) fn name(self) -> &'static str {
        METRICS[self as usize]
    }

    /// Looks a metric up by its API name.
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|metric| metric.name() == name)
    }
}

/// A (channel, video) pair waiting to be reported on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct VideoRef {
    channel_id: String,
    video_id: String,
}

impl VideoRef {
    pub(crate) fn new(channel_id: impl Into<String>, video_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            video_id: video_id.into(),
        }
    }

    pub(crate) fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub(crate) fn video_id(&self) -> &str {
        &self.video_id
    }
}

impl fmt::Display for VideoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "video {} in channel {}", self.video_id, self.channel_id)
    }
}

/// Metric values in [`METRICS`] order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct MetricSet {
    values: [f64; METRIC_COUNT],
}

impl MetricSet {
    pub(crate) fn new(values: [f64; METRIC_COUNT]) -> Self {
        Self { values }
    }

    pub(crate) fn get(&self, metric: Metric) -> f64 {
        self.values[metric as usize]
    }

    pub(crate) fn set(&mut self, metric: Metric, value: f64) {
        self.values[metric as usize] = value;
    }

    /// Values in column order.
    pub(crate) fn values(&self) -> &[f64; METRIC_COUNT] {
        &self.values
    }
}

/// A successful report for one video.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReportRow {
    pub(crate) video_id: String,
    pub(crate) metrics: MetricSet,
}

/// A row of the `video_analytics` table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StoredRecord {
    pub(crate) date: NaiveDate,
    pub(crate) video_id: String,
    pub(crate) metrics: MetricSet,
}
