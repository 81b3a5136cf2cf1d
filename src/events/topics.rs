use serde::Serialize;

/// Occupancy of one topic, as reported by [`EventBus::topics`](crate::EventBus::topics).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopicInfo {
    /// Topic name.
    pub topic: String,
    /// Allocated capacity of the topic's subscriber list.
    pub cap: usize,
    /// Number of subscriptions on the topic.
    pub len: usize,
}

#[derive(Serialize)]
pub(crate) struct TopicsReport {
    #[serde(rename = "Topics")]
    pub(crate) topics: Vec<TopicInfo>,
}
