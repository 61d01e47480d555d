use std::collections::HashMap;

use crate::config::TopicMapping;

use super::message::ChannelIdentifier;

/// Maps external channel class names to internal topics and back.
///
/// Names with no mapping pass through unchanged in both directions.
#[derive(Debug, Clone, Default)]
pub struct TopicMap {
    to_topic: HashMap<String, String>,
    to_channel: HashMap<String, String>,
}

impl TopicMap {
    pub fn new(mappings: &[TopicMapping]) -> Self {
        let mut map = Self::default();
        for mapping in mappings {
            map.to_topic
                .insert(mapping.channel.clone(), mapping.topic.clone());
            // First mapping wins when several channels share a topic
            map.to_channel
                .entry(mapping.topic.clone())
                .or_insert_with(|| mapping.channel.clone());
        }
        map
    }

    pub fn topic_for<'a>(&'a self, channel: &'a str) -> &'a str {
        self.to_topic.get(channel).map(String::as_str).unwrap_or(channel)
    }

    pub fn channel_for<'a>(&'a self, topic: &'a str) -> &'a str {
        self.to_channel.get(topic).map(String::as_str).unwrap_or(topic)
    }

    /// Identifier string used on data frames for `topic`
    pub fn identifier_for(&self, topic: &str) -> String {
        ChannelIdentifier::new(self.channel_for(topic)).encode()
    }
}
