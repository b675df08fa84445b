use crate::domain::{StdMessage, CATEGORY_EVENT, CATEGORY_TAGDATA};
use serde::Deserialize;

/// Category segment used when a message category is not recognised
pub const FALLBACK_CATEGORY: &str = "EdgeMessage";

/// Topic template configuration
#[derive(Clone, Debug, Deserialize)]
pub struct TopicConfig {
    /// Template with `<EQNAME>`, `<CATEGORY>` and `<TAGNAME>` placeholders
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_tag_data_category")]
    pub tag_data_category: String,
    #[serde(default = "default_event_category")]
    pub event_category: String,
}

fn default_template() -> String {
    "<EQNAME>/<CATEGORY>/<TAGNAME>".to_string()
}

fn default_tag_data_category() -> String {
    "EdgeTagChange".to_string()
}

fn default_event_category() -> String {
    "EdgeEvent".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            tag_data_category: default_tag_data_category(),
            event_category: default_event_category(),
        }
    }
}

/// Renders publish topics for standard messages
#[derive(Clone, Debug)]
pub struct TopicBuilder {
    config: TopicConfig,
}

impl TopicBuilder {
    pub fn new(config: TopicConfig) -> Self {
        Self { config }
    }

    /// Topic with every placeholder substituted
    pub fn topic(&self, msg: &StdMessage) -> String {
        let category = match msg.category.as_str() {
            CATEGORY_TAGDATA => self.config.tag_data_category.as_str(),
            CATEGORY_EVENT => self.config.event_category.as_str(),
            _ => FALLBACK_CATEGORY,
        };

        self.config
            .template
            .replace("<EQNAME>", &msg.owning_asset)
            .replace("<CATEGORY>", category)
            .replace("<TAGNAME>", &msg.item_name)
    }

    /// NATS subject for the topic: `/` separators become `.` and
    /// whitespace becomes `_`
    pub fn subject(&self, msg: &StdMessage) -> String {
        self.topic(msg)
            .chars()
            .map(|c| match c {
                '/' => '.',
                c if c.is_whitespace() => '_',
                c => c,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(asset: &str, category: &str, item: &str) -> StdMessage {
        StdMessage {
            owning_asset: asset.to_string(),
            item_name: item.to_string(),
            category: category.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tag_data_topic() {
        let builder = TopicBuilder::new(TopicConfig::default());
        assert_eq!(
            builder.topic(&msg("Filler01", "TAGDATA", "temp")),
            "Filler01/EdgeTagChange/temp"
        );
    }

    #[test]
    fn test_event_topic() {
        let builder = TopicBuilder::new(TopicConfig::default());
        assert_eq!(
            builder.topic(&msg("Filler01", "EVENT", "Overheat")),
            "Filler01/EdgeEvent/Overheat"
        );
    }

    #[test]
    fn test_unknown_category_uses_fallback() {
        let builder = TopicBuilder::new(TopicConfig::default());
        assert_eq!(
            builder.topic(&msg("Filler01", "ALARM", "door")),
            "Filler01/EdgeMessage/door"
        );
        assert_eq!(
            builder.topic(&msg("Filler01", "", "door")),
            "Filler01/EdgeMessage/door"
        );
    }

    #[test]
    fn test_custom_template_repeats_placeholders() {
        let builder = TopicBuilder::new(TopicConfig {
            template: "plant/<CATEGORY>/<EQNAME>/<TAGNAME>/<EQNAME>".to_string(),
            tag_data_category: "tags".to_string(),
            event_category: "events".to_string(),
        });
        assert_eq!(
            builder.topic(&msg("M1", "TAGDATA", "rpm")),
            "plant/tags/M1/rpm/M1"
        );
    }

    #[test]
    fn test_subject_mapping() {
        let builder = TopicBuilder::new(TopicConfig::default());
        assert_eq!(
            builder.subject(&msg("Line 3 Filler", "EVENT", "Over heat")),
            "Line_3_Filler.EdgeEvent.Over_heat"
        );
    }
}
