//! Topic naming for telemetry devices.
//!
//! Topics are namespaced by tenant and device class:
//!
//! - `in/<tenant>/<device-class>/<metric>` for readings
//! - `in/<tenant>/devicestatus` for the liveness indicator
//! - `in/<tenant>/<device-class>/will` for the disconnection indicator

use core::fmt::Write;
use heapless::String;

use crate::error::{ConfigError, SessionError};

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// Root level shared by every device topic.
pub const TOPIC_ROOT: &str = "in";

/// Owned topic string with inline storage.
pub type Topic = String<MAX_TOPIC_LEN>;

/// Tenant and device class used to build every topic a device publishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TopicLayout<'a> {
    /// Deployment / tenant identifier issued by the platform.
    pub tenant: &'a str,
    /// Device class, e.g. `esp32`.
    pub device_class: &'a str,
}

impl<'a> TopicLayout<'a> {
    pub const fn new(tenant: &'a str, device_class: &'a str) -> Self {
        Self {
            tenant,
            device_class,
        }
    }

    /// Checks that both levels are non-empty and free of separators and wildcards.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if is_plain_level(self.tenant) && is_plain_level(self.device_class) {
            Ok(())
        } else {
            Err(ConfigError::InvalidTopicLayout)
        }
    }

    /// `in/<tenant>/<device-class>/<metric>`
    pub fn metric_topic(&self, metric: &str) -> Result<Topic, SessionError> {
        self.build(format_args!(
            "{}/{}/{}/{}",
            TOPIC_ROOT, self.tenant, self.device_class, metric
        ))
    }

    /// `in/<tenant>/devicestatus`
    pub fn status_topic(&self) -> Result<Topic, SessionError> {
        self.build(format_args!("{}/{}/devicestatus", TOPIC_ROOT, self.tenant))
    }

    /// `in/<tenant>/<device-class>/will`
    pub fn will_topic(&self) -> Result<Topic, SessionError> {
        self.build(format_args!(
            "{}/{}/{}/will",
            TOPIC_ROOT, self.tenant, self.device_class
        ))
    }

    fn build(&self, args: core::fmt::Arguments<'_>) -> Result<Topic, SessionError> {
        let mut topic = Topic::new();
        topic
            .write_fmt(args)
            .map_err(|_| SessionError::InvalidTopic)?;
        Ok(topic)
    }
}

fn is_plain_level(level: &str) -> bool {
    !level.is_empty() && !level.contains(['/', '+', '#'])
}
