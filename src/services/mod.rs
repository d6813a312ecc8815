pub mod feed;
pub mod hub;
pub mod settings;
pub mod stats;
pub mod store;

pub use feed::{FeedConfig, FeedHandle, FeedView, SignalFeed, StatsView};
pub use hub::{SubscriberView, SubscriptionHub, RECENT_CAPACITY};
pub use settings::{Settings, SettingsStore};
pub use store::{SignalFilter, SignalStore};
